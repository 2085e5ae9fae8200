use crate::engine::{Engine, ScriptEngine};
use crate::error::{Error, Result};
use crate::ffi::{
    read_c_str, PluginCreate, PluginDestroy, PluginFreeString, PluginHandle, PluginManifest, PluginManifestFn,
    PluginResponse, PluginTranslate,
};
use crate::registry::EngineLoader;
use crate::{EngineRequest, ScriptRuntime};
use anyhow::anyhow;
use libloading::Library;
use serde_json::Value;
use std::collections::HashMap;
use std::ffi::{c_char, CString};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

#[cfg(windows)]
pub const PLUGIN_EXTENSIONS: &[&str] = &["dll"];
#[cfg(any(target_os = "linux", target_os = "android"))]
pub const PLUGIN_EXTENSIONS: &[&str] = &["so"];
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub const PLUGIN_EXTENSIONS: &[&str] = &["dylib"];
#[cfg(not(any(
    target_os = "windows",
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
)))]
pub const PLUGIN_EXTENSIONS: &[&str] = &[];

/// 动态库插件；翻译调用是阻塞的
pub struct ProxyTranslator {
    handle: *mut PluginHandle,
    manifest: PluginManifest,
    translate: PluginTranslate,
    free_string: PluginFreeString,
    destroy: PluginDestroy,
    // 必须最后释放，函数指针都指向它
    _lib: Library,
}

// 插件句柄只通过导出函数访问，导出函数自己负责同步
unsafe impl Send for ProxyTranslator {}
unsafe impl Sync for ProxyTranslator {}

impl ProxyTranslator {
    pub fn load(path: &Path, config: &Value) -> Result<Self> {
        let load_err = |e: &dyn std::fmt::Display| Error::PluginLoad(format!("{}: {}", path.display(), e));

        unsafe {
            let lib = Library::new(path).map_err(|e| load_err(&e))?;
            let create: PluginCreate = *lib.get::<PluginCreate>(b"plugin_create").map_err(|e| load_err(&e))?;
            let manifest_fn: PluginManifestFn =
                *lib.get::<PluginManifestFn>(b"plugin_manifest").map_err(|e| load_err(&e))?;
            let translate: PluginTranslate =
                *lib.get::<PluginTranslate>(b"plugin_translate").map_err(|e| load_err(&e))?;
            let free_string: PluginFreeString =
                *lib.get::<PluginFreeString>(b"plugin_free_string").map_err(|e| load_err(&e))?;
            let destroy: PluginDestroy = *lib.get::<PluginDestroy>(b"plugin_destroy").map_err(|e| load_err(&e))?;

            let config = CString::new(serde_json::to_string(config)?).map_err(|e| load_err(&e))?;
            let mut handle: *mut PluginHandle = ptr::null_mut();
            let err = create(config.as_ptr(), &mut handle);
            if !err.is_null() {
                let message = take_string(free_string, err).unwrap_or_else(|e| e.to_string());
                return Err(load_err(&message));
            }
            if handle.is_null() {
                return Err(load_err(&"plugin returned a null handle"));
            }

            let manifest = take_string(free_string, manifest_fn(handle))
                .and_then(|json| Ok(serde_json::from_str::<PluginManifest>(&json)?));
            let manifest = match manifest {
                Ok(manifest) => manifest,
                Err(e) => {
                    destroy(handle);
                    return Err(load_err(&e));
                }
            };

            Ok(Self {
                handle,
                manifest,
                translate,
                free_string,
                destroy,
                _lib: lib,
            })
        }
    }

    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    pub fn into_engine(self, id: impl Into<String>, free: bool) -> Engine {
        Engine::Script(ScriptEngine {
            id: id.into(),
            name: self.manifest.name.clone(),
            free,
            languages: self.manifest.languages(),
            runtime: Arc::new(self),
        })
    }
}

impl ScriptRuntime for ProxyTranslator {
    fn evaluate(&self, request: &EngineRequest) -> anyhow::Result<String> {
        let request = CString::new(serde_json::to_string(request)?)?;
        let response = unsafe {
            let raw = (self.translate)(self.handle, request.as_ptr());
            take_string(self.free_string, raw)?
        };
        let response: PluginResponse = serde_json::from_str(&response)?;
        response.into_result()
    }
}

impl Drop for ProxyTranslator {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            unsafe { (self.destroy)(self.handle) };
            self.handle = ptr::null_mut();
        }
    }
}

/// 复制插件返回的字符串并交还给插件释放
unsafe fn take_string(free: PluginFreeString, raw: *mut c_char) -> anyhow::Result<String> {
    if raw.is_null() {
        return Err(anyhow!("plugin returned a null string"));
    }
    let copied = read_c_str(raw);
    free(raw);
    copied
}

/// 递归查找目录下的动态库
pub fn discover_plugins<P: AsRef<Path>>(root: P) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                // Windows 不区分大小写
                .map(|ext| PLUGIN_EXTENSIONS.iter().any(|p| p.eq_ignore_ascii_case(ext)))
                .unwrap_or(false)
        })
        .map(|e| e.into_path())
        .collect()
}

/// 插件目录的加载器；配置按文件名（不含扩展名）查找，`free` 字段决定是否免费
pub fn plugin_loader(root: PathBuf, configs: HashMap<String, Value>) -> EngineLoader {
    Box::pin(async move {
        let engines = tokio::task::spawn_blocking(move || load_plugins(&root, &configs)).await?;
        Ok(engines)
    })
}

fn load_plugins(root: &Path, configs: &HashMap<String, Value>) -> Vec<Engine> {
    let mut engines = vec![];
    for path in discover_plugins(root) {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let config = configs.get(&stem).cloned().unwrap_or_else(|| Value::Object(Default::default()));
        let free = config.get("free").and_then(Value::as_bool).unwrap_or(false);

        match ProxyTranslator::load(&path, &config) {
            Ok(plugin) => {
                info!("Loaded plugin {} from {}", plugin.manifest().name, path.display());
                engines.push(plugin.into_engine(format!("plugin_{}", stem), free));
            }
            Err(e) => warn!("Skipping plugin: {}", e),
        }
    }
    engines
}

#[cfg(test)]
fn plugin_file_name(stem: &str) -> Option<String> {
    PLUGIN_EXTENSIONS.first().map(|ext| format!("{}.{}", stem, ext))
}

#[test]
fn test_discover_plugins() -> anyhow::Result<()> {
    let Some(name) = plugin_file_name("demo") else {
        return Ok(());
    };
    let dir = tempfile::tempdir()?;
    std::fs::create_dir(dir.path().join("nested"))?;
    std::fs::write(dir.path().join(&name), b"")?;
    std::fs::write(dir.path().join("nested").join(&name), b"")?;
    std::fs::write(dir.path().join("readme.txt"), b"")?;

    let found = discover_plugins(dir.path());
    assert_eq!(found.len(), 2);
    assert!(found.iter().all(|p| p.file_name().and_then(|n| n.to_str()) == Some(name.as_str())));
    Ok(())
}

#[tokio::test]
async fn test_broken_plugin_is_skipped() -> anyhow::Result<()> {
    let Some(name) = plugin_file_name("broken") else {
        return Ok(());
    };
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join(&name), b"not a library")?;

    assert!(ProxyTranslator::load(&dir.path().join(&name), &Value::Null).is_err());
    let engines = plugin_loader(dir.path().to_path_buf(), HashMap::new()).await?;
    assert!(engines.is_empty());
    Ok(())
}
