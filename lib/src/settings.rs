use crate::error::Result;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// 键值设置存储，用于保存选中的引擎和对话记忆策略
pub trait SettingsStore: Send + Sync {
    fn read(&self, key: &str) -> Option<String>;

    fn write(&self, key: &str, value: &str) -> Result<()>;

    fn read_bool(&self, key: &str, default: bool) -> bool {
        self.read(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn write_bool(&self, key: &str, value: bool) -> Result<()> {
        self.write(key, &value.to_string())
    }
}

#[derive(Default)]
pub struct MemorySettings {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn read(&self, key: &str) -> Option<String> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.get(key).cloned()
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// 保存在 TOML 文件里的设置，每次写入都会整体落盘
pub struct FileSettings {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileSettings {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str(&content)?
        } else {
            BTreeMap::new()
        };
        debug!("Loaded {} settings from {}", values.len(), path.display());

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }
}

impl SettingsStore for FileSettings {
    fn read(&self, key: &str) -> Option<String> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.get(key).cloned()
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, toml::to_string(&*values)?)?;
        Ok(())
    }
}

#[test]
fn test_memory_settings() -> Result<()> {
    let settings = MemorySettings::new();
    assert!(!settings.read_bool("Baidu_SELECTED", false));

    settings.write_bool("Baidu_SELECTED", true)?;
    assert!(settings.read_bool("Baidu_SELECTED", false));

    settings.write("Baidu_SELECTED", "not a bool")?;
    assert!(settings.read_bool("Baidu_SELECTED", true));
    Ok(())
}

#[test]
fn test_file_settings_persist() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested").join("settings.toml");

    {
        let settings = FileSettings::open(&path)?;
        settings.write("chat_memory_m1", "chat_memory#fixed_length#4")?;
        settings.write_bool("Baidu_SELECTED", true)?;
    }

    let reopened = FileSettings::open(&path)?;
    assert_eq!(
        reopened.read("chat_memory_m1").as_deref(),
        Some("chat_memory#fixed_length#4")
    );
    assert!(reopened.read_bool("Baidu_SELECTED", false));
    Ok(())
}
