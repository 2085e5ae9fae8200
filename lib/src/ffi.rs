use crate::error::TranslationError;
use crate::language::Language;
use anyhow::{anyhow, Result};
use language_tags::LanguageTag;
use serde::{Deserialize, Serialize};
use std::ffi::{c_char, CStr, CString};
use std::ptr;

/// `plugin_create(config_json, out_handle)`，成功返回空指针，失败返回错误字符串
pub type PluginCreate = unsafe extern "C" fn(*const c_char, *mut *mut PluginHandle) -> *mut c_char;
/// `plugin_manifest(handle)`，返回 [`PluginManifest`] 的 JSON
pub type PluginManifestFn = unsafe extern "C" fn(*mut PluginHandle) -> *mut c_char;
/// `plugin_translate(handle, request_json)`，返回 [`PluginResponse`] 的 JSON
pub type PluginTranslate = unsafe extern "C" fn(*mut PluginHandle, *const c_char) -> *mut c_char;
/// 释放插件分配的字符串
pub type PluginFreeString = unsafe extern "C" fn(*mut c_char);
pub type PluginDestroy = unsafe extern "C" fn(*mut PluginHandle);

#[repr(C)]
pub struct PluginHandle {
    _private: [u8; 0],
}

/// 插件自我描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// 引擎名
    pub name: String,
    /// 支持的语言，BCP47 代码，自动检测为 `auto`
    pub languages: Vec<String>,
}

impl PluginManifest {
    pub fn new(name: &str, languages: &[Language]) -> Self {
        Self {
            name: name.to_string(),
            languages: languages.iter().map(|l| l.code().to_string()).collect(),
        }
    }

    /// 解析语言列表，无法识别的代码被忽略
    pub fn languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self
            .languages
            .iter()
            .filter_map(|code| {
                if code == Language::Auto.code() {
                    return Some(Language::Auto);
                }
                let tag = LanguageTag::parse(code).ok()?;
                Language::try_from(&tag).ok()
            })
            .collect();
        languages.sort();
        languages.dedup();
        languages
    }
}

/// 一次插件调用的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PluginResponse {
    Ok { text: String },
    Err { recognized: bool, message: String },
}

impl PluginResponse {
    pub fn from_result(result: Result<String>) -> Self {
        match result {
            Ok(text) => PluginResponse::Ok { text },
            Err(e) => match e.downcast_ref::<TranslationError>() {
                Some(recognized) => PluginResponse::Err {
                    recognized: true,
                    message: recognized.to_string(),
                },
                None => PluginResponse::Err {
                    recognized: false,
                    message: format!("{:#}", e),
                },
            },
        }
    }

    /// 可识别的错误还原成 [`TranslationError::Plugin`]
    pub fn into_result(self) -> Result<String> {
        match self {
            PluginResponse::Ok { text } => Ok(text),
            PluginResponse::Err {
                recognized: true,
                message,
            } => Err(TranslationError::Plugin(message).into()),
            PluginResponse::Err { message, .. } => Err(anyhow!(message)),
        }
    }
}

/// 转成交给对方的 C 字符串，内部的 NUL 会被去掉
pub fn into_c_string(s: impl Into<String>) -> *mut c_char {
    let mut s = s.into();
    s.retain(|c| c != '\0');
    match CString::new(s) {
        Ok(s) => s.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// 回收 [`into_c_string`] 分配的字符串
///
/// # Safety
/// `ptr` 必须来自同一个库里的 [`into_c_string`]，且只能释放一次。
pub unsafe fn free_c_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

/// 复制一份对方传来的字符串，不获取所有权
///
/// # Safety
/// `ptr` 为空或指向以 NUL 结尾的有效字符串。
pub unsafe fn read_c_str(ptr: *const c_char) -> Result<String> {
    if ptr.is_null() {
        return Err(anyhow!("Null pointer received"));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(|s| s.to_owned())
        .map_err(|e| anyhow!("Invalid UTF-8: {}", e))
}

#[test]
fn test_recognized_errors_survive_the_boundary() {
    let response = PluginResponse::from_result(Err(TranslationError::Api("quota exceeded".to_string()).into()));
    assert_eq!(
        response,
        PluginResponse::Err {
            recognized: true,
            message: "quota exceeded".to_string()
        }
    );

    let json = serde_json::to_string(&response).unwrap();
    let back: PluginResponse = serde_json::from_str(&json).unwrap();
    let err = back.into_result().unwrap_err();
    assert_eq!(
        err.downcast_ref::<TranslationError>(),
        Some(&TranslationError::Plugin("quota exceeded".to_string()))
    );

    let err = PluginResponse::from_result(Err(anyhow!("timeout"))).into_result().unwrap_err();
    assert!(err.downcast_ref::<TranslationError>().is_none());
}

#[test]
fn test_manifest_languages() {
    let manifest = PluginManifest {
        name: "Demo".to_string(),
        languages: vec!["en".into(), "zh-CN".into(), "auto".into(), "xx-unknown".into(), "zh-TW".into()],
    };
    assert_eq!(
        manifest.languages(),
        vec![Language::Auto, Language::Chinese, Language::English]
    );
    assert_eq!(
        PluginManifest::new("Demo", &[Language::Japanese]).languages,
        vec!["ja".to_string()]
    );
}

#[test]
fn test_c_string_helpers() -> Result<()> {
    let ptr = into_c_string("a\0b");
    let copied = unsafe { read_c_str(ptr)? };
    unsafe { free_c_string(ptr) };
    assert_eq!(copied, "ab");
    assert!(unsafe { read_c_str(ptr::null()) }.is_err());
    Ok(())
}
