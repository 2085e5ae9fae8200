use thiserror::Error;

/// 引擎在翻译过程中抛出的可识别错误
///
/// 调度器会把这类错误显示为 `error: <message>`，其它错误一律显示为通用错误文本。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslationError {
    #[error("{0}")]
    Api(String),

    #[error("missing language code for {0}")]
    MissingLanguage(String),

    #[error("empty translation received")]
    EmptyResult,

    #[error("plugin error: {0}")]
    Plugin(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Plugin load error: {0}")]
    PluginLoad(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, Error>;
