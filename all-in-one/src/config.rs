use lib::error::{Error, Result};
use lib::DispatcherConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub engines: EnginesConfig,
    /// 引擎选择与聊天记忆的保存位置，不设置时只保存在内存中
    #[serde(default)]
    pub settings_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 没有设置 `RUST_LOG` 时使用的过滤规则
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnginesConfig {
    #[serde(default)]
    pub baidu: Option<BaiduConfig>,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    /// 插件目录，递归扫描其中的动态库
    #[serde(default)]
    pub plugin_dir: Option<PathBuf>,
    /// 按插件文件名区分的配置，原样传给插件
    #[serde(default)]
    pub plugins: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaiduConfig {
    pub app_id: String,
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub name: String,
    pub max_context_tokens: usize,
    #[serde(default)]
    pub token_counter_id: Option<String>,
    #[serde(default)]
    pub free: bool,
    #[serde(default)]
    pub system_prompt: Option<String>,
    pub api_base: String,
    pub api_key: String,
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[test]
fn test_empty_config() -> Result<()> {
    let config: AppConfig = toml::from_str("")?;
    assert_eq!(config.log.level, "info");
    assert!(config.dispatcher.parallel);
    assert!(config.engines.models.is_empty());
    assert!(config.settings_path.is_none());
    Ok(())
}

#[test]
fn test_config_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("conf").join("config.toml");
    std::fs::create_dir_all(dir.path().join("conf"))?;
    std::fs::write(
        &path,
        r#"
[log]
level = "debug"

[dispatcher]
parallel = false
default_engines = ["Baidu"]

[engines]
plugin_dir = "plugins"

[engines.baidu]
app_id = "2015063000000001"
secret = "12345678"

[[engines.models]]
id = "deepseek-chat"
name = "DeepSeek"
max_context_tokens = 64000
api_base = "https://api.deepseek.com"
api_key = "sk-xxx"

[engines.plugins.demo]
token = "abc"
free = true
"#,
    )?;

    let config = AppConfig::from_file(&path)?;
    assert_eq!(config.log.level, "debug");
    assert!(!config.dispatcher.parallel);
    assert_eq!(config.engines.baidu.as_ref().map(|b| b.secret.as_str()), Some("12345678"));
    assert_eq!(config.engines.models[0].max_context_tokens, 64000);
    assert_eq!(config.engines.plugins["demo"]["free"], Value::Bool(true));

    let saved = dir.path().join("out").join("config.toml");
    config.save_to_file(&saved)?;
    let reloaded = AppConfig::from_file(&saved)?;
    assert_eq!(reloaded.engines.models[0].id, "deepseek-chat");
    assert_eq!(reloaded.engines.plugin_dir, Some(PathBuf::from("plugins")));
    Ok(())
}

#[test]
fn test_missing_file() {
    assert!(matches!(AppConfig::from_file("/nonexistent/config.toml"), Err(Error::Config(_))));
}
