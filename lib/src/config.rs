use crate::language::Language;
use crate::result::ResultSort;
use serde::{Deserialize, Serialize};
#[cfg(test)]
use crate::error::Result;

fn default_parallel() -> bool {
    true
}

fn default_source_language() -> Language {
    Language::DEFAULT_SOURCE
}

fn default_target_language() -> Language {
    Language::DEFAULT_TARGET
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// 并行翻译；关闭时按选择顺序逐个执行
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    /// 用户从未选择过引擎时默认选中的引擎名
    #[serde(default)]
    pub default_engines: Vec<String>,
    /// 结果列表中优先显示的引擎名
    #[serde(default)]
    pub result_priority: Vec<String>,
    /// 未指定语言时使用的源语言与目标语言
    #[serde(default = "default_source_language")]
    pub source_language: Language,
    #[serde(default = "default_target_language")]
    pub target_language: Language,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            parallel: default_parallel(),
            default_engines: vec![],
            result_priority: vec![],
            source_language: default_source_language(),
            target_language: default_target_language(),
        }
    }
}

impl DispatcherConfig {
    pub fn result_sort(&self) -> ResultSort {
        ResultSort::new(self.result_priority.clone())
    }
}

#[test]
fn test_dispatcher_config_defaults() -> Result<()> {
    let config: DispatcherConfig = toml::from_str("")?;
    assert!(config.parallel);
    assert!(config.default_engines.is_empty());
    assert_eq!(config.source_language, Language::English);
    assert_eq!(config.target_language, Language::Chinese);

    let config: DispatcherConfig = toml::from_str(
        r#"
parallel = false
default_engines = ["Baidu", "Bigger Text"]
result_priority = ["Baidu"]
target_language = "Japanese"
"#,
    )?;
    assert!(!config.parallel);
    assert_eq!(config.default_engines.len(), 2);
    assert_eq!(config.target_language, Language::Japanese);
    assert_eq!(config.result_sort().priority, vec!["Baidu".to_string()]);
    Ok(())
}
