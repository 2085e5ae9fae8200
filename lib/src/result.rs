use crate::error::TranslationError;
use crate::language::Language;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const UNSUPPORTED_LANGUAGE_TEXT: &str = "unsupported: this engine does not support the selected language pair";
pub const GENERIC_ERROR_TEXT: &str = "error: translation failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultStatus {
    Pending,
    Success,
    Error,
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationResult {
    /// 引擎名
    pub engine_name: String,
    /// 是否免费引擎，参与排序
    pub free: bool,
    /// 译文或错误提示
    pub basic_result: String,
    pub target_language: Option<Language>,
    pub status: ResultStatus,
    pub error: Option<String>,
}

impl TranslationResult {
    pub fn new(engine_name: impl Into<String>, free: bool) -> Self {
        Self {
            engine_name: engine_name.into(),
            free,
            basic_result: String::new(),
            target_language: None,
            status: ResultStatus::Pending,
            error: None,
        }
    }

    pub fn unsupported(engine_name: impl Into<String>, free: bool) -> Self {
        let mut result = Self::new(engine_name, free);
        result.basic_result = UNSUPPORTED_LANGUAGE_TEXT.to_string();
        result.status = ResultStatus::Unsupported;
        result
    }

    pub fn set_basic_result(&mut self, text: impl Into<String>) {
        self.basic_result = text.into();
        self.status = ResultStatus::Success;
        self.error = None;
    }

    /// 可识别的翻译错误显示具体信息，其它错误显示通用文本
    pub fn set_error(&mut self, error: &anyhow::Error) {
        self.error = Some(format!("{:#}", error));
        self.status = ResultStatus::Error;
        self.basic_result = match error.downcast_ref::<TranslationError>() {
            Some(e) => format!("error: {}", e),
            None => GENERIC_ERROR_TEXT.to_string(),
        };
    }

    pub fn is_terminal(&self) -> bool {
        self.status != ResultStatus::Pending
    }

    pub fn is_error(&self) -> bool {
        self.status == ResultStatus::Error
    }
}

/// 结果列表的默认排序：指定优先的引擎在前，其次免费引擎，同级按名字
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultSort {
    #[serde(default)]
    pub priority: Vec<String>,
}

impl ResultSort {
    pub fn new(priority: Vec<String>) -> Self {
        Self { priority }
    }

    pub fn compare(&self, a: &TranslationResult, b: &TranslationResult) -> Ordering {
        self.rank(a)
            .cmp(&self.rank(b))
            .then_with(|| b.free.cmp(&a.free))
            .then_with(|| a.engine_name.cmp(&b.engine_name))
    }

    fn rank(&self, result: &TranslationResult) -> usize {
        self.priority
            .iter()
            .position(|name| name == &result.engine_name)
            .unwrap_or(usize::MAX)
    }
}

#[test]
fn test_error_bodies() {
    let mut result = TranslationResult::new("Baidu", true);
    result.set_error(&TranslationError::Api("quota exceeded".to_string()).into());
    assert_eq!(result.basic_result, "error: quota exceeded");
    assert!(result.is_error());

    let mut result = TranslationResult::new("Baidu", true);
    result.set_error(&anyhow::anyhow!("connection reset"));
    assert_eq!(result.basic_result, GENERIC_ERROR_TEXT);
    assert_eq!(result.error.as_deref(), Some("connection reset"));
}

#[test]
fn test_unsupported_is_distinguishable() {
    let result = TranslationResult::unsupported("Baidu", true);
    assert_eq!(result.status, ResultStatus::Unsupported);
    assert!(result.is_terminal());
    assert!(!result.basic_result.starts_with("error:"));
}

#[test]
fn test_default_sort() {
    let sort = ResultSort::new(vec!["Zeta".to_string()]);
    let mut list = vec![
        TranslationResult::new("Beta", false),
        TranslationResult::new("Alpha", false),
        TranslationResult::new("Gamma", true),
        TranslationResult::new("Zeta", false),
    ];
    list.sort_by(|a, b| sort.compare(a, b));

    let names: Vec<&str> = list.iter().map(|r| r.engine_name.as_str()).collect();
    assert_eq!(names, vec!["Zeta", "Gamma", "Alpha", "Beta"]);
}
