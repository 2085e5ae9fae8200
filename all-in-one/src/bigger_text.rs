use anyhow::Result;
use async_trait::async_trait;
use lib::{EngineRequest, Language, LanguageMapping, Translator};

/// 放大显示原文的工具引擎，不做翻译
pub struct BiggerText;

impl BiggerText {
    pub const NAME: &'static str = "Bigger Text";
}

#[async_trait]
impl Translator for BiggerText {
    fn language_mapping(&self) -> LanguageMapping {
        LanguageMapping::new()
    }

    fn fixed_languages(&self) -> Option<Vec<Language>> {
        Some(vec![Language::Auto, Language::Chinese, Language::English])
    }

    async fn translate(&self, request: &EngineRequest) -> Result<String> {
        Ok(request.content.clone())
    }
}

#[test]
fn test_fixed_languages() {
    use lib::{Engine, HttpEngine};
    use std::sync::Arc;

    let engine = Engine::Http(HttpEngine::new("bigger_text", BiggerText::NAME, Arc::new(BiggerText)));
    assert!(engine.supports(Language::English, Language::Chinese));
    assert!(!engine.supports(Language::English, Language::Japanese));
}
