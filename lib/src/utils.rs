use crate::engine::LanguageMapping;
use crate::error::TranslationError;
use crate::language::Language;
use crate::{EngineRequest, ScriptRuntime, Translator};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use handlebars::{
    Context, Handlebars, Helper, HelperResult, Output, RenderContext, RenderErrorReason,
};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
#[cfg(test)]
use serde_json::json;

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

pub fn format_messages<T: Serialize>(template: &str, data: &T) -> Result<String> {
    let mut reg = Handlebars::new();
    reg.register_escape_fn(handlebars::no_escape);
    reg.register_helper(
        "json",
        Box::new(
            |h: &Helper,
             _: &Handlebars,
             _: &Context,
             _: &mut RenderContext,
             out: &mut dyn Output|
             -> HelperResult {
                let param = h
                    .param(0)
                    .ok_or(RenderErrorReason::ParamNotFoundForIndex("json", 0))?;

                let s = serde_json::to_string(param.value())
                    .map_err(|e| RenderErrorReason::Other(e.to_string()))?;
                out.write(s.as_str())?;
                Ok(())
            },
        ),
    );
    reg.render_template(template, data).map_err(|e| anyhow!(e))
}

/// 模型提示词模板可用的变量
#[derive(Debug, Serialize)]
pub struct PromptContext<'a> {
    pub content: &'a str,
    pub source_language: &'a str,
    pub target_language: &'a str,
}

pub fn language_mapping(pairs: &[(Language, &str)]) -> LanguageMapping {
    pairs
        .iter()
        .map(|(lang, code)| (*lang, code.to_string()))
        .collect()
}

/// 测试用引擎：返回固定前缀加原文，可选延迟
pub struct EchoTranslator {
    pub prefix: String,
    pub mapping: LanguageMapping,
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl EchoTranslator {
    pub fn new(prefix: &str, languages: &[Language]) -> Self {
        Self {
            prefix: prefix.to_string(),
            mapping: languages.iter().map(|l| (*l, l.code().to_string())).collect(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Translator for EchoTranslator {
    fn language_mapping(&self) -> LanguageMapping {
        self.mapping.clone()
    }

    async fn translate(&self, request: &EngineRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(format!("{}{}", self.prefix, request.content))
    }
}

/// 测试用引擎：总是失败，`recognized` 决定是否抛出可识别的翻译错误
pub struct FailingTranslator {
    pub message: String,
    pub recognized: bool,
}

impl FailingTranslator {
    pub fn new(message: &str, recognized: bool) -> Self {
        Self {
            message: message.to_string(),
            recognized,
        }
    }
}

#[async_trait]
impl Translator for FailingTranslator {
    fn language_mapping(&self) -> LanguageMapping {
        Language::ALL.iter().map(|l| (*l, l.code().to_string())).collect()
    }

    async fn translate(&self, _request: &EngineRequest) -> Result<String> {
        if self.recognized {
            Err(TranslationError::Api(self.message.clone()).into())
        } else {
            bail!("{}", self.message)
        }
    }
}

/// 测试用引擎：翻译时直接 panic
#[cfg(test)]
pub struct PanickingTranslator;

#[cfg(test)]
#[async_trait]
impl Translator for PanickingTranslator {
    fn language_mapping(&self) -> LanguageMapping {
        Language::ALL.iter().map(|l| (*l, l.code().to_string())).collect()
    }

    async fn translate(&self, _request: &EngineRequest) -> Result<String> {
        panic!("translator crashed")
    }
}

/// 测试用脚本运行时：记录同时执行的最大数量
pub struct CountingScript {
    pub running: Arc<AtomicUsize>,
    pub max_running: Arc<AtomicUsize>,
    pub delay: Duration,
}

impl CountingScript {
    pub fn new(running: Arc<AtomicUsize>, max_running: Arc<AtomicUsize>, delay: Duration) -> Self {
        Self {
            running,
            max_running,
            delay,
        }
    }
}

impl ScriptRuntime for CountingScript {
    fn evaluate(&self, request: &EngineRequest) -> Result<String> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(format!("script:{}", request.content))
    }
}

#[test]
fn test_format_messages() -> Result<()> {
    let context = PromptContext {
        content: "Hello World!",
        source_language: "English",
        target_language: "Chinese",
    };

    let template = r##"Translate the following {{ source_language }} text into {{ target_language }}:
{{ content }}"##;

    let formatted = format_messages(template, &context)?;

    assert_eq!(
        formatted,
        "Translate the following English text into Chinese:\nHello World!"
    );

    Ok(())
}

#[test]
fn test_format_messages_json_helper() -> Result<()> {
    let data = json!({
        "terms": [
            { "source": "hello", "target": "你好" },
        ],
    });

    let formatted = format_messages("{{ json terms }}", &data)?;

    assert_eq!(formatted, r#"[{"source":"hello","target":"你好"}]"#);

    Ok(())
}

#[test]
fn test_format_messages_does_not_escape() -> Result<()> {
    let data = json!({ "content": "a < b & c" });
    assert_eq!(format_messages("{{ content }}", &data)?, "a < b & c");
    Ok(())
}
