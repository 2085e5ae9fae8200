use crate::chat::{ChatMessage, Model, ModelClient};
use crate::language::Language;
use crate::{ScriptRuntime, Translator};
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tokio::sync::Mutex;

pub type LanguageMapping = BTreeMap<Language, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Http,
    Script,
    Model,
}

/// 内置的在线引擎，任务共享同一个翻译器原型
#[derive(Clone)]
pub struct HttpEngine {
    pub id: String,
    pub name: String,
    pub free: bool,
    pub mapping: LanguageMapping,
    pub fixed_languages: Option<Vec<Language>>,
    pub translator: Arc<dyn Translator>,
}

impl HttpEngine {
    pub fn new(id: impl Into<String>, name: impl Into<String>, translator: Arc<dyn Translator>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            free: false,
            mapping: translator.language_mapping(),
            fixed_languages: translator.fixed_languages(),
            translator,
        }
    }

    pub fn free(mut self, free: bool) -> Self {
        self.free = free;
        self
    }
}

/// 用户安装的插件引擎
#[derive(Clone)]
pub struct ScriptEngine {
    pub id: String,
    pub name: String,
    pub free: bool,
    pub languages: Vec<Language>,
    pub runtime: Arc<dyn ScriptRuntime>,
}

/// 大模型引擎，持有该模型的对话记录
#[derive(Clone)]
pub struct ModelEngine {
    pub model: Model,
    pub client: Arc<dyn ModelClient>,
    pub conversation: Arc<Mutex<Vec<ChatMessage>>>,
}

impl ModelEngine {
    pub fn new(model: Model, client: Arc<dyn ModelClient>) -> Self {
        Self {
            model,
            client,
            conversation: Arc::new(Mutex::new(vec![])),
        }
    }
}

#[derive(Clone)]
pub enum Engine {
    Http(HttpEngine),
    Script(ScriptEngine),
    Model(ModelEngine),
}

impl Engine {
    pub fn id(&self) -> &str {
        match self {
            Engine::Http(e) => &e.id,
            Engine::Script(e) => &e.id,
            Engine::Model(e) => &e.model.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Engine::Http(e) => &e.name,
            Engine::Script(e) => &e.name,
            Engine::Model(e) => &e.model.name,
        }
    }

    pub fn kind(&self) -> EngineKind {
        match self {
            Engine::Http(_) => EngineKind::Http,
            Engine::Script(_) => EngineKind::Script,
            Engine::Model(_) => EngineKind::Model,
        }
    }

    pub fn is_free(&self) -> bool {
        match self {
            Engine::Http(e) => e.free,
            Engine::Script(e) => e.free,
            Engine::Model(e) => e.model.free,
        }
    }

    /// 插件引擎共享一把执行锁
    pub fn requires_serialized_execution(&self) -> bool {
        matches!(self, Engine::Script(_))
    }

    pub fn supported_languages(&self) -> Vec<Language> {
        match self {
            Engine::Http(e) => e
                .fixed_languages
                .clone()
                .unwrap_or_else(|| e.mapping.keys().copied().collect()),
            Engine::Script(e) => e.languages.clone(),
            Engine::Model(_) => Language::ALL.to_vec(),
        }
    }

    pub fn supports(&self, source: Language, target: Language) -> bool {
        let languages = self.supported_languages();
        languages.contains(&source) && languages.contains(&target)
    }

    /// 设置里保存选中状态的键
    pub fn select_key(&self) -> String {
        format!("{}_SELECTED", self.name())
    }
}

/// 服务商代码；映射表里没有时退回 BCP47 代码
pub fn mapped_code(mapping: &LanguageMapping, language: Language) -> String {
    mapping
        .get(&language)
        .cloned()
        .unwrap_or_else(|| language.code().to_string())
}

impl Debug for Engine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("kind", &self.kind())
            .field("id", &self.id())
            .field("name", &self.name())
            .field("free", &self.is_free())
            .finish()
    }
}

#[cfg(test)]
use crate::utils::{language_mapping, EchoTranslator};

#[test]
fn test_supported_languages_from_mapping() {
    let mut translator = EchoTranslator::new("", &[]);
    translator.mapping = language_mapping(&[
        (Language::Auto, "auto"),
        (Language::Chinese, "zh"),
        (Language::Japanese, "jp"),
    ]);
    let translator = Arc::new(translator);
    let engine = Engine::Http(HttpEngine::new("baidu", "Baidu", translator));

    assert!(engine.supports(Language::Auto, Language::Chinese));
    assert!(!engine.supports(Language::Auto, Language::English));
    let Engine::Http(http) = &engine else {
        unreachable!()
    };
    assert_eq!(mapped_code(&http.mapping, Language::Japanese), "jp");
    assert_eq!(mapped_code(&http.mapping, Language::English), "en");
    assert_eq!(engine.select_key(), "Baidu_SELECTED");
    assert!(!engine.requires_serialized_execution());
}
