pub mod aggregator;
pub mod chat;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod ffi_proxy;
pub mod history;
pub mod language;
pub mod memory;
pub mod registry;
pub mod result;
pub mod settings;
pub mod task;
pub mod utils;

pub use aggregator::DispatchState;
pub use chat::{ChatMessage, ChatMessageReq, Model, ModelBuilder, ModelClient, TokenCounter};
pub use config::DispatcherConfig;
pub use dispatcher::{DispatcherContext, TranslationDispatcher};
pub use engine::{Engine, HttpEngine, LanguageMapping, ModelEngine, ScriptEngine};
pub use error::TranslationError;
pub use language::Language;
pub use memory::ChatMemory;
pub use registry::{EngineLoader, EngineRegistry, RegistryEvent};
pub use result::{ResultSort, ResultStatus, TranslationResult};
pub use task::TranslationTask;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 交给具体引擎执行的一次翻译请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineRequest {
    /// 原文
    pub content: String,
    /// 源语言
    pub source_language: Language,
    /// 目标语言
    pub target_language: Language,
    /// 引擎自己的源语言代码
    pub source_code: String,
    /// 引擎自己的目标语言代码
    pub target_code: String,
}

#[async_trait]
pub trait Translator: Send + Sync {
    /// 语言到服务商代码的映射表
    fn language_mapping(&self) -> LanguageMapping;

    /// 固定支持的语言；映射表为空的工具类引擎需要声明
    fn fixed_languages(&self) -> Option<Vec<Language>> {
        None
    }

    /// 翻译
    async fn translate(&self, request: &EngineRequest) -> Result<String>;
}

/// 从 JSON 配置构造引擎，插件导出宏依赖它
#[async_trait]
pub trait FromConfig: Sized {
    /// 创建翻译实例
    async fn new(config: Value) -> Result<Self>;
}

/// 插件引擎的执行入口，调用是阻塞的，同一批次内会被串行化
pub trait ScriptRuntime: Send + Sync {
    fn evaluate(&self, request: &EngineRequest) -> Result<String>;
}
