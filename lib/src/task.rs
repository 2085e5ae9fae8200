use crate::chat::{ChatMessage, Model, ModelClient};
use crate::engine::{mapped_code, Engine, LanguageMapping};
use crate::error::TranslationError;
use crate::language::Language;
use crate::memory::ChatMemory;
use crate::result::TranslationResult;
use crate::utils::{format_messages, PromptContext};
use crate::{EngineRequest, ScriptRuntime, Translator};
use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// 各类引擎各自的执行逻辑
pub enum TaskBody {
    Http {
        translator: Arc<dyn Translator>,
        mapping: LanguageMapping,
    },
    Script {
        runtime: Arc<dyn ScriptRuntime>,
    },
    Model {
        model: Model,
        client: Arc<dyn ModelClient>,
        memory: ChatMemory,
        conversation: Arc<Mutex<Vec<ChatMessage>>>,
    },
}

/// 一次翻译调用中绑定到单个引擎的任务，执行完即丢弃
pub struct TranslationTask {
    /// 原文
    pub source_string: String,
    /// 源语言
    pub source_language: Language,
    /// 目标语言
    pub target_language: Language,
    pub result: TranslationResult,
    body: TaskBody,
    serialized: bool,
    mutex: Option<Arc<Mutex<()>>>,
}

impl TranslationTask {
    pub fn new(
        engine: &Engine,
        body: TaskBody,
        source_string: impl Into<String>,
        source_language: Language,
        target_language: Language,
    ) -> Self {
        let mut result = TranslationResult::new(engine.name(), engine.is_free());
        result.target_language = Some(target_language);
        Self {
            source_string: source_string.into(),
            source_language,
            target_language,
            result,
            body,
            serialized: engine.requires_serialized_execution(),
            mutex: None,
        }
    }

    pub fn engine_name(&self) -> &str {
        &self.result.engine_name
    }

    pub fn body(&self) -> &TaskBody {
        &self.body
    }

    pub fn requires_serialized_execution(&self) -> bool {
        self.serialized
    }

    /// 绑定批次共享的执行锁，只对需要串行执行的任务生效
    pub fn set_mutex(&mut self, mutex: Arc<Mutex<()>>) {
        if self.serialized {
            self.mutex = Some(mutex);
        }
    }

    /// 执行翻译并把译文写入 `result`；失败时由调用方处理错误
    pub async fn translate(&mut self) -> Result<()> {
        debug!("translate start: {}", self.engine_name());
        let text = match &self.body {
            TaskBody::Http {
                translator,
                mapping,
            } => {
                let request = self.request(mapping);
                translator.translate(&request).await?
            }
            TaskBody::Script { runtime } => {
                let request = self.request(&LanguageMapping::new());
                let runtime = runtime.clone();
                let _guard = match &self.mutex {
                    Some(mutex) => Some(mutex.lock().await),
                    None => None,
                };
                tokio::task::spawn_blocking(move || runtime.evaluate(&request))
                    .await
                    .map_err(|e| anyhow!("script evaluation aborted: {}", e))??
            }
            TaskBody::Model {
                model,
                client,
                memory,
                conversation,
            } => {
                self.translate_model(model, client.as_ref(), memory, conversation)
                    .await?
            }
        };

        if text.trim().is_empty() {
            return Err(TranslationError::EmptyResult.into());
        }
        self.result.set_basic_result(text);
        debug!("translate done: {}", self.engine_name());
        Ok(())
    }

    fn request(&self, mapping: &LanguageMapping) -> EngineRequest {
        EngineRequest {
            content: self.source_string.clone(),
            source_language: self.source_language,
            target_language: self.target_language,
            source_code: mapped_code(mapping, self.source_language),
            target_code: mapped_code(mapping, self.target_language),
        }
    }

    async fn translate_model(
        &self,
        model: &Model,
        client: &dyn ModelClient,
        memory: &ChatMemory,
        conversation: &Mutex<Vec<ChatMessage>>,
    ) -> Result<String> {
        let system_prompt = format_messages(
            &model.system_prompt,
            &PromptContext {
                content: &self.source_string,
                source_language: self.source_language.display_name(),
                target_language: self.target_language.display_name(),
            },
        )?;
        let memory = memory.clone().with_system_prompt(&system_prompt);

        let history = {
            let mut conversation = conversation.lock().await;
            conversation.push(ChatMessage::user(&model.id, &self.source_string));
            conversation.clone()
        };
        let messages = memory
            .included_messages(&history)
            .iter()
            .map(ChatMessage::to_req)
            .collect();

        match client.chat(model, &system_prompt, messages).await {
            Ok(text) => {
                conversation
                    .lock()
                    .await
                    .push(ChatMessage::bot(&model.id, &text));
                Ok(text)
            }
            Err(e) => {
                conversation
                    .lock()
                    .await
                    .push(ChatMessage::bot_error(&model.id, e.to_string()));
                Err(e)
            }
        }
    }
}

#[cfg(test)]
use crate::chat::{ChatMessageReq, ModelBuilder};
#[cfg(test)]
use crate::engine::{HttpEngine, ModelEngine};
#[cfg(test)]
use crate::result::ResultStatus;
#[cfg(test)]
use crate::utils::EchoTranslator;

#[cfg(test)]
struct RecordingClient {
    seen: std::sync::Mutex<Vec<Vec<ChatMessageReq>>>,
    fail: bool,
}

#[cfg(test)]
#[async_trait::async_trait]
impl ModelClient for RecordingClient {
    async fn chat(&self, _model: &Model, system_prompt: &str, messages: Vec<ChatMessageReq>) -> Result<String> {
        assert!(system_prompt.contains("Chinese"));
        self.seen.lock().unwrap().push(messages.clone());
        if self.fail {
            return Err(anyhow!("model offline"));
        }
        Ok(format!("reply to {}", messages.last().map(|m| m.content.as_str()).unwrap_or("")))
    }
}

#[tokio::test]
async fn test_http_task_fills_result() -> Result<()> {
    let translator = Arc::new(EchoTranslator::new("echo:", &Language::ALL));
    let engine = Engine::Http(HttpEngine::new("echo", "Echo", translator.clone()));
    let body = TaskBody::Http {
        translator: translator.clone(),
        mapping: LanguageMapping::new(),
    };
    let mut task = TranslationTask::new(&engine, body, "hello", Language::English, Language::Chinese);

    task.translate().await?;

    assert_eq!(task.result.basic_result, "echo:hello");
    assert_eq!(task.result.status, ResultStatus::Success);
    assert_eq!(task.result.target_language, Some(Language::Chinese));
    assert_eq!(translator.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_model_task_records_conversation() -> Result<()> {
    let model = ModelBuilder::default()
        .id("m1")
        .name("Model One")
        .max_context_tokens(4096usize)
        .build()?;
    let client = Arc::new(RecordingClient { seen: Default::default(), fail: false });
    let engine = ModelEngine::new(model.clone(), client.clone());
    let conversation = engine.conversation.clone();
    let wrapped = Engine::Model(engine);

    for text in ["first", "second"] {
        let body = TaskBody::Model {
            model: model.clone(),
            client: client.clone(),
            memory: ChatMemory::FixedMsgLength(2),
            conversation: conversation.clone(),
        };
        let mut task = TranslationTask::new(&wrapped, body, text, Language::English, Language::Chinese);
        task.translate().await?;
        assert_eq!(task.result.basic_result, format!("reply to {}", text));
    }

    let seen = client.seen.lock().unwrap().clone();
    assert_eq!(seen[0].len(), 1);
    // 第二次请求带上了上一轮的回复
    assert_eq!(seen[1].iter().map(|m| m.content.as_str()).collect::<Vec<_>>(), vec!["reply to first", "second"]);
    assert_eq!(conversation.lock().await.len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_model_task_failure_leaves_error_message() -> Result<()> {
    let model = ModelBuilder::default()
        .id("m2")
        .name("Model Two")
        .max_context_tokens(4096usize)
        .build()?;
    let client = Arc::new(RecordingClient { seen: Default::default(), fail: true });
    let engine = ModelEngine::new(model.clone(), client.clone());
    let conversation = engine.conversation.clone();
    let body = TaskBody::Model {
        model,
        client,
        memory: ChatMemory::default(),
        conversation: conversation.clone(),
    };
    let mut task = TranslationTask::new(&Engine::Model(engine), body, "hi", Language::English, Language::Chinese);

    assert!(task.translate().await.is_err());
    let history = conversation.lock().await;
    assert_eq!(history.len(), 2);
    assert!(history[1].error.is_some());
    Ok(())
}
