use crate::utils::now_millis;
use anyhow::Result;
use async_trait::async_trait;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatSender {
    User,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub bot_id: String,
    pub sender: ChatSender,
    pub content: String,
    /// 非空表示这是一条请求失败后留下的错误消息
    pub error: Option<String>,
    /// 毫秒时间戳
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn user(bot_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(bot_id.into(), ChatSender::User, content.into(), None, now_millis())
    }

    pub fn bot(bot_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(bot_id.into(), ChatSender::Bot, content.into(), None, now_millis())
    }

    pub fn bot_error(bot_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(
            bot_id.into(),
            ChatSender::Bot,
            String::new(),
            Some(error.into()),
            now_millis(),
        )
    }

    pub fn new(
        bot_id: String,
        sender: ChatSender,
        content: String,
        error: Option<String>,
        timestamp: i64,
    ) -> Self {
        let id = format!("{}-{}-{}", bot_id, timestamp, content.len());
        Self {
            id,
            bot_id,
            sender,
            content,
            error,
            timestamp,
        }
    }

    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn send_by_me(&self) -> bool {
        self.sender == ChatSender::User
    }

    pub fn to_req(&self) -> ChatMessageReq {
        let role = match self.sender {
            ChatSender::User => "user",
            ChatSender::Bot => "assistant",
        };
        ChatMessageReq::text(self.content.clone(), role)
    }
}

/// 发送给模型与 token 计数器的消息格式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessageReq {
    pub role: String,
    pub content: String,
}

impl ChatMessageReq {
    pub fn text(content: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
pub struct Model {
    pub id: String,
    /// 显示名，同时也是引擎名
    pub name: String,
    /// 模型上下文的最大 token 数
    pub max_context_tokens: usize,
    #[builder(default = "\"default\".to_string()")]
    pub token_counter_id: String,
    #[builder(default)]
    pub free: bool,
    /// 系统提示词模板，支持 handlebars 语法
    #[builder(default = "DEFAULT_SYSTEM_PROMPT.to_string()")]
    pub system_prompt: String,
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a professional translator. Translate the user's text from {{ source_language }} to {{ target_language }}. Keep the tone and terminology of the original and output only the translation.";

pub trait TokenCounter: Send + Sync {
    fn count_messages(&self, messages: &[ChatMessageReq]) -> usize;
}

/// 粗略估算：ASCII 约 4 字符一个 token，其它字符一个 token，每条消息额外 4 个
pub struct ApproxTokenCounter;

impl TokenCounter for ApproxTokenCounter {
    fn count_messages(&self, messages: &[ChatMessageReq]) -> usize {
        messages
            .iter()
            .map(|m| {
                let ascii = m.content.chars().filter(|c| c.is_ascii()).count();
                let other = m.content.chars().count() - ascii;
                4 + (ascii + 3) / 4 + other
            })
            .sum()
    }
}

pub struct CharTokenCounter;

impl TokenCounter for CharTokenCounter {
    fn count_messages(&self, messages: &[ChatMessageReq]) -> usize {
        messages.iter().map(|m| m.content.chars().count()).sum()
    }
}

pub fn token_counter_by_id(id: &str) -> Arc<dyn TokenCounter> {
    match id {
        "char" => Arc::new(CharTokenCounter),
        _ => Arc::new(ApproxTokenCounter),
    }
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// 发起一次对话请求，`messages` 不包含系统提示词
    async fn chat(
        &self,
        model: &Model,
        system_prompt: &str,
        messages: Vec<ChatMessageReq>,
    ) -> Result<String>;
}

#[test]
fn test_model_builder_defaults() -> Result<()> {
    let model = ModelBuilder::default()
        .id("gpt-4o-mini")
        .name("GPT-4o mini")
        .max_context_tokens(128000usize)
        .build()?;

    assert_eq!(model.token_counter_id, "default");
    assert!(!model.free);
    assert_eq!(model.system_prompt, DEFAULT_SYSTEM_PROMPT);
    Ok(())
}

#[test]
fn test_token_counters() {
    let messages = vec![
        ChatMessageReq::text("abcdefgh", "user"),
        ChatMessageReq::text("你好", "assistant"),
    ];

    assert_eq!(CharTokenCounter.count_messages(&messages), 10);
    assert_eq!(ApproxTokenCounter.count_messages(&messages), (4 + 2) + (4 + 2));
    assert_eq!(token_counter_by_id("char").count_messages(&messages), 10);
}

#[test]
fn test_message_roles() {
    let user = ChatMessage::user("bot", "hi");
    let error = ChatMessage::bot_error("bot", "timeout");

    assert!(user.send_by_me());
    assert!(!error.send_by_me());
    assert_eq!(user.to_req().role, "user");
    assert_eq!(error.to_req().role, "assistant");
    assert_eq!(error.error.as_deref(), Some("timeout"));
}
