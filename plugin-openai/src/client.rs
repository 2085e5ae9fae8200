use anyhow::{anyhow, bail, Result};
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::StreamExt;
use lib::{ChatMessageReq, FromConfig, Model, ModelClient, TranslationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// OpenAI 兼容接口的大模型客户端
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIClient {
    pub api_base: String,
    pub api_key: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
}

impl OpenAIClient {
    fn client(&self) -> Client<OpenAIConfig> {
        Client::with_config(
            OpenAIConfig::new()
                .with_api_base(self.api_base.clone())
                .with_api_key(self.api_key.clone()),
        )
    }

    fn build_request(
        &self,
        model: &Model,
        system_prompt: &str,
        messages: Vec<ChatMessageReq>,
    ) -> Result<CreateChatCompletionRequest> {
        let mut list: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(messages.len() + 1);
        list.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()?
                .into(),
        );
        for message in messages {
            let message: ChatCompletionRequestMessage = match message.role.as_str() {
                "user" => ChatCompletionRequestUserMessageArgs::default()
                    .content(message.content)
                    .build()?
                    .into(),
                "assistant" => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(message.content)
                    .build()?
                    .into(),
                other => bail!("Unknown chat role: {}", other),
            };
            list.push(message);
        }

        let mut request_args = CreateChatCompletionRequestArgs::default();
        request_args.model(model.id.clone()).messages(list).stream(true);
        if let Some(temperature) = self.temperature {
            request_args.temperature(temperature);
        }
        if let Some(top_p) = self.top_p {
            request_args.top_p(top_p);
        }

        Ok(request_args.build()?)
    }
}

/// 服务端返回的错误信息可以直接展示给用户
fn map_error(error: OpenAIError) -> anyhow::Error {
    match error {
        OpenAIError::ApiError(e) => TranslationError::Api(e.message).into(),
        other => anyhow!(other),
    }
}

/// 取出一个流式分片里的正文增量
fn delta_content(chunk: &Value) -> Option<&str> {
    chunk["choices"][0]["delta"]["content"].as_str()
}

#[async_trait]
impl FromConfig for OpenAIClient {
    async fn new(config: Value) -> Result<Self> {
        serde_json::from_value(config).map_err(|e| anyhow!(e))
    }
}

#[async_trait]
impl ModelClient for OpenAIClient {
    async fn chat(&self, model: &Model, system_prompt: &str, messages: Vec<ChatMessageReq>) -> Result<String> {
        let request = self.build_request(model, system_prompt, messages)?;
        debug!("chat request to {}: {} messages", model.id, request.messages.len());

        let mut stream = self
            .client()
            .chat()
            .create_stream_byot::<_, Value>(request)
            .await
            .map_err(map_error)?;

        let mut content = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_error)?;
            if let Some(delta) = delta_content(&chunk) {
                content.push_str(delta);
            }
        }

        Ok(content)
    }
}

#[cfg(test)]
use lib::ModelBuilder;

#[cfg(test)]
fn test_client() -> OpenAIClient {
    OpenAIClient {
        api_base: "http://localhost:1".to_string(),
        api_key: "sk-test".to_string(),
        temperature: Some(0.3),
        top_p: None,
    }
}

#[test]
fn test_build_request() -> Result<()> {
    let model = ModelBuilder::default()
        .id("deepseek-chat")
        .name("DeepSeek")
        .max_context_tokens(64000usize)
        .build()?;
    let messages = vec![
        ChatMessageReq::text("hello", "user"),
        ChatMessageReq::text("你好", "assistant"),
        ChatMessageReq::text("apple", "user"),
    ];

    let request = test_client().build_request(&model, "translate to Chinese", messages)?;
    assert_eq!(request.model, "deepseek-chat");
    assert_eq!(request.messages.len(), 4);
    assert!(matches!(request.messages[0], ChatCompletionRequestMessage::System(_)));
    assert!(matches!(request.messages[2], ChatCompletionRequestMessage::Assistant(_)));
    assert_eq!(request.temperature, Some(0.3));
    assert_eq!(request.stream, Some(true));

    let bad = vec![ChatMessageReq::text("x", "tool")];
    assert!(test_client().build_request(&model, "", bad).is_err());
    Ok(())
}

#[test]
fn test_delta_content() {
    let chunk = serde_json::json!({"choices": [{"delta": {"content": "苹"}}]});
    assert_eq!(delta_content(&chunk), Some("苹"));
    let done = serde_json::json!({"choices": [{"delta": {}, "finish_reason": "stop"}]});
    assert_eq!(delta_content(&done), None);
}

#[tokio::test]
async fn test_config() -> Result<()> {
    let client = <OpenAIClient as FromConfig>::new(serde_json::json!({
        "api_base": "https://api.deepseek.com",
        "api_key": "sk-xxx"
    }))
    .await?;
    assert_eq!(client.temperature, None);
    Ok(())
}
