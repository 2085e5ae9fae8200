use anyhow::{anyhow, Result};
use async_trait::async_trait;
use lib::utils::language_mapping;
use lib::{EngineRequest, FromConfig, Language, LanguageMapping, TranslationError, Translator};
use md5::{Digest, Md5};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

pub const DEFAULT_API_URL: &str = "https://fanyi-api.baidu.com/api/trans/vip/translate";

/// 百度翻译的语言代码
pub const BAIDU_LANGUAGES: [(Language, &str); 15] = [
    (Language::Auto, "auto"),
    (Language::Chinese, "zh"),
    (Language::English, "en"),
    (Language::Japanese, "jp"),
    (Language::Korean, "kor"),
    (Language::French, "fra"),
    (Language::Russian, "ru"),
    (Language::German, "de"),
    (Language::Wenyanwen, "wyw"),
    (Language::Thai, "th"),
    (Language::Portuguese, "pt"),
    (Language::Vietnamese, "vie"),
    (Language::Italian, "it"),
    (Language::ChineseYue, "yue"),
    (Language::Spanish, "spa"),
];

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BaiduFanyiTranslator {
    pub app_id: String,
    pub secret: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(skip)]
    client: Client,
}

impl BaiduFanyiTranslator {
    pub fn new(app_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            secret: secret.into(),
            api_url: default_api_url(),
            client: Client::new(),
        }
    }

    /// md5(appid + q + salt + secret)
    fn sign(&self, content: &str, salt: &str) -> String {
        let mut md5 = Md5::new();
        md5.update(format!("{}{}{}{}", self.app_id, content, salt, self.secret));
        hex::encode(md5.finalize())
    }

    fn build_request(&self, request: &EngineRequest, salt: &str) -> Result<Value> {
        if request.target_language.is_auto() {
            return Err(TranslationError::MissingLanguage("target language".to_string()).into());
        }

        Ok(json!({
            "q": request.content,
            "from": request.source_code,
            "to": request.target_code,
            "appid": self.app_id,
            "salt": salt,
            "sign": self.sign(&request.content, salt),
        }))
    }

    /// 多段原文的译文按行拼接
    fn parse_response(json: &Value) -> Result<String> {
        let code = match &json["error_code"] {
            Value::String(code) => Some(code.clone()),
            Value::Number(code) => Some(code.to_string()),
            _ => None,
        };
        if let Some(code) = code.filter(|c| c != "52000") {
            let message = json["error_msg"].as_str().unwrap_or("unknown error");
            return Err(TranslationError::Api(format!("{} ({})", message, code)).into());
        }

        let lines = json["trans_result"]
            .as_array()
            .ok_or_else(|| anyhow!("Unexpected response: {}", json))?
            .iter()
            .filter_map(|item| item["dst"].as_str())
            .collect::<Vec<_>>();
        Ok(lines.join("\n"))
    }
}

#[async_trait]
impl FromConfig for BaiduFanyiTranslator {
    async fn new(config: Value) -> Result<Self> {
        serde_json::from_value(config).map_err(|e| anyhow!(e))
    }
}

#[async_trait]
impl Translator for BaiduFanyiTranslator {
    fn language_mapping(&self) -> LanguageMapping {
        language_mapping(&BAIDU_LANGUAGES)
    }

    async fn translate(&self, request: &EngineRequest) -> Result<String> {
        let salt = uuid::Uuid::new_v4().to_string();
        let body = self.build_request(request, &salt)?;
        debug!("baidu request: {} -> {}", request.source_code, request.target_code);

        let resp = self
            .client
            .request(Method::POST, &self.api_url)
            .form(&body)
            .send()
            .await?;
        let json = resp.json::<Value>().await?;

        Self::parse_response(&json)
    }
}

#[cfg(test)]
fn request(source: Language, target: Language) -> EngineRequest {
    let mapping = language_mapping(&BAIDU_LANGUAGES);
    EngineRequest {
        content: "apple".to_string(),
        source_language: source,
        target_language: target,
        source_code: mapping[&source].clone(),
        target_code: mapping[&target].clone(),
    }
}

#[test]
fn test_build_request_signs_payload() -> Result<()> {
    let translator = BaiduFanyiTranslator::new("2015063000000001", "12345678");
    let body = translator.build_request(&request(Language::Auto, Language::Japanese), "1435660288")?;

    assert_eq!(body["from"], "auto");
    assert_eq!(body["to"], "jp");
    // 百度文档中的示例签名
    assert_eq!(body["sign"], "f89f9594663708c1605f3d736d01d2d4");
    Ok(())
}

#[test]
fn test_auto_target_is_rejected() {
    let translator = BaiduFanyiTranslator::new("id", "secret");
    let err = translator
        .build_request(&request(Language::English, Language::Auto), "salt")
        .unwrap_err();
    assert!(err.downcast_ref::<TranslationError>().is_some());
}

#[test]
fn test_parse_response() -> Result<()> {
    let ok = json!({
        "from": "en",
        "to": "zh",
        "trans_result": [{"src": "apple", "dst": "苹果"}, {"src": "pie", "dst": "派"}]
    });
    assert_eq!(BaiduFanyiTranslator::parse_response(&ok)?, "苹果\n派");

    let err = json!({"error_code": "54001", "error_msg": "Invalid Sign"});
    let err = BaiduFanyiTranslator::parse_response(&err).unwrap_err();
    assert_eq!(
        err.downcast_ref::<TranslationError>(),
        Some(&TranslationError::Api("Invalid Sign (54001)".to_string()))
    );
    Ok(())
}

#[tokio::test]
async fn test_config() -> Result<()> {
    let translator = <BaiduFanyiTranslator as FromConfig>::new(json!({"app_id": "a", "secret": "b"})).await?;
    assert_eq!(translator.api_url, DEFAULT_API_URL);
    assert_eq!(translator.language_mapping().len(), 15);
    assert!(<BaiduFanyiTranslator as FromConfig>::new(json!({"app_id": "a"})).await.is_err());
    Ok(())
}
