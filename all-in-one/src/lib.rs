pub mod bigger_text;
pub mod config;
pub mod logging;

pub use lib::*;

use crate::bigger_text::BiggerText;
use crate::config::{AppConfig, EnginesConfig, ModelConfig};
use lib::error::{Error, Result};
use lib::ffi_proxy::plugin_loader;
use lib::history::MemoryStore;
use lib::settings::{FileSettings, MemorySettings, SettingsStore};
use std::sync::Arc;
use tracing::info;

/// 内置引擎；百度翻译需要开启对应 feature 并配置密钥
pub fn builtin_engines(config: &EnginesConfig) -> Vec<Engine> {
    #[allow(unused_mut)]
    let mut engines = vec![Engine::Http(
        HttpEngine::new("bigger_text", BiggerText::NAME, Arc::new(BiggerText)).free(true),
    )];

    #[cfg(feature = "plugin-baidu-fanyi")]
    if let Some(baidu) = &config.baidu {
        use plugin_baidu_fanyi::translator::BaiduFanyiTranslator;
        let translator = BaiduFanyiTranslator::new(baidu.app_id.clone(), baidu.secret.clone());
        engines.push(Engine::Http(HttpEngine::new("baidu", "Baidu", Arc::new(translator)).free(true)));
    }
    #[cfg(not(feature = "plugin-baidu-fanyi"))]
    let _ = config;

    engines
}

pub fn build_model(config: &ModelConfig) -> Result<Model> {
    let mut builder = ModelBuilder::default();
    builder
        .id(config.id.clone())
        .name(config.name.clone())
        .max_context_tokens(config.max_context_tokens)
        .free(config.free);
    if let Some(counter) = &config.token_counter_id {
        builder.token_counter_id(counter.clone());
    }
    if let Some(prompt) = &config.system_prompt {
        builder.system_prompt(prompt.clone());
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("Invalid model {}: {}", config.id, e)))
}

#[cfg(feature = "plugin-openai")]
fn model_engines(config: &EnginesConfig) -> anyhow::Result<Vec<Engine>> {
    use plugin_openai::OpenAIClient;

    config
        .models
        .iter()
        .map(|m| -> anyhow::Result<Engine> {
            let client = OpenAIClient {
                api_base: m.api_base.clone(),
                api_key: m.api_key.clone(),
                temperature: None,
                top_p: None,
            };
            Ok(Engine::Model(ModelEngine::new(build_model(m)?, Arc::new(client))))
        })
        .collect()
}

#[cfg(not(feature = "plugin-openai"))]
fn model_engines(config: &EnginesConfig) -> anyhow::Result<Vec<Engine>> {
    if !config.models.is_empty() {
        tracing::warn!("Model engines configured but the plugin-openai feature is disabled");
    }
    Ok(vec![])
}

/// 内置引擎、模型引擎和插件目录各一个加载器
pub fn engine_loaders(config: &EnginesConfig) -> Vec<EngineLoader> {
    let builtin = builtin_engines(config);
    let models = model_engines(config);
    let mut loaders: Vec<EngineLoader> = vec![
        Box::pin(async move { Ok::<_, anyhow::Error>(builtin) }),
        Box::pin(async move { models }),
    ];
    if let Some(dir) = &config.plugin_dir {
        loaders.push(plugin_loader(dir.clone(), config.plugins.clone()));
    }
    loaders
}

/// 按配置组装调度器；引擎在后台初始化，期间发起的翻译会等待初始化完成
pub fn bootstrap(config: &AppConfig) -> Result<TranslationDispatcher> {
    let settings: Arc<dyn SettingsStore> = match &config.settings_path {
        Some(path) => Arc::new(FileSettings::open(path)?),
        None => Arc::new(MemorySettings::new()),
    };
    let registry = Arc::new(EngineRegistry::new(
        settings.clone(),
        config.dispatcher.default_engines.clone(),
    ));

    let loaders = engine_loaders(&config.engines);
    info!("Initializing engines with {} loaders", loaders.len());
    {
        let registry = registry.clone();
        tokio::spawn(async move { registry.initialize(loaders).await });
    }

    Ok(TranslationDispatcher::new(DispatcherContext {
        registry,
        settings,
        store: Arc::new(MemoryStore::new()),
        config: config.dispatcher.clone(),
    }))
}

#[tokio::test]
async fn test_bootstrap_translates_with_default_engine() -> anyhow::Result<()> {
    let mut config = AppConfig::default();
    config.dispatcher.default_engines = vec![BiggerText::NAME.to_string()];

    let dispatcher = bootstrap(&config)?;
    let registry = dispatcher.context().registry.clone();
    registry.wait_until_initialized().await;
    assert!(registry.is_selected(BiggerText::NAME));

    assert!(dispatcher.translate_selected("hello", Language::English, Language::Chinese));
    dispatcher.wait().await;
    let state = dispatcher.state();
    assert_eq!(state.results.len(), 1);
    assert_eq!(state.results[0].basic_result, "hello");

    assert!(dispatcher.translate_selected("hello", Language::English, Language::Japanese));
    dispatcher.wait().await;
    assert_eq!(dispatcher.state().results[0].status, ResultStatus::Unsupported);
    Ok(())
}

#[tokio::test]
async fn test_bootstrap_persists_selection() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = AppConfig::default();
    config.settings_path = Some(dir.path().join("settings.toml"));
    config.dispatcher.default_engines = vec![BiggerText::NAME.to_string()];

    let dispatcher = bootstrap(&config)?;
    dispatcher.context().registry.wait_until_initialized().await;

    let settings = FileSettings::open(dir.path().join("settings.toml"))?;
    assert!(settings.read_bool("Bigger Text_SELECTED", false));
    Ok(())
}

#[test]
fn test_build_model() -> anyhow::Result<()> {
    let model = build_model(&ModelConfig {
        id: "m".to_string(),
        name: "M".to_string(),
        max_context_tokens: 1000,
        token_counter_id: Some("char".to_string()),
        free: true,
        system_prompt: None,
        api_base: String::new(),
        api_key: String::new(),
    })?;
    assert_eq!(model.token_counter_id, "char");
    assert!(model.system_prompt.contains("{{ target_language }}"));
    Ok(())
}
