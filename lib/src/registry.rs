use crate::engine::Engine;
use crate::error::Result;
use crate::language::Language;
use crate::memory::ChatMemory;
use crate::settings::SettingsStore;
use crate::task::{TaskBody, TranslationTask};
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// 异步加载一批引擎，例如内置引擎、插件目录或模型列表
pub type EngineLoader = BoxFuture<'static, anyhow::Result<Vec<Engine>>>;

#[derive(Debug, Clone)]
pub enum RegistryEvent {
    EngineInitialized(Arc<Engine>),
    AllEnginesInitialized,
}

pub fn chat_memory_key(model_id: &str) -> String {
    format!("chat_memory_{}", model_id)
}

pub struct EngineRegistry {
    settings: Arc<dyn SettingsStore>,
    default_engines: Vec<String>,
    engines: RwLock<Vec<Arc<Engine>>>,
    selected: RwLock<Vec<String>>,
    restored: AtomicUsize,
    ready: watch::Sender<bool>,
    events: broadcast::Sender<RegistryEvent>,
}

impl EngineRegistry {
    pub fn new(settings: Arc<dyn SettingsStore>, default_engines: Vec<String>) -> Self {
        let (ready, _) = watch::channel(false);
        let (events, _) = broadcast::channel(64);
        Self {
            settings,
            default_engines,
            engines: RwLock::new(vec![]),
            selected: RwLock::new(vec![]),
            restored: AtomicUsize::new(0),
            ready,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// 并发运行所有加载器，全部结束后标记为初始化完成；单个加载器失败只记录日志
    pub async fn initialize(&self, loaders: Vec<EngineLoader>) {
        let mut pending: FuturesUnordered<EngineLoader> = loaders.into_iter().collect();
        while let Some(loaded) = pending.next().await {
            match loaded {
                Ok(engines) => {
                    for engine in engines {
                        self.register(engine);
                    }
                }
                Err(e) => warn!("Failed to load engines: {:#}", e),
            }
        }
        self.finish_initialization();
    }

    /// 注册一个引擎；同名引擎只保留先注册的那个
    pub fn register(&self, engine: Engine) -> Arc<Engine> {
        let engine = {
            let mut engines = self.engines.write().unwrap_or_else(|e| e.into_inner());
            if let Some(existing) = engines.iter().find(|e| e.name() == engine.name()) {
                warn!("Engine {} already registered, skipping duplicate", engine.name());
                return existing.clone();
            }
            let engine = Arc::new(engine);
            engines.push(engine.clone());
            engine
        };
        debug!("Engine initialized: {:?}", engine);

        if self.settings.read_bool(&engine.select_key(), false) {
            self.push_selected(engine.name());
            self.restored.fetch_add(1, Ordering::SeqCst);
        }

        let _ = self.events.send(RegistryEvent::EngineInitialized(engine.clone()));
        engine
    }

    pub fn finish_initialization(&self) {
        let restored = self.restored.load(Ordering::SeqCst);
        info!(
            "All engines initialized: {} engines, {} restored selections",
            self.engines().len(),
            restored
        );
        if restored == 0 {
            for name in self.default_engines.clone() {
                if let Err(e) = self.select(&name) {
                    warn!("Failed to select default engine {}: {}", name, e);
                }
            }
        }
        self.ready.send_replace(true);
        let _ = self.events.send(RegistryEvent::AllEnginesInitialized);
    }

    pub fn is_initialized(&self) -> bool {
        *self.ready.borrow()
    }

    pub async fn wait_until_initialized(&self) {
        let mut ready = self.ready.subscribe();
        let _ = ready.wait_for(|ready| *ready).await;
    }

    pub fn engines(&self) -> Vec<Arc<Engine>> {
        self.engines.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn engine(&self, name: &str) -> Option<Arc<Engine>> {
        self.engines
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|e| e.name() == name)
            .cloned()
    }

    /// 选中并持久化；引擎不存在时返回 `Ok(false)`
    pub fn select(&self, name: &str) -> Result<bool> {
        let Some(engine) = self.engine(name) else {
            return Ok(false);
        };
        self.push_selected(engine.name());
        self.settings.write_bool(&engine.select_key(), true)?;
        Ok(true)
    }

    pub fn deselect(&self, name: &str) -> Result<()> {
        self.selected
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|n| n != name);
        if let Some(engine) = self.engine(name) {
            self.settings.write_bool(&engine.select_key(), false)?;
        }
        Ok(())
    }

    pub fn is_selected(&self, name: &str) -> bool {
        self.selected
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|n| n == name)
    }

    /// 按选择顺序返回选中的引擎
    pub fn selected_engines(&self) -> Vec<Arc<Engine>> {
        let selected = self.selected.read().unwrap_or_else(|e| e.into_inner()).clone();
        selected.iter().filter_map(|name| self.engine(name)).collect()
    }

    pub fn support_languages(&self, engine: &Engine) -> Vec<Language> {
        engine.supported_languages()
    }

    pub fn set_chat_memory(&self, model_id: &str, memory: &ChatMemory) -> Result<()> {
        match memory.encode() {
            Some(encoded) => self.settings.write(&chat_memory_key(model_id), &encoded),
            None => Ok(()),
        }
    }

    pub fn build_task(
        &self,
        engine: &Engine,
        text: &str,
        source_language: Language,
        target_language: Language,
    ) -> TranslationTask {
        let body = match engine {
            Engine::Http(e) => TaskBody::Http {
                translator: e.translator.clone(),
                mapping: e.mapping.clone(),
            },
            Engine::Script(e) => TaskBody::Script {
                runtime: e.runtime.clone(),
            },
            Engine::Model(e) => {
                let memory = match self.settings.read(&chat_memory_key(&e.model.id)) {
                    Some(encoded) => ChatMemory::restore(&encoded),
                    None => ChatMemory::max_token(e.model.clone(), ""),
                };
                TaskBody::Model {
                    model: e.model.clone(),
                    client: e.client.clone(),
                    memory,
                    conversation: e.conversation.clone(),
                }
            }
        };
        TranslationTask::new(engine, body, text, source_language, target_language)
    }

    fn push_selected(&self, name: &str) {
        let mut selected = self.selected.write().unwrap_or_else(|e| e.into_inner());
        if !selected.iter().any(|n| n == name) {
            selected.push(name.to_string());
        }
    }
}

#[cfg(test)]
use crate::engine::HttpEngine;
#[cfg(test)]
use crate::settings::MemorySettings;
#[cfg(test)]
use crate::utils::EchoTranslator;

#[cfg(test)]
fn echo_engine(name: &str) -> Engine {
    Engine::Http(HttpEngine::new(
        name.to_lowercase(),
        name,
        Arc::new(EchoTranslator::new("", &Language::ALL)),
    ))
}

#[tokio::test]
async fn test_initialize_selects_defaults_when_nothing_persisted() -> anyhow::Result<()> {
    let settings = Arc::new(MemorySettings::new());
    let registry = EngineRegistry::new(settings.clone(), vec!["Baidu".to_string(), "Missing".to_string()]);
    let mut events = registry.subscribe();

    let loaders: Vec<EngineLoader> = vec![
        Box::pin(async { Ok::<_, anyhow::Error>(vec![echo_engine("Baidu"), echo_engine("Tencent")]) }),
        Box::pin(async { Err::<Vec<Engine>, _>(anyhow::anyhow!("plugin dir missing")) }),
    ];
    assert!(!registry.is_initialized());
    registry.initialize(loaders).await;

    assert!(registry.is_initialized());
    assert_eq!(registry.engines().len(), 2);
    assert_eq!(
        registry.selected_engines().iter().map(|e| e.name().to_string()).collect::<Vec<_>>(),
        vec!["Baidu".to_string()]
    );
    assert!(settings.read_bool("Baidu_SELECTED", false));

    assert!(matches!(events.recv().await?, RegistryEvent::EngineInitialized(e) if e.name() == "Baidu"));
    assert!(matches!(events.recv().await?, RegistryEvent::EngineInitialized(e) if e.name() == "Tencent"));
    assert!(matches!(events.recv().await?, RegistryEvent::AllEnginesInitialized));
    Ok(())
}

#[tokio::test]
async fn test_persisted_selection_is_restored() -> anyhow::Result<()> {
    let settings = Arc::new(MemorySettings::new());
    settings.write_bool("Tencent_SELECTED", true)?;
    let registry = EngineRegistry::new(settings.clone(), vec!["Baidu".to_string()]);

    registry
        .initialize(vec![Box::pin(async {
            Ok::<_, anyhow::Error>(vec![echo_engine("Baidu"), echo_engine("Tencent")])
        })])
        .await;

    assert!(registry.is_selected("Tencent"));
    assert!(!registry.is_selected("Baidu"));

    registry.deselect("Tencent")?;
    assert!(!settings.read_bool("Tencent_SELECTED", true));
    assert!(registry.selected_engines().is_empty());
    assert!(!registry.select("Nope")?);
    Ok(())
}

#[tokio::test]
async fn test_wait_until_initialized() {
    let registry = Arc::new(EngineRegistry::new(Arc::new(MemorySettings::new()), vec![]));

    let waiter = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.wait_until_initialized().await })
    };
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    registry.register(echo_engine("Baidu"));
    registry.register(echo_engine("Baidu"));
    registry.finish_initialization();

    waiter.await.unwrap();
    assert_eq!(registry.engines().len(), 1);
}

#[test]
fn test_concurrent_register_keeps_one_engine() {
    let registry = EngineRegistry::new(Arc::new(MemorySettings::new()), vec![]);

    let registered: Vec<Arc<Engine>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| registry.register(echo_engine("Baidu"))))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(registry.engines().len(), 1);
    assert!(registered.iter().all(|e| Arc::ptr_eq(e, &registered[0])));
}

#[test]
fn test_build_task_uses_persisted_memory() -> anyhow::Result<()> {
    use crate::chat::ModelBuilder;
    use crate::engine::ModelEngine;

    struct NoClient;
    #[async_trait::async_trait]
    impl crate::chat::ModelClient for NoClient {
        async fn chat(&self, _: &crate::chat::Model, _: &str, _: Vec<crate::chat::ChatMessageReq>) -> anyhow::Result<String> {
            Ok(String::new())
        }
    }

    let settings = Arc::new(MemorySettings::new());
    let registry = EngineRegistry::new(settings, vec![]);
    let model = ModelBuilder::default()
        .id("m1")
        .name("Model")
        .max_context_tokens(8000usize)
        .build()?;
    let engine = Engine::Model(ModelEngine::new(model, Arc::new(NoClient)));

    let task = registry.build_task(&engine, "hi", Language::Auto, Language::English);
    assert!(matches!(task.body(), TaskBody::Model { memory: ChatMemory::MaxToken { .. }, .. }));

    registry.set_chat_memory("m1", &ChatMemory::FixedMsgLength(6))?;
    let task = registry.build_task(&engine, "hi", Language::Auto, Language::English);
    assert!(matches!(task.body(), TaskBody::Model { memory: ChatMemory::FixedMsgLength(6), .. }));
    assert_eq!(task.source_string, "hi");
    Ok(())
}
