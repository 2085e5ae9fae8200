use crate::aggregator::{spawn_aggregator, AggregatorEvent, DispatchState};
use crate::config::DispatcherConfig;
use crate::engine::Engine;
use crate::error::Result;
use crate::history::{HistoryStore, TransFavoriteBean, TransHistoryBean};
use crate::language::Language;
use crate::registry::EngineRegistry;
use crate::result::TranslationResult;
use crate::settings::SettingsStore;
use crate::task::TranslationTask;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// 调度器运行所需的全部依赖
pub struct DispatcherContext {
    pub registry: Arc<EngineRegistry>,
    pub settings: Arc<dyn SettingsStore>,
    pub store: Arc<dyn HistoryStore>,
    pub config: DispatcherConfig,
}

struct Job {
    generation: u64,
    handle: JoinHandle<()>,
}

/// 把一段文本同时分发给多个引擎，结果与进度通过 [`DispatchState`] 发布
///
/// 需要在 tokio 运行时内创建。
pub struct TranslationDispatcher {
    context: Arc<DispatcherContext>,
    events: mpsc::UnboundedSender<AggregatorEvent>,
    state: watch::Receiver<DispatchState>,
    job: std::sync::Mutex<Option<Job>>,
    generation: AtomicU64,
    aggregator: JoinHandle<()>,
}

impl TranslationDispatcher {
    pub fn new(context: DispatcherContext) -> Self {
        let (events, state, aggregator) = spawn_aggregator(context.config.result_sort());
        Self {
            context: Arc::new(context),
            events,
            state,
            job: std::sync::Mutex::new(None),
            generation: AtomicU64::new(0),
            aggregator,
        }
    }

    pub fn context(&self) -> &DispatcherContext {
        &self.context
    }

    pub fn subscribe(&self) -> watch::Receiver<DispatchState> {
        self.state.clone()
    }

    pub fn state(&self) -> DispatchState {
        self.state.borrow().clone()
    }

    pub fn is_translating(&self) -> bool {
        let job = self.job.lock().unwrap_or_else(|e| e.into_inner());
        job.as_ref().map_or(false, |job| self.is_active(job))
    }

    /// 聚合器发布结束状态之前都算进行中
    fn is_active(&self, job: &Job) -> bool {
        if job.handle.is_finished() {
            return false;
        }
        let state = self.state.borrow();
        state.generation < job.generation || state.translating
    }

    /// 开始一次翻译，立即返回；已有翻译进行中或文本为空时不做任何事并返回 `false`
    pub fn translate(
        &self,
        source_string: &str,
        source_language: Language,
        target_language: Language,
        engines: Vec<Arc<Engine>>,
    ) -> bool {
        let text = source_string.trim();
        if text.is_empty() {
            debug!("Ignoring empty source text");
            return false;
        }

        let mut job = self.job.lock().unwrap_or_else(|e| e.into_inner());
        if job.as_ref().map_or(false, |job| self.is_active(job)) {
            debug!("A translation is already running, ignoring new request");
            return false;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.events.send(AggregatorEvent::Begin { generation });

        let dispatch = Dispatch {
            context: self.context.clone(),
            events: self.events.clone(),
            generation,
        };
        let engines = dedup_engines(engines);
        info!(
            "Dispatch {} started: {} engines, {:?} -> {:?}",
            generation,
            engines.len(),
            source_language,
            target_language
        );
        let text = text.to_string();
        let handle = tokio::spawn(async move {
            dispatch
                .run(text, source_language, target_language, engines)
                .await
        });
        *job = Some(Job { generation, handle });
        true
    }

    /// 使用注册表当前选中的引擎翻译
    pub fn translate_selected(
        &self,
        source_string: &str,
        source_language: Language,
        target_language: Language,
    ) -> bool {
        let engines = self.context.registry.selected_engines();
        self.translate(source_string, source_language, target_language, engines)
    }

    /// 使用选中的引擎和配置里的默认语言对翻译
    pub fn translate_default(&self, source_string: &str) -> bool {
        let config = &self.context.config;
        self.translate_selected(source_string, config.source_language, config.target_language)
    }

    /// 等待当前翻译结束（包括被取消）
    pub async fn wait(&self) {
        let generation = self.generation.load(Ordering::SeqCst);
        let mut state = self.state.clone();
        let _ = state
            .wait_for(|s| s.generation >= generation && !s.translating)
            .await;
    }

    /// 取消整个翻译，所有子任务一起中止，进度回到空闲状态
    pub fn cancel(&self) {
        let job = self.job.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(job) = job {
            job.handle.abort();
            let _ = self.events.send(AggregatorEvent::Cancel {
                generation: job.generation,
            });
            info!("Dispatch {} cancelled", job.generation);
        }
    }

    pub async fn delete_history(&self, source_string: &str) -> Result<()> {
        self.context.store.delete_history_by_content(source_string).await
    }

    /// 收藏或取消收藏一条结果
    pub async fn do_favorite(
        &self,
        favourited: bool,
        result: &TranslationResult,
        source_string: &str,
        source_language: Language,
    ) -> Result<()> {
        let bean = TransFavoriteBean::from_result(result, source_string, source_language);
        if favourited {
            self.context.store.insert_favorite(bean).await
        } else {
            self.context.store.delete_favorite(bean.id).await
        }
    }
}

impl Drop for TranslationDispatcher {
    fn drop(&mut self) {
        if let Some(job) = self.job.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            job.handle.abort();
        }
        self.aggregator.abort();
    }
}

/// 同名引擎只保留第一次出现的
fn dedup_engines(engines: Vec<Arc<Engine>>) -> Vec<Arc<Engine>> {
    let mut seen = HashSet::new();
    engines
        .into_iter()
        .filter(|e| seen.insert(e.name().to_string()))
        .collect()
}

/// 一次翻译的执行体，运行在独立的 tokio 任务上
struct Dispatch {
    context: Arc<DispatcherContext>,
    events: mpsc::UnboundedSender<AggregatorEvent>,
    generation: u64,
}

impl Dispatch {
    fn send(&self, event: AggregatorEvent) {
        let _ = self.events.send(event);
    }

    async fn run(
        self,
        text: String,
        source_language: Language,
        target_language: Language,
        engines: Vec<Arc<Engine>>,
    ) {
        self.record_history(&text, source_language, target_language, &engines);

        let registry = &self.context.registry;
        if !registry.is_initialized() {
            debug!("Waiting for engines to be initialized");
            registry.wait_until_initialized().await;
        }

        // 脚本引擎不能同时执行，整批共用一把锁
        let script_lock = Arc::new(Mutex::new(()));
        let mut tasks = vec![];
        for engine in &engines {
            if engine.supports(source_language, target_language) {
                let mut task = registry.build_task(engine, &text, source_language, target_language);
                task.set_mutex(script_lock.clone());
                tasks.push(task);
            } else {
                debug!("{} does not support {:?} -> {:?}", engine.name(), source_language, target_language);
                let mut result = TranslationResult::unsupported(engine.name(), engine.is_free());
                result.target_language = Some(target_language);
                self.send(AggregatorEvent::Upsert {
                    generation: self.generation,
                    result,
                });
            }
        }

        self.send(AggregatorEvent::Plan {
            generation: self.generation,
            total: tasks.len(),
        });

        if self.context.config.parallel {
            self.run_parallel(tasks).await;
        } else {
            self.run_sequential(tasks).await;
        }

        self.send(AggregatorEvent::Complete {
            generation: self.generation,
        });
        info!("Dispatch {} finished", self.generation);
    }

    fn record_history(
        &self,
        text: &str,
        source_language: Language,
        target_language: Language,
        engines: &[Arc<Engine>],
    ) {
        let bean = TransHistoryBean::new(
            text,
            source_language,
            target_language,
            engines.iter().map(|e| e.name().to_string()).collect(),
        );
        let store = self.context.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.insert_history(bean).await {
                warn!("Failed to save translation history: {}", e);
            }
        });
    }

    async fn run_sequential(&self, tasks: Vec<TranslationTask>) {
        for task in tasks {
            self.send(AggregatorEvent::Started {
                generation: self.generation,
            });
            let placeholder = task.result.clone();
            self.send(AggregatorEvent::Upsert {
                generation: self.generation,
                result: placeholder.clone(),
            });

            // 放进 JoinSet，panic 只影响这一个引擎，取消时随 set 一起中止
            let mut set = JoinSet::new();
            set.spawn(run_task(task));
            let result = match set.join_next().await {
                Some(Ok(result)) => result,
                Some(Err(e)) => aborted(placeholder, e),
                None => aborted(placeholder, "task lost"),
            };
            self.send(AggregatorEvent::Upsert {
                generation: self.generation,
                result,
            });
            self.send(AggregatorEvent::Finished {
                generation: self.generation,
            });
        }
    }

    async fn run_parallel(&self, tasks: Vec<TranslationTask>) {
        self.send(AggregatorEvent::Seed {
            generation: self.generation,
            results: tasks.iter().map(|t| t.result.clone()).collect(),
        });
        self.send(AggregatorEvent::StartedAll {
            generation: self.generation,
        });

        let mut set = JoinSet::new();
        let mut placeholders = std::collections::HashMap::new();
        for task in tasks {
            let placeholder = task.result.clone();
            let handle = set.spawn(run_task(task));
            placeholders.insert(handle.id(), placeholder);
        }

        while let Some(joined) = set.join_next_with_id().await {
            let result = match joined {
                Ok((_, result)) => result,
                Err(e) => {
                    let Some(placeholder) = placeholders.remove(&e.id()) else {
                        warn!("Lost track of a failed translation task: {}", e);
                        continue;
                    };
                    aborted(placeholder, e)
                }
            };
            self.send(AggregatorEvent::Upsert {
                generation: self.generation,
                result,
            });
            self.send(AggregatorEvent::Finished {
                generation: self.generation,
            });
        }
    }
}

/// 执行单个任务，错误只写进该引擎的结果
async fn run_task(mut task: TranslationTask) -> TranslationResult {
    if let Err(e) = task.translate().await {
        warn!("{} failed: {:#}", task.engine_name(), e);
        task.result.set_error(&e);
    }
    task.result
}

/// 任务 panic 时用占位结果报告通用错误
fn aborted(mut placeholder: TranslationResult, reason: impl std::fmt::Display) -> TranslationResult {
    warn!("{} task aborted: {}", placeholder.engine_name, reason);
    placeholder.set_error(&anyhow::anyhow!("task aborted: {}", reason));
    placeholder
}

#[cfg(test)]
use crate::engine::{HttpEngine, ScriptEngine};
#[cfg(test)]
use crate::history::MemoryStore;
#[cfg(test)]
use crate::result::{ResultStatus, GENERIC_ERROR_TEXT};
#[cfg(test)]
use crate::settings::MemorySettings;
#[cfg(test)]
use crate::utils::{CountingScript, EchoTranslator, FailingTranslator, PanickingTranslator};
#[cfg(test)]
use std::time::Duration;

#[cfg(test)]
fn test_dispatcher(parallel: bool, engines: Vec<Engine>) -> (TranslationDispatcher, Arc<MemoryStore>) {
    let settings = Arc::new(MemorySettings::new());
    let registry = Arc::new(EngineRegistry::new(settings.clone(), vec![]));
    for engine in engines {
        registry.register(engine);
    }
    registry.finish_initialization();

    let store = Arc::new(MemoryStore::new());
    let dispatcher = TranslationDispatcher::new(DispatcherContext {
        registry,
        settings,
        store: store.clone(),
        config: DispatcherConfig {
            parallel,
            ..Default::default()
        },
    });
    (dispatcher, store)
}

#[cfg(test)]
fn echo(name: &str, delay_ms: u64) -> Engine {
    Engine::Http(HttpEngine::new(
        name.to_lowercase(),
        name,
        Arc::new(EchoTranslator::new(&format!("{}:", name), &Language::ALL).with_delay(Duration::from_millis(delay_ms))),
    ))
}

#[cfg(test)]
fn all_engines(dispatcher: &TranslationDispatcher) -> Vec<Arc<Engine>> {
    dispatcher.context().registry.engines()
}

#[tokio::test]
async fn test_parallel_partial_failure() {
    let failing = Engine::Http(HttpEngine::new(
        "broken",
        "Broken",
        Arc::new(FailingTranslator::new("socket closed", false)),
    ));
    let (dispatcher, _) = test_dispatcher(true, vec![echo("Alpha", 20), failing, echo("Gamma", 5)]);

    assert!(dispatcher.translate("hello", Language::English, Language::Chinese, all_engines(&dispatcher)));
    dispatcher.wait().await;

    let state = dispatcher.state();
    assert!(!state.translating);
    assert_eq!(state.results.len(), 3);
    assert_eq!(state.results.iter().filter(|r| r.is_error()).count(), 1);
    let broken = state.results.iter().find(|r| r.engine_name == "Broken").unwrap();
    assert_eq!(broken.basic_result, GENERIC_ERROR_TEXT);
    let alpha = state.results.iter().find(|r| r.engine_name == "Alpha").unwrap();
    assert_eq!(alpha.basic_result, "Alpha:hello");
    assert_eq!(state.started_progress, 1.0);
    assert_eq!(state.finished_progress, 1.0);
}

#[tokio::test]
async fn test_recognized_error_message_is_shown() {
    let failing = Engine::Http(HttpEngine::new(
        "quota",
        "Quota",
        Arc::new(FailingTranslator::new("quota exceeded", true)),
    ));
    let (dispatcher, _) = test_dispatcher(false, vec![failing]);

    dispatcher.translate("hello", Language::English, Language::Chinese, all_engines(&dispatcher));
    dispatcher.wait().await;

    let state = dispatcher.state();
    assert_eq!(state.results[0].basic_result, "error: quota exceeded");
}

#[cfg(test)]
fn panicking(name: &str) -> Engine {
    Engine::Http(HttpEngine::new(name.to_lowercase(), name, Arc::new(PanickingTranslator)))
}

#[tokio::test]
async fn test_sequential_failure_does_not_stop_later_engines() {
    let failing = Engine::Http(HttpEngine::new(
        "broken",
        "Broken",
        Arc::new(FailingTranslator::new("quota exceeded", true)),
    ));
    let (dispatcher, _) = test_dispatcher(false, vec![failing, echo("Alpha", 0)]);

    dispatcher.translate("hello", Language::English, Language::Chinese, all_engines(&dispatcher));
    dispatcher.wait().await;

    let state = dispatcher.state();
    let broken = state.results.iter().find(|r| r.engine_name == "Broken").unwrap();
    assert_eq!(broken.basic_result, "error: quota exceeded");
    let alpha = state.results.iter().find(|r| r.engine_name == "Alpha").unwrap();
    assert_eq!(alpha.basic_result, "Alpha:hello");
    assert_eq!(state.finished_progress, 1.0);
}

#[tokio::test]
async fn test_panicking_engine_reports_generic_error() {
    for parallel in [false, true] {
        let (dispatcher, _) = test_dispatcher(parallel, vec![panicking("Bad"), echo("Alpha", 0)]);

        assert!(dispatcher.translate("hello", Language::English, Language::Chinese, all_engines(&dispatcher)));
        tokio::time::timeout(Duration::from_secs(2), dispatcher.wait())
            .await
            .unwrap();

        let state = dispatcher.state();
        assert!(!state.translating);
        assert!(!dispatcher.is_translating());
        assert_eq!(state.finished_progress, 1.0);
        let bad = state.results.iter().find(|r| r.engine_name == "Bad").unwrap();
        assert_eq!(bad.status, ResultStatus::Error);
        assert_eq!(bad.basic_result, GENERIC_ERROR_TEXT);
        let alpha = state.results.iter().find(|r| r.engine_name == "Alpha").unwrap();
        assert_eq!(alpha.basic_result, "Alpha:hello");
    }
}

#[tokio::test]
async fn test_parallel_seeds_placeholders_in_sorted_order() {
    let zeta = Engine::Http(
        HttpEngine::new(
            "zeta",
            "Zeta",
            Arc::new(EchoTranslator::new("", &Language::ALL).with_delay(Duration::from_millis(200))),
        )
        .free(true),
    );
    let (dispatcher, _) = test_dispatcher(true, vec![echo("Beta", 200), zeta, echo("Alpha", 200)]);
    let mut state = dispatcher.subscribe();

    dispatcher.translate("hello", Language::English, Language::Chinese, all_engines(&dispatcher));
    let seeded = state.wait_for(|s| s.results.len() == 3).await.unwrap().clone();

    assert!(seeded.results.iter().all(|r| r.status == ResultStatus::Pending));
    assert_eq!(
        seeded.results.iter().map(|r| r.engine_name.as_str()).collect::<Vec<_>>(),
        vec!["Zeta", "Alpha", "Beta"]
    );
    dispatcher.wait().await;
}

#[tokio::test]
async fn test_translate_default_uses_configured_languages() {
    let settings = Arc::new(MemorySettings::new());
    let registry = Arc::new(EngineRegistry::new(settings.clone(), vec![]));
    let translator = Arc::new(EchoTranslator::new("", &[Language::English, Language::Chinese]));
    registry.register(Engine::Http(HttpEngine::new("limited", "Limited", translator.clone())));
    registry.select("Limited").unwrap();
    registry.finish_initialization();
    let dispatcher = TranslationDispatcher::new(DispatcherContext {
        registry,
        settings,
        store: Arc::new(MemoryStore::new()),
        config: DispatcherConfig {
            target_language: Language::Japanese,
            ..Default::default()
        },
    });

    assert!(dispatcher.translate_default("hello"));
    dispatcher.wait().await;

    let state = dispatcher.state();
    assert_eq!(state.results[0].status, ResultStatus::Unsupported);
    assert_eq!(state.results[0].target_language, Some(Language::Japanese));
    assert_eq!(translator.calls(), 0);
}

#[tokio::test]
async fn test_unsupported_engine_is_not_called() {
    let translator = Arc::new(EchoTranslator::new("", &[Language::English, Language::Chinese]));
    let limited = Engine::Http(HttpEngine::new("limited", "Limited", translator.clone()));
    let (dispatcher, _) = test_dispatcher(true, vec![limited, echo("Alpha", 0)]);

    dispatcher.translate("hello", Language::English, Language::Japanese, all_engines(&dispatcher));
    dispatcher.wait().await;

    let state = dispatcher.state();
    let limited = state.results.iter().find(|r| r.engine_name == "Limited").unwrap();
    assert_eq!(limited.status, ResultStatus::Unsupported);
    assert_eq!(translator.calls(), 0);
    assert_eq!(state.results.len(), 2);
    assert_eq!(state.finished_progress, 1.0);
}

#[tokio::test]
async fn test_sequential_runs_in_selection_order() {
    let (dispatcher, _) = test_dispatcher(false, vec![echo("Zeta", 0), echo("Alpha", 200)]);
    let mut state = dispatcher.subscribe();
    let engines = all_engines(&dispatcher);

    dispatcher.translate("hi", Language::English, Language::Chinese, engines);

    let mut first_done = vec![];
    while first_done.is_empty() {
        state.changed().await.unwrap();
        first_done = state
            .borrow()
            .results
            .iter()
            .filter(|r| r.status == ResultStatus::Success)
            .map(|r| r.engine_name.clone())
            .collect();
    }
    assert_eq!(first_done, vec!["Zeta".to_string()]);

    dispatcher.wait().await;
    let state = dispatcher.state();
    assert!(state.results.iter().all(|r| r.status == ResultStatus::Success));
    assert_eq!(state.started_progress, 1.0);
    assert_eq!(state.finished_progress, 1.0);
}

#[tokio::test]
async fn test_script_engines_never_overlap() {
    let running = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let max_running = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let scripts: Vec<Engine> = (0..3)
        .map(|i| {
            Engine::Script(ScriptEngine {
                id: format!("script{}", i),
                name: format!("Script {}", i),
                free: true,
                languages: Language::ALL.to_vec(),
                runtime: Arc::new(CountingScript::new(running.clone(), max_running.clone(), Duration::from_millis(20))),
            })
        })
        .collect();
    let (dispatcher, _) = test_dispatcher(true, scripts);

    dispatcher.translate("hi", Language::English, Language::Chinese, all_engines(&dispatcher));
    dispatcher.wait().await;

    let state = dispatcher.state();
    assert_eq!(state.results.len(), 3);
    assert!(state.results.iter().all(|r| r.status == ResultStatus::Success));
    assert_eq!(max_running.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_second_translate_is_ignored_while_running() {
    let (dispatcher, _) = test_dispatcher(true, vec![echo("Slow", 100)]);
    let engines = all_engines(&dispatcher);

    assert!(dispatcher.translate("one", Language::English, Language::Chinese, engines.clone()));
    assert!(dispatcher.is_translating());
    assert!(!dispatcher.translate("two", Language::English, Language::Chinese, engines));
    dispatcher.wait().await;

    assert_eq!(dispatcher.state().results[0].basic_result, "Slow:one");
    assert!(!dispatcher.is_translating());
}

#[tokio::test]
async fn test_empty_text_is_rejected() {
    let (dispatcher, store) = test_dispatcher(true, vec![echo("Alpha", 0)]);
    assert!(!dispatcher.translate("   \n", Language::English, Language::Chinese, all_engines(&dispatcher)));
    assert!(!dispatcher.is_translating());
    assert!(store.query_history_paged(0, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_resets_to_idle() {
    let (dispatcher, _) = test_dispatcher(true, vec![echo("Slow", 5_000)]);

    dispatcher.translate("hello", Language::English, Language::Chinese, all_engines(&dispatcher));
    tokio::time::sleep(Duration::from_millis(20)).await;
    dispatcher.cancel();
    dispatcher.wait().await;

    let state = dispatcher.state();
    assert!(!state.translating);
    assert!(!dispatcher.is_translating());
    assert_eq!(state.started_progress, 1.0);
    assert_eq!(state.finished_progress, 1.0);
    assert!(state.results.iter().all(|r| r.status == ResultStatus::Pending));

    // 取消后可以立刻开始新的翻译
    assert!(dispatcher.translate("again", Language::English, Language::Chinese, vec![]));
    dispatcher.wait().await;
    assert!(dispatcher.state().results.is_empty());
}

#[tokio::test]
async fn test_history_is_recorded() {
    let (dispatcher, store) = test_dispatcher(true, vec![echo("Alpha", 0), echo("Beta", 0)]);

    dispatcher.translate("  hello  ", Language::English, Language::Chinese, all_engines(&dispatcher));
    dispatcher.wait().await;

    let mut histories = vec![];
    for _ in 0..50 {
        histories = store.query_history_paged(0, 10).await.unwrap();
        if !histories.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(histories.len(), 1);
    assert_eq!(histories[0].source_string, "hello");
    assert_eq!(histories[0].engine_names, vec!["Alpha".to_string(), "Beta".to_string()]);

    dispatcher.delete_history("hello").await.unwrap();
    assert!(store.query_history_paged(0, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_engines_yield_one_result() {
    let (dispatcher, _) = test_dispatcher(true, vec![echo("Alpha", 0)]);
    let mut engines = all_engines(&dispatcher);
    engines.extend(all_engines(&dispatcher));

    dispatcher.translate("hello", Language::English, Language::Chinese, engines);
    dispatcher.wait().await;
    assert_eq!(dispatcher.state().results.len(), 1);
}

#[tokio::test]
async fn test_waits_for_registry_readiness() {
    let settings = Arc::new(MemorySettings::new());
    let registry = Arc::new(EngineRegistry::new(settings.clone(), vec![]));
    let engine = registry.register(echo("Alpha", 0));
    let dispatcher = TranslationDispatcher::new(DispatcherContext {
        registry: registry.clone(),
        settings,
        store: Arc::new(MemoryStore::new()),
        config: DispatcherConfig::default(),
    });

    dispatcher.translate("hello", Language::English, Language::Chinese, vec![engine]);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(dispatcher.is_translating());
    assert!(dispatcher.state().results.is_empty());

    registry.finish_initialization();
    dispatcher.wait().await;
    assert_eq!(dispatcher.state().results[0].basic_result, "Alpha:hello");
}

#[tokio::test]
async fn test_favorite_toggle() -> Result<()> {
    let (dispatcher, store) = test_dispatcher(true, vec![]);
    let mut result = TranslationResult::new("Alpha", true);
    result.set_basic_result("你好");

    dispatcher.do_favorite(true, &result, "hello", Language::English).await?;
    assert_eq!(store.favorites().await?.len(), 1);
    dispatcher.do_favorite(false, &result, "hello", Language::English).await?;
    assert!(store.favorites().await?.is_empty());
    Ok(())
}
