use crate::result::{ResultSort, TranslationResult};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// 调度器发给聚合器的事件，`generation` 标识所属的那次翻译
#[derive(Debug)]
pub enum AggregatorEvent {
    /// 清空结果并把进度归零
    Begin { generation: u64 },
    /// 确定本次需要执行的任务数
    Plan { generation: u64, total: usize },
    /// 并行模式下一次性放入占位结果
    Seed { generation: u64, results: Vec<TranslationResult> },
    /// 插入或替换同名引擎的结果
    Upsert { generation: u64, result: TranslationResult },
    Started { generation: u64 },
    StartedAll { generation: u64 },
    Finished { generation: u64 },
    Complete { generation: u64 },
    Cancel { generation: u64 },
    /// 之前的事件全部处理完后应答
    Flush(oneshot::Sender<()>),
}

/// 给观察者的快照
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchState {
    pub generation: u64,
    pub translating: bool,
    pub results: Vec<TranslationResult>,
    pub started_progress: f32,
    pub finished_progress: f32,
}

impl Default for DispatchState {
    fn default() -> Self {
        Self {
            generation: 0,
            translating: false,
            results: vec![],
            started_progress: 1.0,
            finished_progress: 1.0,
        }
    }
}

/// 结果列表与进度计数，只由聚合器任务修改
#[derive(Debug, Default)]
pub struct ResultAggregator {
    sort: ResultSort,
    active: Option<u64>,
    generation: u64,
    results: Vec<TranslationResult>,
    total: usize,
    started: usize,
    finished: usize,
}

impl ResultAggregator {
    pub fn new(sort: ResultSort) -> Self {
        Self {
            sort,
            ..Default::default()
        }
    }

    /// 同名引擎的旧结果会被替换，随后重新排序
    pub fn upsert(&mut self, result: TranslationResult) {
        self.results.retain(|r| r.engine_name != result.engine_name);
        self.results.push(result);
        let sort = &self.sort;
        self.results.sort_by(|a, b| sort.compare(a, b));
    }

    pub fn results(&self) -> &[TranslationResult] {
        &self.results
    }

    pub fn started_progress(&self) -> f32 {
        self.fraction(self.started)
    }

    pub fn finished_progress(&self) -> f32 {
        self.fraction(self.finished)
    }

    fn fraction(&self, count: usize) -> f32 {
        if self.total == 0 {
            // 没有任务时：进行中显示 0，空闲显示完成
            return if self.active.is_some() { 0.0 } else { 1.0 };
        }
        count.min(self.total) as f32 / self.total as f32
    }

    /// 处理一个事件；不属于当前翻译的事件被忽略
    pub fn apply(&mut self, event: AggregatorEvent) {
        match event {
            AggregatorEvent::Begin { generation } => {
                self.active = Some(generation);
                self.generation = generation;
                self.results.clear();
                self.total = 0;
                self.started = 0;
                self.finished = 0;
            }
            AggregatorEvent::Cancel { generation } => {
                if self.active == Some(generation) {
                    self.active = None;
                    self.started = self.total;
                    self.finished = self.total;
                }
            }
            AggregatorEvent::Flush(ack) => {
                let _ = ack.send(());
            }
            event => {
                let generation = match &event {
                    AggregatorEvent::Plan { generation, .. }
                    | AggregatorEvent::Seed { generation, .. }
                    | AggregatorEvent::Upsert { generation, .. }
                    | AggregatorEvent::Started { generation }
                    | AggregatorEvent::StartedAll { generation }
                    | AggregatorEvent::Finished { generation }
                    | AggregatorEvent::Complete { generation } => *generation,
                    _ => return,
                };
                if self.active != Some(generation) {
                    debug!("Dropping stale event from dispatch {}", generation);
                    return;
                }
                self.apply_active(event);
            }
        }
    }

    fn apply_active(&mut self, event: AggregatorEvent) {
        match event {
            AggregatorEvent::Plan { total, .. } => self.total = total,
            AggregatorEvent::Seed { results, .. } => {
                for result in results {
                    self.upsert(result);
                }
            }
            AggregatorEvent::Upsert { result, .. } => self.upsert(result),
            AggregatorEvent::Started { .. } => self.started = (self.started + 1).min(self.total),
            AggregatorEvent::StartedAll { .. } => self.started = self.total,
            AggregatorEvent::Finished { .. } => self.finished = (self.finished + 1).min(self.total),
            AggregatorEvent::Complete { .. } => {
                self.started = self.total;
                self.finished = self.total;
                self.active = None;
            }
            _ => {}
        }
    }

    pub fn snapshot(&self) -> DispatchState {
        DispatchState {
            generation: self.generation,
            translating: self.active.is_some(),
            results: self.results.clone(),
            started_progress: self.started_progress(),
            finished_progress: self.finished_progress(),
        }
    }
}

/// 启动聚合器任务，返回事件发送端与状态接收端
pub fn spawn_aggregator(
    sort: ResultSort,
) -> (
    mpsc::UnboundedSender<AggregatorEvent>,
    watch::Receiver<DispatchState>,
    JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<AggregatorEvent>();
    let (state_tx, state_rx) = watch::channel(DispatchState::default());

    let handle = tokio::spawn(async move {
        let mut aggregator = ResultAggregator::new(sort);
        while let Some(event) = rx.recv().await {
            let notify = !matches!(event, AggregatorEvent::Flush(_));
            if notify {
                aggregator.apply(event);
                state_tx.send_replace(aggregator.snapshot());
            } else {
                aggregator.apply(event);
            }
        }
    });

    (tx, state_rx, handle)
}

#[cfg(test)]
use crate::result::ResultStatus;

#[test]
fn test_upsert_replaces_same_engine() {
    let mut aggregator = ResultAggregator::new(ResultSort::default());
    aggregator.apply(AggregatorEvent::Begin { generation: 1 });

    let pending = TranslationResult::new("Baidu", true);
    let mut done = TranslationResult::new("Baidu", true);
    done.set_basic_result("你好");

    aggregator.apply(AggregatorEvent::Upsert { generation: 1, result: pending });
    aggregator.apply(AggregatorEvent::Upsert { generation: 1, result: done.clone() });
    aggregator.apply(AggregatorEvent::Upsert {
        generation: 1,
        result: TranslationResult::new("Alpha", false),
    });

    assert_eq!(aggregator.results().len(), 2);
    assert_eq!(aggregator.results()[0], done);
    assert_eq!(aggregator.results()[1].status, ResultStatus::Pending);
}

#[test]
fn test_progress_counts() {
    let mut aggregator = ResultAggregator::new(ResultSort::default());
    assert_eq!(aggregator.finished_progress(), 1.0);

    aggregator.apply(AggregatorEvent::Begin { generation: 7 });
    assert_eq!(aggregator.started_progress(), 0.0);

    aggregator.apply(AggregatorEvent::Plan { generation: 7, total: 3 });
    aggregator.apply(AggregatorEvent::Started { generation: 7 });
    aggregator.apply(AggregatorEvent::Finished { generation: 7 });
    assert!((aggregator.started_progress() - 1.0 / 3.0).abs() < f32::EPSILON);

    aggregator.apply(AggregatorEvent::StartedAll { generation: 7 });
    for _ in 0..5 {
        aggregator.apply(AggregatorEvent::Finished { generation: 7 });
    }
    assert_eq!(aggregator.started_progress(), 1.0);
    assert_eq!(aggregator.finished_progress(), 1.0);
}

#[test]
fn test_stale_events_are_dropped_after_cancel() {
    let mut aggregator = ResultAggregator::new(ResultSort::default());
    aggregator.apply(AggregatorEvent::Begin { generation: 1 });
    aggregator.apply(AggregatorEvent::Plan { generation: 1, total: 2 });
    aggregator.apply(AggregatorEvent::Started { generation: 1 });
    aggregator.apply(AggregatorEvent::Cancel { generation: 1 });

    aggregator.apply(AggregatorEvent::Upsert {
        generation: 1,
        result: TranslationResult::new("Late", true),
    });

    let state = aggregator.snapshot();
    assert!(!state.translating);
    assert!(state.results.is_empty());
    assert_eq!(state.started_progress, 1.0);
    assert_eq!(state.finished_progress, 1.0);
}

#[tokio::test]
async fn test_spawned_aggregator_publishes_state() {
    let (tx, state, _handle) = spawn_aggregator(ResultSort::default());
    tx.send(AggregatorEvent::Begin { generation: 1 }).unwrap();
    tx.send(AggregatorEvent::Upsert {
        generation: 1,
        result: TranslationResult::new("Baidu", true),
    })
    .unwrap();

    let (ack, done) = oneshot::channel();
    tx.send(AggregatorEvent::Flush(ack)).unwrap();
    done.await.unwrap();

    let snapshot = state.borrow().clone();
    assert!(snapshot.translating);
    assert_eq!(snapshot.results.len(), 1);
}
