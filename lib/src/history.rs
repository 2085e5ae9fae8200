use crate::error::Result;
use crate::language::Language;
use crate::result::TranslationResult;
use crate::utils::now_millis;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use md5::{Digest, Md5};
use tokio::sync::Mutex;

/// 翻译历史，只追加，按原文删除
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransHistoryBean {
    pub id: i64,
    pub source_string: String,
    pub source_language_id: u32,
    pub target_language_id: u32,
    /// 本次使用的引擎名
    pub engine_names: Vec<String>,
    pub time: i64,
}

impl TransHistoryBean {
    pub fn new(
        source_string: &str,
        source_language: Language,
        target_language: Language,
        engine_names: Vec<String>,
    ) -> Self {
        Self {
            id: 0,
            source_string: source_string.to_string(),
            source_language_id: source_language.id(),
            target_language_id: target_language.id(),
            engine_names,
            time: now_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransFavoriteBean {
    pub id: i64,
    pub source_string: String,
    pub result_text: String,
    pub source_language_id: u32,
    pub target_language_id: u32,
    pub engine_name: String,
    pub time: i64,
}

impl TransFavoriteBean {
    /// 相同的原文、引擎和译文总是得到相同的 id，取消收藏时据此删除
    pub fn from_result(result: &TranslationResult, source_string: &str, source_language: Language) -> Self {
        Self {
            id: favorite_id(source_string, &result.engine_name, &result.basic_result),
            source_string: source_string.to_string(),
            result_text: result.basic_result.clone(),
            source_language_id: source_language.id(),
            target_language_id: result.target_language.unwrap_or_default().id(),
            engine_name: result.engine_name.clone(),
            time: now_millis(),
        }
    }
}

/// md5 前 8 字节，跨版本稳定，可以直接落库
fn favorite_id(source_string: &str, engine_name: &str, result_text: &str) -> i64 {
    let mut md5 = Md5::new();
    for part in [source_string, engine_name, result_text] {
        md5.update(part.as_bytes());
        md5.update([0u8]);
    }
    let digest = md5.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn insert_history(&self, bean: TransHistoryBean) -> Result<()>;

    async fn delete_history_by_content(&self, source_string: &str) -> Result<()>;

    /// 按时间倒序分页，`page` 从 0 开始
    async fn query_history_paged(&self, page: usize, page_size: usize) -> Result<Vec<TransHistoryBean>>;

    async fn insert_favorite(&self, bean: TransFavoriteBean) -> Result<()>;

    async fn delete_favorite(&self, id: i64) -> Result<()>;

    async fn favorites(&self) -> Result<Vec<TransFavoriteBean>>;
}

#[derive(Default)]
pub struct MemoryStore {
    histories: Mutex<Vec<TransHistoryBean>>,
    favorites: Mutex<Vec<TransFavoriteBean>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn insert_history(&self, mut bean: TransHistoryBean) -> Result<()> {
        let mut histories = self.histories.lock().await;
        bean.id = histories.last().map(|h| h.id + 1).unwrap_or(1);
        histories.push(bean);
        Ok(())
    }

    async fn delete_history_by_content(&self, source_string: &str) -> Result<()> {
        self.histories
            .lock()
            .await
            .retain(|h| h.source_string != source_string);
        Ok(())
    }

    async fn query_history_paged(&self, page: usize, page_size: usize) -> Result<Vec<TransHistoryBean>> {
        let histories = self.histories.lock().await;
        Ok(histories
            .iter()
            .rev()
            .skip(page * page_size)
            .take(page_size)
            .cloned()
            .collect())
    }

    async fn insert_favorite(&self, bean: TransFavoriteBean) -> Result<()> {
        let mut favorites = self.favorites.lock().await;
        if !favorites.iter().any(|f| f.id == bean.id) {
            favorites.push(bean);
        }
        Ok(())
    }

    async fn delete_favorite(&self, id: i64) -> Result<()> {
        self.favorites.lock().await.retain(|f| f.id != id);
        Ok(())
    }

    async fn favorites(&self) -> Result<Vec<TransFavoriteBean>> {
        Ok(self.favorites.lock().await.clone())
    }
}

#[tokio::test]
async fn test_history_paging_and_delete() -> Result<()> {
    let store = MemoryStore::new();
    for text in ["a", "b", "c", "b"] {
        store
            .insert_history(TransHistoryBean::new(text, Language::English, Language::Chinese, vec!["Baidu".to_string()]))
            .await?;
    }

    let first = store.query_history_paged(0, 3).await?;
    assert_eq!(
        first.iter().map(|h| h.source_string.as_str()).collect::<Vec<_>>(),
        vec!["b", "c", "b"]
    );
    assert_eq!(store.query_history_paged(1, 3).await?.len(), 1);

    store.delete_history_by_content("b").await?;
    let rest = store.query_history_paged(0, 10).await?;
    assert_eq!(rest.len(), 2);
    assert_eq!(rest[0].source_language_id, Language::English.id());
    Ok(())
}

#[tokio::test]
async fn test_favorite_toggle() -> Result<()> {
    let store = MemoryStore::new();
    let mut result = TranslationResult::new("Baidu", true);
    result.set_basic_result("你好");
    result.target_language = Some(Language::Chinese);

    let bean = TransFavoriteBean::from_result(&result, "hello", Language::English);
    store.insert_favorite(bean.clone()).await?;
    store.insert_favorite(bean.clone()).await?;
    assert_eq!(store.favorites().await?.len(), 1);

    let again = TransFavoriteBean::from_result(&result, "hello", Language::English);
    assert_eq!(again.id, bean.id);
    store.delete_favorite(again.id).await?;
    assert!(store.favorites().await?.is_empty());
    Ok(())
}

#[test]
fn test_favorite_id_is_stable() {
    let mut result = TranslationResult::new("Baidu", true);
    result.set_basic_result("你好");

    let bean = TransFavoriteBean::from_result(&result, "hello", Language::English);
    assert_eq!(bean.id, 3333127811983798749);

    result.set_basic_result("您好");
    assert_ne!(TransFavoriteBean::from_result(&result, "hello", Language::English).id, bean.id);
}
