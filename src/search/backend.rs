use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::config::{IndexBackend, SearchConfig};
use crate::schema::{searchable_projection, Entity};
use crate::Result;

use super::{ElasticsearchIndex, MemoryIndex};

/// a full-text index reachable over the network (or in process)
///
/// implementations report failures, `SearchIndex` decides what to do with them
#[async_trait]
pub trait FullTextIndex: Send + Sync {
    async fn upsert(&self, collection: &str, id: i64, fields: &Map<String, Value>) -> Result<()>;
    /// deleting a missing document is not an error
    async fn delete(&self, collection: &str, id: i64) -> Result<()>;
    /// ids ordered by relevance, plus the total number of hits
    async fn search(
        &self,
        collection: &str,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<i64>, u64)>;
}

/// the document pushed to the index for one entity
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDocument {
    pub id: i64,
    pub fields: Map<String, Value>,
}

impl IndexDocument {
    pub fn from_entity<E: Entity>(entity: &E) -> Self {
        Self {
            id: entity.id(),
            fields: searchable_projection(entity),
        }
    }
}

/// best-effort front for the configured backend
///
/// whether a backend exists is decided once at startup. backend errors are
/// logged and swallowed: writes become no-ops and queries return no results
#[derive(Clone, Default)]
pub struct SearchIndex {
    backend: Option<Arc<dyn FullTextIndex>>,
}

impl SearchIndex {
    pub fn new(backend: Arc<dyn FullTextIndex>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub fn from_config(config: &SearchConfig) -> Result<Self> {
        let index = match (config.backend, &config.elasticsearch_url) {
            (IndexBackend::Elasticsearch, Some(url)) => {
                tracing::info!("full-text search backed by elasticsearch at {url}");
                Self::new(Arc::new(ElasticsearchIndex::new(
                    url,
                    std::time::Duration::from_secs(config.request_timeout),
                )?))
            }
            (IndexBackend::Elasticsearch, None) => {
                tracing::info!(
                    "no elasticsearch_url configured, full-text search is disabled"
                );
                Self::disabled()
            }
            (IndexBackend::Memory, _) => {
                tracing::warn!("using the in-memory search index, it is lost on restart");
                Self::new(Arc::new(MemoryIndex::default()))
            }
            (IndexBackend::Disabled, _) => Self::disabled(),
        };
        Ok(index)
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// writes (or overwrites) the document keyed by `document.id`
    pub async fn index_upsert(&self, collection: &str, document: &IndexDocument) {
        let Some(backend) = &self.backend else {
            return;
        };
        if let Err(err) = backend
            .upsert(collection, document.id, &document.fields)
            .await
        {
            tracing::warn!(
                "unable to index {collection} id: {}, err: {err}. ignoring error!",
                document.id
            );
        }
    }

    pub async fn index_remove(&self, collection: &str, id: i64) {
        let Some(backend) = &self.backend else {
            return;
        };
        if let Err(err) = backend.delete(collection, id).await {
            tracing::warn!(
                "unable to remove {collection} id: {id} from the index, err: {err}. ignoring error!"
            );
        }
    }

    /// `page` starts at 1. an unavailable backend looks like "no results"
    pub async fn index_query(
        &self,
        collection: &str,
        query: &str,
        page: usize,
        page_size: usize,
    ) -> (Vec<i64>, u64) {
        let Some(backend) = &self.backend else {
            return (Vec::new(), 0);
        };
        let Some(offset) = page.saturating_sub(1).checked_mul(page_size) else {
            // no backend pages that far
            return (Vec::new(), 0);
        };
        match backend.search(collection, query, offset, page_size).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(
                    "search on {collection} failed, err: {err}. returning no results"
                );
                (Vec::new(), 0)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// every call fails, like an elasticsearch node that is down
    struct DownIndex;

    #[async_trait]
    impl FullTextIndex for DownIndex {
        async fn upsert(&self, _: &str, _: i64, _: &Map<String, Value>) -> Result<()> {
            Err(crate::Error::IndexBackend("connection refused".to_string()))
        }
        async fn delete(&self, _: &str, _: i64) -> Result<()> {
            Err(crate::Error::IndexBackend("connection refused".to_string()))
        }
        async fn search(&self, _: &str, _: &str, _: usize, _: usize) -> Result<(Vec<i64>, u64)> {
            Err(crate::Error::IndexBackend("connection refused".to_string()))
        }
    }

    fn document(id: i64, body: &str) -> IndexDocument {
        let mut fields = Map::new();
        fields.insert("body".to_string(), Value::from(body));
        IndexDocument { id, fields }
    }

    #[tokio::test]
    async fn failing_backend_degrades_to_no_results() {
        let index = SearchIndex::new(Arc::new(DownIndex));
        index.index_upsert("post", &document(1, "hello")).await;
        index.index_remove("post", 1).await;
        assert_eq!(index.index_query("post", "hello", 1, 10).await, (vec![], 0));
    }

    #[tokio::test]
    async fn disabled_index_is_a_no_op() {
        let index = SearchIndex::disabled();
        assert!(!index.is_enabled());
        index.index_upsert("post", &document(1, "hello")).await;
        assert_eq!(index.index_query("post", "hello", 1, 10).await, (vec![], 0));
    }

    #[tokio::test]
    async fn pages_are_one_based() {
        let index = SearchIndex::new(Arc::new(MemoryIndex::default()));
        for id in 1..=5 {
            index.index_upsert("post", &document(id, "world")).await;
        }
        let (first, total) = index.index_query("post", "world", 1, 2).await;
        let (third, _) = index.index_query("post", "world", 3, 2).await;
        assert_eq!(total, 5);
        assert_eq!(first.len(), 2);
        assert_eq!(third.len(), 1);
        // page 0 is treated like page 1
        assert_eq!(index.index_query("post", "world", 0, 2).await.0, first);
    }

    #[tokio::test]
    async fn page_past_the_addressable_range_is_empty() {
        let index = SearchIndex::new(Arc::new(MemoryIndex::default()));
        index.index_upsert("post", &document(1, "world")).await;
        let past_the_end = index.index_query("post", "world", usize::MAX, 10).await;
        assert_eq!(past_the_end, (vec![], 0));
        let huge_pages = index.index_query("post", "world", 3, usize::MAX).await;
        assert_eq!(huge_pages, (vec![], 0));
    }
}
