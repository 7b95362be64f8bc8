use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::Result;

use super::FullTextIndex;

/// in process index: documents are tokenized on write and ranked by term frequency
///
/// score of a document = (occurrences of query terms) / (number of tokens in the document).
/// ties are broken by the higher id first, so newer rows win
#[derive(Default)]
pub struct MemoryIndex {
    documents: scc::HashMap<(String, i64), Vec<String>>,
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn tokens_of(fields: &Map<String, Value>) -> Vec<String> {
    fields
        .values()
        .flat_map(|value| match value {
            Value::String(text) => tokenize(text),
            Value::Null => Vec::new(),
            other => tokenize(&other.to_string()),
        })
        .collect()
}

#[async_trait]
impl FullTextIndex for MemoryIndex {
    async fn upsert(&self, collection: &str, id: i64, fields: &Map<String, Value>) -> Result<()> {
        self.documents
            .upsert_async((collection.to_string(), id), tokens_of(fields))
            .await;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: i64) -> Result<()> {
        let _ = self
            .documents
            .remove_async(&(collection.to_string(), id))
            .await;
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<i64>, u64)> {
        let terms = tokenize(query);
        let mut hits: Vec<(f64, i64)> = Vec::new();
        self.documents
            .scan_async(|(doc_collection, id), tokens| {
                if doc_collection != collection || tokens.is_empty() {
                    return;
                }
                let matches = tokens.iter().filter(|token| terms.contains(token)).count();
                if matches > 0 {
                    hits.push((matches as f64 / tokens.len() as f64, *id));
                }
            })
            .await;

        hits.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.cmp(&a.1)));
        let total = hits.len() as u64;
        let ids = hits
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(_, id)| id)
            .collect();
        Ok((ids, total))
    }
}
