use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::Result;

use super::FullTextIndex;

/// talks to elasticsearch over its REST api, one index per collection
pub struct ElasticsearchIndex {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    total: HitsTotal,
    hits: Vec<Hit>,
}

/// elasticsearch 7+ reports `{"value": n, "relation": "eq"}`, older versions a bare number
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HitsTotal {
    Count(u64),
    Object { value: u64 },
}

impl HitsTotal {
    fn value(&self) -> u64 {
        match self {
            HitsTotal::Count(value) | HitsTotal::Object { value } => *value,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
}

impl SearchResponse {
    fn into_ranked_ids(self) -> (Vec<i64>, u64) {
        let total = self.hits.total.value();
        // hits are already sorted by _score descending
        let ids = self
            .hits
            .hits
            .into_iter()
            .filter_map(|hit| match hit.id.parse::<i64>() {
                Ok(id) => Some(id),
                Err(_) => {
                    tracing::warn!("ignoring search hit with a non integer id `{}`", hit.id);
                    None
                }
            })
            .collect();
        (ids, total)
    }
}

impl ElasticsearchIndex {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn document_url(&self, collection: &str, id: i64) -> String {
        format!("{}/{collection}/_doc/{id}", self.base_url)
    }
}

#[async_trait]
impl FullTextIndex for ElasticsearchIndex {
    async fn upsert(&self, collection: &str, id: i64, fields: &Map<String, Value>) -> Result<()> {
        self.client
            .put(self.document_url(collection, id))
            .json(fields)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: i64) -> Result<()> {
        let response = self
            .client
            .delete(self.document_url(collection, id))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        response.error_for_status()?;
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<i64>, u64)> {
        let body = serde_json::json!({
            "query": {"multi_match": {"query": query, "fields": ["*"]}},
            "from": offset,
            "size": limit,
        });
        let response = self
            .client
            .post(format!("{}/{collection}/_search", self.base_url))
            .json(&body)
            .send()
            .await?;
        // nothing was ever indexed into this collection
        if response.status() == StatusCode::NOT_FOUND {
            return Ok((Vec::new(), 0));
        }
        let response: SearchResponse = response.error_for_status()?.json().await?;
        Ok(response.into_ranked_ids())
    }
}
