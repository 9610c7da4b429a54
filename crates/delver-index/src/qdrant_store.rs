//! Remote vector store backed by Qdrant.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    DeletePointsBuilder, Distance, FieldType, Filter, GetCollectionInfoRequest, PointId,
    PointStruct, PointsIdsList, ScoredPoint, SearchPointsBuilder, UpsertPointsBuilder,
    VectorParamsBuilder, point_id::PointIdOptions, value::Kind, vectors_config,
};
use qdrant_client::{Qdrant, QdrantError};

use crate::embedder::BoxFuture;
use crate::types::{FieldValue, RecordFilter, RecordMetadata, ScoredRecord, VectorRecord};
use crate::vector_store::{VectorStore, VectorStoreError};

const BASE_BACKOFF: Duration = Duration::from_millis(250);

/// Run `attempt` with a per-attempt deadline, retrying failures with
/// exponential backoff (`BASE_BACKOFF * 2^n`) up to `max_retries` extra
/// attempts. The last error is returned once retries run out.
async fn retry_with_backoff<T, E, F, Fut>(
    op: &'static str,
    timeout: Duration,
    max_retries: u32,
    map_err: fn(String) -> VectorStoreError,
    mut attempt: F,
) -> Result<T, VectorStoreError>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut retry = 0u32;
    loop {
        let err = match tokio::time::timeout(timeout, attempt()).await {
            Ok(Ok(v)) => return Ok(v),
            Ok(Err(e)) => map_err(e.to_string()),
            Err(_) => VectorStoreError::Timeout { op, timeout },
        };
        if retry >= max_retries {
            return Err(err);
        }
        let delay = BASE_BACKOFF * 2u32.saturating_pow(retry);
        tracing::warn!(op, attempt = retry, error = %err, "qdrant request failed, retrying in {delay:?}");
        tokio::time::sleep(delay).await;
        retry += 1;
    }
}

pub struct QdrantStore {
    client: Qdrant,
    collection: String,
    timeout: Duration,
    max_retries: u32,
}

impl std::fmt::Debug for QdrantStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantStore")
            .field("collection", &self.collection)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl QdrantStore {
    /// Build a client for `url`. No request is sent until first use.
    ///
    /// # Errors
    ///
    /// Returns [`VectorStoreError::Connection`] if the client cannot be built.
    pub fn new(
        url: &str,
        api_key: Option<String>,
        collection: impl Into<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, VectorStoreError> {
        let mut builder = Qdrant::from_url(url).timeout(timeout);
        if let Some(key) = api_key {
            builder = builder.api_key(key);
        }
        let client = builder
            .build()
            .map_err(|e| VectorStoreError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            collection: collection.into(),
            timeout,
            max_retries,
        })
    }

    async fn with_retry<T, F, Fut>(
        &self,
        op: &'static str,
        map_err: fn(String) -> VectorStoreError,
        f: F,
    ) -> Result<T, VectorStoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, QdrantError>>,
    {
        retry_with_backoff(op, self.timeout, self.max_retries, map_err, f).await
    }

    async fn stored_dimension(&self) -> Result<Option<u64>, VectorStoreError> {
        let info = self
            .with_retry("collection_info", VectorStoreError::Collection, || {
                self.client.collection_info(GetCollectionInfoRequest {
                    collection_name: self.collection.clone(),
                })
            })
            .await?;
        let size = info
            .result
            .and_then(|r| r.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config)
            .and_then(|c| match c {
                vectors_config::Config::Params(p) => Some(p.size),
                vectors_config::Config::ParamsMap(_) => None,
            });
        Ok(size)
    }

    async fn ensure_impl(&self, dimension: usize) -> Result<(), VectorStoreError> {
        if self.exists_impl().await? {
            let requested = dimension;
            if let Some(stored) = self.stored_dimension().await? {
                let stored = usize::try_from(stored).unwrap_or(0);
                if stored != requested {
                    return Err(VectorStoreError::DimensionMismatch { stored, requested });
                }
            }
            return Ok(());
        }

        let size = dimension as u64;
        self.with_retry("create_collection", VectorStoreError::Collection, || {
            self.client.create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(VectorParamsBuilder::new(size, Distance::Cosine)),
            )
        })
        .await?;
        self.with_retry("create_field_index", VectorStoreError::Collection, || {
            self.client.create_field_index(CreateFieldIndexCollectionBuilder::new(
                &self.collection,
                "path",
                FieldType::Keyword,
            ))
        })
        .await?;
        tracing::info!(collection = %self.collection, dimension, "created qdrant collection");
        Ok(())
    }

    async fn exists_impl(&self) -> Result<bool, VectorStoreError> {
        self.with_retry("collection_exists", VectorStoreError::Connection, || {
            self.client.collection_exists(self.collection.as_str())
        })
        .await
    }

    async fn upsert_impl(&self, records: Vec<VectorRecord>) -> Result<(), VectorStoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let points = records
            .into_iter()
            .map(|r| {
                let payload = metadata_to_payload(&r.metadata)?;
                Ok(PointStruct::new(r.id, r.vector, payload))
            })
            .collect::<Result<Vec<_>, VectorStoreError>>()?;

        self.with_retry("upsert", VectorStoreError::Upsert, || {
            self.client
                .upsert_points(UpsertPointsBuilder::new(&self.collection, points.clone()).wait(true))
        })
        .await?;
        Ok(())
    }

    async fn query_impl(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        filter: Option<RecordFilter>,
    ) -> Result<Vec<ScoredRecord>, VectorStoreError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let qdrant_filter = filter.map(record_filter_to_qdrant);
        let response = self
            .with_retry("query", VectorStoreError::Query, || {
                let mut builder =
                    SearchPointsBuilder::new(&self.collection, vector.clone(), top_k as u64)
                        .with_payload(true);
                if let Some(f) = &qdrant_filter {
                    builder = builder.filter(f.clone());
                }
                self.client.search_points(builder)
            })
            .await?;

        let mut out = Vec::with_capacity(response.result.len());
        for point in response.result {
            out.push(scored_point_to_record(point)?);
        }
        out.truncate(top_k);
        Ok(out)
    }

    async fn delete_impl(&self, ids: Vec<String>) -> Result<(), VectorStoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let point_ids: Vec<PointId> = ids.into_iter().map(PointId::from).collect();
        self.with_retry("delete", VectorStoreError::Delete, || {
            self.client.delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(PointsIdsList {
                        ids: point_ids.clone(),
                    })
                    .wait(true),
            )
        })
        .await?;
        Ok(())
    }

    async fn count_impl(&self) -> Result<usize, VectorStoreError> {
        let response = self
            .with_retry("count", VectorStoreError::Query, || {
                self.client
                    .count(CountPointsBuilder::new(&self.collection).exact(true))
            })
            .await?;
        let n = response.result.map_or(0, |r| r.count);
        Ok(usize::try_from(n).unwrap_or(usize::MAX))
    }
}

impl VectorStore for QdrantStore {
    fn name(&self) -> &'static str {
        "qdrant"
    }

    fn ensure(&self, dimension: usize) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        Box::pin(self.ensure_impl(dimension))
    }

    fn exists(&self) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        Box::pin(self.exists_impl())
    }

    fn upsert(&self, records: Vec<VectorRecord>) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        Box::pin(self.upsert_impl(records))
    }

    fn query(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        filter: Option<RecordFilter>,
    ) -> BoxFuture<'_, Result<Vec<ScoredRecord>, VectorStoreError>> {
        Box::pin(self.query_impl(vector, top_k, filter))
    }

    fn delete(&self, ids: Vec<String>) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        Box::pin(self.delete_impl(ids))
    }

    fn count(&self) -> BoxFuture<'_, Result<usize, VectorStoreError>> {
        Box::pin(self.count_impl())
    }
}

fn metadata_to_payload(
    meta: &RecordMetadata,
) -> Result<HashMap<String, qdrant_client::qdrant::Value>, VectorStoreError> {
    let json =
        serde_json::to_value(meta).map_err(|e| VectorStoreError::Serialization(e.to_string()))?;
    serde_json::from_value(json).map_err(|e| VectorStoreError::Serialization(e.to_string()))
}

fn record_filter_to_qdrant(filter: RecordFilter) -> Filter {
    let conditions: Vec<Condition> = filter
        .must
        .into_iter()
        .map(|cond| match cond.value {
            FieldValue::Integer(v) => Condition::matches(cond.field, v),
            FieldValue::Text(v) => Condition::matches(cond.field, v),
        })
        .collect();
    Filter::must(conditions)
}

fn scored_point_to_record(point: ScoredPoint) -> Result<ScoredRecord, VectorStoreError> {
    let payload: serde_json::Map<String, serde_json::Value> = point
        .payload
        .into_iter()
        .filter_map(|(k, v)| {
            let json = match v.kind? {
                Kind::StringValue(s) => serde_json::Value::String(s),
                Kind::IntegerValue(i) => serde_json::Value::Number(i.into()),
                Kind::DoubleValue(d) => {
                    serde_json::Number::from_f64(d).map(serde_json::Value::Number)?
                }
                Kind::BoolValue(b) => serde_json::Value::Bool(b),
                _ => return None,
            };
            Some((k, json))
        })
        .collect();
    let metadata: RecordMetadata = serde_json::from_value(serde_json::Value::Object(payload))
        .map_err(|e| VectorStoreError::Serialization(format!("bad record payload: {e}")))?;

    let id = match point.id.and_then(|pid| pid.point_id_options) {
        Some(PointIdOptions::Uuid(u)) => u,
        Some(PointIdOptions::Num(n)) => n.to_string(),
        None => String::new(),
    };

    Ok(ScoredRecord {
        id,
        score: point.score,
        metadata,
    })
}
