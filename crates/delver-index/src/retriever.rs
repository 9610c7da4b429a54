//! Hybrid retrieval: exact matches fused with vector similarity.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use crate::embedder::Embedder;
use crate::error::RetrievalError;
use crate::exact::{ExactMatcher, ExactSearch};
use crate::types::{RetrievalResult, SourceKind};
use crate::vector_store::{VectorStore, with_timeout};

/// Score given to every exact match.
pub const EXACT_SCORE: f32 = 1.0;

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Cap on fused results.
    pub max_results: usize,
    /// Nearest neighbours fetched from the store before fusion.
    pub semantic_top_k: usize,
    pub store_timeout: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_results: 5,
            semantic_top_k: 10,
            store_timeout: Duration::from_secs(10),
        }
    }
}

/// Fused results, plus a note when a channel could not contribute.
#[derive(Debug, Clone, Default)]
pub struct HybridResults {
    pub results: Vec<RetrievalResult>,
    pub degraded: Option<String>,
}

impl HybridResults {
    /// Text observation for the agent.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(note) = &self.degraded {
            let _ = writeln!(out, "[degraded] {note}");
        }
        if self.results.is_empty() {
            out.push_str("No relevant code found.");
            return out;
        }
        for (rank, r) in self.results.iter().enumerate() {
            let location = match r.line {
                Some(line) => format!("{}:{line}", r.path),
                None => format!("{} (chunk {})", r.path, r.ordinal),
            };
            let _ = writeln!(
                out,
                "--- [{}] {location} ({}, score {:.3})\n{}",
                rank + 1,
                r.source,
                r.score,
                r.snippet.trim_end()
            );
        }
        out
    }
}

pub struct HybridRetriever {
    exact: ExactSearch,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    #[must_use]
    pub fn new(
        exact: ExactSearch,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            exact,
            embedder,
            store,
            config,
        }
    }

    #[must_use]
    pub fn exact(&self) -> &ExactSearch {
        &self.exact
    }

    #[must_use]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Run both channels concurrently and fuse them.
    ///
    /// A semantic failure is reported through [`HybridResults::degraded`]
    /// while exact results are still returned. `max_results` can lower the
    /// configured cap but never raise it.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::InvalidPattern`] for a malformed `/…/` query.
    pub async fn query(
        &self,
        query: &str,
        max_results: Option<usize>,
    ) -> Result<HybridResults, RetrievalError> {
        let cap = clamp(max_results, self.config.max_results);
        let matcher = ExactMatcher::from_query(query)?;

        let exact_fut = async {
            match &matcher {
                Some(m) => self.exact.search(m, None).await.matches,
                None => Vec::new(),
            }
        };
        let semantic_fut = self.semantic(query, self.config.semantic_top_k);
        let (exact_matches, semantic) = tokio::join!(exact_fut, semantic_fut);

        let exact: Vec<RetrievalResult> = exact_matches
            .into_iter()
            .map(|m| RetrievalResult {
                path: m.path,
                ordinal: m.ordinal,
                score: EXACT_SCORE,
                source: SourceKind::Exact,
                line: Some(m.line),
                snippet: m.snippet,
            })
            .collect();

        let (semantic, degraded) = match semantic {
            Ok(hits) => (hits, None),
            Err(e) => {
                tracing::warn!(error = %e, "semantic channel failed, returning exact results only");
                (Vec::new(), Some(format!("semantic search unavailable: {e}")))
            }
        };

        let exact_count = exact.len();
        let semantic_count = semantic.len();
        let results = fuse(exact, semantic, cap);
        tracing::debug!(
            exact = exact_count,
            semantic = semantic_count,
            fused = results.len(),
            degraded = degraded.is_some(),
            "hybrid query finished"
        );
        Ok(HybridResults { results, degraded })
    }

    /// Neighbour count for a vector-only search: `requested`, bounded by
    /// `semantic_top_k`.
    #[must_use]
    pub fn semantic_limit(&self, requested: Option<usize>) -> usize {
        clamp(requested, self.config.semantic_top_k)
    }

    /// Vector-only search.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding or the store query fails or times out.
    pub async fn semantic(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        if top_k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed_one(query).await?;
        let hits = with_timeout(
            "query",
            self.config.store_timeout,
            self.store.query(vector, top_k, None),
        )
        .await?;
        Ok(hits
            .into_iter()
            .map(|h| RetrievalResult {
                path: h.metadata.path,
                ordinal: h.metadata.ordinal,
                score: h.score,
                source: SourceKind::Semantic,
                line: None,
                snippet: h.metadata.text,
            })
            .collect())
    }
}

fn clamp(requested: Option<usize>, cap: usize) -> usize {
    requested.map_or(cap, |n| n.min(cap))
}

/// Merge both channels, keep one result per `(path, ordinal)`, and order
/// deterministically.
///
/// On a conflict the higher score wins; on equal scores the exact channel
/// wins. Semantic scores are clamped to the exact score so float noise above
/// `1.0` cannot outrank an exact hit.
#[must_use]
pub fn fuse(
    exact: Vec<RetrievalResult>,
    semantic: Vec<RetrievalResult>,
    cap: usize,
) -> Vec<RetrievalResult> {
    let mut best: HashMap<(String, usize), RetrievalResult> = HashMap::new();
    let semantic = semantic.into_iter().map(|mut r| {
        r.score = r.score.min(EXACT_SCORE);
        r
    });

    for candidate in exact.into_iter().chain(semantic) {
        let key = (candidate.path.clone(), candidate.ordinal);
        match best.get(&key) {
            Some(current) if !outranks(&candidate, current) => {}
            _ => {
                best.insert(key, candidate);
            }
        }
    }

    let mut merged: Vec<RetrievalResult> = best.into_values().collect();
    merged.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.source.priority().cmp(&b.source.priority()))
            .then_with(|| a.path.cmp(&b.path))
            .then_with(|| a.ordinal.cmp(&b.ordinal))
    });
    merged.truncate(cap);
    merged
}

fn outranks(candidate: &RetrievalResult, current: &RetrievalResult) -> bool {
    match candidate.score.total_cmp(&current.score) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => candidate.source.priority() < current.source.priority(),
    }
}
