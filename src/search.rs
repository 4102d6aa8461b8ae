use std::{collections::HashMap, sync::Arc};

use serde::Serialize;

use crate::{
    encoder::{SemanticEncoder, VisualEncoder},
    error::{Error, Result},
    fusion::{RRF_K, RankFusion, Ranks},
    query_expander::{QueryExpander, QuerySet},
    record::{DetectedObject, PhotoMetadata},
    vector_store::{Collection, ScoredRecord, VectorStore},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchConfig {
    /// RRF damping constant.
    pub rrf_k: usize,
    /// Candidates fetched per list in hybrid mode, as a multiple of `top_k`.
    pub overfetch_factor: usize,
    /// Run every query variant from the [`QueryExpander`] in hybrid mode.
    pub expand_queries: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            rrf_k: RRF_K,
            overfetch_factor: 2,
            expand_queries: true,
        }
    }
}

/// One ranked photo returned by [`HybridSearcher::search`].
///
/// In single-signal mode `fused_score` is the visual similarity; in hybrid
/// mode it is the RRF score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedResult {
    pub path: String,
    pub filename: String,
    pub fused_score: f32,
    pub ranks: Ranks,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<DetectedObject>,
}

impl FusedResult {
    fn from_metadata(metadata: &PhotoMetadata, fused_score: f32, ranks: Ranks) -> Self {
        let base = metadata.base();
        Self {
            path: base.path.clone(),
            filename: base.filename.clone(),
            fused_score,
            ranks,
            caption: metadata.caption().map(str::to_string),
            ocr_text: metadata.ocr_text().map(str::to_string),
            objects: metadata.objects().to_vec(),
        }
    }
}

/// Text-to-photo search over the visual and (optionally) semantic
/// collections.
pub struct HybridSearcher {
    store: Arc<VectorStore>,
    visual: Arc<dyn VisualEncoder>,
    semantic: Option<Arc<dyn SemanticEncoder>>,
    expander: QueryExpander,
    config: SearchConfig,
}

impl HybridSearcher {
    pub fn new(
        store: Arc<VectorStore>,
        visual: Arc<dyn VisualEncoder>,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            visual,
            semantic: None,
            expander: QueryExpander::default(),
            config,
        }
    }

    pub fn with_semantic_encoder(
        mut self,
        encoder: Arc<dyn SemanticEncoder>,
    ) -> Self {
        self.semantic = Some(encoder);
        self
    }

    pub fn with_expander(mut self, expander: QueryExpander) -> Self {
        self.expander = expander;
        self
    }

    /// Whether searches fuse the semantic collection in.
    pub fn is_hybrid(&self) -> bool {
        self.semantic.is_some() && self.store.semantic_enabled()
    }

    /// Search for photos matching `query`.
    ///
    /// `threshold` must lie in `[0, 1]`. It filters visual similarity in
    /// single-signal mode and the fused score in hybrid mode. Semantic
    /// failures never fail the call; the search falls back to visual only.
    pub fn search(
        &self,
        query: &str,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<FusedResult>> {
        if query.trim().is_empty() {
            return Err(Error::InvalidQuery("query is empty".to_string()));
        }
        if top_k == 0 {
            return Err(Error::InvalidQuery(
                "top_k must be at least 1".to_string(),
            ));
        }
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(Error::InvalidQuery(format!(
                "threshold {threshold} is outside [0, 1]"
            )));
        }

        let results = match &self.semantic {
            Some(semantic) if self.store.semantic_enabled() => {
                self.search_hybrid(semantic.as_ref(), query, top_k, threshold)?
            }
            _ => self.search_visual(query, top_k, threshold)?,
        };

        tracing::info!(query, top_k, results = results.len(), "search finished");
        Ok(results)
    }

    /// Run several queries, mapping a failed query to an empty result list.
    pub fn search_batch<'q>(
        &self,
        queries: &[&'q str],
        top_k: usize,
        threshold: f32,
    ) -> Vec<(&'q str, Vec<FusedResult>)> {
        queries
            .iter()
            .map(|query| {
                let results = self
                    .search(query, top_k, threshold)
                    .unwrap_or_else(|e| {
                        tracing::warn!(query, error = %e, "batch query failed");
                        Vec::new()
                    });
                (*query, results)
            })
            .collect()
    }

    fn search_visual(
        &self,
        query: &str,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<FusedResult>> {
        let vector = self.visual.encode_text(query)?;
        let hits = self.store.query(&vector, top_k, Collection::Visual)?;

        Ok(hits
            .into_iter()
            .filter(|hit| hit.similarity >= threshold)
            .enumerate()
            .map(|(i, hit)| {
                let ranks = Ranks {
                    visual: Some(i + 1),
                    semantic: None,
                };
                FusedResult::from_metadata(&hit.metadata, hit.similarity, ranks)
            })
            .collect())
    }

    fn search_hybrid(
        &self,
        semantic: &dyn SemanticEncoder,
        query: &str,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<FusedResult>> {
        let variants = if self.config.expand_queries {
            self.expander.expand(query)
        } else {
            QuerySet::verbatim(query)
        };
        let fetch = top_k.saturating_mul(self.config.overfetch_factor.max(1));

        let semantic_lists = match self.semantic_lists(semantic, &variants, fetch) {
            Ok(lists) => lists,
            Err(e) => {
                tracing::warn!(
                    query,
                    error = %e,
                    "semantic retrieval failed, using visual search only"
                );
                return self.search_visual(query, top_k, threshold);
            }
        };

        let mut fusion = RankFusion::new(self.config.rrf_k);
        // Path -> metadata, semantic records win over visual ones.
        let mut metadata: HashMap<String, PhotoMetadata> = HashMap::new();

        for variant in variants.iter() {
            let vector = self.visual.encode_text(variant)?;
            let hits = self.store.query(&vector, fetch, Collection::Visual)?;
            fusion.add_ranking(Collection::Visual, ranked_paths(&hits));
            for hit in hits {
                metadata
                    .entry(hit.metadata.base().path.clone())
                    .or_insert(hit.metadata);
            }
        }

        for hits in semantic_lists {
            fusion.add_ranking(Collection::Semantic, ranked_paths(&hits));
            for hit in hits {
                metadata.insert(hit.metadata.base().path.clone(), hit.metadata);
            }
        }

        Ok(fusion
            .fuse()
            .into_iter()
            .filter(|fused| fused.score >= threshold)
            .take(top_k)
            .filter_map(|fused| {
                let meta = metadata.get(&fused.key)?;
                Some(FusedResult::from_metadata(meta, fused.score, fused.ranks))
            })
            .collect())
    }

    fn semantic_lists(
        &self,
        semantic: &dyn SemanticEncoder,
        variants: &QuerySet,
        fetch: usize,
    ) -> Result<Vec<Vec<ScoredRecord>>> {
        variants
            .iter()
            .map(|variant| {
                let vector = semantic.encode_text(variant)?;
                self.store.query(&vector, fetch, Collection::Semantic)
            })
            .collect()
    }
}

impl std::fmt::Debug for HybridSearcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridSearcher")
            .field("config", &self.config)
            .field("hybrid", &self.is_hybrid())
            .finish_non_exhaustive()
    }
}

fn ranked_paths(hits: &[ScoredRecord]) -> Vec<String> {
    hits.iter().map(|hit| hit.metadata.base().path.clone()).collect()
}
