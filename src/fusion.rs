// Reciprocal Rank Fusion (RRF) across collections and query variants

use std::{collections::HashMap, hash::Hash};

use serde::Serialize;

use crate::vector_store::Collection;

/// Standard RRF k parameter (Cormack, Clarke and Buettcher, SIGIR 2009).
///
/// Smaller values put more weight on top-ranked items.
pub const RRF_K: usize = 60;

/// Best 1-based rank an item reached in each collection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ranks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic: Option<usize>,
}

impl Ranks {
    fn slot(&mut self, source: Collection) -> &mut Option<usize> {
        match source {
            Collection::Visual => &mut self.visual,
            Collection::Semantic => &mut self.semantic,
        }
    }

    fn record(&mut self, source: Collection, rank: usize) {
        let slot = self.slot(source);
        *slot = Some(slot.map_or(rank, |best| best.min(rank)));
    }

    fn iter(&self) -> impl Iterator<Item = usize> {
        self.visual.into_iter().chain(self.semantic)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fused<K> {
    pub key: K,
    pub score: f32,
    pub ranks: Ranks,
}

/// Accumulates ranked lists and fuses them with RRF.
///
/// Every list added for the same collection (one per query variant) only
/// improves an item's best rank in that collection, so an item contributes
/// at most once per collection: `score = sum over collections of
/// 1 / (k + best_rank)`.
///
/// # Examples
///
/// ```
/// use photosearch::{Collection, fusion::RankFusion};
///
/// let mut fusion = RankFusion::new(60);
/// fusion.add_ranking(Collection::Visual, ["a", "b"]);
/// fusion.add_ranking(Collection::Semantic, ["b", "c"]);
///
/// let fused = fusion.fuse();
/// assert_eq!(fused[0].key, "b");
/// assert_eq!(fused.len(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct RankFusion<K> {
    k: usize,
    order: Vec<K>,
    ranks: HashMap<K, Ranks>,
}

impl<K: Clone + Eq + Hash> Default for RankFusion<K> {
    fn default() -> Self {
        Self::new(RRF_K)
    }
}

impl<K: Clone + Eq + Hash> RankFusion<K> {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            order: Vec::new(),
            ranks: HashMap::new(),
        }
    }

    /// Add one ranked list (best first) produced by `source`.
    pub fn add_ranking<I>(&mut self, source: Collection, keys: I)
    where
        I: IntoIterator<Item = K>,
    {
        for (i, key) in keys.into_iter().enumerate() {
            let rank = i + 1;
            match self.ranks.get_mut(&key) {
                Some(ranks) => ranks.record(source, rank),
                None => {
                    let mut ranks = Ranks::default();
                    ranks.record(source, rank);
                    self.order.push(key.clone());
                    self.ranks.insert(key, ranks);
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Fused items sorted by score descending; ties keep first-seen order.
    pub fn fuse(self) -> Vec<Fused<K>> {
        let k = self.k as f32;
        let mut ranks = self.ranks;

        let mut fused: Vec<Fused<K>> = self
            .order
            .into_iter()
            .filter_map(|key| {
                let ranks = ranks.remove(&key)?;
                let score =
                    ranks.iter().map(|rank| 1.0 / (k + rank as f32)).sum();
                Some(Fused { key, score, ranks })
            })
            .collect();

        // Stable sort keeps first-seen order among equal scores.
        fused.sort_by(|a, b| b.score.total_cmp(&a.score));
        fused
    }
}
