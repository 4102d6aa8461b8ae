use std::{cmp::Ordering, path::Path};

use redb::{
    Database,
    MultimapTableDefinition,
    ReadableDatabase,
    ReadableTable,
    ReadableTableMetadata,
    TableDefinition,
    WriteTransaction,
};
use serde::Serialize;

use crate::{
    error::{Error, Result},
    photo_id::ContentId,
    record::PhotoMetadata,
};

const VISUAL: TableDefinition<u64, &[u8]> =
    TableDefinition::new("visual_records");
const SEMANTIC: TableDefinition<u64, &[u8]> =
    TableDefinition::new("semantic_records");
const STORE_META: TableDefinition<&str, u64> =
    TableDefinition::new("store_meta");
const CONTENT_HASHES: MultimapTableDefinition<&str, u64> =
    MultimapTableDefinition::new("content_hashes");

/// Header size: 4 bytes dimension + 8 bytes insertion sequence.
const HEADER_SIZE: usize = 12;

/// Number of decimal digits kept in returned similarity scores.
const SIMILARITY_PRECISION: f32 = 10_000.0;

/// One of the two parallel vector collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// Image-appearance vectors; every indexed photo has one.
    Visual,
    /// Vectors of the analyzer's caption and OCR text; optional.
    Semantic,
}

impl Collection {
    pub fn name(self) -> &'static str {
        match self {
            Self::Visual => "visual",
            Self::Semantic => "semantic",
        }
    }

    fn table(self) -> TableDefinition<'static, u64, &'static [u8]> {
        match self {
            Self::Visual => VISUAL,
            Self::Semantic => SEMANTIC,
        }
    }

    fn dim_key(self) -> &'static str {
        match self {
            Self::Visual => "visual.dim",
            Self::Semantic => "semantic.dim",
        }
    }

    fn seq_key(self) -> &'static str {
        match self {
            Self::Visual => "visual.next_seq",
            Self::Semantic => "semantic.next_seq",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A record read back from a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: ContentId,
    /// Position in insertion order within its collection.
    pub seq: u64,
    pub vector: Vec<f32>,
    pub metadata: PhotoMetadata,
}

/// A query hit: similarity is `1 - cosine_distance`, rounded to 4 decimals.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub id: ContentId,
    pub similarity: f32,
    pub metadata: PhotoMetadata,
}

/// Content-addressed vector storage with a visual collection and an
/// optional semantic collection, keyed by [`ContentId::numeric`].
///
/// Binary format per entry:
/// - 4 bytes: vector dimension D (u32 LE)
/// - 8 bytes: insertion sequence (u64 LE)
/// - D * 4 bytes: f32 values
/// - remaining bytes: JSON-encoded [`PhotoMetadata`]
///
/// Every upsert is a single write transaction, so a reader observes either
/// the previous or the new version of a record, never a mix.
pub struct VectorStore {
    db: Database,
    semantic_enabled: bool,
}

impl VectorStore {
    /// Open or create a vector store at the given path.
    ///
    /// With `semantic_enabled == false` the store runs in degraded mode and
    /// every semantic-collection operation fails with
    /// [`Error::CollectionUnavailable`].
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use photosearch::{Collection, VectorStore};
    ///
    /// let store = VectorStore::open(&tmp.path().join("vectors.redb"), true).unwrap();
    /// assert_eq!(store.count(Collection::Visual).unwrap(), 0);
    /// ```
    pub fn open(path: &Path, semantic_enabled: bool) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(VISUAL)?;
        txn.open_table(SEMANTIC)?;
        txn.open_table(STORE_META)?;
        txn.open_multimap_table(CONTENT_HASHES)?;
        txn.commit()?;

        Ok(Self {
            db,
            semantic_enabled,
        })
    }

    /// Whether the semantic collection is available.
    pub fn semantic_enabled(&self) -> bool {
        self.semantic_enabled
    }

    fn check_available(&self, collection: Collection) -> Result<()> {
        if collection == Collection::Semantic && !self.semantic_enabled {
            return Err(Error::CollectionUnavailable(collection.name()));
        }
        Ok(())
    }

    /// Insert or fully replace the record for `id` in `collection`.
    ///
    /// The first vector written to a collection fixes its dimension. A
    /// replaced record keeps its original insertion position. Semantic
    /// entries must carry analyzed metadata.
    pub fn upsert(
        &self,
        id: &ContentId,
        vector: &[f32],
        metadata: &PhotoMetadata,
        collection: Collection,
    ) -> Result<()> {
        self.check_available(collection)?;
        if vector.is_empty() {
            return Err(Error::InvalidRecord("empty vector".to_string()));
        }
        if collection == Collection::Semantic && !metadata.analyzed() {
            return Err(Error::InvalidRecord(format!(
                "semantic entry for {} lacks analysis",
                metadata.base().path
            )));
        }

        let meta_bytes = serde_json::to_vec(metadata)?;

        let txn = self.db.begin_write()?;
        {
            let mut meta = txn.open_table(STORE_META)?;
            let stored_dim = meta.get(collection.dim_key())?.map(|g| g.value());
            match stored_dim {
                Some(dim) if dim as usize != vector.len() => {
                    return Err(Error::DimensionMismatch {
                        expected: dim as usize,
                        actual: vector.len(),
                    });
                }
                Some(_) => {}
                None => {
                    meta.insert(collection.dim_key(), vector.len() as u64)?;
                }
            }

            let mut table = txn.open_table(collection.table())?;
            let previous = match table.get(id.numeric)? {
                Some(guard) => Some(decode_entry(guard.value())?),
                None => None,
            };

            let seq = match &previous {
                Some((seq, _, _)) => *seq,
                None => {
                    let next =
                        meta.get(collection.seq_key())?.map_or(0, |g| g.value());
                    meta.insert(collection.seq_key(), next + 1)?;
                    next
                }
            };

            if collection == Collection::Visual {
                let mut hashes = txn.open_multimap_table(CONTENT_HASHES)?;
                if let Some((_, _, old)) = &previous {
                    hashes.remove(old.base().content_hash.as_str(), id.numeric)?;
                }
                hashes.insert(
                    metadata.base().content_hash.as_str(),
                    id.numeric,
                )?;
            }

            let bytes = encode_entry(seq, vector, &meta_bytes);
            table.insert(id.numeric, bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Whether `collection` holds a record for `id`.
    pub fn exists(&self, id: &ContentId, collection: Collection) -> Result<bool> {
        self.check_available(collection)?;
        let txn = self.db.begin_read()?;
        let table = txn.open_table(collection.table())?;
        Ok(table.get(id.numeric)?.is_some())
    }

    /// Retrieve the full record for `id`, or `None` if absent.
    pub fn get(
        &self,
        id: &ContentId,
        collection: Collection,
    ) -> Result<Option<StoredRecord>> {
        self.check_available(collection)?;
        let txn = self.db.begin_read()?;
        let table = txn.open_table(collection.table())?;

        let Some(guard) = table.get(id.numeric)? else {
            return Ok(None);
        };
        let (seq, vector, metadata) = decode_entry(guard.value())?;
        Ok(Some(StoredRecord {
            id: id.clone(),
            seq,
            vector,
            metadata,
        }))
    }

    /// Remove the record for `id`. Returns whether anything was removed.
    pub fn delete(&self, id: &ContentId, collection: Collection) -> Result<bool> {
        self.check_available(collection)?;
        let txn = self.db.begin_write()?;
        let removed = remove_entry(&txn, collection, id)?;
        txn.commit()?;
        Ok(removed)
    }

    /// Remove `id` from both collections in one transaction, semantic entry
    /// first. Returns whether a visual record was removed.
    ///
    /// Runs in degraded mode too: entries written while the semantic
    /// collection was enabled must not outlive their visual record.
    pub fn remove(&self, id: &ContentId) -> Result<bool> {
        let txn = self.db.begin_write()?;
        remove_entry(&txn, Collection::Semantic, id)?;
        let removed = remove_entry(&txn, Collection::Visual, id)?;
        txn.commit()?;
        Ok(removed)
    }

    /// Drop the semantic entry for `id`, if any, regardless of whether the
    /// semantic collection is enabled.
    pub fn discard_semantic(&self, id: &ContentId) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = remove_entry(&txn, Collection::Semantic, id)?;
        txn.commit()?;
        Ok(removed)
    }

    /// Number of records in `collection`.
    pub fn count(&self, collection: Collection) -> Result<usize> {
        self.check_available(collection)?;
        let txn = self.db.begin_read()?;
        let table = txn.open_table(collection.table())?;
        Ok(table.len()? as usize)
    }

    /// Cosine-similarity search over `collection`.
    ///
    /// Returns at most `k` records sorted by similarity descending, ties in
    /// insertion order. An empty collection yields an empty list, and `k`
    /// larger than the collection returns everything.
    pub fn query(
        &self,
        vector: &[f32],
        k: usize,
        collection: Collection,
    ) -> Result<Vec<ScoredRecord>> {
        self.check_available(collection)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let txn = self.db.begin_read()?;
        let meta = txn.open_table(STORE_META)?;
        let table = txn.open_table(collection.table())?;

        if let Some(dim) = meta.get(collection.dim_key())?.map(|g| g.value())
            && dim as usize != vector.len()
        {
            return Err(Error::DimensionMismatch {
                expected: dim as usize,
                actual: vector.len(),
            });
        }

        let mut scored: Vec<(f32, u64, u64, PhotoMetadata)> = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            let (seq, stored, metadata) = decode_entry(value.value())?;
            let similarity = cosine_similarity(vector, &stored);
            scored.push((similarity, seq, key.value(), metadata));
        }

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(similarity, _, id, metadata)| ScoredRecord {
                id: ContentId::from_numeric(id),
                similarity: round_similarity(similarity),
                metadata,
            })
            .collect())
    }

    /// All records of `collection` in insertion order, without vectors.
    pub fn list_metadata(
        &self,
        collection: Collection,
    ) -> Result<Vec<(ContentId, PhotoMetadata)>> {
        self.check_available(collection)?;
        let txn = self.db.begin_read()?;
        let table = txn.open_table(collection.table())?;

        let mut entries = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            let (seq, metadata) = decode_metadata(v.value())?;
            entries.push((seq, k.value(), metadata));
        }
        entries.sort_by_key(|(seq, _, _)| *seq);

        Ok(entries
            .into_iter()
            .map(|(_, id, metadata)| (ContentId::from_numeric(id), metadata))
            .collect())
    }

    /// Visual records whose file content hashes to `hash`, as
    /// `(id, path)` pairs.
    pub fn find_by_content_hash(
        &self,
        hash: &str,
    ) -> Result<Vec<(ContentId, String)>> {
        let txn = self.db.begin_read()?;
        let hashes = txn.open_multimap_table(CONTENT_HASHES)?;
        let table = txn.open_table(VISUAL)?;

        let mut found = Vec::new();
        for id in hashes.get(hash)? {
            let id = id?.value();
            if let Some(guard) = table.get(id)? {
                let (_, metadata) = decode_metadata(guard.value())?;
                found.push((ContentId::from_numeric(id), metadata.base().path.clone()));
            }
        }
        Ok(found)
    }

    /// Set the `exists` flag of `id` in every collection holding it,
    /// leaving vectors untouched. Returns whether the visual record exists.
    ///
    /// Semantic entries are updated even in degraded mode.
    pub fn set_exists(&self, id: &ContentId, exists: bool) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let mut found = false;
        for collection in [Collection::Visual, Collection::Semantic] {
            let mut table = txn.open_table(collection.table())?;
            let current = match table.get(id.numeric)? {
                Some(guard) => Some(decode_entry(guard.value())?),
                None => None,
            };
            let Some((seq, vector, mut metadata)) = current else {
                continue;
            };
            if collection == Collection::Visual {
                found = true;
            }
            if metadata.base().exists == exists {
                continue;
            }
            metadata.base_mut().exists = exists;
            let bytes =
                encode_entry(seq, &vector, &serde_json::to_vec(&metadata)?);
            table.insert(id.numeric, bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(found)
    }
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("semantic_enabled", &self.semantic_enabled)
            .finish_non_exhaustive()
    }
}

fn remove_entry(
    txn: &WriteTransaction,
    collection: Collection,
    id: &ContentId,
) -> Result<bool> {
    let mut table = txn.open_table(collection.table())?;
    let removed = match table.remove(id.numeric)? {
        Some(guard) => Some(decode_entry(guard.value())?),
        None => None,
    };
    if collection == Collection::Visual
        && let Some((_, _, metadata)) = &removed
    {
        let mut hashes = txn.open_multimap_table(CONTENT_HASHES)?;
        hashes.remove(metadata.base().content_hash.as_str(), id.numeric)?;
    }
    Ok(removed.is_some())
}

fn encode_entry(seq: u64, vector: &[f32], metadata: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(
        HEADER_SIZE + std::mem::size_of_val(vector) + metadata.len(),
    );
    bytes.extend_from_slice(&(vector.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&seq.to_le_bytes());
    bytes.extend_from_slice(bytemuck::cast_slice(vector));
    bytes.extend_from_slice(metadata);
    bytes
}

/// Split an entry into `(dimension, seq, vector bytes, metadata bytes)`.
fn split_entry(bytes: &[u8]) -> Result<(usize, u64, &[u8], &[u8])> {
    let corrupt = || Error::InvalidRecord("corrupt vector entry".to_string());
    if bytes.len() < HEADER_SIZE {
        return Err(corrupt());
    }
    let dim = u32::from_le_bytes(bytes[0..4].try_into().map_err(|_| corrupt())?)
        as usize;
    let seq =
        u64::from_le_bytes(bytes[4..12].try_into().map_err(|_| corrupt())?);
    let vector_end = HEADER_SIZE + dim * 4;
    if bytes.len() < vector_end {
        return Err(corrupt());
    }
    Ok((
        dim,
        seq,
        &bytes[HEADER_SIZE..vector_end],
        &bytes[vector_end..],
    ))
}

fn decode_entry(bytes: &[u8]) -> Result<(u64, Vec<f32>, PhotoMetadata)> {
    let (_, seq, vector, metadata) = split_entry(bytes)?;
    // Stored bytes carry no alignment guarantee for f32.
    let vector: Vec<f32> = bytemuck::pod_collect_to_vec(vector);
    Ok((seq, vector, serde_json::from_slice(metadata)?))
}

fn decode_metadata(bytes: &[u8]) -> Result<(u64, PhotoMetadata)> {
    let (_, seq, _, metadata) = split_entry(bytes)?;
    Ok((seq, serde_json::from_slice(metadata)?))
}

/// Cosine similarity; zero when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let distance = 1.0 - dot / (norm_a.sqrt() * norm_b.sqrt());
    1.0 - distance
}

fn round_similarity(value: f32) -> f32 {
    (value * SIMILARITY_PRECISION).round() / SIMILARITY_PRECISION
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Analysis, AnalyzedRecord, BaseRecord};

    fn test_store() -> (tempfile::TempDir, VectorStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store =
            VectorStore::open(&tmp.path().join("vectors.redb"), true).unwrap();
        (tmp, store)
    }

    fn base(path: &str, hash: &str) -> BaseRecord {
        BaseRecord {
            path: path.to_string(),
            filename: path.rsplit('/').next().unwrap().to_string(),
            content_hash: hash.to_string(),
            file_size: 1,
            last_modified: 1,
            exists: true,
            folder_id: None,
        }
    }

    fn plain(path: &str, hash: &str) -> PhotoMetadata {
        PhotoMetadata::Base(base(path, hash))
    }

    fn analyzed(path: &str, caption: &str) -> PhotoMetadata {
        let analysis = Analysis {
            caption: caption.to_string(),
            ..Default::default()
        };
        PhotoMetadata::Analyzed(
            AnalyzedRecord::new(base(path, "h"), analysis).unwrap(),
        )
    }

    #[test]
    fn query_scenario_red_car_blue_sky() {
        let (_tmp, store) = test_store();
        let p1 = ContentId::from_path("/p/p1.jpg");
        let p2 = ContentId::from_path("/p/p2.jpg");
        store
            .upsert(&p1, &[1.0, 0.0], &analyzed("/p/p1.jpg", "a red car"), Collection::Visual)
            .unwrap();
        store
            .upsert(&p2, &[0.0, 1.0], &analyzed("/p/p2.jpg", "a blue sky"), Collection::Visual)
            .unwrap();

        let hits: Vec<_> = store
            .query(&[0.9, 0.1], 10, Collection::Visual)
            .unwrap()
            .into_iter()
            .filter(|h| h.similarity >= 0.5)
            .collect();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, p1);
        assert_eq!(hits[0].metadata.caption(), Some("a red car"));
        assert!((hits[0].similarity - 0.994).abs() < 0.001);
        // Four decimal places at most.
        let scaled = hits[0].similarity * 10_000.0;
        assert!((scaled - scaled.round()).abs() < 1e-2);
    }

    #[test]
    fn empty_collection_returns_empty() {
        let (_tmp, store) = test_store();
        assert!(store.query(&[1.0, 0.0], 5, Collection::Visual).unwrap().is_empty());
        assert!(store.query(&[1.0, 0.0], 5, Collection::Semantic).unwrap().is_empty());
    }

    #[test]
    fn k_larger_than_count_returns_all() {
        let (_tmp, store) = test_store();
        for i in 0..3 {
            let path = format!("/p/{i}.jpg");
            store
                .upsert(
                    &ContentId::from_path(&path),
                    &[1.0, i as f32],
                    &plain(&path, &format!("h{i}")),
                    Collection::Visual,
                )
                .unwrap();
        }
        let hits = store.query(&[1.0, 0.0], 100, Collection::Visual).unwrap();
        assert_eq!(hits.len(), store.count(Collection::Visual).unwrap());
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let (_tmp, store) = test_store();
        let paths = ["/p/z.jpg", "/p/a.jpg", "/p/m.jpg"];
        for path in paths {
            store
                .upsert(
                    &ContentId::from_path(path),
                    &[1.0, 1.0],
                    &plain(path, path),
                    Collection::Visual,
                )
                .unwrap();
        }
        let hits = store.query(&[1.0, 1.0], 3, Collection::Visual).unwrap();
        let got: Vec<_> =
            hits.iter().map(|h| h.metadata.base().path.as_str()).collect();
        assert_eq!(got, paths);
    }

    #[test]
    fn upsert_replaces_not_merges() {
        let (_tmp, store) = test_store();
        let id = ContentId::from_path("/p/x.jpg");
        store
            .upsert(&id, &[1.0, 0.0], &analyzed("/p/x.jpg", "old caption"), Collection::Visual)
            .unwrap();
        store
            .upsert(&id, &[0.0, 1.0], &plain("/p/x.jpg", "new"), Collection::Visual)
            .unwrap();

        let record = store.get(&id, Collection::Visual).unwrap().unwrap();
        assert_eq!(record.vector, vec![0.0, 1.0]);
        assert!(!record.metadata.analyzed());
        assert!(record.metadata.caption().is_none());
        assert_eq!(store.count(Collection::Visual).unwrap(), 1);
        assert!(store.find_by_content_hash("h").unwrap().is_empty());
        assert_eq!(store.find_by_content_hash("new").unwrap().len(), 1);
    }

    #[test]
    fn replacement_keeps_insertion_position() {
        let (_tmp, store) = test_store();
        let first = ContentId::from_path("/p/1.jpg");
        let second = ContentId::from_path("/p/2.jpg");
        store.upsert(&first, &[1.0], &plain("/p/1.jpg", "a"), Collection::Visual).unwrap();
        store.upsert(&second, &[1.0], &plain("/p/2.jpg", "b"), Collection::Visual).unwrap();
        store.upsert(&first, &[1.0], &plain("/p/1.jpg", "c"), Collection::Visual).unwrap();

        let listed = store.list_metadata(Collection::Visual).unwrap();
        assert_eq!(listed[0].0, first);
        assert_eq!(listed[1].0, second);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let (_tmp, store) = test_store();
        let id = ContentId::from_path("/p/x.jpg");
        store.upsert(&id, &[1.0, 0.0], &plain("/p/x.jpg", "h"), Collection::Visual).unwrap();

        let other = ContentId::from_path("/p/y.jpg");
        assert!(matches!(
            store.upsert(&other, &[1.0, 0.0, 0.0], &plain("/p/y.jpg", "h2"), Collection::Visual),
            Err(Error::DimensionMismatch { expected: 2, actual: 3 })
        ));
        assert!(store.query(&[1.0], 1, Collection::Visual).is_err());
    }

    #[test]
    fn semantic_requires_analysis() {
        let (_tmp, store) = test_store();
        let id = ContentId::from_path("/p/x.jpg");
        assert!(matches!(
            store.upsert(&id, &[1.0], &plain("/p/x.jpg", "h"), Collection::Semantic),
            Err(Error::InvalidRecord(_))
        ));
    }

    #[test]
    fn degraded_store_rejects_semantic_operations() {
        let tmp = tempfile::tempdir().unwrap();
        let store =
            VectorStore::open(&tmp.path().join("vectors.redb"), false).unwrap();
        assert!(!store.semantic_enabled());
        assert!(matches!(
            store.count(Collection::Semantic),
            Err(Error::CollectionUnavailable("semantic"))
        ));
        assert_eq!(store.count(Collection::Visual).unwrap(), 0);
    }

    #[test]
    fn delete_and_exists() {
        let (_tmp, store) = test_store();
        let id = ContentId::from_path("/p/x.jpg");
        store.upsert(&id, &[1.0], &plain("/p/x.jpg", "h"), Collection::Visual).unwrap();
        assert!(store.exists(&id, Collection::Visual).unwrap());

        assert!(store.delete(&id, Collection::Visual).unwrap());
        assert!(!store.exists(&id, Collection::Visual).unwrap());
        assert!(!store.delete(&id, Collection::Visual).unwrap());
        assert!(store.find_by_content_hash("h").unwrap().is_empty());
    }

    #[test]
    fn set_exists_touches_both_collections() {
        let (_tmp, store) = test_store();
        let id = ContentId::from_path("/p/x.jpg");
        let meta = analyzed("/p/x.jpg", "cat");
        store.upsert(&id, &[1.0, 0.0], &meta, Collection::Visual).unwrap();
        store.upsert(&id, &[0.5, 0.5], &meta, Collection::Semantic).unwrap();

        assert!(store.set_exists(&id, false).unwrap());

        let visual = store.get(&id, Collection::Visual).unwrap().unwrap();
        let semantic = store.get(&id, Collection::Semantic).unwrap().unwrap();
        assert!(!visual.metadata.base().exists);
        assert!(!semantic.metadata.base().exists);
        assert_eq!(visual.vector, vec![1.0, 0.0]);
        assert_eq!(semantic.vector, vec![0.5, 0.5]);
    }

    #[test]
    fn degraded_store_still_clears_semantic_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.redb");
        let kept = ContentId::from_path("/p/kept.jpg");
        let gone = ContentId::from_path("/p/gone.jpg");

        {
            let store = VectorStore::open(&path, true).unwrap();
            for (id, p) in [(&kept, "/p/kept.jpg"), (&gone, "/p/gone.jpg")] {
                let meta = analyzed(p, "caption");
                store.upsert(id, &[1.0, 0.0], &meta, Collection::Visual).unwrap();
                store.upsert(id, &[0.0, 1.0], &meta, Collection::Semantic).unwrap();
            }
        }

        {
            let store = VectorStore::open(&path, false).unwrap();
            assert!(store.set_exists(&kept, false).unwrap());
            assert!(store.remove(&gone).unwrap());
            assert!(!store.remove(&gone).unwrap());
            assert!(store.discard_semantic(&kept).unwrap());
        }

        let store = VectorStore::open(&path, true).unwrap();
        assert_eq!(store.count(Collection::Visual).unwrap(), 1);
        assert_eq!(store.count(Collection::Semantic).unwrap(), 0);
        assert!(!store.get(&kept, Collection::Visual).unwrap().unwrap().metadata.base().exists);
    }

    #[test]
    fn find_by_content_hash_lists_all_paths() {
        let (_tmp, store) = test_store();
        for path in ["/p/a.jpg", "/p/copy/a.jpg"] {
            store
                .upsert(&ContentId::from_path(path), &[1.0], &plain(path, "same"), Collection::Visual)
                .unwrap();
        }
        let mut paths: Vec<_> = store
            .find_by_content_hash("same")
            .unwrap()
            .into_iter()
            .map(|(_, p)| p)
            .collect();
        paths.sort();
        assert_eq!(paths, vec!["/p/a.jpg", "/p/copy/a.jpg"]);
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.redb");
        let id = ContentId::from_path("/p/x.jpg");

        {
            let store = VectorStore::open(&path, true).unwrap();
            store.upsert(&id, &[0.25, 0.75], &plain("/p/x.jpg", "h"), Collection::Visual).unwrap();
        }

        {
            let store = VectorStore::open(&path, true).unwrap();
            let record = store.get(&id, Collection::Visual).unwrap().unwrap();
            assert_eq!(record.vector, vec![0.25, 0.75]);
        }
    }

    #[test]
    fn cosine_of_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
    }
}
