use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use serde::Serialize;

use crate::{
    encoder::{ImageAnalyzer, SemanticEncoder, VisualEncoder},
    error::{Error, Result},
    record::{AnalyzedRecord, BaseRecord, PhotoMetadata},
    scanner::{ScanOptions, ScannedPhoto, Scanner},
    vector_store::{Collection, VectorStore},
};

/// Default number of processed items between memory-release hints.
pub const DEFAULT_RELEASE_EVERY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexerConfig {
    /// Run the image analyzer (when one is configured).
    pub deep_analysis: bool,
    pub check_duplicates: bool,
    pub verify_images: bool,
    /// Collaborators get a `release_memory()` hint every this many items.
    pub release_every: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            deep_analysis: true,
            check_duplicates: true,
            verify_images: true,
            release_every: DEFAULT_RELEASE_EVERY,
        }
    }
}

impl IndexerConfig {
    fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            check_duplicates: self.check_duplicates,
            verify_images: self.verify_images,
        }
    }
}

/// Which collections a successfully indexed photo landed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOutcome {
    VisualOnly,
    Hybrid,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    /// The run stopped early because its [`CancelToken`] fired.
    pub cancelled: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct FolderIndexSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub scan_errors: Vec<String>,
    pub index_errors: Vec<String>,
}

/// Progress report delivered after each processed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexProgress {
    pub current: usize,
    pub total: usize,
    pub path: PathBuf,
}

/// Cooperative cancellation flag, polled between items.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Proof of holding the exclusive indexing slot. Released on drop.
#[derive(Debug)]
pub struct RunGuard {
    running: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct BatchCounts {
    success: usize,
    failed: usize,
    skipped: usize,
    cancelled: bool,
    errors: Vec<String>,
}

/// Turns scanned photos into stored vectors.
///
/// Only the visual encoder is required. The analyzer and semantic encoder
/// are optional and their failures degrade a photo to visual-only indexing
/// instead of failing it.
pub struct Indexer {
    store: Arc<VectorStore>,
    visual: Arc<dyn VisualEncoder>,
    analyzer: Option<Arc<dyn ImageAnalyzer>>,
    semantic: Option<Arc<dyn SemanticEncoder>>,
    config: IndexerConfig,
    running: Arc<AtomicBool>,
}

impl Indexer {
    pub fn new(
        store: Arc<VectorStore>,
        visual: Arc<dyn VisualEncoder>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            store,
            visual,
            analyzer: None,
            semantic: None,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn ImageAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn with_semantic_encoder(
        mut self,
        encoder: Arc<dyn SemanticEncoder>,
    ) -> Self {
        self.semantic = Some(encoder);
        self
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Whether an indexing run currently holds the slot.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Claim the exclusive indexing slot.
    ///
    /// A second claim while a [`RunGuard`] is alive fails with
    /// [`Error::IndexInProgress`]; requests are rejected, never queued.
    pub fn begin_run(&self) -> Result<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::IndexInProgress)?;
        Ok(RunGuard {
            running: Arc::clone(&self.running),
        })
    }

    /// Index one scanned photo, replacing any previous record for its id.
    ///
    /// Decoding and visual encoding failures are returned as errors. Analyzer
    /// and semantic encoder failures are logged and the photo is stored
    /// visual-only.
    pub fn index(
        &self,
        photo: &ScannedPhoto,
        folder_id: Option<&str>,
    ) -> Result<IndexOutcome> {
        let visual_vector = {
            let image = image::open(&photo.path)?;
            self.visual.encode_image(&image)?
        };

        let base = BaseRecord {
            path: photo.path.to_string_lossy().into_owned(),
            filename: photo.filename.clone(),
            content_hash: photo.content_hash.clone(),
            file_size: photo.file_size,
            last_modified: photo.last_modified,
            exists: true,
            folder_id: folder_id.map(str::to_string),
        };

        let (metadata, semantic_vector) = match self.analyze(&photo.path) {
            Some(analysis) => {
                let text = analysis.semantic_text();
                match AnalyzedRecord::new(base.clone(), analysis) {
                    Ok(record) => {
                        let vector =
                            text.and_then(|t| self.encode_semantic(&photo.path, &t));
                        (PhotoMetadata::Analyzed(record), vector)
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %photo.path.display(),
                            error = %e,
                            "discarding analyzer output"
                        );
                        (PhotoMetadata::Base(base), None)
                    }
                }
            }
            None => (PhotoMetadata::Base(base), None),
        };

        let id = &photo.content_id;
        self.store
            .upsert(id, &visual_vector, &metadata, Collection::Visual)?;

        // A re-indexed photo must not keep a stale semantic entry, even
        // when the semantic collection is currently disabled.
        let Some(vector) =
            semantic_vector.filter(|_| self.store.semantic_enabled())
        else {
            self.store.discard_semantic(id)?;
            return Ok(IndexOutcome::VisualOnly);
        };

        match self
            .store
            .upsert(id, &vector, &metadata, Collection::Semantic)
        {
            Ok(()) => Ok(IndexOutcome::Hybrid),
            Err(e) => {
                tracing::warn!(
                    path = %photo.path.display(),
                    error = %e,
                    "semantic upsert failed, keeping visual record only"
                );
                self.store.discard_semantic(id)?;
                Ok(IndexOutcome::VisualOnly)
            }
        }
    }

    fn analyze(&self, path: &Path) -> Option<crate::record::Analysis> {
        if !self.config.deep_analysis {
            return None;
        }
        let analyzer = self.analyzer.as_ref()?;
        match analyzer.analyze(path) {
            Ok(analysis) => Some(analysis),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "image analysis failed, indexing visually only"
                );
                None
            }
        }
    }

    fn encode_semantic(&self, path: &Path, text: &str) -> Option<Vec<f32>> {
        let encoder = self.semantic.as_ref()?;
        match encoder.encode_text(text) {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "semantic encoding failed"
                );
                None
            }
        }
    }

    /// Scan `root` and index every photo not yet in the visual collection.
    pub fn index_all(
        &self,
        root: &Path,
        progress: Option<&dyn Fn(&IndexProgress)>,
        cancel: &CancelToken,
    ) -> Result<IndexSummary> {
        let run = self.begin_run()?;
        self.index_all_with(&run, root, progress, cancel)
    }

    /// [`Indexer::index_all`] for a caller that already holds the run slot.
    pub fn index_all_with(
        &self,
        _run: &RunGuard,
        root: &Path,
        progress: Option<&dyn Fn(&IndexProgress)>,
        cancel: &CancelToken,
    ) -> Result<IndexSummary> {
        let report = Scanner::new(&self.store, self.config.scan_options())
            .scan(root)?;
        let total = report.valid.len();
        tracing::info!(root = %root.display(), total, "indexing photos");

        let counts = self.run_batch(&report.valid, None, progress, cancel);

        let summary = IndexSummary {
            total,
            success: counts.success,
            failed: counts.failed,
            skipped: counts.skipped,
            cancelled: counts.cancelled,
        };
        tracing::info!(
            success = summary.success,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled = summary.cancelled,
            "indexing finished"
        );
        Ok(summary)
    }

    /// Scan and index one managed folder, tagging records with `folder_id`.
    pub fn index_folder(
        &self,
        root: &Path,
        folder_id: &str,
        progress: Option<&dyn Fn(&IndexProgress)>,
    ) -> Result<FolderIndexSummary> {
        let run = self.begin_run()?;
        self.index_folder_with(&run, root, folder_id, progress)
    }

    /// [`Indexer::index_folder`] for a caller that already holds the run slot.
    pub fn index_folder_with(
        &self,
        _run: &RunGuard,
        root: &Path,
        folder_id: &str,
        progress: Option<&dyn Fn(&IndexProgress)>,
    ) -> Result<FolderIndexSummary> {
        let report = Scanner::new(&self.store, self.config.scan_options())
            .scan(root)?;
        tracing::info!(
            root = %root.display(),
            folder = folder_id,
            total = report.valid.len(),
            "indexing folder"
        );

        let counts = self.run_batch(
            &report.valid,
            Some(folder_id),
            progress,
            &CancelToken::new(),
        );

        Ok(FolderIndexSummary {
            total: report.valid.len(),
            success: counts.success,
            failed: counts.failed,
            skipped: counts.skipped,
            duplicates: report.duplicates.len(),
            scan_errors: report.errors.iter().map(ToString::to_string).collect(),
            index_errors: counts.errors,
        })
    }

    fn run_batch(
        &self,
        photos: &[ScannedPhoto],
        folder_id: Option<&str>,
        progress: Option<&dyn Fn(&IndexProgress)>,
        cancel: &CancelToken,
    ) -> BatchCounts {
        let mut counts = BatchCounts::default();
        let total = photos.len();

        for (i, photo) in photos.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(processed = i, total, "indexing cancelled");
                counts.cancelled = true;
                break;
            }

            match self.store.exists(&photo.content_id, Collection::Visual) {
                Ok(true) => counts.skipped += 1,
                Ok(false) => match self.index(photo, folder_id) {
                    Ok(outcome) => {
                        counts.success += 1;
                        tracing::debug!(
                            path = %photo.path.display(),
                            ?outcome,
                            "indexed"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %photo.path.display(),
                            error = %e,
                            "failed to index photo"
                        );
                        counts.failed += 1;
                        counts.errors.push(format!("{}: {e}", photo.path.display()));
                    }
                },
                Err(e) => {
                    counts.failed += 1;
                    counts.errors.push(format!("{}: {e}", photo.path.display()));
                }
            }

            if let Some(report) = progress {
                report(&IndexProgress {
                    current: i + 1,
                    total,
                    path: photo.path.clone(),
                });
            }

            if self.config.release_every > 0 && (i + 1) % self.config.release_every == 0 {
                self.release_memory();
            }
        }

        counts
    }

    fn release_memory(&self) {
        tracing::debug!("releasing collaborator memory");
        self.visual.release_memory();
        if let Some(analyzer) = &self.analyzer {
            analyzer.release_memory();
        }
        if let Some(semantic) = &self.semantic {
            semantic.release_memory();
        }
    }
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("config", &self.config)
            .field("analyzer", &self.analyzer.is_some())
            .field("semantic", &self.semantic.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::{photo_id::ContentId, record::Analysis};

    struct ColorEncoder {
        released: AtomicUsize,
    }

    impl VisualEncoder for ColorEncoder {
        fn encode_image(&self, image: &image::DynamicImage) -> Result<Vec<f32>> {
            let px = image.to_rgb8().get_pixel(0, 0).0;
            Ok(vec![px[0] as f32 + 1.0, px[1] as f32 + 1.0, px[2] as f32 + 1.0])
        }

        fn encode_text(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 1.0, 1.0])
        }

        fn release_memory(&self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Captions every photo after its file stem; fails for stems containing
    /// "blurry".
    struct StemAnalyzer;

    impl ImageAnalyzer for StemAnalyzer {
        fn analyze(&self, path: &Path) -> Result<Analysis> {
            let stem = path.file_stem().unwrap().to_string_lossy().to_string();
            if stem.contains("blurry") {
                return Err(Error::Analyzer("model crashed".to_string()));
            }
            Ok(Analysis {
                caption: format!("a photo of {stem}"),
                ..Default::default()
            })
        }
    }

    struct LengthEncoder;

    impl SemanticEncoder for LengthEncoder {
        fn encode_text(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    fn setup() -> (tempfile::TempDir, Arc<VectorStore>, Arc<ColorEncoder>) {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(
            VectorStore::open(&tmp.path().join("vectors.redb"), true).unwrap(),
        );
        let visual = Arc::new(ColorEncoder {
            released: AtomicUsize::new(0),
        });
        (tmp, store, visual)
    }

    fn write_photos(dir: &Path, names: &[&str]) {
        for (i, name) in names.iter().enumerate() {
            image::RgbImage::from_pixel(2, 2, image::Rgb([i as u8 * 20, 3, 4]))
                .save(dir.join(name))
                .unwrap();
        }
    }

    #[test]
    fn hybrid_when_all_collaborators_succeed() {
        let (_tmp, store, visual) = setup();
        let photos = tempfile::tempdir().unwrap();
        write_photos(photos.path(), &["cat.png"]);

        let indexer = Indexer::new(store.clone(), visual, IndexerConfig::default())
            .with_analyzer(Arc::new(StemAnalyzer))
            .with_semantic_encoder(Arc::new(LengthEncoder));
        let summary = indexer
            .index_all(photos.path(), None, &CancelToken::new())
            .unwrap();
        assert_eq!(summary.success, 1);

        let id = ContentId::from_path(photos.path().canonicalize().unwrap().join("cat.png"));
        let semantic = store.get(&id, Collection::Semantic).unwrap().unwrap();
        assert_eq!(semantic.metadata.caption(), Some("a photo of cat"));
        let visual = store.get(&id, Collection::Visual).unwrap().unwrap();
        assert!(visual.metadata.analyzed());
    }

    #[test]
    fn analyzer_failure_degrades_to_visual_only() {
        let (_tmp, store, visual) = setup();
        let photos = tempfile::tempdir().unwrap();
        write_photos(photos.path(), &["blurry.png"]);

        let indexer = Indexer::new(store.clone(), visual, IndexerConfig::default())
            .with_analyzer(Arc::new(StemAnalyzer))
            .with_semantic_encoder(Arc::new(LengthEncoder));
        let summary = indexer
            .index_all(photos.path(), None, &CancelToken::new())
            .unwrap();

        assert_eq!(summary.success, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(store.count(Collection::Visual).unwrap(), 1);
        assert_eq!(store.count(Collection::Semantic).unwrap(), 0);
        let (_, meta) = store.list_metadata(Collection::Visual).unwrap().remove(0);
        assert!(!meta.analyzed());
        assert!(meta.caption().is_none());
    }

    #[test]
    fn deep_analysis_off_skips_analyzer() {
        let (_tmp, store, visual) = setup();
        let photos = tempfile::tempdir().unwrap();
        write_photos(photos.path(), &["dog.png"]);

        let config = IndexerConfig {
            deep_analysis: false,
            ..Default::default()
        };
        let indexer = Indexer::new(store.clone(), visual, config)
            .with_analyzer(Arc::new(StemAnalyzer))
            .with_semantic_encoder(Arc::new(LengthEncoder));
        indexer
            .index_all(photos.path(), None, &CancelToken::new())
            .unwrap();
        assert_eq!(store.count(Collection::Semantic).unwrap(), 0);
    }

    #[test]
    fn already_indexed_photos_are_skipped() {
        let (_tmp, store, visual) = setup();
        let photos = tempfile::tempdir().unwrap();
        write_photos(photos.path(), &["a.png", "b.png"]);

        let indexer = Indexer::new(store, visual, IndexerConfig::default());
        let first = indexer
            .index_all(photos.path(), None, &CancelToken::new())
            .unwrap();
        assert_eq!((first.success, first.skipped), (2, 0));

        let second = indexer
            .index_all(photos.path(), None, &CancelToken::new())
            .unwrap();
        assert_eq!((second.success, second.skipped), (0, 2));
    }

    #[test]
    fn corrupt_file_fails_item_not_batch() {
        let (_tmp, store, visual) = setup();
        let photos = tempfile::tempdir().unwrap();
        write_photos(photos.path(), &["good.png"]);
        std::fs::write(photos.path().join("bad.png"), b"garbage").unwrap();

        let config = IndexerConfig {
            verify_images: false,
            ..Default::default()
        };
        let indexer = Indexer::new(store, visual, config);
        let summary = indexer
            .index_folder(photos.path(), "f1", None)
            .unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.index_errors.len(), 1);
        assert!(summary.index_errors[0].contains("bad.png"));
    }

    #[test]
    fn folder_id_is_recorded() {
        let (_tmp, store, visual) = setup();
        let photos = tempfile::tempdir().unwrap();
        write_photos(photos.path(), &["a.png"]);

        let indexer = Indexer::new(store.clone(), visual, IndexerConfig::default());
        indexer.index_folder(photos.path(), "holiday", None).unwrap();

        let (_, meta) = store.list_metadata(Collection::Visual).unwrap().remove(0);
        assert_eq!(meta.base().folder_id.as_deref(), Some("holiday"));
    }

    #[test]
    fn cancellation_stops_between_items() {
        let (_tmp, store, visual) = setup();
        let photos = tempfile::tempdir().unwrap();
        let names: Vec<String> = (0..10).map(|i| format!("p{i}.png")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        write_photos(photos.path(), &refs);

        let indexer = Indexer::new(store.clone(), visual, IndexerConfig::default());
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let progress = move |p: &IndexProgress| {
            if p.current == 3 {
                trigger.cancel();
            }
        };

        let summary = indexer
            .index_all(photos.path(), Some(&progress), &cancel)
            .unwrap();
        assert!(summary.cancelled);
        assert!(summary.success <= 3);
        assert_eq!(store.count(Collection::Visual).unwrap(), summary.success);

        let rest = indexer
            .index_all(photos.path(), None, &CancelToken::new())
            .unwrap();
        assert_eq!(rest.success, 10 - summary.success);
        assert_eq!(rest.skipped, summary.success);
        assert_eq!(store.count(Collection::Visual).unwrap(), 10);
    }

    #[test]
    fn concurrent_run_is_rejected() {
        let (_tmp, store, visual) = setup();
        let photos = tempfile::tempdir().unwrap();
        let indexer = Indexer::new(store, visual, IndexerConfig::default());

        let guard = indexer.begin_run().unwrap();
        assert!(indexer.is_running());
        assert!(matches!(
            indexer.index_all(photos.path(), None, &CancelToken::new()),
            Err(Error::IndexInProgress)
        ));
        drop(guard);
        assert!(!indexer.is_running());
        assert!(indexer.begin_run().is_ok());
    }

    #[test]
    fn memory_released_periodically() {
        let (_tmp, store, visual) = setup();
        let photos = tempfile::tempdir().unwrap();
        write_photos(photos.path(), &["a.png", "b.png", "c.png", "d.png"]);

        let config = IndexerConfig {
            release_every: 2,
            ..Default::default()
        };
        let indexer = Indexer::new(store, visual.clone(), config);
        indexer
            .index_all(photos.path(), None, &CancelToken::new())
            .unwrap();
        assert_eq!(visual.released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reindex_drops_stale_semantic_entry() {
        let (_tmp, store, visual) = setup();
        let photos = tempfile::tempdir().unwrap();
        write_photos(photos.path(), &["cat.png"]);
        let report = Scanner::new(&store, ScanOptions::default())
            .scan(photos.path())
            .unwrap();
        let photo = &report.valid[0];

        let hybrid = Indexer::new(store.clone(), visual.clone(), IndexerConfig::default())
            .with_analyzer(Arc::new(StemAnalyzer))
            .with_semantic_encoder(Arc::new(LengthEncoder));
        assert_eq!(hybrid.index(photo, None).unwrap(), IndexOutcome::Hybrid);

        let plain = Indexer::new(store.clone(), visual, IndexerConfig::default());
        assert_eq!(plain.index(photo, None).unwrap(), IndexOutcome::VisualOnly);
        assert!(!store.exists(&photo.content_id, Collection::Semantic).unwrap());
    }

    #[test]
    fn reindex_with_semantic_disabled_drops_stale_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let db = tmp.path().join("vectors.redb");
        let photos = tempfile::tempdir().unwrap();
        write_photos(photos.path(), &["cat.png"]);
        let visual = Arc::new(ColorEncoder {
            released: AtomicUsize::new(0),
        });

        let photo = {
            let store = Arc::new(VectorStore::open(&db, true).unwrap());
            let photo = Scanner::new(&store, ScanOptions::default())
                .scan(photos.path())
                .unwrap()
                .valid
                .remove(0);
            let hybrid = Indexer::new(store, visual.clone(), IndexerConfig::default())
                .with_analyzer(Arc::new(StemAnalyzer))
                .with_semantic_encoder(Arc::new(LengthEncoder));
            assert_eq!(hybrid.index(&photo, None).unwrap(), IndexOutcome::Hybrid);
            photo
        };

        {
            let store = Arc::new(VectorStore::open(&db, false).unwrap());
            let degraded = Indexer::new(store, visual, IndexerConfig::default())
                .with_analyzer(Arc::new(StemAnalyzer));
            assert_eq!(
                degraded.index(&photo, None).unwrap(),
                IndexOutcome::VisualOnly
            );
        }

        let store = VectorStore::open(&db, true).unwrap();
        assert!(store.exists(&photo.content_id, Collection::Visual).unwrap());
        assert!(!store.exists(&photo.content_id, Collection::Semantic).unwrap());
    }
}
