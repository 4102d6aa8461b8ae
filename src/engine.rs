//! The operations a surrounding application drives: indexing, search,
//! maintenance and the folder registry, over one data directory.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::{
    config_db::{ConfigDb, FolderRecord, FolderStatus, FolderTotals},
    data_dir::DataDir,
    encoder::{ImageAnalyzer, SemanticEncoder, VisualEncoder},
    error::{Error, Result},
    indexer::{
        CancelToken,
        FolderIndexSummary,
        IndexProgress,
        IndexSummary,
        Indexer,
        IndexerConfig,
    },
    maintenance::{
        CleanupReport,
        FolderRemovalReport,
        HealthReport,
        Maintenance,
        OptimizeReport,
    },
    scanner::{ScanOptions, ScanReport, Scanner},
    search::{FusedResult, HybridSearcher, SearchConfig},
    vector_store::{Collection, VectorStore},
};

pub const PHOTOS_DIR_ENV_VAR: &str = "PHOTOSEARCH_PHOTOS_DIR";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root indexed by [`Engine::index_all`].
    pub photos_root: PathBuf,
    /// Keep a semantic collection (requires a semantic encoder).
    pub semantic_enabled: bool,
    pub indexer: IndexerConfig,
    pub search: SearchConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            photos_root: std::env::var_os(PHOTOS_DIR_ENV_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            semantic_enabled: true,
            indexer: IndexerConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

/// Model handles injected by the composing application.
#[derive(Clone)]
pub struct Collaborators {
    pub visual: Arc<dyn VisualEncoder>,
    pub semantic: Option<Arc<dyn SemanticEncoder>>,
    pub analyzer: Option<Arc<dyn ImageAnalyzer>>,
}

impl Collaborators {
    pub fn new(visual: Arc<dyn VisualEncoder>) -> Self {
        Self {
            visual,
            semantic: None,
            analyzer: None,
        }
    }

    pub fn with_semantic_encoder(
        mut self,
        encoder: Arc<dyn SemanticEncoder>,
    ) -> Self {
        self.semantic = Some(encoder);
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn ImageAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("semantic", &self.semantic.is_some())
            .field("analyzer", &self.analyzer.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub visual_count: usize,
    pub semantic_count: usize,
    pub hybrid_mode: bool,
    pub folders: FolderTotals,
}

/// Engine facade over one data directory.
pub struct Engine {
    config: EngineConfig,
    config_db: ConfigDb,
    store: Arc<VectorStore>,
    indexer: Arc<Indexer>,
    searcher: HybridSearcher,
    maintenance: Maintenance,
}

impl Engine {
    /// Open (or create) the databases under `data_dir` and wire the
    /// collaborators in.
    ///
    /// Without a semantic encoder every search runs visual-only. The
    /// semantic collection itself stays open whenever
    /// [`EngineConfig::semantic_enabled`] is set, so deletions and re-indexing
    /// keep it consistent with the visual collection.
    ///
    /// Folders left in [`FolderStatus::Indexing`] by an interrupted process
    /// are moved to [`FolderStatus::Error`].
    pub fn open(
        data_dir: &DataDir,
        config: EngineConfig,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let semantic_enabled =
            config.semantic_enabled && collaborators.semantic.is_some();
        if config.semantic_enabled && !semantic_enabled {
            tracing::info!("no semantic encoder configured, running visual-only");
        }

        let config_db = ConfigDb::open(&data_dir.config_db())?;
        config_db.recover_interrupted()?;
        let store = Arc::new(VectorStore::open(
            &data_dir.vectors_db(),
            config.semantic_enabled,
        )?);

        let mut indexer = Indexer::new(
            Arc::clone(&store),
            Arc::clone(&collaborators.visual),
            config.indexer,
        );
        let mut searcher = HybridSearcher::new(
            Arc::clone(&store),
            Arc::clone(&collaborators.visual),
            config.search,
        );
        if let Some(analyzer) = collaborators.analyzer {
            indexer = indexer.with_analyzer(analyzer);
        }
        if semantic_enabled && let Some(semantic) = collaborators.semantic {
            indexer = indexer.with_semantic_encoder(Arc::clone(&semantic));
            searcher = searcher.with_semantic_encoder(semantic);
        }

        Ok(Self {
            config,
            config_db,
            maintenance: Maintenance::new(Arc::clone(&store)),
            store,
            indexer: Arc::new(indexer),
            searcher,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    pub fn config_db(&self) -> &ConfigDb {
        &self.config_db
    }

    // -- Indexing --

    /// Index every new photo under the configured photos root.
    pub fn index_all(
        &self,
        progress: Option<&dyn Fn(&IndexProgress)>,
        cancel: &CancelToken,
    ) -> Result<IndexSummary> {
        self.indexer
            .index_all(&self.config.photos_root, progress, cancel)
    }

    /// Start [`Engine::index_all`] on tokio's blocking pool.
    ///
    /// The run slot is claimed before spawning, so a conflicting trigger
    /// fails here with [`Error::IndexInProgress`]. Must be called from
    /// within a tokio runtime.
    pub fn spawn_index_all(
        &self,
        cancel: CancelToken,
    ) -> Result<JoinHandle<Result<IndexSummary>>> {
        let run = self.indexer.begin_run()?;
        let indexer = Arc::clone(&self.indexer);
        let root = self.config.photos_root.clone();

        Ok(tokio::task::spawn_blocking(move || {
            indexer.index_all_with(&run, &root, None, &cancel)
        }))
    }

    pub fn is_indexing(&self) -> bool {
        self.indexer.is_running()
    }

    /// Index one registered folder, tracking its status in the registry.
    pub fn index_folder(
        &self,
        folder_id: &str,
        progress: Option<&dyn Fn(&IndexProgress)>,
    ) -> Result<FolderIndexSummary> {
        let folder = self.require_folder(folder_id)?;
        let root = existing_folder_path(&folder)?;

        let run = self.indexer.begin_run()?;
        self.config_db
            .set_folder_status(folder_id, FolderStatus::Indexing)?;

        match self.indexer.index_folder_with(&run, &root, folder_id, progress) {
            Ok(summary) => {
                self.config_db.update_folder_stats(
                    folder_id,
                    Some(summary.total),
                    Some(summary.success + summary.skipped),
                )?;
                self.config_db
                    .set_folder_status(folder_id, FolderStatus::Active)?;
                tracing::info!(
                    folder = %folder.name,
                    success = summary.success,
                    "folder indexed"
                );
                Ok(summary)
            }
            Err(e) => {
                tracing::error!(folder = %folder.name, error = %e, "folder indexing failed");
                self.config_db
                    .set_folder_status(folder_id, FolderStatus::Error)?;
                Err(e)
            }
        }
    }

    /// Preview what indexing a folder would pick up.
    pub fn scan_folder(&self, folder_id: &str) -> Result<ScanReport> {
        let folder = self.require_folder(folder_id)?;
        let root = existing_folder_path(&folder)?;

        let options = ScanOptions {
            check_duplicates: self.config.indexer.check_duplicates,
            verify_images: self.config.indexer.verify_images,
        };
        let report = Scanner::new(&self.store, options).scan(&root)?;
        self.config_db.update_folder_stats(
            folder_id,
            Some(report.valid.len()),
            None,
        )?;
        Ok(report)
    }

    // -- Search --

    pub fn search(
        &self,
        query: &str,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<FusedResult>> {
        self.searcher.search(query, top_k, threshold)
    }

    pub fn search_batch<'q>(
        &self,
        queries: &[&'q str],
        top_k: usize,
        threshold: f32,
    ) -> Vec<(&'q str, Vec<FusedResult>)> {
        self.searcher.search_batch(queries, top_k, threshold)
    }

    // -- Maintenance --

    pub fn health_check(&self) -> Result<HealthReport> {
        self.maintenance.health_check()
    }

    pub fn cleanup(&self, auto_remove: bool) -> Result<CleanupReport> {
        self.maintenance.cleanup(auto_remove)
    }

    pub fn optimize(&self) -> Result<OptimizeReport> {
        self.maintenance.optimize()
    }

    // -- Folders --

    pub fn add_folder(
        &self,
        path: &Path,
        name: Option<&str>,
    ) -> Result<FolderRecord> {
        self.config_db.add_folder(path, name)
    }

    pub fn list_folders(&self) -> Result<Vec<FolderRecord>> {
        self.config_db.list_folders()
    }

    pub fn get_folder(&self, folder_id: &str) -> Result<Option<FolderRecord>> {
        self.config_db.get_folder(folder_id)
    }

    /// Unregister a folder. With `delete_vectors`, every record indexed under
    /// it is deleted too; the report says how many were removed and how many
    /// could not be.
    pub fn remove_folder(
        &self,
        folder_id: &str,
        delete_vectors: bool,
    ) -> Result<FolderRemovalReport> {
        let folder = self.require_folder(folder_id)?;
        if self.is_indexing() && folder.status == FolderStatus::Indexing {
            return Err(Error::IndexInProgress);
        }

        let report = if delete_vectors {
            self.maintenance.remove_folder_records(folder_id)?
        } else {
            FolderRemovalReport::default()
        };
        self.config_db.remove_folder(folder_id)?;
        tracing::info!(
            folder = %folder.name,
            deleted = report.removed,
            failed = report.failed,
            "removed folder"
        );
        Ok(report)
    }

    pub fn folder_totals(&self) -> Result<FolderTotals> {
        self.config_db.folder_totals()
    }

    pub fn get_stats(&self) -> Result<Stats> {
        let semantic_count = if self.store.semantic_enabled() {
            self.store.count(Collection::Semantic)?
        } else {
            0
        };
        Ok(Stats {
            visual_count: self.store.count(Collection::Visual)?,
            semantic_count,
            hybrid_mode: self.searcher.is_hybrid(),
            folders: self.config_db.folder_totals()?,
        })
    }

    fn require_folder(&self, folder_id: &str) -> Result<FolderRecord> {
        self.config_db
            .get_folder(folder_id)?
            .ok_or_else(|| Error::NotFound {
                kind: "folder",
                name: folder_id.to_string(),
            })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("searcher", &self.searcher)
            .finish_non_exhaustive()
    }
}

fn existing_folder_path(folder: &FolderRecord) -> Result<PathBuf> {
    let root = PathBuf::from(&folder.path);
    if !root.is_dir() {
        return Err(Error::NotFound {
            kind: "folder path",
            name: folder.path.clone(),
        });
    }
    Ok(root)
}
