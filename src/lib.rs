//! photosearch - hybrid visual and semantic search over personal photo
//! collections.
//!
//! photosearch scans photo trees, stores one visual embedding per photo and,
//! when an image analyzer is available, a second embedding of the generated
//! caption and OCR text. Queries are expanded with synonyms, run against both
//! collections and merged with Reciprocal Rank Fusion. Maintenance keeps the
//! index in step with files that move or disappear.
//!
//! The neural models are not part of this crate: callers implement
//! [`VisualEncoder`], [`SemanticEncoder`] and [`ImageAnalyzer`] and hand
//! them to the [`Engine`].
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use photosearch::{
//!     CancelToken, Collaborators, DataDir, Engine, EngineConfig,
//!     VisualEncoder,
//! };
//!
//! # fn demo(clip: Arc<dyn VisualEncoder>) -> photosearch::Result<()> {
//! let data_dir = DataDir::resolve(None)?;
//! let config = EngineConfig {
//!     photos_root: "/home/me/Pictures".into(),
//!     ..Default::default()
//! };
//! let engine = Engine::open(&data_dir, config, Collaborators::new(clip))?;
//!
//! let summary = engine.index_all(None, &CancelToken::new())?;
//! println!("indexed {} photos", summary.success);
//!
//! // With a semantic encoder configured, scores are RRF values (at most
//! // about 0.033), so keep the threshold at zero unless running visual-only.
//! for hit in engine.search("a red car at night", 10, 0.0)? {
//!     println!("{} ({:.3})", hit.path, hit.fused_score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config_db;
pub mod data_dir;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod indexer;
pub mod maintenance;
pub mod photo_id;
pub mod query_expander;
pub mod record;
pub mod scanner;
pub mod search;
pub mod vector_store;

pub use config_db::{ConfigDb, FolderRecord, FolderStatus};
pub use data_dir::DataDir;
pub use encoder::{ImageAnalyzer, SemanticEncoder, VisualEncoder};
pub use engine::{Collaborators, Engine, EngineConfig, Stats};
pub use error::{Error, Result};
pub use indexer::{CancelToken, IndexSummary, Indexer, IndexerConfig};
pub use maintenance::{FolderRemovalReport, Maintenance};
pub use photo_id::ContentId;
pub use query_expander::QueryExpander;
pub use record::{Analysis, PhotoMetadata};
pub use scanner::{ScanOptions, Scanner};
pub use search::{FusedResult, HybridSearcher, SearchConfig};
pub use vector_store::{Collection, VectorStore};
