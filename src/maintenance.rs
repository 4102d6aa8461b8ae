use std::{path::Path, sync::Arc};

use serde::Serialize;

use crate::{
    error::Result,
    photo_id::ContentId,
    record::PhotoMetadata,
    vector_store::{Collection, VectorStore},
};

/// Stale-rate percentage above which cleanup is strongly recommended.
const HIGH_STALE_RATE: f64 = 20.0;

/// Stale-rate percentage above which cleanup is suggested.
const MODERATE_STALE_RATE: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub total: usize,
    pub valid: usize,
    pub stale: usize,
    /// Records that could not be checked or updated.
    pub failed: usize,
    /// Percentage of stale records, rounded to 2 decimals.
    pub stale_rate: f64,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaleRecord {
    pub id: String,
    pub path: String,
    pub filename: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub found: usize,
    pub removed: usize,
    pub failed: usize,
    pub stale: Vec<StaleRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizeReport {
    pub health: HealthReport,
    /// Present when stale records were found and removed.
    pub cleanup: Option<CleanupReport>,
}

/// Outcome of deleting every record of one folder.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FolderRemovalReport {
    pub matched: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Stored-flag counters, without touching the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MaintenanceStats {
    pub total_records: usize,
    pub flagged_stale: usize,
    pub healthy: bool,
}

/// Detects and repairs drift between the index and the filesystem.
#[derive(Debug)]
pub struct Maintenance {
    store: Arc<VectorStore>,
}

impl Maintenance {
    pub fn new(store: Arc<VectorStore>) -> Self {
        Self { store }
    }

    /// Check every visual record against the filesystem.
    ///
    /// Missing files are flagged `exists = false`; files that reappeared
    /// get the flag restored. Nothing is deleted.
    pub fn health_check(&self) -> Result<HealthReport> {
        let records = self.store.list_metadata(Collection::Visual)?;
        let total = records.len();
        tracing::info!(total, "running health check");

        let (mut valid, mut stale, mut failed) = (0, 0, 0);
        for (id, metadata) in &records {
            let base = metadata.base();
            let present = match Path::new(&base.path).try_exists() {
                Ok(present) => present,
                Err(e) => {
                    tracing::warn!(path = %base.path, error = %e, "cannot check file");
                    failed += 1;
                    continue;
                }
            };

            if present {
                valid += 1;
            } else {
                stale += 1;
            }

            if present != base.exists
                && let Err(e) = self.store.set_exists(id, present)
            {
                tracing::warn!(path = %base.path, error = %e, "cannot update record");
                failed += 1;
            }
        }

        let stale_rate = stale_rate(stale, total);
        let report = HealthReport {
            total,
            valid,
            stale,
            failed,
            stale_rate,
            recommendations: recommendations(total, stale, stale_rate),
        };
        tracing::info!(
            total,
            valid,
            stale,
            stale_rate,
            "health check finished"
        );
        Ok(report)
    }

    /// Find records whose file is gone, optionally deleting them.
    ///
    /// With `auto_remove == false` this is a dry run that only lists them.
    /// Deletion removes the semantic record before the visual one.
    pub fn cleanup(&self, auto_remove: bool) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();

        for (id, metadata) in self.store.list_metadata(Collection::Visual)? {
            let base = metadata.base();
            match Path::new(&base.path).try_exists() {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    // Unknown is not gone: never delete on a failed stat.
                    tracing::warn!(path = %base.path, error = %e, "cannot check file");
                    report.failed += 1;
                    continue;
                }
            }
            report.found += 1;
            report.stale.push(StaleRecord {
                id: id.extend_short(16).short,
                path: base.path.clone(),
                filename: base.filename.clone(),
            });

            if !auto_remove {
                if base.exists
                    && let Err(e) = self.store.set_exists(&id, false)
                {
                    tracing::warn!(path = %base.path, error = %e, "cannot flag record");
                }
                continue;
            }

            match self.remove_record(&id) {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    tracing::warn!(path = %base.path, error = %e, "cannot remove record");
                    report.failed += 1;
                }
            }
        }

        if auto_remove {
            tracing::info!(removed = report.removed, failed = report.failed, "cleanup finished");
        } else {
            tracing::info!(found = report.found, "cleanup dry run finished");
        }
        Ok(report)
    }

    /// Health check followed by cleanup when anything is stale.
    pub fn optimize(&self) -> Result<OptimizeReport> {
        let health = self.health_check()?;
        let cleanup = if health.stale > 0 {
            Some(self.cleanup(true)?)
        } else {
            tracing::info!("index already optimal");
            None
        };
        Ok(OptimizeReport { health, cleanup })
    }

    /// Delete every record indexed under `folder_id`. A record that cannot
    /// be deleted is logged and counted, and the pass carries on.
    pub fn remove_folder_records(
        &self,
        folder_id: &str,
    ) -> Result<FolderRemovalReport> {
        let mut report = FolderRemovalReport::default();
        for (id, metadata) in self.store.list_metadata(Collection::Visual)? {
            if !in_folder(&metadata, folder_id) {
                continue;
            }
            report.matched += 1;
            match self.remove_record(&id) {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    tracing::warn!(
                        path = %metadata.base().path,
                        error = %e,
                        "cannot remove record"
                    );
                    report.failed += 1;
                }
            }
        }
        tracing::info!(
            folder = folder_id,
            removed = report.removed,
            failed = report.failed,
            "removed folder records"
        );
        Ok(report)
    }

    /// Counters from the stored `exists` flags.
    pub fn stats(&self) -> Result<MaintenanceStats> {
        let records = self.store.list_metadata(Collection::Visual)?;
        let flagged_stale =
            records.iter().filter(|(_, m)| !m.base().exists).count();
        Ok(MaintenanceStats {
            total_records: records.len(),
            flagged_stale,
            healthy: flagged_stale == 0,
        })
    }

    fn remove_record(&self, id: &ContentId) -> Result<()> {
        self.store.remove(id)?;
        Ok(())
    }
}

fn in_folder(metadata: &PhotoMetadata, folder_id: &str) -> bool {
    metadata.base().folder_id.as_deref() == Some(folder_id)
}

fn stale_rate(stale: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let rate = stale as f64 / total as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}

fn recommendations(total: usize, stale: usize, rate: f64) -> Vec<String> {
    if total == 0 {
        return vec!["index is empty, index some photos first".to_string()];
    }

    let mut out = Vec::new();
    if rate > HIGH_STALE_RATE {
        out.push(format!("stale rate is high ({rate:.1}%), run cleanup"));
    } else if rate > MODERATE_STALE_RATE {
        out.push(format!(
            "some indexed files were deleted ({rate:.1}%), cleanup is optional"
        ));
    } else {
        out.push("index is healthy".to_string());
    }
    if stale > 0 {
        out.push(format!("{stale} stale records can be removed with cleanup"));
    }
    out
}
