use std::{
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    photo_id::ContentId,
};

const FOLDERS: TableDefinition<&str, &[u8]> = TableDefinition::new("folders");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

/// Hex digits in a generated folder id.
const FOLDER_ID_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderStatus {
    Pending,
    Indexing,
    Active,
    Paused,
    Error,
}

impl std::fmt::Display for FolderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Indexing => "indexing",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Error => "error",
        })
    }
}

/// A managed photo root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRecord {
    pub id: String,
    /// Canonical absolute path.
    pub path: String,
    pub name: String,
    /// Seconds since the Unix epoch.
    pub added_at: u64,
    pub last_scan: Option<u64>,
    pub image_count: usize,
    pub indexed_count: usize,
    pub status: FolderStatus,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FolderTotals {
    pub total_folders: usize,
    pub active_folders: usize,
    pub total_images: usize,
    pub total_indexed: usize,
}

/// Folder registry and string settings.
pub struct ConfigDb {
    db: Database,
}

impl ConfigDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(FOLDERS)?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- Folders --

    /// Register `path` as a managed folder.
    ///
    /// Registering the same directory twice returns the existing entry.
    /// `name` defaults to the directory's last component.
    pub fn add_folder(
        &self,
        path: &Path,
        name: Option<&str>,
    ) -> Result<FolderRecord> {
        if !path.is_dir() {
            return Err(Error::InvalidPath(format!(
                "not an existing directory: {}",
                path.display()
            )));
        }
        let canonical = path.canonicalize()?;
        let path_str = canonical.to_string_lossy().into_owned();
        let id = ContentId::from_path(&canonical)
            .extend_short(FOLDER_ID_LEN)
            .short;

        let txn = self.db.begin_write()?;
        let folder = {
            let mut table = txn.open_table(FOLDERS)?;
            let existing = match table.get(id.as_str())? {
                Some(bytes) => {
                    Some(serde_json::from_slice::<FolderRecord>(bytes.value())?)
                }
                None => None,
            };
            match existing {
                Some(folder) => {
                    tracing::warn!(path = %path_str, "folder already registered");
                    folder
                }
                None => {
                    let folder = FolderRecord {
                        id: id.clone(),
                        name: name
                            .map(str::to_string)
                            .or_else(|| {
                                canonical
                                    .file_name()
                                    .map(|n| n.to_string_lossy().into_owned())
                            })
                            .unwrap_or_else(|| path_str.clone()),
                        path: path_str,
                        added_at: now(),
                        last_scan: None,
                        image_count: 0,
                        indexed_count: 0,
                        status: FolderStatus::Pending,
                    };
                    let bytes = serde_json::to_vec(&folder)?;
                    table.insert(id.as_str(), bytes.as_slice())?;
                    tracing::info!(name = %folder.name, path = %folder.path, "added folder");
                    folder
                }
            }
        };
        txn.commit()?;
        Ok(folder)
    }

    pub fn get_folder(&self, id: &str) -> Result<Option<FolderRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FOLDERS)?;
        match table.get(id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes.value())?)),
            None => Ok(None),
        }
    }

    /// All folders, oldest registration first.
    pub fn list_folders(&self) -> Result<Vec<FolderRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FOLDERS)?;
        let mut result: Vec<FolderRecord> = Vec::new();
        for entry in table.iter()? {
            let (_k, v) = entry?;
            result.push(serde_json::from_slice(v.value())?);
        }
        result.sort_by(|a, b| {
            a.added_at.cmp(&b.added_at).then_with(|| a.path.cmp(&b.path))
        });
        Ok(result)
    }

    pub fn remove_folder(&self, id: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(FOLDERS)?;
            table.remove(id)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    /// Apply `update` to folder `id` in a single write transaction.
    pub fn update_folder(
        &self,
        id: &str,
        update: impl FnOnce(&mut FolderRecord),
    ) -> Result<FolderRecord> {
        let txn = self.db.begin_write()?;
        let folder = {
            let mut table = txn.open_table(FOLDERS)?;
            let current = match table.get(id)? {
                Some(bytes) => {
                    serde_json::from_slice::<FolderRecord>(bytes.value())?
                }
                None => {
                    return Err(Error::NotFound {
                        kind: "folder",
                        name: id.to_string(),
                    });
                }
            };
            let mut folder = current;
            update(&mut folder);
            let bytes = serde_json::to_vec(&folder)?;
            table.insert(id, bytes.as_slice())?;
            folder
        };
        txn.commit()?;
        Ok(folder)
    }

    pub fn set_folder_status(
        &self,
        id: &str,
        status: FolderStatus,
    ) -> Result<FolderRecord> {
        self.update_folder(id, |folder| folder.status = status)
    }

    /// Record scan results and stamp `last_scan` with the current time.
    pub fn update_folder_stats(
        &self,
        id: &str,
        image_count: Option<usize>,
        indexed_count: Option<usize>,
    ) -> Result<FolderRecord> {
        let scanned_at = now();
        self.update_folder(id, |folder| {
            folder.last_scan = Some(scanned_at);
            if let Some(count) = image_count {
                folder.image_count = count;
            }
            if let Some(count) = indexed_count {
                folder.indexed_count = count;
            }
        })
    }

    /// Move folders stuck in [`FolderStatus::Indexing`] to
    /// [`FolderStatus::Error`]. The database is exclusive to one process, so
    /// at open time such a status can only be left over from a run that died.
    pub fn recover_interrupted(&self) -> Result<usize> {
        let mut recovered = 0;
        for folder in self.list_folders()? {
            if folder.status != FolderStatus::Indexing {
                continue;
            }
            self.set_folder_status(&folder.id, FolderStatus::Error)?;
            tracing::warn!(
                name = %folder.name,
                "folder was left mid-index, marked as error"
            );
            recovered += 1;
        }
        Ok(recovered)
    }

    pub fn folder_totals(&self) -> Result<FolderTotals> {
        let folders = self.list_folders()?;
        Ok(FolderTotals {
            total_folders: folders.len(),
            active_folders: folders
                .iter()
                .filter(|f| f.status == FolderStatus::Active)
                .count(),
            total_images: folders.iter().map(|f| f.image_count).sum(),
            total_indexed: folders.iter().map(|f| f.indexed_count).sum(),
        })
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    /// Get a setting, returning the default if not set.
    pub fn get_setting_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_setting(key)?
            .unwrap_or_else(|| default.to_string()))
    }
}

impl std::fmt::Debug for ConfigDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDb").finish_non_exhaustive()
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
