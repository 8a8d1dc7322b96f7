use anyhow::{bail, Context, Result};
use facevault_engine::{EngineError, IdentityId, IdentityStore, StoredIdentity};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const IDENTITIES_FILE: &str = "identities.bin";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: u64,
    pub label: String,
    /// Encrypted embedding blob.
    pub embedding: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IdentityFile {
    next_id: u64,
    records: Vec<IdentityRecord>,
}

/// Identities persisted as one postcard file under the data directory.
///
/// Every write rewrites the file through a temporary sibling and a rename,
/// so a crash leaves either the old or the new set on disk.
pub struct FileStore {
    file: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("creating {}", data_dir.display()))?;
        Ok(Self {
            file: data_dir.join(IDENTITIES_FILE),
            lock: Mutex::new(()),
        })
    }

    pub fn records(&self) -> Result<Vec<IdentityRecord>> {
        let _guard = self.guard();
        Ok(self.load()?.records)
    }

    pub fn find_by_label(&self, label: &str) -> Result<Option<IdentityRecord>> {
        Ok(self.records()?.into_iter().find(|r| r.label == label))
    }

    pub fn label_of(&self, id: IdentityId) -> Result<Option<String>> {
        Ok(self
            .records()?
            .into_iter()
            .find(|r| r.id == id.0)
            .map(|r| r.label))
    }

    fn load(&self) -> Result<IdentityFile> {
        Ok(read_postcard(&self.file)?.unwrap_or_default())
    }

    fn save(&self, contents: &IdentityFile) -> Result<()> {
        write_postcard(&self.file, contents)
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn insert(&self, label: &str, embedding: String) -> Result<IdentityId> {
        let _guard = self.guard();
        let mut contents = self.load()?;
        if contents.records.iter().any(|r| r.label == label) {
            bail!("{label} is already enrolled");
        }
        contents.next_id += 1;
        let id = contents.next_id;
        contents.records.push(IdentityRecord {
            id,
            label: label.to_string(),
            embedding,
        });
        self.save(&contents)?;
        Ok(IdentityId(id))
    }

    fn remove(&self, id: IdentityId) -> Result<bool> {
        let _guard = self.guard();
        let mut contents = self.load()?;
        let before = contents.records.len();
        contents.records.retain(|r| r.id != id.0);
        if contents.records.len() == before {
            return Ok(false);
        }
        self.save(&contents)?;
        Ok(true)
    }
}

fn store_error(err: anyhow::Error) -> EngineError {
    EngineError::Store(format!("{err:#}"))
}

impl IdentityStore for FileStore {
    fn fetch_all_identities(&self) -> facevault_engine::error::Result<Vec<StoredIdentity>> {
        let mut rows: Vec<StoredIdentity> = self
            .records()
            .map_err(store_error)?
            .into_iter()
            .map(|r| StoredIdentity {
                id: IdentityId(r.id),
                embedding: r.embedding,
            })
            .collect();
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    }

    fn insert_identity(
        &self,
        label: &str,
        embedding: String,
    ) -> facevault_engine::error::Result<IdentityId> {
        self.insert(label, embedding).map_err(store_error)
    }

    fn remove_identity(&self, id: IdentityId) -> facevault_engine::error::Result<bool> {
        self.remove(id).map_err(store_error)
    }
}

/// Reads a postcard file; a missing file is `None`.
pub(crate) fn read_postcard<T: DeserializeOwned>(file: &Path) -> Result<Option<T>> {
    if !file.exists() {
        return Ok(None);
    }
    let data = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let value =
        postcard::from_bytes(&data).with_context(|| format!("decoding {}", file.display()))?;
    Ok(Some(value))
}

pub(crate) fn write_postcard<T: Serialize>(file: &Path, value: &T) -> Result<()> {
    let data = postcard::to_allocvec(value)?;
    let tmp = file.with_extension("tmp");
    std::fs::write(&tmp, data).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, file).with_context(|| format!("replacing {}", file.display()))?;
    Ok(())
}
