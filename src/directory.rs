//! File-backed user directory.
//!
//! Identities are stored as one JSON file per record under `users/`, with
//! plain-text index files mapping pubkey and handle to the record id.
//! Records are written atomically via a temp file rename, and index files
//! are claimed with `create_new` so the filesystem itself enforces the
//! one-identity-per-pubkey and unique-handle constraints.
//!
//! Layout under the store root:
//!
//! ```text
//! users/<id>.json          identity record
//! index/by-pubkey/<pk>.txt record id bound to this pubkey
//! index/by-handle/<h>.txt  record id owning this handle
//! ```

use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::identity::{DirectoryError, Identity, MetadataUpdate, UserDirectory};

/// Persistent directory of identities rooted at `root`.
#[derive(Clone)]
pub struct FileDirectory {
    root: PathBuf,
    next_id: Arc<AtomicU64>,
}

impl FileDirectory {
    /// Open a directory at `root`, resuming id allocation from the highest
    /// existing record.
    pub fn open(root: PathBuf) -> Result<Self, DirectoryError> {
        let mut max_id = 0;
        let users_dir = root.join("users");
        if users_dir.exists() {
            for entry in fs::read_dir(&users_dir)? {
                let entry = entry?;
                if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                    if let Ok(id) = stem.parse::<u64>() {
                        max_id = max_id.max(id);
                    }
                }
            }
        }
        Ok(Self {
            root,
            next_id: Arc::new(AtomicU64::new(max_id)),
        })
    }

    /// Ensure the on-disk directory structure exists.
    pub fn init(&self) -> Result<(), DirectoryError> {
        let dirs = ["users", "index/by-pubkey", "index/by-handle"];
        for d in dirs {
            fs::create_dir_all(self.root.join(d))?;
        }
        Ok(())
    }

    fn user_path(&self, id: u64) -> PathBuf {
        self.root.join("users").join(format!("{id}.json"))
    }

    fn pubkey_index_path(&self, pubkey: &str) -> PathBuf {
        self.root
            .join("index/by-pubkey")
            .join(format!("{pubkey}.txt"))
    }

    fn handle_index_path(&self, handle: &str) -> PathBuf {
        self.root
            .join("index/by-handle")
            .join(format!("{handle}.txt"))
    }

    /// Claim an index file for `id`, failing if it already exists.
    fn claim_index(path: &PathBuf, id: u64) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        writeln!(f, "{id}")?;
        Ok(())
    }

    /// Write an identity record atomically to its canonical path.
    fn write_record(&self, identity: &Identity) -> Result<(), DirectoryError> {
        let path = self.user_path(identity.id);
        let parent = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent)?;
        let tmp = tempfile::NamedTempFile::new_in(&parent)?;
        serde_json::to_writer(&tmp, identity)?;
        tmp.persist(&path).map_err(|e| DirectoryError::Io(e.error))?;
        Ok(())
    }

    fn read_record(&self, id: u64) -> Result<Identity, DirectoryError> {
        let data = fs::read_to_string(self.user_path(id)).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                DirectoryError::NotFound
            } else {
                DirectoryError::Io(e)
            }
        })?;
        Ok(serde_json::from_str(&data)?)
    }
}

impl UserDirectory for FileDirectory {
    fn find_by_public_key(&self, pubkey: &str) -> Result<Option<Identity>, DirectoryError> {
        let path = self.pubkey_index_path(pubkey);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let id: u64 = data
            .trim()
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "corrupt pubkey index"))?;
        Ok(Some(self.read_record(id)?))
    }

    fn create_identity(
        &self,
        pubkey: &str,
        handle: &str,
        contact: &str,
    ) -> Result<Identity, DirectoryError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let handle_idx = self.handle_index_path(handle);
        let pubkey_idx = self.pubkey_index_path(pubkey);

        match Self::claim_index(&handle_idx, id) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(DirectoryError::HandleTaken)
            }
            Err(e) => return Err(e.into()),
        }
        match Self::claim_index(&pubkey_idx, id) {
            Ok(()) => {}
            Err(e) => {
                // Release the handle claim before reporting the conflict.
                let _ = fs::remove_file(&handle_idx);
                return Err(if e.kind() == io::ErrorKind::AlreadyExists {
                    DirectoryError::PubkeyTaken
                } else {
                    e.into()
                });
            }
        }

        let identity = Identity {
            id,
            pubkey: pubkey.to_string(),
            handle: handle.to_string(),
            contact: contact.to_string(),
            display_name: None,
            bio: None,
            nip05: None,
            avatar_url: None,
            website: None,
        };
        if let Err(e) = self.write_record(&identity) {
            let _ = fs::remove_file(&handle_idx);
            let _ = fs::remove_file(&pubkey_idx);
            return Err(e);
        }
        Ok(identity)
    }

    fn update_identity_fields(
        &self,
        id: u64,
        fields: &MetadataUpdate,
    ) -> Result<Identity, DirectoryError> {
        let mut identity = self.read_record(id)?;
        identity.apply(fields);
        self.write_record(&identity)?;
        Ok(identity)
    }

    fn remove_identity(&self, id: u64) -> Result<(), DirectoryError> {
        let identity = self.read_record(id)?;
        // Release the index claims before the record itself so a
        // concurrent lookup sees "not found" rather than a dangling index.
        let _ = fs::remove_file(self.handle_index_path(&identity.handle));
        let _ = fs::remove_file(self.pubkey_index_path(&identity.pubkey));
        fs::remove_file(self.user_path(id))?;
        Ok(())
    }
}
