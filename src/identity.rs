//! Identity records and the find-or-create resolver.
//!
//! A verified pubkey maps to at most one local identity. The resolver looks
//! the key up in a [`UserDirectory`], creates a record on first login, and
//! merges profile metadata on every login under a fixed field policy:
//! non-empty incoming values overwrite, absent values leave stored fields
//! untouched, and nothing is ever cleared.

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Attempts at deriving a unique handle before giving up.
const MAX_HANDLE_ATTEMPTS: usize = 4;

/// Domain used for placeholder contact addresses when the profile carries
/// no email-like field.
const PLACEHOLDER_CONTACT_DOMAIN: &str = "nostr.local";

/// A local user identity bound to a Nostr public key.
///
/// The pubkey is unique across the directory and immutable once set; only
/// the profile fields change after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Identity {
    /// Stable local user id.
    pub id: u64,
    /// Bound x-only public key, hex.
    pub pubkey: String,
    /// Unique login handle derived from the profile name or pubkey prefix.
    pub handle: String,
    /// Contact address; a placeholder unless the profile supplied one.
    pub contact: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub nip05: Option<String>,
    pub avatar_url: Option<String>,
    pub website: Option<String>,
}

impl Identity {
    /// Apply a metadata update in place. Fields the update leaves as `None`
    /// keep their stored values.
    pub fn apply(&mut self, update: &MetadataUpdate) {
        let fields = [
            (&mut self.display_name, &update.display_name),
            (&mut self.bio, &update.bio),
            (&mut self.nip05, &update.nip05),
            (&mut self.avatar_url, &update.avatar_url),
            (&mut self.website, &update.website),
        ];
        for (stored, incoming) in fields {
            if let Some(value) = incoming {
                *stored = Some(value.clone());
            }
        }
    }
}

/// Kind-0 style profile metadata accompanying a login.
///
/// Unknown fields are ignored so arbitrary profile events parse cleanly.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProfileMetadata {
    pub name: Option<String>,
    pub about: Option<String>,
    pub nip05: Option<String>,
    pub image: Option<String>,
    pub website: Option<String>,
    pub email: Option<String>,
}

impl ProfileMetadata {
    /// True when no field carries a usable value.
    pub fn is_empty(&self) -> bool {
        self.to_update().is_empty() && non_empty(&self.email).is_none()
    }

    /// Map profile fields onto identity fields, dropping empty strings so
    /// they can never clear a stored value.
    pub fn to_update(&self) -> MetadataUpdate {
        MetadataUpdate {
            display_name: non_empty(&self.name),
            bio: non_empty(&self.about),
            nip05: non_empty(&self.nip05),
            avatar_url: non_empty(&self.image),
            website: non_empty(&self.website),
        }
    }
}

/// A set of identity field overwrites; `None` means "leave unchanged".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataUpdate {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub nip05: Option<String>,
    pub avatar_url: Option<String>,
    pub website: Option<String>,
}

impl MetadataUpdate {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.bio.is_none()
            && self.nip05.is_none()
            && self.avatar_url.is_none()
            && self.website.is_none()
    }
}

fn non_empty(field: &Option<String>) -> Option<String> {
    field.as_deref().filter(|s| !s.is_empty()).map(String::from)
}

/// Errors surfaced by a [`UserDirectory`] implementation.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The handle is already bound to a different pubkey.
    #[error("handle already taken")]
    HandleTaken,
    /// The pubkey is already bound to an identity (uniqueness constraint).
    #[error("pubkey already bound to an identity")]
    PubkeyTaken,
    #[error("identity not found")]
    NotFound,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// Errors returned by the resolver. Both are rejection values for the
/// current login attempt, not process faults.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Handle derivation or record creation failed after bounded retries.
    #[error("could not create identity")]
    CreationFailed,
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Narrow interface onto the external user directory.
///
/// Implementations must enforce uniqueness of the pubkey binding on create
/// and report a violation as [`DirectoryError::PubkeyTaken`].
pub trait UserDirectory {
    /// Exact-match lookup; at most one identity exists per pubkey.
    fn find_by_public_key(&self, pubkey: &str) -> Result<Option<Identity>, DirectoryError>;
    /// Create a fresh identity binding `pubkey` to `handle` and `contact`.
    fn create_identity(
        &self,
        pubkey: &str,
        handle: &str,
        contact: &str,
    ) -> Result<Identity, DirectoryError>;
    /// Overwrite the fields the update names, returning the merged record.
    fn update_identity_fields(
        &self,
        id: u64,
        fields: &MetadataUpdate,
    ) -> Result<Identity, DirectoryError>;
    /// Remove an identity and release its pubkey and handle bindings. Only
    /// used to roll back a creation whose follow-up metadata write failed.
    fn remove_identity(&self, id: u64) -> Result<(), DirectoryError>;
}

/// Deterministic pubkey-to-identity mapping over a [`UserDirectory`].
pub struct IdentityResolver<D> {
    dir: D,
}

impl<D: UserDirectory> IdentityResolver<D> {
    pub fn new(dir: D) -> Self {
        Self { dir }
    }

    pub fn find_by_public_key(&self, pubkey: &str) -> Result<Option<Identity>, IdentityError> {
        Ok(self.dir.find_by_public_key(pubkey)?)
    }

    /// Find the identity bound to `pubkey`, creating it on first login, and
    /// merge the supplied metadata into it.
    ///
    /// Calling this twice with the same inputs yields the same record and
    /// never a duplicate. A `PubkeyTaken` error on create means a
    /// concurrent login just created the record, so the lookup is retried
    /// once before failing.
    pub fn resolve_or_create(
        &self,
        pubkey: &str,
        metadata: &ProfileMetadata,
    ) -> Result<Identity, IdentityError> {
        let update = metadata.to_update();

        if let Some(existing) = self.dir.find_by_public_key(pubkey)? {
            return self.merge(existing, &update);
        }

        let base = derive_handle(metadata, pubkey);
        let contact = non_empty(&metadata.email)
            .unwrap_or_else(|| format!("{pubkey}@{PLACEHOLDER_CONTACT_DOMAIN}"));

        let mut handle = base.clone();
        for _ in 0..MAX_HANDLE_ATTEMPTS {
            match self.dir.create_identity(pubkey, &handle, &contact) {
                Ok(identity) => {
                    // A failed metadata write must not leave the fresh
                    // record behind, so creation stays all-or-nothing.
                    let id = identity.id;
                    return self.merge(identity, &update).map_err(|e| {
                        let _ = self.dir.remove_identity(id);
                        e
                    });
                }
                Err(DirectoryError::HandleTaken) => {
                    handle = format!("{base}_{:04x}", rand::thread_rng().gen::<u16>());
                }
                Err(DirectoryError::PubkeyTaken) => {
                    // Lost the race to a concurrent login for the same key.
                    return match self.dir.find_by_public_key(pubkey)? {
                        Some(existing) => self.merge(existing, &update),
                        None => Err(IdentityError::CreationFailed),
                    };
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(IdentityError::CreationFailed)
    }

    fn merge(&self, identity: Identity, update: &MetadataUpdate) -> Result<Identity, IdentityError> {
        if update.is_empty() {
            return Ok(identity);
        }
        Ok(self.dir.update_identity_fields(identity.id, update)?)
    }
}

/// Derive a login handle from the profile name, falling back to a pubkey
/// prefix when no usable name is present.
fn derive_handle(metadata: &ProfileMetadata, pubkey: &str) -> String {
    if let Some(name) = non_empty(&metadata.name) {
        let cleaned: String = name
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c.is_whitespace() { '_' } else { c })
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
            .collect();
        if !cleaned.is_empty() {
            return cleaned;
        }
    }
    format!("nostr_{}", &pubkey[..pubkey.len().min(8)])
}
