//! Durable identity: an opaque token generated once, plus a mutable
//! display name, persisted under a fixed storage key and read back at
//! session start.

use std::path::PathBuf;

use chatline_shared::Identity;

use crate::storage::Storage;

const IDENTITY_KEY: &str = "chatline_identity";

#[derive(Debug, Clone)]
pub struct IdentityStore {
    storage: Storage,
}

impl IdentityStore {
    pub fn new() -> Self {
        Self {
            storage: Storage::new(),
        }
    }

    pub fn at(dir: PathBuf) -> Self {
        Self {
            storage: Storage::at(dir),
        }
    }

    /// The stored identity, or a freshly generated one (persisted
    /// immediately). The token never changes after this point.
    pub fn load_or_create(&self) -> Identity {
        if let Some(identity) = self.storage.load::<Identity>(IDENTITY_KEY) {
            return identity;
        }
        let identity = Identity::generate();
        if !self.storage.save(IDENTITY_KEY, &identity) {
            tracing::warn!("failed to persist new identity");
        }
        identity
    }

    /// Write the identity; called on every change.
    pub fn save(&self, identity: &Identity) -> bool {
        self.storage.save(IDENTITY_KEY, identity)
    }

    pub fn clear(&self) {
        self.storage.remove(IDENTITY_KEY);
    }
}

impl Default for IdentityStore {
    fn default() -> Self {
        Self::new()
    }
}
