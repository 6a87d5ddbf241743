//! Remote credentials and their local persistence.

use crate::error::{SyncError, SyncResult};
use crate::http::AuthToken;
use crate::metadata::keys;
use keepsake_codec::KeyMaterial;
use keepsake_storage::{KeyValueStore, KeyValueStoreExt};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// What the engine needs to talk to the remote and protect snapshots.
#[derive(Clone)]
pub struct Credentials {
    token: AuthToken,
    key_material: KeyMaterial,
}

impl Credentials {
    /// Creates credentials from a bearer token and the user's key material.
    pub fn new(token: AuthToken, key_material: KeyMaterial) -> Self {
        Self {
            token,
            key_material,
        }
    }

    /// Returns the bearer token.
    pub fn token(&self) -> &AuthToken {
        &self.token
    }

    /// Returns the key material for sealing snapshot secrets.
    pub fn key_material(&self) -> &KeyMaterial {
        &self.key_material
    }

    pub(crate) fn load(store: &dyn KeyValueStore) -> SyncResult<Option<Self>> {
        let Some(stored) = store.get_json::<StoredCredentials>(keys::CREDENTIALS)? else {
            return Ok(None);
        };
        let key_material = hex::decode(&stored.key_material).map_err(|e| {
            SyncError::Storage(keepsake_storage::StorageError::Corrupted {
                key: keys::CREDENTIALS.to_string(),
                message: e.to_string(),
            })
        })?;
        Ok(Some(Self {
            token: AuthToken::new(stored.token.clone()),
            key_material: KeyMaterial::new(key_material),
        }))
    }

    pub(crate) fn save(&self, store: &dyn KeyValueStore) -> SyncResult<()> {
        let stored = StoredCredentials {
            token: self.token.expose().to_string(),
            key_material: hex::encode(self.key_material.as_bytes()),
        };
        store.set_json(keys::CREDENTIALS, &stored)?;
        Ok(())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &self.token)
            .field("key_material", &self.key_material)
            .finish()
    }
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct StoredCredentials {
    token: String,
    key_material: String,
}
