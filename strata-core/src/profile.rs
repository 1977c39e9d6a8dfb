use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// An identity known to this node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub id: String,
    pub peername: String,
}

/// Shared profile registry. The active profile is the identity this node
/// acts as; other entries are peers and collaborators learned over the
/// network. Writes are serialized internally.
pub struct ProfileStore {
    profiles: DashMap<String, Profile>,
    active_id: String,
}

impl ProfileStore {
    pub fn new(active: Profile) -> Self {
        let store = Self {
            profiles: DashMap::new(),
            active_id: active.id.clone(),
        };
        store.profiles.insert(active.id.clone(), active);
        store
    }

    /// The identity this node acts as. Fails when the active profile has
    /// been removed from the store; scope construction surfaces that as the
    /// dispatch error.
    pub fn active_profile(&self) -> Result<Profile, Error> {
        self.profiles
            .get(&self.active_id)
            .map(|p| p.clone())
            .ok_or_else(|| Error::internal("cannot determine active identity"))
    }

    pub fn get(&self, id: &str) -> Option<Profile> {
        self.profiles.get(id).map(|p| p.clone())
    }

    pub fn by_peername(&self, peername: &str) -> Option<Profile> {
        self.profiles
            .iter()
            .find(|p| p.peername == peername)
            .map(|p| p.clone())
    }

    pub fn put(&self, profile: Profile) {
        self.profiles.insert(profile.id.clone(), profile);
    }

    pub fn remove(&self, id: &str) {
        self.profiles.remove(id);
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
