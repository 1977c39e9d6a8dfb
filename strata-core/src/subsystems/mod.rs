//! Seams for the external collaborators the core consumes through the
//! scope: dataset storage, the content-addressed filesystem, the logbook,
//! stats, the registry client, remotes, reference resolution, and the
//! transform runtime.
//!
//! The core never implements these subsystems; it injects them. The
//! in-memory implementations in [`mem`] back tests, the CLI's standalone
//! mode, and any embedding that doesn't bring its own.

pub mod mem;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::dataset::{Dataset, PeerInfo, VersionInfo};
use crate::dsref::Ref;
use crate::error::Error;
use crate::source::Source;

/// The repository's dataset version index.
pub trait Refstore: Send + Sync {
    /// List index rows ordered by alias, newest version per dataset.
    fn list(&self, offset: usize, limit: usize) -> BoxFuture<'_, Result<Vec<VersionInfo>, Error>>;

    /// Look up one row. A ref with a path selects that exact version; a
    /// bare alias selects the head.
    fn get(&self, reference: &Ref) -> BoxFuture<'_, Result<Option<VersionInfo>, Error>>;

    /// Insert or replace the head row for the row's alias.
    fn put(&self, info: VersionInfo) -> BoxFuture<'_, Result<(), Error>>;

    /// Delete every version of an alias, returning how many rows went away.
    fn delete(&self, reference: &Ref) -> BoxFuture<'_, Result<usize, Error>>;

    /// Move an alias, carrying its versions along.
    fn rename(&self, from: &Ref, to: &Ref) -> BoxFuture<'_, Result<VersionInfo, Error>>;
}

/// Content-addressed file storage.
pub trait Filesystem: Send + Sync {
    fn get(&self, path: &str) -> BoxFuture<'_, Result<Vec<u8>, Error>>;

    /// Store bytes, returning the content-addressed path they landed at.
    fn put(&self, data: Vec<u8>) -> BoxFuture<'_, Result<String, Error>>;
}

/// One append-only history entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub alias: String,
    pub profile_id: String,
    pub action: String,
    pub note: String,
}

/// The append-only operation log.
pub trait Logbook: Send + Sync {
    fn append(&self, entry: LogEntry) -> BoxFuture<'_, Result<(), Error>>;

    fn log(&self, reference: &Ref) -> BoxFuture<'_, Result<Vec<LogEntry>, Error>>;

    /// Flush buffered entries; called during instance teardown.
    fn flush(&self) -> BoxFuture<'_, Result<(), Error>>;
}

/// Column statistics for dataset bodies.
pub trait Stats: Send + Sync {
    fn stats(&self, info: &VersionInfo) -> BoxFuture<'_, Result<Value, Error>>;
}

/// Client for the public dataset registry.
pub trait RegistryClient: Send + Sync {
    /// Look up a profile by peername.
    fn lookup_profile(&self, peername: &str)
        -> BoxFuture<'_, Result<Option<crate::profile::Profile>, Error>>;

    fn search(&self, term: &str, limit: usize)
        -> BoxFuture<'_, Result<Vec<VersionInfo>, Error>>;
}

/// Networked siblings: remote nodes and connected p2p peers.
pub trait Remotes: Send + Sync {
    /// Fetch a dataset version from the network into the local repository.
    fn pull(&self, reference: &Ref) -> BoxFuture<'_, Result<VersionInfo, Error>>;

    /// Publish a local version to the named remote.
    fn push(&self, info: &VersionInfo, remote: &str) -> BoxFuture<'_, Result<(), Error>>;

    fn peers(&self, offset: usize, limit: usize) -> BoxFuture<'_, Result<Vec<PeerInfo>, Error>>;

    fn peer(&self, id_or_name: &str) -> BoxFuture<'_, Result<Option<PeerInfo>, Error>>;

    fn connect(&self, address: &str) -> BoxFuture<'_, Result<PeerInfo, Error>>;

    fn disconnect(&self, address: &str) -> BoxFuture<'_, Result<(), Error>>;
}

/// Reference resolution: fill in the profile id and version path of a
/// reference, looking where the source hint says to look first.
pub trait Loader: Send + Sync {
    fn resolve<'a>(&'a self, reference: &'a mut Ref, source: Source)
        -> BoxFuture<'a, Result<(), Error>>;
}

/// Executes transform scripts against a base dataset.
pub trait TransformRunner: Send + Sync {
    fn apply(&self, script: &str, base: Option<Dataset>)
        -> BoxFuture<'_, Result<Dataset, Error>>;
}

/// The full set of injected collaborators an instance runs against.
#[derive(Clone)]
pub struct Subsystems {
    pub refstore: std::sync::Arc<dyn Refstore>,
    pub filesystem: std::sync::Arc<dyn Filesystem>,
    pub logbook: std::sync::Arc<dyn Logbook>,
    pub stats: std::sync::Arc<dyn Stats>,
    pub registry_client: std::sync::Arc<dyn RegistryClient>,
    pub remotes: std::sync::Arc<dyn Remotes>,
    pub loader: std::sync::Arc<dyn Loader>,
    pub runner: std::sync::Arc<dyn TransformRunner>,
}

impl Subsystems {
    /// All-in-memory wiring, for tests and standalone use.
    pub fn in_memory() -> Self {
        mem::MemSubsystems::new().subsystems()
    }
}
