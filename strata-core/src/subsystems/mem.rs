//! In-memory subsystem implementations. These back the test suite and the
//! CLI's standalone mode; real deployments inject their own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::dataset::{Dataset, PeerInfo, VersionInfo};
use crate::dsref::Ref;
use crate::error::Error;
use crate::profile::Profile;
use crate::source::Source;

use super::{
    Filesystem, Loader, LogEntry, Logbook, Refstore, RegistryClient, Remotes, Stats, Subsystems,
    TransformRunner,
};

/// Concrete handles to one in-memory wiring, so tests can seed state and
/// observe side effects the trait surfaces don't expose.
pub struct MemSubsystems {
    pub refstore: Arc<MemRefstore>,
    pub filesystem: Arc<MemFilesystem>,
    pub logbook: Arc<MemLogbook>,
    pub registry_client: Arc<MemRegistryClient>,
    pub remotes: Arc<MemRemotes>,
    pub runner: Arc<MemTransformRunner>,
}

impl MemSubsystems {
    pub fn new() -> Self {
        Self {
            refstore: Arc::new(MemRefstore::new()),
            filesystem: Arc::new(MemFilesystem::new()),
            logbook: Arc::new(MemLogbook::new()),
            registry_client: Arc::new(MemRegistryClient::new()),
            remotes: Arc::new(MemRemotes::new()),
            runner: Arc::new(MemTransformRunner),
        }
    }

    /// Erase into the trait-object set an instance is built from.
    pub fn subsystems(&self) -> Subsystems {
        let refstore: Arc<dyn Refstore> = self.refstore.clone();
        Subsystems {
            refstore: refstore.clone(),
            filesystem: self.filesystem.clone(),
            logbook: self.logbook.clone(),
            stats: Arc::new(MemStats),
            registry_client: self.registry_client.clone(),
            remotes: self.remotes.clone(),
            loader: Arc::new(MemLoader::new(refstore, self.remotes.clone())),
            runner: self.runner.clone(),
        }
    }
}

impl Default for MemSubsystems {
    fn default() -> Self {
        Self::new()
    }
}

/// Version index held in maps: alias → versions, newest first.
#[derive(Default)]
pub struct MemRefstore {
    datasets: DashMap<String, Vec<VersionInfo>>,
}

impl MemRefstore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Refstore for MemRefstore {
    fn list(&self, offset: usize, limit: usize) -> BoxFuture<'_, Result<Vec<VersionInfo>, Error>> {
        Box::pin(async move {
            let mut heads: Vec<VersionInfo> = self
                .datasets
                .iter()
                .filter_map(|entry| entry.value().first().cloned())
                .collect();
            heads.sort_by(|a, b| a.alias().cmp(&b.alias()));
            Ok(heads.into_iter().skip(offset).take(limit).collect())
        })
    }

    fn get(&self, reference: &Ref) -> BoxFuture<'_, Result<Option<VersionInfo>, Error>> {
        let reference = reference.clone();
        Box::pin(async move {
            let Some(versions) = self.datasets.get(&reference.alias()) else {
                return Ok(None);
            };
            if reference.path.is_empty() {
                return Ok(versions.first().cloned());
            }
            Ok(versions.iter().find(|v| v.path == reference.path).cloned())
        })
    }

    fn put(&self, info: VersionInfo) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            self.datasets
                .entry(info.alias())
                .or_default()
                .insert(0, info);
            Ok(())
        })
    }

    fn delete(&self, reference: &Ref) -> BoxFuture<'_, Result<usize, Error>> {
        let alias = reference.alias();
        Box::pin(async move {
            match self.datasets.remove(&alias) {
                Some((_, versions)) => Ok(versions.len()),
                None => Err(Error::not_found(format!("dataset {alias:?} not found"))),
            }
        })
    }

    fn rename(&self, from: &Ref, to: &Ref) -> BoxFuture<'_, Result<VersionInfo, Error>> {
        let (from, to) = (from.clone(), to.clone());
        Box::pin(async move {
            if self.datasets.contains_key(&to.alias()) {
                return Err(Error::conflict(format!(
                    "dataset {:?} already exists",
                    to.alias()
                )));
            }
            let (_, mut versions) = self
                .datasets
                .remove(&from.alias())
                .ok_or_else(|| Error::not_found(format!("dataset {:?} not found", from.alias())))?;
            for v in versions.iter_mut() {
                v.username = to.username.clone();
                v.name = to.name.clone();
            }
            let head = versions
                .first()
                .cloned()
                .ok_or_else(|| Error::internal("renamed dataset has no versions"))?;
            self.datasets.insert(to.alias(), versions);
            Ok(head)
        })
    }
}

/// Content-addressed store over a map; paths look like `/mem/<hash>`.
#[derive(Default)]
pub struct MemFilesystem {
    files: DashMap<String, Vec<u8>>,
    counter: AtomicU64,
}

impl MemFilesystem {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Filesystem for MemFilesystem {
    fn get(&self, path: &str) -> BoxFuture<'_, Result<Vec<u8>, Error>> {
        let path = path.to_string();
        Box::pin(async move {
            self.files
                .get(&path)
                .map(|f| f.clone())
                .ok_or_else(|| Error::not_found(format!("no file at {path:?}")))
        })
    }

    fn put(&self, data: Vec<u8>) -> BoxFuture<'_, Result<String, Error>> {
        Box::pin(async move {
            let n = self.counter.fetch_add(1, Ordering::Relaxed);
            let path = format!("/mem/Qm{n:08x}");
            self.files.insert(path.clone(), data);
            Ok(path)
        })
    }
}

#[derive(Default)]
pub struct MemLogbook {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemLogbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("logbook lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Logbook for MemLogbook {
    fn append(&self, entry: LogEntry) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            self.entries.lock().expect("logbook lock").push(entry);
            Ok(())
        })
    }

    fn log(&self, reference: &Ref) -> BoxFuture<'_, Result<Vec<LogEntry>, Error>> {
        let alias = reference.alias();
        Box::pin(async move {
            Ok(self
                .entries
                .lock()
                .expect("logbook lock")
                .iter()
                .filter(|e| e.alias == alias)
                .cloned()
                .collect())
        })
    }

    fn flush(&self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async { Ok(()) })
    }
}

/// Stats derived from index rows alone.
#[derive(Default)]
pub struct MemStats;

impl Stats for MemStats {
    fn stats(&self, info: &VersionInfo) -> BoxFuture<'_, Result<Value, Error>> {
        let stats = json!({
            "bodySize": info.body_size,
            "bodyFormat": info.body_format,
        });
        Box::pin(async move { Ok(stats) })
    }
}

/// Registry stand-in seeded by tests.
#[derive(Default)]
pub struct MemRegistryClient {
    profiles: DashMap<String, Profile>,
    published: Mutex<Vec<VersionInfo>>,
}

impl MemRegistryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_profile(&self, profile: Profile) {
        self.profiles.insert(profile.peername.clone(), profile);
    }

    pub fn add_dataset(&self, info: VersionInfo) {
        self.published.lock().expect("registry lock").push(info);
    }
}

impl RegistryClient for MemRegistryClient {
    fn lookup_profile(
        &self,
        peername: &str,
    ) -> BoxFuture<'_, Result<Option<Profile>, Error>> {
        let peername = peername.to_string();
        Box::pin(async move { Ok(self.profiles.get(&peername).map(|p| p.clone())) })
    }

    fn search(&self, term: &str, limit: usize) -> BoxFuture<'_, Result<Vec<VersionInfo>, Error>> {
        let term = term.to_string();
        Box::pin(async move {
            Ok(self
                .published
                .lock()
                .expect("registry lock")
                .iter()
                .filter(|v| v.name.contains(&term) || v.commit_title.contains(&term))
                .take(limit)
                .cloned()
                .collect())
        })
    }
}

/// Network stand-in: a staged set of fetchable datasets plus a peer table.
#[derive(Default)]
pub struct MemRemotes {
    available: DashMap<String, VersionInfo>,
    pushed: Mutex<Vec<(String, VersionInfo)>>,
    peers: DashMap<String, PeerInfo>,
}

impl MemRemotes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a dataset as fetchable over the network.
    pub fn stage(&self, info: VersionInfo) {
        self.available.insert(info.alias(), info);
    }

    pub fn add_peer(&self, peer: PeerInfo) {
        self.peers.insert(peer.peername.clone(), peer);
    }

    /// Datasets pushed so far, as (remote, info) pairs.
    pub fn pushed(&self) -> Vec<(String, VersionInfo)> {
        self.pushed.lock().expect("remotes lock").clone()
    }

    pub(crate) fn lookup(&self, alias: &str) -> Option<VersionInfo> {
        self.available.get(alias).map(|v| v.clone())
    }
}

impl Remotes for MemRemotes {
    fn pull(&self, reference: &Ref) -> BoxFuture<'_, Result<VersionInfo, Error>> {
        let alias = reference.alias();
        Box::pin(async move {
            self.lookup(&alias).ok_or_else(|| {
                Error::not_found(format!("dataset {alias:?} not found on the network"))
            })
        })
    }

    fn push(&self, info: &VersionInfo, remote: &str) -> BoxFuture<'_, Result<(), Error>> {
        let (info, remote) = (info.clone(), remote.to_string());
        Box::pin(async move {
            if remote.is_empty() {
                return Err(Error::bad_request("no remote named"));
            }
            self.pushed.lock().expect("remotes lock").push((remote, info));
            Ok(())
        })
    }

    fn peers(&self, offset: usize, limit: usize) -> BoxFuture<'_, Result<Vec<PeerInfo>, Error>> {
        Box::pin(async move {
            let mut peers: Vec<PeerInfo> = self.peers.iter().map(|p| p.clone()).collect();
            peers.sort_by(|a, b| a.peername.cmp(&b.peername));
            Ok(peers.into_iter().skip(offset).take(limit).collect())
        })
    }

    fn peer(&self, id_or_name: &str) -> BoxFuture<'_, Result<Option<PeerInfo>, Error>> {
        let key = id_or_name.to_string();
        Box::pin(async move {
            if let Some(p) = self.peers.get(&key) {
                return Ok(Some(p.clone()));
            }
            Ok(self.peers.iter().find(|p| p.id == key).map(|p| p.clone()))
        })
    }

    fn connect(&self, address: &str) -> BoxFuture<'_, Result<PeerInfo, Error>> {
        let address = address.to_string();
        Box::pin(async move {
            if address.is_empty() {
                return Err(Error::bad_request("no peer address given"));
            }
            if let Some(mut existing) = self
                .peers
                .iter()
                .find(|p| p.address == address)
                .map(|p| p.clone())
            {
                existing.connected = true;
                self.peers.insert(existing.peername.clone(), existing.clone());
                return Ok(existing);
            }
            let peer = PeerInfo {
                id: Uuid::new_v4().simple().to_string(),
                peername: format!("peer-{}", self.peers.len() + 1),
                address,
                connected: true,
            };
            self.peers.insert(peer.peername.clone(), peer.clone());
            Ok(peer)
        })
    }

    fn disconnect(&self, address: &str) -> BoxFuture<'_, Result<(), Error>> {
        let address = address.to_string();
        Box::pin(async move {
            let Some(mut peer) = self
                .peers
                .iter()
                .find(|p| p.address == address || p.peername == address)
                .map(|p| p.clone())
            else {
                return Err(Error::not_found(format!("no connected peer {address:?}")));
            };
            peer.connected = false;
            self.peers.insert(peer.peername.clone(), peer);
            Ok(())
        })
    }
}

/// Resolves references against the local index, or the staged network set
/// when the source hint says to look there.
pub struct MemLoader {
    refstore: Arc<dyn Refstore>,
    remotes: Arc<MemRemotes>,
}

impl MemLoader {
    pub fn new(refstore: Arc<dyn Refstore>, remotes: Arc<MemRemotes>) -> Self {
        Self { refstore, remotes }
    }
}

impl Loader for MemLoader {
    fn resolve<'a>(
        &'a self,
        reference: &'a mut Ref,
        source: Source,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            if !reference.path.is_empty() && !reference.profile_id.is_empty() {
                return Ok(());
            }
            let local = self.refstore.get(reference).await?;
            let found = match (local, source) {
                (Some(info), _) => Some(info),
                (None, Source::Local) => None,
                (None, Source::Network) | (None, Source::P2p) => {
                    self.remotes.lookup(&reference.alias())
                }
            };
            match found {
                Some(info) => {
                    reference.profile_id = info.profile_id;
                    if reference.path.is_empty() {
                        reference.path = info.path;
                    }
                    Ok(())
                }
                None => Err(Error::not_found(format!(
                    "reference {:?} not found",
                    reference.alias()
                ))),
            }
        })
    }
}

/// Transform runner that evaluates a script as the JSON body it produces.
#[derive(Default)]
pub struct MemTransformRunner;

impl TransformRunner for MemTransformRunner {
    fn apply(&self, script: &str, base: Option<Dataset>)
        -> BoxFuture<'_, Result<Dataset, Error>> {
        let script = script.to_string();
        Box::pin(async move {
            let body: Value = serde_json::from_str(&script).map_err(|e| {
                Error::bad_request(format!("transform script must be a JSON literal: {e}"))
            })?;
            let mut ds = base.unwrap_or_default();
            ds.body = Some(body);
            Ok(ds)
        })
    }
}
