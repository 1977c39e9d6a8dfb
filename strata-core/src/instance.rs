//! The process-wide instance: owns the method registry, the node
//! configuration, the event bus, the identity stores, and handles to every
//! injected subsystem. Constructed once by the process root.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use futures_util::stream::{self, Stream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use strata_events::Bus;
use strata_http::BridgeClient;
use strata_token::{AmbientIdentity, KeyStore, TokenSource, VerifyKey};

use crate::config::Config;
use crate::context::Context;
use crate::dispatch::Dispatcher;
use crate::error::Error;
use crate::methods;
use crate::profile::{Profile, ProfileStore};
use crate::registry::{Registry, RegistryBuilder};
use crate::subsystems::Subsystems;

pub(crate) struct InstanceInner {
    pub(crate) registry: Registry,
    config: RwLock<Arc<Config>>,
    config_path: Option<PathBuf>,
    pub(crate) bus: Bus,
    pub(crate) profiles: ProfileStore,
    pub(crate) keystore: Arc<KeyStore>,
    pub(crate) identity: Arc<TokenSource>,
    pub(crate) ambient: Arc<dyn AmbientIdentity>,
    pub(crate) client: Option<BridgeClient>,
    pub(crate) subs: Subsystems,
    pub(crate) root: CancellationToken,
}

impl InstanceInner {
    pub(crate) fn config(&self) -> Arc<Config> {
        self.config.read().expect("config lock").clone()
    }

    /// The only write path for configuration: validate, persist to the
    /// on-disk path when one is set, then swap the in-memory copy.
    pub(crate) fn change_config(&self, next: Config) -> Result<(), Error> {
        next.validate()?;
        if let Some(path) = &self.config_path {
            next.save(path)?;
        }
        *self.config.write().expect("config lock") = Arc::new(next);
        Ok(())
    }
}

/// Handle to the process-wide instance. Cheap to clone.
#[derive(Clone)]
pub struct Instance {
    inner: Arc<InstanceInner>,
}

impl Instance {
    pub fn builder(config: Config) -> InstanceBuilder {
        InstanceBuilder {
            config,
            config_path: None,
            subsystems: None,
            bus: None,
            connect: None,
            extra_sets: Vec::new(),
        }
    }

    /// A standalone instance over in-memory subsystems with a generated
    /// identity. The starting point for tests and the CLI's default mode.
    pub fn in_memory() -> Instance {
        let id = format!("Qm{}", Uuid::new_v4().simple());
        let secret = Uuid::new_v4().simple().to_string();
        let config = Config::default_with_profile(id, "me", secret);
        Instance::builder(config)
            .build()
            .expect("in-memory instance construction")
    }

    /// A dispatcher bound to this instance with no source override.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.inner.clone())
    }

    /// A fresh call context chained to the instance's root cancellation.
    pub fn context(&self) -> Context {
        Context::child_of(&self.inner.root)
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn bus(&self) -> &Bus {
        &self.inner.bus
    }

    pub fn keystore(&self) -> Arc<KeyStore> {
        self.inner.keystore.clone()
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.inner.profiles
    }

    pub fn config(&self) -> Arc<Config> {
        self.inner.config()
    }

    pub fn change_config(&self, next: Config) -> Result<(), Error> {
        self.inner.change_config(next)
    }

    /// Name of the request header the bridge reads the source hint from.
    pub fn source_header(&self) -> String {
        self.config().api.source_header.clone()
    }

    /// Whether this instance is a thin front-end routing calls to a
    /// sibling daemon over HTTP.
    pub fn is_remote_client(&self) -> bool {
        self.inner.client.is_some()
    }

    /// Cancel the root context and run the teardown sequence, yielding one
    /// result per step.
    pub fn shutdown(&self) -> impl Stream<Item = Result<(), Error>> + Send + 'static {
        self.inner.root.cancel();
        let logbook = self.inner.subs.logbook.clone();
        stream::once(async move { logbook.flush().await })
    }

    pub(crate) fn inner(&self) -> &Arc<InstanceInner> {
        &self.inner
    }
}

/// Two-phase construction for [`Instance`].
pub struct InstanceBuilder {
    config: Config,
    config_path: Option<PathBuf>,
    subsystems: Option<Subsystems>,
    bus: Option<Bus>,
    connect: Option<String>,
    extra_sets: Vec<Arc<dyn crate::registry::MethodSet>>,
}

impl InstanceBuilder {
    /// Where [`Instance::change_config`] persists to.
    pub fn config_path(mut self, path: impl AsRef<std::path::Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn subsystems(mut self, subsystems: Subsystems) -> Self {
        self.subsystems = Some(subsystems);
        self
    }

    pub fn bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Operate as a thin front-end to an already-running sibling process at
    /// `address`: every dispatch routes over HTTP instead of running
    /// locally.
    pub fn connect_to(mut self, address: impl Into<String>) -> Self {
        self.connect = Some(address.into());
        self
    }

    /// Register an additional method set alongside the built-in ones.
    pub fn method_set(mut self, set: Arc<dyn crate::registry::MethodSet>) -> Self {
        self.extra_sets.push(set);
        self
    }

    pub fn build(self) -> Result<Instance, Error> {
        let config = self.config;
        config.validate()?;

        let profile = Profile {
            id: config.profile.id.clone(),
            peername: config.profile.peername.clone(),
        };
        let profiles = ProfileStore::new(profile);

        let identity = match (&config.profile.private_key_pem, &config.profile.key_secret) {
            (Some(pem), _) => {
                Arc::new(TokenSource::ed25519_pem(&config.profile.id, pem.as_bytes())
                    .map_err(|e| Error::bad_request(e.to_string()))?)
            }
            (None, Some(secret)) => {
                Arc::new(TokenSource::hmac(&config.profile.id, secret.as_bytes()))
            }
            (None, None) => return Err(Error::bad_request("config: profile has no signing key")),
        };

        let keystore = Arc::new(KeyStore::new());
        match (&config.profile.public_key_pem, &config.profile.key_secret) {
            (Some(pem), _) => keystore.insert(
                &config.profile.id,
                VerifyKey::ed25519_pem(pem.as_bytes())
                    .map_err(|e| Error::bad_request(e.to_string()))?,
            ),
            (None, Some(secret)) => {
                keystore.insert(&config.profile.id, VerifyKey::hmac(secret.as_bytes()))
            }
            (None, None) => {}
        }

        let client = match &self.connect {
            Some(addr) => Some(BridgeClient::new(addr)?),
            None => None,
        };

        let subs = self.subsystems.unwrap_or_else(Subsystems::in_memory);

        let mut builder = RegistryBuilder::new();
        methods::register_all(&mut builder);
        for set in self.extra_sets {
            builder.add_method_set(set);
        }

        let inner = InstanceInner {
            registry: builder.build(),
            config: RwLock::new(Arc::new(config)),
            config_path: self.config_path,
            bus: self.bus.unwrap_or_default(),
            profiles,
            keystore,
            ambient: identity.clone(),
            identity,
            client,
            subs,
            root: CancellationToken::new(),
        };
        Ok(Instance {
            inner: Arc::new(inner),
        })
    }
}
