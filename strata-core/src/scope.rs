//! The per-call capability bundle handed to method implementations.

use std::sync::Arc;

use serde_json::Value;
use strata_events::{Bus, Event};
use strata_token::KeyStore;

use crate::config::Config;
use crate::context::Context;
use crate::error::Error;
use crate::instance::InstanceInner;
use crate::profile::Profile;
use crate::source::Source;
use crate::subsystems::{
    Filesystem, Loader, Logbook, Refstore, RegistryClient, Remotes, Stats, TransformRunner,
};

/// Everything an implementation may touch during one call: the call's
/// context, the resolved source policy, the active identity, and narrow
/// accessors for every injected subsystem.
///
/// A scope is created on entry to dispatch and dropped on return;
/// implementations never retain one beyond the call.
pub struct Scope {
    ctx: Context,
    inst: Arc<InstanceInner>,
    source: Source,
    profile: Profile,
}

impl Scope {
    /// Construction fails when the active identity cannot be determined;
    /// that failure surfaces as the dispatch error.
    pub(crate) fn new(
        ctx: &Context,
        inst: &Arc<InstanceInner>,
        source: Source,
    ) -> Result<Self, Error> {
        let profile = inst.profiles.active_profile()?;
        Ok(Self {
            ctx: ctx.clone(),
            inst: inst.clone(),
            source,
            profile,
        })
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// The identity this call acts as.
    pub fn active_profile(&self) -> &Profile {
        &self.profile
    }

    /// Where reference resolution should look first for this call.
    pub fn source(&self) -> Source {
        self.source
    }

    pub fn bus(&self) -> &Bus {
        &self.inst.bus
    }

    pub fn refstore(&self) -> &Arc<dyn Refstore> {
        &self.inst.subs.refstore
    }

    pub fn filesystem(&self) -> &Arc<dyn Filesystem> {
        &self.inst.subs.filesystem
    }

    pub fn logbook(&self) -> &Arc<dyn Logbook> {
        &self.inst.subs.logbook
    }

    pub fn stats(&self) -> &Arc<dyn Stats> {
        &self.inst.subs.stats
    }

    pub fn registry_client(&self) -> &Arc<dyn RegistryClient> {
        &self.inst.subs.registry_client
    }

    pub fn remotes(&self) -> &Arc<dyn Remotes> {
        &self.inst.subs.remotes
    }

    pub fn loader(&self) -> &Arc<dyn Loader> {
        &self.inst.subs.loader
    }

    pub fn runner(&self) -> &Arc<dyn TransformRunner> {
        &self.inst.subs.runner
    }

    pub fn keystore(&self) -> &Arc<KeyStore> {
        &self.inst.keystore
    }

    pub fn profiles(&self) -> &crate::profile::ProfileStore {
        &self.inst.profiles
    }

    /// Whether implementations should consult the dataset cache.
    pub fn use_dscache(&self) -> bool {
        self.inst.config().repo.use_dscache
    }

    /// A read-only snapshot of the node configuration.
    pub fn config(&self) -> Arc<Config> {
        self.inst.config()
    }

    /// Route a configuration mutation through validate-then-persist.
    pub fn change_config(&self, next: Config) -> Result<(), Error> {
        self.inst.change_config(next)
    }

    /// Issue a token with the node's signing key, naming `subject`.
    pub fn issue_token(
        &self,
        subject: &str,
        ttl: std::time::Duration,
    ) -> Result<String, Error> {
        self.inst
            .identity
            .issue_for(subject, ttl)
            .map_err(|e| Error::internal(e.to_string()))
    }

    /// Publish a domain event attributed to the active profile.
    pub async fn emit_event(&self, type_: &str, data: Value) {
        let event = Event::new(type_, self.ctx.session_id(), self.profile.id.clone(), data);
        self.inst.bus.emit(event).await;
    }
}
