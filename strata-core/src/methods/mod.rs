//! The business-logic method sets: every operation dispatchable by name,
//! grouped the way callers see them (`collection.list`, `dataset.save`,
//! `peer.connect`, ...). Bodies delegate to the injected subsystems; the
//! registration, dispatch, and transport machinery around them is the
//! load-bearing part.

pub mod access;
pub mod automation;
pub mod collection;
pub mod config;
pub mod dataset;
pub mod peer;

use std::sync::Arc;

use crate::dsref::Ref;
use crate::error::Error;
use crate::registry::RegistryBuilder;
use crate::scope::Scope;

/// Install every method set on a registry builder.
pub(crate) fn register_all(builder: &mut RegistryBuilder) {
    builder.add_method_set(Arc::new(collection::CollectionMethods));
    builder.add_method_set(Arc::new(dataset::DatasetMethods));
    builder.add_method_set(Arc::new(automation::AutomationMethods));
    builder.add_method_set(Arc::new(peer::PeerMethods));
    builder.add_method_set(Arc::new(config::ConfigMethods));
    builder.add_method_set(Arc::new(access::AccessMethods));
}

/// Parse a reference string, expand the `me` shorthand to the active
/// peername, and resolve it through the loader with the scope's source.
pub(crate) async fn resolve_ref(scope: &Scope, raw: &str) -> Result<Ref, Error> {
    let mut reference = parse_ref(scope, raw)?;
    scope
        .loader()
        .resolve(&mut reference, scope.source())
        .await?;
    Ok(reference)
}

/// Parse without resolving; used by operations that may name a dataset
/// that doesn't exist yet.
pub(crate) fn parse_ref(scope: &Scope, raw: &str) -> Result<Ref, Error> {
    let mut reference = Ref::parse(raw)?;
    if reference.username == "me" {
        reference.username = scope.active_profile().peername.clone();
    }
    Ok(reference)
}
