//! Business-logic layer of strata, a decentralized dataset versioning and
//! collaboration platform.
//!
//! The crate's core is the method-dispatch, scope, and transport-bridging
//! engine that lets the same named operations (`dataset.save`,
//! `collection.list`, `peer.connect`, ...) be invoked from a CLI, an
//! HTTP/JSON API, or a connected daemon without the caller choosing which
//! transport runs the call:
//!
//! - a [`registry`](crate::registry) of strongly-typed method
//!   implementations assembled at startup;
//! - a [`Dispatcher`] that routes a named call to the in-process
//!   implementation or to a sibling process over HTTP, transparently;
//! - a per-call [`Scope`] carrying identity, context, source policy, and
//!   handles to the injected subsystems;
//! - the [`params`] contract (validation, defaults, path normalization)
//!   every call obeys.
//!
//! Storage, the content-addressed filesystem, p2p, the logbook, and the
//! transform runtime are injected capabilities behind the traits in
//! [`subsystems`].

pub mod config;
pub mod context;
pub mod dataset;
pub mod dispatch;
pub mod dsref;
pub mod error;
pub mod instance;
pub mod methods;
pub mod params;
pub mod profile;
pub mod registry;
pub mod scope;
pub mod source;
pub mod subsystems;

pub use config::Config;
pub use context::Context;
pub use dataset::{Dataset, PeerInfo, VersionInfo};
pub use dispatch::{DispatchOutcome, Dispatcher, AMBIENT_TOKEN_TTL};
pub use dsref::Ref;
pub use error::{Error, ErrorKind};
pub use instance::{Instance, InstanceBuilder};
pub use params::{decode_form, normalize_paths, PathFields, RequestParams, WireRequest};
pub use profile::{Profile, ProfileStore};
pub use registry::{GroupRegistrar, MethodDescriptor, MethodSet, MethodSpec, Registry, RegistryBuilder, WireOutcome};
pub use scope::Scope;
pub use source::Source;
pub use subsystems::Subsystems;

pub use strata_http::{Cursor, Verb};
