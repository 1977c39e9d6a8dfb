//! The method registry: every dispatchable operation, keyed by its
//! fully-qualified `group.method` name, with the attributes the transports
//! need (endpoint, verb, default source, pagination) and the type-erased
//! invokers dispatch calls through.
//!
//! Registration happens once at instance construction and panics on any
//! wiring mistake: a method with no declared attributes, an attribute with
//! no registered handler, a malformed endpoint, a duplicate name. Those are
//! boot-time failures, never runtime ones; after construction the registry
//! is immutable and safe to read concurrently without locks.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use strata_http::{Cursor, Verb};

use crate::context::Context;
use crate::dispatch::DispatchOutcome;
use crate::error::Error;
use crate::instance::InstanceInner;
use crate::params::{decode_wire, normalize_paths, RequestParams, WireRequest};
use crate::scope::Scope;
use crate::source::Source;

/// Declared attributes of one method: its name within the group, how it is
/// exposed over the HTTP bridge, where reference resolution looks by
/// default, and whether results carry a pagination cursor.
///
/// A spec with no exposure is deny-remote: dispatch refuses to route it
/// through a sibling process.
#[derive(Debug, Clone)]
pub struct MethodSpec {
    name: &'static str,
    expose: Option<(Verb, &'static str)>,
    default_source: Source,
    returns_cursor: bool,
}

impl MethodSpec {
    pub fn get(name: &'static str, endpoint: &'static str) -> Self {
        Self::exposed(name, Verb::Get, endpoint)
    }

    pub fn post(name: &'static str, endpoint: &'static str) -> Self {
        Self::exposed(name, Verb::Post, endpoint)
    }

    pub fn put(name: &'static str, endpoint: &'static str) -> Self {
        Self::exposed(name, Verb::Put, endpoint)
    }

    fn exposed(name: &'static str, verb: Verb, endpoint: &'static str) -> Self {
        Self {
            name,
            expose: Some((verb, endpoint)),
            default_source: Source::default(),
            returns_cursor: false,
        }
    }

    /// A method reachable in-process only.
    pub fn deny_remote(name: &'static str) -> Self {
        Self {
            name,
            expose: None,
            default_source: Source::default(),
            returns_cursor: false,
        }
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.default_source = source;
        self
    }

    pub fn paginated(mut self) -> Self {
        self.returns_cursor = true;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn exposure(&self) -> Option<(Verb, &'static str)> {
        self.expose
    }

    pub fn default_source(&self) -> Source {
        self.default_source
    }

    pub fn returns_cursor(&self) -> bool {
        self.returns_cursor
    }
}

/// Result of a type-erased local invocation.
pub(crate) struct ErasedOutcome {
    pub value: Box<dyn Any + Send>,
    pub cursor: Option<Cursor>,
    pub warnings: Vec<String>,
}

/// Result of a wire invocation: the value already JSON-encoded.
#[derive(Debug)]
pub struct WireOutcome {
    pub value: Value,
    pub cursor: Option<Cursor>,
    pub warnings: Vec<String>,
}

pub(crate) type TypedInvoke = Arc<
    dyn Fn(Scope, Box<dyn Any + Send>) -> BoxFuture<'static, Result<ErasedOutcome, Error>>
        + Send
        + Sync,
>;

/// Everything the wire invoker needs to run a call that arrived as HTTP.
pub(crate) struct WireEnv {
    pub ctx: Context,
    pub inst: Arc<InstanceInner>,
    pub source_override: Option<Source>,
}

pub(crate) type WireInvoke =
    Arc<dyn Fn(WireEnv, WireRequest) -> BoxFuture<'static, Result<WireOutcome, Error>> + Send + Sync>;

/// One registered method. Created at startup, immutable thereafter.
pub struct MethodDescriptor {
    name: String,
    spec: MethodSpec,
    pub(crate) typed: TypedInvoke,
    pub(crate) wire: WireInvoke,
}

impl MethodDescriptor {
    /// Fully-qualified `group.method` name, lowercased.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exposure(&self) -> Option<(Verb, &'static str)> {
        self.spec.exposure()
    }

    pub fn default_source(&self) -> Source {
        self.spec.default_source()
    }

    pub fn returns_cursor(&self) -> bool {
        self.spec.returns_cursor()
    }
}

/// A named collection of dispatchable operations, paired with the
/// implementation object the registered handlers close over.
///
/// `attributes` declares every method of the group; `register` installs a
/// handler for each. Registration fails loudly when the two disagree.
pub trait MethodSet: Send + Sync {
    /// Group name: lowercase, no dots.
    fn name(&self) -> &'static str;

    /// Attribute records, one per method.
    fn attributes(&self) -> Vec<MethodSpec>;

    /// Install one handler per declared attribute.
    fn register(self: Arc<Self>, group: &mut GroupRegistrar<'_>);
}

/// Accumulates method descriptors during instance construction.
#[derive(Default)]
pub struct RegistryBuilder {
    methods: HashMap<String, MethodDescriptor>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every method of a set. Panics on any inconsistency between
    /// the set's declared attributes and its registrations.
    pub fn add_method_set(&mut self, set: Arc<dyn MethodSet>) {
        let group = set.name();
        if group.is_empty() || group.contains('.') || group.chars().any(|c| c.is_uppercase()) {
            panic!("invalid method set name {group:?}: want lowercase with no dots");
        }

        let mut attrs = HashMap::new();
        for spec in set.attributes() {
            if attrs.insert(spec.name(), spec).is_some() {
                panic!("method set {group:?} declares duplicate attributes");
            }
        }

        let mut registrar = GroupRegistrar {
            group,
            attrs,
            methods: &mut self.methods,
        };
        set.register(&mut registrar);

        if !registrar.attrs.is_empty() {
            let mut missing: Vec<&str> = registrar.attrs.keys().copied().collect();
            missing.sort_unstable();
            panic!(
                "method set {group:?} declares attributes with no registered handler: {}",
                missing.join(", ")
            );
        }
    }

    pub fn build(self) -> Registry {
        Registry {
            methods: self.methods,
        }
    }
}

/// Scoped registrar handed to [`MethodSet::register`]; consumes the set's
/// declared attributes one registration at a time.
pub struct GroupRegistrar<'a> {
    group: &'static str,
    attrs: HashMap<&'static str, MethodSpec>,
    methods: &'a mut HashMap<String, MethodDescriptor>,
}

impl GroupRegistrar<'_> {
    /// Register a plain method: `(scope, params) -> Result<output, error>`.
    pub fn method<P, O, F, Fut>(&mut self, name: &'static str, handler: F)
    where
        P: RequestParams,
        O: Serialize + Send + 'static,
        F: Fn(Scope, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, Error>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.install::<P, O, _>(name, false, move |scope, params| {
            let handler = handler.clone();
            Box::pin(async move { Ok(DispatchOutcome::new((*handler)(scope, params).await?)) })
        });
    }

    /// Register a method whose outcome may carry a cursor and warnings:
    /// `(scope, params) -> Result<outcome, error>`.
    pub fn method_paged<P, O, F, Fut>(&mut self, name: &'static str, handler: F)
    where
        P: RequestParams,
        O: Serialize + Send + 'static,
        F: Fn(Scope, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<DispatchOutcome<O>, Error>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.install::<P, O, _>(name, true, move |scope, params| {
            let handler = handler.clone();
            Box::pin(async move { (*handler)(scope, params).await })
        });
    }

    fn install<P, O, H>(&mut self, name: &'static str, paged: bool, handler: H)
    where
        P: RequestParams,
        O: Serialize + Send + 'static,
        H: Fn(Scope, P) -> BoxFuture<'static, Result<DispatchOutcome<O>, Error>>
            + Send
            + Sync
            + 'static,
    {
        let fq = format!("{}.{}", self.group, name.to_lowercase());
        let spec = self.attrs.remove(name).unwrap_or_else(|| {
            panic!("registering {fq:?}: method set declares no attributes for it")
        });
        if spec.returns_cursor() != paged {
            panic!(
                "registering {fq:?}: attribute cursor flag disagrees with the handler shape"
            );
        }
        if let Some((verb, endpoint)) = spec.exposure() {
            if !endpoint.starts_with('/') {
                panic!("registering {fq:?}: endpoint {endpoint:?} must begin with '/'");
            }
            let taken = self.methods.values().any(|d| {
                d.exposure()
                    .is_some_and(|(v, e)| v == verb && e == endpoint)
            });
            if taken {
                panic!("registering {fq:?}: endpoint {verb} {endpoint:?} already bound");
            }
        }
        if self.methods.contains_key(&fq) {
            panic!("registering {fq:?}: method already registered");
        }

        let handler = Arc::new(handler);
        let default_source = spec.default_source();

        let typed: TypedInvoke = {
            let handler = handler.clone();
            let fq = fq.clone();
            Arc::new(move |scope, boxed| {
                let handler = handler.clone();
                let fq = fq.clone();
                Box::pin(async move {
                    let params = boxed.downcast::<P>().map_err(|_| {
                        Error::internal(format!("method {fq:?}: params type mismatch"))
                    })?;
                    let out = (*handler)(scope, *params).await?;
                    Ok(ErasedOutcome {
                        value: Box::new(out.value),
                        cursor: out.cursor,
                        warnings: out.warnings,
                    })
                })
            })
        };

        let wire: WireInvoke = {
            let handler = handler.clone();
            Arc::new(move |env: WireEnv, req: WireRequest| {
                let handler = handler.clone();
                Box::pin(async move {
                    let mut params: P = decode_wire(&req)?;
                    params.validate()?;
                    params.set_nonzero_defaults();
                    let scope = Scope::new(
                        &env.ctx,
                        &env.inst,
                        env.source_override.unwrap_or(default_source),
                    )?;
                    normalize_paths(&mut params)?;
                    let out = (*handler)(scope, params).await?;
                    let value = serde_json::to_value(out.value)
                        .map_err(|e| Error::internal(format!("encoding response: {e}")))?;
                    Ok(WireOutcome {
                        value,
                        cursor: out.cursor,
                        warnings: out.warnings,
                    })
                })
            })
        };

        self.methods.insert(
            fq.clone(),
            MethodDescriptor {
                name: fq,
                spec,
                typed,
                wire,
            },
        );
    }
}

/// The immutable method table. Reads are lock-free; there are no writes
/// after construction.
pub struct Registry {
    methods: HashMap<String, MethodDescriptor>,
}

impl Registry {
    pub fn get(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.get(&name.to_lowercase())
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &MethodDescriptor> {
        self.methods.values()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
