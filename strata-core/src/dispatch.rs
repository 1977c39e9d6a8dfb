//! The dispatcher: single entry point for every call. Routes a named method
//! either to the in-process implementation or to an already-running sibling
//! process over HTTP, transparently to the caller.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use strata_http::Cursor;
use tracing::debug;

use crate::context::Context;
use crate::error::Error;
use crate::instance::InstanceInner;
use crate::params::{normalize_paths, RequestParams, WireRequest};
use crate::registry::{MethodDescriptor, WireEnv, WireOutcome};
use crate::scope::Scope;
use crate::source::Source;

/// Lifetime of tokens the dispatcher synthesizes for remote calls whose
/// context carries none.
pub const AMBIENT_TOKEN_TTL: Duration = Duration::from_secs(300);

/// A dispatched call's result: the output value plus optional pagination
/// and warning metadata.
#[derive(Debug)]
pub struct DispatchOutcome<O> {
    pub value: O,
    pub cursor: Option<Cursor>,
    pub warnings: Vec<String>,
}

impl<O> DispatchOutcome<O> {
    pub fn new(value: O) -> Self {
        Self {
            value,
            cursor: None,
            warnings: Vec::new(),
        }
    }

    pub fn with_cursor(mut self, cursor: Cursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// Dispatch handle bound to one instance. Cheap to clone; safe to use
/// concurrently, since the registry is immutable and everything else is
/// shared state with its own synchronization.
#[derive(Clone)]
pub struct Dispatcher {
    inst: Arc<InstanceInner>,
    source: Option<Source>,
}

impl Dispatcher {
    pub(crate) fn new(inst: Arc<InstanceInner>) -> Self {
        Self { inst, source: None }
    }

    /// A dispatcher that overrides the source policy on every call's scope.
    pub fn with_source(&self, source: Source) -> Dispatcher {
        Dispatcher {
            inst: self.inst.clone(),
            source: Some(source),
        }
    }

    /// Dispatch and unwrap the bare output value.
    pub async fn call<P, O>(&self, ctx: &Context, method: &str, params: P) -> Result<O, Error>
    where
        P: RequestParams,
        O: DeserializeOwned + Send + 'static,
    {
        Ok(self.dispatch(ctx, method, params).await?.value)
    }

    /// Dispatch a named call. Validation runs first and short-circuits;
    /// defaults apply next; then the call routes remote or local depending
    /// on how the instance was built.
    pub async fn dispatch<P, O>(
        &self,
        ctx: &Context,
        method: &str,
        mut params: P,
    ) -> Result<DispatchOutcome<O>, Error>
    where
        P: RequestParams,
        O: DeserializeOwned + Send + 'static,
    {
        params.validate()?;
        params.set_nonzero_defaults();

        let descriptor = self.lookup(method)?;
        if self.inst.client.is_some() {
            self.dispatch_remote(ctx, descriptor, params).await
        } else {
            self.dispatch_local(ctx, descriptor, params).await
        }
    }

    /// Run a call that arrived over the wire: decode, apply the parameter
    /// contract, and invoke, always in-process.
    pub async fn dispatch_wire(
        &self,
        ctx: &Context,
        method: &str,
        req: WireRequest,
    ) -> Result<WireOutcome, Error> {
        let descriptor = self.lookup(method)?;
        let env = WireEnv {
            ctx: ctx.clone(),
            inst: self.inst.clone(),
            source_override: self.source,
        };
        let invoke = descriptor.wire.clone();
        let call = (*invoke)(env, req);
        tokio::select! {
            _ = ctx.cancellation().cancelled() => Err(cancelled(method)),
            result = call => result,
        }
    }

    fn lookup(&self, method: &str) -> Result<&MethodDescriptor, Error> {
        self.inst
            .registry
            .get(method)
            .ok_or_else(|| Error::not_found(format!("method {method:?} not found")))
    }

    async fn dispatch_remote<P, O>(
        &self,
        ctx: &Context,
        descriptor: &MethodDescriptor,
        params: P,
    ) -> Result<DispatchOutcome<O>, Error>
    where
        P: RequestParams,
        O: DeserializeOwned,
    {
        let (verb, endpoint) = descriptor.exposure().ok_or_else(|| {
            Error::unsupported(format!(
                "method {:?} is not available over RPC",
                descriptor.name()
            ))
        })?;

        // CLI convenience: a context without a token gets one minted from
        // the node's own key.
        let token = match ctx.auth_token() {
            Some(t) => t.to_string(),
            None => self
                .inst
                .ambient
                .mint(AMBIENT_TOKEN_TTL)
                .map_err(|e| Error::unauthorized(e.to_string()))?,
        };

        let client = self
            .inst
            .client
            .as_ref()
            .ok_or_else(|| Error::internal("remote dispatch without a bridge client"))?;

        debug!(method = descriptor.name(), endpoint, "dispatching over http");
        let result = tokio::select! {
            _ = ctx.cancellation().cancelled() => Err(cancelled(descriptor.name())),
            result = client.call_method::<P, O>(Some(&token), verb, endpoint, &params) => result,
        }?;

        Ok(DispatchOutcome {
            value: result.value,
            cursor: result.cursor,
            warnings: result.warnings,
        })
    }

    async fn dispatch_local<P, O>(
        &self,
        ctx: &Context,
        descriptor: &MethodDescriptor,
        mut params: P,
    ) -> Result<DispatchOutcome<O>, Error>
    where
        P: RequestParams,
        O: Send + 'static,
    {
        let source = self.source.unwrap_or_else(|| descriptor.default_source());
        let scope = Scope::new(ctx, &self.inst, source)?;
        normalize_paths(&mut params)?;

        let invoke = descriptor.typed.clone();
        let call = (*invoke)(scope, Box::new(params));
        let outcome = tokio::select! {
            _ = ctx.cancellation().cancelled() => Err(cancelled(descriptor.name())),
            result = call => result,
        }?;

        let value = outcome.value.downcast::<O>().map_err(|_| {
            Error::internal(format!(
                "method {:?}: output type mismatch",
                descriptor.name()
            ))
        })?;
        Ok(DispatchOutcome {
            value: *value,
            cursor: outcome.cursor,
            warnings: outcome.warnings,
        })
    }
}

fn cancelled(method: &str) -> Error {
    Error::dependency(format!("method {method:?}: call canceled"))
}
