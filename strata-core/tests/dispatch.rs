//! Dispatch machinery: lookup, the parameter contract ordering, source
//! overrides, remote-transport refusal, and registration-time panics.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_core::registry::{GroupRegistrar, MethodSet, MethodSpec, RegistryBuilder};
use strata_core::{
    Config, Context, DispatchOutcome, Error, ErrorKind, Instance, PathFields, RequestParams,
    Scope, Source,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct EchoParams {
    value: usize,
    tag: String,
    path: String,
    side: String,
}

impl RequestParams for EchoParams {
    fn validate(&self) -> Result<(), Error> {
        if self.tag == "bad" {
            return Err(Error::bad_request("params are bad"));
        }
        Ok(())
    }

    fn set_nonzero_defaults(&mut self) {
        if self.value == 0 {
            self.value = 7;
        }
    }

    fn path_fields(&mut self) -> PathFields<'_> {
        PathFields::new()
            .fspath(&mut self.path)
            .dsref_or_fspath(&mut self.side)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct EchoResult {
    params: EchoParams,
    source: String,
}

struct EchoMethods {
    invoked: Arc<AtomicBool>,
}

impl MethodSet for EchoMethods {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn attributes(&self) -> Vec<MethodSpec> {
        vec![
            MethodSpec::post("echo", "/echo"),
            MethodSpec::post("slow", "/echo/slow"),
        ]
    }

    fn register(self: Arc<Self>, group: &mut GroupRegistrar<'_>) {
        let invoked = self.invoked.clone();
        group.method("echo", move |scope: Scope, params: EchoParams| {
            let invoked = invoked.clone();
            async move {
                invoked.store(true, Ordering::SeqCst);
                Ok(EchoResult {
                    params,
                    source: scope.source().to_string(),
                })
            }
        });
        group.method("slow", |_scope: Scope, params: EchoParams| async move {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(params)
        });
    }
}

fn echo_instance() -> (Instance, Arc<AtomicBool>) {
    let invoked = Arc::new(AtomicBool::new(false));
    let inst = Instance::builder(Config::default_with_profile("QmTest", "me", "secret"))
        .method_set(Arc::new(EchoMethods {
            invoked: invoked.clone(),
        }))
        .build()
        .unwrap();
    (inst, invoked)
}

#[tokio::test]
async fn unknown_method_not_found() {
    let (inst, _) = echo_instance();
    let err = inst
        .dispatcher()
        .call::<EchoParams, EchoResult>(&Context::new(), "nonexistent.method", EchoParams::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.to_string(), r#"method "nonexistent.method" not found"#);
}

#[tokio::test]
async fn validate_failure_short_circuits() {
    let (inst, invoked) = echo_instance();
    let err = inst
        .dispatcher()
        .call::<EchoParams, EchoResult>(
            &Context::new(),
            "echo.echo",
            EchoParams {
                tag: "bad".to_string(),
                ..EchoParams::default()
            },
        )
        .await
        .unwrap_err();
    // The validation error comes back verbatim and the implementation never
    // ran, so defaults were never observable either.
    assert_eq!(err.to_string(), "params are bad");
    assert!(!invoked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn defaults_apply_before_invocation() {
    let (inst, _) = echo_instance();
    let result: EchoResult = inst
        .dispatcher()
        .call(&Context::new(), "echo.echo", EchoParams::default())
        .await
        .unwrap();
    assert_eq!(result.params.value, 7);
}

#[tokio::test]
async fn paths_normalize_by_tag() {
    let (inst, _) = echo_instance();
    let result: EchoResult = inst
        .dispatcher()
        .call(
            &Context::new(),
            "echo.echo",
            EchoParams {
                path: "testdata/foo.yml".to_string(),
                side: "me/ds".to_string(),
                ..EchoParams::default()
            },
        )
        .await
        .unwrap();
    assert!(Path::new(&result.params.path).is_absolute());
    assert!(result.params.path.ends_with("testdata/foo.yml"));
    assert_eq!(result.params.side, "me/ds");
}

#[tokio::test]
async fn with_source_overrides_scope_source() {
    let (inst, _) = echo_instance();
    let ctx = Context::new();

    let plain: EchoResult = inst
        .dispatcher()
        .call(&ctx, "echo.echo", EchoParams::default())
        .await
        .unwrap();
    assert_eq!(plain.source, "local");

    let networked: EchoResult = inst
        .dispatcher()
        .with_source(Source::Network)
        .call(&ctx, "echo.echo", EchoParams::default())
        .await
        .unwrap();
    assert_eq!(networked.source, "network");
}

#[tokio::test]
async fn method_name_lookup_is_case_insensitive() {
    let (inst, _) = echo_instance();
    let result: EchoResult = inst
        .dispatcher()
        .call(&Context::new(), "Echo.Echo", EchoParams::default())
        .await
        .unwrap();
    assert_eq!(result.params.value, 7);
}

#[tokio::test]
async fn deny_remote_methods_refuse_rpc() {
    // A thin-client instance: the address never answers, but deny-remote
    // methods must fail before any request is attempted.
    let inst = Instance::builder(Config::default_with_profile("QmTest", "me", "secret"))
        .connect_to("127.0.0.1:1")
        .build()
        .unwrap();
    let err = inst
        .dispatcher()
        .call::<strata_core::methods::config::GetConfigParams, serde_json::Value>(
            &Context::new(),
            "config.get",
            Default::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedTransport);
    assert!(err.to_string().contains("config.get"));
}

#[tokio::test]
async fn cancellation_aborts_in_flight_calls() {
    let (inst, _) = echo_instance();
    let ctx = inst.context();
    let dispatcher = inst.dispatcher();

    let cancel = ctx.cancellation().clone();
    let call = tokio::spawn(async move {
        dispatcher
            .call::<EchoParams, EchoParams>(&ctx, "echo.slow", EchoParams::default())
            .await
    });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    cancel.cancel();

    let err = call.await.unwrap().unwrap_err();
    assert!(err.to_string().contains("canceled"));
}

// ── registration-time invariants ─────────────────────────────────────────

struct BrokenSet {
    attrs: Vec<MethodSpec>,
    skip_registration: bool,
}

impl MethodSet for BrokenSet {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn attributes(&self) -> Vec<MethodSpec> {
        self.attrs.clone()
    }

    fn register(self: Arc<Self>, group: &mut GroupRegistrar<'_>) {
        if self.skip_registration {
            return;
        }
        for spec in &self.attrs {
            group.method(spec.name(), |_scope: Scope, p: EchoParams| async move { Ok(p) });
        }
    }
}

#[test]
#[should_panic(expected = "no registered handler")]
fn unconsumed_attribute_panics() {
    let mut builder = RegistryBuilder::new();
    builder.add_method_set(Arc::new(BrokenSet {
        attrs: vec![MethodSpec::post("orphan", "/orphan")],
        skip_registration: true,
    }));
}

#[test]
#[should_panic(expected = "declares no attributes")]
fn registration_without_attribute_panics() {
    struct NoAttrs;
    impl MethodSet for NoAttrs {
        fn name(&self) -> &'static str {
            "noattrs"
        }
        fn attributes(&self) -> Vec<MethodSpec> {
            Vec::new()
        }
        fn register(self: Arc<Self>, group: &mut GroupRegistrar<'_>) {
            group.method("mystery", |_scope: Scope, p: EchoParams| async move { Ok(p) });
        }
    }
    let mut builder = RegistryBuilder::new();
    builder.add_method_set(Arc::new(NoAttrs));
}

#[test]
#[should_panic(expected = "must begin with '/'")]
fn malformed_endpoint_panics() {
    let mut builder = RegistryBuilder::new();
    builder.add_method_set(Arc::new(BrokenSet {
        attrs: vec![MethodSpec::post("bare", "bare")],
        skip_registration: false,
    }));
}

struct Dup;

impl MethodSet for Dup {
    fn name(&self) -> &'static str {
        "dup"
    }
    fn attributes(&self) -> Vec<MethodSpec> {
        vec![MethodSpec::deny_remote("same")]
    }
    fn register(self: Arc<Self>, group: &mut GroupRegistrar<'_>) {
        group.method("same", |_scope: Scope, p: EchoParams| async move { Ok(p) });
    }
}

#[test]
#[should_panic(expected = "already registered")]
fn duplicate_method_panics() {
    let mut builder = RegistryBuilder::new();
    builder.add_method_set(Arc::new(Dup));
    builder.add_method_set(Arc::new(Dup));
}

#[test]
#[should_panic(expected = "already bound")]
fn duplicate_endpoint_panics() {
    struct Left;
    impl MethodSet for Left {
        fn name(&self) -> &'static str {
            "left"
        }
        fn attributes(&self) -> Vec<MethodSpec> {
            vec![MethodSpec::post("op", "/shared")]
        }
        fn register(self: Arc<Self>, group: &mut GroupRegistrar<'_>) {
            group.method("op", |_scope: Scope, p: EchoParams| async move { Ok(p) });
        }
    }
    struct Right;
    impl MethodSet for Right {
        fn name(&self) -> &'static str {
            "right"
        }
        fn attributes(&self) -> Vec<MethodSpec> {
            vec![MethodSpec::post("op", "/shared")]
        }
        fn register(self: Arc<Self>, group: &mut GroupRegistrar<'_>) {
            group.method("op", |_scope: Scope, p: EchoParams| async move { Ok(p) });
        }
    }
    let mut builder = RegistryBuilder::new();
    builder.add_method_set(Arc::new(Left));
    builder.add_method_set(Arc::new(Right));
}

#[test]
#[should_panic(expected = "cursor flag")]
fn cursor_flag_mismatch_panics() {
    struct BadCursor;
    impl MethodSet for BadCursor {
        fn name(&self) -> &'static str {
            "badcursor"
        }
        fn attributes(&self) -> Vec<MethodSpec> {
            vec![MethodSpec::post("list", "/badcursor/list").paginated()]
        }
        fn register(self: Arc<Self>, group: &mut GroupRegistrar<'_>) {
            // Declared paginated, registered plain.
            group.method("list", |_scope: Scope, p: EchoParams| async move { Ok(p) });
        }
    }
    let mut builder = RegistryBuilder::new();
    builder.add_method_set(Arc::new(BadCursor));
}

#[test]
#[should_panic(expected = "invalid method set name")]
fn uppercase_group_name_panics() {
    struct Loud;
    impl MethodSet for Loud {
        fn name(&self) -> &'static str {
            "Loud"
        }
        fn attributes(&self) -> Vec<MethodSpec> {
            Vec::new()
        }
        fn register(self: Arc<Self>, _group: &mut GroupRegistrar<'_>) {}
    }
    let mut builder = RegistryBuilder::new();
    builder.add_method_set(Arc::new(Loud));
}

// A paged registration shape compiles and round-trips its cursor.
#[tokio::test]
async fn paged_methods_return_cursors() {
    struct Paged;
    impl MethodSet for Paged {
        fn name(&self) -> &'static str {
            "paged"
        }
        fn attributes(&self) -> Vec<MethodSpec> {
            vec![MethodSpec::post("list", "/paged/list").paginated()]
        }
        fn register(self: Arc<Self>, group: &mut GroupRegistrar<'_>) {
            group.method_paged("list", |_scope: Scope, p: EchoParams| async move {
                let cursor = strata_core::Cursor::new().set("offset", 10);
                Ok(DispatchOutcome::new(p).with_cursor(cursor))
            });
        }
    }
    let inst = Instance::builder(Config::default_with_profile("QmTest", "me", "secret"))
        .method_set(Arc::new(Paged))
        .build()
        .unwrap();
    let outcome = inst
        .dispatcher()
        .dispatch::<EchoParams, EchoParams>(&Context::new(), "paged.list", EchoParams::default())
        .await
        .unwrap();
    assert_eq!(
        outcome.cursor.unwrap().to_query_string(),
        "?offset=10"
    );
}
