//! Method-set behavior driven end-to-end through the dispatcher with the
//! in-memory subsystems.

use std::sync::Arc;

use serde_json::{json, Value};
use strata_core::methods::access::CreateAuthTokenParams;
use strata_core::methods::collection::ListParams;
use strata_core::methods::config::{GetConfigParams, SetConfigParams};
use strata_core::methods::dataset::{
    GetParams, PullParams, RemoveParams, RemoveResult, RenameParams, SaveParams,
};
use strata_core::methods::peer::{ConnectParams, PeerInfoParams};
use strata_core::subsystems::mem::MemSubsystems;
use strata_core::subsystems::Refstore;
use strata_core::{
    Config, Context, Error, ErrorKind, Instance, PeerInfo, Source, VersionInfo,
};

fn instance_with(mem: &MemSubsystems) -> Instance {
    Instance::builder(Config::default_with_profile("QmTest", "ada", "secret"))
        .subsystems(mem.subsystems())
        .build()
        .unwrap()
}

fn save_params(reference: &str, body: Value) -> SaveParams {
    SaveParams {
        reference: reference.to_string(),
        body: Some(body),
        ..SaveParams::default()
    }
}

async fn save(inst: &Instance, params: SaveParams) -> Result<VersionInfo, Error> {
    inst.dispatcher()
        .call(&Context::new(), "dataset.save", params)
        .await
}

#[tokio::test]
async fn save_then_get_round_trips() {
    let mem = MemSubsystems::new();
    let inst = instance_with(&mem);

    let info = save(&inst, save_params("me/ds", json!([[1, 2], [3, 4]])))
        .await
        .unwrap();
    assert_eq!(info.alias(), "ada/ds");
    assert!(info.path.starts_with("/mem/"));

    let ds: Value = inst
        .dispatcher()
        .call(
            &Context::new(),
            "dataset.get",
            GetParams {
                reference: "ada/ds".to_string(),
                ..GetParams::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(ds["body"], json!([[1, 2], [3, 4]]));
    assert_eq!(ds["structure"]["entries"], 2);
}

#[tokio::test]
async fn unforced_save_with_no_changes_conflicts() {
    let mem = MemSubsystems::new();
    let inst = instance_with(&mem);

    save(&inst, save_params("me/ds", json!([1]))).await.unwrap();
    let err = save(&inst, save_params("me/ds", json!([1])))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(err.to_string(), "dataset has no changes");

    // Forcing writes a new version anyway.
    let mut forced = save_params("me/ds", json!([1]));
    forced.force = true;
    save(&inst, forced).await.unwrap();
}

#[tokio::test]
async fn save_for_another_user_rejected() {
    let mem = MemSubsystems::new();
    let inst = instance_with(&mem);
    let err = save(&inst, save_params("brendan/ds", json!([1])))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
}

#[tokio::test]
async fn remove_dirty_linked_directory_requires_force() {
    let mem = MemSubsystems::new();
    let inst = instance_with(&mem);

    save(&inst, save_params("me/ds", json!([1]))).await.unwrap();
    // Mark the head as linked to a dirty working directory.
    let head = mem
        .refstore
        .get(&"ada/ds".parse().unwrap())
        .await
        .unwrap()
        .unwrap();
    mem.refstore
        .put(VersionInfo {
            fsi_path: "/tmp/ds".to_string(),
            fsi_dirty: true,
            ..head
        })
        .await
        .unwrap();

    let remove = RemoveParams {
        reference: "ada/ds".to_string(),
        ..RemoveParams::default()
    };
    let err: Error = inst
        .dispatcher()
        .call::<_, RemoveResult>(&Context::new(), "dataset.remove", remove.clone())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let result: RemoveResult = inst
        .dispatcher()
        .call(
            &Context::new(),
            "dataset.remove",
            RemoveParams {
                force: true,
                ..remove
            },
        )
        .await
        .unwrap();
    assert!(result.num_deleted >= 1);
}

#[tokio::test]
async fn rename_moves_the_alias() {
    let mem = MemSubsystems::new();
    let inst = instance_with(&mem);

    save(&inst, save_params("me/old", json!([1]))).await.unwrap();
    let info: VersionInfo = inst
        .dispatcher()
        .call(
            &Context::new(),
            "dataset.rename",
            RenameParams {
                current: "ada/old".to_string(),
                next: "me/new".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(info.alias(), "ada/new");
    assert!(mem
        .refstore
        .get(&"ada/old".parse().unwrap())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn pull_fetches_staged_network_datasets() {
    let mem = MemSubsystems::new();
    mem.remotes.stage(VersionInfo {
        username: "brendan".to_string(),
        profile_id: "QmBrendan".to_string(),
        name: "pop".to_string(),
        path: "/mem/QmRemote".to_string(),
        ..VersionInfo::default()
    });
    let inst = instance_with(&mem);

    let info: VersionInfo = inst
        .dispatcher()
        .call(
            &Context::new(),
            "dataset.pull",
            PullParams {
                reference: "brendan/pop".to_string(),
                ..PullParams::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(info.alias(), "brendan/pop");
    // The pulled dataset landed in the local index.
    assert!(mem
        .refstore
        .get(&"brendan/pop".parse().unwrap())
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn collection_list_filters_sorts_and_pages() {
    let mem = MemSubsystems::new();
    let inst = instance_with(&mem);

    for name in ["alpha", "beta", "gamma"] {
        save(&inst, save_params(&format!("me/{name}"), json!([name])))
            .await
            .unwrap();
    }

    let outcome = inst
        .dispatcher()
        .dispatch::<ListParams, Vec<VersionInfo>>(
            &Context::new(),
            "collection.list",
            ListParams {
                limit: 2,
                filter: vec!["username:ada".to_string()],
                order_by: "name".to_string(),
                ..ListParams::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.value.len(), 2);
    assert_eq!(outcome.value[0].name, "alpha");
    let cursor = outcome.cursor.unwrap();
    assert_eq!(cursor.to_query_string(), "?limit=2&offset=2");

    // Continue from the cursor.
    let rest = inst
        .dispatcher()
        .dispatch::<ListParams, Vec<VersionInfo>>(
            &Context::new(),
            "collection.list",
            ListParams {
                limit: 2,
                offset: 2,
                ..ListParams::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(rest.value.len(), 1);
    assert_eq!(rest.value[0].name, "gamma");
    assert!(rest.cursor.is_none());
}

#[tokio::test]
async fn collection_list_unknown_sort_key_warns() {
    let mem = MemSubsystems::new();
    let inst = instance_with(&mem);
    save(&inst, save_params("me/ds", json!([1]))).await.unwrap();

    let outcome = inst
        .dispatcher()
        .dispatch::<ListParams, Vec<VersionInfo>>(
            &Context::new(),
            "collection.list",
            ListParams {
                order_by: "+name,-velocity".to_string(),
                ..ListParams::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.warnings, vec![r#"ignoring unknown sort key "velocity""#]);
}

#[tokio::test]
async fn invalid_filter_is_rejected_before_defaults() {
    let mem = MemSubsystems::new();
    let inst = instance_with(&mem);
    let err = inst
        .dispatcher()
        .dispatch::<ListParams, Vec<VersionInfo>>(
            &Context::new(),
            "collection.list",
            ListParams {
                filter: vec!["username".to_string()],
                ..ListParams::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert!(err.to_string().contains("key:value"));
}

#[tokio::test]
async fn save_emits_a_bus_event_for_the_active_profile() {
    let mem = MemSubsystems::new();
    let inst = instance_with(&mem);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    inst.bus()
        .subscribe(move |event: Arc<strata_events::Event>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event);
            }
        })
        .await;

    save(&inst, save_params("me/ds", json!([1]))).await.unwrap();

    let event = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.type_, "dataset:save");
    assert_eq!(event.profile_id, "QmTest");
    assert_eq!(event.data["ref"], "ada/ds");
}

#[tokio::test]
async fn peer_connect_then_info_and_registry_fallback() {
    let mem = MemSubsystems::new();
    mem.registry_client.add_profile(strata_core::Profile {
        id: "QmFar".to_string(),
        peername: "faraway".to_string(),
    });
    let inst = instance_with(&mem);
    let ctx = Context::new();

    let peer: PeerInfo = inst
        .dispatcher()
        .call(
            &ctx,
            "peer.connect",
            ConnectParams {
                address: "/ip4/10.0.0.1/tcp/4001".to_string(),
            },
        )
        .await
        .unwrap();
    assert!(peer.connected);

    let found: PeerInfo = inst
        .dispatcher()
        .call(
            &ctx,
            "peer.info",
            PeerInfoParams {
                peer: peer.peername.clone(),
            },
        )
        .await
        .unwrap();
    assert_eq!(found.id, peer.id);

    // Unknown locally, known to the registry.
    let far: PeerInfo = inst
        .dispatcher()
        .call(
            &ctx,
            "peer.info",
            PeerInfoParams {
                peer: "faraway".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(far.id, "QmFar");
    assert!(!far.connected);
}

#[tokio::test]
async fn config_get_redacts_unless_opted_in() {
    let mem = MemSubsystems::new();
    let inst = instance_with(&mem);
    let ctx = Context::new();

    let redacted: Value = inst
        .dispatcher()
        .call(&ctx, "config.get", GetConfigParams::default())
        .await
        .unwrap();
    assert!(redacted["profile"].get("key_secret").is_none());

    let full: Value = inst
        .dispatcher()
        .call(
            &ctx,
            "config.get",
            GetConfigParams {
                with_private_values: true,
                ..GetConfigParams::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(full["profile"]["key_secret"], "secret");

    let peername: Value = inst
        .dispatcher()
        .call(
            &ctx,
            "config.get",
            GetConfigParams {
                field: "profile.peername".to_string(),
                ..GetConfigParams::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(peername, "ada");
}

#[tokio::test]
async fn config_set_validates_then_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    let config = Config::default_with_profile("QmTest", "ada", "secret");
    config.save(&path).unwrap();

    let inst = Instance::builder(config.clone())
        .config_path(&path)
        .build()
        .unwrap();
    let ctx = Context::new();

    // Invalid config: nothing changes on disk or in memory.
    let mut broken = config.clone();
    broken.profile.peername = String::new();
    let err = inst
        .dispatcher()
        .call::<_, ()>(
            &ctx,
            "config.set",
            SetConfigParams {
                config: Some(broken),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert_eq!(inst.config().profile.peername, "ada");
    assert_eq!(Config::load(&path).unwrap().profile.peername, "ada");

    // Valid config: persisted before the in-memory swap.
    let mut renamed = config.clone();
    renamed.profile.peername = "lovelace".to_string();
    inst.dispatcher()
        .call::<_, ()>(
            &ctx,
            "config.set",
            SetConfigParams {
                config: Some(renamed),
            },
        )
        .await
        .unwrap();
    assert_eq!(inst.config().profile.peername, "lovelace");
    assert_eq!(Config::load(&path).unwrap().profile.peername, "lovelace");
}

#[tokio::test]
async fn create_auth_token_verifies_against_the_keystore() {
    let mem = MemSubsystems::new();
    let inst = instance_with(&mem);
    let ctx = Context::new();

    let token: String = inst
        .dispatcher()
        .call(
            &ctx,
            "access.createauthtoken",
            CreateAuthTokenParams {
                grantee_username: "ada".to_string(),
                ..CreateAuthTokenParams::default()
            },
        )
        .await
        .unwrap();

    let verified = strata_token::verify(&token, &inst.keystore()).unwrap();
    assert_eq!(verified.profile_id, "QmTest");
}

#[tokio::test]
async fn pull_uses_network_source_by_default() {
    // The loader only consults the staged network set for non-local
    // sources; dataset.get with an explicit network override resolves a
    // staged ref far enough to report it missing locally rather than
    // unresolvable.
    let mem = MemSubsystems::new();
    let inst = instance_with(&mem);
    let err = inst
        .dispatcher()
        .call::<GetParams, Value>(
            &Context::new(),
            "dataset.get",
            GetParams {
                reference: "brendan/pop".to_string(),
                ..GetParams::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.to_string().contains("reference"));

    mem.remotes.stage(VersionInfo {
        username: "brendan".to_string(),
        profile_id: "QmBrendan".to_string(),
        name: "pop".to_string(),
        path: "/mem/QmRemote".to_string(),
        ..VersionInfo::default()
    });
    let err = inst
        .dispatcher()
        .with_source(Source::Network)
        .call::<GetParams, Value>(
            &Context::new(),
            "dataset.get",
            GetParams {
                reference: "brendan/pop".to_string(),
                ..GetParams::default()
            },
        )
        .await
        .unwrap_err();
    // Resolved over the network, but the version isn't in the local index;
    // the failure moves past resolution to the repository lookup.
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.to_string().contains("dataset"));
}

#[tokio::test]
async fn shutdown_cancels_contexts_and_streams_teardown() {
    use futures_util::StreamExt;

    let mem = MemSubsystems::new();
    let inst = instance_with(&mem);
    let ctx = inst.context();

    let teardown = inst.shutdown();
    futures_util::pin_mut!(teardown);
    assert!(ctx.is_cancelled());
    while let Some(step) = teardown.next().await {
        step.unwrap();
    }
}

#[tokio::test]
async fn diff_counts_row_changes() {
    use strata_core::methods::dataset::{DiffParams, DiffResult};

    let mem = MemSubsystems::new();
    let inst = instance_with(&mem);
    save(&inst, save_params("me/left", json!([[1], [2], [3]])))
        .await
        .unwrap();
    save(&inst, save_params("me/right", json!([[1], [9], [3], [4]])))
        .await
        .unwrap();

    let result: DiffResult = inst
        .dispatcher()
        .call(
            &Context::new(),
            "dataset.diff",
            DiffParams {
                left_side: "ada/left".to_string(),
                right_side: "ada/right".to_string(),
                ..DiffParams::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(result.added, 1);
    assert_eq!(result.removed, 0);
    assert_eq!(result.updated, 1);
}

#[tokio::test]
async fn render_substitutes_into_the_default_template() {
    use strata_core::methods::dataset::RenderParams;

    let mem = MemSubsystems::new();
    let inst = instance_with(&mem);
    let mut params = save_params("me/ds", json!([["x"]]));
    params.title = "World Population".to_string();
    save(&inst, params).await.unwrap();

    let html: String = inst
        .dispatcher()
        .call(
            &Context::new(),
            "dataset.render",
            RenderParams {
                reference: "ada/ds".to_string(),
                template: String::new(),
            },
        )
        .await
        .unwrap();
    assert!(html.contains("<h1>ada/ds</h1>"));
    assert!(html.contains("World Population"));
}

#[tokio::test]
async fn apply_runs_the_transform_runner() {
    use strata_core::methods::automation::ApplyParams;
    use strata_core::Dataset;

    let mem = MemSubsystems::new();
    let inst = instance_with(&mem);

    let ds: Dataset = inst
        .dispatcher()
        .call(
            &Context::new(),
            "automation.apply",
            ApplyParams {
                script: "[[10], [20]]".to_string(),
                ..ApplyParams::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(ds.body, Some(json!([[10], [20]])));

    // Script and file together are conflicting inputs.
    let err = inst
        .dispatcher()
        .call::<ApplyParams, Dataset>(
            &Context::new(),
            "automation.apply",
            ApplyParams {
                script: "[]".to_string(),
                transform_path: "transform.star".to_string(),
                ..ApplyParams::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
}

#[tokio::test]
async fn validate_flags_ragged_rows() {
    use strata_core::methods::dataset::{ValidateParams, ValidateResult};

    let mem = MemSubsystems::new();
    let inst = instance_with(&mem);
    save(&inst, save_params("me/ragged", json!([[1, 2], [3]])))
        .await
        .unwrap();

    let result: ValidateResult = inst
        .dispatcher()
        .call(
            &Context::new(),
            "dataset.validate",
            ValidateParams {
                reference: "ada/ragged".to_string(),
                ..ValidateParams::default()
            },
        )
        .await
        .unwrap();
    assert!(!result.valid);
    assert_eq!(result.issues.len(), 1);
    assert_eq!(result.issues[0].path, "/1");

    save(&inst, save_params("me/square", json!([[1, 2], [3, 4]])))
        .await
        .unwrap();
    let result: ValidateResult = inst
        .dispatcher()
        .call(
            &Context::new(),
            "dataset.validate",
            ValidateParams {
                reference: "ada/square".to_string(),
                ..ValidateParams::default()
            },
        )
        .await
        .unwrap();
    assert!(result.valid);
}

#[tokio::test]
async fn peer_list_pages_with_a_cursor() {
    use strata_core::methods::peer::PeerListParams;

    let mem = MemSubsystems::new();
    for i in 0..3 {
        mem.remotes.add_peer(PeerInfo {
            id: format!("Qm{i}"),
            peername: format!("peer-{i}"),
            address: format!("/ip4/10.0.0.{i}/tcp/4001"),
            connected: true,
        });
    }
    let inst = instance_with(&mem);

    let outcome = inst
        .dispatcher()
        .dispatch::<PeerListParams, Vec<PeerInfo>>(
            &Context::new(),
            "peer.list",
            PeerListParams {
                offset: 0,
                limit: 2,
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.value.len(), 2);
    assert_eq!(
        outcome.cursor.unwrap().to_query_string(),
        "?limit=2&offset=2"
    );

    let rest = inst
        .dispatcher()
        .dispatch::<PeerListParams, Vec<PeerInfo>>(
            &Context::new(),
            "peer.list",
            PeerListParams {
                offset: 2,
                limit: 2,
            },
        )
        .await
        .unwrap();
    assert_eq!(rest.value.len(), 1);
    assert!(rest.cursor.is_none());
}

#[tokio::test]
async fn disconnect_marks_the_peer_offline() {
    use strata_core::methods::peer::{ConnectParams, DisconnectParams, PeerInfoParams};

    let mem = MemSubsystems::new();
    let inst = instance_with(&mem);
    let ctx = Context::new();

    let peer: PeerInfo = inst
        .dispatcher()
        .call(
            &ctx,
            "peer.connect",
            ConnectParams {
                address: "/ip4/10.1.1.1/tcp/4001".to_string(),
            },
        )
        .await
        .unwrap();

    inst.dispatcher()
        .call::<_, ()>(
            &ctx,
            "peer.disconnect",
            DisconnectParams {
                address: peer.address.clone(),
            },
        )
        .await
        .unwrap();

    let after: PeerInfo = inst
        .dispatcher()
        .call(
            &ctx,
            "peer.info",
            PeerInfoParams {
                peer: peer.peername.clone(),
            },
        )
        .await
        .unwrap();
    assert!(!after.connected);
}
