//! Dataset lifecycle operations: save, get, diff, render, rename, remove,
//! pull, push, validate.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strata_events::types as events;

use crate::dataset::{Commit, Dataset, Meta, Structure, VersionInfo};
use crate::dsref;
use crate::error::Error;
use crate::params::{PathFields, RequestParams};
use crate::registry::{GroupRegistrar, MethodSet, MethodSpec};
use crate::scope::Scope;
use crate::source::Source;
use crate::subsystems::LogEntry;

use super::{parse_ref, resolve_ref};

pub struct DatasetMethods;

impl MethodSet for DatasetMethods {
    fn name(&self) -> &'static str {
        "dataset"
    }

    fn attributes(&self) -> Vec<MethodSpec> {
        vec![
            MethodSpec::post("save", "/ds/save"),
            MethodSpec::get("get", "/ds/get"),
            MethodSpec::post("diff", "/ds/diff"),
            MethodSpec::post("render", "/ds/render"),
            MethodSpec::post("rename", "/ds/rename"),
            MethodSpec::post("remove", "/ds/remove"),
            MethodSpec::post("pull", "/ds/pull").with_source(Source::Network),
            MethodSpec::post("push", "/ds/push"),
            MethodSpec::post("validate", "/ds/validate"),
        ]
    }

    fn register(self: std::sync::Arc<Self>, group: &mut GroupRegistrar<'_>) {
        group.method("save", save);
        group.method("get", get);
        group.method("diff", diff);
        group.method("render", render);
        group.method("rename", rename);
        group.method("remove", remove);
        group.method("pull", pull);
        group.method("push", push);
        group.method("validate", validate);
    }
}

// ── save ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SaveParams {
    #[serde(rename = "ref")]
    pub reference: String,
    pub title: String,
    pub message: String,
    /// Body file on disk; mutually exclusive with the inline body.
    pub body_path: String,
    /// Component files to merge into the version.
    pub file_paths: Vec<String>,
    /// Inline body, used by callers that already hold the data.
    pub body: Option<Value>,
    pub force: bool,
    /// Require that the dataset does not exist yet.
    pub new: bool,
}

impl RequestParams for SaveParams {
    fn validate(&self) -> Result<(), Error> {
        if self.reference.is_empty() {
            return Err(Error::bad_request("a dataset reference is required"));
        }
        if !self.body_path.is_empty() && self.body.is_some() {
            return Err(Error::bad_request(
                "body file and inline body are mutually exclusive",
            ));
        }
        Ok(())
    }

    fn path_fields(&mut self) -> PathFields<'_> {
        PathFields::new()
            .fspath(&mut self.body_path)
            .fspath_list(&mut self.file_paths)
    }
}

async fn save(scope: Scope, params: SaveParams) -> Result<VersionInfo, Error> {
    let reference = parse_ref(&scope, &params.reference)?;
    let active = scope.active_profile().clone();
    if reference.username != active.peername {
        return Err(Error::bad_request(format!(
            "cannot save {:?}: datasets are saved under the active profile {:?}",
            reference.alias(),
            active.peername
        )));
    }

    let head = scope.refstore().get(&reference).await?;
    if params.new && head.is_some() {
        return Err(Error::conflict(format!(
            "dataset {:?} already exists",
            reference.alias()
        )));
    }

    let (body_bytes, body_format) = save_body(&scope, &params, head.as_ref()).await?;

    if let Some(head) = &head {
        if !params.force && !head.path.is_empty() {
            let head_body = scope.filesystem().get(&head.path).await.unwrap_or_default();
            if head_body == body_bytes && (params.title.is_empty() || params.title == head.commit_title)
            {
                return Err(Error::conflict("dataset has no changes"));
            }
        }
    }

    let path = scope.filesystem().put(body_bytes.clone()).await?;
    let info = VersionInfo {
        username: reference.username.clone(),
        profile_id: active.id.clone(),
        name: reference.name.clone(),
        path,
        commit_time: Some(Utc::now()),
        commit_title: if params.title.is_empty() {
            if head.is_some() { "updated dataset" } else { "created dataset" }.to_string()
        } else {
            params.title.clone()
        },
        body_size: body_bytes.len() as u64,
        body_format,
        ..VersionInfo::default()
    };
    scope.refstore().put(info.clone()).await?;
    scope
        .logbook()
        .append(LogEntry {
            alias: info.alias(),
            profile_id: active.id,
            action: "save".to_string(),
            note: if params.message.is_empty() {
                info.commit_title.clone()
            } else {
                params.message.clone()
            },
        })
        .await?;
    scope
        .emit_event(
            events::DATASET_SAVED,
            json!({"ref": info.alias(), "path": info.path}),
        )
        .await;
    Ok(info)
}

async fn save_body(
    scope: &Scope,
    params: &SaveParams,
    head: Option<&VersionInfo>,
) -> Result<(Vec<u8>, String), Error> {
    if !params.body_path.is_empty() {
        let bytes = std::fs::read(&params.body_path)
            .map_err(|e| Error::bad_request(format!("reading body file {:?}: {e}", params.body_path)))?;
        let format = std::path::Path::new(&params.body_path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("json")
            .to_string();
        return Ok((bytes, format));
    }
    if let Some(body) = &params.body {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| Error::internal(format!("encoding body: {e}")))?;
        return Ok((bytes, "json".to_string()));
    }
    // Metadata-only save keeps the head body.
    if let Some(head) = head {
        if !head.path.is_empty() {
            let bytes = scope.filesystem().get(&head.path).await?;
            return Ok((bytes, head.body_format.clone()));
        }
    }
    Err(Error::bad_request("no body given and no previous version to carry forward"))
}

// ── get ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetParams {
    #[serde(rename = "ref")]
    pub reference: String,
    /// Component selector: empty for the whole dataset, or one of `body`,
    /// `meta`, `commit`, `structure`.
    pub selector: String,
    pub format: String,
    pub offset: usize,
    pub limit: usize,
    /// Return the whole body regardless of offset/limit.
    pub all: bool,
}

impl RequestParams for GetParams {
    fn validate(&self) -> Result<(), Error> {
        if self.reference.is_empty() {
            return Err(Error::bad_request("a dataset reference is required"));
        }
        match self.selector.as_str() {
            "" | "body" | "meta" | "commit" | "structure" => Ok(()),
            other => Err(Error::bad_request(format!("unknown selector {other:?}"))),
        }
    }

    fn set_nonzero_defaults(&mut self) {
        if self.format.is_empty() {
            self.format = "json".to_string();
        }
        if self.limit == 0 {
            self.limit = 25;
        }
    }
}

async fn get(scope: Scope, params: GetParams) -> Result<Value, Error> {
    if params.format != "json" {
        return Err(Error::bad_request(format!(
            "unsupported format {:?}, only json is available",
            params.format
        )));
    }
    let dataset = load(&scope, &params.reference).await?;
    match params.selector.as_str() {
        "" => serde_json::to_value(&dataset)
            .map_err(|e| Error::internal(format!("encoding dataset: {e}"))),
        "body" => {
            let body = dataset
                .body
                .ok_or_else(|| Error::not_found("dataset has no body"))?;
            match body {
                Value::Array(rows) if !params.all => Ok(Value::Array(
                    rows.into_iter()
                        .skip(params.offset)
                        .take(params.limit)
                        .collect(),
                )),
                other => Ok(other),
            }
        }
        "meta" => serde_json::to_value(&dataset.meta)
            .map_err(|e| Error::internal(format!("encoding meta: {e}"))),
        "commit" => serde_json::to_value(&dataset.commit)
            .map_err(|e| Error::internal(format!("encoding commit: {e}"))),
        "structure" => serde_json::to_value(&dataset.structure)
            .map_err(|e| Error::internal(format!("encoding structure: {e}"))),
        other => Err(Error::bad_request(format!("unknown selector {other:?}"))),
    }
}

/// Resolve a reference and assemble the full dataset document.
pub(crate) async fn load(scope: &Scope, raw: &str) -> Result<Dataset, Error> {
    let reference = resolve_ref(scope, raw).await?;
    let info = scope
        .refstore()
        .get(&reference)
        .await?
        .ok_or_else(|| Error::not_found(format!("dataset {:?} not found", reference.alias())))?;
    let body_bytes = scope.filesystem().get(&info.path).await?;
    let body: Value = serde_json::from_slice(&body_bytes).unwrap_or_else(|_| {
        Value::String(String::from_utf8_lossy(&body_bytes).into_owned())
    });
    Ok(Dataset {
        username: info.username.clone(),
        profile_id: info.profile_id.clone(),
        name: info.name.clone(),
        path: info.path.clone(),
        meta: Some(Meta {
            title: info.commit_title.clone(),
            description: String::new(),
        }),
        structure: Some(Structure {
            format: info.body_format.clone(),
            length: info.body_size,
            entries: match &body {
                Value::Array(rows) => rows.len() as u64,
                _ => 0,
            },
        }),
        commit: Some(Commit {
            title: info.commit_title.clone(),
            message: String::new(),
            timestamp: info.commit_time,
        }),
        body: Some(body),
    })
}

// ── diff ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DiffParams {
    /// A dataset reference or a file on disk.
    pub left_side: String,
    pub right_side: String,
    pub selector: String,
}

impl RequestParams for DiffParams {
    fn validate(&self) -> Result<(), Error> {
        if self.left_side.is_empty() || self.right_side.is_empty() {
            return Err(Error::bad_request("diff requires two sides"));
        }
        match self.selector.as_str() {
            "" | "body" => Ok(()),
            other => Err(Error::bad_request(format!(
                "cannot diff component {other:?}, only body diffs are supported"
            ))),
        }
    }

    fn path_fields(&mut self) -> PathFields<'_> {
        PathFields::new()
            .dsref_or_fspath(&mut self.left_side)
            .dsref_or_fspath(&mut self.right_side)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffResult {
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
}

async fn diff(scope: Scope, params: DiffParams) -> Result<DiffResult, Error> {
    let left = load_side(&scope, &params.left_side).await?;
    let right = load_side(&scope, &params.right_side).await?;
    Ok(diff_values(&left, &right))
}

async fn load_side(scope: &Scope, side: &str) -> Result<Value, Error> {
    if dsref::is_ref_string(side) {
        let ds = load(scope, side).await?;
        return Ok(ds.body.unwrap_or(Value::Null));
    }
    let bytes = std::fs::read(side)
        .map_err(|e| Error::bad_request(format!("reading {side:?}: {e}")))?;
    Ok(serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned())))
}

fn diff_values(left: &Value, right: &Value) -> DiffResult {
    match (left, right) {
        (Value::Array(l), Value::Array(r)) => {
            let shared = l.len().min(r.len());
            DiffResult {
                added: r.len().saturating_sub(l.len()),
                removed: l.len().saturating_sub(r.len()),
                updated: (0..shared).filter(|&i| l[i] != r[i]).count(),
            }
        }
        (Value::Object(l), Value::Object(r)) => DiffResult {
            added: r.keys().filter(|k| !l.contains_key(*k)).count(),
            removed: l.keys().filter(|k| !r.contains_key(*k)).count(),
            updated: l
                .iter()
                .filter(|(k, v)| r.get(*k).is_some_and(|rv| rv != *v))
                .count(),
        },
        (l, r) if l == r => DiffResult::default(),
        _ => DiffResult {
            updated: 1,
            ..DiffResult::default()
        },
    }
}

// ── render ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderParams {
    #[serde(rename = "ref")]
    pub reference: String,
    /// Template file; the built-in layout applies when empty.
    pub template: String,
}

impl RequestParams for RenderParams {
    fn validate(&self) -> Result<(), Error> {
        if self.reference.is_empty() {
            return Err(Error::bad_request("a dataset reference is required"));
        }
        Ok(())
    }

    fn path_fields(&mut self) -> PathFields<'_> {
        PathFields::new().fspath(&mut self.template)
    }
}

const DEFAULT_TEMPLATE: &str = "<!DOCTYPE html>\n<html><head><title>{{alias}}</title></head>\n\
<body><h1>{{alias}}</h1><h2>{{title}}</h2><pre>{{body}}</pre></body></html>\n";

async fn render(scope: Scope, params: RenderParams) -> Result<String, Error> {
    let dataset = load(&scope, &params.reference).await?;
    let template = if params.template.is_empty() {
        DEFAULT_TEMPLATE.to_string()
    } else {
        std::fs::read_to_string(&params.template)
            .map_err(|e| Error::bad_request(format!("reading template {:?}: {e}", params.template)))?
    };
    let title = dataset.meta.as_ref().map(|m| m.title.clone()).unwrap_or_default();
    let body = dataset
        .body
        .as_ref()
        .map(|b| serde_json::to_string_pretty(b).unwrap_or_default())
        .unwrap_or_default();
    Ok(template
        .replace("{{alias}}", &dataset.alias())
        .replace("{{title}}", &title)
        .replace("{{body}}", &body))
}

// ── rename ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenameParams {
    pub current: String,
    pub next: String,
}

impl RequestParams for RenameParams {
    fn validate(&self) -> Result<(), Error> {
        if self.current.is_empty() || self.next.is_empty() {
            return Err(Error::bad_request("rename requires current and next names"));
        }
        Ok(())
    }
}

async fn rename(scope: Scope, params: RenameParams) -> Result<VersionInfo, Error> {
    let from = resolve_ref(&scope, &params.current).await?;
    let to = parse_ref(&scope, &params.next)?;
    if !to.path.is_empty() {
        return Err(Error::bad_request("the new name may not carry a version path"));
    }
    let info = scope.refstore().rename(&from, &to).await?;
    scope
        .logbook()
        .append(LogEntry {
            alias: info.alias(),
            profile_id: scope.active_profile().id.clone(),
            action: "rename".to_string(),
            note: format!("{} -> {}", from.alias(), to.alias()),
        })
        .await?;
    scope
        .emit_event(
            events::DATASET_RENAMED,
            json!({"from": from.alias(), "to": to.alias()}),
        )
        .await;
    Ok(info)
}

// ── remove ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RemoveParams {
    #[serde(rename = "ref")]
    pub reference: String,
    pub force: bool,
    /// Leave any linked working directory in place.
    pub keep_files: bool,
}

impl RequestParams for RemoveParams {
    fn validate(&self) -> Result<(), Error> {
        if self.reference.is_empty() {
            return Err(Error::bad_request("a dataset reference is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveResult {
    #[serde(rename = "ref")]
    pub reference: String,
    pub num_deleted: usize,
}

async fn remove(scope: Scope, params: RemoveParams) -> Result<RemoveResult, Error> {
    let reference = resolve_ref(&scope, &params.reference).await?;
    let info = scope
        .refstore()
        .get(&reference)
        .await?
        .ok_or_else(|| Error::not_found(format!("dataset {:?} not found", reference.alias())))?;
    if info.fsi_dirty && !params.force {
        return Err(Error::conflict(
            "dataset working directory has uncommitted changes",
        ));
    }
    let num_deleted = scope.refstore().delete(&reference).await?;
    scope
        .logbook()
        .append(LogEntry {
            alias: reference.alias(),
            profile_id: scope.active_profile().id.clone(),
            action: "remove".to_string(),
            note: format!("{num_deleted} versions"),
        })
        .await?;
    scope
        .emit_event(events::DATASET_REMOVED, json!({"ref": reference.alias()}))
        .await;
    Ok(RemoveResult {
        reference: reference.alias(),
        num_deleted,
    })
}

// ── pull / push ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PullParams {
    #[serde(rename = "ref")]
    pub reference: String,
    /// Working directory to link the fetched dataset to.
    pub link_dir: String,
}

impl RequestParams for PullParams {
    fn validate(&self) -> Result<(), Error> {
        if self.reference.is_empty() {
            return Err(Error::bad_request("a dataset reference is required"));
        }
        Ok(())
    }

    fn path_fields(&mut self) -> PathFields<'_> {
        PathFields::new().fspath(&mut self.link_dir)
    }
}

async fn pull(scope: Scope, params: PullParams) -> Result<VersionInfo, Error> {
    let reference = parse_ref(&scope, &params.reference)?;
    let mut info = scope.remotes().pull(&reference).await?;
    if !params.link_dir.is_empty() {
        info.fsi_path = params.link_dir.clone();
    }
    scope.refstore().put(info.clone()).await?;
    scope
        .logbook()
        .append(LogEntry {
            alias: info.alias(),
            profile_id: scope.active_profile().id.clone(),
            action: "pull".to_string(),
            note: info.path.clone(),
        })
        .await?;
    scope
        .emit_event(events::DATASET_PULLED, json!({"ref": info.alias()}))
        .await;
    Ok(info)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushParams {
    #[serde(rename = "ref")]
    pub reference: String,
    /// Remote name from the node config; the first configured remote when
    /// empty.
    pub remote: String,
}

impl RequestParams for PushParams {
    fn validate(&self) -> Result<(), Error> {
        if self.reference.is_empty() {
            return Err(Error::bad_request("a dataset reference is required"));
        }
        Ok(())
    }
}

async fn push(scope: Scope, params: PushParams) -> Result<VersionInfo, Error> {
    let reference = resolve_ref(&scope, &params.reference).await?;
    let info = scope
        .refstore()
        .get(&reference)
        .await?
        .ok_or_else(|| Error::not_found(format!("dataset {:?} not found", reference.alias())))?;

    let config = scope.config();
    let remote = if params.remote.is_empty() {
        config
            .remotes
            .first()
            .map(|r| r.name.clone())
            .ok_or_else(|| Error::bad_request("no remote configured"))?
    } else {
        if !config.remotes.iter().any(|r| r.name == params.remote) {
            return Err(Error::not_found(format!(
                "unknown remote {:?}",
                params.remote
            )));
        }
        params.remote.clone()
    };

    scope.remotes().push(&info, &remote).await?;
    scope
        .emit_event(
            events::DATASET_PUSHED,
            json!({"ref": info.alias(), "remote": remote}),
        )
        .await;
    Ok(info)
}

// ── validate ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidateParams {
    #[serde(rename = "ref")]
    pub reference: String,
    pub body_path: String,
}

impl RequestParams for ValidateParams {
    fn validate(&self) -> Result<(), Error> {
        if self.reference.is_empty() && self.body_path.is_empty() {
            return Err(Error::bad_request(
                "a dataset reference or a body file is required",
            ));
        }
        Ok(())
    }

    fn path_fields(&mut self) -> PathFields<'_> {
        PathFields::new().fspath(&mut self.body_path)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidateResult {
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
}

async fn validate(scope: Scope, params: ValidateParams) -> Result<ValidateResult, Error> {
    let body = if params.reference.is_empty() {
        load_side(&scope, &params.body_path).await?
    } else {
        load(&scope, &params.reference)
            .await?
            .body
            .unwrap_or(Value::Null)
    };

    let mut issues = Vec::new();
    match &body {
        Value::Array(rows) => {
            // Tabular bodies: every row must have the width of the first.
            let width = rows.first().and_then(|r| r.as_array()).map(|r| r.len());
            for (i, row) in rows.iter().enumerate() {
                match (width, row.as_array()) {
                    (Some(w), Some(cells)) if cells.len() != w => issues.push(ValidationIssue {
                        path: format!("/{i}"),
                        message: format!("row has {} entries, want {w}", cells.len()),
                    }),
                    (Some(_), None) => issues.push(ValidationIssue {
                        path: format!("/{i}"),
                        message: "row is not an array".to_string(),
                    }),
                    _ => {}
                }
            }
        }
        Value::Null => issues.push(ValidationIssue {
            path: "/".to_string(),
            message: "body is empty".to_string(),
        }),
        _ => {}
    }

    Ok(ValidateResult {
        valid: issues.is_empty(),
        issues,
    })
}
