//! Listing and inspecting the datasets this node knows about.

use serde::{Deserialize, Serialize};
use strata_http::Cursor;

use crate::dataset::VersionInfo;
use crate::dispatch::DispatchOutcome;
use crate::error::Error;
use crate::params::RequestParams;
use crate::registry::{GroupRegistrar, MethodSet, MethodSpec};
use crate::scope::Scope;

use super::resolve_ref;

pub struct CollectionMethods;

impl MethodSet for CollectionMethods {
    fn name(&self) -> &'static str {
        "collection"
    }

    fn attributes(&self) -> Vec<MethodSpec> {
        vec![
            MethodSpec::post("list", "/list").paginated(),
            MethodSpec::post("get", "/collection/get"),
        ]
    }

    fn register(self: std::sync::Arc<Self>, group: &mut GroupRegistrar<'_>) {
        group.method_paged("list", list);
        group.method("get", get);
    }
}

const DEFAULT_LIST_LIMIT: usize = 25;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListParams {
    pub offset: usize,
    pub limit: usize,
    /// Free-text match against names and commit titles.
    pub term: String,
    /// Sort keys: comma-separated, `+` ascending (default), `-` descending.
    pub order_by: String,
    /// `key:value` constraints; supported keys are `username` and `name`.
    pub filter: Vec<String>,
}

impl RequestParams for ListParams {
    fn validate(&self) -> Result<(), Error> {
        for entry in &self.filter {
            if !entry.contains(':') {
                return Err(Error::bad_request(format!(
                    "invalid filter {entry:?}: want key:value"
                )));
            }
        }
        Ok(())
    }

    fn set_nonzero_defaults(&mut self) {
        if self.limit == 0 {
            self.limit = DEFAULT_LIST_LIMIT;
        }
    }
}

async fn list(
    scope: Scope,
    params: ListParams,
) -> Result<DispatchOutcome<Vec<VersionInfo>>, Error> {
    let mut items = scope.refstore().list(0, usize::MAX).await?;
    let mut warnings = Vec::new();

    for entry in &params.filter {
        let (key, want) = entry.split_once(':').unwrap_or((entry.as_str(), ""));
        match key {
            "username" => items.retain(|v| v.username == want),
            "name" => items.retain(|v| v.name == want),
            other => warnings.push(format!("ignoring unknown filter key {other:?}")),
        }
    }
    if !params.term.is_empty() {
        items.retain(|v| v.name.contains(&params.term) || v.commit_title.contains(&params.term));
    }

    for key in params
        .order_by
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
    {
        let (descending, field) = match key.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, key.strip_prefix('+').unwrap_or(key)),
        };
        match field {
            "name" => items.sort_by(|a, b| a.alias().cmp(&b.alias())),
            "updated" => items.sort_by(|a, b| a.commit_time.cmp(&b.commit_time)),
            "size" => items.sort_by(|a, b| a.body_size.cmp(&b.body_size)),
            other => {
                warnings.push(format!("ignoring unknown sort key {other:?}"));
                continue;
            }
        }
        if descending {
            items.reverse();
        }
    }

    let page: Vec<VersionInfo> = items
        .into_iter()
        .skip(params.offset)
        .take(params.limit)
        .collect();

    let mut outcome = DispatchOutcome::new(page);
    for w in warnings {
        outcome = outcome.with_warning(w);
    }
    if outcome.value.len() == params.limit {
        let next = Cursor::new()
            .set("limit", params.limit)
            .set("offset", params.offset + params.limit);
        outcome = outcome.with_cursor(next);
    }
    Ok(outcome)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetParams {
    #[serde(rename = "ref")]
    pub reference: String,
}

impl RequestParams for GetParams {
    fn validate(&self) -> Result<(), Error> {
        if self.reference.is_empty() {
            return Err(Error::bad_request("a dataset reference is required"));
        }
        Ok(())
    }

}

async fn get(scope: Scope, params: GetParams) -> Result<VersionInfo, Error> {
    let reference = resolve_ref(&scope, &params.reference).await?;
    scope
        .refstore()
        .get(&reference)
        .await?
        .ok_or_else(|| Error::not_found(format!("dataset {:?} not found", reference.alias())))
}
