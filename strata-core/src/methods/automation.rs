//! Transform execution.

use serde::{Deserialize, Serialize};
use serde_json::json;
use strata_events::types as events;

use crate::dataset::Dataset;
use crate::error::Error;
use crate::params::{PathFields, RequestParams};
use crate::registry::{GroupRegistrar, MethodSet, MethodSpec};
use crate::scope::Scope;

pub struct AutomationMethods;

impl MethodSet for AutomationMethods {
    fn name(&self) -> &'static str {
        "automation"
    }

    fn attributes(&self) -> Vec<MethodSpec> {
        vec![MethodSpec::post("apply", "/auto/apply")]
    }

    fn register(self: std::sync::Arc<Self>, group: &mut GroupRegistrar<'_>) {
        group.method("apply", apply);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApplyParams {
    /// Base dataset the transform runs against; empty starts from scratch.
    #[serde(rename = "ref")]
    pub reference: String,
    /// Transform script file on disk.
    pub transform_path: String,
    /// Inline transform script.
    pub script: String,
}

impl RequestParams for ApplyParams {
    fn validate(&self) -> Result<(), Error> {
        match (self.transform_path.is_empty(), self.script.is_empty()) {
            (true, true) => Err(Error::bad_request(
                "a transform file or an inline script is required",
            )),
            (false, false) => Err(Error::bad_request(
                "transform file and inline script are mutually exclusive",
            )),
            _ => Ok(()),
        }
    }

    fn path_fields(&mut self) -> PathFields<'_> {
        PathFields::new().fspath(&mut self.transform_path)
    }
}

async fn apply(scope: Scope, params: ApplyParams) -> Result<Dataset, Error> {
    let script = if params.script.is_empty() {
        std::fs::read_to_string(&params.transform_path).map_err(|e| {
            Error::bad_request(format!(
                "reading transform {:?}: {e}",
                params.transform_path
            ))
        })?
    } else {
        params.script.clone()
    };

    let base = if params.reference.is_empty() {
        None
    } else {
        let value = super::dataset::load(&scope, &params.reference).await?;
        Some(value)
    };

    let dataset = scope.runner().apply(&script, base).await?;
    scope
        .emit_event(
            events::TRANSFORM_APPLIED,
            json!({"ref": params.reference}),
        )
        .await;
    Ok(dataset)
}
