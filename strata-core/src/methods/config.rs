//! Node configuration reads and writes. Both methods are in-process only:
//! a thin client has no business editing a daemon's config file over RPC.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strata_events::types as events;

use crate::config::Config;
use crate::error::Error;
use crate::params::RequestParams;
use crate::registry::{GroupRegistrar, MethodSet, MethodSpec};
use crate::scope::Scope;

pub struct ConfigMethods;

impl MethodSet for ConfigMethods {
    fn name(&self) -> &'static str {
        "config"
    }

    fn attributes(&self) -> Vec<MethodSpec> {
        vec![
            MethodSpec::deny_remote("get"),
            MethodSpec::deny_remote("set"),
        ]
    }

    fn register(self: std::sync::Arc<Self>, group: &mut GroupRegistrar<'_>) {
        group.method("get", get);
        group.method("set", set);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GetConfigParams {
    /// Dot-separated selector into the document; empty returns the whole
    /// config.
    pub field: String,
    /// Include private key material in the result.
    pub with_private_values: bool,
}

impl RequestParams for GetConfigParams {}

async fn get(scope: Scope, params: GetConfigParams) -> Result<Value, Error> {
    let config = scope.config();
    let visible = if params.with_private_values {
        (*config).clone()
    } else {
        config.redacted()
    };
    let mut value = serde_json::to_value(&visible)
        .map_err(|e| Error::internal(format!("encoding config: {e}")))?;

    for segment in params.field.split('.').filter(|s| !s.is_empty()) {
        value = value
            .get(segment)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("config field {:?} not found", params.field)))?;
    }
    Ok(value)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetConfigParams {
    pub config: Option<Config>,
}

impl RequestParams for SetConfigParams {
    fn validate(&self) -> Result<(), Error> {
        if self.config.is_none() {
            return Err(Error::bad_request("no configuration given"));
        }
        Ok(())
    }
}

async fn set(scope: Scope, params: SetConfigParams) -> Result<(), Error> {
    let next = params
        .config
        .ok_or_else(|| Error::bad_request("no configuration given"))?;
    scope.change_config(next)?;
    let redacted = serde_json::to_value(scope.config().redacted())
        .map_err(|e| Error::internal(format!("encoding config: {e}")))?;
    scope.emit_event(events::CONFIG_CHANGED, redacted).await;
    Ok(())
}
