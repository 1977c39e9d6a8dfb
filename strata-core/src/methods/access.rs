//! Issuing auth tokens for profiles this node can vouch for.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::params::RequestParams;
use crate::registry::{GroupRegistrar, MethodSet, MethodSpec};
use crate::scope::Scope;

pub struct AccessMethods;

impl MethodSet for AccessMethods {
    fn name(&self) -> &'static str {
        "access"
    }

    fn attributes(&self) -> Vec<MethodSpec> {
        vec![MethodSpec::post("createauthtoken", "/access/token")]
    }

    fn register(self: std::sync::Arc<Self>, group: &mut GroupRegistrar<'_>) {
        group.method("createauthtoken", create_auth_token);
    }
}

const DEFAULT_TOKEN_TTL_SECONDS: u64 = 3600;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateAuthTokenParams {
    pub grantee_username: String,
    #[serde(rename = "granteeProfileID")]
    pub grantee_profile_id: String,
    pub ttl_seconds: u64,
}

impl RequestParams for CreateAuthTokenParams {
    fn validate(&self) -> Result<(), Error> {
        match (
            self.grantee_username.is_empty(),
            self.grantee_profile_id.is_empty(),
        ) {
            (true, true) => Err(Error::bad_request(
                "a grantee username or profile id is required",
            )),
            (false, false) => Err(Error::bad_request(
                "specify a grantee username or a profile id, not both",
            )),
            _ => Ok(()),
        }
    }

    fn set_nonzero_defaults(&mut self) {
        if self.ttl_seconds == 0 {
            self.ttl_seconds = DEFAULT_TOKEN_TTL_SECONDS;
        }
    }
}

async fn create_auth_token(
    scope: Scope,
    params: CreateAuthTokenParams,
) -> Result<String, Error> {
    let profile = if !params.grantee_profile_id.is_empty() {
        scope.profiles().get(&params.grantee_profile_id)
    } else {
        scope.profiles().by_peername(&params.grantee_username)
    }
    .ok_or_else(|| {
        Error::not_found(format!(
            "profile {:?} not found",
            if params.grantee_profile_id.is_empty() {
                &params.grantee_username
            } else {
                &params.grantee_profile_id
            }
        ))
    })?;

    scope.issue_token(&profile.id, Duration::from_secs(params.ttl_seconds))
}
