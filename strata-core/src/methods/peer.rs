//! Peer management: who this node knows and is connected to.

use serde::{Deserialize, Serialize};
use serde_json::json;
use strata_events::types as events;
use strata_http::Cursor;

use crate::dataset::PeerInfo;
use crate::dispatch::DispatchOutcome;
use crate::error::Error;
use crate::params::RequestParams;
use crate::profile::Profile;
use crate::registry::{GroupRegistrar, MethodSet, MethodSpec};
use crate::scope::Scope;

pub struct PeerMethods;

impl MethodSet for PeerMethods {
    fn name(&self) -> &'static str {
        "peer"
    }

    fn attributes(&self) -> Vec<MethodSpec> {
        vec![
            MethodSpec::post("list", "/peer/list").paginated(),
            MethodSpec::get("info", "/peer/info"),
            MethodSpec::post("connect", "/peer/connect"),
            MethodSpec::post("disconnect", "/peer/disconnect"),
        ]
    }

    fn register(self: std::sync::Arc<Self>, group: &mut GroupRegistrar<'_>) {
        group.method_paged("list", list);
        group.method("info", info);
        group.method("connect", connect);
        group.method("disconnect", disconnect);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerListParams {
    pub offset: usize,
    pub limit: usize,
}

impl RequestParams for PeerListParams {
    fn set_nonzero_defaults(&mut self) {
        if self.limit == 0 {
            self.limit = 25;
        }
    }
}

async fn list(
    scope: Scope,
    params: PeerListParams,
) -> Result<DispatchOutcome<Vec<PeerInfo>>, Error> {
    let peers = scope.remotes().peers(params.offset, params.limit).await?;
    let mut outcome = DispatchOutcome::new(peers);
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
pub struct PeerInfoParams {
    pub peer: String,
}

impl RequestParams for PeerInfoParams {
    fn validate(&self) -> Result<(), Error> {
        if self.peer.is_empty() {
            return Err(Error::bad_request("a peer name or id is required"));
        }
        Ok(())
    }
}

/// Connected peers answer first; known profiles and the registry fill in
/// for peers we've heard of but aren't connected to.
async fn info(scope: Scope, params: PeerInfoParams) -> Result<PeerInfo, Error> {
    if let Some(peer) = scope.remotes().peer(&params.peer).await? {
        return Ok(peer);
    }
    if let Some(profile) = scope
        .profiles()
        .by_peername(&params.peer)
        .or_else(|| scope.profiles().get(&params.peer))
    {
        return Ok(offline_peer(profile));
    }
    if let Some(profile) = scope.registry_client().lookup_profile(&params.peer).await? {
        return Ok(offline_peer(profile));
    }
    Err(Error::not_found(format!("peer {:?} not found", params.peer)))
}

fn offline_peer(profile: Profile) -> PeerInfo {
    PeerInfo {
        id: profile.id,
        peername: profile.peername,
        address: String::new(),
        connected: false,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectParams {
    pub address: String,
}

impl RequestParams for ConnectParams {
    fn validate(&self) -> Result<(), Error> {
        if self.address.is_empty() {
            return Err(Error::bad_request("a peer address is required"));
        }
        Ok(())
    }
}

async fn connect(scope: Scope, params: ConnectParams) -> Result<PeerInfo, Error> {
    let peer = scope.remotes().connect(&params.address).await?;
    scope.profiles().put(Profile {
        id: peer.id.clone(),
        peername: peer.peername.clone(),
    });
    scope
        .emit_event(events::PEER_CONNECTED, json!({"peer": peer.peername}))
        .await;
    Ok(peer)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisconnectParams {
    pub address: String,
}

impl RequestParams for DisconnectParams {
    fn validate(&self) -> Result<(), Error> {
        if self.address.is_empty() {
            return Err(Error::bad_request("a peer address is required"));
        }
        Ok(())
    }
}

async fn disconnect(scope: Scope, params: DisconnectParams) -> Result<(), Error> {
    scope.remotes().disconnect(&params.address).await?;
    scope
        .emit_event(events::PEER_DISCONNECTED, json!({"peer": params.address}))
        .await;
    Ok(())
}
