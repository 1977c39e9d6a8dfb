//! The event push channel: an authenticated websocket that forwards bus
//! events to subscribers, scoped to the profile their token names.
//!
//! Connection lifecycle:
//!
//! - accepted: the upgrade succeeded and the connection has an id, but no
//!   identity yet; nothing is delivered to it.
//! - subscribed: a `subscribe:request` carried a token that verified
//!   against the key store; the connection joins that profile's
//!   subscription set.
//! - closed: any read or write failure evicts the connection from both
//!   maps and closes the transport.
//!
//! Note the authentication stance: a verified token proves control of the
//! key registered under its `kid`, and the claim subject is taken verbatim
//! as the profile id. Ownership proof is deferred to the identity layer.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use strata_events::{Bus, Event};
use strata_token::KeyStore;

/// Path the channel is mounted at.
pub const EVENTS_PATH: &str = "/events";

/// Fixed subprotocol identifier clients must speak.
pub const SUBPROTOCOL: &str = "strata-events";

struct Connection {
    tx: mpsc::UnboundedSender<Message>,
    profile_id: Option<String>,
}

/// Shared state of the push channel. Two maps, each behind its own lock;
/// a connection enters `conns` before `subscriptions` and leaves in the
/// opposite order. The locks are never held together.
pub struct EventChannel {
    keystore: Arc<KeyStore>,
    conns: Mutex<HashMap<Uuid, Connection>>,
    subscriptions: Mutex<HashMap<String, HashSet<Uuid>>>,
}

impl EventChannel {
    /// Create a channel and subscribe it to every bus event.
    pub async fn attach(keystore: Arc<KeyStore>, bus: &Bus) -> Arc<Self> {
        let channel = Arc::new(Self {
            keystore,
            conns: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
        });
        let fan = channel.clone();
        bus.subscribe(move |event: Arc<Event>| {
            let fan = fan.clone();
            async move { fan.fan_out(&event) }
        })
        .await;
        channel
    }

    /// Router fragment mounting the channel at [`EVENTS_PATH`].
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route(EVENTS_PATH, get(upgrade_handler))
            .with_state(self.clone())
    }

    /// Forward one bus event to every connection subscribed under its
    /// originating profile. Events with no profile are node-internal and
    /// dropped here.
    fn fan_out(&self, event: &Event) {
        if event.profile_id.is_empty() {
            return;
        }
        let targets: Vec<Uuid> = {
            let subs = self.subscriptions.lock().expect("subscriptions lock");
            match subs.get(&event.profile_id) {
                Some(ids) => ids.iter().copied().collect(),
                None => return,
            }
        };
        let frame = match serde_json::to_string(event) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "encoding event frame");
                return;
            }
        };
        let mut dead = Vec::new();
        {
            let conns = self.conns.lock().expect("conns lock");
            for cid in targets {
                match conns.get(&cid) {
                    Some(conn) if conn.tx.send(Message::Text(frame.clone().into())).is_ok() => {}
                    _ => dead.push(cid),
                }
            }
        }
        for cid in dead {
            self.remove(cid);
        }
    }

    fn accept(&self, cid: Uuid, tx: mpsc::UnboundedSender<Message>) {
        self.conns.lock().expect("conns lock").insert(
            cid,
            Connection {
                tx,
                profile_id: None,
            },
        );
    }

    fn subscribe_conn(&self, cid: Uuid, profile_id: String) {
        // A re-subscribe under a new identity leaves the old set first.
        self.unsubscribe_conn(cid);
        {
            let mut conns = self.conns.lock().expect("conns lock");
            let Some(conn) = conns.get_mut(&cid) else {
                return;
            };
            conn.profile_id = Some(profile_id.clone());
        }
        self.subscriptions
            .lock()
            .expect("subscriptions lock")
            .entry(profile_id)
            .or_default()
            .insert(cid);
    }

    fn unsubscribe_conn(&self, cid: Uuid) {
        let profile_id = {
            let conns = self.conns.lock().expect("conns lock");
            conns.get(&cid).and_then(|c| c.profile_id.clone())
        };
        let Some(profile_id) = profile_id else {
            return;
        };
        {
            let mut subs = self.subscriptions.lock().expect("subscriptions lock");
            if let Some(ids) = subs.get_mut(&profile_id) {
                ids.remove(&cid);
                if ids.is_empty() {
                    subs.remove(&profile_id);
                }
            }
        }
        if let Some(conn) = self.conns.lock().expect("conns lock").get_mut(&cid) {
            conn.profile_id = None;
        }
    }

    /// Full eviction: subscription set first, then the connection record.
    fn remove(&self, cid: Uuid) {
        self.unsubscribe_conn(cid);
        self.conns.lock().expect("conns lock").remove(&cid);
    }

    pub fn connection_count(&self) -> usize {
        self.conns.lock().expect("conns lock").len()
    }

    pub fn subscriber_count(&self, profile_id: &str) -> usize {
        self.subscriptions
            .lock()
            .expect("subscriptions lock")
            .get(profile_id)
            .map(|ids| ids.len())
            .unwrap_or(0)
    }

    /// Whether the two maps agree: `cid ∈ subscriptions[pid]` exactly when
    /// `conns[cid].profile_id == pid`.
    pub fn is_consistent(&self) -> bool {
        let conns: HashMap<Uuid, Option<String>> = {
            self.conns
                .lock()
                .expect("conns lock")
                .iter()
                .map(|(cid, c)| (*cid, c.profile_id.clone()))
                .collect()
        };
        let subs: HashMap<String, HashSet<Uuid>> = {
            self.subscriptions
                .lock()
                .expect("subscriptions lock")
                .clone()
        };
        for (pid, ids) in &subs {
            for cid in ids {
                if conns.get(cid).map(|p| p.as_deref()) != Some(Some(pid.as_str())) {
                    return false;
                }
            }
        }
        for (cid, profile) in &conns {
            if let Some(pid) = profile {
                if !subs.get(pid).is_some_and(|ids| ids.contains(cid)) {
                    return false;
                }
            }
        }
        true
    }

    async fn run_connection(self: Arc<Self>, socket: WebSocket) {
        let cid = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        self.accept(cid, tx.clone());
        debug!(%cid, "event channel connection accepted");

        let (mut sink, mut stream) = socket.split();
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => self.handle_frame(cid, text.as_str(), &tx),
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }

        self.remove(cid);
        writer.abort();
        debug!(%cid, "event channel connection closed");
    }

    fn handle_frame(&self, cid: Uuid, raw: &str, tx: &mpsc::UnboundedSender<Message>) {
        let frame: ClientFrame = match serde_json::from_str(raw) {
            Ok(f) => f,
            Err(e) => {
                debug!(%cid, error = %e, "unreadable client frame");
                return;
            }
        };
        match frame.type_.as_str() {
            "subscribe:request" => {
                let token = frame
                    .payload
                    .get("token")
                    .and_then(|t| t.as_str())
                    .unwrap_or_default();
                match strata_token::verify(token, &self.keystore) {
                    Ok(claims) => {
                        self.subscribe_conn(cid, claims.profile_id.clone());
                        debug!(%cid, profile = %claims.profile_id, "subscribed");
                        reply(tx, json!({"type": "subscribe:success"}));
                    }
                    Err(e) => {
                        debug!(%cid, error = %e, "subscribe refused");
                        reply(
                            tx,
                            json!({"type": "subscribe:failure", "error": e.to_string()}),
                        );
                    }
                }
            }
            "unsubscribe:request" => {
                self.unsubscribe_conn(cid);
            }
            other => {
                debug!(%cid, frame = other, "ignoring unknown frame type");
            }
        }
    }
}

fn reply(tx: &mpsc::UnboundedSender<Message>, body: Value) {
    let _ = tx.send(Message::Text(body.to_string().into()));
}

#[derive(Debug, Deserialize)]
struct ClientFrame {
    #[serde(rename = "type")]
    type_: String,
    #[serde(default)]
    payload: Value,
}

async fn upgrade_handler(
    State(channel): State<Arc<EventChannel>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.protocols([SUBPROTOCOL])
        .on_upgrade(move |socket| channel.run_connection(socket))
}
