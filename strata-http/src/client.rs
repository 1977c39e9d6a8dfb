use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::cursor::Cursor;
use crate::envelope::Envelope;
use crate::error::{Error, ErrorKind};
use crate::Verb;

/// Outcome of a bridge call: the decoded payload plus whatever pagination
/// and warning metadata rode along in the envelope.
#[derive(Debug)]
pub struct CallResult<O> {
    pub value: O,
    pub cursor: Option<Cursor>,
    pub warnings: Vec<String>,
}

/// HTTP client for the bridge: encodes method calls as JSON requests against
/// a sibling strata process and unwraps the `{ data, meta }` envelope.
#[derive(Debug, Clone)]
pub struct BridgeClient {
    base: String,
    http: reqwest::Client,
}

impl BridgeClient {
    /// Construct a client from a node address.
    ///
    /// Accepts `host:port`, a full `http(s)://` URL, or the multiaddress
    /// form `/ip4/<host>/tcp/<port>[/https]`. When the address names a
    /// protocol, https wins over http.
    pub fn new(addr: &str) -> Result<Self, Error> {
        let base = normalize_address(addr)?;
        Ok(Self {
            base,
            http: reqwest::Client::new(),
        })
    }

    /// The normalized `scheme://host[:port]` this client talks to.
    pub fn address(&self) -> &str {
        &self.base
    }

    /// Call a bridge endpoint and decode the envelope's `data` into `O`.
    pub async fn call_method<P, O>(
        &self,
        token: Option<&str>,
        verb: Verb,
        endpoint: &str,
        params: &P,
    ) -> Result<CallResult<O>, Error>
    where
        P: Serialize,
        O: DeserializeOwned,
    {
        let (status, body) = self.send(token, verb, endpoint, params).await?;
        let envelope = parse_envelope(status, &body)?;
        check(status, &envelope, &body)?;

        let value = serde_json::from_value(envelope.data)
            .map_err(|e| Error::internal(format!("decoding response for {endpoint}: {e}")))?;
        Ok(CallResult {
            value,
            cursor: envelope.pagination.map(|p| p.next_cursor),
            warnings: envelope.meta.warnings,
        })
    }

    /// Call a bridge endpoint and return the response body verbatim.
    ///
    /// Used for binary formats (zip archives, rendered HTML, CSV bodies)
    /// that never ride inside the JSON envelope. The status check still
    /// applies; failed responses are parsed for an envelope error message.
    pub async fn call_raw<P: Serialize>(
        &self,
        token: Option<&str>,
        verb: Verb,
        endpoint: &str,
        params: &P,
    ) -> Result<Bytes, Error> {
        let (status, body) = self.send(token, verb, endpoint, params).await?;
        if !(200..300).contains(&status) {
            let message = serde_json::from_slice::<Envelope>(&body)
                .ok()
                .and_then(|env| env.meta.error)
                .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());
            return Err(Error::new(ErrorKind::from_status(status), message));
        }
        Ok(body)
    }

    async fn send<P: Serialize>(
        &self,
        token: Option<&str>,
        verb: Verb,
        endpoint: &str,
        params: &P,
    ) -> Result<(u16, Bytes), Error> {
        let url = format!("{}{}", self.base, endpoint);
        let method = match verb {
            Verb::Get => reqwest::Method::GET,
            Verb::Post => reqwest::Method::POST,
            Verb::Put => reqwest::Method::PUT,
        };

        let mut req = self
            .http
            .request(method, &url)
            .header(http::header::CONTENT_TYPE.as_str(), "application/json")
            .header(http::header::ACCEPT.as_str(), "application/json");

        if verb.has_body() {
            req = req.json(params);
        } else {
            req = req.query(&query_pairs(params)?);
        }

        match token {
            Some(t) => req = req.bearer_auth(t),
            None => warn!(endpoint, "bridge call without auth token"),
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::dependency(format!("calling {url}: {e}")))?;
        let status = resp.status().as_u16();
        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::dependency(format!("reading response from {url}: {e}")))?;
        Ok((status, body))
    }
}

fn parse_envelope(status: u16, body: &Bytes) -> Result<Envelope, Error> {
    serde_json::from_slice(body).map_err(|_| {
        let text = String::from_utf8_lossy(body).into_owned();
        let message = if text.is_empty() {
            format!("empty response with status {status}")
        } else {
            text
        };
        Error::new(ErrorKind::from_status(status), message)
    })
}

/// The call failed when meta.code is outside 200-299, or when the HTTP
/// status is. The error message comes from meta.error when present, else
/// the raw body.
fn check(status: u16, envelope: &Envelope, body: &Bytes) -> Result<(), Error> {
    if envelope.ok() && (200..300).contains(&status) {
        return Ok(());
    }
    let code = if envelope.ok() { status } else { envelope.meta.code };
    let message = envelope
        .meta
        .error
        .clone()
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());
    Err(Error::new(ErrorKind::from_status(code), message))
}

/// Flatten params into query pairs for bodyless verbs. Scalars stringify,
/// arrays repeat the key, null and empty-object fields are skipped.
fn query_pairs<P: Serialize>(params: &P) -> Result<Vec<(String, String)>, Error> {
    let value = serde_json::to_value(params)
        .map_err(|e| Error::internal(format!("encoding query params: {e}")))?;
    let map = match value {
        Value::Object(map) => map,
        Value::Null => return Ok(Vec::new()),
        other => {
            return Err(Error::internal(format!(
                "query params must be an object, got {other}"
            )))
        }
    };
    let mut pairs = Vec::new();
    for (key, value) in map {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    pairs.push((key.clone(), scalar_text(&item)));
                }
            }
            other => pairs.push((key, scalar_text(&other))),
        }
    }
    Ok(pairs)
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn normalize_address(addr: &str) -> Result<String, Error> {
    let addr = addr.trim().trim_end_matches('/');
    if addr.is_empty() {
        return Err(Error::bad_request("empty node address"));
    }
    if addr.starts_with("http://") || addr.starts_with("https://") {
        return Ok(addr.to_string());
    }
    if addr.starts_with('/') {
        return parse_multiaddr(addr);
    }
    Ok(format!("http://{addr}"))
}

/// Minimal multiaddress support: `/ip4/<host>/tcp/<port>` with an optional
/// trailing `/https` or `/tls` component selecting the scheme.
fn parse_multiaddr(addr: &str) -> Result<String, Error> {
    let parts: Vec<&str> = addr.split('/').filter(|p| !p.is_empty()).collect();
    let mut host = None;
    let mut port = None;
    let mut https = false;
    let mut iter = parts.iter().peekable();
    while let Some(part) = iter.next() {
        match *part {
            "ip4" | "ip6" | "dns" | "dns4" | "dns6" => {
                host = iter.next().copied();
            }
            "tcp" => {
                port = iter.next().copied();
            }
            "https" | "tls" => https = true,
            "http" => {}
            other => {
                return Err(Error::bad_request(format!(
                    "unrecognized multiaddress component {other:?} in {addr:?}"
                )))
            }
        }
    }
    let host = host.ok_or_else(|| Error::bad_request(format!("no host in address {addr:?}")))?;
    let scheme = if https { "https" } else { "http" };
    match port {
        Some(p) => Ok(format!("{scheme}://{host}:{p}")),
        None => Ok(format!("{scheme}://{host}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_bare_host_port() {
        assert_eq!(
            normalize_address("127.0.0.1:2503").unwrap(),
            "http://127.0.0.1:2503"
        );
    }

    #[test]
    fn keeps_explicit_scheme() {
        assert_eq!(
            normalize_address("https://node.example.com/").unwrap(),
            "https://node.example.com"
        );
    }

    #[test]
    fn parses_multiaddress() {
        assert_eq!(
            normalize_address("/ip4/127.0.0.1/tcp/2503").unwrap(),
            "http://127.0.0.1:2503"
        );
        assert_eq!(
            normalize_address("/dns4/node.example.com/tcp/443/https").unwrap(),
            "https://node.example.com:443"
        );
    }

    #[test]
    fn rejects_garbage_multiaddress() {
        assert!(normalize_address("/carrier-pigeon/loft").is_err());
    }

    #[derive(Serialize)]
    struct GetQuery {
        r#ref: String,
        limit: usize,
        filter: Vec<String>,
        format: Option<String>,
    }

    #[test]
    fn query_pairs_flatten_scalars_and_arrays() {
        let pairs = query_pairs(&GetQuery {
            r#ref: "me/ds".to_string(),
            limit: 25,
            filter: vec!["a".to_string(), "b".to_string()],
            format: None,
        })
        .unwrap();
        assert!(pairs.contains(&("ref".to_string(), "me/ds".to_string())));
        assert!(pairs.contains(&("limit".to_string(), "25".to_string())));
        assert_eq!(pairs.iter().filter(|(k, _)| k == "filter").count(), 2);
        assert!(!pairs.iter().any(|(k, _)| k == "format"));
    }
}
