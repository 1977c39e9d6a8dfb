//! The request/response bridge: one route per registered method, generic
//! decoding into the method's input type, and `{ data, meta }` envelope
//! responses.

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::Value;

use strata_core::{Context, Error, Instance, Source, Verb, WireRequest};
use strata_http::Envelope;

/// Build a router exposing every registered method with a non-empty
/// endpoint, bound to its declared verb.
pub fn bridge_router(inst: &Instance) -> Router {
    let mut router = Router::new();
    for descriptor in inst.registry().descriptors() {
        let Some((verb, endpoint)) = descriptor.exposure() else {
            continue;
        };
        let name = descriptor.name().to_string();
        let inst = inst.clone();
        let handler = move |req: Request| serve_method(inst.clone(), name.clone(), verb, req);
        let route = match verb {
            Verb::Get => get(handler),
            Verb::Post => post(handler),
            Verb::Put => put(handler),
        };
        router = router.route(endpoint, route);
    }
    router
}

async fn serve_method(inst: Instance, name: String, verb: Verb, req: Request) -> Response {
    match handle(inst, &name, verb, req).await {
        Ok(response) => response,
        Err(err) => error_response(&err),
    }
}

async fn handle(
    inst: Instance,
    name: &str,
    verb: Verb,
    req: Request,
) -> Result<Response, Error> {
    let (parts, body) = req.into_parts();

    let ctx = authenticate(&inst, &parts.headers)?;
    let dispatcher = source_scoped(&inst, &parts.headers)?;

    let mut form: Vec<(String, String)> = parts
        .uri
        .query()
        .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    let mut json_body = None;
    if verb.has_body() {
        let bytes = axum::body::to_bytes(body, BODY_LIMIT)
            .await
            .map_err(|e| Error::bad_request(format!("reading request body: {e}")))?;
        match content_type(&parts.headers) {
            Some(ct) if ct.starts_with("application/json") => {
                // Empty bodies are tolerated; the input keeps its defaults.
                json_body = if bytes.is_empty() {
                    Some(Value::Null)
                } else {
                    Some(serde_json::from_slice(&bytes).map_err(|e| {
                        Error::bad_request(format!("decoding request body: {e}"))
                    })?)
                };
            }
            Some(ct) if ct.starts_with("application/x-www-form-urlencoded") => {
                form.extend(form_urlencoded::parse(&bytes).into_owned());
            }
            _ => {}
        }
    }

    let wire = WireRequest {
        verb,
        json_body,
        form,
        accept: parts
            .headers
            .get(axum::http::header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };

    let outcome = dispatcher.dispatch_wire(&ctx, name, wire).await?;
    let envelope = match outcome.cursor {
        Some(cursor) => Envelope::paged(outcome.value, cursor, outcome.warnings),
        None => Envelope::data(outcome.value, outcome.warnings),
    };
    Ok(Json(envelope).into_response())
}

const BODY_LIMIT: usize = 16 * 1024 * 1024;

/// A bearer token, when present, must verify against the key store; absent
/// tokens leave the call anonymous.
fn authenticate(inst: &Instance, headers: &HeaderMap) -> Result<Context, Error> {
    let Some(raw) = headers.get(AUTHORIZATION) else {
        return Ok(inst.context());
    };
    let token = raw
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| Error::unauthorized("malformed authorization header"))?;
    strata_token::verify(token, &inst.keystore())
        .map_err(|e| Error::unauthorized(e.to_string()))?;
    Ok(inst.context().with_token(token))
}

/// The designated source header scopes the dispatcher for this call.
fn source_scoped(
    inst: &Instance,
    headers: &HeaderMap,
) -> Result<strata_core::Dispatcher, Error> {
    match headers
        .get(inst.source_header())
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
    {
        Some(raw) => Ok(inst.dispatcher().with_source(Source::parse(raw)?)),
        None => Ok(inst.dispatcher()),
    }
}

fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
}

fn error_response(err: &Error) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = Body::from(
        serde_json::to_vec(&Envelope::error(err)).unwrap_or_else(|_| b"{}".to_vec()),
    );
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .unwrap_or_else(|_| status.into_response())
}
