//! In-process HTTP test client wrapping an axum `Router`.
//!
//! Uses `tower::ServiceExt::oneshot` to dispatch requests without binding
//! to a TCP port, and understands the `{ data, meta }` envelope strata's
//! bridge speaks.

use axum::body::Body;
use axum::Router;
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use strata_http::Envelope;
use tower::util::ServiceExt;

pub struct TestApp {
    router: Router,
}

impl TestApp {
    /// Create a `TestApp` from an assembled `axum::Router`.
    pub fn new(router: Router) -> Self {
        Self { router }
    }

    /// Send an arbitrary request.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("failed to send request");

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("failed to read response body")
            .to_bytes();

        TestResponse { status, body }
    }

    /// Send a GET request to the given path (query string included).
    pub async fn get(&self, path: &str) -> TestResponse {
        let req = Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())
            .unwrap();
        self.send(req).await
    }

    /// Send a POST request with a JSON body.
    pub async fn post_json(&self, path: &str, body: &impl serde::Serialize) -> TestResponse {
        let json = serde_json::to_vec(body).unwrap();
        let req = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(json))
            .unwrap();
        self.send(req).await
    }

    /// Send a POST request with a JSON body and a Bearer token.
    pub async fn post_json_authenticated(
        &self,
        path: &str,
        body: &impl serde::Serialize,
        token: &str,
    ) -> TestResponse {
        let json = serde_json::to_vec(body).unwrap();
        let req = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::from(json))
            .unwrap();
        self.send(req).await
    }

    /// Send a POST request with a form-urlencoded body.
    pub async fn post_form(&self, path: &str, pairs: &[(&str, &str)]) -> TestResponse {
        let mut ser = form_urlencoded::Serializer::new(String::new());
        for (k, v) in pairs {
            ser.append_pair(k, v);
        }
        let req = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(ser.finish()))
            .unwrap();
        self.send(req).await
    }

    /// Send a POST request with a JSON body and an extra header.
    pub async fn post_json_with_header(
        &self,
        path: &str,
        body: &impl serde::Serialize,
        header: (&str, &str),
    ) -> TestResponse {
        let json = serde_json::to_vec(body).unwrap();
        let req = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(CONTENT_TYPE, "application/json")
            .header(header.0, header.1)
            .body(Body::from(json))
            .unwrap();
        self.send(req).await
    }
}

/// A buffered response: status plus body, with envelope-aware accessors.
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json<T: DeserializeOwned>(&self) -> T {
        serde_json::from_slice(&self.body).expect("response body is not valid JSON")
    }

    /// Parse the body as a response envelope.
    pub fn envelope(&self) -> Envelope {
        self.json()
    }

    /// Unwrap the envelope's `data` into a typed value, panicking on error
    /// envelopes.
    pub fn data<T: DeserializeOwned>(&self) -> T {
        let env = self.envelope();
        assert!(
            env.ok(),
            "error envelope: {:?}",
            env.meta.error.as_deref().unwrap_or("unknown")
        );
        serde_json::from_value(env.data).expect("envelope data has unexpected shape")
    }

    /// The envelope's error message, panicking on success envelopes.
    pub fn error_message(&self) -> String {
        let env = self.envelope();
        env.meta.error.expect("envelope reports no error")
    }
}
