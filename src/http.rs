//! HTTP transport for the Pathbird REST API.
//!
//! Every request carries the client identifier (`User-Agent`) and, when a
//! credential is available, a bearer token. Responses are captured into an
//! [`ApiResponse`] so classification can happen without a live connection.

use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Body, Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::Credential;

pub const CLIENT_NAME: &str = "pbauthor";

/// Error code the server never sends itself; synthesized for bare HTTP 413s.
pub const PAYLOAD_TOO_LARGE: &str = "PayloadTooLarge";

const MAX_UNSTRUCTURED_BODY: usize = 512;

/// Non-JSON bodies are only ever shown truncated, so only this much is read.
const MAX_TEXT_BODY_BYTES: usize = 4 * 1024;
const MAX_JSON_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request to api failed")]
    Transport(#[source] reqwest::Error),

    #[error("You are not logged in (try running `pbauthor auth login`)")]
    Unauthenticated,

    #[error("{0}")]
    ClientUnsupported(String),

    #[error("upload rejected as too large: {message}")]
    PayloadTooLarge { message: String },

    #[error("API returned an error: {error}: {message}")]
    Api {
        status: StatusCode,
        error: String,
        message: String,
    },

    #[error("API returned an unknown error (HTTP {status})")]
    Unknown { status: StatusCode },

    #[error("api endpoint ({route}) returned error status {status}: {body}")]
    Unstructured {
        route: String,
        status: StatusCode,
        body: String,
    },

    #[error("malformed api response from {route}: {reason}")]
    Malformed { route: String, reason: String },
}

pub fn user_agent() -> String {
    format!("{CLIENT_NAME}/{}", crate::CLI_VERSION)
}

pub fn build_http_client() -> Result<Client, reqwest::Error> {
    Client::builder().user_agent(user_agent()).build()
}

/// Client for `{host}/api/...` routes.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    host: String,
    credential: Option<Credential>,
}

impl ApiClient {
    pub fn new(host: &str, credential: Option<Credential>) -> Result<Self, ApiError> {
        debug!(host, "creating API client");
        Ok(Self {
            http: build_http_client().map_err(ApiError::Transport)?,
            host: host.trim_end_matches('/').to_string(),
            credential,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn url(&self, route: &str) -> String {
        format!("{}/api/{}", self.host, route.trim_start_matches('/'))
    }

    fn request(&self, method: Method, route: &str) -> RequestBuilder {
        let request = self.http.request(method, self.url(route));
        match &self.credential {
            Some(credential) => request.bearer_auth(&credential.token),
            None => request,
        }
    }

    async fn send(&self, route: &str, request: RequestBuilder) -> Result<Response, ApiError> {
        debug!(route, "sending api request");
        let response = request.send().await.map_err(ApiError::Transport)?;
        debug!(route, status = %response.status(), "got api response");
        Ok(response)
    }

    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        route: &str,
        body: &B,
    ) -> Result<ApiResponse, ApiError> {
        let request = self.request(Method::POST, route).json(body);
        let response = self.send(route, request).await?;
        ApiResponse::read(route, response).await
    }

    /// Sends a streaming body and returns as soon as the response head is in,
    /// possibly before the body has been fully consumed by the server.
    pub async fn post_body(
        &self,
        route: &str,
        content_type: &str,
        body: Body,
    ) -> Result<Response, ApiError> {
        let request = self
            .request(Method::POST, route)
            .header(CONTENT_TYPE, content_type)
            .body(body);
        self.send(route, request).await
    }
}

/// A fully read response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub route: String,
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    cookies: Vec<(String, String)>,
}

impl ApiResponse {
    pub fn new(
        route: &str,
        status: StatusCode,
        content_type: Option<&str>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            route: route.to_string(),
            status,
            content_type: content_type.map(str::to_string),
            body: body.into(),
            cookies: Vec::new(),
        }
    }

    pub async fn read(route: &str, response: Response) -> Result<Self, ApiError> {
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v: &HeaderValue| v.to_str().ok())
            .map(str::to_string);
        let cookies = response
            .cookies()
            .map(|c| (c.name().to_string(), c.value().to_string()))
            .collect();

        let is_json = content_type.as_deref().is_some_and(is_json_content_type);
        let limit = if is_json {
            MAX_JSON_BODY_BYTES
        } else {
            MAX_TEXT_BODY_BYTES
        };
        let (body, truncated) = read_limited(response, limit)
            .await
            .map_err(ApiError::Transport)?;
        if truncated && is_json {
            return Err(ApiError::Malformed {
                route: route.to_string(),
                reason: format!("response body exceeds {limit} bytes"),
            });
        }
        if truncated {
            debug!(route, limit, "truncated non-json response body");
        }

        Ok(Self {
            cookies,
            ..Self::new(route, status, content_type.as_deref(), body)
        })
    }

    pub fn is_success(&self) -> bool {
        self.status.as_u16() < 400
    }

    pub fn is_json(&self) -> bool {
        self.content_type.as_deref().is_some_and(is_json_content_type)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body).map_err(|err| self.malformed(format!("invalid json: {err}")))
    }

    pub fn malformed(&self, reason: impl Into<String>) -> ApiError {
        ApiError::Malformed {
            route: self.route.clone(),
            reason: reason.into(),
        }
    }

    /// Decodes the error payload of a failed response.
    ///
    /// JSON bodies must carry an `error` key. A non-JSON 413 is turned into a
    /// [`PAYLOAD_TOO_LARGE`] body because proxies reject oversized uploads
    /// before the API can answer; any other non-JSON body is `Unstructured`.
    pub fn error_body(&self) -> Result<ErrorBody, ApiError> {
        if self.is_json() {
            let raw: RawErrorBody = self.json()?;
            let error = raw
                .error
                .ok_or_else(|| self.malformed("api error response did not include \"error\" key"))?;
            return Ok(ErrorBody {
                error,
                message: raw.message.or(raw.description).unwrap_or_default(),
                details: raw.details,
            });
        }

        if self.status == StatusCode::PAYLOAD_TOO_LARGE {
            return Ok(ErrorBody {
                error: PAYLOAD_TOO_LARGE.to_string(),
                message: "the upload exceeds the maximum request size accepted by the server"
                    .to_string(),
                details: serde_json::Value::Null,
            });
        }

        let text = String::from_utf8_lossy(&self.body);
        let mut body: String = text.trim().chars().take(MAX_UNSTRUCTURED_BODY).collect();
        if body.is_empty() {
            body = self
                .status
                .canonical_reason()
                .unwrap_or("<empty body>")
                .to_string();
        }
        Err(ApiError::Unstructured {
            route: self.route.clone(),
            status: self.status,
            body,
        })
    }
}

/// Reads at most `limit` bytes of the body. The flag is set when more was
/// available.
async fn read_limited(mut response: Response, limit: usize) -> Result<(Vec<u8>, bool), reqwest::Error> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let room = limit - body.len();
        if chunk.len() > room {
            body.extend_from_slice(&chunk[..room]);
            return Ok((body, true));
        }
        body.extend_from_slice(&chunk);
    }
    Ok((body, false))
}

#[derive(Debug, Deserialize)]
struct RawErrorBody {
    error: Option<String>,
    message: Option<String>,
    description: Option<String>,
    #[serde(default)]
    details: serde_json::Value,
}

/// Structured error payload: `{error, message, details}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub details: serde_json::Value,
}

impl ErrorBody {
    /// Maps the generic error codes onto [`ApiError`]. Endpoint-specific codes
    /// should be handled by the caller before falling back to this.
    pub fn into_api_error(self, status: StatusCode) -> ApiError {
        match self.error.as_str() {
            "ErrUnauthenticated" => {
                debug!(message = %self.message, "got ErrUnauthenticated");
                ApiError::Unauthenticated
            }
            "ErrClientUnsupported" => {
                debug!(message = %self.message, "got ErrClientUnsupported");
                ApiError::ClientUnsupported(self.message)
            }
            PAYLOAD_TOO_LARGE => ApiError::PayloadTooLarge {
                message: self.message,
            },
            "" => ApiError::Unknown { status },
            _ => ApiError::Api {
                status,
                error: self.error,
                message: self.message,
            },
        }
    }
}

pub fn is_json_content_type(content_type: &str) -> bool {
    let media = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    media == "application/json" || (media.starts_with("application/") && media.ends_with("+json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{serve_once, Respond, StubResponse};

    fn check_status(response: &ApiResponse) -> Result<(), ApiError> {
        if response.is_success() {
            return Ok(());
        }
        Err(response.error_body()?.into_api_error(response.status))
    }

    fn json_response(status: u16, body: &str) -> ApiResponse {
        ApiResponse::new(
            "author/test",
            StatusCode::from_u16(status).unwrap(),
            Some("application/json; charset=utf-8"),
            body,
        )
    }

    #[test]
    fn json_content_types() {
        assert!(is_json_content_type("application/json"));
        assert!(is_json_content_type("Application/JSON; charset=utf-8"));
        assert!(is_json_content_type("application/problem+json"));
        assert!(!is_json_content_type("text/html"));
        assert!(!is_json_content_type(""));
    }

    #[test]
    fn unauthenticated_maps_to_login_hint() {
        let response = json_response(401, r#"{"error":"ErrUnauthenticated"}"#);
        let err = check_status(&response).unwrap_err();
        assert!(matches!(err, ApiError::Unauthenticated));
        assert!(err.to_string().contains("not logged in"));
    }

    #[test]
    fn unsupported_client_message_is_verbatim() {
        let response = json_response(
            400,
            r#"{"error":"ErrClientUnsupported","message":"please upgrade pbauthor"}"#,
        );
        let err = check_status(&response).unwrap_err();
        assert_eq!(err.to_string(), "please upgrade pbauthor");
    }

    #[test]
    fn unrecognized_codes_keep_error_and_message() {
        let response = json_response(409, r#"{"error":"ErrConflict","message":"busy"}"#);
        let err = check_status(&response).unwrap_err();
        assert!(matches!(&err, ApiError::Api { status, .. } if status.as_u16() == 409));
        assert_eq!(err.to_string(), "API returned an error: ErrConflict: busy");
    }

    #[test]
    fn legacy_description_field_is_used_as_message() {
        let response = json_response(403, r#"{"error":"ErrForbidden","description":"nope"}"#);
        let body = response.error_body().unwrap();
        assert_eq!(body.message, "nope");
    }

    #[test]
    fn empty_error_code_is_unknown() {
        let response = json_response(500, r#"{"error":""}"#);
        assert!(matches!(
            check_status(&response).unwrap_err(),
            ApiError::Unknown { .. }
        ));
    }

    #[test]
    fn json_error_without_error_key_is_malformed() {
        let response = json_response(500, r#"{"message":"boom"}"#);
        assert!(matches!(
            check_status(&response).unwrap_err(),
            ApiError::Malformed { .. }
        ));
    }

    #[test]
    fn bare_413_is_synthesized_as_structured() {
        let response = ApiResponse::new(
            "author/upload-codex",
            StatusCode::PAYLOAD_TOO_LARGE,
            Some("text/html"),
            "<html>413 Request Entity Too Large</html>",
        );
        let body = response.error_body().unwrap();
        assert_eq!(body.error, PAYLOAD_TOO_LARGE);

        let err = body.into_api_error(response.status);
        assert!(matches!(err, ApiError::PayloadTooLarge { .. }));
    }

    #[test]
    fn non_json_errors_are_unstructured() {
        let response = ApiResponse::new(
            "author/upload-codex",
            StatusCode::BAD_GATEWAY,
            Some("text/plain"),
            "upstream unavailable",
        );
        match check_status(&response).unwrap_err() {
            ApiError::Unstructured { status, body, .. } => {
                assert_eq!(status, StatusCode::BAD_GATEWAY);
                assert_eq!(body, "upstream unavailable");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn success_statuses_pass() {
        let response = ApiResponse::new("x", StatusCode::FOUND, None, "");
        assert!(check_status(&response).is_ok());
    }

    #[test]
    fn urls_are_rooted_under_api() {
        let client = ApiClient::new("https://pathbird.test/", None).unwrap();
        assert_eq!(
            client.url("author/upload-codex"),
            "https://pathbird.test/api/author/upload-codex"
        );
        assert_eq!(client.url("/auth/login"), "https://pathbird.test/api/auth/login");
    }

    #[tokio::test]
    async fn large_text_error_body_is_read_partially() {
        let body = "gateway exploded ".repeat(64 * 1024);
        let (url, server) = serve_once(
            StubResponse {
                status: 502,
                headers: vec![("Content-Type".into(), "text/html".into())],
                body,
            },
            Respond::AfterBody,
        )
        .await;

        let client = ApiClient::new(&url, None).unwrap();
        let response = client.post_json("author/test", &serde_json::json!({})).await.unwrap();
        // The unread remainder can fail the stub's write once the client hangs up.
        server.abort();

        assert_eq!(response.body.len(), MAX_TEXT_BODY_BYTES);
        match response.error_body() {
            Err(ApiError::Unstructured { body, .. }) => {
                assert_eq!(body.chars().count(), MAX_UNSTRUCTURED_BODY);
                assert!(body.starts_with("gateway exploded"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
