//! Minimal GraphQL client for `{host}/graphql`.

mod model;
pub mod query;

pub use model::{CodexBuild, CodexCategory, Course};

use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::auth::Credential;
use crate::http::{build_http_client, ApiClient};
use query::{QueryError, QueryText};

#[derive(Debug, thiserror::Error)]
pub enum GraphQlError {
    #[error("not logged in (run `pbauthor auth login` first)")]
    NotAuthenticated,

    #[error("graphql request failed")]
    Transport(#[source] reqwest::Error),

    #[error("graphql endpoint returned HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("graphql query failed: {}", .messages.join("; "))]
    Response { messages: Vec<String> },

    #[error("invalid graphql query")]
    Query(#[from] QueryError),

    #[error("variable ${0} is not declared by the query")]
    UndeclaredVariable(String),

    #[error("required variable ${0} has no value")]
    UnboundVariable(String),

    #[error("failed to encode graphql variable ${name}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode graphql response")]
    Decode(#[source] serde_json::Error),

    #[error("graphql response did not include data")]
    MissingData,

    #[error("{0}")]
    NotFound(String),
}

/// A query plus the values bound to its variables.
#[derive(Debug)]
pub struct GraphQlRequest<'q> {
    query: &'q QueryText,
    variables: Map<String, Value>,
}

impl<'q> GraphQlRequest<'q> {
    pub fn new(query: &'q QueryText) -> Self {
        Self {
            query,
            variables: Map::new(),
        }
    }

    pub fn var(mut self, name: &str, value: impl Serialize) -> Result<Self, GraphQlError> {
        if self.query.variable(name).is_none() {
            return Err(GraphQlError::UndeclaredVariable(name.to_string()));
        }
        let value = serde_json::to_value(value).map_err(|source| GraphQlError::Encode {
            name: name.to_string(),
            source,
        })?;
        self.variables.insert(name.to_string(), value);
        Ok(self)
    }

    fn check_bound(&self) -> Result<(), GraphQlError> {
        for var in &self.query.variables {
            let bound = self
                .variables
                .get(&var.name)
                .is_some_and(|value| !value.is_null());
            if var.is_required() && !bound {
                return Err(GraphQlError::UnboundVariable(var.name.clone()));
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct RequestBody<'a> {
    query: &'a str,
    variables: &'a Map<String, Value>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

#[derive(Deserialize)]
struct ErrorEntry {
    message: String,
}

#[derive(Clone)]
pub struct GraphQlClient {
    http: Client,
    endpoint: String,
    credential: Option<Credential>,
}

impl GraphQlClient {
    pub fn new(host: &str, credential: Option<Credential>) -> Result<Self, GraphQlError> {
        Ok(Self {
            http: build_http_client().map_err(GraphQlError::Transport)?,
            endpoint: format!("{}/graphql", host.trim_end_matches('/')),
            credential,
        })
    }

    /// Shares the connection pool and credential of an [`ApiClient`].
    pub fn from_api(api: &ApiClient) -> Self {
        Self {
            http: api.http().clone(),
            endpoint: format!("{}/graphql", api.host()),
            credential: api.credential().cloned(),
        }
    }

    pub async fn run<T: DeserializeOwned>(
        &self,
        request: GraphQlRequest<'_>,
    ) -> Result<T, GraphQlError> {
        let credential = self
            .credential
            .as_ref()
            .ok_or(GraphQlError::NotAuthenticated)?;
        request.check_bound()?;

        debug!(endpoint = %self.endpoint, "sending graphql request");
        let response = self
            .http
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("Bearer {}", credential.token))
            .json(&RequestBody {
                query: &request.query.text,
                variables: &request.variables,
            })
            .send()
            .await
            .map_err(GraphQlError::Transport)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(GraphQlError::Transport)?;
        debug!(%status, bytes = bytes.len(), "got graphql response");
        decode_response(status, &bytes)
    }
}

fn decode_response<T: DeserializeOwned>(status: StatusCode, bytes: &[u8]) -> Result<T, GraphQlError> {
    let envelope = serde_json::from_slice::<Envelope<T>>(bytes);

    if !status.is_success() {
        // Servers often still report the reason in the `errors` array.
        if let Ok(Envelope { errors, .. }) = &envelope {
            if !errors.is_empty() {
                return Err(GraphQlError::Response {
                    messages: errors.iter().map(|e| e.message.clone()).collect(),
                });
            }
        }
        return Err(GraphQlError::Status {
            status,
            body: String::from_utf8_lossy(bytes).trim().chars().take(512).collect(),
        });
    }

    let envelope = envelope.map_err(GraphQlError::Decode)?;
    if !envelope.errors.is_empty() {
        return Err(GraphQlError::Response {
            messages: envelope.errors.into_iter().map(|e| e.message).collect(),
        });
    }
    envelope.data.ok_or(GraphQlError::MissingData)
}
