use crate::rpc::{ClientError, ClientResult, read_body};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a, V> {
    #[serde(rename = "operationName", skip_serializing_if = "Option::is_none")]
    operation_name: Option<&'a str>,
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    variables: Option<V>,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlErrorObject>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorObject {
    message: String,
}

/// Boost's GraphQL endpoint. Unauthenticated, like the Boost web UI.
#[derive(Debug, Clone)]
pub struct GraphQlClient {
    http: reqwest::Client,
    endpoint: String,
}

impl GraphQlClient {
    /// `base` is the GraphQL origin, e.g. `http://127.0.0.1:8080`.
    pub fn new(http: reqwest::Client, base: &str) -> Self {
        Self {
            http,
            endpoint: format!("{}/graphql/query", base.trim_end_matches('/')),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Runs `query { <fields> }`.
    pub async fn basic_query<T: DeserializeOwned>(&self, op: &str, fields: &str) -> ClientResult<T> {
        let query = format!("query {{{fields}}}");
        self.execute::<(), T>(op, None, &query, None).await
    }

    pub async fn execute<V: Serialize, T: DeserializeOwned>(
        &self,
        op: &str,
        operation_name: Option<&str>,
        query: &str,
        variables: Option<V>,
    ) -> ClientResult<T> {
        let req = self.http.post(&self.endpoint).json(&GraphQlRequest {
            operation_name,
            query,
            variables,
        });
        let body = read_body(op, req).await?;
        decode(op, &body)
    }
}

fn decode<T: DeserializeOwned>(op: &str, body: &[u8]) -> ClientResult<T> {
    let resp: GraphQlResponse<T> =
        serde_json::from_slice(body).map_err(|e| ClientError::decode(op, e, body))?;
    if !resp.errors.is_empty() {
        let reason = resp
            .errors
            .into_iter()
            .map(|e| e.message)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ClientError::rejected(op, reason));
    }
    resp.data
        .ok_or_else(|| ClientError::rejected(op, "graphql response had no data"))
}
