//! REST client for the hosted backend.
//!
//! Table calls go to `{base}/rest/v1/{table}` using the PostgREST filter
//! grammar (`col=eq.v`, `col=in.(a,b)`, `or=(...)`); storage calls go to
//! `{base}/storage/v1/object/...`. Both authenticate with the project key.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;

use super::{Filter, GatewayError, RemoteGateway, Row, Subscription};

pub struct RestGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestGateway {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, GatewayError> {
        let parsed = url::Url::parse(base_url)
            .map_err(|e| GatewayError::Configuration(format!("Invalid backend url: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(GatewayError::Configuration(format!(
                "Unsupported backend url scheme: {}",
                parsed.scheme()
            )));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("apikey", self.api_key.clone())
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    fn table_request(&self, method: Method, table: &str, filter: &Filter) -> RequestBuilder {
        self.request(method, &format!("/rest/v1/{}", table))
            .query(&filter_query(filter))
    }

    async fn send(builder: RequestBuilder) -> Result<reqwest::Response, GatewayError> {
        let resp = builder
            .send()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Status { status, body });
        }
        Ok(resp)
    }

    async fn send_rows(builder: RequestBuilder) -> Result<Vec<Row>, GatewayError> {
        let resp = Self::send(builder).await?;
        resp.json::<Vec<Row>>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

#[async_trait]
impl RemoteGateway for RestGateway {
    async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, GatewayError> {
        let builder = self
            .table_request(Method::GET, table, filter)
            .query(&[("select", "*")]);
        Self::send_rows(builder).await
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, GatewayError> {
        let builder = self
            .request(Method::POST, &format!("/rest/v1/{}", table))
            .header("Prefer", "return=representation")
            .json(&rows);
        Self::send_rows(builder).await
    }

    async fn update(
        &self,
        table: &str,
        filter: &Filter,
        patch: Row,
    ) -> Result<Vec<Row>, GatewayError> {
        let builder = self
            .table_request(Method::PATCH, table, filter)
            .header("Prefer", "return=representation")
            .json(&patch);
        Self::send_rows(builder).await
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, GatewayError> {
        let builder = self
            .table_request(Method::DELETE, table, filter)
            .header("Prefer", "return=representation");
        Self::send_rows(builder).await
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), GatewayError> {
        let builder = self
            .request(Method::POST, &format!("/storage/v1/object/{}/{}", bucket, path))
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(bytes);
        Self::send(builder).await?;
        Ok(())
    }

    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, GatewayError> {
        let builder = self.request(
            Method::GET,
            &format!("/storage/v1/object/{}/{}", bucket, path),
        );
        let resp = match Self::send(builder).await {
            Err(GatewayError::Status { status: 404, .. }) => {
                return Err(GatewayError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    path: path.to_string(),
                })
            }
            other => other?,
        };
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.base_url, bucket, path)
    }

    async fn signed_url(
        &self,
        bucket: &str,
        path: &str,
        expires_in: Duration,
    ) -> Result<String, GatewayError> {
        #[derive(Deserialize)]
        struct SignResponse {
            #[serde(rename = "signedURL")]
            signed_url: String,
        }

        let builder = self
            .request(
                Method::POST,
                &format!("/storage/v1/object/sign/{}/{}", bucket, path),
            )
            .json(&serde_json::json!({ "expiresIn": expires_in.as_secs() }));
        let resp: SignResponse = Self::send(builder)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        Ok(format!("{}/storage/v1{}", self.base_url, resp.signed_url))
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), GatewayError> {
        let builder = self
            .request(Method::DELETE, &format!("/storage/v1/object/{}", bucket))
            .json(&serde_json::json!({ "prefixes": paths }));
        Self::send(builder).await?;
        Ok(())
    }

    async fn subscribe(&self, _table: &str, _filter: Filter) -> Result<Subscription, GatewayError> {
        // The realtime channel is a websocket protocol; over plain REST the
        // watchers run on their poll timer alone.
        Err(GatewayError::RealtimeUnavailable)
    }
}

// ---------------------------------------------------------------------------
// Filter encoding
// ---------------------------------------------------------------------------

/// Encode a filter as PostgREST query pairs. A top-level `And` becomes one
/// pair per clause; nested groups use the `or=(...)` / `and(...)` forms.
pub fn filter_query(filter: &Filter) -> Vec<(String, String)> {
    match filter {
        Filter::All => Vec::new(),
        Filter::Eq(col, v) => vec![(col.clone(), format!("eq.{}", literal(v)))],
        Filter::In(col, vs) => vec![(col.clone(), format!("in.({})", in_list(vs)))],
        Filter::Or(fs) => vec![(
            "or".to_string(),
            format!("({})", fs.iter().map(expression).collect::<Vec<_>>().join(",")),
        )],
        Filter::And(fs) => fs.iter().flat_map(filter_query).collect(),
    }
}

/// Logic-tree form used inside `or=(...)`.
fn expression(filter: &Filter) -> String {
    match filter {
        Filter::All => "id.not.is.null".to_string(),
        Filter::Eq(col, v) => format!("{}.eq.{}", col, literal(v)),
        Filter::In(col, vs) => format!("{}.in.({})", col, in_list(vs)),
        Filter::Or(fs) => format!(
            "or({})",
            fs.iter().map(expression).collect::<Vec<_>>().join(",")
        ),
        Filter::And(fs) => format!(
            "and({})",
            fs.iter().map(expression).collect::<Vec<_>>().join(",")
        ),
    }
}

fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn in_list(values: &[Value]) -> String {
    values
        .iter()
        .map(|v| {
            let s = literal(v);
            if s.contains(',') || s.contains('(') || s.contains(')') {
                format!("\"{}\"", s.replace('"', "\\\""))
            } else {
                s
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
