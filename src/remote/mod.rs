use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::any::Any;
use std::fmt;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::remote::model::{RemoteItem, RemoteUser, StockMovementRecord};

pub mod model;

const TRANSACTIONS_PATH: &str = "rest/v1/stock_transactions";
const INVENTORY_PATH: &str = "rest/v1/inventory_items";
const AUTH_USER_PATH: &str = "auth/v1/user";

/// Remote store failures. Transport and API errors are contained
/// per-record during replay; reads propagate them verbatim.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("failed to reach remote store: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("remote store error {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("invalid remote response: {0}")]
    InvalidResponse(String),
}

/// Seam between the sync engine and the hosted backend. Integration tests
/// substitute a recording implementation.
#[async_trait]
pub trait RemoteStore: Send + Sync + Any {
    async fn insert_transaction(&self, record: &StockMovementRecord) -> Result<(), RemoteError>;

    async fn fetch_inventory(&self, restaurant_id: &str) -> Result<Vec<RemoteItem>, RemoteError>;
}

/// REST adapter for a PostgREST-style backend: row inserts and selects
/// under `rest/v1/`, token auth under `auth/v1/`.
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    base_url: Url,
    api_key: String,
    access_token: String,
}

impl fmt::Debug for RestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RestClient {
    /// `access_token` defaults to the api key when the deployment uses a
    /// single service credential.
    pub fn new(base_url: Url, api_key: String, access_token: Option<String>) -> Self {
        let http = Client::builder()
            .user_agent("stocksync/0.1")
            .build()
            .expect("reqwest client");
        let access_token = access_token.unwrap_or_else(|| api_key.clone());
        Self {
            http,
            base_url,
            api_key,
            access_token,
        }
    }

    pub fn build_insert_request(
        &self,
        record: &StockMovementRecord,
    ) -> Result<reqwest::Request, RemoteError> {
        let endpoint = self
            .base_url
            .join(TRANSACTIONS_PATH)
            .map_err(|e| RemoteError::InvalidResponse(format!("invalid base url: {e}")))?;
        self.http
            .post(endpoint)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Content-Type", "application/json")
            .header("Prefer", "return=minimal")
            .json(record)
            .build()
            .map_err(RemoteError::from)
    }

    pub fn build_inventory_request(
        &self,
        restaurant_id: &str,
    ) -> Result<reqwest::Request, RemoteError> {
        let mut endpoint = self
            .base_url
            .join(INVENTORY_PATH)
            .map_err(|e| RemoteError::InvalidResponse(format!("invalid base url: {e}")))?;
        endpoint
            .query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("restaurant_id", &format!("eq.{restaurant_id}"))
            .append_pair("order", "name.asc");
        self.http
            .get(endpoint)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .build()
            .map_err(RemoteError::from)
    }

    /// Resolve the authenticated user; the composition root reads the
    /// tenant from it.
    pub async fn current_user(&self) -> Result<RemoteUser, RemoteError> {
        let endpoint = self
            .base_url
            .join(AUTH_USER_PATH)
            .map_err(|e| RemoteError::InvalidResponse(format!("invalid base url: {e}")))?;
        let res = self
            .http
            .get(endpoint)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .send()
            .await?;
        let res = check_status(res).await?;
        let payload: AuthUserResponse = res
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        let restaurant_id = payload
            .user_metadata
            .restaurant_id
            .ok_or_else(|| RemoteError::InvalidResponse("user has no restaurant_id".into()))?;
        Ok(RemoteUser {
            id: payload.id,
            email: payload.email,
            restaurant_id,
        })
    }
}

async fn check_status(res: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = res.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let body = res.text().await.unwrap_or_default();
        warn!(%status, "rate limited by remote store");
        return Err(RemoteError::Api { status, body });
    }
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        warn!(%status, %body, "remote store error");
        return Err(RemoteError::Api { status, body });
    }
    Ok(res)
}

#[async_trait]
impl RemoteStore for RestClient {
    async fn insert_transaction(&self, record: &StockMovementRecord) -> Result<(), RemoteError> {
        let request = self.build_insert_request(record)?;
        let res = self.http.execute(request).await?;
        check_status(res).await?;
        Ok(())
    }

    async fn fetch_inventory(&self, restaurant_id: &str) -> Result<Vec<RemoteItem>, RemoteError> {
        let request = self.build_inventory_request(restaurant_id)?;
        let res = self.http.execute(request).await?;
        let res = check_status(res).await?;
        res.json::<Vec<RemoteItem>>()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))
    }
}

#[derive(Deserialize)]
struct AuthUserResponse {
    id: Uuid,
    email: Option<String>,
    #[serde(default)]
    user_metadata: AuthUserMetadata,
}

#[derive(Deserialize, Default)]
struct AuthUserMetadata {
    restaurant_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MovementKind, MovementReason};
    use chrono::Utc;

    fn sample_client() -> RestClient {
        RestClient::new(
            Url::parse("https://example.backend.co/").unwrap(),
            "anon-key".into(),
            Some("user-token".into()),
        )
    }

    fn sample_record() -> StockMovementRecord {
        StockMovementRecord {
            item_id: "item-1".into(),
            kind: MovementKind::StockOut,
            quantity: 3.0,
            reason: MovementReason::Sale,
            notes: None,
            user_id: "user-1".into(),
            restaurant_id: "rest-1".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn insert_request_sets_path_and_headers() {
        let client = sample_client();
        let request = client.build_insert_request(&sample_record()).unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/rest/v1/stock_transactions");
        let headers = request.headers();
        assert_eq!(headers.get("apikey").unwrap(), "anon-key");
        assert_eq!(headers.get("Authorization").unwrap(), "Bearer user-token");
        assert_eq!(headers.get("Prefer").unwrap(), "return=minimal");
    }

    #[test]
    fn insert_body_excludes_local_bookkeeping() {
        let record = sample_record();
        let body = serde_json::to_value(&record).unwrap();
        assert_eq!(body["type"], "stock_out");
        assert_eq!(body["reason"], "sale");
        assert_eq!(body["quantity"], 3.0);
        assert!(body.get("local_id").is_none());
        assert!(body.get("synced").is_none());
        assert!(body.get("seq").is_none());
        // Absent note serializes as absent, not null.
        assert!(body.get("notes").is_none());
    }

    #[test]
    fn inventory_request_filters_by_tenant() {
        let client = sample_client();
        let request = client.build_inventory_request("rest-42").unwrap();
        assert_eq!(request.method(), reqwest::Method::GET);
        assert_eq!(request.url().path(), "/rest/v1/inventory_items");
        let query = request.url().query().unwrap();
        assert!(query.contains("restaurant_id=eq.rest-42"));
        assert!(query.contains("select=*"));
    }

    #[test]
    fn access_token_falls_back_to_api_key() {
        let client = RestClient::new(
            Url::parse("https://example.backend.co/").unwrap(),
            "anon-key".into(),
            None,
        );
        let request = client.build_inventory_request("rest-1").unwrap();
        assert_eq!(
            request.headers().get("Authorization").unwrap(),
            "Bearer anon-key"
        );
    }

    #[test]
    fn auth_payload_requires_restaurant_id() {
        let payload: AuthUserResponse = serde_json::from_value(serde_json::json!({
            "id": "4f5cbd51-90a6-4a23-a118-5713d66c8419",
            "email": "chef@example.com",
            "user_metadata": {}
        }))
        .unwrap();
        assert!(payload.user_metadata.restaurant_id.is_none());

        let payload: AuthUserResponse = serde_json::from_value(serde_json::json!({
            "id": "4f5cbd51-90a6-4a23-a118-5713d66c8419",
            "user_metadata": { "restaurant_id": "rest-7" }
        }))
        .unwrap();
        assert_eq!(payload.user_metadata.restaurant_id.as_deref(), Some("rest-7"));
    }
}
