//! Common utilities for the ECS/VPC RPC APIs
//!
//! Both APIs share one calling convention: a signed GET carrying every
//! parameter in the query string, answering JSON.

pub mod signature;

use crate::error::EcsError;
use crate::models::RpcErrorBody;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// API version of the ECS RPC endpoint
pub const ECS_API_VERSION: &str = "2014-05-26";

/// API version of the VPC RPC endpoint
pub const VPC_API_VERSION: &str = "2016-04-28";

/// Access key pair
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub access_key_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<redacted>")
            .finish()
    }
}

/// Signed RPC client for one API endpoint
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: Client,
    endpoint: String,
    version: &'static str,
    credentials: Credentials,
}

impl RpcClient {
    pub fn new(client: Client, endpoint: String, version: &'static str, credentials: Credentials) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            version,
            credentials,
        }
    }

    /// Get the endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Adds the common parameters and the signature to an action's parameters.
    pub fn signed_params(
        &self,
        action: &str,
        mut params: BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, EcsError> {
        let nonce = uuid::Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        params.extend(common_params(
            action,
            self.version,
            &self.credentials.access_key_id,
            &nonce,
            &timestamp,
        ));
        let signature = signature::sign(&params, &self.credentials.access_key_secret)?;
        params.insert("Signature".to_string(), signature);
        Ok(params)
    }

    /// Invoke an RPC action and decode its JSON answer
    pub async fn call<T: DeserializeOwned>(
        &self,
        action: &str,
        params: BTreeMap<String, String>,
    ) -> Result<T, EcsError> {
        let signed = self.signed_params(action, params)?;
        let url = format!("{}/?{}", self.endpoint, signature::canonical_query(&signed));
        debug!("RPC {} against {}", action, self.endpoint);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(EcsError::Http)?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<RpcErrorBody>(&body) {
                Ok(err) if !err.code.is_empty() => EcsError::from_code(&err.code, &err.message),
                _ if status == 401 || status == 403 => {
                    EcsError::Authentication(format!("{} failed: {} - {}", action, status, body))
                }
                _ => EcsError::Api {
                    code: status.as_u16().to_string(),
                    message: format!("{} failed: {}", action, body),
                },
            });
        }

        serde_json::from_str(&body).map_err(|e| EcsError::Api {
            code: "DecodeError".to_string(),
            message: format!(
                "error decoding {} response: {} - Response (first 500 chars): {}",
                action,
                e,
                body.chars().take(500).collect::<String>()
            ),
        })
    }
}

/// Parameters every RPC request carries, `Signature` excluded
pub fn common_params(
    action: &str,
    version: &str,
    access_key_id: &str,
    nonce: &str,
    timestamp: &str,
) -> BTreeMap<String, String> {
    [
        ("Action", action),
        ("Format", "JSON"),
        ("Version", version),
        ("AccessKeyId", access_key_id),
        ("SignatureMethod", "HMAC-SHA1"),
        ("SignatureVersion", "1.0"),
        ("SignatureNonce", nonce),
        ("Timestamp", timestamp),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}
