//! Controller configuration
//!
//! Read once at startup from environment variables.

use crate::error::ControllerError;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_REGION: &str = "cn-hangzhou";
pub const DEFAULT_CONCURRENCY: u16 = 4;
pub const DEFAULT_CLOUD_CALL_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_PROBE_ADDR: &str = "0.0.0.0:8080";

/// Runtime settings of the controller
#[derive(Clone)]
pub struct ControllerConfig {
    pub access_key_id: String,
    pub access_key_secret: String,
    /// Region used when a resource does not name one
    pub region_id: String,
    pub ecs_endpoint: Option<String>,
    pub vpc_endpoint: Option<String>,
    /// `None` watches all namespaces
    pub watch_namespace: Option<String>,
    /// Parallel reconciliations per resource kind
    pub reconcile_concurrency: u16,
    pub cloud_call_timeout: Duration,
    pub probe_addr: SocketAddr,
}

impl fmt::Debug for ControllerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerConfig")
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<redacted>")
            .field("region_id", &self.region_id)
            .field("ecs_endpoint", &self.ecs_endpoint)
            .field("vpc_endpoint", &self.vpc_endpoint)
            .field("watch_namespace", &self.watch_namespace)
            .field("reconcile_concurrency", &self.reconcile_concurrency)
            .field("cloud_call_timeout", &self.cloud_call_timeout)
            .field("probe_addr", &self.probe_addr)
            .finish()
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| {
                ControllerError::InvalidConfig(format!("{} environment variable is required", key))
            })
        };

        let reconcile_concurrency = match get("RECONCILE_CONCURRENCY") {
            Some(raw) => match raw.parse::<u16>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ControllerError::InvalidConfig(format!(
                        "RECONCILE_CONCURRENCY must be a positive integer, got {:?}",
                        raw
                    )));
                }
            },
            None => DEFAULT_CONCURRENCY,
        };

        let cloud_call_timeout = match get("CLOUD_CALL_TIMEOUT_SECS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(n) if n > 0 => Duration::from_secs(n),
                _ => {
                    return Err(ControllerError::InvalidConfig(format!(
                        "CLOUD_CALL_TIMEOUT_SECS must be a positive integer, got {:?}",
                        raw
                    )));
                }
            },
            None => Duration::from_secs(DEFAULT_CLOUD_CALL_TIMEOUT_SECS),
        };

        let probe_raw = get("PROBE_ADDR").unwrap_or_else(|| DEFAULT_PROBE_ADDR.to_string());
        let probe_addr = probe_raw.parse::<SocketAddr>().map_err(|e| {
            ControllerError::InvalidConfig(format!("PROBE_ADDR {:?} is not a socket address: {}", probe_raw, e))
        })?;

        Ok(Self {
            access_key_id: required("ALIBABA_CLOUD_ACCESS_KEY_ID")?,
            access_key_secret: required("ALIBABA_CLOUD_ACCESS_KEY_SECRET")?,
            region_id: get("ACK_REGION_ID").unwrap_or_else(|| DEFAULT_REGION.to_string()),
            ecs_endpoint: get("ECS_ENDPOINT"),
            vpc_endpoint: get("VPC_ENDPOINT"),
            watch_namespace: get("WATCH_NAMESPACE"),
            reconcile_concurrency,
            cloud_call_timeout,
            probe_addr,
        })
    }
}
