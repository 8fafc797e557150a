//! Submission provenance recorded in `metadata.createdBy`.

use std::net::IpAddr;

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

/// Default public IP echo service.
pub const DEFAULT_IP_ECHO_URL: &str = "https://api.ipify.org";

/// Lookups attempted before giving up on the external address.
const IP_LOOKUP_ATTEMPTS: u32 = 2;

/// Who submitted an encode request, and from where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Provenance {
    pub host: String,
    pub user: String,
    /// External address; omitted when the echo service is unreachable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl Provenance {
    /// Host and user of the current process, without an IP address.
    pub fn local() -> Self {
        let host = whoami::fallible::hostname().unwrap_or_else(|e| {
            warn!(error = %e, "Could not determine host name");
            "unknown".to_string()
        });
        Self {
            host,
            user: whoami::username(),
            ip: None,
        }
    }

    /// Local provenance plus the external IP reported by `ip_echo_url`.
    ///
    /// The lookup is retried once; if both attempts fail the IP is left out
    /// and submission goes ahead.
    pub async fn collect(http: &Client, ip_echo_url: Option<&Url>) -> Self {
        let mut provenance = Self::local();
        if let Some(url) = ip_echo_url {
            provenance.ip = lookup_ip(http, url).await;
        }
        provenance
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!(self)
    }
}

async fn lookup_ip(http: &Client, url: &Url) -> Option<String> {
    for attempt in 1..=IP_LOOKUP_ATTEMPTS {
        match fetch_ip(http, url).await {
            Ok(ip) => {
                debug!(%ip, attempt, "Resolved external IP");
                return Some(ip.to_string());
            }
            Err(reason) => {
                warn!(url = %url, attempt, %reason, "External IP lookup failed");
            }
        }
    }
    warn!("Proceeding without external IP in provenance");
    None
}

async fn fetch_ip(http: &Client, url: &Url) -> Result<IpAddr, String> {
    let response = http
        .get(url.clone())
        .send()
        .await
        .map_err(|e| e.to_string())?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("status {status}"));
    }
    let body = response.text().await.map_err(|e| e.to_string())?;
    body.trim()
        .parse::<IpAddr>()
        .map_err(|e| format!("invalid address {:?}: {e}", body.trim()))
}
