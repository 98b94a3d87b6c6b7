//! Cloudflare DNS client
//!
//! Manages the proxied A records that point booked domains at the shared
//! host. The whole integration can be switched off, in which case record
//! mutations short-circuit with an error and `is_enabled` lets callers
//! skip DNS entirely.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use beyondfire_common::{Error, Result};

use crate::deployment::DnsProvider;

const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

pub struct CloudflareClient {
    api_base: String,
    api_token: Option<String>,
    zone_id: Option<String>,
    enabled: bool,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CloudflareResponse<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<CloudflareError>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CloudflareError {
    code: i64,
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DnsRecord {
    pub id: String,
    pub name: String,
    pub content: String,
}

impl CloudflareClient {
    pub fn new(enabled: bool, api_token: Option<String>, zone_id: Option<String>) -> Self {
        Self {
            api_base: CLOUDFLARE_API_BASE.to_string(),
            api_token,
            zone_id,
            enabled,
            client: reqwest::Client::new(),
        }
    }

    /// DNS automation is active only when switched on and fully configured
    pub fn is_enabled(&self) -> bool {
        self.enabled && self.api_token.is_some() && self.zone_id.is_some()
    }

    fn credentials(&self) -> Result<(&str, &str)> {
        match (&self.api_token, &self.zone_id) {
            (Some(token), Some(zone)) if self.enabled => Ok((token, zone)),
            _ => Err(Error::Dns("DNS automation is disabled".to_string())),
        }
    }

    /// Create a proxied A record pointing `name` at `ip`, returning the
    /// record id for later cleanup
    pub async fn create_record(&self, name: &str, ip: &str) -> Result<String> {
        let (token, zone) = self.credentials()?;

        let response = self
            .client
            .post(format!("{}/zones/{}/dns_records", self.api_base, zone))
            .bearer_auth(token)
            .json(&json!({
                "type": "A",
                "name": name,
                "content": ip,
                "ttl": 1,
                "proxied": true,
            }))
            .send()
            .await
            .map_err(|e| Error::Dns(format!("Cloudflare is unreachable: {}", e)))?;

        let body: CloudflareResponse<DnsRecord> = response
            .json()
            .await
            .map_err(|e| Error::Dns(format!("unexpected Cloudflare response: {}", e)))?;

        if !body.success {
            return Err(Error::Dns(join_errors("record creation", &body.errors)));
        }

        let record = body
            .result
            .ok_or_else(|| Error::Dns("record creation returned no record".to_string()))?;
        info!("Created DNS record {} for {}", record.id, name);
        Ok(record.id)
    }

    pub async fn delete_record(&self, record_id: &str) -> Result<()> {
        let (token, zone) = self.credentials()?;

        let response = self
            .client
            .delete(format!(
                "{}/zones/{}/dns_records/{}",
                self.api_base, zone, record_id
            ))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Dns(format!("Cloudflare is unreachable: {}", e)))?;

        let body: CloudflareResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| Error::Dns(format!("unexpected Cloudflare response: {}", e)))?;

        if !body.success {
            return Err(Error::Dns(join_errors("record deletion", &body.errors)));
        }
        debug!("Deleted DNS record {}", record_id);
        Ok(())
    }

    pub async fn list_records(&self) -> Result<Vec<DnsRecord>> {
        let (token, zone) = self.credentials()?;

        let response = self
            .client
            .get(format!("{}/zones/{}/dns_records", self.api_base, zone))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Dns(format!("Cloudflare is unreachable: {}", e)))?;

        let body: CloudflareResponse<Vec<DnsRecord>> = response
            .json()
            .await
            .map_err(|e| Error::Dns(format!("unexpected Cloudflare response: {}", e)))?;

        if !body.success {
            return Err(Error::Dns(join_errors("record listing", &body.errors)));
        }
        Ok(body.result.unwrap_or_default())
    }
}

fn join_errors(context: &str, errors: &[CloudflareError]) -> String {
    if errors.is_empty() {
        return format!("{} failed", context);
    }
    let joined = errors
        .iter()
        .map(|e| format!("{} (code {})", e.message, e.code))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{} failed: {}", context, joined)
}

#[async_trait]
impl DnsProvider for CloudflareClient {
    fn is_enabled(&self) -> bool {
        CloudflareClient::is_enabled(self)
    }

    async fn create_record(&self, name: &str, ip: &str) -> Result<String> {
        CloudflareClient::create_record(self, name, ip).await
    }

    async fn delete_record(&self, record_id: &str) -> Result<()> {
        CloudflareClient::delete_record(self, record_id).await
    }
}
