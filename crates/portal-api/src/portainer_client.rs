//! Client for the Portainer-compatible platform API
//!
//! Sessions are token based: `POST /api/auth` yields a JWT that every other
//! call carries as a bearer header. The token is cached until the platform
//! rejects it, then refreshed once and the request retried.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use beyondfire_common::{Error, Result};

use crate::deployment::{PlatformStatus, StackPlatform, StackRef};

/// Endpoint used when discovery fails or returns nothing
const DEFAULT_ENDPOINT_ID: i64 = 1;

pub struct PortainerClient {
    base_url: String,
    username: String,
    password: String,
    client: reqwest::Client,
    token: RwLock<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    jwt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortainerStack {
    #[serde(rename = "Id")]
    pub id: i64,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Status", default)]
    pub status: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Endpoint {
    #[serde(rename = "Id")]
    id: i64,
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct VolumeList {
    #[serde(rename = "Volumes", default)]
    volumes: Option<Vec<Volume>>,
}

#[derive(Debug, Deserialize)]
struct Volume {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Labels", default)]
    labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(rename = "Version")]
    version: String,
}

impl PortainerClient {
    pub fn new(base_url: &str, username: &str, password: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            client: reqwest::Client::new(),
            token: RwLock::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Log in and cache the session token
    pub async fn authenticate(&self) -> Result<String> {
        let response = self
            .client
            .post(self.url("/api/auth"))
            .json(&json!({
                "username": self.username,
                "password": self.password,
            }))
            .send()
            .await
            .map_err(|e| Error::PlatformAuth(format!("Portainer is unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::PlatformAuth(format!(
                "authentication rejected with status {}",
                response.status().as_u16()
            )));
        }

        let auth: AuthResponse = response
            .json()
            .await
            .map_err(|e| Error::PlatformAuth(format!("unexpected auth response: {}", e)))?;

        *self.token.write().await = Some(auth.jwt.clone());
        debug!("Authenticated against Portainer at {}", self.base_url);
        Ok(auth.jwt)
    }

    async fn token(&self) -> Result<String> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        self.authenticate().await
    }

    /// Send a request with the cached token, re-authenticating once when
    /// the platform rejects it
    async fn send_authorized<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&str) -> reqwest::RequestBuilder,
    {
        let token = self.token().await?;
        let response = build(&token).send().await.map_err(|e| Error::Platform {
            status: None,
            message: format!("request failed: {}", e),
        })?;

        if response.status() == StatusCode::UNAUTHORIZED
            || response.status() == StatusCode::FORBIDDEN
        {
            debug!("Platform token rejected, re-authenticating");
            *self.token.write().await = None;
            let token = self.authenticate().await?;
            return build(&token).send().await.map_err(|e| Error::Platform {
                status: None,
                message: format!("request failed after re-authentication: {}", e),
            });
        }

        Ok(response)
    }

    pub async fn list_stacks(&self) -> Result<Vec<PortainerStack>> {
        let response = self
            .send_authorized(|token| self.client.get(self.url("/api/stacks")).bearer_auth(token))
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response("listing stacks", response).await);
        }

        response.json().await.map_err(|e| Error::Platform {
            status: None,
            message: format!("could not parse stack list: {}", e),
        })
    }

    /// True when a stack with this name is already registered. Listing
    /// failures count as "not taken" so a degraded platform does not block
    /// deployments over a name check.
    pub async fn stack_exists(&self, name: &str) -> Result<bool> {
        match self.list_stacks().await {
            Ok(stacks) => Ok(stacks.iter().any(|s| stack_name_matches(s, name))),
            Err(err) => {
                warn!("Could not list stacks, assuming {} is free: {}", name, err);
                Ok(false)
            }
        }
    }

    pub async fn get_stack(&self, stack_id: i64) -> Result<Option<PortainerStack>> {
        let response = self
            .send_authorized(|token| {
                self.client
                    .get(self.url(&format!("/api/stacks/{}", stack_id)))
                    .bearer_auth(token)
            })
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_from_response("fetching stack", response).await);
        }

        let stack = response.json().await.map_err(|e| Error::Platform {
            status: None,
            message: format!("could not parse stack: {}", e),
        })?;
        Ok(Some(stack))
    }

    async fn list_endpoints(&self) -> Result<Vec<Endpoint>> {
        let response = self
            .send_authorized(|token| {
                self.client.get(self.url("/api/endpoints")).bearer_auth(token)
            })
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response("listing endpoints", response).await);
        }

        response.json().await.map_err(|e| Error::Platform {
            status: None,
            message: format!("could not parse endpoint list: {}", e),
        })
    }

    /// Pick the endpoint new stacks deploy to: the one named `local`, else
    /// the first listed, else the default id
    async fn resolve_endpoint_id(&self) -> i64 {
        match self.list_endpoints().await {
            Ok(endpoints) => endpoints
                .iter()
                .find(|e| e.name == "local")
                .or_else(|| endpoints.first())
                .map(|e| e.id)
                .unwrap_or(DEFAULT_ENDPOINT_ID),
            Err(err) => {
                warn!(
                    "Endpoint discovery failed, using endpoint {}: {}",
                    DEFAULT_ENDPOINT_ID, err
                );
                DEFAULT_ENDPOINT_ID
            }
        }
    }

    /// Register a standalone compose stack. Falls back to the legacy route
    /// when the platform answers the modern one with an error.
    pub async fn create_stack(&self, name: &str, compose_content: &str) -> Result<StackRef> {
        let endpoint_id = self.resolve_endpoint_id().await;

        let response = self
            .send_authorized(|token| {
                self.client
                    .post(self.url(&format!(
                        "/api/stacks/create/standalone/string?endpointId={}",
                        endpoint_id
                    )))
                    .bearer_auth(token)
                    .json(&json!({
                        "name": name,
                        "stackFileContent": compose_content,
                    }))
            })
            .await?;

        if response.status().is_success() {
            let stack: PortainerStack = response.json().await.map_err(|e| Error::Platform {
                status: None,
                message: format!("could not parse created stack: {}", e),
            })?;
            info!("Created stack {} with id {}", stack.name, stack.id);
            return Ok(StackRef {
                id: stack.id,
                name: stack.name,
            });
        }

        let err = error_from_response("stack creation", response).await;
        warn!("Stack creation failed, retrying via the legacy route: {}", err);
        self.create_stack_legacy(name, compose_content, endpoint_id)
            .await
    }

    async fn create_stack_legacy(
        &self,
        name: &str,
        compose_content: &str,
        endpoint_id: i64,
    ) -> Result<StackRef> {
        let response = self
            .send_authorized(|token| {
                self.client
                    .post(self.url(&format!(
                        "/api/stacks?type=1&method=string&endpointId={}",
                        endpoint_id
                    )))
                    .bearer_auth(token)
                    .json(&json!({
                        "Name": name,
                        "StackFileContent": compose_content,
                    }))
            })
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response("legacy stack creation", response).await);
        }

        let stack: PortainerStack = response.json().await.map_err(|e| Error::Platform {
            status: None,
            message: format!("could not parse created stack: {}", e),
        })?;
        info!("Created stack {} with id {} via the legacy route", stack.name, stack.id);
        Ok(StackRef {
            id: stack.id,
            name: stack.name,
        })
    }

    pub async fn update_stack(&self, stack_id: i64, compose_content: &str) -> Result<()> {
        let endpoint_id = self.resolve_endpoint_id().await;
        let response = self
            .send_authorized(|token| {
                self.client
                    .put(self.url(&format!(
                        "/api/stacks/{}?endpointId={}",
                        stack_id, endpoint_id
                    )))
                    .bearer_auth(token)
                    .json(&json!({
                        "stackFileContent": compose_content,
                        "prune": false,
                    }))
            })
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response("stack update", response).await);
        }
        debug!("Updated stack {}", stack_id);
        Ok(())
    }

    /// Names of the volumes compose created for a stack. A stack that is
    /// already gone yields an empty list.
    async fn get_stack_volumes(&self, stack_id: i64) -> Result<Vec<String>> {
        let stack = match self.get_stack(stack_id).await? {
            Some(stack) => stack,
            None => return Ok(Vec::new()),
        };
        let endpoint_id = self.resolve_endpoint_id().await;

        let response = self
            .send_authorized(|token| {
                self.client
                    .get(self.url(&format!("/api/endpoints/{}/docker/volumes", endpoint_id)))
                    .bearer_auth(token)
            })
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response("listing volumes", response).await);
        }

        let list: VolumeList = response.json().await.map_err(|e| Error::Platform {
            status: None,
            message: format!("could not parse volume list: {}", e),
        })?;

        Ok(list
            .volumes
            .unwrap_or_default()
            .into_iter()
            .filter(|v| volume_belongs_to_stack(v, &stack.name))
            .map(|v| v.name)
            .collect())
    }

    /// Delete the volumes belonging to a stack. Individual failures are
    /// logged and skipped, the sweep itself reports success.
    pub async fn delete_stack_volumes(&self, stack_id: i64) -> Result<()> {
        let volumes = self.get_stack_volumes(stack_id).await?;
        if volumes.is_empty() {
            debug!("No volumes matched stack {}", stack_id);
            return Ok(());
        }
        let endpoint_id = self.resolve_endpoint_id().await;

        for volume in volumes {
            let result = self
                .send_authorized(|token| {
                    self.client
                        .delete(self.url(&format!(
                            "/api/endpoints/{}/docker/volumes/{}",
                            endpoint_id, volume
                        )))
                        .bearer_auth(token)
                })
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    debug!("Deleted volume {}", volume);
                }
                Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                    debug!("Volume {} was already gone", volume);
                }
                Ok(response) => {
                    warn!(
                        "Could not delete volume {}: status {}",
                        volume,
                        response.status().as_u16()
                    );
                }
                Err(err) => {
                    warn!("Could not delete volume {}: {}", volume, err);
                }
            }
        }
        Ok(())
    }

    pub async fn delete_stack(&self, stack_id: i64, remove_volumes: bool) -> Result<()> {
        let endpoint_id = self.resolve_endpoint_id().await;
        let response = self
            .send_authorized(|token| {
                self.client
                    .delete(self.url(&format!(
                        "/api/stacks/{}?endpointId={}&removeVolumes={}",
                        stack_id, endpoint_id, remove_volumes
                    )))
                    .bearer_auth(token)
            })
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response("stack deletion", response).await);
        }
        info!("Deleted stack {} (removeVolumes={})", stack_id, remove_volumes);
        Ok(())
    }

    /// Human-readable lines about a stack for the merged log view. The
    /// platform keeps no per-service logs for string stacks, so these are
    /// derived from the stack record.
    pub async fn stack_logs(&self, stack_id: i64) -> Result<Vec<String>> {
        let stack = self
            .get_stack(stack_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Stack {}", stack_id)))?;

        Ok(vec![
            format!(
                "Stack {} (id {}) is registered on the platform",
                stack.name, stack.id
            ),
            stack_status_line(&stack),
        ])
    }

    /// Platform version from the unauthenticated status route
    pub async fn status(&self) -> Result<String> {
        let response = self
            .client
            .get(self.url("/api/status"))
            .send()
            .await
            .map_err(|e| Error::Platform {
                status: None,
                message: format!("Portainer is unreachable: {}", e),
            })?;

        if !response.status().is_success() {
            return Err(error_from_response("status probe", response).await);
        }

        let status: StatusResponse = response.json().await.map_err(|e| Error::Platform {
            status: None,
            message: format!("could not parse status response: {}", e),
        })?;
        Ok(status.version)
    }

    /// Reachability check: version from the status route, then a login and
    /// an endpoint count
    pub async fn probe(&self) -> Result<PlatformStatus> {
        let version = self.status().await?;
        self.authenticate().await?;
        let endpoints = self.list_endpoints().await?.len();

        Ok(PlatformStatus { version, endpoints })
    }
}

async fn error_from_response(context: &str, response: Response) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        format!("{} failed with status {}", context, status)
    } else {
        format!("{} failed with status {}: {}", context, status, body)
    };
    Error::Platform {
        status: Some(status),
        message,
    }
}

/// Stack names compare byte for byte, the platform treats
/// differently-cased names as distinct stacks
fn stack_name_matches(stack: &PortainerStack, name: &str) -> bool {
    stack.name == name
}

/// A volume belongs to a stack when compose prefixed its name with the
/// project, or when the compose project label names it
fn volume_belongs_to_stack(volume: &Volume, stack_name: &str) -> bool {
    if volume.name.starts_with(&format!("{}_", stack_name)) {
        return true;
    }
    volume
        .labels
        .as_ref()
        .and_then(|labels| labels.get("com.docker.compose.project"))
        .map(|project| project == stack_name)
        .unwrap_or(false)
}

fn stack_status_line(stack: &PortainerStack) -> String {
    match stack.status {
        Some(1) => format!("Stack {} is active", stack.name),
        Some(2) => format!("Stack {} is inactive", stack.name),
        _ => format!("Stack {} has an unknown status", stack.name),
    }
}

#[async_trait]
impl StackPlatform for PortainerClient {
    async fn authenticate(&self) -> Result<()> {
        PortainerClient::authenticate(self).await.map(|_| ())
    }

    async fn stack_exists(&self, name: &str) -> Result<bool> {
        PortainerClient::stack_exists(self, name).await
    }

    async fn create_stack(&self, name: &str, compose_content: &str) -> Result<StackRef> {
        PortainerClient::create_stack(self, name, compose_content).await
    }

    async fn delete_stack(&self, stack_id: i64, remove_volumes: bool) -> Result<()> {
        PortainerClient::delete_stack(self, stack_id, remove_volumes).await
    }

    async fn delete_stack_volumes(&self, stack_id: i64) -> Result<()> {
        PortainerClient::delete_stack_volumes(self, stack_id).await
    }

    async fn stack_logs(&self, stack_id: i64) -> Result<Vec<String>> {
        PortainerClient::stack_logs(self, stack_id).await
    }

    async fn probe(&self) -> Result<PlatformStatus> {
        PortainerClient::probe(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume(name: &str, project: Option<&str>) -> Volume {
        Volume {
            name: name.to_string(),
            labels: project.map(|p| {
                let mut labels = HashMap::new();
                labels.insert("com.docker.compose.project".to_string(), p.to_string());
                labels
            }),
        }
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = PortainerClient::new("http://localhost:9000/", "admin", "pw");
        assert_eq!(client.url("/api/status"), "http://localhost:9000/api/status");
    }

    #[test]
    fn test_volume_matching_by_prefix_and_label() {
        let stack = "customer-01234567-fe2-docker";
        assert!(volume_belongs_to_stack(
            &volume("customer-01234567-fe2-docker_fe2_db_data", None),
            stack
        ));
        assert!(volume_belongs_to_stack(&volume("pvc-1234", Some(stack)), stack));
        assert!(!volume_belongs_to_stack(
            &volume("customer-other_fe2_db_data", None),
            stack
        ));
        assert!(!volume_belongs_to_stack(
            &volume("plain", Some("other-project")),
            stack
        ));
        assert!(!volume_belongs_to_stack(&volume("plain", None), stack));
    }

    #[test]
    fn test_stack_exists_matching_is_case_sensitive() {
        let stack = PortainerStack {
            id: 7,
            name: "customer-abc12345-fe2-docker".to_string(),
            status: Some(1),
        };
        assert!(stack_name_matches(&stack, "customer-abc12345-fe2-docker"));
        assert!(!stack_name_matches(&stack, "CUSTOMER-ABC12345-FE2-DOCKER"));
        assert!(!stack_name_matches(&stack, "Customer-Abc12345-Fe2-Docker"));
        assert!(!stack_name_matches(&stack, "customer-abc12345-fe2"));
    }

    #[test]
    fn test_stack_status_lines() {
        let mut stack = PortainerStack {
            id: 4,
            name: "customer-01234567-fe2-docker".to_string(),
            status: Some(1),
        };
        assert!(stack_status_line(&stack).contains("is active"));
        stack.status = Some(2);
        assert!(stack_status_line(&stack).contains("is inactive"));
        stack.status = None;
        assert!(stack_status_line(&stack).contains("unknown status"));
    }
}
