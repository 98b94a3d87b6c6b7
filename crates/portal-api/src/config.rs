//! Configuration management for the portal API
//!
//! Loads configuration from environment variables with sensible defaults.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API server host
    pub api_host: String,

    /// API server port
    pub api_port: u16,

    /// Directory holding the JSON stores and per-booking deployment dirs
    pub data_dir: PathBuf,

    /// Container platform base URL
    pub portainer_url: String,

    /// Container platform username
    pub portainer_username: String,

    /// Container platform password
    pub portainer_password: String,

    /// Whether DNS automation is active
    pub cloudflare_enabled: bool,

    /// DNS provider API token
    pub cloudflare_api_token: Option<String>,

    /// DNS zone all customer records live in
    pub cloudflare_zone_id: Option<String>,

    /// Public IP that DNS records point at
    pub server_ip: String,

    /// Secret for signing portal JWTs
    pub jwt_secret: String,

    /// Default admin account seeded at startup
    pub admin_email: String,
    pub admin_password: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenvy::dotenv().ok();

        let config = Config {
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),

            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("Invalid API_PORT")?,

            data_dir: env::var("DATA_DIR")
                .unwrap_or_else(|_| "./data".to_string())
                .into(),

            portainer_url: env::var("PORTAINER_URL")
                .unwrap_or_else(|_| "http://localhost:9000".to_string()),

            portainer_username: env::var("PORTAINER_USERNAME")
                .unwrap_or_else(|_| "admin".to_string()),

            portainer_password: env::var("PORTAINER_PASSWORD").unwrap_or_default(),

            cloudflare_enabled: env::var("CLOUDFLARE_ENABLED")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .context("Invalid CLOUDFLARE_ENABLED")?,

            cloudflare_api_token: env::var("CLOUDFLARE_API_TOKEN").ok(),

            cloudflare_zone_id: env::var("CLOUDFLARE_ZONE_ID").ok(),

            server_ip: env::var("SERVER_IP").unwrap_or_else(|_| "127.0.0.1".to_string()),

            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| "default-dev-secret".to_string()),

            admin_email: env::var("ADMIN_EMAIL")
                .unwrap_or_else(|_| "admin@beyondfire.cloud".to_string()),

            admin_password: env::var("ADMIN_PASSWORD")
                .unwrap_or_else(|_| "AdminPW!".to_string()),
        };

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.api_port == 0 {
            anyhow::bail!("API_PORT must be greater than 0");
        }

        if self.cloudflare_enabled
            && (self.cloudflare_api_token.is_none() || self.cloudflare_zone_id.is_none())
        {
            anyhow::bail!(
                "CLOUDFLARE_ENABLED requires CLOUDFLARE_API_TOKEN and CLOUDFLARE_ZONE_ID"
            );
        }

        Ok(())
    }

    /// Get the API server address
    pub fn api_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    /// Ensure the data directory exists
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir).with_context(|| {
            format!("Failed to create data directory: {}", self.data_dir.display())
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            api_host: "0.0.0.0".to_string(),
            api_port: 3000,
            data_dir: PathBuf::from("./data"),
            portainer_url: "http://localhost:9000".to_string(),
            portainer_username: "admin".to_string(),
            portainer_password: String::new(),
            cloudflare_enabled: false,
            cloudflare_api_token: None,
            cloudflare_zone_id: None,
            server_ip: "127.0.0.1".to_string(),
            jwt_secret: "default-dev-secret".to_string(),
            admin_email: "admin@beyondfire.cloud".to_string(),
            admin_password: "AdminPW!".to_string(),
        }
    }

    #[test]
    fn test_config_defaults() {
        // Clear any existing environment variables
        env::remove_var("API_HOST");
        env::remove_var("API_PORT");
        env::remove_var("DATA_DIR");
        env::remove_var("PORTAINER_URL");
        env::remove_var("PORTAINER_USERNAME");
        env::remove_var("PORTAINER_PASSWORD");
        env::remove_var("CLOUDFLARE_ENABLED");
        env::remove_var("CLOUDFLARE_API_TOKEN");
        env::remove_var("CLOUDFLARE_ZONE_ID");
        env::remove_var("SERVER_IP");
        env::remove_var("JWT_SECRET");
        env::remove_var("ADMIN_EMAIL");
        env::remove_var("ADMIN_PASSWORD");

        let config = Config::from_env().expect("Failed to load config");

        assert_eq!(config.api_host, "0.0.0.0");
        assert_eq!(config.api_port, 3000);
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.portainer_url, "http://localhost:9000");
        assert!(!config.cloudflare_enabled);
        assert_eq!(config.jwt_secret, "default-dev-secret");
        assert_eq!(config.admin_email, "admin@beyondfire.cloud");
    }

    #[test]
    fn test_api_address() {
        let mut config = base_config();
        config.api_host = "127.0.0.1".to_string();
        config.api_port = 9000;

        assert_eq!(config.api_address(), "127.0.0.1:9000");
    }

    #[test]
    fn test_validate_invalid_port() {
        let mut config = base_config();
        config.api_port = 0;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("API_PORT must be greater than 0"));
    }

    #[test]
    fn test_validate_dns_requires_credentials() {
        let mut config = base_config();
        config.cloudflare_enabled = true;
        config.cloudflare_api_token = Some("token".to_string());
        config.cloudflare_zone_id = None;

        assert!(config.validate().is_err());

        config.cloudflare_zone_id = Some("zone".to_string());
        assert!(config.validate().is_ok());
    }
}
