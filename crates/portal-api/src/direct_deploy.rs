//! Direct compose deployment on the host
//!
//! Shells out to `docker compose` in a per-booking working directory under
//! the data dir, keeping an append-only deployment log next to the
//! manifest. Used before the platform fallback, and on hosts that run no
//! platform at all.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use beyondfire_common::{Error, Result};

use crate::deployment::ComposeRunner;

pub struct DirectDeployer {
    data_dir: PathBuf,
}

impl DirectDeployer {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
        }
    }

    fn service_dir(&self, booking_id: &str) -> PathBuf {
        self.data_dir.join(format!("service-{}", booking_id))
    }

    fn append_log(&self, booking_id: &str, message: &str) -> Result<()> {
        let path = self.service_dir(booking_id).join("deployment.log");
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "[{}] {}", Utc::now().to_rfc3339(), message)?;
        Ok(())
    }

    /// Write the manifest and bring the stack up
    ///
    /// Tries the `docker compose` plugin first, then the standalone
    /// `docker-compose` binary. A zero exit status is the success signal.
    pub async fn deploy(&self, booking_id: &str, compose_content: &str) -> Result<()> {
        let dir = self.service_dir(booking_id);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("docker-compose.yml"), compose_content)?;
        self.append_log(booking_id, "Starting direct deployment")?;

        let first = match compose_up(&dir, "docker", &["compose", "up", "-d"]).await {
            Ok(()) => {
                self.append_log(booking_id, "docker compose up succeeded")?;
                info!("Direct deployment of booking {} succeeded", booking_id);
                return Ok(());
            }
            Err(err) => err,
        };

        self.append_log(booking_id, &format!("docker compose up failed: {}", first))?;
        warn!(
            "docker compose failed for booking {}, trying docker-compose: {}",
            booking_id, first
        );

        match compose_up(&dir, "docker-compose", &["up", "-d"]).await {
            Ok(()) => {
                self.append_log(booking_id, "docker-compose up succeeded")?;
                info!(
                    "Direct deployment of booking {} succeeded via docker-compose",
                    booking_id
                );
                Ok(())
            }
            Err(second) => {
                self.append_log(booking_id, &format!("docker-compose up failed: {}", second))?;
                Err(Error::DirectDeploy(format!("{}; {}", first, second)))
            }
        }
    }

    /// Non-empty lines of the deployment log, oldest first. A booking that
    /// never went through the direct path has no log.
    pub async fn logs(&self, booking_id: &str) -> Result<Vec<String>> {
        let path = self.service_dir(booking_id).join("deployment.log");
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect())
    }
}

async fn compose_up(dir: &Path, program: &str, args: &[&str]) -> std::result::Result<(), String> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| format!("{} could not be started: {}", program, e))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(format!(
        "{} {} exited with {}: {}",
        program,
        args.join(" "),
        output.status,
        stderr.trim()
    ))
}

#[async_trait]
impl ComposeRunner for DirectDeployer {
    async fn deploy(&self, booking_id: &str, compose_content: &str) -> Result<()> {
        DirectDeployer::deploy(self, booking_id, compose_content).await
    }

    async fn logs(&self, booking_id: &str) -> Result<Vec<String>> {
        DirectDeployer::logs(self, booking_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    // Deliberately broken manifest so the test behaves the same with and
    // without a docker installation on the host
    const BROKEN_COMPOSE: &str = "definitely: [not, valid, compose";

    #[tokio::test]
    async fn test_deploy_writes_manifest_and_log() {
        let dir = tempdir().unwrap();
        let deployer = DirectDeployer::new(dir.path());

        let result = deployer.deploy("booking-1", BROKEN_COMPOSE).await;
        assert!(result.is_err());

        let service_dir = dir.path().join("service-booking-1");
        let manifest = std::fs::read_to_string(service_dir.join("docker-compose.yml")).unwrap();
        assert_eq!(manifest, BROKEN_COMPOSE);

        let lines = deployer.logs("booking-1").await.unwrap();
        assert!(!lines.is_empty());
        assert!(lines[0].starts_with('['));
        assert!(lines[0].contains("Starting direct deployment"));
        assert!(lines.iter().any(|l| l.contains("failed")));
    }

    #[tokio::test]
    async fn test_failure_reports_both_attempts() {
        let dir = tempdir().unwrap();
        let deployer = DirectDeployer::new(dir.path());

        let err = deployer.deploy("booking-2", BROKEN_COMPOSE).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("docker"));
        assert!(message.contains(';'));
    }

    #[tokio::test]
    async fn test_logs_empty_for_unknown_booking() {
        let dir = tempdir().unwrap();
        let deployer = DirectDeployer::new(dir.path());
        assert!(deployer.logs("nope").await.unwrap().is_empty());
    }
}
