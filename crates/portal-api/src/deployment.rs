//! Deployment orchestration
//!
//! Walks bookings through their lifecycle: render the manifest, deploy it
//! directly on the host or through the container platform, wire up DNS, and
//! tear everything down again. The platform, DNS provider, and compose
//! runner are trait objects injected at construction, so the whole flow
//! runs against in-memory doubles in tests.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use tracing::{error, info, warn};

use beyondfire_common::{Booking, BookingStatus, Error, Result, ServiceSummary};

use crate::compose;
use crate::storage::{BookingStore, ServiceCatalog, UserStore};

/// A stack registered on the container platform
#[derive(Debug, Clone)]
pub struct StackRef {
    pub id: i64,
    pub name: String,
}

/// Platform reachability report for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct PlatformStatus {
    pub version: String,
    pub endpoints: usize,
}

/// Where a log line was collected from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    Direct,
    Portainer,
}

/// One line of the merged deployment log view
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub source: LogSource,
    pub message: String,
}

/// Stack lifecycle operations on the container platform
#[async_trait]
pub trait StackPlatform: Send + Sync {
    async fn authenticate(&self) -> Result<()>;
    async fn stack_exists(&self, name: &str) -> Result<bool>;
    async fn create_stack(&self, name: &str, compose_content: &str) -> Result<StackRef>;
    async fn delete_stack(&self, stack_id: i64, remove_volumes: bool) -> Result<()>;
    async fn delete_stack_volumes(&self, stack_id: i64) -> Result<()>;
    async fn stack_logs(&self, stack_id: i64) -> Result<Vec<String>>;
    async fn probe(&self) -> Result<PlatformStatus>;
}

/// DNS record management for booked domains
#[async_trait]
pub trait DnsProvider: Send + Sync {
    fn is_enabled(&self) -> bool;
    async fn create_record(&self, name: &str, ip: &str) -> Result<String>;
    async fn delete_record(&self, record_id: &str) -> Result<()>;
}

/// Compose deployment straight on the host, bypassing the platform
#[async_trait]
pub trait ComposeRunner: Send + Sync {
    async fn deploy(&self, booking_id: &str, compose_content: &str) -> Result<()>;
    async fn logs(&self, booking_id: &str) -> Result<Vec<String>>;
}

/// Orchestrates booking deployments across the injected collaborators
pub struct DeploymentService {
    bookings: Arc<BookingStore>,
    users: Arc<UserStore>,
    catalog: Arc<ServiceCatalog>,
    platform: Arc<dyn StackPlatform>,
    dns: Arc<dyn DnsProvider>,
    runner: Arc<dyn ComposeRunner>,
    data_dir: PathBuf,
    server_ip: String,
}

impl DeploymentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bookings: Arc<BookingStore>,
        users: Arc<UserStore>,
        catalog: Arc<ServiceCatalog>,
        platform: Arc<dyn StackPlatform>,
        dns: Arc<dyn DnsProvider>,
        runner: Arc<dyn ComposeRunner>,
        data_dir: PathBuf,
        server_ip: String,
    ) -> Self {
        Self {
            bookings,
            users,
            catalog,
            platform,
            dns,
            runner,
            data_dir,
            server_ip,
        }
    }

    /// Deploy a booking end to end
    ///
    /// Synchronous: when this returns the booking is `active`, or `failed`
    /// with the error passed back to the caller.
    pub async fn deploy(&self, booking_id: &str) -> Result<Booking> {
        let booking = self
            .bookings
            .get(booking_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Booking {}", booking_id)))?;

        if !matches!(
            booking.status,
            BookingStatus::Pending | BookingStatus::Failed
        ) {
            return Err(Error::Validation(format!(
                "Booking {} is {} and cannot be deployed",
                booking.id, booking.status
            )));
        }

        match self.run_deploy(&booking).await {
            Ok(updated) => Ok(updated),
            Err(err) => {
                error!("Deployment of booking {} failed: {}", booking.id, err);
                if let Err(status_err) = self
                    .bookings
                    .update_status(&booking.id, BookingStatus::Failed, None, None)
                    .await
                {
                    error!(
                        "Could not mark booking {} as failed: {}",
                        booking.id, status_err
                    );
                }
                Err(err)
            }
        }
    }

    async fn run_deploy(&self, booking: &Booking) -> Result<Booking> {
        let service = self
            .catalog
            .get(&booking.service_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Service {}", booking.service_id)))?;

        let manifest = compose::render_compose(&service, booking)?;
        if let Some(proxy_conf) = compose::render_proxy_conf(&service, booking)? {
            self.write_proxy_conf(booking, &proxy_conf)?;
        }

        let stack_id = match self.runner.deploy(&booking.id, &manifest).await {
            Ok(()) => {
                info!("Booking {} deployed directly on the host", booking.id);
                None
            }
            Err(direct_err) => {
                warn!(
                    "Direct deployment of booking {} failed, falling back to the platform: {}",
                    booking.id, direct_err
                );
                let stack = self
                    .platform_create(booking, &manifest)
                    .await
                    .map_err(|platform_err| {
                        Error::Deploy(format!(
                            "all deployment paths failed: direct: {}; platform: {}",
                            direct_err, platform_err
                        ))
                    })?;
                Some(stack.id)
            }
        };

        self.bookings
            .update_status(&booking.id, BookingStatus::Deploying, stack_id, None)
            .await?;

        let dns_record_id = if self.dns.is_enabled() {
            match self
                .dns
                .create_record(&booking.domain, &self.server_ip)
                .await
            {
                Ok(record_id) => {
                    info!("Created DNS record {} for {}", record_id, booking.domain);
                    Some(record_id)
                }
                Err(err) => {
                    warn!(
                        "DNS record creation for {} failed, domain must be pointed manually: {}",
                        booking.domain, err
                    );
                    None
                }
            }
        } else {
            None
        };

        let updated = self
            .bookings
            .update_status(&booking.id, BookingStatus::Active, None, dns_record_id)
            .await?;

        let summary = ServiceSummary {
            id: updated.id.clone(),
            name: updated.custom_name.clone(),
            domain: updated.domain.clone(),
            port: updated.port,
            status: updated.status,
            created_at: updated.created_at,
        };
        if let Err(err) = self.users.add_service(&updated.user_id, summary).await {
            warn!(
                "Could not record service {} on user {}: {}",
                updated.id, updated.user_id, err
            );
        }

        Ok(updated)
    }

    /// Write the rendered reverse-proxy config where the containers mount it
    fn write_proxy_conf(&self, booking: &Booking, proxy_conf: &str) -> Result<()> {
        let base = self
            .data_dir
            .join(format!("{}_{}", booking.service_id, booking.id));
        let conf_dir = base.join("nginx").join("conf");
        std::fs::create_dir_all(&conf_dir)?;
        std::fs::write(conf_dir.join("default.conf"), proxy_conf)?;
        // The app container expects this host directory at first boot
        std::fs::create_dir_all(base.join("config").join("data"))?;
        Ok(())
    }

    async fn platform_create(&self, booking: &Booking, manifest: &str) -> Result<StackRef> {
        self.platform.authenticate().await?;

        let mut name = stack_name(&booking.user_id, &booking.service_id);
        if self.platform.stack_exists(&name).await? {
            let renamed = format!("{}-{}", name, random_suffix(5));
            info!("Stack name {} is taken, using {}", name, renamed);
            name = renamed;
        }

        self.platform.create_stack(&name, manifest).await
    }

    /// Tear the stack down without releasing the domain, port, or volumes
    pub async fn suspend(&self, booking_id: &str) -> Result<Booking> {
        let booking = self
            .bookings
            .get(booking_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Booking {}", booking_id)))?;

        let stack_id = booking.stack_id.ok_or_else(|| {
            Error::Validation(format!("Booking {} has no stack to suspend", booking.id))
        })?;

        self.platform.authenticate().await?;
        match self.platform.delete_stack(stack_id, false).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                info!(
                    "Stack {} was already gone, suspending booking {} anyway",
                    stack_id, booking.id
                );
            }
            Err(err) => return Err(err),
        }

        // The stale stack id stays on the booking
        self.bookings
            .update_status(&booking.id, BookingStatus::Suspended, None, None)
            .await
    }

    /// Recreate the stack for a suspended booking
    pub async fn resume(&self, booking_id: &str) -> Result<Booking> {
        let booking = self
            .bookings
            .get(booking_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Booking {}", booking_id)))?;

        if booking.status != BookingStatus::Suspended {
            return Err(Error::Validation(format!(
                "Booking {} is {} and cannot be resumed",
                booking.id, booking.status
            )));
        }

        let service = self
            .catalog
            .get(&booking.service_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Service {}", booking.service_id)))?;
        let manifest = compose::render_compose(&service, &booking)?;

        let stack = self.platform_create(&booking, &manifest).await?;
        self.bookings
            .update_status(&booking.id, BookingStatus::Active, Some(stack.id), None)
            .await
    }

    /// Remove the booking and everything provisioned for it
    ///
    /// Safe to re-run after a partial failure: already-deleted stacks are
    /// treated as success.
    pub async fn delete(&self, booking_id: &str) -> Result<()> {
        let booking = self
            .bookings
            .get(booking_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Booking {}", booking_id)))?;

        if let Some(stack_id) = booking.stack_id {
            self.platform.authenticate().await?;

            if let Err(err) = self.platform.delete_stack_volumes(stack_id).await {
                warn!("Volume cleanup for stack {} failed: {}", stack_id, err);
            }

            match self.platform.delete_stack(stack_id, true).await {
                Ok(()) => info!("Deleted stack {} for booking {}", stack_id, booking.id),
                Err(err) if err.is_not_found() => {
                    info!("Stack {} was already gone", stack_id);
                }
                Err(err) => return Err(err),
            }
        }

        if self.dns.is_enabled() {
            if let Some(record_id) = &booking.dns_record_id {
                if let Err(err) = self.dns.delete_record(record_id).await {
                    warn!("DNS record {} could not be removed: {}", record_id, err);
                }
            }
        }

        if let Err(err) = self
            .users
            .remove_service(&booking.user_id, &booking.id)
            .await
        {
            warn!(
                "Could not drop service {} from user {}: {}",
                booking.id, booking.user_id, err
            );
        }

        self.bookings.remove(&booking.id).await
    }

    /// Merge the log lines from both deployment paths
    pub async fn logs(&self, booking_id: &str) -> Result<Vec<LogEntry>> {
        let booking = self
            .bookings
            .get(booking_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Booking {}", booking_id)))?;

        let mut entries = Vec::new();

        match self.runner.logs(&booking.id).await {
            Ok(lines) => entries.extend(lines.into_iter().map(|message| LogEntry {
                source: LogSource::Direct,
                message,
            })),
            Err(err) => warn!("Direct log read for booking {} failed: {}", booking.id, err),
        }

        if let Some(stack_id) = booking.stack_id {
            match self.platform.stack_logs(stack_id).await {
                Ok(lines) => entries.extend(lines.into_iter().map(|message| LogEntry {
                    source: LogSource::Portainer,
                    message,
                })),
                Err(err) => warn!("Platform log read for stack {} failed: {}", stack_id, err),
            }
        }

        Ok(entries)
    }
}

/// `customer-<first 8 of the user id>-<service id>`
pub(crate) fn stack_name(user_id: &str, service_id: &str) -> String {
    let prefix_len = user_id.len().min(8);
    format!("customer-{}-{}", &user_id[..prefix_len], service_id)
}

fn random_suffix(len: usize) -> String {
    const CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    use beyondfire_common::LicenseInfo;
    use tempfile::tempdir;

    #[derive(Default)]
    struct PlatformState {
        next_id: i64,
        stacks: Vec<StackRef>,
        deleted: Vec<(i64, bool)>,
        volume_purges: Vec<i64>,
    }

    struct FakePlatform {
        fail_auth: AtomicBool,
        fail_create: AtomicBool,
        state: StdMutex<PlatformState>,
    }

    impl FakePlatform {
        fn new() -> Self {
            Self {
                fail_auth: AtomicBool::new(false),
                fail_create: AtomicBool::new(false),
                state: StdMutex::new(PlatformState {
                    next_id: 1,
                    ..Default::default()
                }),
            }
        }
    }

    #[async_trait]
    impl StackPlatform for FakePlatform {
        async fn authenticate(&self) -> Result<()> {
            if self.fail_auth.load(Ordering::SeqCst) {
                return Err(Error::PlatformAuth("connection refused".to_string()));
            }
            Ok(())
        }

        async fn stack_exists(&self, name: &str) -> Result<bool> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .stacks
                .iter()
                .any(|s| s.name == name))
        }

        async fn create_stack(&self, name: &str, _compose_content: &str) -> Result<StackRef> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(Error::Platform {
                    status: Some(500),
                    message: "stack creation failed with status 500".to_string(),
                });
            }
            let mut state = self.state.lock().unwrap();
            let stack = StackRef {
                id: state.next_id,
                name: name.to_string(),
            };
            state.next_id += 1;
            state.stacks.push(stack.clone());
            Ok(stack)
        }

        async fn delete_stack(&self, stack_id: i64, remove_volumes: bool) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            let before = state.stacks.len();
            state.stacks.retain(|s| s.id != stack_id);
            if state.stacks.len() == before {
                return Err(Error::Platform {
                    status: Some(404),
                    message: format!("stack {} not found", stack_id),
                });
            }
            state.deleted.push((stack_id, remove_volumes));
            Ok(())
        }

        async fn delete_stack_volumes(&self, stack_id: i64) -> Result<()> {
            self.state.lock().unwrap().volume_purges.push(stack_id);
            Ok(())
        }

        async fn stack_logs(&self, stack_id: i64) -> Result<Vec<String>> {
            Ok(vec![format!("Stack {} is registered on the platform", stack_id)])
        }

        async fn probe(&self) -> Result<PlatformStatus> {
            Ok(PlatformStatus {
                version: "2.19.0".to_string(),
                endpoints: 1,
            })
        }
    }

    struct FakeDns {
        enabled: bool,
        fail: bool,
        records: StdMutex<Vec<String>>,
    }

    impl FakeDns {
        fn new(enabled: bool, fail: bool) -> Self {
            Self {
                enabled,
                fail,
                records: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DnsProvider for FakeDns {
        fn is_enabled(&self) -> bool {
            self.enabled
        }

        async fn create_record(&self, name: &str, _ip: &str) -> Result<String> {
            if self.fail {
                return Err(Error::Dns("zone unavailable".to_string()));
            }
            let id = format!("rec-{}", name);
            self.records.lock().unwrap().push(id.clone());
            Ok(id)
        }

        async fn delete_record(&self, record_id: &str) -> Result<()> {
            self.records.lock().unwrap().retain(|r| r != record_id);
            Ok(())
        }
    }

    struct FakeRunner {
        fail: bool,
        deployed: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl ComposeRunner for FakeRunner {
        async fn deploy(&self, booking_id: &str, _compose_content: &str) -> Result<()> {
            if self.fail {
                return Err(Error::DirectDeploy(
                    "docker compose exited with 1".to_string(),
                ));
            }
            self.deployed.lock().unwrap().push(booking_id.to_string());
            Ok(())
        }

        async fn logs(&self, booking_id: &str) -> Result<Vec<String>> {
            let deployed = self.deployed.lock().unwrap();
            if deployed.iter().any(|id| id == booking_id) {
                Ok(vec!["Starting direct deployment".to_string()])
            } else {
                Ok(Vec::new())
            }
        }
    }

    struct Harness {
        service: Arc<DeploymentService>,
        bookings: Arc<BookingStore>,
        users: Arc<UserStore>,
        catalog: Arc<ServiceCatalog>,
        platform: Arc<FakePlatform>,
        dns: Arc<FakeDns>,
        _dir: tempfile::TempDir,
    }

    fn harness(direct_fails: bool, platform: FakePlatform, dns: FakeDns) -> Harness {
        let dir = tempdir().unwrap();
        let bookings = Arc::new(BookingStore::new(dir.path()).unwrap());
        let users = Arc::new(UserStore::new(dir.path()).unwrap());
        let catalog = Arc::new(ServiceCatalog::new(dir.path()).unwrap());
        let platform = Arc::new(platform);
        let dns = Arc::new(dns);
        let runner = Arc::new(FakeRunner {
            fail: direct_fails,
            deployed: StdMutex::new(Vec::new()),
        });

        let service = Arc::new(DeploymentService::new(
            bookings.clone(),
            users.clone(),
            catalog.clone(),
            platform.clone(),
            dns.clone(),
            runner,
            dir.path().to_path_buf(),
            "203.0.113.10".to_string(),
        ));

        Harness {
            service,
            bookings,
            users,
            catalog,
            platform,
            dns,
            _dir: dir,
        }
    }

    async fn book_fe2(h: &Harness) -> Booking {
        let owner = h
            .users
            .register("fw@example.org", "hunter22", "Feuerwehr", "FF Test")
            .await
            .unwrap();
        let service = h.catalog.get("fe2-docker").await.unwrap();
        let license = LicenseInfo {
            email: "fw@example.org".to_string(),
            password: "secret".to_string(),
        };
        h.bookings
            .book(&owner.id, &service, None, None, Some(license))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_deploy_direct_path_activates_booking() {
        let h = harness(false, FakePlatform::new(), FakeDns::new(true, false));
        let booking = book_fe2(&h).await;

        let deployed = h.service.deploy(&booking.id).await.unwrap();
        assert_eq!(deployed.status, BookingStatus::Active);
        assert_eq!(deployed.stack_id, None);
        assert!(deployed.dns_record_id.is_some());

        // The owner's projection carries the active service
        let owner = h.users.get(&deployed.user_id).await.unwrap();
        assert_eq!(owner.services.len(), 1);
        assert_eq!(owner.services[0].status, BookingStatus::Active);
        assert_eq!(owner.services[0].domain, deployed.domain);
    }

    #[tokio::test]
    async fn test_deploy_falls_back_to_platform() {
        let h = harness(true, FakePlatform::new(), FakeDns::new(false, false));
        let booking = book_fe2(&h).await;

        let deployed = h.service.deploy(&booking.id).await.unwrap();
        assert_eq!(deployed.status, BookingStatus::Active);
        assert_eq!(deployed.stack_id, Some(1));
        assert_eq!(deployed.dns_record_id, None);

        let state = h.platform.state.lock().unwrap();
        assert_eq!(state.stacks.len(), 1);
        assert!(state.stacks[0].name.starts_with("customer-"));
        assert!(state.stacks[0].name.ends_with("-fe2-docker"));
    }

    #[tokio::test]
    async fn test_deploy_failure_marks_booking_failed() {
        let h = harness(true, FakePlatform::new(), FakeDns::new(false, false));
        h.platform.fail_create.store(true, Ordering::SeqCst);
        let booking = book_fe2(&h).await;

        let err = h.service.deploy(&booking.id).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("direct"));
        assert!(message.contains("platform"));

        let failed = h.bookings.get(&booking.id).await.unwrap();
        assert_eq!(failed.status, BookingStatus::Failed);
        assert_eq!(failed.stack_id, None);
    }

    #[tokio::test]
    async fn test_deploy_rejects_booking_in_wrong_state() {
        let h = harness(false, FakePlatform::new(), FakeDns::new(false, false));
        let booking = book_fe2(&h).await;

        h.service.deploy(&booking.id).await.unwrap();
        let err = h.service.deploy(&booking.id).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("cannot be deployed"));
    }

    #[tokio::test]
    async fn test_failed_booking_can_be_redeployed() {
        let h = harness(true, FakePlatform::new(), FakeDns::new(false, false));
        h.platform.fail_auth.store(true, Ordering::SeqCst);
        let booking = book_fe2(&h).await;

        h.service.deploy(&booking.id).await.unwrap_err();
        assert_eq!(
            h.bookings.get(&booking.id).await.unwrap().status,
            BookingStatus::Failed
        );

        // Platform comes back, redeploy succeeds from the failed state
        h.platform.fail_auth.store(false, Ordering::SeqCst);
        let deployed = h.service.deploy(&booking.id).await.unwrap();
        assert_eq!(deployed.status, BookingStatus::Active);
        assert_eq!(deployed.stack_id, Some(1));
    }

    #[tokio::test]
    async fn test_suspend_requires_a_stack() {
        let h = harness(false, FakePlatform::new(), FakeDns::new(false, false));
        let booking = book_fe2(&h).await;
        h.service.deploy(&booking.id).await.unwrap();

        // Direct deployments never get a stack id
        let err = h.service.suspend(&booking.id).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("no stack"));
    }

    #[tokio::test]
    async fn test_suspend_and_resume_cycle() {
        let h = harness(true, FakePlatform::new(), FakeDns::new(false, false));
        let booking = book_fe2(&h).await;

        let deployed = h.service.deploy(&booking.id).await.unwrap();
        assert_eq!(deployed.stack_id, Some(1));

        let suspended = h.service.suspend(&booking.id).await.unwrap();
        assert_eq!(suspended.status, BookingStatus::Suspended);
        assert_eq!(suspended.stack_id, Some(1));
        {
            let state = h.platform.state.lock().unwrap();
            assert_eq!(state.deleted, vec![(1, false)]);
            assert!(state.stacks.is_empty());
        }

        let resumed = h.service.resume(&booking.id).await.unwrap();
        assert_eq!(resumed.status, BookingStatus::Active);
        assert_eq!(resumed.stack_id, Some(2));
        assert_eq!(resumed.domain, deployed.domain);
        assert_eq!(resumed.port, deployed.port);
    }

    #[tokio::test]
    async fn test_resume_requires_suspended_state() {
        let h = harness(true, FakePlatform::new(), FakeDns::new(false, false));
        let booking = book_fe2(&h).await;
        h.service.deploy(&booking.id).await.unwrap();

        let err = h.service.resume(&booking.id).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("cannot be resumed"));
    }

    #[tokio::test]
    async fn test_suspend_tolerates_vanished_stack() {
        let h = harness(true, FakePlatform::new(), FakeDns::new(false, false));
        let booking = book_fe2(&h).await;
        h.service.deploy(&booking.id).await.unwrap();

        // Someone removed the stack behind our back
        h.platform.state.lock().unwrap().stacks.clear();

        let suspended = h.service.suspend(&booking.id).await.unwrap();
        assert_eq!(suspended.status, BookingStatus::Suspended);
    }

    #[tokio::test]
    async fn test_delete_cleans_up_everything() {
        let h = harness(true, FakePlatform::new(), FakeDns::new(true, false));
        let booking = book_fe2(&h).await;
        let deployed = h.service.deploy(&booking.id).await.unwrap();
        assert!(deployed.dns_record_id.is_some());

        h.service.delete(&booking.id).await.unwrap();

        assert!(h.bookings.get(&booking.id).await.is_none());
        let state = h.platform.state.lock().unwrap();
        assert_eq!(state.deleted, vec![(1, true)]);
        assert_eq!(state.volume_purges, vec![1]);
        assert!(h.dns.records.lock().unwrap().is_empty());
        let owner = h.users.get(&deployed.user_id).await.unwrap();
        assert!(owner.services.is_empty());

        // A second delete has nothing left to remove
        let err = h.service.delete(&booking.id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_stack() {
        let h = harness(true, FakePlatform::new(), FakeDns::new(false, false));
        let booking = book_fe2(&h).await;
        h.service.deploy(&booking.id).await.unwrap();

        h.platform.state.lock().unwrap().stacks.clear();

        h.service.delete(&booking.id).await.unwrap();
        assert!(h.bookings.get(&booking.id).await.is_none());
    }

    #[tokio::test]
    async fn test_dns_failure_does_not_fail_deploy() {
        let h = harness(false, FakePlatform::new(), FakeDns::new(true, true));
        let booking = book_fe2(&h).await;

        let deployed = h.service.deploy(&booking.id).await.unwrap();
        assert_eq!(deployed.status, BookingStatus::Active);
        assert_eq!(deployed.dns_record_id, None);
    }

    #[tokio::test]
    async fn test_stack_name_collision_gets_suffix() {
        let h = harness(true, FakePlatform::new(), FakeDns::new(false, false));
        let booking = book_fe2(&h).await;
        let expected = stack_name(&booking.user_id, &booking.service_id);

        h.platform.state.lock().unwrap().stacks.push(StackRef {
            id: 99,
            name: expected.clone(),
        });

        h.service.deploy(&booking.id).await.unwrap();

        let state = h.platform.state.lock().unwrap();
        let created = state.stacks.iter().find(|s| s.id != 99).unwrap();
        assert!(created.name.starts_with(&format!("{}-", expected)));
        assert_eq!(created.name.len(), expected.len() + 6);
    }

    #[tokio::test]
    async fn test_logs_merge_both_sources() {
        let h = harness(true, FakePlatform::new(), FakeDns::new(false, false));
        let booking = book_fe2(&h).await;
        h.service.deploy(&booking.id).await.unwrap();

        let entries = h.service.logs(&booking.id).await.unwrap();
        assert!(entries.iter().any(|e| e.source == LogSource::Portainer));
        assert!(!entries.iter().any(|e| e.source == LogSource::Direct));
    }

    #[test]
    fn test_stack_name_shape() {
        assert_eq!(
            stack_name("0123456789abcdef", "fe2-docker"),
            "customer-01234567-fe2-docker"
        );
        assert_eq!(stack_name("short", "fe2-docker"), "customer-short-fe2-docker");
    }

    #[test]
    fn test_random_suffix_charset() {
        let suffix = random_suffix(5);
        assert_eq!(suffix.len(), 5);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
}
