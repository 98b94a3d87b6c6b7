//! JSON-file-backed stores for bookings, users, and the service catalog
//!
//! Each store keeps its collection in memory behind a lock and rewrites the
//! whole file on every mutation. Validate-then-insert cycles run under the
//! write lock, so uniqueness checks cannot race each other.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use beyondfire_common::{
    booking::{full_domain, generate_subdomain, random_port},
    service::default_catalog,
    Booking, BookingStatus, Error, LicenseInfo, PublicUser, Result, Role, ServiceDefinition,
    ServiceSummary, User,
};

use crate::auth;

/// Retries for generated-domain collisions
const DOMAIN_ATTEMPTS: usize = 5;

/// Retries for port collisions against other bookings
const PORT_ATTEMPTS: usize = 10;

fn load_or_init<T>(path: &Path, initial: &[T]) -> Result<Vec<T>>
where
    T: Serialize + DeserializeOwned + Clone,
{
    if path.exists() {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    } else {
        save(path, initial)?;
        Ok(initial.to_vec())
    }
}

fn save<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    let json = serde_json::to_string_pretty(items)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Store for bookings, persisted to `bookings.json`
pub struct BookingStore {
    path: PathBuf,
    bookings: RwLock<Vec<Booking>>,
}

impl BookingStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("bookings.json");
        let bookings = load_or_init::<Booking>(&path, &[])?;
        Ok(Self {
            path,
            bookings: RwLock::new(bookings),
        })
    }

    /// Validate and create a booking
    ///
    /// `custom_domain` is the customer-chosen subdomain label; when empty or
    /// absent a `<service_id>-<hex>` subdomain is generated. License
    /// credentials are required if and only if the service demands them.
    pub async fn book(
        &self,
        user_id: &str,
        service: &ServiceDefinition,
        custom_domain: Option<&str>,
        custom_name: Option<&str>,
        license_info: Option<LicenseInfo>,
    ) -> Result<Booking> {
        let mut bookings = self.bookings.write().await;

        let license_info = if service.requires_license {
            match license_info {
                Some(license) if !license.email.is_empty() && !license.password.is_empty() => {
                    Some(license)
                }
                _ => {
                    return Err(Error::Validation(format!(
                        "Service '{}' requires license email and password",
                        service.id
                    )))
                }
            }
        } else {
            None
        };

        let domain = match custom_domain.filter(|d| !d.is_empty()) {
            Some(subdomain) => {
                let domain = full_domain(subdomain);
                if bookings.iter().any(|b| b.domain == domain) {
                    return Err(Error::Validation(format!(
                        "Domain '{}' is already in use, pick another subdomain",
                        domain
                    )));
                }
                domain
            }
            None => {
                let mut domain = full_domain(&generate_subdomain(&service.id));
                let mut attempts = 0;
                while bookings.iter().any(|b| b.domain == domain) && attempts < DOMAIN_ATTEMPTS {
                    domain = full_domain(&generate_subdomain(&service.id));
                    attempts += 1;
                }
                if bookings.iter().any(|b| b.domain == domain) {
                    return Err(Error::Validation(
                        "Could not generate a unique domain, try again later".to_string(),
                    ));
                }
                domain
            }
        };

        // Only checked against other bookings, nothing reserves the port
        // on the host itself
        let mut port = random_port();
        let mut attempts = 0;
        while bookings.iter().any(|b| b.port == port) && attempts < PORT_ATTEMPTS {
            port = random_port();
            attempts += 1;
        }

        let booking = Booking::new(
            user_id.to_string(),
            service.id.clone(),
            service.name.clone(),
            custom_name
                .filter(|n| !n.is_empty())
                .unwrap_or(&service.name)
                .to_string(),
            domain,
            port,
            license_info,
        );

        bookings.push(booking.clone());
        save(&self.path, &bookings)?;

        info!(
            "Booked service {} for user {} as booking {}",
            service.id, user_id, booking.id
        );
        Ok(booking)
    }

    pub async fn get(&self, id: &str) -> Option<Booking> {
        self.bookings.read().await.iter().find(|b| b.id == id).cloned()
    }

    pub async fn list_all(&self) -> Vec<Booking> {
        self.bookings.read().await.clone()
    }

    pub async fn list_for_user(&self, user_id: &str) -> Vec<Booking> {
        self.bookings
            .read()
            .await
            .iter()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn domain_in_use(&self, domain: &str) -> bool {
        self.bookings.read().await.iter().any(|b| b.domain == domain)
    }

    pub async fn port_in_use(&self, port: u16) -> bool {
        self.bookings.read().await.iter().any(|b| b.port == port)
    }

    /// Apply a status update and persist it. Stack id and DNS record id
    /// only overwrite when `Some`.
    pub async fn update_status(
        &self,
        id: &str,
        status: BookingStatus,
        stack_id: Option<i64>,
        dns_record_id: Option<String>,
    ) -> Result<Booking> {
        let mut bookings = self.bookings.write().await;
        let booking = bookings
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| Error::NotFound(format!("Booking {}", id)))?;
        booking.apply_status(status, stack_id, dns_record_id);
        let updated = booking.clone();
        save(&self.path, &bookings)?;
        debug!("Booking {} is now {}", id, status);
        Ok(updated)
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut bookings = self.bookings.write().await;
        let before = bookings.len();
        bookings.retain(|b| b.id != id);
        if bookings.len() == before {
            return Err(Error::NotFound(format!("Booking {}", id)));
        }
        save(&self.path, &bookings)?;
        Ok(())
    }
}

/// Store for user accounts, persisted to `users.json`
pub struct UserStore {
    path: PathBuf,
    users: RwLock<Vec<User>>,
}

impl UserStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("users.json");
        let users = load_or_init::<User>(&path, &[])?;
        Ok(Self {
            path,
            users: RwLock::new(users),
        })
    }

    /// Seed the default admin account when it is missing
    pub async fn ensure_default_admin(&self, email: &str, password: &str) -> Result<()> {
        let mut users = self.users.write().await;
        if users.iter().any(|u| u.email == email) {
            return Ok(());
        }

        info!("Creating default admin user {}", email);
        let (hash, salt) = auth::hash_password(password);
        users.push(User::new(
            email.to_string(),
            "Admin".to_string(),
            "BeyondFire Cloud".to_string(),
            hash,
            salt,
            Role::Admin,
        ));
        save(&self.path, &users)?;
        Ok(())
    }

    /// Create an account. Fails when the email is already taken.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
        company: &str,
    ) -> Result<PublicUser> {
        let mut users = self.users.write().await;
        if users.iter().any(|u| u.email == email) {
            return Err(Error::Validation("User already exists".to_string()));
        }

        let (hash, salt) = auth::hash_password(password);
        let user = User::new(
            email.to_string(),
            name.to_string(),
            company.to_string(),
            hash,
            salt,
            Role::User,
        );
        let public = user.sanitized();
        users.push(user);
        save(&self.path, &users)?;

        info!("Registered user {}", email);
        Ok(public)
    }

    /// Check credentials, returning the account on success. Unknown email
    /// and wrong password are indistinguishable to the caller.
    pub async fn verify_login(&self, email: &str, password: &str) -> Result<User> {
        let users = self.users.read().await;
        let user = users
            .iter()
            .find(|u| u.email == email)
            .ok_or_else(|| Error::Unauthorized("Invalid credentials".to_string()))?;

        if !auth::verify_password(password, &user.password_hash, &user.password_salt) {
            return Err(Error::Unauthorized("Invalid credentials".to_string()));
        }

        Ok(user.clone())
    }

    pub async fn get(&self, id: &str) -> Option<User> {
        self.users.read().await.iter().find(|u| u.id == id).cloned()
    }

    pub async fn get_by_email(&self, email: &str) -> Option<User> {
        self.users.read().await.iter().find(|u| u.email == email).cloned()
    }

    pub async fn list_all(&self) -> Vec<User> {
        self.users.read().await.clone()
    }

    pub async fn update_profile(
        &self,
        id: &str,
        name: Option<String>,
        company: Option<String>,
    ) -> Result<PublicUser> {
        let mut users = self.users.write().await;
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| Error::NotFound(format!("User {}", id)))?;

        if let Some(name) = name.filter(|n| !n.is_empty()) {
            user.name = name;
        }
        if let Some(company) = company {
            user.company = company;
        }

        let public = user.sanitized();
        save(&self.path, &users)?;
        Ok(public)
    }

    pub async fn update_role(&self, id: &str, role: Role) -> Result<PublicUser> {
        let mut users = self.users.write().await;
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| Error::NotFound(format!("User {}", id)))?;
        user.role = role;
        let public = user.sanitized();
        save(&self.path, &users)?;
        info!("User {} is now {}", id, role.as_str());
        Ok(public)
    }

    pub async fn reset_password(&self, id: &str, new_password: &str) -> Result<()> {
        let mut users = self.users.write().await;
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| Error::NotFound(format!("User {}", id)))?;

        let (hash, salt) = auth::hash_password(new_password);
        user.password_hash = hash;
        user.password_salt = salt;
        save(&self.path, &users)?;
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut users = self.users.write().await;
        let before = users.len();
        users.retain(|u| u.id != id);
        if users.len() == before {
            return Err(Error::NotFound(format!("User {}", id)));
        }
        save(&self.path, &users)?;
        Ok(())
    }

    /// Append to the user's deployed-services projection
    pub async fn add_service(&self, user_id: &str, summary: ServiceSummary) -> Result<()> {
        let mut users = self.users.write().await;
        let user = users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| Error::NotFound(format!("User {}", user_id)))?;
        user.services.push(summary);
        save(&self.path, &users)?;
        Ok(())
    }

    /// Drop a booking from the user's projection
    pub async fn remove_service(&self, user_id: &str, booking_id: &str) -> Result<()> {
        let mut users = self.users.write().await;
        let user = users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| Error::NotFound(format!("User {}", user_id)))?;

        let before = user.services.len();
        user.services.retain(|s| s.id != booking_id);
        if user.services.len() == before {
            return Err(Error::NotFound(format!(
                "Service {} on user {}",
                booking_id, user_id
            )));
        }
        save(&self.path, &users)?;
        Ok(())
    }
}

/// Read-mostly catalog of bookable services, persisted to `services.json`
pub struct ServiceCatalog {
    services: RwLock<Vec<ServiceDefinition>>,
}

impl ServiceCatalog {
    /// Load the catalog, seeding the default entries when the file is new
    pub fn new(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("services.json");
        let services = load_or_init(&path, &default_catalog())?;
        Ok(Self {
            services: RwLock::new(services),
        })
    }

    pub async fn list(&self) -> Vec<ServiceDefinition> {
        self.services.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<ServiceDefinition> {
        self.services.read().await.iter().find(|s| s.id == id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn license() -> LicenseInfo {
        LicenseInfo {
            email: "fw@example.org".to_string(),
            password: "secret".to_string(),
        }
    }

    async fn fe2(dir: &Path) -> ServiceDefinition {
        ServiceCatalog::new(dir).unwrap().get("fe2-docker").await.unwrap()
    }

    #[tokio::test]
    async fn test_booking_store_books_and_persists() {
        let dir = tempdir().unwrap();
        let store = BookingStore::new(dir.path()).unwrap();
        let service = fe2(dir.path()).await;

        let booking = store
            .book("user-1", &service, Some("brigade"), None, Some(license()))
            .await
            .unwrap();

        assert_eq!(booking.domain, "brigade.beyondfire.cloud");
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.custom_name, service.name);

        // A fresh store instance sees the booking on disk
        let reloaded = BookingStore::new(dir.path()).unwrap();
        let loaded = reloaded.get(&booking.id).await.unwrap();
        assert_eq!(loaded.domain, booking.domain);
        assert_eq!(loaded.port, booking.port);
    }

    #[tokio::test]
    async fn test_duplicate_domain_rejected() {
        let dir = tempdir().unwrap();
        let store = BookingStore::new(dir.path()).unwrap();
        let service = fe2(dir.path()).await;

        store
            .book("user-1", &service, Some("brigade"), None, Some(license()))
            .await
            .unwrap();

        let err = store
            .book("user-2", &service, Some("brigade"), None, Some(license()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("already in use"));
    }

    #[tokio::test]
    async fn test_generated_domain_has_service_prefix() {
        let dir = tempdir().unwrap();
        let store = BookingStore::new(dir.path()).unwrap();
        let service = fe2(dir.path()).await;

        let booking = store
            .book("user-1", &service, None, Some("My FE2"), Some(license()))
            .await
            .unwrap();

        assert!(booking.domain.starts_with("fe2-docker-"));
        assert!(booking.domain.ends_with(".beyondfire.cloud"));
        assert_eq!(booking.custom_name, "My FE2");
        assert!(store.domain_in_use(&booking.domain).await);
        assert!(store.port_in_use(booking.port).await);

        // An empty custom domain falls back to a generated one
        let booking = store
            .book("user-1", &service, Some(""), None, Some(license()))
            .await
            .unwrap();
        assert!(booking.domain.starts_with("fe2-docker-"));
    }

    #[tokio::test]
    async fn test_license_required_for_gated_service() {
        let dir = tempdir().unwrap();
        let store = BookingStore::new(dir.path()).unwrap();
        let service = fe2(dir.path()).await;

        let err = store
            .book("user-1", &service, None, None, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("license"));

        // Empty credentials are as bad as missing ones
        let empty = LicenseInfo {
            email: String::new(),
            password: String::new(),
        };
        let err = store
            .book("user-1", &service, None, None, Some(empty))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_update_status_and_remove() {
        let dir = tempdir().unwrap();
        let store = BookingStore::new(dir.path()).unwrap();
        let service = fe2(dir.path()).await;

        let booking = store
            .book("user-1", &service, None, None, Some(license()))
            .await
            .unwrap();

        let updated = store
            .update_status(&booking.id, BookingStatus::Deploying, Some(42), None)
            .await
            .unwrap();
        assert_eq!(updated.status, BookingStatus::Deploying);
        assert_eq!(updated.stack_id, Some(42));

        // Stack id survives updates that do not carry one
        let updated = store
            .update_status(&booking.id, BookingStatus::Active, None, None)
            .await
            .unwrap();
        assert_eq!(updated.stack_id, Some(42));

        store.remove(&booking.id).await.unwrap();
        assert!(store.get(&booking.id).await.is_none());
        assert!(store.remove(&booking.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_register_and_login() {
        let dir = tempdir().unwrap();
        let store = UserStore::new(dir.path()).unwrap();

        let public = store
            .register("fw@example.org", "hunter22", "Feuerwehr", "FF Test")
            .await
            .unwrap();
        assert_eq!(public.role, Role::User);

        let user = store.verify_login("fw@example.org", "hunter22").await.unwrap();
        assert_eq!(user.id, public.id);

        let err = store.verify_login("fw@example.org", "wrong").await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        let err = store.verify_login("nobody@example.org", "hunter22").await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let dir = tempdir().unwrap();
        let store = UserStore::new(dir.path()).unwrap();

        store
            .register("fw@example.org", "hunter22", "Feuerwehr", "")
            .await
            .unwrap();
        let err = store
            .register("fw@example.org", "other", "Other", "")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_default_admin_seeded_once() {
        let dir = tempdir().unwrap();
        let store = UserStore::new(dir.path()).unwrap();

        store
            .ensure_default_admin("admin@beyondfire.cloud", "AdminPW!")
            .await
            .unwrap();
        store
            .ensure_default_admin("admin@beyondfire.cloud", "AdminPW!")
            .await
            .unwrap();

        assert_eq!(store.list_all().await.len(), 1);
        let admin = store.get_by_email("admin@beyondfire.cloud").await.unwrap();
        assert!(admin.is_admin());
        store
            .verify_login("admin@beyondfire.cloud", "AdminPW!")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reset_password() {
        let dir = tempdir().unwrap();
        let store = UserStore::new(dir.path()).unwrap();

        let public = store
            .register("fw@example.org", "oldpass", "Feuerwehr", "")
            .await
            .unwrap();
        store.reset_password(&public.id, "newpass").await.unwrap();

        assert!(store.verify_login("fw@example.org", "oldpass").await.is_err());
        store.verify_login("fw@example.org", "newpass").await.unwrap();
    }

    #[tokio::test]
    async fn test_service_projection_add_remove() {
        let dir = tempdir().unwrap();
        let store = UserStore::new(dir.path()).unwrap();
        let public = store
            .register("fw@example.org", "hunter22", "Feuerwehr", "")
            .await
            .unwrap();

        let summary = ServiceSummary {
            id: "booking-1".to_string(),
            name: "My FE2".to_string(),
            domain: "brigade.beyondfire.cloud".to_string(),
            port: 14211,
            status: BookingStatus::Active,
            created_at: chrono::Utc::now(),
        };
        store.add_service(&public.id, summary).await.unwrap();
        assert_eq!(store.get(&public.id).await.unwrap().services.len(), 1);

        store.remove_service(&public.id, "booking-1").await.unwrap();
        assert!(store.get(&public.id).await.unwrap().services.is_empty());
        assert!(store
            .remove_service(&public.id, "booking-1")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_catalog_seeds_default_services() {
        let dir = tempdir().unwrap();
        let catalog = ServiceCatalog::new(dir.path()).unwrap();

        let services = catalog.list().await;
        assert_eq!(services.len(), 1);
        assert!(catalog.get("fe2-docker").await.is_some());
        assert!(catalog.get("unknown").await.is_none());

        // The seeded file is what a second instance loads
        assert!(dir.path().join("services.json").exists());
        let again = ServiceCatalog::new(dir.path()).unwrap();
        assert_eq!(again.list().await.len(), 1);
    }
}
