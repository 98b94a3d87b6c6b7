//! Booking domain model

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Suffix appended to every customer subdomain
pub const DOMAIN_SUFFIX: &str = "beyondfire.cloud";

/// Host port range assigned to bookings
pub const PORT_RANGE_START: u16 = 10000;
pub const PORT_RANGE_END: u16 = 20000;

/// How long a booking is valid after creation
pub const BOOKING_LIFETIME_DAYS: i64 = 30;

/// Lifecycle status of a booked service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Booked, never deployed
    Pending,
    /// Deployment in progress
    Deploying,
    /// Deployed and reachable
    Active,
    /// Stack removed from the platform, booking kept
    Suspended,
    /// Deployment failed
    Failed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Deploying => "deploying",
            BookingStatus::Active => "active",
            BookingStatus::Suspended => "suspended",
            BookingStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// License credentials for service types that require them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseInfo {
    pub email: String,
    pub password: String,
}

/// A customer's booking of one service instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    /// Unique booking identifier (UUID)
    pub id: String,

    /// Owner of the booking
    pub user_id: String,

    /// Which catalog entry was booked
    pub service_id: String,

    /// Catalog name at booking time
    pub service_name: String,

    /// Customer-chosen display name
    pub custom_name: String,

    /// Fully qualified domain, unique across all bookings
    pub domain: String,

    /// Host port assigned at booking time, never reassigned
    pub port: u16,

    /// Current lifecycle status
    pub status: BookingStatus,

    /// When the booking was created
    pub created_at: DateTime<Utc>,

    /// When the booking expires
    pub expires_at: DateTime<Utc>,

    /// Platform stack id, set by deployment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_id: Option<i64>,

    /// DNS record id, set when a record was created for the domain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_record_id: Option<String>,

    /// License credentials, present only for license-gated services
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_info: Option<LicenseInfo>,
}

impl Booking {
    /// Create a new pending booking
    pub fn new(
        user_id: String,
        service_id: String,
        service_name: String,
        custom_name: String,
        domain: String,
        port: u16,
        license_info: Option<LicenseInfo>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            service_id,
            service_name,
            custom_name,
            domain,
            port,
            status: BookingStatus::Pending,
            created_at: now,
            expires_at: now + Duration::days(BOOKING_LIFETIME_DAYS),
            stack_id: None,
            dns_record_id: None,
            license_info,
        }
    }

    /// First 8 characters of the booking id, used as a per-booking token
    /// in rendered templates and container names
    pub fn short_id(&self) -> &str {
        let end = self.id.len().min(8);
        &self.id[..end]
    }

    /// Apply a status update. Stack id and DNS record id only overwrite
    /// existing values when `Some`.
    pub fn apply_status(
        &mut self,
        status: BookingStatus,
        stack_id: Option<i64>,
        dns_record_id: Option<String>,
    ) {
        self.status = status;
        if stack_id.is_some() {
            self.stack_id = stack_id;
        }
        if dns_record_id.is_some() {
            self.dns_record_id = dns_record_id;
        }
    }
}

/// Generate a random subdomain for a service: `<service_id>-<6 hex chars>`
pub fn generate_subdomain(service_id: &str) -> String {
    let bytes: [u8; 3] = rand::random();
    format!("{}-{}", service_id, hex::encode(bytes))
}

/// Build the fully qualified domain for a subdomain
pub fn full_domain(subdomain: &str) -> String {
    format!("{}.{}", subdomain, DOMAIN_SUFFIX)
}

/// Draw a random host port from the booking port range
pub fn random_port() -> u16 {
    use rand::Rng;
    rand::thread_rng().gen_range(PORT_RANGE_START..PORT_RANGE_END)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_booking() -> Booking {
        Booking::new(
            "user-1".to_string(),
            "fe2-docker".to_string(),
            "FE2".to_string(),
            "My FE2".to_string(),
            "fe2-docker-abc123.beyondfire.cloud".to_string(),
            12345,
            None,
        )
    }

    #[test]
    fn test_new_booking_is_pending() {
        let booking = sample_booking();
        assert_eq!(booking.status, BookingStatus::Pending);
        assert!(booking.stack_id.is_none());
        assert!(booking.dns_record_id.is_none());
        let lifetime = booking.expires_at - booking.created_at;
        assert_eq!(lifetime.num_days(), BOOKING_LIFETIME_DAYS);
    }

    #[test]
    fn test_short_id_is_prefix() {
        let booking = sample_booking();
        assert_eq!(booking.short_id().len(), 8);
        assert!(booking.id.starts_with(booking.short_id()));
    }

    #[test]
    fn test_apply_status_keeps_ids_when_none() {
        let mut booking = sample_booking();
        booking.apply_status(BookingStatus::Deploying, Some(7), None);
        assert_eq!(booking.stack_id, Some(7));

        booking.apply_status(BookingStatus::Active, None, Some("dns-1".to_string()));
        assert_eq!(booking.stack_id, Some(7));
        assert_eq!(booking.dns_record_id.as_deref(), Some("dns-1"));

        booking.apply_status(BookingStatus::Suspended, None, None);
        assert_eq!(booking.stack_id, Some(7));
        assert_eq!(booking.dns_record_id.as_deref(), Some("dns-1"));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&BookingStatus::Deploying).unwrap();
        assert_eq!(json, "\"deploying\"");
        let parsed: BookingStatus = serde_json::from_str("\"suspended\"").unwrap();
        assert_eq!(parsed, BookingStatus::Suspended);
    }

    #[test]
    fn test_generate_subdomain_shape() {
        let subdomain = generate_subdomain("fe2-docker");
        let suffix = subdomain.strip_prefix("fe2-docker-").unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(
            full_domain(&subdomain),
            format!("{}.beyondfire.cloud", subdomain)
        );
    }

    #[test]
    fn test_random_port_in_range() {
        for _ in 0..100 {
            let port = random_port();
            assert!((PORT_RANGE_START..PORT_RANGE_END).contains(&port));
        }
    }
}
