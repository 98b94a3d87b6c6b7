//! User account model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::BookingStatus;

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

/// Denormalized view of a deployed booking, kept on the owning user.
/// Convenience projection only; the booking store is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSummary {
    /// Booking id
    pub id: String,
    pub name: String,
    pub domain: String,
    pub port: u16,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
}

/// A portal account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user identifier (UUID)
    pub id: String,

    /// Login email, unique across all users
    pub email: String,

    pub name: String,

    pub company: String,

    /// PBKDF2-HMAC-SHA512 hash, hex encoded
    pub password_hash: String,

    /// Random salt, hex encoded
    pub password_salt: String,

    pub role: Role,

    pub created_at: DateTime<Utc>,

    /// Deployed services projection, maintained by the deployment flow
    pub services: Vec<ServiceSummary>,
}

/// User view with credential material stripped. The only user shape
/// that leaves the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub company: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub services: Vec<ServiceSummary>,
}

impl User {
    pub fn new(
        email: String,
        name: String,
        company: String,
        password_hash: String,
        password_salt: String,
        role: Role,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            email,
            name,
            company,
            password_hash,
            password_salt,
            role,
            created_at: Utc::now(),
            services: Vec::new(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Strip credential material
    pub fn sanitized(&self) -> PublicUser {
        PublicUser {
            id: self.id.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            company: self.company.clone(),
            role: self.role,
            created_at: self.created_at,
            services: self.services.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitized_drops_credentials() {
        let user = User::new(
            "a@b.cloud".to_string(),
            "A".to_string(),
            String::new(),
            "hash".to_string(),
            "salt".to_string(),
            Role::User,
        );
        let public = user.sanitized();
        let json = serde_json::to_value(&public).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("password_salt").is_none());
        assert_eq!(json["email"], "a@b.cloud");
    }

    #[test]
    fn test_role_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        assert_eq!(Role::User.as_str(), "user");
    }
}
