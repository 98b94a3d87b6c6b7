pub mod booking;
pub mod error;
pub mod service;
pub mod user;

pub use booking::{Booking, BookingStatus, LicenseInfo};
pub use error::{Error, Result};
pub use service::{ServiceDefinition, ServiceResources};
pub use user::{PublicUser, Role, ServiceSummary, User};
