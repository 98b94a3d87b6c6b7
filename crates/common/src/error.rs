use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Platform authentication failed: {0}")]
    PlatformAuth(String),

    #[error("Platform request failed: {message}")]
    Platform {
        /// HTTP status returned by the platform, when the request got that far
        status: Option<u16>,
        message: String,
    },

    #[error("DNS error: {0}")]
    Dns(String),

    #[error("Direct deployment failed: {0}")]
    DirectDeploy(String),

    #[error("Deployment failed: {0}")]
    Deploy(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// True when the error means the referenced thing does not exist,
    /// either locally or on the platform side.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::Platform {
                    status: Some(404),
                    ..
                }
        )
    }

    /// True when the platform rejected our token
    pub fn is_platform_auth(&self) -> bool {
        matches!(
            self,
            Error::PlatformAuth(_)
                | Error::Platform {
                    status: Some(401 | 403),
                    ..
                }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
