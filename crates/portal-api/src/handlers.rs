//! API request handlers for the customer portal

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use beyondfire_common::{
    Booking, Error as CommonError, LicenseInfo, PublicUser, Role, ServiceDefinition, User,
};

use crate::{
    auth::{self, AuthUser},
    config::Config,
    deployment::{DeploymentService, LogEntry, StackPlatform},
    storage::{BookingStore, ServiceCatalog, UserStore},
};

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub bookings: Arc<BookingStore>,
    pub users: Arc<UserStore>,
    pub catalog: Arc<ServiceCatalog>,
    pub platform: Arc<dyn StackPlatform>,
    pub deployer: Arc<DeploymentService>,
}

/// API Error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message
        });

        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl From<CommonError> for ApiError {
    fn from(err: CommonError) -> Self {
        let status = match &err {
            CommonError::Validation(_) => StatusCode::BAD_REQUEST,
            CommonError::NotFound(_) => StatusCode::NOT_FOUND,
            CommonError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            CommonError::Forbidden(_) => StatusCode::FORBIDDEN,
            // Operation-level failures surface to the caller as a plain
            // bad request with the human-readable cause
            CommonError::PlatformAuth(_)
            | CommonError::Platform { .. }
            | CommonError::Dns(_)
            | CommonError::DirectDeploy(_)
            | CommonError::Deploy(_)
            | CommonError::Template(_) => StatusCode::BAD_REQUEST,
            CommonError::JsonSerialization(_) | CommonError::Io(_) | CommonError::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        ApiError {
            status,
            message: err.to_string(),
        }
    }
}

fn require_admin(auth: &AuthUser) -> Result<(), ApiError> {
    if auth.is_admin() {
        Ok(())
    } else {
        Err(ApiError::forbidden("Admin access required"))
    }
}

/// Request to create an account
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub company: Option<String>,
}

/// Login credentials
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Successful login, with the session token
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub message: String,
    pub user: PublicUser,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct MessageUserResponse {
    pub message: String,
    pub user: PublicUser,
}

/// Profile fields a user may change
#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ServicesResponse {
    pub services: Vec<ServiceDefinition>,
}

#[derive(Debug, Serialize)]
pub struct ServiceResponse {
    pub service: ServiceDefinition,
}

/// Request to book a service from the catalog
#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub service_id: String,
    #[serde(default)]
    pub custom_domain: Option<String>,
    #[serde(default)]
    pub custom_name: Option<String>,
    #[serde(default)]
    pub license_info: Option<LicenseInfo>,
}

#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub booking: Booking,
}

#[derive(Debug, Serialize)]
pub struct BookingsResponse {
    pub bookings: Vec<Booking>,
}

/// Outcome of a booking operation, with the updated record
#[derive(Debug, Serialize)]
pub struct BookingActionResponse {
    pub message: String,
    pub booking: Booking,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<LogEntry>,
}

/// Platform connectivity report
#[derive(Debug, Serialize)]
pub struct PortainerStatusResponse {
    pub status: String,
    pub version: String,
    pub message: String,
    pub endpoints: usize,
}

#[derive(Debug, Serialize)]
pub struct UsersResponse {
    pub users: Vec<PublicUser>,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: Role,
}

/// A booking enriched with its owner, for the admin overview
#[derive(Debug, Serialize)]
pub struct AdminServiceView {
    #[serde(flatten)]
    pub booking: Booking,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AdminServicesResponse {
    pub services: Vec<AdminServiceView>,
}

#[derive(Debug, Serialize)]
pub struct AdminActionResponse {
    pub message: String,
    pub status: String,
}

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "portal-api"
    }))
}

/// Create an account
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<MessageUserResponse>), ApiError> {
    info!("Registering user {}", payload.email);

    if payload.email.is_empty() || payload.password.is_empty() || payload.name.is_empty() {
        return Err(ApiError::bad_request("Email, password and name are required"));
    }

    let user = state
        .users
        .register(
            &payload.email,
            &payload.password,
            &payload.name,
            payload.company.as_deref().unwrap_or(""),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageUserResponse {
            message: "User registered successfully".to_string(),
            user,
        }),
    ))
}

/// Exchange credentials for a session token
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let user = state
        .users
        .verify_login(&payload.email, &payload.password)
        .await
        .map_err(|_| ApiError::unauthorized("Invalid credentials"))?;

    let token = auth::issue_token(&user, &state.config.jwt_secret)?;
    info!("User {} logged in", user.email);

    Ok(Json(AuthResponse {
        message: "Login successful".to_string(),
        user: user.sanitized(),
        token,
    }))
}

/// Get the caller's profile
pub async fn get_profile_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state
        .users
        .get(&auth.user_id)
        .await
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(UserResponse {
        user: user.sanitized(),
    }))
}

/// Update the caller's profile
pub async fn update_profile_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<MessageUserResponse>, ApiError> {
    let user = state
        .users
        .update_profile(&auth.user_id, payload.name, payload.company)
        .await?;

    Ok(Json(MessageUserResponse {
        message: "Profile updated successfully".to_string(),
        user,
    }))
}

/// List the bookable services
pub async fn list_services_handler(State(state): State<Arc<AppState>>) -> Json<ServicesResponse> {
    Json(ServicesResponse {
        services: state.catalog.list().await,
    })
}

/// Get one catalog entry
pub async fn get_service_handler(
    State(state): State<Arc<AppState>>,
    Path(service_id): Path<String>,
) -> Result<Json<ServiceResponse>, ApiError> {
    let service = state
        .catalog
        .get(&service_id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("Service {} not found", service_id)))?;

    Ok(Json(ServiceResponse { service }))
}

/// Book a service for the caller
pub async fn create_booking_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(payload): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingActionResponse>), ApiError> {
    info!("User {} booking service {}", auth.user_id, payload.service_id);

    let service = state
        .catalog
        .get(&payload.service_id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("Service {} not found", payload.service_id)))?;

    let booking = state
        .bookings
        .book(
            &auth.user_id,
            &service,
            payload.custom_domain.as_deref(),
            payload.custom_name.as_deref(),
            payload.license_info,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(BookingActionResponse {
            message: "Service booked successfully".to_string(),
            booking,
        }),
    ))
}

/// List the caller's bookings
pub async fn list_bookings_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Json<BookingsResponse> {
    Json(BookingsResponse {
        bookings: state.bookings.list_for_user(&auth.user_id).await,
    })
}

/// Fetch a booking, applying the owner-or-admin rule
async fn load_booking_checked(
    state: &AppState,
    auth: &AuthUser,
    booking_id: &str,
) -> Result<Booking, ApiError> {
    let booking = state
        .bookings
        .get(booking_id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("Booking {} not found", booking_id)))?;

    if !auth.can_access(&booking.user_id) {
        return Err(ApiError::forbidden("Forbidden"));
    }

    Ok(booking)
}

/// Get one booking
pub async fn get_booking_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(booking_id): Path<String>,
) -> Result<Json<BookingResponse>, ApiError> {
    let booking = load_booking_checked(&state, &auth, &booking_id).await?;
    Ok(Json(BookingResponse { booking }))
}

/// Deploy a booked service
pub async fn deploy_booking_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(booking_id): Path<String>,
) -> Result<Json<BookingActionResponse>, ApiError> {
    let booking = load_booking_checked(&state, &auth, &booking_id).await?;
    info!("User {} deploying booking {}", auth.user_id, booking.id);

    let booking = state.deployer.deploy(&booking.id).await?;

    Ok(Json(BookingActionResponse {
        message: "Service deployment initiated".to_string(),
        booking,
    }))
}

/// Suspend a deployed service
pub async fn suspend_booking_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(booking_id): Path<String>,
) -> Result<Json<BookingActionResponse>, ApiError> {
    let booking = load_booking_checked(&state, &auth, &booking_id).await?;
    info!("User {} suspending booking {}", auth.user_id, booking.id);

    let booking = state.deployer.suspend(&booking.id).await?;

    Ok(Json(BookingActionResponse {
        message: "Service suspended successfully".to_string(),
        booking,
    }))
}

/// Resume a suspended service
pub async fn resume_booking_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(booking_id): Path<String>,
) -> Result<Json<BookingActionResponse>, ApiError> {
    let booking = load_booking_checked(&state, &auth, &booking_id).await?;
    info!("User {} resuming booking {}", auth.user_id, booking.id);

    let booking = state.deployer.resume(&booking.id).await?;

    Ok(Json(BookingActionResponse {
        message: "Service resumed successfully".to_string(),
        booking,
    }))
}

/// Delete a booking and its deployment
pub async fn delete_booking_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(booking_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let booking = load_booking_checked(&state, &auth, &booking_id).await?;
    info!("User {} deleting booking {}", auth.user_id, booking.id);

    state.deployer.delete(&booking.id).await?;

    Ok(Json(MessageResponse {
        message: "Service deleted successfully".to_string(),
    }))
}

/// Merged deployment logs for a booking
pub async fn booking_logs_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(booking_id): Path<String>,
) -> Result<Json<LogsResponse>, ApiError> {
    let booking = load_booking_checked(&state, &auth, &booking_id).await?;
    let logs = state.deployer.logs(&booking.id).await?;
    Ok(Json(LogsResponse { logs }))
}

/// Check connectivity to the container platform
pub async fn portainer_status_handler(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
) -> Result<Json<PortainerStatusResponse>, ApiError> {
    match state.platform.probe().await {
        Ok(status) => Ok(Json(PortainerStatusResponse {
            status: "connected".to_string(),
            version: status.version,
            message: "Successfully connected to Portainer".to_string(),
            endpoints: status.endpoints,
        })),
        Err(err) => {
            let message = if err.is_platform_auth() {
                format!("Portainer rejected our credentials: {}", err)
            } else {
                format!("Failed to connect to Portainer: {}", err)
            };
            Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, message))
        }
    }
}

/// List all users (admin)
pub async fn admin_list_users_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<UsersResponse>, ApiError> {
    require_admin(&auth)?;

    let users: Vec<PublicUser> = state
        .users
        .list_all()
        .await
        .iter()
        .map(User::sanitized)
        .collect();

    Ok(Json(UsersResponse { users }))
}

/// Get one user (admin)
pub async fn admin_get_user_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    require_admin(&auth)?;

    let user = state
        .users
        .get(&user_id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("User {} not found", user_id)))?;

    Ok(Json(UserResponse {
        user: user.sanitized(),
    }))
}

/// List one user's bookings (admin)
pub async fn admin_user_services_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<BookingsResponse>, ApiError> {
    require_admin(&auth)?;

    if state.users.get(&user_id).await.is_none() {
        return Err(ApiError::not_found(format!("User {} not found", user_id)));
    }

    Ok(Json(BookingsResponse {
        bookings: state.bookings.list_for_user(&user_id).await,
    }))
}

/// Reset a user's password (admin)
pub async fn admin_reset_password_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(user_id): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    require_admin(&auth)?;

    if payload.password.len() < 6 {
        return Err(ApiError::bad_request(
            "Password must be at least 6 characters long",
        ));
    }

    state.users.reset_password(&user_id, &payload.password).await?;
    info!("Admin {} reset the password of user {}", auth.user_id, user_id);

    Ok(Json(MessageResponse {
        message: "Password reset successfully".to_string(),
    }))
}

/// Change a user's role (admin)
pub async fn admin_update_role_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(user_id): Path<String>,
    Json(payload): Json<UpdateRoleRequest>,
) -> Result<Json<MessageUserResponse>, ApiError> {
    require_admin(&auth)?;

    let user = state.users.update_role(&user_id, payload.role).await?;

    Ok(Json(MessageUserResponse {
        message: "Role updated successfully".to_string(),
        user,
    }))
}

/// Delete a user and everything they have deployed (admin)
pub async fn admin_delete_user_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    require_admin(&auth)?;

    let user = state
        .users
        .get(&user_id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("User {} not found", user_id)))?;

    // Tear down the user's deployments before dropping the account
    for booking in state.bookings.list_for_user(&user.id).await {
        if let Err(err) = state.deployer.delete(&booking.id).await {
            warn!(
                "Could not delete booking {} of user {}: {}",
                booking.id, user.id, err
            );
        }
    }

    state.users.remove(&user.id).await?;
    info!("Admin {} deleted user {}", auth.user_id, user.id);

    Ok(Json(MessageResponse {
        message: "User deleted successfully".to_string(),
    }))
}

/// All bookings enriched with their owners (admin)
pub async fn admin_list_services_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<AdminServicesResponse>, ApiError> {
    require_admin(&auth)?;

    let mut services = Vec::new();
    for booking in state.bookings.list_all().await {
        let owner = state.users.get(&booking.user_id).await;
        services.push(AdminServiceView {
            user_name: owner.as_ref().map(|u| u.name.clone()),
            user_email: owner.map(|u| u.email),
            booking,
        });
    }

    Ok(Json(AdminServicesResponse { services }))
}

/// All bookings, raw (admin)
pub async fn admin_list_bookings_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<BookingsResponse>, ApiError> {
    require_admin(&auth)?;

    Ok(Json(BookingsResponse {
        bookings: state.bookings.list_all().await,
    }))
}

/// Run a lifecycle action on any booking (admin)
pub async fn admin_service_action_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path((booking_id, action)): Path<(String, String)>,
) -> Result<Json<AdminActionResponse>, ApiError> {
    require_admin(&auth)?;
    info!(
        "Admin {} running {} on booking {}",
        auth.user_id, action, booking_id
    );

    let status = match action.as_str() {
        "deploy" => {
            state.deployer.deploy(&booking_id).await?;
            "deploying"
        }
        "suspend" => {
            state.deployer.suspend(&booking_id).await?;
            "suspended"
        }
        "resume" => {
            state.deployer.resume(&booking_id).await?;
            "active"
        }
        "delete" => {
            state.deployer.delete(&booking_id).await?;
            "deleted"
        }
        _ => return Err(ApiError::bad_request("Invalid action")),
    };

    Ok(Json(AdminActionResponse {
        message: format!("Service {} successful", action),
        status: status.to_string(),
    }))
}
