//! Device authentication for the producer endpoint.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use metrics::counter;
use tracing::{debug, warn};
use tracker_store::DeviceDirectory;
use tracker_telemetry::metrics as names;

use crate::auth_cache::DeviceAuthCache;
use crate::error::ApiError;
use crate::server::AppState;

pub const TOKEN_HEADER: &str = "X-Header-Token";
pub const DEVICE_HEADER: &str = "X-Header-Device";

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("X-Header-Token missing")]
    MissingToken,
    #[error("X-Header-Device missing")]
    MissingDevice,
    #[error("esp32 device not valid")]
    UnknownDevice,
    #[error("Invalid token for device")]
    InvalidToken,
}

impl AuthError {
    fn label(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::MissingDevice => "missing_device",
            Self::UnknownDevice => "unknown_device",
            Self::InvalidToken => "invalid_token",
        }
    }
}

/// Checks a presented token against the device directory, through the cache.
pub struct DeviceAuthenticator {
    cache: Arc<DeviceAuthCache>,
    directory: Arc<dyn DeviceDirectory>,
}

impl DeviceAuthenticator {
    pub fn new(cache: Arc<DeviceAuthCache>, directory: Arc<dyn DeviceDirectory>) -> Self {
        Self { cache, directory }
    }

    /// Returns the device id on success.
    ///
    /// Only successful directory lookups are cached.
    pub fn authenticate(
        &self,
        device_id: Option<&str>,
        token: Option<&str>,
    ) -> Result<String, AuthError> {
        let result = self.check(device_id, token);
        match &result {
            Ok(device) => {
                counter!(names::DEVICE_AUTH_TOTAL, "outcome" => "ok").increment(1);
                debug!(device_id = %device, "device authenticated");
            }
            Err(e) => {
                counter!(names::DEVICE_AUTH_TOTAL, "outcome" => e.label()).increment(1);
                debug!(device_id = device_id.unwrap_or_default(), reason = e.label(), "device rejected");
            }
        }
        result
    }

    fn check(&self, device_id: Option<&str>, token: Option<&str>) -> Result<String, AuthError> {
        let token = token.filter(|t| !t.is_empty()).ok_or(AuthError::MissingToken)?;
        let device_id = device_id
            .filter(|d| !d.is_empty())
            .ok_or(AuthError::MissingDevice)?;

        let secret = match self.cache.get(device_id) {
            Some(secret) => secret,
            None => {
                let secret = match self.directory.token_for(device_id) {
                    Ok(Some(secret)) => secret,
                    Ok(None) => return Err(AuthError::UnknownDevice),
                    Err(e) => {
                        warn!(device_id, error = %e, "device lookup failed");
                        return Err(AuthError::UnknownDevice);
                    }
                };
                self.cache.set(device_id, secret.clone());
                secret
            }
        };

        if secret == token {
            Ok(device_id.to_string())
        } else {
            Err(AuthError::InvalidToken)
        }
    }
}

/// Extractor for handlers that only authenticated devices may call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedDevice(pub String);

impl FromRequestParts<AppState> for AuthenticatedDevice {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok());
        let device = state
            .authenticator
            .authenticate(header(DEVICE_HEADER), header(TOKEN_HEADER))?;
        Ok(Self(device))
    }
}
