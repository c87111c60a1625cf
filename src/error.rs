/// Unified error types for the Murmur API
///
/// Every failure carries a stable integer code. Codes are grouped by
/// subsystem: 1xxx request, 2xxx authentication, 3xxx account/application,
/// 4xxx application user, 5xxx connection, 6xxx event, 9xxx internal.
use crate::store::StoreError;
use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Broad failure category, which decides the HTTP status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authentication,
    Authorization,
    NotFound,
    Conflict,
    RateLimited,
    Gone,
    Internal,
}

impl ErrorKind {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
            ErrorKind::Authorization => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            // Duplicates are reported as bad requests, not 409
            ErrorKind::Conflict => StatusCode::BAD_REQUEST,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Gone => StatusCode::GONE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Stable, client-visible error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Request
    MalformedJson,
    InvalidParameter,
    RouteNotFound,
    TooManyRequests,

    // Authentication and sessions
    AuthenticationMissing,
    AuthenticationMalformed,
    InvalidApplicationToken,
    InvalidAccountToken,
    InvalidSessionToken,
    ApplicationDisabled,
    AccountDisabled,
    UserDisabled,
    InvalidCredentials,
    SessionTokenMismatch,

    // Accounts and applications
    AccountNotFound,
    AccountUserNotFound,
    ApplicationNotFound,
    ApplicationInProduction,
    AccountUserEmailInUse,
    AccountUserNameInUse,
    AccountNameInvalid,
    ApplicationNameInvalid,

    // Application users
    UserNotFound,
    EmailInUse,
    UserNameInUse,
    UserNameLength,
    PasswordLength,
    InvalidEmail,
    UserIdentityMissing,
    InvalidUserId,
    SocialIdInvalid,

    // Connections
    SelfConnection,
    ConnectionExists,
    ConnectionNotFound,
    ImmutableConnectionField,
    SocialPlatformMissing,

    // Events
    EventNotFound,
    VerbLength,
    EventIdPreset,
    VisibilityMissing,
    GeoRadiusTooSmall,
    GeoNearestOutOfBounds,
    GeoParametersMissing,
    InvalidCoordinates,
    EventSearchMissing,
    ImmutableEventField,

    // Internal
    Internal,
    Storage,
}

impl ErrorCode {
    pub fn code(&self) -> u16 {
        match self {
            ErrorCode::MalformedJson => 1001,
            ErrorCode::InvalidParameter => 1002,
            ErrorCode::RouteNotFound => 1003,
            ErrorCode::TooManyRequests => 1004,

            ErrorCode::AuthenticationMissing => 2001,
            ErrorCode::AuthenticationMalformed => 2002,
            ErrorCode::InvalidApplicationToken => 2003,
            ErrorCode::InvalidAccountToken => 2004,
            ErrorCode::InvalidSessionToken => 2005,
            ErrorCode::ApplicationDisabled => 2006,
            ErrorCode::AccountDisabled => 2007,
            ErrorCode::UserDisabled => 2008,
            ErrorCode::InvalidCredentials => 2009,
            ErrorCode::SessionTokenMismatch => 2010,

            ErrorCode::AccountNotFound => 3001,
            ErrorCode::AccountUserNotFound => 3002,
            ErrorCode::ApplicationNotFound => 3003,
            ErrorCode::ApplicationInProduction => 3004,
            ErrorCode::AccountUserEmailInUse => 3005,
            ErrorCode::AccountUserNameInUse => 3006,
            ErrorCode::AccountNameInvalid => 3007,
            ErrorCode::ApplicationNameInvalid => 3008,

            ErrorCode::UserNotFound => 4001,
            ErrorCode::EmailInUse => 4002,
            ErrorCode::UserNameInUse => 4003,
            ErrorCode::UserNameLength => 4004,
            ErrorCode::PasswordLength => 4005,
            ErrorCode::InvalidEmail => 4006,
            ErrorCode::UserIdentityMissing => 4007,
            ErrorCode::InvalidUserId => 4009,
            ErrorCode::SocialIdInvalid => 4010,

            ErrorCode::SelfConnection => 5001,
            ErrorCode::ConnectionExists => 5002,
            ErrorCode::ConnectionNotFound => 5003,
            ErrorCode::ImmutableConnectionField => 5004,
            ErrorCode::SocialPlatformMissing => 5005,

            ErrorCode::EventNotFound => 6001,
            ErrorCode::VerbLength => 6002,
            ErrorCode::EventIdPreset => 6003,
            ErrorCode::VisibilityMissing => 6004,
            ErrorCode::GeoRadiusTooSmall => 6005,
            ErrorCode::GeoNearestOutOfBounds => 6006,
            ErrorCode::GeoParametersMissing => 6007,
            ErrorCode::InvalidCoordinates => 6008,
            ErrorCode::EventSearchMissing => 6009,
            ErrorCode::ImmutableEventField => 6010,

            ErrorCode::Internal => 9001,
            ErrorCode::Storage => 9002,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        use ErrorCode::*;
        match self {
            MalformedJson | InvalidParameter | SessionTokenMismatch | AccountNameInvalid
            | ApplicationNameInvalid | UserNameLength | PasswordLength | InvalidEmail
            | UserIdentityMissing | InvalidUserId | SocialIdInvalid
            | SelfConnection | ImmutableConnectionField | SocialPlatformMissing | VerbLength
            | EventIdPreset | VisibilityMissing | GeoRadiusTooSmall | GeoNearestOutOfBounds
            | GeoParametersMissing | InvalidCoordinates | EventSearchMissing
            | ImmutableEventField => ErrorKind::Validation,

            AuthenticationMissing | AuthenticationMalformed | InvalidApplicationToken
            | InvalidAccountToken | InvalidSessionToken | InvalidCredentials
            | ApplicationDisabled | AccountDisabled => ErrorKind::Authentication,

            UserDisabled => ErrorKind::Authorization,

            RouteNotFound | AccountNotFound | AccountUserNotFound | ApplicationNotFound
            | UserNotFound | ConnectionNotFound | EventNotFound => ErrorKind::NotFound,

            AccountUserEmailInUse | AccountUserNameInUse | EmailInUse | UserNameInUse
            | ConnectionExists => ErrorKind::Conflict,

            TooManyRequests => ErrorKind::RateLimited,
            ApplicationInProduction => ErrorKind::Gone,
            Internal | Storage => ErrorKind::Internal,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::MalformedJson => "malformed json received",
            ErrorCode::InvalidParameter => "invalid request parameter",
            ErrorCode::RouteNotFound => "endpoint not found",
            ErrorCode::TooManyRequests => "too many requests",

            ErrorCode::AuthenticationMissing => "authentication credentials are missing",
            ErrorCode::AuthenticationMalformed => "authorization header is malformed",
            ErrorCode::InvalidApplicationToken => "application token is invalid",
            ErrorCode::InvalidAccountToken => "account token is invalid",
            ErrorCode::InvalidSessionToken => "session token is invalid",
            ErrorCode::ApplicationDisabled => "application is disabled",
            ErrorCode::AccountDisabled => "account is disabled",
            ErrorCode::UserDisabled => "user is disabled",
            ErrorCode::InvalidCredentials => "invalid credentials",
            ErrorCode::SessionTokenMismatch => "session token mismatch",

            ErrorCode::AccountNotFound => "account not found",
            ErrorCode::AccountUserNotFound => "account user not found",
            ErrorCode::ApplicationNotFound => "application not found",
            ErrorCode::ApplicationInProduction => "application is in production",
            ErrorCode::AccountUserEmailInUse => "account user email address already in use",
            ErrorCode::AccountUserNameInUse => "account user username already in use",
            ErrorCode::AccountNameInvalid => "account name must be between 3 and 40 characters",
            ErrorCode::ApplicationNameInvalid => {
                "application name must be between 2 and 40 characters"
            }

            ErrorCode::UserNotFound => "application user not found",
            ErrorCode::EmailInUse => "email address already in use",
            ErrorCode::UserNameInUse => "username already in use",
            ErrorCode::UserNameLength => "username must be between 2 and 40 characters",
            ErrorCode::PasswordLength => "password must be between 4 and 60 characters",
            ErrorCode::InvalidEmail => "email address is not valid",
            ErrorCode::UserIdentityMissing => "both username and email are empty",
            ErrorCode::InvalidUserId => "user id is malformed",
            ErrorCode::SocialIdInvalid => "social ids must not be empty",

            ErrorCode::SelfConnection => "user is connecting with itself",
            ErrorCode::ConnectionExists => "connection already exists",
            ErrorCode::ConnectionNotFound => "connection not found",
            ErrorCode::ImmutableConnectionField => "only enabled and type can be changed",
            ErrorCode::SocialPlatformMissing => "social platform is required",

            ErrorCode::EventNotFound => "event not found",
            ErrorCode::VerbLength => "verb must be between 1 and 30 characters",
            ErrorCode::EventIdPreset => "event id is assigned by the server",
            ErrorCode::VisibilityMissing => "visibility is required",
            ErrorCode::GeoRadiusTooSmall => "Location radius can't be smaller than 2 meters",
            ErrorCode::GeoNearestOutOfBounds => "near events limits not within accepted bounds",
            ErrorCode::GeoParametersMissing => "either rad or nearest must be provided",
            ErrorCode::InvalidCoordinates => "latitude or longitude is out of range",
            ErrorCode::EventSearchMissing => "search needs lat/lon, location or object",
            ErrorCode::ImmutableEventField => "only enabled can be changed on an event",

            ErrorCode::Internal => "internal server error",
            ErrorCode::Storage => "storage failure",
        }
    }
}

/// Main error type for engines and the request boundary
#[derive(Error, Debug)]
pub enum ApiError {
    /// A coded failure with the default message for its code
    #[error("{}", .0.message())]
    Code(ErrorCode),

    /// A coded failure with a specific message
    #[error("{message}")]
    Detailed { code: ErrorCode, message: String },

    /// Per-application request budget exhausted
    #[error("Rate limit exceeded")]
    RateLimitExceeded { limit: u64, retry_after: Duration },

    /// Storage driver failures
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Multi-field validation report
    #[error("{} errors", .0.len())]
    Multiple(Vec<ApiError>),
}

impl From<ErrorCode> for ApiError {
    fn from(code: ErrorCode) -> Self {
        ApiError::Code(code)
    }
}

impl ApiError {
    pub fn detailed(code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError::Detailed {
            code,
            message: message.into(),
        }
    }

    /// Collapse a list of validation failures: empty is success, a single
    /// error is returned as-is.
    pub fn from_list(mut errors: Vec<ApiError>) -> Result<(), ApiError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ApiError::Multiple(errors)),
        }
    }

    /// Code of the error, or of the first error of a list
    pub fn code(&self) -> ErrorCode {
        match self {
            ApiError::Code(code) | ApiError::Detailed { code, .. } => *code,
            ApiError::RateLimitExceeded { .. } => ErrorCode::TooManyRequests,
            ApiError::Storage(_) => ErrorCode::Storage,
            ApiError::Internal(_) => ErrorCode::Internal,
            ApiError::Multiple(errors) => errors
                .first()
                .map(ApiError::code)
                .unwrap_or(ErrorCode::Internal),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.code().kind()
    }

    pub fn is(&self, code: ErrorCode) -> bool {
        self.code() == code
    }

    /// Flatten into envelope entries, hiding internal details
    pub fn entries(&self) -> Vec<ErrorEntry> {
        match self {
            ApiError::Multiple(errors) => errors.iter().flat_map(ApiError::entries).collect(),
            ApiError::Storage(_) | ApiError::Internal(_) => vec![ErrorEntry {
                code: ErrorCode::Internal.code(),
                message: ErrorCode::Internal.message().to_string(),
            }],
            other => vec![ErrorEntry {
                code: other.code().code(),
                message: other.to_string(),
            }],
        }
    }
}

/// One entry of the error envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub code: u16,
    pub message: String,
}

/// `{"errors":[{"code":..., "message":...}]}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub errors: Vec<ErrorEntry>,
}

/// Convert ApiError to HTTP response
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.kind().status();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("request failed: {}", self);
        } else {
            tracing::debug!("request rejected: {} ({})", self, status);
        }

        let body = Json(ErrorEnvelope {
            errors: self.entries(),
        });
        let mut response = (status, body).into_response();

        if let ApiError::RateLimitExceeded { limit, retry_after } = &self {
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", HeaderValue::from(*limit));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(0u64));
            headers.insert("X-RateLimit-Reset", HeaderValue::from(retry_after.as_secs()));
            headers.insert("Retry-After", HeaderValue::from(retry_after.as_secs()));
        }

        response
    }
}

/// Result type alias for engine and handler operations
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_map_to_statuses() {
        assert_eq!(ErrorCode::SelfConnection.kind().status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::ConnectionExists.kind().status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::UserNotFound.kind().status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::ApplicationInProduction.kind().status(), StatusCode::GONE);
        assert_eq!(ErrorCode::UserDisabled.kind().status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ErrorCode::TooManyRequests.kind().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_multiple_errors_flatten() {
        let error = ApiError::Multiple(vec![
            ErrorCode::UserNameLength.into(),
            ErrorCode::PasswordLength.into(),
        ]);
        let entries = error.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].code, 4004);
        assert_eq!(entries[1].message, "password must be between 4 and 60 characters");
        assert_eq!(error.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_from_list_collapses() {
        assert!(ApiError::from_list(vec![]).is_ok());
        let single = ApiError::from_list(vec![ErrorCode::VerbLength.into()]).unwrap_err();
        assert!(matches!(single, ApiError::Code(ErrorCode::VerbLength)));
    }

    #[test]
    fn test_internal_details_hidden() {
        let error = ApiError::Internal("pool exhausted at 10.0.0.3".to_string());
        let entries = error.entries();
        assert_eq!(entries[0].code, 9001);
        assert_eq!(entries[0].message, "internal server error");
    }
}
