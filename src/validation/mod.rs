/// Input validation helpers
///
/// Validators collect every failing field so the boundary can report them
/// together in one error envelope.
use crate::error::{ApiError, ApiResult, ErrorCode};
use uuid::Uuid;
use validator::ValidateEmail;

/// Accumulates field failures
#[derive(Debug, Default)]
pub struct FieldReport {
    errors: Vec<ApiError>,
}

impl FieldReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `code` unless `ok` holds
    pub fn require(&mut self, ok: bool, code: ErrorCode) -> &mut Self {
        if !ok {
            self.errors.push(code.into());
        }
        self
    }

    pub fn push(&mut self, error: ApiError) -> &mut Self {
        self.errors.push(error);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(self) -> ApiResult<()> {
        ApiError::from_list(self.errors)
    }
}

/// Character count within `[min, max]`
pub fn length_between(value: &str, min: usize, max: usize) -> bool {
    let count = value.chars().count();
    count >= min && count <= max
}

pub fn is_email(value: &str) -> bool {
    value.validate_email()
}

/// Key under which emails and usernames are indexed
pub fn lookup_key(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Normalize an application user id taken from a path or body
pub fn parse_user_id(raw: &str) -> ApiResult<String> {
    Uuid::parse_str(raw)
        .map(|id| id.hyphenated().to_string())
        .map_err(|_| ErrorCode::InvalidUserId.into())
}

pub fn valid_coordinates(latitude: f64, longitude: f64) -> bool {
    (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude)
}
