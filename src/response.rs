use serde::Serialize;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::Error;
use crate::utils::now_local;

/// Uniform JSON envelope every endpoint built atop the engine returns.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
pub struct Pagination {
    pub current: u32,
    pub pages: u32,
    pub total: u64,
}

impl Pagination {
    pub fn new(current: u32, per_page: u32, total: u64) -> Self {
        let pages = if per_page == 0 {
            0
        } else {
            total.div_ceil(per_page as u64) as u32
        };
        Pagination {
            current,
            pages,
            total,
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    fn base(success: bool) -> Self {
        ApiResponse {
            success,
            data: None,
            message: None,
            error: None,
            details: None,
            pagination: None,
            timestamp: now_local(),
        }
    }

    pub fn ok(data: T) -> Self {
        ApiResponse {
            data: Some(data),
            ..Self::base(true)
        }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        ApiResponse {
            data: Some(data),
            message: Some(message.into()),
            ..Self::base(true)
        }
    }

    /// List responses carry pagination alongside the data page.
    pub fn page(data: T, pagination: Pagination) -> Self {
        ApiResponse {
            data: Some(data),
            pagination: Some(pagination),
            ..Self::base(true)
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        ApiResponse {
            message: Some(message.into()),
            ..Self::base(true)
        }
    }
}

impl From<&Error> for ApiResponse<()> {
    fn from(err: &Error) -> Self {
        ApiResponse {
            error: Some(err.to_string()),
            details: Some(serde_json::json!({ "status": err.status_code() })),
            ..Self::base(false)
        }
    }
}
