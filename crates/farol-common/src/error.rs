//! Error types and error codes for Farol
//!
//! This module defines:
//! - `RegistryError`: Application-specific error enum
//! - `ErrorCode`: Structured error codes for API responses

use serde::{Deserialize, Serialize};

/// Application-specific error types
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("microservice does not exist")]
    ServiceNotExists,

    #[error("microservice '{0}' already exists")]
    ServiceAlreadyExists(String),

    #[error("instance does not exist")]
    InstanceNotExists,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// Control-flow result for a revision match, mapped to 304 at the
    /// transport layer.
    #[error("not modified")]
    NotModified,
}

impl RegistryError {
    /// Numeric code carried in the response envelope.
    pub fn code(&self) -> i32 {
        match self {
            RegistryError::InvalidParameter(_) => ERR_INVALID_PARAMETER.code,
            RegistryError::ServiceNotExists => ERR_SERVICE_NOT_EXISTS.code,
            RegistryError::ServiceAlreadyExists(_) => ERR_SERVICE_ALREADY_EXISTS.code,
            RegistryError::InstanceNotExists => ERR_INSTANCE_NOT_EXISTS.code,
            RegistryError::PermissionDenied(_) => ERR_PERMISSION_DENY.code,
            RegistryError::Conflict(_) => ERR_CONFLICT.code,
            RegistryError::DeadlineExceeded => ERR_DEADLINE_EXCEEDED.code,
            RegistryError::Unavailable(_) => ERR_UNAVAILABLE_BACKEND.code,
            RegistryError::Internal(_) => ERR_INTERNAL.code,
            RegistryError::NotModified => SUCCESS.code,
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        RegistryError::Internal(err.to_string())
    }
}

/// Error code structure for API responses
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ErrorCode<'a> {
    pub code: i32,
    pub message: &'a str,
}

pub const SUCCESS: ErrorCode<'static> = ErrorCode {
    code: 0,
    message: "success",
};

pub const ERR_INVALID_PARAMETER: ErrorCode<'static> = ErrorCode {
    code: 400001,
    message: "invalid parameter(s)",
};

pub const ERR_CONFLICT: ErrorCode<'static> = ErrorCode {
    code: 400009,
    message: "resource conflict",
};

pub const ERR_SERVICE_ALREADY_EXISTS: ErrorCode<'static> = ErrorCode {
    code: 400010,
    message: "micro-service already exists",
};

pub const ERR_SERVICE_HAS_INSTANCES: ErrorCode<'static> = ErrorCode {
    code: 400011,
    message: "can not delete a micro-service with deployed instances",
};

pub const ERR_SERVICE_NOT_EXISTS: ErrorCode<'static> = ErrorCode {
    code: 400012,
    message: "micro-service does not exist",
};

pub const ERR_PERMISSION_DENY: ErrorCode<'static> = ErrorCode {
    code: 400013,
    message: "access micro-service refused",
};

pub const ERR_INSTANCE_NOT_EXISTS: ErrorCode<'static> = ErrorCode {
    code: 400017,
    message: "instance does not exist",
};

pub const ERR_DEADLINE_EXCEEDED: ErrorCode<'static> = ErrorCode {
    code: 500002,
    message: "request deadline exceeded",
};

pub const ERR_INTERNAL: ErrorCode<'static> = ErrorCode {
    code: 500003,
    message: "internal server error",
};

pub const ERR_UNAVAILABLE_BACKEND: ErrorCode<'static> = ErrorCode {
    code: 500011,
    message: "registry service is unavailable",
};
