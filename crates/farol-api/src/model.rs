//! Common API models and constants
//!
//! Shared constants and the response envelope used across all registry
//! endpoints.

use farol_common::error::{ErrorCode, RegistryError, SUCCESS};
use serde::{Deserialize, Serialize};

// Tenant headers
pub const HEADER_DOMAIN: &str = "X-Domain-Name";
pub const HEADER_CONSUMER_ID: &str = "X-ConsumerId";
pub const HEADER_REVISION: &str = "X-Resource-Revision";

// Subscription filter headers for the websocket endpoint
pub const HEADER_PROVIDER_APP: &str = "X-Provider-AppId";
pub const HEADER_PROVIDER_NAME: &str = "X-Provider-ServiceName";

// Tenant defaults
pub const DEFAULT_DOMAIN: &str = "default";
pub const DEFAULT_PROJECT: &str = "default";

// Environments
pub const ENV_DEVELOPMENT: &str = "development";
pub const ENV_TESTING: &str = "testing";
pub const ENV_ACCEPTANCE: &str = "acceptance";
pub const ENV_PRODUCTION: &str = "production";

// Service levels
pub const LEVEL_FRONT: &str = "FRONT";
pub const LEVEL_MIDDLE: &str = "MIDDLE";
pub const LEVEL_BACK: &str = "BACK";

// Property key on a provider service that opens it to consumers of other
// applications.
pub const PROP_ALLOW_CROSS_APP: &str = "allowCrossApp";

// Version rule markers
pub const VERSION_RULE_LATEST: &str = "latest";
pub const VERSION_RULE_RANGE_SEPARATOR: char = '-';
pub const VERSION_RULE_AT_LEAST_SUFFIX: char = '+';

// Query parameters
pub const PARAM_APP_ID: &str = "appId";
pub const PARAM_SERVICE_NAME: &str = "serviceName";
pub const PARAM_VERSION: &str = "version";
pub const PARAM_ENV: &str = "env";
pub const PARAM_TAGS: &str = "tags";
pub const PARAM_NO_CACHE: &str = "noCache";
pub const PARAM_FORCE: &str = "force";

/// Status block of the response envelope: `{"response": {"code", "message"}}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseStatus {
    pub code: i32,
    pub message: String,
}

impl ResponseStatus {
    pub fn ok() -> Self {
        ResponseStatus {
            code: SUCCESS.code,
            message: SUCCESS.message.to_string(),
        }
    }

    pub fn from_code(code: ErrorCode<'static>) -> Self {
        ResponseStatus {
            code: code.code,
            message: code.message.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == SUCCESS.code
    }
}

impl From<&RegistryError> for ResponseStatus {
    fn from(err: &RegistryError) -> Self {
        ResponseStatus {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl Default for ResponseStatus {
    fn default() -> Self {
        ResponseStatus::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_status_ok() {
        let status = ResponseStatus::ok();
        assert_eq!(status.code, 0);
        assert!(status.is_success());
    }

    #[test]
    fn test_response_status_from_error() {
        let status: ResponseStatus = (&RegistryError::ServiceNotExists).into();
        assert_eq!(status.code, 400012);
        assert!(!status.is_success());
    }

    #[test]
    fn test_envelope_shape() {
        let json = serde_json::to_value(ResponseStatus::ok()).unwrap();
        assert_eq!(json["code"], 0);
        assert_eq!(json["message"], "success");
    }
}
