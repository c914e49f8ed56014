use std::{fmt, time::Duration};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

/// Optional store feature the response cache depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Tagging,
    Locking,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Tagging => f.write_str("tagging"),
            Capability::Locking => f.write_str("atomic locks"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("the [{store}] cache store does not support {capability}")]
    CapabilityUnsupported {
        store: String,
        capability: Capability,
    },
    #[error("no cache store registered under [{name}]")]
    UnknownStore { name: String },
    #[error("timed out after {waited:?} waiting for lock on `{key}`")]
    LockTimeout { key: String, waited: Duration },
    #[error("cache store unavailable: {message}")]
    StoreUnavailable { message: String },
    #[error("failed to buffer response body: {message}")]
    ResponseBody { message: String },
}

impl CacheError {
    pub fn capability_unsupported(store: impl Into<String>, capability: Capability) -> Self {
        Self::CapabilityUnsupported {
            store: store.into(),
            capability,
        }
    }

    pub fn unknown_store(name: impl Into<String>) -> Self {
        Self::UnknownStore { name: name.into() }
    }

    pub fn lock_timeout(key: impl Into<String>, waited: Duration) -> Self {
        Self::LockTimeout {
            key: key.into(),
            waited,
        }
    }

    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    pub fn response_body(message: impl Into<String>) -> Self {
        Self::ResponseBody {
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            CacheError::LockTimeout { .. } | CacheError::StoreUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            CacheError::CapabilityUnsupported { .. }
            | CacheError::UnknownStore { .. }
            | CacheError::ResponseBody { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            error!(
                target = "response_cache::error",
                status = status.as_u16(),
                error = %self,
                "response cache failed"
            );
        } else {
            warn!(
                target = "response_cache::error",
                status = status.as_u16(),
                error = %self,
                "response cache unavailable"
            );
        }

        let message = status.canonical_reason().unwrap_or("Error");
        (status, message).into_response()
    }
}
