use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::StoreError;

use super::crypto::CryptoError;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
}

/// Wire shape of an error reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub status_code: u16,
    pub message: String,
}

impl ServiceError {
    pub fn paste_not_found() -> Self {
        ServiceError::NotFound("Paste not found".into())
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::NotFound(_) => 404,
            ServiceError::Unauthorized(_) => 401,
            ServiceError::Forbidden(_) => 403,
            ServiceError::BadRequest(_) => 400,
            ServiceError::Store(_) => 500,
        }
    }

    /// Internal failures are logged here and rendered without detail.
    pub fn to_response(&self) -> ErrorResponse {
        let message = match self {
            ServiceError::Store(err) => {
                log::error!("unhandled storage error: {err}");
                "Internal server error.".to_string()
            }
            other => other.to_string(),
        };
        ErrorResponse {
            status_code: self.status_code(),
            message,
        }
    }
}

impl From<CryptoError> for ServiceError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::MissingKey => ServiceError::BadRequest("Missing encryption key".into()),
            CryptoError::InvalidKey | CryptoError::Encode(_) => {
                ServiceError::BadRequest("Invalid encryption key".into())
            }
        }
    }
}
