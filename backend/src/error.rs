use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use log::error;

use crate::features::FeatureError;
use crate::models::ErrorBody;
use crate::pipeline::PipelineError;
use crate::preprocess::PreprocessError;
use crate::store::StoreError;

/// Every failure a handler can report to the caller.
///
/// The `Display` text of `Validation` is returned verbatim; every other kind
/// answers with a fixed message so internal detail never leaves the process.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("User ID already exists")]
    Conflict,

    #[error("Invalid credentials")]
    Authentication,

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Conflict | Self::Authentication => self.to_string(),
            Self::ServiceUnavailable(_) => "Service unavailable".to_string(),
            Self::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::ServiceUnavailable(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody::new(self.public_message()))
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate => Self::Conflict,
            StoreError::Unavailable(e) => {
                error!("Base utilisateurs indisponible: {}", e);
                Self::ServiceUnavailable(e.to_string())
            }
            StoreError::Query(e) => {
                error!("Erreur requête utilisateurs: {}", e);
                Self::Internal(e.to_string())
            }
        }
    }
}

impl From<FeatureError> for ApiError {
    fn from(err: FeatureError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Features(e) => e.into(),
            PipelineError::Preprocess(e @ PreprocessError::UnknownCategory { .. }) => {
                Self::Validation(e.to_string())
            }
            other => {
                error!("Erreur de prédiction: {:#}", other);
                Self::Internal(other.to_string())
            }
        }
    }
}

impl From<actix_web::error::BlockingError> for ApiError {
    fn from(err: actix_web::error::BlockingError) -> Self {
        error!("Erreur d'exécution bloquante: {}", err);
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[test]
    fn status_codes_follow_the_taxonomy() {
        assert_eq!(ApiError::validation("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Conflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(ApiError::Authentication.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::ServiceUnavailable("pool timed out".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[actix_web::test]
    async fn internal_detail_is_not_leaked() {
        let response = ApiError::Internal("tensor shape mismatch at node 7".into()).error_response();
        let body = to_bytes(response.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Internal server error");
    }

    #[test]
    fn unknown_category_maps_to_validation() {
        let err = PipelineError::Preprocess(PreprocessError::UnknownCategory {
            column: "Area".into(),
            value: "Atlantis".into(),
        });
        assert!(matches!(ApiError::from(err), ApiError::Validation(_)));
    }
}
