use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::password::MAX_PASSWORD_BYTES;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SignupRequest {
    pub username: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoginRequest {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    pub password: Option<String>,
}

/// Signup payload once every field is known to be present.
#[derive(Debug)]
pub struct NewAccount {
    pub username: String,
    pub user_id: String,
    pub password: String,
}

#[derive(Debug)]
pub struct Credentials {
    pub user_id: String,
    pub password: String,
}

impl SignupRequest {
    pub fn validate(self) -> Result<NewAccount, ApiError> {
        let fields = [
            ("username", &self.username),
            ("userId", &self.user_id),
            ("password", &self.password),
        ];
        ensure_present(&fields)?;

        let password = self.password.unwrap_or_default();
        if password.len() > MAX_PASSWORD_BYTES {
            return Err(ApiError::validation(format!(
                "password must be at most {} bytes",
                MAX_PASSWORD_BYTES
            )));
        }

        Ok(NewAccount {
            username: self.username.unwrap_or_default(),
            user_id: self.user_id.unwrap_or_default(),
            password,
        })
    }
}

impl LoginRequest {
    pub fn validate(self) -> Result<Credentials, ApiError> {
        let fields = [("userId", &self.user_id), ("password", &self.password)];
        ensure_present(&fields)?;

        Ok(Credentials {
            user_id: self.user_id.unwrap_or_default(),
            password: self.password.unwrap_or_default(),
        })
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn ensure_present(fields: &[(&str, &Option<String>)]) -> Result<(), ApiError> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, value)| is_blank(value))
        .map(|(name, _)| *name)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ApiError::validation(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub message: String,
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// Body of a successful `/predict` call. Regressors answer with the raw
/// value, classifiers with the mapped label.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum PredictionResponse {
    Prediction { prediction: f64 },
    Recommendation { recommendation: String },
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model: String,
    pub version: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct FeatureInfo {
    pub name: String,
    pub kind: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub version: String,
    pub task: String,
    pub features: Vec<FeatureInfo>,
    pub input_width: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<i64, String>>,
    pub loaded_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signup_reports_every_missing_field() {
        let request = SignupRequest {
            username: Some("  ".into()),
            user_id: Some("u1".into()),
            password: None,
        };
        let err = request.validate().unwrap_err();
        assert_eq!(err.to_string(), "Missing required fields: username, password");
    }

    #[test]
    fn signup_rejects_password_bcrypt_would_truncate() {
        let request = SignupRequest {
            username: Some("alice".into()),
            user_id: Some("u1".into()),
            password: Some("x".repeat(MAX_PASSWORD_BYTES + 1)),
        };
        let err = request.validate().unwrap_err();
        assert_eq!(err.to_string(), "password must be at most 72 bytes");

        let request = SignupRequest {
            username: Some("alice".into()),
            user_id: Some("u1".into()),
            password: Some("x".repeat(MAX_PASSWORD_BYTES)),
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn login_accepts_complete_payload() {
        let request: LoginRequest =
            serde_json::from_str(r#"{"userId":"u1","password":"pw"}"#).unwrap();
        let creds = request.validate().unwrap();
        assert_eq!(creds.user_id, "u1");
        assert_eq!(creds.password, "pw");
    }

    #[test]
    fn prediction_response_shapes() {
        let regression = serde_json::to_value(PredictionResponse::Prediction { prediction: 3.5 }).unwrap();
        assert_eq!(regression, serde_json::json!({ "prediction": 3.5 }));

        let label = serde_json::to_value(PredictionResponse::Recommendation {
            recommendation: "Rice".into(),
        })
        .unwrap();
        assert_eq!(label, serde_json::json!({ "recommendation": "Rice" }));
    }
}
