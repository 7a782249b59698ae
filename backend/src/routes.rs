use std::sync::Arc;

use actix_web::{get, post, web, HttpResponse};
use log::{info, warn};
use serde_json::{Map, Value};

use crate::error::ApiError;
use crate::models::{
    ErrorBody, HealthResponse, LoginRequest, LoginResponse, MessageResponse, SignupRequest,
};
use crate::password::{self, PasswordError};
use crate::pipeline::Pipeline;
use crate::store::{NewUser, UserStore};

pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub pipeline: Arc<Pipeline>,
    pub bcrypt_cost: u32,
    /// Verified against when the user id is unknown, so both login failure
    /// paths do the same bcrypt work.
    pub dummy_hash: String,
}

impl AppState {
    pub fn new(
        users: Arc<dyn UserStore>,
        pipeline: Arc<Pipeline>,
        bcrypt_cost: u32,
    ) -> Result<Self, PasswordError> {
        let dummy_hash = password::hash("timing-equaliser", bcrypt_cost)?;
        Ok(Self {
            users,
            pipeline,
            bcrypt_cost,
            dummy_hash,
        })
    }
}

#[post("/signup")]
pub async fn signup(
    state: web::Data<AppState>,
    body: web::Json<SignupRequest>,
) -> Result<HttpResponse, ApiError> {
    let account = body.into_inner().validate()?;

    if state.users.find_by_user_id(&account.user_id).await?.is_some() {
        warn!("Inscription refusée: identifiant déjà utilisé");
        return Err(ApiError::Conflict);
    }

    let cost = state.bcrypt_cost;
    let plain = account.password;
    let password_hash = web::block(move || password::hash(&plain, cost))
        .await?
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    state
        .users
        .insert(NewUser {
            user_id: account.user_id,
            username: account.username,
            password_hash,
        })
        .await?;

    info!("Nouvel utilisateur inscrit");
    Ok(HttpResponse::Created().json(MessageResponse::new("User registered successfully!")))
}

#[post("/login")]
pub async fn login(
    state: web::Data<AppState>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    let credentials = body.into_inner().validate()?;

    let user = state.users.find_by_user_id(&credentials.user_id).await?;
    let stored_hash = user
        .as_ref()
        .map_or_else(|| state.dummy_hash.clone(), |u| u.password_hash.clone());

    let plain = credentials.password;
    let verified = web::block(move || password::verify(&plain, &stored_hash)).await?;

    match user {
        Some(user) if verified => {
            info!("Connexion réussie");
            Ok(HttpResponse::Ok().json(LoginResponse {
                message: "Login successful!".to_string(),
                username: user.username,
            }))
        }
        _ => {
            warn!("Connexion refusée: identifiants invalides");
            Err(ApiError::Authentication)
        }
    }
}

#[post("/predict")]
pub async fn predict(
    state: web::Data<AppState>,
    body: web::Json<Map<String, Value>>,
) -> Result<HttpResponse, ApiError> {
    let pipeline = state.pipeline.clone();
    let payload = body.into_inner();

    let response = web::block(move || pipeline.predict(&payload)).await??;
    info!("Prédiction réussie: {:?}", response);
    Ok(HttpResponse::Ok().json(response))
}

#[get("/api/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let manifest = state.pipeline.manifest();
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        model: manifest.name.clone(),
        version: manifest.version.clone(),
    })
}

#[get("/api/model-info")]
pub async fn model_info(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.pipeline.info())
}

pub async fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(ErrorBody::new("Not found"))
}

/// Maps body extraction failures (bad JSON, wrong content type, wrong
/// field types) onto the validation error shape.
pub fn json_config(limit: usize) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(limit)
        .error_handler(|err, _req| {
            warn!("Corps de requête rejeté: {}", err);
            ApiError::validation(format!("Invalid JSON body: {}", err)).into()
        })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(signup)
        .service(login)
        .service(predict)
        .service(health)
        .service(model_info);
}
