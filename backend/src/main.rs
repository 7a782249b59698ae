pub mod config;
pub mod error;
pub mod features;
pub mod inference;
pub mod manifest;
pub mod models;
pub mod password;
pub mod pipeline;
pub mod preprocess;
pub mod routes;
pub mod store;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::middleware::{DefaultHeaders, Logger};
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use log::{error, info};

use config::Config;
use pipeline::Pipeline;
use routes::AppState;
use store::{MySqlUserStore, UserStore};

fn cors(origins: &[String]) -> Cors {
    let cors = if origins.is_empty() {
        Cors::default().allow_any_origin()
    } else {
        origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
    };

    cors.allowed_methods(vec!["GET", "POST"])
        .allowed_headers(vec![
            actix_web::http::header::CONTENT_TYPE,
            actix_web::http::header::ACCEPT,
        ])
        .max_age(3600)
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    info!("⚙️  Configuration chargée: {:?}", config);

    // Charger le modèle avant d'ouvrir le port
    let pipeline = Pipeline::load(&config.model_path, &config.manifest_path)?;
    {
        let manifest = pipeline.manifest();
        info!(
            "✅ Modèle '{}' v{} chargé ({}, {} caractéristiques -> {} entrées)",
            manifest.name,
            manifest.version,
            manifest.task.as_str(),
            manifest.features.len(),
            manifest.input_width()
        );
    }

    let pool = store::create_pool(
        config.database.connect_options()?,
        config.database.max_connections,
        config.database.acquire_timeout,
    )
    .await
    .with_context(|| format!("connecting to database at {}", config.database.describe()))?;
    info!(
        "🗄️  Pool MySQL prêt ({} connexions max)",
        config.database.max_connections
    );

    if config.run_migrations {
        store::run_migrations(&pool)
            .await
            .context("running database migrations")?;
        info!("✅ Migrations appliquées");
    }

    let users: Arc<dyn UserStore> = Arc::new(MySqlUserStore::new(pool));
    let state = web::Data::new(
        AppState::new(users, Arc::new(pipeline), config.bcrypt_cost)
            .context("preparing credential hashing")?,
    );

    // Configuration serveur
    let bind_address = config.bind_address();
    let origins = config.cors_allowed_origins.clone();
    let json_limit = config.json_limit_bytes;

    info!("🌐 Serveur démarré sur: http://{}", bind_address);
    info!("👷 Workers: {}", config.workers);
    info!("🔧 Endpoints API:");
    info!("   POST /signup          - Inscription");
    info!("   POST /login           - Connexion");
    info!("   POST /predict         - Prédiction");
    info!("   GET  /api/health      - Vérification santé");
    info!("   GET  /api/model-info  - Information modèle");

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(DefaultHeaders::new().add(("X-Content-Type-Options", "nosniff")))
            .wrap(cors(&origins))
            .app_data(state.clone())
            .app_data(routes::json_config(json_limit))
            .configure(routes::configure)
            // Fallback 404
            .default_service(web::route().to(routes::not_found))
    })
    .workers(config.workers)
    .bind(&bind_address)
    .with_context(|| format!("binding {}", bind_address))?
    .run()
    .await
    .context("server terminated")?;

    Ok(())
}

#[actix_web::main]
async fn main() {
    // Configuration du logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .format_module_path(false)
        .init();

    info!("🚀 Démarrage de l'API agricole v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run().await {
        error!("❌ Échec du démarrage: {:#}", e);
        std::process::exit(1);
    }
}
