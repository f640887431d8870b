use actix_cors::Cors;
use actix_web::{http::header, middleware::Compress, web, App, HttpServer};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use folio::auth::{AdminCredentials, AuthKeys};
use folio::openapi::ApiDoc;
use folio::rate_limit::{InMemoryRateLimiter, RateLimiterFacade};
use folio::repo::sqlite::{self, SqliteRepo};
use folio::storage::DiskStore;
use folio::{config, AppConfig, AppState, SecurityHeaders};

const MIN_JWT_SECRET_LEN: usize = 32;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env automatically only in debug builds; deployments set the environment themselves.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = AppConfig::from_env();
    let jwt_secret = match cfg.jwt_secret.as_deref() {
        Some(secret) if secret.len() >= MIN_JWT_SECRET_LEN => secret.to_string(),
        Some(_) => {
            eprintln!("JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} characters long");
            std::process::exit(1);
        }
        None => {
            eprintln!("Missing required environment variable JWT_SECRET");
            eprintln!("Please copy .env.example to .env and configure it");
            std::process::exit(1);
        }
    };
    let admin = match (cfg.admin_username.as_deref(), cfg.admin_password.as_deref()) {
        (Some(user), Some(pass)) => Some(AdminCredentials::new(user, pass)),
        _ => {
            warn!("ADMIN_USERNAME/ADMIN_PASSWORD not set; admin login is disabled");
            None
        }
    };

    info!("Bootstrapping presentation server");
    if cfg.trust_proxy {
        info!("client addresses taken from forwarded headers");
    }
    info!(uploads = %cfg.uploads_dir.display(), max_files = cfg.limits.max_files, max_file_size = cfg.limits.max_file_size, "upload limits");

    let pool = sqlite::connect(&cfg.database_url).await.map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::Other, format!("database init failed: {e:#}"))
    })?;
    let store = DiskStore::new(&cfg.uploads_dir);
    store
        .ensure_dirs()
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    let rate_limiter = cfg
        .rate_limit_enabled
        .then(|| RateLimiterFacade::new(InMemoryRateLimiter::new(true), cfg.rate_limits.clone()));
    let state = web::Data::new(AppState {
        repo: Arc::new(SqliteRepo::new(pool)),
        store,
        limits: cfg.limits,
        auth: AuthKeys::new(&jwt_secret),
        admin,
        rate_limiter,
        trust_proxy: cfg.trust_proxy,
    });

    let openapi = ApiDoc::openapi();
    let frontend_url = cfg.frontend_url.clone();
    let enable_hsts = cfg.enable_hsts;

    let server = HttpServer::new(move || {
        let cors = {
            let mut c = Cors::default()
                // local dev frontends
                .allowed_origin("http://localhost:5173")
                .allowed_origin("http://127.0.0.1:5173")
                .allowed_origin("http://localhost:3000")
                .allowed_origin("http://127.0.0.1:3000")
                .allowed_methods(["GET", "POST", "PUT", "DELETE", "OPTIONS"])
                .allowed_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
                .expose_headers([header::CONTENT_DISPOSITION, header::RETRY_AFTER])
                .max_age(3600);
            if let Some(front) = &frontend_url {
                c = c.allowed_origin(front);
            }
            c
        };

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(SecurityHeaders::new(enable_hsts))
            .wrap(cors)
            .app_data(state.clone())
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind((cfg.host.as_str(), cfg.port))?;

    info!("Listening on http://{}:{}", cfg.host, cfg.port);

    server.run().await
}
