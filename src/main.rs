use std::sync::Arc;

use actix_cors::Cors;
use actix_web::middleware::Compress;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use marquee::config::AppConfig;
use marquee::openapi::ApiDoc;
use marquee::rate_limit::RateLimiterFacade;
use marquee::repo::Repo;
use marquee::{config, AppState, SecurityHeaders};

#[cfg(not(any(feature = "inmem-store", feature = "postgres-store")))]
compile_error!("enable either the `inmem-store` or the `postgres-store` feature");

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = AppConfig::from_env().context("invalid configuration")?;
    info!(bind = %cfg.bind_addr, page_size = cfg.page_size, frontend = %cfg.frontend_url, "bootstrapping marquee");

    #[cfg(feature = "postgres-store")]
    let repo: Arc<dyn Repo> = {
        use sqlx::postgres::PgPoolOptions;
        let db_url = cfg.database_url.clone().context("DATABASE_URL must be set for postgres-store")?;
        let pool = PgPoolOptions::new()
            .max_connections(cfg.db_max_connections)
            .connect_lazy(&db_url)
            .context("failed to create Postgres pool")?;
        let pg = marquee::repo::pg::PgRepo::new(pool);
        pg.wait_until_ready(cfg.db_connect_attempts.max(1)).await?;
        info!(max_connections = cfg.db_max_connections, "using Postgres repository backend");
        Arc::new(pg)
    };

    #[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
    let repo: Arc<dyn Repo> = {
        info!("using in-memory repository backend");
        Arc::new(marquee::repo::inmem::InMemRepo::new())
    };

    let state = AppState::new(repo)
        .with_page_size(cfg.page_size)
        .with_rate_limiter(RateLimiterFacade::from_env());
    let openapi = ApiDoc::openapi();
    let frontend = cfg.frontend_url.clone();

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend)
            .allow_any_header()
            .allowed_methods(["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(SecurityHeaders::from_env())
            .wrap(cors)
            .wrap(Compress::default())
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(cfg.bind_addr.as_str())
    .with_context(|| format!("cannot bind {}", cfg.bind_addr))?;

    info!("listening on http://{}", cfg.bind_addr);
    server.run().await?;
    Ok(())
}
