//! Simulation Rerun Server - Main entry point.
//!
//! Starts the Actix-web server with configured routes and middleware.

mod api;
mod config;
mod error;
mod middleware;
mod models;
mod registry;
mod services;

use std::sync::Arc;

use actix_cors::Cors;
use actix_files::Files;
use actix_web::{App, HttpServer, http::header, web};
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use crate::config::Config;
use crate::registry::JobRegistry;
use crate::services::{
    FsConfigPreparer, HtmlReportReconciler, JobDriver, NullReconciler, ReportReconciler,
    RetentionConfig,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            error!("");
            error!("Please check your environment variables:");
            error!("  - RUST_ENV must be set to 'development' or 'production'");
            error!("  - In production, PRJ_ICDIR must point at the project root");
            std::process::exit(1);
        }
    };

    info!("========================================");
    info!("  Simulation Rerun Server");
    info!("  Environment: {}", config.environment);
    info!("========================================");

    if config.is_development() {
        warn!("Running in DEVELOPMENT mode - do not use in production!");
    }
    match &config.project_root {
        Some(root) => info!("Project root: {}", root.display()),
        None => warn!("PRJ_ICDIR is not set; rerun jobs will fail until it is provided"),
    }

    // Shared state: registry plus the job driver and its collaborators
    let registry = JobRegistry::new();
    let preparer = Arc::new(FsConfigPreparer::new(config.project_root.clone()));
    let reconciler: Arc<dyn ReportReconciler> = match &config.report_file {
        Some(path) => {
            info!("Report reconciliation enabled for {}", path.display());
            Arc::new(HtmlReportReconciler::new(path.clone()))
        }
        None => Arc::new(NullReconciler),
    };
    let driver = Arc::new(JobDriver::new(
        registry.clone(),
        preparer,
        reconciler,
        config.runner_executable.clone(),
        config.project_root.clone(),
    ));

    // Start the retention background task
    let retention_config = RetentionConfig {
        retention_hours: config.job_retention_hours,
        interval_secs: config.cleanup_interval_secs,
    };
    services::start_retention_task(registry.clone(), retention_config);
    info!(
        "Retention sweep started (job retention: {} hours)",
        config.job_retention_hours
    );

    let bind_address = config.bind_address();
    let report_dir = config.report_dir.clone();
    let is_development = config.is_development();

    if let Some(ref dir) = report_dir {
        info!("Serving interactive report from {}", dir.display());
    }

    let worker_count = if is_development {
        info!(
            "Starting server at http://{} (4 workers - development mode)",
            bind_address
        );
        4
    } else {
        let cpus = num_cpus::get();
        info!(
            "Starting server at http://{} ({} workers)",
            bind_address, cpus
        );
        cpus
    };

    // Start HTTP server
    let server = HttpServer::new(move || {
        // Configure CORS
        let cors = if is_development {
            Cors::default()
                .allow_any_origin()
                .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
                .max_age(3600)
        } else {
            Cors::default()
                .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
                .max_age(3600)
        };

        let mut app = App::new()
            .wrap(cors)
            .wrap(middleware::RequestLogger)
            .app_data(web::Data::new(registry.clone()))
            .app_data(web::Data::new(driver.clone()))
            // Legacy route shape: the report front end calls /rerun and
            // /rerun_status/{job_id} at the root.
            .configure(api::configure_health_routes)
            .configure(api::configure_rerun_routes);

        if let Some(ref dir) = report_dir {
            app = app.service(
                Files::new("/", dir.clone())
                    .index_file("interactive_live_report.html")
                    .prefer_utf8(true),
            );
        }

        app
    });

    server
        .workers(worker_count)
        .bind(&bind_address)?
        .run()
        .await
}
