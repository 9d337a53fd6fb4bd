pub mod ai;
pub mod breaker;
pub mod config;
pub mod context;
pub mod crypto;
pub mod db;
pub mod delivery;
pub mod error;
pub mod kv;
pub mod queue;
pub mod ratelimit;
pub mod routes;
pub mod telemetry;
pub mod webhook;

use std::sync::Arc;

use rocket::fairing::AdHoc;

use config::AppConfig;
use context::AppContext;

/// Build the Rocket instance against an already-constructed `AppContext`.
/// Kept separate from process startup (`main.rs`) so integration tests can
/// mount the same routes against an isolated test context.
pub fn rocket_with_context(ctx: Arc<AppContext>) -> rocket::Rocket<rocket::Build> {
    let hsts = ctx.config.production;

    rocket::build()
        .manage(ctx)
        .attach(routes::security_headers::SecurityHeaders { hsts })
        .mount(
            "/",
            rocket::routes![
                routes::health,
                routes::send,
                routes::instagram_verify,
                routes::instagram_webhook,
                routes::manychat_webhook,
            ],
        )
        .attach(AdHoc::on_liftoff("Worker Pool", |rocket| {
            Box::pin(async move {
                let ctx = rocket
                    .state::<Arc<AppContext>>()
                    .expect("AppContext not managed")
                    .clone();
                let concurrency = ctx.config.worker_concurrency;
                tokio::spawn(async move {
                    queue::worker::run_worker_pool(ctx, concurrency).await;
                });
                tracing::info!(concurrency, "worker pool started");
            })
        }))
}

/// Convenience entrypoint for the common case: build config from the
/// environment, build the context, build Rocket.
pub fn rocket() -> rocket::Rocket<rocket::Build> {
    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("configuration error: {e}");
        std::process::exit(1);
    });
    let ctx = Arc::new(AppContext::new(config).expect("failed to build application context"));
    rocket_with_context(ctx)
}
