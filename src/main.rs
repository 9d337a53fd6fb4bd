#[rocket::main]
async fn main() {
    dm_relay::telemetry::init();

    let config = dm_relay::config::AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("configuration error: {e}");
        std::process::exit(1);
    });

    let ctx = std::sync::Arc::new(
        dm_relay::context::AppContext::new(config).unwrap_or_else(|e| {
            eprintln!("failed to build application context: {e}");
            std::process::exit(1);
        }),
    );

    if let Err(e) = dm_relay::rocket_with_context(ctx).launch().await {
        eprintln!("server error: {e}");
        std::process::exit(1);
    }
}
