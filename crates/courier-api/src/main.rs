use courier_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    courier_api::telemetry::init_tracing();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize the application (ledger, storage, services, routes)
    let (_state, router) = courier_api::setup::initialize_app(config.clone()).await?;

    // Start the server
    courier_api::setup::server::start_server(&config, router).await?;

    Ok(())
}
