use facevault_api::setup;
use facevault_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;

    // Store, detector, dispatch queue and routes
    let (state, router) = setup::initialize_app(config.clone()).await?;

    setup::server::start_server(&config, router, state).await?;

    Ok(())
}
