use ask_gateway::config::GatewayConfig;
use ask_gateway::server;
use clap::Parser;

fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::parse();
    config.validate()?;
    actix_web::rt::System::new().block_on(async move { server::startup(config).await })
}
