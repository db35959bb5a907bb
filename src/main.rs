use anyhow::Result;
use edge_gateway::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration; a missing secret or registry is fatal
    let config = Config::from_env()?;

    edge_gateway::init_tracing(&config.logging)?;

    edge_gateway::run(config).await
}
