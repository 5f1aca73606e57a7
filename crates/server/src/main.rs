//! KPATH server binary: load configuration, attach the registry
//! projection, start the HTTP surface.

use registry::StaticRegistry;
use search::CoreConfig;
use server::{start_server, ServerConfig};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional; absence is not an error.
    let _ = dotenvy::dotenv();

    let config = ServerConfig::load()?;
    let core = CoreConfig::from_env();

    let registry = match &config.registry_file {
        Some(path) => Arc::new(StaticRegistry::from_json_file(path)?),
        None => {
            eprintln!("warning: no registry_file configured, serving an empty registry");
            Arc::new(StaticRegistry::new())
        }
    };

    start_server(config, core, registry).await
}
