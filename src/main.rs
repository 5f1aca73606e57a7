//! Offline demo: build both indexes from a registry document with the
//! lexical backend and print one shaped envelope per search mode.
//!
//! Usage: `kpath <registry.json> [query]`

use kpath::{
    build_stack, BackendKind, CoreConfig, SearchMode, SearchRequest, StaticRegistry,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let registry_path = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("usage: kpath <registry.json> [query]"))?;
    let query = args
        .next()
        .unwrap_or_else(|| "process a payment".to_string());

    let registry = Arc::new(StaticRegistry::from_json_file(&registry_path)?);
    let core = CoreConfig {
        backend: BackendKind::Lexical,
        ..CoreConfig::from_env()
    };
    let stack = build_stack(&core, registry)?;
    stack.manager.build_all().await?;

    let status = stack.manager.status();
    println!(
        "built: {} services, {} tools, model {} ({}d)",
        status.svc_count, status.tool_count, status.model, status.dim
    );

    for mode in [
        SearchMode::AgentsOnly,
        SearchMode::ToolsOnly,
        SearchMode::AgentsAndTools,
        SearchMode::Workflows,
        SearchMode::Capabilities,
    ] {
        let req = SearchRequest::new(&query, mode)?.with_limit(3);
        let start = std::time::Instant::now();
        let results = stack.planner.search(&req, None).await?;
        let envelope = stack
            .shaper
            .shape(&req, &results, start.elapsed().as_millis() as u64)?;
        println!("\n=== {} ===", mode.as_str());
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    }
    Ok(())
}
