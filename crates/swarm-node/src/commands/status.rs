//! The `status` subcommand: configuration summary plus a liveness probe
//! against the local server.

use anyhow::Result;
use swarm_config::{config_path, Settings};
use swarm_llm::catalog;

use super::{daemon, wiring};

/// Print configuration, provider detection, and daemon status.
pub async fn run() -> Result<()> {
    let settings = Settings::load(None)?;
    let workspace = wiring::resolve_workspace(&settings);

    println!("config:    {}", config_path().display());
    println!("workspace: {}", workspace.display());

    let model = if settings.agent.model.is_empty() {
        "(default)".to_string()
    } else {
        settings.agent.model.clone()
    };
    let provider = catalog::find_by_model(&settings.agent.model)
        .map(|spec| spec.label())
        .unwrap_or("unknown");
    println!("model:     {model} (provider: {provider})");

    if !settings.survival.api_url.is_empty() {
        println!("backend:   {}", settings.survival.api_url);
    }

    let pids = daemon::running_pids();
    if pids.is_empty() {
        println!("server:    not running");
        return Ok(());
    }

    let port = settings.gateway.port;
    let health_url = format!("http://127.0.0.1:{port}/health");
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(2))
        .build()
        .unwrap_or_default();
    match client.get(&health_url).send().await {
        Ok(resp) if resp.status().is_success() => {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            println!(
                "server:    running (pids {pids:?}, instance {}, uptime {}s)",
                body["instanceId"].as_str().unwrap_or("?"),
                body["uptime"].as_u64().unwrap_or(0),
            );
        }
        _ => println!("server:    PID file present (pids {pids:?}) but {health_url} unreachable"),
    }
    Ok(())
}
