//! The `onboard` subcommand: workspace scaffolding and a starter
//! configuration.

use std::path::PathBuf;

use anyhow::Result;
use swarm_config::{config_path, Settings};

const AGENTS_TEMPLATE: &str = "# Operating Notes\n\n\
Describe standing instructions for your agents here. This file is folded\n\
into the system prompt when present.\n";

const SOUL_TEMPLATE: &str = "# Personality\n\n\
Describe the assistant's tone and values here.\n";

const USER_TEMPLATE: &str = "# About the User\n\n\
Facts the assistant should remember about you.\n";

/// Create the workspace layout and default config.
pub fn run(workspace: Option<PathBuf>) -> Result<()> {
    let mut settings = Settings::load(None).unwrap_or_default();
    let workspace = workspace.unwrap_or_else(|| super::wiring::resolve_workspace(&settings));

    for sub in ["memory", "skills", "sessions"] {
        std::fs::create_dir_all(workspace.join(sub))?;
    }
    for (name, content) in [
        ("AGENTS.md", AGENTS_TEMPLATE),
        ("SOUL.md", SOUL_TEMPLATE),
        ("USER.md", USER_TEMPLATE),
    ] {
        let path = workspace.join(name);
        if !path.exists() {
            std::fs::write(&path, content)?;
            println!("created {}", path.display());
        }
    }

    if !config_path().exists() {
        settings.agent.workspace = workspace.to_string_lossy().into_owned();
        settings.save(None)?;
        println!("created {}", config_path().display());
    }

    println!("workspace ready at {}", workspace.display());
    println!("next: set an API key (e.g. OPENROUTER_API_KEY) and run `swarm agent \"hello\"`");
    Ok(())
}
