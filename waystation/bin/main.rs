#![warn(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

use waystation_common::ConfigError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = find_config_file()?;
    let config_content = std::fs::read_to_string(&config_path).map_err(ConfigError::Io)?;
    let controller: waystation::Controller =
        ron::from_str(&config_content).map_err(|e| ConfigError::Parse(e.to_string()))?;

    controller.run().await
}

/// Find the configuration file using the following precedence:
/// 1. `WAYSTATION_CONFIG` environment variable
/// 2. ./waystation.config.ron (current working directory)
/// 3. /etc/waystation/waystation.config.ron (system-wide config)
fn find_config_file() -> anyhow::Result<std::path::PathBuf> {
    if let Ok(env_path) = std::env::var("WAYSTATION_CONFIG") {
        let path = std::path::PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("WAYSTATION_CONFIG points to non-existent file: {}", path.display());
    }

    let default_paths = [
        std::path::PathBuf::from("./waystation.config.ron"),
        std::path::PathBuf::from("/etc/waystation/waystation.config.ron"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!("no configuration file found. Tried:\n  - WAYSTATION_CONFIG environment variable\n{paths_tried}")
}
