//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use resmirror_core::config::parse_collections;
use resmirror_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    let realtime_url = config.effective_realtime_url();

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "server_url": config.server_url,
                    "realtime_url": config.realtime_url,
                    "effective_realtime_url": realtime_url.as_ref().ok(),
                    "collections": config.collections,
                    "reconnect": config.reconnect,
                    "snapshot": config.snapshot
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.server_url);
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  server_url:   {}", config.server_url);
            match (&config.realtime_url, &realtime_url) {
                (Some(url), _) => println!("  realtime_url: {}", url),
                (None, Ok(derived)) => println!("  realtime_url: {} (derived)", derived),
                (None, Err(e)) => println!("  realtime_url: (invalid: {})", e),
            }
            println!(
                "  collections:  {}",
                if config.collections.is_empty() {
                    "(none)".to_string()
                } else {
                    config.collections.join(", ")
                }
            );
            println!(
                "  reconnect:    {}ms .. {}ms",
                config.reconnect.initial_delay_ms, config.reconnect.max_delay_ms
            );
            println!(
                "  snapshot:     {} attempts, {}ms .. {}ms",
                config.snapshot.max_attempts,
                config.snapshot.initial_delay_ms,
                config.snapshot.max_delay_ms
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply_setting(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

fn apply_setting(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "server_url" => {
            config.server_url = value.to_string();
        }
        "realtime_url" => {
            config.realtime_url = if value.is_empty() || value == "none" {
                None
            } else {
                Some(value.to_string())
            };
        }
        "collections" => {
            config.collections = parse_collections(value);
        }
        "reconnect.initial_delay_ms" => {
            config.reconnect.initial_delay_ms = parse_number(key, value)?;
        }
        "reconnect.max_delay_ms" => {
            config.reconnect.max_delay_ms = parse_number(key, value)?;
        }
        "snapshot.max_attempts" => {
            config.snapshot.max_attempts = parse_number(key, value)?;
        }
        "snapshot.initial_delay_ms" => {
            config.snapshot.initial_delay_ms = parse_number(key, value)?;
        }
        "snapshot.max_delay_ms" => {
            config.snapshot.max_delay_ms = parse_number(key, value)?;
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: server_url, realtime_url, collections, \
                 reconnect.initial_delay_ms, reconnect.max_delay_ms, \
                 snapshot.max_attempts, snapshot.initial_delay_ms, snapshot.max_delay_ms",
                key
            );
        }
    }
    Ok(())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .ok()
        .with_context(|| format!("Invalid value for {}: expected a number", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_apply_setting() {
        let mut config = Config::default();

        apply_setting(&mut config, "collections", "todo_list, power").unwrap();
        assert_eq!(config.collections, vec!["todo_list", "power"]);

        apply_setting(&mut config, "realtime_url", "ws://example.com/rt").unwrap();
        assert_eq!(config.realtime_url.as_deref(), Some("ws://example.com/rt"));
        apply_setting(&mut config, "realtime_url", "none").unwrap();
        assert_eq!(config.realtime_url, None);

        apply_setting(&mut config, "snapshot.max_attempts", "2").unwrap();
        assert_eq!(config.snapshot.max_attempts, 2);
    }

    #[test]
    fn test_apply_setting_rejects_bad_input() {
        let mut config = Config::default();
        assert!(apply_setting(&mut config, "sync_url", "x").is_err());
        assert!(apply_setting(&mut config, "reconnect.max_delay_ms", "soon").is_err());
    }

    #[test]
    fn test_set_writes_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        let output = Output::new(OutputFormat::Quiet);

        set(
            "server_url".to_string(),
            "http://127.0.0.1:9000".to_string(),
            Some(&path),
            &output,
        )
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("http://127.0.0.1:9000"));
    }
}
