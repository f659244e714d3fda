//! Watch command handler

use anyhow::{bail, Context, Result};
use chrono::Local;
use tracing::debug;

use resmirror_core::{spawn_engine, Config, EngineConfig, EngineEvent};

use crate::output::Output;

/// Mirror collections and print every change until Ctrl-C
pub async fn watch(config: &Config, resource_types: Vec<String>, output: &Output) -> Result<()> {
    let mut engine_config = EngineConfig::from_config(config).context("Invalid configuration")?;
    if !resource_types.is_empty() {
        engine_config.collections = resource_types;
    }
    if engine_config.collections.is_empty() {
        bail!(
            "No collections to watch. Pass resource types or set them with:\n  \
             resmirror config set collections todo_list,todo_item"
        );
    }

    output.message(&format!(
        "Watching {} via {} (Ctrl-C to stop)",
        engine_config.collections.join(", "),
        engine_config.transport.url
    ));

    let mut engine = spawn_engine(engine_config).context("Failed to start sync engine")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                output.message("Stopping...");
                break;
            }
            event = engine.next_event() => {
                let Some(event) = event else {
                    bail!("Sync engine stopped unexpectedly");
                };
                debug!("Engine event: {:?}", event);
                print_event(&event, output);
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}

fn print_event(event: &EngineEvent, output: &Output) {
    match event {
        EngineEvent::Connected => output.message("Connected"),
        EngineEvent::Disconnected => output.message("Disconnected, reconnecting..."),
        EngineEvent::CollectionLoaded {
            resource_type,
            count,
        } => output.message(&format!("Loaded {} '{}' resource(s)", count, resource_type)),
        EngineEvent::LoadFailed {
            resource_type,
            error,
        } => {
            if !output.is_quiet() {
                eprintln!("⚠ Failed to load '{}': {}", resource_type, error);
            }
        }
        EngineEvent::Changed { change, resource } => {
            output.print_change(Local::now(), change, resource.as_ref());
        }
    }
}
