//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use chrono::{DateTime, Local};
use serde_json::Value;

use resmirror_core::{MirrorChange, Resource};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print a single resource with its links
    pub fn print_resource(&self, resource: &Resource) {
        match self.format {
            OutputFormat::Human => {
                println!("Type:  {}", resource.resource_type);
                println!("ID:    {}", resource.resource_id);
                if resource.data.is_empty() {
                    println!("Data:  (empty)");
                } else {
                    println!("Data:");
                    for (key, value) in &resource.data {
                        println!("  {}: {}", key, value);
                    }
                }

                if !resource.links.is_empty() {
                    println!();
                    for (relation, links) in &resource.links {
                        println!("── {} ({}) ──", relation, links.len());
                        for link in links {
                            println!("{} -> {}", link.title, link.target_id.key());
                        }
                    }
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(resource).unwrap());
            }
            OutputFormat::Quiet => {
                println!("{}", resource.key());
            }
        }
    }

    /// Print a list of resources
    pub fn print_resources(&self, resources: &[Resource]) {
        match self.format {
            OutputFormat::Human => {
                if resources.is_empty() {
                    println!("No resources found.");
                    return;
                }
                for resource in resources {
                    let link_count: usize = resource.links.values().map(Vec::len).sum();
                    let links_indicator = if link_count == 0 {
                        String::new()
                    } else {
                        format!(" [{}]", link_count)
                    };
                    println!(
                        "{}{} | {}",
                        resource.key(),
                        links_indicator,
                        truncate(&Value::Object(resource.data.clone()).to_string(), 60)
                    );
                }
                println!("\n{} resource(s)", resources.len());
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(resources).unwrap());
            }
            OutputFormat::Quiet => {
                for resource in resources {
                    println!("{}", resource.key());
                }
            }
        }
    }

    /// Print one mirror change as a log line
    pub fn print_change(
        &self,
        at: DateTime<Local>,
        change: &MirrorChange,
        resource: Option<&Resource>,
    ) {
        match self.format {
            OutputFormat::Human => {
                println!(
                    "[{}] {:<8} {}",
                    at.format("%H:%M:%S"),
                    change_kind(change),
                    describe_change(change)
                );
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "at": at.to_rfc3339(),
                        "change": change_kind(change),
                        "key": change.key(),
                        "resource": resource,
                    })
                );
            }
            OutputFormat::Quiet => {
                println!("{} {}", change_kind(change), change.key());
            }
        }
    }

    /// Print a server response body
    pub fn print_value(&self, value: &Value) {
        match self.format {
            OutputFormat::Human if !value.is_null() => {
                println!("{}", serde_json::to_string_pretty(value).unwrap());
            }
            OutputFormat::Json => println!("{}", value),
            _ => {}
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn change_kind(change: &MirrorChange) -> &'static str {
    match change {
        MirrorChange::Created(_) => "created",
        MirrorChange::Patched { .. } => "patched",
        MirrorChange::Linked { .. } => "linked",
        MirrorChange::Deleted(_) => "deleted",
    }
}

fn describe_change(change: &MirrorChange) -> String {
    match change {
        MirrorChange::Created(key) | MirrorChange::Deleted(key) => key.to_string(),
        MirrorChange::Patched { key, fields } => format!("{} ({})", key, fields.join(", ")),
        MirrorChange::Linked { key, relation } => format!("{} +{}", key, relation),
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
