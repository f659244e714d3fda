//! Resource command handlers
//!
//! One-shot REST reads and mutation requests. Mutations are not applied
//! locally; running `watch` elsewhere shows the server's echo.

use anyhow::{bail, Context, Result};
use serde_json::Value;

use resmirror_core::{Config, Resource, ResourceData, ResourceRecord, RestClient, TargetId};

use crate::output::Output;

fn client(config: &Config) -> Result<RestClient> {
    RestClient::new(&config.server_url).context("Failed to create REST client")
}

/// List a collection
pub async fn list(config: &Config, resource_type: String, output: &Output) -> Result<()> {
    let records = client(config)?
        .fetch_collection(&resource_type)
        .await
        .with_context(|| format!("Failed to fetch '{}'", resource_type))?;

    output.print_resources(&to_resources(&resource_type, records));
    Ok(())
}

/// Show a single resource
pub async fn show(
    config: &Config,
    resource_type: String,
    resource_id: String,
    output: &Output,
) -> Result<()> {
    let record = client(config)?
        .fetch_resource(&resource_type, &resource_id)
        .await
        .with_context(|| format!("Failed to fetch {}/{}", resource_type, resource_id))?;

    output.print_resource(&record.into_resource(&resource_type));
    Ok(())
}

/// Create a resource
pub async fn create(
    config: &Config,
    resource_type: String,
    resource_id: String,
    data: Option<String>,
    output: &Output,
) -> Result<()> {
    let data = match data {
        Some(raw) => parse_object(&raw)?,
        None => ResourceData::new(),
    };

    let response = client(config)?
        .create_resource(&resource_type, &resource_id, data)
        .await
        .context("Failed to create resource")?;

    output.success(&format!("Created {}/{}", resource_type, resource_id));
    output.print_value(&response);
    Ok(())
}

/// Append a link to a resource
pub async fn link(
    config: &Config,
    resource_type: String,
    resource_id: String,
    relation: String,
    target: TargetId,
    title: Option<String>,
    output: &Output,
) -> Result<()> {
    let title = title.unwrap_or_else(|| target.resource_id.clone());

    let response = client(config)?
        .add_link(&resource_type, &resource_id, &relation, &target, &title)
        .await
        .context("Failed to add link")?;

    output.success(&format!(
        "Linked {}/{} --{}--> {}",
        resource_type,
        resource_id,
        relation,
        target.key()
    ));
    output.print_value(&response);
    Ok(())
}

/// Set fields on a resource
pub async fn set(
    config: &Config,
    resource_type: String,
    resource_id: String,
    assignments: Vec<String>,
    output: &Output,
) -> Result<()> {
    let mut fields = ResourceData::new();
    for assignment in &assignments {
        let (key, value) = parse_assignment(assignment)?;
        fields.insert(key, value);
    }

    let response = client(config)?
        .patch_resource(&resource_type, &resource_id, fields)
        .await
        .context("Failed to update resource")?;

    output.success(&format!("Updated {}/{}", resource_type, resource_id));
    output.print_value(&response);
    Ok(())
}

/// Delete a resource
pub async fn delete(
    config: &Config,
    resource_type: String,
    resource_id: String,
    output: &Output,
) -> Result<()> {
    client(config)?
        .delete_resource(&resource_type, &resource_id)
        .await
        .context("Failed to delete resource")?;

    output.success(&format!("Deleted {}/{}", resource_type, resource_id));
    Ok(())
}

/// Convert records in server order, lifting `_links` as the mirror does
fn to_resources(resource_type: &str, records: Vec<ResourceRecord>) -> Vec<Resource> {
    records
        .into_iter()
        .map(|record| record.into_resource(resource_type))
        .collect()
}

fn parse_object(raw: &str) -> Result<ResourceData> {
    match serde_json::from_str(raw).context("--data is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("--data must be a JSON object, got: {}", other),
    }
}

/// Parse `KEY=VALUE`; VALUE is read as JSON when it parses, else as a string
fn parse_assignment(assignment: &str) -> Result<(String, Value)> {
    let Some((key, value)) = assignment.split_once('=') else {
        bail!("Expected KEY=VALUE, got '{}'", assignment);
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("Empty key in '{}'", assignment);
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("title=Weekly shop").unwrap(),
            ("title".to_string(), json!("Weekly shop"))
        );
        assert_eq!(
            parse_assignment("done=true").unwrap(),
            ("done".to_string(), json!(true))
        );
        assert_eq!(
            parse_assignment("count=3").unwrap(),
            ("count".to_string(), json!(3))
        );
        assert_eq!(
            parse_assignment("expr=a=b").unwrap(),
            ("expr".to_string(), json!("a=b"))
        );
        assert_eq!(
            parse_assignment("note=").unwrap(),
            ("note".to_string(), json!(""))
        );
    }

    #[test]
    fn test_parse_assignment_errors() {
        assert!(parse_assignment("no-equals").is_err());
        assert!(parse_assignment("=value").is_err());
    }

    #[test]
    fn test_parse_object() {
        let data = parse_object(r#"{"title": "Groceries"}"#).unwrap();
        assert_eq!(data["title"], json!("Groceries"));
        assert!(parse_object("[1, 2]").is_err());
        assert!(parse_object("{").is_err());
    }

    #[test]
    fn test_to_resources_keeps_server_order() {
        let records: Vec<ResourceRecord> = serde_json::from_value(json!([
            {"resource_id": "weekly", "resource_data": {}},
            {"resource_id": "chores", "resource_data": {}},
            {
                "resource_id": "groceries",
                "resource_data": {
                    "_links": {
                        "children": [{"title": "Item", "target_id": ["todo_item", "milk"]}]
                    }
                }
            }
        ]))
        .unwrap();

        let resources = to_resources("todo_list", records);
        let ids: Vec<&str> = resources.iter().map(|r| r.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["weekly", "chores", "groceries"]);
        assert_eq!(resources[2].links_for("children").len(), 1);
    }
}
