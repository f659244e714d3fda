//! REST client for the resource API
//!
//! Reads collections and single resources for snapshots, and issues the
//! mutation requests whose effects come back over the realtime channel.
//!
//! ## Endpoints
//!
//! - `GET /{type}/` lists a collection
//! - `GET /{type}/{id}/` reads one resource
//! - `POST /{type}/{id}/` creates a resource
//! - `POST /{type}/{id}/` with `X-CUSTOM-ACTION: add_link` appends a link
//! - `PATCH /{type}/{id}/` sets fields
//! - `DELETE /{type}/{id}/` removes a resource

use std::time::Duration;

use reqwest::header::HeaderValue;
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::models::{ResourceData, ResourceKey, ResourceRecord, TargetId};

/// Header selecting a custom resource action on POST
pub const CUSTOM_ACTION_HEADER: &str = "X-CUSTOM-ACTION";

/// Default per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client bound to one API base URL
#[derive(Debug, Clone)]
pub struct RestClient {
    http: Client,
    base_url: Url,
}

impl RestClient {
    /// Create a client for the given base URL
    pub fn new(base_url: &str) -> SyncResult<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Self::with_client(http, base_url)
    }

    /// Create a client reusing an existing reqwest client
    pub fn with_client(http: Client, base_url: &str) -> SyncResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| SyncError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::InvalidUrl {
                url: base_url.to_string(),
                reason: "not a base URL".to_string(),
            });
        }
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `GET /{type}/`
    pub async fn fetch_collection(&self, resource_type: &str) -> SyncResult<Vec<ResourceRecord>> {
        let url = self.url(&[resource_type]);
        debug!("Fetching collection {}", url);
        self.send_json(self.http.get(url.clone()), &url).await
    }

    /// `GET /{type}/{id}/`
    pub async fn fetch_resource(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> SyncResult<ResourceRecord> {
        let url = self.url(&[resource_type, resource_id]);
        debug!("Fetching resource {}", url);
        let body: Value = self.send_json(self.http.get(url.clone()), &url).await?;

        // Servers answer a bare string for unknown ids
        if !body.is_object() {
            return Err(SyncError::NotFound {
                key: ResourceKey::new(resource_type, resource_id),
            });
        }
        let mut record: ResourceRecord = serde_json::from_value(body)?;
        if record.resource_type.is_none() {
            record.resource_type = Some(resource_type.to_string());
        }
        Ok(record)
    }

    /// `POST /{type}/{id}/` with `{"resource_data": ...}`
    pub async fn create_resource(
        &self,
        resource_type: &str,
        resource_id: &str,
        data: ResourceData,
    ) -> SyncResult<Value> {
        let url = self.url(&[resource_type, resource_id]);
        let request = self
            .http
            .post(url.clone())
            .json(&json!({ "resource_data": data }));
        self.send_json(request, &url).await
    }

    /// `POST /{type}/{id}/` with the `add_link` custom action
    pub async fn add_link(
        &self,
        resource_type: &str,
        resource_id: &str,
        relation: &str,
        target_id: &TargetId,
        title: &str,
    ) -> SyncResult<Value> {
        let url = self.url(&[resource_type, resource_id]);
        let request = self
            .http
            .post(url.clone())
            .header(CUSTOM_ACTION_HEADER, HeaderValue::from_static("add_link"))
            .json(&json!({
                "relation": relation,
                "target_id": target_id,
                "title": title,
            }));
        self.send_json(request, &url).await
    }

    /// `PATCH /{type}/{id}/` with `{"patch": {"$set": ...}}`
    pub async fn patch_resource(
        &self,
        resource_type: &str,
        resource_id: &str,
        set: ResourceData,
    ) -> SyncResult<Value> {
        let url = self.url(&[resource_type, resource_id]);
        let request = self
            .http
            .request(Method::PATCH, url.clone())
            .json(&json!({ "patch": { "$set": set } }));
        self.send_json(request, &url).await
    }

    /// `DELETE /{type}/{id}/`
    pub async fn delete_resource(&self, resource_type: &str, resource_id: &str) -> SyncResult<()> {
        let url = self.url(&[resource_type, resource_id]);
        let _: Value = self.send_json(self.http.delete(url.clone()), &url).await?;
        Ok(())
    }

    /// Build `{base}/{segment}/.../` with each segment percent-encoded
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(segments);
            path.push("");
        }
        url
    }

    /// Send a request and decode its JSON body; an empty body reads as null
    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        url: &Url,
    ) -> SyncResult<T> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status {
                url: url.to_string(),
                status,
            });
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(serde_json::from_value(Value::Null)?);
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_keep_trailing_slash() {
        let client = RestClient::new("http://localhost:5001").unwrap();
        assert_eq!(
            client.url(&["todo_list"]).as_str(),
            "http://localhost:5001/todo_list/"
        );
        assert_eq!(
            client.url(&["todo_list", "groceries"]).as_str(),
            "http://localhost:5001/todo_list/groceries/"
        );
    }

    #[test]
    fn test_urls_under_prefix() {
        let client = RestClient::new("https://example.com/api/").unwrap();
        assert_eq!(
            client.url(&["power", "sensor 1"]).as_str(),
            "https://example.com/api/power/sensor%201/"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            RestClient::new("not a url"),
            Err(SyncError::InvalidUrl { .. })
        ));
        assert!(matches!(
            RestClient::new("mailto:someone@example.com"),
            Err(SyncError::InvalidUrl { .. })
        ));
    }
}
