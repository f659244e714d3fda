//! Snapshot loading
//!
//! Fetches a resource collection over REST and seeds the mirror with it.
//! Fetching and seeding are split so the fetch can run on its own task
//! while the engine keeps applying live events; seeding uses the same
//! idempotent `create` rule, so records that raced with a live `create`
//! are reconciled rather than duplicated.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::SyncResult;
use crate::message::ClientMessage;
use crate::mirror::Mirror;
use crate::models::ResourceRecord;
use crate::rest::RestClient;
use crate::subscription::SubscriptionManager;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(retry.min(32) as i32);
        self.initial_delay.mul_f64(factor).min(self.max_delay)
    }
}

/// Loads collections with retries
#[derive(Debug, Clone)]
pub struct SnapshotLoader {
    client: RestClient,
    retry: RetryConfig,
}

impl SnapshotLoader {
    pub fn new(client: RestClient, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    /// Fetch a collection, retrying transient failures
    pub async fn load_collection(&self, resource_type: &str) -> SyncResult<Vec<ResourceRecord>> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.client.fetch_collection(resource_type).await {
                Ok(records) => {
                    info!(
                        "Loaded {} '{}' resources (attempt {})",
                        records.len(),
                        resource_type,
                        attempt
                    );
                    return Ok(records);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt - 1);
                    warn!(
                        "Loading '{}' failed (attempt {}/{}): {}; retrying in {:?}",
                        resource_type, attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!("Loading '{}' failed: {}", resource_type, e);
                    return Err(e);
                }
            }
        }
    }
}

/// Result of seeding a collection into the mirror
#[derive(Debug, Default)]
pub struct SeedOutcome {
    /// Records that were new to the mirror
    pub created: usize,
    /// Joins to send for the new subscriptions
    pub joins: Vec<ClientMessage>,
}

/// Insert snapshot records and subscribe to each resource's lifecycle
///
/// The collection's create topic is subscribed last; it is normally already
/// in the set because the engine joins it before starting the fetch.
pub fn seed_collection(
    mirror: &mut Mirror,
    subscriptions: &mut SubscriptionManager,
    resource_type: &str,
    records: Vec<ResourceRecord>,
) -> SeedOutcome {
    let mut outcome = SeedOutcome::default();

    for record in records {
        let record_type = record
            .resource_type
            .clone()
            .unwrap_or_else(|| resource_type.to_string());
        let resource_id = record.resource_id.clone();

        if mirror.seed(resource_type, record).is_some() {
            outcome.created += 1;
        } else {
            debug!("Snapshot record {}/{} already mirrored", record_type, resource_id);
        }
        outcome
            .joins
            .extend(subscriptions.subscribe_resource_lifecycle(&record_type, &resource_id));
    }

    outcome
        .joins
        .extend(subscriptions.subscribe_collection_create(resource_type));
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceKey;
    use crate::topic::Topic;
    use serde_json::json;

    fn records(value: serde_json::Value) -> Vec<ResourceRecord> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_retry_delays() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for(0), Duration::from_millis(500));
        assert_eq!(retry.delay_for(1), Duration::from_secs(1));
        assert_eq!(retry.delay_for(2), Duration::from_secs(2));
        assert_eq!(retry.delay_for(10), Duration::from_secs(10));
        assert_eq!(RetryConfig::no_retry().max_attempts, 1);
    }

    #[test]
    fn test_seed_subscribes_every_record() {
        let mut mirror = Mirror::new();
        let mut subs = SubscriptionManager::new();

        let outcome = seed_collection(
            &mut mirror,
            &mut subs,
            "todo_list",
            records(json!([
                {"resource_type": "todo_list", "resource_id": "groceries", "resource_data": {}},
                {"resource_id": "chores", "resource_data": {"owner": "sam"}}
            ])),
        );

        assert_eq!(outcome.created, 2);
        // Disconnected: nothing sent yet, everything waits for the open replay
        assert!(outcome.joins.is_empty());
        assert_eq!(subs.len(), 7);
        assert!(subs.contains(&Topic::create("todo_list")));
        assert!(subs.contains(&Topic::delete("todo_list", "chores")));
        assert!(mirror.contains(&ResourceKey::new("todo_list", "chores")));
    }

    #[test]
    fn test_seed_when_connected_returns_joins() {
        let mut mirror = Mirror::new();
        let mut subs = SubscriptionManager::new();
        subs.on_transport_open();
        subs.subscribe_collection_create("power");

        let outcome = seed_collection(
            &mut mirror,
            &mut subs,
            "power",
            records(json!([{"resource_id": "sensor-1", "resource_data": {"value": 3}}])),
        );

        assert_eq!(outcome.joins.len(), 3);
    }

    #[test]
    fn test_seed_reconciles_live_create() {
        let mut mirror = Mirror::new();
        let mut subs = SubscriptionManager::new();
        subs.on_transport_open();
        subs.subscribe_collection_create("todo_list");
        subs.subscribe_resource_lifecycle("todo_list", "groceries");
        mirror.seed(
            "todo_list",
            ResourceRecord {
                resource_type: None,
                resource_id: "groceries".to_string(),
                resource_data: Default::default(),
            },
        );

        let outcome = seed_collection(
            &mut mirror,
            &mut subs,
            "todo_list",
            records(json!([{"resource_id": "groceries", "resource_data": {}}])),
        );

        assert_eq!(outcome.created, 0);
        assert!(outcome.joins.is_empty());
        assert_eq!(mirror.len(), 1);
    }
}
