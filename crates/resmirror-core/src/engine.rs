//! Sync engine
//!
//! [`SyncCore`] holds the mirror and the subscription set and turns
//! transport events into mirror updates and outbound joins, without doing
//! any I/O itself. [`spawn_engine`] runs a `SyncCore` on a tokio task wired
//! to a [`transport`](crate::transport) connection and to snapshot loader
//! tasks.
//!
//! ## Flow
//!
//! 1. `watch(type)` joins `{type}.create`, then fetches the collection
//! 2. Each snapshot record is seeded and its lifecycle topics joined
//! 3. Live events are decoded and applied in arrival order
//! 4. A live `create` joins the new resource's lifecycle topics
//! 5. Every (re)connect replays the full topic set

use std::collections::HashSet;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{SyncError, SyncResult};
use crate::message::{self, ClientMessage, Decoded, ResourceEvent};
use crate::mirror::{Mirror, MirrorChange};
use crate::models::{Resource, ResourceKey, ResourceRecord};
use crate::rest::RestClient;
use crate::snapshot::{seed_collection, RetryConfig, SnapshotLoader};
use crate::subscription::SubscriptionManager;
use crate::transport::{spawn_transport, ConnectionStatus, TransportConfig, TransportEvent, TransportHandle};

/// Mirror plus subscriptions, driven by transport events
#[derive(Debug, Default)]
pub struct SyncCore {
    mirror: Mirror,
    subscriptions: SubscriptionManager,
    /// Collections whose snapshot fetch is in flight
    loading: HashSet<String>,
    /// Deletes seen while a fetch was in flight; the snapshot may predate them
    deleted_while_loading: HashSet<ResourceKey>,
}

impl SyncCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    /// Mutable mirror access, e.g. to register observers
    pub fn mirror_mut(&mut self) -> &mut Mirror {
        &mut self.mirror
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Start watching a collection, before its snapshot is fetched
    pub fn watch_collection(&mut self, resource_type: &str) -> Vec<ClientMessage> {
        self.loading.insert(resource_type.to_string());
        self.subscriptions.subscribe_collection_create(resource_type)
    }

    /// Seed a fetched snapshot
    ///
    /// Records deleted by live events during the fetch are skipped.
    pub fn on_snapshot(
        &mut self,
        resource_type: &str,
        records: Vec<ResourceRecord>,
    ) -> Vec<ClientMessage> {
        let deleted = self.finish_loading(resource_type);
        let records: Vec<ResourceRecord> = records
            .into_iter()
            .filter(|record| {
                let key = ResourceKey::new(
                    record.resource_type.as_deref().unwrap_or(resource_type),
                    record.resource_id.as_str(),
                );
                let stale = deleted.contains(&key);
                if stale {
                    debug!("Skipping snapshot record {} deleted during load", key);
                }
                !stale
            })
            .collect();

        let outcome = seed_collection(
            &mut self.mirror,
            &mut self.subscriptions,
            resource_type,
            records,
        );
        debug!(
            "Seeded {} new '{}' resources",
            outcome.created, resource_type
        );
        outcome.joins
    }

    /// The snapshot fetch for a collection gave up
    pub fn on_snapshot_failed(&mut self, resource_type: &str) {
        self.finish_loading(resource_type);
    }

    fn finish_loading(&mut self, resource_type: &str) -> HashSet<ResourceKey> {
        self.loading.remove(resource_type);
        let (deleted, kept) = self
            .deleted_while_loading
            .drain()
            .partition(|key| key.resource_type == resource_type);
        self.deleted_while_loading = kept;
        deleted
    }

    pub fn on_open(&mut self) -> Vec<ClientMessage> {
        self.subscriptions.on_transport_open()
    }

    pub fn on_closed(&mut self) {
        self.subscriptions.on_transport_closed();
    }

    /// Decode and apply one inbound frame
    pub fn on_message(&mut self, raw: &str) -> Vec<ClientMessage> {
        let event = match message::decode(raw) {
            Decoded::Event(event) => event,
            Decoded::Unrecognized { action } => {
                debug!("Ignoring event with unknown action '{}'", action);
                return Vec::new();
            }
            Decoded::Malformed { reason } => {
                warn!("Dropping malformed event: {}", reason);
                return Vec::new();
            }
            Decoded::NotAnEvent => {
                debug!("Ignoring non-event frame: {}", raw);
                return Vec::new();
            }
        };
        self.on_event(event)
    }

    /// Apply a decoded event and adjust subscriptions to match
    pub fn on_event(&mut self, event: ResourceEvent) -> Vec<ClientMessage> {
        if let ResourceEvent::Delete {
            resource_type,
            resource_id,
        } = &event
        {
            self.remember_delete(resource_type.as_deref(), resource_id);
        }

        match self.mirror.apply(event) {
            Some(MirrorChange::Created(key)) => {
                self.deleted_while_loading.remove(&key);
                self.subscriptions
                    .subscribe_resource_lifecycle(&key.resource_type, &key.resource_id)
            }
            Some(MirrorChange::Deleted(key)) => {
                self.subscriptions
                    .unsubscribe_resource_lifecycle(&key.resource_type, &key.resource_id);
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    /// Record a delete against every in-flight load it may apply to
    fn remember_delete(&mut self, resource_type: Option<&str>, resource_id: &str) {
        let types: Vec<&String> = match resource_type {
            Some(resource_type) => self.loading.get(resource_type).into_iter().collect(),
            None => self.loading.iter().collect(),
        };
        let keys: Vec<ResourceKey> = types
            .into_iter()
            .map(|resource_type| ResourceKey::new(resource_type.as_str(), resource_id))
            .collect();
        self.deleted_while_loading.extend(keys);
    }
}

/// Commands sent to the engine task
#[derive(Debug)]
pub enum EngineCommand {
    /// Mirror another collection
    Watch(String),
    /// Reply with a copy of every mirrored resource
    Snapshot(oneshot::Sender<Vec<Resource>>),
    /// Stop the engine and its transport
    Shutdown,
}

/// Events emitted by the engine task
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Realtime connection established
    Connected,
    /// Realtime connection lost; reconnecting
    Disconnected,
    /// A collection snapshot was seeded
    CollectionLoaded { resource_type: String, count: usize },
    /// A collection snapshot could not be fetched
    LoadFailed { resource_type: String, error: String },
    /// The mirror changed; `resource` is its state after the change
    Changed {
        change: MirrorChange,
        resource: Option<Resource>,
    },
}

/// Configuration for the sync engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the REST API
    pub server_url: String,
    /// Realtime transport settings
    pub transport: TransportConfig,
    /// Snapshot retry policy
    pub retry: RetryConfig,
    /// Collections to watch on start
    pub collections: Vec<String>,
}

impl EngineConfig {
    /// Build engine settings from application configuration
    pub fn from_config(config: &Config) -> SyncResult<Self> {
        Ok(Self {
            server_url: config.server_url.clone(),
            transport: config.transport_config()?,
            retry: config.retry_config(),
            collections: config.collections.clone(),
        })
    }
}

/// Handle to control and observe the engine task
pub struct EngineHandle {
    /// Send commands to the engine task
    pub command_tx: mpsc::Sender<EngineCommand>,
    /// Receive events from the engine task
    pub event_rx: mpsc::Receiver<EngineEvent>,
    /// Watch realtime connection status
    pub status_rx: watch::Receiver<ConnectionStatus>,
}

impl EngineHandle {
    /// Start mirroring another collection
    pub async fn watch(&self, resource_type: impl Into<String>) -> SyncResult<()> {
        self.command_tx
            .send(EngineCommand::Watch(resource_type.into()))
            .await
            .map_err(|_| SyncError::EngineStopped)
    }

    /// Copy of every mirrored resource, ordered by type then id
    pub async fn snapshot(&self) -> SyncResult<Vec<Resource>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(EngineCommand::Snapshot(reply_tx))
            .await
            .map_err(|_| SyncError::EngineStopped)?;
        reply_rx.await.map_err(|_| SyncError::EngineStopped)
    }

    /// Wait for the next engine event
    pub async fn next_event(&mut self) -> Option<EngineEvent> {
        self.event_rx.recv().await
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Stop the engine and close the connection
    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(EngineCommand::Shutdown).await;
    }
}

/// Spawn the engine and its transport
///
/// Collections listed in the config are watched immediately.
pub fn spawn_engine(config: EngineConfig) -> SyncResult<EngineHandle> {
    let client = RestClient::new(&config.server_url)?;
    let loader = SnapshotLoader::new(client, config.retry.clone());

    let transport = spawn_transport(config.transport.clone());
    let status_rx = transport.status_rx.clone();

    let (command_tx, command_rx) = mpsc::channel(32);
    let (event_tx, event_rx) = mpsc::channel(256);

    tokio::spawn(engine_loop(
        config.collections,
        loader,
        transport,
        command_rx,
        event_tx,
    ));

    Ok(EngineHandle {
        command_tx,
        event_rx,
        status_rx,
    })
}

/// State owned by the engine task
struct EngineTask {
    core: SyncCore,
    loader: SnapshotLoader,
    transport: TransportHandle,
    watched: HashSet<String>,
    snapshot_tx: mpsc::Sender<(String, SyncResult<Vec<ResourceRecord>>)>,
    changes_rx: mpsc::UnboundedReceiver<MirrorChange>,
    event_tx: mpsc::Sender<EngineEvent>,
    /// Transport connection the subscription set was last replayed on
    session: Option<u64>,
}

/// Main engine loop
async fn engine_loop(
    collections: Vec<String>,
    loader: SnapshotLoader,
    transport: TransportHandle,
    mut command_rx: mpsc::Receiver<EngineCommand>,
    event_tx: mpsc::Sender<EngineEvent>,
) {
    let (snapshot_tx, mut snapshot_rx) = mpsc::channel(16);
    let (changes_tx, changes_rx) = mpsc::unbounded_channel();

    let mut core = SyncCore::new();
    core.mirror_mut().observe(move |change| {
        let _ = changes_tx.send(change.clone());
    });

    let mut task = EngineTask {
        core,
        loader,
        transport,
        watched: HashSet::new(),
        snapshot_tx,
        changes_rx,
        event_tx,
        session: None,
    };

    for resource_type in collections {
        if task.watch(resource_type).await.is_err() {
            return;
        }
    }

    loop {
        let result = tokio::select! {
            cmd = command_rx.recv() => match cmd {
                Some(EngineCommand::Watch(resource_type)) => task.watch(resource_type).await,
                Some(EngineCommand::Snapshot(reply)) => {
                    let _ = reply.send(task.core.mirror().snapshot());
                    Ok(())
                }
                Some(EngineCommand::Shutdown) | None => {
                    info!("Sync engine shutting down");
                    task.transport.shutdown().await;
                    break;
                }
            },

            event = task.transport.event_rx.recv() => match event {
                Some(event) => task.on_transport_event(event).await,
                None => Err(SyncError::TransportStopped),
            },

            Some((resource_type, result)) = snapshot_rx.recv() => {
                task.on_snapshot(resource_type, result).await
            }
        };

        if let Err(e) = result {
            warn!("Sync engine stopping: {}", e);
            break;
        }
        task.forward_changes();
    }
}

impl EngineTask {
    /// Join the collection's create topic, then fetch it in the background
    async fn watch(&mut self, resource_type: String) -> SyncResult<()> {
        if !self.watched.insert(resource_type.clone()) {
            debug!("Already watching '{}'", resource_type);
            return Ok(());
        }

        let joins = self.core.watch_collection(&resource_type);
        self.send_all(joins).await?;

        info!("Loading '{}' snapshot", resource_type);
        let loader = self.loader.clone();
        let snapshot_tx = self.snapshot_tx.clone();
        tokio::spawn(async move {
            let result = loader.load_collection(&resource_type).await;
            let _ = snapshot_tx.send((resource_type, result)).await;
        });
        Ok(())
    }

    async fn on_transport_event(&mut self, event: TransportEvent) -> SyncResult<()> {
        match event {
            TransportEvent::Opened { session } => {
                self.session = Some(session);
                let joins = self.core.on_open();
                self.send_all(joins).await?;
                self.emit(EngineEvent::Connected);
            }
            TransportEvent::Message(raw) => {
                let joins = self.core.on_message(&raw);
                self.send_all(joins).await?;
            }
            TransportEvent::Closed => {
                self.session = None;
                self.core.on_closed();
                self.emit(EngineEvent::Disconnected);
            }
        }
        Ok(())
    }

    async fn on_snapshot(
        &mut self,
        resource_type: String,
        result: SyncResult<Vec<ResourceRecord>>,
    ) -> SyncResult<()> {
        match result {
            Ok(records) => {
                let count = records.len();
                let joins = self.core.on_snapshot(&resource_type, records);
                self.send_all(joins).await?;
                self.emit(EngineEvent::CollectionLoaded {
                    resource_type,
                    count,
                });
            }
            Err(e) => {
                // Allow a later watch() to try again
                self.watched.remove(&resource_type);
                self.core.on_snapshot_failed(&resource_type);
                self.emit(EngineEvent::LoadFailed {
                    resource_type,
                    error: e.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Send joins on the current connection only
    ///
    /// Joins never outlive their connection: the next open replays the
    /// whole subscription set anyway.
    async fn send_all(&mut self, messages: Vec<ClientMessage>) -> SyncResult<()> {
        let Some(session) = self.session else {
            return Ok(());
        };
        for message in messages {
            self.transport
                .send_on_session(message.encode(), session)
                .await?;
        }
        Ok(())
    }

    /// Drain observer notifications into engine events
    fn forward_changes(&mut self) {
        while let Ok(change) = self.changes_rx.try_recv() {
            let resource = self.core.mirror().get(change.key()).cloned();
            self.emit(EngineEvent::Changed { change, resource });
        }
    }

    /// Emit without waiting; a slow or idle reader loses events, not the mirror
    fn emit(&mut self, event: EngineEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Engine event queue full, dropping event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::Topic;
    use serde_json::{json, Value};

    fn topics(messages: &[ClientMessage]) -> Vec<String> {
        messages
            .iter()
            .map(|m| match m {
                ClientMessage::Join { topic } => topic.clone(),
            })
            .collect()
    }

    fn frame(data: Value) -> String {
        json!({ "data": data }).to_string()
    }

    fn groceries_snapshot() -> Vec<ResourceRecord> {
        serde_json::from_value(json!([
            {"resource_type": "todo_list", "resource_id": "groceries", "resource_data": {}}
        ]))
        .unwrap()
    }

    #[test]
    fn test_snapshot_then_add_link() {
        let mut core = SyncCore::new();
        core.watch_collection("todo_list");
        core.on_snapshot("todo_list", groceries_snapshot());

        let joins = core.on_open();
        let mut joined = topics(&joins);
        joined.sort();
        assert_eq!(
            joined,
            vec![
                "todo_list.add_link.groceries",
                "todo_list.create",
                "todo_list.delete.groceries",
                "todo_list.patch.groceries",
            ]
        );

        let sent = core.on_message(&frame(json!({
            "action": "add_link",
            "resource_type": "todo_list",
            "resource_id": "groceries",
            "relation": "children",
            "title": "Item",
            "target_id": ["todo_item", "milk"]
        })));
        assert!(sent.is_empty());

        let groceries = core
            .mirror()
            .get(&ResourceKey::new("todo_list", "groceries"))
            .unwrap();
        assert_eq!(
            serde_json::to_value(groceries.links_for("children")).unwrap(),
            json!([{"title": "Item", "target_id": ["todo_item", "milk"]}])
        );
    }

    #[test]
    fn test_live_create_joins_three_topics() {
        let mut core = SyncCore::new();
        core.watch_collection("todo_list");
        core.on_open();

        let create = frame(json!({
            "action": "create",
            "resource_type": "todo_list",
            "resource_id": "chores",
            "resource_data": {}
        }));

        let joins = core.on_message(&create);
        assert_eq!(
            topics(&joins),
            vec![
                "todo_list.patch.chores",
                "todo_list.add_link.chores",
                "todo_list.delete.chores",
            ]
        );

        // Re-delivery after a reconnect changes nothing
        assert!(core.on_message(&create).is_empty());
        assert_eq!(core.mirror().len(), 1);
    }

    #[test]
    fn test_reconnect_replays_each_topic_once() {
        let mut core = SyncCore::new();
        core.watch_collection("todo_list");
        core.on_snapshot("todo_list", groceries_snapshot());
        core.on_open();
        core.on_closed();

        let replay = topics(&core.on_open());
        let unique: HashSet<&String> = replay.iter().collect();
        assert_eq!(replay.len(), 4);
        assert_eq!(unique.len(), 4);
    }

    #[test]
    fn test_bad_frames_do_not_disturb_state() {
        let mut core = SyncCore::new();
        core.on_snapshot("todo_list", groceries_snapshot());
        let before = core.mirror().snapshot();

        for raw in [
            "garbage",
            r#"{"data": "Connected"}"#,
            r#"{"data": {"action": "archive", "resource_id": "groceries"}}"#,
            r#"{"data": {"action": "patch", "resource_id": "groceries"}}"#,
            r#"{"data": {"action": "patch", "resource_id": "nope", "patch": {"$set": {"a": 1}}}}"#,
        ] {
            assert!(core.on_message(raw).is_empty());
        }

        assert_eq!(core.mirror().snapshot(), before);

        // Processing continues after bad frames
        core.on_message(&frame(json!({
            "action": "patch",
            "resource_id": "groceries",
            "patch": {"$set": {"title": "Weekly"}}
        })));
        let groceries = core
            .mirror()
            .get(&ResourceKey::new("todo_list", "groceries"))
            .unwrap();
        assert_eq!(groceries.data["title"], json!("Weekly"));
    }

    #[test]
    fn test_delete_drops_lifecycle_topics() {
        let mut core = SyncCore::new();
        core.watch_collection("todo_list");
        core.on_snapshot("todo_list", groceries_snapshot());

        core.on_message(&frame(json!({
            "action": "delete",
            "resource_name": "todo_list",
            "resource_id": "groceries"
        })));

        assert!(core.mirror().is_empty());
        assert_eq!(topics(&core.on_open()), vec!["todo_list.create"]);
    }

    #[test]
    fn test_delete_during_load_skips_stale_record() {
        let mut core = SyncCore::new();
        core.watch_collection("todo_list");
        core.on_open();

        // Fetch is in flight; the server deletes groceries meanwhile
        let sent = core.on_message(&frame(json!({
            "action": "delete",
            "resource_name": "todo_list",
            "resource_id": "groceries"
        })));
        assert!(sent.is_empty());

        let joins = core.on_snapshot("todo_list", groceries_snapshot());
        assert!(joins.is_empty());
        assert!(core.mirror().is_empty());
        assert_eq!(core.subscriptions().topics(), &[Topic::create("todo_list")]);
    }

    #[test]
    fn test_untyped_delete_during_load() {
        let mut core = SyncCore::new();
        core.watch_collection("todo_list");
        core.on_message(&frame(json!({"action": "delete", "resource_id": "groceries"})));

        core.on_snapshot("todo_list", groceries_snapshot());
        assert!(core.mirror().is_empty());
    }

    #[test]
    fn test_recreate_during_load_keeps_resource() {
        let mut core = SyncCore::new();
        core.watch_collection("todo_list");
        for action in ["delete", "create"] {
            core.on_message(&frame(json!({
                "action": action,
                "resource_type": "todo_list",
                "resource_id": "groceries",
                "resource_data": {"title": "Again"}
            })));
        }

        core.on_snapshot("todo_list", groceries_snapshot());
        let groceries = core
            .mirror()
            .get(&ResourceKey::new("todo_list", "groceries"))
            .unwrap();
        assert_eq!(groceries.data["title"], json!("Again"));
        assert!(core
            .subscriptions()
            .contains(&Topic::patch("todo_list", "groceries")));
    }

    #[test]
    fn test_deletes_outside_a_load_are_not_remembered() {
        let mut core = SyncCore::new();
        core.watch_collection("todo_list");
        core.on_snapshot_failed("todo_list");
        core.on_message(&frame(json!({
            "action": "delete",
            "resource_type": "todo_list",
            "resource_id": "groceries"
        })));

        // A later retry of the fetch seeds normally
        core.watch_collection("todo_list");
        core.on_snapshot("todo_list", groceries_snapshot());
        assert_eq!(core.mirror().len(), 1);
    }

    #[test]
    fn test_engine_config_from_config() {
        let config = Config {
            collections: vec!["power".to_string()],
            ..Config::default()
        };
        let engine = EngineConfig::from_config(&config).unwrap();
        assert_eq!(engine.transport.url, "ws://localhost:5001/realtime");
        assert_eq!(engine.collections, vec!["power"]);
    }
}
