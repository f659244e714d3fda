//! Topic subscription manager
//!
//! Tracks the set of topics this client wants and produces the join
//! messages to send. It does no I/O: callers forward the returned messages
//! to the transport.
//!
//! Joins are only emitted while the transport is connected. Anything
//! requested while disconnected stays in the set and goes out with the
//! full replay on the next open, which also covers every reconnect since
//! the server forgets a client's rooms when the socket drops.

use std::collections::HashSet;

use tracing::debug;

use crate::message::ClientMessage;
use crate::topic::Topic;

/// Desired topic set with replay on (re)connect
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    /// Topics in the order they were first requested
    topics: Vec<Topic>,
    index: HashSet<Topic>,
    connected: bool,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the patch, add_link and delete topics of one resource
    pub fn subscribe_resource_lifecycle(
        &mut self,
        resource_type: &str,
        resource_id: &str,
    ) -> Vec<ClientMessage> {
        Topic::lifecycle(resource_type, resource_id)
            .into_iter()
            .filter_map(|topic| self.add(topic))
            .collect()
    }

    /// Subscribe to creations in a collection
    pub fn subscribe_collection_create(&mut self, resource_type: &str) -> Vec<ClientMessage> {
        self.add(Topic::create(resource_type)).into_iter().collect()
    }

    /// Stop replaying a resource's lifecycle topics
    ///
    /// The protocol has no leave message, so the server keeps delivering
    /// until the next reconnect.
    pub fn unsubscribe_resource_lifecycle(&mut self, resource_type: &str, resource_id: &str) {
        let removed: Vec<Topic> = Topic::lifecycle(resource_type, resource_id)
            .into_iter()
            .filter(|topic| self.index.remove(topic))
            .collect();
        if !removed.is_empty() {
            self.topics.retain(|topic| !removed.contains(topic));
        }
    }

    /// The transport (re)connected: join every topic again
    pub fn on_transport_open(&mut self) -> Vec<ClientMessage> {
        self.connected = true;
        debug!("Replaying {} topic joins", self.topics.len());
        self.topics.iter().map(ClientMessage::join).collect()
    }

    pub fn on_transport_closed(&mut self) {
        self.connected = false;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn contains(&self, topic: &Topic) -> bool {
        self.index.contains(topic)
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Add a topic; returns its join if it is new and we are connected
    fn add(&mut self, topic: Topic) -> Option<ClientMessage> {
        if !self.index.insert(topic.clone()) {
            return None;
        }
        let join = self.connected.then(|| ClientMessage::join(&topic));
        self.topics.push(topic);
        join
    }
}
