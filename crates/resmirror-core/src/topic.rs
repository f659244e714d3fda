//! Topic names on the realtime channel
//!
//! The server publishes every event under `{type}.{action}.{id}` and each
//! dot-separated prefix of it, so a client joins either the collection
//! level `{type}.create` topic or the per-resource lifecycle topics.

use std::fmt;

/// A pub/sub topic string
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(String);

impl Topic {
    /// `{type}.create`: creation of any resource in a collection
    pub fn create(resource_type: &str) -> Self {
        Topic(format!("{}.create", resource_type))
    }

    /// `{type}.patch.{id}`
    pub fn patch(resource_type: &str, resource_id: &str) -> Self {
        Topic(format!("{}.patch.{}", resource_type, resource_id))
    }

    /// `{type}.add_link.{id}`
    pub fn add_link(resource_type: &str, resource_id: &str) -> Self {
        Topic(format!("{}.add_link.{}", resource_type, resource_id))
    }

    /// `{type}.delete.{id}`
    pub fn delete(resource_type: &str, resource_id: &str) -> Self {
        Topic(format!("{}.delete.{}", resource_type, resource_id))
    }

    /// The three lifecycle topics of one resource, in join order
    pub fn lifecycle(resource_type: &str, resource_id: &str) -> [Topic; 3] {
        [
            Topic::patch(resource_type, resource_id),
            Topic::add_link(resource_type, resource_id),
            Topic::delete(resource_type, resource_id),
        ]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_grammar() {
        assert_eq!(Topic::create("todo_list").as_str(), "todo_list.create");
        assert_eq!(
            Topic::patch("todo_list", "groceries").as_str(),
            "todo_list.patch.groceries"
        );
        assert_eq!(
            Topic::add_link("todo_list", "groceries").to_string(),
            "todo_list.add_link.groceries"
        );
        assert_eq!(
            Topic::delete("power", "sensor-1").to_string(),
            "power.delete.sensor-1"
        );
    }

    #[test]
    fn test_lifecycle_order() {
        let topics: Vec<String> = Topic::lifecycle("todo_item", "milk")
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(
            topics,
            vec![
                "todo_item.patch.milk",
                "todo_item.add_link.milk",
                "todo_item.delete.milk"
            ]
        );
    }
}
