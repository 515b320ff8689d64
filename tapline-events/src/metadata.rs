//! Tags attached to a message while it goes through the classification
//! handlers.

use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

/// Classification tag.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventTag {
    /// Payment card data (card numbers or payment vocabulary).
    Pci,
    /// Personally identifiable information (postal addresses).
    Pii,
    /// Call to an AWS API endpoint.
    AwsApi,
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTag::Pci => write!(f, "pci"),
            EventTag::Pii => write!(f, "pii"),
            EventTag::AwsApi => write!(f, "aws-api"),
        }
    }
}

/// Mutable set of tags attached to a message. Only classification handlers
/// write to it.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    tags: BTreeSet<EventTag>,
}

impl EventMetadata {
    pub fn new() -> EventMetadata {
        EventMetadata::default()
    }

    /// Add a tag, returns false if it was already set.
    pub fn add_tag(&mut self, tag: EventTag) -> bool {
        self.tags.insert(tag)
    }

    pub fn has_tag(&self, tag: EventTag) -> bool {
        self.tags.contains(&tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &EventTag> {
        self.tags.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn into_tags(self) -> BTreeSet<EventTag> {
        self.tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags() {
        let mut meta = EventMetadata::new();
        assert!(meta.is_empty());

        assert!(meta.add_tag(EventTag::Pii));
        assert!(meta.add_tag(EventTag::Pci));
        assert!(!meta.add_tag(EventTag::Pci));

        assert!(meta.has_tag(EventTag::Pci));
        assert!(!meta.has_tag(EventTag::AwsApi));
        // Ordered, whatever the insertion order.
        assert_eq!(
            meta.tags().copied().collect::<Vec<_>>(),
            vec![EventTag::Pci, EventTag::Pii]
        );
    }

    #[test]
    fn tag_names() {
        assert_eq!(serde_json::to_string(&EventTag::AwsApi).unwrap(), "\"aws-api\"");
        assert_eq!(EventTag::AwsApi.to_string(), "aws-api");
    }
}
