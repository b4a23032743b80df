/// Default topic prefix for BleSight bridges.
pub const TOPIC_PREFIX: &str = "blesight";

/// Builder for the topics a bridge publishes under.
///
/// Topics follow the pattern `<prefix>/<suffix>`, with bridge metadata kept
/// under the reserved `@` level:
///
/// - `<prefix>/@/status` - retained bridge status
/// - `<prefix>/@/link` - retained link state
/// - `<prefix>/batch` - flushed sample batches
#[derive(Debug, Clone)]
pub struct TopicBuilder {
    prefix: String,
}

impl TopicBuilder {
    /// Create a builder for a topic prefix such as `blesight/ble`.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    /// The prefix without a trailing separator.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build a topic below the prefix.
    ///
    /// # Example
    /// ```
    /// use blesight_common::topic::TopicBuilder;
    ///
    /// let builder = TopicBuilder::new("blesight/ble");
    /// assert_eq!(builder.build("batch"), "blesight/ble/batch");
    /// assert_eq!(builder.build(""), "blesight/ble");
    /// ```
    pub fn build(&self, suffix: &str) -> String {
        if suffix.is_empty() {
            self.prefix.clone()
        } else {
            format!("{}/{}", self.prefix, suffix)
        }
    }

    /// Topic for retained bridge status.
    ///
    /// # Example
    /// ```
    /// use blesight_common::topic::TopicBuilder;
    ///
    /// assert_eq!(TopicBuilder::new("blesight/ble").status_topic(), "blesight/ble/@/status");
    /// ```
    pub fn status_topic(&self) -> String {
        self.build("@/status")
    }

    /// Topic for retained link state (idle / connecting / connected).
    pub fn link_topic(&self) -> String {
        self.build("@/link")
    }

    /// Topic for flushed sample batches.
    pub fn batch_topic(&self) -> String {
        self.build("batch")
    }

    /// MQTT wildcard matching everything below the prefix.
    ///
    /// # Example
    /// ```
    /// use blesight_common::topic::TopicBuilder;
    ///
    /// assert_eq!(TopicBuilder::new("blesight/ble").wildcard(), "blesight/ble/#");
    /// ```
    pub fn wildcard(&self) -> String {
        self.build("#")
    }
}

/// What a received topic carries, relative to a bridge prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Status,
    Link,
    Batch,
    /// Any other topic, including raw notification payloads.
    Data,
}

/// Classify a topic published by a bridge with the given prefix.
///
/// Returns `None` for topics outside the prefix.
pub fn parse_topic(prefix: &str, topic: &str) -> Option<TopicKind> {
    let prefix = prefix.trim_end_matches('/');
    if topic == prefix {
        return Some(TopicKind::Data);
    }

    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    Some(match rest {
        "@/status" => TopicKind::Status,
        "@/link" => TopicKind::Link,
        "batch" => TopicKind::Batch,
        _ => TopicKind::Data,
    })
}

/// Check that a topic is usable for publishing (no wildcards, not empty).
pub fn validate_publish_topic(topic: &str) -> crate::Result<()> {
    if topic.is_empty() {
        return Err(crate::Error::Topic("topic cannot be empty".to_string()));
    }
    if topic.contains(&['#', '+'][..]) {
        return Err(crate::Error::Topic(format!(
            "'{}' contains wildcard characters",
            topic
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_builder() {
        let builder = TopicBuilder::new("blesight/ble/");

        assert_eq!(builder.prefix(), "blesight/ble");
        assert_eq!(builder.status_topic(), "blesight/ble/@/status");
        assert_eq!(builder.link_topic(), "blesight/ble/@/link");
        assert_eq!(builder.batch_topic(), "blesight/ble/batch");
        assert_eq!(builder.wildcard(), "blesight/ble/#");
    }

    #[test]
    fn test_parse_topic() {
        let prefix = "blesight/ble";

        assert_eq!(
            parse_topic(prefix, "blesight/ble/@/status"),
            Some(TopicKind::Status)
        );
        assert_eq!(
            parse_topic(prefix, "blesight/ble/@/link"),
            Some(TopicKind::Link)
        );
        assert_eq!(
            parse_topic(prefix, "blesight/ble/batch"),
            Some(TopicKind::Batch)
        );
        assert_eq!(
            parse_topic(prefix, "blesight/ble/notifications"),
            Some(TopicKind::Data)
        );
    }

    #[test]
    fn test_parse_foreign_topic() {
        assert!(parse_topic("blesight/ble", "other/topic").is_none());
        assert!(parse_topic("blesight/ble", "blesight/blex").is_none());
    }

    #[test]
    fn test_validate_publish_topic() {
        assert!(validate_publish_topic("blesight/ble/notifications").is_ok());
        assert!(validate_publish_topic("").is_err());
        assert!(validate_publish_topic("blesight/#").is_err());
        assert!(validate_publish_topic("blesight/+/data").is_err());
    }
}
