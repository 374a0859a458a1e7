//! Broker topic grammar and matching
//!
//! Configured topics may be bare patterns or `<deviceUuid>:<pattern>`,
//! binding every message under the pattern to a device. Patterns use the
//! usual broker wildcards: `+` for one level, `#` for the remainder.

use crate::error::ProtocolError;

/// A configured topic route.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicRoute {
    device_uuid: Option<String>,
    pattern: String,
}

impl TopicRoute {
    /// Parse a configured topic, splitting an optional device prefix.
    pub fn parse(config: &str) -> Result<Self, ProtocolError> {
        let config = config.trim();
        if config.is_empty() {
            return Err(ProtocolError::InvalidTopic {
                topic: config.to_string(),
                reason: "empty topic".to_string(),
            });
        }

        match config.split_once(':') {
            Some((device, pattern)) if !device.contains('/') && !pattern.is_empty() => {
                Ok(Self {
                    device_uuid: Some(device.to_string()),
                    pattern: pattern.to_string(),
                })
            }
            Some((_, pattern)) if pattern.is_empty() => Err(ProtocolError::InvalidTopic {
                topic: config.to_string(),
                reason: "empty pattern after device prefix".to_string(),
            }),
            _ => Ok(Self {
                device_uuid: None,
                pattern: config.to_string(),
            }),
        }
    }

    pub fn device_uuid(&self) -> Option<&str> {
        self.device_uuid.as_deref()
    }

    /// The pattern subscribed at the broker.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Match an incoming topic against the pattern.
    pub fn matches(&self, topic: &str) -> bool {
        topic_matches(&self.pattern, topic)
    }
}

/// Broker wildcard matching: `+` one level, `#` everything below.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_parts = pattern.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (pattern_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(p), Some(t)) if p == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_prefix_splits_off() {
        let route = TopicRoute::parse("dev1:x/y").unwrap();
        assert_eq!(route.device_uuid(), Some("dev1"));
        assert_eq!(route.pattern(), "x/y");
        assert!(route.matches("x/y"));
    }

    #[test]
    fn bare_topics_have_no_device() {
        let route = TopicRoute::parse("machines/+/samples").unwrap();
        assert_eq!(route.device_uuid(), None);
        assert!(route.matches("machines/m1/samples"));
        assert!(!route.matches("machines/m1/events"));
    }

    #[test]
    fn hash_matches_the_remainder() {
        assert!(topic_matches("a/#", "a/b/c"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("a/#", "b/c"));
    }

    #[test]
    fn empty_topics_are_rejected() {
        assert!(TopicRoute::parse("").is_err());
        assert!(TopicRoute::parse("dev1:").is_err());
    }
}
