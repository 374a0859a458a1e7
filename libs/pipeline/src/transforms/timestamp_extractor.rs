//! Timestamp extraction transforms

use chrono::Utc;
use parking_lot::Mutex;

use agent_codec::TimestampExtractor;

use crate::{GuardAction, PipelineEntity, Transform};

/// Parses the leading ISO-8601 token of a tokenized line; supports
/// relative-time mode anchoring at the first seen stamp.
pub struct ExtractTimestamp {
    extractor: Mutex<TimestampExtractor>,
}

impl ExtractTimestamp {
    pub fn new(relative: bool) -> Self {
        Self {
            extractor: Mutex::new(TimestampExtractor::new(relative)),
        }
    }

    pub fn set_relative(&self, relative: bool) {
        self.extractor.lock().set_relative(relative);
    }
}

impl Transform for ExtractTimestamp {
    fn name(&self) -> &'static str {
        "ExtractTimestamp"
    }

    fn guard(&self, entity: &PipelineEntity) -> GuardAction {
        match entity {
            PipelineEntity::Tokens { .. } => GuardAction::Run,
            _ => GuardAction::Skip,
        }
    }

    fn apply(&self, entity: PipelineEntity) -> Option<PipelineEntity> {
        let PipelineEntity::Tokens { mut tokens } = entity else {
            return None;
        };
        if tokens.is_empty() {
            return None;
        }
        let token = tokens.remove(0);
        let extracted = self.extractor.lock().extract(&token, Utc::now());
        Some(PipelineEntity::TimestampedTokens {
            timestamp: extracted.timestamp,
            duration: extracted.duration,
            tokens,
            device: None,
        })
    }
}

/// Discards the embedded timestamp and stamps on receipt.
pub struct IgnoreTimestamp;

impl IgnoreTimestamp {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self
    }
}

impl Transform for IgnoreTimestamp {
    fn name(&self) -> &'static str {
        "IgnoreTimestamp"
    }

    fn guard(&self, entity: &PipelineEntity) -> GuardAction {
        match entity {
            PipelineEntity::Tokens { .. } => GuardAction::Run,
            _ => GuardAction::Skip,
        }
    }

    fn apply(&self, entity: PipelineEntity) -> Option<PipelineEntity> {
        let PipelineEntity::Tokens { mut tokens } = entity else {
            return None;
        };
        if tokens.is_empty() {
            return None;
        }
        tokens.remove(0);
        Some(PipelineEntity::TimestampedTokens {
            timestamp: Utc::now(),
            duration: None,
            tokens,
            device: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    #[test]
    fn extracts_the_leading_timestamp() {
        let transform = ExtractTimestamp::new(false);
        let out = transform
            .apply(PipelineEntity::Tokens {
                tokens: vec!["2021-01-19T10:00:00Z".into(), "X".into(), "1".into()],
            })
            .unwrap();
        match out {
            PipelineEntity::TimestampedTokens {
                timestamp, tokens, ..
            } => {
                assert_eq!(
                    timestamp,
                    DateTime::parse_from_rfc3339("2021-01-19T10:00:00Z").unwrap()
                );
                assert_eq!(tokens, vec!["X", "1"]);
            }
            other => panic!("unexpected entity: {}", other.kind()),
        }
    }

    #[test]
    fn ignore_mode_discards_the_stamp() {
        let before = Utc::now();
        let out = IgnoreTimestamp::new()
            .apply(PipelineEntity::Tokens {
                tokens: vec!["2001-01-01T00:00:00Z".into(), "X".into(), "1".into()],
            })
            .unwrap();
        match out {
            PipelineEntity::TimestampedTokens { timestamp, .. } => {
                assert!(timestamp >= before);
            }
            other => panic!("unexpected entity: {}", other.kind()),
        }
    }
}
