//! Tokenizing raw SHDR lines

use agent_codec::shdr;

use crate::{GuardAction, PipelineEntity, Transform};

/// Splits a pipe-delimited line into an ordered token list, preserving
/// empty fields.
pub struct ShdrTokenizer;

impl Transform for ShdrTokenizer {
    fn name(&self) -> &'static str {
        "ShdrTokenizer"
    }

    fn guard(&self, entity: &PipelineEntity) -> GuardAction {
        match entity {
            PipelineEntity::Data { .. } => GuardAction::Run,
            _ => GuardAction::Skip,
        }
    }

    fn apply(&self, entity: PipelineEntity) -> Option<PipelineEntity> {
        match entity {
            PipelineEntity::Data { line } => Some(PipelineEntity::Tokens {
                tokens: shdr::tokenize(&line),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_data_lines() {
        let out = ShdrTokenizer
            .apply(PipelineEntity::Data {
                line: "2021-01-19T10:00:00Z|X|1".into(),
            })
            .unwrap();
        match out {
            PipelineEntity::Tokens { tokens } => {
                assert_eq!(tokens, vec!["2021-01-19T10:00:00Z", "X", "1"]);
            }
            other => panic!("unexpected entity: {}", other.kind()),
        }
    }
}
