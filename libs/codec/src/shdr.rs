//! SHDR line protocol: tokenizing and protocol-line classification
//!
//! Each record is a single `\n`-terminated line. Normal records are
//! pipe-delimited: `[<timestamp>]|<key>|<value>[|<key>|<value>]*`. Lines
//! beginning with `*` carry protocol commands; `---multiline---<tag>`
//! markers bracket multi-line bodies.

use crate::error::ProtocolError;

/// Marker introducing a multi-line body.
pub const MULTILINE_BEGIN: &str = "---multiline---";

/// Adapter commands that reconfigure the adapter itself instead of being
/// forwarded to the agent.
pub const ADAPTER_OPTION_COMMANDS: &[&str] = &[
    "conversionrequired",
    "relativetime",
    "realtime",
    "device",
    "shdrversion",
];

/// One classified SHDR line.
#[derive(Debug, Clone, PartialEq)]
pub enum ShdrLine {
    /// A data record, to be tokenized and mapped
    Data(String),
    /// `* PONG <ms>` — heartbeat response carrying the interval
    Pong(Option<u64>),
    /// `* <command>: <value>` — a protocol command
    Command { name: String, value: String },
    /// Begins multi-line aggregation; `prefix` is the part of the line
    /// before the marker, `tag` identifies the matching terminator
    MultilineBegin { prefix: String, tag: String },
    /// Blank after trimming; ignored
    Blank,
}

/// Classify a right-trimmed line.
pub fn classify(line: &str) -> Result<ShdrLine, ProtocolError> {
    let trimmed = line.trim_end();
    if trimmed.is_empty() {
        return Ok(ShdrLine::Blank);
    }

    if let Some(rest) = trimmed.strip_prefix('*') {
        return classify_command(trimmed, rest);
    }

    if let Some(at) = trimmed.find(MULTILINE_BEGIN) {
        let prefix = trimmed[..at].to_string();
        let tag = trimmed[at + MULTILINE_BEGIN.len()..].trim().to_string();
        return Ok(ShdrLine::MultilineBegin { prefix, tag });
    }

    Ok(ShdrLine::Data(trimmed.to_string()))
}

/// The exact terminator line for a multiline body with `tag`.
pub fn multiline_end(tag: &str) -> String {
    format!("---{}---", tag)
}

fn classify_command(line: &str, rest: &str) -> Result<ShdrLine, ProtocolError> {
    let rest = rest.trim_start();

    if let Some(arg) = rest.strip_prefix("PONG") {
        let ms = arg.trim().parse::<u64>().ok();
        return Ok(ShdrLine::Pong(ms));
    }

    match rest.split_once(':') {
        Some((name, value)) => Ok(ShdrLine::Command {
            name: name.trim().to_ascii_lowercase(),
            value: value.trim().to_string(),
        }),
        None => Err(ProtocolError::MalformedCommand {
            line: line.to_string(),
        }),
    }
}

/// Split a data line on `|`, preserving empty fields. Tokens are trimmed
/// of surrounding whitespace.
pub fn tokenize(line: &str) -> Vec<String> {
    line.split('|').map(|t| t.trim().to_string()).collect()
}

/// The inverse of [`tokenize`]: joins tokens with `|`.
pub fn format(tokens: &[String]) -> String {
    tokens.join("|")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_lines_tokenize_preserving_empty_fields() {
        let tokens = tokenize("2021-01-19T10:00:00Z|X|1||Y|");
        assert_eq!(tokens, vec!["2021-01-19T10:00:00Z", "X", "1", "", "Y", ""]);
    }

    #[test]
    fn tokenize_then_format_round_trips() {
        let lines = [
            "2021-01-19T10:00:00Z|X|1",
            "|C|FAULT|A|1|HIGH|overheat",
            "ts|a||b|",
        ];
        for line in lines {
            assert_eq!(format(&tokenize(line)), line);
        }
    }

    #[test]
    fn round_trip_is_modulo_whitespace() {
        assert_eq!(format(&tokenize("ts | X | 1 ")), "ts|X|1");
    }

    #[test]
    fn pong_carries_the_interval() {
        assert_eq!(classify("* PONG 10000").unwrap(), ShdrLine::Pong(Some(10000)));
        assert_eq!(classify("* PONG").unwrap(), ShdrLine::Pong(None));
    }

    #[test]
    fn commands_are_case_normalized() {
        assert_eq!(
            classify("* shdrVersion: 2").unwrap(),
            ShdrLine::Command {
                name: "shdrversion".into(),
                value: "2".into()
            }
        );
    }

    #[test]
    fn unparseable_command_is_an_error() {
        assert!(classify("* garbage").is_err());
    }

    #[test]
    fn multiline_markers_carry_prefix_and_tag() {
        let begin = classify("2021-01-19T10:00:00Z|asset|A1|CuttingTool|---multiline---ABCD")
            .unwrap();
        assert_eq!(
            begin,
            ShdrLine::MultilineBegin {
                prefix: "2021-01-19T10:00:00Z|asset|A1|CuttingTool|".into(),
                tag: "ABCD".into()
            }
        );
        assert_eq!(multiline_end("ABCD"), "---ABCD---");
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(classify("   \r").unwrap(), ShdrLine::Blank);
    }
}
