//! Data sets: unordered key/value collections observed as a single value
//!
//! A data set entry carries a scalar (string, integer or double) or, for
//! tables, a nested row of entries. An entry with no value (`key` or `key=`
//! on the wire) marks the key as removed.

use tracing::error;

use super::value::format_double;

/// The scalar or row payload of a data-set entry.
#[derive(Debug, Clone, PartialEq)]
pub enum DataSetValue {
    String(String),
    Int(i64),
    Double(f64),
    /// A nested row; only present in TABLE representations.
    Row(DataSet),
}

impl DataSetValue {
    pub fn to_text(&self) -> String {
        match self {
            DataSetValue::String(s) => s.clone(),
            DataSetValue::Int(i) => i.to_string(),
            DataSetValue::Double(d) => format_double(*d),
            DataSetValue::Row(ds) => format!("{{{}}}", ds.to_text()),
        }
    }
}

/// One entry of a data set.
///
/// Two entries are the same only if value and removed flag both match.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSetEntry {
    pub value: Option<DataSetValue>,
    pub removed: bool,
}

impl DataSetEntry {
    pub fn value(value: DataSetValue) -> Self {
        Self {
            value: Some(value),
            removed: false,
        }
    }

    pub fn removed() -> Self {
        Self {
            value: None,
            removed: true,
        }
    }
}

/// An unordered map of keys to data-set entries, keyed in sorted order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataSet {
    entries: std::collections::BTreeMap<String, DataSetEntry>,
}

impl DataSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: DataSetEntry) {
        self.entries.insert(key.into(), entry);
    }

    pub fn get(&self, key: &str) -> Option<&DataSetEntry> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<DataSetEntry> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DataSetEntry)> {
        self.entries.iter()
    }

    /// Merge `incoming` into this set entry-wise: every incoming key
    /// replaces the existing entry; removed entries delete the key.
    pub fn merge(&mut self, incoming: &DataSet) {
        for (key, entry) in incoming.iter() {
            self.entries.remove(key);
            if !entry.removed {
                self.entries.insert(key.clone(), entry.clone());
            }
        }
    }

    /// The subset of `self` that differs from `current`.
    ///
    /// Entries equal in value and removed flag are dropped. Returns `None`
    /// when nothing changed (the whole set is a duplicate).
    pub fn difference(&self, current: &DataSet) -> Option<DataSet> {
        let mut out = DataSet::new();
        let mut changed = false;
        for (key, entry) in self.iter() {
            match current.get(key) {
                Some(existing) if existing == entry => changed = true,
                _ => {
                    out.insert(key.clone(), entry.clone());
                }
            }
        }
        if !changed {
            Some(self.clone())
        } else if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }

    /// Count of live (not removed) entries.
    pub fn live_len(&self) -> usize {
        self.entries.values().filter(|e| !e.removed).count()
    }

    pub fn to_text(&self) -> String {
        let mut parts = Vec::with_capacity(self.entries.len());
        for (key, entry) in &self.entries {
            match &entry.value {
                None => parts.push(key.clone()),
                Some(v @ DataSetValue::Row(_)) => parts.push(format!("{}={}", key, v.to_text())),
                Some(v) => {
                    let text = v.to_text();
                    if text.contains(' ') || text.contains('\'') {
                        parts.push(format!("{}=\"{}\"", key, text))
                    } else {
                        parts.push(format!("{}={}", key, text))
                    }
                }
            }
        }
        parts.join(" ")
    }

    /// Parse the wire form `key[=value] key[=value] …`.
    ///
    /// Values may be bare scalars, quoted strings (`'…'` or `"…"` with
    /// backslash escapes), or braced blocks. In table mode braced blocks
    /// parse recursively as rows. A bare `key` or `key=` marks removal.
    pub fn parse(text: &str, table: bool) -> Option<DataSet> {
        match Parser::new(text, table).parse_set(false) {
            Ok(set) => Some(set),
            Err(at) => {
                error!("Failed to parse data set at offset {}: {}", at, text);
                None
            }
        }
    }
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    text: &'a str,
    table: bool,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str, table: bool) -> Self {
        Self {
            chars: text.char_indices().peekable(),
            text,
            table,
        }
    }

    fn skip_space(&mut self) {
        while matches!(self.chars.peek(), Some((_, c)) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn parse_set(&mut self, in_brace: bool) -> Result<DataSet, usize> {
        let mut set = DataSet::new();
        loop {
            self.skip_space();
            match self.chars.peek() {
                None => break,
                Some((_, '}')) if in_brace => break,
                Some(_) => {
                    let (key, entry) = self.parse_entry()?;
                    set.insert(key, entry);
                }
            }
        }
        Ok(set)
    }

    fn parse_entry(&mut self) -> Result<(String, DataSetEntry), usize> {
        let mut key = String::new();
        while let Some((_, c)) = self.chars.peek().copied() {
            if c.is_whitespace() || c == '=' || c == '|' || c == '}' {
                break;
            }
            key.push(c);
            self.chars.next();
        }
        if key.is_empty() {
            return Err(self.offset());
        }

        match self.chars.peek().copied() {
            Some((_, '=')) => {
                self.chars.next();
                match self.chars.peek().copied() {
                    None => Ok((key, DataSetEntry::removed())),
                    Some((_, c)) if c.is_whitespace() => Ok((key, DataSetEntry::removed())),
                    Some(_) => {
                        let value = self.parse_value()?;
                        Ok((key, DataSetEntry::value(value)))
                    }
                }
            }
            _ => Ok((key, DataSetEntry::removed())),
        }
    }

    fn parse_value(&mut self) -> Result<DataSetValue, usize> {
        match self.chars.peek().copied() {
            Some((_, q @ ('"' | '\''))) => {
                self.chars.next();
                let s = self.take_until(q)?;
                Ok(DataSetValue::String(s))
            }
            Some((_, '{')) => {
                self.chars.next();
                if self.table {
                    let row = self.parse_set(true)?;
                    match self.chars.next() {
                        Some((_, '}')) => Ok(DataSetValue::Row(row)),
                        _ => Err(self.offset()),
                    }
                } else {
                    let s = self.take_until('}')?;
                    Ok(DataSetValue::String(s))
                }
            }
            Some(_) => {
                let mut raw = String::new();
                while let Some((_, c)) = self.chars.peek().copied() {
                    if c.is_whitespace() || c == '"' || c == '\'' || c == '{' {
                        break;
                    }
                    raw.push(c);
                    self.chars.next();
                }
                Ok(scalar_from(&raw))
            }
            None => Err(self.offset()),
        }
    }

    fn take_until(&mut self, terminator: char) -> Result<String, usize> {
        let mut out = String::new();
        loop {
            match self.chars.next() {
                None => return Err(self.offset()),
                Some((_, c)) if c == terminator => return Ok(out),
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, esc)) => out.push(esc),
                    None => return Err(self.offset()),
                },
                Some((_, c)) => out.push(c),
            }
        }
    }

    fn offset(&mut self) -> usize {
        self.chars
            .peek()
            .map(|(i, _)| *i)
            .unwrap_or(self.text.len())
    }
}

/// Scalars prefer integer, then double, then string.
fn scalar_from(raw: &str) -> DataSetValue {
    if let Ok(i) = raw.parse::<i64>() {
        DataSetValue::Int(i)
    } else if let Ok(d) = raw.parse::<f64>() {
        DataSetValue::Double(d)
    } else {
        DataSetValue::String(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scalars_and_removals() {
        let ds = DataSet::parse("a=1 b=2.5 c=text d", false).unwrap();
        assert_eq!(ds.get("a").unwrap().value, Some(DataSetValue::Int(1)));
        assert_eq!(ds.get("b").unwrap().value, Some(DataSetValue::Double(2.5)));
        assert_eq!(
            ds.get("c").unwrap().value,
            Some(DataSetValue::String("text".into()))
        );
        assert!(ds.get("d").unwrap().removed);
    }

    #[test]
    fn parses_quoted_values_with_escapes() {
        let ds = DataSet::parse(r#"a='hello world' b="say \"hi\"""#, false).unwrap();
        assert_eq!(
            ds.get("a").unwrap().value,
            Some(DataSetValue::String("hello world".into()))
        );
        assert_eq!(
            ds.get("b").unwrap().value,
            Some(DataSetValue::String("say \"hi\"".into()))
        );
    }

    #[test]
    fn parses_table_rows() {
        let ds = DataSet::parse("r1={a=1 b=2} r2={c=3}", true).unwrap();
        match &ds.get("r1").unwrap().value {
            Some(DataSetValue::Row(row)) => {
                assert_eq!(row.get("a").unwrap().value, Some(DataSetValue::Int(1)));
                assert_eq!(row.get("b").unwrap().value, Some(DataSetValue::Int(2)));
            }
            other => panic!("expected row, got {other:?}"),
        }
        assert_eq!(ds.len(), 2);
    }

    #[test]
    fn merge_applies_removals() {
        let mut current = DataSet::parse("a=1 b=2", false).unwrap();
        let incoming = DataSet::parse("b=3 a", false).unwrap();
        current.merge(&incoming);
        assert!(current.get("a").is_none());
        assert_eq!(current.get("b").unwrap().value, Some(DataSetValue::Int(3)));
    }

    #[test]
    fn difference_recovers_target_set() {
        // Applying diff(S2, S1) to S1 must yield S2.
        let s1 = DataSet::parse("a=1 b=2 c=3", false).unwrap();
        let s2 = DataSet::parse("a=1 b=5 d=7", false).unwrap();

        // The wire diff also carries removals for keys leaving the set.
        let mut wire = s2.clone();
        for (key, _) in s1.iter() {
            if s2.get(key).is_none() {
                wire.insert(key.clone(), DataSetEntry::removed());
            }
        }

        let diff = wire.difference(&s1).unwrap();
        assert!(diff.get("a").is_none(), "unchanged entry must drop out");

        let mut applied = s1.clone();
        applied.merge(&diff);
        assert_eq!(applied, s2);
    }

    #[test]
    fn unchanged_set_has_no_difference() {
        let s = DataSet::parse("a=1 b=2", false).unwrap();
        assert_eq!(s.difference(&s), None);
    }
}
