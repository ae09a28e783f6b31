//! Tag identity resolution.
//!
//! Live snapshots name tags inconsistently: case, composed/decomposed
//! diacritics, a `source__` prefix or a `namespace:` qualifier. Every record
//! is indexed under all of its plausible spellings so a widget finds its value
//! whichever convention the snapshot used.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use unicode_normalization::UnicodeNormalization;

use crate::api::LiveRecord;
use crate::widget::TagConfig;

const PREFIX_SEPARATOR: &str = "__";

/// NFC-normalized, trimmed, lowercased name.
#[must_use]
pub fn canonical(name: &str) -> String {
    name.nfc().collect::<String>().trim().to_lowercase()
}

/// Substring after the last `:`; the whole name when unqualified.
#[must_use]
pub fn tag_key(name: &str) -> &str {
    match name.rfind(':') {
        Some(index) => &name[index + 1..],
        None => name,
    }
}

/// Suffix after the first `__` prefix separator, if any.
#[must_use]
pub fn unprefixed(name: &str) -> Option<&str> {
    name.find(PREFIX_SEPARATOR)
        .map(|index| &name[index + PREFIX_SEPARATOR.len()..])
        .filter(|suffix| !suffix.is_empty())
}

/// Lookup keys a record is indexed under, most specific first.
#[must_use]
pub fn index_keys(name: &str) -> Vec<String> {
    let mut keys = vec![canonical(name), canonical(tag_key(name))];
    if let Some(suffix) = unprefixed(name) {
        keys.push(canonical(suffix));
        keys.push(canonical(tag_key(suffix)));
    }
    keys.dedup();
    keys
}

/// Multi-key index over one live-data snapshot.
///
/// Built once per snapshot; snapshots are never patched in place.
#[derive(Debug, Clone, Default)]
pub struct LiveIndex {
    records: Arc<[LiveRecord]>,
    by_key: FxHashMap<String, usize>,
}

impl LiveIndex {
    /// Indexes `records`.
    ///
    /// Exact (full-name) keys win over derived aliases; among aliases the
    /// first record in snapshot order wins.
    #[must_use]
    pub fn build(records: Vec<LiveRecord>) -> Self {
        let mut by_key = FxHashMap::default();
        for (position, record) in records.iter().enumerate() {
            by_key.insert(canonical(&record.tag_name), position);
        }
        for (position, record) in records.iter().enumerate() {
            for key in index_keys(&record.tag_name).into_iter().skip(1) {
                by_key.entry(key).or_insert(position);
            }
        }
        Self {
            records: records.into(),
            by_key,
        }
    }

    /// Finds the record for a configured tag name.
    ///
    /// Tries the canonical tag key first, then the canonical raw name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&LiveRecord> {
        let key = canonical(tag_key(name));
        let position = self
            .by_key
            .get(&key)
            .or_else(|| self.by_key.get(&canonical(name)))?;
        self.records.get(*position)
    }

    /// Resolves a tag widget's value.
    #[must_use]
    pub fn reading(&self, tag: &TagConfig) -> TagReading {
        match self.resolve(&tag.tag_name) {
            Some(record) => TagReading::Value(record.clone()),
            None => TagReading::NoData,
        }
    }

    /// Number of records in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true for an empty snapshot.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in snapshot order.
    #[must_use]
    pub fn records(&self) -> &[LiveRecord] {
        &self.records
    }
}

/// What a tag widget renders.
#[derive(Debug, Clone, PartialEq)]
pub enum TagReading {
    /// Matched live record.
    Value(LiveRecord),
    /// No record matched; rendered as the "no data" sentinel.
    NoData,
}

impl TagReading {
    /// Display text for the value cell.
    #[must_use]
    pub fn display(&self, decimals: usize) -> String {
        match self {
            Self::Value(record) => match record.numeric() {
                Some(value) => format!("{value:.decimals$}"),
                None => match &record.value {
                    serde_json::Value::String(text) => text.clone(),
                    serde_json::Value::Null => "—".to_string(),
                    other => other.to_string(),
                },
            },
            Self::NoData => "—".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(names: &[(&str, f64)]) -> LiveIndex {
        LiveIndex::build(
            names
                .iter()
                .map(|(name, value)| LiveRecord::new(*name, json!(value)))
                .collect(),
        )
    }

    #[test]
    fn prefixed_record_is_found_by_full_and_bare_name() {
        let index = snapshot(&[("Line1__Flow", 12.5)]);
        let full = index.resolve("Line1__Flow").expect("full name");
        let bare = index.resolve("flow").expect("bare name");
        let configured = index.resolve("Flow").expect("configured tag");
        assert_eq!(full.tag_name, "Line1__Flow");
        assert_eq!(bare, full);
        assert_eq!(configured, full);
    }

    #[test]
    fn namespace_qualifier_is_ignored() {
        let index = snapshot(&[("ns=2;s:Boiler.Temp", 81.0)]);
        assert!(index.resolve("boiler.temp").is_some());
        assert!(index.resolve("opc:Boiler.Temp").is_some());
    }

    #[test]
    fn prefix_and_namespace_combine() {
        let index = snapshot(&[("plc1__ns:Pump.Speed", 1450.0)]);
        for name in ["PLC1__NS:PUMP.SPEED", "ns:Pump.Speed", "pump.speed"] {
            assert!(index.resolve(name).is_some(), "{name} should resolve");
        }
    }

    #[test]
    fn composed_and_decomposed_diacritics_match() {
        let index = snapshot(&[("Température", 20.0)]);
        assert!(index.resolve("Tempe\u{301}rature").is_some());
        assert!(index.resolve("  TEMPÉRATURE ").is_some());
    }

    #[test]
    fn exact_names_win_over_aliases() {
        let index = snapshot(&[("Line1__Flow", 1.0), ("Flow", 2.0)]);
        assert_eq!(index.resolve("Flow").and_then(LiveRecord::numeric), Some(2.0));
        assert_eq!(
            index.resolve("Line1__Flow").and_then(LiveRecord::numeric),
            Some(1.0)
        );
    }

    #[test]
    fn missing_tag_renders_no_data() {
        let index = snapshot(&[("Level", 3.0)]);
        let reading = index.reading(&TagConfig::named("Pressure"));
        assert_eq!(reading, TagReading::NoData);
        assert_eq!(reading.display(2), "—");
        assert_eq!(index.reading(&TagConfig::named("level")).display(1), "3.0");
    }
}
