//! Type inference over sampled records.
//!
//! Used when no explicit field schema is supplied. The heuristic is cheap and
//! deliberately conservative: anything it cannot classify stays free text,
//! which never enters the volatile tier.

use crate::ingest::render_value;
use folio_common::{FieldDefinition, FieldKind};
use regex::Regex;
use serde_json::{Map, Value as Json};
use std::collections::HashMap;
use std::io::BufRead;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Field names that always stay free text.
const SEARCHSTRING: &str = "searchstring";

static TIME_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("(?i)date|time").expect("regex"));

/// Observations for one field.
#[derive(Debug, Clone, Default)]
pub struct FieldSample {
    /// Rendered value → occurrences.
    pub counts: HashMap<String, u64>,
    /// Some record held a list for this field.
    pub list_valued: bool,
    /// Every observed scalar was a JSON integer.
    pub all_integer: bool,
    /// Every observed scalar was a JSON number.
    pub all_numeric: bool,
}

impl FieldSample {
    fn new() -> Self {
        Self {
            all_integer: true,
            all_numeric: true,
            ..Self::default()
        }
    }

    fn observe_scalar(&mut self, value: &Json) {
        match value {
            Json::Null => return,
            Json::Number(n) => {
                if !(n.is_i64() || n.is_u64()) {
                    self.all_integer = false;
                }
            }
            _ => {
                self.all_integer = false;
                self.all_numeric = false;
            }
        }
        *self.counts.entry(render_value(value)).or_insert(0) += 1;
    }

    fn observe(&mut self, value: &Json) {
        match value {
            Json::Array(items) => {
                self.list_valued = true;
                for item in items {
                    self.observe_scalar(item);
                }
            }
            other => self.observe_scalar(other),
        }
    }

    /// Sum of counts divided by distinct values.
    pub fn mean_multiplicity(&self) -> f64 {
        if self.counts.is_empty() {
            return 0.0;
        }
        let total: u64 = self.counts.values().sum();
        total as f64 / self.counts.len() as f64
    }
}

/// Guess a definition for one field from its sample.
pub fn infer_field(name: &str, sample: &FieldSample, categorical_threshold: f64) -> FieldDefinition {
    if name == SEARCHSTRING {
        return FieldDefinition::new(name, FieldKind::Text, true);
    }
    let unique = !sample.list_valued;
    if sample.counts.is_empty() {
        return FieldDefinition::new(name, FieldKind::Text, unique);
    }

    let multiplicity = sample.mean_multiplicity();
    let kind = if TIME_NAME.is_match(name) {
        FieldKind::Time
    } else if multiplicity > categorical_threshold {
        FieldKind::Categorical
    } else if sample.all_integer {
        FieldKind::Integer
    } else if sample.all_numeric {
        FieldKind::Decimal
    } else {
        FieldKind::Text
    };
    debug!(
        field = name,
        kind = %kind,
        unique,
        distinct = sample.counts.len(),
        multiplicity,
        "field type inferred"
    );
    FieldDefinition::new(name, kind, unique)
}

/// Collects per-field samples from the head of a record stream.
#[derive(Debug)]
pub struct Sampler {
    key_field: String,
    limit: usize,
    records: usize,
    /// Field names in first-seen order.
    order: Vec<String>,
    samples: HashMap<String, FieldSample>,
}

impl Sampler {
    pub fn new(key_field: impl Into<String>, limit: usize) -> Self {
        Self {
            key_field: key_field.into(),
            limit,
            records: 0,
            order: Vec::new(),
            samples: HashMap::new(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.records >= self.limit
    }

    pub fn records(&self) -> usize {
        self.records
    }

    pub fn sample(&self, field: &str) -> Option<&FieldSample> {
        self.samples.get(field)
    }

    pub fn observe(&mut self, record: &Map<String, Json>) {
        if self.is_full() {
            return;
        }
        self.records += 1;
        for (key, value) in record {
            if *key == self.key_field {
                continue;
            }
            if !self.samples.contains_key(key) {
                self.order.push(key.clone());
            }
            self.samples
                .entry(key.clone())
                .or_insert_with(FieldSample::new)
                .observe(value);
        }
    }

    /// Sample up to the limit from a JSON-lines reader. Malformed lines are
    /// skipped; they are reported again during ingestion.
    pub fn read<R: BufRead>(&mut self, reader: R) -> std::io::Result<()> {
        for line in reader.lines() {
            if self.is_full() {
                break;
            }
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Json>(&line) {
                Ok(Json::Object(record)) => self.observe(&record),
                _ => debug!("unparseable record skipped during sampling"),
            }
        }
        Ok(())
    }

    /// Definitions for every sampled field, in first-seen order.
    ///
    /// Keys that cannot name a field (bad characters, reserved names) are
    /// left out with a warning.
    pub fn infer(&self, categorical_threshold: f64, reserved: &[&str]) -> Vec<FieldDefinition> {
        if self.records == 0 {
            warn!("no records sampled; nothing to infer");
        }
        self.order
            .iter()
            .filter_map(|name| {
                let def = infer_field(name, self.samples.get(name)?, categorical_threshold);
                match def.validate(reserved) {
                    Ok(()) => Some(def),
                    Err(e) => {
                        warn!(field = %name, error = %e, "key cannot be a field, skipped");
                        None
                    }
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_of(values: &[(&str, u64)]) -> FieldSample {
        let mut s = FieldSample::new();
        s.all_integer = false;
        s.all_numeric = false;
        for (v, n) in values {
            s.counts.insert((*v).to_string(), *n);
        }
        s
    }

    #[test]
    fn test_multiplicity_exactly_two_is_text() {
        let s = sample_of(&[("a", 2), ("b", 2)]);
        assert_eq!(infer_field("genre", &s, 2.0).datatype, FieldKind::Text);
    }

    #[test]
    fn test_multiplicity_above_two_is_categorical() {
        // 201 occurrences over 100 values
        let mut values: Vec<(String, u64)> = (0..99).map(|i| (format!("v{i}"), 2)).collect();
        values.push(("v99".into(), 3));
        let mut s = FieldSample::new();
        s.all_integer = false;
        s.all_numeric = false;
        s.counts = values.into_iter().collect();
        assert!((s.mean_multiplicity() - 2.01).abs() < 1e-9);
        assert_eq!(infer_field("genre", &s, 2.0).datatype, FieldKind::Categorical);
    }

    #[test]
    fn test_time_name_takes_precedence() {
        let s = sample_of(&[("1850", 50)]);
        assert_eq!(infer_field("PubDate", &s, 2.0).datatype, FieldKind::Time);
        assert_eq!(infer_field("timestamp", &s, 2.0).datatype, FieldKind::Time);
    }

    #[test]
    fn test_searchstring_forced_to_text() {
        let s = sample_of(&[("x", 100)]);
        let def = infer_field("searchstring", &s, 2.0);
        assert_eq!(def.datatype, FieldKind::Text);
        assert!(def.unique);
    }

    #[test]
    fn test_empty_sample_is_text() {
        let def = infer_field("genre", &FieldSample::new(), 2.0);
        assert_eq!(def.datatype, FieldKind::Text);
    }

    #[test]
    fn test_sampler_flags_lists_and_numbers() {
        let mut sampler = Sampler::new("filename", 100);
        for (i, rec) in [
            json!({"filename": "a", "tags": ["x", "y"], "pages": 10, "price": 1.5}),
            json!({"filename": "b", "tags": "x", "pages": 20, "price": 2}),
            json!({"filename": "c", "tags": ["x"], "pages": 30, "price": 3.25}),
        ]
        .iter()
        .enumerate()
        {
            let Json::Object(map) = rec else {
                panic!("record {i} is not an object")
            };
            sampler.observe(map);
        }
        let defs = sampler.infer(2.0, &["bookid", "filename"]);
        let names: Vec<_> = defs.iter().map(|d| d.field.as_str()).collect();
        assert!(!names.contains(&"filename"));

        let by_name = |n: &str| defs.iter().find(|d| d.field == n).unwrap().clone();
        assert!(!by_name("tags").unique);
        assert_eq!(by_name("pages").datatype, FieldKind::Integer);
        assert_eq!(by_name("price").datatype, FieldKind::Decimal);
    }

    #[test]
    fn test_unusable_keys_are_left_out() {
        let mut sampler = Sampler::new("filename", 100);
        let rec = json!({
            "filename": "a",
            "first-author": "Melville",
            "bookid": 7,
            "tags__id": 1,
            "genre": "fiction"
        });
        let Json::Object(map) = rec else {
            panic!("record is not an object")
        };
        sampler.observe(&map);
        let names: Vec<_> = sampler
            .infer(2.0, &["bookid", "filename"])
            .into_iter()
            .map(|d| d.field)
            .collect();
        assert_eq!(names, vec!["genre"]);
    }

    #[test]
    fn test_sampler_respects_limit_and_skips_garbage() {
        let input = "{\"genre\": \"a\"}\nnot json\n{\"genre\": \"a\"}\n{\"genre\": \"a\"}\n";
        let mut sampler = Sampler::new("filename", 2);
        sampler.read(input.as_bytes()).unwrap();
        assert_eq!(sampler.records(), 2);
        assert_eq!(sampler.sample("genre").unwrap().counts["a"], 2);
    }
}
