//! Timing ledger for a single page view
//!
//! Holds marks (name → epoch milliseconds) and measures (name → duration and
//! start). Both tables iterate in first-insertion order; overwriting a name
//! keeps its position, so the beacon lists episodes in the order they first
//! appeared.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// A named timestamp recorded during the page view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mark {
    pub name: String,
    pub timestamp_ms: i64,
}

/// A named duration derived from two timestamp references
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measure {
    pub name: String,
    pub duration_ms: i64,
    pub start_timestamp_ms: i64,
}

/// Read-only copy of the ledger contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub marks: Vec<Mark>,
    pub measures: Vec<Measure>,
}

/// Insertion-ordered map keyed by episode or mark name
#[derive(Debug, Clone)]
struct OrderedTable<V> {
    index: HashMap<String, usize>,
    entries: Vec<(String, V)>,
}

impl<V> Default for OrderedTable<V> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }
}

impl<V> OrderedTable<V> {
    fn insert(&mut self, name: &str, value: V) {
        match self.index.get(name) {
            Some(&slot) => self.entries[slot].1 = value,
            None => {
                self.index.insert(name.to_string(), self.entries.len());
                self.entries.push((name.to_string(), value));
            }
        }
    }

    fn get(&self, name: &str) -> Option<&V> {
        self.index.get(name).map(|&slot| &self.entries[slot].1)
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.index.clear();
        self.entries.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    duration_ms: i64,
    start_ms: i64,
}

/// Marks and measures of the current page view
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    marks: OrderedTable<i64>,
    measures: OrderedTable<Span>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mark, using `now_ms` when no explicit time is given.
    /// Re-marking a name overwrites the previous timestamp.
    pub fn set_mark(&mut self, name: &str, timestamp_ms: Option<i64>, now_ms: i64) {
        let timestamp = timestamp_ms.unwrap_or(now_ms);
        trace!(name, timestamp, "mark");
        self.marks.insert(name, timestamp);
    }

    /// Compute and store a measure.
    ///
    /// `start` defaults to `name`. It resolves to a mark of that name or, failing
    /// that, to an epoch literal that round-trips exactly as an integer. `end`
    /// defaults to `now_ms`; otherwise it resolves to a mark or any integer
    /// literal. When either side does not resolve, or the difference does not
    /// fit in an `i64`, nothing is stored and `None` is returned.
    pub fn compute_measure(
        &mut self,
        name: &str,
        start: Option<&str>,
        end: Option<&str>,
        now_ms: i64,
    ) -> Option<Measure> {
        let start_ref = start.unwrap_or(name);
        let Some(start_ms) = self.resolve_start(start_ref) else {
            debug!(name, start = start_ref, "measure skipped: start unresolved");
            return None;
        };
        let Some(end_ms) = self.resolve_end(end, now_ms) else {
            debug!(name, end = ?end, "measure skipped: end unresolved");
            return None;
        };

        let Some(duration_ms) = end_ms.checked_sub(start_ms) else {
            debug!(name, start_ms, end_ms, "measure skipped: duration out of range");
            return None;
        };

        let span = Span {
            duration_ms,
            start_ms,
        };
        trace!(name, duration = span.duration_ms, "measure");
        self.measures.insert(name, span);

        Some(Measure {
            name: name.to_string(),
            duration_ms: span.duration_ms,
            start_timestamp_ms: start_ms,
        })
    }

    fn resolve_start(&self, reference: &str) -> Option<i64> {
        self.mark(reference).or_else(|| strict_epoch(reference))
    }

    fn resolve_end(&self, reference: Option<&str>, now_ms: i64) -> Option<i64> {
        match reference {
            None => Some(now_ms),
            Some(reference) => self
                .mark(reference)
                .or_else(|| reference.parse::<i64>().ok()),
        }
    }

    pub fn mark(&self, name: &str) -> Option<i64> {
        self.marks.get(name).copied()
    }

    pub fn measure(&self, name: &str) -> Option<Measure> {
        self.measures.get(name).map(|span| Measure {
            name: name.to_string(),
            duration_ms: span.duration_ms,
            start_timestamp_ms: span.start_ms,
        })
    }

    /// Marks in first-insertion order
    pub fn marks(&self) -> Vec<Mark> {
        self.marks
            .iter()
            .map(|(name, &timestamp_ms)| Mark {
                name: name.to_string(),
                timestamp_ms,
            })
            .collect()
    }

    /// Measures in first-insertion order
    pub fn measures(&self) -> Vec<Measure> {
        self.measures
            .iter()
            .map(|(name, span)| Measure {
                name: name.to_string(),
                duration_ms: span.duration_ms,
                start_timestamp_ms: span.start_ms,
            })
            .collect()
    }

    /// `(name, duration)` pairs in beacon order
    pub fn durations(&self) -> impl Iterator<Item = (&str, i64)> {
        self.measures
            .iter()
            .map(|(name, span)| (name, span.duration_ms))
    }

    pub fn mark_count(&self) -> usize {
        self.marks.len()
    }

    pub fn measure_count(&self) -> usize {
        self.measures.len()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            marks: self.marks(),
            measures: self.measures(),
        }
    }

    pub fn clear(&mut self) {
        self.marks.clear();
        self.measures.clear();
    }
}

/// Parse an epoch literal only if it prints back to the same text
fn strict_epoch(literal: &str) -> Option<i64> {
    literal
        .parse::<i64>()
        .ok()
        .filter(|value| value.to_string() == literal)
}
