//! Left join of enrichment onto the listen log, and coverage reporting.

use std::collections::HashMap;

use crate::db::models::{CanonicalListenEvent, EnrichmentRecord, TrackKey, UnifiedListenEvent};

#[derive(Debug)]
pub struct JoinResult {
    pub rows: Vec<UnifiedListenEvent>,
    /// Records dropped because an earlier record had the same key.
    pub duplicate_records: usize,
}

/// Attach each event's enrichment by track key.
///
/// Every event appears exactly once in the output, in input order. Keys
/// without a record, or whose record is "not found", get no enrichment. If
/// two records share a key, the first one wins and the rest are counted.
pub fn join_enrichment(
    events: Vec<CanonicalListenEvent>,
    records: Vec<EnrichmentRecord>,
) -> JoinResult {
    let mut by_key: HashMap<TrackKey, EnrichmentRecord> = HashMap::with_capacity(records.len());
    let mut duplicate_records = 0;

    for record in records {
        let key = record.key();
        if by_key.contains_key(&key) {
            duplicate_records += 1;
            log::warn!("Duplicate enrichment record for \"{key}\", keeping the first");
            continue;
        }
        by_key.insert(key, record);
    }

    let rows = events
        .into_iter()
        .map(|event| {
            let enrichment = by_key
                .get(&event.key())
                .filter(|r| r.is_found())
                .cloned();
            UnifiedListenEvent { event, enrichment }
        })
        .collect();

    JoinResult {
        rows,
        duplicate_records,
    }
}

/// Enrichment coverage over listen events. Reported, never a gate.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Coverage {
    pub events: usize,
    pub found: usize,
    pub with_features: usize,
}

impl Coverage {
    pub fn from_rows(rows: &[UnifiedListenEvent]) -> Self {
        let mut cov = Self {
            events: rows.len(),
            ..Default::default()
        };
        for row in rows {
            if let Some(rec) = &row.enrichment {
                cov.found += 1;
                if rec.has_features() {
                    cov.with_features += 1;
                }
            }
        }
        cov
    }

    pub fn found_pct(&self) -> f64 {
        pct(self.found, self.events)
    }

    pub fn features_pct(&self) -> f64 {
        pct(self.with_features, self.events)
    }
}

fn pct(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}
