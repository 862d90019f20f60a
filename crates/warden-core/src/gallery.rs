//! Registered-face gallery — CSV-backed feature store and nearest-neighbor
//! matching.
//!
//! The store is an append-only text file, one record per line:
//! `name,f0,...,f127` (129 comma-separated fields). Galleries stay small
//! (tens to low hundreds of identities), so matching is a linear scan and
//! deletion rewrites the whole file.

use crate::types::{Descriptor, FeatureRecord, MatchOutcome, DESCRIPTOR_DIM};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Distance reported when there is nothing to compare against. Finite so
/// it survives JSON serialization, far beyond any usable sensitivity.
pub const NO_MATCH_DISTANCE: f32 = 1.0e9;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to read feature store {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write feature store {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("descriptor has {got} dimensions, expected {DESCRIPTOR_DIM}")]
    InvalidDimension { got: usize },
    #[error("invalid record name {0:?}: names must be non-empty and comma-free")]
    InvalidName(String),
    #[error("no feature found for name {0:?}")]
    NameNotFound(String),
}

/// In-memory gallery backed by a CSV-like file.
pub struct FeatureStore {
    path: PathBuf,
    records: Vec<FeatureRecord>,
}

impl FeatureStore {
    /// Load the store from `path`. A missing file is created empty; lines
    /// that do not parse are skipped with a warning rather than failing
    /// the whole gallery.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            fs::File::create(&path).map_err(|source| StoreError::Write {
                path: path.display().to_string(),
                source,
            })?;
            tracing::info!(path = %path.display(), "created empty feature store");
            return Ok(Self { path, records: Vec::new() });
        }

        let text = fs::read_to_string(&path).map_err(|source| StoreError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let mut records = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(line) {
                Some(record) => records.push(record),
                None => {
                    tracing::warn!(
                        path = %path.display(),
                        line = lineno + 1,
                        "skipping malformed feature record"
                    );
                }
            }
        }

        tracing::info!(path = %path.display(), records = records.len(), "feature store loaded");
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[FeatureRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append one record to the file and the in-memory gallery.
    pub fn save(&mut self, name: &str, descriptor: Descriptor) -> Result<(), StoreError> {
        if name.is_empty() || name.contains(',') {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        if descriptor.values.len() != DESCRIPTOR_DIM {
            return Err(StoreError::InvalidDimension { got: descriptor.values.len() });
        }

        let record = FeatureRecord { name: name.to_string(), descriptor };

        let mut file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|source| StoreError::Write {
                path: self.path.display().to_string(),
                source,
            })?;
        writeln!(file, "{}", format_line(&record)).map_err(|source| StoreError::Write {
            path: self.path.display().to_string(),
            source,
        })?;

        tracing::info!(name = record.name, "feature saved");
        self.records.push(record);
        Ok(())
    }

    /// Remove every record whose name matches exactly, rewriting the file.
    /// Returns the number of records removed; an unknown name leaves both
    /// the file and the in-memory gallery untouched.
    pub fn delete(&mut self, name: &str) -> Result<usize, StoreError> {
        let before = self.records.len();
        let remaining: Vec<FeatureRecord> =
            self.records.iter().filter(|r| r.name != name).cloned().collect();
        let removed = before - remaining.len();

        if removed == 0 {
            return Err(StoreError::NameNotFound(name.to_string()));
        }

        let mut text = String::new();
        for record in &remaining {
            text.push_str(&format_line(record));
            text.push('\n');
        }
        fs::write(&self.path, text).map_err(|source| StoreError::Write {
            path: self.path.display().to_string(),
            source,
        })?;

        tracing::info!(name, removed, "feature deleted");
        self.records = remaining;
        Ok(removed)
    }
}

fn format_line(record: &FeatureRecord) -> String {
    let mut line = String::with_capacity(16 + DESCRIPTOR_DIM * 12);
    line.push_str(&record.name);
    for v in &record.descriptor.values {
        line.push(',');
        line.push_str(&v.to_string());
    }
    line
}

fn parse_line(line: &str) -> Option<FeatureRecord> {
    let mut fields = line.split(',');
    let name = fields.next()?.trim();
    if name.is_empty() {
        return None;
    }

    let mut values = Vec::with_capacity(DESCRIPTOR_DIM);
    for field in fields {
        values.push(field.trim().parse::<f32>().ok()?);
    }
    if values.len() != DESCRIPTOR_DIM {
        return None;
    }

    Some(FeatureRecord {
        name: name.to_string(),
        descriptor: Descriptor::new(values),
    })
}

/// Strategy for comparing a probe descriptor against the gallery.
pub trait Matcher {
    fn compare(&self, probe: &Descriptor, records: &[FeatureRecord], sensitivity: f32) -> MatchOutcome;
}

/// Euclidean nearest-neighbor matcher.
///
/// Scans every record and keeps the running minimum; ties resolve to the
/// first minimum found, so results are stable under insertion order.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Descriptor, records: &[FeatureRecord], sensitivity: f32) -> MatchOutcome {
        if records.is_empty() {
            return MatchOutcome::unknown(NO_MATCH_DISTANCE);
        }

        let mut best_distance = f32::INFINITY;
        let mut best_idx = 0usize;

        for (i, record) in records.iter().enumerate() {
            let distance = probe.euclidean_distance(&record.descriptor);
            if distance < best_distance {
                best_distance = distance;
                best_idx = i;
            }
        }

        tracing::debug!(distance = best_distance, "minimum gallery distance");

        MatchOutcome {
            matched: best_distance <= sensitivity,
            distance: best_distance,
            name: records[best_idx].name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UNKNOWN_NAME;

    fn descriptor(fill: f32) -> Descriptor {
        Descriptor::new(vec![fill; DESCRIPTOR_DIM])
    }

    fn temp_store() -> (tempfile::TempDir, FeatureStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FeatureStore::load(dir.path().join("features.csv")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_load_creates_missing_file() {
        let (dir, store) = temp_store();
        assert!(store.is_empty());
        assert!(dir.path().join("features.csv").exists());
    }

    #[test]
    fn test_save_reload_roundtrip() {
        let (_dir, mut store) = temp_store();
        store.save("alice", descriptor(0.25)).unwrap();
        store.save("bob", descriptor(-0.75)).unwrap();

        let reloaded = FeatureStore::load(store.path()).unwrap();
        assert_eq!(reloaded.len(), 2);

        let outcome = EuclideanMatcher.compare(&descriptor(0.25), reloaded.records(), 0.5);
        assert!(outcome.matched);
        assert_eq!(outcome.name, "alice");
        assert!(outcome.distance < 1e-4);
    }

    #[test]
    fn test_save_rejects_wrong_dimension() {
        let (_dir, mut store) = temp_store();
        let result = store.save("alice", Descriptor::new(vec![0.1; 64]));
        assert!(matches!(result, Err(StoreError::InvalidDimension { got: 64 })));
        assert!(store.is_empty());
    }

    #[test]
    fn test_save_rejects_bad_names() {
        let (_dir, mut store) = temp_store();
        assert!(matches!(
            store.save("a,b", descriptor(0.1)),
            Err(StoreError::InvalidName(_))
        ));
        assert!(matches!(store.save("", descriptor(0.1)), Err(StoreError::InvalidName(_))));
    }

    #[test]
    fn test_delete_removes_only_exact_matches() {
        let (_dir, mut store) = temp_store();
        store.save("alice", descriptor(0.1)).unwrap();
        store.save("alice", descriptor(0.2)).unwrap();
        store.save("alicia", descriptor(0.3)).unwrap();

        let removed = store.delete("alice").unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.records()[0].name, "alicia");

        // File agrees after rewrite
        let reloaded = FeatureStore::load(store.path()).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.records()[0].name, "alicia");
    }

    #[test]
    fn test_delete_missing_name_reports_not_found() {
        let (_dir, mut store) = temp_store();
        store.save("alice", descriptor(0.1)).unwrap();

        let result = store.delete("bob");
        assert!(matches!(result, Err(StoreError::NameNotFound(_))));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_load_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.csv");

        let mut store = FeatureStore::load(&path).unwrap();
        store.save("alice", descriptor(0.5)).unwrap();

        // Corrupt the file with a short row and a non-numeric row
        let mut text = fs::read_to_string(&path).unwrap();
        text.push_str("bob,1.0,2.0\n");
        text.push_str(&format!("carol{}\n", ",x".repeat(DESCRIPTOR_DIM)));
        fs::write(&path, text).unwrap();

        let reloaded = FeatureStore::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.records()[0].name, "alice");
    }

    #[test]
    fn test_empty_store_returns_unknown_sentinel() {
        let outcome = EuclideanMatcher.compare(&descriptor(0.0), &[], 0.5);
        assert!(!outcome.matched);
        assert_eq!(outcome.name, UNKNOWN_NAME);
        assert!(outcome.distance > 1.0e6);
    }

    #[test]
    fn test_matcher_picks_nearest() {
        let records = vec![
            FeatureRecord { name: "far".into(), descriptor: descriptor(1.0) },
            FeatureRecord { name: "near".into(), descriptor: descriptor(0.11) },
            FeatureRecord { name: "mid".into(), descriptor: descriptor(0.5) },
        ];

        let outcome = EuclideanMatcher.compare(&descriptor(0.1), &records, 0.5);
        assert!(outcome.matched);
        assert_eq!(outcome.name, "near");
    }

    #[test]
    fn test_matcher_sensitivity_boundary_inclusive() {
        let records = vec![FeatureRecord { name: "alice".into(), descriptor: descriptor(0.0) }];
        // Distance = sqrt(128 * 0.05^2) ~ 0.5657
        let probe = descriptor(0.05);
        let distance = probe.euclidean_distance(&records[0].descriptor);

        let at = EuclideanMatcher.compare(&probe, &records, distance);
        assert!(at.matched);
        let below = EuclideanMatcher.compare(&probe, &records, distance - 1e-3);
        assert!(!below.matched);
    }

    #[test]
    fn test_matcher_tie_keeps_first() {
        let records = vec![
            FeatureRecord { name: "first".into(), descriptor: descriptor(0.2) },
            FeatureRecord { name: "second".into(), descriptor: descriptor(0.2) },
        ];
        let outcome = EuclideanMatcher.compare(&descriptor(0.2), &records, 0.5);
        assert_eq!(outcome.name, "first");
    }
}
