//! In-memory index of files that already have a committed fact block.
//!
//! The store file is the source of truth; this index is rebuilt from its
//! block markers at startup and only grows afterwards.

use std::collections::HashMap;

use crate::store::{extract_processed_records, ProcessedFileRecord};

#[derive(Debug, Default, Clone)]
pub struct ProcessedFileIndex {
    records: HashMap<String, ProcessedFileRecord>,
}

impl ProcessedFileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from records in store order. The first record per filename wins.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = ProcessedFileRecord>,
    {
        let mut index = Self::new();
        for record in records {
            if !index.insert(record.clone()) {
                log::warn!(
                    "index: {} has more than one fact block in the store, keeping the first",
                    record.filename
                );
            }
        }
        index
    }

    /// Rebuild from raw store content.
    pub fn from_store_content(content: &str) -> Self {
        Self::from_records(extract_processed_records(content))
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.records.contains_key(filename)
    }

    pub fn get(&self, filename: &str) -> Option<&ProcessedFileRecord> {
        self.records.get(filename)
    }

    /// Insert a record; returns `false` (and keeps the existing one) if the
    /// filename is already present.
    pub fn insert(&mut self, record: ProcessedFileRecord) -> bool {
        if self.records.contains_key(&record.filename) {
            return false;
        }
        self.records.insert(record.filename.clone(), record);
        true
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Filenames, sorted.
    pub fn filenames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.records.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{escape_payload, render_block, PREAMBLE};
    use chrono::{TimeZone, Utc};

    fn record(name: &str, size: usize) -> ProcessedFileRecord {
        ProcessedFileRecord {
            filename: name.to_string(),
            processed_at: Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap(),
            fact_block_size: size,
        }
    }

    #[test]
    fn test_insert_is_once_per_file() {
        let mut index = ProcessedFileIndex::new();
        assert!(index.insert(record("a.log", 10)));
        assert!(!index.insert(record("a.log", 99)));
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("a.log").unwrap().fact_block_size, 10);
    }

    #[test]
    fn test_from_records_keeps_first() {
        let index = ProcessedFileIndex::from_records(vec![
            record("b.log", 1),
            record("a.log", 2),
            record("b.log", 3),
        ]);
        assert_eq!(index.filenames(), vec!["a.log".to_string(), "b.log".to_string()]);
        assert_eq!(index.get("b.log").unwrap().fact_block_size, 1);
    }

    #[test]
    fn test_from_store_content_ignores_truncated_block() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
        let good = render_block("good.log", ts, &escape_payload("x .")).unwrap();
        let torn = render_block("torn.log", ts, &escape_payload("y .")).unwrap();
        let content = format!("{PREAMBLE}{good}{}", &torn[..torn.len() - 5]);

        let index = ProcessedFileIndex::from_store_content(&content);
        assert!(index.contains("good.log"));
        assert!(!index.contains("torn.log"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_empty_store_gives_empty_index() {
        assert!(ProcessedFileIndex::from_store_content(PREAMBLE).is_empty());
    }
}
