//! Append-only record sequence parallel to a [`FlatIndex`](crate::index::FlatIndex).
//!
//! Entry `i` describes the vector in index slot `i`. The store does not
//! enforce that pairing itself; the catalog appends to both in lockstep.

use skillmatch_core::types::Record;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataStore {
    records: Vec<Record>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn append(&mut self, records: &[Record]) {
        self.records.extend_from_slice(records);
    }

    pub fn get(&self, slot: usize) -> Option<&Record> {
        self.records.get(slot)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }
}
