//! In-memory registry of transfer entries, newest first.
//!
//! The registry itself is a plain collection; callers guard it with the
//! queue's mutex so every mutation and snapshot is consistent.

use super::models::TransferEntry;

#[derive(Debug, Default, Clone)]
pub struct TransferRegistry {
    entries: Vec<TransferEntry>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from a loaded snapshot, keeping the first occurrence
    /// of any duplicated id
    pub fn from_entries(entries: Vec<TransferEntry>) -> Self {
        let mut registry = Self::new();
        for entry in entries {
            if registry.find(&entry.id).is_some() {
                tracing::warn!(id = %entry.id, "Dropping duplicate entry from snapshot");
                continue;
            }
            registry.entries.push(entry);
        }
        registry
    }

    pub fn insert_front(&mut self, entry: TransferEntry) {
        self.entries.insert(0, entry);
    }

    pub fn find(&self, id: &str) -> Option<&TransferEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut TransferEntry> {
        self.entries.iter_mut().find(|entry| entry.id == id)
    }

    /// Entry at a position of the registry order
    pub fn get(&self, index: usize) -> Option<&TransferEntry> {
        self.entries.get(index)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    pub fn remove(&mut self, id: &str) -> Option<TransferEntry> {
        let position = self.entries.iter().position(|entry| entry.id == id)?;
        Some(self.entries.remove(position))
    }

    /// Ordered snapshot of every entry
    pub fn all(&self) -> Vec<TransferEntry> {
        self.entries.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransferEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
