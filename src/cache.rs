//! Resident records and the set of units waiting to be saved
//!
//! Records are loaded on demand and stay resident until the next `save()`,
//! which evicts every record that is no longer dirty. A removed record is
//! kept as a tombstone until its unit has been deleted from disk.

use crate::recipe::FileRecipe;
use std::collections::{ BTreeSet, HashMap };
use std::fmt;

/// Something `save` writes independently of everything else
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Unit {
    /// Chunk map + fingerprint parameters, always written together
    Checkpoint,
    /// The record unit for one local path
    Record(String),
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Checkpoint => f.write_str("checkpoint"),
            Unit::Record(path) => write!(f, "record {}", path),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DirtySet {
    checkpoint: bool,
    records: BTreeSet<String>,
}

impl DirtySet {
    pub fn mark(&mut self, unit: Unit) {
        match unit {
            Unit::Checkpoint => self.checkpoint = true,
            Unit::Record(path) => {
                self.records.insert(path);
            }
        }
    }

    pub fn clear(&mut self, unit: &Unit) {
        match unit {
            Unit::Checkpoint => self.checkpoint = false,
            Unit::Record(path) => {
                self.records.remove(path);
            }
        }
    }

    pub fn contains(&self, unit: &Unit) -> bool {
        match unit {
            Unit::Checkpoint => self.checkpoint,
            Unit::Record(path) => self.records.contains(path),
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.checkpoint && self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len() + (self.checkpoint as usize)
    }

    /// Pending units, checkpoint first, records in path order.
    pub fn units(&self) -> Vec<Unit> {
        let mut units = Vec::with_capacity(self.len());
        if self.checkpoint {
            units.push(Unit::Checkpoint);
        }
        units.extend(self.records.iter().cloned().map(Unit::Record));
        units
    }
}

#[derive(Debug)]
enum Slot {
    Resident(FileRecipe),
    Removed,
}

/// Outcome of looking a path up without touching disk
pub enum Lookup<'a> {
    Hit(&'a FileRecipe),
    Removed,
    Miss,
}

#[derive(Debug, Default)]
pub struct RecordCache {
    slots: HashMap<String, Slot>,
}

impl RecordCache {
    pub fn lookup(&self, path: &str) -> Lookup<'_> {
        match self.slots.get(path) {
            Some(Slot::Resident(recipe)) => Lookup::Hit(recipe),
            Some(Slot::Removed) => Lookup::Removed,
            None => Lookup::Miss,
        }
    }

    pub fn insert(&mut self, recipe: FileRecipe) {
        self.slots.insert(recipe.path.clone(), Slot::Resident(recipe));
    }

    pub fn tombstone(&mut self, path: &str) {
        self.slots.insert(path.to_string(), Slot::Removed);
    }

    /// Number of records held in memory (tombstones excluded)
    pub fn resident(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Resident(_)))
            .count()
    }

    pub fn resident_paths(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().filter_map(|(path, slot)| match slot {
            Slot::Resident(_) => Some(path.as_str()),
            Slot::Removed => None,
        })
    }

    pub fn removed_paths(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().filter_map(|(path, slot)| match slot {
            Slot::Removed => Some(path.as_str()),
            Slot::Resident(_) => None,
        })
    }

    /// Drop every entry whose record unit is not pending.
    pub fn evict_clean(&mut self, dirty: &DirtySet) -> usize {
        let before = self.slots.len();
        self.slots.retain(|path, _| dirty.contains(&Unit::Record(path.clone())));
        before - self.slots.len()
    }
}
