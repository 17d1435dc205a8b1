//! Ordered, duplicate-free list of identifiers edited by the caller between runs.

use std::collections::HashSet;

use thiserror::Error;

use crate::Identifier;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("index {index} is out of range for a list of {len} identifiers")]
    OutOfRange { index: usize, len: usize },
}

/// What an [`IdentifierSet::add`] call changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOutcome {
    /// Identifiers that ended up in the list.
    pub added: usize,
    /// Tokens dropped because they were already present (or repeated in the input).
    pub duplicates_removed: usize,
}

impl AddOutcome {
    pub fn had_duplicates(&self) -> bool {
        self.duplicates_removed > 0
    }
}

/// Insertion-ordered identifier list with exact-match deduplication.
///
/// Duplicates are dropped keeping the first occurrence, so the order of the
/// surviving identifiers is always the order they were first added in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierSet {
    items: Vec<Identifier>,
}

impl IdentifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from comma-separated free text.
    pub fn parse(raw: &str) -> (Self, AddOutcome) {
        let mut set = Self::new();
        let outcome = set.add(raw);
        (set, outcome)
    }

    /// Append every non-empty, trimmed, comma-separated token of `raw`, then
    /// drop duplicates.
    pub fn add(&mut self, raw: &str) -> AddOutcome {
        let before = self.items.len();
        self.items.extend(split_input(raw).map(Identifier::from));
        let appended = self.items.len() - before;

        let mut seen = HashSet::with_capacity(self.items.len());
        self.items.retain(|id| seen.insert(id.clone()));

        let outcome = AddOutcome {
            added: self.items.len() - before,
            duplicates_removed: before + appended - self.items.len(),
        };
        if outcome.had_duplicates() {
            tracing::info!(
                removed = outcome.duplicates_removed,
                "duplicate identifiers found and deleted"
            );
        }
        outcome
    }

    /// Remove the identifier at `index`. The list is untouched on error.
    pub fn remove(&mut self, index: usize) -> Result<Identifier, IdentifierError> {
        if index >= self.items.len() {
            return Err(IdentifierError::OutOfRange {
                index,
                len: self.items.len(),
            });
        }
        Ok(self.items.remove(index))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn get(&self, index: usize) -> Option<&Identifier> {
        self.items.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Identifier> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[Identifier] {
        &self.items
    }

    /// Owned copy for a run; the set stays editable while the run works on it.
    pub fn snapshot(&self) -> Vec<Identifier> {
        self.items.clone()
    }
}

impl<'a> IntoIterator for &'a IdentifierSet {
    type Item = &'a Identifier;
    type IntoIter = std::slice::Iter<'a, Identifier>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Split user input on commas, trimming tokens and skipping empty ones.
pub fn split_input(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|token| !token.is_empty())
}
