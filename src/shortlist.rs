use std::collections::HashSet;

use crate::contact::Contact;
use crate::key::Key;

/// The bounded working set of one lookup run.
///
/// Holds up to `k` candidate contacts sorted by ascending XOR distance to
/// the lookup target. The set of already-contacted peers is owned by the
/// lookup loop and keyed by id value, so two copies of the same identity are
/// always treated as one peer. A shortlist is created at the start of a
/// lookup and discarded at its end; it is never shared across lookups.
pub struct Shortlist {
    target: Key,
    k: usize,
    contacts: Vec<Contact>,
}

impl Shortlist {
    /// Constructs an empty shortlist for a lookup of `target`.
    pub fn new(target: Key, k: usize) -> Self {
        Shortlist {
            target,
            k,
            contacts: Vec::new(),
        }
    }

    /// Admits `contact` as a candidate, keeping the list sorted by distance
    /// and truncated to `k`. Duplicates are skipped; a contact farther than
    /// the current `k` closest does not survive the truncation.
    pub fn add_candidate(&mut self, contact: Contact) {
        if self.contains(&contact.id) {
            return;
        }
        let distance = contact.distance_to(&self.target);
        let position = self
            .contacts
            .iter()
            .position(|c| distance < c.distance_to(&self.target))
            .unwrap_or_else(|| self.contacts.len());
        self.contacts.insert(position, contact);
        self.contacts.truncate(self.k);
    }

    /// Drops the candidate with `id`. Dead peers are removed so they cannot
    /// block termination.
    pub fn remove_candidate(&mut self, id: &Key) {
        if let Some(index) = self.contacts.iter().position(|c| c.id == *id) {
            self.contacts.remove(index);
        }
    }

    /// The current best candidate.
    pub fn closest(&self) -> Option<&Contact> {
        self.contacts.first()
    }

    /// The next batch to query: up to `count` candidates in ascending
    /// distance order, excluding everything already in `contacted`.
    pub fn closest_uncontacted(&self, count: usize, contacted: &HashSet<Key>) -> Vec<Contact> {
        self.contacts
            .iter()
            .filter(|c| !contacted.contains(&c.id))
            .take(count)
            .cloned()
            .collect()
    }

    /// Returns `true` when the shortlist is at capacity and every entry has
    /// been contacted. A partially filled shortlist is not by itself a
    /// termination signal.
    pub fn all_contacted(&self, contacted: &HashSet<Key>) -> bool {
        self.contacts.len() == self.k && self.contacts.iter().all(|c| contacted.contains(&c.id))
    }

    /// Returns `true` if a candidate with `id` is present.
    pub fn contains(&self, id: &Key) -> bool {
        self.contacts.iter().any(|c| c.id == *id)
    }

    /// The `count` closest candidates currently held.
    pub fn contacts(&self, count: usize) -> Vec<Contact> {
        self.contacts.iter().take(count).cloned().collect()
    }

    /// The number of candidates currently held.
    pub fn len(&self) -> usize {
        self.contacts.len()
    }
}
