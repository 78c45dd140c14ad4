//! # IndexedUpdate
//! A normalised description of a change to an ordered list of keys, and the algebra used to reconcile
//! local predictions with server deltas.
//!
//! Applying an update means: remove every `removed_indexes` entry (indexes refer to the list *before*
//! the update), then insert every `added_indexes` entry (indexes refer to the list *after* the update).
//! Both index lists are ascending and paired with their key lists.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IndexedUpdate<K> {
    pub removed_indexes: Vec<usize>,
    pub removed_keys: Vec<K>,
    pub added_indexes: Vec<usize>,
    pub added_keys: Vec<K>,
    /// Length of the list once the update has been applied.
    pub total: usize,
    /// Anything after the first hole may be wrong once this update is applied, so it is dropped.
    pub truncate_at_first_gap: bool,
    /// The last key the update covers. Anything after it is discarded.
    pub up_to: Option<K>,
}

/// An update as produced by a client or (once ids are mapped to keys) by the server: the keys that
/// went away and the positions of the keys that appeared.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RawUpdate<K> {
    #[serde(default)]
    pub removed: Vec<K>,
    #[serde(default)]
    pub added: Vec<(usize, K)>,
    #[serde(default)]
    pub total: Option<usize>,
    #[serde(default)]
    pub up_to: Option<K>,
}

impl<K> Default for RawUpdate<K> {
    fn default() -> Self {
        Self {
            removed: Vec::new(),
            added: Vec::new(),
            total: None,
            up_to: None,
        }
    }
}

/// The `up_to` key of an update could not be found in the list it was applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("the last key covered by the update is not in the list")]
pub struct UpToMissing;

impl<K: Clone + PartialEq> IndexedUpdate<K> {
    /// An update that changes nothing in a list of `total` items.
    pub fn unchanged(total: usize) -> Self {
        Self {
            removed_indexes: Vec::new(),
            removed_keys: Vec::new(),
            added_indexes: Vec::new(),
            added_keys: Vec::new(),
            total,
            truncate_at_first_gap: false,
            up_to: None,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.removed_indexes.is_empty()
            && self.added_indexes.is_empty()
            && !self.truncate_at_first_gap
            && self.up_to.is_none()
    }

    /// The single update equivalent to applying `self` and then `next`.
    pub fn compose(&self, next: &IndexedUpdate<K>) -> IndexedUpdate<K> {
        let (removed_indexes, removed_keys) = adjust_indexes(
            &next.removed_indexes,
            &next.removed_keys,
            &self.added_indexes,
            &self.removed_indexes,
            &self.removed_keys,
        );
        let (added_indexes, added_keys) = adjust_indexes(
            &self.added_indexes,
            &self.added_keys,
            &next.removed_indexes,
            &next.added_indexes,
            &next.added_keys,
        );

        IndexedUpdate {
            removed_indexes,
            removed_keys,
            added_indexes,
            added_keys,
            truncate_at_first_gap: self.truncate_at_first_gap || next.truncate_at_first_gap,
            total: next.total,
            up_to: next.up_to.clone(),
        }
    }

    /// The update that undoes `self`.
    ///
    /// `truncate_at_first_gap` and `up_to` are kept as they are: inversion only undoes predictions
    /// that were applied locally, it does not model a real delta.
    pub fn invert(&self) -> IndexedUpdate<K> {
        IndexedUpdate {
            removed_indexes: self.added_indexes.clone(),
            removed_keys: self.added_keys.clone(),
            added_indexes: self.removed_indexes.clone(),
            added_keys: self.removed_keys.clone(),
            total: (self.total + self.removed_keys.len()).saturating_sub(self.added_keys.len()),
            truncate_at_first_gap: self.truncate_at_first_gap,
            up_to: self.up_to.clone(),
        }
    }

    /// Same total, same index and key lists. Flags are not compared.
    pub fn same_changes(&self, other: &IndexedUpdate<K>) -> bool {
        self.total == other.total
            && self.added_indexes == other.added_indexes
            && self.added_keys == other.added_keys
            && self.removed_indexes == other.removed_indexes
            && self.removed_keys == other.removed_keys
    }

    /// Performs the list surgery for this update and returns the first index that changed.
    ///
    /// Indexes past the end of `list` are holes: removing one is a no-op and adding one pads the
    /// list with `None`.
    pub fn apply_to(&self, list: &mut Vec<Option<K>>) -> Result<usize, UpToMissing> {
        let mut first_change = list.len();

        for &index in self.removed_indexes.iter().rev() {
            if index < list.len() {
                list.remove(index);
            }
            first_change = first_change.min(index);
        }

        if self.truncate_at_first_gap {
            let gap = list.iter().position(Option::is_none).unwrap_or(list.len());
            list.truncate(gap);
            first_change = first_change.min(gap);
        }

        for (&index, key) in self.added_indexes.iter().zip(&self.added_keys) {
            if index >= list.len() {
                list.resize(index, None);
                list.push(Some(key.clone()));
            } else {
                list.insert(index, Some(key.clone()));
            }
            first_change = first_change.min(index);
        }

        if let Some(up_to) = &self.up_to {
            let Some(last) = list.iter().rposition(|key| key.as_ref() == Some(up_to)) else {
                return Err(UpToMissing);
            };
            if last + 1 < list.len() {
                list.truncate(last + 1);
                first_change = first_change.min(last + 1);
            }
        }

        Ok(first_change)
    }
}

impl<K: Clone + Eq + Hash> RawUpdate<K> {
    /// Resolves removed keys to their current positions in `list`.
    ///
    /// Keys that are not loaded cannot be placed, so they are ignored and the update is marked to
    /// truncate at the first gap instead.
    pub fn normalise(self, list: &[Option<K>], length: usize) -> IndexedUpdate<K> {
        let indexes = map_indexes(list, &self.removed);
        let removed = indexes.into_iter().zip(self.removed).collect();
        finish_normalising(removed, self.added, self.total, self.up_to, length)
    }

    /// Like [`normalise`](Self::normalise), but for a server update computed against the list as it
    /// was *before* the `preemptive` update was applied locally.
    ///
    /// Removed keys the prediction also removed already have an original index. Any other key is
    /// found in the live list and mapped back through the prediction.
    pub fn normalise_through(
        self,
        list: &[Option<K>],
        length: usize,
        preemptive: &IndexedUpdate<K>,
    ) -> IndexedUpdate<K> {
        let mut removed = Vec::with_capacity(self.removed.len());
        let mut to_find = Vec::new();
        for key in self.removed {
            match preemptive.removed_keys.iter().position(|k| *k == key) {
                Some(position) => removed.push((Some(preemptive.removed_indexes[position]), key)),
                None => to_find.push(key),
            }
        }

        let current = map_indexes(list, &to_find);
        for (index, key) in current.into_iter().zip(to_find) {
            match index {
                Some(index) => {
                    // A key only the prediction added never existed in the original list.
                    if let Some(original) = original_index(
                        index,
                        &preemptive.added_indexes,
                        &preemptive.removed_indexes,
                    ) {
                        removed.push((Some(original), key));
                    }
                }
                None => removed.push((None, key)),
            }
        }

        let original_length =
            (length + preemptive.removed_keys.len()).saturating_sub(preemptive.added_keys.len());
        finish_normalising(removed, self.added, self.total, self.up_to, original_length)
    }
}

fn finish_normalising<K: Clone + Eq>(
    mut removed: Vec<(Option<usize>, K)>,
    mut added: Vec<(usize, K)>,
    total: Option<usize>,
    up_to: Option<K>,
    length: usize,
) -> IndexedUpdate<K> {
    // Unknown positions sort first.
    removed.sort_by_key(|(index, _)| *index);
    let truncate_at_first_gap = removed.iter().any(|(index, _)| index.is_none());
    let (mut removed_indexes, mut removed_keys): (Vec<usize>, Vec<K>) = removed
        .into_iter()
        .filter_map(|(index, key)| index.map(|index| (index, key)))
        .unzip();

    added.sort_by_key(|(index, _)| *index);
    let mut added_indexes = Vec::with_capacity(added.len());
    let mut added_keys = Vec::with_capacity(added.len());
    for (index, key) in added {
        // A key removed and re-added exactly where it would end up anyway is a no-op.
        let cancels = removed_keys
            .iter()
            .position(|k| *k == key)
            .filter(|&j| removed_indexes[j] + added_indexes.len() == index + j);
        if let Some(j) = cancels {
            removed_indexes.remove(j);
            removed_keys.remove(j);
        } else {
            added_indexes.push(index);
            added_keys.push(key);
        }
    }

    let total = total.unwrap_or_else(|| {
        (length + added_indexes.len()).saturating_sub(removed_indexes.len())
    });

    IndexedUpdate {
        removed_indexes,
        removed_keys,
        added_indexes,
        added_keys,
        total,
        truncate_at_first_gap,
        up_to,
    }
}

/// Finds the current index of each key in `list`.
///
/// Building a map is O(n), so it is only worth it when looking up more than about log2(n) keys;
/// otherwise each key is found with a linear scan.
pub fn map_indexes<K: Eq + Hash>(list: &[Option<K>], keys: &[K]) -> Vec<Option<usize>> {
    let threshold = list.len().checked_ilog2().unwrap_or(0) as usize + 1;
    if keys.len() < threshold {
        return keys
            .iter()
            .map(|key| list.iter().position(|k| k.as_ref() == Some(key)))
            .collect();
    }

    let mut index_of = HashMap::with_capacity(list.len());
    for (index, key) in list.iter().enumerate() {
        if let Some(key) = key {
            index_of.entry(key).or_insert(index);
        }
    }
    keys.iter().map(|key| index_of.get(key).copied()).collect()
}

/// Maps an index in the list produced by an update back to the list the update was applied to.
/// Returns `None` if the update itself added the item at `index`.
fn original_index(index: usize, added: &[usize], removed: &[usize]) -> Option<usize> {
    let position = added.partition_point(|&a| a < index);
    if added.get(position) == Some(&index) {
        return None;
    }
    let mut index = index - position;
    for &r in removed {
        if index < r {
            break;
        }
        index += 1;
    }
    Some(index)
}

/// Maps `indexes` (expressed after an update with the given `added_before` / `removed_before`
/// indexes) back through it, dropping entries that cancel against `added_before`, and merges the
/// result with the update's own `removed_before` entries.
fn adjust_indexes<K: Clone>(
    indexes: &[usize],
    keys: &[K],
    added_before: &[usize],
    removed_before: &[usize],
    removed_before_keys: &[K],
) -> (Vec<usize>, Vec<K>) {
    let mut result_indexes = Vec::with_capacity(indexes.len());
    let mut result_keys = Vec::with_capacity(indexes.len());
    for (&index, key) in indexes.iter().zip(keys) {
        if let Some(index) = original_index(index, added_before, removed_before) {
            result_indexes.push(index);
            result_keys.push(key.clone());
        }
    }
    merge_sorted_linked(
        removed_before,
        removed_before_keys,
        &result_indexes,
        &result_keys,
    )
}

/// Merges two ascending index lists, carrying each one's paired keys along.
fn merge_sorted_linked<K: Clone>(
    a_indexes: &[usize],
    a_keys: &[K],
    b_indexes: &[usize],
    b_keys: &[K],
) -> (Vec<usize>, Vec<K>) {
    let len = a_indexes.len() + b_indexes.len();
    let mut indexes = Vec::with_capacity(len);
    let mut keys = Vec::with_capacity(len);
    let (mut i, mut j) = (0, 0);
    while i < a_indexes.len() || j < b_indexes.len() {
        if j >= b_indexes.len() || (i < a_indexes.len() && a_indexes[i] < b_indexes[j]) {
            indexes.push(a_indexes[i]);
            keys.push(a_keys[i].clone());
            i += 1;
        } else {
            indexes.push(b_indexes[j]);
            keys.push(b_keys[j].clone());
            j += 1;
        }
    }
    (indexes, keys)
}
