//! Change notifications. Listeners see every [`QueryEvent`]; range observers are only told about
//! changes that touch the index range they watch.

use std::fmt;
use std::ops::Range;

use slotmap::SlotMap;

use crate::data_model::Status;

slotmap::new_key_type! {
    pub struct ListenerKey;
    pub struct ObserverKey;
}

/// The keys and indexes a list change removed and added.
///
/// Removed indexes refer to the list before the change, added indexes to the list after it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryUpdate<K> {
    pub removed: Vec<K>,
    pub removed_indexes: Vec<usize>,
    pub added: Vec<K>,
    pub added_indexes: Vec<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryEvent<K> {
    Updated(QueryUpdate<K>),
    /// A batch of ids has been written into the list.
    IdsLoaded,
    Reset,
    StatusChanged { old: Status, new: Status },
    LengthChanged { old: Option<usize>, new: Option<usize> },
}

type Listener<K> = Box<dyn FnMut(ListenerKey, &QueryEvent<K>)>;

struct RangeObserver {
    range: Range<usize>,
    callback: Box<dyn FnMut(Range<usize>)>,
}

pub(crate) struct Observers<K> {
    listeners: SlotMap<ListenerKey, Listener<K>>,
    ranges: SlotMap<ObserverKey, RangeObserver>,
}

impl<K> Default for Observers<K> {
    fn default() -> Self {
        Self {
            listeners: SlotMap::with_key(),
            ranges: SlotMap::with_key(),
        }
    }
}

impl<K> fmt::Debug for Observers<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("listeners", &self.listeners.len())
            .field("ranges", &self.observed_ranges().collect::<Vec<_>>())
            .finish()
    }
}

impl<K> Observers<K> {
    pub(crate) fn register_listener(
        &mut self,
        listener: impl FnMut(ListenerKey, &QueryEvent<K>) + 'static,
    ) -> ListenerKey {
        self.listeners.insert(Box::new(listener))
    }

    pub(crate) fn unregister_listener(&mut self, key: ListenerKey) {
        self.listeners.remove(key);
    }

    pub(crate) fn fire(&mut self, event: QueryEvent<K>) {
        for (key, listener) in self.listeners.iter_mut() {
            listener(key, &event);
        }
    }

    pub(crate) fn add_range_observer(
        &mut self,
        range: Range<usize>,
        callback: impl FnMut(Range<usize>) + 'static,
    ) -> ObserverKey {
        self.ranges.insert(RangeObserver {
            range,
            callback: Box::new(callback),
        })
    }

    pub(crate) fn remove_range_observer(&mut self, key: ObserverKey) {
        self.ranges.remove(key);
    }

    pub(crate) fn observed_ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        self.ranges.values().map(|observer| observer.range.clone())
    }

    /// True if anything at all is watching the query.
    pub(crate) fn is_observed(&self) -> bool {
        !self.listeners.is_empty() || !self.ranges.is_empty()
    }

    /// Tells every observer whose range intersects `changed` about it.
    pub(crate) fn range_did_change(&mut self, changed: Range<usize>) {
        for observer in self.ranges.values_mut() {
            if intersects(&observer.range, &changed) {
                (observer.callback)(changed.clone());
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.listeners.clear();
        self.ranges.clear();
    }
}

/// Whether two half-open ranges overlap. Empty ranges overlap nothing.
pub(crate) fn intersects(a: &Range<usize>, b: &Range<usize>) -> bool {
    if a.start < b.start {
        b.start < a.end && b.start < b.end
    } else {
        a.start < b.end && a.start < a.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_intersects() {
        assert!(intersects(&(0..10), &(5..6)));
        assert!(intersects(&(5..6), &(0..10)));
        assert!(!intersects(&(0..10), &(10..20)));
        assert!(!intersects(&(10..20), &(0..10)));
        assert!(!intersects(&(0..10), &(3..3)));
    }

    #[test]
    fn test_range_observers_only_see_overlapping_changes() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut observers: Observers<String> = Observers::default();
        let log = Rc::clone(&seen);
        let key = observers.add_range_observer(10..20, move |range| log.borrow_mut().push(range));

        observers.range_did_change(0..5);
        observers.range_did_change(15..30);
        assert_eq!(*seen.borrow(), vec![15..30]);

        observers.remove_range_observer(key);
        observers.range_did_change(0..100);
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn test_listeners_receive_their_own_key() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut observers: Observers<String> = Observers::default();
        let log = Rc::clone(&seen);
        let key = observers.register_listener(move |key, event| {
            log.borrow_mut().push((key, event.clone()));
        });
        observers.fire(QueryEvent::Reset);
        assert_eq!(*seen.borrow(), vec![(key, QueryEvent::Reset)]);

        observers.unregister_listener(key);
        assert!(!observers.is_observed());
    }
}
