//! Consumer-side merge of relay event streams.
//!
//! Relays duplicate and replace events freely, so every view merges
//! deliveries the same way: keyed by event id, replace-in-place on a known
//! id, append otherwise, then re-sort by the domain order key. Delivering
//! the same event any number of times leaves the collection as if it had
//! been delivered once.

/// One merged entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry<T, K> {
    pub id: String,
    pub order: K,
    pub value: T,
}

/// An ordered collection of records keyed by event id.
///
/// `K` is the domain order key: `created_at` for chat streams, the
/// content-supplied date for logbook entries.
#[derive(Debug, Clone)]
pub struct Timeline<T, K> {
    entries: Vec<TimelineEntry<T, K>>,
}

impl<T, K: Ord> Timeline<T, K> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Merge one delivery. Replaces in place when the id is already known
    /// (relay-side replacement semantics), appends otherwise, and keeps the
    /// collection sorted non-decreasingly by order key. The stable sort
    /// preserves arrival order among equal keys.
    pub fn upsert(&mut self, id: impl Into<String>, order: K, value: T) {
        let id = id.into();
        match self.entries.iter_mut().find(|entry| entry.id == id) {
            Some(entry) => {
                entry.order = order;
                entry.value = value;
            }
            None => self.entries.push(TimelineEntry { id, order, value }),
        }
        self.entries.sort_by(|a, b| a.order.cmp(&b.order));
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| &entry.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimelineEntry<T, K>> {
        self.entries.iter()
    }

    /// Values in timeline order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|entry| &entry.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T, K: Ord> Default for Timeline<T, K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_deliveries_are_idempotent() {
        let mut timeline = Timeline::new();
        for _ in 0..5 {
            timeline.upsert("a", 10u64, "first");
        }
        timeline.upsert("b", 5, "second");
        for _ in 0..3 {
            timeline.upsert("b", 5, "second");
        }

        assert_eq!(timeline.len(), 2);
        let values: Vec<_> = timeline.values().copied().collect();
        assert_eq!(values, vec!["second", "first"]);
    }

    #[test]
    fn replacement_updates_in_place() {
        let mut timeline = Timeline::new();
        timeline.upsert("a", 10u64, "old");
        timeline.upsert("a", 20, "new");

        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline.get("a"), Some(&"new"));
        assert_eq!(timeline.iter().next().map(|entry| entry.order), Some(20));
    }

    #[test]
    fn insertion_order_never_breaks_sort_order() {
        let mut timeline = Timeline::new();
        let arrivals = [("c", 30u64), ("a", 10), ("e", 50), ("b", 20), ("d", 40)];
        for (id, created_at) in arrivals {
            timeline.upsert(id, created_at, id);
            // The invariant holds after every insertion, not just at the end.
            let orders: Vec<_> = timeline.iter().map(|entry| entry.order).collect();
            let mut sorted = orders.clone();
            sorted.sort_unstable();
            assert_eq!(orders, sorted);
        }

        let ids: Vec<_> = timeline.values().copied().collect();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn equal_keys_keep_arrival_order() {
        let mut timeline = Timeline::new();
        timeline.upsert("x", 7u64, "x");
        timeline.upsert("y", 7, "y");
        timeline.upsert("z", 7, "z");
        let values: Vec<_> = timeline.values().copied().collect();
        assert_eq!(values, vec!["x", "y", "z"]);
    }

    #[test]
    fn unparseable_dates_sort_first() {
        use chrono::NaiveDate;

        let mut timeline = Timeline::new();
        let may = NaiveDate::from_ymd_opt(2024, 5, 1);
        let march = NaiveDate::from_ymd_opt(2024, 3, 1);
        timeline.upsert("a", may, "may");
        timeline.upsert("b", None::<NaiveDate>, "undated");
        timeline.upsert("c", march, "march");

        let values: Vec<_> = timeline.values().copied().collect();
        assert_eq!(values, vec!["undated", "march", "may"]);
    }
}
