use slab::Slab;

/// Tracks which values were touched since the last flush.
///
/// `use_` stamps a value with the current window and hands back a token
/// for cheap re-stamping. `flush` visits everything the current window
/// never touched and lets the disposer decide whether to drop it.
pub struct SentryTracker<K> {
    entries: Slab<(K, u64)>,
    window: u64,
}

impl<K> Default for SentryTracker<K> {
    fn default() -> Self {
        Self {
            entries: Slab::new(),
            window: 0,
        }
    }
}

impl<K: Clone + PartialEq> SentryTracker<K> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Marks a value in-use, returning its (possibly new) token.
    pub fn use_(&mut self, value: &K, token: Option<usize>) -> usize {
        if let Some(token) = token {
            if let Some(entry) = self.entries.get_mut(token) {
                if entry.0 == *value {
                    entry.1 = self.window;
                    return token;
                }
            }
        }
        self.entries.insert((value.clone(), self.window))
    }

    /// Invokes `dispose` for every entry not used since the previous
    /// flush; entries whose disposer returns true are dropped. Starts a
    /// new tracking window.
    pub fn flush(&mut self, mut dispose: impl FnMut(&K) -> bool) {
        let window = self.window;
        self.entries
            .retain(|_, entry| entry.1 >= window || !dispose(&entry.0));
        self.window += 1;
    }

    pub fn remove(&mut self, token: usize) {
        if self.entries.contains(token) {
            self.entries.remove(token);
        }
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.window = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entries_survive_one_flush() {
        let mut tracker = SentryTracker::default();
        tracker.use_(&"a", None);

        let mut disposed = Vec::new();
        tracker.flush(|k: &&str| {
            disposed.push(*k);
            true
        });
        assert!(disposed.is_empty());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn untouched_entries_are_offered_on_the_next_flush() {
        let mut tracker = SentryTracker::default();
        let a = tracker.use_(&"a", None);
        tracker.use_(&"b", None);

        tracker.flush(|_| true);

        // only "a" stays in use
        tracker.use_(&"a", Some(a));

        let mut disposed = Vec::new();
        tracker.flush(|k: &&str| {
            disposed.push(*k);
            true
        });

        assert_eq!(disposed, ["b"]);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn disposer_can_refuse() {
        let mut tracker = SentryTracker::default();
        tracker.use_(&"keep", None);
        tracker.flush(|_| true);

        // stale, but the disposer says no
        tracker.flush(|_| false);
        assert_eq!(tracker.len(), 1);

        // still offered again later
        let mut seen = 0;
        tracker.flush(|_| {
            seen += 1;
            true
        });
        assert_eq!(seen, 1);
        assert!(tracker.is_empty());
    }

    #[test]
    fn token_reuse_restamps_in_place() {
        let mut tracker = SentryTracker::default();
        let token = tracker.use_(&"a", None);
        let again = tracker.use_(&"a", Some(token));
        assert_eq!(token, again);
        assert_eq!(tracker.len(), 1);
    }
}
