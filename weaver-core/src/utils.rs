//! Utility functions for the container

/// Dependency resolution utilities
pub mod dependency {
    use parking_lot::Mutex;

    /// Tracks beans currently being created to detect circular references.
    ///
    /// The creation chain is kept in insertion order so that error messages
    /// can show the path that led back to the bean.
    #[derive(Debug, Default)]
    pub struct CreationTracker {
        creating: Mutex<Vec<String>>,
    }

    impl CreationTracker {
        /// Creates a new empty creation tracker.
        pub fn new() -> Self {
            Self::default()
        }

        /// Checks if a bean is currently being created.
        pub fn is_creating(&self, name: &str) -> bool {
            self.creating.lock().iter().any(|n| n == name)
        }

        /// Marks a bean as being created.
        ///
        /// Returns `false` if the bean was already in the creating set.
        pub fn start_creating(&self, name: &str) -> bool {
            let mut creating = self.creating.lock();
            if creating.iter().any(|n| n == name) {
                return false;
            }
            creating.push(name.to_string());
            true
        }

        /// Marks a bean as finished being created.
        pub fn finish_creating(&self, name: &str) {
            let mut creating = self.creating.lock();
            if let Some(pos) = creating.iter().rposition(|n| n == name) {
                creating.remove(pos);
            }
        }

        /// Snapshot of the current creation chain, outermost first.
        pub fn current_creating(&self) -> Vec<String> {
            self.creating.lock().clone()
        }

        /// Renders the chain ending in `name`, e.g. `a -> b -> a`.
        pub fn describe_cycle(&self, name: &str) -> String {
            let mut chain = self.current_creating();
            chain.push(name.to_string());
            chain.join(" -> ")
        }
    }

    /// Clears the creation mark when dropped, including on early return.
    pub struct CreationGuard<'a> {
        tracker: &'a CreationTracker,
        name: String,
    }

    impl<'a> CreationGuard<'a> {
        pub fn new(tracker: &'a CreationTracker, name: impl Into<String>) -> Self {
            Self {
                tracker,
                name: name.into(),
            }
        }
    }

    impl Drop for CreationGuard<'_> {
        fn drop(&mut self) {
            self.tracker.finish_creating(&self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::dependency::*;

    #[test]
    fn test_creation_tracker() {
        let tracker = CreationTracker::new();

        assert!(!tracker.is_creating("serviceA"));
        assert!(tracker.start_creating("serviceA"));
        assert!(tracker.is_creating("serviceA"));

        // second start on the same name is a cycle
        assert!(!tracker.start_creating("serviceA"));

        tracker.finish_creating("serviceA");
        assert!(!tracker.is_creating("serviceA"));
    }

    #[test]
    fn test_describe_cycle_keeps_order() {
        let tracker = CreationTracker::new();
        tracker.start_creating("serviceA");
        tracker.start_creating("serviceB");

        assert_eq!(tracker.describe_cycle("serviceA"), "serviceA -> serviceB -> serviceA");
    }

    #[test]
    fn test_guard_clears_on_drop() {
        let tracker = CreationTracker::new();
        tracker.start_creating("serviceA");
        {
            let _guard = CreationGuard::new(&tracker, "serviceA");
        }
        assert!(!tracker.is_creating("serviceA"));
    }
}
