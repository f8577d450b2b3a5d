//! Priority ordered mock storage.

use std::sync::Arc;

use parking_lot::RwLock;

use super::types::Mock;

/// Mocks sorted by ascending priority. Equal priorities keep insertion
/// order. Readers get snapshots, so iteration never observes a concurrent
/// deletion.
#[derive(Debug, Default)]
pub struct MockStore {
    mocks: RwLock<Vec<Arc<Mock>>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&self, mock: Arc<Mock>) {
        let mut mocks = self.mocks.write();
        mocks.push(mock);
        mocks.sort_by_key(|m| m.priority());
    }

    pub fn get(&self, id: &str) -> Option<Arc<Mock>> {
        self.mocks.read().iter().find(|m| m.id() == id).cloned()
    }

    /// Enabled mocks in priority order.
    pub fn get_eligible(&self) -> Vec<Arc<Mock>> {
        self.mocks
            .read()
            .iter()
            .filter(|m| m.is_enabled())
            .cloned()
            .collect()
    }

    pub fn get_all(&self) -> Vec<Arc<Mock>> {
        self.mocks.read().clone()
    }

    pub fn delete(&self, id: &str) -> bool {
        let mut mocks = self.mocks.write();
        let before = mocks.len();
        mocks.retain(|m| m.id() != id);
        mocks.len() != before
    }

    /// Remove every mock tagged with `source`. Returns how many were removed.
    pub fn delete_by_source(&self, source: &str) -> usize {
        let mut mocks = self.mocks.write();
        let before = mocks.len();
        mocks.retain(|m| m.source() != Some(source));
        before - mocks.len()
    }

    /// Remove every mock that came from an external source.
    pub fn delete_external(&self) -> usize {
        let mut mocks = self.mocks.write();
        let before = mocks.len();
        mocks.retain(|m| m.source().is_none());
        before - mocks.len()
    }

    pub fn delete_all(&self) {
        self.mocks.write().clear();
    }

    /// Change a mock's priority and restore ordering.
    pub fn set_priority(&self, id: &str, priority: i64) -> bool {
        let mut mocks = self.mocks.write();
        let Some(mock) = mocks.iter().find(|m| m.id() == id) else {
            return false;
        };
        mock.set_priority(priority);
        mocks.sort_by_key(|m| m.priority());
        true
    }

    pub fn len(&self) -> usize {
        self.mocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.mocks.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::anything;
    use crate::mock::{BuildContext, MockBuilder};
    use crate::reply::StaticReply;

    fn mock(name: &str, priority: i64, source: Option<&str>) -> Arc<Mock> {
        let mut builder = MockBuilder::new()
            .name(name)
            .priority(priority)
            .path_matches(anything())
            .reply(StaticReply::ok());
        if let Some(source) = source {
            builder = builder.source(source);
        }
        Arc::new(builder.build(&BuildContext::default()).unwrap())
    }

    fn names(mocks: &[Arc<Mock>]) -> Vec<String> {
        mocks
            .iter()
            .map(|m| m.name().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_priority_order_is_stable() {
        let store = MockStore::new();
        store.save(mock("c", 5, None));
        store.save(mock("a", 1, None));
        store.save(mock("b", 5, None));
        store.save(mock("first", 0, None));
        assert_eq!(names(&store.get_all()), vec!["first", "a", "c", "b"]);
    }

    #[test]
    fn test_eligible_skips_disabled() {
        let store = MockStore::new();
        let disabled = mock("off", 0, None);
        disabled.disable();
        store.save(disabled.clone());
        store.save(mock("on", 1, None));
        assert_eq!(names(&store.get_eligible()), vec!["on"]);

        disabled.enable();
        assert_eq!(names(&store.get_eligible()), vec!["off", "on"]);
    }

    #[test]
    fn test_delete_variants() {
        let store = MockStore::new();
        let keep = mock("keep", 0, None);
        store.save(keep.clone());
        store.save(mock("file-1", 0, Some("mocks.yaml")));
        store.save(mock("file-2", 0, Some("mocks.yaml")));
        store.save(mock("other", 0, Some("other.yaml")));

        assert_eq!(store.delete_by_source("mocks.yaml"), 2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.delete_external(), 1);
        assert!(store.get(keep.id()).is_some());
        assert!(store.delete(keep.id()));
        assert!(!store.delete(keep.id()));
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshot_survives_deletion() {
        let store = MockStore::new();
        store.save(mock("a", 0, None));
        store.save(mock("b", 0, None));
        let snapshot = store.get_eligible();
        store.delete_all();
        assert_eq!(snapshot.len(), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_set_priority_resorts() {
        let store = MockStore::new();
        store.save(mock("a", 1, None));
        let b = mock("b", 2, None);
        store.save(b.clone());
        assert!(store.set_priority(b.id(), 0));
        assert_eq!(names(&store.get_all()), vec!["b", "a"]);
        assert!(!store.set_priority("missing", 3));
    }
}
