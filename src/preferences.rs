//! Stored page-size preferences
//!
//! A listing request without `per_page` falls back to the size last chosen for
//! that entity, then to [`EngineConfig::default_page_size`](crate::config::EngineConfig).

use std::collections::HashMap;
use std::sync::RwLock;

/// Source of remembered page sizes, keyed by entity name
pub trait PagePreferences: Send + Sync {
    fn page_size(&self, entity: &str) -> Option<u32>;
}

/// No stored preferences; every listing uses the configured default
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPreferences;

impl PagePreferences for NoPreferences {
    fn page_size(&self, _entity: &str) -> Option<u32> {
        None
    }
}

/// Process-local preferences
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    sizes: RwLock<HashMap<String, u32>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `size` for `entity`; zero clears the preference
    pub fn set_page_size(&self, entity: impl Into<String>, size: u32) {
        // a poisoned lock still holds a usable map
        let mut sizes = self.sizes.write().unwrap_or_else(|e| e.into_inner());
        let entity = entity.into();
        if size == 0 {
            sizes.remove(&entity);
        } else {
            sizes.insert(entity, size);
        }
    }
}

impl PagePreferences for MemoryPreferences {
    fn page_size(&self, entity: &str) -> Option<u32> {
        let sizes = self.sizes.read().unwrap_or_else(|e| e.into_inner());
        sizes.get(entity).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_preferences() {
        assert_eq!(NoPreferences.page_size("books"), None);
    }

    #[test]
    fn test_memory_preferences() {
        let prefs = MemoryPreferences::new();
        prefs.set_page_size("books", 100);
        assert_eq!(prefs.page_size("books"), Some(100));
        assert_eq!(prefs.page_size("authors"), None);

        prefs.set_page_size("books", 0);
        assert_eq!(prefs.page_size("books"), None);
    }
}
