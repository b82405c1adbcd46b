//! Session catalog.
//!
//! Tracks the imported corpora and the currently selected one, and persists
//! lightweight per-corpus UI state (owner selection, last time filter). The
//! selection lives in the `app_state` table so it survives restarts; delete
//! is transactional with corpus removal.

use tracing::info;

use crate::analytics::TimeFilter;
use crate::error::Result;
use crate::store::corpus::{CorpusId, CorpusMeta};
use crate::store::Store;

const SELECTED_KEY: &str = "selected_corpus";

/// Catalog view over a store connection.
pub struct SessionCatalog<'a> {
    store: &'a Store,
}

impl<'a> SessionCatalog<'a> {
    /// Wraps a store.
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// All corpora, most recent first.
    pub fn list(&self) -> Result<Vec<CorpusMeta>> {
        self.store.list_corpora()
    }

    /// Marks a corpus as selected.
    ///
    /// # Errors
    ///
    /// [`crate::ChatlensError::CorpusNotFound`] when the corpus does not
    /// exist.
    pub fn select(&self, corpus: CorpusId) -> Result<()> {
        self.store.get_corpus(corpus)?;
        self.store
            .app_state_set(SELECTED_KEY, Some(&corpus.to_string()))?;
        info!(corpus, "corpus selected");
        Ok(())
    }

    /// The selected corpus, if it still exists.
    pub fn selected(&self) -> Result<Option<CorpusMeta>> {
        let Some(raw) = self.store.app_state_get(SELECTED_KEY)? else {
            return Ok(None);
        };
        let Ok(id) = raw.parse::<CorpusId>() else {
            // Stale or corrupt state entry; drop it.
            self.store.app_state_set(SELECTED_KEY, None)?;
            return Ok(None);
        };
        match self.store.get_corpus(id) {
            Ok(meta) => Ok(Some(meta)),
            Err(_) => {
                self.store.app_state_set(SELECTED_KEY, None)?;
                Ok(None)
            }
        }
    }

    /// Deletes a corpus and clears the selection if it pointed there.
    pub fn delete(&self, corpus: CorpusId) -> Result<()> {
        self.store.delete_corpus(corpus)?;
        if let Some(raw) = self.store.app_state_get(SELECTED_KEY)? {
            if raw.parse::<CorpusId>() == Ok(corpus) {
                self.store.app_state_set(SELECTED_KEY, None)?;
            }
        }
        info!(corpus, "corpus deleted");
        Ok(())
    }

    /// Sets or clears the corpus owner by member platform id.
    pub fn set_owner(&self, corpus: CorpusId, platform_id: Option<&str>) -> Result<()> {
        self.store.set_owner(corpus, platform_id)
    }

    /// Persists the last time filter used for a corpus.
    pub fn remember_filter(&self, corpus: CorpusId, filter: &TimeFilter) -> Result<()> {
        self.store
            .remember_filter(corpus, filter.start_ts, filter.end_ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ChatKind;

    fn catalog_store() -> Store {
        Store::open_in_memory().unwrap()
    }

    #[test]
    fn test_select_and_selected() {
        let store = catalog_store();
        let catalog = SessionCatalog::new(&store);
        assert!(catalog.selected().unwrap().is_none());

        let corpus = store
            .create_corpus("c", "line", ChatKind::Group, 0)
            .unwrap();
        catalog.select(corpus).unwrap();
        assert_eq!(catalog.selected().unwrap().unwrap().id, corpus);
    }

    #[test]
    fn test_select_missing_corpus_fails() {
        let store = catalog_store();
        let catalog = SessionCatalog::new(&store);
        assert!(catalog.select(42).is_err());
    }

    #[test]
    fn test_delete_clears_selection() {
        let store = catalog_store();
        let catalog = SessionCatalog::new(&store);
        let corpus = store
            .create_corpus("c", "line", ChatKind::Group, 0)
            .unwrap();
        catalog.select(corpus).unwrap();
        catalog.delete(corpus).unwrap();
        assert!(catalog.selected().unwrap().is_none());
        assert!(catalog.list().unwrap().is_empty());
    }

    #[test]
    fn test_delete_keeps_unrelated_selection() {
        let store = catalog_store();
        let catalog = SessionCatalog::new(&store);
        let keep = store
            .create_corpus("keep", "line", ChatKind::Group, 0)
            .unwrap();
        let drop = store
            .create_corpus("drop", "qq", ChatKind::Private, 0)
            .unwrap();
        catalog.select(keep).unwrap();
        catalog.delete(drop).unwrap();
        assert_eq!(catalog.selected().unwrap().unwrap().id, keep);
    }

    #[test]
    fn test_stale_selection_cleared_lazily() {
        let store = catalog_store();
        let catalog = SessionCatalog::new(&store);
        store.app_state_set("selected_corpus", Some("999")).unwrap();
        assert!(catalog.selected().unwrap().is_none());
        assert_eq!(store.app_state_get("selected_corpus").unwrap(), None);
    }

    #[test]
    fn test_remember_filter_round_trip() {
        let store = catalog_store();
        let catalog = SessionCatalog::new(&store);
        let corpus = store
            .create_corpus("c", "line", ChatKind::Group, 0)
            .unwrap();
        catalog
            .remember_filter(corpus, &TimeFilter::between(10, 20))
            .unwrap();
        let meta = store.get_corpus(corpus).unwrap();
        assert_eq!(meta.last_filter_start, Some(10));
        assert_eq!(meta.last_filter_end, Some(20));
    }
}
