//! Tree reconciler
//!
//! Decides, for each incoming visit, whether it attaches to an existing
//! tree, starts a new one, or must wait for a parent that hasn't arrived
//! yet. The deferral table is the only mutable state owned directly by the
//! reconciler; everything else is read from the structured store.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::ids::tree_id_for_root;
use crate::model::{OrphanEntry, PageSession, Visit};
use crate::storage::Storage;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
}

/// What the reconciler decided for a single visit.
#[derive(Debug, Clone)]
pub enum Placement {
    Attach {
        parent: PageSession,
        tree_id: String,
    },
    NewRoot {
        tree_id: String,
    },
    Deferred,
}

pub struct Reconciler {
    storage: Arc<Storage>,
    deferred: Mutex<Vec<OrphanEntry>>,
}

impl Reconciler {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            deferred: Mutex::new(Vec::new()),
        }
    }

    /// Apply the tab/opener/referrer placement policy. Pure read of the
    /// structured store; does not touch the deferral table.
    pub fn decide(&self, visit: &Visit) -> Result<Placement, ReconcileError> {
        if let Some(parent) = self.storage.most_recent_in_tab(&visit.tab_id)? {
            return Ok(Placement::Attach {
                tree_id: parent.tree_id.clone(),
                parent,
            });
        }

        if let Some(opener) = &visit.opener_tab_id {
            if let Some(parent) = self.storage.most_recent_in_tab(opener)? {
                return Ok(Placement::Attach {
                    tree_id: parent.tree_id.clone(),
                    parent,
                });
            }
        }

        if let Some(parent) = self.storage.most_recent_in_group(&visit.group_id)? {
            return Ok(Placement::Attach {
                tree_id: parent.tree_id.clone(),
                parent,
            });
        }

        if visit.opener_tab_id.is_some() {
            return Ok(Placement::Deferred);
        }

        Ok(Placement::NewRoot {
            tree_id: tree_id_for_root(&visit.id),
        })
    }

    /// Number of `PageSession`s already persisted in `group_id`, for the
    /// classifier's `tab_group_size` rule input. Pure read, same as `decide`.
    pub fn count_in_group(&self, group_id: &str) -> Result<usize, ReconcileError> {
        Ok(self.storage.count_in_group(group_id)?)
    }

    /// Insert a freshly-deferred visit into the deferral table.
    pub async fn defer(&self, visit: Visit, now: DateTime<Utc>) {
        let expected_parent_tab_id = visit
            .opener_tab_id
            .clone()
            .unwrap_or_else(|| visit.tab_id.clone());
        self.deferred.lock().await.push(OrphanEntry {
            visit,
            expected_parent_tab_id,
            first_seen_at: now,
            retry_count: 0,
        });
    }

    /// Put an already-tracked orphan back (used by the retry timer when a
    /// re-offer falls into rule 4 again).
    pub async fn reinsert(&self, entry: OrphanEntry) {
        self.deferred.lock().await.push(entry);
    }

    /// Remove and return every deferred entry expecting a parent in
    /// `tab_id`, in the order they were deferred. Called after a visit is
    /// attached or rooted, to drive the reconnection cascade.
    pub async fn take_cascade_candidates(&self, tab_id: &str) -> Vec<OrphanEntry> {
        let mut table = self.deferred.lock().await;
        let (matched, rest): (Vec<_>, Vec<_>) = table
            .drain(..)
            .partition(|o| o.expected_parent_tab_id == tab_id);
        *table = rest;
        matched
    }

    /// Drain the whole table for the retry timer's sweep.
    pub async fn take_all(&self) -> Vec<OrphanEntry> {
        self.deferred.lock().await.drain(..).collect()
    }

    pub async fn pending_count(&self) -> usize {
        self.deferred.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ClassifierDecision;
    use crate::model::Classification;

    fn visit(id: &str, tab_id: &str, opener: Option<&str>) -> Visit {
        Visit {
            id: id.to_string(),
            url: "https://example.com".to_string(),
            page_loaded_at: Utc::now(),
            tab_id: tab_id.to_string(),
            opener_tab_id: opener.map(str::to_string),
            group_id: "g1".to_string(),
            referrer_url: None,
            referrer_timestamp: None,
            raw_content: String::new(),
            title: String::new(),
        }
    }

    fn reconciler() -> Reconciler {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(&dir.path().join("test.db")).unwrap());
        Reconciler::new(storage)
    }

    #[test]
    fn first_visit_in_a_tab_is_a_new_root() {
        let r = reconciler();
        let placement = r.decide(&visit("v1", "tab1", None)).unwrap();
        assert!(matches!(placement, Placement::NewRoot { .. }));
    }

    #[test]
    fn visit_without_opener_and_no_prior_pages_defers_only_if_opener_set() {
        let r = reconciler();
        // No opener_tab_id: falls through to new root, never defers.
        let placement = r.decide(&visit("v1", "tab1", None)).unwrap();
        assert!(matches!(placement, Placement::NewRoot { .. }));
    }

    #[test]
    fn visit_with_absent_opener_parent_defers() {
        let r = reconciler();
        let placement = r.decide(&visit("v1", "tab1", Some("tab-missing"))).unwrap();
        assert!(matches!(placement, Placement::Deferred));
    }

    #[tokio::test]
    async fn cascade_candidates_are_removed_and_returned() {
        let r = reconciler();
        r.defer(visit("child", "tab2", Some("tab1")), Utc::now()).await;
        assert_eq!(r.pending_count().await, 1);

        let candidates = r.take_cascade_candidates("tab1").await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].visit.id, "child");
        assert_eq!(r.pending_count().await, 0);
    }

    #[test]
    fn attaches_to_most_recent_page_in_same_tab() {
        let r = reconciler();
        let decision = ClassifierDecision {
            should_process: true,
            page_type: Classification::Knowledge,
            confidence: 0.9,
            reasoning: "x".to_string(),
        };
        let v1 = visit("v1", "tab1", None);
        let page = PageSession::new(&v1, tree_id_for_root(&v1.id), None, &decision, Utc::now());
        r.storage
            .insert_tree(&crate::model::Tree {
                tree_id: page.tree_id.clone(),
                root_page_id: page.id.clone(),
            })
            .unwrap();
        r.storage.insert_page_session(&page).unwrap();

        let placement = r.decide(&visit("v2", "tab1", None)).unwrap();
        match placement {
            Placement::Attach { parent, tree_id } => {
                assert_eq!(parent.id, "v1");
                assert_eq!(tree_id, page.tree_id);
            }
            other => panic!("expected attach, got {other:?}"),
        }
    }
}
