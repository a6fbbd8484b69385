//! Visit processing engine
//!
//! Glues the reconciler, classifier pipeline and write coordinator into the
//! per-visit sequence the consumer task and retry timer both drive:
//! place → (if attached or rooted) classify → persist → cascade
//! reconnection.

use chrono::{DateTime, Utc};

use crate::classifier::{ClassifierError, Pipeline};
use crate::coordinator::{Coordinator, CoordinatorError};
use crate::model::{PageSession, Visit};
use crate::reconciler::{Placement, ReconcileError, Reconciler};

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),
    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),
}

pub struct Engine {
    reconciler: Reconciler,
    classifier: Pipeline,
    coordinator: Coordinator,
}

impl Engine {
    pub fn new(reconciler: Reconciler, classifier: Pipeline, coordinator: Coordinator) -> Self {
        Self {
            reconciler,
            classifier,
            coordinator,
        }
    }

    /// Process a single visit end to end: placement, classification,
    /// persistence, and any reconnection cascade it unblocks. Returns the
    /// persisted page, or `None` if the visit was deferred as an orphan.
    pub async fn process(&self, visit: Visit) -> Result<Option<PageSession>, EngineError> {
        match self.reconciler.decide(&visit)? {
            Placement::Deferred => {
                self.reconciler.defer(visit, Utc::now()).await;
                Ok(None)
            }
            Placement::Attach { parent, tree_id } => {
                let tab_id = visit.tab_id.clone();
                let page = self
                    .classify_and_persist(&visit, tree_id, Some(parent.id))
                    .await?;
                self.cascade(&tab_id).await?;
                Ok(Some(page))
            }
            Placement::NewRoot { tree_id } => {
                let tab_id = visit.tab_id.clone();
                let page = self.classify_and_persist(&visit, tree_id, None).await?;
                self.cascade(&tab_id).await?;
                Ok(Some(page))
            }
        }
    }

    /// Re-offer a visit pulled out of the deferral table (by a cascade or a
    /// retry sweep). Unlike `process`, an attach here may require
    /// overwriting the visit's recorded `group_id` to match its new parent.
    async fn reoffer(&self, visit: Visit) -> Result<ReofferOutcome, EngineError> {
        match self.reconciler.decide(&visit)? {
            Placement::Deferred => Ok(ReofferOutcome::StillDeferred(visit)),
            Placement::Attach { parent, tree_id } => {
                let tab_id = visit.tab_id.clone();
                let reconnect_group = visit.group_id != parent.group_id;
                let mut page = self
                    .classify_and_persist(&visit, tree_id, Some(parent.id))
                    .await?;
                if reconnect_group {
                    self.coordinator.overwrite_group(&page.id, &parent.group_id)?;
                    page.group_id = parent.group_id;
                }
                self.cascade(&tab_id).await?;
                Ok(ReofferOutcome::Placed(page))
            }
            Placement::NewRoot { tree_id } => {
                let tab_id = visit.tab_id.clone();
                let page = self.classify_and_persist(&visit, tree_id, None).await?;
                self.cascade(&tab_id).await?;
                Ok(ReofferOutcome::Placed(page))
            }
        }
    }

    /// Drain every orphan whose expected parent tab is `tab_id`, reconnect
    /// it, and recurse until the cascade runs dry. Reconnection failures
    /// (a re-offer that defers again) are dropped: a cascade candidate was
    /// deferred under a stale expectation and will be picked up again by
    /// the retry timer under its own bookkeeping.
    async fn cascade(&self, tab_id: &str) -> Result<(), EngineError> {
        for orphan in self.reconciler.take_cascade_candidates(tab_id).await {
            if let ReofferOutcome::StillDeferred(visit) = self.reoffer(orphan.visit).await? {
                self.reconciler.defer(visit, Utc::now()).await;
            }
        }
        Ok(())
    }

    async fn classify_and_persist(
        &self,
        visit: &Visit,
        tree_id: String,
        parent_page_id: Option<String>,
    ) -> Result<PageSession, EngineError> {
        let tab_group_size = self.reconciler.count_in_group(&visit.group_id)?;
        let decision = self.classifier.classify(visit, tab_group_size).await?;
        let page = PageSession::new(visit, tree_id, parent_page_id, &decision, Utc::now());
        self.coordinator.persist(visit, &page).await?;
        Ok(page)
    }

    /// One retry-timer sweep: drop expired or exhausted orphans, re-offer
    /// the rest.
    pub async fn run_retry_sweep(
        &self,
        now: DateTime<Utc>,
        max_orphan_age_secs: i64,
        max_orphan_retries: u32,
    ) -> Result<(), EngineError> {
        for mut entry in self.reconciler.take_all().await {
            let age = (now - entry.first_seen_at).num_seconds();
            if age > max_orphan_age_secs {
                tracing::info!(visit_id = %entry.visit.id, age_secs = age, "dropping expired orphan");
                continue;
            }
            if entry.retry_count >= max_orphan_retries {
                tracing::info!(visit_id = %entry.visit.id, retries = entry.retry_count, "dropping exhausted orphan");
                continue;
            }
            entry.retry_count += 1;

            match self.reoffer(entry.visit).await? {
                ReofferOutcome::StillDeferred(visit) => {
                    entry.visit = visit;
                    self.reconciler.reinsert(entry).await;
                }
                ReofferOutcome::Placed(_) => {}
            }
        }
        Ok(())
    }

    pub async fn pending_orphans(&self) -> usize {
        self.reconciler.pending_count().await
    }
}

enum ReofferOutcome {
    Placed(PageSession),
    StillDeferred(Visit),
}
