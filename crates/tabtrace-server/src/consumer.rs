//! Consumer and orphan-retry cooperative tasks
//!
//! The consumer owns the only `VisitQueueReceiver` and drains it serially,
//! handing each visit to the engine. The retry timer runs independently on
//! its own interval; both end up calling into the same reconciler lock, but
//! never block each other beyond that lock's critical section.

use std::sync::Arc;
use std::time::Duration;

use tabtrace_core::engine::Engine;
use tabtrace_core::queue::VisitQueueReceiver;

/// Drain `rx` until the channel closes, processing one visit at a time.
/// A single visit's failure is logged and does not stop the loop: nothing
/// here is allowed to crash the process.
pub async fn run(engine: Arc<Engine>, mut rx: VisitQueueReceiver) {
    while let Some(visit) = rx.recv().await {
        let visit_id = visit.id.clone();
        match engine.process(visit).await {
            Ok(Some(page)) => {
                tracing::debug!(visit_id = %visit_id, page_id = %page.id, should_process = page.should_process, "visit processed");
            }
            Ok(None) => {
                tracing::debug!(visit_id = %visit_id, "visit deferred as an orphan");
            }
            Err(e) => {
                tracing::error!(visit_id = %visit_id, error = %e, "visit processing failed");
            }
        }
    }
    tracing::info!("consumer loop exiting: queue closed");
}

/// Sweep the orphan deferral table every `interval`, dropping expired or
/// exhausted entries and re-offering the rest.
pub async fn run_retry_timer(
    engine: Arc<Engine>,
    interval: Duration,
    max_orphan_age_secs: i64,
    max_orphan_retries: u32,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let now = chrono::Utc::now();
        if let Err(e) = engine
            .run_retry_sweep(now, max_orphan_age_secs, max_orphan_retries)
            .await
        {
            tracing::error!(error = %e, "orphan retry sweep failed");
        }
    }
}
