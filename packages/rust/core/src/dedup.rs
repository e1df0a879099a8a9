//! Consumer side of the pipeline: batch lookup, reconciliation and
//! persistence of enriched castles.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use castlefinder_shared::{Castle, CastleFinderError, Result};
use castlefinder_storage::Storage;

use crate::executor::PipelineStreams;
use crate::reconcile::{is_probably, reconcile};

/// Where reconciled castles are looked up and saved.
#[async_trait]
pub trait CastleStore: Send + Sync {
    /// Stored castles that may match any castle of `batch`. A superset:
    /// false positives are expected.
    async fn find_similar(&self, batch: &[Castle]) -> Result<Vec<Castle>>;

    /// Upsert `castles`, returning how many rows were written.
    async fn save_castles(&self, castles: &[Castle]) -> Result<usize>;
}

#[async_trait]
impl CastleStore for Storage {
    async fn find_similar(&self, batch: &[Castle]) -> Result<Vec<Castle>> {
        Storage::find_similar(self, batch).await
    }

    async fn save_castles(&self, castles: &[Castle]) -> Result<usize> {
        Storage::save_castles(self, castles).await
    }
}

/// Progress callback for a consuming run.
pub trait ConsumeProgress: Send + Sync {
    /// A castle came out of the pipeline.
    fn castle_enriched(&self, castle: &Castle, enriched: usize);
    /// A candidate or listing failed.
    fn failed(&self, error: &CastleFinderError, errors: usize);
    /// A batch was reconciled and saved.
    fn batch_saved(&self, report: &BatchReport, saved: usize);
}

/// No-op progress for headless runs and tests.
pub struct SilentProgress;

impl ConsumeProgress for SilentProgress {
    fn castle_enriched(&self, _castle: &Castle, _enriched: usize) {}
    fn failed(&self, _error: &CastleFinderError, _errors: usize) {}
    fn batch_saved(&self, _report: &BatchReport, _saved: usize) {}
}

/// Outcome of one persisted batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Rows written.
    pub saved: usize,
    /// Castles folded into a stored record before saving.
    pub reconciled: usize,
}

/// Totals for a consuming run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeSummary {
    pub enriched: usize,
    pub errors: usize,
    pub saved: usize,
    pub reconciled: usize,
    pub batches: usize,
    /// The run stopped on cancellation before the streams ended.
    pub cancelled: bool,
}

/// Fold each castle of `batch` into the first of `found` it probably is.
///
/// The scan is first-match in `found` order. Castles without a match are
/// returned unchanged. The second value counts reconciled castles.
pub fn reconcile_batch(batch: &[Castle], found: &[Castle]) -> (Vec<Castle>, usize) {
    let mut reconciled = 0;
    let castles = batch
        .iter()
        .map(|castle| {
            let Some(existing) = found.iter().find(|f| is_probably(castle, f)) else {
                return castle.clone();
            };
            match reconcile(castle, existing) {
                Ok(merged) => {
                    info!(
                        name = %castle.name,
                        found = %existing.name,
                        country = %castle.country,
                        "found similar castle"
                    );
                    reconciled += 1;
                    merged
                }
                Err(_) => castle.clone(),
            }
        })
        .collect();
    (castles, reconciled)
}

/// Look up, reconcile and save one batch.
#[instrument(skip_all, fields(batch = batch.len()))]
pub async fn persist_batch(store: &dyn CastleStore, batch: &[Castle]) -> Result<BatchReport> {
    if batch.is_empty() {
        return Ok(BatchReport::default());
    }

    let found = store.find_similar(batch).await?;
    debug!(found = found.len(), "similar castles found");

    let (castles, reconciled) = reconcile_batch(batch, &found);
    let saved = store.save_castles(&castles).await?;
    Ok(BatchReport { saved, reconciled })
}

/// Drain `streams`, persisting castles in batches of `batch_size`.
///
/// Per-item errors are logged and counted. The remainder is flushed when
/// the streams end. On cancellation the buffered castles are dropped and
/// the summary is returned as is. Storage failures end the run.
#[instrument(skip_all, fields(batch_size = batch_size))]
pub async fn consume(
    streams: PipelineStreams,
    store: &dyn CastleStore,
    batch_size: usize,
    cancel: &CancellationToken,
    progress: &dyn ConsumeProgress,
) -> Result<ConsumeSummary> {
    let batch_size = batch_size.max(1);
    let PipelineStreams {
        mut castles,
        mut errors,
    } = streams;

    let mut summary = ConsumeSummary::default();
    let mut buffer: Vec<Castle> = Vec::with_capacity(batch_size);
    let (mut castles_open, mut errors_open) = (true, true);

    while castles_open || errors_open {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(buffered = buffer.len(), "consumer cancelled");
                summary.cancelled = true;
                return Ok(summary);
            }
            castle = castles.recv(), if castles_open => match castle {
                Some(castle) => {
                    summary.enriched += 1;
                    progress.castle_enriched(&castle, summary.enriched);
                    buffer.push(castle);
                    if buffer.len() >= batch_size {
                        flush(store, &mut buffer, &mut summary, progress).await?;
                    }
                }
                None => castles_open = false,
            },
            err = errors.recv(), if errors_open => match err {
                Some(err) => {
                    summary.errors += 1;
                    warn!(error = %err, "error enriching castles");
                    progress.failed(&err, summary.errors);
                }
                None => errors_open = false,
            },
        }
    }

    flush(store, &mut buffer, &mut summary, progress).await?;
    info!(
        enriched = summary.enriched,
        errors = summary.errors,
        saved = summary.saved,
        reconciled = summary.reconciled,
        "consumer finished"
    );
    Ok(summary)
}

async fn flush(
    store: &dyn CastleStore,
    buffer: &mut Vec<Castle>,
    summary: &mut ConsumeSummary,
    progress: &dyn ConsumeProgress,
) -> Result<()> {
    if buffer.is_empty() {
        return Ok(());
    }
    let report = persist_batch(store, buffer).await?;
    buffer.clear();

    summary.batches += 1;
    summary.saved += report.saved;
    summary.reconciled += report.reconciled;
    progress.batch_saved(&report, summary.saved);
    Ok(())
}
