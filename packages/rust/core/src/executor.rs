//! Collection tasks and the extraction worker pool.
//!
//! ```text
//! adapter ─┐                               ┌─ worker ─┐
//! adapter ─┼─ merge ─► candidates ─► shared ├─ worker ─┼─ merge ─► castles
//! adapter ─┘                               └─ worker ─┘
//!        (collection errors and extraction errors merged separately)
//! ```
//!
//! Every send races the cancellation token, and every channel is owned by
//! exactly one task or merge, so all outputs close once the work drains or
//! the run is cancelled.

use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use castlefinder_shared::{Castle, CastleFinderError, PipelineConfig, Result};
use castlefinder_sources::{CandidateSink, CastleSource, SourceRegistry};

use crate::fanin;

/// Output of the collection stage.
#[derive(Debug)]
pub struct CollectStreams {
    /// Bare candidates from every adapter, interleaved.
    pub candidates: mpsc::Receiver<Castle>,
    /// Listing failures from every adapter.
    pub errors: mpsc::Receiver<CastleFinderError>,
}

/// Output of a full pipeline run.
#[derive(Debug)]
pub struct PipelineStreams {
    /// Enriched castles, in no particular order.
    pub castles: mpsc::Receiver<Castle>,
    /// Collection and extraction failures. Cancellation never appears here.
    pub errors: mpsc::Receiver<CastleFinderError>,
}

/// Runs the adapters of a [`SourceRegistry`] with bounded concurrency.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<SourceRegistry>,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(registry: SourceRegistry, config: PipelineConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Collect candidates from every adapter and enrich them.
    ///
    /// Both returned streams close once every adapter finished listing and
    /// every candidate was enriched or failed, or as soon as `cancel` fires.
    #[instrument(skip_all, fields(
        adapters = self.registry.len(),
        collection_workers = self.config.collection_workers,
        extraction_workers = self.config.extraction_workers,
    ))]
    pub fn run(&self, cancel: &CancellationToken) -> PipelineStreams {
        info!("starting enrichment pipeline");
        let collected = self.collect(cancel);
        let extracted = self.extract(cancel, collected.candidates);
        let errors = fanin::merge(
            cancel,
            vec![collected.errors, extracted.errors],
            self.config.channel_capacity,
        );
        PipelineStreams {
            castles: extracted.castles,
            errors,
        }
    }

    /// Start one collection task per adapter. At most
    /// `collection_workers` adapters list at the same time.
    pub fn collect(&self, cancel: &CancellationToken) -> CollectStreams {
        let capacity = self.config.channel_capacity;
        let permits = Arc::new(Semaphore::new(self.config.collection_workers.max(1)));

        let mut candidate_streams = Vec::new();
        let mut error_streams = Vec::new();
        for adapter in self.registry.adapters() {
            let (sink, candidates, errors) = CandidateSink::channel(cancel.clone(), capacity);
            candidate_streams.push(candidates);
            error_streams.push(errors);
            tokio::spawn(collect_one(adapter, sink, cancel.clone(), permits.clone()));
        }

        CollectStreams {
            candidates: fanin::merge(cancel, candidate_streams, capacity),
            errors: fanin::merge(cancel, error_streams, capacity),
        }
    }

    /// Start `extraction_workers` workers pulling from `candidates` and
    /// dispatching each one to the adapter named by its source tag.
    pub fn extract(
        &self,
        cancel: &CancellationToken,
        candidates: mpsc::Receiver<Castle>,
    ) -> PipelineStreams {
        let capacity = self.config.channel_capacity;
        let candidates = Arc::new(Mutex::new(candidates));

        let mut castle_streams = Vec::new();
        let mut error_streams = Vec::new();
        for worker in 0..self.config.extraction_workers.max(1) {
            let (castle_tx, castle_rx) = mpsc::channel(capacity.max(1));
            let (error_tx, error_rx) = mpsc::channel(capacity.max(1));
            castle_streams.push(castle_rx);
            error_streams.push(error_rx);

            let registry = self.registry.clone();
            let candidates = candidates.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                extraction_worker(worker, registry, candidates, castle_tx, error_tx, cancel).await;
            });
        }

        PipelineStreams {
            castles: fanin::merge(cancel, castle_streams, capacity),
            errors: fanin::merge(cancel, error_streams, capacity),
        }
    }
}

async fn collect_one(
    adapter: Arc<dyn CastleSource>,
    sink: CandidateSink,
    cancel: CancellationToken,
    permits: Arc<Semaphore>,
) {
    let source = adapter.source();
    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        permit = permits.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
    };

    debug!(%source, "collecting candidates");
    tokio::select! {
        biased;
        _ = cancel.cancelled() => debug!(%source, "collection cancelled"),
        _ = adapter.collect(&cancel, &sink) => debug!(%source, "collection finished"),
    }
    // Dropping the sink closes this adapter's streams.
}

async fn extraction_worker(
    worker: usize,
    registry: Arc<SourceRegistry>,
    candidates: Arc<Mutex<mpsc::Receiver<Castle>>>,
    castles: mpsc::Sender<Castle>,
    errors: mpsc::Sender<CastleFinderError>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            candidate = async { candidates.lock().await.recv().await } => candidate,
        };
        let Some(candidate) = next else {
            break;
        };

        let link = candidate.current_enrichment_link.clone();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = enrich_one(&registry, &cancel, candidate) => outcome,
        };

        let delivered = match outcome {
            Ok(castle) => {
                debug!(worker, name = %castle.name, country = %castle.country, "castle enriched");
                send(&cancel, &castles, castle).await
            }
            Err(e) if e.is_cancelled() => break,
            Err(e) => {
                debug!(worker, %link, error = %e, "enrichment failed");
                send(&cancel, &errors, e).await
            }
        };
        if !delivered {
            break;
        }
    }
    debug!(worker, "extraction worker done");
}

/// Route `candidate` to its adapter. An enrichment that loses the name is
/// reported as a parse error rather than passed on.
async fn enrich_one(
    registry: &SourceRegistry,
    cancel: &CancellationToken,
    candidate: Castle,
) -> Result<Castle> {
    let source = candidate.current_enrichment_source.ok_or_else(|| {
        CastleFinderError::UnknownSource(format!("<untagged candidate [{}]>", candidate.name))
    })?;
    let adapter = registry
        .get(source)
        .ok_or_else(|| CastleFinderError::UnknownSource(source.to_string()))?;

    let link = candidate.current_enrichment_link.clone();
    let castle = adapter.enrich(cancel, candidate).await?;
    if castle.name.trim().is_empty() {
        return Err(CastleFinderError::parse(format!(
            "enrichment of [{link}] by {source} produced a castle without a name"
        )));
    }
    Ok(castle)
}

/// Send unless cancelled first. Returns `false` when the item was not
/// delivered and the caller should stop.
async fn send<T>(cancel: &CancellationToken, tx: &mpsc::Sender<T>, item: T) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use castlefinder_shared::{Country, PipelineSettings, Source};

    use super::*;

    /// Adapter with a fixed listing; enrichment appends the source tag to
    /// the city, or fails for names starting with `broken`.
    struct Scripted {
        source: Source,
        country: Country,
        names: Vec<String>,
        listing_error: bool,
        enrich_delay: Duration,
        enriched: AtomicUsize,
    }

    impl Scripted {
        fn new(source: Source, country: Country, names: &[&str]) -> Self {
            Self {
                source,
                country,
                names: names.iter().map(|n| n.to_string()).collect(),
                listing_error: false,
                enrich_delay: Duration::ZERO,
                enriched: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CastleSource for Scripted {
        fn source(&self) -> Source {
            self.source
        }

        async fn collect(&self, _cancel: &CancellationToken, sink: &CandidateSink) {
            if self.listing_error {
                sink.error(CastleFinderError::fetch("https://listing", "HTTP 500"))
                    .await;
            }
            for name in &self.names {
                let link = format!("https://{}/{name}", self.source);
                if !sink
                    .candidate(Castle::candidate(name.as_str(), self.country, self.source, link))
                    .await
                {
                    return;
                }
            }
        }

        async fn enrich(&self, cancel: &CancellationToken, candidate: Castle) -> Result<Castle> {
            if !self.enrich_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(CastleFinderError::Cancelled),
                    _ = tokio::time::sleep(self.enrich_delay) => {}
                }
            }
            self.enriched.fetch_add(1, Ordering::SeqCst);
            if candidate.name.starts_with("broken") {
                return Err(CastleFinderError::parse(format!(
                    "no detail table for [{}]",
                    candidate.name
                )));
            }
            let mut castle = candidate;
            castle.city = self.source.to_string();
            let link = castle.current_enrichment_link.clone();
            castle.add_source(link);
            Ok(castle)
        }
    }

    fn config(collection: usize, extraction: usize) -> PipelineConfig {
        let settings = PipelineSettings {
            collection_workers: Some(collection),
            extraction_workers: Some(extraction),
            channel_capacity: 1,
            ..PipelineSettings::default()
        };
        PipelineConfig::from_parallelism(1, &settings)
    }

    async fn drain(streams: PipelineStreams) -> (Vec<Castle>, Vec<CastleFinderError>) {
        let PipelineStreams {
            mut castles,
            mut errors,
        } = streams;
        let (mut out, mut errs) = (Vec::new(), Vec::new());
        let (mut castles_open, mut errors_open) = (true, true);
        while castles_open || errors_open {
            tokio::select! {
                c = castles.recv(), if castles_open => match c {
                    Some(c) => out.push(c),
                    None => castles_open = false,
                },
                e = errors.recv(), if errors_open => match e {
                    Some(e) => errs.push(e),
                    None => errors_open = false,
                },
            }
        }
        (out, errs)
    }

    fn registry(adapters: Vec<Scripted>) -> SourceRegistry {
        let mut registry = SourceRegistry::new();
        for adapter in adapters {
            registry.register(Arc::new(adapter));
        }
        registry
    }

    fn three_sites() -> Vec<Scripted> {
        vec![
            Scripted::new(
                Source::CastelosDePortugal,
                Country::Portugal,
                &["guimaraes", "braga", "leiria", "obidos"],
            ),
            Scripted::new(Source::HeritageIreland, Country::Ireland, &["trim"]),
            Scripted::new(Source::MedievalBritain, Country::Uk, &["windsor", "alnwick"]),
        ]
    }

    #[tokio::test]
    async fn every_candidate_is_enriched_by_its_own_adapter() {
        for (collection, extraction) in [(1, 1), (1, 4), (3, 2), (8, 16)] {
            let orchestrator =
                Orchestrator::new(registry(three_sites()), config(collection, extraction));

            let (castles, errors) = drain(orchestrator.run(&CancellationToken::new())).await;
            assert!(errors.is_empty(), "{errors:?}");
            assert_eq!(castles.len(), 7);
            for castle in &castles {
                let source = castle.current_enrichment_source.unwrap();
                assert_eq!(castle.city, source.to_string());
                assert_eq!(castle.sources.len(), 1);
            }
            let names: HashSet<&str> = castles.iter().map(|c| c.name.as_str()).collect();
            assert_eq!(names.len(), 7);
        }
    }

    #[tokio::test]
    async fn failures_are_reported_and_do_not_stop_the_run() {
        let mut portugal = Scripted::new(
            Source::CastelosDePortugal,
            Country::Portugal,
            &["guimaraes", "broken-1", "braga"],
        );
        portugal.listing_error = true;
        let ireland = Scripted::new(Source::HeritageIreland, Country::Ireland, &["broken-2"]);

        let orchestrator = Orchestrator::new(registry(vec![portugal, ireland]), config(2, 2));
        let (castles, errors) = drain(orchestrator.run(&CancellationToken::new())).await;

        assert_eq!(castles.len(), 2);
        assert_eq!(errors.len(), 3);
        assert_eq!(
            errors
                .iter()
                .filter(|e| matches!(e, CastleFinderError::Fetch { .. }))
                .count(),
            1
        );
        assert_eq!(
            errors
                .iter()
                .filter(|e| matches!(e, CastleFinderError::Parse { .. }))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn candidates_without_an_adapter_are_errors() {
        let orchestrator = Orchestrator::new(SourceRegistry::new(), config(1, 2));
        let cancel = CancellationToken::new();

        let (tx, rx) = mpsc::channel(4);
        tx.send(Castle::candidate(
            "trim",
            Country::Ireland,
            Source::HeritageIreland,
            "https://x/trim",
        ))
        .await
        .unwrap();
        tx.send(Castle::new("untagged", Country::Uk)).await.unwrap();
        drop(tx);

        let (castles, errors) = drain(orchestrator.extract(&cancel, rx)).await;
        assert!(castles.is_empty());
        assert_eq!(errors.len(), 2);
        assert!(
            errors
                .iter()
                .all(|e| matches!(e, CastleFinderError::UnknownSource(_)))
        );
    }

    #[tokio::test]
    async fn no_adapters_closes_immediately() {
        let orchestrator = Orchestrator::new(SourceRegistry::new(), config(1, 3));
        let (castles, errors) = drain(orchestrator.run(&CancellationToken::new())).await;
        assert!(castles.is_empty());
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn cancellation_closes_every_stream() {
        let mut slow = Scripted::new(
            Source::Ebidat,
            Country::Slovakia,
            &["bojnice", "devin", "spis", "trencin", "orava", "beckov"],
        );
        slow.enrich_delay = Duration::from_secs(30);

        let orchestrator = Orchestrator::new(registry(vec![slow]), config(1, 2));
        let cancel = CancellationToken::new();
        let streams = orchestrator.run(&cancel);

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let (castles, errors) = tokio::time::timeout(Duration::from_secs(2), drain(streams))
            .await
            .expect("streams should close after cancellation");
        assert!(castles.is_empty());
        assert!(errors.is_empty(), "cancellation must not surface as an error");
    }

    #[tokio::test]
    async fn unread_output_does_not_block_cancellation() {
        let mut adapter = Scripted::new(Source::MedievalBritain, Country::Uk, &[]);
        adapter.names = (0..40).map(|i| format!("castle-{i}")).collect();

        let orchestrator = Orchestrator::new(registry(vec![adapter]), config(1, 4));
        let cancel = CancellationToken::new();
        let streams = orchestrator.run(&cancel);

        // Nothing reads, so every worker ends up parked on a full channel.
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let (castles, _) = tokio::time::timeout(Duration::from_secs(2), drain(streams))
            .await
            .expect("streams should close after cancellation");
        assert!(castles.len() < 40);
    }
}
