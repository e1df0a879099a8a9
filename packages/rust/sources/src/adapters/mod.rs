//! Source adapter trait and the built-in castle sources.
//!
//! Each adapter knows one website: how to list candidate castles and how
//! to enrich a single candidate from its detail page. Adapters never
//! parse HTML while holding an await point; every page is fetched first
//! and handed to a synchronous parser.

mod castelos_de_portugal;
mod ebidat;
mod heritage_ireland;
mod medieval_britain;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use castlefinder_shared::{Castle, CastleFinderError, Facilities, Result, Source};

use crate::fetch::PageFetcher;

pub use castelos_de_portugal::CastelosDePortugal;
pub use ebidat::Ebidat;
pub use heritage_ireland::HeritageIreland;
pub use medieval_britain::MedievalBritain;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A website that can list castles and describe one castle in detail.
#[async_trait]
pub trait CastleSource: Send + Sync {
    /// Tag stamped on every candidate this adapter emits.
    fn source(&self) -> Source;

    /// Walk the listing pages and push every candidate into `sink`.
    ///
    /// Candidates carry a name, a country, this adapter's [`Source`] and
    /// the detail link. Recoverable failures go to the sink's error side;
    /// the method returns once the listing is exhausted, the sink is
    /// closed or `cancel` fires.
    async fn collect(&self, cancel: &CancellationToken, sink: &CandidateSink);

    /// Fetch the candidate's detail page and fill every field the page
    /// provides. Failures are always reported as an error, never as a
    /// half-filled castle.
    async fn enrich(&self, cancel: &CancellationToken, candidate: Castle) -> Result<Castle>;
}

// ---------------------------------------------------------------------------
// CandidateSink
// ---------------------------------------------------------------------------

/// Write side of a collection run: one candidate stream and one error stream.
///
/// Dropping the sink closes both streams.
#[derive(Debug, Clone)]
pub struct CandidateSink {
    candidates: mpsc::Sender<Castle>,
    errors: mpsc::Sender<CastleFinderError>,
    cancel: CancellationToken,
}

impl CandidateSink {
    /// Create a sink and the two receivers it feeds.
    pub fn channel(
        cancel: CancellationToken,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Castle>, mpsc::Receiver<CastleFinderError>) {
        let (candidates, candidate_rx) = mpsc::channel(capacity.max(1));
        let (errors, error_rx) = mpsc::channel(capacity.max(1));
        let sink = Self {
            candidates,
            errors,
            cancel,
        };
        (sink, candidate_rx, error_rx)
    }

    /// Forward one candidate. Returns `false` once the run is cancelled or
    /// the consumer went away, at which point the adapter should stop.
    pub async fn candidate(&self, castle: Castle) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.candidates.send(castle) => sent.is_ok(),
        }
    }

    /// Forward one error. Cancellation is never reported as an error.
    pub async fn error(&self, err: CastleFinderError) -> bool {
        if err.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.errors.send(err) => sent.is_ok(),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Adapters keyed by the source tag they own. Built once at startup.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    adapters: HashMap<Source, Arc<dyn CastleSource>>,
}

impl SourceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// All built-in adapters sharing one fetcher.
    pub fn with_defaults(fetcher: Arc<dyn PageFetcher>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CastelosDePortugal::new(fetcher.clone())));
        registry.register(Arc::new(HeritageIreland::new(fetcher.clone())));
        registry.register(Arc::new(MedievalBritain::new(fetcher.clone())));
        registry.register(Arc::new(Ebidat::new(fetcher)));
        registry
    }

    /// Add `adapter`, replacing any adapter with the same source tag.
    pub fn register(&mut self, adapter: Arc<dyn CastleSource>) {
        self.adapters.insert(adapter.source(), adapter);
    }

    /// Adapter owning `source`, if registered.
    pub fn get(&self, source: Source) -> Option<Arc<dyn CastleSource>> {
        self.adapters.get(&source).cloned()
    }

    /// Every registered adapter, in source order.
    pub fn adapters(&self) -> Vec<Arc<dyn CastleSource>> {
        let mut adapters: Vec<_> = self.adapters.values().cloned().collect();
        adapters.sort_by_key(|a| a.source());
        adapters
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

// ---------------------------------------------------------------------------
// HTML helpers shared by the adapters
// ---------------------------------------------------------------------------

/// Compile a selector known at build time.
pub(crate) fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap()
}

/// Concatenated text content of `el`.
pub(crate) fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>()
}

/// Trimmed text of the first element matching `css`, or empty.
pub(crate) fn first_text(doc: &Html, css: &str) -> String {
    doc.select(&selector(css))
        .next()
        .map(|el| text_of(el).trim().to_string())
        .unwrap_or_default()
}

/// Next sibling that is an element (skipping text and comments).
pub(crate) fn next_element(el: ElementRef<'_>) -> Option<ElementRef<'_>> {
    el.next_siblings().find_map(ElementRef::wrap)
}

/// Facility flags from the icon class names both British Isles sites use.
pub(crate) fn facilities_from_icons(doc: &Html) -> Facilities {
    let has = |class: &str| doc.select(&selector(&format!(".{class}"))).next().is_some();
    Facilities {
        assistance_dogs_allowed: has("fa-dog"),
        giftshops: has("fa-shopping-bag"),
        wheelchair_support: has("fa-wheelchair"),
        restrooms: has("fa-toilet"),
        picnic_area: has("fa-tree"),
        exhibitions: has("fa-vector-square"),
        cafe: has("fa-coffee"),
        parking: has("fa-car-alt"),
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// Serves canned pages by exact URL and records every request.
    #[derive(Default)]
    pub struct StaticPages {
        pages: HashMap<String, String>,
        requested: Mutex<Vec<String>>,
    }

    impl StaticPages {
        pub fn with(mut self, url: &str, body: &str) -> Self {
            self.pages.insert(url.to_string(), body.to_string());
            self
        }

        pub fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageFetcher for StaticPages {
        async fn fetch(&self, cancel: &CancellationToken, url: &str) -> Result<String> {
            if cancel.is_cancelled() {
                return Err(CastleFinderError::Cancelled);
            }
            self.requested.lock().unwrap().push(url.to_string());
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| CastleFinderError::fetch(url, "HTTP 404 Not Found"))
        }
    }

    /// Run `adapter.collect` to completion and drain both streams.
    pub async fn collect_all(adapter: &dyn CastleSource) -> (Vec<Castle>, Vec<CastleFinderError>) {
        let cancel = CancellationToken::new();
        let (sink, mut castles, mut errors) = CandidateSink::channel(cancel.clone(), 256);
        adapter.collect(&cancel, &sink).await;
        drop(sink);

        let mut out = Vec::new();
        while let Some(c) = castles.recv().await {
            out.push(c);
        }
        let mut errs = Vec::new();
        while let Some(e) = errors.recv().await {
            errs.push(e);
        }
        (out, errs)
    }
}
