//! Castle source adapters and page fetching.
//!
//! This crate provides:
//! - [`CastleSource`]: the adapter capability (collect candidates, enrich one)
//! - [`SourceRegistry`]: adapters keyed by [`Source`](castlefinder_shared::Source)
//! - [`PageFetcher`] / [`HttpFetcher`]: the pooled HTTP boundary
//! - The built-in sites: [`CastelosDePortugal`], [`HeritageIreland`],
//!   [`MedievalBritain`] and [`Ebidat`]

pub mod adapters;
pub mod fetch;

pub use adapters::{
    CandidateSink, CastleSource, CastelosDePortugal, Ebidat, HeritageIreland, MedievalBritain,
    SourceRegistry,
};
pub use fetch::{HttpFetcher, PageFetcher};
