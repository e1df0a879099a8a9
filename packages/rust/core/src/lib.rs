//! Pipeline orchestration and castle reconciliation.
//!
//! - [`fanin`]: many-to-one channel merge under cancellation
//! - [`executor`]: collection tasks and the extraction worker pool
//! - [`reconcile`]: match predicate and field-by-field merge
//! - [`dedup`]: batch lookup, reconciliation and persistence of results

pub mod dedup;
pub mod executor;
pub mod fanin;
pub mod reconcile;

pub use dedup::{
    BatchReport, CastleStore, ConsumeProgress, ConsumeSummary, SilentProgress, consume,
    persist_batch, reconcile_batch,
};
pub use executor::{CollectStreams, Orchestrator, PipelineStreams};
pub use reconcile::{is_probably, reconcile};
