// Catalog synchronization pipeline: detect, fetch, extract, normalize, reconcile, commit

pub mod change_detector;
pub mod extractor;
pub mod fetcher;
pub mod ledger;
pub mod normalizer;
pub mod runner;
pub mod upserter;

// Re-export the entry points of each stage
pub use change_detector::{ChangeDetector, ChangeStatus};
pub use extractor::ArchiveExtractor;
pub use fetcher::{ArchiveFetcher, RetryPolicy};
pub use ledger::SyncLedger;
pub use runner::{RunOutcome, RunSummary, SyncPipeline};
pub use upserter::{BatchUpserter, RunStats};
