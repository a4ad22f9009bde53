//! Defaults for the catalog synchronization job.
//! Every value here can be overridden through `SyncConfig`.

// Upstream snapshot
pub const DEFAULT_ARCHIVE_URL: &str =
    "https://github.com/PokemonTCG/pokemon-tcg-data/archive/refs/heads/master.zip";
pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_USER_AGENT: &str = "PokemonCardTracker/1.0";
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_RETRY_DELAYS_SECS: [u64; 3] = [5, 10, 15];

// Reconciliation
pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_BATCH_DELAY_MS: u64 = 100;
pub const DEFAULT_MAX_ERRORS: usize = 10;

/// Key of the single sync marker row owned by this pipeline.
pub const DEFAULT_MARKER_KEY: &str = "github_cards_and_sets_sync";

// Local paths
pub const DEFAULT_DATABASE_PATH: &str = "data/catalog.db";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_CONFIG_FILE: &str = "card_sync.toml";

// Archive layout
pub const CARDS_DIR: &str = "cards";
pub const SETS_DIR: &str = "sets";
pub const JSON_EXTENSION: &str = ".json";
/// Largest entry text the extractor reads; the biggest upstream set file is a few MB.
pub const MAX_ENTRY_BYTES: u64 = 64 * 1024 * 1024;
