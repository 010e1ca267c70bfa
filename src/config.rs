//! Engine configuration.

use std::str::FromStr;

/// Maximum allowed decompressed size (1GB) to prevent zip bombs
pub const DEFAULT_MAX_ENTRY_SIZE: u64 = 1024 * 1024 * 1024;

/// Maximum compression ratio allowed (1000:1) to detect zip bombs
pub const DEFAULT_MAX_COMPRESSION_RATIO: u64 = 1000;

/// Default bytes buffered between a bridge worker and its reader
pub const DEFAULT_BRIDGE_CAPACITY: usize = 64 * 1024;

/// Default in-memory limit before sinks and spooled sources spill to disk
pub const DEFAULT_SPOOL_THRESHOLD: usize = 8 * 1024 * 1024;

/// Knobs shared by every container opened through a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Bytes a StreamBridge buffers between worker and reader (at least 1).
    pub bridge_capacity: usize,
    /// Stop bridge workers as soon as the reader side is dropped.
    pub cancel_on_close: bool,
    /// Bytes kept in memory before spilling to a temporary file.
    pub spool_threshold: usize,
    /// Largest entry the engine will decompress.
    pub max_entry_size: u64,
    /// Largest uncompressed/compressed ratio accepted for one entry.
    pub max_compression_ratio: u64,
    /// Bytes read from the head of a source when sniffing signatures.
    pub signature_len: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            bridge_capacity: DEFAULT_BRIDGE_CAPACITY,
            cancel_on_close: false,
            spool_threshold: DEFAULT_SPOOL_THRESHOLD,
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
            max_compression_ratio: DEFAULT_MAX_COMPRESSION_RATIO,
            signature_len: 512,
        }
    }
}

impl EngineOptions {
    /// Defaults overlaid with `ARCVFS_*` environment variables.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(v) = env_value::<usize>("ARCVFS_BRIDGE_CAPACITY") {
            options = options.with_bridge_capacity(v);
        }
        if let Some(v) = env_value::<usize>("ARCVFS_SPOOL_THRESHOLD") {
            options.spool_threshold = v;
        }
        if let Some(v) = env_value::<u64>("ARCVFS_MAX_ENTRY_SIZE") {
            options.max_entry_size = v;
        }
        if let Some(v) = env_value::<bool>("ARCVFS_CANCEL_ON_CLOSE") {
            options.cancel_on_close = v;
        }
        options
    }

    pub fn with_bridge_capacity(mut self, capacity: usize) -> Self {
        self.bridge_capacity = capacity.max(1);
        self
    }

    pub fn with_cancel_on_close(mut self, cancel: bool) -> Self {
        self.cancel_on_close = cancel;
        self
    }

    pub fn with_spool_threshold(mut self, threshold: usize) -> Self {
        self.spool_threshold = threshold;
        self
    }

    pub fn with_max_entry_size(mut self, limit: u64) -> Self {
        self.max_entry_size = limit;
        self
    }

    pub fn with_max_compression_ratio(mut self, ratio: u64) -> Self {
        self.max_compression_ratio = ratio;
        self
    }
}

fn env_value<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring invalid value for {name}: {raw:?}");
            None
        }
    }
}
