use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Buffer size and timeout for one upload attempt
///
/// Strategies are tried in order; later entries are expected to be more
/// conservative (smaller buffer, shorter timeout) so a flaky link still gets
/// a chance to finish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStrategy {
    pub name: String,
    pub buffer_size: usize,
    pub timeout_ms: u64,
}

impl TransferStrategy {
    pub fn new(name: impl Into<String>, buffer_size: usize, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            buffer_size,
            timeout_ms: timeout.as_millis().try_into().unwrap_or(u64::MAX),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Standard, small buffer, tiny buffer
    pub fn default_ladder() -> Vec<Self> {
        vec![
            Self::new("standard", 8192, Duration::from_secs(60)),
            Self::new("small_buffer", 4096, Duration::from_secs(30)),
            Self::new("tiny_buffer", 1024, Duration::from_secs(15)),
        ]
    }
}
