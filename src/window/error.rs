use thiserror::Error;

use crate::source::PullError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum WindowError {
    /// A refill was required, the pull failed and no prior data exists.
    #[error("refresh error: {source}")]
    Refresh {
        #[source]
        source: PullError,
    },

    #[error("window cache failed to {op}: {source}")]
    Store {
        op: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("window cache timed out trying to {op}")]
    Timeout { op: &'static str },

    #[error("window cache failed to encode item for {op}: {source}")]
    Encode {
        op: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("window cache failed to decode item from {op}: {source}")]
    Decode {
        op: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl WindowError {
    /// Whether the failure came from the upstream source rather than the store.
    pub fn is_refresh(&self) -> bool {
        matches!(self, WindowError::Refresh { .. })
    }
}
