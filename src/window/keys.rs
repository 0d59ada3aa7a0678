//! Store key naming for shared windows.
//!
//! Every process sharing a window must derive identical names from the same
//! prefix: `P-data`, `P-cur`, `P-total`, `P-expire-at`.

/// The four store keys backing one shared window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeySet {
    pub data: String,
    pub cursor: String,
    pub total: String,
    pub expire_at: String,
}

impl CacheKeySet {
    pub fn new(prefix: &str) -> Self {
        Self {
            data: format!("{prefix}-data"),
            cursor: format!("{prefix}-cur"),
            total: format!("{prefix}-total"),
            expire_at: format!("{prefix}-expire-at"),
        }
    }
}
