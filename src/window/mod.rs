//! Pull-through window caches.
//!
//! A window is one batch of items fetched from a [`PullSource`], consumed in
//! order through a cursor and replaced wholesale when it runs dry or expires.
//!
//! - [`local`]: window held in process memory
//! - [`shared`]: window held in a [`Store`](crate::store::Store), shared by
//!   every cache using the same key prefix
//! - [`keys`]: store key naming for shared windows
//! - [`error`]: error type returned by both variants
//!
//! [`PullSource`]: crate::source::PullSource

pub mod error;
pub mod keys;
pub mod local;
pub mod shared;

use async_trait::async_trait;

pub use error::WindowError;
pub use keys::CacheKeySet;
pub use local::{LocalWindowCache, WindowConfig, WindowSnapshot};
pub use shared::{CursorMode, SharedWindowCache, SharedWindowConfig};

/// Default multiplier applied to a request size when sizing a refill.
pub const DEFAULT_AMPLIFICATION: usize = 5;

/// Sequential consumer interface shared by both window variants.
#[async_trait]
pub trait WindowCache<T>: Send + Sync {
    /// Return up to `requested` items, refilling from upstream when the
    /// window is exhausted or expired. Fewer items than requested is a
    /// short read, not an error.
    async fn next(&self, requested: usize) -> Result<Vec<T>, WindowError>;
}
