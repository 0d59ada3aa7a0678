//! window-cache: pull-through windowed cache.
//!
//! Items are fetched from an upstream [`PullSource`](source::PullSource) in
//! batches, handed to callers in small sequential slices, and refilled
//! transparently when the batch runs out or expires. If a refill fails while
//! stale data is buffered, the stale batch is replayed from the start instead
//! of failing the call.
//!
//! Two variants share one refill policy:
//!   - [`LocalWindowCache`](window::LocalWindowCache): window in process memory
//!   - [`SharedWindowCache`](window::SharedWindowCache): window in a
//!     [`Store`](store::Store), shared by every cache on the same key prefix

pub mod config;
pub mod metrics;
pub mod server;
pub mod source;
pub mod store;
pub mod window;

pub use source::{PullError, PullSource};
pub use store::{Store, StoreError};
pub use window::{WindowCache, WindowError};
