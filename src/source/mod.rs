//! Upstream pull sources.
//!
//! A [`PullSource`] is the only way a window cache acquires items: it is asked
//! for a batch of up to `requested` items and may return fewer (including
//! none). A returned error means nothing from that call is trusted.
//!
//! - [`FnSource`]: adapts a plain closure
//! - [`sequence`]: synthetic monotonically increasing source

pub mod sequence;

use std::marker::PhantomData;

use async_trait::async_trait;
use thiserror::Error;

pub use sequence::SequenceSource;

#[derive(Error, Debug)]
pub enum PullError {
    #[error("upstream fetch failed: {0}")]
    Upstream(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Batch-fetch capability injected into a window cache at construction.
#[async_trait]
pub trait PullSource<T>: Send + Sync {
    /// Fetch up to `requested` items.
    async fn pull(&self, requested: usize) -> Result<Vec<T>, PullError>;
}

/// Adapts a synchronous closure into a [`PullSource`].
pub struct FnSource<F, T> {
    f: F,
    _item: PhantomData<fn() -> T>,
}

impl<F, T> FnSource<F, T>
where
    F: Fn(usize) -> Result<Vec<T>, PullError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _item: PhantomData,
        }
    }
}

#[async_trait]
impl<F, T> PullSource<T> for FnSource<F, T>
where
    F: Fn(usize) -> Result<Vec<T>, PullError> + Send + Sync,
    T: Send + 'static,
{
    async fn pull(&self, requested: usize) -> Result<Vec<T>, PullError> {
        (self.f)(requested)
    }
}
