//! Cooperative cancellation and progress reporting
//!
//! Long passes poll a [`Progress`] at every outer-loop boundary (a cell rank
//! for routing passes, a timestep for simulations). Returning `false` stops
//! the pass at that boundary; whatever was written before stays consistent.

/// Progress sink that can also ask a running pass to stop.
pub trait Progress {
    /// Report `done` of `total` units. Return `false` to cancel.
    fn proceed(&mut self, done: usize, total: usize) -> bool;
}

impl<F> Progress for F
where
    F: FnMut(usize, usize) -> bool,
{
    fn proceed(&mut self, done: usize, total: usize) -> bool {
        self(done, total)
    }
}

/// Never reports, never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    #[inline]
    fn proceed(&mut self, _done: usize, _total: usize) -> bool {
        true
    }
}
