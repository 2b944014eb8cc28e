//! Deferred signal writes and batch bookkeeping.
//!
//! While a batch is open, `Signal::set` parks the written value in the
//! signal's pending slot instead of applying it. Each signal that receives
//! at least one deferred write registers a [`PendingWrite`] with the
//! runtime, in first-write order; the outermost batch exit either commits
//! them under one shared revision bump or discards them all.

use crate::cell::CellId;

/// One signal's deferred write, registered the first time the signal is
/// written inside a batch.
pub(crate) struct PendingWrite {
    pub(crate) cell: CellId,
    /// Apply the net value if it differs from the pre-batch value (or the
    /// write was forced); returns whether it was applied. Panics if the
    /// pending slot is empty — a batched signal without a pending write
    /// means the batch bookkeeping is corrupt.
    pub(crate) commit: Box<dyn Fn() -> bool>,
    /// Drop the pending value without applying it.
    pub(crate) discard: Box<dyn Fn()>,
}

#[derive(Default)]
pub(crate) struct BatchState {
    /// Nesting depth; writes commit only when the outermost batch exits.
    pub(crate) depth: usize,
    /// Deferred writes in first-write order.
    pub(crate) writes: Vec<PendingWrite>,
}
