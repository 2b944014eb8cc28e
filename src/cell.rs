//! Cell identity and per-cell bookkeeping.
//!
//! Cells live in a flat arena owned by the runtime; every edge in the
//! dependency graph is a plain [`CellId`], never a reference, so arbitrary
//! graph shapes (including back-edges discovered mid-computation) need no
//! ownership gymnastics.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexSet;

use crate::error::CycleError;
use crate::revision::{Durability, Revision};

/// Opaque handle identifying one cell within one [`Runtime`](crate::Runtime).
///
/// Ids are never reused within a runtime's lifetime, and the embedded
/// runtime id keeps cells of different runtimes from being confused for
/// one another. Equality and hashing are by value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellId {
    pub(crate) runtime_id: u64,
    pub(crate) index: u32,
}

impl CellId {
    /// Position of this cell in its runtime's cell table.
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }
}

impl fmt::Debug for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cell[{}]", self.index)
    }
}

/// Whether a cell is an externally written input or a derived computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKind {
    /// An input cell, written through [`Signal::set`](crate::Signal::set).
    Input,
    /// A derived cell, recomputed on demand through its
    /// [`Memo`](crate::Memo).
    Derived,
}

/// Capability to re-run a derived cell's computation and report whether
/// the value actually changed.
///
/// Implemented by the typed memo internals and stored type-erased in the
/// cell table, so cells of heterogeneous value types share one arena.
///
/// Contract: the caller owns the `in_progress` flag of the cell being
/// recomputed and clears it afterwards; implementations must not touch it.
pub(crate) trait Verifiable {
    /// Recompute the value, rebuild the dependency list, apply backdating,
    /// and return whether the value changed.
    fn recompute_and_check(&self) -> Result<bool, CycleError>;
}

/// Runtime-internal bookkeeping for one live cell.
pub(crate) struct CellMeta {
    pub(crate) kind: CellKind,
    /// Last revision at which the value actually differed from its
    /// predecessor. Never advanced by a recomputation that produced an
    /// equal value (backdating).
    pub(crate) changed_at: Revision,
    /// Last revision at which the cell was confirmed up to date.
    /// Invariant: `verified_at >= changed_at`.
    pub(crate) verified_at: Revision,
    pub(crate) durability: Durability,
    /// Cells read during the last computation, in read order. Rebuilt on
    /// every recomputation; empty for inputs.
    pub(crate) dependencies: Vec<CellId>,
    /// Reverse edges: cells whose last computation read this one.
    pub(crate) subscribers: IndexSet<CellId>,
    /// Recompute handle. Present iff `kind` is `Derived`; its absence on
    /// a derived cell is table corruption, not a normal state.
    pub(crate) verify: Option<Rc<dyn Verifiable>>,
    pub(crate) on_change: Option<Rc<dyn Fn()>>,
    /// Set while the cell is being verified or recomputed; the cycle
    /// sentinel.
    pub(crate) in_progress: bool,
    pub(crate) label: Option<String>,
}

impl CellMeta {
    pub(crate) fn input(durability: Durability, now: Revision, label: Option<String>) -> Self {
        CellMeta {
            kind: CellKind::Input,
            changed_at: now,
            verified_at: now,
            durability,
            dependencies: Vec::new(),
            subscribers: IndexSet::new(),
            verify: None,
            on_change: None,
            in_progress: false,
            label,
        }
    }

    pub(crate) fn derived(now: Revision, label: Option<String>) -> Self {
        CellMeta {
            kind: CellKind::Derived,
            changed_at: now,
            verified_at: now,
            durability: Durability::Low,
            dependencies: Vec::new(),
            subscribers: IndexSet::new(),
            verify: None,
            on_change: None,
            in_progress: false,
            label,
        }
    }
}

/// Point-in-time snapshot of one cell's bookkeeping, as returned by
/// [`Runtime::cell_info`](crate::Runtime::cell_info).
#[derive(Debug, Clone)]
pub struct CellInfo {
    /// The cell this snapshot describes.
    pub id: CellId,
    /// Input or derived.
    pub kind: CellKind,
    /// Last revision at which the value actually changed.
    pub changed_at: Revision,
    /// Last revision at which the cell was confirmed up to date.
    pub verified_at: Revision,
    /// Current durability classification.
    pub durability: Durability,
    /// Cells read during the last computation, in read order.
    pub dependencies: Vec<CellId>,
    /// Cells whose last computation read this one.
    pub subscribers: Vec<CellId>,
    /// Diagnostic label, if one was set at construction.
    pub label: Option<String>,
}
