//! Tracer trait for observing engine activity.
//!
//! The runtime reports what it does — cell creation, signal writes,
//! verification outcomes, cycle detection, batch commits — through a
//! [`Tracer`]. All hooks have default empty bodies, so an implementation
//! only overrides the events it cares about; the default [`NoopTracer`]
//! overrides none and costs nothing.
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use cell_flow::{CellId, Runtime, Signal, Tracer};
//!
//! #[derive(Default)]
//! struct WriteLog(Rc<RefCell<Vec<(CellId, bool)>>>);
//!
//! impl Tracer for WriteLog {
//!     fn on_signal_write(&self, id: CellId, changed: bool) {
//!         self.0.borrow_mut().push((id, changed));
//!     }
//! }
//!
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let rt = Runtime::builder().tracer(WriteLog(log.clone())).build();
//! let s = Signal::new(&rt, 1);
//! s.set(2);
//! s.set(2); // short-circuited, logged as unchanged
//! assert_eq!(log.borrow().as_slice(), &[(s.id(), true), (s.id(), false)]);
//! ```

use crate::cell::{CellId, CellKind};

/// How a derived cell was brought up to date, as seen by the tracer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Durability fast path: nothing in the cell's durability class has
    /// changed since it was last verified, so its dependencies were not
    /// even inspected.
    FastPath,
    /// Dependencies were inspected and none had changed.
    Unchanged,
    /// The cell was recomputed and produced a different value.
    Recomputed,
    /// The cell was recomputed but produced an equal value; its change
    /// revision was backdated.
    Backdated,
}

/// Observer for engine activity.
///
/// Install one with [`Runtime::builder`](crate::Runtime::builder) or
/// [`Runtime::set_tracer`](crate::Runtime::set_tracer).
pub trait Tracer: 'static {
    /// A cell was registered.
    #[inline]
    fn on_cell_created(&self, _id: CellId, _kind: CellKind, _label: Option<&str>) {}

    /// A signal was written outside a batch. `changed` is false when the
    /// write was short-circuited by the equality check.
    #[inline]
    fn on_signal_write(&self, _id: CellId, _changed: bool) {}

    /// A derived cell was brought up to date.
    #[inline]
    fn on_verified(&self, _id: CellId, _outcome: VerifyOutcome) {}

    /// A dependency cycle was detected along `path`.
    #[inline]
    fn on_cycle_detected(&self, _path: &[CellId]) {}

    /// The outermost batch exited. `written` counts signals that received
    /// deferred writes, `committed` those whose net value differed.
    #[inline]
    fn on_batch_commit(&self, _written: usize, _committed: usize) {}
}

/// Tracer that discards every event.
pub struct NoopTracer;

impl Tracer for NoopTracer {}
