//! Input cells: externally written values at the edge of the graph.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::batch::PendingWrite;
use crate::cell::CellId;
use crate::error::CycleError;
use crate::revision::Durability;
use crate::runtime::Runtime;

/// A typed handle over one input cell.
///
/// Signals hold the values the outside world pushes into the graph.
/// Reading one inside a memo's compute closure records a dependency;
/// writing one invalidates exactly the derived cells that (transitively)
/// read it.
///
/// Cloning a signal is cheap and yields a second handle to the same cell.
///
/// # Example
///
/// ```
/// use cell_flow::{Runtime, Signal};
///
/// let rt = Runtime::new();
/// let name = Signal::new(&rt, String::from("world"));
/// assert_eq!(name.get(), "world");
/// name.set(String::from("cell-flow"));
/// assert_eq!(name.get(), "cell-flow");
/// ```
pub struct Signal<T> {
    inner: Rc<SignalInner<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Signal {
            inner: Rc::clone(&self.inner),
        }
    }
}

struct SignalInner<T> {
    runtime: Runtime,
    id: CellId,
    value: RefCell<T>,
    /// Deferred write parked here while a batch is open.
    pending: RefCell<Option<Pending<T>>>,
}

struct Pending<T> {
    value: T,
    /// Set by `set_unconditional`: commit regardless of equality.
    forced: bool,
    /// Equality used for revert detection at commit time. `None` when the
    /// signal was only ever written unconditionally within this batch.
    eq: Option<fn(&T, &T) -> bool>,
}

fn eq_values<T: PartialEq>(a: &T, b: &T) -> bool {
    a == b
}

impl<T: Clone + 'static> Signal<T> {
    /// Create a signal with `Low` durability and no label.
    pub fn new(runtime: &Runtime, value: T) -> Self {
        Self::register(runtime, value, Durability::Low, None)
    }

    /// Create a signal with an explicit durability classification.
    ///
    /// Durability only affects how aggressively downstream verification
    /// can be skipped; semantics are unchanged.
    pub fn with_durability(runtime: &Runtime, value: T, durability: Durability) -> Self {
        Self::register(runtime, value, durability, None)
    }

    /// Create a signal with a diagnostic label, used when formatting
    /// cycle paths and in [`CellInfo`](crate::CellInfo).
    pub fn with_label(
        runtime: &Runtime,
        value: T,
        durability: Durability,
        label: &str,
    ) -> Self {
        Self::register(runtime, value, durability, Some(label.to_string()))
    }

    fn register(
        runtime: &Runtime,
        value: T,
        durability: Durability,
        label: Option<String>,
    ) -> Self {
        let id = runtime.register_input(durability, label);
        Signal {
            inner: Rc::new(SignalInner {
                runtime: runtime.clone(),
                id,
                value: RefCell::new(value),
                pending: RefCell::new(None),
            }),
        }
    }

    /// This signal's cell id.
    pub fn id(&self) -> CellId {
        self.inner.id
    }

    /// Current value. Records a dependency when called from inside a
    /// memo's compute closure. Never fails.
    pub fn get(&self) -> T {
        self.inner.runtime.record_read(self.inner.id);
        self.inner.value.borrow().clone()
    }

    /// Current value without establishing a dependency, for reads that
    /// must not subscribe the enclosing computation.
    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Like [`get`](Signal::get), wrapped in `Ok` for symmetry with
    /// [`Memo::get_result`](crate::Memo::get_result). A signal can never
    /// be mid-cycle.
    pub fn get_result(&self) -> Result<T, CycleError> {
        Ok(self.get())
    }

    /// Write a value without the equality check: the revision always
    /// advances and downstream cells always re-verify. For types without
    /// `Eq`, or to force re-verification on purpose.
    pub fn set_unconditional(&self, value: T) {
        if self.inner.runtime.in_batch() {
            SignalInner::defer(&self.inner, value, true, None);
            return;
        }
        *self.inner.value.borrow_mut() = value;
        self.inner.runtime.commit_input_change(self.inner.id);
    }

    /// Register a callback fired after each committed change to this
    /// signal's value.
    pub fn set_on_change(&self, f: impl Fn() + 'static) {
        self.inner.runtime.set_cell_on_change(self.inner.id, f);
    }
}

impl<T: Clone + Eq + 'static> Signal<T> {
    /// Write a value.
    ///
    /// Writing a value equal to the current one is a no-op: no revision
    /// advances, nothing downstream re-verifies, no callback fires. This
    /// short-circuit is what keeps redundant writes from cascading into
    /// redundant recomputation.
    ///
    /// Inside a [`Runtime::batch`] the write is deferred; see there for
    /// commit semantics.
    pub fn set(&self, value: T) {
        if self.inner.runtime.in_batch() {
            SignalInner::defer(&self.inner, value, false, Some(eq_values::<T>));
            return;
        }
        if *self.inner.value.borrow() == value {
            self.inner.runtime.tracer().on_signal_write(self.inner.id, false);
            return;
        }
        *self.inner.value.borrow_mut() = value;
        self.inner.runtime.commit_input_change(self.inner.id);
    }

    /// Compute the next value from the current one, then [`set`](Signal::set)
    /// it. The equality short-circuit still applies.
    ///
    /// `f` sees the committed value: inside a batch, earlier deferred
    /// writes are not visible to it.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.inner.value.borrow());
        self.set(next);
    }
}

impl<T: Clone + 'static> SignalInner<T> {
    /// Park a write in the pending slot, registering a commit entry with
    /// the runtime on the first write of this batch.
    fn defer(this: &Rc<Self>, value: T, forced: bool, eq: Option<fn(&T, &T) -> bool>) {
        let mut pending = this.pending.borrow_mut();
        match pending.as_mut() {
            Some(slot) => {
                // Later writes only replace the net value; one forced
                // write keeps the whole batched write forced.
                slot.value = value;
                slot.forced |= forced;
                if slot.eq.is_none() {
                    slot.eq = eq;
                }
            }
            None => {
                *pending = Some(Pending { value, forced, eq });
                drop(pending);
                let commit = Rc::clone(this);
                let discard = Rc::clone(this);
                this.runtime.defer_write(PendingWrite {
                    cell: this.id,
                    commit: Box::new(move || commit.commit_pending()),
                    discard: Box::new(move || {
                        discard.pending.borrow_mut().take();
                    }),
                });
            }
        }
    }

    /// Apply the pending write if its net value differs from the
    /// pre-batch value (revert detection) or it was forced.
    fn commit_pending(&self) -> bool {
        let pending = self
            .pending
            .borrow_mut()
            .take()
            .unwrap_or_else(|| panic!("batched signal {:?} has no pending write", self.id));
        let apply = pending.forced
            || match pending.eq {
                Some(eq) => !eq(&pending.value, &self.value.borrow()),
                None => true,
            };
        if apply {
            *self.value.borrow_mut() = pending.value;
        }
        apply
    }
}

impl<T: Clone + fmt::Debug + 'static> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &self.get_untracked())
            .finish()
    }
}
