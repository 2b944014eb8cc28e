//! Derived cells: memoized computations over other cells.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::cell::{CellId, Verifiable};
use crate::error::CycleError;
use crate::revision::Revision;
use crate::runtime::Runtime;

/// A typed handle over one derived cell.
///
/// A memo owns a compute closure and a cached value. Reading a memo pulls
/// on its dependencies, recomputing only what actually needs it; a
/// recomputation that produces an equal value is *backdated*, so cells
/// downstream still see it as unchanged.
///
/// The dependency set is whatever the closure read on its most recent
/// run — a conditional that switches branches switches subscriptions.
///
/// Cloning a memo is cheap and yields a second handle to the same cell.
///
/// # Example
///
/// ```
/// use cell_flow::{Memo, Runtime, Signal};
///
/// let rt = Runtime::new();
/// let celsius = Signal::new(&rt, 20);
/// let c = celsius.clone();
/// let fahrenheit = Memo::new(&rt, move || c.get() * 9 / 5 + 32);
/// assert_eq!(fahrenheit.get(), 68);
/// celsius.set(25);
/// assert_eq!(fahrenheit.get(), 77);
/// ```
pub struct Memo<T> {
    inner: Rc<MemoInner<T>>,
}

impl<T> Clone for Memo<T> {
    fn clone(&self) -> Self {
        Memo {
            inner: Rc::clone(&self.inner),
        }
    }
}

struct MemoInner<T> {
    runtime: Runtime,
    id: CellId,
    /// Absent until the first computation.
    value: RefCell<Option<T>>,
    compute: Box<dyn Fn() -> T>,
}

impl<T: Clone + Eq + 'static> Memo<T> {
    /// Create a memo over `compute`. The closure is not run until the
    /// memo is first read.
    pub fn new(runtime: &Runtime, compute: impl Fn() -> T + 'static) -> Self {
        Self::register(runtime, compute, None)
    }

    /// Create a memo with a diagnostic label, used when formatting cycle
    /// paths and in [`CellInfo`](crate::CellInfo).
    pub fn with_label(
        runtime: &Runtime,
        compute: impl Fn() -> T + 'static,
        label: &str,
    ) -> Self {
        Self::register(runtime, compute, Some(label.to_string()))
    }

    fn register(
        runtime: &Runtime,
        compute: impl Fn() -> T + 'static,
        label: Option<String>,
    ) -> Self {
        let id = runtime.register_derived(label);
        let inner = Rc::new(MemoInner {
            runtime: runtime.clone(),
            id,
            value: RefCell::new(None),
            compute: Box::new(compute),
        });
        runtime.install_verifier(id, inner.clone());
        Memo { inner }
    }

    /// This memo's cell id.
    pub fn id(&self) -> CellId {
        self.inner.id
    }

    /// Current value, recomputing if needed.
    ///
    /// # Panics
    ///
    /// Aborts with the formatted cycle path if the dependency graph
    /// contains a cycle through this cell. Use
    /// [`get_result`](Memo::get_result) where cycles are expected input
    /// rather than a programming bug.
    pub fn get(&self) -> T {
        match self.get_result() {
            Ok(value) => value,
            Err(err) => panic!(
                "dependency cycle detected: {}",
                err.format_path(&self.inner.runtime)
            ),
        }
    }

    /// Current value, recomputing if needed; the primary read path.
    ///
    /// On success the read is recorded as a dependency of the enclosing
    /// computation, if any. On a cycle the error is returned once, with
    /// the full traversal path attached, and *no* dependency is recorded
    /// — a failed read must not leave a phantom edge in the graph.
    pub fn get_result(&self) -> Result<T, CycleError> {
        match self.inner.ensure_verified() {
            Ok(()) => {
                self.inner.runtime.record_read(self.inner.id);
                let value = self.inner.value.borrow();
                Ok(value
                    .as_ref()
                    .expect("verified memo holds a value")
                    .clone())
            }
            Err(err) => {
                // Taint the enclosing computation: its value is built on
                // a failed read, so it must fail with the same error.
                self.inner.runtime.poison_current_frame(&err);
                Err(err)
            }
        }
    }

    /// Revision of the last real value change, or `None` if the memo has
    /// never been computed. Useful for change-polling consumers.
    pub fn changed_at(&self) -> Option<Revision> {
        if self.inner.value.borrow().is_none() {
            return None;
        }
        self.inner
            .runtime
            .cell_info(self.inner.id)
            .map(|info| info.changed_at)
    }

    /// Register a callback fired after each recomputation that produced a
    /// different value. Backdated recomputations do not fire it.
    pub fn set_on_change(&self, f: impl Fn() + 'static) {
        self.inner.runtime.set_cell_on_change(self.inner.id, f);
    }
}

impl<T: Clone + Eq + 'static> MemoInner<T> {
    /// Bring this cell up to date: compute it for the first time, or run
    /// verification against the current revision.
    fn ensure_verified(&self) -> Result<(), CycleError> {
        if self.value.borrow().is_none() {
            let _guard = self.runtime.begin_compute(self.id)?;
            self.recompute_and_check()?;
            return Ok(());
        }
        self.runtime
            .maybe_changed_after(self.id, self.runtime.current_revision())?;
        Ok(())
    }
}

impl<T: Clone + Eq + 'static> Verifiable for MemoInner<T> {
    fn recompute_and_check(&self) -> Result<bool, CycleError> {
        let tracking = self.runtime.start_tracking();
        let new_value = (self.compute)();
        let frame = tracking.finish();
        if let Some(err) = frame.cycle {
            // A read inside the closure hit a cycle; the value computed
            // on top of it is meaningless. Propagate the original error
            // without re-wrapping.
            return Err(err);
        }
        self.runtime.update_dependencies(self.id, &frame.reads);
        let changed = match self.value.borrow().as_ref() {
            Some(old) => *old != new_value,
            None => true,
        };
        *self.value.borrow_mut() = Some(new_value);
        self.runtime.finish_recompute(self.id, changed);
        let outcome = if changed {
            crate::tracer::VerifyOutcome::Recomputed
        } else {
            crate::tracer::VerifyOutcome::Backdated
        };
        self.runtime.tracer().on_verified(self.id, outcome);
        Ok(changed)
    }
}

impl<T: Clone + fmt::Debug + 'static> fmt::Debug for Memo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.inner.id)
            .field("value", &self.inner.value.borrow())
            .finish()
    }
}
