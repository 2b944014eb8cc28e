//! The runtime: cell table, revision clock, dependency tracking, batching.
//!
//! One [`Runtime`] owns one independent dependency graph. All cell
//! creation, recomputation, and verification passes through it; signals
//! and memos are thin typed handles over entries in its cell table.
//!
//! The runtime is single-threaded by design. "Which computation is
//! currently running" is modeled as an explicit stack of tracking frames
//! owned by the runtime — not thread-local or static state — so multiple
//! runtimes coexist without interfering.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use slab::Slab;

use crate::batch::{BatchState, PendingWrite};
use crate::cell::{CellId, CellInfo, CellKind, CellMeta, Verifiable};
use crate::error::CycleError;
use crate::revision::{Durability, Revision, RevisionTable};
use crate::tracer::{NoopTracer, Tracer};

/// Source of unique runtime ids, so cells of different runtimes can never
/// be confused for one another even across runtime drops.
static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

/// One dependency-tracking frame: the reads recorded by the computation
/// currently running, plus the first cycle error it ran into.
#[derive(Default)]
pub(crate) struct TrackFrame {
    pub(crate) reads: Vec<CellId>,
    /// Set when a read inside this computation failed with a cycle. The
    /// computation's value is discarded and the same error propagates,
    /// regardless of what the compute closure did with the failed read.
    pub(crate) cycle: Option<CycleError>,
}

pub(crate) struct RuntimeShared {
    id: u64,
    pub(crate) cells: RefCell<Slab<CellMeta>>,
    current: Cell<Revision>,
    table: RefCell<RevisionTable>,
    tracking: RefCell<Vec<TrackFrame>>,
    /// Cells currently being verified or recomputed, outermost first.
    /// Shared across nested reads so cycle reports show the full chain.
    pub(crate) path: RefCell<Vec<CellId>>,
    batch: RefCell<BatchState>,
    on_change: RefCell<Option<Rc<dyn Fn()>>>,
    tracer: RefCell<Rc<dyn Tracer>>,
}

/// The coordinator for one dependency graph.
///
/// Cheap to clone: clones share the same cell table and revision clock.
///
/// # Example
///
/// ```
/// use cell_flow::{Memo, Runtime, Signal};
///
/// let rt = Runtime::new();
/// let width = Signal::new(&rt, 4);
/// let w = width.clone();
/// let area = Memo::new(&rt, move || w.get() * w.get());
/// assert_eq!(area.get(), 16);
/// width.set(5);
/// assert_eq!(area.get(), 25);
/// ```
pub struct Runtime {
    pub(crate) shared: Rc<RuntimeShared>,
}

impl Clone for Runtime {
    fn clone(&self) -> Self {
        Runtime {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.shared.id)
            .field("cells", &self.shared.cells.borrow().len())
            .field("revision", &self.current_revision())
            .finish()
    }
}

impl Runtime {
    /// Create a runtime with default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for customizing the runtime.
    ///
    /// # Example
    ///
    /// ```
    /// use std::cell::Cell;
    /// use std::rc::Rc;
    /// use cell_flow::{Runtime, Signal};
    ///
    /// let writes = Rc::new(Cell::new(0));
    /// let probe = writes.clone();
    /// let rt = Runtime::builder()
    ///     .on_change(move || probe.set(probe.get() + 1))
    ///     .build();
    /// let s = Signal::new(&rt, 1);
    /// s.set(2);
    /// s.set(2); // short-circuited, no callback
    /// assert_eq!(writes.get(), 1);
    /// ```
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// The current global revision.
    pub fn current_revision(&self) -> Revision {
        self.shared.current.get()
    }

    /// Replace the runtime-global change callback, fired once after every
    /// committed input write (or once per committed batch).
    pub fn set_on_change(&self, f: impl Fn() + 'static) {
        *self.shared.on_change.borrow_mut() = Some(Rc::new(f));
    }

    /// Replace the installed tracer.
    pub fn set_tracer(&self, tracer: impl Tracer) {
        *self.shared.tracer.borrow_mut() = Rc::new(tracer);
    }

    /// Snapshot of one cell's bookkeeping.
    ///
    /// This is the lenient inspection surface: an id from another runtime
    /// or an unknown index yields `None` rather than a panic.
    pub fn cell_info(&self, id: CellId) -> Option<CellInfo> {
        if id.runtime_id != self.shared.id {
            return None;
        }
        let cells = self.shared.cells.borrow();
        let meta = cells.get(id.index as usize)?;
        Some(CellInfo {
            id,
            kind: meta.kind,
            changed_at: meta.changed_at,
            verified_at: meta.verified_at,
            durability: meta.durability,
            dependencies: meta.dependencies.clone(),
            subscribers: meta.subscribers.iter().copied().collect(),
            label: meta.label.clone(),
        })
    }

    /// Cells whose last computation read `id`, in subscription order.
    ///
    /// # Panics
    ///
    /// Panics if `id` belongs to a different runtime.
    pub fn dependents(&self, id: CellId) -> Vec<CellId> {
        self.check_owned(id);
        self.shared.cells.borrow()[id.index as usize]
            .subscribers
            .iter()
            .copied()
            .collect()
    }

    /// Run `f` with signal writes deferred, committing them on exit under
    /// one shared revision bump.
    ///
    /// Writes whose net value equals the pre-batch value are discarded
    /// (revert detection); if no write survives, the revision does not
    /// advance and no callback fires. Batches nest — only the outermost
    /// exit commits. If `f` panics, every deferred write is rolled back
    /// and the batch depth is restored before the panic resumes.
    ///
    /// # Example
    ///
    /// ```
    /// use cell_flow::{Memo, Runtime, Signal};
    ///
    /// let rt = Runtime::new();
    /// let a = Signal::new(&rt, 1);
    /// let b = Signal::new(&rt, 2);
    /// let (a2, b2) = (a.clone(), b.clone());
    /// let sum = Memo::new(&rt, move || a2.get() + b2.get());
    /// assert_eq!(sum.get(), 3);
    ///
    /// rt.batch(|| {
    ///     a.set(10);
    ///     b.set(20);
    /// });
    /// assert_eq!(sum.get(), 30);
    /// ```
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.shared.batch.borrow_mut().depth += 1;
        let guard = BatchGuard {
            runtime: self,
            committed: false,
        };
        let out = f();
        guard.commit();
        out
    }

    pub(crate) fn in_batch(&self) -> bool {
        self.shared.batch.borrow().depth > 0
    }

    pub(crate) fn defer_write(&self, write: PendingWrite) {
        self.shared.batch.borrow_mut().writes.push(write);
    }

    /// Leave one batch level. Commits (or rolls back) deferred writes when
    /// this was the outermost level.
    fn exit_batch(&self, commit: bool) {
        let writes = {
            let mut batch = self.shared.batch.borrow_mut();
            batch.depth -= 1;
            if batch.depth > 0 {
                return;
            }
            std::mem::take(&mut batch.writes)
        };
        if !commit {
            for write in &writes {
                (write.discard)();
            }
            return;
        }
        let mut committed = Vec::new();
        for write in &writes {
            if (write.commit)() {
                committed.push(write.cell);
            }
        }
        self.tracer().on_batch_commit(writes.len(), committed.len());
        if committed.is_empty() {
            return;
        }
        let rev = self.bump_revision();
        {
            let mut cells = self.shared.cells.borrow_mut();
            let mut table = self.shared.table.borrow_mut();
            for &id in &committed {
                let meta = &mut cells[id.index as usize];
                meta.changed_at = rev;
                meta.verified_at = rev;
                table.record_change(meta.durability, rev);
            }
        }
        for &id in &committed {
            let callback = self.shared.cells.borrow()[id.index as usize]
                .on_change
                .clone();
            if let Some(callback) = callback {
                callback();
            }
        }
        self.fire_global_on_change();
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    pub(crate) fn register_input(&self, durability: Durability, label: Option<String>) -> CellId {
        self.register(CellMeta::input(durability, self.current_revision(), label))
    }

    pub(crate) fn register_derived(&self, label: Option<String>) -> CellId {
        self.register(CellMeta::derived(self.current_revision(), label))
    }

    fn register(&self, meta: CellMeta) -> CellId {
        let kind = meta.kind;
        let label = meta.label.clone();
        let index = self.shared.cells.borrow_mut().insert(meta);
        let id = CellId {
            runtime_id: self.shared.id,
            index: index as u32,
        };
        self.tracer().on_cell_created(id, kind, label.as_deref());
        id
    }

    /// Install the recompute handle on a freshly registered derived cell.
    /// Happens once, inside `Memo::new`, before the cell is observable.
    pub(crate) fn install_verifier(&self, id: CellId, verify: Rc<dyn Verifiable>) {
        let mut cells = self.shared.cells.borrow_mut();
        let meta = &mut cells[id.index as usize];
        debug_assert_eq!(meta.kind, CellKind::Derived);
        meta.verify = Some(verify);
    }

    pub(crate) fn set_cell_on_change(&self, id: CellId, f: impl Fn() + 'static) {
        self.check_owned(id);
        self.shared.cells.borrow_mut()[id.index as usize].on_change = Some(Rc::new(f));
    }

    /// Fail fast on a cell id that does not belong to this runtime. Ids
    /// are handed out by the runtime itself, so a mismatch means caller
    /// state is corrupt — not something to paper over.
    pub(crate) fn check_owned(&self, id: CellId) {
        assert!(
            id.runtime_id == self.shared.id,
            "{:?} belongs to a different runtime",
            id
        );
        assert!(
            self.shared.cells.borrow().contains(id.index as usize),
            "{:?} is out of range for this runtime",
            id
        );
    }

    // ------------------------------------------------------------------
    // Dependency tracking
    // ------------------------------------------------------------------

    /// Record a read into the innermost active computation, if any.
    pub(crate) fn record_read(&self, id: CellId) {
        if let Some(frame) = self.shared.tracking.borrow_mut().last_mut() {
            if !frame.reads.contains(&id) {
                frame.reads.push(id);
            }
        }
    }

    /// Mark the innermost active computation as failed by a cycle. Its
    /// value will be discarded and the error propagated when it finishes.
    pub(crate) fn poison_current_frame(&self, err: &CycleError) {
        if let Some(frame) = self.shared.tracking.borrow_mut().last_mut() {
            if frame.cycle.is_none() {
                frame.cycle = Some(err.clone());
            }
        }
    }

    /// Open a tracking frame for a computation about to run. The frame is
    /// popped when the guard is finished — or dropped, if the computation
    /// panics.
    pub(crate) fn start_tracking(&self) -> TrackingGuard<'_> {
        self.shared
            .tracking
            .borrow_mut()
            .push(TrackFrame::default());
        TrackingGuard { runtime: self }
    }

    /// Mark `id` as in progress for a direct recomputation (outside the
    /// verification stack). Fails if the cell is already mid-computation,
    /// which closes a cycle.
    pub(crate) fn begin_compute(&self, id: CellId) -> Result<InProgressGuard<'_>, CycleError> {
        {
            let mut cells = self.shared.cells.borrow_mut();
            let meta = &mut cells[id.index as usize];
            if meta.in_progress {
                drop(cells);
                return Err(self.cycle_error_at(id));
            }
            meta.in_progress = true;
        }
        self.shared.path.borrow_mut().push(id);
        Ok(InProgressGuard { runtime: self, id })
    }

    /// Build the cycle error for a cycle closing at `closing`: the current
    /// traversal path plus the repeated cell.
    pub(crate) fn cycle_error_at(&self, closing: CellId) -> CycleError {
        let mut path = self.shared.path.borrow().clone();
        path.push(closing);
        let err = CycleError::new(closing, path);
        self.tracer().on_cycle_detected(err.path());
        err
    }

    // ------------------------------------------------------------------
    // Input writes and recompute bookkeeping
    // ------------------------------------------------------------------

    /// Commit a value change to an input cell: advance the revision for
    /// its durability class, stamp the cell, and fire callbacks.
    pub(crate) fn commit_input_change(&self, id: CellId) {
        assert!(
            self.shared.path.borrow().is_empty(),
            "cannot write to a signal while a computation is in progress"
        );
        let callback = {
            let mut cells = self.shared.cells.borrow_mut();
            let meta = &mut cells[id.index as usize];
            let rev = self.bump_revision();
            self.shared
                .table
                .borrow_mut()
                .record_change(meta.durability, rev);
            meta.changed_at = rev;
            meta.verified_at = rev;
            meta.on_change.clone()
        };
        self.tracer().on_signal_write(id, true);
        if let Some(callback) = callback {
            callback();
        }
        self.fire_global_on_change();
    }

    /// Stamp a derived cell after recomputation: always freshly verified,
    /// `changed_at` advanced only when the value really differed
    /// (backdating), per-cell callback fired on a real change.
    pub(crate) fn finish_recompute(&self, id: CellId, changed: bool) {
        let callback = {
            let mut cells = self.shared.cells.borrow_mut();
            let meta = &mut cells[id.index as usize];
            let now = self.current_revision();
            meta.verified_at = now;
            if changed {
                meta.changed_at = now;
                meta.on_change.clone()
            } else {
                None
            }
        };
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Replace a derived cell's dependency list after a recomputation,
    /// diffing old against new to keep reverse edges in sync, and refresh
    /// its durability as the minimum over the new dependencies.
    pub(crate) fn update_dependencies(&self, id: CellId, new_deps: &[CellId]) {
        let mut cells = self.shared.cells.borrow_mut();
        let old_deps = std::mem::take(&mut cells[id.index as usize].dependencies);
        for &dep in &old_deps {
            if !new_deps.contains(&dep) {
                cells[dep.index as usize].subscribers.shift_remove(&id);
            }
        }
        for &dep in new_deps {
            if !old_deps.contains(&dep) {
                cells[dep.index as usize].subscribers.insert(id);
            }
        }
        let durability = new_deps
            .iter()
            .map(|dep| cells[dep.index as usize].durability)
            .min()
            .unwrap_or(Durability::High);
        let meta = &mut cells[id.index as usize];
        meta.dependencies = new_deps.to_vec();
        meta.durability = durability;
    }

    fn bump_revision(&self) -> Revision {
        let rev = self.shared.current.get().next();
        self.shared.current.set(rev);
        rev
    }

    fn fire_global_on_change(&self) {
        let callback = self.shared.on_change.borrow().clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    pub(crate) fn last_changed(&self, durability: Durability) -> Revision {
        self.shared.table.borrow().last_changed(durability)
    }

    pub(crate) fn tracer(&self) -> Rc<dyn Tracer> {
        self.shared.tracer.borrow().clone()
    }

    /// Human-readable name for a cell: its label, `Cell[<index>]` for
    /// unlabeled cells, or a placeholder for an id this runtime does not
    /// know.
    pub(crate) fn cell_display_name(&self, id: CellId) -> String {
        if id.runtime_id != self.shared.id {
            return "<unknown cell>".to_string();
        }
        let cells = self.shared.cells.borrow();
        match cells.get(id.index as usize) {
            Some(meta) => match &meta.label {
                Some(label) => label.clone(),
                None => format!("{:?}", id),
            },
            None => "<unknown cell>".to_string(),
        }
    }
}

/// Restores batch depth and rolls back deferred writes if the batch body
/// panics; commits on the normal exit path.
struct BatchGuard<'a> {
    runtime: &'a Runtime,
    committed: bool,
}

impl BatchGuard<'_> {
    fn commit(mut self) {
        self.committed = true;
        self.runtime.exit_batch(true);
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.runtime.exit_batch(false);
        }
    }
}

/// Pops the tracking frame even if the computation inside it panics.
pub(crate) struct TrackingGuard<'a> {
    runtime: &'a Runtime,
}

impl TrackingGuard<'_> {
    /// Close the frame normally and hand back what it recorded.
    pub(crate) fn finish(self) -> TrackFrame {
        let frame = self
            .runtime
            .shared
            .tracking
            .borrow_mut()
            .pop()
            .expect("tracking stack underflow");
        std::mem::forget(self);
        frame
    }
}

impl Drop for TrackingGuard<'_> {
    fn drop(&mut self) {
        self.runtime.shared.tracking.borrow_mut().pop();
    }
}

/// Clears a cell's in-progress flag and its diagnostics-path entry on all
/// exit paths, including panics out of the compute closure. A cell left
/// permanently in progress would turn every future read into a spurious
/// cycle.
pub(crate) struct InProgressGuard<'a> {
    runtime: &'a Runtime,
    id: CellId,
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        if let Some(meta) = self
            .runtime
            .shared
            .cells
            .borrow_mut()
            .get_mut(self.id.index as usize)
        {
            meta.in_progress = false;
        }
        let mut path = self.runtime.shared.path.borrow_mut();
        if path.last() == Some(&self.id) {
            path.pop();
        }
    }
}

/// Builder for [`Runtime`] with customizable settings.
pub struct RuntimeBuilder {
    on_change: Option<Rc<dyn Fn()>>,
    tracer: Rc<dyn Tracer>,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self {
            on_change: None,
            tracer: Rc::new(NoopTracer),
        }
    }

    /// Set the runtime-global change callback, fired once after every
    /// committed input write (or once per committed batch).
    pub fn on_change(mut self, f: impl Fn() + 'static) -> Self {
        self.on_change = Some(Rc::new(f));
        self
    }

    /// Install a tracer.
    pub fn tracer(mut self, tracer: impl Tracer) -> Self {
        self.tracer = Rc::new(tracer);
        self
    }

    /// Build the runtime.
    pub fn build(self) -> Runtime {
        Runtime {
            shared: Rc::new(RuntimeShared {
                id: NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed),
                cells: RefCell::new(Slab::new()),
                current: Cell::new(Revision::START),
                table: RefCell::new(RevisionTable::new()),
                tracking: RefCell::new(Vec::new()),
                path: RefCell::new(Vec::new()),
                batch: RefCell::new(BatchState::default()),
                on_change: RefCell::new(self.on_change),
                tracer: RefCell::new(self.tracer),
            }),
        }
    }
}
