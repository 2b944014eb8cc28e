//! Pull-based verification: deciding whether a cell may have changed.
//!
//! `maybe_changed_after` answers "could this cell's value differ from what
//! it was at revision R?" without recomputing anything it can prove
//! unchanged. It walks the dependency graph with an explicit frame stack
//! rather than native recursion: re-verifying a chain hundreds of cells
//! deep must not risk stack exhaustion, and that is a tested constraint,
//! not an accident of implementation.

use crate::cell::{CellId, CellKind, Verifiable};
use crate::error::CycleError;
use crate::revision::Revision;
use crate::runtime::Runtime;
use crate::tracer::VerifyOutcome;
use std::rc::Rc;

/// One in-flight verification frame.
struct Frame {
    id: CellId,
    /// Revision the caller of this frame compares against: the original
    /// argument for the root, the parent's `verified_at` for children.
    asked_rev: Revision,
    /// The cell's `verified_at` at frame entry; dependency change stamps
    /// are compared against this snapshot.
    verified_at: Revision,
    deps: Vec<CellId>,
    next_dep: usize,
}

/// What to do next with the top frame.
enum Action {
    /// All dependencies check out (or the durability fast path fired);
    /// mark verified without recomputing.
    Finish(VerifyOutcome),
    /// A dependency changed since this cell was last verified; recompute.
    Recompute,
    /// A dependency looks unchanged but has not been verified at the
    /// current revision; verify it first.
    Descend(CellId),
}

/// Owns the frame stack for one `maybe_changed_after` invocation and
/// guarantees cleanup: any frame still open when this drops (error or
/// panic unwind) has its in-progress flag cleared, and the diagnostics
/// path is truncated back to where this invocation started.
struct VerifyRun<'a> {
    runtime: &'a Runtime,
    frames: Vec<Frame>,
    path_base: usize,
}

impl<'a> VerifyRun<'a> {
    fn new(runtime: &'a Runtime) -> Self {
        let path_base = runtime.shared.path.borrow().len();
        VerifyRun {
            runtime,
            frames: Vec::new(),
            path_base,
        }
    }

    /// Open a frame for `id`. Seeing the cell already in progress closes
    /// a cycle.
    fn enter(&mut self, id: CellId, asked_rev: Revision) -> Result<(), CycleError> {
        let frame = {
            let mut cells = self.runtime.shared.cells.borrow_mut();
            let meta = &mut cells[id.index() as usize];
            debug_assert_eq!(meta.kind, CellKind::Derived);
            if meta.in_progress {
                drop(cells);
                return Err(self.runtime.cycle_error_at(id));
            }
            meta.in_progress = true;
            Frame {
                id,
                asked_rev,
                verified_at: meta.verified_at,
                deps: meta.dependencies.clone(),
                next_dep: 0,
            }
        };
        self.runtime.shared.path.borrow_mut().push(id);
        self.frames.push(frame);
        Ok(())
    }

    /// Close the top frame normally.
    fn exit_top(&mut self) {
        let frame = self.frames.pop().expect("verification stack underflow");
        self.runtime.shared.cells.borrow_mut()[frame.id.index() as usize].in_progress = false;
        let mut path = self.runtime.shared.path.borrow_mut();
        debug_assert_eq!(path.last(), Some(&frame.id));
        path.pop();
    }
}

impl Drop for VerifyRun<'_> {
    fn drop(&mut self) {
        if self.frames.is_empty() {
            return;
        }
        let mut cells = self.runtime.shared.cells.borrow_mut();
        for frame in &self.frames {
            if let Some(meta) = cells.get_mut(frame.id.index() as usize) {
                meta.in_progress = false;
            }
        }
        drop(cells);
        self.runtime.shared.path.borrow_mut().truncate(self.path_base);
        self.frames.clear();
    }
}

impl Runtime {
    /// Decide whether `id` may have changed since `asked_rev`, verifying
    /// the cell (and recomputing it where needed) as a side effect.
    pub(crate) fn maybe_changed_after(
        &self,
        id: CellId,
        asked_rev: Revision,
    ) -> Result<bool, CycleError> {
        self.check_owned(id);
        {
            // Inputs answer directly from their change stamp.
            let cells = self.shared.cells.borrow();
            let meta = &cells[id.index() as usize];
            if meta.kind == CellKind::Input {
                return Ok(meta.changed_at > asked_rev);
            }
        }

        let mut run = VerifyRun::new(self);
        run.enter(id, asked_rev)?;

        // Verdict handed from a finished frame to its suspended parent:
        // "did the child change since the parent last verified?"
        let mut finished: Option<bool> = None;

        while !run.frames.is_empty() {
            let action = {
                let current = self.current_revision();
                let frame = run.frames.last_mut().expect("frame stack is non-empty");
                match finished.take() {
                    Some(true) => Action::Recompute,
                    Some(false) => {
                        frame.next_dep += 1;
                        self.scan_deps(frame, current)
                    }
                    None => {
                        // Frame entry: durability fast path first. If
                        // nothing in this cell's durability class changed
                        // since it was verified, its dependencies need no
                        // inspection at all.
                        let durability =
                            self.shared.cells.borrow()[frame.id.index() as usize].durability;
                        if self.last_changed(durability) <= frame.verified_at {
                            Action::Finish(VerifyOutcome::FastPath)
                        } else {
                            self.scan_deps(frame, current)
                        }
                    }
                }
            };

            match action {
                Action::Descend(dep) => {
                    let parent_verified = run
                        .frames
                        .last()
                        .expect("frame stack is non-empty")
                        .verified_at;
                    run.enter(dep, parent_verified)?;
                }
                Action::Recompute => {
                    let frame_id = run.frames.last().expect("frame stack is non-empty").id;
                    let verify = self.recompute_handle(frame_id);
                    verify.recompute_and_check()?;
                    let frame = run.frames.last().expect("frame stack is non-empty");
                    let changed_since = {
                        let cells = self.shared.cells.borrow();
                        cells[frame_id.index() as usize].changed_at > frame.asked_rev
                    };
                    finished = Some(changed_since);
                    run.exit_top();
                }
                Action::Finish(outcome) => {
                    let frame = run.frames.last().expect("frame stack is non-empty");
                    let changed_since = {
                        let mut cells = self.shared.cells.borrow_mut();
                        let meta = &mut cells[frame.id.index() as usize];
                        meta.verified_at = self.current_revision();
                        meta.changed_at > frame.asked_rev
                    };
                    self.tracer().on_verified(frame.id, outcome);
                    finished = Some(changed_since);
                    run.exit_top();
                }
            }
        }

        Ok(finished.expect("verification ended without a verdict"))
    }

    /// Walk the frame's remaining dependencies in recorded order.
    fn scan_deps(&self, frame: &mut Frame, current: Revision) -> Action {
        let cells = self.shared.cells.borrow();
        loop {
            let Some(&dep) = frame.deps.get(frame.next_dep) else {
                return Action::Finish(VerifyOutcome::Unchanged);
            };
            let dep_meta = &cells[dep.index() as usize];
            if dep_meta.changed_at > frame.verified_at {
                // A dependency definitely changed since this cell was
                // last verified; the only way to settle the question is
                // to recompute.
                return Action::Recompute;
            }
            if dep_meta.kind == CellKind::Derived && dep_meta.verified_at < current {
                // Looks unchanged, but its own stamp is stale: it might
                // recompute to a new value (or backdate). Pull on it
                // before concluding anything about this cell.
                return Action::Descend(dep);
            }
            frame.next_dep += 1;
        }
    }

    /// A derived cell's recompute handle. Its absence is corruption of the
    /// runtime's own tables, never a caller mistake, so treat it as fatal
    /// rather than guessing "unchanged".
    fn recompute_handle(&self, id: CellId) -> Rc<dyn Verifiable> {
        self.shared.cells.borrow()[id.index() as usize]
            .verify
            .clone()
            .unwrap_or_else(|| panic!("derived cell {:?} has no recompute closure", id))
    }
}
