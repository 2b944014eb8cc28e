//! A pull-based incremental computation engine.
//!
//! cell-flow lets a program define a graph of *input cells*
//! ([`Signal`]s) and *derived cells* ([`Memo`]s), then recompute only the
//! derived cells whose inputs actually changed, with results memoized
//! between recomputations. It is built for embedding in programs that
//! repeatedly re-evaluate a computation graph after small edits —
//! editors, compilers, build systems.
//!
//! # How it works
//!
//! - Every cell carries two revision stamps: `changed_at` (last real
//!   value change) and `verified_at` (last confirmation that the value is
//!   current).
//! - Reading a memo *pulls*: the engine verifies dependencies bottom-up,
//!   recomputing only where a dependency's `changed_at` outruns the
//!   memo's `verified_at`.
//! - A recomputation that produces an equal value is *backdated*: its
//!   `changed_at` stays put, so downstream cells still see it as
//!   unchanged and skip their own recomputation.
//! - Writing an equal value to a signal is a no-op, cutting redundant
//!   invalidation off at the source.
//! - [`Durability`] classes let whole stable subgraphs skip verification
//!   when nothing in their class has changed.
//!
//! Dependencies are recorded automatically, per computation run: whatever
//! a memo's closure read last time is what it depends on now, so
//! conditional reads narrow and widen subscriptions as branches flip.
//!
//! Cycles are detected, never looped on: [`Memo::get_result`] returns a
//! [`CycleError`] carrying the full traversal path, while [`Memo::get`]
//! treats a cycle as a programming bug and panics with the formatted
//! path.
//!
//! The engine is single-threaded and synchronous; one [`Runtime`] owns
//! one independent graph, and multiple runtimes coexist freely.
//!
//! # Example
//!
//! ```
//! use cell_flow::{Memo, Runtime, Signal};
//!
//! let rt = Runtime::new();
//! let base = Signal::new(&rt, 1);
//!
//! let b = base.clone();
//! let doubled = Memo::new(&rt, move || b.get() * 2);
//!
//! let d = doubled.clone();
//! let label = Memo::new(&rt, move || format!("value: {}", d.get()));
//!
//! assert_eq!(label.get(), "value: 2");
//! base.set(5);
//! assert_eq!(label.get(), "value: 10");
//! ```

#![deny(missing_docs)]

mod batch;
mod cell;
mod error;
mod memo;
mod revision;
mod runtime;
mod signal;
pub mod tracer;
mod verify;

pub use cell::{CellId, CellInfo, CellKind};
pub use error::CycleError;
pub use memo::Memo;
pub use revision::{Durability, Revision};
pub use runtime::{Runtime, RuntimeBuilder};
pub use signal::Signal;
pub use tracer::{NoopTracer, Tracer, VerifyOutcome};
