//! Cycle errors and their diagnostics.

use thiserror::Error;

use crate::cell::CellId;
use crate::runtime::Runtime;

/// Maximum number of cells rendered by [`CycleError::format_path`].
const PATH_RENDER_CAP: usize = 20;

/// A dependency cycle discovered during verification or recomputation.
///
/// Carries the cell at which the cycle closed and the ordered path of
/// cells traversed from the root read down to (and including) the repeated
/// cell. The error is reported once, at the outermost
/// [`Memo::get_result`](crate::Memo::get_result) call, never re-wrapped as
/// it unwinds through intermediate cells.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle detected at {cell:?}")]
pub struct CycleError {
    cell: CellId,
    path: Vec<CellId>,
}

impl CycleError {
    pub(crate) fn new(cell: CellId, path: Vec<CellId>) -> Self {
        CycleError { cell, path }
    }

    /// The cell at which the cycle was detected (the repeated cell).
    pub fn cell(&self) -> CellId {
        self.cell
    }

    /// The traversal path, root first, ending with the repeated cell.
    pub fn path(&self) -> &[CellId] {
        &self.path
    }

    /// Render the path using cell labels where available.
    ///
    /// Unlabeled cells render as `Cell[<index>]`; an id the runtime does
    /// not know (which should not occur) renders as `<unknown cell>`.
    /// Paths longer than twenty cells are truncated with a marker so a
    /// pathological cycle cannot produce unbounded output.
    pub fn format_path(&self, runtime: &Runtime) -> String {
        let mut names = Vec::with_capacity(self.path.len().min(PATH_RENDER_CAP + 1));
        for (i, id) in self.path.iter().enumerate() {
            if i == PATH_RENDER_CAP {
                names.push(format!("... ({} more)", self.path.len() - PATH_RENDER_CAP));
                break;
            }
            names.push(runtime.cell_display_name(*id));
        }
        names.join(" -> ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_expose_cell_and_path() {
        let a = CellId { runtime_id: 7, index: 0 };
        let b = CellId { runtime_id: 7, index: 1 };
        let err = CycleError::new(a, vec![a, b, a]);
        assert_eq!(err.cell(), a);
        assert_eq!(err.path(), &[a, b, a]);
        assert!(err.to_string().contains("Cell[0]"));
    }
}
