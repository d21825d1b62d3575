//! Index- and query-term generation over cell coverings.
//!
//! A term is the canonical token of a cell id: sixteen lowercase hex
//! digits with trailing zeros stripped. Two kinds of terms make the
//! prefix scan sound:
//!
//! - a **covering term** is the plain token of a covering cell;
//! - an **ancestor term** is a token carrying a `$` marker, emitted
//!   for the ancestors of a covering cell down to the minimum level.
//!
//! If a stored region and a query cap intersect, both coverings hold
//! a cell containing a common point, so the two cells are equal or in
//! ancestor/descendant relation. The index side emits covering terms
//! plus marked ancestors; the query side emits its covering terms,
//! their marked form, and the plain tokens of their ancestors —
//! between them the three relations all produce at least one shared
//! term.

use rustc_hash::FxHashSet;
use s2::cellid::CellID;

use crate::cells::{level_of, CoveringOptions};

/// Marker distinguishing ancestor terms from covering terms.
pub const ANCESTOR_MARKER: char = '$';

/// Canonical token of a cell id.
pub fn token(id: CellID) -> String {
    let hex = format!("{:016x}", id.0);
    let trimmed = hex.trim_end_matches('0');
    if trimmed.is_empty() {
        // Only the zero id trims to nothing, and no valid cell has it.
        "x".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Terms under which a covering is indexed: the covering term of each
/// cell plus marked ancestor terms down to `min_level`.
pub fn index_terms(covering: &[CellID], opts: &CoveringOptions) -> FxHashSet<String> {
    let mut terms = FxHashSet::default();
    for &cell in covering {
        terms.insert(token(cell));
        let mut level = level_of(cell);
        while level > opts.min_level {
            level -= 1;
            terms.insert(format!("{}{}", ANCESTOR_MARKER, token(cell.parent(level as u64))));
        }
    }
    terms
}

/// Terms a query covering probes: for each cell its covering term,
/// its marked form, and the plain tokens of its ancestors down to
/// `min_level`.
pub fn query_terms(covering: &[CellID], opts: &CoveringOptions) -> FxHashSet<String> {
    let mut terms = FxHashSet::default();
    for &cell in covering {
        let tok = token(cell);
        terms.insert(format!("{}{}", ANCESTOR_MARKER, tok));
        terms.insert(tok);
        let mut level = level_of(cell);
        while level > opts.min_level {
            level -= 1;
            terms.insert(token(cell.parent(level as u64)));
        }
    }
    terms
}
