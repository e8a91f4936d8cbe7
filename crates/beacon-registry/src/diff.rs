//! Membership diffing
//!
//! Pure set difference between two membership snapshots, emitted as
//! an ordered change list: all deletes first, then all adds, so a
//! consumer applying changes in order never double-counts capacity
//! while an address is being replaced.

use std::collections::HashSet;

/// Kind of membership change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    /// Address joined the membership
    Add,
    /// Address left the membership
    Delete,
}

/// One membership change event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// What happened
    pub op: ChangeOp,
    /// The affected `host:port` address
    pub addr: String,
}

impl Change {
    /// Create an Add change
    pub fn add(addr: impl Into<String>) -> Self {
        Self {
            op: ChangeOp::Add,
            addr: addr.into(),
        }
    }

    /// Create a Delete change
    pub fn delete(addr: impl Into<String>) -> Self {
        Self {
            op: ChangeOp::Delete,
            addr: addr.into(),
        }
    }
}

/// Compute the minimal change list turning `old` into `new`
///
/// Deletes precede adds; within each group addresses are sorted so
/// the output is deterministic. `diff(x, x)` is empty for any `x`.
pub fn diff(old: &HashSet<String>, new: &HashSet<String>) -> Vec<Change> {
    let mut deleted: Vec<&String> = old.difference(new).collect();
    let mut added: Vec<&String> = new.difference(old).collect();
    deleted.sort();
    added.sort();

    let mut changes = Vec::with_capacity(deleted.len() + added.len());
    changes.extend(deleted.into_iter().map(Change::delete));
    changes.extend(added.into_iter().map(Change::add));
    changes
}
