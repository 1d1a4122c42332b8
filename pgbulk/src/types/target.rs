//! Description of one load destination.

/// Table information necessary for building COPY and DELETE statements.
///
/// [`CopyTarget`] is an immutable description of one destination table. All copy
/// commands addressing the same table configuration share a single descriptor,
/// typically behind an [`std::sync::Arc`], and the descriptor is never mutated
/// after construction.
///
/// `name` and `rows` are treated as trusted SQL fragments: `name` may be schema
/// qualified and `rows` is spliced into the COPY statement as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyTarget {
    /// Name of the target table for the copy operation.
    pub name: String,
    /// Comma-separated column list for the copy operation (when `None`: all columns).
    pub rows: Option<String>,
    /// Name of the id column used when deleting rows.
    pub id_column: String,
}

impl CopyTarget {
    /// Creates a target covering all columns of `name`.
    pub fn new(name: impl Into<String>, id_column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: None,
            id_column: id_column.into(),
        }
    }

    /// Creates a target restricted to the given comma-separated column list.
    pub fn with_rows(
        name: impl Into<String>,
        id_column: impl Into<String>,
        rows: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            rows: Some(rows.into()),
            id_column: id_column.into(),
        }
    }

    /// Checks if `other` would use exactly the same copy operation.
    ///
    /// The worker uses this to continue an open copy stream across consecutive
    /// commands instead of closing and reopening it. The id column does not
    /// participate: it only matters for deletion.
    pub fn same_copy_target(&self, other: &CopyTarget) -> bool {
        std::ptr::eq(self, other) || (self.name == other.name && self.rows == other.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_copy_target_matches_name_and_rows() {
        let planet = CopyTarget::with_rows("planet_osm_point", "osm_id", "osm_id,way");
        let same = CopyTarget::with_rows("planet_osm_point", "osm_id", "osm_id,way");
        let other_rows = CopyTarget::with_rows("planet_osm_point", "osm_id", "osm_id");
        let other_table = CopyTarget::with_rows("planet_osm_line", "osm_id", "osm_id,way");

        assert!(planet.same_copy_target(&planet));
        assert!(planet.same_copy_target(&same));
        assert!(!planet.same_copy_target(&other_rows));
        assert!(!planet.same_copy_target(&other_table));
    }

    #[test]
    fn id_column_does_not_affect_stream_identity() {
        let a = CopyTarget::new("nodes", "id");
        let b = CopyTarget::new("nodes", "node_id");

        assert!(a.same_copy_target(&b));
    }
}
