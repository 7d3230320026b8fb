use parquet::{
    arrow::{
        ProjectionMask,
        arrow_reader::{RowSelection, RowSelector},
    },
    schema::types::SchemaDescriptor,
};

use crate::{
    error::{Error, Result},
    metadata::FileMetadata,
    options::ReaderOptions,
};

/// Resolve column names into a leaf projection.
///
/// A name matches a leaf when it equals the leaf's dotted path or is a prefix of it ending on a
/// path separator, so `"location"` selects `location.lat` and `location.lon`.
pub fn projection_mask<S: AsRef<str>>(
    columns: Option<&[S]>,
    schema: &SchemaDescriptor,
) -> Result<ProjectionMask> {
    let Some(columns) = columns else {
        return Ok(ProjectionMask::all());
    };

    let paths: Vec<String> = schema
        .columns()
        .iter()
        .map(|column| column.path().string())
        .collect();

    let mut leaves = Vec::new();
    for column in columns {
        let column = column.as_ref();
        let before = leaves.len();
        leaves.extend(
            paths
                .iter()
                .enumerate()
                .filter(|(_, path)| path_selects(path, column))
                .map(|(idx, _)| idx),
        );
        if leaves.len() == before {
            return Err(Error::UnknownColumn(column.to_string()));
        }
    }
    leaves.sort_unstable();
    leaves.dedup();

    Ok(ProjectionMask::leaves(schema, leaves))
}

pub(crate) fn path_selects(path: &str, column: &str) -> bool {
    path == column
        || path
            .strip_prefix(column)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// The part of one row group a read needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowGroupSlice {
    /// Row group index in the file
    pub index: usize,
    /// Rows skipped at the start of the row group
    pub offset: usize,
    /// Rows kept after the skip
    pub length: usize,
    /// Rows in the row group
    pub num_rows: usize,
}

impl RowGroupSlice {
    pub fn is_full(&self) -> bool {
        self.offset == 0 && self.length == self.num_rows
    }

    /// Row selection that skips rows outside the slice, `None` when the whole group is kept.
    pub fn row_selection(&self) -> Option<RowSelection> {
        if self.is_full() {
            return None;
        }
        let mut selectors = Vec::with_capacity(3);
        if self.offset > 0 {
            selectors.push(RowSelector::skip(self.offset));
        }
        selectors.push(RowSelector::select(self.length));
        let trailing = self.num_rows - self.offset - self.length;
        if trailing > 0 {
            selectors.push(RowSelector::skip(trailing));
        }
        Some(selectors.into())
    }
}

/// Decide which row groups, and which rows within them, a read touches.
///
/// Row groups wholly before `offset` or after `offset + limit` are left out so they are never
/// fetched or decoded.
pub fn plan_row_groups(
    metadata: &FileMetadata,
    options: &ReaderOptions,
) -> Result<Vec<RowGroupSlice>> {
    let indices: Vec<usize> = match options.row_groups() {
        Some(indices) => indices.to_vec(),
        None => (0..metadata.num_row_groups()).collect(),
    };

    let mut skip = options.offset().unwrap_or(0);
    let mut remaining = options.limit();
    let mut plan = Vec::with_capacity(indices.len());

    for index in indices {
        let num_rows = metadata.row_group(index)?.num_rows() as usize;
        if remaining == Some(0) {
            break;
        }
        // empty row groups contribute nothing and are skipped too
        if skip >= num_rows {
            skip -= num_rows;
            continue;
        }

        let offset = skip;
        skip = 0;
        let mut length = num_rows - offset;
        if let Some(rest) = remaining.as_mut() {
            length = length.min(*rest);
            *rest -= length;
        }
        plan.push(RowGroupSlice {
            index,
            offset,
            length,
            num_rows,
        });
    }

    Ok(plan)
}
