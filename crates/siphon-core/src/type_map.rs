//! Native type to common type mapping for discovered columns.

use siphon_types::catalog::Field;

use crate::adapter::{Adapter, NativeColumn};
use crate::errors::DiscoveryError;

/// Map one backend column to a catalog [`Field`].
///
/// # Errors
///
/// Returns [`DiscoveryError::UnmappedType`] when the adapter has no common
/// type for the column's native type. Unknown types are never defaulted.
pub fn map_field<A: Adapter + ?Sized>(
    adapter: &A,
    table: &str,
    column: NativeColumn,
) -> Result<Field, DiscoveryError> {
    match adapter.map_native_type(&column.native_type) {
        Some(common) => Ok(Field::new(column.name, column.native_type, common)),
        None => Err(DiscoveryError::UnmappedType {
            table: table.to_string(),
            field: column.name,
            native_type: column.native_type,
        }),
    }
}

/// Map every column of a table, failing on the first unmapped type.
///
/// # Errors
///
/// See [`map_field`].
pub fn map_fields<A: Adapter + ?Sized>(
    adapter: &A,
    table: &str,
    columns: Vec<NativeColumn>,
) -> Result<Vec<Field>, DiscoveryError> {
    columns
        .into_iter()
        .map(|column| map_field(adapter, table, column))
        .collect()
}
