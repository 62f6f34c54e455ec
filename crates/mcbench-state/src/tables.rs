//! redb table definitions for the task store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Tasks keyed by task id.
pub const TASKS: TableDefinition<&str, &[u8]> = TableDefinition::new("tasks");

/// Worker leases keyed by the id of the claimed task.
pub const LEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("leases");
