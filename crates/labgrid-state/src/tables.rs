//! redb table definitions for the labgrid state store.

use redb::TableDefinition;

/// Server records keyed by user principal name.
pub const SERVERS: TableDefinition<&str, &[u8]> = TableDefinition::new("servers");
