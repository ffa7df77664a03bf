//! Server record persistence.
//!
//! [`ServerStore`] is the capability the lifecycle and the reconcilers
//! depend on. [`StateStore`] implements it on redb, on disk or in memory
//! (the latter for testing). Each operation runs in its own transaction.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::tables::SERVERS;
use crate::types::Server;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Keyed storage for one [`Server`] per user principal name.
pub trait ServerStore: Send + Sync {
    fn get(&self, key: &str) -> StateResult<Option<Server>>;

    /// Insert or replace the whole record.
    fn upsert(&self, server: &Server) -> StateResult<()>;

    /// Every record that decodes. Undecodable records are logged and
    /// left out so one bad row cannot hide the rest.
    fn list_all(&self) -> StateResult<Vec<Server>>;

    /// Returns true if a record existed.
    fn delete(&self, key: &str) -> StateResult<bool>;

    /// Like [`ServerStore::get`], but a missing record is an error.
    fn require(&self, key: &str) -> StateResult<Server> {
        self.get(key)?
            .ok_or_else(|| StateError::NotFound(key.to_string()))
    }
}

/// Thread-safe server store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "server store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory server store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SERVERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

fn decode(key: &str, bytes: &[u8]) -> StateResult<Server> {
    serde_json::from_slice(bytes).map_err(|e| StateError::Codec {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

impl ServerStore for StateStore {
    fn get(&self, key: &str) -> StateResult<Option<Server>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SERVERS).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => decode(key, guard.value()).map(Some),
            None => Ok(None),
        }
    }

    fn upsert(&self, server: &Server) -> StateResult<()> {
        let key = server.table_key();
        if key.is_empty() {
            return Err(StateError::Write(
                "server record has no user principal name".to_string(),
            ));
        }
        let value = serde_json::to_vec(server).map_err(|e| StateError::Codec {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SERVERS).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, status = %server.status, "server stored");
        Ok(())
    }

    fn list_all(&self) -> StateResult<Vec<Server>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SERVERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            match decode(key.value(), value.value()) {
                Ok(server) => results.push(server),
                Err(e) => warn!(key = %key.value(), error = %e, "skipping undecodable server record"),
            }
        }
        Ok(results)
    }

    fn delete(&self, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(SERVERS).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "server deleted");
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ServerDefaults, ServerStatus};

    fn test_server(upn: &str) -> Server {
        let mut server = Server::new("sub-1", upn, &format!("oid-{upn}"));
        ServerDefaults::default().apply(&mut server);
        server
    }

    #[test]
    fn server_upsert_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let server = test_server("alice@x.com");

        store.upsert(&server).unwrap();
        let retrieved = store.get("alice@x.com").unwrap();

        assert_eq!(retrieved, Some(server));
    }

    #[test]
    fn get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get("nobody@x.com").unwrap().is_none());
    }

    #[test]
    fn require_maps_missing_to_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.require("nobody@x.com").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn upsert_replaces_whole_record() {
        let store = StateStore::open_in_memory().unwrap();
        let mut server = test_server("alice@x.com");
        store.upsert(&server).unwrap();

        server.status = ServerStatus::Running;
        server.endpoint = Some("alice.labs.internal:8080".to_string());
        store.upsert(&server).unwrap();

        let retrieved = store.require("alice@x.com").unwrap();
        assert_eq!(retrieved.status, ServerStatus::Running);
        assert_eq!(retrieved.endpoint.as_deref(), Some("alice.labs.internal:8080"));
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[test]
    fn upsert_without_key_is_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.upsert(&Server::default()).is_err());
        assert!(store.list_all().unwrap().is_empty());
    }

    #[test]
    fn list_all_returns_every_record() {
        let store = StateStore::open_in_memory().unwrap();
        for upn in ["a@x.com", "b@x.com", "c@x.com"] {
            store.upsert(&test_server(upn)).unwrap();
        }
        assert_eq!(store.list_all().unwrap().len(), 3);
    }

    fn put_raw(store: &StateStore, key: &str, json: &str) {
        let txn = store.db.begin_write().unwrap();
        {
            let mut table = txn.open_table(SERVERS).unwrap();
            table.insert(key, json.as_bytes()).unwrap();
        }
        txn.commit().unwrap();
    }

    #[test]
    fn list_all_skips_undecodable_records() {
        let store = StateStore::open_in_memory().unwrap();
        store.upsert(&test_server("alice@x.com")).unwrap();
        put_raw(
            &store,
            "bob@x.com",
            r#"{"user_principal_name":"bob@x.com","status":"hibernating"}"#,
        );

        let servers = store.list_all().unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].user_principal_name, "alice@x.com");

        // A direct lookup still reports the bad row.
        let err = store.get("bob@x.com").unwrap_err();
        assert!(matches!(err, StateError::Codec { ref key, .. } if key == "bob@x.com"));
    }

    #[test]
    fn delete_reports_existence() {
        let store = StateStore::open_in_memory().unwrap();
        store.upsert(&test_server("alice@x.com")).unwrap();

        assert!(store.delete("alice@x.com").unwrap());
        assert!(!store.delete("alice@x.com").unwrap());
        assert!(store.get("alice@x.com").unwrap().is_none());
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("labgrid.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.upsert(&test_server("alice@x.com")).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let server = store.require("alice@x.com").unwrap();
        assert_eq!(server.user_alias, "alice");
        assert_eq!(server.status, ServerStatus::Registered);
    }

    #[test]
    fn usable_as_trait_object() {
        let store: Arc<dyn ServerStore> = Arc::new(StateStore::open_in_memory().unwrap());
        store.upsert(&test_server("alice@x.com")).unwrap();
        assert!(store.get("alice@x.com").unwrap().is_some());
    }
}
