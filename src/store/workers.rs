use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::db::Db;
use crate::store::job::now_ms;

/// A worker capability descriptor. Liveness is inferred from job heartbeats;
/// this record only carries what the worker advertised plus a last-seen
/// stamp refreshed on registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: String,
    pub name: Option<String>,
    pub cores: i64,
    pub ram_gb: f64,
    /// Opaque JSON array of tag strings
    pub tags: String,
    pub registered_at: i64,
    pub last_heartbeat: Option<i64>,
}

fn worker_from_row(row: &Row<'_>) -> rusqlite::Result<WorkerRecord> {
    Ok(WorkerRecord {
        id: row.get("id")?,
        name: row.get("name")?,
        cores: row.get("cores")?,
        ram_gb: row.get("ram_gb")?,
        tags: row.get("tags")?,
        registered_at: row.get("registered_at")?,
        last_heartbeat: row.get("last_heartbeat")?,
    })
}

/// Registration parameters sent by a worker at startup.
#[derive(Debug, Clone)]
pub struct Registration {
    pub worker_id: String,
    pub name: Option<String>,
    pub cores: i64,
    pub ram_gb: f64,
    pub tags: Vec<String>,
}

/// Persisted table of worker capability descriptors.
#[derive(Clone)]
pub struct WorkerRegistry {
    db: Db,
}

impl WorkerRegistry {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Upsert keyed by worker id. Numeric and tag fields are replaced; the
    /// display name is preserved when the new value is absent. Records are
    /// never deleted.
    pub fn register(&self, reg: &Registration) -> Result<()> {
        let tags = serde_json::to_string(&reg.tags)?;
        let now = now_ms();
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO workers (id, name, cores, ram_gb, tags, registered_at, last_heartbeat) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6) \
             ON CONFLICT(id) DO UPDATE SET \
               name = COALESCE(excluded.name, workers.name), \
               cores = excluded.cores, \
               ram_gb = excluded.ram_gb, \
               tags = excluded.tags, \
               last_heartbeat = excluded.last_heartbeat",
            params![reg.worker_id, reg.name, reg.cores, reg.ram_gb, tags, now],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<WorkerRecord>> {
        let conn = self.db.lock();
        let record = conn
            .query_row(
                "SELECT id, name, cores, ram_gb, tags, registered_at, last_heartbeat \
                 FROM workers WHERE id = ?1",
                params![id],
                worker_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn list(&self) -> Result<Vec<WorkerRecord>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, cores, ram_gb, tags, registered_at, last_heartbeat \
             FROM workers ORDER BY id",
        )?;
        let rows = stmt.query_map([], worker_from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> WorkerRegistry {
        WorkerRegistry::new(Db::open_in_memory().unwrap())
    }

    fn registration(name: Option<&str>, cores: i64) -> Registration {
        Registration {
            worker_id: "w1".to_string(),
            name: name.map(String::from),
            cores,
            ram_gb: 4.0,
            tags: vec!["gpu".to_string()],
        }
    }

    #[test]
    fn register_inserts_new_worker() {
        let registry = registry();
        registry.register(&registration(Some("alpha"), 8)).unwrap();

        let record = registry.get("w1").unwrap().unwrap();
        assert_eq!(record.name.as_deref(), Some("alpha"));
        assert_eq!(record.cores, 8);
        assert_eq!(record.tags, r#"["gpu"]"#);
        assert!(record.last_heartbeat.is_some());
    }

    #[test]
    fn reregistration_replaces_fields_but_preserves_name() {
        let registry = registry();
        registry.register(&registration(Some("alpha"), 8)).unwrap();
        registry.register(&registration(None, 16)).unwrap();

        let record = registry.get("w1").unwrap().unwrap();
        // Name survives a nameless re-registration; capabilities are replaced
        assert_eq!(record.name.as_deref(), Some("alpha"));
        assert_eq!(record.cores, 16);
    }

    #[test]
    fn list_returns_all_workers() {
        let registry = registry();
        registry.register(&registration(Some("alpha"), 8)).unwrap();
        let mut other = registration(Some("beta"), 2);
        other.worker_id = "w2".to_string();
        registry.register(&other).unwrap();

        let all = registry.list().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "w1");
        assert_eq!(all[1].id, "w2");
    }
}
