use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension};

use crate::errors::OpError;

const BUSY_TIMEOUT_MS: u64 = 2_000;
const MAX_TXN_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF_MS: u64 = 25;

/// Document-level read/write surface shared by the autocommit handle and the
/// transactional handle. Collections are flat namespaces of JSON documents
/// keyed by ID; nothing above this layer sees SQL.
pub trait DocIo {
    fn read_doc(&self, collection: &str, id: &str) -> Result<Option<serde_json::Value>, OpError>;
    fn scan_docs(&self, collection: &str) -> Result<Vec<(String, serde_json::Value)>, OpError>;
    fn write_doc(
        &self,
        collection: &str,
        id: &str,
        body: &serde_json::Value,
    ) -> Result<(), OpError>;
    fn delete_doc(&self, collection: &str, id: &str) -> Result<(), OpError>;
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(workspace: &Path) -> anyhow::Result<Store> {
        std::fs::create_dir_all(workspace)?;
        let db_path = workspace.join("schoolbook.sqlite3");
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
        init_schema(&conn)?;
        Ok(Store { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> anyhow::Result<Store> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Store { conn })
    }

    /// Runs `f` inside a single store transaction: every write it performs
    /// commits together or not at all. Busy/locked aborts are transient and
    /// retried with backoff; the fan-out steps above this layer are
    /// create-if-absent / delete-if-present, so re-running is safe.
    pub fn run_transaction<T, F>(&mut self, mut f: F) -> Result<T, OpError>
    where
        F: FnMut(&Txn<'_>) -> Result<T, OpError>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match attempt_txn(&mut self.conn, &mut f) {
                Err(OpError::Transient { .. }) if attempt < MAX_TXN_ATTEMPTS => {
                    std::thread::sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64));
                }
                other => return other,
            }
        }
    }
}

fn attempt_txn<T, F>(conn: &mut Connection, f: &mut F) -> Result<T, OpError>
where
    F: FnMut(&Txn<'_>) -> Result<T, OpError>,
{
    let txn = Txn {
        tx: conn.transaction()?,
    };
    // A dropped (uncommitted) transaction rolls back, so an Err here leaves
    // the store untouched.
    let out = f(&txn)?;
    txn.tx.commit()?;
    Ok(out)
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS documents(
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            body TEXT NOT NULL,
            PRIMARY KEY(collection, id)
        )",
        [],
    )?;
    Ok(())
}

/// Transactional handle passed to `run_transaction` closures.
pub struct Txn<'a> {
    tx: rusqlite::Transaction<'a>,
}

fn read_conn(
    conn: &Connection,
    collection: &str,
    id: &str,
) -> Result<Option<serde_json::Value>, OpError> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM documents WHERE collection = ? AND id = ?",
            (collection, id),
            |r| r.get(0),
        )
        .optional()?;
    match body {
        Some(raw) => {
            let value = serde_json::from_str(&raw).map_err(|e| {
                OpError::store(format!("corrupt document {}/{}: {}", collection, id, e))
            })?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn scan_conn(
    conn: &Connection,
    collection: &str,
) -> Result<Vec<(String, serde_json::Value)>, OpError> {
    let mut stmt =
        conn.prepare("SELECT id, body FROM documents WHERE collection = ? ORDER BY id")?;
    let mut rows = stmt.query([collection])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let id: String = row.get(0)?;
        let raw: String = row.get(1)?;
        let value = serde_json::from_str(&raw).map_err(|e| {
            OpError::store(format!("corrupt document {}/{}: {}", collection, id, e))
        })?;
        out.push((id, value));
    }
    Ok(out)
}

fn write_conn(
    conn: &Connection,
    collection: &str,
    id: &str,
    body: &serde_json::Value,
) -> Result<(), OpError> {
    let raw = serde_json::to_string(body)
        .map_err(|e| OpError::store(format!("encode document {}/{}: {}", collection, id, e)))?;
    conn.execute(
        "INSERT INTO documents(collection, id, body) VALUES(?, ?, ?)
         ON CONFLICT(collection, id) DO UPDATE SET body = excluded.body",
        (collection, id, &raw),
    )?;
    Ok(())
}

fn delete_conn(conn: &Connection, collection: &str, id: &str) -> Result<(), OpError> {
    conn.execute(
        "DELETE FROM documents WHERE collection = ? AND id = ?",
        (collection, id),
    )?;
    Ok(())
}

impl DocIo for Store {
    fn read_doc(&self, collection: &str, id: &str) -> Result<Option<serde_json::Value>, OpError> {
        read_conn(&self.conn, collection, id)
    }

    fn scan_docs(&self, collection: &str) -> Result<Vec<(String, serde_json::Value)>, OpError> {
        scan_conn(&self.conn, collection)
    }

    fn write_doc(
        &self,
        collection: &str,
        id: &str,
        body: &serde_json::Value,
    ) -> Result<(), OpError> {
        write_conn(&self.conn, collection, id, body)
    }

    fn delete_doc(&self, collection: &str, id: &str) -> Result<(), OpError> {
        delete_conn(&self.conn, collection, id)
    }
}

impl DocIo for Txn<'_> {
    fn read_doc(&self, collection: &str, id: &str) -> Result<Option<serde_json::Value>, OpError> {
        read_conn(&self.tx, collection, id)
    }

    fn scan_docs(&self, collection: &str) -> Result<Vec<(String, serde_json::Value)>, OpError> {
        scan_conn(&self.tx, collection)
    }

    fn write_doc(
        &self,
        collection: &str,
        id: &str,
        body: &serde_json::Value,
    ) -> Result<(), OpError> {
        write_conn(&self.tx, collection, id, body)
    }

    fn delete_doc(&self, collection: &str, id: &str) -> Result<(), OpError> {
        delete_conn(&self.tx, collection, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failed_transaction_rolls_back_every_write() {
        let mut store = Store::open_in_memory().expect("open");
        let result: Result<(), OpError> = store.run_transaction(|tx| {
            tx.write_doc("things", "a", &json!({ "n": 1 }))?;
            tx.write_doc("things", "b", &json!({ "n": 2 }))?;
            Err(OpError::reference("missing referent mid-operation"))
        });
        assert!(result.is_err());
        assert!(store.read_doc("things", "a").expect("read").is_none());
        assert!(store.read_doc("things", "b").expect("read").is_none());
    }

    #[test]
    fn committed_transaction_persists_and_scan_sees_it() {
        let mut store = Store::open_in_memory().expect("open");
        store
            .run_transaction(|tx| {
                tx.write_doc("things", "a", &json!({ "n": 1 }))?;
                tx.write_doc("things", "b", &json!({ "n": 2 }))?;
                Ok(())
            })
            .expect("commit");
        let docs = store.scan_docs("things").expect("scan");
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].0, "a");
        assert_eq!(docs[1].1, json!({ "n": 2 }));
    }

    #[test]
    fn write_doc_is_an_upsert() {
        let mut store = Store::open_in_memory().expect("open");
        store
            .run_transaction(|tx| {
                tx.write_doc("things", "a", &json!({ "n": 1 }))?;
                tx.write_doc("things", "a", &json!({ "n": 2 }))?;
                Ok(())
            })
            .expect("commit");
        assert_eq!(
            store.read_doc("things", "a").expect("read"),
            Some(json!({ "n": 2 }))
        );
    }
}
