use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::{Map, Value};

use super::{timestamp_now, BackendResult, FilterOp, Query, RowStore, Table};
use crate::error::BackendError;

/// Row store kept in a local SQLite file.
///
/// Rows are stored as JSON documents per table so the same filter vocabulary
/// as the hosted REST API applies (`json_extract` on the filtered column).
pub struct SqliteRowStore {
    conn: Mutex<Connection>,
}

impl SqliteRowStore {
    pub fn open(path: &Path) -> BackendResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BackendError::Local(format!("create {}: {}", parent.display(), e)))?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> BackendResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> BackendResult<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS rows (
                id TEXT PRIMARY KEY,
                tbl TEXT NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS rows_tbl ON rows (tbl);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn matching_ids(conn: &Connection, table: Table, query: &Query) -> BackendResult<Vec<String>> {
        let (sql, args) = build_select("id", table, query)?;
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(args.iter()), |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

fn checked_column(column: &str) -> BackendResult<&str> {
    let valid = !column.is_empty()
        && column
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(column)
    } else {
        Err(BackendError::Local(format!("invalid column name {column:?}")))
    }
}

fn build_select(projection: &str, table: Table, query: &Query) -> BackendResult<(String, Vec<String>)> {
    let mut sql = format!("SELECT {projection} FROM rows WHERE tbl = ?1");
    let mut args = vec![table.as_str().to_string()];

    for filter in &query.filters {
        let column = checked_column(&filter.column)?;
        let op = match filter.op {
            FilterOp::Eq => "=",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
        };
        args.push(filter.value.clone());
        sql.push_str(&format!(
            " AND CAST(json_extract(body, '$.{column}') AS TEXT) {op} ?{}",
            args.len()
        ));
    }

    if let Some((column, descending)) = &query.order_by {
        let column = checked_column(column)?;
        let direction = if *descending { "DESC" } else { "ASC" };
        sql.push_str(&format!(
            " ORDER BY json_extract(body, '$.{column}') {direction}, rowid {direction}"
        ));
    }
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    Ok((sql, args))
}

#[async_trait]
impl RowStore for SqliteRowStore {
    async fn insert(&self, table: Table, row: Value) -> BackendResult<Value> {
        let mut object = match row {
            Value::Object(map) => map,
            other => {
                return Err(BackendError::Decode(format!(
                    "row for {} must be an object, got {}",
                    table.as_str(),
                    other
                )))
            }
        };
        let id = match object.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(other) => other.to_string(),
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                object.insert("id".to_string(), Value::String(id.clone()));
                id
            }
        };
        object
            .entry("created_at")
            .or_insert_with(|| Value::String(timestamp_now()));

        let stored = Value::Object(object);
        let body = serde_json::to_string(&stored)?;
        let conn = self.lock();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO rows (id, tbl, body) VALUES (?1, ?2, ?3)",
            params![id, table.as_str(), body],
        )?;
        if changed == 0 {
            return Err(BackendError::http(
                409,
                format!("duplicate key value violates unique constraint on {}", table.as_str()),
            ));
        }
        Ok(stored)
    }

    async fn select(&self, table: Table, query: &Query) -> BackendResult<Vec<Value>> {
        let (sql, args) = build_select("body", table, query)?;
        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let bodies = stmt
            .query_map(params_from_iter(args.iter()), |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(BackendError::from))
            .collect()
    }

    async fn update(&self, table: Table, query: &Query, patch: Value) -> BackendResult<usize> {
        let patch = match patch {
            Value::Object(map) => map,
            _ => return Err(BackendError::Decode("update patch must be an object".into())),
        };
        let conn = self.lock();
        let ids = Self::matching_ids(&conn, table, query)?;
        for id in &ids {
            let body: Option<String> = conn
                .query_row("SELECT body FROM rows WHERE id = ?1", params![id], |row| {
                    row.get(0)
                })
                .optional()?;
            let Some(body) = body else { continue };
            let mut current: Map<String, Value> = serde_json::from_str(&body)?;
            for (key, value) in &patch {
                current.insert(key.clone(), value.clone());
            }
            conn.execute(
                "UPDATE rows SET body = ?1 WHERE id = ?2",
                params![serde_json::to_string(&current)?, id],
            )?;
        }
        Ok(ids.len())
    }

    async fn delete(&self, table: Table, query: &Query) -> BackendResult<usize> {
        let conn = self.lock();
        let ids = Self::matching_ids(&conn, table, query)?;
        for id in &ids {
            conn.execute("DELETE FROM rows WHERE id = ?1", params![id])?;
        }
        Ok(ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_assigns_id_and_timestamp() {
        let store = SqliteRowStore::open_in_memory().unwrap();
        let stored = store
            .insert(Table::Conversations, json!({ "user_id": "u1", "user_message": "hi" }))
            .await
            .unwrap();
        assert!(stored["id"].as_str().is_some());
        assert!(stored["created_at"].as_str().is_some());
    }

    #[tokio::test]
    async fn select_filters_by_table_and_column() {
        let store = SqliteRowStore::open_in_memory().unwrap();
        store
            .insert(Table::Conversations, json!({ "user_id": "u1", "n": 1 }))
            .await
            .unwrap();
        store
            .insert(Table::Conversations, json!({ "user_id": "u2", "n": 2 }))
            .await
            .unwrap();
        store
            .insert(Table::ConversationsAdd, json!({ "user_id": "u1", "n": 3 }))
            .await
            .unwrap();

        let rows = store
            .select(Table::Conversations, &Query::new().eq("user_id", "u1"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["n"], 1);
    }

    #[tokio::test]
    async fn range_filters_and_ordering() {
        let store = SqliteRowStore::open_in_memory().unwrap();
        for (i, ts) in ["2024-03-01T08:00:00.000Z", "2024-03-02T08:00:00.000Z", "2024-03-03T08:00:00.000Z"]
            .iter()
            .enumerate()
        {
            store
                .insert(Table::Conversations, json!({ "user_id": "u1", "created_at": ts, "i": i }))
                .await
                .unwrap();
        }

        let query = Query::new()
            .gte("created_at", "2024-03-02T00:00:00.000Z")
            .lt("created_at", "2024-03-04T00:00:00.000Z")
            .order("created_at", true)
            .limit(5);
        let rows = store.select(Table::Conversations, &query).await.unwrap();
        let order: Vec<i64> = rows.iter().map(|r| r["i"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![2, 1]);
    }

    #[tokio::test]
    async fn update_merges_and_delete_removes() {
        let store = SqliteRowStore::open_in_memory().unwrap();
        store
            .insert(Table::Users, json!({ "id": "u1", "name": "old", "active_days": 1 }))
            .await
            .unwrap();

        let changed = store
            .update(Table::Users, &Query::new().eq("id", "u1"), json!({ "name": "new" }))
            .await
            .unwrap();
        assert_eq!(changed, 1);

        let rows = store.select(Table::Users, &Query::new().eq("id", "u1")).await.unwrap();
        assert_eq!(rows[0]["name"], "new");
        assert_eq!(rows[0]["active_days"], 1);

        let removed = store.delete(Table::Users, &Query::new().eq("id", "u1")).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.select(Table::Users, &Query::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let store = SqliteRowStore::open_in_memory().unwrap();
        store.insert(Table::Users, json!({ "id": "u1" })).await.unwrap();
        let error = store.insert(Table::Users, json!({ "id": "u1" })).await.unwrap_err();
        assert!(matches!(error, BackendError::Http { status: 409, .. }));
    }

    #[test]
    fn column_names_are_validated() {
        let query = Query::new().eq("name'); DROP TABLE rows; --", "x");
        assert!(build_select("body", Table::Users, &query).is_err());
    }
}
