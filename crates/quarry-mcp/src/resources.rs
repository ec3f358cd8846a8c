//! Table schemas exposed as MCP resources.
//!
//! Each user table maps to one resource at
//! `<scheme>://<location>/<table>/schema` whose content is a pared-down
//! column listing. Failures here bubble up as strings; the server turns them
//! into JSON-RPC internal errors rather than tool envelopes.

use serde_json::{Value, json};

use quarry_adapters::DatabaseAdapter;
use quarry_core::{BackendInfo, BackendKind};

use crate::protocol::ResourceEntry;

/// URI prefix for the adapter's location. The file engine embeds the
/// database path, client-server engines embed host and database name, and an
/// adapter with no location fields falls back to a generic base.
fn base_uri(info: &BackendInfo) -> String {
    if info.kind == BackendKind::Sqlite {
        if let Some(path) = &info.path {
            return format!("sqlite://{path}");
        }
    }
    if let (Some(server), Some(database)) = (&info.server, &info.database) {
        return format!("{}://{server}/{database}", info.kind.as_str());
    }
    "db:///database".to_string()
}

/// One schema resource per user table.
pub async fn list_resources(
    adapter: &dyn DatabaseAdapter,
) -> Result<Vec<ResourceEntry>, String> {
    let rows = adapter
        .query_all(&adapter.list_tables_statement(), &[])
        .await
        .map_err(|e| e.to_string())?;
    let base = base_uri(&adapter.metadata());
    Ok(rows
        .iter()
        .filter_map(|row| row.get("name").and_then(Value::as_str))
        .map(|table| ResourceEntry {
            uri: format!("{base}/{table}/schema"),
            mime_type: "application/json".to_string(),
            name: format!("\"{table}\" database schema"),
        })
        .collect())
}

/// Resolve a schema resource URI and read the table's column listing.
pub async fn read_resource(
    adapter: &dyn DatabaseAdapter,
    uri: &str,
) -> Result<Value, String> {
    // Only the two trailing segments matter; the base is advisory.
    let mut segments = uri.trim_end_matches('/').rsplit('/');
    let tail = segments.next();
    let table = segments.next().filter(|t| !t.is_empty());
    let (Some("schema"), Some(table)) = (tail, table) else {
        return Err("Invalid resource URI".to_string());
    };

    let tables = adapter
        .query_all(&adapter.list_tables_statement(), &[])
        .await
        .map_err(|e| e.to_string())?;
    let known = tables
        .iter()
        .any(|row| row.get("name").and_then(Value::as_str) == Some(table));
    if !known {
        return Err(format!("Table '{table}' does not exist"));
    }

    let rows = adapter
        .query_all(&adapter.describe_table_statement(table), &[])
        .await
        .map_err(|e| e.to_string())?;
    let columns: Vec<Value> = rows
        .iter()
        .map(|row| {
            json!({
                "column_name": row.get("name").cloned().unwrap_or(Value::Null),
                "data_type": row.get("type").cloned().unwrap_or(Value::Null),
            })
        })
        .collect();
    let text = serde_json::to_string_pretty(&columns).map_err(|e| e.to_string())?;

    Ok(json!({
        "contents": [{
            "uri": uri,
            "mimeType": "application/json",
            "text": text,
        }],
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_adapters::SqliteAdapter;
    use quarry_core::config::SqliteConfig;

    #[test]
    fn base_uri_embeds_the_engine_location() {
        let file = BackendInfo::file(BackendKind::Sqlite, "/tmp/q.db");
        assert_eq!(base_uri(&file), "sqlite:///tmp/q.db");

        let mssql = BackendInfo::server(BackendKind::SqlServer, "db.internal", "sales");
        assert_eq!(base_uri(&mssql), "sqlserver://db.internal/sales");

        let pg = BackendInfo::server(BackendKind::Postgresql, "pg.internal", "sales");
        assert_eq!(base_uri(&pg), "postgresql://pg.internal/sales");

        let mysql = BackendInfo::server(BackendKind::Mysql, "my.internal", "sales");
        assert_eq!(base_uri(&mysql), "mysql://my.internal/sales");
    }

    #[test]
    fn base_uri_falls_back_when_location_is_unknown() {
        let mut info = BackendInfo::server(BackendKind::Postgresql, "pg", "sales");
        info.server = None;
        assert_eq!(base_uri(&info), "db:///database");
    }

    #[tokio::test]
    async fn schema_resources_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.db").to_string_lossy().into_owned();
        let adapter = SqliteAdapter::new(SqliteConfig { path: path.clone() });
        adapter.init().await.unwrap();
        adapter
            .exec_batch("CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT)")
            .await
            .unwrap();

        let entries = list_resources(&adapter).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].uri, format!("sqlite://{path}/users/schema"));
        assert_eq!(entries[0].mime_type, "application/json");
        assert_eq!(entries[0].name, "\"users\" database schema");

        let contents = read_resource(&adapter, &entries[0].uri).await.unwrap();
        let text = contents["contents"][0]["text"].as_str().unwrap();
        let columns: Value = serde_json::from_str(text).unwrap();
        assert_eq!(
            columns,
            json!([
                {"column_name": "id", "data_type": "INTEGER"},
                {"column_name": "email", "data_type": "TEXT"},
            ])
        );
    }

    #[tokio::test]
    async fn malformed_uris_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.db").to_string_lossy().into_owned();
        let adapter = SqliteAdapter::new(SqliteConfig { path });
        adapter.init().await.unwrap();

        for uri in [
            "sqlite:///tmp/r.db/users",
            "sqlite:///tmp/r.db//schema",
            "schema",
        ] {
            let err = read_resource(&adapter, uri).await.unwrap_err();
            assert_eq!(err, "Invalid resource URI", "{uri}");
        }
    }

    #[tokio::test]
    async fn reading_a_missing_table_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.db").to_string_lossy().into_owned();
        let adapter = SqliteAdapter::new(SqliteConfig { path });
        adapter.init().await.unwrap();

        let err = read_resource(&adapter, "sqlite:///tmp/r.db/ghost/schema")
            .await
            .unwrap_err();
        assert_eq!(err, "Table 'ghost' does not exist");
    }
}
