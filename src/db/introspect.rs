use crate::db::models::{CatalogRow, SchemaSnapshot, TableDef};
use crate::db::render::render_schema;
use crate::db::schema::{TABLES_WITH_COLUMNS, VIEWS_WITH_COLUMNS};
use crate::error::PilotError;
use chrono::Utc;
use sqlx::PgConnection;
use std::collections::HashMap;
use tracing::{info, warn};

/// Read table and view metadata from the store.
///
/// Soft-fail boundary: any connectivity, authentication or query error is
/// logged and yields `None`, so callers continue without schema context.
pub async fn fetch_schema(uri: &str) -> Option<SchemaSnapshot> {
    match try_fetch_schema(uri).await {
        Ok(snapshot) => {
            info!(
                tables = snapshot.tables.len(),
                views = snapshot.views.len(),
                "schema introspection complete"
            );
            Some(snapshot)
        }
        Err(e) => {
            warn!(error = %e, "failed to fetch database schema");
            None
        }
    }
}

/// Introspect and render in one step; the text is what sessions cache.
pub async fn refresh_schema_text(uri: String) -> Option<String> {
    fetch_schema(&uri).await.map(|s| render_schema(&s))
}

async fn try_fetch_schema(uri: &str) -> Result<SchemaSnapshot, PilotError> {
    let mut conn = crate::db::connect(uri).await?;
    let result = load_snapshot(&mut conn).await;
    crate::db::close(conn).await;
    result
}

async fn load_snapshot(conn: &mut PgConnection) -> Result<SchemaSnapshot, PilotError> {
    let table_rows: Vec<CatalogRow> = sqlx::query_as(TABLES_WITH_COLUMNS)
        .fetch_all(&mut *conn)
        .await?;
    let view_rows: Vec<CatalogRow> = sqlx::query_as(VIEWS_WITH_COLUMNS)
        .fetch_all(&mut *conn)
        .await?;

    Ok(SchemaSnapshot {
        tables: group_relations(table_rows),
        views: group_relations(view_rows),
        last_updated: Utc::now(),
    })
}

/// Fold flat catalog rows into one `TableDef` per (schema, name), keeping the
/// first-seen relation order and the row order of columns within each.
pub fn group_relations(rows: Vec<CatalogRow>) -> Vec<TableDef> {
    let mut relations: Vec<TableDef> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for row in rows {
        let key = (row.table_schema.clone(), row.table_name.clone());
        let slot = *index.entry(key).or_insert_with(|| {
            relations.push(TableDef {
                schema_name: row.table_schema.clone(),
                table_name: row.table_name.clone(),
                columns: Vec::new(),
            });
            relations.len() - 1
        });
        if let Some(column) = row.column() {
            relations[slot].columns.push(column);
        }
    }
    relations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(schema: &str, table: &str, column: Option<(&str, &str, &str)>) -> CatalogRow {
        CatalogRow {
            table_schema: schema.to_string(),
            table_name: table.to_string(),
            column_name: column.map(|c| c.0.to_string()),
            data_type: column.map(|c| c.1.to_string()),
            is_nullable: column.map(|c| c.2.to_string()),
            column_default: None,
            character_maximum_length: None,
            numeric_precision: None,
            numeric_scale: None,
        }
    }

    #[test]
    fn groups_rows_by_schema_and_table() {
        let rows = vec![
            row("public", "orders", Some(("id", "integer", "NO"))),
            row("public", "orders", Some(("total", "numeric", "YES"))),
            row("public", "users", Some(("id", "integer", "NO"))),
            row("sales", "users", Some(("region", "text", "YES"))),
        ];
        let tables = group_relations(rows);

        assert_eq!(tables.len(), 3);
        assert_eq!(tables[0].table_name, "orders");
        assert_eq!(tables[0].columns.len(), 2);
        assert_eq!(tables[1].schema_name, "public");
        assert_eq!(tables[2].schema_name, "sales");
        assert_eq!(tables[2].columns[0].name, "region");
    }

    #[test]
    fn preserves_column_order_and_nullability() {
        let rows = vec![
            row("public", "t", Some(("b", "text", "YES"))),
            row("public", "t", Some(("a", "text", "NO"))),
        ];
        let tables = group_relations(rows);
        let names: Vec<_> = tables[0].columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["b", "a"]);
        assert!(tables[0].columns[0].nullable);
        assert!(!tables[0].columns[1].nullable);
    }

    #[test]
    fn relation_without_columns_is_kept_empty() {
        let tables = group_relations(vec![row("public", "empty", None)]);
        assert_eq!(tables.len(), 1);
        assert!(tables[0].columns.is_empty());
    }

    #[tokio::test]
    async fn unreachable_store_yields_none() {
        // port 1 on loopback refuses connections
        let snapshot = fetch_schema("postgres://u:p@127.0.0.1:1/db").await;
        assert!(snapshot.is_none());
    }

    #[tokio::test]
    #[ignore = "Requires running PostgreSQL instance"]
    async fn introspects_live_store() {
        let uri = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL");
        let mut conn = crate::db::connect(&uri).await.unwrap();
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS pilot_introspect_probe (id int NOT NULL, name text NOT NULL)",
        )
        .execute(&mut conn)
        .await
        .unwrap();
        crate::db::close(conn).await;

        let snapshot = fetch_schema(&uri).await.expect("snapshot");
        let probe = snapshot
            .tables
            .iter()
            .find(|t| t.table_name == "pilot_introspect_probe")
            .expect("probe table");
        assert_eq!(probe.columns[0].name, "id");
        assert_eq!(probe.columns[1].name, "name");
        assert!(!probe.columns[1].nullable);
    }
}
