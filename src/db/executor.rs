use crate::error::PilotError;
use crate::service::sql_policy::{GateChecks, SqlPolicy};
use futures::TryStreamExt;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{Column, Executor, PgConnection, Row, Statement, TypeInfo};
use tracing::info;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldInfo {
    pub name: String,
    pub data_type_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutput {
    pub rows: Vec<Map<String, Value>>,
    pub fields: Vec<FieldInfo>,
}

/// Runs caller-submitted SQL after the configured gate layers.
///
/// No timeout, row cap or pagination: the full result set is materialised.
pub struct QueryExecutor<'a> {
    policy: &'a SqlPolicy,
    checks: GateChecks,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(policy: &'a SqlPolicy, checks: GateChecks) -> Self {
        Self { policy, checks }
    }

    pub async fn execute(&self, sql: &str, uri: &str) -> Result<QueryOutput, PilotError> {
        self.policy.admit(sql, uri, self.checks).await?;

        let mut conn = crate::db::connect(uri).await?;
        let result = run_statement(&mut conn, sql).await;
        crate::db::close(conn).await;

        let output = result?;
        info!(
            rows = output.rows.len(),
            fields = output.fields.len(),
            "statement executed"
        );
        Ok(output)
    }
}

async fn run_statement(conn: &mut PgConnection, sql: &str) -> Result<QueryOutput, PilotError> {
    // Preparing yields the field list even for empty results and refuses multi-statement text.
    let statement = (&mut *conn).prepare(sql).await?;
    let fields: Vec<FieldInfo> = statement
        .columns()
        .iter()
        .map(|c| FieldInfo {
            name: c.name().to_string(),
            data_type_name: c.type_info().name().to_string(),
        })
        .collect();

    // The simple protocol returns every value as text, whatever its type.
    let mut rows = Vec::new();
    let mut stream = sqlx::raw_sql(sql).fetch(&mut *conn);
    while let Some(row) = stream.try_next().await? {
        rows.push(row_to_object(&row));
    }

    Ok(QueryOutput { rows, fields })
}

fn row_to_object(row: &PgRow) -> Map<String, Value> {
    row.columns()
        .iter()
        .map(|col| {
            let text = row
                .try_get_unchecked::<Option<String>, _>(col.ordinal())
                .ok()
                .flatten();
            let value = match text {
                Some(t) => text_to_json(col.type_info().name(), t),
                None => Value::Null,
            };
            (col.name().to_string(), value)
        })
        .collect()
}

/// Convert one text-format cell. INT8 and NUMERIC stay strings to keep full precision.
pub fn text_to_json(type_name: &str, text: String) -> Value {
    match type_name {
        "BOOL" => match text.as_str() {
            "t" => Value::Bool(true),
            "f" => Value::Bool(false),
            _ => Value::String(text),
        },
        "INT2" | "INT4" => text
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or(Value::String(text)),
        "FLOAT4" | "FLOAT8" => text
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::String(text)),
        "JSON" | "JSONB" => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        _ => Value::String(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_text_cells_by_type() {
        assert_eq!(text_to_json("BOOL", "t".into()), json!(true));
        assert_eq!(text_to_json("BOOL", "f".into()), json!(false));
        assert_eq!(text_to_json("INT4", "42".into()), json!(42));
        assert_eq!(text_to_json("INT2", "-7".into()), json!(-7));
        assert_eq!(text_to_json("FLOAT8", "1.5".into()), json!(1.5));
        assert_eq!(
            text_to_json("JSONB", r#"{"a": [1, 2]}"#.into()),
            json!({"a": [1, 2]})
        );
    }

    #[test]
    fn wide_numbers_and_other_types_stay_text() {
        assert_eq!(
            text_to_json("INT8", "9007199254740993".into()),
            json!("9007199254740993")
        );
        assert_eq!(text_to_json("NUMERIC", "10.50".into()), json!("10.50"));
        assert_eq!(text_to_json("FLOAT8", "NaN".into()), json!("NaN"));
        assert_eq!(
            text_to_json("TIMESTAMPTZ", "2024-01-01 00:00:00+00".into()),
            json!("2024-01-01 00:00:00+00")
        );
    }

    #[tokio::test]
    async fn denylisted_statement_never_connects() {
        let policy = SqlPolicy::standard().unwrap();
        let err = QueryExecutor::new(&policy, GateChecks::STATIC_ONLY)
            .execute("DELETE FROM users", "postgres://u:p@127.0.0.1:1/db")
            .await
            .unwrap_err();
        assert!(matches!(err, PilotError::UnsafeSql));
    }

    #[tokio::test]
    async fn connection_failure_is_execution_error() {
        let policy = SqlPolicy::standard().unwrap();
        let err = QueryExecutor::new(&policy, GateChecks::STATIC_ONLY)
            .execute("SELECT 1", "postgres://u:p@127.0.0.1:1/db")
            .await
            .unwrap_err();
        assert!(matches!(err, PilotError::Store(_)));
    }

    #[tokio::test]
    #[ignore = "Requires running PostgreSQL instance"]
    async fn returns_rows_and_fields() {
        let uri = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL");
        let policy = SqlPolicy::standard().unwrap();
        let out = QueryExecutor::new(&policy, GateChecks::STATIC_ONLY)
            .execute(
                "SELECT 1::int4 AS n, 'x'::text AS s, NULL::text AS missing, true AS ok",
                &uri,
            )
            .await
            .unwrap();
        let names: Vec<_> = out.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["n", "s", "missing", "ok"]);
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0]["n"], json!(1));
        assert_eq!(out.rows[0]["s"], json!("x"));
        assert_eq!(out.rows[0]["missing"], Value::Null);
        assert_eq!(out.rows[0]["ok"], json!(true));
    }

    #[tokio::test]
    #[ignore = "Requires running PostgreSQL instance"]
    async fn empty_result_still_reports_fields() {
        let uri = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL");
        let policy = SqlPolicy::standard().unwrap();
        let out = QueryExecutor::new(&policy, GateChecks::STATIC_ONLY)
            .execute("SELECT 1 AS n WHERE false", &uri)
            .await
            .unwrap();
        assert!(out.rows.is_empty());
        assert_eq!(out.fields[0].name, "n");
    }

    #[tokio::test]
    #[ignore = "Requires running PostgreSQL instance"]
    async fn store_error_text_is_returned_raw() {
        let uri = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL");
        let policy = SqlPolicy::standard().unwrap();
        let err = QueryExecutor::new(&policy, GateChecks::STATIC_ONLY)
            .execute("SELECT * FROM pilot_no_such_table", &uri)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"relation "pilot_no_such_table" does not exist"#
        );
    }
}
