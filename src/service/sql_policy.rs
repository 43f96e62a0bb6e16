//! SQL acceptance checks.
//!
//! Two independent layers, neither sufficient alone:
//! - static: case-insensitive statement-shape denylist. Heuristic; obfuscated
//!   or unusual payloads can slip past it.
//! - dynamic: `EXPLAIN <sql>` against the live store, inside a read-only
//!   transaction that is rolled back. Proves the statement parses and
//!   references existing relations, not that it is read-only.
//!
//! Callers pick the layers they want with [`GateChecks`].

use crate::error::PilotError;
use regex::Regex;
use sqlx::{Connection, PgConnection};
use tracing::{debug, info};

/// Statement shapes rejected by the static check.
pub const DENYLIST: &[&str] = &[
    r"(?i)\bdrop\s+table\b",
    r"(?i)\bdrop\s+database\b",
    r"(?i)\bdelete\s+from\b",
    r"(?i)\btruncate\s+table\b",
    r"(?i)\balter\s+table\b",
    r"(?i)\bupdate\s+",
    r"(?i)\binsert\s+into\b",
];

/// Which layers a caller composes before trusting a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateChecks {
    pub static_denylist: bool,
    pub dry_run: bool,
}

impl GateChecks {
    pub const STATIC_ONLY: Self = Self {
        static_denylist: true,
        dry_run: false,
    };
    pub const DRY_RUN_ONLY: Self = Self {
        static_denylist: false,
        dry_run: true,
    };
    pub const BOTH: Self = Self {
        static_denylist: true,
        dry_run: true,
    };
}

#[derive(Debug, Clone)]
pub struct SqlPolicy {
    deny_patterns: Vec<Regex>,
}

impl SqlPolicy {
    pub fn new(patterns: &[&str]) -> Result<Self, PilotError> {
        let deny_patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| PilotError::Config(format!("invalid deny pattern '{p}': {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { deny_patterns })
    }

    /// Policy built from [`DENYLIST`].
    pub fn standard() -> Result<Self, PilotError> {
        Self::new(DENYLIST)
    }

    /// `true` when no denylisted shape occurs anywhere in `sql`.
    pub fn check_static(&self, sql: &str) -> bool {
        self.denied_by(sql).is_none()
    }

    /// The first pattern `sql` matches, if any.
    pub fn denied_by(&self, sql: &str) -> Option<&str> {
        self.deny_patterns
            .iter()
            .find(|p| p.is_match(sql))
            .map(Regex::as_str)
    }

    /// Plan `sql` on its own short-lived connection and discard the plan.
    ///
    /// Connection failures and planner errors alike come back as
    /// [`PilotError::InvalidSql`] with the store's message.
    pub async fn check_dynamic(&self, sql: &str, uri: &str) -> Result<(), PilotError> {
        let mut conn = crate::db::connect(uri)
            .await
            .map_err(PilotError::into_validation)?;
        let result = explain_read_only(&mut conn, sql).await;
        crate::db::close(conn).await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                debug!(error = %e, "dry run rejected statement");
                Err(PilotError::from(e).into_validation())
            }
        }
    }

    /// Apply the selected layers in order: static first, so a denylisted
    /// statement never reaches the store.
    pub async fn admit(&self, sql: &str, uri: &str, checks: GateChecks) -> Result<(), PilotError> {
        if checks.static_denylist
            && let Some(pattern) = self.denied_by(sql)
        {
            info!(pattern, "statement rejected by denylist");
            return Err(PilotError::UnsafeSql);
        }
        if checks.dry_run {
            self.check_dynamic(sql, uri).await?;
        }
        Ok(())
    }
}

/// `EXPLAIN <sql>` in a read-only transaction that is always rolled back.
///
/// `EXPLAIN ANALYZE` executes its statement, and the text after `EXPLAIN` is
/// untrusted, so writes must fail inside the transaction rather than commit.
async fn explain_read_only(conn: &mut PgConnection, sql: &str) -> Result<(), sqlx::Error> {
    let mut tx = conn.begin().await?;
    sqlx::query("SET TRANSACTION READ ONLY")
        .execute(&mut *tx)
        .await?;
    let explain = format!("EXPLAIN {sql}");
    // Extended protocol: a second statement smuggled after `;` is refused, not run.
    let outcome = sqlx::query(&explain).execute(&mut *tx).await;
    let rolled_back = tx.rollback().await;
    outcome?;
    rolled_back
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> SqlPolicy {
        SqlPolicy::standard().unwrap()
    }

    #[test]
    fn denylisted_shapes_are_rejected() {
        let p = policy();
        for sql in [
            "DROP TABLE t",
            "drop   database prod",
            "DELETE FROM users WHERE id = 1",
            "Truncate Table logs",
            "ALTER TABLE users ADD COLUMN x int",
            "UPDATE t SET x=1",
            "update\tt set x = 1",
            "INSERT INTO t VALUES (1)",
            "SELECT 1; DROP TABLE users",
            "WITH gone AS (DELETE FROM t RETURNING *) SELECT * FROM gone",
        ] {
            assert!(!p.check_static(sql), "{sql}");
        }
    }

    #[test]
    fn plain_selects_pass() {
        let p = policy();
        for sql in [
            "SELECT 1",
            "select * from users",
            "SELECT last_update, updated_at FROM audit_log",
            "SELECT id, name\nFROM public.users\nWHERE name ILIKE '%a%'\nORDER BY id",
            "SELECT count(*) FROM orders o JOIN users u ON u.id = o.user_id",
        ] {
            assert!(p.check_static(sql), "{sql}");
        }
    }

    #[test]
    fn reports_matching_pattern() {
        let p = policy();
        assert_eq!(p.denied_by("truncate table x"), Some(DENYLIST[3]));
        assert_eq!(p.denied_by("SELECT 1"), None);
    }

    #[test]
    fn invalid_pattern_is_configuration_error() {
        let err = SqlPolicy::new(&["(unclosed"]).unwrap_err();
        assert!(matches!(err, PilotError::Config(_)));
    }

    #[tokio::test]
    async fn static_rejection_precedes_any_connection() {
        // nothing listens on port 1; reaching the store would yield InvalidSql
        let err = policy()
            .admit("UPDATE t SET x=1", "postgres://u:p@127.0.0.1:1/db", GateChecks::BOTH)
            .await
            .unwrap_err();
        assert!(matches!(err, PilotError::UnsafeSql));
    }

    #[tokio::test]
    async fn unreachable_store_fails_dry_run() {
        let err = policy()
            .check_dynamic("SELECT 1", "postgres://u:p@127.0.0.1:1/db")
            .await
            .unwrap_err();
        assert!(matches!(err, PilotError::InvalidSql(_)));
    }

    #[tokio::test]
    async fn static_only_skips_the_store() {
        policy()
            .admit("SELECT 1", "postgres://u:p@127.0.0.1:1/db", GateChecks::STATIC_ONLY)
            .await
            .unwrap();
    }

    fn live_uri() -> String {
        std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL")
    }

    #[tokio::test]
    #[ignore = "Requires running PostgreSQL instance"]
    async fn dry_run_accepts_valid_select() {
        policy().check_dynamic("SELECT 1", &live_uri()).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "Requires running PostgreSQL instance"]
    async fn dry_run_surfaces_syntax_error() {
        let err = policy()
            .check_dynamic("SELEKT 1", &live_uri())
            .await
            .unwrap_err();
        match err {
            PilotError::InvalidSql(msg) => assert!(msg.contains("syntax error"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    #[ignore = "Requires running PostgreSQL instance"]
    async fn dry_run_surfaces_missing_relation() {
        let err = policy()
            .check_dynamic("SELECT * FROM pilot_no_such_table", &live_uri())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
