//! Backing-store access: short-lived Postgres connections, catalog reads and
//! statement execution.
//!
//! Layout:
//! - `models.rs`: schema snapshot types and catalog rows
//! - `schema.rs`: read-only catalog queries
//! - `introspect.rs`: store -> `SchemaSnapshot`
//! - `render.rs`: `SchemaSnapshot` -> canonical text
//! - `executor.rs`: gate-approved statement execution

pub mod executor;
pub mod introspect;
pub mod models;
pub mod render;
pub mod schema;

pub use executor::{FieldInfo, QueryExecutor, QueryOutput};
pub use introspect::{fetch_schema, refresh_schema_text};
pub use models::{ColumnDef, SchemaSnapshot, TableDef};
pub use render::render_schema;

use crate::error::PilotError;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::{ConnectOptions, Connection};
use std::net::IpAddr;
use std::str::FromStr;
use tracing::debug;
use url::{Host, Url};

/// Certificate handling for a connection target.
///
/// Neither policy verifies the server certificate. Local and literal-address
/// targets may fall back to plaintext; named remote hosts must use TLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsPolicy {
    Permissive,
    RequireUnverified,
}

impl TlsPolicy {
    pub fn for_uri(uri: &str) -> Self {
        let Ok(url) = Url::parse(uri) else {
            return TlsPolicy::RequireUnverified;
        };
        match url.host() {
            None => TlsPolicy::Permissive,
            Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)) => TlsPolicy::Permissive,
            Some(Host::Domain(d)) if is_local_name(d) => TlsPolicy::Permissive,
            Some(Host::Domain(_)) => TlsPolicy::RequireUnverified,
        }
    }

    pub fn ssl_mode(self) -> PgSslMode {
        match self {
            TlsPolicy::Permissive => PgSslMode::Prefer,
            TlsPolicy::RequireUnverified => PgSslMode::Require,
        }
    }
}

fn is_local_name(domain: &str) -> bool {
    // socket-only URIs parse with an empty host
    domain.is_empty()
        || domain.eq_ignore_ascii_case("localhost")
        || domain.to_ascii_lowercase().ends_with(".localhost")
        // postgres:// is not a special scheme, so IPv4 hosts stay opaque
        || domain.parse::<IpAddr>().is_ok()
}

/// Parse a connection URI and apply the TLS policy for its host.
pub fn connect_options(uri: &str) -> Result<PgConnectOptions, PilotError> {
    let policy = TlsPolicy::for_uri(uri);
    let opts = PgConnectOptions::from_str(uri)?
        .ssl_mode(policy.ssl_mode())
        .disable_statement_logging();
    Ok(opts)
}

/// Open one dedicated connection; callers close it when done.
pub async fn connect(uri: &str) -> Result<PgConnection, PilotError> {
    let opts = connect_options(uri)?;
    debug!(host = %opts.get_host(), "opening store connection");
    Ok(PgConnection::connect_with(&opts).await?)
}

/// Close a connection, ignoring shutdown errors; the work it did already succeeded or failed.
pub async fn close(conn: PgConnection) {
    if let Err(e) = conn.close().await {
        debug!(error = %e, "store connection did not close cleanly");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_and_literal_addresses_are_permissive() {
        for uri in [
            "postgres://u:p@localhost:5432/db",
            "postgresql://u:p@LOCALHOST/db",
            "postgres://u:p@127.0.0.1:5432/db",
            "postgres://u:p@10.0.0.12/db",
            "postgres://u:p@[::1]:5432/db",
            "postgres:///db?host=/var/run/postgresql",
        ] {
            assert_eq!(TlsPolicy::for_uri(uri), TlsPolicy::Permissive, "{uri}");
        }
    }

    #[test]
    fn named_hosts_require_tls() {
        for uri in [
            "postgres://u:p@db.example.com:5432/db",
            "postgresql://u:p@my-project.pooler.supabase.com/postgres",
        ] {
            assert_eq!(TlsPolicy::for_uri(uri), TlsPolicy::RequireUnverified, "{uri}");
        }
    }

    #[test]
    fn policy_overrides_uri_sslmode() {
        let opts = connect_options("postgres://u:p@db.example.com/app?sslmode=disable").unwrap();
        assert!(matches!(opts.get_ssl_mode(), PgSslMode::Require));
        let opts = connect_options("postgres://u:p@127.0.0.1/app").unwrap();
        assert!(matches!(opts.get_ssl_mode(), PgSslMode::Prefer));
    }

    #[test]
    fn malformed_uri_is_an_error() {
        assert!(connect_options("not a uri").is_err());
    }
}
