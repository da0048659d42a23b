//! PostgreSQL data source.
//!
//! Uses deadpool-postgres for connection pooling. Every statement runs on a
//! pooled connection in autocommit mode, so concurrent table comparisons do
//! not share transaction state.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio_postgres::error::SqlState;
use tokio_postgres::Config as PgConfig;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, info, warn};

use super::DataSource;
use crate::config::SourceConfig;
use crate::core::TargetTable;
use crate::diff::hash_query::{
    chunk_digest_query, max_value_query, row_count_query, sequence_last_value_query,
    LIST_SEQUENCES_QUERY, LIST_TABLES_QUERY, PRIMARY_KEY_QUERY, SCHEMA_EXISTS_QUERY,
    SEQUENCE_BACKED_COLUMNS_QUERY,
};
use crate::diff::{ChunkWindow, RowDigest};
use crate::error::{DiffError, ObjectKind, Result};

/// How a source connection uses TLS, after PostgreSQL's `sslmode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Plain TCP.
    #[default]
    Disable,
    /// Encrypted, server certificate chain not checked.
    Require,
    /// Encrypted, certificate chain and hostname checked against the webpki
    /// roots. `verify-ca` maps here since rustls always checks the hostname.
    VerifyFull,
}

impl FromStr for SslMode {
    type Err = DiffError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "" | "disable" => Ok(SslMode::Disable),
            "require" => Ok(SslMode::Require),
            "verify-ca" | "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(DiffError::Config(format!(
                "unknown ssl_mode '{}' (expected disable, require, verify-ca or verify-full)",
                other
            ))),
        }
    }
}

impl SslMode {
    /// rustls connector for this mode, `None` when TLS is off.
    fn connector(self) -> Option<MakeRustlsConnect> {
        let config = match self {
            SslMode::Disable => return None,
            SslMode::Require => ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(UncheckedChain::new()))
                .with_no_client_auth(),
            SslMode::VerifyFull => {
                let mut roots = rustls::RootCertStore::empty();
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_no_client_auth()
            }
        };
        Some(MakeRustlsConnect::new(config))
    }
}

/// `sslmode=require`: accepts any server certificate but still checks the
/// handshake signatures against it.
#[derive(Debug)]
struct UncheckedChain {
    algorithms: WebPkiSupportedAlgorithms,
}

impl UncheckedChain {
    fn new() -> Self {
        Self {
            algorithms: rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for UncheckedChain {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// PostgreSQL source backed by a connection pool.
pub struct PgSource {
    label: String,
    pool: Pool,
}

impl PgSource {
    /// Connect to the database described by `config` and test the connection.
    pub async fn connect(label: impl Into<String>, config: &SourceConfig) -> Result<Self> {
        let label = label.into();
        let pg_config: PgConfig = config
            .url
            .parse()
            .map_err(|e| DiffError::Config(format!("{} database url is invalid: {}", label, e)))?;

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Clean,
        };

        let ssl_mode: SslMode = config.ssl_mode.parse()?;
        let context = format!("creating {} database pool", label);
        let pool = match ssl_mode.connector() {
            None => {
                warn!(
                    "{} database: TLS is disabled. Credentials will be transmitted in plaintext.",
                    label
                );
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr)
                    .max_size(config.max_connections)
                    .build()
                    .map_err(|e| DiffError::pool(e, context))?
            }
            Some(tls_connector) => {
                if ssl_mode == SslMode::Require {
                    warn!(
                        "{} database: ssl_mode=require does not verify the server certificate",
                        label
                    );
                }
                let mgr = Manager::from_config(pg_config, tls_connector, mgr_config);
                Pool::builder(mgr)
                    .max_size(config.max_connections)
                    .build()
                    .map_err(|e| DiffError::pool(e, context))?
            }
        };

        let source = Self { label, pool };

        let client = source.client("testing connection").await?;
        client.simple_query("SELECT 1").await?;

        info!(
            "Connected to {} database ({} connections max)",
            source.label, config.max_connections
        );

        Ok(source)
    }

    async fn client(&self, context: &str) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| DiffError::pool(e, format!("{} database: {}", self.label, context)))
    }
}

/// Map "relation does not exist" and "schema does not exist" to
/// [`DiffError::Missing`]; everything else stays a database error.
fn classify(err: tokio_postgres::Error, kind: ObjectKind, name: &str) -> DiffError {
    match err.code() {
        Some(code) if *code == SqlState::UNDEFINED_TABLE || *code == SqlState::INVALID_SCHEMA_NAME => {
            DiffError::missing(kind, name)
        }
        _ => DiffError::Database(err),
    }
}

#[async_trait]
impl DataSource for PgSource {
    fn label(&self) -> &str {
        &self.label
    }

    async fn schema_exists(&self, schema: &str) -> Result<bool> {
        let client = self.client("schema_exists").await?;
        let row = client.query_one(SCHEMA_EXISTS_QUERY, &[&schema]).await?;
        Ok(row.get::<_, bool>(0))
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        let client = self.client("list_tables").await?;
        let rows = client.query(LIST_TABLES_QUERY, &[&schema]).await?;
        let tables: Vec<String> = rows.iter().map(|r| r.get::<_, String>(0)).collect();

        debug!(
            "{} database: {} tables in schema '{}'",
            self.label,
            tables.len(),
            schema
        );
        Ok(tables)
    }

    async fn list_sequences(&self, schema: &str) -> Result<Vec<String>> {
        let client = self.client("list_sequences").await?;
        let rows = client.query(LIST_SEQUENCES_QUERY, &[&schema]).await?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    async fn row_count(&self, table: &TargetTable) -> Result<i64> {
        let client = self.client("row_count").await?;
        let query = row_count_query(table)?;
        let row = client
            .query_one(query.as_str(), &[])
            .await
            .map_err(|e| classify(e, ObjectKind::Table, &table.full_name()))?;
        Ok(row.get::<_, i64>(0))
    }

    async fn primary_key(&self, table: &TargetTable) -> Result<Vec<String>> {
        let client = self.client("primary_key").await?;
        let rows = client
            .query(PRIMARY_KEY_QUERY, &[&table.schema, &table.name])
            .await?;
        let pk: Vec<String> = rows.iter().map(|r| r.get::<_, String>(0)).collect();

        debug!(
            "{} database: primary key for {}: {:?}",
            self.label,
            table.full_name(),
            pk
        );
        Ok(pk)
    }

    async fn sequence_backed_columns(&self, table: &TargetTable) -> Result<Vec<String>> {
        let client = self.client("sequence_backed_columns").await?;
        let rows = client
            .query(SEQUENCE_BACKED_COLUMNS_QUERY, &[&table.schema, &table.name])
            .await?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    async fn max_value(&self, table: &TargetTable, column: &str) -> Result<i64> {
        let client = self.client("max_value").await?;
        let query = max_value_query(table, column)?;
        let row = client
            .query_one(query.as_str(), &[])
            .await
            .map_err(|e| classify(e, ObjectKind::Table, &table.full_name()))?;
        Ok(row.get::<_, i64>(0))
    }

    async fn chunk_digest(&self, table: &TargetTable, window: ChunkWindow) -> Result<RowDigest> {
        let client = self.client("chunk_digest").await?;
        let query = chunk_digest_query(table)?;
        let row = client
            .query_one(query.as_str(), &[&window.limit, &window.offset])
            .await
            .map_err(|e| classify(e, ObjectKind::Table, &table.full_name()))?;
        Ok(RowDigest::from(row.get::<_, Option<String>>(0)))
    }

    async fn sequence_last_value(&self, schema: &str, sequence: &str) -> Result<i64> {
        let client = self.client("sequence_last_value").await?;
        let query = sequence_last_value_query(schema, sequence)?;
        let row = client
            .query_one(query.as_str(), &[])
            .await
            .map_err(|e| classify(e, ObjectKind::Sequence, &format!("{}.{}", schema, sequence)))?;
        Ok(row.get::<_, i64>(0))
    }

    /// Issues `ROLLBACK` on whichever pooled connection is handed out, which
    /// is normally a no-op. A failed statement never leaves a poisoned
    /// session behind here: every statement runs in autocommit, and
    /// `RecyclingMethod::Clean` resets connections as they return to the
    /// pool.
    async fn rollback(&self) -> Result<()> {
        let client = self.client("rollback").await?;
        client.batch_execute("ROLLBACK").await?;
        debug!("{} database: rolled back", self.label);
        Ok(())
    }
}
