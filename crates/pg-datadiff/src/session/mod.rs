//! Reconciliation session.
//!
//! Owns both sources, resolves the scope from the first database's catalog
//! and drives the comparators over it: tables first, then sequences. Every
//! unit gets a verdict; only setup problems (missing schema, unreachable
//! catalog) abort the run.

mod scope;

pub use scope::ComparisonScope;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};

use crate::config::{Config, DiffConfig};
use crate::diff::{
    CompareOptions, DiffReport, SequenceComparator, Status, TableComparator, TargetKind,
    TargetReport, Verdict,
};
use crate::error::{DiffError, ObjectKind, Result};
use crate::source::{DataSource, PgSource};

/// A comparison run between two sources.
pub struct DiffSession<S: DataSource> {
    first: Arc<S>,
    second: Arc<S>,
    config: DiffConfig,
    options: CompareOptions,
    progress_tx: Option<mpsc::Sender<TargetReport>>,
}

impl DiffSession<PgSource> {
    /// Connect to both databases described by `config`.
    pub async fn connect(config: &Config) -> Result<Self> {
        let (first, second) = tokio::try_join!(
            PgSource::connect("first", &config.first),
            PgSource::connect("second", &config.second)
        )?;
        Ok(Self::new(
            Arc::new(first),
            Arc::new(second),
            config.diff.clone(),
        ))
    }
}

impl<S: DataSource> DiffSession<S> {
    pub fn new(first: Arc<S>, second: Arc<S>, config: DiffConfig) -> Self {
        let options = CompareOptions::from(&config);
        Self {
            first,
            second,
            config,
            options,
            progress_tx: None,
        }
    }

    /// Set progress channel for per-target verdicts.
    pub fn with_progress(mut self, tx: mpsc::Sender<TargetReport>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    async fn send_progress(&self, entry: &TargetReport) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(entry.clone()).await;
        }
    }

    /// Check that the configured schemas exist on both sources.
    pub async fn check_schemas(&self) -> Result<()> {
        let second_schema = self.config.second_schema();
        let (first, second) = tokio::join!(
            self.first.schema_exists(&self.config.schema),
            self.second.schema_exists(second_schema)
        );
        if !first? {
            return Err(DiffError::missing(
                ObjectKind::Schema,
                format!("{} (first database)", self.config.schema),
            ));
        }
        if !second? {
            return Err(DiffError::missing(
                ObjectKind::Schema,
                format!("{} (second database)", second_schema),
            ));
        }
        Ok(())
    }

    /// Snapshot the first database's catalog and apply the configured filters.
    pub async fn resolve_scope(&self) -> Result<ComparisonScope> {
        let schema = &self.config.schema;
        let tables = if self.config.compare_tables() {
            self.first.list_tables(schema).await?
        } else {
            Vec::new()
        };
        let sequences = if self.config.compare_sequences() {
            self.first.list_sequences(schema).await?
        } else {
            Vec::new()
        };

        let scope = ComparisonScope::resolve(tables, sequences, &self.config);
        info!(
            "Scope: {} tables, {} sequences in schema '{}'",
            scope.tables.len(),
            scope.sequences.len(),
            schema
        );
        Ok(scope)
    }

    /// Run the comparison until the scope is exhausted or `cancel` fires.
    ///
    /// On cancellation the comparisons in flight are dropped and the report
    /// holds only verdicts that were complete, with `cancelled` set.
    pub async fn run(&self, cancel: CancellationToken) -> Result<DiffReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut report = DiffReport::new(run_id.clone());

        info!("Starting diff run: {}", run_id);
        self.check_schemas().await?;
        let scope = self.resolve_scope().await?;

        if !scope.tables.is_empty() {
            info!("Starting table analysis");
            report.cancelled = self.compare_tables(&scope.tables, &cancel, &mut report).await;
        }

        if !report.cancelled && !scope.sequences.is_empty() {
            info!("Starting sequence analysis");
            report.cancelled = self
                .compare_sequences(&scope.sequences, &cancel, &mut report)
                .await;
        }

        report.completed_at = Utc::now();
        report.duration_ms = started.elapsed().as_millis() as u64;

        if report.cancelled {
            warn!(
                "Diff run {} cancelled after {} of {} targets",
                run_id,
                report.entries().count(),
                scope.tables.len() + scope.sequences.len()
            );
        } else {
            info!(
                "Diff run {} complete: {} matched, {} inconclusive, {} mismatched in {}ms",
                run_id,
                report.matches(),
                report.inconclusive(),
                report.failures(),
                report.duration_ms
            );
        }

        Ok(report)
    }

    /// Returns true when cancelled.
    async fn compare_tables(
        &self,
        tables: &[String],
        cancel: &CancellationToken,
        report: &mut DiffReport,
    ) -> bool {
        let first = self.first.as_ref();
        let second = self.second.as_ref();
        let options = &self.options;
        let total = tables.len();

        // `buffered` yields in input order, so the reported stream matches
        // the sequential run for any worker count.
        let results = stream::iter(tables.iter().enumerate())
            .map(move |(i, name)| async move {
                let started = Instant::now();
                let verdict = TableComparator::new(first, second, options)
                    .compare_name(name)
                    .await;
                target_report(TargetKind::Table, name, verdict, i, total, started)
            })
            .buffered(self.config.workers.max(1));
        tokio::pin!(results);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return true,
                next = results.next() => match next {
                    Some(entry) => {
                        log_verdict(&entry);
                        self.send_progress(&entry).await;
                        report.tables.push(entry);
                    }
                    None => return false,
                },
            }
        }
    }

    /// Returns true when cancelled.
    async fn compare_sequences(
        &self,
        sequences: &[String],
        cancel: &CancellationToken,
        report: &mut DiffReport,
    ) -> bool {
        let comparator =
            SequenceComparator::new(self.first.as_ref(), self.second.as_ref(), &self.options);
        let total = sequences.len();

        for (i, name) in sequences.iter().enumerate() {
            let started = Instant::now();
            let verdict = tokio::select! {
                biased;
                _ = cancel.cancelled() => return true,
                verdict = comparator.compare(name) => verdict,
            };
            let entry = target_report(TargetKind::Sequence, name, verdict, i, total, started);
            log_verdict(&entry);
            self.send_progress(&entry).await;
            report.sequences.push(entry);
        }
        false
    }
}

fn target_report(
    kind: TargetKind,
    name: &str,
    verdict: Verdict,
    index: usize,
    total: usize,
    started: Instant,
) -> TargetReport {
    TargetReport {
        kind,
        name: name.to_string(),
        verdict,
        position: index + 1,
        total,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

/// Log level for a verdict; anything short of a match needs attention.
fn verdict_level(status: Status) -> Level {
    match status {
        Status::Match => Level::INFO,
        Status::Inconclusive => Level::WARN,
        Status::Mismatch => Level::ERROR,
    }
}

fn log_verdict(entry: &TargetReport) {
    let kind = match entry.kind {
        TargetKind::Table => "Table",
        TargetKind::Sequence => "Sequence",
    };
    let (name, position, total, reason) =
        (&entry.name, entry.position, entry.total, &entry.verdict.reason);
    match verdict_level(entry.verdict.status) {
        Level::ERROR => error!("{} {} [{}/{}]: MISMATCH {}", kind, name, position, total, reason),
        Level::WARN => warn!("{} {} [{}/{}]: {}", kind, name, position, total, reason),
        _ => info!("{} {} [{}/{}]: {}", kind, name, position, total, reason),
    }
    debug!("{} {} took {}ms", kind, entry.name, entry.duration_ms);
}
