//! Ingestion driver
//!
//! Processes a batch of objects on a bounded pool of concurrent tasks using
//! `buffer_unordered`. Each object goes through
//! parse key → fetch → extract → normalize → reconcile → store,
//! and a failure on one object is logged and counted without touching the
//! others.
//!
//! Records for the same identifier can arrive from many objects at once. The
//! read-reconcile-write sequence for one identifier runs under a per-identifier
//! lock, and the store writes themselves are conditional, so concurrent
//! workers cannot drop each other's records.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use voicelog_common::types::{CanonicalRecord, Category, RawObjectRef, RecordKind};

use crate::config::PipelineConfig;
use crate::error::{IngestError, Result};
use crate::filename::FileNameParser;
use crate::markup::MarkupExtractor;
use crate::normalize::RecordNormalizer;
use crate::reconcile::{Action, DuplicatePolicy, ReconciliationEngine, SkipReason};
use crate::source::ObjectSource;
use crate::store::{AggregateStore, AppendOutcome, PutOutcome};

/// End-of-run report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub run_id: Uuid,
    pub total: u64,
    pub succeeded: u64,
    /// Objects whose file name category is not recognised
    pub skipped: u64,
    pub failed: u64,
    /// Objects never started because the run was cancelled
    pub not_started: u64,
    pub records_inserted: u64,
    pub records_appended: u64,
    pub records_duplicate: u64,
    /// Records dropped during normalization (bad timestamp, unknown kind)
    pub records_discarded: u64,
    pub fragments_skipped: u64,
    pub cancelled: bool,
    pub duration_secs: f64,
}

impl Summary {
    /// Every object either succeeded or was deliberately skipped
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.not_started == 0
    }

    pub fn records_written(&self) -> u64 {
        self.records_inserted + self.records_appended
    }
}

/// Lock-free counters shared by the workers of one run
#[derive(Debug, Default)]
pub struct SummaryCounters {
    succeeded: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    not_started: AtomicU64,
    records_inserted: AtomicU64,
    records_appended: AtomicU64,
    records_duplicate: AtomicU64,
    records_discarded: AtomicU64,
    fragments_skipped: AtomicU64,
}

impl SummaryCounters {
    fn add(counter: &AtomicU64, n: u64) -> u64 {
        counter.fetch_add(n, Ordering::Relaxed) + n
    }

    fn record(&self, stats: &ObjectStats) {
        Self::add(&self.records_inserted, stats.inserted);
        Self::add(&self.records_appended, stats.appended);
        Self::add(&self.records_duplicate, stats.duplicate);
        Self::add(&self.records_discarded, stats.discarded);
        Self::add(&self.fragments_skipped, stats.fragments_skipped);
    }

    fn snapshot(
        &self,
        run_id: Uuid,
        total: u64,
        cancelled: bool,
        started: Instant,
    ) -> Summary {
        Summary {
            run_id,
            total,
            succeeded: self.succeeded.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            not_started: self.not_started.load(Ordering::Relaxed),
            records_inserted: self.records_inserted.load(Ordering::Relaxed),
            records_appended: self.records_appended.load(Ordering::Relaxed),
            records_duplicate: self.records_duplicate.load(Ordering::Relaxed),
            records_discarded: self.records_discarded.load(Ordering::Relaxed),
            fragments_skipped: self.fragments_skipped.load(Ordering::Relaxed),
            cancelled,
            duration_secs: started.elapsed().as_secs_f64(),
        }
    }
}

/// Keyed async locks, one per identifier
///
/// A slot is removed when its last holder releases it, so the table only
/// holds identifiers with work in flight.
#[derive(Debug, Default)]
pub struct IdentifierLocks {
    table: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IdentifierLocks {
    pub async fn lock(&self, identifier: &str) -> IdentifierGuard<'_> {
        let slot = self
            .table()
            .entry(identifier.to_string())
            .or_default()
            .clone();
        let guard = Arc::clone(&slot).lock_owned().await;

        IdentifierGuard {
            locks: self,
            identifier: identifier.to_string(),
            slot,
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held while one identifier is being reconciled and written
pub struct IdentifierGuard<'a> {
    locks: &'a IdentifierLocks,
    identifier: String,
    slot: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdentifierGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());

        // Slots are only cloned under the table lock: two references (the
        // table's and ours) means nobody else is waiting
        let mut table = self.locks.table();
        if Arc::strong_count(&self.slot) == 2 {
            table.remove(&self.identifier);
        }
    }
}

/// What happened to one object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectOutcome {
    Processed(ObjectStats),
    /// Unrecognised category; nothing fetched
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectStats {
    pub inserted: u64,
    pub appended: u64,
    pub duplicate: u64,
    pub discarded: u64,
    pub fragments_skipped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOutcome {
    Inserted,
    Appended,
    Duplicate,
}

pub struct IngestionDriver {
    source: Arc<dyn ObjectSource>,
    store: Arc<dyn AggregateStore>,
    config: PipelineConfig,
    parser: FileNameParser,
    extractor: MarkupExtractor,
    normalizer: RecordNormalizer,
    engine: ReconciliationEngine,
    locks: IdentifierLocks,
}

impl IngestionDriver {
    pub fn new(
        source: Arc<dyn ObjectSource>,
        store: Arc<dyn AggregateStore>,
        config: PipelineConfig,
    ) -> Result<Self> {
        if config.concurrency == 0 || config.progress_every == 0 {
            return Err(IngestError::Config(
                "concurrency and progress interval must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            source,
            store,
            parser: FileNameParser::new(),
            extractor: MarkupExtractor::new()?,
            normalizer: RecordNormalizer::new(
                config.identifier_policy,
                config.identifier_precedence,
            ),
            engine: ReconciliationEngine::new(config.duplicate_policy),
            locks: IdentifierLocks::default(),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// List every object under `prefix`, then run over the full listing
    pub async fn run_prefix(&self, prefix: &str, token: CancellationToken) -> Result<Summary> {
        info!(source = %self.source.describe(), prefix, "Listing export objects");
        let refs = self.source.list(prefix).await?;
        Ok(self.run(refs, token).await)
    }

    /// Process `refs` and report what happened
    ///
    /// Never fails as a whole: per-object errors land in `Summary::failed`.
    pub async fn run(&self, refs: Vec<RawObjectRef>, token: CancellationToken) -> Summary {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let total = refs.len() as u64;
        let counters = SummaryCounters::default();

        info!(
            %run_id,
            total,
            concurrency = self.config.concurrency,
            source = %self.source.describe(),
            store = self.store.name(),
            policy = ?self.engine.policy(),
            "Starting ingestion run"
        );

        stream::iter(refs)
            .map(|object| {
                let counters = &counters;
                let token = &token;
                async move {
                    if token.is_cancelled() {
                        SummaryCounters::add(&counters.not_started, 1);
                        return;
                    }

                    match self.process_object(&object).await {
                        Ok(ObjectOutcome::Processed(stats)) => {
                            counters.record(&stats);
                            let done = SummaryCounters::add(&counters.succeeded, 1);
                            if done % self.config.progress_every == 0 {
                                info!(%run_id, succeeded = done, total, "Ingestion progress");
                            }
                        }
                        Ok(ObjectOutcome::Skipped) => {
                            SummaryCounters::add(&counters.skipped, 1);
                        }
                        Err(e) => {
                            error!(
                                %run_id,
                                key = %object.key,
                                error_kind = e.kind(),
                                error = %e,
                                "Failed to ingest object"
                            );
                            SummaryCounters::add(&counters.failed, 1);
                        }
                    }
                }
            })
            .buffer_unordered(self.config.concurrency)
            .collect::<()>()
            .await;

        let summary = counters.snapshot(run_id, total, token.is_cancelled(), started);

        if summary.cancelled {
            warn!(
                %run_id,
                not_started = summary.not_started,
                "Ingestion run cancelled before all objects were started"
            );
        }
        info!(
            %run_id,
            total = summary.total,
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            records_written = summary.records_written(),
            duration_secs = summary.duration_secs,
            "Ingestion run finished"
        );

        summary
    }

    /// Run one object through the full pipeline
    #[instrument(skip(self, object), fields(key = %object.key))]
    pub async fn process_object(&self, object: &RawObjectRef) -> Result<ObjectOutcome> {
        let meta = self.parser.parse(&object.key)?;

        if meta.category == Category::Unknown {
            debug!("Skipping object with unrecognised category");
            return Ok(ObjectOutcome::Skipped);
        }

        if self.config.strict_timestamps {
            self.parser.timestamp(&meta)?;
        }

        let bytes = self.source.fetch(&object.key).await?;
        let extraction = self.extractor.extract(&bytes, meta.category)?;

        let mut stats = ObjectStats {
            fragments_skipped: extraction.skips.len() as u64,
            ..ObjectStats::default()
        };

        for raw in extraction.records {
            let record = match self.normalizer.normalize(&meta, raw) {
                Ok(record) if record.kind == RecordKind::Unknown => {
                    warn!(timestamp = %record.timestamp, "Discarding record of unknown kind");
                    stats.discarded += 1;
                    continue;
                }
                Ok(record) => record,
                Err(e @ IngestError::TimestampFormat { .. }) => {
                    warn!(error = %e, "Discarding record with unparseable timestamp");
                    stats.discarded += 1;
                    continue;
                }
                Err(e @ IngestError::MissingIdentifier { .. }) => {
                    warn!(error = %e, "Discarding record without an identifier");
                    stats.discarded += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match self.store_record(&record).await? {
                RecordOutcome::Inserted => stats.inserted += 1,
                RecordOutcome::Appended => stats.appended += 1,
                RecordOutcome::Duplicate => stats.duplicate += 1,
            }
        }

        debug!(
            inserted = stats.inserted,
            appended = stats.appended,
            duplicate = stats.duplicate,
            discarded = stats.discarded,
            fragments_skipped = stats.fragments_skipped,
            "Object ingested"
        );

        Ok(ObjectOutcome::Processed(stats))
    }

    async fn store_record(&self, record: &CanonicalRecord) -> Result<RecordOutcome> {
        let _guard = self.locks.lock(&record.identifier).await;

        let existing = self.store.get_item(&record.identifier).await?;
        let action = self.engine.reconcile(record, existing.as_ref());

        if let Some(outcome) = self.perform(&action).await? {
            return Ok(outcome);
        }

        // Lost an insert race with a writer outside this process
        debug!(identifier = %record.identifier, "Aggregate appeared concurrently, reconciling again");
        let existing = self.store.get_item(&record.identifier).await?;
        let action = match (self.engine.reconcile(record, existing.as_ref()), self.engine.policy()) {
            // The aggregate existed a moment ago, so this identifier is taken
            (Action::Insert(_), DuplicatePolicy::SkipExisting) => {
                Action::SkipDuplicate(SkipReason::IdentifierExists)
            }
            (Action::Insert(_), DuplicatePolicy::History) => Action::AppendHistory {
                identifier: record.identifier.clone(),
                entry: record.into(),
            },
            (action, _) => action,
        };

        Ok(self.perform(&action).await?.unwrap_or(RecordOutcome::Duplicate))
    }

    /// `None` when a conditional insert found the aggregate already present
    async fn perform(&self, action: &Action) -> Result<Option<RecordOutcome>> {
        let outcome = match action {
            Action::Insert(aggregate) => match self.store.put_if_absent(aggregate).await? {
                PutOutcome::Inserted => Some(RecordOutcome::Inserted),
                PutOutcome::AlreadyExists => None,
            },
            Action::AppendHistory { identifier, entry } => {
                match self.store.append_entry(identifier, entry).await? {
                    AppendOutcome::Appended => Some(RecordOutcome::Appended),
                    AppendOutcome::Duplicate => Some(RecordOutcome::Duplicate),
                }
            }
            Action::SkipDuplicate(reason) => {
                debug!(?reason, "Record already stored");
                Some(RecordOutcome::Duplicate)
            }
        };
        Ok(outcome)
    }
}
