//! Concurrent statement ingestion
//!
//! Parsing runs on a pool of worker tasks, persistence on exactly one writer:
//!
//! ```text
//!            ┌─► worker 0 ─┐
//! work queue ├─► worker 1 ─┼─► results ─► writer ─► Database
//!            └─► worker N ─┘
//! ```
//!
//! Workers never touch the database. Whatever happens while extracting or
//! parsing a file (including a panic) becomes a [`ScanOutcome::Failed`] for
//! that file, and the writer logs and skips it. A file that failed is not
//! recorded, so the next run picks it up again.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::{Config, ScanConfig, WorkPartition};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::extract::TextExtractor;
use crate::models::ParsedStatement;
use crate::rules::{apply_rules_dir, RulesSummary};
use crate::statement::{StatementParser, CURRENCY};
use crate::transfers::{link_transfers, LinkSummary};

/// A statement file waiting to be scanned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub account_id: i64,
    /// Filename inside the account folder (the `source_file.path` key)
    pub filename: String,
    pub path: PathBuf,
    /// Size in bytes, used for size-balanced sharding
    pub size: u64,
}

impl PendingFile {
    fn key(&self) -> (i64, String) {
        (self.account_id, self.filename.clone())
    }
}

/// What a worker reports for one file
#[derive(Debug)]
pub enum ScanOutcome {
    Parsed {
        worker: usize,
        file: PendingFile,
        statement: ParsedStatement,
        scanned_at: DateTime<Utc>,
    },
    Failed {
        worker: usize,
        file: PendingFile,
        error: Error,
    },
}

/// A file skipped during ingestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub account_id: i64,
    pub filename: String,
    pub error: String,
}

/// Outcome of one ingestion batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub files_dispatched: usize,
    pub files_scanned: usize,
    pub files_failed: usize,
    pub transactions_inserted: usize,
    pub failures: Vec<FileFailure>,
}

/// Outcome of a full run: ingestion, rule passes, transfer linking
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ingest: IngestSummary,
    pub rules: RulesSummary,
    pub link: LinkSummary,
}

/// Files of `bank` accounts that have no `source_file` row yet
///
/// Folders are listed in filename order. A missing account folder is logged
/// and skipped.
pub fn find_unscanned(db: &Database, bank: &str) -> Result<Vec<PendingFile>> {
    let mut pending = Vec::new();

    for account in db.list_accounts_for_bank(bank)? {
        let scanned = db.scanned_paths(account.id)?;
        let entries = match list_folder(&account.folder) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    "{}: cannot list {}: {}",
                    account.name,
                    account.folder.display(),
                    e
                );
                continue;
            }
        };

        let mut count = 0;
        for path in entries {
            let metadata = fs::metadata(&path)?;
            if !metadata.is_file() {
                continue;
            }
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                warn!("{}: skipping non UTF-8 filename {}", account.name, path.display());
                continue;
            };
            if scanned.contains(filename) {
                continue;
            }
            pending.push(PendingFile {
                account_id: account.id,
                filename: filename.to_string(),
                size: metadata.len(),
                path: path.clone(),
            });
            count += 1;
        }

        if count > 0 {
            info!("{} ({} files not scanned)", account.name, count);
        }
    }

    Ok(pending)
}

fn list_folder(folder: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(folder)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

/// Group files into at most `shards` byte-size balanced shards
///
/// Files keep their order; a new shard is opened once the current one holds
/// more than `total / shards` bytes.
pub fn shard_by_size(files: Vec<PendingFile>, shards: usize) -> Vec<Vec<PendingFile>> {
    let total: u64 = files.iter().map(|f| f.size).sum();
    let target = total / shards.max(1) as u64;

    let mut result = Vec::new();
    let mut current = Vec::new();
    let mut weight = 0;
    for file in files {
        if weight > target && !current.is_empty() {
            result.push(std::mem::take(&mut current));
            weight = 0;
        }
        weight += file.size;
        current.push(file);
    }
    if !current.is_empty() {
        result.push(current);
    }
    result
}

type WorkQueue = Arc<Mutex<mpsc::Receiver<PendingFile>>>;

/// Closed queue pre-filled with `files`
fn filled_queue(files: Vec<PendingFile>) -> Result<WorkQueue> {
    let (tx, rx) = mpsc::channel(files.len().max(1));
    for file in files {
        tx.try_send(file)
            .map_err(|e| Error::Pipeline(format!("work queue rejected a file: {}", e)))?;
    }
    Ok(Arc::new(Mutex::new(rx)))
}

/// Parser worker pool plus the single database writer
pub struct Pipeline {
    db: Database,
    extractor: Arc<dyn TextExtractor>,
    parser: Arc<StatementParser>,
    workers: usize,
    partition: WorkPartition,
}

impl Pipeline {
    pub fn new(
        db: Database,
        extractor: Arc<dyn TextExtractor>,
        parser: StatementParser,
        scan: &ScanConfig,
    ) -> Self {
        Self {
            db,
            extractor,
            parser: Arc::new(parser),
            workers: scan.workers.max(1),
            partition: scan.partition,
        }
    }

    /// Scan and persist `files`, returning once every file has been handled
    ///
    /// Parse failures are reported in the summary. A database error aborts
    /// the batch; files already written stay committed.
    pub async fn ingest(&self, files: Vec<PendingFile>) -> Result<IngestSummary> {
        if files.is_empty() {
            return Ok(IngestSummary::default());
        }

        let outstanding: HashSet<(i64, String)> = files.iter().map(PendingFile::key).collect();
        let queues = self.partition_work(files)?;
        info!(
            "Scanning {} files with {} workers ({:?})",
            outstanding.len(),
            queues.len(),
            self.partition
        );

        let (results_tx, results_rx) = mpsc::channel(queues.len() * 2);

        let db = self.db.clone();
        let writer = tokio::task::spawn_blocking(move || write_results(&db, results_rx, outstanding));

        let mut workers = Vec::with_capacity(queues.len());
        for (id, queue) in queues.into_iter().enumerate() {
            workers.push(tokio::spawn(run_worker(
                id,
                queue,
                self.extractor.clone(),
                self.parser.clone(),
                results_tx.clone(),
            )));
        }
        drop(results_tx);

        for worker in workers {
            if let Err(e) = worker.await {
                error!("worker task failed: {}", e);
            }
        }

        writer
            .await
            .map_err(|e| Error::Pipeline(format!("writer task failed: {}", e)))?
    }

    /// One queue per worker: a shared queue, or one shard each
    fn partition_work(&self, files: Vec<PendingFile>) -> Result<Vec<WorkQueue>> {
        match self.partition {
            WorkPartition::Queue => {
                let workers = self.workers.min(files.len());
                let queue = filled_queue(files)?;
                Ok(vec![queue; workers])
            }
            WorkPartition::Size => shard_by_size(files, self.workers)
                .into_iter()
                .map(filled_queue)
                .collect(),
        }
    }
}

async fn run_worker(
    id: usize,
    queue: WorkQueue,
    extractor: Arc<dyn TextExtractor>,
    parser: Arc<StatementParser>,
    results: mpsc::Sender<ScanOutcome>,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(file) = next else {
            break;
        };

        let outcome = scan_file(id, file, extractor.clone(), parser.clone()).await;
        if results.send(outcome).await.is_err() {
            debug!("[worker {}] writer gone, stopping", id);
            break;
        }
    }
}

async fn scan_file(
    worker: usize,
    file: PendingFile,
    extractor: Arc<dyn TextExtractor>,
    parser: Arc<StatementParser>,
) -> ScanOutcome {
    let path = file.path.clone();
    let task = tokio::task::spawn_blocking(move || {
        let text = extractor.extract(&path)?;
        parser.parse(&text)
    });

    match task.await {
        Ok(Ok(statement)) => ScanOutcome::Parsed {
            worker,
            file,
            statement,
            scanned_at: Utc::now(),
        },
        Ok(Err(error)) => ScanOutcome::Failed {
            worker,
            file,
            error,
        },
        Err(e) => ScanOutcome::Failed {
            worker,
            file,
            error: Error::Pipeline(format!("scan task failed: {}", e)),
        },
    }
}

/// Drain worker results until every dispatched file is accounted for
fn write_results(
    db: &Database,
    mut results: mpsc::Receiver<ScanOutcome>,
    mut outstanding: HashSet<(i64, String)>,
) -> Result<IngestSummary> {
    let mut summary = IngestSummary {
        files_dispatched: outstanding.len(),
        ..Default::default()
    };

    while !outstanding.is_empty() {
        let Some(outcome) = results.blocking_recv() else {
            break;
        };

        match outcome {
            ScanOutcome::Parsed {
                worker,
                file,
                statement,
                scanned_at,
            } => {
                outstanding.remove(&file.key());
                let recorded = db.record_statement(
                    file.account_id,
                    &file.filename,
                    &statement,
                    CURRENCY,
                    scanned_at,
                )?;
                info!(
                    "[worker {}] {} -> {} ops",
                    worker, file.filename, recorded.transactions
                );
                summary.files_scanned += 1;
                summary.transactions_inserted += recorded.transactions;
            }
            ScanOutcome::Failed {
                worker,
                file,
                error,
            } => {
                outstanding.remove(&file.key());
                warn!("[worker {}] {} skipped: {}", worker, file.filename, error);
                summary.files_failed += 1;
                summary.failures.push(FileFailure {
                    account_id: file.account_id,
                    filename: file.filename,
                    error: error.to_string(),
                });
            }
        }
    }

    if !outstanding.is_empty() {
        warn!("{} files produced no result", outstanding.len());
    }

    Ok(summary)
}

/// Scan new statements, apply the rule files, then link internal transfers
pub async fn run_all(config: &Config, extractor: Arc<dyn TextExtractor>) -> Result<RunSummary> {
    if let Some(parent) = config.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let db = Database::new(&config.database_path.to_string_lossy())?;

    let files = find_unscanned(&db, &config.scan.bank)?;
    let pipeline = Pipeline::new(
        db.clone(),
        extractor,
        StatementParser::new(config.ledger.self_payee.as_str()),
        &config.scan,
    );
    let ingest = pipeline.ingest(files).await?;

    let rules = if config.rules_path.is_dir() {
        apply_rules_dir(&db, &config.rules_path)?
    } else {
        warn!("rules directory {} not found", config.rules_path.display());
        RulesSummary::default()
    };

    let link = link_transfers(
        &db,
        &config.ledger.self_payee,
        &config.ledger.internal_transfer_category,
    )?;

    Ok(RunSummary {
        ingest,
        rules,
        link,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::PAGE_BREAK;
    use std::collections::HashMap;

    const BANK: &str = "Société Générale";

    /// Serves canned text keyed by filename; `broken*` files fail, `panic*` files panic
    struct FixtureExtractor {
        texts: HashMap<String, String>,
    }

    impl TextExtractor for FixtureExtractor {
        fn extract(&self, path: &Path) -> Result<String> {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if name.starts_with("panic") {
                panic!("extractor crashed on {}", name);
            }
            self.texts
                .get(&name)
                .cloned()
                .ok_or_else(|| Error::Extraction(format!("cannot read {}", name)))
        }
    }

    fn statement(lines: &[(&str, &str, &str)]) -> String {
        let mut page = vec![
            "          du 01/01/2024 au 31/01/2024".to_string(),
            format!(
                "{:<11}{:<11}{:<40}{:>14}{:>14}",
                "Date", "Valeur", "Nature de l'opération", "Débit", "Crédit"
            ),
        ];
        for (date, text, amount) in lines {
            page.push(format!("{:<11}{:<11}{:<40}{:>14}", date, date, text, amount));
        }
        page.push("suite >>>".to_string());
        format!("{}{}", page.join("\n"), PAGE_BREAK)
    }

    fn pending(account_id: i64, filename: &str, size: u64) -> PendingFile {
        PendingFile {
            account_id,
            filename: filename.to_string(),
            path: PathBuf::from(filename),
            size,
        }
    }

    fn scan_config(workers: usize, partition: WorkPartition) -> ScanConfig {
        ScanConfig {
            workers,
            partition,
            ..Default::default()
        }
    }

    fn fixtures() -> Arc<dyn TextExtractor> {
        let mut texts = HashMap::new();
        texts.insert(
            "janvier.pdf".to_string(),
            statement(&[
                ("02/01/2024", "PRLV SEPA EDF", "45,00"),
                ("03/01/2024", "PRLV SEPA FREE", "29,99"),
            ]),
        );
        texts.insert(
            "fevrier.pdf".to_string(),
            statement(&[("02/02/2024", "PRLV SEPA EDF", "47,00")]),
        );
        texts.insert("illisible.pdf".to_string(), "no operations here".to_string());
        Arc::new(FixtureExtractor { texts })
    }

    fn account_with_files(db: &Database, dir: &Path, names: &[&str]) -> i64 {
        for name in names {
            fs::write(dir.join(name), b"%PDF").unwrap();
        }
        db.create_account("Courant", BANK, dir).unwrap()
    }

    #[test]
    fn test_shard_by_size() {
        let files = vec![
            pending(1, "a", 50),
            pending(1, "b", 10),
            pending(1, "c", 10),
            pending(1, "d", 30),
        ];
        let shards = shard_by_size(files, 2);

        let names: Vec<Vec<&str>> = shards
            .iter()
            .map(|s| s.iter().map(|f| f.filename.as_str()).collect())
            .collect();
        assert_eq!(names, vec![vec!["a", "b"], vec!["c", "d"]]);
    }

    #[test]
    fn test_shard_by_size_never_exceeds_worker_count() {
        let files: Vec<_> = (0..20).map(|i| pending(1, &i.to_string(), 7)).collect();
        for workers in 1..6 {
            let shards = shard_by_size(files.clone(), workers);
            assert!(shards.len() <= workers);
            assert_eq!(shards.iter().map(Vec::len).sum::<usize>(), 20);
        }
        assert!(shard_by_size(Vec::new(), 3).is_empty());
    }

    #[test]
    fn test_find_unscanned() {
        let db = Database::in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let account = account_with_files(&db, dir.path(), &["b.pdf", "a.pdf", "c.pdf"]);
        fs::create_dir(dir.path().join("archive")).unwrap();

        let other = tempfile::tempdir().unwrap();
        fs::write(other.path().join("x.pdf"), b"%PDF").unwrap();
        db.create_account("Livret", "Autre Banque", other.path())
            .unwrap();

        db.record_statement(account, "b.pdf", &ParsedStatement::default(), CURRENCY, Utc::now())
            .unwrap();

        let files = find_unscanned(&db, BANK).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "c.pdf"]);
        assert!(files.iter().all(|f| f.account_id == account && f.size == 4));
    }

    #[test]
    fn test_find_unscanned_skips_missing_folder() {
        let db = Database::in_memory().unwrap();
        db.create_account("Fantome", BANK, Path::new("/nonexistent/releve"))
            .unwrap();
        assert!(find_unscanned(&db, BANK).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_worker_failure_isolation() {
        let db = Database::in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let account = account_with_files(
            &db,
            dir.path(),
            &["janvier.pdf", "manquant.pdf", "fevrier.pdf"],
        );

        let pipeline = Pipeline::new(
            db.clone(),
            fixtures(),
            StatementParser::new("Jane Doe"),
            &scan_config(2, WorkPartition::Queue),
        );
        let files = find_unscanned(&db, BANK).unwrap();
        let summary = pipeline.ingest(files).await.unwrap();

        assert_eq!(summary.files_dispatched, 3);
        assert_eq!(summary.files_scanned, 2);
        assert_eq!(summary.files_failed, 1);
        assert_eq!(summary.transactions_inserted, 3);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].filename, "manquant.pdf");
        assert_eq!(db.count_transactions().unwrap(), 3);

        // The failed file is still pending
        let remaining = find_unscanned(&db, BANK).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].filename, "manquant.pdf");
        assert_eq!(db.list_source_files(account).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_panicking_extractor_is_a_file_failure() {
        let db = Database::in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        account_with_files(&db, dir.path(), &["janvier.pdf", "panic.pdf"]);

        let pipeline = Pipeline::new(
            db.clone(),
            fixtures(),
            StatementParser::new("Jane Doe"),
            &scan_config(3, WorkPartition::Queue),
        );
        let summary = pipeline
            .ingest(find_unscanned(&db, BANK).unwrap())
            .await
            .unwrap();

        assert_eq!(summary.files_scanned, 1);
        assert_eq!(summary.files_failed, 1);
        assert_eq!(summary.failures[0].filename, "panic.pdf");
    }

    #[tokio::test]
    async fn test_empty_statement_is_recorded() {
        let db = Database::in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        account_with_files(&db, dir.path(), &["illisible.pdf"]);

        let pipeline = Pipeline::new(
            db.clone(),
            fixtures(),
            StatementParser::new("Jane Doe"),
            &scan_config(1, WorkPartition::Queue),
        );
        let summary = pipeline
            .ingest(find_unscanned(&db, BANK).unwrap())
            .await
            .unwrap();

        assert_eq!(summary.files_scanned, 1);
        assert_eq!(summary.transactions_inserted, 0);
        assert!(find_unscanned(&db, BANK).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_idempotent_rescan() {
        let db = Database::in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        account_with_files(&db, dir.path(), &["janvier.pdf", "fevrier.pdf"]);

        for partition in [WorkPartition::Size, WorkPartition::Queue] {
            let pipeline = Pipeline::new(
                db.clone(),
                fixtures(),
                StatementParser::new("Jane Doe"),
                &scan_config(4, partition),
            );
            pipeline
                .ingest(find_unscanned(&db, BANK).unwrap())
                .await
                .unwrap();
            assert_eq!(db.count_transactions().unwrap(), 3);
        }
    }

    #[tokio::test]
    async fn test_size_partition_scans_everything() {
        let db = Database::in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        account_with_files(
            &db,
            dir.path(),
            &["janvier.pdf", "fevrier.pdf", "illisible.pdf", "absent.pdf"],
        );

        let pipeline = Pipeline::new(
            db.clone(),
            fixtures(),
            StatementParser::new("Jane Doe"),
            &scan_config(3, WorkPartition::Size),
        );
        let summary = pipeline
            .ingest(find_unscanned(&db, BANK).unwrap())
            .await
            .unwrap();

        assert_eq!(summary.files_dispatched, 4);
        assert_eq!(summary.files_scanned, 3);
        assert_eq!(summary.files_failed, 1);
        assert_eq!(db.count_transactions().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_ingest_nothing() {
        let db = Database::in_memory().unwrap();
        let pipeline = Pipeline::new(
            db,
            fixtures(),
            StatementParser::new("Jane Doe"),
            &ScanConfig::default(),
        );
        assert_eq!(
            pipeline.ingest(Vec::new()).await.unwrap(),
            IngestSummary::default()
        );
    }
}
