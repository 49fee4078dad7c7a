//! Integration tests for releve-core
//!
//! These tests exercise the full scan → rules → transfer linking workflow.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use releve_core::{
    apply_rules_dir, find_unscanned, link_transfers, run_all, Config, Database, Error, Pipeline,
    Result, ScanConfig, StatementParser, TextExtractor, WorkPartition,
};

const BANK: &str = "Société Générale";
const ME: &str = "Jane Doe";
const INTERNAL: &str = "Virement interne";

/// Extractor returning canned layout text per filename
struct CannedExtractor(HashMap<String, String>);

impl TextExtractor for CannedExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.0
            .get(&name)
            .cloned()
            .ok_or_else(|| Error::Extraction(format!("unreadable document {}", name)))
    }
}

enum Line<'a> {
    Debit(&'a str, &'a str, &'a str),
    Credit(&'a str, &'a str, &'a str),
    More(&'a str),
}

/// Render one statement page in the bank's column layout
fn statement_page(period: &str, lines: &[Line]) -> String {
    let mut page = vec![
        "SOCIETE GENERALE                          RELEVE DES OPERATIONS".to_string(),
        format!("                          du {}", period),
        String::new(),
        format!(
            "{:<11}{:<11}{:<40}{:>14}{:>14}",
            "Date", "Valeur", "Nature de l'opération", "Débit", "Crédit"
        ),
    ];
    for line in lines {
        page.push(match line {
            Line::Debit(date, text, amount) => {
                format!("{:<11}{:<11}{:<40}{:>14}", date, date, text, amount)
            }
            Line::Credit(date, text, amount) => {
                format!("{:<11}{:<11}{:<40}{:>14}{:>14}", date, date, text, "", amount)
            }
            Line::More(text) => format!("{:<22}{}", "", text),
        });
    }
    page.push(format!("{:<22}TOTAUX DES MOUVEMENTS", ""));
    page.join("\n")
}

fn checking_statement() -> String {
    statement_page(
        "01/01/2024 au 31/01/2024",
        &[
            Line::Debit("03/01/2024", "CARTE X1234 02/01 BOULANGERIE PAUL", "4,20"),
            Line::Debit("05/01/2024", "VIR EUROPEEN EMIS LOGITEL", "500,00"),
            Line::More("POUR: Jane Doe"),
            Line::More("REF: 7777"),
            Line::More("MOTIF: EPARGNE"),
            Line::Credit("10/01/2024", "VIR RECU 4242", "2.100,00"),
            Line::More("DE: SARL EXEMPLE"),
            Line::More("MOTIF: SALAIRE JANVIER"),
            Line::Debit("15/01/2024", "FRAIS PAIEMENT HORS ZONE EURO", "1,50"),
        ],
    )
}

fn savings_statement() -> String {
    statement_page(
        "01/01/2024 au 31/01/2024",
        &[
            Line::Credit("05/01/2024", "VIR RECU 7777", "500,00"),
            Line::More("DE: Jane Doe"),
        ],
    )
}

fn extractor() -> Arc<dyn TextExtractor> {
    let mut texts = HashMap::new();
    texts.insert("courant-2024-01.pdf".to_string(), checking_statement());
    texts.insert("livret-2024-01.pdf".to_string(), savings_statement());
    Arc::new(CannedExtractor(texts))
}

fn write_rules(dir: &Path) {
    fs::write(
        dir.join("01_payees.csv"),
        "\u{feff}payee;;motif;\nBoulangerie Paul;set;CARTE X1234 02/01 BOULANGERIE;startswith\n",
    )
    .unwrap();
    fs::create_dir(dir.join("02_categories")).unwrap();
    fs::write(
        dir.join("02_categories/alimentation.csv"),
        "category;;payee;\nAlimentation;set;Boulangerie Paul;equals\n",
    )
    .unwrap();
    fs::write(
        dir.join("02_categories/revenus.csv"),
        "category;;payee;;amount;\nSalaire;set;SARL EXEMPLE;equals;;\n",
    )
    .unwrap();
    fs::write(
        dir.join("03_labels.csv"),
        "label;;payee;\nSALAIRE|Salaire;replace;SARL;startswith\n",
    )
    .unwrap();
}

struct Ledger {
    db: Database,
    _checking: tempfile::TempDir,
    _savings: tempfile::TempDir,
    broken: String,
}

fn ledger() -> Ledger {
    let db = Database::in_memory().expect("Failed to create in-memory database");
    let checking = tempfile::tempdir().unwrap();
    let savings = tempfile::tempdir().unwrap();

    fs::write(checking.path().join("courant-2024-01.pdf"), b"%PDF-1.4").unwrap();
    fs::write(checking.path().join("courant-2024-02.pdf"), b"%PDF-1.4").unwrap();
    fs::write(savings.path().join("livret-2024-01.pdf"), b"%PDF-1.4").unwrap();

    db.create_account("Compte courant", BANK, checking.path())
        .unwrap();
    db.create_account("Livret A", BANK, savings.path()).unwrap();

    Ledger {
        db,
        _checking: checking,
        _savings: savings,
        broken: "courant-2024-02.pdf".to_string(),
    }
}

// =============================================================================
// Ingestion → Rules → Transfers
// =============================================================================

#[tokio::test]
async fn test_full_workflow() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let ledger = ledger();
    let db = &ledger.db;
    let rules = tempfile::tempdir().unwrap();
    write_rules(rules.path());

    // Scan
    let pipeline = Pipeline::new(
        db.clone(),
        extractor(),
        StatementParser::new(ME),
        &ScanConfig {
            workers: 2,
            ..Default::default()
        },
    );
    let pending = find_unscanned(db, BANK).unwrap();
    assert_eq!(pending.len(), 3);

    let ingest = pipeline.ingest(pending).await.unwrap();
    assert_eq!(ingest.files_scanned, 2);
    assert_eq!(ingest.files_failed, 1);
    assert_eq!(ingest.failures[0].filename, ledger.broken);
    assert_eq!(ingest.transactions_inserted, 5);

    let transactions = db.list_transactions().unwrap();
    let by_motif = |prefix: &str| {
        transactions
            .iter()
            .find(|t| t.motif.starts_with(prefix))
            .unwrap_or_else(|| panic!("no transaction for {}", prefix))
            .clone()
    };

    let bread = by_motif("CARTE X1234");
    assert_eq!(bread.amount, -4.2);
    assert_eq!(bread.payee.as_deref(), Some("BOULANGERIE PAUL"));

    let salary = by_motif("VIR RECU 4242");
    assert_eq!(salary.amount, 2100.0);
    assert_eq!(salary.payee.as_deref(), Some("SARL EXEMPLE"));
    assert_eq!(salary.label.as_deref(), Some("SALAIRE JANVIER"));

    let fees = by_motif("FRAIS");
    assert_eq!(fees.amount, -1.5);
    assert_eq!(fees.label.as_deref(), Some("Frais bancaires"));

    // Rules
    db.insert_categories(&["Alimentation", "Salaire", INTERNAL])
        .unwrap();
    let summary = apply_rules_dir(db, rules.path()).unwrap();
    assert_eq!(summary.rule_sets_applied, 4);
    assert_eq!(summary.rows_changed, 4);

    let transactions = db.list_transactions().unwrap();
    let find = |id: i64| transactions.iter().find(|t| t.id == id).unwrap();
    assert_eq!(find(bread.id).payee.as_deref(), Some("Boulangerie Paul"));
    // The category set sees the payee rewritten by the earlier set
    assert_eq!(find(bread.id).category.as_deref(), Some("Alimentation"));
    assert_eq!(find(salary.id).category.as_deref(), Some("Salaire"));
    assert_eq!(find(salary.id).label.as_deref(), Some("Salaire JANVIER"));

    // Transfers
    let link = link_transfers(db, ME, INTERNAL).unwrap();
    assert_eq!(link.candidates, 2);
    assert_eq!(link.pairs, 1);

    let mut internal: Vec<f64> = db
        .list_transactions()
        .unwrap()
        .iter()
        .filter(|t| t.category.as_deref() == Some(INTERNAL))
        .map(|t| t.amount)
        .collect();
    internal.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(internal, vec![-500.0, 500.0]);
}

#[tokio::test]
async fn test_rescan_only_picks_up_new_files() {
    let ledger = ledger();
    let db = &ledger.db;
    let pipeline = Pipeline::new(
        db.clone(),
        extractor(),
        StatementParser::new(ME),
        &ScanConfig {
            workers: 3,
            partition: WorkPartition::Size,
            ..Default::default()
        },
    );

    pipeline
        .ingest(find_unscanned(db, BANK).unwrap())
        .await
        .unwrap();
    let count = db.count_transactions().unwrap();

    let second = pipeline
        .ingest(find_unscanned(db, BANK).unwrap())
        .await
        .unwrap();
    assert_eq!(second.files_dispatched, 1);
    assert_eq!(second.files_scanned, 0);
    assert_eq!(db.count_transactions().unwrap(), count);
}

#[tokio::test]
async fn test_run_all() {
    let ledger = ledger();
    let rules = tempfile::tempdir().unwrap();
    write_rules(rules.path());

    let config = Config::from_toml_str(&format!(
        r#"
        [database]
        path = "{}"

        [rules]
        path = "{}"

        [scan]
        workers = 2

        [ledger]
        self_payee = "{}"
        "#,
        ledger.db.path(),
        rules.path().display(),
        ME
    ))
    .unwrap();

    let summary = run_all(&config, extractor()).await.unwrap();

    assert_eq!(summary.ingest.files_scanned, 2);
    assert_eq!(summary.ingest.files_failed, 1);
    assert_eq!(summary.rules.rule_sets_applied, 4);
    assert_eq!(summary.link.pairs, 1);
}

#[test]
fn test_malformed_rule_file_aborts() {
    let db = Database::in_memory().unwrap();
    let rules = tempfile::tempdir().unwrap();
    fs::write(rules.path().join("bad.csv"), "label;;motif;\nLoyer;set;LOYER\n").unwrap();

    assert!(matches!(
        apply_rules_dir(&db, rules.path()),
        Err(Error::Rule(_))
    ));
}
