//! Statement parser for the Société Générale text layout
//!
//! Extracted statements are page-oriented: pages are separated by a form
//! feed, each page carries a column header (`Date Valeur Nature de
//! l'opération Débit Crédit`) followed by an operations zone. The parser
//! never reads column values positionally except for the amount sign: an
//! amount is a debit when its line ends left of where the `Crédit` header
//! ends.
//!
//! ```text
//! page ─► zone (start marker .. end marker)
//!      ─► blocks (dated line + continuation lines)
//!      ─► TransactionDraft (date, motif, amount, mined payee/label)
//! ```

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{DateRange, ParsedStatement, TransactionDraft};
use crate::motif;

/// Page separator emitted by the extractor
pub const PAGE_BREAK: char = '\x0c';

/// Currency of every operation on these statements
pub const CURRENCY: &str = "EUR";

const DATE_FORMAT: &str = "%d/%m/%Y";

/// Character offset of the motif within a dated line
/// (after `dd/mm/yyyy dd/mm/yyyy `)
const MOTIF_COLUMN: usize = 21;

struct Layout {
    period: Regex,
    zone_start: Regex,
    zone_end: Regex,
    block_start: Regex,
    column_header: Regex,
    amount: Regex,
    trailing_star: Regex,
    whitespace: Regex,
}

impl Layout {
    fn compile() -> Self {
        Self {
            period: Regex::new(
                r"^\s*du (?P<begin>\d{2}/\d{2}/\d{4}) au (?P<end>\d{2}/\d{2}/\d{4})$",
            )
            .expect("period regex"),
            zone_start: Regex::new(r"(?m)^\s*\d{2}/\d{2}/\d{4}(?:\s*\d{2}/\d{2}/\d{4})?")
                .expect("zone start regex"),
            zone_end: Regex::new(
                r"(?m)(?:suite >>>$)|(?:\s*TOTAUX DES MOUVEMENTS)|(?:^ *1 Depuis l'étranger :)",
            )
            .expect("zone end regex"),
            block_start: Regex::new(r"^\s*\d{2}/\d{2}/\d{4}(?:\s*\d{2}/\d{2}/\d{4})?")
                .expect("block start regex"),
            column_header: Regex::new(
                r"^\s*Date\s*Valeur\s*Nature de l'opération\s*Débit\s*(?P<credit>Crédit)",
            )
            .expect("column header regex"),
            amount: Regex::new(r"(?P<number>\d{1,3}(?:\.\d{3})*,\d{2})\s*\*?$")
                .expect("amount regex"),
            trailing_star: Regex::new(r"\s{2,}\*$").expect("trailing star regex"),
            whitespace: Regex::new(r"\s+").expect("whitespace regex"),
        }
    }

    fn collapse(&self, text: &str) -> String {
        self.whitespace.replace_all(text, " ").into_owned()
    }
}

fn layout() -> &'static Layout {
    static LAYOUT: OnceLock<Layout> = OnceLock::new();
    LAYOUT.get_or_init(Layout::compile)
}

/// Parse a French-formatted amount (`1.234,56`) into a number
pub fn parse_amount(text: &str) -> Result<f64> {
    let normalized = text.replace('.', "").replace(',', ".");
    normalized
        .parse::<f64>()
        .map_err(|e| Error::Parse(format!("invalid amount '{}': {}", text, e)))
}

fn parse_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .map_err(|e| Error::Parse(format!("invalid date '{}': {}", text, e)))
}

/// Turns extracted statement text into a period and transaction drafts
#[derive(Debug, Clone)]
pub struct StatementParser {
    self_payee: String,
}

impl StatementParser {
    pub fn new(self_payee: impl Into<String>) -> Self {
        Self {
            self_payee: self_payee.into(),
        }
    }

    /// Parse a whole extracted document
    ///
    /// Pages without an operations zone are skipped. Any malformed dated
    /// line fails the whole document.
    pub fn parse(&self, text: &str) -> Result<ParsedStatement> {
        let pages: Vec<&str> = text.split(PAGE_BREAK).collect();
        let period = pages
            .first()
            .map(|first| detect_period(first))
            .unwrap_or_default();

        let mut drafts = Vec::new();
        for (index, page) in pages.iter().enumerate() {
            drafts.extend(self.parse_page(index + 1, page)?);
        }

        Ok(ParsedStatement { period, drafts })
    }

    fn parse_page(&self, number: usize, page: &str) -> Result<Vec<TransactionDraft>> {
        let layout = layout();

        let Some(start) = layout.zone_start.find(page).map(|m| m.start()) else {
            debug!("page {}: no operations zone", number);
            return Ok(Vec::new());
        };
        let Some(end) = layout.zone_end.find(&page[start..]).map(|m| start + m.start()) else {
            debug!("page {}: operations zone is not terminated", number);
            return Ok(Vec::new());
        };

        let boundary = credit_boundary(&page[..start])
            .ok_or_else(|| Error::Parse(format!("page {}: column header not found", number)))?;

        let blocks = split_blocks(&page[start..end]);
        debug!("page {}: {} operations", number, blocks.len());
        blocks
            .iter()
            .map(|block| self.interpret_block(block, boundary))
            .collect()
    }

    fn interpret_block(&self, block: &[&str], boundary: usize) -> Result<TransactionDraft> {
        let layout = layout();
        let Some((first, continuation)) = block.split_first() else {
            return Err(Error::Parse("empty operation block".into()));
        };

        let caps = layout
            .amount
            .captures(first)
            .ok_or_else(|| Error::Parse(format!("no amount on line '{}'", first.trim())))?;
        let whole = caps.get(0).map_or(first.len(), |m| m.start());
        let number = caps.name("number").map_or("", |m| m.as_str());

        let mut amount = parse_amount(number)?;
        if first.chars().count() < boundary {
            amount = -amount;
        }

        let prefix = layout.collapse(first[..whole].trim());
        let date_text = prefix
            .get(..10)
            .ok_or_else(|| Error::Parse(format!("truncated operation line '{}'", prefix)))?;
        let date = parse_date(date_text)?;

        let head: String = prefix.chars().skip(MOTIF_COLUMN).collect();
        let mut motif = head.trim().to_string();
        for line in continuation {
            let line = layout.trailing_star.replace(line, "");
            let line = layout.collapse(line.trim());
            if !line.is_empty() {
                motif.push('\n');
                motif.push_str(&line);
            }
        }
        let motif = motif.trim_matches('\n').to_string();

        let mined = motif::mine(&motif, &self.self_payee);

        Ok(TransactionDraft {
            date,
            payee: mined.payee,
            motif,
            label: mined.label,
            amount,
        })
    }
}

/// Find the statement period on the first page
///
/// The first period line wins. A period with an impossible date is left
/// unset rather than failing the document.
fn detect_period(page: &str) -> DateRange {
    let layout = layout();
    let Some(caps) = page.lines().find_map(|line| layout.period.captures(line)) else {
        debug!("statement period not found");
        return DateRange::default();
    };

    match (parse_date(&caps["begin"]), parse_date(&caps["end"])) {
        (Ok(begin), Ok(end)) => DateRange::new(begin, end),
        (Err(e), _) | (_, Err(e)) => {
            debug!("ignoring statement period: {}", e);
            DateRange::default()
        }
    }
}

/// Character offset where the `Crédit` column header ends, searching upward
/// from the operations zone
fn credit_boundary(header_region: &str) -> Option<usize> {
    let layout = layout();
    header_region.lines().rev().find_map(|line| {
        layout
            .column_header
            .captures(line)
            .and_then(|caps| caps.name("credit"))
            .map(|credit| line[..credit.end()].chars().count())
    })
}

/// Group zone lines into operation blocks, each opened by a dated line
fn split_blocks(zone: &str) -> Vec<Vec<&str>> {
    let layout = layout();
    let mut blocks: Vec<Vec<&str>> = Vec::new();

    for line in zone.lines() {
        if layout.block_start.is_match(line) {
            blocks.push(vec![line]);
            continue;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("***") {
            continue;
        }
        match blocks.last_mut() {
            Some(block) => block.push(line),
            None => debug!("dropping line before first operation: {}", trimmed),
        }
    }

    blocks
}
