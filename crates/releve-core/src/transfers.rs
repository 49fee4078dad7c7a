//! Internal transfer linking
//!
//! A movement between two of the holder's accounts shows up twice: once as
//! an outgoing transfer and once as an incoming one, both carrying the same
//! bank reference. Rows still uncategorized after the rule passes and whose
//! payee is the holder are paired on that reference.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info};

use crate::db::Database;
use crate::error::Result;

/// Outcome of a linking pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkSummary {
    /// Uncategorized rows with the holder as payee
    pub candidates: usize,
    pub pairs: usize,
}

fn reference_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"VIR RECU\s*(?P<token>\d+)").expect("incoming reference regex"),
            Regex::new(r"REF:\s*(?P<token>\d+)").expect("reference regex"),
        ]
    })
}

/// Transfer reference carried by a motif, if any
pub fn reference_token(motif: &str) -> Option<&str> {
    reference_patterns().iter().find_map(|re| {
        re.captures(motif)
            .and_then(|caps| caps.name("token"))
            .map(|m| m.as_str())
    })
}

/// Pair transfers sharing a reference and assign them `category`
///
/// A reference links at most one pair: a third row with the same reference
/// stays uncategorized.
pub fn link_transfers(db: &Database, self_payee: &str, category: &str) -> Result<LinkSummary> {
    let candidates = db.list_uncategorized_for_payee(self_payee)?;

    let mut pending: HashMap<&str, i64> = HashMap::new();
    let mut paired: HashSet<&str> = HashSet::new();
    let mut linked = Vec::new();

    for transaction in &candidates {
        let Some(token) = reference_token(&transaction.motif) else {
            continue;
        };
        if paired.contains(token) {
            debug!("reference {} already paired, skipping {}", token, transaction.id);
            continue;
        }
        match pending.remove(token) {
            Some(other) => {
                linked.push(other);
                linked.push(transaction.id);
                paired.insert(token);
            }
            None => {
                pending.insert(token, transaction.id);
            }
        }
    }

    if !linked.is_empty() {
        db.set_category(&linked, category)?;
    }

    let summary = LinkSummary {
        candidates: candidates.len(),
        pairs: linked.len() / 2,
    };
    info!(
        "transfers linked: {} pairs among {} candidates",
        summary.pairs, summary.candidates
    );
    Ok(summary)
}
