//! Motif mining: payee and label recovery from an operation's description
//!
//! Two passes run over the assembled motif:
//! 1. Structured sub-patterns (card payment, outgoing transfer, incoming
//!    transfer). Every pattern is tried in order and each match overwrites
//!    the previous payee/label, so the last matching pattern wins.
//! 2. Bank-specific prefixes (ATM withdrawal, fees, interest, subscription,
//!    ATM deposit) that replace payee/label with fixed values.

use std::sync::OnceLock;

use regex::Regex;

/// Payee recorded for operations initiated by the bank itself
pub const BANK_PAYEE: &str = "Société Générale";

/// Payee and label mined from a motif
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mined {
    pub payee: Option<String>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum SpecialPayee {
    Bank,
    /// The account holder (configured self payee)
    Holder,
}

struct Special {
    prefix: Regex,
    payee: SpecialPayee,
    label: &'static str,
}

struct MotifPatterns {
    structured: [Regex; 3],
    specials: [Special; 5],
}

impl MotifPatterns {
    fn compile() -> Self {
        let card = Regex::new(concat!(
            r"(?s)^CARTE (?P<card>X\d{4}) (?:REMBT )?(?P<date>\d{2}/\d{2})(?:\s\d{2}H\d{2})?\s",
            r"(?P<payee>(?P<label>.*?))",
            r"(?:\s*\d{1,},\d{2} EUR [A-Z\-]{1,})?(?:\s*COMMERCE ELECTRONIQUE)?$"
        ))
        .expect("card regex");
        let transfer_out = Regex::new(concat!(
            r"(?s)POUR: (?P<payee>.*?)(?:\s\d{2} \d{2}.*?)?(?:\sDATE: (?P<date>.*?))?",
            r"(?:\sREF: .*?)(?:\sMOTIF: (?P<label>.*?))?(?:\sLIB: .*)?(?:\sCHEZ: .*)?$"
        ))
        .expect("outgoing transfer regex");
        let transfer_in = Regex::new(concat!(
            r"(?s)DE: ?(?P<payee>.*?)(?:\sID: .*?)?(?:\sDATE: (?P<date>.*?))?",
            r"(?:\sMOTIF: (?P<label>.*?))?(?:\sVotre RUM: .*?)?(?:\sREF: .*?)?$"
        ))
        .expect("incoming transfer regex");

        let special = |pattern: &str, payee, label| Special {
            prefix: Regex::new(pattern).expect("special motif regex"),
            payee,
            label,
        };

        Self {
            structured: [card, transfer_out, transfer_in],
            specials: [
                special(r"^CARTE X\d{4} RETRAIT DAB", SpecialPayee::Holder, "Retrait DAB"),
                special(
                    r"^(?:FRAIS|COMMISSION D'INTERVENTION|LETTRE INFO)",
                    SpecialPayee::Bank,
                    "Frais bancaires",
                ),
                special(r"^INTERETS", SpecialPayee::Bank, "Intérêts"),
                special(
                    r"^COTISATION JAZZ",
                    SpecialPayee::Bank,
                    "COTISATION JAZZ -25 ANS -50%",
                ),
                special(r"^VRST GAB", SpecialPayee::Bank, "Dépôt GAB"),
            ],
        }
    }
}

fn patterns() -> &'static MotifPatterns {
    static PATTERNS: OnceLock<MotifPatterns> = OnceLock::new();
    PATTERNS.get_or_init(MotifPatterns::compile)
}

/// Mine payee and label from `motif`
///
/// `self_payee` is the identity given to the account holder's own cash
/// withdrawals.
pub fn mine(motif: &str, self_payee: &str) -> Mined {
    let patterns = patterns();
    let mut mined = Mined::default();

    for pattern in &patterns.structured {
        if let Some(caps) = pattern.captures(motif) {
            mined.payee = caps.name("payee").map(|m| m.as_str().to_string());
            mined.label = caps.name("label").map(|m| m.as_str().to_string());
        }
    }

    for special in &patterns.specials {
        if special.prefix.is_match(motif) {
            let payee = match special.payee {
                SpecialPayee::Bank => BANK_PAYEE,
                SpecialPayee::Holder => self_payee,
            };
            mined.payee = Some(payee.to_string());
            mined.label = Some(special.label.to_string());
        }
    }

    mined
}
