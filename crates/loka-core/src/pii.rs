// crates/loka-core/src/pii.rs

//! Regulated-data scanner
//!
//! Every probe returns only a count; raw matches never leave this module.
//! Probes are isolated from each other: a failing probe contributes nothing
//! and the scan carries on (fail open). Check-digit validation backs the BSN
//! and card probes so that arbitrary digit runs do not trip them.

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::Display;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PiiType {
    Email,
    Iban,
    /// Dutch IBAN, reported alongside the generic type
    IbanNl,
    Phone,
    IpAddress,
    /// Dutch citizen service number, mod-11 checked
    Bsn,
    CreditCard,
    PersonName,
}

/// Scan outcome: detected types and their counts, nothing else
#[derive(Debug, Clone, Default, Serialize)]
pub struct PiiReport {
    pub counts: HashMap<PiiType, usize>,
}

impl PiiReport {
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn contains(&self, kind: PiiType) -> bool {
        self.counts.contains_key(&kind)
    }

    /// Sorted type names for error messages and logs
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.counts.keys().map(|t| t.to_string()).collect();
        names.sort();
        names
    }
}

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("email regex")
});

static IBAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z]{2}\d{2}[A-Z0-9]{11,30}\b").expect("iban regex"));

static PHONE_INTERNATIONAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+\d{1,3}[\s-]?\d(?:[\s-]?\d){6,11}\b").expect("intl phone regex"));

static PHONE_NATIONAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b0\d{1,3}[\s-]?\d(?:[\s-]?\d){5,8}\b").expect("national phone regex"));

static IPV4: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").expect("ipv4 regex"));

static DIGITS_9: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{9}\b").expect("bsn regex"));

static CARD_CANDIDATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d(?:[ -]?\d){12,18}\b").expect("card regex"));

static PERSON_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:Mr|Mrs|Ms|Dr|Dear|Met|From|Contact)\.?\s+([A-Z][a-z]+\s+[A-Z][a-z]+)\b")
        .expect("person name regex")
});

/// Scan text for regulated data and report type counts
///
/// The name probe is best-effort and never blocks the scan.
pub fn scan(text: &str) -> PiiReport {
    let mut report = PiiReport::default();

    record(&mut report, PiiType::Email, EMAIL.find_iter(text).count());

    let iban_total = IBAN.find_iter(text).count();
    let iban_nl = IBAN
        .find_iter(text)
        .filter(|m| is_dutch_iban(m.as_str()))
        .count();
    record(&mut report, PiiType::Iban, iban_total);
    record(&mut report, PiiType::IbanNl, iban_nl);

    let phones = PHONE_INTERNATIONAL.find_iter(text).count()
        + PHONE_NATIONAL
            .find_iter(text)
            .filter(|m| !overlaps_iban(text, m.start()))
            .count();
    record(&mut report, PiiType::Phone, phones);

    record(
        &mut report,
        PiiType::IpAddress,
        IPV4.find_iter(text)
            .filter(|m| is_valid_ipv4(m.as_str()))
            .count(),
    );

    record(
        &mut report,
        PiiType::Bsn,
        DIGITS_9
            .find_iter(text)
            .filter(|m| is_valid_bsn(m.as_str()))
            .count(),
    );

    record(
        &mut report,
        PiiType::CreditCard,
        CARD_CANDIDATE
            .find_iter(text)
            .filter(|m| is_valid_card(m.as_str()))
            .count(),
    );

    // Best-effort NER stand-in; a probe error is treated as zero matches
    match detect_person_names(text) {
        Ok(count) => record(&mut report, PiiType::PersonName, count),
        Err(e) => debug!("person name probe failed, continuing: {}", e),
    }

    report
}

fn record(report: &mut PiiReport, kind: PiiType, count: usize) {
    if count > 0 {
        report.counts.insert(kind, count);
    }
}

fn is_dutch_iban(candidate: &str) -> bool {
    candidate.starts_with("NL") && candidate.len() == 18
}

fn overlaps_iban(text: &str, offset: usize) -> bool {
    IBAN.find_iter(text)
        .any(|m| offset >= m.start() && offset < m.end())
}

fn is_valid_ipv4(candidate: &str) -> bool {
    candidate
        .split('.')
        .all(|octet| octet.parse::<u32>().map(|n| n <= 255).unwrap_or(false))
}

/// Mod-11 check with weights 9,8,7,6,5,4,3,2,-1; the sum must divide by 11
fn is_valid_bsn(candidate: &str) -> bool {
    let digits: Vec<i64> = candidate
        .bytes()
        .map(|b| i64::from(b - b'0'))
        .collect();
    if digits.len() != 9 || digits.iter().all(|&d| d == 0) {
        return false;
    }
    let weights = [9, 8, 7, 6, 5, 4, 3, 2, -1];
    let sum: i64 = digits.iter().zip(weights.iter()).map(|(d, w)| d * w).sum();
    sum % 11 == 0
}

/// Standard mod-10 right-to-left doubling check over 13-16 digits
fn is_valid_card(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate
        .chars()
        .filter(|c| c.is_ascii_digit())
        .filter_map(|c| c.to_digit(10))
        .collect();
    if !(13..=16).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

fn detect_person_names(text: &str) -> anyhow::Result<usize> {
    Ok(PERSON_NAME.captures_iter(text).count())
}
