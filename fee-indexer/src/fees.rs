//! Fee extraction from block execution results
//!
//! Fee and tip attributes carry amount strings such as `427uatom` or
//! `1000uatom,198ibc/27394FB0`. Every comma-separated token is parsed on its
//! own: the longest leading decimal number is the amount, the remainder is the
//! denomination. Tokens that do not parse, or carry a non-positive amount, are
//! skipped.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bigdecimal::{BigDecimal, Zero};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::rpc::{BlockResults, EventAttribute};

static AMOUNT_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+(?:\.\d+)?)([A-Za-z].*)$").expect("amount token pattern"));

const FEE_KEYS: [&str; 2] = ["fee", "tip"];

/// How a chain's per-block totals are rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeMode {
    /// Only amounts in this denomination count; rendered as `{total}{denom}`.
    Single(String),
    /// Every denomination is kept; rendered as `{a}{denom},{b}{denom2}`.
    Multi,
}

impl FeeMode {
    pub fn from_denom(denom: Option<&str>) -> Self {
        match denom {
            Some(denom) => FeeMode::Single(denom.to_string()),
            None => FeeMode::Multi,
        }
    }
}

impl fmt::Display for FeeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeeMode::Single(denom) => write!(f, "single({})", denom),
            FeeMode::Multi => write!(f, "multi"),
        }
    }
}

/// Splits one amount token into `(amount, denom)`.
pub fn parse_amount(token: &str) -> Option<(BigDecimal, &str)> {
    let captures = AMOUNT_TOKEN.captures(token.trim())?;
    let amount = BigDecimal::from_str(captures.get(1)?.as_str()).ok()?;
    Some((amount, captures.get(2)?.as_str()))
}

/// Per-denomination totals, kept in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeeTotals {
    entries: Vec<(String, BigDecimal)>,
}

impl FeeTotals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-reads a rendered total such as `1500uatom,3ibc/ABC` or `0`.
    pub fn parse(encoded: &str) -> Self {
        let mut totals = Self::new();
        totals.add_value(encoded);
        totals
    }

    pub fn add(&mut self, denom: &str, amount: BigDecimal) {
        if amount <= BigDecimal::zero() {
            return;
        }
        match self.entries.iter_mut().find(|(d, _)| d == denom) {
            Some((_, total)) => *total += amount,
            None => self.entries.push((denom.to_string(), amount)),
        }
    }

    /// Adds every parseable token of a comma-separated value.
    pub fn add_value(&mut self, value: &str) {
        for token in value.split(',') {
            if let Some((amount, denom)) = parse_amount(token) {
                self.add(denom, amount);
            }
        }
    }

    pub fn merge(&mut self, other: &FeeTotals) {
        for (denom, amount) in &other.entries {
            self.add(denom, amount.clone());
        }
    }

    pub fn get(&self, denom: &str) -> Option<&BigDecimal> {
        self.entries.iter().find(|(d, _)| d == denom).map(|(_, a)| a)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BigDecimal)> {
        self.entries.iter().map(|(d, a)| (d.as_str(), a))
    }

    pub fn render(&self, mode: &FeeMode) -> String {
        match mode {
            FeeMode::Single(denom) => match self.get(denom) {
                Some(total) => format!("{}{}", total.to_plain_string(), denom),
                None => format!("0{}", denom),
            },
            FeeMode::Multi if self.is_empty() => "0".to_string(),
            FeeMode::Multi => self
                .entries
                .iter()
                .map(|(denom, amount)| format!("{}{}", amount.to_plain_string(), denom))
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// Sums fee and tip attributes over the successful transactions of a block.
pub fn extract_fees(results: &BlockResults, mode: &FeeMode) -> FeeTotals {
    let mut totals = FeeTotals::new();

    for tx in results.transactions().iter().filter(|tx| tx.code == 0) {
        for event in &tx.events {
            for value in event.attributes.iter().filter_map(fee_attribute_value) {
                totals.add_value(&value);
            }
        }
    }

    match mode {
        FeeMode::Single(denom) => {
            let mut single = FeeTotals::new();
            if let Some(total) = totals.get(denom) {
                single.add(denom, total.clone());
            }
            single
        }
        FeeMode::Multi => totals,
    }
}

/// Value of a `fee`/`tip` attribute, plain or base64 encoded.
fn fee_attribute_value(attr: &EventAttribute) -> Option<String> {
    let key = attr.key.as_deref()?;
    let value = attr.value.as_deref()?;

    if FEE_KEYS.contains(&key) {
        return Some(value.to_string());
    }

    let decoded_key = decode_base64(key)?;
    if FEE_KEYS.contains(&decoded_key.as_str()) {
        decode_base64(value)
    } else {
        None
    }
}

fn decode_base64(raw: &str) -> Option<String> {
    let bytes = STANDARD.decode(raw).ok()?;
    String::from_utf8(bytes).ok()
}
