use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::listing::CanonicalListing;

/// Inclusion predicates for one run.
#[derive(Debug, Clone, Default)]
pub struct FilterPolicy {
    pub min_year: Option<i32>,
    pub max_year: Option<i32>,
    /// Records whose detail page names another country are dropped.
    /// `None` disables the check.
    pub home_country: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rejection {
    Modified,
    YearOutOfRange,
    ForeignCountry,
    MissingVin,
}

impl Rejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Rejection::Modified => "modified",
            Rejection::YearOutOfRange => "year out of range",
            Rejection::ForeignCountry => "foreign country",
            Rejection::MissingVin => "no VIN",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterReport {
    pub input: usize,
    pub kept: usize,
    pub rejected: BTreeMap<Rejection, usize>,
    pub duplicates: usize,
    /// How many input records lack each optional field.
    pub missing: BTreeMap<&'static str, usize>,
}

impl FilterReport {
    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }

    pub fn print(&self) {
        println!(
            "Filtered {} records: {} kept, {} rejected, {} duplicates.",
            self.input,
            self.kept,
            self.rejected_total(),
            self.duplicates
        );
        for (reason, n) in &self.rejected {
            println!("  {:<18} {}", reason.as_str(), n);
        }
        let missing: Vec<_> = self.missing.iter().filter(|(_, n)| **n > 0).collect();
        if !missing.is_empty() {
            println!("Missing fields:");
            for (field, n) in missing {
                println!("  {:<18} {}", field, n);
            }
        }
    }
}

/// First predicate the record fails, if any.
pub fn rejection(listing: &CanonicalListing, policy: &FilterPolicy) -> Option<Rejection> {
    let f = &listing.fields;
    if f.title.to_lowercase().contains("modified") {
        return Some(Rejection::Modified);
    }
    if let Some(year) = f.year {
        let below = policy.min_year.is_some_and(|min| year < min);
        let above = policy.max_year.is_some_and(|max| year > max);
        if below || above {
            return Some(Rejection::YearOutOfRange);
        }
    }
    if let (Some(home), Some(country)) = (policy.home_country.as_deref(), f.country.found()) {
        if !country.eq_ignore_ascii_case(home) {
            return Some(Rejection::ForeignCountry);
        }
    }
    if !f.vin.is_found() {
        return Some(Rejection::MissingVin);
    }
    None
}

/// Apply the predicates, then drop repeated URLs keeping the first
/// occurrence. Order is preserved.
pub fn filter(records: Vec<CanonicalListing>, policy: &FilterPolicy) -> (Vec<CanonicalListing>, FilterReport) {
    let mut report = FilterReport {
        input: records.len(),
        ..Default::default()
    };

    for r in &records {
        for (field, present) in r.fields.presence() {
            let slot = report.missing.entry(field).or_default();
            if !present {
                *slot += 1;
            }
        }
    }

    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(records.len());
    for r in records {
        if let Some(reason) = rejection(&r, policy) {
            debug!(url = %r.fields.source_url, reason = reason.as_str(), "filtered out");
            *report.rejected.entry(reason).or_default() += 1;
            continue;
        }
        if !seen.insert(r.fields.source_url.clone()) {
            report.duplicates += 1;
            continue;
        }
        kept.push(r);
    }

    report.kept = kept.len();
    (kept, report)
}
