use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::listing::{CanonicalListing, Field, PLACEHOLDER};

/// User-maintained value remapping. Engine and transmission keys match
/// exactly; variant keys match case-insensitively.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NormalizationRules {
    #[serde(default)]
    engine: HashMap<String, String>,
    #[serde(default)]
    transmission: HashMap<String, String>,
    #[serde(default)]
    variant: HashMap<String, String>,
}

impl NormalizationRules {
    pub fn from_json(json: &str) -> Result<Self> {
        let rules: NormalizationRules =
            serde_json::from_str(json).context("invalid normalization rules")?;
        Ok(rules.with_upper_variant_keys())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading rules file {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("in {}", path.display()))
    }

    fn with_upper_variant_keys(mut self) -> Self {
        self.variant = self
            .variant
            .into_iter()
            .map(|(k, v)| (k.to_uppercase(), v))
            .collect();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.engine.is_empty() && self.transmission.is_empty() && self.variant.is_empty()
    }
}

fn remap(field: Field<String>, table: &HashMap<String, String>) -> Field<String> {
    match field {
        Field::Found(v) => Field::Found(table.get(&v).cloned().unwrap_or(v)),
        other => other,
    }
}

pub fn normalize(mut listing: CanonicalListing, rules: &NormalizationRules) -> CanonicalListing {
    let fields = &mut listing.fields;
    fields.engine = remap(std::mem::take(&mut fields.engine), &rules.engine);
    fields.transmission = remap(std::mem::take(&mut fields.transmission), &rules.transmission);
    if let Some(mapped) = rules.variant.get(&listing.variant.to_uppercase()) {
        listing.variant = mapped.clone();
    }
    listing
}

pub fn normalize_all(listings: Vec<CanonicalListing>, rules: &NormalizationRules) -> Vec<CanonicalListing> {
    listings.into_iter().map(|l| normalize(l, rules)).collect()
}

/// Distinct values and their counts for the remappable fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldStats {
    pub engine: BTreeMap<String, usize>,
    pub transmission: BTreeMap<String, usize>,
    pub variant: BTreeMap<String, usize>,
}

/// Label a value is counted under; not-found values share the JSON
/// placeholder, unattempted ones are skipped.
fn analysis_key(field: &Field<String>) -> Option<&str> {
    match field {
        Field::Found(v) => Some(v),
        Field::NotFound => Some(PLACEHOLDER),
        Field::NotAttempted => None,
    }
}

pub fn analyze(listings: &[CanonicalListing]) -> FieldStats {
    let mut stats = FieldStats::default();
    for l in listings {
        if let Some(e) = analysis_key(&l.fields.engine) {
            *stats.engine.entry(e.to_string()).or_default() += 1;
        }
        if let Some(t) = analysis_key(&l.fields.transmission) {
            *stats.transmission.entry(t.to_string()).or_default() += 1;
        }
        if !l.variant.is_empty() {
            *stats.variant.entry(l.variant.clone()).or_default() += 1;
        }
    }
    stats
}

/// Above this many distinct values only the counts are printed.
const LIST_LIMIT: usize = 20;

pub fn print_analysis(before: &FieldStats, after: &FieldStats) {
    let fields = [
        ("ENGINE", &before.engine, &after.engine),
        ("TRANSMISSION", &before.transmission, &after.transmission),
        ("VARIANT", &before.variant, &after.variant),
    ];
    for (name, b, a) in fields {
        println!("\n{}:", name);
        println!("  Before: {} unique values", b.len());
        println!("  After:  {} unique values", a.len());
        println!("  Consolidated: {}", b.len().saturating_sub(a.len()));
        if b.len() <= LIST_LIMIT {
            for (label, counts) in [("before", b), ("after", a)] {
                println!("  {}:", label);
                let mut sorted: Vec<_> = counts.iter().collect();
                sorted.sort_by(|x, y| y.1.cmp(x.1).then(x.0.cmp(y.0)));
                for (value, count) in sorted {
                    println!("    - {}: {}", value, count);
                }
            }
        }
    }
}
