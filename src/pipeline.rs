use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::filter::{self, FilterPolicy, FilterReport};
use crate::listing::{CanonicalListing, ExtractedFields};
use crate::normalize::{self, NormalizationRules};
use crate::parser::html::BASE_URL;
use crate::variant;

pub const JSON_DIR: &str = "data/json";

/// The make/model a crawl is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTarget {
    pub make: String,
    pub model: String,
}

impl ModelTarget {
    pub fn new(make: &str, model: &str) -> Self {
        ModelTarget {
            make: make.trim().to_string(),
            model: model.trim().to_string(),
        }
    }

    pub fn make_slug(&self) -> String {
        self.make.to_lowercase().replace('&', "and").split_whitespace().collect::<Vec<_>>().join("-")
    }

    pub fn model_slug(&self) -> String {
        self.model.to_lowercase().split_whitespace().collect::<Vec<_>>().join("-")
    }

    /// The model's index page on the auction site.
    pub fn index_url(&self) -> String {
        format!("{}/{}/{}/", BASE_URL, self.make_slug(), self.model_slug())
    }

    pub fn json_path(&self) -> PathBuf {
        Path::new(JSON_DIR).join(format!("{}_data.json", self.model_slug()))
    }
}

/// Tag extracted records with make, model and variant.
pub fn canonicalize(records: Vec<ExtractedFields>, target: &ModelTarget) -> Vec<CanonicalListing> {
    records
        .into_iter()
        .map(|fields| CanonicalListing {
            variant: variant::classify(&fields.title, &target.make, &target.model),
            make: target.make.clone(),
            model: target.model.clone(),
            fields,
        })
        .collect()
}

/// classify → normalize → filter/dedup.
pub fn process(
    records: Vec<ExtractedFields>,
    target: &ModelTarget,
    rules: &NormalizationRules,
    policy: &FilterPolicy,
) -> (Vec<CanonicalListing>, FilterReport) {
    let listings = canonicalize(records, target);
    let listings = normalize::normalize_all(listings, rules);
    filter::filter(listings, policy)
}

pub fn read_json(path: &Path) -> Result<Vec<CanonicalListing>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))
}

pub fn write_json(path: &Path, listings: &[CanonicalListing]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(listings)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
