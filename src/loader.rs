use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::db;
use crate::listing::CanonicalListing;

pub const STANDARD_VARIANT: &str = "STANDARD";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub inserted: usize,
    pub updated: usize,
    pub errors: usize,
}

impl LoadSummary {
    pub fn print(&self) {
        println!(
            "Loaded: {} inserted, {} updated, {} errors.",
            self.inserted, self.updated, self.errors
        );
    }
}

enum Outcome {
    Inserted,
    Updated,
}

/// Reference names are stored upper-cased; an empty variant is `STANDARD`.
pub fn reference_name(name: &str) -> String {
    name.trim().to_uppercase()
}

fn variant_name(name: &str) -> String {
    match reference_name(name) {
        n if n.is_empty() => STANDARD_VARIANT.to_string(),
        n => n,
    }
}

fn upsert(conn: &Connection, record: &CanonicalListing) -> Result<Outcome> {
    let make = reference_name(&record.make);
    let model = reference_name(&record.model);
    if make.is_empty() || model.is_empty() {
        bail!("missing make or model");
    }
    let make_id = db::get_or_create_make(conn, &make)?;
    let model_id = db::get_or_create_model(conn, make_id, &model)?;
    let variant_id = db::get_or_create_variant(conn, model_id, &variant_name(&record.variant))?;

    let row = db::ListingRow::from_listing(record, make_id, model_id, variant_id)?;
    match db::find_listing_id(conn, &row.url)? {
        Some(id) => {
            db::update_listing(conn, id, &row)?;
            Ok(Outcome::Updated)
        }
        None => {
            db::insert_listing(conn, &row)?;
            Ok(Outcome::Inserted)
        }
    }
}

/// Upsert every record keyed by URL. Each record runs in its own savepoint
/// so a failure rolls back only that record, reference rows included.
/// Batches of `batch_size` records are committed together.
pub fn load(conn: &mut Connection, records: &[CanonicalListing], batch_size: usize) -> Result<LoadSummary> {
    let mut summary = LoadSummary::default();
    let Some(first) = records.first() else {
        return Ok(summary);
    };
    if first.make.trim().is_empty() || first.model.trim().is_empty() {
        bail!(
            "records must carry a make and model; first record {} has make {:?}, model {:?}",
            first.fields.source_url,
            first.make,
            first.model
        );
    }
    info!(
        make = %reference_name(&first.make),
        model = %reference_name(&first.model),
        records = records.len(),
        "loading listings"
    );

    let pb = ProgressBar::new(records.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    for batch in records.chunks(batch_size.max(1)) {
        let mut tx = conn.transaction()?;
        for record in batch {
            let mut sp = tx.savepoint()?;
            match upsert(&sp, record) {
                Ok(outcome) => {
                    sp.commit()?;
                    match outcome {
                        Outcome::Inserted => summary.inserted += 1,
                        Outcome::Updated => summary.updated += 1,
                    }
                }
                Err(e) => {
                    sp.rollback()?;
                    summary.errors += 1;
                    let reason = format!("{e:#}");
                    warn!(url = %record.fields.source_url, error = %reason, "listing not loaded");
                }
            }
            pb.inc(1);
        }
        tx.commit()?;
    }

    pb.finish_and_clear();
    Ok(summary)
}
