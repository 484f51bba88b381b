use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};

use crate::listing::CanonicalListing;

pub const SOURCE: &str = "bringatrailer";

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating database directory {}", dir.display()))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("opening database {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS makes (
            id         INTEGER PRIMARY KEY,
            name       TEXT UNIQUE NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS models (
            id         INTEGER PRIMARY KEY,
            make_id    INTEGER NOT NULL REFERENCES makes(id),
            name       TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(make_id, name)
        );

        CREATE TABLE IF NOT EXISTS variants (
            id         INTEGER PRIMARY KEY,
            model_id   INTEGER NOT NULL REFERENCES models(id),
            name       TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(model_id, name)
        );

        CREATE TABLE IF NOT EXISTS listings (
            id               INTEGER PRIMARY KEY,
            url              TEXT UNIQUE NOT NULL,
            source           TEXT NOT NULL,
            title            TEXT,
            vin              TEXT CHECK(vin IS NULL OR length(vin) = 17),
            year             INTEGER CHECK(year IS NULL OR year BETWEEN 1900 AND 2099),
            make_id          INTEGER NOT NULL REFERENCES makes(id),
            model_id         INTEGER NOT NULL REFERENCES models(id),
            variant_id       INTEGER NOT NULL REFERENCES variants(id),
            engine           TEXT,
            transmission     TEXT,
            exterior_color   TEXT,
            interior_color   TEXT,
            mileage          INTEGER CHECK(mileage IS NULL OR mileage >= 0),
            sale_price_cents INTEGER CHECK(sale_price_cents IS NULL OR sale_price_cents >= 0),
            sale_date        TEXT,
            reserve_met      BOOLEAN NOT NULL DEFAULT 0,
            number_of_bids   INTEGER CHECK(number_of_bids IS NULL OR number_of_bids >= 0),
            location         TEXT,
            country          TEXT,
            seller_name      TEXT,
            seller_type      TEXT CHECK(seller_type IS NULL OR seller_type IN ('Private Party','Dealer')),
            lot_number       TEXT,
            high_bidder      TEXT,
            created_at       TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_listings_model ON listings(model_id);
        CREATE INDEX IF NOT EXISTS idx_listings_variant ON listings(variant_id);
        CREATE INDEX IF NOT EXISTS idx_listings_sale_date ON listings(sale_date);
        ",
    )?;
    Ok(())
}

// ── Reference rows ──

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Look up `select`; insert when missing.
fn get_or_create(
    conn: &Connection,
    select: &str,
    insert: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<i64> {
    let existing = conn
        .prepare_cached(select)?
        .query_row(params, |r| r.get(0))
        .optional()?;
    match existing {
        Some(id) => Ok(id),
        None => insert_or_requery(conn, select, insert, params),
    }
}

/// Insert a reference row. A unique violation means another writer got
/// there first, so the row is read again.
fn insert_or_requery(
    conn: &Connection,
    select: &str,
    insert: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<i64> {
    match conn.prepare_cached(insert)?.execute(params) {
        Ok(_) => Ok(conn.last_insert_rowid()),
        Err(e) if is_unique_violation(&e) => {
            let id = conn.prepare_cached(select)?.query_row(params, |r| r.get(0))?;
            Ok(id)
        }
        Err(e) => Err(e.into()),
    }
}

pub fn get_or_create_make(conn: &Connection, name: &str) -> Result<i64> {
    get_or_create(
        conn,
        "SELECT id FROM makes WHERE name = ?1",
        "INSERT INTO makes (name) VALUES (?1)",
        rusqlite::params![name],
    )
}

pub fn get_or_create_model(conn: &Connection, make_id: i64, name: &str) -> Result<i64> {
    get_or_create(
        conn,
        "SELECT id FROM models WHERE make_id = ?1 AND name = ?2",
        "INSERT INTO models (make_id, name) VALUES (?1, ?2)",
        rusqlite::params![make_id, name],
    )
}

pub fn get_or_create_variant(conn: &Connection, model_id: i64, name: &str) -> Result<i64> {
    get_or_create(
        conn,
        "SELECT id FROM variants WHERE model_id = ?1 AND name = ?2",
        "INSERT INTO variants (model_id, name) VALUES (?1, ?2)",
        rusqlite::params![model_id, name],
    )
}

// ── Listings ──

pub struct ListingRow {
    pub url: String,
    pub title: String,
    pub vin: Option<String>,
    pub year: Option<i32>,
    pub make_id: i64,
    pub model_id: i64,
    pub variant_id: i64,
    pub engine: Option<String>,
    pub transmission: Option<String>,
    pub exterior_color: Option<String>,
    pub interior_color: Option<String>,
    pub mileage: Option<u32>,
    pub sale_price_cents: Option<i64>,
    pub sale_date: Option<String>,
    pub reserve_met: bool,
    pub number_of_bids: Option<u32>,
    pub location: Option<String>,
    pub country: Option<String>,
    pub seller_name: Option<String>,
    pub seller_type: Option<&'static str>,
    pub lot_number: Option<String>,
    pub high_bidder: Option<String>,
}

impl ListingRow {
    /// Both "not found" and "not attempted" are stored as NULL.
    pub fn from_listing(
        l: &CanonicalListing,
        make_id: i64,
        model_id: i64,
        variant_id: i64,
    ) -> Result<ListingRow> {
        let f = &l.fields;
        let sale_price_cents = f
            .price
            .map(|p| {
                i64::try_from(p)
                    .ok()
                    .and_then(|p| p.checked_mul(100))
                    .with_context(|| format!("price {p} out of range"))
            })
            .transpose()?;
        Ok(ListingRow {
            url: f.source_url.clone(),
            title: f.title.clone(),
            vin: f.vin.found().map(|v| v.as_str().to_string()),
            year: f.year,
            make_id,
            model_id,
            variant_id,
            engine: f.engine.found().cloned(),
            transmission: f.transmission.found().cloned(),
            exterior_color: f.exterior_color.found().cloned(),
            interior_color: f.interior_color.found().cloned(),
            mileage: f.mileage,
            sale_price_cents,
            sale_date: f.sale_date.map(|d| d.format("%Y-%m-%d").to_string()),
            reserve_met: f.price.is_some(),
            number_of_bids: f.number_of_bids.found().copied(),
            location: f.location.found().cloned(),
            country: f.country.found().cloned(),
            seller_name: f.seller_name.found().cloned(),
            seller_type: f.seller_type.found().map(|s| s.as_str()),
            lot_number: f.lot_number.found().cloned(),
            high_bidder: f.high_bidder_handle.found().cloned(),
        })
    }
}

pub fn find_listing_id(conn: &Connection, url: &str) -> Result<Option<i64>> {
    let id = conn
        .prepare_cached("SELECT id FROM listings WHERE url = ?1")?
        .query_row([url], |r| r.get(0))
        .optional()?;
    Ok(id)
}

pub fn insert_listing(conn: &Connection, r: &ListingRow) -> Result<()> {
    conn.prepare_cached(
        "INSERT INTO listings
         (url, source, title, vin, year, make_id, model_id, variant_id, engine, transmission,
          exterior_color, interior_color, mileage, sale_price_cents, sale_date, reserve_met,
          number_of_bids, location, country, seller_name, seller_type, lot_number, high_bidder)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23)",
    )?
    .execute(rusqlite::params![
        r.url, SOURCE, r.title, r.vin, r.year, r.make_id, r.model_id, r.variant_id,
        r.engine, r.transmission, r.exterior_color, r.interior_color, r.mileage,
        r.sale_price_cents, r.sale_date, r.reserve_met, r.number_of_bids, r.location,
        r.country, r.seller_name, r.seller_type, r.lot_number, r.high_bidder,
    ])?;
    Ok(())
}

/// Last write wins for every column except `id`, `url` and `created_at`.
pub fn update_listing(conn: &Connection, id: i64, r: &ListingRow) -> Result<()> {
    conn.prepare_cached(
        "UPDATE listings SET
            source = ?2, title = ?3, vin = ?4, year = ?5, make_id = ?6, model_id = ?7,
            variant_id = ?8, engine = ?9, transmission = ?10, exterior_color = ?11,
            interior_color = ?12, mileage = ?13, sale_price_cents = ?14, sale_date = ?15,
            reserve_met = ?16, number_of_bids = ?17, location = ?18, country = ?19,
            seller_name = ?20, seller_type = ?21, lot_number = ?22, high_bidder = ?23
         WHERE id = ?1",
    )?
    .execute(rusqlite::params![
        id, SOURCE, r.title, r.vin, r.year, r.make_id, r.model_id, r.variant_id,
        r.engine, r.transmission, r.exterior_color, r.interior_color, r.mileage,
        r.sale_price_cents, r.sale_date, r.reserve_met, r.number_of_bids, r.location,
        r.country, r.seller_name, r.seller_type, r.lot_number, r.high_bidder,
    ])?;
    Ok(())
}

// ── Read queries ──

pub struct ModelRow {
    pub id: i64,
    pub make: String,
    pub model: String,
    pub listings: usize,
}

pub fn fetch_models(conn: &Connection) -> Result<Vec<ModelRow>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, mk.name, m.name, COUNT(l.id)
         FROM models m
         JOIN makes mk ON mk.id = m.make_id
         LEFT JOIN listings l ON l.model_id = m.id
         GROUP BY m.id
         ORDER BY mk.name, m.name",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ModelRow {
                id: row.get(0)?,
                make: row.get(1)?,
                model: row.get(2)?,
                listings: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Names are compared in their stored upper-case form.
pub fn find_model_id(conn: &Connection, make: &str, model: &str) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT m.id FROM models m JOIN makes mk ON mk.id = m.make_id
             WHERE mk.name = ?1 AND m.name = ?2",
            rusqlite::params![make.trim().to_uppercase(), model.trim().to_uppercase()],
            |r| r.get(0),
        )
        .optional()?;
    Ok(id)
}

/// One row of a model's listing page. Price is whole units.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingSummary {
    pub id: i64,
    pub url: String,
    pub year: Option<i32>,
    pub variant: String,
    pub sale_price: Option<f64>,
    pub sale_date: Option<String>,
    pub mileage: Option<i64>,
    pub number_of_bids: Option<i64>,
    pub location: Option<String>,
    pub reserve_met: bool,
}

/// Newest sales first; undated listings last.
pub fn fetch_listings(conn: &Connection, model_id: i64, limit: usize, offset: usize) -> Result<Vec<ListingSummary>> {
    let mut stmt = conn.prepare(
        "SELECT l.id, l.url, l.year, v.name, l.sale_price_cents / 100.0, l.sale_date,
                l.mileage, l.number_of_bids, l.location, l.reserve_met
         FROM listings l
         JOIN variants v ON v.id = l.variant_id
         WHERE l.model_id = ?1
         ORDER BY l.sale_date DESC, l.id
         LIMIT ?2 OFFSET ?3",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![model_id, limit as i64, offset as i64], |row| {
            Ok(ListingSummary {
                id: row.get(0)?,
                url: row.get(1)?,
                year: row.get(2)?,
                variant: row.get(3)?,
                sale_price: row.get(4)?,
                sale_date: row.get(5)?,
                mileage: row.get(6)?,
                number_of_bids: row.get(7)?,
                location: row.get(8)?,
                reserve_met: row.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Sold listings of one model. Prices are whole units.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelStats {
    pub total_sales: usize,
    pub avg_price: Option<f64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub avg_mileage: Option<i64>,
    pub avg_bids: Option<f64>,
}

pub fn fetch_model_stats(conn: &Connection, model_id: i64) -> Result<ModelStats> {
    let stats = conn.query_row(
        "SELECT COUNT(*),
                AVG(sale_price_cents) / 100.0,
                MIN(sale_price_cents) / 100.0,
                MAX(sale_price_cents) / 100.0,
                CAST(AVG(mileage) AS INTEGER),
                AVG(number_of_bids)
         FROM listings
         WHERE model_id = ?1 AND sale_price_cents IS NOT NULL",
        [model_id],
        |r| {
            Ok(ModelStats {
                total_sales: r.get(0)?,
                avg_price: r.get(1)?,
                min_price: r.get(2)?,
                max_price: r.get(3)?,
                avg_mileage: r.get(4)?,
                avg_bids: r.get(5)?,
            })
        },
    )?;
    Ok(stats)
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendRow {
    /// `YYYY-MM`
    pub period: String,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub count: usize,
}

pub fn fetch_trends(conn: &Connection, model_id: i64) -> Result<Vec<TrendRow>> {
    let mut stmt = conn.prepare(
        "SELECT strftime('%Y-%m', sale_date) AS period,
                AVG(sale_price_cents) / 100.0,
                MIN(sale_price_cents) / 100.0,
                MAX(sale_price_cents) / 100.0,
                COUNT(*)
         FROM listings
         WHERE model_id = ?1 AND sale_price_cents IS NOT NULL AND sale_date IS NOT NULL
         GROUP BY period
         ORDER BY period",
    )?;
    let rows = stmt
        .query_map([model_id], |row| {
            Ok(TrendRow {
                period: row.get(0)?,
                avg_price: row.get(1)?,
                min_price: row.get(2)?,
                max_price: row.get(3)?,
                count: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = memory_db();
        init_schema(&conn).unwrap();
    }

    #[test]
    fn reference_rows_are_reused() {
        let conn = memory_db();
        let make = get_or_create_make(&conn, "MERCEDES-BENZ").unwrap();
        assert_eq!(get_or_create_make(&conn, "MERCEDES-BENZ").unwrap(), make);
        let model = get_or_create_model(&conn, make, "SLR MCLAREN").unwrap();
        assert_eq!(get_or_create_model(&conn, make, "SLR MCLAREN").unwrap(), model);
        let v1 = get_or_create_variant(&conn, model, "COUPE").unwrap();
        let v2 = get_or_create_variant(&conn, model, "ROADSTER").unwrap();
        assert_ne!(v1, v2);
        assert_eq!(get_or_create_variant(&conn, model, "COUPE").unwrap(), v1);

        let other_make = get_or_create_make(&conn, "PORSCHE").unwrap();
        let same_name = get_or_create_model(&conn, other_make, "SLR MCLAREN").unwrap();
        assert_ne!(same_name, model, "model names are scoped to their make");
    }

    #[test]
    fn unique_violation_detected() {
        let conn = memory_db();
        conn.execute("INSERT INTO makes (name) VALUES ('BMW')", []).unwrap();
        let err = conn
            .execute("INSERT INTO makes (name) VALUES ('BMW')", [])
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[test]
    fn other_constraint_failures_are_not_unique_violations() {
        let conn = memory_db();
        let not_null = conn
            .execute("INSERT INTO makes (name) VALUES (NULL)", [])
            .unwrap_err();
        assert!(!is_unique_violation(&not_null));
        let foreign_key = conn
            .execute("INSERT INTO models (make_id, name) VALUES (999, 'X')", [])
            .unwrap_err();
        assert!(!is_unique_violation(&foreign_key));
    }

    #[test]
    fn concurrent_insert_falls_back_to_existing_row() {
        let conn = memory_db();
        conn.execute("INSERT INTO makes (name) VALUES ('PORSCHE')", []).unwrap();
        let existing = conn.last_insert_rowid();

        let id = insert_or_requery(
            &conn,
            "SELECT id FROM makes WHERE name = ?1",
            "INSERT INTO makes (name) VALUES (?1)",
            rusqlite::params!["PORSCHE"],
        )
        .unwrap();
        assert_eq!(id, existing);
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM makes", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn requery_does_not_mask_other_failures() {
        let conn = memory_db();
        let result = insert_or_requery(
            &conn,
            "SELECT id FROM models WHERE make_id = ?1 AND name = ?2",
            "INSERT INTO models (make_id, name) VALUES (?1, ?2)",
            rusqlite::params![999, "911"],
        );
        assert!(result.is_err());
    }

    #[test]
    fn check_constraints_reject_bad_rows() {
        let conn = memory_db();
        let make = get_or_create_make(&conn, "MAKE").unwrap();
        let model = get_or_create_model(&conn, make, "MODEL").unwrap();
        let variant = get_or_create_variant(&conn, model, "STANDARD").unwrap();
        let insert = |year: i32, vin: &str| {
            conn.execute(
                "INSERT INTO listings (url, source, year, vin, make_id, model_id, variant_id)
                 VALUES (?1, 'bringatrailer', ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![format!("u{year}{vin}"), year, vin, make, model, variant],
            )
        };
        assert!(insert(2005, "WDDAJ76F05M000123").is_ok());
        assert!(insert(1850, "WDDAJ76F05M000123").is_err());
        assert!(insert(2100, "WDDAJ76F05M000123").is_err());
        assert!(insert(2005, "SHORT").is_err());
    }

    #[test]
    fn stats_and_trends_in_whole_units() {
        let conn = memory_db();
        let make = get_or_create_make(&conn, "MERCEDES-BENZ").unwrap();
        let model = get_or_create_model(&conn, make, "SLR MCLAREN").unwrap();
        let variant = get_or_create_variant(&conn, model, "COUPE").unwrap();
        let rows = [
            ("a", Some(40_000_000i64), Some("2023-05-12"), 9_000),
            ("b", Some(44_000_000), Some("2023-05-30"), 11_000),
            ("c", Some(110_500_000), Some("2023-09-01"), 3_150),
            ("d", None, Some("2023-04-02"), 12_500),
        ];
        for (url, cents, date, miles) in rows {
            conn.execute(
                "INSERT INTO listings (url, source, make_id, model_id, variant_id,
                                       sale_price_cents, sale_date, mileage, reserve_met)
                 VALUES (?1, 'bringatrailer', ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![url, make, model, variant, cents, date, miles, cents.is_some()],
            )
            .unwrap();
        }

        assert_eq!(find_model_id(&conn, "Mercedes-Benz", "SLR McLaren").unwrap(), Some(model));
        assert_eq!(find_model_id(&conn, "Porsche", "911").unwrap(), None);

        let stats = fetch_model_stats(&conn, model).unwrap();
        assert_eq!(stats.total_sales, 3);
        assert_eq!(stats.min_price, Some(400_000.0));
        assert_eq!(stats.max_price, Some(1_105_000.0));
        assert_eq!(stats.avg_mileage, Some(7_716));
        assert_eq!(stats.avg_bids, None);

        let trends = fetch_trends(&conn, model).unwrap();
        let periods: Vec<_> = trends.iter().map(|t| t.period.as_str()).collect();
        assert_eq!(periods, ["2023-05", "2023-09"]);
        assert_eq!(trends[0].count, 2);
        assert_eq!(trends[0].avg_price, 420_000.0);

        let models = fetch_models(&conn).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].listings, 4);

        let page = fetch_listings(&conn, model, 2, 0).unwrap();
        let urls: Vec<_> = page.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(urls, ["c", "b"], "newest sale first");
        assert_eq!(page[0].sale_price, Some(1_105_000.0));
        assert_eq!(page[0].variant, "COUPE");
        assert!(page[0].reserve_met);

        let next = fetch_listings(&conn, model, 2, 2).unwrap();
        let urls: Vec<_> = next.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(urls, ["a", "d"]);
        assert_eq!(next[1].sale_price, None);
        assert!(!next[1].reserve_met);

        assert!(fetch_listings(&conn, model, 10, 4).unwrap().is_empty());
    }
}
