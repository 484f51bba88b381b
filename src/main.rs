mod config;
mod db;
mod fetch;
mod filter;
mod listing;
mod loader;
mod normalize;
mod parser;
mod pipeline;
mod variant;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;

use config::Config;
use fetch::{CrawlOptions, HttpSource, PageSource, SpiderSource};
use filter::FilterPolicy;
use listing::{CanonicalListing, ExtractedFields};
use normalize::NormalizationRules;
use pipeline::ModelTarget;

#[derive(Parser)]
#[command(name = "bat_index", about = "Bring a Trailer auction price history index")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Crawl one model's auctions and write them to JSON
    Scrape {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        fetch: FetchArgs,
        /// Output file (default: data/json/<model-slug>_data.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Apply normalization rules to a JSON file
    Normalize {
        /// Listings JSON to rewrite
        #[arg(long)]
        json: PathBuf,
        /// Rules file with engine/transmission/variant tables
        #[arg(long)]
        rules: PathBuf,
        /// Output file (default: overwrite the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Filter a JSON file and upsert it into the database
    Load {
        /// Listings JSON to load
        #[arg(long)]
        json: PathBuf,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Crawl, normalize, filter and load in one go
    Run {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        fetch: FetchArgs,
        #[command(flatten)]
        filter: FilterArgs,
        /// Normalization rules (default: none)
        #[arg(long)]
        rules: Option<PathBuf>,
        /// Also write the loaded listings here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Sales summary for every model, or one model in detail
    Stats {
        #[arg(long, requires = "model")]
        make: Option<String>,
        #[arg(long, requires = "make")]
        model: Option<String>,
    },
    /// Monthly price trend for one model
    Trends {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// One model's listings, newest sale first
    Listings {
        #[command(flatten)]
        target: TargetArgs,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
        /// Rows to skip
        #[arg(long, default_value = "0")]
        offset: usize,
    },
}

#[derive(Args)]
struct TargetArgs {
    /// Make as shown on the site (e.g. "Mercedes-Benz")
    #[arg(long)]
    make: String,
    /// Model as shown on the site (e.g. "SLR McLaren")
    #[arg(long)]
    model: String,
}

impl TargetArgs {
    fn target(&self) -> ModelTarget {
        ModelTarget::new(&self.make, &self.model)
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceKind {
    /// spider.cloud rendering API (needs SPIDER_API_KEY)
    Spider,
    /// Plain HTTP GET
    Http,
}

#[derive(Args)]
struct FetchArgs {
    /// Index URL (default: derived from make and model)
    #[arg(long)]
    url: Option<String>,
    #[arg(long, value_enum, default_value = "spider")]
    source: SourceKind,
    /// Skip detail pages
    #[arg(long)]
    cards_only: bool,
    /// Max index pages to walk
    #[arg(long)]
    max_pages: Option<u32>,
    /// Stop after this many listing cards
    #[arg(long)]
    max_listings: Option<usize>,
}

#[derive(Args)]
struct FilterArgs {
    #[arg(long)]
    min_year: Option<i32>,
    #[arg(long)]
    max_year: Option<i32>,
    /// Records per transaction
    #[arg(long)]
    batch_size: Option<usize>,
}

impl FilterArgs {
    fn policy(&self, config: &Config) -> FilterPolicy {
        FilterPolicy {
            min_year: self.min_year.or(config.min_year),
            max_year: self.max_year.or(config.max_year),
            home_country: config.home_country.clone(),
        }
    }

    fn batch_size(&self, config: &Config) -> anyhow::Result<usize> {
        match self.batch_size.unwrap_or(config.batch_size) {
            0 => bail!("--batch-size must be greater than 0"),
            n => Ok(n),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let config = config::load()?;

    let result = match cli.command {
        Commands::Init => {
            let conn = db::connect(&config.db_path)?;
            db::init_schema(&conn)?;
            println!("Schema ready at {}", config.db_path.display());
            Ok(())
        }
        Commands::Scrape { target, fetch, output } => {
            let target = target.target();
            let records = crawl(&config, &target, &fetch).await?;
            let listings = pipeline::canonicalize(records, &target);
            let path = output.unwrap_or_else(|| target.json_path());
            pipeline::write_json(&path, &listings)?;
            println!("Wrote {} listings to {}", listings.len(), path.display());
            Ok(())
        }
        Commands::Normalize { json, rules, output } => {
            let rules = NormalizationRules::load(&rules)?;
            let listings = pipeline::read_json(&json)?;
            let before = normalize::analyze(&listings);
            let listings = normalize::normalize_all(listings, &rules);
            normalize::print_analysis(&before, &normalize::analyze(&listings));
            let path = output.unwrap_or(json);
            pipeline::write_json(&path, &listings)?;
            println!("Wrote {} listings to {}", listings.len(), path.display());
            Ok(())
        }
        Commands::Load { json, filter } => {
            let listings = pipeline::read_json(&json)?;
            let (kept, report) = filter::filter(listings, &filter.policy(&config));
            report.print();
            load_listings(&config, &kept, filter.batch_size(&config)?, &report)
        }
        Commands::Run { target, fetch, filter, rules, output } => {
            let target = target.target();
            let rules = match rules {
                Some(path) => NormalizationRules::load(&path)?,
                None => NormalizationRules::default(),
            };
            if rules.is_empty() {
                info!("no normalization rules, values kept as extracted");
            }
            let batch_size = filter.batch_size(&config)?;

            let t_crawl = Instant::now();
            let records = crawl(&config, &target, &fetch).await?;
            println!("Crawled in {}", format_duration(t_crawl.elapsed()));

            let (kept, report) = pipeline::process(records, &target, &rules, &filter.policy(&config));
            report.print();
            if let Some(path) = output {
                pipeline::write_json(&path, &kept)?;
                println!("Wrote {} listings to {}", kept.len(), path.display());
            }
            load_listings(&config, &kept, batch_size, &report)
        }
        Commands::Stats { make, model } => {
            let conn = db::connect(&config.db_path)?;
            db::init_schema(&conn)?;
            match (make, model) {
                (Some(make), Some(model)) => print_model_stats(&conn, &make, &model),
                _ => print_overview(&conn),
            }
        }
        Commands::Trends { target } => {
            let conn = db::connect(&config.db_path)?;
            db::init_schema(&conn)?;
            let model_id = model_id(&conn, &target.make, &target.model)?;
            let rows = db::fetch_trends(&conn, model_id)?;
            if rows.is_empty() {
                println!("No dated sales.");
                return Ok(());
            }
            println!(
                "{:<8} | {:>5} | {:>12} | {:>12} | {:>12}",
                "Month", "Sales", "Avg", "Min", "Max"
            );
            println!("{}", "-".repeat(61));
            for r in &rows {
                println!(
                    "{:<8} | {:>5} | {:>12} | {:>12} | {:>12}",
                    r.period,
                    r.count,
                    money(Some(r.avg_price)),
                    money(Some(r.min_price)),
                    money(Some(r.max_price))
                );
            }
            Ok(())
        }
        Commands::Listings { target, limit, offset } => {
            let conn = db::connect(&config.db_path)?;
            db::init_schema(&conn)?;
            let model_id = model_id(&conn, &target.make, &target.model)?;
            let rows = db::fetch_listings(&conn, model_id, limit, offset)?;
            if rows.is_empty() {
                println!("No listings.");
                return Ok(());
            }
            println!(
                "{:>6} | {:>4} | {:<16} | {:>12} | {:<10} | {:>7} | {:>4} | {:<20} | {}",
                "ID", "Year", "Variant", "Price", "Sold", "Miles", "Bids", "Location", "URL"
            );
            println!("{}", "-".repeat(140));
            for r in &rows {
                let price = if r.reserve_met { money(r.sale_price) } else { "RNM".to_string() };
                println!(
                    "{:>6} | {:>4} | {:<16} | {:>12} | {:<10} | {:>7} | {:>4} | {:<20} | {}",
                    r.id,
                    r.year.map(|y| y.to_string()).unwrap_or_else(|| "-".into()),
                    truncate(&r.variant, 16),
                    price,
                    r.sale_date.as_deref().unwrap_or("-"),
                    r.mileage.map(|m| m.to_string()).unwrap_or_else(|| "-".into()),
                    r.number_of_bids.map(|b| b.to_string()).unwrap_or_else(|| "-".into()),
                    truncate(r.location.as_deref().unwrap_or("-"), 20),
                    r.url
                );
            }
            println!("\n{} listings (offset {})", rows.len(), offset);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn crawl(config: &Config, target: &ModelTarget, args: &FetchArgs) -> anyhow::Result<Vec<ExtractedFields>> {
    let url = args.url.clone().unwrap_or_else(|| target.index_url());
    let opts = CrawlOptions {
        max_pages: args.max_pages.unwrap_or(config.max_pages),
        max_comment_expansions: config.max_comment_expansions,
        max_listings: args.max_listings,
        cards_only: args.cards_only,
    };
    info!(make = %target.make, model = %target.model, %url, "crawling");
    match args.source {
        SourceKind::Spider => {
            let source = SpiderSource::new(config.require_spider_key()?)?;
            crawl_with(&source, &url, &opts).await
        }
        SourceKind::Http => {
            let source = HttpSource::new(&config.user_agent)?;
            crawl_with(&source, &url, &opts).await
        }
    }
}

async fn crawl_with<S: PageSource>(source: &S, url: &str, opts: &CrawlOptions) -> anyhow::Result<Vec<ExtractedFields>> {
    let (records, stats) = fetch::crawl(source, url, opts).await?;
    println!(
        "Crawled {} index pages: {} cards, {} detail pages ({} failed).",
        stats.pages, stats.cards, stats.details, stats.detail_failures
    );
    Ok(records)
}

fn load_listings(
    config: &Config,
    listings: &[CanonicalListing],
    batch_size: usize,
    report: &filter::FilterReport,
) -> anyhow::Result<()> {
    let mut conn = db::connect(&config.db_path)?;
    db::init_schema(&conn)?;
    let summary = loader::load(&mut conn, listings, batch_size)?;
    summary.print();
    println!(
        "inserted={} updated={} errors={} filtered={} duplicates={}",
        summary.inserted,
        summary.updated,
        summary.errors,
        report.rejected_total(),
        report.duplicates
    );
    Ok(())
}

fn model_id(conn: &rusqlite::Connection, make: &str, model: &str) -> anyhow::Result<i64> {
    db::find_model_id(conn, make, model)?
        .with_context(|| format!("no listings loaded for {} {}", make, model))
}

fn print_overview(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    let models = db::fetch_models(conn)?;
    if models.is_empty() {
        println!("No models loaded. Run 'load' or 'run' first.");
        return Ok(());
    }
    println!(
        "{:<16} | {:<24} | {:>8} | {:>5} | {:>12}",
        "Make", "Model", "Listings", "Sales", "Avg price"
    );
    println!("{}", "-".repeat(77));
    for m in &models {
        let s = db::fetch_model_stats(conn, m.id)?;
        println!(
            "{:<16} | {:<24} | {:>8} | {:>5} | {:>12}",
            truncate(&m.make, 16),
            truncate(&m.model, 24),
            m.listings,
            s.total_sales,
            money(s.avg_price)
        );
    }
    println!("\n{} models", models.len());
    Ok(())
}

fn print_model_stats(conn: &rusqlite::Connection, make: &str, model: &str) -> anyhow::Result<()> {
    let s = db::fetch_model_stats(conn, model_id(conn, make, model)?)?;
    println!("Sales:       {}", s.total_sales);
    println!("Avg price:   {}", money(s.avg_price));
    println!("Min price:   {}", money(s.min_price));
    println!("Max price:   {}", money(s.max_price));
    println!(
        "Avg mileage: {}",
        s.avg_mileage.map(|m| m.to_string()).unwrap_or_else(|| "-".into())
    );
    println!(
        "Avg bids:    {}",
        s.avg_bids.map(|b| format!("{:.1}", b)).unwrap_or_else(|| "-".into())
    );
    Ok(())
}

fn money(amount: Option<f64>) -> String {
    let Some(amount) = amount else {
        return "-".into();
    };
    let digits = (amount.round() as u64).to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("${}", grouped)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
