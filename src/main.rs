mod config;
mod db;
mod error;
mod fetcher;
mod parser;
mod pipeline;
mod record;
mod sinks;

use std::fmt::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use crate::config::Settings;
use crate::pipeline::{Pipeline, RunResult};
use crate::sinks::SinkReport;

/// Exit status when a page failure cut the crawl short.
const EXIT_ABORTED: u8 = 2;

#[derive(Parser)]
#[command(name = "catalog_scraper", about = "Paginated product catalog scraper (CSV, JSON, SQLite)")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConfigArg {
    /// TOML settings file (default: ./catalog_scraper.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the catalog and replace all three outputs
    Run {
        #[command(flatten)]
        config: ConfigArg,
        /// First catalog page
        #[arg(long)]
        start_url: Option<String>,
        /// Seconds to wait between requests
        #[arg(long)]
        delay: Option<f64>,
        /// Stop after this many pages
        #[arg(long)]
        max_pages: Option<usize>,
        /// CSV output path
        #[arg(long)]
        csv: Option<PathBuf>,
        /// JSON output path
        #[arg(long)]
        json: Option<PathBuf>,
        /// SQLite output path
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Summarize the SQLite store
    Stats {
        #[command(flatten)]
        config: ConfigArg,
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Products table from the SQLite store
    List {
        #[command(flatten)]
        config: ConfigArg,
        #[arg(long)]
        db: Option<PathBuf>,
        /// Only products in stock
        #[arg(short, long)]
        available: bool,
        /// Minimum star rating (1-5)
        #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(1..=5))]
        min_rating: Option<u8>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config,
            start_url,
            delay,
            max_pages,
            csv,
            json,
            db,
        } => {
            let mut settings = Settings::load(config.config.as_deref())?;
            if let Some(u) = start_url {
                settings.start_url = u;
            }
            if let Some(d) = delay {
                settings.request_delay_seconds = d;
            }
            if let Some(n) = max_pages {
                settings.max_pages = n;
            }
            if let Some(p) = csv {
                settings.output_targets.tabular = p;
            }
            if let Some(p) = json {
                settings.output_targets.document = p;
            }
            if let Some(p) = db {
                settings.output_targets.relational = p;
            }
            settings.validate()?;
            run(&settings).await
        }
        Commands::Stats { config, db } => {
            let conn = open_store(config, db)?;
            let s = db::get_stats(&conn)?;
            let price = |p: Option<f64>| p.map_or_else(|| "-".to_string(), |v| format!("{:.2}", v));
            println!("Products:  {}", s.total);
            println!("Available: {}", s.available);
            println!("Avg price: {}", price(s.avg_price));
            println!("Min price: {}", price(s.min_price));
            println!("Max price: {}", price(s.max_price));
            println!("Ratings:");
            for (stars, n) in s.ratings.iter().enumerate().skip(1) {
                println!("  {} {:>5}", "*".repeat(stars), n);
            }
            println!("  unrated {:>5}", s.ratings[0]);
            Ok(ExitCode::SUCCESS)
        }
        Commands::List {
            config,
            db,
            available,
            min_rating,
            limit,
        } => {
            let conn = open_store(config, db)?;
            let rows = db::fetch_products(
                &conn,
                &db::ProductFilter {
                    available_only: available,
                    min_rating,
                    limit: Some(limit),
                },
            )?;
            if rows.is_empty() {
                println!("No products found.");
                return Ok(ExitCode::SUCCESS);
            }

            println!("{:>4} | {:<48} | {:>8} | {:<5} | {:<6}", "#", "Title", "Price", "Stock", "Rating");
            println!("{}", "-".repeat(84));
            for (i, r) in rows.iter().enumerate() {
                let rating = r.rating.map_or_else(|| "-".to_string(), |n| "*".repeat(n as usize));
                println!(
                    "{:>4} | {:<48} | {:>8.2} | {:<5} | {:<6}",
                    i + 1,
                    truncate(&r.title, 45),
                    r.price,
                    if r.availability { "yes" } else { "no" },
                    rating
                );
            }
            println!("\n{} products", rows.len());
            Ok(ExitCode::SUCCESS)
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn run(settings: &Settings) -> anyhow::Result<ExitCode> {
    let (result, reports) = crawl(settings).await?;
    print_summary(&result, &reports);
    Ok(ExitCode::from(exit_status(&result)))
}

/// Crawl the catalog, then hand whatever was collected to every sink.
async fn crawl(settings: &Settings) -> anyhow::Result<(RunResult, Vec<SinkReport>)> {
    let start = settings.start_locator()?;
    let mut pipeline = Pipeline::new(settings)?;

    println!("Crawling from {} ...", start);
    let result = pipeline.run(start).await;

    let sinks = sinks::from_targets(&settings.output_targets);
    let reports = sinks::write_all(&sinks, &result.records);
    Ok((result, reports))
}

/// Sink failures are reported in the summary but do not change the status.
fn exit_status(result: &RunResult) -> u8 {
    if result.aborted() {
        EXIT_ABORTED
    } else {
        0
    }
}

fn open_store(config: ConfigArg, db: Option<PathBuf>) -> anyhow::Result<rusqlite::Connection> {
    let path = match db {
        Some(p) => p,
        None => Settings::load(config.config.as_deref())?.output_targets.relational,
    };
    if !path.exists() {
        anyhow::bail!("No store at {}. Run 'run' first.", path.display());
    }
    db::connect(&path).with_context(|| format!("Failed to open {}", path.display()))
}

fn print_summary(result: &RunResult, reports: &[SinkReport]) {
    let mut out = String::new();
    if write_summary(&mut out, result, reports).is_ok() {
        print!("{}", out);
    }
}

fn write_summary(out: &mut impl Write, result: &RunResult, reports: &[SinkReport]) -> fmt::Result {
    writeln!(
        out,
        "\nRun started {}",
        result.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    )?;
    writeln!(out, "Pages visited:   {}", result.pages_visited)?;
    writeln!(out, "Pages failed:    {}", result.pages_failed)?;
    writeln!(out, "Items seen:      {}", result.items_seen)?;
    writeln!(out, "Items extracted: {}", result.records.len())?;
    writeln!(out, "Items skipped:   {}", result.items_skipped)?;
    writeln!(out, "Stopped:         {:?}", result.stop)?;

    for r in reports {
        match &r.outcome {
            Ok(n) => writeln!(out, "  [ok]     {:<10} {} rows -> {}", r.sink, n, r.target.display())?,
            Err(e) => writeln!(out, "  [FAILED] {:<10} {}", r.sink, e)?,
        }
    }
    let failed_sinks = reports.iter().filter(|r| !r.is_ok()).count();
    if failed_sinks > 0 {
        writeln!(out, "{} of {} outputs were not written", failed_sinks, reports.len())?;
    }

    if !result.skipped.is_empty() {
        writeln!(out, "Skipped items:")?;
        for s in result.skipped.iter().take(20) {
            writeln!(out, "  {} {}", s.page, s.error)?;
        }
        if result.skipped.len() > 20 {
            writeln!(out, "  ... and {} more", result.skipped.len() - 20)?;
        }
    }
    if let Some(e) = &result.failure {
        writeln!(out, "Run aborted: {}", e)?;
    }
    Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputTargets;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}", name)).unwrap()
    }

    async fn serve(server: &mut mockito::ServerGuard, path: &str, status: usize, body: String) -> mockito::Mock {
        server
            .mock("GET", path)
            .with_status(status)
            .with_header("content-type", "text/html")
            .with_body(body)
            .create_async()
            .await
    }

    fn settings(server: &mockito::ServerGuard, targets: OutputTargets) -> Settings {
        Settings {
            start_url: format!("{}/catalogue/page-1.html", server.url()),
            request_delay_seconds: 0.0,
            max_retries: 0,
            output_targets: targets,
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn failed_sink_is_flagged_but_run_succeeds() {
        let mut server = mockito::Server::new_async().await;
        let _p1 = serve(&mut server, "/catalogue/page-1.html", 200, fixture("page-1.html")).await;
        let _p2 = serve(&mut server, "/catalogue/page-2.html", 200, fixture("page-2.html")).await;

        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("products.json");
        std::fs::create_dir(&blocked).unwrap();
        std::fs::write(blocked.join("keep"), "x").unwrap();
        let targets = OutputTargets {
            tabular: dir.path().join("products.csv"),
            document: blocked,
            relational: dir.path().join("products.db"),
        };

        let (result, reports) = crawl(&settings(&server, targets)).await.unwrap();

        assert_eq!(result.records.len(), 5);
        assert_eq!(exit_status(&result), 0);
        let failed: Vec<&str> = reports.iter().filter(|r| !r.is_ok()).map(|r| r.sink).collect();
        assert_eq!(failed, vec!["document"]);

        let mut out = String::new();
        write_summary(&mut out, &result, &reports).unwrap();
        assert!(out.contains("[FAILED] document"));
        assert!(out.contains("1 of 3 outputs were not written"));
        assert!(out.contains("Items extracted: 5"));
        assert!(!out.contains("Run aborted"));
    }

    #[tokio::test]
    async fn page_failure_exits_with_aborted_status() {
        let mut server = mockito::Server::new_async().await;
        let _p1 = serve(&mut server, "/catalogue/page-1.html", 200, fixture("page-1.html")).await;
        let _p2 = serve(&mut server, "/catalogue/page-2.html", 404, String::new()).await;

        let dir = tempfile::tempdir().unwrap();
        let targets = OutputTargets {
            tabular: dir.path().join("products.csv"),
            document: dir.path().join("products.json"),
            relational: dir.path().join("products.db"),
        };

        let (result, reports) = crawl(&settings(&server, targets)).await.unwrap();

        assert_eq!(exit_status(&result), EXIT_ABORTED);
        // records from page 1 are still persisted
        assert!(reports.iter().all(|r| r.is_ok()));
        assert!(matches!(reports[0].outcome, Ok(3)));

        let mut out = String::new();
        write_summary(&mut out, &result, &reports).unwrap();
        assert!(out.contains("Pages failed:    1"));
        assert!(out.contains("Run aborted:"));
    }

    #[test]
    fn truncates_long_titles() {
        assert_eq!(truncate("Soumission", 45), "Soumission");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
