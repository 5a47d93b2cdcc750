use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use listenfold::catalog::spotify::SpotifyClient;
use listenfold::config::AppConfig;
use listenfold::db::Database;
use listenfold::enrich::EnrichOptions;
use listenfold::identifiers::Resolution;
use listenfold::ingest::LoadOptions;
use listenfold::pipeline::{self, EnrichSummary, MergeSummary};
use listenfold::unify::MergeStatus;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "listenfold", version, about = "Unified, catalog-enriched listening history")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct MergeArgs {
    /// Directory with Streaming_History_Audio_*.json and watch-history.json
    #[arg(long)]
    raw_dir: Option<PathBuf>,

    /// Keep only listens from this calendar year
    #[arg(long)]
    year: Option<i32>,
}

#[derive(clap::Args)]
struct EnrichArgs {
    /// Ids per audio-features request (max 100)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Show the resolution plan without calling the catalog
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the Spotify and YouTube Music exports into one listen log
    Merge(MergeArgs),

    /// Enrich the stored listen log with Spotify catalog metadata
    Enrich(EnrichArgs),

    /// Merge, then enrich
    Run {
        #[command(flatten)]
        merge: MergeArgs,

        #[command(flatten)]
        enrich: EnrichArgs,
    },

    /// Show stored table sizes and enrichment coverage
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli
        .db_path
        .or(config.db_path.clone())
        .unwrap_or_else(listenfold::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    let db = Database::open(&db_path).context("Failed to open database")?;

    match cli.command {
        Commands::Merge(args) => {
            run_merge(&db, &config, &args)?;
        }

        Commands::Enrich(args) => {
            run_enrich(&db, &config, &args)?;
        }

        Commands::Run { merge, enrich } => {
            let summary = run_merge(&db, &config, &merge)?;
            if summary.status == MergeStatus::NothingToMerge {
                return Ok(());
            }
            println!();
            run_enrich(&db, &config, &enrich)?;
        }

        Commands::Stats => {
            let stats = db.stats().context("Failed to read stats")?;
            println!("Listen events:  {}", stats.listen_events);
            println!("  Spotify:       {}", stats.spotify_events);
            println!("  YouTube Music: {}", stats.youtube_events);
            println!(
                "Enrichment:     {} tracks ({} matched)",
                stats.enrichment_records, stats.enrichment_found
            );
            println!("Unified events: {}", stats.unified_events);
            if stats.unified_events > 0 {
                let pct = |n: i64| n as f64 * 100.0 / stats.unified_events as f64;
                println!(
                    "  Matched:        {} ({:.1}%)",
                    stats.unified_found,
                    pct(stats.unified_found)
                );
                println!(
                    "  Audio features: {} ({:.1}%)",
                    stats.unified_with_features,
                    pct(stats.unified_with_features)
                );
            }
        }
    }

    Ok(())
}

fn run_merge(db: &Database, config: &AppConfig, args: &MergeArgs) -> Result<MergeSummary> {
    // CLI > config > default
    let opts = LoadOptions {
        raw_dir: args
            .raw_dir
            .clone()
            .or(config.raw_dir.clone())
            .unwrap_or_else(listenfold::config::default_raw_dir),
        year: args.year.or(config.year),
    };
    log::info!("Reading exports from {}", opts.raw_dir.display());

    let summary = pipeline::merge(db, &opts).context("Merge failed")?;
    match summary.status {
        MergeStatus::Merged { spotify, youtube } => println!(
            "Merge complete: {} events ({} Spotify, {} YouTube Music), {} known track ids",
            summary.events, spotify, youtube, summary.known_ids
        ),
        MergeStatus::NothingToMerge => println!(
            "Nothing to merge: no Spotify or YouTube Music exports found in {}",
            opts.raw_dir.display()
        ),
    }
    Ok(summary)
}

fn run_enrich(db: &Database, config: &AppConfig, args: &EnrichArgs) -> Result<()> {
    if args.dry_run {
        println!("DRY RUN — no catalog calls, nothing written to the database");
        let (events, plan) = pipeline::plan(db)?;
        println!(
            "{} events, {} distinct tracks: {} known ids, {} to search, {} unsearchable",
            events.len(),
            plan.keys.len(),
            plan.known_count(),
            plan.search_count(),
            plan.unsearchable_count()
        );
        println!();
        println!("{:>6}  {:<10}  Track", "Plays", "Lookup");
        for planned in plan.keys.iter().take(25) {
            let lookup = match planned.resolution {
                Resolution::Known(_) => "id",
                Resolution::Search => "search",
                Resolution::Unsearchable => "skip",
            };
            println!("{:>6}  {:<10}  {}", planned.play_count, lookup, planned.key);
        }
        if plan.keys.len() > 25 {
            println!("... and {} more", plan.keys.len() - 25);
        }
        return Ok(());
    }

    let credentials = config.credentials().context(
        "Spotify credentials missing. Set SPOTIFY_CLIENT_ID and SPOTIFY_CLIENT_SECRET \
         or [catalog] client_id/client_secret in the config file.",
    )?;
    let mut client = SpotifyClient::connect(credentials, config.client_settings())
        .context("Failed to authenticate with Spotify")?;

    let mut opts: EnrichOptions = config.enrich_options();
    if let Some(n) = args.batch_size {
        opts.batch_size = n.clamp(1, listenfold::catalog::MAX_FEATURE_BATCH);
    }

    let summary = pipeline::enrich(db, &mut client, &opts)?;
    print_enrich_summary(&summary);
    Ok(())
}

fn print_enrich_summary(summary: &EnrichSummary) {
    let s = &summary.stats;
    println!(
        "Enrichment complete: {} tracks, {} found ({} by id, {} by search), \
         {} not found, {} unsearchable, {} errors",
        s.keys,
        s.found(),
        s.found_by_id,
        s.found_by_search,
        s.not_found,
        s.unsearchable,
        s.errors
    );
    println!(
        "Genres: {} artist lookups ({} failed). Audio features: {} batches ({} failed), {} tracks",
        s.artist_lookups,
        s.artist_failures,
        s.feature_batches,
        s.feature_batches_failed,
        s.with_features
    );
    if summary.duplicate_records > 0 {
        println!("{} duplicate enrichment records ignored", summary.duplicate_records);
    }
    let c = &summary.coverage;
    println!(
        "Coverage: {}/{} events matched ({:.1}%), {} with audio features ({:.1}%)",
        c.found,
        c.events,
        c.found_pct(),
        c.with_features,
        c.features_pct()
    );
}
