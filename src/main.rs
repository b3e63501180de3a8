// 🔎 TrackerID CLI - field lookup of solar-park trackers
//
// Query commands answer from the cached pack first; the network refresh
// runs behind them and never prints failures.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use trackerid::config::config_path;
use trackerid::{
    export_filename, listing_line, render, result_summary, Config, DatasetRepository,
    ExportFormat, HttpFetcher, LoadOutcome, LoadSource, LookupEngine, OfflineFetcher, Pack,
    PackFetcher, ParkDescriptor, ParkRegistry, SqlitePackStore,
};

#[derive(Parser)]
#[command(name = "trackerid", version, about = "Offline-first tracker lookup for solar parks")]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct GlobalOpts {
    /// Config file (default: platform config dir)
    #[arg(long, global = true, env = "TRACKERID_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite cache file
    #[arg(long, global = true, env = "TRACKERID_DB")]
    database: Option<PathBuf>,

    /// Park registry location (file or URL)
    #[arg(long, global = true, env = "TRACKERID_PARKS")]
    parks: Option<String>,

    /// Park id (default: last used park)
    #[arg(short, long, global = true, env = "TRACKERID_PARK")]
    park: Option<String>,

    /// Never touch the network
    #[arg(long, global = true)]
    offline: bool,

    /// -v debug, -vv trace
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// List parks from the registry
    Parks,
    /// Load the park (cache first, network otherwise)
    Load,
    /// Refresh the park from the network now
    Refresh,
    /// Look up a tracker by TK number
    Tk { tk: i64 },
    /// Look up a tracker by platform and ControlBox id
    Cb { platform: i64, controlbox: i64 },
    /// Look up a tracker by composite string id (e.g. 1-2-3)
    String { id: String },
    /// List trackers, optionally filtered by text
    List {
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// Import a JSON pack or a CSV table (comma or semicolon) into the park
    Import { file: PathBuf },
    /// Export the park dataset
    Export {
        #[arg(short, long, default_value = "csv")]
        format: String,
        /// Output file, `-` for stdout (default: <park>_trackers.<ext>)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Delete the park's cached pack
    Forget,
    /// Replace the park's dataset with an empty one
    Reset,
    /// Show config and cached packs
    Status,
}

struct App {
    config: Config,
    store: SqlitePackStore,
    repo: DatasetRepository,
    fetcher: Arc<dyn PackFetcher>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    let app = open_app(&cli.global)?;
    run(&app, &cli.global, cli.command).await
}

fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn open_app(global: &GlobalOpts) -> Result<App> {
    let mut config = Config::load(global.config.as_deref()).context("Failed to load config")?;
    if let Some(database) = &global.database {
        config.database = database.clone();
    }
    if let Some(parks) = &global.parks {
        config.parks = parks.clone();
    }
    config.validate()?;

    let store = SqlitePackStore::open(&config.database)
        .with_context(|| format!("Failed to open cache {}", config.database.display()))?;

    let fetcher: Arc<dyn PackFetcher> = if global.offline {
        Arc::new(OfflineFetcher)
    } else {
        Arc::new(HttpFetcher::new(config.fetch_timeout())?)
    };

    let repo = DatasetRepository::new(Arc::new(store.clone()), fetcher.clone());

    Ok(App {
        config,
        store,
        repo,
        fetcher,
    })
}

async fn run(app: &App, global: &GlobalOpts, command: Command) -> Result<()> {
    match command {
        Command::Status => return show_status(app).await,
        Command::Parks => return list_parks(app).await,
        _ => {}
    }

    let registry = load_registry(app).await?;
    let park = select_park(app, &registry, global.park.as_deref()).await?;

    match command {
        Command::Load => {
            let outcome = open_park(app, &park).await?;
            println!("✓ {} ({}): {} trackers", park.name, park.id, outcome.trackers);
            wait_background(app, outcome).await;
        }
        Command::Refresh => {
            let outcome = app.repo.refresh(&park.id, &park.data_location).await?;
            if outcome.changed {
                println!("✓ {} updated: {} trackers", park.name, outcome.trackers);
            } else {
                println!("✓ {} already up to date ({} trackers)", park.name, outcome.trackers);
            }
        }
        Command::Tk { tk } => {
            let outcome = open_park(app, &park).await?;
            let pack = app.repo.active_pack()?;
            match LookupEngine::new(&pack).find_by_tk(tk) {
                Some(record) => println!("{}", result_summary(&park.name, record, None)),
                None => println!("❌ TK {} not found in {}", tk, park.name),
            }
            wait_background(app, outcome).await;
        }
        Command::Cb {
            platform,
            controlbox,
        } => {
            let outcome = open_park(app, &park).await?;
            let pack = app.repo.active_pack()?;
            match LookupEngine::new(&pack).find_by_platform_and_controlbox(platform, controlbox) {
                Some(record) => println!("{}", result_summary(&park.name, record, None)),
                None => println!(
                    "❌ Platform {} / ControlBox {} not found in {}",
                    platform, controlbox, park.name
                ),
            }
            wait_background(app, outcome).await;
        }
        Command::String { id } => {
            let outcome = open_park(app, &park).await?;
            let pack = app.repo.active_pack()?;
            match LookupEngine::new(&pack).find_by_composite_id(&id) {
                Some(hit) => println!(
                    "{}",
                    result_summary(&park.name, hit.record, Some(hit.normalized_query.as_str()))
                ),
                None => println!("❌ String {} not found in {}", id.trim(), park.name),
            }
            wait_background(app, outcome).await;
        }
        Command::List { filter } => {
            let outcome = open_park(app, &park).await?;
            let pack = app.repo.active_pack()?;
            let engine = LookupEngine::new(&pack);
            let records = match filter.as_deref() {
                Some(query) => engine.filter_by_text(query),
                None => engine.sorted_by_tk(),
            };
            for record in &records {
                println!("{}", listing_line(record));
            }
            println!("\n{} of {} trackers", records.len(), engine.len());
            wait_background(app, outcome).await;
        }
        Command::Import { file } => {
            let summary = app
                .repo
                .import_file(&park.id, &file)
                .await
                .with_context(|| format!("Failed to import {}", file.display()))?;
            println!("✓ Imported {} trackers into {}", summary.trackers, park.name);
            if summary.skipped_rows > 0 {
                println!("  Skipped rows: {}", summary.skipped_rows);
            }
            if summary.duplicates_collapsed > 0 {
                println!("  Duplicate TKs collapsed: {}", summary.duplicates_collapsed);
            }
        }
        Command::Export { format, out } => {
            let format: ExportFormat = format.parse()?;
            let outcome = open_park(app, &park).await?;
            let pack = app.repo.active_pack()?;
            if let Some(path) = write_export(&pack, &park.id, format, out)? {
                println!("✓ Exported {} to {}", park.name, path.display());
            }
            wait_background(app, outcome).await;
        }
        Command::Forget => {
            app.repo.forget(&park.id).await?;
            println!("✓ Cache of {} deleted", park.name);
        }
        Command::Reset => {
            app.repo.reset_empty(&park.id).await?;
            println!("✓ {} reset to an empty dataset", park.name);
        }
        Command::Status | Command::Parks => {}
    }

    Ok(())
}

/// Write the rendered pack to `out` (default `<park>_trackers.<ext>`, `-` for
/// stdout). Returns the file written, if any.
fn write_export(
    pack: &Pack,
    park_id: &str,
    format: ExportFormat,
    out: Option<PathBuf>,
) -> Result<Option<PathBuf>> {
    let text = render(pack, format)?;

    let out = out.unwrap_or_else(|| PathBuf::from(export_filename(park_id, format)));
    if out.as_os_str() == "-" {
        println!("{}", text);
        return Ok(None);
    }

    std::fs::write(&out, text).with_context(|| format!("Failed to write {}", out.display()))?;
    Ok(Some(out))
}

async fn load_registry(app: &App) -> Result<ParkRegistry> {
    let registry =
        ParkRegistry::load_with_fallback(app.fetcher.as_ref(), &app.store, &app.config.parks)
            .await
            .with_context(|| format!("Failed to load park registry {}", app.config.parks))?;
    if registry.is_empty() {
        bail!("Park registry {} lists no parks", app.config.parks);
    }
    Ok(registry)
}

async fn select_park(
    app: &App,
    registry: &ParkRegistry,
    requested: Option<&str>,
) -> Result<ParkDescriptor> {
    if let Some(id) = requested {
        return Ok(registry.get(id)?.clone());
    }

    let last = app.repo.last_park().await.unwrap_or(None);
    registry
        .default_park(last.as_deref())
        .cloned()
        .context("No park available")
}

async fn open_park(app: &App, park: &ParkDescriptor) -> Result<LoadOutcome> {
    app.repo.load_park(park).await.with_context(|| {
        format!(
            "No cached data for {} and the network load failed; load it once while online",
            park.name
        )
    })
}

/// Let the background refresh land in the cache before the process exits
async fn wait_background(app: &App, outcome: LoadOutcome) {
    if outcome.source != LoadSource::Cache {
        return;
    }
    if let Some(background) = outcome.background {
        background.finish_within(app.config.fetch_timeout()).await;
    }
}

async fn list_parks(app: &App) -> Result<()> {
    let registry = load_registry(app).await?;
    let last = app.repo.last_park().await.unwrap_or(None);
    let cached = app.store.cached_pack_stats()?;

    println!("🏞️  Parks ({})", app.config.parks);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for park in registry.parks() {
        let marker = if last.as_deref() == Some(park.id.as_str()) { "▶" } else { " " };
        let cache = cached
            .iter()
            .find(|s| s.key == trackerid::park_key(&park.id))
            .map(|s| format!("{} trackers, {}", s.trackers, s.updated))
            .unwrap_or_else(|| "not cached".to_string());
        println!("{} {:<12} {:<24} [{}]", marker, park.id, park.name, cache);
    }
    Ok(())
}

async fn show_status(app: &App) -> Result<()> {
    println!("📊 TrackerID {}", trackerid::VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Config:   {}", config_path().display());
    println!("Database: {}", app.config.database.display());
    println!("Parks:    {}", app.config.parks);
    if let Some(last) = app.repo.last_park().await? {
        println!("Last park: {}", last);
    }

    let cached = app.store.cached_pack_stats()?;
    println!("\n💾 Cached packs: {}", cached.len());
    for stat in cached {
        println!(
            "  {:<20} {:>6} trackers  updated {}  stored {}",
            stat.key, stat.trackers, stat.updated, stat.stored_at
        );
    }
    Ok(())
}
