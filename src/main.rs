use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use catalog_sync::config::Config;
use catalog_sync::navigation::{
    strip_group_prefix, FilterMode, NavigationLevel, NavigationState, Separator,
};
use catalog_sync::storage::{ContentType, Database, DatabaseError};
use catalog_sync::util::validate_catalog_url;
use catalog_sync::{CatalogEngine, EngineOptions, HttpCatalogClient, SyncState, TriggerOutcome};

/// Get the config directory path (~/.config/catalog-sync/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("catalog-sync"))
}

#[derive(Parser, Debug)]
#[command(
    name = "catalog-sync",
    about = "Offline-first media catalog sync with grouped navigation"
)]
struct Args {
    /// Reset database (delete and recreate)
    #[arg(long)]
    reset_db: bool,

    /// Config file (default: ~/.config/catalog-sync/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download and store catalogs (all content types when none given)
    Sync {
        #[arg(value_parser = parse_content_type)]
        content_type: Option<ContentType>,
        /// Sync even if the cached catalog is still fresh
        #[arg(long)]
        force: bool,
    },
    /// Print the navigation tree of a content type
    Tree {
        #[arg(value_parser = parse_content_type)]
        content_type: ContentType,
    },
    /// List the items of one category
    Items {
        #[arg(value_parser = parse_content_type)]
        content_type: ContentType,
        category_id: String,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Show or change the filter settings of a content type
    Filter {
        #[arg(value_parser = parse_content_type)]
        content_type: ContentType,
        #[arg(long)]
        grouping: Option<Toggle>,
        /// FIRST_WORD, or one of `|`, `-`, `/`
        #[arg(long)]
        separator: Option<String>,
        #[arg(long, value_parser = parse_filter_mode)]
        mode: Option<FilterMode>,
        /// Group to hide (blacklist) or show (whitelist); repeatable
        #[arg(long = "hide-group", value_name = "GROUP")]
        hide_groups: Vec<String>,
        /// Category to hide (blacklist) or show (whitelist); repeatable
        #[arg(long = "hide-category", value_name = "CATEGORY")]
        hide_categories: Vec<String>,
        /// Drop stored settings and return to the configured defaults
        #[arg(long, conflicts_with_all = ["grouping", "separator", "mode", "hide_groups", "hide_categories"])]
        clear: bool,
    },
    /// Show sync bookkeeping of every content type
    Status,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Toggle {
    On,
    Off,
}

fn parse_content_type(s: &str) -> Result<ContentType, String> {
    s.parse()
}

fn parse_filter_mode(s: &str) -> Result<FilterMode, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        println!("Created config directory: {}", config_dir.display());
    }

    // Catalog tokens may live in config.toml; keep the directory user-only.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(&config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(&config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = config_dir.join("catalog.db");
    if args.reset_db && db_path.exists() {
        std::fs::remove_file(&db_path).context("Failed to delete database")?;
        println!("Database reset.");
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of catalog-sync appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    let engine = build_engine(&config, db.clone()).await?;

    let result = match args.command {
        Command::Sync { .. } if config.catalog_url.is_none() => Err(anyhow::anyhow!(
            "catalog_url is not set in {}",
            config_path.display()
        )),
        Command::Sync {
            content_type,
            force,
        } => run_sync(&engine, content_type, force).await,
        Command::Tree { content_type } => print_tree(&engine, content_type).await,
        Command::Items {
            content_type,
            category_id,
            limit,
        } => print_items(&engine, content_type, &category_id, limit).await,
        Command::Filter {
            content_type,
            grouping,
            separator,
            mode,
            hide_groups,
            hide_categories,
            clear,
        } => {
            let change = FilterChange {
                grouping,
                separator,
                mode,
                hide_groups,
                hide_categories,
                clear,
            };
            edit_filter(&engine, content_type, change).await
        }
        Command::Status => print_status(&engine).await,
    };

    engine.shutdown().await;
    db.close().await;
    result
}

async fn build_engine(config: &Config, db: Database) -> Result<CatalogEngine> {
    let http_client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(5))
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(std::time::Duration::from_secs(30))
        .connect_timeout(config.request_timeout())
        .build()?;

    // Offline commands work without a provider; only `sync` needs it.
    let base_url = match config.catalog_url.as_deref() {
        Some(raw) => validate_catalog_url(raw).context("Invalid catalog_url in config")?,
        None => url::Url::parse("http://localhost/")?,
    };

    let source = HttpCatalogClient::new(http_client, base_url)
        .with_api_token(config.resolved_api_token())
        .with_timeout(config.request_timeout())
        .with_max_payload(config.max_payload_bytes());

    CatalogEngine::new(db, Arc::new(source), EngineOptions::from_config(config))
        .await
        .context("Failed to start catalog engine")
}

async fn run_sync(
    engine: &CatalogEngine,
    content_type: Option<ContentType>,
    force: bool,
) -> Result<()> {
    let targets: Vec<ContentType> = match content_type {
        Some(ct) => vec![ct],
        None => ContentType::ALL.to_vec(),
    };

    let mut started = Vec::new();
    for ct in targets {
        match engine.trigger_sync(ct, force).await {
            TriggerOutcome::Started => started.push(ct),
            TriggerOutcome::AlreadyRunning => println!("{}: already syncing", ct),
            TriggerOutcome::Fresh => println!("{}: cached catalog is fresh (use --force)", ct),
        }
    }

    let mut watchers = Vec::new();
    for ct in &started {
        let mut rx = engine.observe_sync_state(*ct);
        let ct = *ct;
        watchers.push(tokio::spawn(async move {
            let mut last_percent = None;
            while rx.changed().await.is_ok() {
                let state = rx.borrow_and_update().clone();
                let percent = state.overall_progress().map(|p| p as u32);
                if percent != last_percent {
                    if let (Some(phase), Some(p)) = (state.phase(), percent) {
                        eprintln!("{}: {} {:>3}%", ct, phase, p);
                    }
                    last_percent = percent;
                }
                if state.is_terminal() {
                    break;
                }
            }
        }));
    }

    let all_done = async {
        for ct in &started {
            engine.wait_for_sync(*ct).await;
        }
    };
    tokio::select! {
        _ = all_done => {}
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Cancelling...");
            engine.shutdown().await;
        }
    }
    for watcher in watchers {
        watcher.abort();
    }

    let mut failed = false;
    for ct in started {
        let state = engine.observe_sync_state(ct).borrow().clone();
        match &state {
            SyncState::Success {
                item_count,
                duration_ms,
            } => println!("{}: {} items in {} ms", ct, item_count, duration_ms),
            SyncState::PartialSuccess {
                success_count,
                failed_count,
                ..
            } => println!(
                "{}: {} items stored, {} rejected",
                ct, success_count, failed_count
            ),
            SyncState::Error { cause, .. } => {
                failed = true;
                match state.surfaced_error() {
                    Some(message) => eprintln!("{}: {}", ct, message),
                    None => eprintln!("{}: sync failed, showing cached catalog ({})", ct, cause),
                }
            }
            SyncState::Idle { .. } => println!("{}: cancelled", ct),
            other => println!("{}: {:?}", ct, other),
        }
    }

    if failed {
        anyhow::bail!("One or more catalogs failed to sync");
    }
    Ok(())
}

async fn print_tree(engine: &CatalogEngine, content_type: ContentType) -> Result<()> {
    let tree = engine
        .get_navigation_tree(content_type)
        .await
        .context("Failed to build navigation tree")?;
    if tree.is_empty() {
        println!("No categories. Run `catalog-sync sync {}` first.", content_type);
        return Ok(());
    }

    let separator = engine.filter_settings(content_type).separator_rule();
    let nav = NavigationState::enter(&tree);
    if nav.level() != NavigationLevel::Groups {
        println!("(single group, opens directly at {:?})", nav.level());
    }

    for group in &tree.groups {
        println!("{} ({})", group.name, group.count());
        for category in &group.categories {
            println!(
                "  [{}] {} ({} items)",
                category.id,
                strip_group_prefix(&category.name, &separator),
                category.item_count
            );
        }
    }
    Ok(())
}

async fn print_items(
    engine: &CatalogEngine,
    content_type: ContentType,
    category_id: &str,
    limit: Option<i64>,
) -> Result<()> {
    let items = engine
        .list_items(content_type, category_id, limit)
        .await
        .context("Failed to load items")?;
    if items.is_empty() {
        println!("No items in category {}", category_id);
    }
    for item in items {
        println!("{:>8}  {}", item.stream_id, item.name);
    }
    Ok(())
}

struct FilterChange {
    grouping: Option<Toggle>,
    separator: Option<String>,
    mode: Option<FilterMode>,
    hide_groups: Vec<String>,
    hide_categories: Vec<String>,
    clear: bool,
}

async fn edit_filter(
    engine: &CatalogEngine,
    content_type: ContentType,
    change: FilterChange,
) -> Result<()> {
    let settings = if change.clear {
        engine.reset_filter_settings(content_type).await?
    } else {
        let mut settings = engine.filter_settings(content_type);
        let mut touched = false;

        if let Some(toggle) = change.grouping {
            settings.grouping_enabled = matches!(toggle, Toggle::On);
            touched = true;
        }
        if let Some(raw) = change.separator {
            let separator: Separator = raw.parse()?;
            settings.separator = separator.as_setting();
            touched = true;
        }
        if let Some(mode) = change.mode {
            settings.filter_mode = mode;
            touched = true;
        }
        if !change.hide_groups.is_empty() {
            settings.hidden_groups = change.hide_groups.into_iter().collect();
            touched = true;
        }
        if !change.hide_categories.is_empty() {
            settings.hidden_categories = change.hide_categories.into_iter().collect();
            touched = true;
        }

        if touched {
            engine
                .update_filter_settings(content_type, settings.clone())
                .await?;
        }
        settings
    };

    println!("{} filter settings:", content_type);
    println!(
        "  grouping:   {}",
        if settings.grouping_enabled { "on" } else { "off" }
    );
    println!("  separator:  {}", settings.separator);
    println!("  mode:       {:?}", settings.filter_mode);
    println!("  groups:     {:?}", settings.hidden_groups);
    println!("  categories: {:?}", settings.hidden_categories);
    Ok(())
}

async fn print_status(engine: &CatalogEngine) -> Result<()> {
    for ct in ContentType::ALL {
        let meta = engine.sync_metadata(ct).await?;
        let last = meta
            .last_success_at
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!("{:<7} last sync: {}  items: {}", ct.as_str(), last, meta.item_count);
        if let Some(error) = meta.last_error {
            println!("        last error: {}", error);
        }
    }
    Ok(())
}
