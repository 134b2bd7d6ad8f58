use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use frontpage::config::Config;
use frontpage::feed::Fetcher;
use frontpage::pipeline::Pipeline;
use frontpage::ranking::top_unread;
use frontpage::scheduler::Scheduler;
use frontpage::storage::{Database, DatabaseError};

#[derive(Parser, Debug)]
#[command(
    name = "frontpage",
    version,
    about = "Feed reader that polls sources adaptively and ranks unread articles by importance"
)]
struct Args {
    /// Config file (default: ~/.config/frontpage/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subscribe to a feed URL and exit (repeatable)
    #[arg(long, value_name = "URL")]
    add: Vec<String>,

    /// Unsubscribe from a feed URL, deleting its articles, and exit (repeatable)
    #[arg(long, value_name = "URL")]
    remove: Vec<String>,

    /// Poll every due source once, then exit
    #[arg(long)]
    once: bool,

    /// Print the N highest ranked unread articles and exit
    #[arg(long, value_name = "N")]
    top: Option<u32>,

    /// Print --top output as JSON
    #[arg(long, requires = "top")]
    json: bool,

    /// More log output (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("frontpage={level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Create the config directory with user-only permissions.
fn ensure_config_dir(config_path: &Path) -> Result<()> {
    let Some(dir) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)) {
                tracing::warn!(path = %dir.display(), error = %e, "Failed to set config directory permissions to 0700");
            }
        }
    }
    Ok(())
}

/// Persist the store's current subscription list back into the config file.
async fn save_subscriptions(db: &Database, mut config: Config, path: &Path) -> Result<()> {
    config.subscriptions = db
        .list_sources()
        .await
        .context("Failed to list sources")?
        .into_iter()
        .map(|s| s.link)
        .collect();
    config
        .save(path)
        .with_context(|| format!("Failed to save config to {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    ensure_config_dir(&config_path)?;
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = config.database_path(&config_path);
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: Another instance of frontpage appears to be running.");
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    db.sync_subscriptions(&config.subscriptions)
        .await
        .context("Failed to sync subscriptions")?;

    // ------------------------------------------------------------------------
    // One-shot commands
    // ------------------------------------------------------------------------

    if !args.add.is_empty() || !args.remove.is_empty() {
        for url in &args.add {
            let url = url.trim();
            db.subscribe(url)
                .await
                .with_context(|| format!("Failed to subscribe to {url}"))?;
            println!("Subscribed: {url}");
        }
        for url in &args.remove {
            let url = url.trim();
            if db.unsubscribe(url).await? {
                println!("Unsubscribed: {url}");
            } else {
                println!("Not subscribed: {url}");
            }
        }
        return save_subscriptions(&db, config, &config_path).await;
    }

    if let Some(limit) = args.top {
        let ranked = top_unread(&db, 0, limit, &config.ranking)
            .await
            .context("Failed to rank articles")?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&ranked)?);
        } else if ranked.is_empty() {
            println!("No unread articles.");
        } else {
            for item in &ranked {
                println!("{:>8.2}  {}\n          {}", item.score, item.article.title, item.article.link);
            }
        }
        return Ok(());
    }

    // ------------------------------------------------------------------------
    // Polling
    // ------------------------------------------------------------------------

    let fetcher = Fetcher::new(&config.fetch_policy()).context("Failed to build HTTP client")?;
    let pipeline = Pipeline::new(
        db.clone(),
        fetcher,
        config.enrich_settings(),
        config.pipeline_settings(),
    );
    let mut scheduler = Scheduler::new(pipeline, config.backoff());

    if args.once {
        let report = scheduler.run_once().await?;
        println!(
            "Polled {} sources, {} new articles from {} sources",
            report.polls.len(),
            report.new_articles(),
            report.productive_sources().len()
        );
    } else {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
                // a dropped sender would also stop the scheduler
                std::future::pending::<()>().await;
            }
            tracing::info!("Interrupt received, finishing current cycle");
            let _ = shutdown_tx.send(true);
        });
        scheduler.run(shutdown_rx).await?;
    }

    save_subscriptions(&db, config, &config_path).await
}
