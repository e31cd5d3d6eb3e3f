use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rssq::app::AppContext;
use rssq::cli::commands::{self, TimelineArgs};
use rssq::cli::{Cli, Commands};
use rssq::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(workers) = cli.workers {
        config.sync.concurrency = workers;
    }
    let db_path = match cli.db {
        Some(path) => path,
        None => config.database_path()?,
    };

    let ctx = AppContext::open(&db_path, config.sync)?;
    for warning in &ctx.warnings {
        eprintln!("warning: {}", warning);
    }

    match cli.command {
        Commands::Add { url } => {
            commands::add_feed(&ctx, &url).await?;
        }
        Commands::Remove { feed } => {
            commands::remove_feed(&ctx, &feed)?;
        }
        Commands::List { json } => {
            commands::list_feeds(&ctx, json)?;
        }
        Commands::Import { path } => {
            commands::import_opml(&ctx, &path).await?;
        }
        Commands::Refresh { feed } => {
            commands::refresh(&ctx, feed.as_deref()).await?;
        }
        Commands::Watch { json } => {
            commands::watch(&ctx, json).await?;
        }
        Commands::Timeline {
            unread,
            all,
            queued,
            feed,
            group,
            page,
            limit,
            json,
        } => {
            commands::timeline(
                &ctx,
                TimelineArgs {
                    unread,
                    all,
                    queued,
                    feed: feed.as_deref(),
                    group: group.as_deref(),
                    page,
                    limit,
                    json,
                },
            )?;
        }
        Commands::Read { key } => {
            commands::mark(&ctx, &key, true)?;
        }
        Commands::Unread { key } => {
            commands::mark(&ctx, &key, false)?;
        }
        Commands::Queue { key } => {
            commands::queue(&ctx, &key, true)?;
        }
        Commands::Unqueue { key } => {
            commands::queue(&ctx, &key, false)?;
        }
        Commands::ReadAll { feed } => {
            commands::mark_all_read(&ctx, feed.as_deref())?;
        }
        Commands::Open { key, with } => {
            commands::open_item(&ctx, &key, with.as_deref())?;
        }
        Commands::Group { feed, name } => {
            commands::set_group(&ctx, &feed, name.as_deref())?;
        }
        Commands::Groups { json } => {
            commands::list_groups(&ctx, json)?;
        }
        Commands::Enable { feed } => {
            commands::set_enabled(&ctx, &feed, true)?;
        }
        Commands::Disable { feed } => {
            commands::set_enabled(&ctx, &feed, false)?;
        }
    }

    Ok(())
}
