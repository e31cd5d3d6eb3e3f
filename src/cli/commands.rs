use std::path::Path;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::app::{AppContext, Result, RssqError};
use crate::domain::{FeedId, ItemKey, Page, StatusEvent, TimelineEntry, TimelineFilter};
use crate::scheduler::service;
use crate::scheduler::{PassReport, RefreshTarget};

/// Resolves a feed given either its numeric id or its URL.
pub fn resolve_feed(ctx: &AppContext, feed: &str) -> Result<FeedId> {
    let feeds = ctx.registry.list();

    if let Ok(id) = feed.trim().parse::<FeedId>() {
        if feeds.iter().any(|f| f.id == id) {
            return Ok(id);
        }
    }

    let normalized = crate::registry::validate_url(feed).ok();
    feeds
        .iter()
        .find(|f| f.url == feed || Some(&f.url) == normalized.as_ref())
        .map(|f| f.id)
        .ok_or_else(|| RssqError::FeedNotFound(feed.to_string()))
}

pub async fn add_feed(ctx: &AppContext, url: &str) -> Result<()> {
    let id = ctx.registry.add(url)?;
    println!("Added feed {}: {}", id, url);

    let report = ctx.scheduler.force_refresh(RefreshTarget::Feed(id)).await?;
    let feed = ctx.registry.get(id)?;
    if let Some(title) = &feed.title {
        println!("Feed title: {}", title);
    }
    if let Some(error) = feed.last_error.as_deref().filter(|_| !report.failed.is_empty()) {
        eprintln!("Initial fetch failed: {}", error);
    } else {
        println!("Fetched {} new items", report.new_items);
    }

    Ok(())
}

pub fn remove_feed(ctx: &AppContext, feed: &str) -> Result<()> {
    let id = resolve_feed(ctx, feed)?;
    let url = ctx.registry.get(id)?.url;
    ctx.registry.remove(id)?;
    println!("Removed feed: {}", url);
    Ok(())
}

pub fn set_enabled(ctx: &AppContext, feed: &str, enabled: bool) -> Result<()> {
    let id = resolve_feed(ctx, feed)?;
    let feed = ctx.registry.set_enabled(id, enabled)?;
    println!(
        "{} {}",
        if enabled { "Enabled" } else { "Disabled" },
        feed.display_title()
    );
    Ok(())
}

pub fn set_group(ctx: &AppContext, feed: &str, group: Option<&str>) -> Result<()> {
    let id = resolve_feed(ctx, feed)?;
    let feed = ctx.registry.set_group(id, group)?;
    match &feed.group {
        Some(group) => println!("Moved {} to group {}", feed.display_title(), group),
        None => println!("Removed {} from its group", feed.display_title()),
    }
    Ok(())
}

pub fn list_groups(ctx: &AppContext, json: bool) -> Result<()> {
    let groups = ctx.registry.groups();

    if json {
        println!("{}", to_json(&groups)?);
        return Ok(());
    }

    if groups.is_empty() {
        println!("No groups");
        return Ok(());
    }

    for group in groups {
        println!(
            "{} ({} feeds, {} unread)",
            group.name,
            group.feeds.len(),
            group.unread
        );
    }
    Ok(())
}

pub fn list_feeds(ctx: &AppContext, json: bool) -> Result<()> {
    let statuses = ctx.registry.statuses(ctx.config.degraded_after);

    if json {
        println!("{}", to_json(&statuses)?);
        return Ok(());
    }

    if statuses.is_empty() {
        println!("No feeds");
        return Ok(());
    }

    for status in statuses {
        let mut flags = Vec::new();
        if !status.enabled {
            flags.push("disabled".to_string());
        }
        if status.degraded {
            flags.push(format!("degraded, {} failures", status.consecutive_failures));
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join("; "))
        };

        let group = status
            .group
            .as_deref()
            .map(|g| format!(" <{}>", g))
            .unwrap_or_default();
        println!(
            "{:>4}  {}{} ({} unread){}\n      {}",
            status.feed_id, status.title, group, status.unread, flags, status.url
        );
        if let Some(error) = &status.last_error {
            println!("      last error: {}", error);
        }
    }

    Ok(())
}

pub async fn refresh(ctx: &AppContext, feed: Option<&str>) -> Result<()> {
    let target = match feed {
        Some(feed) => RefreshTarget::Feed(resolve_feed(ctx, feed)?),
        None => RefreshTarget::All,
    };

    if ctx.registry.list().is_empty() {
        println!("No feeds to refresh");
        return Ok(());
    }

    let report = ctx.scheduler.force_refresh(target).await?;
    print_report(ctx, &report);
    Ok(())
}

fn print_report(ctx: &AppContext, report: &PassReport) {
    for id in &report.failed {
        if let Some(feed) = ctx.state.feed(*id) {
            eprintln!(
                "  Error updating {}: {}",
                feed.display_title(),
                feed.last_error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    println!("{}", summarize(report));
}

fn summarize(report: &PassReport) -> String {
    format!(
        "Refresh complete: {} new items, {} updated, {} not modified, {} errors",
        report.new_items,
        report.updated_items,
        report.not_modified.len(),
        report.failed.len()
    )
}

/// Runs the background service until Ctrl-C, printing status events.
///
/// Each line read from stdin forces a refresh of every feed.
pub async fn watch(ctx: &AppContext, json: bool) -> Result<()> {
    let (handle, task) = service::spawn(ctx.scheduler.clone(), ctx.clock.clone());
    let mut events = handle.subscribe();
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    println!(
        "Watching {} feeds (refresh every {}), press Enter to refresh now, Ctrl-C to stop",
        ctx.registry.list().len(),
        crate::config::duration::format_duration(ctx.config.refresh_interval)
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = input.next_line(), if stdin_open => match line {
                Ok(Some(_)) => {
                    let handle = handle.clone();
                    tokio::spawn(async move {
                        match handle.refresh(RefreshTarget::All).await {
                            Ok(report) => println!("{}", summarize(&report)),
                            Err(e) => eprintln!("Refresh failed: {}", e),
                        }
                    });
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!("Stopped reading stdin: {}", e);
                    stdin_open = false;
                }
            },
            event = events.recv() => match event {
                Ok(event) => {
                    if json {
                        println!("{}", to_json_line(&event)?);
                    } else {
                        println!("{}", describe_event(ctx, &event));
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("Missed {} status events", missed);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    handle.shutdown().await;
    if let Err(e) = task.await {
        tracing::error!("Scheduler service task failed: {}", e);
    }
    Ok(())
}

fn describe_event(ctx: &AppContext, event: &StatusEvent) -> String {
    let title = ctx
        .state
        .feed(event.feed_id())
        .map(|f| f.display_title().to_string())
        .unwrap_or_else(|| event.feed_id().to_string());

    match event {
        StatusEvent::FeedRefreshed {
            not_modified: true, ..
        } => format!("{}: not modified", title),
        StatusEvent::FeedRefreshed {
            new_items,
            updated_items,
            ..
        } => format!("{}: {} new, {} updated", title, new_items, updated_items),
        StatusEvent::FeedFailed {
            error,
            consecutive_failures,
            ..
        } => format!("{}: failed ({} in a row): {}", title, consecutive_failures, error),
        StatusEvent::FeedDegraded {
            consecutive_failures,
            ..
        } => format!("{}: degraded after {} failures", title, consecutive_failures),
    }
}

pub struct TimelineArgs<'a> {
    pub unread: bool,
    pub all: bool,
    pub queued: bool,
    pub feed: Option<&'a str>,
    pub group: Option<&'a str>,
    pub page: usize,
    pub limit: usize,
    pub json: bool,
}

pub fn timeline(ctx: &AppContext, args: TimelineArgs<'_>) -> Result<()> {
    let filter = TimelineFilter {
        unread_only: args.unread || (ctx.config.unread_only && !args.all),
        queued_only: args.queued,
        feed_id: args.feed.map(|f| resolve_feed(ctx, f)).transpose()?,
        group: args.group.map(str::to_string),
    };
    let total = ctx.timeline.len(&filter);
    let entries = ctx
        .timeline
        .view(filter, Page::numbered(args.page, args.limit));

    if args.json {
        println!("{}", to_json(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No items");
        return Ok(());
    }

    for entry in &entries {
        println!("{}", format_entry(entry));
    }

    let shown_to = args
        .page
        .saturating_mul(args.limit)
        .saturating_add(entries.len());
    if shown_to < total {
        println!(
            "-- {} of {} shown, next page: --page {}",
            shown_to,
            total,
            args.page.saturating_add(1)
        );
    }

    Ok(())
}

fn format_entry(entry: &TimelineEntry) -> String {
    let read_marker = if entry.read { " " } else { "●" };
    let queue_marker = if entry.queued { "»" } else { " " };
    let date = entry
        .published_at
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "          ".to_string());

    format!(
        "{}{} {} {}  [{}]\n     {}",
        read_marker, queue_marker, date, entry.title, entry.feed_title, entry.key
    )
}

pub fn mark(ctx: &AppContext, key: &str, read: bool) -> Result<()> {
    let key: ItemKey = key.parse()?;
    ctx.state.mark_read(&key, read)?;
    println!("Marked {} as {}", key, if read { "read" } else { "unread" });
    Ok(())
}

pub fn queue(ctx: &AppContext, key: &str, queued: bool) -> Result<()> {
    let key: ItemKey = key.parse()?;
    ctx.state.mark_queued(&key, queued)?;
    println!(
        "{} {}",
        if queued { "Queued" } else { "Unqueued" },
        key
    );
    Ok(())
}

pub fn mark_all_read(ctx: &AppContext, feed: Option<&str>) -> Result<()> {
    let feed_id = feed.map(|f| resolve_feed(ctx, f)).transpose()?;
    let count = ctx.state.mark_all_read(feed_id)?;
    println!("Marked {} items as read", count);
    Ok(())
}

pub fn open_item(ctx: &AppContext, key: &str, with: Option<&str>) -> Result<()> {
    let key: ItemKey = key.parse()?;
    let entry = ctx
        .timeline
        .get(&key)
        .ok_or_else(|| RssqError::ItemNotFound(key.to_string()))?;
    let link = entry
        .link
        .ok_or_else(|| RssqError::Other(format!("Item {} has no link", key)))?;

    match with {
        Some(app) => open::with(&link, app)?,
        None => open::that(&link)?,
    }

    ctx.state.mark_read(&key, true)?;
    println!("Opened {}", link);
    Ok(())
}

/// Import feeds from an OPML file
pub async fn import_opml(ctx: &AppContext, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)?;
    let outlines = parse_opml(&content);

    if outlines.is_empty() {
        println!("No feeds found in OPML file");
        return Ok(());
    }

    println!("Found {} feeds in OPML file", outlines.len());

    let known = ctx.registry.list().len();
    let mut errors = 0;

    for outline in outlines {
        match ctx.registry.add(&outline.url) {
            Ok(id) => {
                let feed = ctx.registry.get(id)?;
                if feed.title.is_none() && !outline.title.is_empty() {
                    ctx.registry.rename(id, Some(outline.title.clone()))?;
                }
                if feed.group.is_none() && outline.group.is_some() {
                    ctx.registry.set_group(id, outline.group.as_deref())?;
                }
                println!("  + {}", outline.title);
            }
            Err(e) => {
                eprintln!("  ! {} - {}", outline.title, e);
                errors += 1;
            }
        }
    }

    let added = ctx.registry.list().len() - known;
    println!(
        "\nImport complete: {} added, {} errors. Fetching...",
        added, errors
    );

    let report = ctx.scheduler.force_refresh(RefreshTarget::All).await?;
    print_report(ctx, &report);
    Ok(())
}

#[derive(Debug, PartialEq)]
struct OpmlFeed {
    title: String,
    url: String,
    /// Title of the nearest enclosing category outline.
    group: Option<String>,
}

/// Parse OPML content and extract feed URLs with titles and categories
fn parse_opml(content: &str) -> Vec<OpmlFeed> {
    const OPEN: &str = "<outline";
    const CLOSE: &str = "</outline";

    let mut feeds = Vec::new();
    // One entry per unclosed outline; categories carry their name.
    let mut open: Vec<Option<String>> = Vec::new();
    let mut rest = content;

    // Outline elements may span lines; scan for tags rather than lines.
    loop {
        let next_open = rest.find(OPEN);
        let next_close = rest.find(CLOSE);
        match (next_open, next_close) {
            (Some(start), close) if close.map_or(true, |close| start < close) => {
                let chunk = &rest[start + OPEN.len()..];
                let end = chunk.find('>').unwrap_or(chunk.len());
                let element = &chunk[..end];
                let self_closing = element.trim_end().ends_with('/');
                let title = extract_attr(element, "title").or_else(|| extract_attr(element, "text"));

                match extract_attr(element, "xmlUrl") {
                    Some(url) => {
                        feeds.push(OpmlFeed {
                            title: title.unwrap_or_else(|| url.clone()),
                            url,
                            group: open.iter().rev().flatten().next().cloned(),
                        });
                        if !self_closing {
                            open.push(None);
                        }
                    }
                    None if !self_closing => open.push(title),
                    None => {}
                }
                rest = &chunk[end..];
            }
            (_, Some(close)) => {
                open.pop();
                rest = &rest[close + CLOSE.len()..];
            }
            _ => break,
        }
    }

    feeds
}

/// Extract an attribute value from an XML element string
fn extract_attr(element: &str, attr: &str) -> Option<String> {
    for quote in ['"', '\''] {
        let pattern = format!(" {}={}", attr, quote);
        let normalized = element.replace(['\n', '\t', '\r'], " ");
        if let Some(found) = normalized.find(&pattern) {
            let rest = &normalized[found + pattern.len()..];
            let end = rest.find(quote)?;
            let value = &rest[..end];
            return Some(html_escape::decode_html_entities(value).to_string());
        }
    }
    None
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| RssqError::Other(e.to_string()))
}

fn to_json_line<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| RssqError::Other(e.to_string()))
}
