use anyhow::Context;
use archive_query::{Archive, ArchiveConfig, GroupField};
use std::env;
use std::path::PathBuf;
use tracing::Level;

const TOP_GROUPS: usize = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        eprintln!("Usage: inspect_archive [--debug] [--group <field>] [archive.db]");
        eprintln!("Prints message counts and the largest groups for the field (default: sender).");
        return Ok(());
    }

    let debug_logging = args.iter().any(|arg| arg == "--debug");
    tracing_subscriber::fmt()
        .with_max_level(if debug_logging { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .init();

    let mut group_field = GroupField::Sender;
    let mut explicit: Option<PathBuf> = None;
    let mut rest = args.iter().filter(|arg| arg.as_str() != "--debug");
    while let Some(arg) = rest.next() {
        if arg == "--group" {
            let name = rest.next().context("--group needs a field name")?;
            group_field = name.parse()?;
        } else {
            explicit = Some(PathBuf::from(arg));
        }
    }

    let config = ArchiveConfig::discover()?;
    let archive = Archive::open_with(&config, explicit.as_deref()).await?;
    println!("{archive}");

    let messages = archive.messages();
    let total = messages.count().await?;
    let deleted = messages
        .filter([archive_query::Filter::IsDeleted(Some(true))])?
        .count()
        .await?;
    println!("Messages: {total} ({deleted} soft-deleted)");

    for account in archive.accounts().await? {
        println!(
            "Account {}: {} ({})",
            account.id,
            account.identifier,
            account.display_name.as_deref().unwrap_or("-")
        );
    }

    println!("Top groups by {group_field}:");
    let groups = messages.group_by(group_field).groups().await?;
    for group in groups.iter().take(TOP_GROUPS) {
        let key = if group.key.is_empty() { "(none)" } else { group.key.as_str() };
        println!("  {:<40} {:>6} {:>12} bytes", key, group.count, group.total_size);
    }
    if groups.len() > TOP_GROUPS {
        println!("  ... {} more", groups.len() - TOP_GROUPS);
    }

    if let Some(entry) = archive.change_log().last().await? {
        println!(
            "Last change: #{} {} on {} messages at {}",
            entry.id,
            entry.operation,
            entry.message_count(),
            entry.created_at
        );
    }

    archive.close().await;
    Ok(())
}
