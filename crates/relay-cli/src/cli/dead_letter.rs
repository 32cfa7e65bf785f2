//! Dead letter queue inspection.

use anyhow::Result;
use chrono::{Duration, Utc};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use relay_infra::RelayHandle;

use super::short_hash;

pub async fn list(relay: &RelayHandle, endpoint: Option<&str>, limit: u32, json: bool) -> Result<()> {
    let hash = match endpoint {
        Some(key) => Some(relay.core().find_endpoint(key)?.hash),
        None => None,
    };
    let entries = relay.core().list_dead_letters(hash.as_deref(), limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!();
        println!("  {} Dead letter queue is empty", style("✓").green().bold());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Message").fg(Color::White),
        Cell::new("Endpoint").fg(Color::White),
        Cell::new("Subject").fg(Color::White),
        Cell::new("Reason").fg(Color::White),
        Cell::new("Rejected").fg(Color::White),
    ]);

    for entry in &entries {
        table.add_row(vec![
            Cell::new(entry.original_envelope.id).fg(Color::Cyan),
            Cell::new(short_hash(&entry.endpoint_hash)).fg(Color::DarkGrey),
            Cell::new(&entry.original_envelope.subject),
            Cell::new(&entry.reason).fg(Color::Red),
            Cell::new(entry.rejected_at.format("%Y-%m-%d %H:%M:%S")).fg(Color::DarkGrey),
        ]);
    }

    let total = relay.core().count_dead_letters().await?;
    println!();
    println!("{table}");
    println!();
    println!("  showing {} of {}", style(entries.len()).bold(), total);
    println!();
    Ok(())
}

pub async fn purge(relay: &RelayHandle, older_than_days: u32, json: bool) -> Result<()> {
    let cutoff = Utc::now() - Duration::days(i64::from(older_than_days));
    let removed = relay.core().purge_dead_letters(cutoff).await?;

    if json {
        let out = serde_json::json!({ "removed": removed, "before": cutoff });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Removed {} dead letter{} older than {} day{}",
        style("✓").green().bold(),
        style(removed).bold(),
        if removed == 1 { "" } else { "s" },
        older_than_days,
        if older_than_days == 1 { "" } else { "s" }
    );
    println!();
    Ok(())
}
