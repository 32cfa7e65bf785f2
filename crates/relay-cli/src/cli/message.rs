//! Message commands: publish, inbox, claim.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use relay_infra::RelayHandle;
use relay_types::envelope::{Budget, DEFAULT_MAX_HOPS, DEFAULT_TTL_MS};
use relay_types::message::MessageStatus;
use relay_types::publish::PublishOptions;

use super::short_hash;

/// Everything `relay publish` needs besides the relay itself.
pub struct PublishArgs {
    pub subject: String,
    pub from: String,
    pub payload: Option<String>,
    pub file: Option<PathBuf>,
    pub reply_to: Option<String>,
    pub max_hops: Option<u32>,
    pub ttl_ms: Option<u64>,
}

pub async fn publish(relay: &RelayHandle, args: PublishArgs, json: bool) -> Result<()> {
    let payload = match (args.payload, args.file) {
        (Some(text), _) => text.into_bytes(),
        (None, Some(path)) => tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("failed to read payload from stdin")?;
            buf
        }
    };

    let mut options = PublishOptions::from_sender(args.from);
    if args.max_hops.is_some() || args.ttl_ms.is_some() {
        options = options.with_budget(Budget::new(
            args.max_hops.unwrap_or(DEFAULT_MAX_HOPS),
            args.ttl_ms.unwrap_or(DEFAULT_TTL_MS),
        ));
    }
    if let Some(reply_to) = args.reply_to {
        options = options.with_reply_to(reply_to);
    }

    let result = relay.core().publish(&args.subject, payload, options).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!();
    match result.message_id {
        Some(id) => println!(
            "  {} Published {} to {} endpoint{}",
            style("✓").green().bold(),
            style(id).dim(),
            style(result.delivered_to).bold(),
            if result.delivered_to == 1 { "" } else { "s" }
        ),
        None => println!("  {} Not published", style("✗").red().bold()),
    }
    for rejection in &result.rejected {
        let target = rejection
            .endpoint_hash
            .as_deref()
            .map(short_hash)
            .unwrap_or("(all)");
        println!(
            "  {} {} {}{}",
            style("•").yellow(),
            style(target).dim(),
            style(rejection.reason).yellow(),
            rejection
                .detail
                .as_deref()
                .map(|d| format!(": {d}"))
                .unwrap_or_default()
        );
    }
    for (hash, pressure) in &result.mailbox_pressure {
        if *pressure > 0.0 {
            println!(
                "  {} {} mailbox at {:.0}%",
                style("i").blue(),
                style(short_hash(hash)).dim(),
                pressure * 100.0
            );
        }
    }
    println!();
    Ok(())
}

pub async fn inbox(
    relay: &RelayHandle,
    subject: &str,
    status: Option<MessageStatus>,
    limit: u32,
    json: bool,
) -> Result<()> {
    let rows = relay.core().read_inbox(subject, status, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!();
        println!("  {} Mailbox for {} is empty", style("i").blue().bold(), style(subject).cyan());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("ID").fg(Color::White),
        Cell::new("Subject").fg(Color::White),
        Cell::new("From").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Created").fg(Color::White),
    ]);

    for row in &rows {
        let status_cell = match row.status {
            MessageStatus::New => Cell::new("● new").fg(Color::Green),
            MessageStatus::Cur => Cell::new("○ cur").fg(Color::DarkGrey),
            MessageStatus::Failed => Cell::new("✗ failed").fg(Color::Red),
        };
        table.add_row(vec![
            Cell::new(row.id).fg(Color::Cyan),
            Cell::new(&row.subject),
            Cell::new(&row.sender),
            status_cell,
            Cell::new(row.created_at.format("%Y-%m-%d %H:%M:%S")).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} message{}",
        style(rows.len()).bold(),
        if rows.len() == 1 { "" } else { "s" }
    );
    println!();
    Ok(())
}

pub async fn claim(relay: &RelayHandle, endpoint: &str, id: uuid::Uuid, json: bool) -> Result<()> {
    let endpoint = relay.core().find_endpoint(endpoint)?;
    let envelope = relay.core().claim(&endpoint.hash, id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&envelope)?);
        return Ok(());
    }

    println!();
    println!("  {}  {}", style("ID:").bold(), style(envelope.id).dim());
    println!("  {}  {}", style("Subject:").bold(), style(&envelope.subject).cyan());
    println!("  {}  {}", style("From:").bold(), envelope.from);
    if let Some(reply_to) = &envelope.reply_to {
        println!("  {}  {}", style("Reply to:").bold(), reply_to);
    }
    println!(
        "  {}  {} / {} hops",
        style("Budget:").bold(),
        envelope.budget.hop_count,
        envelope.budget.max_hops
    );
    println!();
    match envelope.payload_str() {
        Some(text) => println!("{text}"),
        None => println!(
            "  {}",
            style(format!("({} bytes of binary payload)", envelope.payload.len())).dim()
        ),
    }
    println!();
    Ok(())
}
