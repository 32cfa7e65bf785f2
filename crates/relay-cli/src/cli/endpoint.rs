//! Endpoint commands: list, register, unregister.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use relay_core::repository::MessageIndex;
use relay_infra::RelayHandle;
use relay_types::message::MessageStatus;

pub async fn list(relay: &RelayHandle, json: bool) -> Result<()> {
    let endpoints = relay.core().list_endpoints();

    if json {
        println!("{}", serde_json::to_string_pretty(&endpoints)?);
        return Ok(());
    }

    if endpoints.is_empty() {
        println!();
        println!(
            "  {} No endpoints registered. Add one with: {}",
            style("i").blue().bold(),
            style("relay register <subject>").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Subject").fg(Color::White),
        Cell::new("Hash").fg(Color::White),
        Cell::new("New").fg(Color::White),
        Cell::new("Registered").fg(Color::White),
    ]);

    for endpoint in &endpoints {
        let pending = relay
            .core()
            .index()
            .count_new_by_endpoint(&endpoint.hash)
            .await?;
        table.add_row(vec![
            Cell::new(&endpoint.subject).fg(Color::Cyan),
            Cell::new(&endpoint.hash).fg(Color::DarkGrey),
            Cell::new(pending),
            Cell::new(endpoint.registered_at.format("%Y-%m-%d %H:%M")).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

pub async fn register(relay: &RelayHandle, subject: &str, json: bool) -> Result<()> {
    let endpoint = relay.core().register_endpoint(subject).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&endpoint)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Endpoint {} registered",
        style("✓").green().bold(),
        style(&endpoint.subject).cyan()
    );
    println!("  {}  {}", style("Hash:").bold(), style(&endpoint.hash).dim());
    println!();
    Ok(())
}

pub async fn unregister(relay: &RelayHandle, subject: &str, json: bool) -> Result<()> {
    let pending = match relay.core().endpoint(subject) {
        Ok(endpoint) => relay
            .core()
            .index()
            .list_by_endpoint(&endpoint.hash, Some(MessageStatus::New), u32::MAX)
            .await?
            .len(),
        Err(_) => 0,
    };
    let removed = relay.core().unregister_endpoint(subject).await?;

    if json {
        let out = serde_json::json!({ "subject": subject, "removed": removed, "discarded": pending });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    if removed {
        println!(
            "  {} Endpoint {} unregistered",
            style("✓").green().bold(),
            style(subject).cyan()
        );
        if pending > 0 {
            println!(
                "  {} {} unread message{} discarded",
                style("!").yellow().bold(),
                pending,
                if pending == 1 { "" } else { "s" }
            );
        }
    } else {
        println!("  {} No endpoint named {}", style("i").blue().bold(), style(subject).cyan());
    }
    println!();
    Ok(())
}
