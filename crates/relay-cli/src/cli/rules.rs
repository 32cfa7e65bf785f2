//! Access rule management.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use relay_infra::RelayHandle;
use relay_types::access::{AccessEffect, AccessRule};

pub fn list(relay: &RelayHandle, json: bool) -> Result<()> {
    let rules = relay.access().list_rules();

    if json {
        println!("{}", serde_json::to_string_pretty(&rules)?);
        return Ok(());
    }

    if rules.is_empty() {
        println!();
        println!("  {} No access rules; every sender may publish anywhere", style("i").blue().bold());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Priority").fg(Color::White),
        Cell::new("Subject").fg(Color::White),
        Cell::new("Sender").fg(Color::White),
        Cell::new("Effect").fg(Color::White),
    ]);
    for rule in &rules {
        let effect = match rule.effect {
            AccessEffect::Allow => Cell::new("allow").fg(Color::Green),
            AccessEffect::Deny => Cell::new("deny").fg(Color::Red),
        };
        table.add_row(vec![
            Cell::new(rule.priority),
            Cell::new(&rule.subject_pattern).fg(Color::Cyan),
            Cell::new(&rule.sender_scope),
            effect,
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

pub fn add(relay: &RelayHandle, rule: AccessRule, json: bool) -> Result<()> {
    relay.access().add_rule(rule.clone())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rule)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Rule added: {} {} from {}",
        style("✓").green().bold(),
        rule_effect(rule.effect),
        style(&rule.subject_pattern).cyan(),
        rule.sender_scope
    );
    println!();
    Ok(())
}

pub fn remove(relay: &RelayHandle, priority: i32, subject: &str, json: bool) -> Result<()> {
    let removed = relay.access().remove_rule(priority, subject)?;

    if json {
        println!("{}", serde_json::json!({ "removed": removed }));
        return Ok(());
    }

    println!();
    println!(
        "  {} Removed {} rule{}",
        style("✓").green().bold(),
        style(removed).bold(),
        if removed == 1 { "" } else { "s" }
    );
    println!();
    Ok(())
}

fn rule_effect(effect: AccessEffect) -> console::StyledObject<&'static str> {
    match effect {
        AccessEffect::Allow => style("allow").green(),
        AccessEffect::Deny => style("deny").red(),
    }
}
