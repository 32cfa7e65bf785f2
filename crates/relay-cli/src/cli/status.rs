//! Relay status dashboard and reindex.

use anyhow::Result;
use console::style;
use relay_infra::RelayHandle;

/// Display index counts, dead letters, endpoint count and active config.
pub async fn status(relay: &RelayHandle, json: bool) -> Result<()> {
    let metrics = relay.core().metrics().await?;
    let dead_letters = relay.core().count_dead_letters().await?;
    let endpoints = relay.core().list_endpoints().len();
    let config = relay.core().reliability();
    let recovery = relay.recovery();

    if json {
        let status = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": relay.data_dir().display().to_string(),
            "endpoints": endpoints,
            "messages": metrics,
            "dead_letters": dead_letters,
            "reliability": &*config,
            "recovery": recovery,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!("  {} Relay v{}", style("⚡").bold(), env!("CARGO_PKG_VERSION"));
    println!();

    println!("  {}", style("── Messages ──").dim());
    println!("  Endpoints: {}", style(endpoints).bold());
    println!("  New:       {}", style(metrics.new).green());
    println!("  Consumed:  {}", metrics.cur);
    if metrics.failed > 0 {
        println!("  Failed:    {}", style(metrics.failed).red());
    }
    if dead_letters > 0 {
        println!("  Dead:      {}", style(dead_letters).yellow());
    }
    println!();

    println!("  {}", style("── Reliability ──").dim());
    let on_off = |enabled: bool| {
        if enabled {
            style("on").green()
        } else {
            style("off").dim()
        }
    };
    println!(
        "  Rate limit:      {} ({} per {}s)",
        on_off(config.rate_limit.enabled),
        config.rate_limit.max_per_window,
        config.rate_limit.window_secs
    );
    println!(
        "  Circuit breaker: {} (opens after {}, cooldown {}ms)",
        on_off(config.circuit_breaker.enabled),
        config.circuit_breaker.failure_threshold,
        config.circuit_breaker.cooldown_ms
    );
    println!(
        "  Backpressure:    {} (max {}, warn at {:.0}%)",
        on_off(config.backpressure.enabled),
        config.backpressure.max_mailbox_size,
        config.backpressure.pressure_warning_at * 100.0
    );
    println!();

    if recovery.changed() || recovery.tmp_cleaned > 0 || recovery.unreadable > 0 {
        println!("  {}", style("── Recovery on open ──").dim());
        print_report(&recovery);
        println!();
    }

    println!("  {}", style("── System ──").dim());
    println!("  Data dir: {}", style(relay.data_dir().display()).dim());
    println!("  Index:    {}", style("SQLite (WAL mode)").dim());
    println!();
    Ok(())
}

/// Reconcile the index with the mailboxes and report what changed.
pub async fn reindex(relay: &RelayHandle, json: bool) -> Result<()> {
    // Opening the relay already reconciled; report that pass plus a fresh one.
    let mut report = relay.reindex().await?;
    let opened = relay.recovery();
    report.inserted += opened.inserted;
    report.removed += opened.removed;
    report.corrected += opened.corrected;
    report.tmp_cleaned += opened.tmp_cleaned;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    if report.changed() || report.tmp_cleaned > 0 {
        println!("  {} Index rebuilt", style("✓").green().bold());
        print_report(&report);
    } else {
        println!("  {} Index already matches the mailboxes", style("✓").green().bold());
    }
    if report.unreadable > 0 {
        println!(
            "  {} {} unreadable message file{} left unindexed",
            style("!").yellow().bold(),
            report.unreadable,
            if report.unreadable == 1 { "" } else { "s" }
        );
    }
    println!();
    Ok(())
}

fn print_report(report: &relay_infra::reconcile::ReconcileReport) {
    println!("  Rows inserted:   {}", report.inserted);
    println!("  Rows removed:    {}", report.removed);
    println!("  Rows corrected:  {}", report.corrected);
    println!("  Tmp files swept: {}", report.tmp_cleaned);
}
