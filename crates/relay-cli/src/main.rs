//! Relay operator CLI entry point.
//!
//! Binary name: `relay`
//!
//! Parses arguments, sets up tracing, opens the relay in the data directory
//! (running crash recovery), then dispatches to one command handler.

mod cli;

use clap::Parser;
use relay_infra::{RelayBuilder, default_data_dir};
use relay_observe::{TracingOptions, init_tracing, shutdown_tracing};
use relay_types::access::AccessRule;

use cli::message::PublishArgs;
use cli::{Cli, Commands, RulesCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut tracing_options = TracingOptions::from_verbosity(cli.verbose);
    tracing_options.json = cli.json;
    if let Err(e) = init_tracing(&tracing_options) {
        eprintln!("warning: tracing setup failed: {e}");
    }

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    let relay = RelayBuilder::new(&data_dir).open().await?;
    let json = cli.json;

    match cli.command {
        Commands::Publish {
            subject,
            from,
            payload,
            file,
            reply_to,
            max_hops,
            ttl_ms,
        } => {
            let args = PublishArgs {
                subject,
                from,
                payload,
                file,
                reply_to,
                max_hops,
                ttl_ms,
            };
            cli::message::publish(&relay, args, json).await?;
        }

        Commands::Endpoints => cli::endpoint::list(&relay, json).await?,

        Commands::Register { subject } => cli::endpoint::register(&relay, &subject, json).await?,

        Commands::Unregister { subject } => {
            cli::endpoint::unregister(&relay, &subject, json).await?;
        }

        Commands::Inbox {
            subject,
            status,
            limit,
        } => {
            cli::message::inbox(&relay, &subject, status.map(Into::into), limit, json).await?;
        }

        Commands::Claim { endpoint, id } => cli::message::claim(&relay, &endpoint, id, json).await?,

        Commands::DeadLetters {
            endpoint,
            limit,
            purge_older_than_days,
        } => match purge_older_than_days {
            Some(days) => cli::dead_letter::purge(&relay, days, json).await?,
            None => cli::dead_letter::list(&relay, endpoint.as_deref(), limit, json).await?,
        },

        Commands::Rules { action } => match action {
            RulesCommand::List => cli::rules::list(&relay, json)?,
            RulesCommand::Add {
                priority,
                subject,
                sender,
                effect,
            } => {
                let rule = AccessRule {
                    priority,
                    subject_pattern: subject,
                    sender_scope: sender,
                    effect: effect.into(),
                };
                cli::rules::add(&relay, rule, json)?;
            }
            RulesCommand::Remove { priority, subject } => {
                cli::rules::remove(&relay, priority, &subject, json)?;
            }
        },

        Commands::Status => cli::status::status(&relay, json).await?,

        Commands::Reindex => cli::status::reindex(&relay, json).await?,
    }

    Ok(())
}
