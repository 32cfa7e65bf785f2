//! CLI command definitions for the `relay` binary.
//!
//! Every command opens the relay in the data directory, does one thing, and
//! exits. `--json` switches any command to machine-readable output.

pub mod dead_letter;
pub mod endpoint;
pub mod message;
pub mod rules;
pub mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use relay_types::access::AccessEffect;
use relay_types::message::MessageStatus;

/// Inspect and drive a local message relay.
#[derive(Parser)]
#[command(name = "relay", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Relay data directory (defaults to ~/.relay).
    #[arg(long, global = true, env = "RELAY_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Log verbosity (-v info, -vv debug, -vvv trace). `RUST_LOG` overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Publish a message to every endpoint matching a subject.
    Publish {
        /// Concrete subject, e.g. `relay.agent.alpha`.
        subject: String,

        /// Sender subject.
        #[arg(long)]
        from: String,

        /// Payload text. Reads stdin when neither this nor --file is given.
        #[arg(long, conflicts_with = "file")]
        payload: Option<String>,

        /// Read the payload from a file.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Subject replies should go to.
        #[arg(long)]
        reply_to: Option<String>,

        /// Maximum forwarding hops.
        #[arg(long)]
        max_hops: Option<u32>,

        /// Time to live in milliseconds.
        #[arg(long)]
        ttl_ms: Option<u64>,
    },

    /// List registered endpoints.
    #[command(alias = "ls")]
    Endpoints,

    /// Register an endpoint (subject may contain `*` and `>`).
    Register { subject: String },

    /// Unregister an endpoint and delete its mailbox.
    Unregister { subject: String },

    /// List messages in an endpoint's mailbox, newest first.
    Inbox {
        /// Endpoint subject.
        subject: String,

        #[arg(long, value_enum)]
        status: Option<StatusArg>,

        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Consume a message (new -> cur) and print it.
    Claim {
        /// Endpoint subject or hash.
        endpoint: String,

        /// Message ID.
        id: uuid::Uuid,
    },

    /// Show or purge the dead letter queue.
    #[command(name = "dead-letters", alias = "dlq")]
    DeadLetters {
        /// Only entries for this endpoint (subject or hash).
        #[arg(long)]
        endpoint: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: u32,

        /// Delete entries older than this many days instead of listing.
        #[arg(long)]
        purge_older_than_days: Option<u32>,
    },

    /// Manage access rules.
    Rules {
        #[command(subcommand)]
        action: RulesCommand,
    },

    /// Show index counts and the active reliability config.
    Status,

    /// Rebuild the index from the mailboxes.
    Reindex,
}

#[derive(Subcommand)]
pub enum RulesCommand {
    /// List rules in evaluation order.
    List,

    /// Add a rule.
    Add {
        #[arg(long)]
        priority: i32,

        /// Subject pattern the rule applies to.
        #[arg(long)]
        subject: String,

        /// Sender pattern the rule applies to.
        #[arg(long, default_value = ">")]
        sender: String,

        #[arg(long, value_enum)]
        effect: EffectArg,
    },

    /// Remove rules by priority and subject pattern.
    Remove {
        #[arg(long)]
        priority: i32,

        #[arg(long)]
        subject: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum StatusArg {
    New,
    Cur,
    Failed,
}

impl From<StatusArg> for MessageStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::New => MessageStatus::New,
            StatusArg::Cur => MessageStatus::Cur,
            StatusArg::Failed => MessageStatus::Failed,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum EffectArg {
    Allow,
    Deny,
}

impl From<EffectArg> for AccessEffect {
    fn from(arg: EffectArg) -> Self {
        match arg {
            EffectArg::Allow => AccessEffect::Allow,
            EffectArg::Deny => AccessEffect::Deny,
        }
    }
}

/// Shorten a 32-char endpoint hash for tables.
pub fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_publish_with_globals() {
        let cli = Cli::try_parse_from([
            "relay",
            "--json",
            "-vv",
            "publish",
            "relay.agent.a",
            "--from",
            "relay.agent.b",
            "--payload",
            "hi",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Publish { subject, from, payload, .. } => {
                assert_eq!(subject, "relay.agent.a");
                assert_eq!(from, "relay.agent.b");
                assert_eq!(payload.as_deref(), Some("hi"));
            }
            _ => panic!("expected publish"),
        }
    }

    #[test]
    fn payload_and_file_conflict() {
        let parsed = Cli::try_parse_from([
            "relay", "publish", "a.b", "--from", "c", "--payload", "x", "--file", "f",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn short_hash_truncates() {
        assert_eq!(short_hash("0123456789abcdef0123456789abcdef"), "0123456789ab");
        assert_eq!(short_hash("abc"), "abc");
    }
}
