use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tanuki_provider::ProviderId;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "tanuki",
    about = "GitLab webhook orchestration for assistant CLIs",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long,
        env = "TANUKI_CONFIG",
        value_name = "PATH",
        help = "Processor config (TOML). Defaults apply when omitted"
    )]
    pub(crate) config: Option<PathBuf>,

    #[arg(
        long,
        env = "TANUKI_SESSION_STORE",
        value_name = "PATH",
        help = "Override session_store_path from the config"
    )]
    pub(crate) session_store: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub(crate) enum CliCommand {
    /// Inspect and maintain the persisted session store.
    Sessions {
        #[command(subcommand)]
        command: SessionsCommand,
    },
    /// Offline helpers for assistant review output.
    Review {
        #[command(subcommand)]
        command: ReviewCommand,
    },
    /// Probe every configured assistant CLI.
    Doctor,
    /// Run one webhook payload through the processor without touching GitLab.
    Replay(ReplayArgs),
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub(crate) enum SessionsCommand {
    Stats,
    List,
    Show {
        key: String,
    },
    /// Drop provider conversations idle longer than the limit.
    Clean {
        #[arg(long, value_parser = parse_positive_u64)]
        max_idle_secs: Option<u64>,
    },
    Remove {
        key: String,
        /// Only forget this provider's conversation.
        #[arg(long)]
        provider: Option<ProviderId>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub(crate) enum ReviewCommand {
    /// Print the review comments found in an assistant reply as JSON.
    Parse { file: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub(crate) struct ReplayArgs {
    /// Webhook payload as delivered by GitLab.
    pub(crate) event: PathBuf,

    /// Existing checkout the assistant runs in.
    #[arg(long, value_name = "DIR")]
    pub(crate) workdir: PathBuf,

    /// JSON array of merge request diffs served to code reviews.
    #[arg(long, value_name = "PATH")]
    pub(crate) diffs: Option<PathBuf>,

    /// Tenant owning the event, when sessions are namespaced per owner.
    #[arg(long)]
    pub(crate) owner: Option<String>,
}
