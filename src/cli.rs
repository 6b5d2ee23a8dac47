use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "slack-backup")]
#[command(about = "Back up Slack conversation history to a local JSON archive")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Archive conversation history into a directory of per-day JSON files
    Backup {
        /// Archive directory
        #[arg(short, long, default_value = "slack-backup")]
        out: String,

        /// Comma-separated conversation types to back up
        /// (public_channel, private_channel, im, mpim); defaults to settings.toml
        #[arg(short, long)]
        types: Option<String>,

        /// Back up only this conversation id, skipping the directory listing
        #[arg(short, long)]
        conversation_id: Option<String>,

        /// Only messages at or after this epoch timestamp
        #[arg(long)]
        oldest: Option<f64>,

        /// Only messages at or before this epoch timestamp
        #[arg(long)]
        latest: Option<f64>,

        /// Number of conversations archived in parallel
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Append the access token to attachment URLs in archived message files
    AddFileTokens {
        /// Archive file or directory to rewrite
        path: String,

        /// Token to inject; defaults to SLACK_USER_TOKEN
        #[arg(short, long)]
        token: Option<String>,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,

        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,
    },
}
