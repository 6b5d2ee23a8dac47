pub mod archive;
pub mod backup;
pub mod cli;
pub mod client;
pub mod commands;
pub mod conversations;
pub mod error;
pub mod history;
pub mod settings;
pub mod threads;
pub mod tokens;
pub mod users;

pub use cli::{Cli, Commands};
pub use error::{BackupError, Result};

pub fn load_token() -> Result<String> {
    std::env::var("SLACK_USER_TOKEN").map_err(|_| BackupError::MissingToken)
}
