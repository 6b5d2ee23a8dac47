use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backup::{self, BackupOptions};
use crate::client::ApiClient;
use crate::conversations::parse_types;
use crate::error::Result;
use crate::load_token;
use crate::settings::Settings;
use crate::tokens::{self, InjectOptions};
use crate::users::UserDirectory;

pub async fn run_backup(
    out: &str,
    types: Option<String>,
    conversation_id: Option<String>,
    oldest: Option<f64>,
    latest: Option<f64>,
    concurrency: Option<usize>,
) -> Result<()> {
    let token = load_token()?;
    let settings = Settings::load().unwrap_or_default();

    let types = match types {
        Some(list) => parse_types(&list)?,
        None => parse_types(&settings.backup.types.join(","))?,
    };
    let concurrency = concurrency.unwrap_or(settings.backup.concurrency);

    println!("Backing up conversations to {}...", out);

    let client = Arc::new(ApiClient::new(&token));
    let users = Arc::new(UserDirectory::new());
    let summary = backup::run(
        client,
        users,
        BackupOptions {
            out_dir: PathBuf::from(out),
            types,
            conversation_id,
            oldest,
            latest,
            concurrency,
        },
    )
    .await?;

    println!(
        "Backup completed! {} conversations archived, {} failed.",
        summary.processed,
        summary.failures.len()
    );
    for failure in &summary.failures {
        println!("  {}: {}", failure.label, failure.error);
    }
    Ok(())
}

pub fn run_add_file_tokens(
    path: &str,
    token: Option<String>,
    dry_run: bool,
    recursive: bool,
) -> Result<()> {
    let token = match token {
        Some(token) => token,
        None => load_token()?,
    };
    // Tokens pasted from HTTP tooling sometimes keep the scheme prefix.
    let token = token.strip_prefix("Bearer ").unwrap_or(&token).to_string();

    let stats = tokens::inject_tokens(
        Path::new(path),
        &InjectOptions {
            token,
            dry_run,
            recursive,
        },
    )?;

    let verb = if dry_run { "Would modify" } else { "Modified" };
    println!(
        "{} {} of {} files ({} messages).",
        verb, stats.files_modified, stats.files_scanned, stats.messages_modified
    );
    if stats.files_failed > 0 {
        println!("  {} unreadable files were skipped.", stats.files_failed);
    }
    Ok(())
}
