use std::fs;
use std::path::Path;

use log::{debug, info, warn};
use serde_json::Value;
use url::Url;
use walkdir::WalkDir;

use crate::archive::write_json_atomic;
use crate::error::{BackupError, Result};

/// Hosts whose attachment links accept a `token` query parameter.
const FILE_HOST: &str = "files.slack.com";

pub struct InjectOptions {
    pub token: String,
    pub dry_run: bool,
    pub recursive: bool,
}

#[derive(Debug, Default, PartialEq)]
pub struct InjectStats {
    pub files_scanned: usize,
    pub files_modified: usize,
    pub messages_modified: usize,
    /// Files that could not be read or parsed and were skipped.
    pub files_failed: usize,
}

/// Rewrites attachment URLs in archived message files so they carry the
/// access token and work when pasted into a browser. `path` may be a single
/// `.json` file or a directory of them. Already-injected URLs and URLs on
/// other hosts are left alone, so the operation is idempotent.
pub fn inject_tokens(path: &Path, options: &InjectOptions) -> Result<InjectStats> {
    let mut stats = InjectStats::default();

    if path.is_file() {
        process_file(path, options, &mut stats)?;
        return Ok(stats);
    }

    let max_depth = if options.recursive { usize::MAX } else { 1 };
    for entry in WalkDir::new(path).max_depth(max_depth) {
        let entry = entry.map_err(|e| BackupError::ReadFile {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        process_file(entry.path(), options, &mut stats)?;
    }

    Ok(stats)
}

fn process_file(path: &Path, options: &InjectOptions, stats: &mut InjectStats) -> Result<()> {
    stats.files_scanned += 1;

    // One unreadable file must not block token repair of the rest of the
    // archive.
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("{}: skipped, unreadable: {e}", path.display());
            stats.files_failed += 1;
            return Ok(());
        }
    };
    let mut value: Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(e) => {
            warn!("{}: skipped, not valid JSON: {e}", path.display());
            stats.files_failed += 1;
            return Ok(());
        }
    };

    // Listing and index files are objects or arrays of metadata; only
    // message partitions (arrays of message objects with `files`) qualify.
    let Some(messages) = value.as_array_mut() else {
        debug!("{}: not a message array, skipped", path.display());
        return Ok(());
    };

    let mut changed = 0usize;
    for message in messages.iter_mut() {
        if inject_into_message(message, &options.token) {
            changed += 1;
        }
    }

    if changed == 0 {
        return Ok(());
    }

    stats.files_modified += 1;
    stats.messages_modified += changed;

    if options.dry_run {
        info!(
            "would update {} ({changed} messages)",
            path.display()
        );
        return Ok(());
    }

    write_json_atomic(path, &value)?;
    info!("updated {} ({changed} messages)", path.display());
    Ok(())
}

fn inject_into_message(message: &mut Value, token: &str) -> bool {
    let Some(files) = message.get_mut("files").and_then(Value::as_array_mut) else {
        return false;
    };

    let mut changed = false;
    for file in files.iter_mut() {
        let Some(entry) = file.as_object_mut() else {
            continue;
        };
        for (key, value) in entry.iter_mut() {
            if key != "url_private"
                && key != "url_private_download"
                && !key.starts_with("thumb_")
            {
                continue;
            }
            if let Some(current) = value.as_str()
                && let Some(updated) = add_token_to_url(current, token)
            {
                *value = Value::String(updated);
                changed = true;
            }
        }
    }
    changed
}

/// Returns the URL with the token appended, or `None` when the URL should
/// not be touched.
fn add_token_to_url(raw: &str, token: &str) -> Option<String> {
    let mut url = Url::parse(raw).ok()?;
    if !url.host_str()?.ends_with(FILE_HOST) {
        return None;
    }
    if url.query_pairs().any(|(k, _)| k == "token") {
        return None;
    }
    url.query_pairs_mut().append_pair("token", token);
    Some(url.into())
}
