use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use log::warn;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::conversations::{Conversation, ConversationMeta, ConversationType};
use crate::error::{BackupError, Result};
use crate::history::Message;

/// Longest directory name we will derive from a channel label, in bytes.
const MAX_LABEL_BYTES: usize = 200;

const INDEX_FILE: &str = "index.json";

/// Directory name for a conversation. Channels use their sanitized display
/// name; DMs and group DMs have no stable display name, so their raw id is
/// used instead.
pub fn conversation_label(conversation: &Conversation) -> String {
    if conversation.conversation_type().is_direct() {
        return conversation.id.clone();
    }
    let name = conversation.name.as_deref().unwrap_or(&conversation.id);
    sanitize_label(name)
}

/// Reduces a channel name to something safe as a directory name on every
/// filesystem we care about: path separators, shell metacharacters and
/// control bytes become underscores, runs collapse, and the result is
/// trimmed and capped.
pub fn sanitize_label(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_underscore = false;
    for c in name.chars() {
        let mapped = if matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
            || c.is_control()
        {
            '_'
        } else {
            c
        };
        if mapped == '_' {
            if last_was_underscore {
                continue;
            }
            last_was_underscore = true;
        } else {
            last_was_underscore = false;
        }
        out.push(mapped);
    }

    let trimmed = out.trim_matches(|c| c == ' ' || c == '_');
    let mut label = trimmed.to_string();
    while label.len() > MAX_LABEL_BYTES {
        label.pop();
    }
    if label.is_empty() {
        label = "unnamed_channel".to_string();
    }
    label
}

/// Groups messages by their UTC calendar date. Messages whose `ts` does not
/// parse cannot be filed under a date and are skipped with a warning.
pub fn partition_by_date(messages: Vec<Message>) -> BTreeMap<NaiveDate, Vec<Message>> {
    let mut partitions: BTreeMap<NaiveDate, Vec<Message>> = BTreeMap::new();
    for message in messages {
        match message.utc_date() {
            Some(date) => partitions.entry(date).or_default().push(message),
            None => warn!("skipping message with unparseable ts {:?}", message.ts),
        }
    }
    partitions
}

/// Union-merge of an existing partition with freshly fetched messages, keyed
/// by `ts`. On collision the fetched copy wins only when it actually
/// differs, so a re-run over unchanged history rewrites nothing.
pub fn merge_messages(existing: Vec<Message>, fetched: Vec<Message>) -> Vec<Message> {
    let mut merged: BTreeMap<(i64, u64), Message> = existing
        .into_iter()
        .map(|m| (m.ts_key(), m))
        .collect();
    for message in fetched {
        let key = message.ts_key();
        match merged.get(&key) {
            Some(current) if *current == message => {}
            _ => {
                merged.insert(key, message);
            }
        }
    }
    merged.into_values().collect()
}

/// Writes a conversation's messages into per-day `YYYY-MM-DD.json` files
/// under `dir`, merging with whatever a previous run left there.
pub fn write_partitions(dir: &Path, messages: Vec<Message>) -> Result<()> {
    fs::create_dir_all(dir)?;
    for (date, fetched) in partition_by_date(messages) {
        let path = dir.join(format!("{}.json", date.format("%Y-%m-%d")));
        let existing = if path.exists() {
            read_messages(&path)?
        } else {
            Vec::new()
        };
        let merged = merge_messages(existing, fetched);
        write_json_atomic(&path, &merged)?;
    }
    Ok(())
}

pub fn read_messages(path: &Path) -> Result<Vec<Message>> {
    let file = File::open(path).map_err(|e| BackupError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| BackupError::JsonParse {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Writes serialized JSON to a temp file in the target's directory and
/// renames it into place, so readers never observe a half-written file.
pub fn write_json_atomic<V: Serialize>(path: &Path, value: &V) -> Result<()> {
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let temp = NamedTempFile::new_in(&parent).map_err(|e| BackupError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    {
        let mut writer = BufWriter::new(temp.as_file());
        serde_json::to_writer_pretty(&mut writer, value)
            .map_err(|e| BackupError::JsonSerialize(e.to_string()))?;
        writer.flush().map_err(|e| BackupError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    temp.persist(path).map_err(|e| BackupError::WriteFile {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// Writes the per-type listing file (`channels.json`, `dms.json`, ...),
/// replacing any previous run's copy. Entries are sorted by id so the
/// output is stable across runs.
pub fn write_listing(
    out_dir: &Path,
    conversation_type: ConversationType,
    mut metas: Vec<ConversationMeta>,
) -> Result<PathBuf> {
    metas.sort_by(|a, b| a.id.cmp(&b.id));
    let path = out_dir.join(conversation_type.listing_file());
    write_json_atomic(&path, &metas)?;
    Ok(path)
}

#[derive(Debug, Serialize)]
pub struct ArchiveIndex {
    pub generated_at: String,
    pub conversations: BTreeMap<String, usize>,
}

/// Writes `index.json`, a small manifest of what the run produced.
pub fn write_index(out_dir: &Path, counts: BTreeMap<String, usize>) -> Result<()> {
    let index = ArchiveIndex {
        generated_at: chrono::Utc::now().to_rfc3339(),
        conversations: counts,
    };
    write_json_atomic(&out_dir.join(INDEX_FILE), &index)
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use tempfile::tempdir;

    use super::*;

    fn msg(ts: &str, text: &str) -> Message {
        serde_json::from_value(json!({
            "type": "message", "user": "U01", "text": text, "ts": ts
        }))
        .unwrap()
    }

    #[test]
    fn test_sanitize_label() {
        assert_eq!(sanitize_label("general"), "general");
        assert_eq!(sanitize_label("a/b\\c:d"), "a_b_c_d");
        assert_eq!(sanitize_label("what?!*"), "what_!");
        assert_eq!(sanitize_label("__weird__"), "weird");
        assert_eq!(sanitize_label("///"), "unnamed_channel");
        assert_eq!(sanitize_label(""), "unnamed_channel");

        let long = "x".repeat(300);
        assert_eq!(sanitize_label(&long).len(), MAX_LABEL_BYTES);
    }

    #[test]
    fn test_conversation_label_uses_id_for_direct_messages() {
        let dm: Conversation = serde_json::from_value(json!({
            "id": "D0XYZ", "created": 1, "is_im": true, "user": "U01"
        }))
        .unwrap();
        assert_eq!(conversation_label(&dm), "D0XYZ");

        let channel: Conversation = serde_json::from_value(json!({
            "id": "C01", "created": 1, "name": "dev/ops"
        }))
        .unwrap();
        assert_eq!(conversation_label(&channel), "dev_ops");
    }

    #[test]
    fn test_partition_by_date_groups_and_skips_bad_ts() {
        // 2024-01-17 13:53:14 UTC and 2024-01-18 03:46:40 UTC.
        let partitions = partition_by_date(vec![
            msg("1705453994.000001", "a"),
            msg("1705546000.000002", "b"),
            msg("garbage", "c"),
        ]);

        let dates: Vec<String> = partitions
            .keys()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .collect();
        assert_eq!(dates, vec!["2024-01-17", "2024-01-18"]);
        assert_eq!(partitions.values().map(Vec::len).sum::<usize>(), 2);
    }

    #[test]
    fn test_merge_keeps_existing_when_content_unchanged() {
        let existing = vec![msg("100.000000", "hello")];
        let merged = merge_messages(existing.clone(), vec![msg("100.000000", "hello")]);
        assert_eq!(merged, existing);
    }

    #[test]
    fn test_merge_replaces_on_content_change_and_unions() {
        let merged = merge_messages(
            vec![msg("100.000000", "old"), msg("200.000000", "kept")],
            vec![msg("100.000000", "edited"), msg("300.000000", "new")],
        );

        let ts: Vec<&str> = merged.iter().map(|m| m.ts.as_str()).collect();
        assert_eq!(ts, vec!["100.000000", "200.000000", "300.000000"]);
        assert_eq!(
            merged[0].rest.get("text"),
            Some(&Value::String("edited".into()))
        );
    }

    #[test]
    fn test_write_partitions_rerun_is_byte_identical() {
        let dir = tempdir().unwrap();
        let conv_dir = dir.path().join("general");
        let messages = vec![msg("1705453994.000001", "a"), msg("1705454000.000002", "b")];

        write_partitions(&conv_dir, messages.clone()).unwrap();
        let path = conv_dir.join("2024-01-17.json");
        let first = fs::read(&path).unwrap();

        write_partitions(&conv_dir, messages).unwrap();
        let second = fs::read(&path).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_write_partitions_merges_overlapping_windows() {
        let dir = tempdir().unwrap();
        let conv_dir = dir.path().join("general");

        write_partitions(
            &conv_dir,
            vec![msg("1705453994.000001", "a"), msg("1705454000.000002", "b")],
        )
        .unwrap();
        write_partitions(
            &conv_dir,
            vec![msg("1705454000.000002", "b"), msg("1705454100.000003", "c")],
        )
        .unwrap();

        let merged = read_messages(&conv_dir.join("2024-01-17.json")).unwrap();
        let ts: Vec<&str> = merged.iter().map(|m| m.ts.as_str()).collect();
        assert_eq!(
            ts,
            vec![
                "1705453994.000001",
                "1705454000.000002",
                "1705454100.000003"
            ]
        );
    }

    #[test]
    fn test_write_partitions_fails_on_unreadable_existing_partition() {
        let dir = tempdir().unwrap();
        let conv_dir = dir.path().join("general");
        fs::create_dir_all(&conv_dir).unwrap();
        fs::write(conv_dir.join("2024-01-17.json"), "{not json").unwrap();

        let result = write_partitions(&conv_dir, vec![msg("1705453994.000001", "a")]);

        assert!(matches!(result, Err(BackupError::JsonParse { .. })));
    }

    #[test]
    fn test_write_listing_sorts_and_overwrites() {
        let dir = tempdir().unwrap();
        let meta = |id: &str| -> ConversationMeta {
            serde_json::from_value(json!({
                "id": id, "created": 1, "members": [], "name": id
            }))
            .unwrap()
        };

        let path = write_listing(
            dir.path(),
            ConversationType::PublicChannel,
            vec![meta("C02"), meta("C01")],
        )
        .unwrap();
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("channels.json"));

        let listed: Vec<Value> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(listed[0]["id"], "C01");
        assert_eq!(listed[1]["id"], "C02");

        // A later run fully replaces the listing.
        write_listing(dir.path(), ConversationType::PublicChannel, vec![meta("C03")]).unwrap();
        let listed: Vec<Value> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn test_write_index() {
        let dir = tempdir().unwrap();
        let mut counts = BTreeMap::new();
        counts.insert("general".to_string(), 12);

        write_index(dir.path(), counts).unwrap();

        let index: Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("index.json")).unwrap())
                .unwrap();
        assert_eq!(index["conversations"]["general"], 12);
        assert!(index["generated_at"].is_string());
    }
}
