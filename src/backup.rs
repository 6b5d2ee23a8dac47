use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::archive::{self, conversation_label, write_listing, write_partitions};
use crate::client::{self, ApiClient, Transport};
use crate::conversations::{self, Conversation, ConversationMeta, ConversationType};
use crate::error::Result;
use crate::history;
use crate::threads;
use crate::users::UserDirectory;

pub struct BackupOptions {
    pub out_dir: PathBuf,
    pub types: Vec<ConversationType>,
    pub conversation_id: Option<String>,
    pub oldest: Option<f64>,
    pub latest: Option<f64>,
    pub concurrency: usize,
}

#[derive(Debug)]
pub struct ConversationFailure {
    pub label: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct BackupSummary {
    pub processed: usize,
    pub failures: Vec<ConversationFailure>,
}

/// Runs a full backup: validates the credential, enumerates the requested
/// conversations and archives each one on a bounded worker pool. One
/// conversation failing is recorded and does not stop the others; an
/// authentication failure aborts the whole run.
pub async fn run<T: Transport>(
    client: Arc<ApiClient<T>>,
    users: Arc<UserDirectory>,
    options: BackupOptions,
) -> Result<BackupSummary> {
    fs::create_dir_all(&options.out_dir)?;

    let identity = client::validate_token(&client).await?;
    info!("authenticated as {} in team {}", identity.user, identity.team);

    let conversations = conversations::enumerate(
        &client,
        &options.types,
        options.conversation_id.as_deref(),
    )
    .await?;
    info!("{} conversations to back up", conversations.len());

    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut tasks = JoinSet::new();
    for conversation in conversations {
        let client = Arc::clone(&client);
        let users = Arc::clone(&users);
        let semaphore = Arc::clone(&semaphore);
        let out_dir = options.out_dir.clone();
        let (oldest, latest) = (options.oldest, options.latest);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let label = conversation_label(&conversation);
            let result =
                backup_conversation(&client, &users, &out_dir, &conversation, oldest, latest)
                    .await;
            (conversation.conversation_type(), label, result)
        });
    }

    let mut metas: BTreeMap<ConversationType, Vec<ConversationMeta>> = BTreeMap::new();
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut summary = BackupSummary::default();

    while let Some(joined) = tasks.join_next().await {
        let Ok((conversation_type, label, result)) = joined else {
            warn!("archiving task failed to complete");
            continue;
        };
        match result {
            Ok((meta, count)) => {
                info!("{label}: archived {count} messages");
                summary.processed += 1;
                counts.insert(label, count);
                metas.entry(conversation_type).or_default().push(meta);
            }
            Err(e) if e.is_fatal() => {
                tasks.abort_all();
                return Err(e);
            }
            Err(e) => {
                warn!("{label}: {e}");
                summary.failures.push(ConversationFailure {
                    label,
                    error: e.to_string(),
                });
            }
        }
    }

    if options.conversation_id.is_some() {
        // A single-conversation run only refreshes the listing for the type
        // it actually touched.
        for (conversation_type, list) in metas {
            write_listing(&options.out_dir, conversation_type, list)?;
        }
    } else {
        for conversation_type in &options.types {
            let list = metas.remove(conversation_type).unwrap_or_default();
            write_listing(&options.out_dir, *conversation_type, list)?;
        }
    }
    archive::write_index(&options.out_dir, counts)?;

    Ok(summary)
}

/// Archives one conversation end to end: history, thread replies, sender
/// profile enrichment, date-partitioned files and the metadata record.
async fn backup_conversation<T: Transport>(
    client: &ApiClient<T>,
    users: &UserDirectory,
    out_dir: &Path,
    conversation: &Conversation,
    oldest: Option<f64>,
    latest: Option<f64>,
) -> Result<(ConversationMeta, usize)> {
    let label = conversation_label(conversation);

    let messages = history::fetch_history(client, &conversation.id, oldest, latest).await?;
    let mut messages =
        threads::reconcile_threads(client, &conversation.id, messages, oldest, latest).await?;

    for message in &mut messages {
        if message.user_profile.is_none()
            && let Some(user) = message.user.clone()
        {
            message.user_profile = Some(users.resolve(client, &user).await);
        }
    }

    let count = messages.len();
    write_partitions(&out_dir.join(&label), messages)?;

    let members = conversations::fetch_members(client, &conversation.id).await?;
    Ok((
        ConversationMeta::from_conversation(conversation, &label, members),
        count,
    ))
}
