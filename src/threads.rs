use log::debug;

use crate::client::{ApiClient, Transport, next_cursor};
use crate::error::Result;
use crate::history::{self, Message, PAGE_LIMIT};

/// Merges every thread's replies back into the conversation's top-level
/// stream. The parent keeps its position (the replies endpoint echoes it as
/// the first reply, which is dropped); replies become ordinary messages
/// ordered by their own `ts`, and the final stream is globally ascending
/// with unique `ts`.
pub async fn reconcile_threads<T: Transport>(
    client: &ApiClient<T>,
    channel_id: &str,
    mut messages: Vec<Message>,
    oldest: Option<f64>,
    latest: Option<f64>,
) -> Result<Vec<Message>> {
    let parents: Vec<String> = messages
        .iter()
        .filter(|m| m.is_thread_parent())
        .map(|m| m.ts.clone())
        .collect();

    for parent_ts in parents {
        let replies = fetch_replies(client, channel_id, &parent_ts).await?;
        debug!("{channel_id}: thread {parent_ts} has {} replies", replies.len());
        for reply in replies {
            if reply.ts == parent_ts {
                continue;
            }
            if !history::within_window(&reply.ts, oldest, latest) {
                continue;
            }
            messages.push(reply);
        }
    }

    messages.sort_by_key(Message::ts_key);
    // Replies that were also present in the history page (broadcast
    // replies) would otherwise appear twice; the history copy, sorted
    // first, wins.
    messages.dedup_by(|a, b| a.ts == b.ts);
    Ok(messages)
}

async fn fetch_replies<T: Transport>(
    client: &ApiClient<T>,
    channel_id: &str,
    parent_ts: &str,
) -> Result<Vec<Message>> {
    let mut replies = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let mut params: Vec<(&str, String)> = vec![
            ("channel", channel_id.to_string()),
            ("ts", parent_ts.to_string()),
            ("limit", PAGE_LIMIT.to_string()),
        ];
        if let Some(cursor) = &cursor {
            params.push(("cursor", cursor.clone()));
        }

        let body = client.call("conversations.replies", &params).await?;
        replies.extend(history::parse_message_array(&body, "conversations.replies")?);

        match next_cursor(&body) {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    Ok(replies)
}
