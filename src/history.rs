use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::client::{ApiClient, Transport, next_cursor};
use crate::error::{BackupError, Result};

/// Slack caps history pages at 1000 messages.
pub const PAGE_LIMIT: u32 = 1_000;

/// A single message record. The engine only interprets a handful of fields;
/// everything else Slack sends (`text`, `type`, `subtype`, `files`,
/// `reactions`, `edited`, team ids, ...) passes through `rest` untouched so
/// a read/merge/write cycle preserves the provider payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub ts: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Present on thread parents and replies; equals `ts` on the parent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,

    /// Only meaningful on the thread parent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_count: Option<i64>,

    /// Sender profile snapshot as of send time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_profile: Option<Value>,

    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl Message {
    pub fn is_thread_parent(&self) -> bool {
        self.reply_count.unwrap_or(0) > 0
            && self.thread_ts.as_deref().is_none_or(|t| t == self.ts)
    }

    pub fn ts_key(&self) -> (i64, u64) {
        ts_key(&self.ts)
    }

    /// UTC calendar date the message files under, `None` when `ts` is not a
    /// valid timestamp.
    pub fn utc_date(&self) -> Option<NaiveDate> {
        let (secs, _) = parse_ts(&self.ts)?;
        chrono::DateTime::from_timestamp(secs, 0).map(|dt| dt.date_naive())
    }
}

fn parse_ts(ts: &str) -> Option<(i64, u64)> {
    let mut parts = ts.splitn(2, '.');
    let secs = parts.next()?.parse().ok()?;
    let micros = match parts.next() {
        // The fraction is a decimal, not a microsecond count; a short one
        // like "5" means 500ms and must be scaled accordingly.
        Some(frac) => {
            let digits: String = frac.chars().take(6).collect();
            let value: u64 = digits.parse().ok()?;
            value * 10u64.pow(6u32.saturating_sub(digits.len() as u32))
        }
        None => 0,
    };
    Some((secs, micros))
}

/// Chronological sort key for a Slack `ts`. Timestamps are
/// `"<seconds>.<microseconds>"` strings; comparing them numerically is safe
/// even when the second counts differ in digit length.
pub fn ts_key(ts: &str) -> (i64, u64) {
    parse_ts(ts).unwrap_or((0, 0))
}

/// Inclusive window check against epoch-second bounds.
pub fn within_window(ts: &str, oldest: Option<f64>, latest: Option<f64>) -> bool {
    let Some((secs, micros)) = parse_ts(ts) else {
        return true;
    };
    let t = secs as f64 + micros as f64 / 1e6;
    if let Some(oldest) = oldest
        && t < oldest
    {
        return false;
    }
    if let Some(latest) = latest
        && t > latest
    {
        return false;
    }
    true
}

pub(crate) fn format_ts_param(epoch_secs: f64) -> String {
    format!("{epoch_secs:.6}")
}

pub(crate) fn parse_message_array(body: &Value, method: &str) -> Result<Vec<Message>> {
    match body.get("messages") {
        None => Ok(Vec::new()),
        Some(messages) => {
            serde_json::from_value(messages.clone()).map_err(|e| BackupError::Api {
                method: method.to_string(),
                error: format!("undecodable messages array: {e}"),
            })
        }
    }
}

/// Walks a conversation's history to cursor exhaustion and returns the
/// messages inside the inclusive `[oldest, latest]` window, ascending by
/// `ts`. Collect-then-sort: Slack pages arrive newest first.
pub async fn fetch_history<T: Transport>(
    client: &ApiClient<T>,
    channel_id: &str,
    oldest: Option<f64>,
    latest: Option<f64>,
) -> Result<Vec<Message>> {
    let mut all = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let mut params: Vec<(&str, String)> = vec![
            ("channel", channel_id.to_string()),
            ("limit", PAGE_LIMIT.to_string()),
        ];
        if let Some(oldest) = oldest {
            params.push(("oldest", format_ts_param(oldest)));
        }
        if let Some(latest) = latest {
            params.push(("latest", format_ts_param(latest)));
        }
        if let Some(cursor) = &cursor {
            params.push(("cursor", cursor.clone()));
        }

        let body = client.call("conversations.history", &params).await?;
        all.extend(parse_message_array(&body, "conversations.history")?);

        match next_cursor(&body) {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    // The provider treats the bounds as exclusive-ish depending on an
    // `inclusive` flag; filtering here pins down inclusive semantics.
    all.retain(|m| within_window(&m.ts, oldest, latest));
    all.sort_by_key(Message::ts_key);
    Ok(all)
}
