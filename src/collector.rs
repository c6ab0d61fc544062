//! Turns a watch list into the review text handed to an observer prompt.

use crate::models::{ConversationMessage, WatchSpec, WatchType};

const MAX_FILE_BYTES: usize = 50_000;
const MAX_MESSAGE_BYTES: usize = 2_000;
const MAX_MESSAGES: usize = 20;

/// Truncates to at most `max` bytes, backing off to the nearest preceding
/// UTF-8 char boundary so multi-byte content never panics mid-character.
fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Reads every file matched by a `Files` watch, capping total bytes at
/// `MAX_FILE_BYTES` and stopping once the cap is hit rather than
/// truncating mid-file.
pub async fn collect_files(paths: &[String]) -> String {
    let mut out = String::new();
    let mut remaining = MAX_FILE_BYTES;

    let mut matches: Vec<String> = Vec::new();
    for pattern in paths {
        if let Ok(entries) = glob::glob(pattern) {
            for entry in entries.flatten() {
                matches.push(entry.to_string_lossy().to_string());
            }
        }
    }
    matches.sort();
    matches.dedup();

    for path in matches {
        if remaining == 0 {
            break;
        }
        let Ok(content) = tokio::fs::read_to_string(&path).await else {
            continue;
        };
        let slice = truncate_bytes(&content, remaining);
        let take = slice.len();
        out.push_str(&format!("### {path}\n```\n{slice}\n```\n\n"));
        remaining -= take;
    }
    out
}

/// Renders the last `MAX_MESSAGES` conversation turns, each truncated to
/// `MAX_MESSAGE_BYTES`, as `**role**: content` lines.
pub fn collect_conversation(messages: &[ConversationMessage], include_tool_calls: bool) -> String {
    let relevant: Vec<&ConversationMessage> = messages
        .iter()
        .filter(|m| include_tool_calls || m.role != "tool")
        .collect();
    let start = relevant.len().saturating_sub(MAX_MESSAGES);

    relevant[start..]
        .iter()
        .map(|m| {
            let content = if m.content.len() > MAX_MESSAGE_BYTES {
                format!("{}... [truncated]", truncate_bytes(&m.content, MAX_MESSAGE_BYTES))
            } else {
                m.content.clone()
            };
            format!("**{}**: {}", m.role, content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Joins every watch's content into one review blob, in watch order,
/// separated by `---`.
pub async fn collect(watches: &[WatchSpec], messages: &[ConversationMessage]) -> String {
    let mut sections = Vec::new();
    for watch in watches {
        let section = match watch.watch_type {
            WatchType::Files => collect_files(&watch.paths).await,
            WatchType::Conversation => collect_conversation(messages, watch.include_tool_calls),
        };
        if !section.trim().is_empty() {
            sections.push(section);
        }
    }
    sections.join("\n---\n")
}
