//! Cheap state hashing so an orchestrator run can be skipped when nothing a
//! watch covers has changed since the last fingerprint.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

use crate::models::{ConversationMessage, StateFingerprint, WatchSpec, WatchType};

const MAX_MESSAGE_BYTES: usize = 500;
const MAX_MESSAGES: usize = 20;

/// Truncates to at most `max` bytes, backing off to the nearest preceding
/// UTF-8 char boundary so multi-byte content never panics mid-character.
fn truncate_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// `(path, mtime_millis, size)` for one matched file, sorted by path so the
/// hash is independent of glob-expansion order.
fn file_state(paths: &[String]) -> Vec<(String, u128, u64)> {
    let mut state = Vec::new();
    for pattern in paths {
        let Ok(entries) = glob::glob(pattern) else {
            continue;
        };
        for entry in entries.flatten() {
            if let Some(tuple) = stat_one(&entry) {
                state.push(tuple);
            }
        }
    }
    state.sort_by(|a, b| a.0.cmp(&b.0));
    state.dedup_by(|a, b| a.0 == b.0);
    state
}

fn stat_one(path: &Path) -> Option<(String, u128, u64)> {
    let meta = std::fs::metadata(path).ok()?;
    if !meta.is_file() {
        return None;
    }
    let mtime = meta
        .modified()
        .ok()?
        .duration_since(std::time::UNIX_EPOCH)
        .ok()?
        .as_millis();
    Some((path.to_string_lossy().to_string(), mtime, meta.len()))
}

/// The trailing window of the conversation that watches actually see:
/// last `MAX_MESSAGES`, each truncated to `MAX_MESSAGE_BYTES`.
fn conversation_state(messages: &[ConversationMessage]) -> Vec<(String, String)> {
    messages
        .iter()
        .filter(|m| matches!(m.role.as_str(), "user" | "assistant" | "tool"))
        .rev()
        .take(MAX_MESSAGES)
        .map(|m| (m.role.clone(), truncate_bytes(&m.content, MAX_MESSAGE_BYTES)))
        .collect()
}

/// Hashes one watch entry's current state.
pub fn fingerprint_watch(
    watch: &WatchSpec,
    messages: &[ConversationMessage],
) -> StateFingerprint {
    let mut hasher = DefaultHasher::new();
    match watch.watch_type {
        WatchType::Files => {
            for (path, mtime, size) in file_state(&watch.paths) {
                path.hash(&mut hasher);
                mtime.hash(&mut hasher);
                size.hash(&mut hasher);
            }
        }
        WatchType::Conversation => {
            for (role, content) in conversation_state(messages) {
                role.hash(&mut hasher);
                content.hash(&mut hasher);
            }
        }
    }
    StateFingerprint(hasher.finish())
}

/// Hashes every watch an observer reference carries into one fingerprint,
/// so a single `StateFingerprint` can gate the whole reference's run.
pub fn composite_fingerprint(
    watches: &[WatchSpec],
    messages: &[ConversationMessage],
) -> StateFingerprint {
    let mut hasher = DefaultHasher::new();
    for watch in watches {
        fingerprint_watch(watch, messages).0.hash(&mut hasher);
    }
    StateFingerprint(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn msg(role: &str, content: &str) -> ConversationMessage {
        ConversationMessage {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn conversation_fingerprint_stable_when_unchanged() {
        let messages = vec![msg("user", "hello"), msg("assistant", "hi there")];
        let watch = WatchSpec {
            watch_type: WatchType::Conversation,
            paths: vec![],
            include_tool_calls: true,
            include_reasoning: false,
        };
        let a = fingerprint_watch(&watch, &messages);
        let b = fingerprint_watch(&watch, &messages);
        assert_eq!(a, b);
    }

    #[test]
    fn conversation_fingerprint_changes_with_new_message() {
        let watch = WatchSpec {
            watch_type: WatchType::Conversation,
            paths: vec![],
            include_tool_calls: true,
            include_reasoning: false,
        };
        let a = fingerprint_watch(&watch, &[msg("user", "hello")]);
        let b = fingerprint_watch(&watch, &[msg("user", "hello"), msg("assistant", "hi")]);
        assert_ne!(a, b);
    }

    #[test]
    fn conversation_fingerprint_ignores_system_messages() {
        let watch = WatchSpec {
            watch_type: WatchType::Conversation,
            paths: vec![],
            include_tool_calls: true,
            include_reasoning: false,
        };
        let with_system = vec![msg("system", "be terse"), msg("user", "hello")];
        let without_system = vec![msg("user", "hello")];
        assert_eq!(
            fingerprint_watch(&watch, &with_system),
            fingerprint_watch(&watch, &without_system)
        );
    }

    #[test]
    fn file_fingerprint_changes_when_file_content_changes() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a.rs");
        std::fs::write(&file_path, "fn main() {}").unwrap();

        let watch = WatchSpec {
            watch_type: WatchType::Files,
            paths: vec![dir.path().join("*.rs").to_string_lossy().to_string()],
            include_tool_calls: true,
            include_reasoning: false,
        };
        let before = fingerprint_watch(&watch, &[]);

        // ensure mtime actually advances on fast filesystems
        std::thread::sleep(std::time::Duration::from_millis(10));
        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(&file_path)
            .unwrap();
        writeln!(f, "// changed").unwrap();
        drop(f);

        let after = fingerprint_watch(&watch, &[]);
        assert_ne!(before, after);
    }

    #[test]
    fn file_fingerprint_unaffected_by_glob_match_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.rs"), "b").unwrap();
        std::fs::write(dir.path().join("a.rs"), "a").unwrap();

        let pattern = dir.path().join("*.rs").to_string_lossy().to_string();
        let watch1 = WatchSpec {
            watch_type: WatchType::Files,
            paths: vec![pattern.clone()],
            include_tool_calls: true,
            include_reasoning: false,
        };
        let watch2 = WatchSpec {
            watch_type: WatchType::Files,
            paths: vec![pattern],
            include_tool_calls: true,
            include_reasoning: false,
        };
        assert_eq!(fingerprint_watch(&watch1, &[]), fingerprint_watch(&watch2, &[]));
    }

    #[test]
    fn composite_fingerprint_combines_multiple_watches() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "a").unwrap();
        let watches = vec![
            WatchSpec {
                watch_type: WatchType::Files,
                paths: vec![dir.path().join("*.rs").to_string_lossy().to_string()],
                include_tool_calls: true,
                include_reasoning: false,
            },
            WatchSpec {
                watch_type: WatchType::Conversation,
                paths: vec![],
                include_tool_calls: true,
                include_reasoning: false,
            },
        ];
        let messages = vec![msg("user", "hi")];
        let a = composite_fingerprint(&watches, &messages);
        let b = composite_fingerprint(&watches, &messages);
        assert_eq!(a, b);
    }
}
