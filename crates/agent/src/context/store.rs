//! The context & constraint store.
//!
//! Single source of truth for conversation history, the read-set, the
//! per-turn counters and the undo stack. Only one turn touches it at a time;
//! the agent loop owns it behind `&mut self`.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use hearth_config::AgentConfig;
use hearth_core::message::{Message, Role};
use hearth_tools::workspace::{atomic_write, resolve_in_root};
use tracing::{debug, info, warn};

use super::token::estimate_messages_tokens;

/// Longest line kept per message in a compaction summary.
const SUMMARY_CLIP_CHARS: usize = 160;

/// Files listed by name in `context_summary`.
const SUMMARY_FILE_LIMIT: usize = 5;

/// A read-set entry: a file the agent has seen, as it was when read.
///
/// A ranged read keeps only the lines shown as `content`; `partial` is set
/// and `lines` still counts the whole file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileContext {
    pub path: PathBuf,
    pub content: String,
    /// Lines in the file
    pub lines: usize,
    /// Size of `content` in bytes
    pub size: usize,
    pub partial: bool,
    pub read_at: DateTime<Utc>,
}

impl FileContext {
    pub fn new(path: PathBuf, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            path,
            lines: content.matches('\n').count() + 1,
            size: content.len(),
            content,
            partial: false,
            read_at: Utc::now(),
        }
    }

    /// A snapshot of some of the file's `total_lines` lines.
    pub fn slice(path: PathBuf, content: impl Into<String>, total_lines: usize) -> Self {
        Self {
            lines: total_lines,
            partial: true,
            ..Self::new(path, content)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Created,
    Modified,
}

impl std::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Modified => write!(f, "modified"),
        }
    }
}

/// An undo record. `old_content` is `None` for files that did not exist.
#[derive(Debug, Clone, PartialEq)]
pub struct FileChange {
    pub path: PathBuf,
    pub old_content: Option<String>,
    pub new_content: String,
    pub action: ChangeAction,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum UndoError {
    #[error("Nothing to undo")]
    Empty,

    #[error("Failed to restore {path}: {source}")]
    Restore {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct ContextStore {
    root: PathBuf,
    history: Vec<Message>,
    read_set: HashMap<PathBuf, FileContext>,
    tool_calls: u32,
    max_tool_calls: u32,
    iterations: u32,
    undo: VecDeque<FileChange>,
    undo_limit: usize,
    token_budget: usize,
    /// Fixed cost of every request outside history, e.g. tool schemas
    reserved_tokens: usize,
    keep_recent: usize,
}

impl ContextStore {
    pub fn new(root: impl AsRef<Path>, config: &AgentConfig) -> Self {
        Self {
            root: resolve_in_root(root.as_ref(), "."),
            history: Vec::new(),
            read_set: HashMap::new(),
            tool_calls: 0,
            max_tool_calls: config.max_tool_calls,
            iterations: 0,
            undo: VecDeque::new(),
            undo_limit: config.undo_limit.max(1),
            token_budget: config.context_token_budget,
            reserved_tokens: 0,
            keep_recent: config.keep_recent_messages,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The read-set key for `path`.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        resolve_in_root(&self.root, path)
    }

    // ── Read-set ──────────────────────────────────────────────────────────

    /// Whether `path` may be modified: new files always, existing files only
    /// once they are in the read-set.
    pub fn can_modify(&self, path: impl AsRef<Path>) -> (bool, String) {
        let resolved = self.resolve(path.as_ref());
        if !resolved.exists() {
            return (true, "New file".into());
        }
        if self.read_set.contains_key(&resolved) {
            return (true, "File in read set".into());
        }
        (
            false,
            format!(
                "File not read: {}. Read it first before modifying.",
                path.as_ref().display()
            ),
        )
    }

    pub fn record_read(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        let resolved = self.resolve(path);
        debug!(path = %resolved.display(), "Recorded read");
        self.read_set
            .insert(resolved.clone(), FileContext::new(resolved, content));
    }

    /// Record a ranged read. The file counts as read, so it may be modified.
    pub fn record_partial_read(
        &mut self,
        path: impl AsRef<Path>,
        content: impl Into<String>,
        total_lines: usize,
    ) {
        let resolved = self.resolve(path);
        debug!(path = %resolved.display(), total_lines, "Recorded partial read");
        self.read_set
            .insert(resolved.clone(), FileContext::slice(resolved, content, total_lines));
    }

    pub fn has_read(&self, path: impl AsRef<Path>) -> bool {
        self.read_set.contains_key(&self.resolve(path))
    }

    /// The snapshot taken when `path` was last read.
    pub fn cached_content(&self, path: impl AsRef<Path>) -> Option<&str> {
        self.read_set
            .get(&self.resolve(path))
            .map(|ctx| ctx.content.as_str())
    }

    pub fn read_set_len(&self) -> usize {
        self.read_set.len()
    }

    // ── Undo ──────────────────────────────────────────────────────────────

    /// Push an undo record, evicting the oldest past the limit. The written
    /// content becomes the read-set snapshot.
    pub fn record_change(
        &mut self,
        path: impl AsRef<Path>,
        old_content: Option<String>,
        new_content: impl Into<String>,
        action: ChangeAction,
    ) {
        let resolved = self.resolve(path);
        let new_content = new_content.into();
        self.read_set.insert(
            resolved.clone(),
            FileContext::new(resolved.clone(), new_content.clone()),
        );
        self.undo.push_back(FileChange {
            path: resolved,
            old_content,
            new_content,
            action,
            timestamp: Utc::now(),
        });
        while self.undo.len() > self.undo_limit {
            self.undo.pop_front();
        }
    }

    /// Revert the most recent change. The entry is popped only once the
    /// filesystem has been restored.
    pub fn undo_last(&mut self) -> Result<FileChange, UndoError> {
        let change = self.undo.back().ok_or(UndoError::Empty)?;
        let path = change.path.clone();

        let restored = match (&change.action, &change.old_content) {
            (ChangeAction::Modified, Some(old)) => atomic_write(&path, old),
            (ChangeAction::Modified, None) => atomic_write(&path, ""),
            (ChangeAction::Created, _) => match std::fs::remove_file(&path) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };

        if let Err(source) = restored {
            warn!(path = %path.display(), error = %source, "Undo failed, keeping entry");
            return Err(UndoError::Restore { path, source });
        }

        let change = self.undo.pop_back().ok_or(UndoError::Empty)?;
        match (&change.action, &change.old_content) {
            (ChangeAction::Modified, Some(old)) => {
                self.read_set
                    .insert(path.clone(), FileContext::new(path.clone(), old.clone()));
            }
            _ => {
                self.read_set.remove(&path);
            }
        }
        info!(path = %path.display(), action = %change.action, "Undid change");
        Ok(change)
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    // ── Counters ──────────────────────────────────────────────────────────

    /// Count one tool call. Returns false once the per-turn ceiling is passed.
    pub fn try_consume_tool_call(&mut self) -> bool {
        self.tool_calls += 1;
        self.tool_calls <= self.max_tool_calls
    }

    pub fn tool_calls_used(&self) -> u32 {
        self.tool_calls.min(self.max_tool_calls)
    }

    pub fn max_tool_calls(&self) -> u32 {
        self.max_tool_calls
    }

    /// Advance the iteration counter and return the new value.
    pub fn next_iteration(&mut self) -> u32 {
        self.iterations += 1;
        self.iterations
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// A fresh user message starts a new turn.
    pub fn begin_turn(&mut self) {
        self.tool_calls = 0;
        self.iterations = 0;
    }

    /// The user explicitly let the current turn keep going.
    pub fn continue_turn(&mut self) {
        self.tool_calls = 0;
        self.iterations = 0;
    }

    // ── History ───────────────────────────────────────────────────────────

    /// Install or replace the leading system prompt.
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        let msg = Message::system(prompt);
        match self.history.first() {
            Some(first) if first.role == Role::System => self.history[0] = msg,
            _ => self.history.insert(0, msg),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.history.push(message);
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn estimated_tokens(&self) -> usize {
        estimate_messages_tokens(&self.history)
    }

    /// Count `tokens` against the budget on top of history.
    pub fn set_reserved_tokens(&mut self, tokens: usize) {
        self.reserved_tokens = tokens;
    }

    pub fn needs_compaction(&self) -> bool {
        self.estimated_tokens() + self.reserved_tokens > self.token_budget
    }

    /// Condense everything between the system prompt and the most recent
    /// messages into one summary message.
    ///
    /// Returns `(messages_before, messages_after)` when anything changed.
    /// The preserved tail never starts on a tool result, so each result stays
    /// next to the assistant message that requested it.
    pub fn compact(&mut self) -> Option<(usize, usize)> {
        let before = self.history.len();
        let lead = usize::from(self.history.first().is_some_and(|m| m.role == Role::System));

        let mut tail_start = before.saturating_sub(self.keep_recent).max(lead);
        while tail_start > lead && self.history[tail_start..].first().is_some_and(|m| m.role == Role::Tool) {
            tail_start -= 1;
        }
        if tail_start <= lead {
            return None;
        }

        let mut summary = String::from("Summary of earlier conversation:");
        for msg in &self.history[lead..tail_start] {
            summary.push_str(&format!("\n- {}: {}", role_name(msg.role), clip(&msg.content)));
            if !msg.tool_calls.is_empty() {
                let names: Vec<&str> = msg.tool_calls.iter().map(|c| c.name.as_str()).collect();
                summary.push_str(&format!(" [tool calls: {}]", names.join(", ")));
            }
        }

        let tail = self.history.split_off(tail_start);
        self.history.truncate(lead);
        self.history.push(Message::system(summary));
        self.history.extend(tail);

        let after = self.history.len();
        info!(before, after, "Compacted conversation history");
        Some((before, after))
    }

    // ── Reset & display ───────────────────────────────────────────────────

    /// Forget history (except the system prompt), the read-set and counters.
    /// The undo stack survives so earlier edits can still be reverted.
    pub fn clear(&mut self) {
        let lead = usize::from(self.history.first().is_some_and(|m| m.role == Role::System));
        self.history.truncate(lead);
        self.read_set.clear();
        self.tool_calls = 0;
        self.iterations = 0;
    }

    /// Human-readable summary for the `/context` command.
    pub fn context_summary(&self) -> String {
        let mut lines = Vec::new();

        if !self.read_set.is_empty() {
            lines.push(format!("{} file(s) in context:", self.read_set.len()));
            let mut files: Vec<&FileContext> = self.read_set.values().collect();
            files.sort_by(|a, b| a.path.cmp(&b.path));
            for ctx in files.iter().take(SUMMARY_FILE_LIMIT) {
                let shown = ctx.path.strip_prefix(&self.root).unwrap_or(&ctx.path);
                let partial = if ctx.partial { ", partial" } else { "" };
                lines.push(format!("   - {} ({} lines{partial})", shown.display(), ctx.lines));
            }
            if files.len() > SUMMARY_FILE_LIMIT {
                lines.push(format!("   - ... and {} more", files.len() - SUMMARY_FILE_LIMIT));
            }
        }

        if self.tool_calls > 0 {
            lines.push(format!(
                "{}/{} tool calls this turn",
                self.tool_calls_used(),
                self.max_tool_calls
            ));
        }

        if !self.undo.is_empty() {
            lines.push(format!("{} change(s) can be undone", self.undo.len()));
        }

        if lines.is_empty() {
            "No context loaded".into()
        } else {
            lines.join("\n")
        }
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::Tool => "tool",
    }
}

fn clip(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= SUMMARY_CLIP_CHARS {
        return flat;
    }
    let mut clipped: String = flat.chars().take(SUMMARY_CLIP_CHARS).collect();
    clipped.push_str("...");
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::message::MessageToolCall;

    fn config() -> AgentConfig {
        AgentConfig::default()
    }

    fn store(dir: &Path) -> ContextStore {
        ContextStore::new(dir, &config())
    }

    #[test]
    fn existing_unread_file_cannot_be_modified() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();
        let mut ctx = store(dir.path());

        let (ok, reason) = ctx.can_modify("a.rs");
        assert!(!ok);
        assert_eq!(reason, "File not read: a.rs. Read it first before modifying.");

        ctx.record_read("a.rs", "fn a() {}\n");
        let (ok, reason) = ctx.can_modify("a.rs");
        assert!(ok);
        assert_eq!(reason, "File in read set");
    }

    #[test]
    fn new_files_are_always_modifiable() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = store(dir.path());
        assert_eq!(ctx.can_modify("brand/new.rs"), (true, "New file".to_string()));
    }

    #[test]
    fn equivalent_paths_share_one_key() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "").unwrap();
        let mut ctx = store(dir.path());

        ctx.record_read("./src/lib.rs", "");
        assert!(ctx.has_read("src/lib.rs"));
        assert!(ctx.has_read(dir.path().join("src/lib.rs")));
        assert!(ctx.can_modify("src/../src/lib.rs").0);
        assert_eq!(ctx.read_set_len(), 1);
    }

    #[test]
    fn partial_read_keeps_whole_file_facts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.rs"), "1\n2\n3\n4\n").unwrap();
        let mut ctx = store(dir.path());

        ctx.record_partial_read("big.rs", "2\n", 4);
        assert!(ctx.can_modify("big.rs").0);
        assert_eq!(ctx.cached_content("big.rs"), Some("2\n"));

        let entry = ctx.read_set.get(&ctx.resolve("big.rs")).unwrap();
        assert!(entry.partial);
        assert_eq!(entry.lines, 4);
        assert_eq!(entry.size, 2);
        assert!(ctx.context_summary().contains("big.rs (4 lines, partial)"));
    }

    #[test]
    fn file_context_counts() {
        let fc = FileContext::new(PathBuf::from("/x"), "a\nb\n");
        assert_eq!(fc.lines, 3);
        assert_eq!(fc.size, 4);
        assert_eq!(FileContext::new(PathBuf::from("/x"), "").lines, 1);
    }

    #[test]
    fn undo_restores_modified_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "new").unwrap();
        let mut ctx = store(dir.path());

        ctx.record_change(&path, Some("old".into()), "new", ChangeAction::Modified);
        assert_eq!(ctx.undo_len(), 1);

        let change = ctx.undo_last().unwrap();
        assert_eq!(change.action, ChangeAction::Modified);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old");
        assert_eq!(ctx.undo_len(), 0);
        assert_eq!(ctx.cached_content(&path), Some("old"));
    }

    #[test]
    fn undo_deletes_created_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("made.txt");
        std::fs::write(&path, "hello").unwrap();
        let mut ctx = store(dir.path());

        ctx.record_change("made.txt", None, "hello", ChangeAction::Created);
        ctx.undo_last().unwrap();
        assert!(!path.exists());
        assert!(!ctx.has_read("made.txt"));
    }

    #[test]
    fn failed_restore_keeps_entry() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where a directory is expected makes the write fail
        std::fs::write(dir.path().join("blocker"), "").unwrap();
        let mut ctx = store(dir.path());

        ctx.record_change("blocker/inner.txt", Some("old".into()), "new", ChangeAction::Modified);
        let err = ctx.undo_last().unwrap_err();
        assert!(matches!(err, UndoError::Restore { .. }));
        assert_eq!(ctx.undo_len(), 1);
    }

    #[test]
    fn empty_undo() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(store(dir.path()).undo_last(), Err(UndoError::Empty)));
    }

    #[test]
    fn undo_stack_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AgentConfig {
            undo_limit: 2,
            ..config()
        };
        let mut ctx = ContextStore::new(dir.path(), &cfg);
        for i in 0..4 {
            ctx.record_change(format!("f{i}.txt"), None, "x", ChangeAction::Created);
        }
        assert_eq!(ctx.undo_len(), 2);
        // Oldest were evicted: the bottom entry is f2
        assert!(ctx.undo.front().unwrap().path.ends_with("f2.txt"));
    }

    #[test]
    fn tool_call_budget() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = store(dir.path());
        assert!(ctx.try_consume_tool_call());
        assert!(ctx.try_consume_tool_call());
        assert!(ctx.try_consume_tool_call());
        assert!(!ctx.try_consume_tool_call());
        assert!(!ctx.try_consume_tool_call());
        assert_eq!(ctx.tool_calls_used(), 3);

        ctx.continue_turn();
        assert!(ctx.try_consume_tool_call());
    }

    #[test]
    fn begin_turn_resets_counters() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = store(dir.path());
        ctx.next_iteration();
        ctx.next_iteration();
        ctx.try_consume_tool_call();
        ctx.begin_turn();
        assert_eq!(ctx.iterations(), 0);
        assert_eq!(ctx.tool_calls_used(), 0);
    }

    #[test]
    fn system_prompt_is_replaced_not_duplicated() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = store(dir.path());
        ctx.push(Message::user("hi"));
        ctx.set_system_prompt("one");
        ctx.set_system_prompt("two");
        assert_eq!(ctx.history().len(), 2);
        assert_eq!(ctx.history()[0].content, "two");
    }

    #[test]
    fn compaction_keeps_system_and_recent() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AgentConfig {
            keep_recent_messages: 2,
            context_token_budget: 10,
            ..config()
        };
        let mut ctx = ContextStore::new(dir.path(), &cfg);
        ctx.set_system_prompt("You are a coding agent.");
        for i in 0..6 {
            ctx.push(Message::user(format!("question {i}")));
        }
        assert!(ctx.needs_compaction());

        let (before, after) = ctx.compact().unwrap();
        assert_eq!(before, 7);
        assert_eq!(after, 4);
        let h = ctx.history();
        assert_eq!(h[0].content, "You are a coding agent.");
        assert_eq!(h[1].role, Role::System);
        assert!(h[1].content.starts_with("Summary of earlier conversation:"));
        assert!(h[1].content.contains("- user: question 0"));
        assert_eq!(h[2].content, "question 4");
        assert_eq!(h[3].content, "question 5");
    }

    #[test]
    fn reserved_tokens_count_against_the_budget() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AgentConfig {
            context_token_budget: 100,
            ..config()
        };
        let mut ctx = ContextStore::new(dir.path(), &cfg);
        ctx.push(Message::user("short"));
        assert!(!ctx.needs_compaction());

        ctx.set_reserved_tokens(100);
        assert!(ctx.needs_compaction());
    }

    #[test]
    fn compaction_never_orphans_tool_results() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AgentConfig {
            keep_recent_messages: 1,
            ..config()
        };
        let mut ctx = ContextStore::new(dir.path(), &cfg);
        ctx.push(Message::user("read it"));
        ctx.push(Message::user("please"));
        ctx.push(Message::assistant_with_tool_calls(
            "",
            vec![MessageToolCall {
                id: "call_0".into(),
                name: "fs.read".into(),
                arguments: "{}".into(),
            }],
        ));
        ctx.push(Message::tool_result("call_0", "{}"));

        ctx.compact().unwrap();
        let h = ctx.history();
        assert_eq!(h.len(), 3);
        assert_eq!(h[1].role, Role::Assistant);
        assert_eq!(h[2].role, Role::Tool);
    }

    #[test]
    fn compaction_with_nothing_to_condense() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = store(dir.path());
        ctx.set_system_prompt("sys");
        ctx.push(Message::user("hi"));
        assert!(ctx.compact().is_none());
    }

    #[test]
    fn clear_resets_everything_but_system_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = store(dir.path());
        ctx.set_system_prompt("sys");
        ctx.push(Message::user("hi"));
        ctx.record_read("x.rs", "x");
        ctx.try_consume_tool_call();

        ctx.clear();
        assert_eq!(ctx.history().len(), 1);
        assert_eq!(ctx.read_set_len(), 0);
        assert_eq!(ctx.tool_calls_used(), 0);
        assert_eq!(ctx.context_summary(), "No context loaded");
    }

    #[test]
    fn summary_lists_files_and_calls() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = store(dir.path());
        ctx.record_read("main.rs", "a\nb");
        ctx.try_consume_tool_call();
        let s = ctx.context_summary();
        assert!(s.contains("1 file(s) in context:"));
        assert!(s.contains("main.rs (2 lines)"));
        assert!(s.contains("1/3 tool calls this turn"));
    }

    #[test]
    fn clip_is_char_safe() {
        let long = "é".repeat(400);
        let c = clip(&long);
        assert!(c.ends_with("..."));
        assert_eq!(c.chars().count(), SUMMARY_CLIP_CHARS + 3);
    }
}
