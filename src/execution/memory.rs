//! In-process sandbox used by unit tests.
//!
//! Holds the working tree as a path -> bytes map with a baseline snapshot.
//! Patches are applied hunk by hunk like `git apply` (all or nothing) and
//! commands are answered by scripted handlers that may mutate the tree.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::SandboxError;
use crate::execution::sandbox::{validate_relative_path, ExecOutput, Sandbox};
use crate::patch::{self, strip_path, ApplyOutcome, DiffError, FilePatch};

pub(crate) type Tree = BTreeMap<String, Vec<u8>>;

type Handler = Box<dyn Fn(&str, &mut Tree) -> Result<ExecOutput, SandboxError> + Send + Sync>;

#[derive(Default)]
struct MemoryState {
    baseline: Tree,
    files: Tree,
    handlers: Vec<(String, Handler)>,
    commands: Vec<String>,
    resets: usize,
}

#[derive(Default)]
pub(crate) struct MemorySandbox {
    state: Mutex<MemoryState>,
}

impl MemorySandbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds a file to the baseline.
    pub(crate) fn with_file(self, path: &str, content: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.baseline.insert(path.to_string(), content.as_bytes().to_vec());
            state.files.insert(path.to_string(), content.as_bytes().to_vec());
        }
        self
    }

    /// Answers commands containing `pattern`. Earlier handlers win.
    pub(crate) fn on_command<F>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(&str, &mut Tree) -> Result<ExecOutput, SandboxError> + Send + Sync + 'static,
    {
        self.state
            .lock()
            .unwrap()
            .handlers
            .push((pattern.to_string(), Box::new(handler)));
        self
    }

    /// Answers commands containing `pattern` with a fixed result.
    pub(crate) fn on_command_output(self, pattern: &str, exit_code: i64, stdout: &str) -> Self {
        let stdout = stdout.to_string();
        self.on_command(pattern, move |_, _| {
            Ok(ExecOutput {
                stdout: stdout.clone(),
                stderr: String::new(),
                exit_code,
            })
        })
    }

    pub(crate) fn file(&self, path: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(path)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Writes a file outside of any patch, simulating leftover state.
    pub(crate) fn write(&self, path: &str, content: &str) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), content.as_bytes().to_vec());
    }

    pub(crate) fn reset_count(&self) -> usize {
        self.state.lock().unwrap().resets
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub(crate) fn matches_baseline(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.files == state.baseline
    }
}

fn split_lines(content: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(content)
        .lines()
        .map(str::to_string)
        .collect()
}

fn join_lines(lines: &[String]) -> Vec<u8> {
    if lines.is_empty() {
        return Vec::new();
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out.into_bytes()
}

fn find_block(haystack: &[String], needle: &[&str], hint: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(hint.min(haystack.len()));
    }
    let fits = |at: usize| {
        at + needle.len() <= haystack.len()
            && haystack[at..at + needle.len()]
                .iter()
                .zip(needle)
                .all(|(a, b)| a == b)
    };
    if fits(hint) {
        return Some(hint);
    }
    (0..haystack.len()).find(|&at| fits(at))
}

fn apply_file(
    file: &FilePatch,
    strip: usize,
    tree: &Tree,
) -> Result<(String, Option<Vec<u8>>), String> {
    let raw_target = file.target_path().unwrap_or_default();
    let target = strip_path(raw_target, strip)
        .ok_or_else(|| format!("error: {raw_target}: No such file or directory"))?;

    if file.is_creation() {
        if tree.contains_key(&target) {
            return Err(format!("error: {target}: already exists in working directory"));
        }
        let lines: Vec<String> = file
            .hunks
            .iter()
            .flat_map(|h| h.new_lines().map(str::to_string))
            .collect();
        return Ok((target, Some(join_lines(&lines))));
    }

    let raw_source = file.old_path.as_deref().unwrap_or_default();
    let source = strip_path(raw_source, strip)
        .ok_or_else(|| format!("error: {raw_source}: No such file or directory"))?;
    let Some(content) = tree.get(&source) else {
        return Err(format!("error: {source}: No such file or directory"));
    };

    let mut lines = split_lines(content);
    let mut offset: isize = 0;
    for hunk in &file.hunks {
        let old: Vec<&str> = hunk.old_lines().collect();
        let hint = (hunk.old_start.saturating_sub(1) as isize + offset).max(0) as usize;
        let Some(at) = find_block(&lines, &old, hint) else {
            return Err(format!(
                "error: patch failed: {source}:{}\nerror: {source}: patch does not apply",
                hunk.old_start
            ));
        };
        let new: Vec<String> = hunk.new_lines().map(str::to_string).collect();
        offset += new.len() as isize - old.len() as isize;
        lines.splice(at..at + old.len(), new);
    }

    if file.is_deletion() {
        Ok((source, None))
    } else {
        Ok((target, Some(join_lines(&lines))))
    }
}

#[async_trait]
impl Sandbox for MemorySandbox {
    async fn reset(&self) -> Result<(), SandboxError> {
        let mut state = self.state.lock().unwrap();
        state.files = state.baseline.clone();
        state.resets += 1;
        Ok(())
    }

    async fn apply_patch(&self, diff: &str, strip: usize) -> Result<ApplyOutcome, SandboxError> {
        let files = match patch::parse(diff) {
            Ok(files) => files,
            Err(DiffError::NoHunks) => {
                return Ok(ApplyOutcome::Rejected("error: No valid patches in input".into()))
            }
            Err(DiffError::Malformed(r)) => {
                return Ok(ApplyOutcome::Rejected(format!("error: corrupt patch: {r}")))
            }
        };

        let mut state = self.state.lock().unwrap();
        let mut errors = Vec::new();
        let mut writes = Vec::new();
        for file in &files {
            match apply_file(file, strip, &state.files) {
                Ok(write) => writes.push(write),
                Err(e) => errors.push(e),
            }
        }
        if !errors.is_empty() {
            return Ok(ApplyOutcome::Rejected(errors.join("\n")));
        }
        for (path, content) in writes {
            match content {
                Some(bytes) => {
                    state.files.insert(path, bytes);
                }
                None => {
                    state.files.remove(&path);
                }
            }
        }
        Ok(ApplyOutcome::Applied)
    }

    async fn exec(&self, command: &str, _timeout: Duration) -> Result<ExecOutput, SandboxError> {
        let mut state = self.state.lock().unwrap();
        state.commands.push(command.to_string());
        let MemoryState {
            handlers, files, ..
        } = &mut *state;
        match handlers.iter().find(|(p, _)| command.contains(p.as_str())) {
            Some((_, handler)) => handler(command, files),
            None => Ok(ExecOutput::default()),
        }
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SandboxError> {
        validate_relative_path(path)?;
        self.state
            .lock()
            .unwrap()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| SandboxError::FileNotFound(path.to_string()))
    }

    async fn exists(&self, path: &str) -> Result<bool, SandboxError> {
        validate_relative_path(path)?;
        let state = self.state.lock().unwrap();
        let dir = format!("{}/", path.trim_end_matches('/'));
        Ok(state.files.contains_key(path) || state.files.keys().any(|k| k.starts_with(&dir)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODIFY: &str = "--- a/src/a.php\n+++ b/src/a.php\n@@ -1,2 +1,2 @@\n <?php\n-return 1;\n+return 2;\n";
    const CREATE: &str = "--- /dev/null\n+++ b/src/new.php\n@@ -0,0 +1,2 @@\n+<?php\n+return 3;\n";

    fn sandbox() -> MemorySandbox {
        MemorySandbox::new().with_file("src/a.php", "<?php\nreturn 1;\n")
    }

    #[tokio::test]
    async fn test_apply_modifies_and_creates() {
        let sb = sandbox();
        assert_eq!(sb.apply_patch(MODIFY, 1).await.unwrap(), ApplyOutcome::Applied);
        assert_eq!(sb.apply_patch(CREATE, 1).await.unwrap(), ApplyOutcome::Applied);
        assert_eq!(sb.file("src/a.php").unwrap(), "<?php\nreturn 2;\n");
        assert_eq!(sb.file("src/new.php").unwrap(), "<?php\nreturn 3;\n");
    }

    #[tokio::test]
    async fn test_reset_removes_patch_effects() {
        let sb = sandbox();
        sb.apply_patch(CREATE, 1).await.unwrap();
        sb.reset().await.unwrap();
        assert!(sb.file("src/new.php").is_none());
        assert!(sb.matches_baseline());
    }

    #[tokio::test]
    async fn test_wrong_strip_level_reports_missing_file() {
        let sb = sandbox();
        let outcome = sb.apply_patch(MODIFY, 0).await.unwrap();
        assert!(
            matches!(outcome, ApplyOutcome::Rejected(r) if r.contains("No such file or directory"))
        );
        assert!(sb.matches_baseline());
    }

    #[tokio::test]
    async fn test_context_mismatch_is_atomic_rejection() {
        let sb = sandbox();
        let bad = format!("{CREATE}--- a/src/a.php\n+++ b/src/a.php\n@@ -1 +1 @@\n-nope\n+yes\n");
        let outcome = sb.apply_patch(&bad, 1).await.unwrap();
        assert!(matches!(outcome, ApplyOutcome::Rejected(r) if r.contains("patch does not apply")));
        assert!(sb.file("src/new.php").is_none());
    }

    #[tokio::test]
    async fn test_handlers_can_mutate_tree() {
        let sb = sandbox().on_command("touch", |_, tree| {
            tree.insert("marker".into(), Vec::new());
            Ok(ExecOutput::default())
        });
        sb.exec("touch marker", Duration::from_secs(1)).await.unwrap();
        assert!(sb.exists("marker").await.unwrap());
        assert!(sb.exists("src").await.unwrap());
        assert!(!sb.exists("vendor").await.unwrap());
    }
}
