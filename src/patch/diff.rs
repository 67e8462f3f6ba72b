//! Unified diff parsing.
//!
//! The parser is deliberately lenient about hunk line counts (the sandbox
//! applies with `--recount`) but strict about structure: hunk headers must
//! be well formed and must follow a `---`/`+++` file header pair.

use std::sync::OnceLock;

use regex::Regex;

const DEV_NULL: &str = "/dev/null";

fn hunk_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("valid hunk header regex")
    })
}

/// One line of a hunk body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Removed(String),
    Added(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub new_start: usize,
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    /// Lines the hunk expects to find in the original file.
    pub fn old_lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|l| match l {
            HunkLine::Context(s) | HunkLine::Removed(s) => Some(s.as_str()),
            HunkLine::Added(_) => None,
        })
    }

    /// Lines the hunk leaves behind.
    pub fn new_lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|l| match l {
            HunkLine::Context(s) | HunkLine::Added(s) => Some(s.as_str()),
            HunkLine::Removed(_) => None,
        })
    }
}

/// All hunks touching one file. `None` paths stand for `/dev/null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub hunks: Vec<Hunk>,
}

impl FilePatch {
    pub fn is_creation(&self) -> bool {
        self.old_path.is_none()
    }

    pub fn is_deletion(&self) -> bool {
        self.new_path.is_none()
    }

    /// Path as written in the diff, preferring the post-image.
    pub fn target_path(&self) -> Option<&str> {
        self.new_path.as_deref().or(self.old_path.as_deref())
    }
}

/// Why a diff could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffError {
    /// No hunk header anywhere in the text.
    NoHunks,
    /// Structurally broken; carries a human-readable reason.
    Malformed(String),
}

/// Strips `strip` leading components from a diff path, as `patch -pN` does.
///
/// Returns `None` when the path has fewer components than requested.
pub fn strip_path(path: &str, strip: usize) -> Option<String> {
    let mut rest = path;
    for _ in 0..strip {
        let idx = rest.find('/')?;
        rest = rest[idx + 1..].trim_start_matches('/');
    }
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}

/// Parses the path part of a `---`/`+++` header line.
fn header_path(rest: &str) -> Option<String> {
    // Drop trailing timestamps: "path\t2024-01-01 ..."
    let path = rest.split('\t').next().unwrap_or(rest).trim_end();
    let path = path.trim_matches('"');
    if path == DEV_NULL {
        None
    } else {
        Some(path.to_string())
    }
}

fn parse_hunk_header(line: &str) -> Result<(usize, usize), DiffError> {
    let caps = hunk_header_re()
        .captures(line)
        .ok_or_else(|| DiffError::Malformed(format!("bad hunk header: {line}")))?;
    let num = |i: usize| {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<usize>().ok())
            .unwrap_or(0)
    };
    Ok((num(1), num(3)))
}

/// Parses a normalized unified diff into per-file patches.
pub fn parse(diff: &str) -> Result<Vec<FilePatch>, DiffError> {
    if !diff.lines().any(|l| l.starts_with("@@")) {
        return Err(DiffError::NoHunks);
    }

    let lines: Vec<&str> = diff.lines().collect();
    let mut files: Vec<FilePatch> = Vec::new();
    let mut current: Option<FilePatch> = None;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if let Some(rest) = line.strip_prefix("--- ") {
            let next = lines.get(i + 1).copied().unwrap_or("");
            let Some(new_rest) = next.strip_prefix("+++ ") else {
                return Err(DiffError::Malformed(format!(
                    "file header '{line}' is not followed by a '+++' line"
                )));
            };
            if let Some(done) = current.take() {
                files.push(done);
            }
            current = Some(FilePatch {
                old_path: header_path(rest),
                new_path: header_path(new_rest),
                hunks: Vec::new(),
            });
            i += 2;
            continue;
        }

        if line.starts_with("@@") {
            let (old_start, new_start) = parse_hunk_header(line)?;
            let Some(file) = current.as_mut() else {
                return Err(DiffError::Malformed(format!(
                    "hunk '{line}' appears before any file header"
                )));
            };

            let mut body = Vec::new();
            i += 1;
            while i < lines.len() {
                let l = lines[i];
                if l.starts_with("@@") || l.starts_with("diff --git ") {
                    break;
                }
                if l.starts_with("--- ")
                    && lines.get(i + 1).is_some_and(|n| n.starts_with("+++ "))
                {
                    break;
                }
                match l.chars().next() {
                    Some(' ') => body.push(HunkLine::Context(l[1..].to_string())),
                    Some('+') => body.push(HunkLine::Added(l[1..].to_string())),
                    Some('-') => body.push(HunkLine::Removed(l[1..].to_string())),
                    Some('\\') => {}
                    // Editors and models routinely drop the space on blank context lines.
                    None => body.push(HunkLine::Context(String::new())),
                    Some(_) => break,
                }
                i += 1;
            }

            // Trailing blank lines belong to the surrounding text, not the hunk.
            while matches!(body.last(), Some(HunkLine::Context(s)) if s.is_empty()) {
                body.pop();
            }
            if body.is_empty() {
                return Err(DiffError::Malformed(format!("hunk '{line}' has no body")));
            }

            file.hunks.push(Hunk {
                old_start,
                new_start,
                lines: body,
            });
            continue;
        }

        i += 1;
    }

    if let Some(done) = current.take() {
        files.push(done);
    }

    if let Some(file) = files.iter().find(|f| f.hunks.is_empty() && !f.is_deletion()) {
        return Err(DiffError::Malformed(format!(
            "file header for '{}' has no hunks",
            file.target_path().unwrap_or(DEV_NULL)
        )));
    }
    if files.iter().all(|f| f.old_path.is_none() && f.new_path.is_none()) {
        return Err(DiffError::Malformed(
            "diff names no files other than /dev/null".to_string(),
        ));
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = "\
diff --git a/core/lib/Foo.php b/core/lib/Foo.php
--- a/core/lib/Foo.php
+++ b/core/lib/Foo.php
@@ -1,3 +1,3 @@
 <?php
-$a = 1;
+$a = 2;
 return $a;
";

    #[test]
    fn test_parse_single_hunk() {
        let files = parse(SIMPLE).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].old_path.as_deref(), Some("a/core/lib/Foo.php"));
        assert_eq!(files[0].hunks.len(), 1);
        let hunk = &files[0].hunks[0];
        assert_eq!(hunk.old_start, 1);
        assert_eq!(
            hunk.old_lines().collect::<Vec<_>>(),
            vec!["<?php", "$a = 1;", "return $a;"]
        );
        assert_eq!(
            hunk.new_lines().collect::<Vec<_>>(),
            vec!["<?php", "$a = 2;", "return $a;"]
        );
    }

    #[test]
    fn test_new_file_from_dev_null() {
        let diff = "--- /dev/null\n+++ b/new.txt\n@@ -0,0 +1,2 @@\n+one\n+two\n";
        let files = parse(diff).unwrap();
        assert!(files[0].is_creation());
        assert_eq!(files[0].target_path(), Some("b/new.txt"));
    }

    #[test]
    fn test_prose_only_has_no_hunks() {
        assert_eq!(
            parse("I could not find the bug, sorry.").unwrap_err(),
            DiffError::NoHunks
        );
    }

    #[test]
    fn test_hunk_without_file_header_is_malformed() {
        let err = parse("@@ -1 +1 @@\n-a\n+b\n").unwrap_err();
        assert!(matches!(err, DiffError::Malformed(r) if r.contains("before any file header")));
    }

    #[test]
    fn test_garbled_hunk_header_is_malformed() {
        let err = parse("--- a/x\n+++ b/x\n@@ -one +two @@\n-a\n+b\n").unwrap_err();
        assert!(matches!(err, DiffError::Malformed(r) if r.contains("bad hunk header")));
    }

    #[test]
    fn test_empty_hunk_body_is_malformed() {
        let err = parse("--- a/x\n+++ b/x\n@@ -1,1 +1,1 @@\n").unwrap_err();
        assert!(matches!(err, DiffError::Malformed(_)));
    }

    #[test]
    fn test_multiple_files() {
        let diff = "\
--- a/one.txt
+++ b/one.txt
@@ -1 +1 @@
-a
+b
--- a/two.txt
+++ b/two.txt
@@ -1 +1 @@
-c
+d
";
        let files = parse(diff).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].new_path.as_deref(), Some("b/two.txt"));
    }

    #[test]
    fn test_blank_context_line_without_space() {
        let diff = "--- a/x\n+++ b/x\n@@ -1,3 +1,3 @@\n a\n\n-b\n+c\n";
        let files = parse(diff).unwrap();
        assert_eq!(files[0].hunks[0].lines[1], HunkLine::Context(String::new()));
    }

    #[test]
    fn test_strip_path() {
        assert_eq!(strip_path("a/core/x.php", 1).as_deref(), Some("core/x.php"));
        assert_eq!(strip_path("core/x.php", 0).as_deref(), Some("core/x.php"));
        assert_eq!(strip_path("x.php", 1), None);
    }
}
