//! Locating and normalizing a unified diff inside raw model output.

use std::sync::OnceLock;

use regex::Regex;

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*```[A-Za-z0-9_+-]*[ \t]*\n([\s\S]*?)^[ \t]*```")
            .expect("valid fence regex")
    })
}

/// True if the text contains something that looks like the start of a diff.
fn looks_like_diff(text: &str) -> bool {
    diff_start(text).is_some()
}

/// Byte offset of the earliest diff header line, if any.
///
/// `diff --git`, bare `---`/`+++` pairs and hunk headers may be mixed in one
/// completion; the diff starts at whichever comes first.
fn diff_start(text: &str) -> Option<usize> {
    let mut offset = 0;
    let mut first_git_header = None;
    let mut first_file_header = None;
    let mut first_hunk = None;
    let lines: Vec<&str> = text.split_inclusive('\n').collect();

    for (i, line) in lines.iter().enumerate() {
        if first_git_header.is_none() && line.starts_with("diff --git ") {
            first_git_header = Some(offset);
        }
        if first_file_header.is_none()
            && line.starts_with("--- ")
            && lines.get(i + 1).is_some_and(|n| n.starts_with("+++ "))
        {
            first_file_header = Some(offset);
        }
        if first_hunk.is_none() && line.starts_with("@@") {
            first_hunk = Some(offset);
        }
        offset += line.len();
    }

    [first_git_header, first_file_header, first_hunk]
        .into_iter()
        .flatten()
        .min()
}

fn is_diff_body_line(line: &str) -> bool {
    line.is_empty()
        || line.starts_with(' ')
        || line.starts_with('+')
        || line.starts_with('-')
        || line.starts_with('\\')
        || line.starts_with("@@")
}

/// Extracts the diff from a model completion.
///
/// Accepts raw diffs, diffs wrapped in code fences and diffs surrounded by
/// prose. Returns `None` if nothing resembling a diff is present. The result
/// has LF line endings and ends with a newline.
pub fn extract_diff(raw: &str) -> Option<String> {
    let text = raw.replace("\r\n", "\n");

    let fenced = fence_re()
        .captures_iter(&text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .find(|block| looks_like_diff(block));
    let body = fenced.unwrap_or(&text);

    let start = diff_start(body)?;
    let mut lines: Vec<&str> = body[start..].lines().collect();

    // Trailing prose or an unmatched closing fence after the last hunk.
    while lines.last().is_some_and(|l| {
        !is_diff_body_line(l) || l.trim().is_empty() || l.trim_start().starts_with("```")
    }) {
        lines.pop();
    }
    if lines.is_empty() {
        return None;
    }

    let mut diff = lines.join("\n");
    diff.push('\n');
    Some(diff)
}

/// Pairs of (`---` path, `+++` path) header lines with their line index.
fn file_headers<'a>(lines: &[&'a str]) -> Vec<(usize, &'a str, &'a str)> {
    lines
        .windows(2)
        .enumerate()
        .filter_map(|(i, pair)| {
            let old = pair[0].strip_prefix("--- ")?;
            let new = pair[1].strip_prefix("+++ ")?;
            Some((i, old, new))
        })
        .collect()
}

fn bare_path(p: &str) -> &str {
    p.split('\t').next().unwrap_or(p).trim()
}

fn with_prefix(marker: &str, prefix: &str, path: &str) -> String {
    if bare_path(path) == "/dev/null" {
        format!("{marker}{path}")
    } else {
        format!("{marker}{prefix}{path}")
    }
}

/// Rewrites bare `---`/`+++` paths to the conventional `a/` and `b/` form.
///
/// Only applies when no path in the diff already carries a prefix; mixed
/// diffs are returned untouched and left to the strip-level fallback.
pub fn normalize_prefixes(diff: &str) -> String {
    let lines: Vec<&str> = diff.lines().collect();
    let headers = file_headers(&lines);

    let paths: Vec<&str> = headers
        .iter()
        .flat_map(|(_, old, new)| [bare_path(old), bare_path(new)])
        .filter(|p| *p != "/dev/null")
        .collect();
    let has_prefix = |p: &&str| p.starts_with("a/") || p.starts_with("b/");
    if paths.is_empty() || paths.iter().any(has_prefix) {
        return diff.to_string();
    }

    let mut out = String::with_capacity(diff.len() + paths.len() * 2);
    let mut headers = headers.into_iter().peekable();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if let Some((_, old, new)) = headers.next_if(|(idx, _, _)| *idx == i) {
            out.push_str(&with_prefix("--- ", "a/", old));
            out.push('\n');
            out.push_str(&with_prefix("+++ ", "b/", new));
            out.push('\n');
            i += 2;
            continue;
        }
        if let Some(rest) = line.strip_prefix("diff --git ") {
            let parts: Vec<&str> = rest.split_whitespace().collect();
            match parts.as_slice() {
                [old, new] => out.push_str(&format!("diff --git a/{old} b/{new}")),
                _ => out.push_str(line),
            }
        } else {
            out.push_str(line);
        }
        out.push('\n');
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFF: &str = "diff --git a/x.php b/x.php\n--- a/x.php\n+++ b/x.php\n@@ -1 +1 @@\n-a\n+b\n";

    #[test]
    fn test_raw_diff_passes_through() {
        assert_eq!(extract_diff(DIFF).unwrap(), DIFF);
    }

    #[test]
    fn test_fenced_diff_with_prose() {
        let raw = format!("Here is the fix:\n\n```diff\n{DIFF}```\n\nThis changes a to b.");
        assert_eq!(extract_diff(&raw).unwrap(), DIFF);
    }

    #[test]
    fn test_prose_before_unfenced_diff() {
        let raw = format!("The issue is in x.php.\n{DIFF}");
        assert_eq!(extract_diff(&raw).unwrap(), DIFF);
    }

    #[test]
    fn test_crlf_and_missing_trailing_newline() {
        let raw = DIFF.trim_end().replace('\n', "\r\n");
        assert_eq!(extract_diff(&raw).unwrap(), DIFF);
    }

    #[test]
    fn test_no_diff_returns_none() {
        assert!(extract_diff("I am unable to help with that.").is_none());
        assert!(extract_diff("```php\n<?php echo 1;\n```").is_none());
    }

    #[test]
    fn test_skips_non_diff_fence() {
        let raw = format!("```php\n<?php\n```\nand the patch:\n```\n{DIFF}```");
        assert_eq!(extract_diff(&raw).unwrap(), DIFF);
    }

    #[test]
    fn test_bare_header_before_git_header_is_kept() {
        let raw = "Two files change.\n\
                   --- a/one.php\n+++ b/one.php\n@@ -1 +1 @@\n-a\n+b\n\
                   diff --git a/two.php b/two.php\n--- a/two.php\n+++ b/two.php\n@@ -1 +1 @@\n-c\n+d\n";
        let out = extract_diff(raw).unwrap();
        assert!(out.starts_with("--- a/one.php\n"));
        assert!(out.contains("diff --git a/two.php b/two.php\n"));
        assert!(out.ends_with("+d\n"));
    }

    #[test]
    fn test_git_header_before_bare_header_starts_at_git() {
        let raw = format!("{DIFF}--- a/y.php\n+++ b/y.php\n@@ -1 +1 @@\n-c\n+d\n");
        let out = extract_diff(&raw).unwrap();
        assert!(out.starts_with("diff --git a/x.php b/x.php\n"));
        assert!(out.contains("+++ b/y.php\n"));
    }

    #[test]
    fn test_normalize_bare_paths() {
        let bare = "--- core/x.php\n+++ core/x.php\n@@ -1 +1 @@\n-a\n+b\n";
        assert_eq!(
            normalize_prefixes(bare),
            "--- a/core/x.php\n+++ b/core/x.php\n@@ -1 +1 @@\n-a\n+b\n"
        );
    }

    #[test]
    fn test_normalize_keeps_dev_null_and_removed_lines() {
        let bare = "--- /dev/null\n+++ new.txt\n@@ -0,0 +1 @@\n+--- not a header\n";
        let normalized = normalize_prefixes(bare);
        assert!(normalized.starts_with("--- /dev/null\n+++ b/new.txt\n"));
        assert!(normalized.contains("+--- not a header"));
    }

    #[test]
    fn test_normalize_leaves_prefixed_diff_alone() {
        assert_eq!(normalize_prefixes(DIFF), DIFF);
    }
}
