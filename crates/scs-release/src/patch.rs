//! Minimal unified-diff application for per-environment template patches.
//! Hunks must apply exactly where they claim to: context or removal lines
//! that do not match the base are a hard failure, never a fuzzy match.

use scs_core::error::{Result, ScsError};

#[derive(Debug)]
struct Hunk {
    old_start: usize,
    lines: Vec<HunkLine>,
}

#[derive(Debug)]
enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

/// Apply a unified context diff to `base`, returning the patched text.
pub fn apply(base: &str, patch: &str) -> Result<String> {
    let hunks = parse(patch)?;
    let base_lines: Vec<&str> = base.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(base_lines.len());
    let mut cursor = 0usize; // next unconsumed base line

    for (i, hunk) in hunks.iter().enumerate() {
        let start = hunk.old_start.saturating_sub(1);
        if start < cursor || start > base_lines.len() {
            return Err(ScsError::template(format!(
                "patch hunk {} targets line {} out of order",
                i + 1,
                hunk.old_start
            )));
        }
        out.extend(base_lines[cursor..start].iter().map(|s| s.to_string()));
        cursor = start;

        for line in &hunk.lines {
            match line {
                HunkLine::Context(text) => {
                    if base_lines.get(cursor) != Some(&text.as_str()) {
                        return Err(hunk_mismatch(i, cursor, text, base_lines.get(cursor)));
                    }
                    out.push(text.clone());
                    cursor += 1;
                }
                HunkLine::Remove(text) => {
                    if base_lines.get(cursor) != Some(&text.as_str()) {
                        return Err(hunk_mismatch(i, cursor, text, base_lines.get(cursor)));
                    }
                    cursor += 1;
                }
                HunkLine::Add(text) => out.push(text.clone()),
            }
        }
    }

    out.extend(base_lines[cursor..].iter().map(|s| s.to_string()));
    let mut text = out.join("\n");
    if base.ends_with('\n') || !text.is_empty() {
        text.push('\n');
    }
    Ok(text)
}

fn hunk_mismatch(hunk: usize, line: usize, expected: &str, found: Option<&&str>) -> ScsError {
    ScsError::template(format!(
        "patch hunk {} does not apply at line {}: expected '{}', found '{}'",
        hunk + 1,
        line + 1,
        expected,
        found.copied().unwrap_or("<eof>")
    ))
}

fn parse(patch: &str) -> Result<Vec<Hunk>> {
    let mut hunks = Vec::new();
    let mut current: Option<Hunk> = None;

    for line in patch.lines() {
        if line.starts_with("--- ") || line.starts_with("+++ ") || line.starts_with("diff ") {
            continue;
        }
        if let Some(header) = line.strip_prefix("@@") {
            if let Some(hunk) = current.take() {
                hunks.push(hunk);
            }
            current = Some(Hunk {
                old_start: parse_header(header)?,
                lines: Vec::new(),
            });
            continue;
        }
        let Some(hunk) = current.as_mut() else {
            if line.trim().is_empty() {
                continue;
            }
            return Err(ScsError::template(format!(
                "patch content before first hunk header: '{}'",
                line
            )));
        };
        if let Some(text) = line.strip_prefix('+') {
            hunk.lines.push(HunkLine::Add(text.to_string()));
        } else if let Some(text) = line.strip_prefix('-') {
            hunk.lines.push(HunkLine::Remove(text.to_string()));
        } else if let Some(text) = line.strip_prefix(' ') {
            hunk.lines.push(HunkLine::Context(text.to_string()));
        } else if line == "\\ No newline at end of file" || line.is_empty() {
            // tolerated; trailing-newline handling is normalized on output
        } else {
            return Err(ScsError::template(format!("unparseable patch line: '{}'", line)));
        }
    }
    if let Some(hunk) = current.take() {
        hunks.push(hunk);
    }
    if hunks.is_empty() {
        return Err(ScsError::template("patch contains no hunks"));
    }
    Ok(hunks)
}

/// Pull the old-file start line out of `` -l,s +l,s @@``.
fn parse_header(header: &str) -> Result<usize> {
    let bad = || ScsError::template(format!("bad hunk header '@@{}'", header));
    let minus = header.split_whitespace().find(|p| p.starts_with('-')).ok_or_else(bad)?;
    let start = minus[1..].split(',').next().ok_or_else(bad)?;
    start.parse().map_err(|_| bad())
}
