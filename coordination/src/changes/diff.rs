//! Per-file diffs: unified line diff plus character-level similarity

use serde::{Deserialize, Serialize};

use super::matcher::{OpTag, Opcode, SequenceMatcher};

/// Context lines around each unified diff hunk.
pub const DIFF_CONTEXT_LINES: usize = 3;

/// Follows a diff line whose source line has no trailing newline.
pub const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Added,
    Removed,
    Modified,
    Unchanged,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Removed => write!(f, "removed"),
            Self::Modified => write!(f, "modified"),
            Self::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Line counts for one file.
///
/// `additions` and `deletions` are net of `modifications`, which pairs one
/// added line with one deleted line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffStatistics {
    pub additions: usize,
    pub deletions: usize,
    pub modifications: usize,
    /// Raw added + deleted lines
    pub total_changes: usize,
    pub similarity_percentage: f64,
}

impl DiffStatistics {
    fn from_counts(added: usize, deleted: usize, similarity_ratio: f64) -> Self {
        let modifications = added.min(deleted);
        Self {
            additions: added - modifications,
            deletions: deleted - modifications,
            modifications,
            total_changes: added + deleted,
            similarity_percentage: percent(similarity_ratio),
        }
    }
}

/// Diff of one file between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDiff {
    pub filename: String,
    pub status: FileStatus,
    /// Unified diff lines without the trailing `\n`. A `\r` is kept, and a
    /// missing final newline gets a [`NO_NEWLINE_MARKER`] line. Empty for
    /// added, removed, and unchanged files.
    pub unified_diff: Vec<String>,
    /// Character-level similarity in `[0, 1]`. Only meaningful for files
    /// present on both sides.
    pub similarity_ratio: f64,
    pub statistics: DiffStatistics,
    pub old_line_count: usize,
    pub new_line_count: usize,
    pub line_change: i64,
}

impl FileDiff {
    /// Whole-file addition.
    pub fn added(filename: &str, content: &str) -> Self {
        let lines = content.lines().count();
        Self {
            filename: filename.to_string(),
            status: FileStatus::Added,
            unified_diff: Vec::new(),
            similarity_ratio: 0.0,
            statistics: DiffStatistics {
                additions: lines,
                total_changes: lines,
                ..Default::default()
            },
            old_line_count: 0,
            new_line_count: lines,
            line_change: lines as i64,
        }
    }

    /// Whole-file removal.
    pub fn removed(filename: &str, content: &str) -> Self {
        let lines = content.lines().count();
        Self {
            filename: filename.to_string(),
            status: FileStatus::Removed,
            unified_diff: Vec::new(),
            similarity_ratio: 0.0,
            statistics: DiffStatistics {
                deletions: lines,
                total_changes: lines,
                ..Default::default()
            },
            old_line_count: lines,
            new_line_count: 0,
            line_change: -(lines as i64),
        }
    }

    /// The unified diff as a single newline-terminated text.
    pub fn unified_text(&self) -> String {
        let mut text = self.unified_diff.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        text
    }
}

/// Diff two versions of one file.
///
/// Lines are compared with their terminators, so line-ending and final
/// newline edits count as changes.
pub fn generate_diff(old_content: &str, new_content: &str, filename: &str) -> FileDiff {
    let old_lines: Vec<&str> = old_content.split_inclusive('\n').collect();
    let new_lines: Vec<&str> = new_content.split_inclusive('\n').collect();

    let unified_diff = unified_diff(
        &old_lines,
        &new_lines,
        &format!("{} (old)", filename),
        &format!("{} (new)", filename),
    );
    let added = unified_diff
        .iter()
        .filter(|l| l.starts_with('+') && !l.starts_with("+++"))
        .count();
    let deleted = unified_diff
        .iter()
        .filter(|l| l.starts_with('-') && !l.starts_with("---"))
        .count();

    let similarity_ratio = similarity_ratio(old_content, new_content);
    let statistics = DiffStatistics::from_counts(added, deleted, similarity_ratio);

    FileDiff {
        filename: filename.to_string(),
        status: if statistics.total_changes > 0 {
            FileStatus::Modified
        } else {
            FileStatus::Unchanged
        },
        unified_diff,
        similarity_ratio,
        statistics,
        old_line_count: old_lines.len(),
        new_line_count: new_lines.len(),
        line_change: new_lines.len() as i64 - old_lines.len() as i64,
    }
}

/// Character-level similarity ratio in `[0, 1]`.
///
/// Heavily rearranged lines can still score high; the ratio measures how
/// much text survived, not how much the line structure changed.
pub fn similarity_ratio(old_content: &str, new_content: &str) -> f64 {
    let old: Vec<char> = old_content.chars().collect();
    let new: Vec<char> = new_content.chars().collect();
    SequenceMatcher::new(&old, &new).ratio()
}

/// Unified diff lines with `DIFF_CONTEXT_LINES` of context. Empty when the
/// inputs are identical. Input lines keep their terminators.
pub fn unified_diff(old: &[&str], new: &[&str], from_file: &str, to_file: &str) -> Vec<String> {
    let groups = SequenceMatcher::new(old, new).grouped_opcodes(DIFF_CONTEXT_LINES);
    if groups.is_empty() {
        return Vec::new();
    }

    let mut out = vec![format!("--- {}", from_file), format!("+++ {}", to_file)];
    for group in groups {
        out.push(hunk_header(&group));
        for op in group {
            let old_side = &old[op.a_start..op.a_end];
            let new_side = &new[op.b_start..op.b_end];
            match op.tag {
                OpTag::Equal => push_lines(&mut out, ' ', old_side),
                OpTag::Delete => push_lines(&mut out, '-', old_side),
                OpTag::Insert => push_lines(&mut out, '+', new_side),
                OpTag::Replace => {
                    push_lines(&mut out, '-', old_side);
                    push_lines(&mut out, '+', new_side);
                }
            }
        }
    }
    out
}

fn push_lines(out: &mut Vec<String>, prefix: char, lines: &[&str]) {
    for line in lines {
        match line.strip_suffix('\n') {
            Some(body) => out.push(format!("{prefix}{body}")),
            None => {
                out.push(format!("{prefix}{line}"));
                out.push(NO_NEWLINE_MARKER.to_string());
            }
        }
    }
}

fn hunk_header(group: &[Opcode]) -> String {
    let (first, last) = match (group.first(), group.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return "@@ -0,0 +0,0 @@".to_string(),
    };
    format!(
        "@@ -{} +{} @@",
        format_range(first.a_start, last.a_end),
        format_range(first.b_start, last.b_end)
    )
}

fn format_range(start: usize, stop: usize) -> String {
    let length = stop - start;
    match length {
        0 => format!("{},0", start),
        1 => format!("{}", start + 1),
        _ => format!("{},{}", start + 1, length),
    }
}

/// Ratio to a percentage rounded to two decimals.
pub fn percent(ratio: f64) -> f64 {
    (ratio * 10_000.0).round() / 100.0
}
