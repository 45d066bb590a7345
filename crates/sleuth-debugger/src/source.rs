use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sleuth_common::{Error, Result};
use tracing::debug;

use sleuth_common::paths::absolute_path;

/// Default search radius for [`SourceProvider::remap_line_by_snippet`].
pub const REMAP_RADIUS: u32 = 80;

/// A 1-based inclusive window of a file.
#[derive(Debug, Clone, Serialize)]
pub struct SourceWindow {
    pub filename: String,
    pub start_line: u32,
    pub end_line: u32,
    pub total_lines: u32,
    pub lines: BTreeMap<u32, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineRange {
    pub start_line: u32,
    pub end_line: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnippetMatches {
    pub filename: String,
    pub snippet_lines: u32,
    pub match_count: usize,
    pub matches: Vec<LineRange>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteReport {
    pub filename: String,
    pub status: &'static str,
    pub bytes_written: usize,
    pub lines_written: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplaceReport {
    pub filename: String,
    pub replacements: usize,
    pub status: &'static str,
    pub bytes_written: usize,
    pub lines_written: usize,
}

/// Reads and edits source files by absolute path.
#[derive(Debug, Clone, Default)]
pub struct SourceProvider;

impl SourceProvider {
    pub fn new() -> Self {
        Self
    }

    fn resolve(&self, filename: &str) -> Result<PathBuf> {
        let path = absolute_path(filename);
        if !path.is_file() {
            return Err(Error::Debugger(format!("File not found: {}", path.display())));
        }
        Ok(path)
    }

    fn read_lines(&self, path: &Path) -> Result<Vec<String>> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Debugger(format!("Could not read file: {e}")))?;
        Ok(text.lines().map(str::to_string).collect())
    }

    /// Lines `start..=end` of `filename`, clamped to the file.
    pub fn read_range(&self, filename: &str, start: u32, end: Option<u32>) -> Result<SourceWindow> {
        let path = self.resolve(filename)?;
        let lines = self.read_lines(&path)?;
        let total = lines.len() as u32;
        let start = start.max(1);
        let end = end.unwrap_or(total).min(total);

        let window = (start..=end)
            .filter_map(|n| lines.get(n as usize - 1).map(|text| (n, text.clone())))
            .collect();

        Ok(SourceWindow {
            filename: path.to_string_lossy().into_owned(),
            start_line: start,
            end_line: end,
            total_lines: total,
            lines: window,
        })
    }

    /// `context` lines either side of `center`.
    pub fn window_around(&self, filename: &str, center: u32, context: u32) -> Result<SourceWindow> {
        self.read_range(
            filename,
            center.saturating_sub(context).max(1),
            Some(center + context),
        )
    }

    pub fn line_text(&self, filename: &str, line: u32) -> Option<String> {
        if line == 0 {
            return None;
        }
        let path = self.resolve(filename).ok()?;
        let lines = self.read_lines(&path).ok()?;
        lines.get(line as usize - 1).cloned()
    }

    pub fn line_count(&self, filename: &str) -> Result<u32> {
        let path = self.resolve(filename)?;
        Ok(self.read_lines(&path)?.len() as u32)
    }

    /// Locate `snippet` in the file: exact multi-line matches first, then
    /// whitespace-insensitive block matches, then (for one-line snippets)
    /// lines containing the stripped text.
    pub fn find_snippet_lines(&self, filename: &str, snippet: &str) -> Result<SnippetMatches> {
        let path = self.resolve(filename)?;
        let normalized = snippet.trim_matches('\n');
        if normalized.trim().is_empty() {
            return Err(Error::Validation("Snippet is empty".into()));
        }
        let source = self.read_lines(&path)?;
        let wanted: Vec<&str> = normalized.lines().collect();
        let n = wanted.len();

        let mut matches = block_matches(&source, &wanted, |have, want| have == want);
        if matches.is_empty() {
            matches = block_matches(&source, &wanted, |have, want| have.trim() == want.trim());
        }
        if matches.is_empty() && n == 1 {
            let needle = wanted[0].trim();
            matches = source
                .iter()
                .enumerate()
                .filter(|(_, line)| line.contains(needle))
                .map(|(i, _)| LineRange {
                    start_line: i as u32 + 1,
                    end_line: i as u32 + 1,
                })
                .collect();
        }

        Ok(SnippetMatches {
            filename: path.to_string_lossy().into_owned(),
            snippet_lines: n as u32,
            match_count: matches.len(),
            matches,
        })
    }

    /// Best-effort relocation of a line by its remembered text: the preferred
    /// line if it still matches, else the first match within `radius`, else
    /// the first match anywhere. An empty snippet keeps the preferred line.
    pub fn remap_line_by_snippet(
        &self,
        filename: &str,
        preferred: u32,
        snippet: &str,
        radius: u32,
    ) -> Option<u32> {
        let path = self.resolve(filename).ok()?;
        let target = snippet.trim();
        if target.is_empty() {
            return Some(preferred);
        }
        let lines = self.read_lines(&path).ok()?;
        let total = lines.len() as u32;
        let matches = |n: u32| lines[n as usize - 1].trim() == target;

        if (1..=total).contains(&preferred) && matches(preferred) {
            return Some(preferred);
        }
        let start = preferred.saturating_sub(radius).max(1);
        let end = preferred.saturating_add(radius).min(total);
        if let Some(n) = (start..=end).find(|&n| matches(n)) {
            return Some(n);
        }
        (1..=total).find(|&n| matches(n))
    }

    /// Replace a file's whole content via a temporary sibling and rename.
    pub fn write_file_source(
        &self,
        filename: &str,
        content: &str,
        create_if_missing: bool,
    ) -> Result<WriteReport> {
        let path = absolute_path(filename);
        let exists = path.is_file();
        if !exists && !create_if_missing {
            return Err(Error::Debugger(format!("File not found: {}", path.display())));
        }
        let lines_written = content.lines().count();
        let display = path.to_string_lossy().into_owned();

        if exists {
            let old = fs::read_to_string(&path).map_err(|e| {
                Error::Debugger(format!("Could not read file before writing: {e}"))
            })?;
            if old == content {
                return Ok(WriteReport {
                    filename: display,
                    status: "no_change",
                    bytes_written: 0,
                    lines_written,
                });
            }
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "source".to_string());
        let tmp = path.with_file_name(format!(".{file_name}.sleuth-tmp"));
        fs::write(&tmp, content)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|e| {
                let _ = fs::remove_file(&tmp);
                Error::Debugger(format!("Could not write file: {e}"))
            })?;
        let target = &display;
        debug!("wrote {} bytes to {}", content.len(), target);

        Ok(WriteReport {
            filename: display,
            status: if exists { "updated" } else { "created" },
            bytes_written: content.len(),
            lines_written,
        })
    }

    /// Replace occurrences of `old_text`; `max_replacements < 0` means all.
    pub fn replace_text_in_file(
        &self,
        filename: &str,
        old_text: &str,
        new_text: &str,
        max_replacements: i64,
    ) -> Result<ReplaceReport> {
        let path = self.resolve(filename)?;
        let content = fs::read_to_string(&path)
            .map_err(|e| Error::Debugger(format!("Could not read file: {e}")))?;
        if old_text.is_empty() {
            return Err(Error::Validation("old_text must be non-empty".into()));
        }
        let available = content.matches(old_text).count();
        if available == 0 {
            return Err(Error::Debugger(format!(
                "old_text not found in file: {}",
                path.display()
            )));
        }
        if max_replacements == 0 {
            return Err(Error::Validation("max_replacements cannot be 0".into()));
        }

        let (updated, replacements) = if max_replacements < 0 {
            (content.replace(old_text, new_text), available)
        } else {
            let n = (max_replacements as usize).min(available);
            (content.replacen(old_text, new_text, n), n)
        };

        let written = self.write_file_source(&path.to_string_lossy(), &updated, false)?;
        Ok(ReplaceReport {
            filename: written.filename,
            replacements,
            status: written.status,
            bytes_written: written.bytes_written,
            lines_written: written.lines_written,
        })
    }
}

fn block_matches(
    source: &[String],
    wanted: &[&str],
    same: impl Fn(&str, &str) -> bool,
) -> Vec<LineRange> {
    let n = wanted.len();
    if n == 0 || source.len() < n {
        return Vec::new();
    }
    (0..=source.len() - n)
        .filter(|&i| {
            source[i..i + n]
                .iter()
                .zip(wanted)
                .all(|(have, want)| same(have.as_str(), *want))
        })
        .map(|i| LineRange {
            start_line: i as u32 + 1,
            end_line: (i + n) as u32,
        })
        .collect()
}
