use std::collections::BTreeSet;

use sleuth_common::paths::{absolute_string, basename};

/// Allow-list of files and function names where pauses are observable.
/// Both sets empty means pause anywhere.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FocusFilter {
    files: BTreeSet<String>,
    functions: BTreeSet<String>,
}

impl FocusFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_files<I, S>(&mut self, files: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.files = files
            .into_iter()
            .map(|f| absolute_string(f.as_ref()))
            .collect();
    }

    pub fn set_functions<I, S>(&mut self, functions: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.functions = functions.into_iter().map(Into::into).collect();
    }

    pub fn add_file(&mut self, file: &str) {
        self.files.insert(absolute_string(file));
    }

    pub fn add_function(&mut self, function: impl Into<String>) {
        self.functions.insert(function.into());
    }

    pub fn clear(&mut self) {
        self.files.clear();
        self.functions.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.functions.is_empty()
    }

    pub fn files(&self) -> Vec<String> {
        self.files.iter().cloned().collect()
    }

    pub fn functions(&self) -> Vec<String> {
        self.functions.iter().cloned().collect()
    }

    /// Whether a stop at `file` inside `function` may pause. Files match by
    /// absolute path or by basename.
    pub fn allows(&self, file: &str, function: &str) -> bool {
        if self.is_empty() {
            return true;
        }
        if !self.files.is_empty() {
            let file = absolute_string(file);
            if self.files.contains(&file) {
                return true;
            }
            let base = basename(&file);
            if self.files.iter().any(|f| basename(f) == base) {
                return true;
            }
        }
        self.functions.contains(function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_allows_everything() {
        assert!(FocusFilter::new().allows("/x/b.py", "main"));
    }

    #[test]
    fn file_focus_matches_by_basename() {
        let mut focus = FocusFilter::new();
        focus.set_files(["a.py"]);
        assert!(focus.allows("/somewhere/else/a.py", "f"));
        assert!(!focus.allows("/somewhere/else/b.py", "f"));
    }

    #[test]
    fn function_focus_is_a_union_with_files() {
        let mut focus = FocusFilter::new();
        focus.set_files(["/p/a.py"]);
        focus.add_function("helper");
        assert!(focus.allows("/p/b.py", "helper"));
        assert!(!focus.allows("/p/b.py", "other"));
        focus.clear();
        assert!(focus.is_empty());
    }
}
