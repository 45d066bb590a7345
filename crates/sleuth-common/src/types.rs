use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// A position in the target program: absolute file path, 1-based line, and
/// the name of the enclosing function (`<module>` at top level).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub function: String,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32, function: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            function: function.into(),
        }
    }

    pub fn basename(&self) -> &str {
        Path::new(&self.file)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.file)
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} in {}", self.file, self.line, self.function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basename_strips_directories() {
        let loc = SourceLocation::new("/work/app/a.py", 3, "main");
        assert_eq!(loc.basename(), "a.py");
        assert_eq!(loc.to_string(), "/work/app/a.py:3 in main");
    }
}
