use std::path::{Component, Path, PathBuf};

/// Lexically absolute form of `path`: joined onto the working directory with
/// `.` and `..` collapsed. Symlinks are left alone.
pub fn absolute_path(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// [`absolute_path`] rendered as a string, the form used for breakpoint keys
/// and on the wire.
pub fn absolute_string(path: impl AsRef<Path>) -> String {
    absolute_path(path).to_string_lossy().into_owned()
}

pub fn basename(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}
