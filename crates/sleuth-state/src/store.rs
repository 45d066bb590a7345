//! Filesystem-backed checkpoint storage: one JSON file per save.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Utc;
use ring::digest::{SHA1_FOR_LEGACY_USE_ONLY, SHA256, digest};
use serde::Serialize;
use sleuth_common::paths::absolute_string;
use sleuth_common::{Error, Result};
use tracing::{debug, info, warn};

use crate::models::{SCHEMA_VERSION, StateEnvelope, StateKind};

/// A state read back from disk, with non-fatal compatibility warnings.
#[derive(Debug, Clone)]
pub struct LoadedState {
    pub state: StateEnvelope,
    pub path: PathBuf,
    pub warnings: Vec<String>,
    /// The script's content changed since the state was saved.
    pub code_drift: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateListing {
    pub path: String,
    pub kind: StateKind,
    pub name: Option<String>,
    pub created_at: String,
    pub script_path: String,
    pub model: String,
    pub reason: String,
}

pub struct StateStore {
    dir: PathBuf,
    max_auto_per_script: usize,
}

impl StateStore {
    pub fn open(dir: impl Into<PathBuf>, max_auto_per_script: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            Error::State(format!("failed to create state dir {}: {e}", dir.display()))
        })?;
        debug!("state store at {}", dir.display());
        Ok(Self {
            dir,
            max_auto_per_script,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_auto_per_script(&self) -> usize {
        self.max_auto_per_script
    }

    /// Write a rolling auto-save. File names group by script and sort by time.
    pub fn save_auto(&self, state: &StateEnvelope) -> Result<PathBuf> {
        let key = script_key(&state.meta.script_path);
        let path = self
            .dir
            .join(format!("auto_{key}_{}.json", timestamp_token()));
        self.write_state(&path, state)?;
        Ok(path)
    }

    /// Write a named save that is never pruned.
    pub fn save_manual(&self, name: &str, mut state: StateEnvelope) -> Result<PathBuf> {
        let name = if name.trim().is_empty() { "manual" } else { name };
        state.name = Some(name.to_string());
        state.kind = StateKind::Manual;
        let path = self
            .dir
            .join(format!("manual_{}_{}.json", slug(name), timestamp_token()));
        self.write_state(&path, &state)?;
        info!("saved manual state '{}' to {}", name, path.display());
        Ok(path)
    }

    /// Resolve `selector` for `script_path`.
    ///
    /// `latest` is the newest state for the script. Anything else is tried
    /// as a file path, then as a manual save name for the script.
    pub fn load(&self, selector: &str, script_path: &str, model: Option<&str>) -> Result<LoadedState> {
        let selector = match selector.trim() {
            "" => "latest",
            s => s,
        };
        let script_abs = absolute_string(script_path);

        let path = if selector == "latest" {
            let entries = self.list_states(Some(&script_abs));
            let Some(first) = entries.first() else {
                return Err(Error::State(format!(
                    "No compatible state found for script: {script_abs}"
                )));
            };
            PathBuf::from(&first.path)
        } else if Path::new(selector).is_file() {
            PathBuf::from(selector)
        } else {
            self.find_named(selector, &script_abs)
                .ok_or_else(|| Error::State(format!("State not found: {selector}")))?
        };

        let state = read_state(&path).ok_or_else(|| {
            Error::State(format!("Could not parse state file: {}", path.display()))
        })?;

        let mut warnings = Vec::new();
        if absolute_string(&state.meta.script_path) != script_abs {
            warnings.push(
                "Saved state script_path does not match current script path. \
                 Restore will proceed best-effort."
                    .to_string(),
            );
        }
        if let Some(model) = model
            && state.meta.model != model
        {
            warnings.push(format!(
                "Saved model '{}' differs from current model '{}'.",
                state.meta.model, model
            ));
        }
        let current_hash = script_hash(Path::new(&script_abs));
        let code_drift = !current_hash.is_empty()
            && !state.meta.script_hash.is_empty()
            && current_hash != state.meta.script_hash;
        if code_drift {
            warnings.push(
                "Script hash mismatch (code drift detected). Breakpoints will be remapped best-effort."
                    .to_string(),
            );
        }
        if state.meta.schema_version < SCHEMA_VERSION {
            debug!(
                "upgrading state schema v{} from {}",
                state.meta.schema_version,
                path.display()
            );
        }

        Ok(LoadedState {
            state,
            path,
            warnings,
            code_drift,
        })
    }

    /// States in the directory, newest first, optionally for one script.
    pub fn list_states(&self, script_path: Option<&str>) -> Vec<StateListing> {
        let script_abs = script_path.map(absolute_string);
        let mut found: Vec<(SystemTime, StateListing)> = Vec::new();

        for path in self.json_files("") {
            let Some(state) = read_state(&path) else {
                continue;
            };
            if let Some(script) = &script_abs
                && absolute_string(&state.meta.script_path) != *script
            {
                continue;
            }
            found.push((
                modified(&path),
                StateListing {
                    path: path.to_string_lossy().into_owned(),
                    kind: state.kind,
                    name: state.name,
                    created_at: state.meta.created_at,
                    script_path: state.meta.script_path,
                    model: state.meta.model,
                    reason: state.reason,
                },
            ));
        }

        found.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| b.1.created_at.cmp(&a.1.created_at))
        });
        found.into_iter().map(|(_, listing)| listing).collect()
    }

    /// Delete auto-saves for `script_path` beyond the newest `keep`.
    pub fn prune_auto(&self, script_path: &str, keep: Option<usize>) -> usize {
        let keep = keep.unwrap_or(self.max_auto_per_script);
        let script_abs = absolute_string(script_path);
        let mut autos: Vec<(SystemTime, String, PathBuf)> = self
            .json_files("auto_")
            .into_iter()
            .filter_map(|path| {
                let state = read_state(&path)?;
                (absolute_string(&state.meta.script_path) == script_abs)
                    .then(|| (modified(&path), state.meta.created_at, path))
            })
            .collect();
        autos.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

        let mut deleted = 0;
        for (_, _, path) in autos.into_iter().skip(keep) {
            match fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(e) => warn!("failed to prune {}: {e}", path.display()),
            }
        }
        if deleted > 0 {
            debug!("pruned {deleted} auto states for {script_abs}");
        }
        deleted
    }

    fn find_named(&self, name: &str, script_abs: &str) -> Option<PathBuf> {
        self.list_states(Some(script_abs))
            .into_iter()
            .find(|entry| entry.name.as_deref() == Some(name))
            .map(|entry| PathBuf::from(entry.path))
    }

    fn json_files(&self, prefix: &str) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension().is_some_and(|ext| ext == "json")
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(prefix))
            })
            .collect()
    }

    fn write_state(&self, path: &Path, state: &StateEnvelope) -> Result<()> {
        let text = serde_json::to_string_pretty(state)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, text)
            .and_then(|()| fs::rename(&tmp, path))
            .map_err(|e| Error::State(format!("failed to write {}: {e}", path.display())))?;
        debug!("wrote state {} ({})", path.display(), state.reason);
        Ok(())
    }
}

fn read_state(path: &Path) -> Option<StateEnvelope> {
    let text = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(state) => Some(state),
        Err(e) => {
            debug!("skipping unreadable state {}: {e}", path.display());
            None
        }
    }
}

fn modified(path: &Path) -> SystemTime {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// SHA-256 hex of the file's bytes, or `""` when it cannot be read.
pub fn script_hash(path: &Path) -> String {
    match fs::read(path) {
        Ok(bytes) => hex(digest(&SHA256, &bytes).as_ref()),
        Err(_) => String::new(),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn timestamp_token() -> String {
    Utc::now().format("%Y%m%dT%H%M%S%6fZ").to_string()
}

/// Keep alphanumerics, `-` and `_`; anything else becomes `-`.
fn slug(value: &str) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '-' || c == '_');
    if cleaned.is_empty() {
        "state".to_string()
    } else {
        cleaned.to_string()
    }
}

/// `<stem>_<first 8 hex of sha1(abs path)>`.
fn script_key(script_path: &str) -> String {
    let path = Path::new(script_path);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("script");
    let abs = absolute_string(script_path);
    let digest = hex(digest(&SHA1_FOR_LEGACY_USE_ONLY, abs.as_bytes()).as_ref());
    format!("{}_{}", slug(stem), &digest[..8])
}
