//! Scheme and recording persistence.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::recording::{parse_recording, RecordedAction};
use crate::task::Scheme;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Not found: {0}")]
    NotFound(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Get the app data directory for autotap.
pub fn get_app_data_dir() -> PathBuf {
    let base = dirs_next::data_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("autotap")
}

/// Resolves recording references for `play_recording` actions.
pub trait RecordingSource: Send + Sync {
    fn load_recording(&self, reference: &str) -> StorageResult<Vec<RecordedAction>>;
}

/// Scheme and recording files under one root directory.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Default for Storage {
    fn default() -> Self {
        Self::new(get_app_data_dir())
    }
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn schemes_dir(&self) -> PathBuf {
        self.root.join("schemes")
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.root.join("recordings")
    }

    fn ensure_dir(dir: PathBuf) -> StorageResult<PathBuf> {
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
            info!(?dir, "Created directory");
        }
        Ok(dir)
    }

    fn scheme_path(&self, name: &str) -> PathBuf {
        self.schemes_dir().join(format!("{}.json", sanitize_filename(name)))
    }

    fn recording_path(&self, name: &str) -> PathBuf {
        self.recordings_dir().join(format!("{}.json", sanitize_filename(name)))
    }

    /// Save a scheme to disk.
    pub fn save_scheme(&self, name: &str, scheme: &Scheme) -> StorageResult<PathBuf> {
        Self::ensure_dir(self.schemes_dir())?;
        let path = self.scheme_path(name);
        let json = serde_json::to_string_pretty(scheme)?;
        fs::write(&path, json)?;
        info!(?path, tasks = scheme.tasks.len(), "Saved scheme");
        Ok(path)
    }

    /// Load a scheme by name.
    pub fn load_scheme(&self, name: &str) -> StorageResult<Scheme> {
        let path = self.scheme_path(name);
        if !path.exists() {
            return Err(StorageError::NotFound(name.to_string()));
        }
        load_scheme_file(&path)
    }

    /// Delete a scheme from disk.
    pub fn delete_scheme(&self, name: &str) -> StorageResult<()> {
        let path = self.scheme_path(name);
        if !path.exists() {
            return Err(StorageError::NotFound(name.to_string()));
        }
        fs::remove_file(&path)?;
        info!(?path, "Deleted scheme");
        Ok(())
    }

    /// List saved schemes by name.
    pub fn list_schemes(&self) -> StorageResult<Vec<String>> {
        list_json_stems(&self.schemes_dir())
    }

    /// Save a recording to disk.
    pub fn save_recording(&self, name: &str, actions: &[RecordedAction]) -> StorageResult<PathBuf> {
        Self::ensure_dir(self.recordings_dir())?;
        let path = self.recording_path(name);
        save_recording_file(&path, actions)?;
        Ok(path)
    }

    /// Load a recording by name.
    pub fn load_recording(&self, name: &str) -> StorageResult<Vec<RecordedAction>> {
        let path = self.recording_path(name);
        if !path.exists() {
            return Err(StorageError::NotFound(name.to_string()));
        }
        load_recording_file(&path)
    }

    /// List saved recordings by name.
    pub fn list_recordings(&self) -> StorageResult<Vec<String>> {
        list_json_stems(&self.recordings_dir())
    }
}

/// Load a scheme from an explicit path.
pub fn load_scheme_file(path: &Path) -> StorageResult<Scheme> {
    let json = fs::read_to_string(path)?;
    let scheme: Scheme = serde_json::from_str(&json)?;
    debug!(?path, tasks = scheme.tasks.len(), "Loaded scheme");
    Ok(scheme)
}

/// Load a recording from an explicit path, normalizing legacy timestamps.
pub fn load_recording_file(path: &Path) -> StorageResult<Vec<RecordedAction>> {
    let json = fs::read_to_string(path)?;
    let actions = parse_recording(&json)?;
    debug!(?path, count = actions.len(), "Loaded recording");
    Ok(actions)
}

pub fn save_recording_file(path: &Path, actions: &[RecordedAction]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(actions)?;
    fs::write(path, json)?;
    info!(?path, count = actions.len(), "Saved recording");
    Ok(())
}

fn list_json_stems(dir: &Path) -> StorageResult<Vec<String>> {
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            if let Some(name) = path.file_stem() {
                names.push(name.to_string_lossy().to_string());
            }
        }
    }

    names.sort();
    Ok(names)
}

/// Recording source over a directory.
///
/// A reference naming an existing file is loaded from that path; anything
/// else is looked up by name inside the directory, with or without `.json`.
#[derive(Debug, Clone)]
pub struct RecordingLibrary {
    dir: PathBuf,
}

impl RecordingLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn resolve(&self, reference: &str) -> Option<PathBuf> {
        let direct = PathBuf::from(reference);
        if direct.is_file() {
            return Some(direct);
        }
        let named = self.dir.join(reference);
        if named.is_file() {
            return Some(named);
        }
        let with_ext = self.dir.join(format!("{}.json", sanitize_filename(reference)));
        with_ext.is_file().then_some(with_ext)
    }
}

impl RecordingSource for RecordingLibrary {
    fn load_recording(&self, reference: &str) -> StorageResult<Vec<RecordedAction>> {
        let path = self
            .resolve(reference)
            .ok_or_else(|| StorageError::NotFound(reference.to_string()))?;
        load_recording_file(&path)
    }
}

/// Sanitize a name to be a valid filename.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordedKind;
    use crate::task::{Task, TaskMode};

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Daily Farm"), "Daily Farm");
        assert_eq!(sanitize_filename("farm/route"), "farm_route");
        assert_eq!(sanitize_filename("a:b*c?d"), "a_b_c_d");
    }

    #[test]
    fn test_scheme_lifecycle() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Storage::new(tmp.path());

        let mut scheme = Scheme::default();
        scheme.tasks.push(Task::new("t1", "noop", TaskMode::If { if_pairs: vec![] }));

        assert_eq!(storage.list_schemes().unwrap(), Vec::<String>::new());
        let path = storage.save_scheme("arena/pvp", &scheme).unwrap();
        assert!(path.ends_with("schemes/arena_pvp.json"));
        assert_eq!(storage.list_schemes().unwrap(), vec!["arena_pvp".to_string()]);

        let loaded = storage.load_scheme("arena/pvp").unwrap();
        assert_eq!(loaded, scheme);

        storage.delete_scheme("arena/pvp").unwrap();
        assert!(matches!(storage.load_scheme("arena/pvp"), Err(StorageError::NotFound(_))));
        assert!(matches!(storage.delete_scheme("arena/pvp"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_recording_library_resolves_names_and_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Storage::new(tmp.path());
        let actions = vec![RecordedAction::instant(RecordedKind::Click { x: 3, y: 4 }, 0)];
        let path = storage.save_recording("route", &actions).unwrap();

        let library = RecordingLibrary::new(storage.recordings_dir());
        assert_eq!(library.load_recording("route").unwrap(), actions);
        assert_eq!(library.load_recording("route.json").unwrap(), actions);
        assert_eq!(library.load_recording(path.to_str().unwrap()).unwrap(), actions);
        assert!(matches!(library.load_recording("missing"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_legacy_recording_file_is_normalized() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("old.json");
        let legacy = r#"[{"type":"swipe","x1":0,"y1":0,"x2":5,"y2":5,"timestamp_ms":900,"duration":300}]"#;
        fs::write(&path, legacy).unwrap();

        let actions = load_recording_file(&path).unwrap();
        assert_eq!(actions[0].start_time_ms, 600);
        assert_eq!(actions[0].end_time_ms, 900);
    }
}
