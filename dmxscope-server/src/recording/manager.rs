//! Recording file management.
//!
//! Names, lists and resolves .dmxrec files in the recordings directory.

use log::{debug, error};
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use dmxscope_core::Protocol;

use crate::error::DmxError;

use super::file_format::RecordingHeader;

/// Default recordings directory inside the platform data dir
pub fn default_recordings_dir() -> PathBuf {
    directories::ProjectDirs::from("org", "dmxscope", "dmxscope")
        .map(|dirs| dirs.data_dir().join("recordings"))
        .unwrap_or_else(|| PathBuf::from("./recordings"))
}

/// Information about a recording file
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingInfo {
    /// Filename (without path)
    pub filename: String,
    /// Full path to the file
    #[serde(skip_serializing)]
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Transport the recording was captured from
    pub protocol: Protocol,
    /// Universe number, in the protocol's own numbering
    pub universe: u16,
    /// Recording duration in milliseconds
    pub duration_ms: u64,
    /// Number of frames
    pub frame_count: u32,
    /// Recording start time (Unix timestamp ms)
    pub start_time: i64,
    /// File modification time (Unix timestamp ms)
    pub modified_ms: u64,
}

/// Manager for recording files
pub struct RecordingManager {
    base_dir: PathBuf,
}

impl RecordingManager {
    /// Open a manager over the given directory, creating it if needed
    pub fn new(base_dir: PathBuf) -> Self {
        if let Err(e) = fs::create_dir_all(&base_dir) {
            error!("Failed to create recordings directory: {}", e);
        } else {
            debug!("Recordings directory: {}", base_dir.display());
        }
        // Resolve symlinks once so the escape checks compare real paths
        let base_dir = base_dir.canonicalize().unwrap_or(base_dir);
        Self { base_dir }
    }

    /// Get the base directory path
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// List all recordings, newest first
    pub fn list_recordings(&self) -> Vec<RecordingInfo> {
        let mut recordings = Vec::new();

        if let Ok(entries) = fs::read_dir(&self.base_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_file() {
                    if let Some(ext) = path.extension() {
                        if ext == "dmxrec" {
                            if let Some(info) = self.get_recording_info(&path) {
                                recordings.push(info);
                            }
                        }
                    }
                }
            }
        }

        // Sort by modification time, newest first
        recordings.sort_by(|a, b| b.modified_ms.cmp(&a.modified_ms));

        recordings
    }

    /// Get information about a specific recording. Files whose header does
    /// not parse are skipped.
    pub fn get_recording_info(&self, path: &Path) -> Option<RecordingInfo> {
        let filename = path.file_name()?.to_str()?.to_string();

        let metadata = fs::metadata(path).ok()?;
        let size = metadata.len();
        let modified_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let file = File::open(path).ok()?;
        let mut reader = BufReader::new(file);
        let header = RecordingHeader::read(&mut reader).ok()?;

        Some(RecordingInfo {
            filename,
            path: path.to_path_buf(),
            size,
            protocol: header.protocol,
            universe: header.universe,
            duration_ms: header.duration_ms as u64,
            frame_count: header.frame_count,
            start_time: header.start_time,
            modified_ms,
        })
    }

    /// Resolve a recording name to a path inside the recordings directory.
    /// A bare name gets the .dmxrec extension appended.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, DmxError> {
        let mut path = self.base_dir.join(name);
        if !path.exists() && path.extension().is_none() {
            path.set_extension("dmxrec");
        }

        if !path.exists() {
            return Err(DmxError::RecordingNotFound(name.to_string()));
        }
        if !self.is_safe_path(&path) {
            return Err(DmxError::UnsafePath(name.to_string()));
        }
        Ok(path)
    }

    /// Path for a new recording with the given name
    pub fn create_path(&self, name: &str) -> Result<PathBuf, DmxError> {
        // Ensure the filename ends with .dmxrec
        let name = if name.ends_with(".dmxrec") {
            name.to_string()
        } else {
            format!("{}.dmxrec", name)
        };

        let path = self.base_dir.join(&name);
        if !self.is_safe_path(&path) {
            return Err(DmxError::UnsafePath(name));
        }
        Ok(path)
    }

    /// Generate a unique filename for a new recording
    pub fn generate_filename(&self, protocol: Protocol, universe: u16) -> String {
        let now = chrono::Utc::now();
        let base_name = format!("{}_u{}_{}", protocol, universe, now.format("%Y%m%d_%H%M%S"));

        // Find a unique name
        let mut name = format!("{}.dmxrec", base_name);
        let mut counter = 1;
        while self.base_dir.join(&name).exists() {
            name = format!("{}_{}.dmxrec", base_name, counter);
            counter += 1;
        }

        name
    }

    /// Check if a path is safely within our base directory
    fn is_safe_path(&self, path: &Path) -> bool {
        match path.canonicalize() {
            Ok(canonical) => canonical.starts_with(&self.base_dir),
            Err(_) => {
                // Path doesn't exist yet, check parent
                if let Some(parent) = path.parent() {
                    match parent.canonicalize() {
                        Ok(canonical_parent) => canonical_parent.starts_with(&self.base_dir),
                        Err(_) => false,
                    }
                } else {
                    false
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::file_format::{FrameEncoder, RecordingWriter};
    use dmxscope_core::DMX_CHANNELS;
    use tempfile::TempDir;

    fn create_test_manager() -> (RecordingManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("recordings");
        let manager = RecordingManager::new(base);
        (manager, temp_dir)
    }

    fn write_recording(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let header = RecordingHeader::new(Protocol::Sacn, 7, 1_700_000_000_000);
        let mut writer = RecordingWriter::new(File::create(&path).unwrap(), header).unwrap();
        let mut encoder = FrameEncoder::new();
        let mut channels = [0u8; DMX_CHANNELS];
        channels[0] = 42;
        writer
            .write_frame(&encoder.encode(&channels, 0).unwrap())
            .unwrap();
        writer.finish(1500).unwrap();
        path
    }

    #[test]
    fn test_list_reads_headers_and_skips_junk() {
        let (manager, _temp) = create_test_manager();
        write_recording(manager.base_dir(), "show.dmxrec");
        fs::write(manager.base_dir().join("junk.dmxrec"), b"not a recording").unwrap();
        fs::write(manager.base_dir().join("notes.txt"), b"ignored").unwrap();

        let recordings = manager.list_recordings();
        assert_eq!(recordings.len(), 1);
        let info = &recordings[0];
        assert_eq!(info.filename, "show.dmxrec");
        assert_eq!(info.protocol, Protocol::Sacn);
        assert_eq!(info.universe, 7);
        assert_eq!(info.duration_ms, 1500);
        assert_eq!(info.frame_count, 1);
        assert_eq!(info.start_time, 1_700_000_000_000);
    }

    #[test]
    fn test_info_serializes_without_path() {
        let (manager, _temp) = create_test_manager();
        let path = write_recording(manager.base_dir(), "show.dmxrec");

        let info = manager.get_recording_info(&path).unwrap();
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["filename"], "show.dmxrec");
        assert_eq!(json["durationMs"], 1500);
        assert_eq!(json["frameCount"], 1);
        assert!(json.get("path").is_none());
    }

    #[test]
    fn test_resolve_appends_extension() {
        let (manager, _temp) = create_test_manager();
        let written = write_recording(manager.base_dir(), "show.dmxrec");

        assert_eq!(manager.resolve("show").unwrap(), written);
        assert_eq!(manager.resolve("show.dmxrec").unwrap(), written);
    }

    #[test]
    fn test_resolve_missing_file() {
        let (manager, _temp) = create_test_manager();
        let err = manager.resolve("nothing").unwrap_err();
        assert!(matches!(err, DmxError::RecordingNotFound(_)));
    }

    #[test]
    fn test_resolve_rejects_escape() {
        let (manager, temp) = create_test_manager();
        // A real file one level above the recordings directory
        fs::write(temp.path().join("evil.dmxrec"), b"outside").unwrap();

        let err = manager.resolve("../evil.dmxrec").unwrap_err();
        assert!(matches!(err, DmxError::UnsafePath(_)));
    }

    #[test]
    fn test_create_path_rejects_escape() {
        let (manager, _temp) = create_test_manager();
        let err = manager.create_path("../evil").unwrap_err();
        assert!(matches!(err, DmxError::UnsafePath(_)));

        let ok = manager.create_path("fine").unwrap();
        assert_eq!(ok, manager.base_dir().join("fine.dmxrec"));
    }

    #[test]
    fn test_generate_filename() {
        let (manager, _temp) = create_test_manager();

        let name1 = manager.generate_filename(Protocol::Artnet, 3);
        assert!(name1.starts_with("artnet_u3_"));
        assert!(name1.ends_with(".dmxrec"));

        // Create the file
        fs::write(manager.base_dir().join(&name1), b"test").unwrap();

        // Next name should be different (with counter)
        let name2 = manager.generate_filename(Protocol::Artnet, 3);
        assert_ne!(name1, name2);
    }
}
