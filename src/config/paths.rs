//! Cross-platform runtime paths using the `dirs` crate.
//!
//! Layout:
//!
//! Config dir (settings):
//!   Windows: %APPDATA%\speech-runtime\
//!   macOS:   ~/Library/Application Support/speech-runtime/
//!   Linux:   ~/.config/speech-runtime/
//!
//! Downloads dir (synthesized clips saved to disk):
//!   Windows: %LOCALAPPDATA%\speech-runtime\downloads\
//!   macOS:   ~/Library/Application Support/speech-runtime/downloads/
//!   Linux:   ~/.local/share/speech-runtime/downloads/

use std::path::{Path, PathBuf};

/// Holds all resolved runtime directory/file paths.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    /// Directory for `settings.toml`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Default directory for downloaded clips.
    pub downloads_dir: PathBuf,
}

impl RuntimePaths {
    const APP_NAME: &'static str = "speech-runtime";

    /// Resolves all paths using the `dirs` crate, falling back to the
    /// current directory when the platform has no standard location.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        Self {
            settings_file: config_dir.join("settings.toml"),
            config_dir,
            downloads_dir: data_dir.join("downloads"),
        }
    }

    /// Resolve a download target: absolute paths are kept, relative ones
    /// land in `downloads_dir`.
    pub fn download_path(&self, name: impl AsRef<Path>) -> PathBuf {
        let name = name.as_ref();
        if name.is_absolute() {
            name.to_path_buf()
        } else {
            self.downloads_dir.join(name)
        }
    }
}

impl Default for RuntimePaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_non_empty() {
        let paths = RuntimePaths::new();
        assert!(paths.config_dir.to_str().is_some_and(|s| !s.is_empty()));
        assert!(paths.downloads_dir.ends_with("downloads"));
        assert!(paths
            .settings_file
            .file_name()
            .is_some_and(|n| n == "settings.toml"));
        assert!(paths.config_dir.ends_with("speech-runtime"));
    }

    #[test]
    fn download_path_resolution() {
        let paths = RuntimePaths::new();
        assert_eq!(
            paths.download_path("clip.mp3"),
            paths.downloads_dir.join("clip.mp3")
        );

        let abs = std::env::temp_dir().join("clip.wav");
        assert_eq!(paths.download_path(&abs), abs);
    }
}
