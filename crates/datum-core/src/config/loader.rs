//! Multi-file settings loading.

use std::path::Path;

use tracing::debug;

use crate::config::{ConfigPath, RECOGNIZED_KEYS, Settings, interpolate, is_yaml_file};
use crate::error::ConfigError;

/// Load and merge settings from every file and directory in `paths`.
///
/// Errors from all sources are collected before failing so a broken deploy
/// reports every problem at once.
pub fn load_from_paths(paths: &[ConfigPath]) -> Result<Settings, ConfigError> {
    let mut settings = Settings::new();
    let mut errors = Vec::new();

    for path in paths {
        let loaded = match path {
            ConfigPath::File(file) => load_file(file),
            ConfigPath::Dir(dir) => load_dir(dir),
        };
        match loaded {
            Ok(partial) => {
                if let Err(e) = settings.merge(partial) {
                    errors.push(format!("{}: {}", path.path().display(), e));
                }
            }
            Err(e) => errors.push(format!("{}: {}", path.path().display(), e)),
        }
    }

    if !errors.is_empty() {
        return Err(ConfigError::MultipleErrors { errors });
    }
    Ok(settings)
}

/// Override settings with recognised keys found in `vars`.
///
/// Unrecognised variables are ignored so a full process environment can be
/// passed straight in.
pub fn overlay_env<I, K, V>(settings: &mut Settings, vars: I) -> usize
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    let mut applied = 0;
    for (key, value) in vars {
        let key = key.as_ref();
        if RECOGNIZED_KEYS.contains(&key) {
            debug!(key, "Setting taken from environment");
            settings.insert(key, value);
            applied += 1;
        }
    }
    applied
}

fn load_file(path: &Path) -> Result<Settings, ConfigError> {
    if !is_yaml_file(path) {
        return Err(ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        });
    }

    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;

    let result = interpolate(&contents);
    if !result.is_ok() {
        return Err(ConfigError::EnvInterpolation {
            message: result.errors.join("\n"),
        });
    }

    Settings::parse_yaml(&result.text)
}

fn load_dir(dir: &Path) -> Result<Settings, ConfigError> {
    let mut settings = Settings::new();
    let mut errors = Vec::new();

    let mut files: Vec<_> = std::fs::read_dir(dir)
        .map_err(|source| ConfigError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_yaml_file(path))
        .collect();

    files.sort();

    for path in files {
        match load_file(&path) {
            Ok(partial) => {
                if let Err(e) = settings.merge(partial) {
                    errors.push(format!("{}: {}", path.display(), e));
                }
            }
            Err(e) => errors.push(format!("{}: {}", path.display(), e)),
        }
    }

    if !errors.is_empty() {
        return Err(ConfigError::MultipleErrors { errors });
    }
    Ok(settings)
}
