//! Configuration path types for multi-file loading.

use std::path::{Path, PathBuf};

/// A configuration source - either a single file or a directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigPath {
    /// A single configuration file.
    File(PathBuf),
    /// A directory containing configuration files.
    Dir(PathBuf),
}

impl ConfigPath {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn dir(path: impl Into<PathBuf>) -> Self {
        Self::Dir(path.into())
    }

    /// Combine config file paths and config directory paths into a single list.
    ///
    /// Files come first, then directories, preserving order within each group.
    pub fn from_cli_args(config_files: &[PathBuf], config_dirs: &[PathBuf]) -> Vec<Self> {
        config_files
            .iter()
            .map(ConfigPath::file)
            .chain(config_dirs.iter().map(ConfigPath::dir))
            .collect()
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::File(p) | Self::Dir(p) => p,
        }
    }
}

/// Check if a path has a YAML extension.
pub fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == "yaml" || ext == "yml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yaml_file() {
        assert!(is_yaml_file(Path::new("stage.yaml")));
        assert!(is_yaml_file(Path::new("stage.yml")));
        assert!(!is_yaml_file(Path::new("stage.toml")));
        assert!(!is_yaml_file(Path::new("yaml")));
    }

    #[test]
    fn test_from_cli_args_orders_files_first() {
        let paths = ConfigPath::from_cli_args(
            &[PathBuf::from("a.yaml")],
            &[PathBuf::from("conf.d"), PathBuf::from("more.d")],
        );
        assert_eq!(
            paths,
            vec![
                ConfigPath::file("a.yaml"),
                ConfigPath::dir("conf.d"),
                ConfigPath::dir("more.d"),
            ]
        );
        assert_eq!(paths[1].path(), Path::new("conf.d"));
    }
}
