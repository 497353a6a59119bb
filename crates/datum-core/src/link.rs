//! Output materialisation.
//!
//! Every output the stages produce is either a link back to an existing
//! input file, a zero-byte empty marker, or a small text file. Links are
//! created only if absent; an existing link to the same file is a no-op and
//! an existing link to a different file is a [`LinkError::Conflict`].
//! Filesystem errors are retried once before being reported.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::emit;
use crate::error::LinkError;
use crate::metrics::events::{EmptyMarkersWritten, LinksCreated};

/// How outputs refer back to their inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkMode {
    /// Symbolic links to the absolute input path.
    #[default]
    Symlink,
    /// Byte copies, for outputs mounted where links cannot cross devices.
    Copy,
}

/// Whether a call changed the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Created,
    Unchanged,
}

impl LinkOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, LinkOutcome::Created)
    }
}

/// Creates links, markers and text outputs for one stage.
#[derive(Debug, Clone, Copy)]
pub struct Linker {
    mode: LinkMode,
    stage: &'static str,
}

impl Linker {
    pub fn new(mode: LinkMode, stage: &'static str) -> Self {
        Self { mode, stage }
    }

    pub fn mode(&self) -> LinkMode {
        self.mode
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    /// Make `link` refer to `target`.
    ///
    /// In copy mode an existing output with the same bytes is unchanged.
    pub async fn link(&self, target: &Path, link: &Path) -> Result<LinkOutcome, LinkError> {
        self.link_with(target, link, self.mode == LinkMode::Copy).await
    }

    /// Make `link` refer to `target`, accepting any existing output with the
    /// same bytes whatever the mode.
    ///
    /// For per-location files such as `thresholds.json` that neighbouring
    /// datums hold as separate copies.
    pub async fn link_equivalent(
        &self,
        target: &Path,
        link: &Path,
    ) -> Result<LinkOutcome, LinkError> {
        self.link_with(target, link, true).await
    }

    async fn link_with(
        &self,
        target: &Path,
        link: &Path,
        compare_contents: bool,
    ) -> Result<LinkOutcome, LinkError> {
        let target = std::path::absolute(target).map_err(|source| LinkError::Io {
            path: target.to_path_buf(),
            source,
        })?;

        match fs::metadata(&target).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(LinkError::NotAFile { target }),
        }

        if let Some(parent) = link.parent() {
            self.ensure_dir(parent).await?;
        }

        let created = retry_once(|| self.create(&target, link)).await;
        match created {
            Ok(()) => {
                debug!(stage = self.stage, link = %link.display(), target = %target.display(), "Linked");
                emit!(LinksCreated {
                    count: 1,
                    stage: self.stage,
                });
                Ok(LinkOutcome::Created)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                self.check_existing(&target, link, compare_contents).await
            }
            Err(source) => Err(LinkError::Io {
                path: link.to_path_buf(),
                source,
            }),
        }
    }

    /// Create `dir` and its parents.
    pub async fn ensure_dir(&self, dir: &Path) -> Result<(), LinkError> {
        retry_once(|| fs::create_dir_all(dir))
            .await
            .map_err(|source| LinkError::Io {
                path: dir.to_path_buf(),
                source,
            })
    }

    /// Write a zero-byte marker at `path` unless one is already there.
    pub async fn touch_empty(&self, path: &Path) -> Result<LinkOutcome, LinkError> {
        if let Some(parent) = path.parent() {
            self.ensure_dir(parent).await?;
        }

        let opened = retry_once(|| async move {
            fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .await
        })
        .await;

        match opened {
            Ok(_) => {
                emit!(EmptyMarkersWritten {
                    count: 1,
                    stage: self.stage,
                });
                Ok(LinkOutcome::Created)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                match fs::metadata(path).await {
                    Ok(meta) if meta.is_file() && meta.len() == 0 => Ok(LinkOutcome::Unchanged),
                    _ => Err(LinkError::Conflict {
                        link: path.to_path_buf(),
                        existing: path.to_path_buf(),
                        requested: PathBuf::from("<empty marker>"),
                    }),
                }
            }
            Err(source) => Err(LinkError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Write `contents` to `path`, replacing any previous file.
    pub async fn write_text(&self, path: &Path, contents: &str) -> Result<(), LinkError> {
        if let Some(parent) = path.parent() {
            self.ensure_dir(parent).await?;
        }
        retry_once(|| fs::write(path, contents.as_bytes()))
            .await
            .map_err(|source| LinkError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    async fn create(&self, target: &Path, link: &Path) -> io::Result<()> {
        match self.mode {
            LinkMode::Symlink => symlink(target, link).await,
            LinkMode::Copy => {
                let mut src = fs::File::open(target).await?;
                let mut dst = fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(link)
                    .await?;
                tokio::io::copy(&mut src, &mut dst).await?;
                dst.flush().await
            }
        }
    }

    async fn check_existing(
        &self,
        target: &Path,
        link: &Path,
        compare_contents: bool,
    ) -> Result<LinkOutcome, LinkError> {
        let existing = match fs::canonicalize(link).await {
            Ok(path) => path,
            Err(_) => {
                // Dangling link left by an earlier run.
                let existing = fs::read_link(link).await.unwrap_or_else(|_| link.to_path_buf());
                return Err(LinkError::Conflict {
                    link: link.to_path_buf(),
                    existing,
                    requested: target.to_path_buf(),
                });
            }
        };

        let requested = fs::canonicalize(target)
            .await
            .map_err(|source| LinkError::Io {
                path: target.to_path_buf(),
                source,
            })?;

        let same = existing == requested
            || (compare_contents && same_contents(&existing, &requested).await);

        if same {
            Ok(LinkOutcome::Unchanged)
        } else {
            warn!(
                stage = self.stage,
                link = %link.display(),
                existing = %existing.display(),
                requested = %requested.display(),
                "Output already refers to a different file"
            );
            Err(LinkError::Conflict {
                link: link.to_path_buf(),
                existing,
                requested,
            })
        }
    }
}

#[cfg(unix)]
async fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    fs::symlink(target, link).await
}

#[cfg(windows)]
async fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    fs::symlink_file(target, link).await
}

async fn same_contents(a: &Path, b: &Path) -> bool {
    match (fs::metadata(a).await, fs::metadata(b).await) {
        (Ok(ma), Ok(mb)) if ma.len() == mb.len() => {}
        _ => return false,
    }
    match (fs::read(a).await, fs::read(b).await) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

/// Run `op`, retrying once unless the path already exists.
async fn retry_once<F, Fut, T>(op: F) -> io::Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    match op().await {
        Err(e) if e.kind() != io::ErrorKind::AlreadyExists => {
            debug!(error = %e, "Retrying filesystem operation");
            op().await
        }
        result => result,
    }
}
