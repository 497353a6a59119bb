//! Multi-root join.
//!
//! Each configured root contributes the files matching its glob or literal
//! subpaths. A matched file is rewritten to its tail (the components from
//! the root's relative path index on) and linked under the output root at
//! that tail. Without an `outer_join` root the output is the union of every
//! matched tail. When one root is marked `outer_join`, only files whose join
//! key was also matched in that root survive. A tail claimed twice must
//! resolve to the same file.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use datum_core::listing::list_files;
use datum_core::path::{components, subpath};
use datum_core::{PathError, Settings};
use glob::{MatchOptions, Pattern};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{RecordError, StageError};
use crate::stage::{Stage, StageContext, StageReport};

/// Default join key: the datum prefix of a canonical tail,
/// `<source-type>/<yyyy>/<mm>/<dd>/<location>`.
pub const DEFAULT_JOIN_INDICES: [usize; 5] = [0, 1, 2, 3, 4];

/// One input root of a join.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinRoot {
    pub name: String,
    pub path: PathBuf,
    /// Glob over paths relative to `path`.
    #[serde(default)]
    pub glob_pattern: Option<String>,
    /// Literal relative subpaths (files or directory prefixes).
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    #[serde(default)]
    pub outer_join: bool,
    /// Leading components dropped when rewriting; falls back to
    /// `RELATIVE_PATH_INDEX`.
    #[serde(default)]
    pub relative_path_index: Option<usize>,
    /// Tail components forming the join key.
    #[serde(default)]
    pub join_indices: Option<Vec<usize>>,
}

/// Parse the `JOIN_CONFIG` document: a YAML list of roots.
pub fn parse_join_config(text: &str) -> Result<Vec<JoinRoot>, StageError> {
    serde_yaml::from_str(text).map_err(|e| StageError::BadConfig {
        message: format!("JOIN_CONFIG: {e}"),
    })
}

/// A root with its pattern compiled.
#[derive(Debug, Clone)]
struct CompiledRoot {
    root: JoinRoot,
    pattern: Option<Pattern>,
    relative_path_index: usize,
    join_indices: Vec<usize>,
}

impl CompiledRoot {
    fn matches(&self, relative: &Path) -> bool {
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        if self.pattern.is_none() && self.root.paths.is_empty() {
            return true;
        }
        self.pattern
            .as_ref()
            .is_some_and(|p| p.matches_path_with(relative, options))
            || self.root.paths.iter().any(|p| relative.starts_with(p))
    }

    fn join_key(&self, tail: &Path) -> Result<Vec<String>, PathError> {
        let parts = components(tail)?;
        self.join_indices
            .iter()
            .map(|&i| {
                parts.get(i).cloned().ok_or_else(|| {
                    PathError::bad(tail, format!("no component {i} for the join key"))
                })
            })
            .collect()
    }
}

/// A file matched in one root.
#[derive(Debug, Clone)]
struct Matched {
    source: PathBuf,
    tail: PathBuf,
    /// Join key, only computed when an outer root filters the join.
    key: Option<Vec<String>>,
}

/// Joins several input roots into one output tree.
#[derive(Debug, Clone)]
pub struct Joiner {
    roots: Vec<JoinRoot>,
    relative_path_index: usize,
    out_path: PathBuf,
}

impl Joiner {
    pub fn new(roots: Vec<JoinRoot>, relative_path_index: usize, out_path: PathBuf) -> Self {
        Self {
            roots,
            relative_path_index,
            out_path,
        }
    }

    /// Check every root before any output is written.
    async fn compile(&self) -> Result<Vec<CompiledRoot>, StageError> {
        if self.roots.is_empty() {
            return Err(StageError::BadConfig {
                message: "JOIN_CONFIG names no input roots".into(),
            });
        }
        let outer = self.roots.iter().filter(|r| r.outer_join).count();
        if outer > 1 {
            return Err(StageError::BadConfig {
                message: format!("{outer} roots are marked outer_join, at most one is allowed"),
            });
        }

        let mut compiled = Vec::with_capacity(self.roots.len());
        for root in &self.roots {
            if !tokio::fs::metadata(&root.path).await.is_ok_and(|m| m.is_dir()) {
                return Err(StageError::MissingInput {
                    path: root.path.clone(),
                });
            }
            let pattern = root
                .glob_pattern
                .as_deref()
                .map(|p| {
                    Pattern::new(p).map_err(|source| StageError::BadGlob {
                        pattern: p.to_string(),
                        source,
                    })
                })
                .transpose()?;
            compiled.push(CompiledRoot {
                root: root.clone(),
                pattern,
                relative_path_index: root.relative_path_index.unwrap_or(self.relative_path_index),
                join_indices: root
                    .join_indices
                    .clone()
                    .unwrap_or_else(|| DEFAULT_JOIN_INDICES.to_vec()),
            });
        }
        Ok(compiled)
    }
}

async fn discover(
    root: CompiledRoot,
    keyed: bool,
    stage: &'static str,
) -> Result<(StageReport, Vec<Matched>), StageError> {
    let mut report = StageReport::default();
    let mut matched = Vec::new();

    for relative in list_files(&root.root.path).await? {
        if !root.matches(&relative) {
            continue;
        }
        let rewritten = subpath(&relative, root.relative_path_index).and_then(|tail| {
            let key = if keyed { Some(root.join_key(&tail)?) } else { None };
            Ok((tail, key))
        });
        match rewritten {
            Ok((tail, key)) => matched.push(Matched {
                source: root.root.path.join(&relative),
                tail,
                key,
            }),
            Err(e) => report.skip(stage, &RecordError::from(e)),
        }
    }

    debug!(root = %root.root.name, matched = matched.len(), "Discovered join inputs");
    Ok((report, matched))
}

async fn same_file(a: &Path, b: &Path) -> bool {
    match (tokio::fs::canonicalize(a).await, tokio::fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

impl Stage for Joiner {
    const NAME: &'static str = "join";

    fn from_settings(settings: &Settings) -> Result<Self, StageError> {
        let raw = settings.require("JOIN_CONFIG")?;
        // Either inline YAML or the path of a YAML file.
        let roots = if Path::new(raw).is_file() {
            let text = std::fs::read_to_string(raw).map_err(|source| StageError::Io {
                path: raw.into(),
                source,
            })?;
            parse_join_config(&text)?
        } else {
            parse_join_config(raw)?
        };
        Ok(Self::new(
            roots,
            settings.index_or("RELATIVE_PATH_INDEX", 0)?,
            settings.path("OUT_PATH")?,
        ))
    }

    async fn run(self, ctx: StageContext) -> Result<StageReport, StageError> {
        let compiled = self.compile().await?;
        let outer_root = compiled.iter().position(|r| r.root.outer_join);

        let mut discovery = ctx.fan_out::<(usize, StageReport, Vec<Matched>)>("join_discovery");
        let keyed = outer_root.is_some();
        for (i, root) in compiled.into_iter().enumerate() {
            let stage = ctx.stage();
            discovery.spawn(async move {
                let (report, matched) = discover(root, keyed, stage).await?;
                Ok((i, report, matched))
            });
        }

        let mut report = StageReport::default();
        let mut per_root = discovery.join().await?;
        per_root.sort_by_key(|(i, _, _)| *i);
        for (_, partial, _) in &per_root {
            report.merge(*partial);
        }

        let outer_keys: Option<HashSet<Vec<String>>> = outer_root.map(|o| {
            per_root
                .iter()
                .filter(|(i, _, _)| *i == o)
                .flat_map(|(_, _, matched)| matched.iter().filter_map(|m| m.key.clone()))
                .collect()
        });

        let mut links: BTreeMap<PathBuf, PathBuf> = BTreeMap::new();
        for (_, _, matched) in per_root {
            for m in matched {
                if let Some(keys) = &outer_keys {
                    if !m.key.as_ref().is_some_and(|key| keys.contains(key)) {
                        continue;
                    }
                }
                match links.get(&m.tail) {
                    None => {
                        links.insert(m.tail, m.source);
                    }
                    Some(existing) if same_file(existing, &m.source).await => {}
                    Some(existing) => {
                        return Err(StageError::LinkConflict {
                            link: self.out_path.join(&m.tail),
                            existing: existing.clone(),
                            requested: m.source,
                        });
                    }
                }
            }
        }
        info!(links = links.len(), outer_join = outer_root.is_some(), "Materializing join");

        let mut tasks = ctx.fan_out::<StageReport>("join_link");
        for (tail, source) in links {
            let linker = ctx.linker;
            let link = self.out_path.join(tail);
            tasks.spawn(async move {
                let mut report = StageReport::default();
                report.record_link(linker.link(&source, &link).await?);
                Ok(report)
            });
        }
        for partial in tasks.join().await? {
            report.merge(partial);
        }
        Ok(report)
    }
}
