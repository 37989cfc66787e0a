//! Where the runtime keeps its files: project root discovery, the state
//! directory layout, and readiness checks before a query touches the store.

use std::env;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::config::render_default_config;

pub const MIGRATIONS_POLICY_MESSAGE: &str =
    "Run `wikiquery db migrate` to apply pending schema migrations.";

pub const STATE_DIR_NAME: &str = ".wikiquery";
pub const DB_FILENAME: &str = "wikiquery.db";
pub const CONFIG_FILENAME: &str = "config.toml";

const PROJECT_ROOT_ENV: &str = "WIKIQUERY_PROJECT_ROOT";
const DATA_DIR_ENV: &str = "WIKIQUERY_DATA_DIR";
const CONFIG_ENV: &str = "WIKIQUERY_CONFIG";

/// How a path was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathOrigin {
    Flag,
    Env,
    /// An ancestor of the cwd or executable already holding a state dir.
    Ancestor,
    /// No marker found; the cwd itself.
    Cwd,
    Default,
}

impl fmt::Display for PathOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Ancestor => "ancestor",
            Self::Cwd => "cwd",
            Self::Default => "default",
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub executable_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        Ok(Self {
            cwd: env::current_dir().context("cannot read the current directory")?,
            executable_dir: env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathOrigins {
    pub project_root: PathOrigin,
    pub data_dir: PathOrigin,
    pub config: PathOrigin,
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub origins: PathOrigins,
}

impl ResolvedPaths {
    /// `key=value` lines describing every resolved path and where it came from.
    pub fn diagnostics(&self) -> String {
        let entries = [
            ("project_root", &self.project_root, Some(self.origins.project_root)),
            ("state_dir", &self.state_dir, None),
            ("data_dir", &self.data_dir, Some(self.origins.data_dir)),
            ("db_path", &self.db_path, None),
            ("config_path", &self.config_path, Some(self.origins.config)),
        ];
        let mut lines: Vec<String> = entries
            .into_iter()
            .map(|(key, path, origin)| match origin {
                Some(origin) => format!("{key}={} ({origin})", display_path(path)),
                None => format!("{key}={}", display_path(path)),
            })
            .collect();
        lines.push(format!("policy={MIGRATIONS_POLICY_MESSAGE}"));
        lines.join("\n")
    }
}

pub fn resolve_paths(context: &ResolutionContext, overrides: &PathOverrides) -> ResolvedPaths {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

/// Flag beats environment beats default. Relative data and config paths are
/// anchored at the project root; a relative root at the cwd.
pub fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> ResolvedPaths
where
    F: Fn(&str) -> Option<String>,
{
    let env_path = |key: &str| {
        lookup_env(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
    };
    let pick = |flag: Option<&Path>, key: &str, base: &Path| {
        if let Some(path) = flag {
            Some((anchor(path, base), PathOrigin::Flag))
        } else {
            env_path(key).map(|path| (anchor(&path, base), PathOrigin::Env))
        }
    };

    let (project_root, root_origin) = pick(
        overrides.project_root.as_deref(),
        PROJECT_ROOT_ENV,
        &context.cwd,
    )
    .unwrap_or_else(|| {
        match find_initialized_root(&context.cwd, context.executable_dir.as_deref()) {
            Some(root) => (root, PathOrigin::Ancestor),
            None => (context.cwd.clone(), PathOrigin::Cwd),
        }
    });

    let state_dir = project_root.join(STATE_DIR_NAME);
    let (data_dir, data_origin) = pick(overrides.data_dir.as_deref(), DATA_DIR_ENV, &project_root)
        .unwrap_or_else(|| (state_dir.join("data"), PathOrigin::Default));
    let (config_path, config_origin) = pick(overrides.config.as_deref(), CONFIG_ENV, &project_root)
        .unwrap_or_else(|| (state_dir.join(CONFIG_FILENAME), PathOrigin::Default));

    debug!(
        project_root = %display_path(&project_root),
        origin = %root_origin,
        "resolved project root"
    );
    ResolvedPaths {
        db_path: data_dir.join(DB_FILENAME),
        project_root,
        state_dir,
        data_dir,
        config_path,
        origins: PathOrigins {
            project_root: root_origin,
            data_dir: data_origin,
            config: config_origin,
        },
    }
}

/// Nearest directory holding a state dir, searching the cwd's ancestors and
/// then the executable's.
fn find_initialized_root(cwd: &Path, executable_dir: Option<&Path>) -> Option<PathBuf> {
    cwd.ancestors()
        .chain(executable_dir.into_iter().flat_map(Path::ancestors))
        .find(|candidate| candidate.join(STATE_DIR_NAME).is_dir())
        .map(Path::to_path_buf)
}

fn anchor(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn display_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub state_dir_exists: bool,
    pub data_dir_exists: bool,
    pub db_exists: bool,
    pub db_size_bytes: Option<u64>,
    pub config_exists: bool,
    pub warnings: Vec<String>,
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> Result<RuntimeStatus> {
    let db_size_bytes = match fs::metadata(&paths.db_path) {
        Ok(metadata) => Some(metadata.len()),
        Err(error) if error.kind() == ErrorKind::NotFound => None,
        Err(error) => {
            return Err(error)
                .with_context(|| format!("cannot stat {}", display_path(&paths.db_path)));
        }
    };
    let state_dir_exists = paths.state_dir.is_dir();
    let config_exists = paths.config_path.is_file();

    let checks = [
        (
            state_dir_exists,
            format!("{STATE_DIR_NAME}/ not found; run `wikiquery init`"),
        ),
        (
            db_size_bytes.is_some(),
            format!("no database yet; {MIGRATIONS_POLICY_MESSAGE}"),
        ),
        (
            config_exists,
            format!("{CONFIG_FILENAME} not found; built-in limits apply"),
        ),
    ];
    let warnings = checks
        .into_iter()
        .filter(|(ok, _)| !ok)
        .map(|(_, warning)| warning)
        .collect();

    Ok(RuntimeStatus {
        state_dir_exists,
        data_dir_exists: paths.data_dir.is_dir(),
        db_exists: db_size_bytes.is_some(),
        db_size_bytes,
        config_exists,
        warnings,
    })
}

pub fn ensure_database_ready(paths: &ResolvedPaths, status: &RuntimeStatus) -> Result<()> {
    if status.db_exists {
        return Ok(());
    }
    bail!(
        "no database at {}. {MIGRATIONS_POLICY_MESSAGE}\nTo start from scratch: wikiquery init --project-root {} && wikiquery db migrate",
        display_path(&paths.db_path),
        display_path(&paths.project_root)
    )
}

#[derive(Debug, Clone, Copy)]
pub struct InitOptions {
    pub materialize_config: bool,
    pub force: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            materialize_config: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

/// Creates the state and data directories and, unless disabled, writes the
/// default config. An existing config is only replaced with `force`.
pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let created_dirs: Vec<PathBuf> = [&paths.state_dir, &paths.data_dir]
        .into_iter()
        .filter(|dir| !dir.is_dir())
        .cloned()
        .collect();
    for dir in &created_dirs {
        fs::create_dir_all(dir)
            .with_context(|| format!("cannot create {}", display_path(dir)))?;
    }

    let wrote_config =
        options.materialize_config && write_default_config(&paths.config_path, options.force)?;
    info!(
        created = created_dirs.len(),
        wrote_config, "initialized runtime layout"
    );
    Ok(InitReport {
        created_dirs,
        wrote_config,
    })
}

fn write_default_config(path: &Path, force: bool) -> Result<bool> {
    if path.exists() && !force {
        debug!(path = %display_path(path), "keeping existing config");
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", display_path(parent)))?;
    }
    fs::write(path, render_default_config())
        .with_context(|| format!("cannot write {}", display_path(path)))?;
    Ok(true)
}
