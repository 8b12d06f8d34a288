use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cli::WorkspaceArgs;
use crate::error::CliError;
use crate::settings::mem_home;

pub const TOKEN_ENV: &str = "MEM_CLI_TOKEN";
pub const META_FILE: &str = "meta.json";
const PUBLIC_DIR: &str = "public";
const TOKEN_WORKSPACES_DIR: &str = "workspaces";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceType {
    Public,
    Token,
}

impl std::fmt::Display for WorkspaceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Token => write!(f, "token"),
        }
    }
}

/// Owned by the workspace lifecycle, not by the index: records what kind of
/// workspace this directory is and, for token workspaces, the token hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceMeta {
    pub workspace_type: WorkspaceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_hash: Option<String>,
    pub created_at: i64,
}

/// Which workspace a command targets, before it is resolved on disk.
#[derive(Debug, Clone)]
pub enum WorkspaceSelector {
    Public,
    Token(String),
}

impl WorkspaceSelector {
    /// `--public` / `--token` win; otherwise `MEM_CLI_TOKEN`, then public.
    pub fn from_args(args: &WorkspaceArgs) -> Result<Self> {
        if args.public && args.token.is_some() {
            return Err(
                CliError::invalid_input("--public and --token cannot be combined").into(),
            );
        }

        if let Some(token) = &args.token {
            if token.trim().is_empty() {
                return Err(CliError::invalid_input("--token must not be empty").into());
            }
            return Ok(Self::Token(token.clone()));
        }
        if args.public {
            return Ok(Self::Public);
        }

        match std::env::var(TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => Ok(Self::Token(token)),
            _ => Ok(Self::Public),
        }
    }

    pub fn root(&self) -> PathBuf {
        match self {
            Self::Public => mem_home().join(PUBLIC_DIR),
            Self::Token(token) => mem_home()
                .join(TOKEN_WORKSPACES_DIR)
                .join(&token_hash(token)[..12]),
        }
    }

    fn workspace_type(&self) -> WorkspaceType {
        match self {
            Self::Public => WorkspaceType::Public,
            Self::Token(_) => WorkspaceType::Token,
        }
    }
}

/// A resolved, initialized workspace.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
    pub meta: WorkspaceMeta,
}

/// Resolve the selector against disk, verifying initialization and token.
pub fn resolve(selector: &WorkspaceSelector) -> Result<Workspace> {
    let root = selector.root();
    let meta_path = root.join(META_FILE);

    if !meta_path.is_file() {
        return Err(CliError::WorkspaceNotInitialized { path: root }.into());
    }

    let raw = std::fs::read_to_string(&meta_path)
        .with_context(|| format!("Failed to read {}", meta_path.display()))?;
    let meta: WorkspaceMeta = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {}", meta_path.display()))?;

    match (selector, meta.workspace_type) {
        (WorkspaceSelector::Public, WorkspaceType::Public) => {}
        (WorkspaceSelector::Token(token), WorkspaceType::Token) => {
            let presented = token_hash(token);
            if meta.token_hash.as_deref() != Some(presented.as_str()) {
                return Err(CliError::AccessDenied.into());
            }
        }
        _ => return Err(CliError::AccessDenied.into()),
    }

    Ok(Workspace { root, meta })
}

/// Create the workspace skeleton. Returns false when it already existed.
pub fn init(selector: &WorkspaceSelector) -> Result<(Workspace, bool)> {
    let root = selector.root();
    if root.join(META_FILE).is_file() {
        return Ok((resolve(selector)?, false));
    }

    std::fs::create_dir_all(root.join(mem_indexing::indexing::layout::MEMORY_DIR_NAME))
        .with_context(|| format!("Failed to create workspace at {}", root.display()))?;

    let long_memory = mem_indexing::WorkspaceLayout::new(&root).long_memory_default_path();
    if !long_memory.exists() {
        std::fs::write(&long_memory, "")
            .with_context(|| format!("Failed to create {}", long_memory.display()))?;
    }

    let meta = WorkspaceMeta {
        workspace_type: selector.workspace_type(),
        token_hash: match selector {
            WorkspaceSelector::Token(token) => Some(token_hash(token)),
            WorkspaceSelector::Public => None,
        },
        created_at: now_ms(),
    };
    let meta_path = root.join(META_FILE);
    std::fs::write(&meta_path, serde_json::to_string_pretty(&meta)?)
        .with_context(|| format!("Failed to write {}", meta_path.display()))?;

    Ok((Workspace { root, meta }, true))
}

/// Remove the workspace directory and everything in it.
pub fn destroy(selector: &WorkspaceSelector) -> Result<PathBuf> {
    let workspace = resolve(selector)?;
    std::fs::remove_dir_all(&workspace.root).with_context(|| {
        format!(
            "Failed to remove workspace directory {}",
            workspace.root.display()
        )
    })?;
    Ok(workspace.root)
}

/// Every initialized workspace under the mem-cli home.
pub fn list_workspaces() -> Result<Vec<PathBuf>> {
    let mut roots = Vec::new();

    let public = mem_home().join(PUBLIC_DIR);
    if public.join(META_FILE).is_file() {
        roots.push(public);
    }

    let token_dir = mem_home().join(TOKEN_WORKSPACES_DIR);
    if token_dir.is_dir() {
        let entries = std::fs::read_dir(&token_dir)
            .with_context(|| format!("Failed to list {}", token_dir.display()))?;
        for entry in entries {
            let entry = entry.context("Failed to read workspace registry entry")?;
            let path = entry.path();
            if path.join(META_FILE).is_file() {
                roots.push(path);
            }
        }
    }

    roots.sort();
    Ok(roots)
}

pub fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}
