use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Result;
use crate::model::{AgentInfo, AgentStatus};

/// Minimal view of `forge.yaml` this crate needs. The full manifest schema
/// is owned by the workspace configuration layer, out of scope here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForgeManifest {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub framework: String,
    #[serde(default)]
    pub model: ForgeModelRef,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub secrets: Option<ForgeSecrets>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForgeModelRef {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForgeSecrets {
    pub provider: String,
}

/// Scan a workspace root (and the root itself) for `forge.yaml` manifests,
/// building a map of agent id -> `AgentInfo`. Candidate directories whose
/// name begins with `.` are skipped, as are directories with no (or an
/// unparseable) manifest.
pub fn discover(workspace_root: &Path) -> Result<HashMap<String, AgentInfo>> {
    let mut agents = HashMap::new();

    let mut candidates = vec![workspace_root.to_path_buf()];
    if let Ok(entries) = std::fs::read_dir(workspace_root) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with('.'))
                .unwrap_or(true);
            if hidden {
                continue;
            }
            candidates.push(path);
        }
    }

    for dir in candidates {
        if let Some((id, info)) = read_agent_dir(&dir) {
            agents.insert(id, info);
        }
    }

    Ok(agents)
}

fn read_agent_dir(dir: &Path) -> Option<(String, AgentInfo)> {
    let manifest_path = dir.join("forge.yaml");
    if !manifest_path.is_file() {
        return None;
    }

    let content = match std::fs::read_to_string(&manifest_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(path = %manifest_path.display(), error = %e, "failed to read forge.yaml, skipping");
            return None;
        }
    };
    let manifest: ForgeManifest = match serde_yaml::from_str(&content) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(path = %manifest_path.display(), error = %e, "failed to parse forge.yaml, skipping");
            return None;
        }
    };

    let id = dir.file_name()?.to_string_lossy().to_string();
    let skill_count = count_skills(dir);
    let needs_passphrase = manifest
        .secrets
        .as_ref()
        .is_some_and(|s| s.provider == "encrypted-file")
        && (dir.join(".forge").join("secrets.enc").is_file() || home_secrets_path().is_file());

    let info = AgentInfo {
        id: id.clone(),
        version: manifest.version,
        framework: manifest.framework,
        model: format!("{}/{}", manifest.model.provider, manifest.model.name),
        tools: manifest.tools,
        channels: manifest.channels,
        skill_count,
        directory: dir.to_path_buf(),
        status: AgentStatus::Stopped,
        port: 0,
        error: None,
        started_at: None,
        needs_passphrase,
    };

    Some((id, info))
}

fn count_skills(dir: &Path) -> usize {
    let skills_dir = dir.join("skills");
    let Ok(entries) = std::fs::read_dir(&skills_dir) else {
        return 0;
    };
    entries
        .flatten()
        .filter(|e| e.path().is_dir() && e.path().join("SKILL.md").is_file())
        .count()
}

fn home_secrets_path() -> PathBuf {
    std::env::var("HOME")
        .map(|home| PathBuf::from(home).join(".forge").join("secrets.enc"))
        .unwrap_or_default()
}
