//! Assembled recordings
//!
//! An artifact is the concatenation of every buffered fragment. Artifacts are
//! only reachable through temporary URLs handed out by the [`ArtifactStore`];
//! a revoked URL no longer resolves.

use super::state::ArtifactUrl;
use crate::utils::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

const URL_PREFIX: &str = "blob:screen-recorder/";

/// One playable recording
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: Uuid,
    pub mime_type: String,
    pub fragment_count: usize,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl Artifact {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Registry of live artifact URLs
#[derive(Debug, Default)]
pub struct ArtifactStore {
    artifacts: HashMap<Uuid, Arc<Artifact>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an artifact and hand out a URL for it
    pub fn create(&mut self, data: Vec<u8>, mime_type: &str, fragment_count: usize) -> ArtifactUrl {
        let artifact = Artifact {
            id: Uuid::new_v4(),
            mime_type: mime_type.to_string(),
            fragment_count,
            created_at: Utc::now(),
            data,
        };
        let url = ArtifactUrl(format!("{}{}", URL_PREFIX, artifact.id));
        self.artifacts.insert(artifact.id, Arc::new(artifact));
        url
    }

    pub fn get(&self, url: &ArtifactUrl) -> Option<Arc<Artifact>> {
        parse_url(url).and_then(|id| self.artifacts.get(&id).cloned())
    }

    /// Release the artifact behind `url`
    pub fn revoke(&mut self, url: &ArtifactUrl) -> bool {
        parse_url(url)
            .and_then(|id| self.artifacts.remove(&id))
            .is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

fn parse_url(url: &ArtifactUrl) -> Option<Uuid> {
    url.0
        .strip_prefix(URL_PREFIX)
        .and_then(|id| Uuid::parse_str(id).ok())
}

/// Write an artifact into `dir` under `filename`
///
/// The data goes to a temporary file in the same directory first and is then
/// moved into place, so an interrupted save never leaves a truncated file
/// behind under the final name.
pub fn save_artifact(artifact: &Artifact, dir: &Path, filename: &str) -> AppResult<PathBuf> {
    if filename.is_empty() || Path::new(filename).file_name().is_none() {
        return Err(AppError::Config(format!("invalid filename: {:?}", filename)));
    }

    std::fs::create_dir_all(dir)?;
    let destination = dir.join(filename);

    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(&artifact.data)?;
    file.flush()?;
    file.persist(&destination).map_err(|e| AppError::Io(e.error))?;

    tracing::info!(
        "Saved {} bytes ({} fragments) to {:?}",
        artifact.size(),
        artifact.fragment_count,
        destination
    );

    Ok(destination)
}
