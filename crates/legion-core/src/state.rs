//! Mission persistence using JSONL rollouts.
//!
//! A rollout is one file per mission: a schema version line, a creation line
//! carrying the initial mission record, then one line per committed batch of
//! mutations. Loading replays the batches through [`Mission::apply`].

use crate::types::{Mission, MissionMutation, MissionSummary};
use chrono::{DateTime, Utc};
use legion_protocol::MissionId;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

const SCHEMA_VERSION: u32 = 1;

/// Durable backing store for missions.
pub trait StateStore: Send + Sync {
    /// Record a newly created mission.
    fn record_mission(&self, mission: &Mission) -> Result<(), StateError>;
    /// Append one committed batch of mutations.
    fn append_mutations(
        &self,
        mission_id: MissionId,
        at: DateTime<Utc>,
        mutations: &[MissionMutation],
    ) -> Result<(), StateError>;
    /// Rebuild a mission by id.
    fn load_mission(&self, mission_id: MissionId) -> Result<Option<Mission>, StateError>;
    /// Summaries of every stored mission, most recently updated first.
    fn list_missions(&self) -> Result<Vec<MissionSummary>, StateError>;
    /// Delete a mission and its backing storage.
    fn delete_mission(&self, mission_id: MissionId) -> Result<bool, StateError>;
}

/// Errors returned by the state store.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("unsupported schema version: {0}")]
    UnsupportedSchema(u32),
    #[error("missing mission metadata")]
    MissingMetadata,
    #[error("mission already exists: {0}")]
    MissionExists(MissionId),
    /// A stored batch no longer applies to the replayed mission.
    #[error("replay failed: {0}")]
    Replay(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RolloutLine {
    SchemaVersion {
        version: u32,
    },
    MissionCreated {
        mission: Box<Mission>,
    },
    Mutations {
        at: DateTime<Utc>,
        mutations: Vec<MissionMutation>,
    },
}

#[derive(Default)]
struct Replay {
    version: Option<u32>,
    mission: Option<Mission>,
}

impl Replay {
    fn apply(&mut self, line: RolloutLine) -> Result<(), StateError> {
        match line {
            RolloutLine::SchemaVersion { version } => {
                if version > SCHEMA_VERSION {
                    return Err(StateError::UnsupportedSchema(version));
                }
                self.version = Some(version);
            }
            RolloutLine::MissionCreated { mission } => {
                self.mission = Some(*mission);
            }
            RolloutLine::Mutations { at, mutations } => {
                let mission = self.mission.as_mut().ok_or(StateError::MissingMetadata)?;
                for mutation in &mutations {
                    mission
                        .apply(mutation, at)
                        .map_err(|err| StateError::Replay(err.to_string()))?;
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<Mission, StateError> {
        self.version.ok_or(StateError::MissingMetadata)?;
        self.mission.ok_or(StateError::MissingMetadata)
    }
}

/// JSONL-backed state store.
///
/// Holds no lock. Callers serialize writes per mission; different missions
/// write to different files.
pub struct JsonlStateStore {
    root: PathBuf,
}

impl JsonlStateStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StateError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        info!("initialized JSONL state store (root={})", root.display());
        Ok(Self { root })
    }

    fn rollout_path(&self, mission_id: MissionId) -> PathBuf {
        self.root.join(format!("{mission_id}.jsonl"))
    }

    fn write_line(&self, mission_id: MissionId, line: &RolloutLine) -> Result<(), StateError> {
        let path = self.rollout_path(mission_id);
        let mut file = match OpenOptions::new().append(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StateError::MissingMetadata);
            }
            Err(err) => return Err(err.into()),
        };
        writeln!(file, "{}", serde_json::to_string(line)?)?;
        Ok(())
    }

    fn read_rollout(&self, mission_id: MissionId) -> Result<Option<Mission>, StateError> {
        let path = self.rollout_path(mission_id);
        if !path.exists() {
            return Ok(None);
        }
        let reader = BufReader::new(OpenOptions::new().read(true).open(&path)?);
        let mut replay = Replay::default();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            replay.apply(serde_json::from_str(&line)?)?;
        }
        replay.finish().map(Some)
    }
}

impl StateStore for JsonlStateStore {
    fn record_mission(&self, mission: &Mission) -> Result<(), StateError> {
        info!(
            "recording mission creation (mission_id={}, intent_len={})",
            mission.id,
            mission.intent.len()
        );
        let path = self.rollout_path(mission.id);
        let mut file = match OpenOptions::new().create_new(true).write(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(StateError::MissionExists(mission.id));
            }
            Err(err) => return Err(err.into()),
        };
        let header = RolloutLine::SchemaVersion {
            version: SCHEMA_VERSION,
        };
        writeln!(file, "{}", serde_json::to_string(&header)?)?;
        let created = RolloutLine::MissionCreated {
            mission: Box::new(mission.clone()),
        };
        writeln!(file, "{}", serde_json::to_string(&created)?)?;
        Ok(())
    }

    fn append_mutations(
        &self,
        mission_id: MissionId,
        at: DateTime<Utc>,
        mutations: &[MissionMutation],
    ) -> Result<(), StateError> {
        debug!(
            "appending mutation batch (mission_id={}, mutations={})",
            mission_id,
            mutations.len()
        );
        self.write_line(
            mission_id,
            &RolloutLine::Mutations {
                at,
                mutations: mutations.to_vec(),
            },
        )
    }

    fn load_mission(&self, mission_id: MissionId) -> Result<Option<Mission>, StateError> {
        self.read_rollout(mission_id)
    }

    fn list_missions(&self) -> Result<Vec<MissionSummary>, StateError> {
        let mut summaries = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(mission_id) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| Uuid::parse_str(stem).ok())
            else {
                continue;
            };
            match self.read_rollout(mission_id) {
                Ok(Some(mission)) => summaries.push(MissionSummary::from(&mission)),
                Ok(None) => {}
                Err(err) => warn!(
                    "skipping unreadable rollout (mission_id={}, error={})",
                    mission_id, err
                ),
            }
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    fn delete_mission(&self, mission_id: MissionId) -> Result<bool, StateError> {
        match fs::remove_file(self.rollout_path(mission_id)) {
            Ok(()) => {
                info!("deleted mission rollout (mission_id={})", mission_id);
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!("mission rollout not found (mission_id={})", mission_id);
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }
}
