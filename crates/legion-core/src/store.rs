//! In-memory mission store with optional persistence via StateStore.

use crate::error::LegionCoreError;
use crate::state::StateStore;
use crate::types::{Mission, MissionMutation, MissionSeed, MissionSummary};
use chrono::Utc;
use legion_protocol::{
    Deliverable, EventMsg, EventPayload, EventSink, Message, MissionId, Operation, Phase,
    Question, TaskRecord,
};
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

struct MissionSlot {
    mission: Mission,
    /// Last event sequence number handed out for this mission.
    last_seq: u64,
}

/// Single writer of record for mission state.
///
/// Writes to one mission are serialized by that mission's own lock; missions
/// never wait on each other. A commit applies its mutations to a copy,
/// persists them, swaps the copy in, and only then publishes the derived
/// events, all while holding the mission lock. Event `seq` order therefore
/// equals commit order, and no event is visible before its state.
#[derive(Clone)]
pub struct MissionStore {
    missions: Arc<RwLock<HashMap<MissionId, Arc<Mutex<MissionSlot>>>>>,
    state_store: Option<Arc<dyn StateStore>>,
    sink: Arc<dyn EventSink>,
}

impl MissionStore {
    pub fn new(state_store: Option<Arc<dyn StateStore>>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            missions: Arc::new(RwLock::new(HashMap::new())),
            state_store,
            sink,
        }
    }

    /// Create a mission in `planning` and publish `mission_created`.
    pub fn create_mission(&self, seed: &MissionSeed) -> Result<MissionId, LegionCoreError> {
        let created_at = Utc::now();
        let mission = Mission::new(Uuid::new_v4(), seed, created_at);
        let mission_id = mission.id;
        if let Some(store) = &self.state_store {
            store
                .record_mission(&mission)
                .map_err(|err| LegionCoreError::State(err.to_string()))?;
        }
        info!(
            "created mission (mission_id={}, intent_len={}, formats={})",
            mission_id,
            seed.intent.len(),
            seed.formats.len()
        );
        let slot = Arc::new(Mutex::new(MissionSlot {
            mission,
            last_seq: 0,
        }));
        let mut guard = slot.lock();
        self.missions.write().insert(mission_id, slot.clone());
        let payload = EventPayload::MissionCreated {
            intent: seed.intent.clone(),
        };
        self.emit(&mut guard, mission_id, created_at, payload);
        Ok(mission_id)
    }

    /// Snapshot of a mission, falling back to the backing store.
    pub fn get(&self, mission_id: MissionId) -> Result<Mission, LegionCoreError> {
        if let Ok(slot) = self.slot(mission_id) {
            return Ok(slot.lock().mission.clone());
        }
        if let Some(store) = &self.state_store
            && let Some(mission) = store
                .load_mission(mission_id)
                .map_err(|err| LegionCoreError::State(err.to_string()))?
        {
            debug!("loaded mission from store (mission_id={})", mission_id);
            return Ok(mission);
        }
        Err(LegionCoreError::NotFound(mission_id))
    }

    /// Read from the live mission without copying all of it.
    pub fn read<T>(
        &self,
        mission_id: MissionId,
        f: impl FnOnce(&Mission) -> T,
    ) -> Result<T, LegionCoreError> {
        let slot = self.slot(mission_id)?;
        let guard = slot.lock();
        Ok(f(&guard.mission))
    }

    pub fn contains(&self, mission_id: MissionId) -> bool {
        self.missions.read().contains_key(&mission_id)
    }

    /// Apply, persist, and publish a batch of mutations atomically.
    pub fn commit(
        &self,
        mission_id: MissionId,
        mutations: Vec<MissionMutation>,
    ) -> Result<(), LegionCoreError> {
        self.commit_with(mission_id, |_| Ok(mutations))
    }

    /// Build a batch from the current state under the mission lock, then commit it.
    pub fn commit_with<F>(&self, mission_id: MissionId, build: F) -> Result<(), LegionCoreError>
    where
        F: FnOnce(&Mission) -> Result<Vec<MissionMutation>, LegionCoreError>,
    {
        let slot = self.slot(mission_id)?;
        let mut guard = slot.lock();
        let mutations = build(&guard.mission)?;
        if mutations.is_empty() {
            return Ok(());
        }
        let at = Utc::now();
        let mut draft = guard.mission.clone();
        let mut events = Vec::new();
        for mutation in &mutations {
            let before = draft.phase;
            draft.apply(mutation, at)?;
            events.extend(mutation.events(before, &draft));
        }
        if let Some(store) = &self.state_store {
            store
                .append_mutations(mission_id, at, &mutations)
                .map_err(|err| LegionCoreError::State(err.to_string()))?;
        }
        guard.mission = draft;
        for payload in events {
            self.emit(&mut guard, mission_id, at, payload);
        }
        Ok(())
    }

    pub fn append_question(
        &self,
        mission_id: MissionId,
        question: Question,
    ) -> Result<(), LegionCoreError> {
        self.commit(mission_id, vec![MissionMutation::QuestionAppended { question }])
    }

    pub fn upsert_task(&self, mission_id: MissionId, task: TaskRecord) -> Result<(), LegionCoreError> {
        self.commit(mission_id, vec![MissionMutation::TaskUpserted { task }])
    }

    pub fn upsert_operation(
        &self,
        mission_id: MissionId,
        operation: Operation,
    ) -> Result<(), LegionCoreError> {
        self.commit(
            mission_id,
            vec![MissionMutation::OperationUpserted { operation }],
        )
    }

    /// Append to the message log; the stored `seq` replaces the given one.
    pub fn append_message(
        &self,
        mission_id: MissionId,
        message: Message,
    ) -> Result<(), LegionCoreError> {
        self.commit(mission_id, vec![MissionMutation::MessageAppended { message }])
    }

    pub fn append_deliverable(
        &self,
        mission_id: MissionId,
        deliverable: Deliverable,
    ) -> Result<(), LegionCoreError> {
        self.commit(
            mission_id,
            vec![MissionMutation::DeliverableAppended { deliverable }],
        )
    }

    pub fn set_phase(&self, mission_id: MissionId, phase: Phase) -> Result<(), LegionCoreError> {
        self.commit(mission_id, vec![MissionMutation::PhaseChanged { phase }])
    }

    /// Summaries of live and persisted missions, most recently updated first.
    pub fn list(&self) -> Result<Vec<MissionSummary>, LegionCoreError> {
        let slots: Vec<_> = self.missions.read().values().cloned().collect();
        let mut summaries: Vec<MissionSummary> = slots
            .iter()
            .map(|slot| MissionSummary::from(&slot.lock().mission))
            .collect();
        if let Some(store) = &self.state_store {
            let live: HashSet<MissionId> = summaries.iter().map(|summary| summary.id).collect();
            let stored = store
                .list_missions()
                .map_err(|err| LegionCoreError::State(err.to_string()))?;
            summaries.extend(
                stored
                    .into_iter()
                    .filter(|summary| !live.contains(&summary.id)),
            );
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    /// Drop a mission from memory and the backing store.
    pub fn remove(&self, mission_id: MissionId) -> Result<bool, LegionCoreError> {
        info!("removing mission (mission_id={})", mission_id);
        let mut removed = self.missions.write().remove(&mission_id).is_some();
        if let Some(store) = &self.state_store {
            let deleted = store
                .delete_mission(mission_id)
                .map_err(|err| LegionCoreError::State(err.to_string()))?;
            removed = removed || deleted;
        }
        Ok(removed)
    }

    fn slot(&self, mission_id: MissionId) -> Result<Arc<Mutex<MissionSlot>>, LegionCoreError> {
        self.missions
            .read()
            .get(&mission_id)
            .cloned()
            .ok_or(LegionCoreError::NotFound(mission_id))
    }

    fn emit(
        &self,
        slot: &mut MissionSlot,
        mission_id: MissionId,
        created_at: chrono::DateTime<Utc>,
        payload: EventPayload,
    ) {
        slot.last_seq += 1;
        self.sink.emit(EventMsg {
            id: Uuid::new_v4(),
            mission_id,
            seq: slot.last_seq,
            created_at,
            payload,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::MissionStore;
    use crate::error::LegionCoreError;
    use crate::state::JsonlStateStore;
    use crate::types::{MissionMutation, MissionSeed};
    use legion_protocol::{
        EventMsg, EventSink, Message, MessageKind, Phase, Question, QuestionStatus,
    };
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<EventMsg>>,
    }

    impl EventSink for Recorder {
        fn emit(&self, event: EventMsg) {
            self.events.lock().push(event);
        }
    }

    fn question(id: u32) -> Question {
        Question {
            id,
            text: format!("Question {id}?"),
            category: "general".to_string(),
            priority: id,
            context: String::new(),
            status: QuestionStatus::Pending,
            findings: None,
            error: None,
        }
    }

    #[test]
    fn commit_publishes_after_state_is_visible() {
        let recorder = Arc::new(Recorder::default());
        let store = MissionStore::new(None, recorder.clone());
        let mission_id = store
            .create_mission(&MissionSeed::new("solar storage"))
            .expect("create");
        store.append_question(mission_id, question(1)).expect("q1");
        store.set_phase(mission_id, Phase::Collecting).expect("phase");

        let events = recorder.events.lock().clone();
        let kinds: Vec<&str> = events.iter().map(|event| event.payload.kind()).collect();
        assert_eq!(kinds, vec!["mission_created", "phase_changed"]);
        let seqs: Vec<u64> = events.iter().map(|event| event.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(store.get(mission_id).expect("get").phase, Phase::Collecting);
    }

    #[test]
    fn failed_batch_leaves_state_untouched() {
        let recorder = Arc::new(Recorder::default());
        let store = MissionStore::new(None, recorder.clone());
        let mission_id = store
            .create_mission(&MissionSeed::new("topic"))
            .expect("create");
        let err = store
            .commit(
                mission_id,
                vec![
                    MissionMutation::QuestionAppended {
                        question: question(1),
                    },
                    MissionMutation::PhaseChanged {
                        phase: Phase::Creating,
                    },
                ],
            )
            .expect_err("invalid");
        assert!(matches!(err, LegionCoreError::InvalidTransition { .. }));
        assert_eq!(store.get(mission_id).expect("get").questions.len(), 0);
        assert_eq!(recorder.events.lock().len(), 1);
    }

    #[test]
    fn unknown_mission_is_not_found() {
        let store = MissionStore::new(None, Arc::new(Recorder::default()));
        let mission_id = uuid::Uuid::new_v4();
        let err = store.get(mission_id).expect_err("missing");
        assert!(matches!(err, LegionCoreError::NotFound(id) if id == mission_id));
        let err = store
            .set_phase(mission_id, Phase::Collecting)
            .expect_err("missing");
        assert!(matches!(err, LegionCoreError::NotFound(_)));
    }

    #[test]
    fn store_persists_and_reloads_missions() {
        let root = tempdir().expect("root");
        let state = Arc::new(JsonlStateStore::new(root.path()).expect("state"));
        let store = MissionStore::new(Some(state), Arc::new(Recorder::default()));
        let mission_id = store
            .create_mission(&MissionSeed::new("solar storage"))
            .expect("create");
        store
            .append_message(
                mission_id,
                Message {
                    seq: 0,
                    from: "user".to_string(),
                    to: Some("CONSUL".to_string()),
                    text: "Plan approved".to_string(),
                    kind: MessageKind::Conversation,
                    question_id: None,
                    timestamp: chrono::Utc::now(),
                },
            )
            .expect("message");
        let live = store.get(mission_id).expect("live");

        let reopened = MissionStore::new(
            Some(Arc::new(JsonlStateStore::new(root.path()).expect("state"))),
            Arc::new(Recorder::default()),
        );
        let loaded = reopened.get(mission_id).expect("loaded");
        assert_eq!(loaded, live);
        assert_eq!(loaded.messages[0].seq, 1);
        assert_eq!(reopened.list().expect("list").len(), 1);

        assert_eq!(reopened.remove(mission_id).expect("remove"), true);
        let err = reopened.get(mission_id).expect_err("gone");
        assert!(matches!(err, LegionCoreError::NotFound(_)));
    }
}
