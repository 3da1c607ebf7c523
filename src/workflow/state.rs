use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{AppError, Result};
use crate::workflow::types::Step;

/// Resumable checkpoint for one issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub issue_number: u64,
    #[serde(default)]
    pub last_completed_step: u32,
    #[serde(default)]
    pub step_outputs: BTreeMap<String, String>,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub model_used: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl WorkflowState {
    pub fn new(issue_number: u64) -> Self {
        Self {
            issue_number,
            last_completed_step: 0,
            step_outputs: BTreeMap::new(),
            total_cost: 0.0,
            model_used: String::new(),
            updated_at: None,
        }
    }

    pub fn is_completed(&self, step: Step) -> bool {
        self.last_completed_step >= step.number()
    }

    pub fn output(&self, step: Step) -> Option<&str> {
        self.step_outputs.get(&step.output_key()).map(String::as_str)
    }

    /// Add an output entry. Existing entries are never replaced; returns
    /// `false` when `key` was already present.
    pub fn record_output(&mut self, key: String, output: String) -> bool {
        match self.step_outputs.entry(key) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(output);
                true
            }
            std::collections::btree_map::Entry::Occupied(slot) => {
                tracing::debug!(key = %slot.key(), "Checkpoint already holds output, keeping it");
                false
            }
        }
    }

    /// Record a step's output and advance the completion marker.
    pub fn complete_step(&mut self, step: Step, output: String) {
        self.record_output(step.output_key(), output);
        self.mark_completed(step);
    }

    /// Advance the completion marker. It never moves backwards.
    pub fn mark_completed(&mut self, step: Step) {
        self.last_completed_step = self.last_completed_step.max(step.number());
    }

    pub fn add_cost(&mut self, cost: f64) {
        if cost.is_finite() && cost > 0.0 {
            self.total_cost += cost;
        } else if cost != 0.0 {
            tracing::warn!(cost, "Ignoring invalid step cost");
        }
    }

    pub fn note_model(&mut self, model: &str) {
        if !model.is_empty() {
            self.model_used = model.to_string();
        }
    }
}

/// Durable checkpoint storage, one JSON file per issue.
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, issue_number: u64) -> PathBuf {
        self.dir.join(format!("change_state_{issue_number}.json"))
    }

    /// Load the checkpoint for an issue. A missing file is `Ok(None)`.
    pub fn load(&self, issue_number: u64) -> Result<Option<WorkflowState>> {
        let path = self.path_for(issue_number);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AppError::State(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )))
            }
        };

        let state: WorkflowState = serde_json::from_str(&raw).map_err(|e| {
            AppError::State(format!("Corrupt checkpoint {}: {e}", path.display()))
        })?;

        if state.issue_number != issue_number {
            return Err(AppError::State(format!(
                "Checkpoint {} belongs to issue #{}",
                path.display(),
                state.issue_number
            )));
        }

        Ok(Some(state))
    }

    /// Atomically replace the checkpoint: temp file, fsync, rename.
    pub fn save(&self, issue_number: u64, state: &WorkflowState) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            AppError::State(format!("Failed to create {}: {e}", self.dir.display()))
        })?;

        let mut stamped = state.clone();
        stamped.updated_at = Some(Utc::now());
        let json = serde_json::to_string_pretty(&stamped)?;

        let mut temp = NamedTempFile::new_in(&self.dir)?;
        temp.write_all(json.as_bytes())?;
        temp.as_file().sync_all()?;

        let path = self.path_for(issue_number);
        temp.persist(&path).map_err(|e| {
            AppError::State(format!("Failed to persist {}: {}", path.display(), e.error))
        })?;

        tracing::debug!(
            issue = issue_number,
            last_completed_step = state.last_completed_step,
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Remove the checkpoint. Missing files are not an error.
    pub fn clear(&self, issue_number: u64) -> Result<()> {
        match std::fs::remove_file(self.path_for(issue_number)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, StateStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path().join(".pdd/change-state"));
        (tmp, store)
    }

    #[test]
    fn test_load_missing_is_none() {
        let (_tmp, store) = store();
        assert!(store.load(7).unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let (_tmp, store) = store();
        let mut state = WorkflowState::new(7);
        state.complete_step(Step::Duplicate, "no duplicate".to_string());
        state.add_cost(0.25);
        state.note_model("claude-sonnet");

        store.save(7, &state).unwrap();
        assert!(store.path_for(7).ends_with("change_state_7.json"));

        let loaded = store.load(7).unwrap().unwrap();
        assert_eq!(loaded.last_completed_step, 1);
        assert_eq!(loaded.output(Step::Duplicate), Some("no duplicate"));
        assert_eq!(loaded.total_cost, 0.25);
        assert_eq!(loaded.model_used, "claude-sonnet");
        assert!(loaded.updated_at.is_some());
    }

    #[test]
    fn test_save_overwrites_previous_checkpoint() {
        let (_tmp, store) = store();
        let mut state = WorkflowState::new(3);
        store.save(3, &state).unwrap();

        state.complete_step(Step::Duplicate, "a".to_string());
        state.complete_step(Step::Docs, "b".to_string());
        store.save(3, &state).unwrap();

        assert_eq!(store.load(3).unwrap().unwrap().last_completed_step, 2);
        // Only the checkpoint itself remains; temp files were renamed away.
        let entries = std::fs::read_dir(store.dir()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_loads_checkpoint_without_timestamp() {
        let (_tmp, store) = store();
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(
            store.path_for(3),
            r#"{"issue_number": 3, "last_completed_step": 4,
                "step_outputs": {"1": "out1", "4": "out4"},
                "total_cost": 1.0, "model_used": "gpt-3.5"}"#,
        )
        .unwrap();

        let state = store.load(3).unwrap().unwrap();
        assert_eq!(state.last_completed_step, 4);
        assert_eq!(state.output(Step::Clarify), Some("out4"));
        assert_eq!(state.updated_at, None);
    }

    #[test]
    fn test_corrupt_checkpoint_is_an_error() {
        let (_tmp, store) = store();
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.path_for(5), "{not json").unwrap();
        let err = store.load(5).unwrap_err().to_string();
        assert!(err.contains("Corrupt checkpoint"));
    }

    #[test]
    fn test_checkpoint_for_other_issue_is_rejected() {
        let (_tmp, store) = store();
        store.save(8, &WorkflowState::new(9)).unwrap();
        assert!(store.load(8).is_err());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let (_tmp, store) = store();
        store.save(4, &WorkflowState::new(4)).unwrap();
        store.clear(4).unwrap();
        assert!(!store.path_for(4).exists());
        store.clear(4).unwrap();
    }

    #[test]
    fn test_outputs_are_append_only() {
        let mut state = WorkflowState::new(1);
        assert!(state.record_output("10_iter1".to_string(), "first".to_string()));
        assert!(!state.record_output("10_iter1".to_string(), "second".to_string()));
        assert_eq!(state.step_outputs["10_iter1"], "first");
    }

    #[test]
    fn test_last_completed_step_never_regresses() {
        let mut state = WorkflowState::new(1);
        state.complete_step(Step::Analyze, "eight".to_string());
        state.complete_step(Step::DocsChange, "five".to_string());
        assert_eq!(state.last_completed_step, 8);
    }

    #[test]
    fn test_invalid_costs_are_ignored() {
        let mut state = WorkflowState::new(1);
        state.add_cost(0.5);
        state.add_cost(-1.0);
        state.add_cost(f64::NAN);
        assert_eq!(state.total_cost, 0.5);
    }
}
