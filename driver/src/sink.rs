//! Result artifact layout on disk.
//!
//! Artifacts live at `<root>/inference_tasks/<commitment>/<i>.<ext>`.
//! Rows written before commitments existed used the local id as the
//! directory name, so LLM readers probe that legacy layout too.

use std::path::PathBuf;

use alloy_primitives::B256;
use axon_lib::{InferenceTask, TaskType};

#[derive(Debug, Clone)]
pub struct ResultSink {
    root: PathBuf,
}

impl ResultSink {
    pub fn new(root: impl Into<PathBuf>) -> ResultSink {
        ResultSink { root: root.into() }
    }

    fn tasks_root(&self) -> PathBuf {
        self.root.join("inference_tasks")
    }

    pub fn task_dir(&self, commitment: &B256) -> PathBuf {
        self.tasks_root().join(commitment.to_string())
    }

    pub async fn ensure_task_dir(&self, commitment: &B256) -> std::io::Result<PathBuf> {
        let dir = self.task_dir(commitment);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Path of artifact `index`, if the task has been committed.
    pub fn artifact_path(&self, task: &InferenceTask, index: u64) -> Option<PathBuf> {
        let dir = self.task_dir(&task.task_id_commitment?);
        Some(dir.join(format!("{index}.{}", task.task_type.artifact_ext())))
    }

    /// Existing LLM result for the task, probing the commitment
    /// layout first and the legacy id-keyed layout second.
    pub fn llm_result_path(&self, task: &InferenceTask) -> Option<PathBuf> {
        if task.task_type != TaskType::Llm {
            return None;
        }
        if let Some(commitment) = &task.task_id_commitment {
            let path = self.task_dir(commitment).join("0.json");
            if path.exists() {
                return Some(path);
            }
        }
        let legacy = self.tasks_root().join(task.id.to_string()).join("0.json");
        legacy.exists().then_some(legacy)
    }
}
