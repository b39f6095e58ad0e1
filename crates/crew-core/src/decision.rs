//! Append-only decision audit log.
//!
//! Records choice points (model selection, tool choice, escalations,
//! breaker trips, ...) as JSON lines at
//! `branches/<branch>/decisions/<role>.jsonl`. Writers serialize under a
//! single mutex; readers filter by type and agent and tolerate malformed
//! lines.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crew_types::{Result, Role};

/// The closed set of decision entry types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    WorkflowSelected,
    SkillMatched,
    AgentDelegated,
    ModelSelected,
    ToolChosen,
    StuckDetected,
    Escalated,
    PlanDeviated,
    ReviewIssue,
    LearningProposed,
    CompactionTriggered,
    CircuitBreaker,
}

impl DecisionType {
    /// Wire name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionType::WorkflowSelected => "workflow_selected",
            DecisionType::SkillMatched => "skill_matched",
            DecisionType::AgentDelegated => "agent_delegated",
            DecisionType::ModelSelected => "model_selected",
            DecisionType::ToolChosen => "tool_chosen",
            DecisionType::StuckDetected => "stuck_detected",
            DecisionType::Escalated => "escalated",
            DecisionType::PlanDeviated => "plan_deviated",
            DecisionType::ReviewIssue => "review_issue",
            DecisionType::LearningProposed => "learning_proposed",
            DecisionType::CompactionTriggered => "compaction_triggered",
            DecisionType::CircuitBreaker => "circuit_breaker",
        }
    }
}

/// One audited choice point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionEntry {
    /// When the decision was made.
    pub ts: DateTime<Utc>,
    /// The agent (role name) that made it.
    pub agent: String,
    /// What kind of decision this is.
    #[serde(rename = "type")]
    pub decision_type: DecisionType,
    /// What was being decided over.
    pub input: String,
    /// Optional state snapshot at decision time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
    /// The decision taken.
    pub decision: String,
    /// Alternatives that were considered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternatives: Option<Vec<String>>,
    /// Evidence supporting the decision.
    pub evidence: String,
    /// The observed outcome, when known later.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

impl DecisionEntry {
    /// A minimal entry with the common fields filled.
    pub fn new(
        agent: impl Into<String>,
        decision_type: DecisionType,
        input: impl Into<String>,
        decision: impl Into<String>,
        evidence: impl Into<String>,
    ) -> Self {
        Self {
            ts: Utc::now(),
            agent: agent.into(),
            decision_type,
            input: input.into(),
            state: None,
            decision: decision.into(),
            alternatives: None,
            evidence: evidence.into(),
            outcome: None,
        }
    }
}

/// Append-only JSONL decision log, safe for concurrent writers.
pub struct DecisionLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl DecisionLog {
    /// Open the decision log of `role` on `branch` under the workspace
    /// root, creating directories as needed.
    pub fn open(root: &Path, branch: &str, role: Role) -> Result<Self> {
        let dir = root.join("branches").join(branch).join("decisions");
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            path: dir.join(format!("{role}.jsonl")),
            write_lock: Mutex::new(()),
        })
    }

    /// The on-disk path of this log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry.
    pub fn append(&self, entry: &DecisionEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let _guard = self.write_lock.lock().unwrap();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Read entries, optionally filtered by type and/or agent.
    ///
    /// Invalid JSON lines are skipped, never fatal.
    pub fn read(
        &self,
        decision_type: Option<DecisionType>,
        agent: Option<&str>,
    ) -> Result<Vec<DecisionEntry>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<DecisionEntry>(trimmed) {
                Ok(entry) => {
                    if decision_type.is_some_and(|t| entry.decision_type != t) {
                        continue;
                    }
                    if agent.is_some_and(|a| entry.agent != a) {
                        continue;
                    }
                    entries.push(entry);
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "skipping malformed decision line");
                }
            }
        }
        Ok(entries)
    }

    /// Count entries by type.
    pub fn summarize(&self) -> Result<HashMap<String, usize>> {
        let mut counts = HashMap::new();
        for entry in self.read(None, None)? {
            *counts
                .entry(entry.decision_type.as_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(dir: &Path) -> DecisionLog {
        DecisionLog::open(dir, "main", Role::Coder).unwrap()
    }

    #[test]
    fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = log(dir.path());

        log.append(&DecisionEntry::new(
            "coder",
            DecisionType::ToolChosen,
            "how to find the failing test",
            "grep",
            "file list too large for read_file",
        ))
        .unwrap();

        let entries = log.read(None, None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].decision_type, DecisionType::ToolChosen);
        assert_eq!(entries[0].decision, "grep");
    }

    #[test]
    fn path_is_per_branch_and_role() {
        let dir = tempfile::tempdir().unwrap();
        let log = log(dir.path());
        assert!(log.path().ends_with("branches/main/decisions/coder.jsonl"));
    }

    #[test]
    fn filter_by_type() {
        let dir = tempfile::tempdir().unwrap();
        let log = log(dir.path());
        log.append(&DecisionEntry::new(
            "coder",
            DecisionType::ModelSelected,
            "",
            "gpt-4o",
            "",
        ))
        .unwrap();
        log.append(&DecisionEntry::new(
            "coder",
            DecisionType::CircuitBreaker,
            "",
            "opened",
            "3 consecutive 503s",
        ))
        .unwrap();

        let breakers = log.read(Some(DecisionType::CircuitBreaker), None).unwrap();
        assert_eq!(breakers.len(), 1);
        assert_eq!(breakers[0].decision, "opened");
    }

    #[test]
    fn filter_by_agent() {
        let dir = tempfile::tempdir().unwrap();
        let log = log(dir.path());
        log.append(&DecisionEntry::new(
            "coder",
            DecisionType::Escalated,
            "",
            "asked lead",
            "",
        ))
        .unwrap();
        log.append(&DecisionEntry::new(
            "lead",
            DecisionType::Escalated,
            "",
            "asked human",
            "",
        ))
        .unwrap();

        let lead = log.read(None, Some("lead")).unwrap();
        assert_eq!(lead.len(), 1);
        assert_eq!(lead[0].decision, "asked human");
    }

    #[test]
    fn summary_counts_by_type() {
        let dir = tempfile::tempdir().unwrap();
        let log = log(dir.path());
        for _ in 0..3 {
            log.append(&DecisionEntry::new(
                "coder",
                DecisionType::ToolChosen,
                "",
                "grep",
                "",
            ))
            .unwrap();
        }
        log.append(&DecisionEntry::new(
            "coder",
            DecisionType::StuckDetected,
            "",
            "loop",
            "",
        ))
        .unwrap();

        let summary = log.summarize().unwrap();
        assert_eq!(summary["tool_chosen"], 3);
        assert_eq!(summary["stuck_detected"], 1);
    }

    #[test]
    fn malformed_lines_skipped_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let log = log(dir.path());
        log.append(&DecisionEntry::new(
            "coder",
            DecisionType::PlanDeviated,
            "",
            "skipped step",
            "",
        ))
        .unwrap();

        let mut content = std::fs::read_to_string(log.path()).unwrap();
        content.push_str("garbage line\n");
        std::fs::write(log.path(), content).unwrap();

        let entries = log.read(None, None).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = log(dir.path());
        assert!(log.read(None, None).unwrap().is_empty());
        assert!(log.summarize().unwrap().is_empty());
    }

    #[test]
    fn type_serializes_snake_case() {
        let json = serde_json::to_string(&DecisionType::CompactionTriggered).unwrap();
        assert_eq!(json, "\"compaction_triggered\"");
    }

    #[test]
    fn concurrent_writers_produce_whole_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = std::sync::Arc::new(log(dir.path()));

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for i in 0..20 {
                        log.append(&DecisionEntry::new(
                            format!("agent-{n}"),
                            DecisionType::ToolChosen,
                            format!("input {i}"),
                            "pick",
                            "",
                        ))
                        .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let entries = log.read(None, None).unwrap();
        assert_eq!(entries.len(), 160);
    }
}
