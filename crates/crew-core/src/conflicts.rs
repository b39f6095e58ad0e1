//! Cross-branch conflict detection.
//!
//! Each active thread works on its own branch; the detector tracks which
//! files each thread has touched and reports pairwise overlaps:
//!
//! - the same file modified by both threads (high severity),
//! - sibling changes in the same immediate parent directory (medium),
//!   suppressed when that directory already contains a file overlap,
//! - caller-supplied semantic overlaps (medium, free-text detail).
//!
//! It also suggests a merge order: fewest files first, with a rebase
//! flag on any thread sharing files with an earlier-merged one.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// What kind of territory two threads share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapKind {
    /// Both threads modified the same file.
    File,
    /// Both threads changed files in the same directory.
    Directory,
    /// Externally asserted logical conflict.
    Semantic,
}

/// How bad an overlap is for merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A pairwise conflict between two active threads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Overlap {
    pub kind: OverlapKind,
    pub thread_a: String,
    pub thread_b: String,
    pub branch_a: String,
    pub branch_b: String,
    /// The shared file or directory ("" for semantic overlaps).
    pub path: String,
    pub severity: Severity,
    pub detail: String,
}

/// A thread's slot in the suggested merge order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeSlot {
    pub thread_id: String,
    pub branch: String,
    pub file_count: usize,
    /// True when this thread shares a file with any earlier slot.
    pub needs_rebase: bool,
}

#[derive(Debug, Clone)]
struct ThreadFiles {
    branch: String,
    files: BTreeSet<String>,
}

#[derive(Default)]
struct State {
    threads: BTreeMap<String, ThreadFiles>,
    semantic: Vec<Overlap>,
}

/// Process-wide conflict detector. All access goes through one lock;
/// operations are pure map work, no I/O.
#[derive(Default)]
pub struct ConflictDetector {
    state: Mutex<State>,
}

impl ConflictDetector {
    /// Create an empty detector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a thread working on `branch`. Re-registering resets its
    /// file set.
    pub fn register_thread(&self, thread_id: &str, branch: &str) {
        let mut state = self.state.lock().unwrap();
        debug!(thread_id, branch, "registering thread for conflict tracking");
        state.threads.insert(
            thread_id.to_string(),
            ThreadFiles {
                branch: branch.to_string(),
                files: BTreeSet::new(),
            },
        );
    }

    /// Record that `thread_id` touched `path`. Unregistered threads are
    /// ignored.
    pub fn record_file(&self, thread_id: &str, path: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.threads.get_mut(thread_id) {
            entry.files.insert(normalize(path));
        }
    }

    /// Remove a thread (its branch closed).
    pub fn unregister_thread(&self, thread_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.threads.remove(thread_id);
        state
            .semantic
            .retain(|o| o.thread_a != thread_id && o.thread_b != thread_id);
    }

    /// Assert a semantic overlap between two threads.
    pub fn add_semantic_overlap(&self, thread_a: &str, thread_b: &str, detail: &str) {
        let mut state = self.state.lock().unwrap();
        let branch = |state: &State, id: &str| {
            state
                .threads
                .get(id)
                .map(|t| t.branch.clone())
                .unwrap_or_default()
        };
        let overlap = Overlap {
            kind: OverlapKind::Semantic,
            thread_a: thread_a.to_string(),
            thread_b: thread_b.to_string(),
            branch_a: branch(&state, thread_a),
            branch_b: branch(&state, thread_b),
            path: String::new(),
            severity: Severity::Medium,
            detail: detail.to_string(),
        };
        state.semantic.push(overlap);
    }

    /// All overlaps across every unordered pair of active threads.
    pub fn detect_overlaps(&self) -> Vec<Overlap> {
        let state = self.state.lock().unwrap();
        let mut overlaps = Vec::new();

        let ids: Vec<&String> = state.threads.keys().collect();
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let (a, b) = (ids[i], ids[j]);
                let ta = &state.threads[a];
                let tb = &state.threads[b];

                // File overlaps: every file both threads modify.
                let shared: Vec<&String> = ta.files.intersection(&tb.files).collect();
                let mut overlapped_dirs = BTreeSet::new();
                for path in &shared {
                    overlapped_dirs.insert(parent_dir(path));
                    overlaps.push(Overlap {
                        kind: OverlapKind::File,
                        thread_a: a.clone(),
                        thread_b: b.clone(),
                        branch_a: ta.branch.clone(),
                        branch_b: tb.branch.clone(),
                        path: (*path).clone(),
                        severity: Severity::High,
                        detail: format!("both threads modify {path}"),
                    });
                }

                // Directory overlaps: common immediate parents, minus
                // directories that already carry a file overlap.
                let dirs_a: BTreeSet<String> = ta.files.iter().map(|p| parent_dir(p)).collect();
                let dirs_b: BTreeSet<String> = tb.files.iter().map(|p| parent_dir(p)).collect();
                for dir in dirs_a.intersection(&dirs_b) {
                    if overlapped_dirs.contains(dir) {
                        continue;
                    }
                    overlaps.push(Overlap {
                        kind: OverlapKind::Directory,
                        thread_a: a.clone(),
                        thread_b: b.clone(),
                        branch_a: ta.branch.clone(),
                        branch_b: tb.branch.clone(),
                        path: dir.clone(),
                        severity: Severity::Medium,
                        detail: format!("both threads change files under {dir}"),
                    });
                }
            }
        }

        overlaps.extend(state.semantic.iter().cloned());
        overlaps
    }

    /// Overlaps involving one thread.
    pub fn detect_for_thread(&self, thread_id: &str) -> Vec<Overlap> {
        self.detect_overlaps()
            .into_iter()
            .filter(|o| o.thread_a == thread_id || o.thread_b == thread_id)
            .collect()
    }

    /// Merge order: ascending file count, each slot flagged for rebase
    /// when it shares a file with any earlier slot.
    pub fn suggest_merge_order(&self) -> Vec<MergeSlot> {
        let state = self.state.lock().unwrap();
        let mut entries: Vec<(&String, &ThreadFiles)> = state.threads.iter().collect();
        entries.sort_by(|(id_a, ta), (id_b, tb)| {
            ta.files
                .len()
                .cmp(&tb.files.len())
                .then_with(|| id_a.cmp(id_b))
        });

        let mut merged_files: BTreeSet<&String> = BTreeSet::new();
        let mut order = Vec::with_capacity(entries.len());
        for (id, thread) in entries {
            let needs_rebase = thread.files.iter().any(|f| merged_files.contains(f));
            merged_files.extend(thread.files.iter());
            order.push(MergeSlot {
                thread_id: id.clone(),
                branch: thread.branch.clone(),
                file_count: thread.files.len(),
                needs_rebase,
            });
        }
        order
    }

    /// Number of tracked threads.
    pub fn thread_count(&self) -> usize {
        self.state.lock().unwrap().threads.len()
    }
}

/// Strip leading `./` so equal paths compare equal.
fn normalize(path: &str) -> String {
    path.strip_prefix("./").unwrap_or(path).to_string()
}

/// Immediate parent directory of a path ("." at the top level).
fn parent_dir(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => ".".to_string(),
    }
}
