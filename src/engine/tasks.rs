//! Offline Task Queue
//!
//! Render, export, quality-check and batch jobs are queued with a priority
//! and driven cooperatively: [`TaskQueue::run_next`] runs the oldest
//! admitted task to completion on the calling thread. Up to `concurrency`
//! tasks are admitted into `Processing` at once; the rest wait as `Pending`
//! ordered by priority, then creation order.
//!
//! Only pending tasks can be cancelled. A running task finishes or fails.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::{QualityAnalyzer, QualityReport};
use crate::engine::buffer::SampleBuffer;
use crate::engine::core::OfflineRenderer;
use crate::engine::io::{export_bytes, ExportOptions, ExportedAudio};
use crate::engine::settings::EffectSettings;
use crate::error::{Result, VoxError};

/// Concurrency bound used when the host cannot report its parallelism
pub const FALLBACK_CONCURRENCY: usize = 4;

/// Share of an export task's progress spent rendering
const EXPORT_RENDER_SHARE: f32 = 0.8;

/// Share of a batch item's progress spent rendering when a quality check follows
const BATCH_RENDER_SHARE: f32 = 0.8;

pub type TaskId = String;

/// Progress callback: `(stage label, fraction in [0, 1])`
pub type ProgressCallback = Box<dyn FnMut(&str, f32)>;

// ============================================================================
// Task Model
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    Render,
    Export,
    QualityCheck,
    Batch,
}

impl TaskKind {
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::Render => "render",
            TaskKind::Export => "export",
            TaskKind::QualityCheck => "quality-check",
            TaskKind::Batch => "batch",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Declaration order is dequeue order from lowest to highest
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// One named input of a batch task
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub name: String,
    pub buffer: SampleBuffer,
}

/// Input of a task; the variant must match the task kind
#[derive(Debug, Clone)]
pub enum TaskPayload {
    Render {
        buffer: SampleBuffer,
        settings: EffectSettings,
    },
    Export {
        buffer: SampleBuffer,
        settings: EffectSettings,
        options: ExportOptions,
    },
    QualityCheck {
        buffer: SampleBuffer,
        settings: EffectSettings,
    },
    Batch {
        items: Vec<BatchItem>,
        settings: EffectSettings,
        quality_check: bool,
    },
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::Render { .. } => TaskKind::Render,
            TaskPayload::Export { .. } => TaskKind::Export,
            TaskPayload::QualityCheck { .. } => TaskKind::QualityCheck,
            TaskPayload::Batch { .. } => TaskKind::Batch,
        }
    }
}

/// Result of one batch item
#[derive(Debug, Clone)]
pub struct BatchOutput {
    pub name: String,
    pub buffer: SampleBuffer,
    pub report: Option<QualityReport>,
}

/// Result of a completed task
#[derive(Debug, Clone)]
pub enum TaskOutput {
    Rendered(SampleBuffer),
    Exported(ExportedAudio),
    Quality(QualityReport),
    Batch(Vec<BatchOutput>),
}

/// Observable state of a queued task
#[derive(Debug, Clone)]
pub struct ProcessingTask {
    pub id: TaskId,
    pub kind: TaskKind,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    /// Last reported fraction
    pub progress: f32,
    /// Last reported stage label
    pub stage: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub output: Option<TaskOutput>,
    seq: u64,
}

impl ProcessingTask {
    /// Wall-clock time between admission and completion
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

// ============================================================================
// Progress Reporter
// ============================================================================

/// Forwards progress to a callback, never letting the fraction go backwards
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    last: f32,
    stage: String,
}

impl ProgressReporter {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            last: 0.0,
            stage: String::new(),
        }
    }

    pub fn last(&self) -> f32 {
        self.last
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn report(&mut self, stage: &str, fraction: f32) {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            self.last
        };
        self.last = self.last.max(fraction);
        self.stage = stage.to_string();
        if let Some(callback) = self.callback.as_mut() {
            callback(stage, self.last);
        }
    }

    /// Report a sub-task's `[0, 1]` progress into `[start, end]`
    pub fn report_within(&mut self, start: f32, end: f32, stage: &str, fraction: f32) {
        self.report(stage, start + (end - start) * fraction);
    }

    pub fn complete(&mut self) {
        self.report("Completed", 1.0);
    }

    pub fn fail(&mut self, message: &str) {
        let last = self.last;
        self.report(&format!("Failed: {}", message), last);
    }
}

// ============================================================================
// Queue
// ============================================================================

struct QueuedWork {
    payload: TaskPayload,
    callback: Option<ProgressCallback>,
}

/// Cooperative priority queue of offline jobs
pub struct TaskQueue {
    tasks: HashMap<TaskId, ProcessingTask>,
    work: HashMap<TaskId, QueuedWork>,
    admitted: VecDeque<TaskId>,
    concurrency: usize,
    next_seq: u64,
    renderer: OfflineRenderer,
    quality: QualityAnalyzer,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("concurrency", &self.concurrency)
            .field("stats", &self.stats())
            .finish()
    }
}

impl TaskQueue {
    /// Queue bounded by the host's reported parallelism
    pub fn new() -> Self {
        let bound = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(FALLBACK_CONCURRENCY);
        Self::with_concurrency(bound)
    }

    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            tasks: HashMap::new(),
            work: HashMap::new(),
            admitted: VecDeque::new(),
            concurrency: concurrency.max(1),
            next_seq: 0,
            renderer: OfflineRenderer::new(),
            quality: QualityAnalyzer::new(),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Queue a task and admit it if there is room
    ///
    /// Fails if the payload variant does not match `kind`.
    pub fn queue_task(
        &mut self,
        kind: TaskKind,
        payload: TaskPayload,
        priority: TaskPriority,
        on_progress: Option<ProgressCallback>,
    ) -> Result<TaskId> {
        if payload.kind() != kind {
            return Err(VoxError::PayloadMismatch {
                kind: kind.label().to_string(),
            });
        }

        let id = Uuid::new_v4().to_string();
        let task = ProcessingTask {
            id: id.clone(),
            kind,
            priority,
            status: TaskStatus::Pending,
            progress: 0.0,
            stage: String::from("Queued"),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            output: None,
            seq: self.next_seq,
        };
        self.next_seq += 1;

        self.tasks.insert(id.clone(), task);
        self.work.insert(
            id.clone(),
            QueuedWork {
                payload,
                callback: on_progress,
            },
        );
        debug!(%id, %kind, ?priority, "task queued");

        self.admit();
        Ok(id)
    }

    /// Move pending tasks into processing while below the bound
    fn admit(&mut self) {
        while self.admitted.len() < self.concurrency {
            let next = self
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::Pending)
                .min_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)))
                .map(|t| t.id.clone());
            let Some(id) = next else {
                break;
            };
            if let Some(task) = self.tasks.get_mut(&id) {
                task.status = TaskStatus::Processing;
                task.started_at = Some(Utc::now());
            }
            self.admitted.push_back(id);
        }
    }

    /// Run the oldest admitted task to completion; `None` when idle
    pub fn run_next(&mut self) -> Option<TaskId> {
        let id = self.admitted.pop_front()?;
        let work = self.work.remove(&id);

        let (result, reporter) = match work {
            Some(QueuedWork { payload, callback }) => {
                let mut reporter = ProgressReporter::new(callback);
                let result = self.execute(payload, &mut reporter);
                (result, reporter)
            }
            None => (
                Err(VoxError::TaskNotFound { id: id.clone() }),
                ProgressReporter::new(None),
            ),
        };
        self.finish(&id, result, reporter);

        self.admit();
        Some(id)
    }

    /// Drain the queue; returns how many tasks ran
    pub fn run_until_idle(&mut self) -> usize {
        let mut ran = 0;
        while self.run_next().is_some() {
            ran += 1;
        }
        ran
    }

    fn finish(&mut self, id: &str, result: Result<TaskOutput>, mut reporter: ProgressReporter) {
        let Some(task) = self.tasks.get_mut(id) else {
            return;
        };
        match result {
            Ok(output) => {
                reporter.complete();
                task.status = TaskStatus::Completed;
                task.output = Some(output);
                info!(%id, kind = %task.kind, "task completed");
            }
            Err(err) => {
                let message = err.to_string();
                reporter.fail(&message);
                task.status = TaskStatus::Failed;
                task.error = Some(message);
                warn!(%id, kind = %task.kind, error = %err, "task failed");
            }
        }
        task.progress = reporter.last();
        task.stage = reporter.stage().to_string();
        task.completed_at = Some(Utc::now());
    }

    fn execute(&self, payload: TaskPayload, reporter: &mut ProgressReporter) -> Result<TaskOutput> {
        match payload {
            TaskPayload::Render { buffer, settings } => {
                let output = self.renderer.try_render(&buffer, &settings, &mut |stage, p| {
                    reporter.report(stage, p)
                })?;
                Ok(TaskOutput::Rendered(output))
            }
            TaskPayload::Export {
                buffer,
                settings,
                options,
            } => {
                let rendered = self.renderer.try_render(&buffer, &settings, &mut |stage, p| {
                    reporter.report_within(0.0, EXPORT_RENDER_SHARE, stage, p)
                })?;
                reporter.report("Encoding", EXPORT_RENDER_SHARE);
                let exported = export_bytes(&rendered, &options)?;
                reporter.report("Encoding", 1.0);
                Ok(TaskOutput::Exported(exported))
            }
            TaskPayload::QualityCheck { buffer, settings } => {
                let report = self
                    .quality
                    .run_quality_checks(&buffer, &settings, &mut |stage, p| {
                        reporter.report(stage, p)
                    });
                Ok(TaskOutput::Quality(report))
            }
            TaskPayload::Batch {
                items,
                settings,
                quality_check,
            } => {
                let n = items.len().max(1) as f32;
                let render_share = if quality_check { BATCH_RENDER_SHARE } else { 1.0 };
                let mut outputs = Vec::with_capacity(items.len());

                for (i, item) in items.into_iter().enumerate() {
                    let base = i as f32 / n;
                    let label = format!("Rendering {}", item.name);
                    let buffer = self.renderer.try_render(&item.buffer, &settings, &mut |_, p| {
                        reporter.report(&label, base + render_share * p / n)
                    })?;

                    let report = if quality_check {
                        let label = format!("Checking {}", item.name);
                        Some(self.quality.run_quality_checks(
                            &buffer,
                            &settings,
                            &mut |_, p| {
                                reporter.report(&label, base + (render_share + (1.0 - render_share) * p) / n)
                            },
                        ))
                    } else {
                        None
                    };

                    outputs.push(BatchOutput {
                        name: item.name,
                        buffer,
                        report,
                    });
                }
                Ok(TaskOutput::Batch(outputs))
            }
        }
    }

    /// Cancel a pending task; running and finished tasks are left alone
    pub fn cancel(&mut self, id: &str) -> bool {
        let Some(task) = self.tasks.get_mut(id) else {
            return false;
        };
        if task.status != TaskStatus::Pending {
            return false;
        }

        let callback = self.work.remove(id).and_then(|w| w.callback);
        let mut reporter = ProgressReporter::new(callback);
        reporter.fail("Cancelled by user");

        task.status = TaskStatus::Failed;
        task.error = Some(String::from("Cancelled by user"));
        task.stage = reporter.stage().to_string();
        task.completed_at = Some(Utc::now());
        info!(%id, "task cancelled");
        true
    }

    pub fn task_status(&self, id: &str) -> Option<&ProcessingTask> {
        self.tasks.get(id)
    }

    /// Move the output out of a finished task
    pub fn take_output(&mut self, id: &str) -> Option<TaskOutput> {
        self.tasks.get_mut(id).and_then(|t| t.output.take())
    }

    /// Pending tasks in dequeue order
    pub fn pending_tasks(&self) -> Vec<&ProcessingTask> {
        let mut pending: Vec<_> = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .collect();
        pending.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        pending
    }

    /// Admitted tasks in admission order
    pub fn processing_tasks(&self) -> Vec<&ProcessingTask> {
        self.admitted
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .collect()
    }

    pub fn stats(&self) -> TaskStats {
        let mut stats = TaskStats {
            total: self.tasks.len(),
            ..TaskStats::default()
        };
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Forget completed and failed tasks; returns how many were removed
    pub fn clear_finished(&mut self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, t| !t.status.is_finished());
        before - self.tasks.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::io::generate_test_tone;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn render_payload() -> TaskPayload {
        TaskPayload::Render {
            buffer: generate_test_tone(440.0, 0.3, 0.1, 48000),
            settings: EffectSettings::all_disabled(),
        }
    }

    type Calls = Rc<RefCell<Vec<(String, f32)>>>;

    fn recorder() -> (Calls, ProgressCallback) {
        let calls: Calls = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&calls);
        let callback: ProgressCallback =
            Box::new(move |stage: &str, p: f32| sink.borrow_mut().push((stage.to_string(), p)));
        (calls, callback)
    }

    #[test]
    fn test_reporter_is_monotonic() {
        let (calls, callback) = recorder();
        let mut reporter = ProgressReporter::new(Some(callback));
        reporter.report("a", 0.5);
        reporter.report("b", 0.3);
        reporter.report("c", f32::NAN);
        reporter.fail("boom");

        let calls = calls.borrow();
        let fractions: Vec<f32> = calls.iter().map(|c| c.1).collect();
        assert_eq!(fractions, vec![0.5, 0.5, 0.5, 0.5]);
        assert_eq!(calls[3].0, "Failed: boom");
    }

    #[test]
    fn test_payload_must_match_kind() {
        let mut queue = TaskQueue::with_concurrency(1);
        let err = queue
            .queue_task(TaskKind::Export, render_payload(), TaskPriority::Normal, None)
            .unwrap_err();
        assert!(matches!(err, VoxError::PayloadMismatch { .. }));
        assert_eq!(queue.stats().total, 0);
    }

    #[test]
    fn test_admission_respects_bound() {
        let mut queue = TaskQueue::with_concurrency(2);
        for _ in 0..5 {
            queue
                .queue_task(TaskKind::Render, render_payload(), TaskPriority::Normal, None)
                .unwrap();
        }
        let stats = queue.stats();
        assert_eq!(stats.processing, 2);
        assert_eq!(stats.pending, 3);

        queue.run_next().unwrap();
        let stats = queue.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.processing, 2);
        assert_eq!(stats.pending, 2);
    }

    #[test]
    fn test_render_task_reports_progress() {
        let mut queue = TaskQueue::with_concurrency(1);
        let (calls, callback) = recorder();
        let id = queue
            .queue_task(
                TaskKind::Render,
                render_payload(),
                TaskPriority::High,
                Some(callback),
            )
            .unwrap();
        assert_eq!(queue.run_until_idle(), 1);

        let task = queue.task_status(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 1.0);
        assert!(task.duration_ms().is_some());

        let calls = calls.borrow();
        assert!(calls.windows(2).all(|w| w[0].1 <= w[1].1));
        assert_eq!(calls.last().unwrap(), &("Completed".to_string(), 1.0));
        assert!(matches!(queue.take_output(&id), Some(TaskOutput::Rendered(_))));
    }

    #[test]
    fn test_export_task_splits_progress() {
        let mut queue = TaskQueue::with_concurrency(1);
        let (calls, callback) = recorder();
        let id = queue
            .queue_task(
                TaskKind::Export,
                TaskPayload::Export {
                    buffer: generate_test_tone(440.0, 0.3, 0.1, 48000),
                    settings: EffectSettings::all_disabled(),
                    options: ExportOptions::default(),
                },
                TaskPriority::Normal,
                Some(callback),
            )
            .unwrap();
        queue.run_until_idle();

        let calls = calls.borrow();
        let complete = calls.iter().position(|c| c.0 == "Complete").unwrap();
        assert!((calls[complete].1 - 0.8).abs() < 1e-6);
        assert!(calls.iter().any(|c| c.0 == "Encoding" && c.1 == 1.0));

        match queue.take_output(&id) {
            Some(TaskOutput::Exported(audio)) => assert_eq!(audio.bit_depth, 16),
            other => panic!("unexpected output: {:?}", other.is_some()),
        }
    }

    #[test]
    fn test_failed_task_reports_error() {
        let mut queue = TaskQueue::with_concurrency(1);
        let (calls, callback) = recorder();
        let id = queue
            .queue_task(
                TaskKind::Render,
                TaskPayload::Render {
                    buffer: SampleBuffer::silence(1, 0, 48000),
                    settings: EffectSettings::default(),
                },
                TaskPriority::Normal,
                Some(callback),
            )
            .unwrap();
        queue.run_next();

        let task = queue.task_status(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.as_deref().unwrap().contains("no samples"));
        assert!(calls.borrow().last().unwrap().0.starts_with("Failed: "));
    }

    #[test]
    fn test_cancel_only_pending() {
        let mut queue = TaskQueue::with_concurrency(1);
        let running = queue
            .queue_task(TaskKind::Render, render_payload(), TaskPriority::Normal, None)
            .unwrap();
        let waiting = queue
            .queue_task(TaskKind::Render, render_payload(), TaskPriority::Normal, None)
            .unwrap();

        assert!(!queue.cancel(&running));
        assert!(queue.cancel(&waiting));
        assert!(!queue.cancel(&waiting));

        let task = queue.task_status(&waiting).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("Cancelled by user"));

        assert_eq!(queue.run_until_idle(), 1);
        assert_eq!(queue.clear_finished(), 2);
        assert_eq!(queue.stats(), TaskStats::default());
    }

    #[test]
    fn test_batch_with_quality_check() {
        let mut queue = TaskQueue::with_concurrency(1);
        let items = vec![
            BatchItem {
                name: "a".into(),
                buffer: generate_test_tone(220.0, 0.3, 0.2, 48000),
            },
            BatchItem {
                name: "b".into(),
                buffer: generate_test_tone(330.0, 0.3, 0.2, 48000),
            },
        ];
        let id = queue
            .queue_task(
                TaskKind::Batch,
                TaskPayload::Batch {
                    items,
                    settings: EffectSettings::all_disabled(),
                    quality_check: true,
                },
                TaskPriority::Low,
                None,
            )
            .unwrap();
        queue.run_until_idle();

        match queue.take_output(&id) {
            Some(TaskOutput::Batch(outputs)) => {
                assert_eq!(outputs.len(), 2);
                assert_eq!(outputs[1].name, "b");
                assert!(outputs.iter().all(|o| o.report.is_some()));
            }
            _ => panic!("expected batch output"),
        }
    }
}
