//! Task Queue Integration Tests
//!
//! Admission, ordering, cancellation and progress reporting of the offline
//! task queue.

use std::cell::RefCell;
use std::rc::Rc;

use pretty_assertions::assert_eq;

use voxform::engine::io::{decode_wav, generate_test_tone, ExportOptions};
use voxform::engine::settings::EffectSettings;
use voxform::engine::tasks::{
    BatchItem, ProgressCallback, TaskId, TaskKind, TaskOutput, TaskPayload, TaskPriority,
    TaskQueue, TaskStatus,
};

fn render_payload() -> TaskPayload {
    TaskPayload::Render {
        buffer: generate_test_tone(330.0, 0.2, 0.05, 48000),
        settings: EffectSettings::all_disabled(),
    }
}

fn queue_render(queue: &mut TaskQueue, priority: TaskPriority) -> TaskId {
    queue
        .queue_task(TaskKind::Render, render_payload(), priority, None)
        .unwrap()
}

#[test]
fn test_bound_limits_processing_tasks() {
    let mut queue = TaskQueue::with_concurrency(3);
    let priorities = [
        TaskPriority::Low,
        TaskPriority::Normal,
        TaskPriority::High,
        TaskPriority::Normal,
        TaskPriority::Low,
        TaskPriority::High,
        TaskPriority::Normal,
    ];
    let ids: Vec<TaskId> = priorities
        .iter()
        .map(|&p| queue_render(&mut queue, p))
        .collect();

    let processing: Vec<&str> = queue
        .processing_tasks()
        .iter()
        .map(|t| t.id.as_str())
        .collect();
    assert_eq!(processing, vec![ids[0].as_str(), ids[1].as_str(), ids[2].as_str()]);

    // Priority first, then creation order
    let pending: Vec<&str> = queue.pending_tasks().iter().map(|t| t.id.as_str()).collect();
    assert_eq!(
        pending,
        vec![
            ids[5].as_str(),
            ids[3].as_str(),
            ids[6].as_str(),
            ids[4].as_str()
        ]
    );

    // Finishing one task admits the highest-priority pending task
    assert_eq!(queue.run_next().as_deref(), Some(ids[0].as_str()));
    assert_eq!(
        queue.task_status(&ids[5]).unwrap().status,
        TaskStatus::Processing
    );
    assert_eq!(queue.stats().processing, 3);

    assert_eq!(queue.run_until_idle(), 6);
    assert_eq!(queue.stats().completed, 7);
}

#[test]
fn test_default_bound_is_positive() {
    assert!(TaskQueue::new().concurrency() >= 1);
    assert_eq!(TaskQueue::with_concurrency(0).concurrency(), 1);
}

#[test]
fn test_unknown_task_has_no_status() {
    let mut queue = TaskQueue::with_concurrency(1);
    assert!(queue.task_status("missing").is_none());
    assert!(!queue.cancel("missing"));
}

#[test]
fn test_cancelled_task_reports_failure_to_callback() {
    let mut queue = TaskQueue::with_concurrency(1);
    queue_render(&mut queue, TaskPriority::Normal);

    let calls = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&calls);
    let callback: ProgressCallback =
        Box::new(move |stage: &str, p: f32| sink.borrow_mut().push((stage.to_string(), p)));
    let id = queue
        .queue_task(
            TaskKind::Render,
            render_payload(),
            TaskPriority::Normal,
            Some(callback),
        )
        .unwrap();

    assert!(queue.cancel(&id));
    assert_eq!(
        calls.borrow().as_slice(),
        &[("Failed: Cancelled by user".to_string(), 0.0)]
    );
    assert_eq!(queue.run_until_idle(), 1);
}

#[test]
fn test_export_task_produces_decodable_wav() {
    let mut queue = TaskQueue::with_concurrency(2);
    let id = queue
        .queue_task(
            TaskKind::Export,
            TaskPayload::Export {
                buffer: generate_test_tone(440.0, 0.2, 0.1, 48000),
                settings: EffectSettings::all_disabled(),
                options: ExportOptions {
                    bit_depth: 24,
                    ..ExportOptions::default()
                },
            },
            TaskPriority::High,
            None,
        )
        .unwrap();
    queue.run_until_idle();

    let Some(TaskOutput::Exported(audio)) = queue.take_output(&id) else {
        panic!("export task produced no audio");
    };
    assert_eq!(audio.bit_depth, 24);
    assert_eq!(audio.sha256.len(), 64);

    let decoded = decode_wav(&audio.bytes).unwrap();
    assert_eq!(decoded.len(), 4800);
    assert_eq!(decoded.sample_rate, 48000);
}

#[test]
fn test_batch_progress_tracks_items() {
    let mut queue = TaskQueue::with_concurrency(1);
    let items: Vec<BatchItem> = (0..4)
        .map(|i| BatchItem {
            name: format!("take-{}", i),
            buffer: generate_test_tone(200.0 + 50.0 * i as f32, 0.2, 0.05, 48000),
        })
        .collect();

    let calls = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&calls);
    let callback: ProgressCallback =
        Box::new(move |stage: &str, p: f32| sink.borrow_mut().push((stage.to_string(), p)));

    let id = queue
        .queue_task(
            TaskKind::Batch,
            TaskPayload::Batch {
                items,
                settings: EffectSettings::all_disabled(),
                quality_check: false,
            },
            TaskPriority::Normal,
            Some(callback),
        )
        .unwrap();
    queue.run_until_idle();

    let calls = calls.borrow();
    assert!(calls.windows(2).all(|w| w[0].1 <= w[1].1));
    // Each item finishes at a quarter boundary
    for (i, name) in ["take-0", "take-1", "take-2", "take-3"].iter().enumerate() {
        let label = format!("Rendering {}", name);
        let last = calls.iter().filter(|c| c.0 == label).last().unwrap();
        assert!((last.1 - (i + 1) as f32 / 4.0).abs() < 1e-5);
    }
    assert_eq!(calls.last().unwrap().0, "Completed");

    let task = queue.task_status(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.error.is_none());
}

#[test]
fn test_clear_finished_keeps_unfinished() {
    let mut queue = TaskQueue::with_concurrency(1);
    queue_render(&mut queue, TaskPriority::Normal);
    queue_render(&mut queue, TaskPriority::Normal);
    queue.run_next();

    assert_eq!(queue.clear_finished(), 1);
    assert_eq!(queue.stats().total, 1);
}
