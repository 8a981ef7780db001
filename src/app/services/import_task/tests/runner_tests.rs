//! Tests for the import runner

use super::*;
use crate::Error;
use crate::app::adapters::stores::{GradeStore, IdentityStore, TaskStore};
use crate::app::models::task::{TaskEventKind, TaskState, TaskType};
use crate::app::models::{MergeStrategy, TableLayout};
use crate::app::services::import_task::TaskControl;
use tempfile::TempDir;

/// Long file giving every named student in 高一1班 80 in one subject
fn long_rows(subject: &str, names: &[String]) -> String {
    let mut content = String::from("姓名,班级,科目,分数\n");
    for name in names {
        content.push_str(&format!("{},高一1班,{},80\n", name, subject));
    }
    content
}

async fn run_new(
    runner: &ImportRunner,
    source: &Path,
    options: ImportOptions,
    task_type: TaskType,
) -> crate::ImportTask {
    let task = runner.create_task(source, options, task_type).await.unwrap();
    runner.start(&task.id, &TaskControl::new()).await.unwrap()
}

#[tokio::test]
async fn test_scenario_produces_one_record_per_subject_and_total() {
    let dir = TempDir::new().unwrap();
    let source = write_test_source(dir.path(), "scores.csv", SCENARIO_CSV);
    let store = create_test_store();
    let runner = create_test_runner(store.clone());

    let options = create_test_options().with_layout(TableLayout::Wide);
    let task = run_new(&runner, &source, options, TaskType::GradeImport).await;

    assert_eq!(task.state, TaskState::Completed);
    assert_eq!(task.progress.successful, 1);
    assert_eq!(task.progress.percentage, 100.0);

    let records = store
        .records_for_exam(&create_test_exam().key())
        .await
        .unwrap();
    let mut subjects: Vec<&str> = records.iter().map(|r| r.subject.as_str()).collect();
    subjects.sort();
    assert_eq!(subjects, vec!["总分", "数学", "语文"]);
    assert!(records.iter().all(|r| r.identity.student_id == "2024001"));

    let score_of = |subject: &str| {
        records
            .iter()
            .find(|r| r.subject == subject)
            .and_then(|r| r.score)
    };
    assert_eq!(score_of("语文"), Some(85.0));
    assert_eq!(score_of("数学"), Some(92.0));
    assert_eq!(score_of("总分"), Some(177.0));
}

#[tokio::test]
async fn test_mixed_layout_waits_for_operator() {
    let dir = TempDir::new().unwrap();
    let source = write_test_source(dir.path(), "scores.csv", SCENARIO_CSV);
    let store = create_test_store();
    let runner = create_test_runner(store.clone());

    let task = run_new(&runner, &source, create_test_options(), TaskType::GradeImport).await;
    assert_eq!(task.state, TaskState::Failed);
    assert!(task.needs_user_input);
    assert!(task.can_retry);
    assert!(task.warnings.iter().any(|w| w.contains("--layout")));
    assert_eq!(store.grade_count().await, 0);

    runner.set_layout(&task.id, TableLayout::Wide).await.unwrap();
    let retried = runner.retry(&task.id, &TaskControl::new()).await.unwrap();

    assert_eq!(retried.state, TaskState::Completed);
    assert_eq!(retried.retry_count, 1);
    assert!(!retried.needs_user_input);
    assert_eq!(store.grade_count().await, 3);
}

#[tokio::test]
async fn test_long_input_maps_one_to_one() {
    let dir = TempDir::new().unwrap();
    let source = write_test_source(dir.path(), "long.csv", LONG_CSV);
    let store = create_test_store();
    let runner = create_test_runner(store.clone());

    let task = run_new(&runner, &source, create_test_options(), TaskType::GradeImport).await;

    assert_eq!(task.state, TaskState::Completed);
    assert_eq!(task.progress.total, 4);
    assert_eq!(task.progress.successful, 4);
    assert_eq!(store.grade_count().await, 4);
    assert_eq!(store.identity_count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_wide_input_bounds() {
    let dir = TempDir::new().unwrap();
    let source = write_test_source(dir.path(), "wide.csv", &create_test_wide_csv());
    let store = create_test_store();
    let runner = create_test_runner(store.clone());

    let task = run_new(&runner, &source, create_test_options(), TaskType::GradeImport).await;

    // 7 rows, 3 subjects plus total
    assert_eq!(task.state, TaskState::Completed);
    let count = store.grade_count().await;
    assert!(count >= 7);
    assert!(count <= 7 * 4);
    assert_eq!(count, 28);
}

#[tokio::test]
async fn test_retry_after_write_failure_matches_uninterrupted_run() {
    let dir = TempDir::new().unwrap();
    let source = write_test_source(dir.path(), "wide.csv", &create_test_wide_csv());
    let options = create_test_options().with_batch_size(2);

    let reference = create_test_store();
    run_new(
        &create_test_runner(reference.clone()),
        &source,
        options.clone(),
        TaskType::GradeImport,
    )
    .await;

    let store = create_test_store();
    store.fail_write_call(2);
    let runner = create_test_runner(store.clone());

    let failed = run_new(&runner, &source, options, TaskType::GradeImport).await;
    assert_eq!(failed.state, TaskState::Failed);
    assert_eq!(failed.checkpoints.len(), 1);
    assert_eq!(failed.progress.processed, 2);
    assert!(failed.errors.iter().any(|e| !e.recoverable));
    assert_eq!(store.grade_count().await, 8);

    let retried = runner.retry(&failed.id, &TaskControl::new()).await.unwrap();
    assert_eq!(retried.state, TaskState::Completed);
    assert_eq!(retried.checkpoints.len(), 4);
    assert_eq!(retried.progress.processed, 7);
    assert_eq!(store.grade_count().await, reference.grade_count().await);
    assert_eq!(store.identity_count().await.unwrap(), 7);
    assert_eq!(store.write_call_count(), 5);
}

#[tokio::test]
async fn test_skip_strategy_counts_existing_rows_as_skipped() {
    let dir = TempDir::new().unwrap();
    let source = write_test_source(dir.path(), "long.csv", LONG_CSV);
    let store = create_test_store();
    let runner = create_test_runner(store.clone());

    run_new(&runner, &source, create_test_options(), TaskType::GradeImport).await;
    let second = run_new(
        &runner,
        &source,
        create_test_options().with_merge_strategy(MergeStrategy::Skip),
        TaskType::GradeImport,
    )
    .await;

    assert_eq!(second.state, TaskState::Completed);
    assert_eq!(second.progress.skipped, 4);
    assert_eq!(second.progress.failed, 0);
    assert_eq!(second.progress.successful, 0);
    assert_eq!(store.grade_count().await, 4);
}

#[tokio::test]
async fn test_append_strategy_keeps_both_records() {
    let dir = TempDir::new().unwrap();
    let source = write_test_source(dir.path(), "long.csv", LONG_CSV);
    let store = create_test_store();
    let runner = create_test_runner(store.clone());
    let options = create_test_options().with_merge_strategy(MergeStrategy::Append);

    run_new(&runner, &source, options.clone(), TaskType::GradeImport).await;
    run_new(&runner, &source, options, TaskType::GradeImport).await;

    assert_eq!(store.grade_count().await, 8);
}

#[tokio::test]
async fn test_invalid_cells_fail_rows_not_the_task() {
    let dir = TempDir::new().unwrap();
    let csv = "姓名,班级,科目,分数\n张三,高一1班,语文,abc\n李四,高一1班,语文,88\n,,语文,70\n";
    let source = write_test_source(dir.path(), "long.csv", csv);
    let store = create_test_store();
    let runner = create_test_runner(store.clone());

    let task = run_new(&runner, &source, create_test_options(), TaskType::GradeImport).await;

    assert_eq!(task.state, TaskState::Completed);
    assert_eq!(task.progress.successful, 1);
    assert_eq!(task.progress.failed, 2);
    assert_eq!(task.errors.len(), 2);
    assert_eq!(task.errors[0].index, Some(0));
    assert!(task.errors.iter().all(|e| e.recoverable));
    assert_eq!(store.grade_count().await, 1);
}

#[tokio::test]
async fn test_row_errors_name_the_record_and_cells() {
    let dir = TempDir::new().unwrap();
    let csv = "学号,姓名,班级,科目,分数\n2024001,张三,高一1班,语文,abc\n,李四,高一1班,数学,-5\n";
    let source = write_test_source(dir.path(), "long.csv", csv);
    let store = create_test_store();
    let runner = create_test_runner(store.clone());

    let task = run_new(&runner, &source, create_test_options(), TaskType::GradeImport).await;

    assert_eq!(task.progress.failed, 2);
    let first = &task.errors[0];
    assert_eq!(first.index, Some(0));
    assert_eq!(first.record_id.as_deref(), Some("2024001"));
    assert_eq!(first.context.get("分数").map(String::as_str), Some("abc"));

    // Without a student id the name identifies the record
    let second = &task.errors[1];
    assert_eq!(second.record_id.as_deref(), Some("李四"));
    assert_eq!(second.context.get("分数").map(String::as_str), Some("-5"));
}

#[tokio::test]
async fn test_identity_errors_carry_identity_cells() {
    let dir = TempDir::new().unwrap();
    let source = write_test_source(dir.path(), "long.csv", LONG_CSV);
    let store = create_test_store();
    let runner = create_test_runner(store.clone());

    let options = create_test_options().with_create_missing_students(false);
    let task = run_new(&runner, &source, options, TaskType::GradeImport).await;

    assert_eq!(task.state, TaskState::Completed);
    assert_eq!(task.progress.failed, 4);
    let error = &task.errors[0];
    assert_eq!(error.index, Some(0));
    assert_eq!(error.record_id.as_deref(), Some("张三"));
    assert_eq!(error.context.get("姓名").map(String::as_str), Some("张三"));
    assert_eq!(error.context.get("班级").map(String::as_str), Some("高一1班"));
}

#[tokio::test]
async fn test_namesakes_with_different_ids_keep_their_own_records() {
    let dir = TempDir::new().unwrap();
    let csv = "学号,姓名,班级,语文,数学,英语\n001,王伟,高一1班,90,90,90\n002,王伟,高一1班,60,60,60\n";
    let source = write_test_source(dir.path(), "scores.csv", csv);
    let store = create_test_store();
    let runner = create_test_runner(store.clone());

    let options = create_test_options().with_layout(TableLayout::Wide);
    let task = run_new(&runner, &source, options, TaskType::GradeImport).await;

    assert_eq!(task.state, TaskState::Completed);
    assert_eq!(task.progress.successful, 2);
    let mut ids: Vec<String> = store
        .all_identities()
        .await
        .into_iter()
        .map(|identity| identity.student_id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["001", "002"]);

    let records = store
        .records_for_exam(&create_test_exam().key())
        .await
        .unwrap();
    assert_eq!(records.len(), 6);
    let scores_of = |student_id: &str| {
        records
            .iter()
            .filter(|r| r.identity.student_id == student_id)
            .filter_map(|r| r.score)
            .collect::<Vec<_>>()
    };
    assert_eq!(scores_of("001"), vec![90.0; 3]);
    assert_eq!(scores_of("002"), vec![60.0; 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_tasks_mint_each_student_once() {
    let dir = TempDir::new().unwrap();
    let names: Vec<String> = (0..20).map(|i| format!("学生{}", i)).collect();
    let reversed: Vec<String> = names.iter().rev().cloned().collect();
    let chinese = write_test_source(dir.path(), "chinese.csv", &long_rows("语文", &names));
    let math = write_test_source(dir.path(), "math.csv", &long_rows("数学", &reversed));

    let store = create_test_store();
    let runner = Arc::new(create_test_runner(store.clone()));
    let options = create_test_options().with_batch_size(1);
    let mut task_ids = Vec::new();
    for source in [&chinese, &math] {
        let task = runner
            .create_task(source, options.clone(), TaskType::GradeImport)
            .await
            .unwrap();
        task_ids.push(task.id);
    }

    let handles: Vec<_> = task_ids
        .into_iter()
        .map(|task_id| {
            let runner = runner.clone();
            tokio::spawn(async move { runner.start(&task_id, &TaskControl::new()).await })
        })
        .collect();
    for handle in handles {
        let task = handle.await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Completed);
        assert_eq!(task.progress.successful, 20);
    }

    let identities = store.all_identities().await;
    assert_eq!(identities.len(), 20);
    assert!(identities.iter().all(|identity| identity.minted));

    let records = store
        .records_for_exam(&create_test_exam().key())
        .await
        .unwrap();
    assert_eq!(records.len(), 40);
    for identity in &identities {
        let subjects = records
            .iter()
            .filter(|r| r.identity.student_id == identity.student_id)
            .count();
        assert_eq!(subjects, 2, "{} should have both subjects", identity.name);
    }
}

#[tokio::test]
async fn test_strict_mode_fails_on_first_record_error() {
    let dir = TempDir::new().unwrap();
    let csv = "姓名,班级,科目,分数\n李四,高一1班,语文,88\n张三,高一1班,语文,abc\n";
    let source = write_test_source(dir.path(), "long.csv", csv);
    let store = create_test_store();
    let runner = create_test_runner(store.clone());

    let options = create_test_options().with_strict_mode(true);
    let task = run_new(&runner, &source, options, TaskType::GradeImport).await;

    assert_eq!(task.state, TaskState::Failed);
    assert!(task.checkpoints.is_empty());
    assert_eq!(store.grade_count().await, 0);
}

#[tokio::test]
async fn test_dry_run_commits_nothing() {
    let dir = TempDir::new().unwrap();
    let source = write_test_source(dir.path(), "long.csv", LONG_CSV);
    let store = create_test_store();
    let runner = create_test_runner(store.clone());

    let task = run_new(&runner, &source, create_test_options(), TaskType::DryRun).await;

    assert_eq!(task.state, TaskState::Completed);
    assert_eq!(task.progress.successful, 4);
    assert_eq!(store.grade_count().await, 0);
    assert_eq!(store.write_call_count(), 0);
}

#[tokio::test]
async fn test_pause_then_resume() {
    let dir = TempDir::new().unwrap();
    let source = write_test_source(dir.path(), "wide.csv", &create_test_wide_csv());
    let store = create_test_store();
    let runner = create_test_runner(store.clone());

    let task = runner
        .create_task(&source, create_test_options(), TaskType::GradeImport)
        .await
        .unwrap();
    let control = TaskControl::new();
    control.pause();

    let paused = runner.start(&task.id, &control).await.unwrap();
    assert_eq!(paused.state, TaskState::Paused);
    assert!(paused.resumable);
    assert!(paused.paused_at.is_some());
    assert_eq!(store.grade_count().await, 0);

    let resumed = runner.resume(&task.id, &control).await.unwrap();
    assert_eq!(resumed.state, TaskState::Completed);
    assert_eq!(store.grade_count().await, 28);
}

#[tokio::test]
async fn test_cancel_before_first_batch() {
    let dir = TempDir::new().unwrap();
    let source = write_test_source(dir.path(), "long.csv", LONG_CSV);
    let store = create_test_store();
    let runner = create_test_runner(store.clone());

    let task = runner
        .create_task(&source, create_test_options(), TaskType::GradeImport)
        .await
        .unwrap();
    let control = TaskControl::new();
    control.cancel();

    let cancelled = runner.start(&task.id, &control).await.unwrap();
    assert_eq!(cancelled.state, TaskState::Cancelled);
    assert_eq!(store.grade_count().await, 0);

    let error = runner
        .resume(&task.id, &TaskControl::new())
        .await
        .unwrap_err();
    assert!(matches!(error, Error::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_cancel_queued_task() {
    let dir = TempDir::new().unwrap();
    let source = write_test_source(dir.path(), "long.csv", LONG_CSV);
    let runner = create_test_runner(create_test_store());

    let task = runner
        .create_task(&source, create_test_options(), TaskType::GradeImport)
        .await
        .unwrap();
    runner.enqueue(&task.id).await.unwrap();
    let cancelled = runner.cancel(&task.id).await.unwrap();

    assert_eq!(cancelled.state, TaskState::Cancelled);
    assert!(cancelled.is_terminal());
}

#[tokio::test]
async fn test_stale_processing_task_resumes_after_checkpoint() {
    let dir = TempDir::new().unwrap();
    let source = write_test_source(dir.path(), "long.csv", LONG_CSV);
    let store = create_test_store();
    let runner = create_test_runner(store.clone());

    let task = runner
        .create_task(&source, create_test_options(), TaskType::GradeImport)
        .await
        .unwrap();
    let mut stale = runner.status(&task.id).await.unwrap();
    stale.state = TaskState::Processing;
    store.save_task(&stale).await.unwrap();

    let resumed = runner.resume(&task.id, &TaskControl::new()).await.unwrap();
    assert_eq!(resumed.state, TaskState::Completed);
    assert_eq!(store.grade_count().await, 4);
}

#[tokio::test]
async fn test_missing_identity_columns_fail_validation() {
    let dir = TempDir::new().unwrap();
    let source = write_test_source(dir.path(), "anon.csv", "语文,数学,英语\n90,95,88\n");
    let runner = create_test_runner(create_test_store());

    let task = run_new(&runner, &source, create_test_options(), TaskType::GradeImport).await;

    assert_eq!(task.state, TaskState::Failed);
    assert!(task.needs_user_input);
    assert!(task.checkpoints.is_empty());
}

#[tokio::test]
async fn test_retry_budget_is_bounded() {
    let dir = TempDir::new().unwrap();
    let source = write_test_source(dir.path(), "scores.csv", SCENARIO_CSV);
    let runner = create_test_runner(create_test_store());

    let options = create_test_options().with_max_retries(1);
    let task = run_new(&runner, &source, options, TaskType::GradeImport).await;
    assert_eq!(task.state, TaskState::Failed);

    let again = runner.retry(&task.id, &TaskControl::new()).await.unwrap();
    assert_eq!(again.state, TaskState::Failed);
    assert!(!again.can_retry);

    let error = runner
        .retry(&task.id, &TaskControl::new())
        .await
        .unwrap_err();
    assert!(matches!(error, Error::RetryLimitExceeded { .. }));
    assert!(!runner.status(&task.id).await.unwrap().can_retry);
}

#[tokio::test]
async fn test_unknown_task() {
    let runner = create_test_runner(create_test_store());
    let error = runner.status("missing").await.unwrap_err();
    assert!(matches!(error, Error::TaskNotFound { .. }));
}

#[tokio::test]
async fn test_events_follow_batch_order() {
    let dir = TempDir::new().unwrap();
    let source = write_test_source(dir.path(), "wide.csv", &create_test_wide_csv());
    let runner = create_test_runner(create_test_store());
    let mut events = runner.subscribe();

    let options = create_test_options().with_batch_size(4);
    let task = run_new(&runner, &source, options, TaskType::GradeImport).await;

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.task_id, task.id);
        kinds.push(event.kind);
    }

    let states: Vec<TaskState> = kinds
        .iter()
        .filter_map(|kind| match kind {
            TaskEventKind::State { to, .. } => Some(*to),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            TaskState::Validating,
            TaskState::Preparing,
            TaskState::Processing,
            TaskState::Completed
        ]
    );

    let checkpoint_positions: Vec<usize> = kinds
        .iter()
        .enumerate()
        .filter(|(_, kind)| matches!(kind, TaskEventKind::Checkpoint { .. }))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(checkpoint_positions.len(), 2);
    for position in checkpoint_positions {
        assert!(matches!(
            kinds[position + 1],
            TaskEventKind::Progress { .. }
        ));
    }
}
