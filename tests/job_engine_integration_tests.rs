//! JobEngine 集成测试
//!
//! 验证任务状态机、结果写入、字段统计以及中止流程

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use log_search::models::{EventIdAndTimestamp, NewJob};
use log_search::storage::RepositoryResult;
use log_search::{
    AppError, ConfigSource, EngineConfig, EventRepository, EventWithId, InMemoryEventRepository,
    InMemoryJobRepository, JobEngine, JobRepository, JobState, LogConfig, PipeType,
    PipelineCompiler, Search, SortMode, StaticConfigSource,
};
use parking_lot::Mutex;
use rstest::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

fn ts(secs: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, secs).unwrap()
}

#[fixture]
fn events() -> Arc<InMemoryEventRepository> {
    let repo = InMemoryEventRepository::new().with_page_size(2);
    repo.add_event("web-1", "/var/log/app.log", ts(1), "userid=123 action=login");
    repo.add_event("web-1", "/var/log/app.log", ts(2), "userid=456 action=login");
    repo.add_event("web-2", "/var/log/app.log", ts(3), "userid=123 action=view");
    repo.add_event("web-2", "/var/log/app.log", ts(4), "userid=123 action=logout");
    repo.add_event("web-2", "/var/log/unconfigured.txt", ts(5), "userid=123 action=view");
    Arc::new(repo)
}

fn config_source() -> Arc<dyn ConfigSource> {
    Arc::new(StaticConfigSource::new(
        LogConfig::default().with_file("/var/log/*.log", &[]),
    ))
}

fn engine_with(
    events: Arc<dyn EventRepository>,
    jobs: Arc<InMemoryJobRepository>,
    config: Arc<dyn ConfigSource>,
) -> JobEngine {
    JobEngine::new(events, jobs, config, PipelineCompiler::default())
}

async fn wait_for_terminal(jobs: &InMemoryJobRepository, job_id: i64) -> JobState {
    tokio::time::timeout(WAIT, async {
        loop {
            let state = jobs.get(job_id).await.unwrap().state;
            if state.is_terminal() {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job did not reach a terminal state")
}

/// 事件仓库：流永不结束，用于测试中止
#[derive(Default)]
struct StalledEventRepository {
    open_streams: Mutex<Vec<mpsc::Sender<Vec<EventWithId>>>>,
}

#[async_trait]
impl EventRepository for StalledEventRepository {
    fn filter_stream(
        &self,
        _search: &Search,
        _start_time: Option<DateTime<Utc>>,
        _end_time: Option<DateTime<Utc>>,
    ) -> mpsc::Receiver<Vec<EventWithId>> {
        let (tx, rx) = mpsc::channel(1);
        self.open_streams.lock().push(tx);
        rx
    }

    async fn get_surrounding_events(
        &self,
        _event_id: i64,
        _count: usize,
    ) -> RepositoryResult<Vec<EventWithId>> {
        Ok(Vec::new())
    }

    async fn get_by_ids(
        &self,
        _ids: &[i64],
        _sort_mode: SortMode,
    ) -> RepositoryResult<Vec<EventWithId>> {
        Ok(Vec::new())
    }
}

struct FailingConfigSource;

#[async_trait]
impl ConfigSource for FailingConfigSource {
    async fn get(&self) -> log_search::Result<Arc<LogConfig>> {
        Err(AppError::Config("config store unavailable".to_string()))
    }
}

#[rstest]
#[tokio::test]
async fn test_engine_from_config_filters_with_quoted_where(events: Arc<InMemoryEventRepository>) {
    let jobs = Arc::new(InMemoryJobRepository::new());
    let config = EngineConfig::from_toml_str("[pipeline]\npipe_buffer_size = 1\n").unwrap();
    let engine = JobEngine::from_config(events, jobs.clone(), config_source(), &config);

    let job_id = engine
        .start_job(r#"userid=123 | where action="view" | table userid, action"#, None, None)
        .await
        .unwrap();
    assert_eq!(wait_for_terminal(&jobs, job_id).await, JobState::Finished);

    let rows = jobs.get_table_results(job_id, 0, 100).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].values["action"], "view");
}

#[rstest]
#[tokio::test]
async fn test_table_job_end_to_end(events: Arc<InMemoryEventRepository>) {
    let jobs = Arc::new(InMemoryJobRepository::new());
    let engine = engine_with(events, jobs.clone(), config_source());

    let job_id = engine
        .start_job("userid=123 | table userid, source", None, None)
        .await
        .unwrap();
    assert_eq!(wait_for_terminal(&jobs, job_id).await, JobState::Finished);

    let job = jobs.get(job_id).await.unwrap();
    assert_eq!(job.output_type, PipeType::Table);
    assert_eq!(job.column_order, vec!["userid", "source"]);

    let rows = jobs.get_table_results(job_id, 0, 100).await.unwrap();
    assert_eq!(
        rows.iter().map(|r| r.row_number).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert!(rows
        .iter()
        .all(|r| r.values["userid"] == "123" && r.values["source"] == "/var/log/app.log"));

    let stats = jobs.get_stats(job_id).await.unwrap();
    assert_eq!(stats.num_matched_events, 3);
    assert_eq!(stats.estimated_progress, 1.0);
    assert_eq!(
        jobs.get_field_values(job_id, "userid").await.unwrap()["123"],
        3
    );
}

#[rstest]
#[tokio::test]
async fn test_event_job_results_and_additive_stats(events: Arc<InMemoryEventRepository>) {
    let jobs = Arc::new(InMemoryJobRepository::new());
    let engine = engine_with(events, jobs.clone(), config_source());

    let job_id = engine.start_job("userid=123", None, None).await.unwrap();
    assert_eq!(wait_for_terminal(&jobs, job_id).await, JobState::Finished);

    let job = jobs.get(job_id).await.unwrap();
    assert_eq!(job.sort_mode, SortMode::TimestampDesc);
    assert_eq!(job.output_type, PipeType::Events);

    let results: Vec<EventIdAndTimestamp> = jobs.get_results(job_id, 0, 10).await.unwrap();
    assert_eq!(
        results.iter().map(|r| r.timestamp).collect::<Vec<_>>(),
        vec![ts(4), ts(3), ts(1)]
    );

    // 事件分多个批次到达，统计按批次累加
    let users = jobs.get_field_values(job_id, "userid").await.unwrap();
    assert_eq!(users["123"], 3);
    let hosts = jobs.get_field_values(job_id, "host").await.unwrap();
    assert_eq!(hosts["web-2"], 2);
    assert_eq!(hosts["web-1"], 1);
    let occurrences = jobs.get_field_occurrences(job_id).await.unwrap();
    assert_eq!(occurrences["action"], 3);
}

#[rstest]
#[tokio::test]
async fn test_time_range_limits_results(events: Arc<InMemoryEventRepository>) {
    let jobs = Arc::new(InMemoryJobRepository::new());
    let engine = engine_with(events, jobs.clone(), config_source());

    let job_id = engine
        .start_job("action=login", Some(ts(2)), Some(ts(4)))
        .await
        .unwrap();
    wait_for_terminal(&jobs, job_id).await;

    let job = jobs.get(job_id).await.unwrap();
    assert_eq!(job.start_time, Some(ts(2)));
    assert_eq!(jobs.get_num_matched_events(job_id).await.unwrap(), 1);
}

#[rstest]
#[case("userid=123 | nosuchstep x")]
#[case("\"unterminated")]
#[case("userid=123 | where")]
#[tokio::test]
async fn test_compile_failure_creates_no_job(#[case] query: &str) {
    let jobs = Arc::new(InMemoryJobRepository::new());
    let engine = engine_with(Arc::new(InMemoryEventRepository::new()), jobs.clone(), config_source());

    let err = engine.start_job(query, None, None).await.unwrap_err();
    assert!(err.is_compile_error(), "unexpected error: {err:?}");
    assert!(jobs.get(1).await.is_err());
}

#[tokio::test]
async fn test_abort_running_job() {
    let jobs = Arc::new(InMemoryJobRepository::new());
    let engine = engine_with(
        Arc::new(StalledEventRepository::default()),
        jobs.clone(),
        config_source(),
    );

    let job_id = engine.start_job("anything", None, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(jobs.get(job_id).await.unwrap().state, JobState::Running);
    assert_eq!(engine.registry().running().await, vec![job_id]);

    engine.abort(job_id).await.unwrap();
    assert_eq!(wait_for_terminal(&jobs, job_id).await, JobState::Aborted);

    // 退出后从注册表移除，再次中止走仓库校验路径
    tokio::time::timeout(WAIT, async {
        while !engine.registry().running().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    engine.abort(job_id).await.unwrap();
    assert_eq!(jobs.get(job_id).await.unwrap().state, JobState::Aborted);
}

#[tokio::test]
async fn test_abort_unregistered_running_job_marks_it_aborted() {
    let jobs = Arc::new(InMemoryJobRepository::new());
    let engine = engine_with(Arc::new(InMemoryEventRepository::new()), jobs.clone(), config_source());

    // 模拟进程重启后遗留的 Running 记录
    let orphan = jobs
        .insert(NewJob {
            query: "x".to_string(),
            start_time: None,
            end_time: None,
            sort_mode: SortMode::TimestampDesc,
            output_type: PipeType::Events,
            column_order: Vec::new(),
        })
        .await
        .unwrap();

    engine.abort(orphan).await.unwrap();
    assert_eq!(jobs.get(orphan).await.unwrap().state, JobState::Aborted);
}

#[tokio::test]
async fn test_abort_unknown_job() {
    let jobs = Arc::new(InMemoryJobRepository::new());
    let engine = engine_with(Arc::new(InMemoryEventRepository::new()), jobs, config_source());

    assert!(matches!(
        engine.abort(404).await.unwrap_err(),
        AppError::JobNotFound(404)
    ));
}

#[rstest]
#[tokio::test]
async fn test_abort_finished_job_is_a_no_op(events: Arc<InMemoryEventRepository>) {
    let jobs = Arc::new(InMemoryJobRepository::new());
    let engine = engine_with(events, jobs.clone(), config_source());

    let job_id = engine.start_job("userid=456", None, None).await.unwrap();
    assert_eq!(wait_for_terminal(&jobs, job_id).await, JobState::Finished);
    tokio::time::sleep(Duration::from_millis(20)).await;

    engine.abort(job_id).await.unwrap();
    assert_eq!(jobs.get(job_id).await.unwrap().state, JobState::Finished);
}

#[tokio::test]
async fn test_shutdown_aborts_every_job() {
    let jobs = Arc::new(InMemoryJobRepository::new());
    let engine = engine_with(
        Arc::new(StalledEventRepository::default()),
        jobs.clone(),
        config_source(),
    );

    let first = engine.start_job("a", None, None).await.unwrap();
    let second = engine.start_job("b | table b", None, None).await.unwrap();
    engine.shutdown();

    assert_eq!(wait_for_terminal(&jobs, first).await, JobState::Aborted);
    assert_eq!(wait_for_terminal(&jobs, second).await, JobState::Aborted);
}

#[rstest]
#[tokio::test]
async fn test_step_failure_ends_in_partial_failure(events: Arc<InMemoryEventRepository>) {
    let jobs = Arc::new(InMemoryJobRepository::new());
    let engine = engine_with(events, jobs.clone(), Arc::new(FailingConfigSource));

    let job_id = engine.start_job("userid=123", None, None).await.unwrap();
    assert_eq!(wait_for_terminal(&jobs, job_id).await, JobState::PartialFailure);
    assert_eq!(jobs.get_num_matched_events(job_id).await.unwrap(), 0);
}

#[rstest]
#[tokio::test]
async fn test_surrounding_job_preserves_repository_order(events: Arc<InMemoryEventRepository>) {
    let jobs = Arc::new(InMemoryJobRepository::new());
    let engine = engine_with(events, jobs.clone(), config_source());

    let job_id = engine
        .start_job("| surrounding eventId=3 2", None, None)
        .await
        .unwrap();
    assert_eq!(wait_for_terminal(&jobs, job_id).await, JobState::Finished);

    let job = jobs.get(job_id).await.unwrap();
    assert_eq!(job.sort_mode, SortMode::PreserveArgOrder);
    let ids: Vec<i64> = jobs
        .get_results(job_id, 0, 10)
        .await
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec![4, 3]);

    let missing = engine
        .start_job("| surrounding eventId=999", None, None)
        .await
        .unwrap();
    assert_eq!(wait_for_terminal(&jobs, missing).await, JobState::PartialFailure);
}
