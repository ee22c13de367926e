//! 进程内仓库实现
//!
//! 供测试以及不需要持久化的嵌入场景使用。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

use crate::models::{
    EventIdAndTimestamp, EventWithId, FieldStats, Job, JobState, NewJob, Search, SortMode,
    TableRow,
};
use crate::pipeline::PipeType;
use crate::services::compile_pattern;
use crate::storage::{EventRepository, JobRepository, RepositoryError, RepositoryResult};

const DEFAULT_PAGE_SIZE: usize = 500;

/**
 * 内存事件仓库
 *
 * 事件按 ID 递增保存；`filter_stream` 只下推时间范围与 source/host 条件，
 * 其余条件由 search 步骤负责。
 */
pub struct InMemoryEventRepository {
    events: RwLock<Vec<EventWithId>>,
    next_id: AtomicI64,
    page_size: usize,
}

impl Default for InMemoryEventRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventRepository {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// 添加事件并返回分配的 ID
    pub fn add_event(
        &self,
        host: impl Into<String>,
        source: impl Into<String>,
        timestamp: DateTime<Utc>,
        raw: impl Into<String>,
    ) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.events.write().push(EventWithId {
            id,
            raw: raw.into(),
            timestamp,
            host: host.into(),
            source: source.into(),
        });
        id
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

/// source/host 下推过滤条件
struct Pushdown {
    sources: Vec<Regex>,
    not_sources: Vec<Regex>,
    hosts: Vec<Regex>,
    not_hosts: Vec<Regex>,
}

impl Pushdown {
    fn new(search: &Search) -> Self {
        let compile = |values: &HashSet<String>| -> Vec<Regex> {
            values
                .iter()
                .filter_map(|v| compile_pattern(v).ok())
                .collect()
        };
        Self {
            sources: compile(&search.sources),
            not_sources: compile(&search.not_sources),
            hosts: compile(&search.hosts),
            not_hosts: compile(&search.not_hosts),
        }
    }

    fn accepts(&self, event: &EventWithId) -> bool {
        let included = |patterns: &[Regex], value: &str| {
            patterns.is_empty() || patterns.iter().any(|p| p.is_match(value))
        };
        let excluded = |patterns: &[Regex], value: &str| patterns.iter().any(|p| p.is_match(value));

        included(&self.sources, &event.source)
            && included(&self.hosts, &event.host)
            && !excluded(&self.not_sources, &event.source)
            && !excluded(&self.not_hosts, &event.host)
    }
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    fn filter_stream(
        &self,
        search: &Search,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> mpsc::Receiver<Vec<EventWithId>> {
        let pushdown = Pushdown::new(search);
        let mut matching: Vec<EventWithId> = self
            .events
            .read()
            .iter()
            .filter(|e| start_time.map_or(true, |start| e.timestamp >= start))
            .filter(|e| end_time.map_or(true, |end| e.timestamp <= end))
            .filter(|e| pushdown.accepts(e))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));

        let page_size = self.page_size;
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            for page in matching.chunks(page_size) {
                if tx.send(page.to_vec()).await.is_err() {
                    debug!("Event stream receiver dropped, stopping");
                    return;
                }
            }
        });
        rx
    }

    async fn get_surrounding_events(
        &self,
        event_id: i64,
        count: usize,
    ) -> RepositoryResult<Vec<EventWithId>> {
        let events = self.events.read();
        let target = events
            .iter()
            .find(|e| e.id == event_id)
            .ok_or(RepositoryError::EventNotFound(event_id))?;

        let mut same_source: Vec<&EventWithId> =
            events.iter().filter(|e| e.source == target.source).collect();
        same_source.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        let position = same_source
            .iter()
            .position(|e| e.id == event_id)
            .ok_or(RepositoryError::EventNotFound(event_id))?;

        // 目标之前（更新）与之后（包含目标本身）各取 count / 2 个
        let half = count / 2;
        let start = position.saturating_sub(half);
        let end = (position + half).min(same_source.len());
        Ok(same_source[start..end].iter().map(|e| (*e).clone()).collect())
    }

    async fn get_by_ids(
        &self,
        ids: &[i64],
        sort_mode: SortMode,
    ) -> RepositoryResult<Vec<EventWithId>> {
        let events = self.events.read();
        let by_id: HashMap<i64, &EventWithId> = events.iter().map(|e| (e.id, e)).collect();
        let mut found: Vec<EventWithId> = ids
            .iter()
            .filter_map(|id| by_id.get(id).map(|e| (*e).clone()))
            .collect();
        match sort_mode {
            SortMode::TimestampDesc => {
                found.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)))
            }
            SortMode::None => found.sort_by_key(|e| e.id),
            SortMode::PreserveArgOrder => {}
        }
        Ok(found)
    }
}

#[derive(Debug)]
struct JobRecord {
    job: Job,
    results: Vec<EventIdAndTimestamp>,
    table_rows: Vec<TableRow>,
    field_stats: HashMap<(String, String), i64>,
}

impl JobRecord {
    fn ensure_running(&self) -> RepositoryResult<()> {
        if self.job.state.is_terminal() {
            return Err(RepositoryError::JobTerminated {
                job_id: self.job.id,
                state: self.job.state,
            });
        }
        Ok(())
    }
}

/**
 * 内存任务仓库
 *
 * 每个任务一条记录，使用 DashMap 支持多个任务并发写入。
 */
#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: DashMap<i64, JobRecord>,
    next_id: AtomicI64,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_record<T>(
        &self,
        job_id: i64,
        f: impl FnOnce(&JobRecord) -> RepositoryResult<T>,
    ) -> RepositoryResult<T> {
        let record = self
            .jobs
            .get(&job_id)
            .ok_or(RepositoryError::JobNotFound(job_id))?;
        f(&record)
    }

    fn with_record_mut<T>(
        &self,
        job_id: i64,
        f: impl FnOnce(&mut JobRecord) -> RepositoryResult<T>,
    ) -> RepositoryResult<T> {
        let mut record = self
            .jobs
            .get_mut(&job_id)
            .ok_or(RepositoryError::JobNotFound(job_id))?;
        f(&mut record)
    }
}

fn page<T: Clone>(items: &[T], skip: usize, take: usize) -> Vec<T> {
    items.iter().skip(skip).take(take).cloned().collect()
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn insert(&self, job: NewJob) -> RepositoryResult<i64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.jobs.insert(
            id,
            JobRecord {
                job: job.into_job(id),
                results: Vec::new(),
                table_rows: Vec::new(),
                field_stats: HashMap::new(),
            },
        );
        Ok(id)
    }

    async fn add_results(
        &self,
        job_id: i64,
        events: &[EventIdAndTimestamp],
    ) -> RepositoryResult<()> {
        self.with_record_mut(job_id, |record| {
            record.ensure_running()?;
            record.results.extend_from_slice(events);
            Ok(())
        })
    }

    async fn add_table_results(&self, job_id: i64, rows: &[TableRow]) -> RepositoryResult<()> {
        self.with_record_mut(job_id, |record| {
            record.ensure_running()?;
            record.table_rows.extend_from_slice(rows);
            Ok(())
        })
    }

    async fn add_field_stats(&self, job_id: i64, stats: &[FieldStats]) -> RepositoryResult<()> {
        self.with_record_mut(job_id, |record| {
            record.ensure_running()?;
            for stat in stats {
                *record
                    .field_stats
                    .entry((stat.key.clone(), stat.value.clone()))
                    .or_insert(0) += stat.occurrences;
            }
            Ok(())
        })
    }

    async fn update_state(&self, job_id: i64, state: JobState) -> RepositoryResult<()> {
        self.with_record_mut(job_id, |record| {
            record.ensure_running()?;
            record.job.state = state;
            Ok(())
        })
    }

    async fn get(&self, job_id: i64) -> RepositoryResult<Job> {
        self.with_record(job_id, |record| Ok(record.job.clone()))
    }

    async fn get_results(
        &self,
        job_id: i64,
        skip: usize,
        take: usize,
    ) -> RepositoryResult<Vec<EventIdAndTimestamp>> {
        self.with_record(job_id, |record| {
            if record.job.sort_mode == SortMode::TimestampDesc {
                let mut sorted = record.results.clone();
                sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
                Ok(page(&sorted, skip, take))
            } else {
                Ok(page(&record.results, skip, take))
            }
        })
    }

    async fn get_table_results(
        &self,
        job_id: i64,
        skip: usize,
        take: usize,
    ) -> RepositoryResult<Vec<TableRow>> {
        self.with_record(job_id, |record| {
            let mut rows = record.table_rows.clone();
            rows.sort_by_key(|r| r.row_number);
            Ok(page(&rows, skip, take))
        })
    }

    async fn get_field_occurrences(&self, job_id: i64) -> RepositoryResult<HashMap<String, i64>> {
        self.with_record(job_id, |record| {
            let mut occurrences = HashMap::new();
            for (key, _) in record.field_stats.keys() {
                *occurrences.entry(key.clone()).or_insert(0) += 1;
            }
            Ok(occurrences)
        })
    }

    async fn get_field_values(
        &self,
        job_id: i64,
        field: &str,
    ) -> RepositoryResult<HashMap<String, i64>> {
        self.with_record(job_id, |record| {
            Ok(record
                .field_stats
                .iter()
                .filter(|((key, _), _)| key == field)
                .map(|((_, value), count)| (value.clone(), *count))
                .collect())
        })
    }

    async fn get_num_matched_events(&self, job_id: i64) -> RepositoryResult<i64> {
        self.with_record(job_id, |record| {
            let count = match record.job.output_type {
                PipeType::Table => record.table_rows.len(),
                _ => record.results.len(),
            };
            Ok(count as i64)
        })
    }
}
