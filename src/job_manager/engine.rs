//! 任务引擎
//!
//! `start_job` 编译查询、写入任务记录并在后台任务中消费管道输出；
//! `abort` 通过 [`JobRegistry`] 取消运行中的任务。

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::error::{AppError, Result};
use crate::infrastructure::config::EngineConfig;
use crate::job_manager::{gather_event_stats, gather_row_stats, JobRegistry};
use crate::models::{ConfigSource, EventIdAndTimestamp, JobState, NewJob, TableRow};
use crate::pipeline::{ExecutingPipeline, Parameters, PipeType, PipelineCompiler, StepResult};
use crate::storage::{EventRepository, JobRepository, RepositoryError};

/**
 * 任务引擎
 *
 * 每个任务从根取消令牌派生子令牌，`shutdown` 取消根令牌即可中止全部任务。
 */
pub struct JobEngine {
    compiler: PipelineCompiler,
    event_repo: Arc<dyn EventRepository>,
    job_repo: Arc<dyn JobRepository>,
    config_source: Arc<dyn ConfigSource>,
    registry: JobRegistry,
    root: CancellationToken,
}

impl JobEngine {
    /// 必须在 tokio 运行时中调用
    pub fn new(
        event_repo: Arc<dyn EventRepository>,
        job_repo: Arc<dyn JobRepository>,
        config_source: Arc<dyn ConfigSource>,
        compiler: PipelineCompiler,
    ) -> Self {
        Self {
            compiler,
            event_repo,
            job_repo,
            config_source,
            registry: JobRegistry::new(),
            root: CancellationToken::new(),
        }
    }

    /// 使用内置步骤与配置中的管道参数
    pub fn from_config(
        event_repo: Arc<dyn EventRepository>,
        job_repo: Arc<dyn JobRepository>,
        config_source: Arc<dyn ConfigSource>,
        config: &EngineConfig,
    ) -> Self {
        let compiler =
            PipelineCompiler::default().with_pipe_buffer_size(config.pipeline.pipe_buffer_size);
        Self::new(event_repo, job_repo, config_source, compiler)
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /**
     * 启动任务并返回任务 ID
     *
     * 编译失败时直接返回错误，不会写入任务记录。
     */
    pub async fn start_job(
        &self,
        query: &str,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        let pipeline = self.compiler.compile(query, start_time, end_time)?;

        let job_id = self
            .job_repo
            .insert(NewJob {
                query: query.to_string(),
                start_time,
                end_time,
                sort_mode: pipeline.sort_mode(),
                output_type: pipeline.output_type(),
                column_order: pipeline.column_order().to_vec(),
            })
            .await?;

        let token = self.root.child_token();
        if let Err(e) = self.registry.register(job_id, token.clone()).await {
            if let Err(update) = self.job_repo.update_state(job_id, JobState::Aborted).await {
                error!(job_id, error = %update, "Failed to abort unregistered job");
            }
            return Err(e);
        }

        info!(job_id, query, steps = ?pipeline.step_names(), "Starting job");

        let output_type = pipeline.output_type();
        let params = Parameters::new(Arc::clone(&self.config_source), Arc::clone(&self.event_repo))
            .with_job_id(job_id);
        let failures = params.failures.clone();
        let executing = pipeline.execute(token.clone(), params);

        let job_repo = Arc::clone(&self.job_repo);
        let registry = self.registry.clone();
        tokio::spawn(
            async move {
                let cancelled = drain(job_id, output_type, executing, &token, job_repo.as_ref()).await;

                let state = if cancelled {
                    JobState::Aborted
                } else if !failures.is_empty() {
                    for failure in failures.snapshot() {
                        warn!(step = %failure.step, message = %failure.message, "Step failed");
                    }
                    JobState::PartialFailure
                } else {
                    JobState::Finished
                };

                if let Err(e) = job_repo.update_state(job_id, state).await {
                    error!(error = %e, ?state, "Failed to update final job state");
                }
                registry.remove(job_id);
                info!(?state, "Job exited");
            }
            .instrument(info_span!("job", job_id)),
        );

        Ok(job_id)
    }

    /**
     * 中止任务
     *
     * 任务未在本进程登记时读取仓库状态：仍为 Running 则强制标记为 Aborted。
     */
    pub async fn abort(&self, job_id: i64) -> Result<()> {
        if self.registry.cancel(job_id).await {
            debug!(job_id, "Cancellation requested");
            return Ok(());
        }

        debug!(job_id, "Job is not registered, verifying stored state");
        let job = match self.job_repo.get(job_id).await {
            Ok(job) => job,
            Err(RepositoryError::JobNotFound(id)) => return Err(AppError::JobNotFound(id)),
            Err(e) => {
                return Err(AppError::JobStateUnverified {
                    job_id,
                    message: e.to_string(),
                })
            }
        };

        if job.state == JobState::Running {
            warn!(
                job_id,
                "Job is not registered but its state is Running, marking it Aborted. It may still be running"
            );
            self.job_repo
                .update_state(job_id, JobState::Aborted)
                .await
                .map_err(|e| AppError::JobStateUnverified {
                    job_id,
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// 取消所有运行中的任务
    pub fn shutdown(&self) {
        info!("Shutting down job engine");
        self.root.cancel();
        self.registry.shutdown();
    }
}

/// 消费管道输出直到关闭或取消；返回是否因取消退出
async fn drain(
    job_id: i64,
    output_type: PipeType,
    executing: ExecutingPipeline,
    token: &CancellationToken,
    job_repo: &dyn JobRepository,
) -> bool {
    let (mut output, _workers) = executing.into_parts();
    let mut next_row: i64 = 0;

    loop {
        let batch = tokio::select! {
            biased;
            _ = token.cancelled() => return true,
            batch = output.recv() => batch,
        };
        let Some(batch) = batch else {
            return false;
        };

        match output_type {
            PipeType::Table => store_rows(job_id, batch, &mut next_row, job_repo).await,
            _ => store_events(job_id, batch, job_repo).await,
        }
    }
}

async fn store_events(job_id: i64, batch: StepResult, job_repo: &dyn JobRepository) {
    if batch.events.is_empty() {
        return;
    }
    debug!(count = batch.events.len(), "Got matching events");

    let results: Vec<EventIdAndTimestamp> = batch
        .events
        .iter()
        .map(|e| EventIdAndTimestamp {
            id: e.id,
            timestamp: e.timestamp,
        })
        .collect();
    if let Err(e) = job_repo.add_results(job_id, &results).await {
        error!(error = %e, "Failed to add results");
        return;
    }

    let stats = gather_event_stats(&batch.events);
    if let Err(e) = job_repo.add_field_stats(job_id, &stats).await {
        error!(error = %e, "Failed to add field stats");
    }
}

async fn store_rows(job_id: i64, batch: StepResult, next_row: &mut i64, job_repo: &dyn JobRepository) {
    if batch.table_rows.is_empty() {
        return;
    }
    debug!(count = batch.table_rows.len(), "Got table rows");

    let stats = gather_row_stats(&batch.table_rows);
    let rows: Vec<TableRow> = batch
        .table_rows
        .into_iter()
        .map(|values| {
            let row = TableRow {
                row_number: *next_row,
                values,
            };
            *next_row += 1;
            row
        })
        .collect();
    if let Err(e) = job_repo.add_table_results(job_id, &rows).await {
        error!(error = %e, "Failed to add table results");
        return;
    }

    if let Err(e) = job_repo.add_field_stats(job_id, &stats).await {
        error!(error = %e, "Failed to add field stats");
    }
}
