use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::models::SortMode;
use crate::pipeline::{Parameters, Pipe, PipeType, Step, StepResult};

/**
 * 编译完成的管道
 *
 * 持有步骤、连接它们的通道以及最终输出通道。
 * 在 [`Pipeline::execute`] 之前不会启动任何任务。
 */
pub struct Pipeline {
    steps: Vec<Arc<dyn Step>>,
    pipes: Vec<Pipe>,
    output: mpsc::Receiver<StepResult>,
    output_type: PipeType,
    sort_mode: SortMode,
    column_order: Vec<String>,
}

impl Pipeline {
    pub(crate) fn new(
        steps: Vec<Arc<dyn Step>>,
        pipes: Vec<Pipe>,
        output: mpsc::Receiver<StepResult>,
        output_type: PipeType,
        sort_mode: SortMode,
        column_order: Vec<String>,
    ) -> Self {
        Self {
            steps,
            pipes,
            output,
            output_type,
            sort_mode,
            column_order,
        }
    }

    pub fn steps(&self) -> &[Arc<dyn Step>] {
        &self.steps
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn output_type(&self) -> PipeType {
        self.output_type
    }

    pub fn sort_mode(&self) -> SortMode {
        self.sort_mode
    }

    /// 输出为表格时为最后一个生成表格步骤的列顺序，否则为空
    pub fn column_order(&self) -> &[String] {
        &self.column_order
    }

    /// 每个已编译步骤的 (输入, 输出) 具体类型
    pub fn pipe_types(&self) -> Vec<(PipeType, PipeType)> {
        self.pipes
            .iter()
            .map(|p| (p.input_type, p.output_type))
            .collect()
    }

    /**
     * 为每个步骤启动一个任务，返回最终输出通道
     *
     * 必须在 tokio 运行时中调用。
     */
    pub fn execute(self, ctx: CancellationToken, params: Parameters) -> ExecutingPipeline {
        let mut workers = Vec::with_capacity(self.steps.len());

        for (index, (step, pipe)) in self.steps.into_iter().zip(self.pipes).enumerate() {
            let span = info_span!(
                "pipeline_step",
                step = step.name(),
                index,
                job_id = ?params.job_id
            );
            let ctx = ctx.clone();
            let params = params.clone();
            workers.push(tokio::spawn(
                async move {
                    step.execute(ctx, pipe, params).await;
                    debug!("Step finished");
                }
                .instrument(span),
            ));
        }

        ExecutingPipeline {
            output: self.output,
            workers,
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("steps", &self.step_names())
            .field("output_type", &self.output_type)
            .field("sort_mode", &self.sort_mode)
            .field("column_order", &self.column_order)
            .finish()
    }
}

/// 正在运行的管道
pub struct ExecutingPipeline {
    pub output: mpsc::Receiver<StepResult>,
    workers: Vec<JoinHandle<()>>,
}

impl ExecutingPipeline {
    pub fn into_parts(self) -> (mpsc::Receiver<StepResult>, Vec<JoinHandle<()>>) {
        (self.output, self.workers)
    }

    /// 等待所有步骤任务退出
    pub async fn join(self) {
        drop(self.output);
        for joined in join_all(self.workers).await {
            if let Err(e) = joined {
                warn!(error = %e, "Step task did not complete");
            }
        }
    }
}
