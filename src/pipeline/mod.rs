//! 流式管道
//!
//! 查询被编译为一串步骤，每个步骤运行在独立的 tokio 任务中，
//! 相邻步骤之间通过有界 mpsc 通道（[`Pipe`]）传递批次。
//!
//! ## 类型
//!
//! 步骤声明的类型是 [`DeclaredType`]，其中 `Propagate` 表示"沿用上游类型"；
//! 编译器在构造 [`Pipe`] 之前将其解析为具体的 [`PipeType`]，
//! 因此运行期的管道永远不会携带 `Propagate`。
//!
//! ## 取消
//!
//! 每个任务持有一个 `CancellationToken`。步骤的每次接收与发送都通过
//! [`Pipe::recv`] / [`Pipe::send`] 完成，它们同时等待取消信号。

pub mod compiler;
pub mod registry;
pub mod runtime;
pub mod steps;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::{ConfigSource, EventWithExtractedFields, SortMode};
use crate::storage::EventRepository;

pub use compiler::{compile, PipelineCompiler, DEFAULT_PIPE_BUFFER_SIZE};
pub use registry::{StepCompiler, StepDefinition, StepRegistry};
pub use runtime::{ExecutingPipeline, Pipeline};

/// 管道中实际流动的数据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipeType {
    /// 无输入（生成步骤）
    None,
    Events,
    Table,
}

impl fmt::Display for PipeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipeType::None => write!(f, "none"),
            PipeType::Events => write!(f, "events"),
            PipeType::Table => write!(f, "table"),
        }
    }
}

/// 步骤声明的输入/输出类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclaredType {
    Fixed(PipeType),
    /// 沿用上游流入的类型
    Propagate,
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclaredType::Fixed(t) => t.fmt(f),
            DeclaredType::Propagate => write!(f, "propagate"),
        }
    }
}

/**
 * 一个批次
 *
 * 根据所在管道的类型，只有 `events` 或 `table_rows` 之一有意义。
 */
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepResult {
    pub events: Vec<EventWithExtractedFields>,
    pub table_rows: Vec<HashMap<String, String>>,
}

impl StepResult {
    pub fn events(events: Vec<EventWithExtractedFields>) -> Self {
        Self {
            events,
            table_rows: Vec::new(),
        }
    }

    pub fn table(rows: Vec<HashMap<String, String>>) -> Self {
        Self {
            events: Vec::new(),
            table_rows: rows,
        }
    }
}

/**
 * 一个步骤的输入与输出通道
 *
 * 步骤执行结束时 `Pipe` 被丢弃，输出通道随之关闭。
 */
pub struct Pipe {
    pub input: mpsc::Receiver<StepResult>,
    pub input_type: PipeType,
    pub output: mpsc::Sender<StepResult>,
    pub output_type: PipeType,
}

impl Pipe {
    /// 接收下一个批次；上游关闭或任务被取消时返回 `None`
    pub async fn recv(&mut self, ctx: &CancellationToken) -> Option<StepResult> {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => None,
            batch = self.input.recv() => batch,
        }
    }

    /// 发送一个批次；下游已关闭或任务被取消时返回 `false`
    pub async fn send(&self, ctx: &CancellationToken, batch: StepResult) -> bool {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => false,
            sent = self.output.send(batch) => sent.is_ok(),
        }
    }
}

/// 步骤运行期失败记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub step: String,
    pub message: String,
}

/**
 * 单个任务内所有步骤共享的失败收集器
 *
 * 步骤因依赖失败而提前结束时在这里登记，任务据此区分
 * 正常结束与部分失败。
 */
#[derive(Debug, Clone, Default)]
pub struct StepFailures {
    inner: Arc<Mutex<Vec<StepFailure>>>,
}

impl StepFailures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, step: impl Into<String>, message: impl Into<String>) {
        self.inner.lock().push(StepFailure {
            step: step.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<StepFailure> {
        self.inner.lock().clone()
    }
}

/**
 * 所有步骤共享的执行参数
 */
#[derive(Clone)]
pub struct Parameters {
    pub config_source: Arc<dyn ConfigSource>,
    pub events_repo: Arc<dyn EventRepository>,
    pub failures: StepFailures,
    pub job_id: Option<i64>,
}

impl Parameters {
    pub fn new(config_source: Arc<dyn ConfigSource>, events_repo: Arc<dyn EventRepository>) -> Self {
        Self {
            config_source,
            events_repo,
            failures: StepFailures::new(),
            job_id: None,
        }
    }

    pub fn with_job_id(mut self, job_id: i64) -> Self {
        self.job_id = Some(job_id);
        self
    }
}

/**
 * 管道步骤
 *
 * `execute` 必须在每条退出路径上丢弃 `pipe`（从而关闭输出），
 * 并在每次等待输入或输出时观察取消信号。
 */
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    fn input_type(&self) -> DeclaredType;

    fn output_type(&self) -> DeclaredType;

    /// 覆盖任务结果的排序策略
    fn sort_mode(&self) -> Option<SortMode> {
        None
    }

    /// 生成表格的步骤返回列顺序
    fn column_order(&self) -> Option<Vec<String>> {
        None
    }

    async fn execute(&self, ctx: CancellationToken, pipe: Pipe, params: Parameters);
}

impl fmt::Debug for dyn Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name())
            .field("input_type", &self.input_type())
            .field("output_type", &self.output_type())
            .finish()
    }
}

/// 生成步骤不读取上游输入
pub fn is_generator(step: &dyn Step) -> bool {
    step.input_type() == DeclaredType::Fixed(PipeType::None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pipe_recv_observes_cancellation() {
        let (_input_tx, input) = mpsc::channel(1);
        let (output, _output_rx) = mpsc::channel(1);
        let mut pipe = Pipe {
            input,
            input_type: PipeType::Events,
            output,
            output_type: PipeType::Events,
        };
        let ctx = CancellationToken::new();
        ctx.cancel();
        assert!(pipe.recv(&ctx).await.is_none());
    }

    #[tokio::test]
    async fn test_pipe_send_observes_cancellation_under_backpressure() {
        let (_input_tx, input) = mpsc::channel(1);
        let (output, _output_rx) = mpsc::channel(1);
        let pipe = Pipe {
            input,
            input_type: PipeType::Events,
            output,
            output_type: PipeType::Events,
        };
        let ctx = CancellationToken::new();
        assert!(pipe.send(&ctx, StepResult::default()).await);

        let cancel = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            cancel.cancel();
        });
        // 缓冲区已满，只能通过取消返回
        assert!(!pipe.send(&ctx, StepResult::default()).await);
    }

    #[test]
    fn test_step_failures_are_shared() {
        let failures = StepFailures::new();
        let clone = failures.clone();
        clone.record("rex", "boom");
        assert!(!failures.is_empty());
        assert_eq!(failures.snapshot()[0].step, "rex");
    }
}
