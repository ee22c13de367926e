//! 任务生命周期管理
//!
//! 基于 Actor 和消息传递管理运行中任务的取消令牌
//!
//! ## 设计
//!
//! - [`JobRegistry`] 是客户端句柄，只持有一个消息发送端
//! - 任务 ID 到 `CancellationToken` 的映射只由 Actor 任务访问
//! - [`engine::JobEngine`] 在启动任务时注册，在任务退出时移除，在中止时取消

pub mod engine;
pub mod stats;

use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{AppError, Result};

pub use engine::JobEngine;
pub use stats::{gather_event_stats, gather_row_stats};

/// Actor 消息类型
#[derive(Debug)]
enum ActorMessage {
    /// 登记运行中的任务
    Register {
        job_id: i64,
        token: CancellationToken,
        respond_to: oneshot::Sender<()>,
    },
    /// 任务退出后移除
    Remove { job_id: i64 },
    /// 取消任务；返回是否找到
    Cancel {
        job_id: i64,
        respond_to: oneshot::Sender<bool>,
    },
    /// 获取运行中的任务 ID
    Running {
        respond_to: oneshot::Sender<Vec<i64>>,
    },
    /// 取消所有任务并停止 Actor
    Shutdown,
}

/// 任务注册表 Actor
struct JobRegistryActor {
    tokens: HashMap<i64, CancellationToken>,
}

impl JobRegistryActor {
    fn new() -> Self {
        Self {
            tokens: HashMap::new(),
        }
    }

    fn handle_message(&mut self, msg: ActorMessage) {
        match msg {
            ActorMessage::Register {
                job_id,
                token,
                respond_to,
            } => {
                self.tokens.insert(job_id, token);
                let _ = respond_to.send(());
            }
            ActorMessage::Remove { job_id } => {
                self.tokens.remove(&job_id);
            }
            ActorMessage::Cancel { job_id, respond_to } => {
                let found = match self.tokens.get(&job_id) {
                    Some(token) => {
                        token.cancel();
                        true
                    }
                    None => false,
                };
                let _ = respond_to.send(found);
            }
            ActorMessage::Running { respond_to } => {
                let mut ids: Vec<i64> = self.tokens.keys().copied().collect();
                ids.sort_unstable();
                let _ = respond_to.send(ids);
            }
            ActorMessage::Shutdown => {
                for token in self.tokens.values() {
                    token.cancel();
                }
            }
        }
    }

    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<ActorMessage>) {
        while let Some(msg) = receiver.recv().await {
            if matches!(msg, ActorMessage::Shutdown) {
                self.handle_message(msg);
                break;
            }
            self.handle_message(msg);
        }

        info!(remaining = self.tokens.len(), "Job registry stopped");
    }
}

/// 任务注册表句柄（客户端）
#[derive(Debug, Clone)]
pub struct JobRegistry {
    sender: mpsc::UnboundedSender<ActorMessage>,
}

impl JobRegistry {
    /// 启动 Actor，必须在 tokio 运行时中调用
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        let actor = JobRegistryActor::new();
        tokio::spawn(async move {
            actor.run(receiver).await;
        });

        Self { sender }
    }

    fn stopped() -> AppError {
        AppError::internal("job registry has stopped")
    }

    /// 登记任务；返回时登记已生效
    pub async fn register(&self, job_id: i64, token: CancellationToken) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ActorMessage::Register {
                job_id,
                token,
                respond_to: tx,
            })
            .map_err(|_| Self::stopped())?;
        rx.await.map_err(|_| Self::stopped())
    }

    pub fn remove(&self, job_id: i64) {
        if self.sender.send(ActorMessage::Remove { job_id }).is_err() {
            debug!(job_id, "Job registry has stopped, nothing to remove");
        }
    }

    /// 取消已登记的任务；未登记时返回 `false`
    pub async fn cancel(&self, job_id: i64) -> bool {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(ActorMessage::Cancel {
                job_id,
                respond_to: tx,
            })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// 当前登记的任务 ID（升序）
    pub async fn running(&self) -> Vec<i64> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(ActorMessage::Running { respond_to: tx })
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// 取消所有已登记的任务并停止 Actor
    pub fn shutdown(&self) {
        let _ = self.sender.send(ActorMessage::Shutdown);
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
