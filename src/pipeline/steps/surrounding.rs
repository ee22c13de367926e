use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::error::{AppError, Result};
use crate::models::{EventWithExtractedFields, SortMode};
use crate::pipeline::steps::extract_event_fields;
use crate::pipeline::{DeclaredType, Parameters, Pipe, PipeType, Step, StepResult};
use crate::services::FileMatcher;

pub const NAME: &str = "surrounding";

pub const DEFAULT_COUNT: usize = 100;

/**
 * surrounding 步骤：读取某个事件在同一来源中的相邻事件
 *
 * 不经过搜索过滤，结果保持仓库给出的顺序，只发送一个批次。
 */
#[derive(Debug, Clone)]
pub struct SurroundingStep {
    event_id: i64,
    count: usize,
}

impl SurroundingStep {
    pub fn new(event_id: i64, count: usize) -> Self {
        Self { event_id, count }
    }

    pub fn event_id(&self) -> i64 {
        self.event_id
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

pub fn compile(value: &str, options: &HashMap<String, String>) -> Result<Arc<dyn Step>> {
    let event_id = options
        .get("eventId")
        .ok_or_else(|| AppError::step_compile(NAME, "eventId must be provided"))?;
    let event_id: i64 = event_id.parse().map_err(|e| {
        AppError::step_compile(NAME, format!("eventId '{}' is not an integer: {}", event_id, e))
    })?;

    let positional = Some(value).filter(|v| !v.is_empty());
    let count = match options.get("count").map(String::as_str).or(positional) {
        Some(raw) => raw.parse::<usize>().map_err(|e| {
            AppError::step_compile(NAME, format!("count '{}' is not a non-negative integer: {}", raw, e))
        })?,
        None => DEFAULT_COUNT,
    };

    Ok(Arc::new(SurroundingStep::new(event_id, count)))
}

#[async_trait]
impl Step for SurroundingStep {
    fn name(&self) -> &str {
        NAME
    }

    fn input_type(&self) -> DeclaredType {
        DeclaredType::Fixed(PipeType::None)
    }

    fn output_type(&self) -> DeclaredType {
        DeclaredType::Fixed(PipeType::Events)
    }

    fn sort_mode(&self) -> Option<SortMode> {
        Some(SortMode::PreserveArgOrder)
    }

    async fn execute(&self, ctx: CancellationToken, pipe: Pipe, params: Parameters) {
        let fetched = tokio::select! {
            biased;
            _ = ctx.cancelled() => return,
            fetched = params.events_repo.get_surrounding_events(self.event_id, self.count) => fetched,
        };
        let events = match fetched {
            Ok(events) => events,
            Err(e) => {
                error!(event_id = self.event_id, error = %e, "Failed to read surrounding events");
                params.failures.record(NAME, e.to_string());
                return;
            }
        };

        let config = match params.config_source.get().await {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "Failed to read config for surrounding events");
                params.failures.record(NAME, format!("failed to read config: {}", e));
                return;
            }
        };
        let files = FileMatcher::new(&config);

        let mut result = Vec::with_capacity(events.len());
        for event in events {
            let Some(parser) = files.parser_for(&event.source) else {
                warn!(source = %event.source, event_id = event.id, "No file configuration for event, it will be ignored");
                continue;
            };
            let fields = extract_event_fields(parser, &event);
            result.push(EventWithExtractedFields::from_event(event, fields));
        }

        pipe.send(&ctx, StepResult::events(result)).await;
    }
}
