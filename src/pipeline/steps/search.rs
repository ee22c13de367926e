use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{AppError, Result};
use crate::models::{EventWithExtractedFields, Search};
use crate::pipeline::steps::extract_event_fields;
use crate::pipeline::{DeclaredType, Parameters, Pipe, PipeType, Step, StepResult};
use crate::query::parse_search;
use crate::services::{FileMatcher, SearchMatcher};

pub const NAME: &str = "search";

/**
 * search 步骤：从事件仓库读取并过滤事件
 *
 * 每个批次都重新读取配置，因此扫描期间的配置变更会生效。
 * 找不到文件配置的事件会被跳过并记录警告。
 */
#[derive(Debug, Clone)]
pub struct SearchStep {
    search: Search,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

impl SearchStep {
    pub fn new(
        search: Search,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            search,
            start_time,
            end_time,
        }
    }

    pub fn search(&self) -> &Search {
        &self.search
    }

    pub fn time_range(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        (self.start_time, self.end_time)
    }
}

fn parse_time_option(options: &HashMap<String, String>, key: &str) -> Result<Option<DateTime<Utc>>> {
    options
        .get(key)
        .map(|value| {
            DateTime::parse_from_rfc3339(value)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| AppError::step_compile(NAME, format!("invalid {} '{}': {}", key, value, e)))
        })
        .transpose()
}

pub fn compile(value: &str, options: &HashMap<String, String>) -> Result<Arc<dyn Step>> {
    let start_time = parse_time_option(options, "startTime")?;
    let end_time = parse_time_option(options, "endTime")?;
    let search = parse_search(value)?;
    Ok(Arc::new(SearchStep::new(search, start_time, end_time)))
}

#[async_trait]
impl Step for SearchStep {
    fn name(&self) -> &str {
        NAME
    }

    fn input_type(&self) -> DeclaredType {
        DeclaredType::Fixed(PipeType::None)
    }

    fn output_type(&self) -> DeclaredType {
        DeclaredType::Fixed(PipeType::Events)
    }

    async fn execute(&self, ctx: CancellationToken, pipe: Pipe, params: Parameters) {
        let matcher = SearchMatcher::new(&self.search);
        let mut stream = params
            .events_repo
            .filter_stream(&self.search, self.start_time, self.end_time);

        loop {
            let batch = tokio::select! {
                biased;
                _ = ctx.cancelled() => return,
                batch = stream.recv() => batch,
            };
            let Some(events) = batch else {
                debug!("Event stream exhausted");
                return;
            };

            let config = match params.config_source.get().await {
                Ok(config) => config,
                Err(e) => {
                    error!(error = %e, "Failed to read config, stopping search");
                    params.failures.record(NAME, format!("failed to read config: {}", e));
                    return;
                }
            };
            let files = FileMatcher::new(&config);

            let mut unconfigured: HashSet<String> = HashSet::new();
            let mut matched = Vec::new();
            for event in events {
                if !matcher.matches_raw(&event.raw) {
                    continue;
                }
                let Some(parser) = files.parser_for(&event.source) else {
                    if unconfigured.insert(event.source.clone()) {
                        warn!(source = %event.source, "No file configuration for event source, skipping its events");
                    }
                    continue;
                };
                let fields = extract_event_fields(parser, &event);
                if matcher.matches_fields(&fields) {
                    matched.push(EventWithExtractedFields::from_event(event, fields));
                }
            }

            if matched.is_empty() {
                continue;
            }
            if !pipe.send(&ctx, StepResult::events(matched)).await {
                return;
            }
        }
    }
}
