//! 管道编译
//!
//! 1. 解析查询为步骤列表，为首个 search 步骤注入时间范围
//! 2. 通过注册表编译每个步骤；若没有生成步骤则补一个空 search
//! 3. 丢弃最后一个生成步骤之前的所有步骤
//! 4. 检查相邻步骤的类型并解析 `Propagate`
//! 5. 为每个步骤分配有界通道，第一个步骤的输入是已关闭的通道
//!
//! 任何错误都在启动任务之前返回。

use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::models::SortMode;
use crate::pipeline::{
    is_generator, DeclaredType, Pipe, PipeType, Pipeline, Step, StepRegistry, StepResult,
};
use crate::query::parse_pipeline;

pub const DEFAULT_PIPE_BUFFER_SIZE: usize = 100;

const SEARCH_STEP: &str = "search";
const START_TIME_OPTION: &str = "startTime";
const END_TIME_OPTION: &str = "endTime";

static BUILTIN_REGISTRY: Lazy<Arc<StepRegistry>> =
    Lazy::new(|| Arc::new(StepRegistry::with_builtin_steps()));

/// 使用内置步骤和默认缓冲区大小编译查询
pub fn compile(
    query: &str,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
) -> Result<Pipeline> {
    PipelineCompiler::new(Arc::clone(&BUILTIN_REGISTRY)).compile(query, start_time, end_time)
}

#[derive(Debug, Clone)]
pub struct PipelineCompiler {
    registry: Arc<StepRegistry>,
    pipe_buffer_size: usize,
}

impl Default for PipelineCompiler {
    fn default() -> Self {
        Self::new(Arc::clone(&BUILTIN_REGISTRY))
    }
}

impl PipelineCompiler {
    pub fn new(registry: Arc<StepRegistry>) -> Self {
        Self {
            registry,
            pipe_buffer_size: DEFAULT_PIPE_BUFFER_SIZE,
        }
    }

    pub fn with_pipe_buffer_size(mut self, size: usize) -> Self {
        self.pipe_buffer_size = size.max(1);
        self
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    pub fn compile(
        &self,
        query: &str,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<Pipeline> {
        let parsed = parse_pipeline(query)?;

        let mut steps: Vec<Arc<dyn Step>> = Vec::with_capacity(parsed.len() + 1);
        for (index, mut parsed_step) in parsed.into_iter().enumerate() {
            if index == 0 && parsed_step.step_type == SEARCH_STEP {
                inject_time_bounds(&mut parsed_step.args, start_time, end_time);
            }
            let definition = self
                .registry
                .get(&parsed_step.step_type)
                .ok_or_else(|| AppError::UnknownStep(parsed_step.step_type.clone()))?;
            steps.push(definition.compile(&parsed_step.value, &parsed_step.args)?);
        }

        if !steps.iter().any(|s| is_generator(s.as_ref())) {
            let definition = self.registry.get(SEARCH_STEP).ok_or_else(|| {
                AppError::internal("pipeline has no generator and no search step is registered")
            })?;
            let mut options = HashMap::new();
            inject_time_bounds(&mut options, start_time, end_time);
            steps.insert(0, definition.compile("", &options)?);
        }

        if let Some(last_generator) = steps.iter().rposition(|s| is_generator(s.as_ref())) {
            if last_generator > 0 {
                debug!(discarded = last_generator, "Discarding steps before the last generator");
            }
            steps.drain(..last_generator);
        }

        let resolved = type_check(&steps)?;
        let output_type = resolved
            .last()
            .map(|(_, output)| *output)
            .unwrap_or(PipeType::None);

        let sort_mode = steps
            .iter()
            .rev()
            .find_map(|s| s.sort_mode())
            .unwrap_or(SortMode::TimestampDesc);

        let column_order = if output_type == PipeType::Table {
            steps
                .iter()
                .rev()
                .find_map(|s| s.column_order())
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        let (pipes, output) = self.wire(&resolved);

        debug!(
            steps = ?steps.iter().map(|s| s.name()).collect::<Vec<_>>(),
            %output_type,
            ?sort_mode,
            "Compiled pipeline"
        );

        Ok(Pipeline::new(
            steps,
            pipes,
            output,
            output_type,
            sort_mode,
            column_order,
        ))
    }

    fn wire(&self, resolved: &[(PipeType, PipeType)]) -> (Vec<Pipe>, mpsc::Receiver<StepResult>) {
        // 生成步骤不读取输入，第一个输入通道在创建时即关闭
        let (closed, mut input) = mpsc::channel(1);
        drop(closed);

        let mut pipes = Vec::with_capacity(resolved.len());
        for &(input_type, output_type) in resolved {
            let (output, next_input) = mpsc::channel(self.pipe_buffer_size);
            pipes.push(Pipe {
                input,
                input_type,
                output,
                output_type,
            });
            input = next_input;
        }
        (pipes, input)
    }
}

fn inject_time_bounds(
    options: &mut HashMap<String, String>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
) {
    if let Some(start) = start_time {
        options.insert(
            START_TIME_OPTION.to_string(),
            start.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        );
    }
    if let Some(end) = end_time {
        options.insert(
            END_TIME_OPTION.to_string(),
            end.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        );
    }
}

/**
 * 检查步骤链的类型并解析每个步骤的具体输入/输出类型
 */
fn type_check(steps: &[Arc<dyn Step>]) -> Result<Vec<(PipeType, PipeType)>> {
    let mut resolved = Vec::with_capacity(steps.len());
    let mut current = PipeType::None;
    let mut previous_name = "<start>";

    for step in steps {
        let (input, output) = match (step.input_type(), step.output_type()) {
            (DeclaredType::Propagate, DeclaredType::Propagate) => (current, current),
            (DeclaredType::Fixed(input), DeclaredType::Fixed(output)) => {
                if input != current {
                    return Err(AppError::TypeMismatch {
                        step: previous_name.to_string(),
                        expected: format!("{} (input of '{}')", input, step.name()),
                        actual: current.to_string(),
                    });
                }
                (input, output)
            }
            (declared_input, declared_output) => {
                return Err(AppError::internal(format!(
                    "step '{}' declares input {} and output {}; propagate must be used on both sides",
                    step.name(),
                    declared_input,
                    declared_output
                )));
            }
        };
        resolved.push((input, output));
        current = output;
        previous_name = step.name();
    }

    match current {
        PipeType::Events | PipeType::Table => Ok(resolved),
        PipeType::None => Err(AppError::InvalidPipelineOutput(format!(
            "last step '{}' produces no output",
            previous_name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Parameters, StepDefinition};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use tokio_util::sync::CancellationToken;

    struct SinkStep;

    #[async_trait]
    impl Step for SinkStep {
        fn name(&self) -> &str {
            "sink"
        }
        fn input_type(&self) -> DeclaredType {
            DeclaredType::Fixed(PipeType::Events)
        }
        fn output_type(&self) -> DeclaredType {
            DeclaredType::Fixed(PipeType::None)
        }
        async fn execute(&self, _ctx: CancellationToken, _pipe: Pipe, _params: Parameters) {}
    }

    struct HalfPropagateStep;

    #[async_trait]
    impl Step for HalfPropagateStep {
        fn name(&self) -> &str {
            "half"
        }
        fn input_type(&self) -> DeclaredType {
            DeclaredType::Propagate
        }
        fn output_type(&self) -> DeclaredType {
            DeclaredType::Fixed(PipeType::Events)
        }
        async fn execute(&self, _ctx: CancellationToken, _pipe: Pipe, _params: Parameters) {}
    }

    fn registry_with(definitions: Vec<StepDefinition>) -> Arc<StepRegistry> {
        let mut registry = StepRegistry::with_builtin_steps();
        for definition in definitions {
            registry.register(definition).unwrap();
        }
        Arc::new(registry)
    }

    #[test]
    fn test_later_search_supersedes_earlier_steps() {
        let pipeline = compile("a | search b", None, None).unwrap();
        assert_eq!(pipeline.step_names(), vec!["search"]);

        let pipeline = compile("| search \"abc\" | search \"def\"", None, None).unwrap();
        assert_eq!(pipeline.step_names(), vec!["search"]);
    }

    #[test]
    fn test_empty_query_defaults() {
        let pipeline = compile("", None, None).unwrap();
        assert_eq!(pipeline.output_type(), PipeType::Events);
        assert!(pipeline.column_order().is_empty());
        assert_eq!(pipeline.sort_mode(), SortMode::TimestampDesc);
    }

    #[test]
    fn test_table_column_order() {
        let pipeline = compile("| table \"host, source, _time\"", None, None).unwrap();
        assert_eq!(pipeline.output_type(), PipeType::Table);
        assert_eq!(pipeline.column_order(), ["host", "source", "_time"]);
        assert_eq!(pipeline.step_names(), vec!["search", "table"]);
    }

    #[test]
    fn test_surrounding_preserves_argument_order() {
        let pipeline = compile("| surrounding eventId=1", None, None).unwrap();
        assert_eq!(pipeline.sort_mode(), SortMode::PreserveArgOrder);
        assert_eq!(pipeline.step_names(), vec!["surrounding"]);
    }

    #[test]
    fn test_where_propagates_types() {
        let pipeline = compile("| where x=y", None, None).unwrap();
        assert_eq!(pipeline.output_type(), PipeType::Events);
        assert_eq!(
            pipeline.pipe_types(),
            vec![
                (PipeType::None, PipeType::Events),
                (PipeType::Events, PipeType::Events)
            ]
        );

        let pipeline = compile("| table \"x\" | where x=y", None, None).unwrap();
        assert_eq!(pipeline.output_type(), PipeType::Table);
        assert_eq!(pipeline.pipe_types()[2], (PipeType::Table, PipeType::Table));
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let err = compile("foo | table x | rex \"(?P<a>b)\"", None, None).unwrap_err();
        assert!(matches!(err, AppError::TypeMismatch { ref step, .. } if step == "table"));
    }

    #[test]
    fn test_unknown_step() {
        let err = compile("foo | frobnicate x", None, None).unwrap_err();
        assert!(matches!(err, AppError::UnknownStep(ref name) if name == "frobnicate"));
    }

    #[test]
    fn test_output_none_is_invalid() {
        let registry = registry_with(vec![StepDefinition::new("sink", |_, _| {
            Ok(Arc::new(SinkStep) as Arc<dyn Step>)
        })]);
        let err = PipelineCompiler::new(registry)
            .compile("foo | sink x", None, None)
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidPipelineOutput(_)));
    }

    #[test]
    fn test_half_propagate_is_internal_error() {
        let registry = registry_with(vec![StepDefinition::new("half", |_, _| {
            Ok(Arc::new(HalfPropagateStep) as Arc<dyn Step>)
        })]);
        let err = PipelineCompiler::new(registry)
            .compile("foo | half x", None, None)
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[test]
    fn test_step_compile_errors_surface() {
        assert!(matches!(
            compile("| surrounding count=5", None, None).unwrap_err(),
            AppError::StepCompile { .. }
        ));
        assert!(matches!(
            compile("foo | rex \"(unclosed\"", None, None).unwrap_err(),
            AppError::StepCompile { .. }
        ));
    }

    #[test]
    fn test_time_bounds_reach_first_search() {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let mut options = HashMap::new();
        inject_time_bounds(&mut options, Some(start), Some(end));
        assert_eq!(options[START_TIME_OPTION], "2024-01-02T03:04:05Z");
        assert_eq!(options[END_TIME_OPTION], "2024-01-03T00:00:00Z");

        let pipeline = compile("error", Some(start), Some(end)).unwrap();
        assert_eq!(pipeline.step_names(), vec!["search"]);

        let pipeline = compile("| where a=b", Some(start), Some(end)).unwrap();
        assert_eq!(pipeline.step_names(), vec!["search", "where"]);
    }

    #[test]
    fn test_lex_errors_abort_compile() {
        assert!(matches!(
            compile("\"unterminated", None, None).unwrap_err(),
            AppError::UnterminatedQuote { .. }
        ));
    }
}
