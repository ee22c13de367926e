//! 查询解析与管道编译集成测试

use async_trait::async_trait;
use log_search::pipeline::{DeclaredType, Parameters, Pipe, StepDefinition, StepResult};
use log_search::{
    compile, parse_pipeline, parse_search, AppError, PipeType, PipelineCompiler, Step,
    StepRegistry,
};
use proptest::prelude::*;
use rstest::rstest;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[rstest]
#[case("userid=123 | table userid, source", vec!["search", "table"], PipeType::Table)]
#[case("error | rex \"code=(?P<code>\\d+)\" | where code=500", vec!["search", "rex", "where"], PipeType::Events)]
#[case("a | table a | where a=1", vec!["search", "table", "where"], PipeType::Table)]
#[case("| rex \"(?P<x>.)\"", vec!["search", "rex"], PipeType::Events)]
#[case("a | search b", vec!["search"], PipeType::Events)]
fn test_compiled_shapes(
    #[case] query: &str,
    #[case] steps: Vec<&str>,
    #[case] output: PipeType,
) {
    let pipeline = compile(query, None, None).unwrap();
    assert_eq!(pipeline.step_names(), steps);
    assert_eq!(pipeline.output_type(), output);
}

#[test]
fn test_search_clause_round_trip_through_pipeline() {
    let steps = parse_pipeline("host=web-1 NOT debug source IN (a.log, b.log) | table host").unwrap();
    let search = parse_search(&steps[0].value).unwrap();
    assert!(search.hosts.contains("web-1"));
    assert!(search.not_fragments.contains("debug"));
    assert_eq!(search.sources.len(), 2);
}

/// 接收表格并输出事件的自定义步骤
struct TableToEvents;

#[async_trait]
impl Step for TableToEvents {
    fn name(&self) -> &str {
        "explode"
    }

    fn input_type(&self) -> DeclaredType {
        DeclaredType::Fixed(PipeType::Table)
    }

    fn output_type(&self) -> DeclaredType {
        DeclaredType::Fixed(PipeType::Events)
    }

    async fn execute(&self, ctx: CancellationToken, mut pipe: Pipe, _params: Parameters) {
        while pipe.recv(&ctx).await.is_some() {
            if !pipe.send(&ctx, StepResult::events(Vec::new())).await {
                return;
            }
        }
    }
}

#[test]
fn test_custom_step_registration() {
    let mut registry = StepRegistry::with_builtin_steps();
    registry
        .register(StepDefinition::new("explode", |_: &str, _: &HashMap<String, String>| {
            Ok(Arc::new(TableToEvents) as Arc<dyn Step>)
        }))
        .unwrap();
    let compiler = PipelineCompiler::new(Arc::new(registry));

    let pipeline = compiler.compile("x | table x | explode all", None, None).unwrap();
    assert_eq!(pipeline.output_type(), PipeType::Events);

    assert!(matches!(
        compiler.compile("x | explode all", None, None).unwrap_err(),
        AppError::TypeMismatch { .. }
    ));
}

proptest! {
    #[test]
    fn prop_compile_never_panics(query in "[ -~]{0,40}") {
        let _ = compile(&query, None, None);
    }

    #[test]
    fn prop_plain_words_compile_to_single_search(words in prop::collection::vec("[a-z][a-z0-9]{0,8}", 1..6)) {
        let query = words.join(" ");
        let keywords = ["in", "not"];
        prop_assume!(words.iter().all(|w| !keywords.contains(&w.as_str())));

        let pipeline = compile(&query, None, None).unwrap();
        prop_assert_eq!(pipeline.step_names(), vec!["search"]);

        let search = parse_search(&query).unwrap();
        for word in &words {
            prop_assert!(search.fragments.contains(word));
        }
    }
}
