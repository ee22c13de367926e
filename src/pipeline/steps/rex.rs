use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::pipeline::{DeclaredType, Parameters, Pipe, PipeType, Step, StepResult};
use crate::services::field_extractor::extract_with_regexes;

pub const NAME: &str = "rex";

const DEFAULT_FIELD: &str = "_raw";

/**
 * rex 步骤：对事件的某个字段执行正则提取
 *
 * 捕获组全部具名时按组名生成字段，否则要求恰好两个捕获组（键、值）。
 * 缺少源字段的事件原样通过。
 */
#[derive(Debug, Clone)]
pub struct RexStep {
    field: String,
    extractor: Regex,
}

impl RexStep {
    pub fn new(field: impl Into<String>, extractor: Regex) -> Self {
        Self {
            field: field.into(),
            extractor,
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }
}

pub fn compile(value: &str, options: &HashMap<String, String>) -> Result<Arc<dyn Step>> {
    if value.is_empty() {
        return Err(AppError::step_compile(NAME, "a regular expression is required"));
    }
    let extractor = Regex::new(value)
        .map_err(|e| AppError::step_compile(NAME, format!("invalid regular expression: {}", e)))?;
    let field = options
        .get("field")
        .cloned()
        .unwrap_or_else(|| DEFAULT_FIELD.to_string());
    Ok(Arc::new(RexStep::new(field, extractor)))
}

#[async_trait]
impl Step for RexStep {
    fn name(&self) -> &str {
        NAME
    }

    fn input_type(&self) -> DeclaredType {
        DeclaredType::Fixed(PipeType::Events)
    }

    fn output_type(&self) -> DeclaredType {
        DeclaredType::Fixed(PipeType::Events)
    }

    async fn execute(&self, ctx: CancellationToken, mut pipe: Pipe, _params: Parameters) {
        let extractors = std::slice::from_ref(&self.extractor);

        while let Some(mut batch) = pipe.recv(&ctx).await {
            for event in batch.events.iter_mut() {
                let Some(value) = event.field_value(&self.field) else {
                    continue;
                };
                let extracted = extract_with_regexes(extractors, value);
                event.fields.extend(extracted);
            }

            if !pipe.send(&ctx, StepResult::events(batch.events)).await {
                return;
            }
        }
    }
}
