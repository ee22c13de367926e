use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::pipeline::{DeclaredType, Parameters, Pipe, PipeType, Step, StepResult};

pub const NAME: &str = "table";

/// table 步骤：把事件投影为指定列的表格行，缺失的字段为空字符串
#[derive(Debug, Clone)]
pub struct TableStep {
    fields: Vec<String>,
}

impl TableStep {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }
}

pub fn compile(value: &str, _options: &HashMap<String, String>) -> Result<Arc<dyn Step>> {
    let fields: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();
    if fields.is_empty() {
        return Err(AppError::step_compile(NAME, "at least one field is required"));
    }
    Ok(Arc::new(TableStep::new(fields)))
}

#[async_trait]
impl Step for TableStep {
    fn name(&self) -> &str {
        NAME
    }

    fn input_type(&self) -> DeclaredType {
        DeclaredType::Fixed(PipeType::Events)
    }

    fn output_type(&self) -> DeclaredType {
        DeclaredType::Fixed(PipeType::Table)
    }

    fn column_order(&self) -> Option<Vec<String>> {
        Some(self.fields.clone())
    }

    async fn execute(&self, ctx: CancellationToken, mut pipe: Pipe, _params: Parameters) {
        while let Some(batch) = pipe.recv(&ctx).await {
            let rows: Vec<HashMap<String, String>> = batch
                .events
                .iter()
                .map(|event| {
                    self.fields
                        .iter()
                        .map(|f| {
                            let value = event.field_value(f).unwrap_or_default();
                            (f.clone(), value.to_string())
                        })
                        .collect()
                })
                .collect();

            if rows.is_empty() {
                continue;
            }
            if !pipe.send(&ctx, StepResult::table(rows)).await {
                return;
            }
        }
    }
}
