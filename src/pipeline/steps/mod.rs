//! 内置管道步骤

pub mod rex;
pub mod search;
pub mod surrounding;
pub mod table;
pub mod where_step;

use std::collections::HashMap;
use tracing::debug;

use crate::models::EventWithId;
use crate::pipeline::StepDefinition;
use crate::services::FileParser;

pub use rex::RexStep;
pub use search::SearchStep;
pub use surrounding::SurroundingStep;
pub use table::TableStep;
pub use where_step::WhereStep;

/// 注册表使用的内置步骤定义
pub fn builtin_definitions() -> Vec<StepDefinition> {
    vec![
        StepDefinition::new(search::NAME, search::compile),
        StepDefinition::new(rex::NAME, rex::compile),
        StepDefinition::new(where_step::NAME, where_step::compile),
        StepDefinition::new(table::NAME, table::compile),
        StepDefinition::new(surrounding::NAME, surrounding::compile),
    ]
}

/**
 * 从小写化的事件文本中提取字段，并写入 `host`、`source`
 */
pub(crate) fn extract_event_fields(parser: &FileParser, event: &EventWithId) -> HashMap<String, String> {
    let mut fields = match parser.extract(&event.raw.to_lowercase()) {
        Ok(fields) => fields,
        Err(e) => {
            debug!(event_id = event.id, error = %e, "Field extraction failed");
            HashMap::new()
        }
    };
    fields.insert("host".to_string(), event.host.clone());
    fields.insert("source".to_string(), event.source.clone());
    fields
}
