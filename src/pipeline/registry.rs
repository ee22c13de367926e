//! 步骤注册表
//!
//! 名称到编译函数的显式映射。内置步骤通过 [`StepRegistry::with_builtin_steps`]
//! 注册，外部模块可以用 [`StepRegistry::register`] 追加自己的步骤。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::pipeline::{steps, Step};

/// 将步骤的位置参数与选项编译为可执行步骤
pub type StepCompiler =
    Arc<dyn Fn(&str, &HashMap<String, String>) -> Result<Arc<dyn Step>> + Send + Sync>;

#[derive(Clone)]
pub struct StepDefinition {
    pub name: String,
    pub compiler: StepCompiler,
}

impl StepDefinition {
    pub fn new<F>(name: impl Into<String>, compiler: F) -> Self
    where
        F: Fn(&str, &HashMap<String, String>) -> Result<Arc<dyn Step>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            compiler: Arc::new(compiler),
        }
    }

    pub fn compile(&self, value: &str, options: &HashMap<String, String>) -> Result<Arc<dyn Step>> {
        (self.compiler)(value, options)
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default, Clone)]
pub struct StepRegistry {
    definitions: HashMap<String, StepDefinition>,
}

impl StepRegistry {
    /// 空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 包含 search、rex、where、table、surrounding 的注册表
    pub fn with_builtin_steps() -> Self {
        let mut registry = Self::new();
        for definition in steps::builtin_definitions() {
            registry.definitions.insert(definition.name.clone(), definition);
        }
        registry
    }

    /// 注册步骤；名称重复时返回错误
    pub fn register(&mut self, definition: StepDefinition) -> Result<()> {
        if self.definitions.contains_key(&definition.name) {
            return Err(AppError::validation_error(format!(
                "step '{}' is already registered",
                definition.name
            )));
        }
        self.definitions.insert(definition.name.clone(), definition);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&StepDefinition> {
        self.definitions.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_steps_are_registered() {
        let registry = StepRegistry::with_builtin_steps();
        assert_eq!(
            registry.names(),
            vec!["rex", "search", "surrounding", "table", "where"]
        );
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut registry = StepRegistry::with_builtin_steps();
        let duplicate = registry.get("table").cloned().unwrap();
        assert!(registry.register(duplicate).is_err());
    }

    #[test]
    fn test_compile_through_definition() {
        let registry = StepRegistry::with_builtin_steps();
        let step = registry
            .get("table")
            .unwrap()
            .compile("a, b", &HashMap::new())
            .unwrap();
        assert_eq!(step.name(), "table");
        assert_eq!(step.column_order(), Some(vec!["a".to_string(), "b".to_string()]));
    }
}
