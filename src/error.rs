use miette::Diagnostic;
use thiserror::Error;

use crate::storage::RepositoryError;

/**
 * 应用错误类型 - 使用 miette 提供用户友好的错误诊断
 *
 * 编译期错误（词法、语法、未知步骤、类型检查）在任何任务记录或工作协程
 * 创建之前同步返回给调用方；运行期错误由各步骤自行记录。
 */
#[derive(Error, Debug, Diagnostic)]
pub enum AppError {
    #[error("Unterminated quote starting at offset {offset}")]
    #[diagnostic(
        code(query::unterminated_quote),
        help("Close the quoted string with a matching '\"'")
    )]
    UnterminatedQuote { offset: usize },

    #[error("Syntax error: {message}")]
    #[diagnostic(code(query::syntax_error), help("Check the query syntax near the reported position"))]
    Syntax {
        message: String,
        offset: Option<usize>,
    },

    #[error("Unknown step: {0}")]
    #[diagnostic(
        code(pipeline::unknown_step),
        help("Available steps are registered in the step registry, e.g. search, rex, where, table, surrounding")
    )]
    UnknownStep(String),

    #[error("Invalid pipeline output: {0}")]
    #[diagnostic(
        code(pipeline::invalid_output),
        help("The last step of a pipeline must produce events or a table")
    )]
    InvalidPipelineOutput(String),

    #[error("Type mismatch after step '{step}': expected {expected}, got {actual}")]
    #[diagnostic(code(pipeline::type_mismatch))]
    TypeMismatch {
        step: String,
        expected: String,
        actual: String,
    },

    #[error("Failed to compile step '{step}': {message}")]
    #[diagnostic(code(pipeline::step_compile_error))]
    StepCompile { step: String, message: String },

    #[error("Validation error: {0}")]
    #[diagnostic(
        code(app::validation_error),
        help("Check that your input meets the required format and constraints")
    )]
    Validation(String),

    #[error("Configuration error: {0}")]
    #[diagnostic(code(app::config_error))]
    Config(String),

    #[error("Repository error: {0}")]
    #[diagnostic(code(app::repository_error))]
    Repository(#[from] RepositoryError),

    #[error("Job {0} not found")]
    #[diagnostic(code(job::not_found))]
    JobNotFound(i64),

    #[error("Could not verify state of job {job_id}: {message}")]
    #[diagnostic(
        code(job::state_unverified),
        help("The job is not running in this process and its stored state could not be read")
    )]
    JobStateUnverified { job_id: i64, message: String },

    #[error("Internal error: {0}")]
    #[diagnostic(code(app::internal_error))]
    Internal(String),
}

impl AppError {
    /**
     * 创建语法错误
     */
    pub fn syntax(message: impl Into<String>, offset: Option<usize>) -> Self {
        AppError::Syntax {
            message: message.into(),
            offset,
        }
    }

    /**
     * 创建步骤编译错误
     */
    pub fn step_compile(step: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::StepCompile {
            step: step.into(),
            message: message.into(),
        }
    }

    /**
     * 创建验证错误
     */
    pub fn validation_error(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    /**
     * 创建内部错误
     */
    pub fn internal(message: impl Into<String>) -> Self {
        AppError::Internal(message.into())
    }

    /// 是否为查询编译阶段的错误（词法、语法、步骤解析、类型检查）
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            AppError::UnterminatedQuote { .. }
                | AppError::Syntax { .. }
                | AppError::UnknownStep(_)
                | AppError::InvalidPipelineOutput(_)
                | AppError::TypeMismatch { .. }
                | AppError::StepCompile { .. }
        )
    }
}

/**
 * 统一结果类型
 */
pub type Result<T> = std::result::Result<T, AppError>;
