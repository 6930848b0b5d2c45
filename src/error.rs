//! 错误分类
//!
//! 只有 "整个运行无法产出可用报告" 的情况才会成为 `CostError` 向上传播；
//! 单个文件 / 单个方法 / 单个类块的失败由 pipeline 在单元边界吞掉并记录日志。

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CostError {
    #[error("source root not found or not a directory: {0}")]
    RootNotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("failed to write report to {path}: {source}")]
    ReportWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration in {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("failed to initialize source parser: {0}")]
    ParserInit(String),

    #[error("failed to build worker pool: {0}")]
    Pool(String),
}

impl CostError {
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CostError::Read {
            path: path.into(),
            source,
        }
    }

    pub fn report_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CostError::ReportWrite {
            path: path.into(),
            source,
        }
    }
}
