// ============================================================================
// Java Method Cost Analyzer - Library Interface
// ============================================================================
//
// 分析核心: 实体模型 + 调用图 + 两个传播不动点，运行在有界并发管道上。
// 源码解析器是可替换的协作者 (scanner::SourceParser)。

pub mod call_graph;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod propagation;
pub mod report;
pub mod scanner;
pub mod scoring;
pub mod symbol_table;

pub use engine::{Analysis, AnalysisSummary, CostAnalyzer};
pub use error::CostError;
pub use model::{AnalysisContext, ClassInfo, CostLevel, MethodInfo, MethodKey, Visibility};
