// ============================================================================
// 分析引擎 - 阶段编排
// ============================================================================
//
// discover -> parse (并行) -> 屏障 -> call graph (并行) -> 屏障
//          -> call propagation (串行) -> inheritance propagation (逐轮并行) -> report
//
// 每个阶段返回时其所有单元都已完成 (WorkerPool 保证)。

use std::cmp::Reverse;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::call_graph::{build_call_graph, CallGraphStats};
use crate::config::CostConfig;
use crate::error::CostError;
use crate::model::{AnalysisContext, CostLevel};
use crate::pipeline::{ProgressListener, StageOutcome, WorkerPool};
use crate::propagation::{propagate_calls, propagate_inheritance};
use crate::report::{self, ReportFormat, ReportStats};
use crate::scanner::tree_sitter_java::JavaTreeSitterAnalyzer;
use crate::scanner::{discover_sources, SourceParser};
use crate::scoring::ComplexityScorer;

pub const PARSE_STAGE_LABEL: &str = "Parsing Java files";

/// Counters collected across one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalysisSummary {
    pub files: usize,
    pub parse: StageOutcome,
    pub classes: usize,
    pub methods: usize,
    pub graph: CallGraphStats,
    pub call_passes: usize,
    pub inheritance_iterations: usize,
}

/// Fully propagated context of one source tree.
#[derive(Debug)]
pub struct Analysis {
    pub root: PathBuf,
    pub ctx: AnalysisContext,
    pub summary: AnalysisSummary,
}

/// One row of the `rank` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedMethod {
    pub id: String,
    pub complexity: u8,
    pub cost: CostLevel,
    pub fan_in: usize,
    pub fan_out: usize,
    pub file: String,
}

impl Analysis {
    /// Most expensive methods: complexity desc, fan-in desc, then id.
    pub fn rank(&self, limit: usize) -> Vec<RankedMethod> {
        let mut rows: Vec<RankedMethod> = Vec::with_capacity(self.ctx.method_count());
        for class in self.ctx.class_list() {
            for method in &class.methods {
                let level = method.complexity();
                rows.push(RankedMethod {
                    id: method.key.id(),
                    complexity: level.code(),
                    cost: level,
                    fan_in: method.caller_count(),
                    fan_out: method.calls().len(),
                    file: class.file.display().to_string(),
                });
            }
        }

        rows.sort_by(|a, b| {
            (Reverse(a.complexity), Reverse(a.fan_in), &a.id).cmp(&(Reverse(b.complexity), Reverse(b.fan_in), &b.id))
        });
        rows.truncate(limit);
        rows
    }
}

pub struct CostAnalyzer {
    parser: Arc<dyn SourceParser>,
    pool: WorkerPool,
    excludes: Vec<String>,
}

impl CostAnalyzer {
    /// Java analyzer configured from `config`; `threads` overrides the file value.
    pub fn from_config(
        config: &CostConfig,
        threads: Option<usize>,
        listener: Arc<dyn ProgressListener>,
    ) -> Result<Self, CostError> {
        let lexicon = config.lexicon();
        debug!(patterns = lexicon.pattern_count(), "external I/O lexicon loaded");
        let parser = JavaTreeSitterAnalyzer::new(ComplexityScorer::new(lexicon))
            .map_err(|e| CostError::ParserInit(format!("{e:#}")))?;
        let pool = WorkerPool::new(threads.or(config.threads), config.poll_interval(), listener)?;
        Ok(Self::with_parser(Arc::new(parser), pool, config.excludes()))
    }

    pub fn with_parser(parser: Arc<dyn SourceParser>, pool: WorkerPool, excludes: Vec<String>) -> Self {
        Self {
            parser,
            pool,
            excludes,
        }
    }

    pub fn analyze(&self, root: &Path) -> Result<Analysis, CostError> {
        let root = root
            .canonicalize()
            .map_err(|_| CostError::RootNotFound(root.to_path_buf()))?;
        if !root.is_dir() {
            return Err(CostError::RootNotFound(root));
        }
        info!(root = %root.display(), threads = self.pool.threads(), "analysis started");

        let files = discover_sources(&root, self.parser.supported_extension(), &self.excludes)?;
        info!(files = files.len(), "discovered source files");

        let ctx = AnalysisContext::new();
        let parse = self.parse_files(&ctx, &files);
        info!(
            classes = ctx.class_count(),
            methods = ctx.method_count(),
            parsed = parse.succeeded(),
            failed = parse.failed,
            "parsing finished"
        );

        let graph = build_call_graph(&ctx, &self.pool);
        info!(retained = graph.retained, dropped = graph.dropped, "call graph built");

        let call_passes = propagate_calls(&ctx);
        info!(passes = call_passes, "call-graph propagation converged");

        let inheritance_iterations = propagate_inheritance(&ctx, &self.pool);
        info!(iterations = inheritance_iterations, "inheritance propagation converged");

        let summary = AnalysisSummary {
            files: files.len(),
            parse,
            classes: ctx.class_count(),
            methods: ctx.method_count(),
            graph,
            call_passes,
            inheritance_iterations,
        };

        Ok(Analysis { root, ctx, summary })
    }

    /// One unit per file; a failing file contributes nothing.
    pub fn parse_files(&self, ctx: &AnalysisContext, files: &[PathBuf]) -> StageOutcome {
        self.pool.for_each(PARSE_STAGE_LABEL, files, |path| {
            let bytes = fs::read(path).map_err(|e| CostError::read(path, e))?;
            let code = String::from_utf8_lossy(&bytes);
            let classes = self
                .parser
                .parse_file(&code, path)
                .map_err(|e| CostError::Parse {
                    path: path.clone(),
                    message: format!("{e:#}"),
                })?;

            debug!(file = %path.display(), classes = classes.len(), "parsed");
            for class in classes {
                ctx.insert_class(class);
            }
            Ok(())
        })
    }

    pub fn write_report(
        &self,
        analysis: &Analysis,
        output: &Path,
        min: CostLevel,
        format: ReportFormat,
    ) -> Result<ReportStats, CostError> {
        let stats = report::write_report(&analysis.ctx, &self.pool, output, min, format)?;
        let summary = &analysis.summary;
        info!(
            classes = summary.classes,
            methods = summary.methods,
            edges = analysis.ctx.edge_count(),
            call_passes = summary.call_passes,
            inheritance_iterations = summary.inheritance_iterations,
            blocks = stats.blocks,
            threshold = min.code(),
            "report written"
        );
        Ok(stats)
    }
}
