// ============================================================================
// 报告输出 - 并行构建类块，顺序写入
// ============================================================================
//
// 过滤规则: 只输出 complexity >= 阈值的方法；一个方法都不满足的类整块跳过。
// calls / calledBy 列表不受阈值过滤。
// 写入失败是致命错误 (整个运行无法产出可用报告)。

pub mod toon;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use clap::ValueEnum;
use serde::Serialize;

use crate::error::CostError;
use crate::model::{AnalysisContext, ClassInfo, CostLevel, MethodInfo, Visibility};
use crate::pipeline::{StageOutcome, WorkerPool};

pub const REPORT_VERSION: u32 = 1;
pub const STAGE_LABEL: &str = "Writing report";

/// 输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ReportFormat {
    #[default]
    Toon,
    Json,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Toon => "toon",
            ReportFormat::Json => "json",
        }
    }
}

/// `java_cost_report_20250101_093000.toon` in the working directory.
pub fn default_output_path(format: ReportFormat) -> PathBuf {
    PathBuf::from(format!(
        "java_cost_report_{}.{}",
        Local::now().format("%Y%m%d_%H%M%S"),
        format.extension()
    ))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodReport {
    pub method: String,
    pub visibility: Visibility,
    pub signature: String,
    pub annotations: Vec<String>,
    pub throws: Vec<String>,
    pub complexity: u8,
    pub cost: CostLevel,
    pub calls: Vec<String>,
    #[serde(rename = "calledBy")]
    pub called_by: Vec<String>,
}

impl MethodReport {
    pub fn from_method(method: &MethodInfo) -> Self {
        let level = method.complexity();
        let mut called_by: Vec<String> = method.called_by().iter().map(|k| k.id()).collect();
        called_by.sort();
        called_by.dedup();

        Self {
            method: method.key.name.clone(),
            visibility: method.visibility,
            signature: method.signature.clone(),
            annotations: method.annotations.clone(),
            throws: method.throws.clone(),
            complexity: level.code(),
            cost: level,
            calls: method.calls().iter().map(|k| k.id()).collect(),
            called_by,
        }
    }
}

/// 一个类块 (已按阈值过滤)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassReport {
    pub file: String,
    pub class: String,
    pub parent: String,
    pub methods: Vec<MethodReport>,
}

impl ClassReport {
    /// `None` when no method reaches `min`.
    pub fn build(class: &ClassInfo, min: CostLevel) -> Option<Self> {
        let methods: Vec<MethodReport> = class
            .methods
            .iter()
            .filter(|m| m.complexity() >= min)
            .map(|m| MethodReport::from_method(m))
            .collect();

        if methods.is_empty() {
            return None;
        }

        Some(Self {
            file: class.file.display().to_string(),
            class: class.fq_name.clone(),
            parent: class.parent_label().to_string(),
            methods,
        })
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    version: u32,
    classes: &'a [ClassReport],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportStats {
    pub blocks: usize,
    pub methods: usize,
    pub stage: StageOutcome,
}

/// Class blocks in FQN order, built in parallel. A failed unit contributes no block.
pub fn build_blocks(ctx: &AnalysisContext, pool: &WorkerPool, min: CostLevel) -> (Vec<ClassReport>, StageOutcome) {
    let classes: Vec<Arc<ClassInfo>> = ctx.sorted_classes();
    let (blocks, stage) = pool.map(STAGE_LABEL, &classes, |class| Ok(ClassReport::build(class, min)));
    (blocks.into_iter().flatten().flatten().collect(), stage)
}

pub fn render<W: Write>(w: &mut W, format: ReportFormat, blocks: &[ClassReport]) -> std::io::Result<()> {
    match format {
        ReportFormat::Toon => {
            toon::write_header(w)?;
            for block in blocks {
                toon::write_class(w, block)?;
            }
        }
        ReportFormat::Json => {
            let report = JsonReport {
                version: REPORT_VERSION,
                classes: blocks,
            };
            serde_json::to_writer_pretty(&mut *w, &report)?;
            writeln!(w)?;
        }
    }
    Ok(())
}

/// Builds every block, then writes them sequentially to `path`.
pub fn write_report(
    ctx: &AnalysisContext,
    pool: &WorkerPool,
    path: &Path,
    min: CostLevel,
    format: ReportFormat,
) -> Result<ReportStats, CostError> {
    let (blocks, stage) = build_blocks(ctx, pool, min);

    let file = File::create(path).map_err(|e| CostError::report_write(path, e))?;
    let mut writer = BufWriter::new(file);
    render(&mut writer, format, &blocks).map_err(|e| CostError::report_write(path, e))?;
    writer.flush().map_err(|e| CostError::report_write(path, e))?;

    Ok(ReportStats {
        blocks: blocks.len(),
        methods: blocks.iter().map(|b| b.methods.len()).sum(),
        stage,
    })
}
