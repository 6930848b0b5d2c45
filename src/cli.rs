//! CLI 模式处理器
//!
//! 提供命令行接口，默认输出人类可读格式
//! 使用 --json 参数可输出 JSON 格式

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::Subcommand;
use serde_json::{json, Value};

use crate::config::CostConfig;
use crate::engine::{Analysis, CostAnalyzer};
use crate::model::CostLevel;
use crate::pipeline::{ProgressListener, SilentProgress};
use crate::progress::ConsoleProgress;
use crate::report::{default_output_path, ReportFormat};

/// CLI Commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// 📊 分析源码树并写出成本报告
    Analyze {
        /// 源码根目录
        root: PathBuf,

        /// 报告路径 (默认 java_cost_report_<时间戳>.toon)
        output: Option<PathBuf>,

        /// 最低复杂度阈值 0..4，低于阈值的方法不写入报告
        #[arg(default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=4))]
        min_complexity: u8,

        /// 报告格式
        #[arg(long, value_enum, default_value_t = ReportFormat::Toon)]
        format: ReportFormat,

        /// 工作线程数 (默认 max(2, CPU 核数))
        #[arg(long)]
        threads: Option<usize>,

        /// 配置文件 (默认 <root>/.java-cost.yml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// 不显示进度条
        #[arg(short, long)]
        quiet: bool,
    },

    /// 🔥 列出最昂贵的方法 (不写报告)
    Rank {
        /// 源码根目录
        root: PathBuf,

        /// 最多显示条数
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// 工作线程数
        #[arg(long)]
        threads: Option<usize>,

        /// 配置文件
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// 处理 CLI 命令
///
/// json_output: 是否输出 JSON 格式（默认 false，输出人类可读格式）
pub fn handle_command(cmd: Command, json_output: bool) -> Result<()> {
    let result = match cmd {
        Command::Analyze {
            root,
            output,
            min_complexity,
            format,
            threads,
            config,
            quiet,
        } => run_analyze(AnalyzeRequest {
            root,
            output,
            min_complexity,
            format,
            threads,
            config,
            quiet: quiet || json_output,
            json_output,
        }),

        Command::Rank {
            root,
            limit,
            threads,
            config,
        } => run_rank(&root, limit, threads, config.as_deref(), json_output),
    };

    // 输出结果
    match result {
        Ok(value) => {
            if json_output {
                let output = json!({
                    "success": true,
                    "data": value
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                print_value(&value);
            }
        }
        Err(e) => {
            if json_output {
                let output = json!({
                    "success": false,
                    "error": format!("{e:#}")
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
                std::process::exit(1);
            }
            return Err(e);
        }
    }

    Ok(())
}

fn build_analyzer(root: &Path, threads: Option<usize>, config: Option<&Path>, quiet: bool) -> Result<CostAnalyzer> {
    let config = CostConfig::load(config, root)?;
    let listener: Arc<dyn ProgressListener> = if quiet {
        Arc::new(SilentProgress)
    } else {
        Arc::new(ConsoleProgress::new(false))
    };
    Ok(CostAnalyzer::from_config(&config, threads, listener)?)
}

struct AnalyzeRequest {
    root: PathBuf,
    output: Option<PathBuf>,
    min_complexity: u8,
    format: ReportFormat,
    threads: Option<usize>,
    config: Option<PathBuf>,
    quiet: bool,
    json_output: bool,
}

fn run_analyze(req: AnalyzeRequest) -> Result<Value> {
    // clap 已校验 0..=4
    let min = CostLevel::from_code(req.min_complexity).unwrap_or(CostLevel::Lowest);
    let output = req.output.unwrap_or_else(|| default_output_path(req.format));

    let analyzer = build_analyzer(&req.root, req.threads, req.config.as_deref(), req.quiet)?;
    let analysis = analyzer.analyze(&req.root)?;
    let stats = analyzer.write_report(&analysis, &output, min, req.format)?;

    let summary = &analysis.summary;
    let data = json!({
        "root": analysis.root.display().to_string(),
        "output": output.display().to_string(),
        "threshold": min.code(),
        "files": summary.files,
        "failed_files": summary.parse.failed,
        "classes": summary.classes,
        "methods": summary.methods,
        "edges": summary.graph.retained,
        "call_passes": summary.call_passes,
        "inheritance_iterations": summary.inheritance_iterations,
        "blocks": stats.blocks,
        "reported_methods": stats.methods,
    });

    let mut text = format!("Report written to: {}", output.display());
    if stats.blocks == 0 {
        text.push_str(" (no classes)");
    }
    text.push_str(&format!("\nThreshold minComplexity = {}", min.code()));

    Ok(if req.json_output { data } else { json!(text) })
}

fn run_rank(root: &Path, limit: usize, threads: Option<usize>, config: Option<&Path>, json_output: bool) -> Result<Value> {
    let analyzer = build_analyzer(root, threads, config, true)?;
    let analysis = analyzer.analyze(root)?;

    if json_output {
        return Ok(serde_json::to_value(analysis.rank(limit))?);
    }
    Ok(json!(format_rank(&analysis, limit)))
}

fn format_rank(analysis: &Analysis, limit: usize) -> String {
    let rows = analysis.rank(limit);
    if rows.is_empty() {
        return format!("🔥 No methods found under {}", analysis.root.display());
    }

    let mut out = format!("🔥 Top {} methods by cost ({})\n", rows.len(), analysis.root.display());
    out.push_str("----------------------------------------\n");
    for row in rows {
        out.push_str(&format!(
            "{} {:<8} in={:<3} out={:<3} {}\n",
            row.complexity, row.cost.label(), row.fan_in, row.fan_out, row.id
        ));
    }
    out
}

/// 打印 Value，智能处理字符串和其他类型
fn print_value(value: &Value) {
    match value {
        Value::String(s) => println!("{s}"),
        _ => println!("{}", serde_json::to_string_pretty(value).unwrap_or_default()),
    }
}
