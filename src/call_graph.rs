//! 调用图构建
//!
//! 每个方法一个单元: 候选调用目标只保留方法表中存在的 key (外部库调用、未解析符号
//! 静默丢弃)，并把调用者追加到被调用者的 calledBy。
//! 必须在所有文件解析完成之后运行，否则会漏解析。

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::model::AnalysisContext;
use crate::pipeline::{StageOutcome, WorkerPool};

pub const STAGE_LABEL: &str = "Building call graph";

/// Edge counts of one graph build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallGraphStats {
    pub candidates: usize,
    pub retained: usize,
    pub dropped: usize,
    pub stage: StageOutcome,
}

pub fn build_call_graph(ctx: &AnalysisContext, pool: &WorkerPool) -> CallGraphStats {
    let methods = ctx.method_list();
    let candidates = AtomicUsize::new(0);
    let retained = AtomicUsize::new(0);

    let stage = pool.for_each(STAGE_LABEL, &methods, |method| {
        let provisional = method.calls();
        candidates.fetch_add(provisional.len(), Ordering::Relaxed);

        let kept: Vec<_> = provisional
            .into_iter()
            .filter(|target| ctx.contains_method(target))
            .collect();

        for target in &kept {
            if let Some(callee) = ctx.method(target) {
                callee.add_caller(method.key.clone());
            }
        }

        retained.fetch_add(kept.len(), Ordering::Relaxed);
        method.replace_calls(kept);
        Ok(())
    });

    let candidates = candidates.into_inner();
    let retained = retained.into_inner();
    tracing::debug!(candidates, retained, "call graph built");

    CallGraphStats {
        candidates,
        retained,
        dropped: candidates - retained,
        stage,
    }
}
