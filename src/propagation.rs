// ============================================================================
// 复杂度传播 - 两个不动点
// ============================================================================
//
// 1. 调用图传播 (单线程): complexity(m) = max(complexity(m), max complexity(calls(m)))
// 2. 继承传播 (每轮并行，轮与轮之间串行): 父类方法至少与直接子类的同名同参覆盖一样贵
//
// 两者都只通过 MethodInfo::raise 写入 (fetch_max)，值域有限 (0..4)，
// 因此必然在有限轮内收敛；环只会收敛到环上的最大值。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::model::{AnalysisContext, ClassInfo};
use crate::pipeline::WorkerPool;

/// Full passes until nothing changes; the last pass is the one that changed nothing.
pub fn propagate_calls(ctx: &AnalysisContext) -> usize {
    let methods = ctx.method_list();
    let mut passes = 0;

    loop {
        passes += 1;
        let mut changed = false;

        for method in &methods {
            let highest = method
                .calls()
                .iter()
                .filter_map(|callee| ctx.method(callee))
                .map(|callee| callee.complexity())
                .max();
            if let Some(level) = highest {
                changed |= method.raise(level);
            }
        }

        debug!(pass = passes, changed, "call propagation pass");
        if !changed {
            return passes;
        }
    }
}

/// Parent simple name -> direct children, linked by simple name.
///
/// Unrelated types sharing a simple name across packages are conflated here.
pub fn build_hierarchy(ctx: &AnalysisContext) -> HashMap<String, Vec<Arc<ClassInfo>>> {
    let mut children: HashMap<String, Vec<Arc<ClassInfo>>> = HashMap::new();
    for class in ctx.sorted_classes() {
        for parent in class.parent_identifiers() {
            children.entry(parent.to_string()).or_default().push(Arc::clone(&class));
        }
    }
    children
}

pub fn iteration_label(iteration: usize) -> String {
    format!("Propagating inheritance (iter {iteration})")
}

/// Iterations until a sweep raises nothing, including that final sweep.
pub fn propagate_inheritance(ctx: &AnalysisContext, pool: &WorkerPool) -> usize {
    let children = build_hierarchy(ctx);
    let parents: Vec<(Arc<ClassInfo>, &Vec<Arc<ClassInfo>>)> = ctx
        .sorted_classes()
        .into_iter()
        .filter_map(|class| children.get(&class.simple_name).map(|kids| (class, kids)))
        .collect();

    if parents.is_empty() {
        debug!("no parent classes with known children");
        return 0;
    }

    let mut iteration = 0;
    loop {
        iteration += 1;
        let changed = AtomicBool::new(false);

        pool.for_each(&iteration_label(iteration), &parents, |(parent, kids)| {
            for base in &parent.methods {
                let highest = kids
                    .iter()
                    .flat_map(|kid| kid.methods.iter())
                    .filter(|m| m.key.same_shape(&base.key))
                    .map(|m| m.complexity())
                    .max();
                if let Some(level) = highest {
                    if base.raise(level) {
                        changed.store(true, Ordering::Relaxed);
                    }
                }
            }
            Ok(())
        });

        if !changed.load(Ordering::Relaxed) {
            return iteration;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_graph::build_call_graph;
    use crate::model::{CostLevel, MethodInfo, MethodKey};
    use proptest::prelude::*;

    fn key(class: &str, name: &str) -> MethodKey {
        MethodKey::new(class, name, 0)
    }

    fn pool() -> WorkerPool {
        WorkerPool::silent(Some(2)).unwrap()
    }

    fn level(ctx: &AnalysisContext, k: &MethodKey) -> CostLevel {
        ctx.method(k).unwrap().complexity()
    }

    #[test]
    fn test_cycle_converges_to_maximum() {
        let ctx = AnalysisContext::new();
        ctx.insert_class(
            ClassInfo::new("A.java", "A")
                .with_method(MethodInfo::new(key("A", "a"), CostLevel::Low).with_calls(vec![key("B", "b")])),
        );
        ctx.insert_class(
            ClassInfo::new("B.java", "B")
                .with_method(MethodInfo::new(key("B", "b"), CostLevel::High).with_calls(vec![key("A", "a")])),
        );
        build_call_graph(&ctx, &pool());

        let passes = propagate_calls(&ctx);
        assert!(passes <= 3);
        assert_eq!(level(&ctx, &key("A", "a")), CostLevel::High);
        assert_eq!(level(&ctx, &key("B", "b")), CostLevel::High);

        // 已收敛: 再跑一次只需一轮且无变化
        assert_eq!(propagate_calls(&ctx), 1);
        assert_eq!(level(&ctx, &key("A", "a")), CostLevel::High);
    }

    #[test]
    fn test_chain_flows_callee_to_caller() {
        let ctx = AnalysisContext::new();
        ctx.insert_class(
            ClassInfo::new("S.java", "S")
                .with_method(MethodInfo::new(key("S", "controller"), CostLevel::Lowest).with_calls(vec![key("S", "service")]))
                .with_method(MethodInfo::new(key("S", "service"), CostLevel::Low).with_calls(vec![key("S", "dao")]))
                .with_method(MethodInfo::new(key("S", "dao"), CostLevel::Critical)),
        );
        build_call_graph(&ctx, &pool());
        propagate_calls(&ctx);

        assert_eq!(level(&ctx, &key("S", "controller")), CostLevel::Critical);
        assert_eq!(level(&ctx, &key("S", "service")), CostLevel::Critical);
        // 不会反向流动
        let ctx2 = AnalysisContext::new();
        ctx2.insert_class(
            ClassInfo::new("T.java", "T")
                .with_method(MethodInfo::new(key("T", "hot"), CostLevel::Critical).with_calls(vec![key("T", "cold")]))
                .with_method(MethodInfo::new(key("T", "cold"), CostLevel::Lowest)),
        );
        build_call_graph(&ctx2, &pool());
        propagate_calls(&ctx2);
        assert_eq!(level(&ctx2, &key("T", "cold")), CostLevel::Lowest);
    }

    #[test]
    fn test_three_level_hierarchy() {
        let ctx = AnalysisContext::new();
        ctx.insert_class(
            ClassInfo::new("Base.java", "com.example.Base")
                .with_method(MethodInfo::new(key("com.example.Base", "foo"), CostLevel::Low)),
        );
        ctx.insert_class(
            ClassInfo::new("Mid.java", "com.example.Mid")
                .with_parent("Base")
                .with_method(MethodInfo::new(key("com.example.Mid", "foo"), CostLevel::Low)),
        );
        ctx.insert_class(
            ClassInfo::new("Leaf.java", "com.example.Leaf")
                .with_parent("Mid")
                .with_method(MethodInfo::new(key("com.example.Leaf", "foo"), CostLevel::Critical)),
        );

        let iterations = propagate_inheritance(&ctx, &pool());
        assert!(iterations >= 2);
        assert_eq!(level(&ctx, &key("com.example.Base", "foo")), CostLevel::Critical);
        assert_eq!(level(&ctx, &key("com.example.Mid", "foo")), CostLevel::Critical);
        assert_eq!(propagate_inheritance(&ctx, &pool()), 1);
    }

    #[test]
    fn test_interface_linkage_requires_same_shape() {
        let ctx = AnalysisContext::new();
        let mut repo = ClassInfo::new("Repo.java", "com.example.Repo")
            .with_method(MethodInfo::new(MethodKey::new("com.example.Repo", "save", 1), CostLevel::Lowest))
            .with_method(MethodInfo::new(MethodKey::new("com.example.Repo", "save", 2), CostLevel::Lowest));
        repo.is_interface = true;
        ctx.insert_class(repo);
        ctx.insert_class(
            ClassInfo::new("MongoRepo.java", "com.example.MongoRepo")
                .with_interfaces(["Repo"])
                .with_method(MethodInfo::new(MethodKey::new("com.example.MongoRepo", "save", 1), CostLevel::Critical)),
        );

        propagate_inheritance(&ctx, &pool());
        assert_eq!(
            level(&ctx, &MethodKey::new("com.example.Repo", "save", 1)),
            CostLevel::Critical
        );
        assert_eq!(
            level(&ctx, &MethodKey::new("com.example.Repo", "save", 2)),
            CostLevel::Lowest
        );
    }

    #[test]
    fn test_simple_name_linkage_conflates_packages() {
        let ctx = AnalysisContext::new();
        ctx.insert_class(
            ClassInfo::new("a/Base.java", "a.Base").with_method(MethodInfo::new(key("a.Base", "run"), CostLevel::Lowest)),
        );
        ctx.insert_class(
            ClassInfo::new("b/Base.java", "b.Base").with_method(MethodInfo::new(key("b.Base", "run"), CostLevel::Lowest)),
        );
        ctx.insert_class(
            ClassInfo::new("c/Impl.java", "c.Impl")
                .with_parent("Base")
                .with_method(MethodInfo::new(key("c.Impl", "run"), CostLevel::High)),
        );

        propagate_inheritance(&ctx, &pool());
        assert_eq!(level(&ctx, &key("a.Base", "run")), CostLevel::High);
        assert_eq!(level(&ctx, &key("b.Base", "run")), CostLevel::High);
    }

    #[test]
    fn test_no_hierarchy() {
        let ctx = AnalysisContext::new();
        ctx.insert_class(ClassInfo::new("A.java", "A").with_method(MethodInfo::new(key("A", "a"), CostLevel::Low)));
        assert_eq!(propagate_inheritance(&ctx, &pool()), 0);
    }

    /// Random graph: (base levels, edges as index pairs)
    fn graph_strategy() -> impl Strategy<Value = (Vec<u8>, Vec<(usize, usize)>)> {
        (1usize..12).prop_flat_map(|n| {
            (
                prop::collection::vec(0u8..=4, n),
                prop::collection::vec((0..n, 0..n), 0..(n * 3)),
            )
        })
    }

    fn build_graph(levels: &[u8], edges: &[(usize, usize)]) -> AnalysisContext {
        let ctx = AnalysisContext::new();
        let mut class = ClassInfo::new("G.java", "G");
        for (i, code) in levels.iter().enumerate() {
            let calls: Vec<MethodKey> = edges
                .iter()
                .filter(|(from, _)| *from == i)
                .map(|(_, to)| key("G", &format!("m{to}")))
                .collect();
            class = class.with_method(
                MethodInfo::new(key("G", &format!("m{i}")), CostLevel::from_code(*code).unwrap()).with_calls(calls),
            );
        }
        ctx.insert_class(class);
        ctx
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_call_propagation_reaches_fixed_point((levels, edges) in graph_strategy()) {
            let ctx = build_graph(&levels, &edges);
            build_call_graph(&ctx, &pool());
            propagate_calls(&ctx);

            for method in ctx.method_list() {
                // 范围 + 单调
                prop_assert!(method.complexity() <= CostLevel::MAX);
                prop_assert!(method.complexity() >= method.base_complexity());
                // 不动点: 不低于任何被调用者
                for callee in method.calls() {
                    prop_assert!(method.complexity() >= ctx.method(&callee).unwrap().complexity());
                }
            }

            // 幂等
            let before: Vec<_> = ctx.method_list().iter().map(|m| (m.key.clone(), m.complexity())).collect();
            prop_assert_eq!(propagate_calls(&ctx), 1);
            for (k, level) in before {
                prop_assert_eq!(ctx.method(&k).unwrap().complexity(), level);
            }
        }
    }
}
