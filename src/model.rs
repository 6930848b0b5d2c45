// ============================================================================
// 实体模型 - 类 / 方法 / MethodKey 共享索引
// ============================================================================
//
// 所有阶段共享同一个 AnalysisContext:
// - 解析阶段: 每个文件一个写者，键互不相交
// - 调用图阶段: calls 由所属单元替换，calledBy 并发追加
// - 传播阶段: complexity 只升不降 (fetch_max)，读写竞争最多多跑一轮

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Rendered in the `Parent:` line when a class has no superclass.
pub const NO_PARENT: &str = "null";

/// 方法节点标识: (所属类型 FQN, 方法名, 参数个数)
///
/// Two overloads with the same name and arity on one type share a key.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct MethodKey {
    pub class_fq: String,
    pub name: String,
    pub param_count: usize,
}

impl MethodKey {
    pub fn new(class_fq: &str, name: &str, param_count: usize) -> Self {
        Self {
            class_fq: class_fq.to_string(),
            name: name.to_string(),
            param_count,
        }
    }

    /// `com.example.Foo#bar/2`
    pub fn id(&self) -> String {
        self.to_string()
    }

    /// Same name and arity, regardless of the owning type.
    pub fn same_shape(&self, other: &MethodKey) -> bool {
        self.name == other.name && self.param_count == other.param_count
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}/{}", self.class_fq, self.name, self.param_count)
    }
}

/// 成本等级 0..4
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CostLevel {
    #[default]
    Lowest = 0,
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl CostLevel {
    pub const MAX: CostLevel = CostLevel::Critical;

    /// Maps an accumulated control-flow weight to a level.
    pub fn from_weight(weight: u32) -> Self {
        match weight {
            w if w >= 10 => CostLevel::Critical,
            w if w >= 6 => CostLevel::High,
            w if w >= 3 => CostLevel::Medium,
            w if w >= 1 => CostLevel::Low,
            _ => CostLevel::Lowest,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(CostLevel::Lowest),
            1 => Some(CostLevel::Low),
            2 => Some(CostLevel::Medium),
            3 => Some(CostLevel::High),
            4 => Some(CostLevel::Critical),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            CostLevel::Lowest => "LOWEST",
            CostLevel::Low => "LOW",
            CostLevel::Medium => "MEDIUM",
            CostLevel::High => "HIGH",
            CostLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for CostLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 方法可见性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    Public,
    Protected,
    Private,
    #[default]
    PackagePrivate,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Protected => "protected",
            Visibility::Private => "private",
            Visibility::PackagePrivate => "package-private",
        }
    }
}

/// 方法节点
///
/// `complexity` only moves upward: every writer goes through [`MethodInfo::raise`],
/// which is a `fetch_max`, so a racing reader can observe a stale value but never
/// a smaller or out-of-range one.
#[derive(Debug)]
pub struct MethodInfo {
    pub key: MethodKey,
    pub visibility: Visibility,
    pub signature: String,
    pub annotations: Vec<String>,
    pub throws: Vec<String>,
    base: CostLevel,
    complexity: AtomicU8,
    calls: RwLock<Vec<MethodKey>>,
    called_by: Mutex<Vec<MethodKey>>,
}

impl MethodInfo {
    pub fn new(key: MethodKey, base: CostLevel) -> Self {
        Self {
            key,
            visibility: Visibility::default(),
            signature: String::new(),
            annotations: Vec::new(),
            throws: Vec::new(),
            base,
            complexity: AtomicU8::new(base.code()),
            calls: RwLock::new(Vec::new()),
            called_by: Mutex::new(Vec::new()),
        }
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }

    pub fn with_annotations(mut self, annotations: Vec<String>) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn with_throws(mut self, throws: Vec<String>) -> Self {
        self.throws = throws;
        self
    }

    /// Provisional candidate targets, possibly pointing at unknown code.
    pub fn with_calls(self, calls: Vec<MethodKey>) -> Self {
        *self.calls.write().unwrap_or_else(|e| e.into_inner()) = calls;
        self
    }

    /// Scored value at parse time.
    pub fn base_complexity(&self) -> CostLevel {
        self.base
    }

    pub fn complexity(&self) -> CostLevel {
        let code = self.complexity.load(Ordering::Acquire).min(CostLevel::MAX.code());
        CostLevel::from_code(code).unwrap_or(CostLevel::MAX)
    }

    /// Folds a same-key overload's score in before the method is shared.
    pub fn absorb_base(&mut self, other: CostLevel) {
        self.base = self.base.max(other);
        self.raise(other);
    }

    /// 单调提升: 返回是否真的变大
    pub fn raise(&self, level: CostLevel) -> bool {
        let previous = self.complexity.fetch_max(level.code(), Ordering::AcqRel);
        previous < level.code()
    }

    pub fn calls(&self) -> Vec<MethodKey> {
        self.calls.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn replace_calls(&self, calls: Vec<MethodKey>) {
        *self.calls.write().unwrap_or_else(|e| e.into_inner()) = calls;
    }

    pub fn called_by(&self) -> Vec<MethodKey> {
        self.called_by.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn add_caller(&self, caller: MethodKey) {
        self.called_by.lock().unwrap_or_else(|e| e.into_inner()).push(caller);
    }

    pub fn caller_count(&self) -> usize {
        self.called_by.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// 类 / 接口声明
#[derive(Debug)]
pub struct ClassInfo {
    pub file: PathBuf,
    pub fq_name: String,
    pub simple_name: String,
    /// Simple name of the single superclass.
    pub parent: Option<String>,
    /// Implemented interfaces, or super-interfaces for an interface.
    pub interfaces: Vec<String>,
    pub is_interface: bool,
    pub methods: Vec<Arc<MethodInfo>>,
}

impl ClassInfo {
    pub fn new(file: impl Into<PathBuf>, fq_name: &str) -> Self {
        let simple_name = fq_name.rsplit('.').next().unwrap_or(fq_name).to_string();
        Self {
            file: file.into(),
            fq_name: fq_name.to_string(),
            simple_name,
            parent: None,
            interfaces: Vec::new(),
            is_interface: false,
            methods: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent: &str) -> Self {
        self.parent = Some(parent.to_string());
        self
    }

    pub fn with_interfaces<I, S>(mut self, interfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interfaces = interfaces.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_method(mut self, method: MethodInfo) -> Self {
        self.methods.push(Arc::new(method));
        self
    }

    pub fn parent_label(&self) -> &str {
        self.parent.as_deref().unwrap_or(NO_PARENT)
    }

    /// Every simple name this class links to as a child.
    pub fn parent_identifiers(&self) -> impl Iterator<Item = &str> {
        self.parent.as_deref().into_iter().chain(self.interfaces.iter().map(String::as_str))
    }
}

/// 进程级分析上下文
#[derive(Debug, Default)]
pub struct AnalysisContext {
    pub classes: DashMap<String, Arc<ClassInfo>>,
    pub methods: DashMap<MethodKey, Arc<MethodInfo>>,
}

impl AnalysisContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the class and its methods. The first file to declare an FQN wins;
    /// the class entry stays locked until its methods are in place.
    pub fn insert_class(&self, class: ClassInfo) -> Arc<ClassInfo> {
        match self.classes.entry(class.fq_name.clone()) {
            Entry::Occupied(existing) => {
                tracing::debug!(
                    class = %class.fq_name,
                    file = %class.file.display(),
                    "class declared in more than one file, keeping the first"
                );
                Arc::clone(existing.get())
            }
            Entry::Vacant(slot) => {
                for method in &class.methods {
                    self.methods.entry(method.key.clone()).or_insert_with(|| Arc::clone(method));
                }
                Arc::clone(slot.insert(Arc::new(class)).value())
            }
        }
    }

    pub fn method(&self, key: &MethodKey) -> Option<Arc<MethodInfo>> {
        self.methods.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn class(&self, fq_name: &str) -> Option<Arc<ClassInfo>> {
        self.classes.get(fq_name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains_method(&self, key: &MethodKey) -> bool {
        self.methods.contains_key(key)
    }

    /// Snapshot of the method handles; no map guard is held afterwards.
    pub fn method_list(&self) -> Vec<Arc<MethodInfo>> {
        self.methods.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn class_list(&self) -> Vec<Arc<ClassInfo>> {
        self.classes.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Classes ordered by FQN.
    pub fn sorted_classes(&self) -> Vec<Arc<ClassInfo>> {
        let mut classes = self.class_list();
        classes.sort_by(|a, b| a.fq_name.cmp(&b.fq_name));
        classes
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    pub fn edge_count(&self) -> usize {
        self.methods.iter().map(|entry| entry.value().calls().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_method_key_id() {
        let key = MethodKey::new("com.example.OrderService", "findAll", 2);
        assert_eq!(key.id(), "com.example.OrderService#findAll/2");
    }

    #[test]
    fn test_cost_level_thresholds() {
        assert_eq!(CostLevel::from_weight(0), CostLevel::Lowest);
        assert_eq!(CostLevel::from_weight(1), CostLevel::Low);
        assert_eq!(CostLevel::from_weight(2), CostLevel::Low);
        assert_eq!(CostLevel::from_weight(3), CostLevel::Medium);
        assert_eq!(CostLevel::from_weight(5), CostLevel::Medium);
        assert_eq!(CostLevel::from_weight(6), CostLevel::High);
        assert_eq!(CostLevel::from_weight(9), CostLevel::High);
        assert_eq!(CostLevel::from_weight(10), CostLevel::Critical);
        assert_eq!(CostLevel::from_weight(250), CostLevel::Critical);
    }

    #[test]
    fn test_raise_is_monotonic() {
        let m = MethodInfo::new(MethodKey::new("A", "a", 0), CostLevel::Medium);
        assert!(!m.raise(CostLevel::Low));
        assert_eq!(m.complexity(), CostLevel::Medium);
        assert!(m.raise(CostLevel::Critical));
        assert!(!m.raise(CostLevel::Critical));
        assert_eq!(m.complexity(), CostLevel::Critical);
        assert_eq!(m.base_complexity(), CostLevel::Medium);
    }

    #[test]
    fn test_insert_class_registers_methods() {
        let ctx = AnalysisContext::new();
        let class = ClassInfo::new("A.java", "com.example.A")
            .with_parent("Base")
            .with_method(MethodInfo::new(MethodKey::new("com.example.A", "run", 0), CostLevel::Low));
        let stored = ctx.insert_class(class);

        assert_eq!(stored.simple_name, "A");
        assert_eq!(stored.parent_label(), "Base");
        assert!(ctx.contains_method(&MethodKey::new("com.example.A", "run", 0)));
        assert_eq!(ctx.class_count(), 1);
        assert_eq!(ctx.method_count(), 1);
    }

    #[test]
    fn test_duplicate_class_keeps_first_declaration() {
        let ctx = AnalysisContext::new();
        let key = MethodKey::new("com.example.A", "run", 0);
        ctx.insert_class(
            ClassInfo::new("first/A.java", "com.example.A")
                .with_method(MethodInfo::new(key.clone(), CostLevel::Low)),
        );
        let stored = ctx.insert_class(
            ClassInfo::new("second/A.java", "com.example.A")
                .with_method(MethodInfo::new(key.clone(), CostLevel::High))
                .with_method(MethodInfo::new(MethodKey::new("com.example.A", "stop", 0), CostLevel::Low)),
        );

        assert_eq!(stored.file, PathBuf::from("first/A.java"));
        assert_eq!(ctx.class_count(), 1);
        assert_eq!(ctx.method_count(), 1);
        // 类表与方法表指向同一个 MethodInfo
        let class = ctx.class("com.example.A").unwrap();
        assert!(Arc::ptr_eq(&class.methods[0], &ctx.method(&key).unwrap()));
        assert_eq!(ctx.method(&key).unwrap().complexity(), CostLevel::Low);
    }

    #[test]
    fn test_parent_identifiers_include_interfaces() {
        let class = ClassInfo::new("A.java", "A").with_parent("Base").with_interfaces(["Runnable", "Closeable"]);
        let ids: Vec<&str> = class.parent_identifiers().collect();
        assert_eq!(ids, vec!["Base", "Runnable", "Closeable"]);
        assert_eq!(ClassInfo::new("B.java", "B").parent_label(), NO_PARENT);
    }

    #[test]
    fn test_concurrent_raise_keeps_maximum() {
        let m = Arc::new(MethodInfo::new(MethodKey::new("A", "a", 0), CostLevel::Lowest));
        std::thread::scope(|s| {
            for code in [1u8, 4, 2, 3, 0] {
                let m = Arc::clone(&m);
                s.spawn(move || {
                    m.raise(CostLevel::from_code(code).unwrap());
                });
            }
        });
        assert_eq!(m.complexity(), CostLevel::Critical);
    }

    proptest! {
        #[test]
        fn prop_raise_never_decreases(levels in prop::collection::vec(0u8..=4, 1..32)) {
            let m = MethodInfo::new(MethodKey::new("A", "a", 0), CostLevel::Lowest);
            let mut seen = CostLevel::Lowest;
            for code in levels {
                let level = CostLevel::from_code(code).unwrap();
                m.raise(level);
                prop_assert!(m.complexity() >= seen);
                seen = seen.max(level);
                prop_assert_eq!(m.complexity(), seen);
            }
        }
    }
}
