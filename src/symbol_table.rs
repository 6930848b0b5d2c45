// ============================================================================
// 符号表模块 - 调用目标猜测 (import 解析 + 局部类型绑定)
// ============================================================================
//
// 解析阶段是逐文件并行的，此时全局方法表尚未完成。
// 因此这里只产生 "候选" FQN: 一个类型名可能得到多个猜测
// (同包 + 每个通配 import 包)，调用图阶段只保留真实存在的那一个。

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

/// 泛型参数 / 数组维度 / 类型注解
static TYPE_NOISE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"@[\w.]+(\([^)]*\))?|<.*>|\[\s*\]|\.\.\.").unwrap()
});

/// One `import` line of a Java file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDecl {
    /// Dotted path without the trailing `.*`.
    pub path: String,
    pub is_static: bool,
    pub is_wildcard: bool,
}

impl ImportDecl {
    pub fn new(path: &str, is_static: bool, is_wildcard: bool) -> Self {
        Self {
            path: path.to_string(),
            is_static,
            is_wildcard,
        }
    }
}

/// Per-file import resolution index
///
/// Guess order for a simple type name:
/// 1. Explicit imports (`import com.example.UserRepository`)
/// 2. Types declared in this file (nested ones included)
/// 3. Same package, then one guess per wildcard import
#[derive(Debug, Clone, Default)]
pub struct ImportIndex {
    /// simple name -> FQN
    pub explicit: HashMap<String, String>,
    /// `import com.example.*` -> "com.example"
    pub wildcards: Vec<String>,
    /// `import static a.b.C.max` -> "max" -> "a.b.C"
    pub static_members: HashMap<String, String>,
    /// `import static a.b.C.*` -> "a.b.C"
    pub static_wildcards: Vec<String>,
    pub package: Option<String>,
    /// simple name -> FQN for every type declared in the file
    pub local_types: HashMap<String, String>,
}

impl ImportIndex {
    pub fn from_imports(imports: Vec<ImportDecl>, package: Option<String>) -> Self {
        let mut index = Self {
            package,
            ..Self::default()
        };

        for import in imports {
            let path = import.path.trim();
            if path.is_empty() {
                continue;
            }
            match (import.is_static, import.is_wildcard) {
                (false, true) => index.wildcards.push(path.to_string()),
                (false, false) => {
                    let simple = path.rsplit('.').next().unwrap_or(path);
                    index.explicit.insert(simple.to_string(), path.to_string());
                }
                (true, true) => index.static_wildcards.push(path.to_string()),
                (true, false) => {
                    if let Some((owner, member)) = path.rsplit_once('.') {
                        index.static_members.insert(member.to_string(), owner.to_string());
                    }
                }
            }
        }

        index
    }

    /// Registers a type declared in the current file.
    pub fn add_local_type(&mut self, simple_name: &str, fq_name: &str) {
        self.local_types
            .entry(simple_name.to_string())
            .or_insert_with(|| fq_name.to_string());
    }

    /// FQN guesses for a type as written in source (`List<User>`, `Map.Entry`, `a.b.C`).
    pub fn type_candidates(&self, type_text: &str) -> Vec<String> {
        let Some(base) = base_type_name(type_text) else {
            return Vec::new();
        };

        // 已是全限定名: a.b.C
        if let Some((head, rest)) = base.split_once('.') {
            if head.chars().next().is_some_and(|c| c.is_lowercase()) {
                return vec![base.clone()];
            }
            // Outer.Inner: resolve the outer part and append the rest
            return self
                .simple_candidates(head)
                .into_iter()
                .map(|outer| format!("{outer}.{rest}"))
                .collect();
        }

        self.simple_candidates(&base)
    }

    fn simple_candidates(&self, simple: &str) -> Vec<String> {
        if let Some(fqn) = self.explicit.get(simple) {
            return vec![fqn.clone()];
        }
        if let Some(fqn) = self.local_types.get(simple) {
            return vec![fqn.clone()];
        }

        let mut candidates = Vec::with_capacity(1 + self.wildcards.len());
        match self.package.as_deref() {
            Some(pkg) if !pkg.is_empty() => candidates.push(format!("{pkg}.{simple}")),
            _ => candidates.push(simple.to_string()),
        }
        for pkg in &self.wildcards {
            candidates.push(format!("{pkg}.{simple}"));
        }
        candidates
    }

    /// Owners of a statically imported member, explicit import first.
    pub fn static_owner_candidates(&self, member: &str) -> Vec<String> {
        match self.static_members.get(member) {
            Some(owner) => vec![owner.clone()],
            None => self.static_wildcards.clone(),
        }
    }
}

/// Strips generics, array brackets and annotations; `None` for primitives and `var`.
pub fn base_type_name(type_text: &str) -> Option<String> {
    let cleaned = TYPE_NOISE_REGEX.replace_all(type_text, "");
    let cleaned: String = cleaned.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() || is_primitive(&cleaned) || cleaned == "var" {
        return None;
    }
    Some(cleaned)
}

/// Simple name of a type as written (`java.util.List<String>` -> `List`).
pub fn simple_type_name(type_text: &str) -> Option<String> {
    base_type_name(type_text).map(|base| base.rsplit('.').next().unwrap_or(&base).to_string())
}

fn is_primitive(name: &str) -> bool {
    matches!(
        name,
        "int" | "long" | "short" | "byte" | "char" | "boolean" | "float" | "double" | "void"
    )
}

/// 变量名 -> 声明类型 (字段 / 参数 / 局部变量)
///
/// Scoping is flat per method: a later declaration with the same name wins.
#[derive(Debug, Clone, Default)]
pub struct TypeBindings {
    vars: HashMap<String, String>,
}

impl TypeBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: &str, type_text: &str) {
        if base_type_name(type_text).is_some() {
            self.vars.insert(name.to_string(), type_text.to_string());
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Layered copy: `self` shadows `outer`.
    pub fn layered_over(&self, outer: &TypeBindings) -> TypeBindings {
        let mut vars = outer.vars.clone();
        vars.extend(self.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        TypeBindings { vars }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn index() -> ImportIndex {
        let mut index = ImportIndex::from_imports(
            vec![
                ImportDecl::new("com.example.repo.UserRepository", false, false),
                ImportDecl::new("com.example.dto", false, true),
                ImportDecl::new("java.lang.Math.max", true, false),
                ImportDecl::new("com.example.util.Strings", true, true),
            ],
            Some("com.example.service".to_string()),
        );
        index.add_local_type("Cache", "com.example.service.UserService.Cache");
        index
    }

    #[test]
    fn test_explicit_import_wins() {
        assert_eq!(
            index().type_candidates("UserRepository"),
            vec!["com.example.repo.UserRepository".to_string()]
        );
    }

    #[test]
    fn test_same_package_and_wildcards() {
        assert_eq!(
            index().type_candidates("OrderDto"),
            vec![
                "com.example.service.OrderDto".to_string(),
                "com.example.dto.OrderDto".to_string()
            ]
        );
    }

    #[test]
    fn test_local_nested_type() {
        assert_eq!(
            index().type_candidates("Cache"),
            vec!["com.example.service.UserService.Cache".to_string()]
        );
    }

    #[test]
    fn test_generic_and_array_types() {
        assert_eq!(base_type_name("List<Map<String, User>>"), Some("List".to_string()));
        assert_eq!(base_type_name("User[]"), Some("User".to_string()));
        assert_eq!(base_type_name("String..."), Some("String".to_string()));
        assert_eq!(base_type_name("@NonNull User"), Some("User".to_string()));
        assert_eq!(base_type_name("int"), None);
        assert_eq!(base_type_name("var"), None);
        assert_eq!(simple_type_name("java.util.List<String>"), Some("List".to_string()));
    }

    #[test]
    fn test_qualified_types() {
        assert_eq!(index().type_candidates("com.other.Thing"), vec!["com.other.Thing".to_string()]);
        assert_eq!(
            index().type_candidates("UserRepository.Page"),
            vec!["com.example.repo.UserRepository.Page".to_string()]
        );
    }

    #[test]
    fn test_default_package() {
        let index = ImportIndex::from_imports(Vec::new(), None);
        assert_eq!(index.type_candidates("Helper"), vec!["Helper".to_string()]);
    }

    #[test]
    fn test_static_members() {
        let index = index();
        assert_eq!(index.static_owner_candidates("max"), vec!["java.lang.Math".to_string()]);
        assert_eq!(index.static_owner_candidates("trim"), vec!["com.example.util.Strings".to_string()]);
    }

    #[test]
    fn test_bindings_skip_primitives_and_shadow() {
        let mut fields = TypeBindings::new();
        fields.bind("repo", "UserRepository");
        fields.bind("count", "int");
        let mut locals = TypeBindings::new();
        locals.bind("repo", "OrderRepository");

        let scope = locals.layered_over(&fields);
        assert_eq!(scope.lookup("repo"), Some("OrderRepository"));
        assert!(!scope.contains("count"));
    }

    proptest! {
        /// Same-package guess is always first when nothing else matches.
        #[test]
        fn prop_same_package_guess_first(
            pkg in prop::collection::vec("[a-z][a-z0-9]{0,7}", 1..=4).prop_map(|p| p.join(".")),
            name in "[A-Z][a-zA-Z0-9]{0,15}",
        ) {
            let index = ImportIndex::from_imports(Vec::new(), Some(pkg.clone()));
            let candidates = index.type_candidates(&name);
            prop_assert_eq!(candidates.len(), 1);
            prop_assert_eq!(&candidates[0], &format!("{}.{}", pkg, name));
        }
    }
}
