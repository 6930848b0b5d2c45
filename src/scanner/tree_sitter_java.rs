use super::SourceParser;
use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashSet;
use std::path::Path;
use anyhow::{Result, anyhow};
use once_cell::sync::Lazy;
use regex::Regex;
use tree_sitter::{Node, Parser, Query, QueryCursor, Tree};
use crate::model::{ClassInfo, MethodInfo, MethodKey, Visibility};
use crate::scoring::{ComplexityScorer, ControlFlowProfile};
use crate::symbol_table::{simple_type_name, ImportDecl, ImportIndex, TypeBindings};

// ============================================================================
// thread_local Parser 复用
// ============================================================================
//
// Parser::new() 和 set_language() 涉及 native 层初始化和内存分配。
// 每个工作线程只初始化一次 Parser。
//
// ============================================================================

thread_local! {
    /// 线程本地 Parser 实例 (避免重复创建)
    static JAVA_PARSER: RefCell<Option<Parser>> = const { RefCell::new(None) };
}

/// 获取或初始化线程本地 Parser
fn with_parser<F, R>(language: &tree_sitter::Language, f: F) -> Result<R>
where
    F: FnOnce(&mut Parser) -> Result<R>,
{
    JAVA_PARSER.with(|cell| {
        let mut parser_opt = cell.borrow_mut();

        // 懒初始化 Parser
        if parser_opt.is_none() {
            let mut parser = Parser::new();
            parser.set_language(language)
                .map_err(|e| anyhow!("Failed to set language: {e}"))?;
            *parser_opt = Some(parser);
        }

        let parser = parser_opt.as_mut().ok_or_else(|| anyhow!("Parser not initialized"))?;
        f(parser)
    })
}

static WHITESPACE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// 类型声明 (含嵌套类)
struct TypeDecl<'t> {
    node: Node<'t>,
    fq_name: String,
    /// Index of the enclosing declaration in the same file.
    outer: Option<usize>,
    /// (name, arity) of directly declared methods
    shapes: HashSet<(String, usize)>,
}

/// 单个方法的解析草稿，合并同 key 方法时使用
struct MethodDraft {
    info: MethodInfo,
    calls: Vec<MethodKey>,
}

/// 解析单个文件时共享的上下文
struct FileScope<'a, 't> {
    code: &'a str,
    imports: &'a ImportIndex,
    decls: &'a [TypeDecl<'t>],
}

pub struct JavaTreeSitterAnalyzer {
    language: tree_sitter::Language,
    /// package 声明查询 (用于 FQN 构建)
    package_query: Query,
    scorer: ComplexityScorer,
}

impl JavaTreeSitterAnalyzer {
    pub fn new(scorer: ComplexityScorer) -> Result<Self> {
        let language = tree_sitter_java::language();
        let package_query = Self::compile_package_query(&language)?;

        Ok(Self {
            language,
            package_query,
            scorer,
        })
    }

    /// 编译 Package 声明提取查询
    /// Handles both multi-segment packages (scoped_identifier) and single-segment packages (identifier)
    fn compile_package_query(language: &tree_sitter::Language) -> Result<Query> {
        let query_str = r#"
            (package_declaration
                [
                    (scoped_identifier) @package_name
                    (identifier) @package_name
                ]
            )
        "#;
        Query::new(language, query_str).map_err(|e| anyhow!("Failed to compile package query: {e}"))
    }

    /// 解析一个 Java 文件，返回其中所有类 / 接口骨架
    pub fn parse_source(&self, code: &str, file_path: &Path) -> Result<Vec<ClassInfo>> {
        with_parser(&self.language, |parser| {
            let tree = parser.parse(code, None).ok_or_else(|| anyhow!("Failed to parse code"))?;
            if tree.root_node().has_error() {
                tracing::debug!(file = %file_path.display(), "syntax errors, harvesting what parsed");
            }
            self.extract_classes(&tree, code, file_path)
        })
    }

    fn extract_classes(&self, tree: &Tree, code: &str, file_path: &Path) -> Result<Vec<ClassInfo>> {
        let root = tree.root_node();
        let package = self.extract_package_from_tree(tree, code);
        let mut imports = ImportIndex::from_imports(extract_imports(root, code), package.clone());

        let mut decls = Vec::new();
        collect_type_decls(root, code, package.as_deref().unwrap_or(""), None, &mut decls);
        for decl in &decls {
            let simple = decl.fq_name.rsplit('.').next().unwrap_or(&decl.fq_name);
            imports.add_local_type(simple, &decl.fq_name);
        }

        let scope = FileScope {
            code,
            imports: &imports,
            decls: &decls,
        };

        Ok((0..decls.len())
            .map(|idx| self.build_class(&scope, idx, file_path))
            .collect())
    }

    /// Extract package declaration from already-parsed tree
    fn extract_package_from_tree(&self, tree: &Tree, code: &str) -> Option<String> {
        let mut cursor = QueryCursor::new();
        let matches = cursor.matches(&self.package_query, tree.root_node(), code.as_bytes());

        for m in matches {
            for capture in m.captures {
                if let Ok(text) = capture.node.utf8_text(code.as_bytes()) {
                    return Some(text.to_string());
                }
            }
        }

        None
    }

    fn build_class(&self, scope: &FileScope<'_, '_>, idx: usize, file_path: &Path) -> ClassInfo {
        let decl = &scope.decls[idx];
        let node = decl.node;
        let code = scope.code;
        let is_interface = node.kind() == "interface_declaration";

        let mut class = ClassInfo::new(file_path, &decl.fq_name);
        class.is_interface = is_interface;

        // extends / implements
        let mut parent_text: Option<String> = None;
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "superclass" => {
                    if let Some(ty) = first_named(child) {
                        parent_text = Some(node_text(ty, code).to_string());
                        class.parent = simple_type_name(node_text(ty, code));
                    }
                }
                "super_interfaces" | "extends_interfaces" => {
                    class.interfaces.extend(type_list_names(child, code));
                }
                _ => {}
            }
        }

        // 字段绑定
        let mut fields = TypeBindings::new();
        let mut methods: Vec<MethodDraft> = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            let mut cursor = body.walk();
            for member in body.children(&mut cursor) {
                if member.kind() == "field_declaration" || member.kind() == "constant_declaration" {
                    bind_declarators(member, code, &mut fields);
                }
            }

            let mut cursor = body.walk();
            for member in body.children(&mut cursor) {
                if member.kind() != "method_declaration" {
                    continue;
                }
                let Some(draft) = self.extract_method(scope, idx, member, &fields, parent_text.as_deref()) else {
                    continue;
                };
                merge_or_push(&mut methods, draft);
            }
        }

        for draft in methods {
            class = class.with_method(draft.info.with_calls(draft.calls));
        }
        class
    }

    fn extract_method(
        &self,
        scope: &FileScope<'_, '_>,
        decl_idx: usize,
        node: Node<'_>,
        fields: &TypeBindings,
        parent_text: Option<&str>,
    ) -> Option<MethodDraft> {
        let code = scope.code;
        let name = node_text(node.child_by_field_name("name")?, code).to_string();

        // 参数
        let mut locals = TypeBindings::new();
        let mut param_count = 0;
        let params_text = match node.child_by_field_name("parameters") {
            Some(params) => {
                let mut cursor = params.walk();
                for param in params.named_children(&mut cursor) {
                    match param.kind() {
                        "formal_parameter" => {
                            param_count += 1;
                            if let (Some(ty), Some(var)) =
                                (param.child_by_field_name("type"), param.child_by_field_name("name"))
                            {
                                locals.bind(node_text(var, code), node_text(ty, code));
                            }
                        }
                        "spread_parameter" => param_count += 1,
                        _ => {}
                    }
                }
                node_text(params, code)
            }
            None => "()",
        };

        // 修饰符 / 注解
        let mut visibility = Visibility::PackagePrivate;
        let mut keywords: Vec<&str> = Vec::new();
        let mut annotations = Vec::new();
        let mut throws = Vec::new();
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "modifiers" => {
                    let mut mods = child.walk();
                    for m in child.children(&mut mods) {
                        match m.kind() {
                            "marker_annotation" | "annotation" => {
                                if let Some(ann) = m.child_by_field_name("name") {
                                    annotations.push(format!("@{}", node_text(ann, code)));
                                }
                            }
                            "public" => {
                                visibility = Visibility::Public;
                                keywords.push("public");
                            }
                            "protected" => {
                                visibility = Visibility::Protected;
                                keywords.push("protected");
                            }
                            "private" => {
                                visibility = Visibility::Private;
                                keywords.push("private");
                            }
                            _ if !m.is_named() => keywords.push(node_text(m, code)),
                            _ => {}
                        }
                    }
                }
                "throws" => {
                    let mut types = child.walk();
                    for ty in child.named_children(&mut types) {
                        if !is_comment(ty) {
                            throws.push(node_text(ty, code).to_string());
                        }
                    }
                }
                _ => {}
            }
        }

        let signature = normalize_signature(
            &keywords,
            node.child_by_field_name("type_parameters").map(|n| node_text(n, code)),
            node.child_by_field_name("type").map(|n| node_text(n, code)),
            &name,
            params_text,
            &throws,
        );

        // 基础复杂度
        let body = node.child_by_field_name("body");
        let profile = body.map(|b| {
            let mut profile = ControlFlowProfile::default();
            count_control_flow(b, &mut profile);
            profile
        });
        let score = self.scorer.score(&text_without_comments(node, code), profile.as_ref());

        // 候选调用目标
        let class_fq = &scope.decls[decl_idx].fq_name;
        let calls = match body {
            Some(body) => {
                collect_local_bindings(body, code, &mut locals);
                let bindings = locals.layered_over(fields);
                let resolver = CallResolver {
                    scope,
                    decl_idx,
                    bindings: &bindings,
                    fields,
                    parent_text,
                };
                let mut calls = Vec::new();
                resolver.collect(body, &mut calls);
                dedup_keys(calls)
            }
            None => Vec::new(),
        };

        let info = MethodInfo::new(MethodKey::new(class_fq, &name, param_count), score.level)
            .with_visibility(visibility)
            .with_signature(signature)
            .with_annotations(annotations)
            .with_throws(throws);

        Some(MethodDraft { info, calls })
    }
}

impl SourceParser for JavaTreeSitterAnalyzer {
    fn supported_extension(&self) -> &str {
        "java"
    }

    fn parse_file(&self, code: &str, file_path: &Path) -> Result<Vec<ClassInfo>> {
        self.parse_source(code, file_path)
    }
}

// ============================================================================
// 调用目标猜测
// ============================================================================

struct CallResolver<'s, 'a, 't> {
    scope: &'s FileScope<'a, 't>,
    decl_idx: usize,
    bindings: &'s TypeBindings,
    fields: &'s TypeBindings,
    parent_text: Option<&'s str>,
}

impl CallResolver<'_, '_, '_> {
    /// 先序遍历，保持源码顺序
    fn collect(&self, node: Node<'_>, out: &mut Vec<MethodKey>) {
        if node.kind() == "method_invocation" {
            if let Some(name) = node.child_by_field_name("name") {
                let name = node_text(name, self.scope.code);
                let arity = node.child_by_field_name("arguments").map(count_arguments).unwrap_or(0);
                for owner in self.owner_candidates(node, name, arity) {
                    out.push(MethodKey::new(&owner, name, arity));
                }
            }
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.collect(child, out);
        }
    }

    fn owner_candidates(&self, call: Node<'_>, name: &str, arity: usize) -> Vec<String> {
        let code = self.scope.code;
        let imports = self.scope.imports;
        let own = &self.scope.decls[self.decl_idx];

        let Some(object) = call.child_by_field_name("object") else {
            return self.unqualified_candidates(name, arity);
        };

        match object.kind() {
            "this" => vec![own.fq_name.clone()],
            "super" => self.parent_candidates(),
            "identifier" => {
                let ident = node_text(object, code);
                match self.bindings.lookup(ident) {
                    Some(ty) => imports.type_candidates(ty),
                    None if starts_uppercase(ident) => imports.type_candidates(ident),
                    None => Vec::new(),
                }
            }
            "field_access" => {
                let receiver = object.child_by_field_name("object");
                let field = object.child_by_field_name("field");
                match (receiver, field) {
                    (Some(r), Some(f)) if r.kind() == "this" => self
                        .fields
                        .lookup(node_text(f, code))
                        .map(|ty| imports.type_candidates(ty))
                        .unwrap_or_default(),
                    _ => {
                        let text = node_text(object, code);
                        let head = text.split('.').next().unwrap_or("");
                        if is_dotted_name(text) && !self.bindings.contains(head) {
                            imports.type_candidates(text)
                        } else {
                            Vec::new()
                        }
                    }
                }
            }
            "object_creation_expression" => object
                .child_by_field_name("type")
                .map(|ty| imports.type_candidates(node_text(ty, code)))
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// `m(..)` without receiver
    fn unqualified_candidates(&self, name: &str, arity: usize) -> Vec<String> {
        let shape = (name.to_string(), arity);
        let mut current = Some(self.decl_idx);
        while let Some(idx) = current {
            let decl = &self.scope.decls[idx];
            if decl.shapes.contains(&shape) {
                return vec![decl.fq_name.clone()];
            }
            current = decl.outer;
        }

        let statics = self.scope.imports.static_owner_candidates(name);
        if !statics.is_empty() {
            return statics;
        }
        self.parent_candidates()
    }

    fn parent_candidates(&self) -> Vec<String> {
        self.parent_text
            .map(|ty| self.scope.imports.type_candidates(ty))
            .unwrap_or_default()
    }
}

// ============================================================================
// 树遍历辅助函数
// ============================================================================

fn node_text<'a>(node: Node<'_>, code: &'a str) -> &'a str {
    node.utf8_text(code.as_bytes()).unwrap_or("")
}

fn is_comment(node: Node<'_>) -> bool {
    node.kind().ends_with("comment")
}

fn first_named(node: Node<'_>) -> Option<Node<'_>> {
    let mut cursor = node.walk();
    let found = node.named_children(&mut cursor).find(|n| !is_comment(*n));
    found
}

fn starts_uppercase(text: &str) -> bool {
    text.chars().next().is_some_and(|c| c.is_uppercase())
}

/// `a.b.C` / `Outer.Inner`: identifiers joined by dots only
fn is_dotted_name(text: &str) -> bool {
    !text.is_empty()
        && text
            .split('.')
            .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$'))
}

fn count_arguments(args: Node<'_>) -> usize {
    let mut cursor = args.walk();
    let count = args.named_children(&mut cursor).filter(|n| !is_comment(*n)).count();
    count
}

/// `implements A, B<T>` / `extends A, B` -> ["A", "B"]
fn type_list_names(node: Node<'_>, code: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() == "type_list" {
            let mut types = child.walk();
            for ty in child.named_children(&mut types) {
                if let Some(name) = simple_type_name(node_text(ty, code)) {
                    names.push(name);
                }
            }
        }
    }
    names
}

/// import 声明 (含 static / 通配)
fn extract_imports(root: Node<'_>, code: &str) -> Vec<ImportDecl> {
    let mut imports = Vec::new();
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        if child.kind() != "import_declaration" {
            continue;
        }
        let mut is_static = false;
        let mut is_wildcard = false;
        let mut path = None;
        let mut inner = child.walk();
        for part in child.children(&mut inner) {
            match part.kind() {
                "static" => is_static = true,
                "asterisk" => is_wildcard = true,
                "scoped_identifier" | "identifier" => path = Some(node_text(part, code)),
                _ => {}
            }
        }
        if let Some(path) = path {
            imports.push(ImportDecl::new(path, is_static, is_wildcard));
        }
    }
    imports
}

/// 收集所有 class / interface 声明 (先序，含嵌套与局部类)
fn collect_type_decls<'t>(
    node: Node<'t>,
    code: &str,
    prefix: &str,
    outer: Option<usize>,
    out: &mut Vec<TypeDecl<'t>>,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "class_declaration" | "interface_declaration" => {
                let Some(name) = child.child_by_field_name("name") else {
                    continue;
                };
                let fq_name = qualify(prefix, node_text(name, code));
                let idx = out.len();
                out.push(TypeDecl {
                    node: child,
                    fq_name: fq_name.clone(),
                    outer,
                    shapes: method_shapes(child, code),
                });
                collect_type_decls(child, code, &fq_name, Some(idx), out);
            }
            "enum_declaration" | "record_declaration" => {
                // 不作为分析对象，但内部可能嵌套类
                let name = child.child_by_field_name("name").map(|n| node_text(n, code)).unwrap_or("");
                collect_type_decls(child, code, &qualify(prefix, name), outer, out);
            }
            _ => collect_type_decls(child, code, prefix, outer, out),
        }
    }
}

fn qualify(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn method_shapes(decl: Node<'_>, code: &str) -> HashSet<(String, usize)> {
    let mut shapes = HashSet::new();
    let Some(body) = decl.child_by_field_name("body") else {
        return shapes;
    };
    let mut cursor = body.walk();
    for member in body.children(&mut cursor) {
        if member.kind() != "method_declaration" {
            continue;
        }
        let Some(name) = member.child_by_field_name("name") else {
            continue;
        };
        let arity = member
            .child_by_field_name("parameters")
            .map(|p| {
                let mut c = p.walk();
                let n = p
                    .named_children(&mut c)
                    .filter(|n| matches!(n.kind(), "formal_parameter" | "spread_parameter"))
                    .count();
                n
            })
            .unwrap_or(0);
        shapes.insert((node_text(name, code).to_string(), arity));
    }
    shapes
}

/// `Type a, b = ..;` 形式的声明 -> 绑定
fn bind_declarators(decl: Node<'_>, code: &str, bindings: &mut TypeBindings) {
    let Some(ty) = decl.child_by_field_name("type") else {
        return;
    };
    let type_text = node_text(ty, code);
    let mut cursor = decl.walk();
    for declarator in decl.children(&mut cursor) {
        if declarator.kind() != "variable_declarator" {
            continue;
        }
        let Some(name) = declarator.child_by_field_name("name") else {
            continue;
        };
        if type_text == "var" {
            // var x = new T(..)
            let created = declarator
                .child_by_field_name("value")
                .filter(|v| v.kind() == "object_creation_expression")
                .and_then(|v| v.child_by_field_name("type"));
            if let Some(created) = created {
                bindings.bind(node_text(name, code), node_text(created, code));
            }
        } else {
            bindings.bind(node_text(name, code), type_text);
        }
    }
}

/// 方法体内的局部变量 / for-each 变量 / catch 参数 / try 资源
fn collect_local_bindings(node: Node<'_>, code: &str, bindings: &mut TypeBindings) {
    match node.kind() {
        "local_variable_declaration" => bind_declarators(node, code, bindings),
        "enhanced_for_statement" | "resource" => {
            if let (Some(ty), Some(name)) = (node.child_by_field_name("type"), node.child_by_field_name("name")) {
                bindings.bind(node_text(name, code), node_text(ty, code));
            }
        }
        "catch_formal_parameter" => {
            let ty = {
                let mut cursor = node.walk();
                let found = node.named_children(&mut cursor).find(|n| n.kind() == "catch_type");
                found
            };
            if let (Some(ty), Some(name)) = (ty, node.child_by_field_name("name")) {
                bindings.bind(node_text(name, code), node_text(ty, code));
            }
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_local_bindings(child, code, bindings);
    }
}

/// 控制流计数: 分支 / catch / 循环 / case 标签
fn count_control_flow(node: Node<'_>, profile: &mut ControlFlowProfile) {
    match node.kind() {
        "if_statement" => profile.branches += 1,
        "catch_clause" => profile.catches += 1,
        "for_statement" | "enhanced_for_statement" | "while_statement" | "do_statement" => profile.loops += 1,
        "switch_label" => {
            let mut cursor = node.walk();
            let labels = node
                .named_children(&mut cursor)
                .filter(|n| !is_comment(*n) && n.kind() != "guard")
                .count();
            profile.case_labels += labels as u32;
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        count_control_flow(child, profile);
    }
}

/// 声明源码去掉注释，每段注释替换为一个空格
fn text_without_comments<'a>(node: Node<'_>, code: &'a str) -> Cow<'a, str> {
    let mut comments = Vec::new();
    collect_comments(node, &mut comments);
    if comments.is_empty() {
        return Cow::Borrowed(node_text(node, code));
    }

    let mut out = String::with_capacity(node.end_byte() - node.start_byte());
    let mut pos = node.start_byte();
    for (start, end) in comments {
        out.push_str(code.get(pos..start).unwrap_or(""));
        out.push(' ');
        pos = end;
    }
    out.push_str(code.get(pos..node.end_byte()).unwrap_or(""));
    Cow::Owned(out)
}

fn collect_comments(node: Node<'_>, out: &mut Vec<(usize, usize)>) {
    if is_comment(node) {
        out.push((node.start_byte(), node.end_byte()));
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_comments(child, out);
    }
}

fn normalize_signature(
    keywords: &[&str],
    type_params: Option<&str>,
    return_type: Option<&str>,
    name: &str,
    params: &str,
    throws: &[String],
) -> String {
    let mut parts: Vec<String> = keywords.iter().map(|k| k.to_string()).collect();
    if let Some(tp) = type_params {
        parts.push(tp.to_string());
    }
    if let Some(rt) = return_type {
        parts.push(rt.to_string());
    }
    parts.push(format!("{name}{params}"));
    if !throws.is_empty() {
        parts.push(format!("throws {}", throws.join(", ")));
    }

    let joined = parts.join(" ");
    WHITESPACE_REGEX
        .replace_all(&joined, " ")
        .replace("( ", "(")
        .replace(" )", ")")
        .trim()
        .to_string()
}

fn dedup_keys(keys: Vec<MethodKey>) -> Vec<MethodKey> {
    let mut seen = HashSet::new();
    keys.into_iter().filter(|k| seen.insert(k.clone())).collect()
}

/// 同名同参数个数的重载合并为一个节点: 保留首个声明，基础分取最大，候选取并集
fn merge_or_push(methods: &mut Vec<MethodDraft>, draft: MethodDraft) {
    match methods.iter_mut().find(|m| m.info.key == draft.info.key) {
        Some(existing) => {
            tracing::debug!(method = %draft.info.key, "overloads share a key, merging");
            existing.info.absorb_base(draft.info.base_complexity());
            let prior = std::mem::take(&mut existing.calls);
            existing.calls = dedup_keys(prior.into_iter().chain(draft.calls).collect());
        }
        None => methods.push(draft),
    }
}
