//! 源码解析协作者 (Source Parser)
//!
//! 把源文件变成 ClassInfo / MethodInfo 骨架:
//! 文件路径、FQN、方法签名、注解 / throws、基础复杂度、候选调用目标。
//! 分析核心只依赖 [`SourceParser`]，换语言只需换实现。

pub mod tree_sitter_java;

use std::path::{Path, PathBuf};

use anyhow::Result;
use walkdir::WalkDir;

use crate::error::CostError;
use crate::model::ClassInfo;

/// Turns one source file into class skeletons.
pub trait SourceParser: Send + Sync {
    /// File extension handled by this parser, without the dot.
    fn supported_extension(&self) -> &str;

    /// Every class / interface declared in `code`, methods attached and scored.
    fn parse_file(&self, code: &str, file_path: &Path) -> Result<Vec<ClassInfo>>;
}

/// Source files under `root` with the given extension, sorted by path.
///
/// A path is skipped when any of its components equals an entry of `exclude`.
pub fn discover_sources(root: &Path, extension: &str, exclude: &[String]) -> Result<Vec<PathBuf>, CostError> {
    if !root.is_dir() {
        return Err(CostError::RootNotFound(root.to_path_buf()));
    }

    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !exclude
                    .iter()
                    .any(|skip| entry.file_name().to_string_lossy() == skip.as_str())
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|ext| ext.to_str()) == Some(extension))
        .map(|e| e.into_path())
        .collect();

    files.sort();
    Ok(files)
}
