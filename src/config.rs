// ============================================================================
// 配置文件 (.java-cost.yml)
// ============================================================================
//
// 查找顺序: --config 指定的文件 > <rootDir>/.java-cost.yml > 默认值。
// 命令行参数覆盖文件中的同名项。

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::CostError;
use crate::scoring::Lexicon;

pub const CONFIG_FILE_NAME: &str = ".java-cost.yml";

/// Progress polling interval used when nothing else is configured.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 150;

/// Directories never worth scanning.
pub const DEFAULT_EXCLUDES: &[&str] = &[".git", "target", "build", "node_modules", ".idea"];

/// Extra lexicon patterns, appended to the built-in families.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LexiconConfig {
    pub storage: Vec<String>,
    pub rest: Vec<String>,
    pub rpc: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CostConfig {
    /// Worker threads; `None` means `max(2, available cores)`.
    pub threads: Option<usize>,
    /// Path components to skip during discovery, on top of the defaults.
    pub exclude: Vec<String>,
    pub lexicon: LexiconConfig,
    pub poll_interval_ms: Option<u64>,
}

impl CostConfig {
    pub fn from_yaml(contents: &str, origin: &Path) -> Result<Self, CostError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: CostConfig = serde_yaml::from_str(contents).map_err(|e| CostError::Config {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate(origin)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, CostError> {
        let contents = fs::read_to_string(path).map_err(|e| CostError::read(path, e))?;
        Self::from_yaml(&contents, path)
    }

    /// `explicit` wins; otherwise `<root>/.java-cost.yml` if present; otherwise defaults.
    pub fn load(explicit: Option<&Path>, root: &Path) -> Result<Self, CostError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let candidate: PathBuf = root.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            tracing::debug!(path = %candidate.display(), "loading project config");
            return Self::from_file(&candidate);
        }

        Ok(Self::default())
    }

    fn validate(&self, origin: &Path) -> Result<(), CostError> {
        if self.threads == Some(0) {
            return Err(CostError::Config {
                path: origin.to_path_buf(),
                message: "threads must be at least 1".to_string(),
            });
        }
        if self.poll_interval_ms == Some(0) {
            return Err(CostError::Config {
                path: origin.to_path_buf(),
                message: "poll_interval_ms must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn lexicon(&self) -> Lexicon {
        Lexicon::with_extra(&self.lexicon.storage, &self.lexicon.rest, &self.lexicon.rpc)
    }

    /// Default excludes followed by the configured ones, without duplicates.
    pub fn excludes(&self) -> Vec<String> {
        let mut all: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        for item in &self.exclude {
            if !all.contains(item) {
                all.push(item.clone());
            }
        }
        all
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::IoFamily;
    use tempfile::TempDir;

    #[test]
    fn test_parse_full_file() {
        let yaml = r#"
threads: 4
exclude:
  - generated
lexicon:
  storage:
    - RedisTemplate
  rpc:
    - dubbo
poll_interval_ms: 50
"#;
        let config = CostConfig::from_yaml(yaml, Path::new("cfg.yml")).unwrap();
        assert_eq!(config.threads, Some(4));
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
        assert!(config.excludes().contains(&"generated".to_string()));
        assert!(config.excludes().contains(&"target".to_string()));
        assert_eq!(config.lexicon().detect("redisTemplate.opsForHash()"), Some(IoFamily::Storage));
        assert_eq!(config.lexicon().detect("DubboReference ref"), Some(IoFamily::Rpc));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = CostConfig::from_yaml("threds: 2\n", Path::new("cfg.yml")).unwrap_err();
        assert!(matches!(err, CostError::Config { .. }));
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(CostConfig::from_yaml("threads: 0\n", Path::new("cfg.yml")).is_err());
    }

    #[test]
    fn test_load_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let config = CostConfig::load(None, dir.path()).unwrap();
        assert_eq!(config, CostConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_millis(DEFAULT_POLL_INTERVAL_MS));
    }

    #[test]
    fn test_load_project_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "threads: 3\n").unwrap();
        let config = CostConfig::load(None, dir.path()).unwrap();
        assert_eq!(config.threads, Some(3));
    }
}
