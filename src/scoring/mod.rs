//! 复杂度评分
//!
//! 基础分 = 控制流加权计数映射到 0..4；方法文本命中外部 I/O 词表时直接记为 CRITICAL。

pub mod lexicon;

pub use lexicon::{IoFamily, Lexicon};

use crate::model::CostLevel;

/// Control-flow constructs counted inside one method body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlFlowProfile {
    /// `if` statements; every `else if` is its own branch.
    pub branches: u32,
    pub catches: u32,
    /// for, for-each, while, do-while
    pub loops: u32,
    /// Expressions of `case` labels; `default` adds nothing.
    pub case_labels: u32,
}

impl ControlFlowProfile {
    pub fn weight(&self) -> u32 {
        self.branches + self.catches + 2 * self.loops + self.case_labels
    }

    pub fn level(&self) -> CostLevel {
        CostLevel::from_weight(self.weight())
    }
}

/// Score of one method, with the family that forced it to CRITICAL if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Score {
    pub level: CostLevel,
    pub weight: u32,
    pub external_io: Option<IoFamily>,
}

/// 评分器: 纯函数，无副作用
#[derive(Debug, Clone, Default)]
pub struct ComplexityScorer {
    lexicon: Lexicon,
}

impl ComplexityScorer {
    pub fn new(lexicon: Lexicon) -> Self {
        Self { lexicon }
    }

    /// `text` is the method's raw source; `profile` is `None` for a method without a body.
    pub fn score(&self, text: &str, profile: Option<&ControlFlowProfile>) -> Score {
        let weight = profile.map(ControlFlowProfile::weight).unwrap_or(0);
        let external_io = self.lexicon.detect(text);
        let level = match external_io {
            Some(_) => CostLevel::Critical,
            None => CostLevel::from_weight(weight),
        };
        Score {
            level,
            weight,
            external_io,
        }
    }
}
