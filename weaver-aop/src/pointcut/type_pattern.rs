//! 类型与名称通配模式
//!
//! - `*` 匹配一段名称中的任意字符（不跨 `.`）
//! - `..` 匹配任意层级的包路径
//! - 结尾的 `+` 表示同时匹配实现了该类型的候选类型
//!
//! 不含 `.` 的模式与类型的简单名称比较，其余与全限定名比较。

use regex::Regex;

use crate::error::AopError;
use crate::target::{simple_name, TargetType};

/// 编译后的类型模式
#[derive(Debug, Clone)]
pub struct TypePattern {
    source: String,
    regex: Regex,
    qualified: bool,
    include_subtypes: bool,
}

impl TypePattern {
    pub fn parse(pattern: &str) -> Result<Self, AopError> {
        let source = pattern.trim();
        if source.is_empty() {
            return Err(invalid(pattern, "empty type pattern"));
        }
        let (body, include_subtypes) = match source.strip_suffix('+') {
            Some(body) => (body, true),
            None => (source, false),
        };
        if body.is_empty() {
            return Err(invalid(pattern, "missing type name before '+'"));
        }

        let regex = Regex::new(&wildcard_regex(body, true))
            .map_err(|e| invalid(pattern, &e.to_string()))?;

        Ok(Self {
            source: source.to_string(),
            regex,
            qualified: body.contains('.'),
            include_subtypes,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// `*` 与 `*+`
    pub fn is_any(&self) -> bool {
        self.source == "*" || self.source == "*+"
    }

    /// 按名称匹配单个类型名
    pub fn matches_name(&self, type_name: &str) -> bool {
        if self.qualified {
            self.regex.is_match(type_name)
        } else {
            self.regex.is_match(simple_name(type_name))
        }
    }

    /// 匹配候选类型，带 `+` 时也检查接口
    pub fn matches_type(&self, target: &TargetType) -> bool {
        self.matches_name(target.name())
            || (self.include_subtypes && target.interfaces().iter().any(|i| self.matches_name(i)))
    }

    /// 候选类型本身或任一接口匹配
    pub fn matches_assignable(&self, target: &TargetType) -> bool {
        self.matches_name(target.name()) || target.interfaces().iter().any(|i| self.matches_name(i))
    }
}

/// 只支持 `*` 的名称模式，用于 Bean 名称与方法名
#[derive(Debug, Clone)]
pub struct NamePattern {
    source: String,
    regex: Regex,
}

impl NamePattern {
    pub fn parse(pattern: &str) -> Result<Self, AopError> {
        let source = pattern.trim();
        if source.is_empty() {
            return Err(invalid(pattern, "empty name pattern"));
        }
        let regex = Regex::new(&wildcard_regex(source, false))
            .map_err(|e| invalid(pattern, &e.to_string()))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}

/// 通配符转正则，`dotted` 为 true 时 `*` 不跨越 `.` 且支持 `..`
fn wildcard_regex(pattern: &str, dotted: bool) -> String {
    let mut regex = String::from("^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '.' if dotted && chars.get(i + 1) == Some(&'.') => {
                regex.push_str(r"\.(?:.*\.)?");
                i += 2;
                continue;
            }
            '*' if dotted => regex.push_str("[^.]*"),
            '*' => regex.push_str(".*"),
            c => regex.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    regex.push('$');
    regex
}

fn invalid(pattern: &str, reason: &str) -> AopError {
    AopError::InvalidPointcut {
        expression: pattern.to_string(),
        reason: reason.to_string(),
    }
}
