//! 切点表达式
//!
//! 支持的指示符：
//! - `execution([修饰符] 返回类型 [声明类型.]方法名(参数))`
//! - `within(类型)`、`this(类型)`、`target(类型)`
//! - `args(参数)`
//! - `bean(名称)`
//!
//! 组合：`&&`、`||`、`!` 与括号；文本形式的 `and`/`or`/`not` 在解析前被替换为符号。
//!
//! # 示例
//!
//! ```text
//! execution(* app..*Service.find*(..)) && !bean(legacy*)
//! within(app.Repository+) or args(u64, ..)
//! ```

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;

use crate::auto_proxy::current_proxied_bean_name;
use crate::error::AopError;
use crate::pointcut::type_pattern::{NamePattern, TypePattern};
use crate::pointcut::{ClassFilter, MethodMatcher, Pointcut};
use crate::target::{Method, TargetType};

const MODIFIERS: &[&str] = &["public", "protected", "private", "static", "final", "pub"];

/// 布尔表达式树，叶子由调用方决定
#[derive(Debug, Clone)]
enum BoolExpr<L> {
    Leaf(L),
    And(Box<BoolExpr<L>>, Box<BoolExpr<L>>),
    Or(Box<BoolExpr<L>>, Box<BoolExpr<L>>),
    Not(Box<BoolExpr<L>>),
}

impl<L> BoolExpr<L> {
    fn any_leaf(&self, f: &impl Fn(&L) -> bool) -> bool {
        match self {
            BoolExpr::Leaf(leaf) => f(leaf),
            BoolExpr::And(a, b) | BoolExpr::Or(a, b) => a.any_leaf(f) || b.any_leaf(f),
            BoolExpr::Not(inner) => inner.any_leaf(f),
        }
    }

    fn eval(&self, f: &impl Fn(&L) -> bool) -> bool {
        match self {
            BoolExpr::Leaf(leaf) => f(leaf),
            BoolExpr::And(a, b) => a.eval(f) && b.eval(f),
            BoolExpr::Or(a, b) => a.eval(f) || b.eval(f),
            BoolExpr::Not(inner) => !inner.eval(f),
        }
    }

    fn eval_fuzzy(&self, f: &impl Fn(&L) -> Fuzzy) -> Fuzzy {
        match self {
            BoolExpr::Leaf(leaf) => f(leaf),
            BoolExpr::And(a, b) => a.eval_fuzzy(f).and(b.eval_fuzzy(f)),
            BoolExpr::Or(a, b) => a.eval_fuzzy(f).or(b.eval_fuzzy(f)),
            BoolExpr::Not(inner) => inner.eval_fuzzy(f).not(),
        }
    }
}

/// 类级别匹配的三值结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fuzzy {
    Yes,
    No,
    Maybe,
}

impl Fuzzy {
    fn from_bool(b: bool) -> Self {
        if b {
            Fuzzy::Yes
        } else {
            Fuzzy::No
        }
    }

    fn and(self, other: Fuzzy) -> Fuzzy {
        match (self, other) {
            (Fuzzy::No, _) | (_, Fuzzy::No) => Fuzzy::No,
            (Fuzzy::Yes, Fuzzy::Yes) => Fuzzy::Yes,
            _ => Fuzzy::Maybe,
        }
    }

    fn or(self, other: Fuzzy) -> Fuzzy {
        match (self, other) {
            (Fuzzy::Yes, _) | (_, Fuzzy::Yes) => Fuzzy::Yes,
            (Fuzzy::No, Fuzzy::No) => Fuzzy::No,
            _ => Fuzzy::Maybe,
        }
    }

    fn not(self) -> Fuzzy {
        match self {
            Fuzzy::Yes => Fuzzy::No,
            Fuzzy::No => Fuzzy::Yes,
            Fuzzy::Maybe => Fuzzy::Maybe,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    And,
    Or,
    Not,
    LParen,
    RParen,
    Word(String),
    Designator { name: String, body: String },
}

fn is_word_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '(' | ')' | '!' | '&' | '|')
}

fn is_identifier(word: &str) -> bool {
    word.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn matching_paren(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in chars.iter().enumerate().skip(open) {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// 把顶层的 `and`/`or`/`not` 替换为 `&&`/`||`/`!`，指示符括号内的内容原样保留
pub(crate) fn normalize_operators(expression: &str) -> String {
    let chars: Vec<char> = expression.chars().collect();
    let mut out = String::with_capacity(expression.len());
    let mut i = 0;
    while i < chars.len() {
        if !is_word_char(chars[i]) {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        let start = i;
        while i < chars.len() && is_word_char(chars[i]) {
            i += 1;
        }
        let word: String = chars[start..i].iter().collect();
        match word.as_str() {
            "and" => out.push_str("&&"),
            "or" => out.push_str("||"),
            "not" => out.push('!'),
            _ => {
                out.push_str(&word);
                let mut j = i;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                if is_identifier(&word) && chars.get(j) == Some(&'(') {
                    let end = matching_paren(&chars, j).unwrap_or(chars.len() - 1);
                    out.extend(&chars[i..=end]);
                    i = end + 1;
                }
            }
        }
    }
    out
}

fn tokenize(expression: &str) -> Result<Vec<Token>, AopError> {
    let chars: Vec<char> = expression.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '&' | '|' => {
                if chars.get(i + 1) != Some(&c) {
                    return Err(invalid(expression, &format!("dangling '{}' at position {}", c, i)));
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            _ => {
                let start = i;
                while i < chars.len() && is_word_char(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let mut j = i;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                if is_identifier(&word) && chars.get(j) == Some(&'(') {
                    let end = matching_paren(&chars, j)
                        .ok_or_else(|| invalid(expression, &format!("unclosed '(' after '{}'", word)))?;
                    let body: String = chars[j + 1..end].iter().collect();
                    tokens.push(Token::Designator { name: word, body });
                    i = end + 1;
                } else {
                    tokens.push(Token::Word(word));
                }
            }
        }
    }
    Ok(tokens)
}

/// 递归下降解析：`or := and ('||' and)*`，`and := unary ('&&' unary)*`
struct Parser<'a, L> {
    expression: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    leaf: &'a dyn Fn(&Token) -> Result<L, AopError>,
}

impl<'a, L> Parser<'a, L> {
    fn parse(
        expression: &'a str,
        leaf: &'a dyn Fn(&Token) -> Result<L, AopError>,
    ) -> Result<BoolExpr<L>, AopError> {
        let normalized = normalize_operators(expression);
        let tokens = tokenize(&normalized)?;
        if tokens.is_empty() {
            return Err(invalid(expression, "empty expression"));
        }
        let mut parser = Parser {
            expression,
            tokens,
            pos: 0,
            leaf,
        };
        let expr = parser.parse_or()?;
        if parser.pos < parser.tokens.len() {
            return Err(invalid(
                expression,
                &format!("unexpected token {:?}", parser.tokens[parser.pos]),
            ));
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn parse_or(&mut self) -> Result<BoolExpr<L>, AopError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = BoolExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<BoolExpr<L>, AopError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = BoolExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<BoolExpr<L>, AopError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(BoolExpr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<BoolExpr<L>, AopError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| invalid(self.expression, "unexpected end of expression"))?;
        self.pos += 1;
        match token {
            Token::LParen => {
                let inner = self.parse_or()?;
                if self.peek() != Some(&Token::RParen) {
                    return Err(invalid(self.expression, "missing ')'"));
                }
                self.pos += 1;
                Ok(inner)
            }
            Token::Word(_) | Token::Designator { .. } => Ok(BoolExpr::Leaf((self.leaf)(&token)?)),
            other => Err(invalid(self.expression, &format!("unexpected token {:?}", other))),
        }
    }
}

#[derive(Debug, Clone)]
enum ParamPattern {
    /// `..`
    AnySequence,
    Type(TypePattern),
}

fn params_match(patterns: &[ParamPattern], params: &[String]) -> bool {
    match patterns.split_first() {
        None => params.is_empty(),
        Some((ParamPattern::AnySequence, rest)) => {
            (0..=params.len()).any(|skip| params_match(rest, &params[skip..]))
        }
        Some((ParamPattern::Type(pattern), rest)) => match params.split_first() {
            Some((param, tail)) => pattern.matches_name(param) && params_match(rest, tail),
            None => false,
        },
    }
}

#[derive(Debug, Clone)]
struct ExecutionPattern {
    return_type: TypePattern,
    declaring_type: Option<TypePattern>,
    name: NamePattern,
    params: Vec<ParamPattern>,
}

#[derive(Debug, Clone)]
enum Designator {
    Execution(ExecutionPattern),
    Within(TypePattern),
    This(TypePattern),
    Target(TypePattern),
    Args(Vec<ParamPattern>),
    Bean(NamePattern),
}

impl Designator {
    fn matches_class(&self, target: &TargetType) -> Fuzzy {
        match self {
            Designator::Execution(execution) => match &execution.declaring_type {
                None => Fuzzy::Maybe,
                Some(declaring) => {
                    let declared = declaring.matches_assignable(target)
                        || target
                            .methods()
                            .iter()
                            .any(|m| declaring.matches_name(m.declaring_type()));
                    if declared {
                        Fuzzy::Maybe
                    } else {
                        Fuzzy::No
                    }
                }
            },
            Designator::Within(pattern) => Fuzzy::from_bool(pattern.matches_type(target)),
            Designator::This(pattern) | Designator::Target(pattern) => {
                Fuzzy::from_bool(pattern.matches_assignable(target))
            }
            Designator::Args(_) => Fuzzy::Maybe,
            Designator::Bean(pattern) => match current_proxied_bean_name() {
                Some(name) => Fuzzy::from_bool(pattern.matches(&name)),
                None => Fuzzy::Maybe,
            },
        }
    }

    fn matches_method(&self, method: &Method, target: &TargetType, bean_name: Option<&str>) -> bool {
        match self {
            Designator::Execution(execution) => {
                execution.return_type.matches_name(method.return_type())
                    && execution.name.matches(method.name())
                    && params_match(&execution.params, method.parameter_types())
                    && execution.declaring_type.as_ref().map_or(true, |declaring| {
                        declaring.matches_name(method.declaring_type()) || declaring.matches_type(target)
                    })
            }
            Designator::Within(pattern) => pattern.matches_type(target),
            Designator::This(pattern) | Designator::Target(pattern) => pattern.matches_assignable(target),
            Designator::Args(params) => params_match(params, method.parameter_types()),
            // 没有 Bean 名称时无法判断，按可能匹配处理
            Designator::Bean(pattern) => bean_name.map_or(true, |name| pattern.matches(name)),
        }
    }
}

fn parse_designator(expression: &str, token: &Token) -> Result<Designator, AopError> {
    let (name, body) = match token {
        Token::Designator { name, body } => (name.as_str(), body.as_str()),
        Token::Word(word) => {
            return Err(invalid(expression, &format!("expected a designator but found '{}'", word)))
        }
        _ => return Err(invalid(expression, "expected a designator")),
    };
    match name {
        "execution" => parse_execution(expression, body).map(Designator::Execution),
        "within" => TypePattern::parse(body).map(Designator::Within),
        "this" => TypePattern::parse(body).map(Designator::This),
        "target" => TypePattern::parse(body).map(Designator::Target),
        "args" => parse_params(expression, body).map(Designator::Args),
        "bean" => NamePattern::parse(body).map(Designator::Bean),
        other => Err(invalid(expression, &format!("unsupported designator '{}'", other))),
    }
}

/// 按空白与逗号切分，忽略 `<...>` 内部的分隔符
fn split_top_level(input: &str, separator: impl Fn(char) -> bool) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for c in input.chars() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            _ => {}
        }
        if depth == 0 && separator(c) {
            if !current.trim().is_empty() {
                parts.push(current.trim().to_string());
            }
            current.clear();
        } else {
            current.push(c);
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn parse_params(expression: &str, body: &str) -> Result<Vec<ParamPattern>, AopError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let raw: Vec<&str> = body.split(',').map(str::trim).collect();
    if raw.iter().any(|p| p.is_empty()) {
        return Err(invalid(expression, "empty parameter pattern"));
    }
    split_top_level(body, |c| c == ',')
        .iter()
        .map(|param| match param.as_str() {
            ".." => Ok(ParamPattern::AnySequence),
            other => TypePattern::parse(other).map(ParamPattern::Type),
        })
        .collect()
}

fn parse_execution(expression: &str, body: &str) -> Result<ExecutionPattern, AopError> {
    let chars: Vec<char> = body.chars().collect();
    let open = chars
        .iter()
        .position(|&c| c == '(')
        .ok_or_else(|| invalid(expression, "execution() requires a parameter list"))?;
    let close = matching_paren(&chars, open)
        .ok_or_else(|| invalid(expression, "unclosed parameter list in execution()"))?;

    // `throws ...` 子句被忽略
    let trailing: String = chars[close + 1..].iter().collect();
    let trailing = trailing.trim();
    if !trailing.is_empty() && !trailing.starts_with("throws") {
        return Err(invalid(expression, &format!("unexpected '{}' after parameter list", trailing)));
    }

    let head: String = chars[..open].iter().collect();
    let params: String = chars[open + 1..close].iter().collect();

    let mut parts = split_top_level(&head, char::is_whitespace);
    while parts.len() > 2 && MODIFIERS.contains(&parts[0].as_str()) {
        parts.remove(0);
    }
    if parts.len() != 2 {
        return Err(invalid(
            expression,
            "expected '<return-type> [<declaring-type>.]<method>(<params>)'",
        ));
    }

    let return_type = TypePattern::parse(&parts[0])?;
    let (declaring_type, name) = match parts[1].rfind('.') {
        None => (None, NamePattern::parse(&parts[1])?),
        Some(idx) => {
            let declaring = &parts[1][..idx];
            let name = &parts[1][idx + 1..];
            if declaring.is_empty() || declaring.ends_with('.') || name.is_empty() {
                return Err(invalid(expression, &format!("malformed method pattern '{}'", parts[1])));
            }
            (Some(TypePattern::parse(declaring)?), NamePattern::parse(name)?)
        }
    };

    Ok(ExecutionPattern {
        return_type,
        declaring_type,
        name,
        params: parse_params(expression, &params)?,
    })
}

fn invalid(expression: &str, reason: &str) -> AopError {
    AopError::InvalidPointcut {
        expression: expression.to_string(),
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ShadowKey {
    target: String,
    method: String,
}

/// 表达式切点
///
/// 构造时完成解析，非法表达式立即报错。方法级匹配结果按（类型、方法、Bean 名称）缓存。
pub struct AspectJExpressionPointcut {
    expression: String,
    tree: BoolExpr<Designator>,
    uses_bean_name: bool,
    shadow_cache: RwLock<HashMap<ShadowKey, bool>>,
}

impl AspectJExpressionPointcut {
    pub fn parse(expression: &str) -> Result<Self, AopError> {
        let leaf = |token: &Token| parse_designator(expression, token);
        let tree = Parser::parse(expression, &leaf)?;
        let uses_bean_name = tree.any_leaf(&|d| matches!(d, Designator::Bean(_)));
        tracing::trace!("Parsed pointcut expression '{}'", expression);
        Ok(Self {
            expression: expression.to_string(),
            tree,
            uses_bean_name,
            shadow_cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// 缓存中的匹配结果数量
    pub fn shadow_match_count(&self) -> usize {
        self.shadow_cache.read().len()
    }
}

impl fmt::Debug for AspectJExpressionPointcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AspectJExpressionPointcut")
            .field("expression", &self.expression)
            .finish()
    }
}

impl ClassFilter for AspectJExpressionPointcut {
    fn matches(&self, target: &TargetType) -> bool {
        self.tree.eval_fuzzy(&|d| d.matches_class(target)) != Fuzzy::No
    }
}

impl MethodMatcher for AspectJExpressionPointcut {
    fn matches(&self, method: &Method, target: &TargetType) -> bool {
        let bean_name = if self.uses_bean_name {
            current_proxied_bean_name()
        } else {
            None
        };
        // 依赖 Bean 名称的结果不缓存，缓存规模只随类型和方法增长
        if bean_name.is_some() {
            return self
                .tree
                .eval(&|d| d.matches_method(method, target, bean_name.as_deref()));
        }
        let key = ShadowKey {
            target: target.name().to_string(),
            method: method.signature(),
        };
        if let Some(&matched) = self.shadow_cache.read().get(&key) {
            return matched;
        }

        let matched = self
            .tree
            .eval(&|d| d.matches_method(method, target, bean_name.as_deref()));
        tracing::trace!(
            "Pointcut '{}' {} {} on {}",
            self.expression,
            if matched { "matches" } else { "does not match" },
            key.method,
            key.target
        );
        self.shadow_cache.write().entry(key).or_insert(matched);
        matched
    }
}

impl Pointcut for AspectJExpressionPointcut {
    fn class_filter(&self) -> &dyn ClassFilter {
        self
    }

    fn method_matcher(&self) -> &dyn MethodMatcher {
        self
    }
}

/// 按类型模式表达式过滤候选类型，例如 `app.*Service+ && !app.Legacy*`
pub struct TypePatternClassFilter {
    expression: String,
    tree: BoolExpr<TypePattern>,
}

impl TypePatternClassFilter {
    pub fn parse(expression: &str) -> Result<Self, AopError> {
        let leaf = |token: &Token| match token {
            Token::Word(word) => TypePattern::parse(word),
            _ => Err(invalid(expression, "expected a type pattern")),
        };
        let tree = Parser::parse(expression, &leaf)?;
        Ok(Self {
            expression: expression.to_string(),
            tree,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl fmt::Debug for TypePatternClassFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypePatternClassFilter")
            .field("expression", &self.expression)
            .finish()
    }
}

impl ClassFilter for TypePatternClassFilter {
    fn matches(&self, target: &TargetType) -> bool {
        self.tree.eval(&|pattern| pattern.matches_type(target))
    }
}
