//! 通知优先级
//!
//! 排序规则：
//! 1. 按 order 值升序（未设置视为最低优先级），值越小越靠外层
//! 2. order 相同且来自同一个切面时按声明顺序：
//!    - 两者之一是 after 类通知：后声明的优先级更高
//!    - 否则先声明的优先级更高
//!
//! 第 2 条规则不具备传递性，因此使用偏序拓扑排序；出现环时退化为按 order 的稳定排序。

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use crate::advice::AdviceKind;
use crate::advisor::Advisor;

/// 最高优先级
pub const HIGHEST_PRECEDENCE: i32 = i32::MIN;

/// 最低优先级
pub const LOWEST_PRECEDENCE: i32 = i32::MAX;

/// 来自切面声明的优先级信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AspectPrecedence {
    aspect_name: String,
    declaration_order: usize,
    kind: AdviceKind,
}

impl AspectPrecedence {
    pub fn new(aspect_name: impl Into<String>, declaration_order: usize, kind: AdviceKind) -> Self {
        Self {
            aspect_name: aspect_name.into(),
            declaration_order,
            kind,
        }
    }

    pub fn aspect_name(&self) -> &str {
        &self.aspect_name
    }

    pub fn declaration_order(&self) -> usize {
        self.declaration_order
    }

    pub fn kind(&self) -> AdviceKind {
        self.kind
    }
}

/// 未设置 order 的 Advisor 按最低优先级处理
pub fn effective_order(advisor: &dyn Advisor) -> i32 {
    advisor.order().unwrap_or(LOWEST_PRECEDENCE)
}

/// 比较两个 Advisor，`Less` 表示 `a` 优先级更高
pub fn compare_advisors(a: &dyn Advisor, b: &dyn Advisor) -> Ordering {
    let by_order = effective_order(a).cmp(&effective_order(b));
    if by_order != Ordering::Equal {
        return by_order;
    }
    match (a.precedence(), b.precedence()) {
        (Some(pa), Some(pb)) if pa.aspect_name == pb.aspect_name => compare_within_aspect(pa, pb),
        _ => Ordering::Equal,
    }
}

fn compare_within_aspect(a: &AspectPrecedence, b: &AspectPrecedence) -> Ordering {
    let declared = a.declaration_order.cmp(&b.declaration_order);
    if a.kind.is_after() || b.kind.is_after() {
        declared.reverse()
    } else {
        declared
    }
}

/// 按 order 的稳定排序
pub fn sort_by_order(advisors: &mut [Arc<dyn Advisor>]) {
    advisors.sort_by_key(|advisor| effective_order(advisor.as_ref()));
}

/// 按切面优先级排序
pub fn sort_advisors(mut advisors: Vec<Arc<dyn Advisor>>) -> Vec<Arc<dyn Advisor>> {
    match partial_order_sort(&advisors, |a, b| compare_advisors(a.as_ref(), b.as_ref())) {
        Some(order) => order.into_iter().map(|i| Arc::clone(&advisors[i])).collect(),
        None => {
            tracing::debug!(
                "Advisor precedence of {} advisors contains a cycle, falling back to order-based sort",
                advisors.len()
            );
            sort_by_order(&mut advisors);
            advisors
        }
    }
}

/// 偏序拓扑排序，返回下标序列
///
/// 每一轮取列表中第一个"没有更小元素"的元素并从图中移除；找不到时说明存在环，返回 `None`
fn partial_order_sort<T>(items: &[T], compare: impl Fn(&T, &T) -> Ordering) -> Option<Vec<usize>> {
    let n = items.len();
    let mut smaller: Vec<HashSet<usize>> = vec![HashSet::new(); n];
    for i in 0..n {
        for j in 0..i {
            match compare(&items[i], &items[j]) {
                Ordering::Greater => {
                    smaller[i].insert(j);
                }
                Ordering::Less => {
                    smaller[j].insert(i);
                }
                Ordering::Equal => {}
            }
        }
    }

    let mut remaining: Vec<usize> = (0..n).collect();
    let mut sorted = Vec::with_capacity(n);
    while !remaining.is_empty() {
        let position = remaining.iter().position(|&i| smaller[i].is_empty())?;
        let least = remaining.remove(position);
        for &other in &remaining {
            smaller[other].remove(&least);
        }
        sorted.push(least);
    }
    Some(sorted)
}
