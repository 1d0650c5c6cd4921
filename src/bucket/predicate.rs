//! Client-side evaluation of query expressions.
//!
//! Expressions are parsed once per query into a [`Predicate`] and then
//! evaluated against every candidate item. Recognition happens in priority
//! order: `size(...)`, then comparison operators, then `contains(...)`.
//! Unrecognized expressions never match.

use aws_sdk_dynamodb::types::AttributeValue;
use std::cmp::Ordering;
use std::collections::HashMap;

use super::types::DataQueryParam;
use crate::store::Record;

/// Comparison operator, detected in the order `>=`, `>`, `<=`, `<`, `=`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    /// `>=`
    Ge,
    /// `>`
    Gt,
    /// `<=`
    Le,
    /// `<`
    Lt,
    /// `=`
    Eq,
}

impl CompareOp {
    /// First operator found in an expression
    pub fn detect(expression: &str) -> Option<Self> {
        let compact: String = expression.split_whitespace().collect();
        if compact.contains(">=") {
            Some(CompareOp::Ge)
        } else if compact.contains('>') {
            Some(CompareOp::Gt)
        } else if compact.contains("<=") {
            Some(CompareOp::Le)
        } else if compact.contains('<') {
            Some(CompareOp::Lt)
        } else if compact.contains('=') {
            Some(CompareOp::Eq)
        } else {
            None
        }
    }

    /// Check if `current <op> bound` holds for the given ordering
    pub fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Ge => ordering != Ordering::Less,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Eq => ordering == Ordering::Equal,
        }
    }
}

/// Parsed form of one field expression
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// `size(field) <op> :n`
    Size {
        /// Operator; `None` never matches
        op: Option<CompareOp>,
        /// Bound, `0` when the placeholder is missing or not numeric
        bound: i64,
    },
    /// `field <op> :v`
    Compare {
        /// Operator
        op: CompareOp,
        /// Bound; `None` never matches
        bound: Option<AttributeValue>,
    },
    /// `contains(field, :v)`; every bound value must be contained
    Contains {
        /// Bound values in placeholder order
        values: Vec<AttributeValue>,
    },
    /// Conjunction of `AND`-joined expressions
    All(Vec<Predicate>),
    /// Anything else
    Unsupported,
}

impl Predicate {
    /// Parse an expression, resolving its `:placeholders`
    pub fn parse(expression: &str, values: &HashMap<String, AttributeValue>) -> Self {
        let conjuncts = split_conjunction(expression);
        if conjuncts.len() > 1 {
            return Predicate::All(
                conjuncts
                    .into_iter()
                    .map(|part| Self::parse_single(part, values))
                    .collect(),
            );
        }
        Self::parse_single(expression, values)
    }

    fn parse_single(expression: &str, values: &HashMap<String, AttributeValue>) -> Self {
        let bound_values: Vec<&AttributeValue> = placeholders(expression)
            .into_iter()
            .filter_map(|token| values.get(token))
            .collect();

        if has_call(expression, "size") {
            let bound = bound_values
                .first()
                .and_then(|value| value.as_n().ok())
                .and_then(|n| n.parse::<f64>().ok())
                .map(|n| n as i64)
                .unwrap_or(0);
            return Predicate::Size {
                op: CompareOp::detect(expression),
                bound,
            };
        }

        if let Some(op) = CompareOp::detect(expression) {
            return Predicate::Compare {
                op,
                bound: bound_values.first().map(|value| (*value).clone()),
            };
        }

        if has_call(expression, "contains") {
            return Predicate::Contains {
                values: bound_values.into_iter().cloned().collect(),
            };
        }

        Predicate::Unsupported
    }

    /// Evaluate against the current value of the field
    pub fn matches(&self, current: Option<&AttributeValue>) -> bool {
        match self {
            Predicate::Size { op, bound } => match op {
                Some(op) => op.holds(magnitude(current).cmp(bound)),
                None => false,
            },
            Predicate::Compare { op, bound } => match (current, bound) {
                (Some(current), Some(bound)) => {
                    compare_scalars(current, bound).is_some_and(|ordering| op.holds(ordering))
                }
                _ => false,
            },
            Predicate::Contains { values } => current.is_some_and(|current| contains_all(current, values)),
            Predicate::All(predicates) => predicates.iter().all(|p| p.matches(current)),
            Predicate::Unsupported => false,
        }
    }

    /// Values an index lookup may use: equality bounds and `contains` members
    ///
    /// A `contains` bound is looked up as a whole index value, so on a scalar
    /// string field an index-served query finds exact values only, never
    /// substrings.
    pub fn lookup_values(&self) -> Vec<String> {
        match self {
            Predicate::Compare {
                op: CompareOp::Eq,
                bound: Some(bound),
            } => super::types::scalar_string(bound).into_iter().collect(),
            Predicate::Contains { values } => values.iter().flat_map(super::types::index_values).collect(),
            Predicate::All(predicates) => predicates.iter().flat_map(Predicate::lookup_values).collect(),
            _ => Vec::new(),
        }
    }

    /// Numeric range implied by the comparison bounds, `(lower, upper)` inclusive
    pub fn numeric_range(&self) -> (Option<i64>, Option<i64>) {
        match self {
            Predicate::Compare {
                op,
                bound: Some(bound),
            } => {
                let Some(value) = scalar_number(bound) else {
                    return (None, None);
                };
                match op {
                    CompareOp::Ge | CompareOp::Gt => (Some(value), None),
                    CompareOp::Le | CompareOp::Lt => (None, Some(value)),
                    CompareOp::Eq => (Some(value), Some(value)),
                }
            }
            Predicate::All(predicates) => {
                predicates
                    .iter()
                    .map(Predicate::numeric_range)
                    .fold((None, None), |(lower, upper), (l, u)| {
                        (max_opt(lower, l), min_opt(upper, u))
                    })
            }
            _ => (None, None),
        }
    }
}

/// Predicates of every field named by a query
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PredicateSet {
    predicates: Vec<(String, Predicate)>,
}

impl PredicateSet {
    /// Parse every expression of a query parameter
    pub fn from_param(param: &DataQueryParam) -> Self {
        Self {
            predicates: param
                .expression_map
                .iter()
                .map(|(field, expression)| {
                    (
                        field.clone(),
                        Predicate::parse(expression, &param.expression_value_map),
                    )
                })
                .collect(),
        }
    }

    /// Predicate of a field
    pub fn get(&self, field: &str) -> Option<&Predicate> {
        self.predicates
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, predicate)| predicate)
    }

    /// Check an item; fields the item does not carry are not checked
    pub fn matches(&self, attributes: &Record) -> bool {
        self.predicates.iter().all(|(field, predicate)| match attributes.get(field) {
            Some(current) => predicate.matches(Some(current)),
            None => true,
        })
    }

    /// Check if no field is constrained
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

/// Evaluate one expression against the current value of a field
pub fn is_match(
    expression: &str,
    expression_value_map: &HashMap<String, AttributeValue>,
    current: &AttributeValue,
) -> bool {
    Predicate::parse(expression, expression_value_map).matches(Some(current))
}

/// `:name` tokens of an expression, in order of appearance
pub fn placeholders(expression: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let bytes = expression.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b':' {
            let start = i;
            i += 1;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            if i > start + 1 {
                tokens.push(&expression[start..i]);
            }
        } else {
            i += 1;
        }
    }
    tokens
}

fn is_word_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

/// Check for `name(` as a standalone call, whitespace allowed before the parenthesis
fn has_call(expression: &str, name: &str) -> bool {
    let lower = expression.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    lower.match_indices(name).any(|(at, _)| {
        let before_ok = at == 0 || !is_word_byte(bytes[at - 1]);
        let after = lower[at + name.len()..].trim_start();
        before_ok && after.starts_with('(')
    })
}

fn split_conjunction(expression: &str) -> Vec<&str> {
    let lower = expression.to_ascii_lowercase();
    let mut parts = Vec::new();
    let mut rest_start = 0;
    for (at, _) in lower.match_indices(" and ") {
        parts.push(expression[rest_start..at].trim());
        rest_start = at + " and ".len();
    }
    parts.push(expression[rest_start..].trim());
    parts.retain(|part| !part.is_empty());
    parts
}

/// Length-like magnitude of a value, `0` for anything without one
fn magnitude(current: Option<&AttributeValue>) -> i64 {
    let len = match current {
        Some(AttributeValue::S(s)) => s.chars().count(),
        Some(AttributeValue::Ss(values) | AttributeValue::Ns(values)) => values.len(),
        Some(AttributeValue::Bs(values)) => values.len(),
        Some(AttributeValue::L(values)) => values.len(),
        Some(AttributeValue::M(values)) => values.len(),
        Some(AttributeValue::B(blob)) => blob.as_ref().len(),
        _ => 0,
    };
    len as i64
}

fn scalar_number(value: &AttributeValue) -> Option<i64> {
    let text = super::types::scalar_string(value)?;
    text.parse::<i64>()
        .ok()
        .or_else(|| text.parse::<f64>().ok().map(|n| n as i64))
}

/// Numeric when both sides parse as numbers, lexicographic otherwise
fn compare_scalars(current: &AttributeValue, bound: &AttributeValue) -> Option<Ordering> {
    let current = super::types::scalar_string(current)?;
    let bound = super::types::scalar_string(bound)?;
    match (current.parse::<f64>(), bound.parse::<f64>()) {
        (Ok(a), Ok(b)) => a.partial_cmp(&b),
        _ => Some(current.cmp(&bound)),
    }
}

fn contains_all(current: &AttributeValue, values: &[AttributeValue]) -> bool {
    let holds = |member: &dyn Fn(&AttributeValue) -> bool| values.iter().all(|value| member(value));

    match current {
        AttributeValue::Ns(numbers) if !numbers.is_empty() => holds(&|value| {
            value
                .as_n()
                .is_ok_and(|n| numbers.iter().any(|member| same_number(member, n)))
        }),
        AttributeValue::Ss(strings) if !strings.is_empty() => {
            holds(&|value| value.as_s().is_ok_and(|s| strings.contains(s)))
        }
        AttributeValue::S(text) if !text.is_empty() => {
            holds(&|value| value.as_s().is_ok_and(|s| text.contains(s.as_str())))
        }
        AttributeValue::M(map) if !map.is_empty() => {
            holds(&|value| value.as_s().is_ok_and(|s| map.contains_key(s)))
        }
        AttributeValue::L(list) if !list.is_empty() => holds(&|value| {
            list.iter()
                .any(|member| compare_scalars(member, value) == Some(Ordering::Equal) || member == value)
        }),
        _ => false,
    }
}

fn same_number(a: &str, b: &str) -> bool {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x == y,
        _ => a == b,
    }
}

fn max_opt(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

fn min_opt(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
