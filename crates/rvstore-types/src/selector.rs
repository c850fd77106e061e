//! Label and field selectors used to filter `list` and `watch`.
//!
//! Label selector grammar (comma-separated, all requirements must hold):
//!
//! ```text
//! key=value   key==value   key!=value
//! key         !key
//! key in (a,b)             key notin (a,b)
//! ```
//!
//! Field selectors support `=`, `==` and `!=` over `metadata.name` and
//! `metadata.namespace`. The empty string selects everything.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::TypeError;
use crate::resource::Resource;

/// Comparison applied by a single label [`Requirement`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// One clause of a label selector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    pub operator: Operator,
    pub values: Vec<String>,
}

impl Requirement {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            Operator::Equals => value.is_some_and(|v| self.values.first() == Some(v)),
            // A missing label satisfies `!=`.
            Operator::NotEquals => value.map_or(true, |v| self.values.first() != Some(v)),
            Operator::In => value.is_some_and(|v| self.values.contains(v)),
            Operator::NotIn => value.map_or(true, |v| !self.values.contains(v)),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operator {
            Operator::Equals => write!(f, "{}={}", self.key, self.values.join(",")),
            Operator::NotEquals => write!(f, "{}!={}", self.key, self.values.join(",")),
            Operator::In => write!(f, "{} in ({})", self.key, self.values.join(",")),
            Operator::NotIn => write!(f, "{} notin ({})", self.key, self.values.join(",")),
            Operator::Exists => write!(f, "{}", self.key),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
        }
    }
}

/// Conjunction of label requirements.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Selector matching every object.
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn from_requirements(requirements: Vec<Requirement>) -> Self {
        Self { requirements }
    }

    /// Shorthand for a single `key=value` requirement.
    pub fn equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::from_requirements(vec![Requirement {
            key: key.into(),
            operator: Operator::Equals,
            values: vec![value.into()],
        }])
    }

    pub fn parse(selector: &str) -> Result<Self, TypeError> {
        let mut requirements = Vec::new();
        for clause in split_top_level(selector) {
            let clause = clause.trim();
            if clause.is_empty() {
                if selector.trim().is_empty() {
                    continue;
                }
                return Err(bad_selector(selector, "empty requirement"));
            }
            requirements.push(parse_requirement(selector, clause)?);
        }
        Ok(Self { requirements })
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.requirements.iter().map(ToString::to_string).collect();
        write!(f, "{}", parts.join(","))
    }
}

fn bad_selector(selector: &str, reason: impl Into<String>) -> TypeError {
    TypeError::InvalidSelector {
        selector: selector.to_string(),
        reason: reason.into(),
    }
}

/// Split on commas that are not inside a parenthesised value set.
fn split_top_level(selector: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (idx, ch) in selector.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&selector[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&selector[start..]);
    parts
}

fn validate_key(selector: &str, key: &str) -> Result<(), TypeError> {
    if key.is_empty() {
        return Err(bad_selector(selector, "label key must not be empty"));
    }
    let ok = key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
    if !ok {
        return Err(bad_selector(selector, format!("invalid label key {key:?}")));
    }
    Ok(())
}

fn validate_value(selector: &str, value: &str) -> Result<(), TypeError> {
    let ok = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !ok {
        return Err(bad_selector(selector, format!("invalid label value {value:?}")));
    }
    Ok(())
}

fn parse_requirement(selector: &str, clause: &str) -> Result<Requirement, TypeError> {
    if let Some(open) = clause.find('(') {
        let head = clause[..open].trim();
        let tail = clause[open + 1..].trim();
        let inner = tail
            .strip_suffix(')')
            .ok_or_else(|| bad_selector(selector, "unterminated value set"))?;
        let (key, op) = head
            .rsplit_once(char::is_whitespace)
            .ok_or_else(|| bad_selector(selector, format!("missing operator in {clause:?}")))?;
        let operator = match op {
            "in" => Operator::In,
            "notin" => Operator::NotIn,
            other => return Err(bad_selector(selector, format!("unknown set operator {other:?}"))),
        };
        let key = key.trim();
        validate_key(selector, key)?;
        let mut values = Vec::new();
        for value in inner.split(',') {
            let value = value.trim();
            if value.is_empty() {
                return Err(bad_selector(selector, "empty value in set"));
            }
            validate_value(selector, value)?;
            values.push(value.to_string());
        }
        return Ok(Requirement {
            key: key.to_string(),
            operator,
            values,
        });
    }

    if let Some(key) = clause.strip_prefix('!') {
        let key = key.trim();
        validate_key(selector, key)?;
        return Ok(Requirement {
            key: key.to_string(),
            operator: Operator::DoesNotExist,
            values: Vec::new(),
        });
    }

    let (key, operator, value) = if let Some((k, v)) = clause.split_once("!=") {
        (k, Operator::NotEquals, v)
    } else if let Some((k, v)) = clause.split_once("==") {
        (k, Operator::Equals, v)
    } else if let Some((k, v)) = clause.split_once('=') {
        (k, Operator::Equals, v)
    } else {
        let key = clause.trim();
        validate_key(selector, key)?;
        return Ok(Requirement {
            key: key.to_string(),
            operator: Operator::Exists,
            values: Vec::new(),
        });
    };

    let key = key.trim();
    let value = value.trim();
    validate_key(selector, key)?;
    validate_value(selector, value)?;
    Ok(Requirement {
        key: key.to_string(),
        operator,
        values: vec![value.to_string()],
    })
}

/// Object field addressable by a [`FieldSelector`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    Name,
    Namespace,
}

impl Field {
    fn parse(selector: &str, raw: &str) -> Result<Self, TypeError> {
        match raw {
            "metadata.name" => Ok(Self::Name),
            "metadata.namespace" => Ok(Self::Namespace),
            other => Err(bad_selector(selector, format!("unsupported field {other:?}"))),
        }
    }

    fn value<'a>(&self, obj: &'a Resource) -> &'a str {
        match self {
            Self::Name => obj.name(),
            Self::Namespace => obj.namespace().unwrap_or(""),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "metadata.name",
            Self::Namespace => "metadata.namespace",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct FieldRequirement {
    field: Field,
    negate: bool,
    value: String,
}

/// Conjunction of field equality requirements.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldSelector {
    requirements: Vec<FieldRequirement>,
}

impl FieldSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    /// Selector matching exactly one object name.
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            requirements: vec![FieldRequirement {
                field: Field::Name,
                negate: false,
                value: name.into(),
            }],
        }
    }

    pub fn parse(selector: &str) -> Result<Self, TypeError> {
        let mut requirements = Vec::new();
        if selector.trim().is_empty() {
            return Ok(Self { requirements });
        }
        for clause in selector.split(',') {
            let clause = clause.trim();
            let (field, negate, value) = if let Some((f, v)) = clause.split_once("!=") {
                (f, true, v)
            } else if let Some((f, v)) = clause.split_once("==") {
                (f, false, v)
            } else if let Some((f, v)) = clause.split_once('=') {
                (f, false, v)
            } else {
                return Err(bad_selector(selector, format!("missing operator in {clause:?}")));
            };
            requirements.push(FieldRequirement {
                field: Field::parse(selector, field.trim())?,
                negate,
                value: value.trim().to_string(),
            });
        }
        Ok(Self { requirements })
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, obj: &Resource) -> bool {
        self.requirements.iter().all(|r| {
            let equal = r.field.value(obj) == r.value;
            equal != r.negate
        })
    }
}

impl fmt::Display for FieldSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .requirements
            .iter()
            .map(|r| {
                let op = if r.negate { "!=" } else { "=" };
                format!("{}{op}{}", r.field.as_str(), r.value)
            })
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

/// Namespace scope plus label and field selectors.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Predicate {
    /// `None` selects all namespaces (and cluster-scoped objects).
    pub namespace: Option<String>,
    pub labels: LabelSelector,
    pub fields: FieldSelector,
}

impl Predicate {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Self::default()
        }
    }

    pub fn with_labels(mut self, labels: LabelSelector) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_fields(mut self, fields: FieldSelector) -> Self {
        self.fields = fields;
        self
    }

    pub fn matches(&self, obj: &Resource) -> bool {
        if let Some(ref ns) = self.namespace {
            if obj.namespace() != Some(ns.as_str()) {
                return false;
            }
        }
        self.labels.matches(obj.labels()) && self.fields.matches(obj)
    }
}
