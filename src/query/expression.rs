use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::Value;
use crate::store::Item;

/// Combinator of a filter relative to its siblings on the same field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterType {
    #[default]
    And,
    Or,
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl Comparator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
        }
    }

    pub fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Lt => ordering == Ordering::Less,
            Self::Ge => ordering != Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
        }
    }
}

/// One side of a two-sided range condition: a value placeholder and the
/// comparator applied to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Bound {
    pub comparator: Comparator,
    pub value: String,
}

/// Filter expression tree over placeholders (`#nameN` / `:valN`).
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        name: String,
        comparator: Comparator,
        value: String,
    },
    Range {
        name: String,
        first: Bound,
        second: Bound,
    },
    Contains {
        name: String,
        value: String,
    },
    NotContains {
        name: String,
        value: String,
    },
    BeginsWith {
        name: String,
        value: String,
    },
    In {
        name: String,
        values: Vec<String>,
    },
    /// Parenthesized siblings on one field; the first combinator is unused.
    Group(Vec<(FilterType, Condition)>),
    /// Field groups joined with AND.
    All(Vec<Condition>),
}

impl Condition {
    pub fn render(&self) -> String {
        match self {
            Self::Compare {
                name,
                comparator,
                value,
            } => format!("{} {} {}", name, comparator.symbol(), value),
            Self::Range {
                name,
                first,
                second,
            } => format!(
                "{} {} {} and {} {} {}",
                name,
                first.comparator.symbol(),
                first.value,
                name,
                second.comparator.symbol(),
                second.value
            ),
            Self::Contains { name, value } => format!("contains({}, {})", name, value),
            Self::NotContains { name, value } => format!("not contains({}, {})", name, value),
            Self::BeginsWith { name, value } => format!("begins_with({}, {})", name, value),
            Self::In { name, values } => format!("{} IN ({})", name, values.join(", ")),
            Self::Group(members) => {
                let mut out = String::from("(");
                for (i, (kind, condition)) in members.iter().enumerate() {
                    if i > 0 {
                        out.push_str(&format!(" {} ", kind));
                    }
                    out.push_str(&condition.render());
                }
                out.push(')');
                out
            }
            Self::All(groups) => groups
                .iter()
                .map(Condition::render)
                .collect::<Vec<_>>()
                .join(" AND "),
        }
    }

    fn evaluate(&self, ctx: &EvalContext<'_>) -> bool {
        match self {
            Self::Compare {
                name,
                comparator,
                value,
            } => match (ctx.attribute(name), ctx.value(value)) {
                (Some(actual), Some(expected)) => actual
                    .compare(expected)
                    .map(|ord| comparator.accepts(ord))
                    .unwrap_or(*comparator == Comparator::Ne),
                (None, _) => *comparator == Comparator::Ne,
                _ => false,
            },
            Self::Range {
                name,
                first,
                second,
            } => {
                let Some(actual) = ctx.attribute(name) else {
                    return false;
                };
                [first, second].iter().all(|bound| {
                    ctx.value(&bound.value)
                        .and_then(|expected| actual.compare(expected).ok())
                        .is_some_and(|ord| bound.comparator.accepts(ord))
                })
            }
            Self::Contains { name, value } => match (ctx.attribute(name), ctx.value(value)) {
                (Some(actual), Some(needle)) => actual.contains(needle),
                _ => false,
            },
            Self::NotContains { name, value } => match (ctx.attribute(name), ctx.value(value)) {
                (Some(actual), Some(needle)) => !actual.contains(needle),
                (None, _) => true,
                _ => false,
            },
            Self::BeginsWith { name, value } => match (ctx.attribute(name), ctx.value(value)) {
                (Some(actual), Some(prefix)) => actual.begins_with(prefix),
                _ => false,
            },
            Self::In { name, values } => match ctx.attribute(name) {
                Some(actual) => values
                    .iter()
                    .filter_map(|v| ctx.value(v))
                    .any(|candidate| actual == candidate),
                None => false,
            },
            Self::Group(members) => {
                // AND binds tighter than OR: split into OR-separated AND runs.
                let mut any_run = false;
                let mut run = true;
                for (i, (kind, condition)) in members.iter().enumerate() {
                    if i > 0 && *kind == FilterType::Or {
                        any_run |= run;
                        run = true;
                    }
                    run = run && condition.evaluate(ctx);
                }
                any_run || run
            }
            Self::All(groups) => groups.iter().all(|g| g.evaluate(ctx)),
        }
    }
}

struct EvalContext<'a> {
    item: &'a Item,
    names: &'a BTreeMap<String, String>,
    values: &'a BTreeMap<String, Value>,
}

impl EvalContext<'_> {
    fn attribute(&self, placeholder: &str) -> Option<&Value> {
        self.names
            .get(placeholder)
            .and_then(|field| self.item.get(field))
            .filter(|value| !value.is_null())
    }

    fn value(&self, placeholder: &str) -> Option<&Value> {
        self.values.get(placeholder)
    }
}

/// Compiled filter: expression tree plus its attribute name and value maps.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterExpression {
    pub condition: Condition,
    pub names: BTreeMap<String, String>,
    pub values: BTreeMap<String, Value>,
}

impl FilterExpression {
    pub fn render(&self) -> String {
        self.condition.render()
    }

    pub fn matches(&self, item: &Item) -> bool {
        let ctx = EvalContext {
            item,
            names: &self.names,
            values: &self.values,
        };
        self.condition.evaluate(&ctx)
    }

    /// Join two expressions with AND. Placeholders must not overlap.
    pub fn and(self, other: FilterExpression) -> FilterExpression {
        let mut groups = match self.condition {
            Condition::All(groups) => groups,
            single => vec![single],
        };
        match other.condition {
            Condition::All(more) => groups.extend(more),
            single => groups.push(single),
        }

        let mut names = self.names;
        names.extend(other.names);
        let mut values = self.values;
        values.extend(other.values);

        FilterExpression {
            condition: Condition::All(groups),
            names,
            values,
        }
    }
}

impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Range-key condition evaluated by the store on the index range attribute.
/// `Between` is exclusive on both bounds.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyOperator {
    Eq(Value),
    Gt(Value),
    Lt(Value),
    Ge(Value),
    Le(Value),
    Between(Value, Value),
    BeginsWith(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyCondition {
    pub field: String,
    pub operator: KeyOperator,
}

impl KeyCondition {
    pub fn new(field: impl Into<String>, operator: KeyOperator) -> Self {
        Self {
            field: field.into(),
            operator,
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        let cmp = |other: &Value, comparator: Comparator| {
            value
                .compare(other)
                .map(|ord| comparator.accepts(ord))
                .unwrap_or(false)
        };

        match &self.operator {
            KeyOperator::Eq(v) => cmp(v, Comparator::Eq),
            KeyOperator::Gt(v) => cmp(v, Comparator::Gt),
            KeyOperator::Lt(v) => cmp(v, Comparator::Lt),
            KeyOperator::Ge(v) => cmp(v, Comparator::Ge),
            KeyOperator::Le(v) => cmp(v, Comparator::Le),
            KeyOperator::Between(low, high) => cmp(low, Comparator::Gt) && cmp(high, Comparator::Lt),
            KeyOperator::BeginsWith(prefix) => value.begins_with(prefix),
        }
    }

    pub fn matches_item(&self, item: &Item) -> bool {
        item.get(&self.field).is_some_and(|value| self.matches(value))
    }
}

impl fmt::Display for KeyCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.operator {
            KeyOperator::Eq(v) => write!(f, "{} EQ {}", self.field, v),
            KeyOperator::Gt(v) => write!(f, "{} GT {}", self.field, v),
            KeyOperator::Lt(v) => write!(f, "{} LT {}", self.field, v),
            KeyOperator::Ge(v) => write!(f, "{} GE {}", self.field, v),
            KeyOperator::Le(v) => write!(f, "{} LE {}", self.field, v),
            KeyOperator::Between(low, high) => write!(f, "{} BETWEEN {} AND {}", self.field, low, high),
            KeyOperator::BeginsWith(v) => write!(f, "{} BEGINS_WITH {}", self.field, v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(age: i64, name: &str) -> Item {
        let mut item = Item::new();
        item.insert("age".into(), Value::from(age));
        item.insert("name".into(), Value::from(name));
        item
    }

    fn names() -> BTreeMap<String, String> {
        let mut names = BTreeMap::new();
        names.insert("#name0".to_string(), "age".to_string());
        names.insert("#name1".to_string(), "name".to_string());
        names
    }

    #[test]
    fn test_group_precedence_and_before_or() {
        let mut values = BTreeMap::new();
        values.insert(":val0".to_string(), Value::from(10));
        values.insert(":val1".to_string(), Value::from(20));
        values.insert(":val2".to_string(), Value::from(30));

        // age = 10 OR age > 20 AND age < 30
        let expr = FilterExpression {
            condition: Condition::Group(vec![
                (FilterType::And, Condition::Compare { name: "#name0".into(), comparator: Comparator::Eq, value: ":val0".into() }),
                (FilterType::Or, Condition::Compare { name: "#name0".into(), comparator: Comparator::Gt, value: ":val1".into() }),
                (FilterType::And, Condition::Compare { name: "#name0".into(), comparator: Comparator::Lt, value: ":val2".into() }),
            ]),
            names: names(),
            values,
        };

        assert_eq!(expr.render(), "(#name0 = :val0 OR #name0 > :val1 AND #name0 < :val2)");
        assert!(expr.matches(&item(10, "a")));
        assert!(expr.matches(&item(25, "a")));
        assert!(!expr.matches(&item(35, "a")));
    }

    #[test]
    fn test_in_and_string_functions() {
        let mut values = BTreeMap::new();
        values.insert(":inVal0".to_string(), Value::from("ann"));
        values.insert(":inVal1".to_string(), Value::from("bob"));
        values.insert(":val0".to_string(), Value::from("b"));

        let expr = FilterExpression {
            condition: Condition::All(vec![
                Condition::Group(vec![(FilterType::And, Condition::In { name: "#name1".into(), values: vec![":inVal0".into(), ":inVal1".into()] })]),
                Condition::Group(vec![(FilterType::And, Condition::BeginsWith { name: "#name1".into(), value: ":val0".into() })]),
            ]),
            names: names(),
            values,
        };

        assert_eq!(
            expr.render(),
            "(#name1 IN (:inVal0, :inVal1)) AND (begins_with(#name1, :val0))"
        );
        assert!(expr.matches(&item(1, "bob")));
        assert!(!expr.matches(&item(1, "ann")));
    }

    #[test]
    fn test_key_between_is_exclusive() {
        let cond = KeyCondition::new("age", KeyOperator::Between(Value::from(17), Value::from(66)));
        assert!(!cond.matches(&Value::from(17)));
        assert!(cond.matches(&Value::from(18)));
        assert!(cond.matches(&Value::from(65)));
        assert!(!cond.matches(&Value::from(66)));
        assert_eq!(cond.to_string(), "age BETWEEN 17 AND 66");
    }
}
