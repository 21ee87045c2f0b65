//! Typed query expressions for table range scans.
//!
//! A [`Filter`] is a tree of comparisons joined with `and`/`or`. Building
//! filters through this type keeps malformed filter strings unrepresentable;
//! [`Filter::to_odata`] renders the textual form only for diagnostics.

use super::entity::TableEntity;
use crate::core::Value;
use std::cmp::Ordering;
use std::fmt;

/// Comparison operators supported by the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::NotEq => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::LtEq => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::GtEq => ordering != Ordering::Less,
        }
    }

    fn keyword(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::NotEq => "ne",
            Self::Lt => "lt",
            Self::LtEq => "le",
            Self::Gt => "gt",
            Self::GtEq => "ge",
        }
    }
}

/// The left-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    PartitionKey,
    RowKey,
    Property(String),
}

impl Field {
    fn name(&self) -> &str {
        match self {
            Self::PartitionKey => "PartitionKey",
            Self::RowKey => "RowKey",
            Self::Property(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Compare {
        field: Field,
        op: CompareOp,
        value: Value,
    },
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
}

impl Filter {
    pub fn compare(field: Field, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            field,
            op,
            value: value.into(),
        }
    }

    pub fn partition_eq(partition_key: impl Into<String>) -> Self {
        Self::compare(Field::PartitionKey, CompareOp::Eq, partition_key.into())
    }

    pub fn row_eq(row_key: impl Into<String>) -> Self {
        Self::compare(Field::RowKey, CompareOp::Eq, row_key.into())
    }

    /// `lower <= PartitionKey < upper`
    pub fn partition_range(lower: impl Into<String>, upper: impl Into<String>) -> Self {
        Self::compare(Field::PartitionKey, CompareOp::GtEq, lower.into()).and(Self::compare(
            Field::PartitionKey,
            CompareOp::Lt,
            upper.into(),
        ))
    }

    /// `lower <= RowKey < upper`
    pub fn row_range(lower: impl Into<String>, upper: impl Into<String>) -> Self {
        Self::compare(Field::RowKey, CompareOp::GtEq, lower.into()).and(Self::compare(
            Field::RowKey,
            CompareOp::Lt,
            upper.into(),
        ))
    }

    /// Point predicate on both keys.
    pub fn point(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self::partition_eq(partition_key).and(Self::row_eq(row_key))
    }

    pub fn property_eq(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(Field::Property(name.into()), CompareOp::Eq, value)
    }

    pub fn and(self, other: Filter) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Filter) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    /// Joins the filters with `or`; `None` when the iterator is empty.
    ///
    /// The store has no `IN (...)` predicate, so membership tests are
    /// expressed as a disjunction of point predicates.
    pub fn any_of<I>(filters: I) -> Option<Self>
    where
        I: IntoIterator<Item = Filter>,
    {
        filters.into_iter().reduce(Filter::or)
    }

    /// Number of leaf comparisons, the unit the store limits filters by.
    pub fn comparison_count(&self) -> usize {
        match self {
            Self::Compare { .. } => 1,
            Self::And(left, right) | Self::Or(left, right) => {
                left.comparison_count() + right.comparison_count()
            }
        }
    }

    pub fn matches(&self, entity: &TableEntity) -> bool {
        match self {
            Self::Compare { field, op, value } => {
                let ordering = match field {
                    Field::PartitionKey => compare_key(&entity.partition_key, value),
                    Field::RowKey => compare_key(&entity.row_key, value),
                    Field::Property(name) => entity
                        .get(name)
                        .and_then(|actual| actual.compare(value)),
                };
                ordering.is_some_and(|ordering| op.holds(ordering))
            }
            Self::And(left, right) => left.matches(entity) && right.matches(entity),
            Self::Or(left, right) => left.matches(entity) || right.matches(entity),
        }
    }

    /// Exact partition key this filter is confined to, if any.
    ///
    /// Used by stores to avoid scanning other partitions.
    pub fn pinned_partition(&self) -> Option<&str> {
        match self {
            Self::Compare {
                field: Field::PartitionKey,
                op: CompareOp::Eq,
                value: Value::Text(pk),
            } => Some(pk),
            Self::Compare { .. } | Self::Or(..) => None,
            Self::And(left, right) => left.pinned_partition().or_else(|| right.pinned_partition()),
        }
    }

    pub fn to_odata(&self) -> String {
        self.to_string()
    }
}

fn compare_key(key: &str, value: &Value) -> Option<Ordering> {
    value.as_str().map(|expected| key.cmp(expected))
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compare { field, op, value } => {
                write!(f, "{} {} {}", field.name(), op.keyword(), value)
            }
            Self::And(left, right) => write!(f, "({}) and ({})", left, right),
            Self::Or(left, right) => write!(f, "({}) or ({})", left, right),
        }
    }
}
