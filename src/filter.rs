// Query filtering over indexed record fields

use crate::record::IndexValue;

/// Filter for querying records
#[derive(Debug, Clone)]
pub struct Filter {
    /// Field name to filter on
    pub field: String,
    /// Comparison operator
    pub op: FilterOp,
    /// Value to compare against
    pub value: IndexValue,
}

impl Filter {
    pub fn new(field: &str, op: FilterOp, value: IndexValue) -> Self {
        Self {
            field: field.to_string(),
            op,
            value,
        }
    }

    pub fn eq(field: &str, value: IndexValue) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    pub fn gte(field: &str, value: IndexValue) -> Self {
        Self::new(field, FilterOp::Gte, value)
    }

    pub fn lte(field: &str, value: IndexValue) -> Self {
        Self::new(field, FilterOp::Lte, value)
    }
}

/// Comparison operators for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,  // ==
    Ne,  // !=
    Gt,  // >
    Lt,  // <
    Gte, // >=
    Lte, // <=
}

impl FilterOp {
    pub(crate) fn to_sql(self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Gt => ">",
            FilterOp::Lt => "<",
            FilterOp::Gte => ">=",
            FilterOp::Lte => "<=",
        }
    }
}

impl std::fmt::Display for FilterOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_sql())
    }
}
