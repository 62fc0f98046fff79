//! Composable listing filters and the SELECT builder they apply to.
//!
//! Filters are translated to a parameterized SQL fragment with `?`
//! placeholders; [`rebind_dollar`] turns those into Postgres `$n` markers.
//!
//! # SQL generated
//!
//! ```sql
//! name = ?            -- Eq
//! name <> ?           -- Neq
//! name LIKE ?         -- Like ('%value%')
//! id >= ? / id <= ?   -- Gte / Lte
//! id > ?  / id < ?    -- Gt / Lt
//! ORDER BY age DESC   -- Sort (dropped for count queries)
//! ```
//!
//! # Example
//!
//! ```
//! use user_pipeline::filter::{Filter, SelectQuery, SortOrder, SqlParam};
//!
//! let filters = vec![
//!     Filter::eq("name", "John"),
//!     Filter::sort("age", SortOrder::Desc),
//! ];
//! let (sql, args) = SelectQuery::new("*", "users").apply_filters(&filters, false).to_sql();
//! assert_eq!(sql, "SELECT * FROM users WHERE name = ? ORDER BY age DESC");
//! assert_eq!(args, vec![SqlParam::Text("John".into())]);
//! ```

use tracing::warn;

/// Comparison applied by a condition filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    Neq,
    Like,
    Gte,
    Lte,
    Gt,
    Lt,
}

impl FilterOperator {
    fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Neq => "<>",
            Self::Like => "LIKE",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Lt => "<",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    /// `"DESC"` is descending, anything else ascending.
    pub fn parse(s: &str) -> Self {
        if s == "DESC" {
            Self::Desc
        } else {
            Self::Asc
        }
    }

    fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// SQL parameter value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlParam {
    Int(i64),
    Text(String),
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for SqlParam {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// One listing constraint: a WHERE condition or an ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Condition {
        field: String,
        operator: FilterOperator,
        value: SqlParam,
    },
    Sort {
        field: String,
        order: SortOrder,
    },
}

impl Filter {
    pub fn condition(field: &str, operator: FilterOperator, value: impl Into<SqlParam>) -> Self {
        Self::Condition {
            field: field.to_string(),
            operator,
            value: value.into(),
        }
    }

    pub fn eq(field: &str, value: impl Into<SqlParam>) -> Self {
        Self::condition(field, FilterOperator::Eq, value)
    }

    pub fn like(field: &str, value: &str) -> Self {
        Self::condition(field, FilterOperator::Like, value)
    }

    pub fn gte(field: &str, value: impl Into<SqlParam>) -> Self {
        Self::condition(field, FilterOperator::Gte, value)
    }

    pub fn lte(field: &str, value: impl Into<SqlParam>) -> Self {
        Self::condition(field, FilterOperator::Lte, value)
    }

    pub fn sort(field: &str, order: SortOrder) -> Self {
        Self::Sort {
            field: field.to_string(),
            order,
        }
    }

    pub fn field(&self) -> &str {
        match self {
            Self::Condition { field, .. } | Self::Sort { field, .. } => field,
        }
    }
}

/// Minimal SELECT builder.
#[derive(Debug, Clone)]
pub struct SelectQuery {
    columns: String,
    table: String,
    conditions: Vec<String>,
    order_by: Vec<String>,
    params: Vec<SqlParam>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl SelectQuery {
    pub fn new(columns: &str, table: &str) -> Self {
        Self {
            columns: columns.to_string(),
            table: table.to_string(),
            conditions: Vec::new(),
            order_by: Vec::new(),
            params: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Extend the query with `filters`. Count queries skip sort filters: an
    /// aggregate cannot be ordered by a non-aggregated column.
    ///
    /// Filters whose field is not a plain identifier are dropped.
    pub fn apply_filters(mut self, filters: &[Filter], is_count_query: bool) -> Self {
        for filter in filters {
            if !is_identifier(filter.field()) {
                warn!(field = %filter.field(), "Ignoring filter on invalid field name");
                continue;
            }
            match filter {
                Filter::Condition { field, operator, value } => {
                    let value = match (operator, value) {
                        (FilterOperator::Like, SqlParam::Text(s)) => {
                            SqlParam::Text(format!("%{}%", s))
                        }
                        (FilterOperator::Like, SqlParam::Int(n)) => {
                            SqlParam::Text(format!("%{}%", n))
                        }
                        (_, v) => v.clone(),
                    };
                    self.conditions.push(format!("{} {} ?", field, operator.sql()));
                    self.params.push(value);
                }
                Filter::Sort { field, order } => {
                    if !is_count_query {
                        self.order_by.push(format!("{} {}", field, order.sql()));
                    }
                }
            }
        }
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Render with `?` placeholders, params in placeholder order.
    pub fn to_sql(&self) -> (String, Vec<SqlParam>) {
        let mut sql = format!("SELECT {} FROM {}", self.columns, self.table);
        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conditions.join(" AND "));
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
        (sql, self.params.clone())
    }
}

/// Replace `?` placeholders with `$1, $2, ...`.
pub fn rebind_dollar(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0;
    for c in sql.chars() {
        if c == '?' {
            n += 1;
            out.push('$');
            out.push_str(&n.to_string());
        } else {
            out.push(c);
        }
    }
    out
}

fn is_identifier(field: &str) -> bool {
    !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(filters: &[Filter], count: bool) -> (String, Vec<SqlParam>) {
        SelectQuery::new("*", "users").apply_filters(filters, count).to_sql()
    }

    #[test]
    fn test_equal_filter() {
        let (sql, args) = render(&[Filter::eq("name", "John")], false);
        assert_eq!(sql, "SELECT * FROM users WHERE name = ?");
        assert_eq!(args, vec![SqlParam::Text("John".into())]);
    }

    #[test]
    fn test_like_filter_wraps_value() {
        let (sql, args) = render(&[Filter::like("name", "Doe")], false);
        assert_eq!(sql, "SELECT * FROM users WHERE name LIKE ?");
        assert_eq!(args, vec![SqlParam::Text("%Doe%".into())]);
    }

    #[test]
    fn test_gte_filter() {
        let (sql, args) = render(&[Filter::gte("age", 30)], false);
        assert_eq!(sql, "SELECT * FROM users WHERE age >= ?");
        assert_eq!(args, vec![SqlParam::Int(30)]);
    }

    #[test]
    fn test_remaining_operators() {
        let filters = [
            Filter::condition("a", FilterOperator::Neq, 1),
            Filter::condition("b", FilterOperator::Gt, 2),
            Filter::condition("c", FilterOperator::Lt, 3),
            Filter::lte("d", 4),
        ];
        let (sql, args) = render(&filters, false);
        assert_eq!(sql, "SELECT * FROM users WHERE a <> ? AND b > ? AND c < ? AND d <= ?");
        assert_eq!(args.len(), 4);
    }

    #[test]
    fn test_sorting() {
        let filters = [Filter::eq("name", "John"), Filter::sort("age", SortOrder::Desc)];
        let (sql, args) = render(&filters, false);
        assert_eq!(sql, "SELECT * FROM users WHERE name = ? ORDER BY age DESC");
        assert_eq!(args, vec![SqlParam::Text("John".into())]);
    }

    #[test]
    fn test_count_query_ignores_sorting() {
        let filters = [Filter::gte("age", 30), Filter::sort("age", SortOrder::Asc)];
        let (sql, args) = render(&filters, true);
        assert_eq!(sql, "SELECT * FROM users WHERE age >= ?");
        assert_eq!(args, vec![SqlParam::Int(30)]);
    }

    #[test]
    fn test_limit_offset_and_rebind() {
        let (sql, _) = SelectQuery::new("id", "users")
            .apply_filters(&[Filter::gte("id", 1), Filter::lte("id", 9)], false)
            .limit(10)
            .offset(20)
            .to_sql();
        assert_eq!(sql, "SELECT id FROM users WHERE id >= ? AND id <= ? LIMIT 10 OFFSET 20");
        assert_eq!(
            rebind_dollar(&sql),
            "SELECT id FROM users WHERE id >= $1 AND id <= $2 LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn test_injection_in_field_is_dropped() {
        let filters = [
            Filter::sort("id; DROP TABLE users", SortOrder::Asc),
            Filter::eq("name = name OR 1", "x"),
        ];
        let (sql, args) = render(&filters, false);
        assert_eq!(sql, "SELECT * FROM users");
        assert!(args.is_empty());
    }

    #[test]
    fn test_sort_order_parse() {
        assert_eq!(SortOrder::parse("DESC"), SortOrder::Desc);
        assert_eq!(SortOrder::parse("ASC"), SortOrder::Asc);
        assert_eq!(SortOrder::parse("desc; --"), SortOrder::Asc);
    }
}
