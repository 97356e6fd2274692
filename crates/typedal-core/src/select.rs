//! SELECT statement builder.
//!
//! Every selected column is labelled `qualifier.column` so that rows coming
//! back from a joined select can be split per table (or per alias) again.

use super::expr::{quote_ident, ColumnRef, Expr};
use super::table::TableRef;
use super::value::SqlValue;

/// Kind of join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// `INNER JOIN`
    Inner,
    /// `LEFT JOIN`
    Left,
}

/// A join clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// Join kind.
    pub kind: JoinKind,
    /// Joined table, possibly aliased.
    pub table: TableRef,
    /// Join condition.
    pub on: Expr,
}

/// An ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderTerm {
    /// Ascending on a column.
    Asc(ColumnRef),
    /// Descending on a column.
    Desc(ColumnRef),
    /// Random order.
    Random,
}

impl OrderTerm {
    fn to_sql(&self) -> String {
        match self {
            Self::Asc(c) => format!("{} ASC", c.to_sql()),
            Self::Desc(c) => format!("{} DESC", c.to_sql()),
            Self::Random => String::from("RANDOM()"),
        }
    }

    /// Returns the ordered column, if any.
    #[must_use]
    pub const fn column(&self) -> Option<&ColumnRef> {
        match self {
            Self::Asc(c) | Self::Desc(c) => Some(c),
            Self::Random => None,
        }
    }

    /// Applies `f` to the ordered column.
    #[must_use]
    pub fn map_column<F: Fn(&ColumnRef) -> ColumnRef>(&self, f: F) -> Self {
        match self {
            Self::Asc(c) => Self::Asc(f(c)),
            Self::Desc(c) => Self::Desc(f(c)),
            Self::Random => Self::Random,
        }
    }
}

/// What a COUNT select counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Count {
    /// `COUNT(*)`
    All,
    /// `COUNT(DISTINCT ...)` over the given columns.
    Distinct(Vec<ColumnRef>),
}

/// A SELECT statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    distinct: bool,
    columns: Vec<ColumnRef>,
    count: Option<Count>,
    from: TableRef,
    joins: Vec<Join>,
    where_clause: Option<Expr>,
    group_by: Vec<ColumnRef>,
    having: Option<Expr>,
    order_by: Vec<OrderTerm>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Select {
    /// Creates a SELECT from a table.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn from(table: TableRef) -> Self {
        Self {
            distinct: false,
            columns: vec![],
            count: None,
            from: table,
            joins: vec![],
            where_clause: None,
            group_by: vec![],
            having: None,
            order_by: vec![],
            limit: None,
            offset: None,
        }
    }

    /// Specifies the columns to select.
    #[must_use]
    pub fn columns(mut self, cols: Vec<ColumnRef>) -> Self {
        self.columns = cols;
        self
    }

    /// Turns the statement into a COUNT.
    #[must_use]
    pub fn count(mut self, count: Count) -> Self {
        self.count = Some(count);
        self
    }

    /// Sets DISTINCT.
    #[must_use]
    pub const fn distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    /// Adds a join clause.
    #[must_use]
    pub fn join(mut self, kind: JoinKind, table: TableRef, on: Expr) -> Self {
        self.joins.push(Join { kind, table, on });
        self
    }

    /// Adds an INNER JOIN.
    #[must_use]
    pub fn inner_join(self, table: TableRef, on: Expr) -> Self {
        self.join(JoinKind::Inner, table, on)
    }

    /// Adds a LEFT JOIN.
    #[must_use]
    pub fn left_join(self, table: TableRef, on: Expr) -> Self {
        self.join(JoinKind::Left, table, on)
    }

    /// Sets the WHERE clause.
    #[must_use]
    pub fn where_clause(mut self, expr: Option<Expr>) -> Self {
        self.where_clause = expr;
        self
    }

    /// Sets the GROUP BY columns.
    #[must_use]
    pub fn group_by(mut self, cols: Vec<ColumnRef>) -> Self {
        self.group_by = cols;
        self
    }

    /// Sets the HAVING clause.
    #[must_use]
    pub fn having(mut self, expr: Option<Expr>) -> Self {
        self.having = expr;
        self
    }

    /// Sets the ORDER BY terms.
    #[must_use]
    pub fn order_by(mut self, terms: Vec<OrderTerm>) -> Self {
        self.order_by = terms;
        self
    }

    /// Sets LIMIT.
    #[must_use]
    pub const fn limit(mut self, n: Option<u64>) -> Self {
        self.limit = n;
        self
    }

    /// Sets OFFSET.
    #[must_use]
    pub const fn offset(mut self, n: Option<u64>) -> Self {
        self.offset = n;
        self
    }

    /// Returns the selected columns.
    #[must_use]
    pub fn selected(&self) -> &[ColumnRef] {
        &self.columns
    }

    /// Returns the join clauses in insertion order.
    #[must_use]
    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    /// Returns the WHERE clause.
    #[must_use]
    pub const fn predicate(&self) -> Option<&Expr> {
        self.where_clause.as_ref()
    }

    /// Builds the SQL string and parameters.
    ///
    /// Inner joins are emitted before left joins.
    #[must_use]
    pub fn build(&self) -> (String, Vec<SqlValue>) {
        let mut sql = String::from("SELECT ");
        let mut params = vec![];

        if self.distinct && self.count.is_none() {
            sql.push_str("DISTINCT ");
        }

        match &self.count {
            Some(Count::All) => sql.push_str("COUNT(*) AS \"count\""),
            Some(Count::Distinct(cols)) => {
                let cols: Vec<String> = cols.iter().map(ColumnRef::to_sql).collect();
                sql.push_str(&format!("COUNT(DISTINCT {}) AS \"count\"", cols.join(", ")));
            }
            None if self.columns.is_empty() => sql.push('*'),
            None => {
                let cols: Vec<String> = self
                    .columns
                    .iter()
                    .map(|c| format!("{} AS {}", c.to_sql(), quote_ident(&c.label())))
                    .collect();
                sql.push_str(&cols.join(", "));
            }
        }

        sql.push_str(" FROM ");
        sql.push_str(&self.from.to_sql());

        let inner = self.joins.iter().filter(|j| j.kind == JoinKind::Inner);
        let left = self.joins.iter().filter(|j| j.kind == JoinKind::Left);
        for join in inner.chain(left) {
            let keyword = match join.kind {
                JoinKind::Inner => "INNER JOIN",
                JoinKind::Left => "LEFT JOIN",
            };
            let (on_sql, on_params) = join.on.build();
            sql.push_str(&format!(" {keyword} {} ON {on_sql}", join.table.to_sql()));
            params.extend(on_params);
        }

        if let Some(ref expr) = self.where_clause {
            let (where_sql, where_params) = expr.build();
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
            params.extend(where_params);
        }

        if !self.group_by.is_empty() {
            let cols: Vec<String> = self.group_by.iter().map(ColumnRef::to_sql).collect();
            sql.push_str(" GROUP BY ");
            sql.push_str(&cols.join(", "));
        }

        if let Some(ref expr) = self.having {
            let (having_sql, having_params) = expr.build();
            sql.push_str(" HAVING ");
            sql.push_str(&having_sql);
            params.extend(having_params);
        }

        if !self.order_by.is_empty() {
            let terms: Vec<String> = self.order_by.iter().map(OrderTerm::to_sql).collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        // SQLite integers stop at i64::MAX
        let clamp = |n: u64| n.min(i64::MAX.unsigned_abs());
        match (self.limit.map(clamp), self.offset.map(clamp)) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            // SQLite requires a LIMIT before OFFSET
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }

        (sql, params)
    }
}
