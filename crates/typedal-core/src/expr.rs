//! Boolean and value expressions.
//!
//! Expressions are kept as a tree until they are rendered so that column
//! qualifiers can still be rewritten, which the join planner needs when a
//! relationship is joined under an alias.

use super::value::{SqlValue, ToSqlValue};

/// Quotes an identifier with double quotes.
#[must_use]
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Escapes the LIKE wildcards in `text` for use with `ESCAPE '\'`.
fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// A column reference, optionally qualified by a table name or alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnRef {
    /// Table name or alias; empty when unqualified.
    pub table: String,
    /// Column name.
    pub name: String,
}

/// Creates an unqualified column reference.
#[must_use]
pub fn col(name: &str) -> ColumnRef {
    ColumnRef {
        table: String::new(),
        name: String::from(name),
    }
}

#[allow(clippy::should_implement_trait)]
impl ColumnRef {
    /// Creates a qualified column reference.
    #[must_use]
    pub fn qualified(table: &str, name: &str) -> Self {
        Self {
            table: String::from(table),
            name: String::from(name),
        }
    }

    /// Returns the SQL representation.
    #[must_use]
    pub fn to_sql(&self) -> String {
        if self.table.is_empty() {
            quote_ident(&self.name)
        } else {
            format!("{}.{}", quote_ident(&self.table), quote_ident(&self.name))
        }
    }

    /// Returns the `table.column` label used to key result columns.
    #[must_use]
    pub fn label(&self) -> String {
        if self.table.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.table, self.name)
        }
    }

    /// Returns the same column under a different qualifier.
    #[must_use]
    pub fn with_table(&self, table: &str) -> Self {
        Self::qualified(table, &self.name)
    }

    /// Creates an equality expression.
    #[must_use]
    pub fn eq(&self, other: impl IntoExpr) -> Expr {
        Expr::binary(self.into_expr(), BinaryOp::Eq, other.into_expr())
    }

    /// Creates an inequality expression.
    #[must_use]
    pub fn ne(&self, other: impl IntoExpr) -> Expr {
        Expr::binary(self.into_expr(), BinaryOp::Ne, other.into_expr())
    }

    /// Creates a less-than expression.
    #[must_use]
    pub fn lt(&self, other: impl IntoExpr) -> Expr {
        Expr::binary(self.into_expr(), BinaryOp::Lt, other.into_expr())
    }

    /// Creates a less-than-or-equal expression.
    #[must_use]
    pub fn le(&self, other: impl IntoExpr) -> Expr {
        Expr::binary(self.into_expr(), BinaryOp::Le, other.into_expr())
    }

    /// Creates a greater-than expression.
    #[must_use]
    pub fn gt(&self, other: impl IntoExpr) -> Expr {
        Expr::binary(self.into_expr(), BinaryOp::Gt, other.into_expr())
    }

    /// Creates a greater-than-or-equal expression.
    #[must_use]
    pub fn ge(&self, other: impl IntoExpr) -> Expr {
        Expr::binary(self.into_expr(), BinaryOp::Ge, other.into_expr())
    }

    /// Creates an IS NULL expression.
    #[must_use]
    pub fn is_null(&self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self.into_expr()),
            negated: false,
        }
    }

    /// Creates an IS NOT NULL expression.
    #[must_use]
    pub fn is_not_null(&self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self.into_expr()),
            negated: true,
        }
    }

    /// Creates a LIKE expression.
    #[must_use]
    pub fn like<T: ToSqlValue>(&self, pattern: T) -> Expr {
        Expr::Like {
            expr: Box::new(self.into_expr()),
            pattern: Box::new(Expr::Value(pattern.to_sql_value())),
            negated: false,
        }
    }

    /// Creates a NOT LIKE expression.
    #[must_use]
    pub fn not_like<T: ToSqlValue>(&self, pattern: T) -> Expr {
        Expr::Like {
            expr: Box::new(self.into_expr()),
            pattern: Box::new(Expr::Value(pattern.to_sql_value())),
            negated: true,
        }
    }

    /// Creates an IN expression (`belongs` in query terms).
    #[must_use]
    pub fn belongs<I, T>(&self, values: I) -> Expr
    where
        I: IntoIterator<Item = T>,
        T: ToSqlValue,
    {
        Expr::InList {
            expr: Box::new(self.into_expr()),
            values: values.into_iter().map(ToSqlValue::to_sql_value).collect(),
            negated: false,
        }
    }

    /// Creates a NOT IN expression.
    #[must_use]
    pub fn not_belongs<I, T>(&self, values: I) -> Expr
    where
        I: IntoIterator<Item = T>,
        T: ToSqlValue,
    {
        Expr::InList {
            expr: Box::new(self.into_expr()),
            values: values.into_iter().map(ToSqlValue::to_sql_value).collect(),
            negated: true,
        }
    }

    /// Tests whether a `|a|b|` encoded list column contains an item.
    ///
    /// The item may be a value or another column.
    #[must_use]
    pub fn contains(&self, item: impl IntoExpr) -> Expr {
        Expr::Contains {
            list: Box::new(self.into_expr()),
            item: Box::new(item.into_expr()),
        }
    }
}

/// Binary comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl BinaryOp {
    /// Returns the SQL operator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// An SQL expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A column reference.
    Column(ColumnRef),
    /// A bound parameter.
    Value(SqlValue),
    /// A comparison.
    Binary {
        /// Left operand.
        left: Box<Expr>,
        /// Operator.
        op: BinaryOp,
        /// Right operand.
        right: Box<Expr>,
    },
    /// `IS NULL` / `IS NOT NULL`.
    IsNull {
        /// Operand.
        expr: Box<Expr>,
        /// Whether this is `IS NOT NULL`.
        negated: bool,
    },
    /// `IN (...)` / `NOT IN (...)`.
    InList {
        /// Operand.
        expr: Box<Expr>,
        /// Candidate values.
        values: Vec<SqlValue>,
        /// Whether this is `NOT IN`.
        negated: bool,
    },
    /// `LIKE` / `NOT LIKE`.
    Like {
        /// Operand.
        expr: Box<Expr>,
        /// Pattern.
        pattern: Box<Expr>,
        /// Whether this is `NOT LIKE`.
        negated: bool,
    },
    /// Membership test on a `|a|b|` encoded list column.
    Contains {
        /// The list column.
        list: Box<Expr>,
        /// The item looked up.
        item: Box<Expr>,
    },
    /// Conjunction.
    And(Box<Expr>, Box<Expr>),
    /// Disjunction.
    Or(Box<Expr>, Box<Expr>),
    /// Negation.
    Not(Box<Expr>),
    /// Raw SQL with its parameters.
    ///
    /// **Warning**: Only use this for SQL fragments that don't contain user input.
    Raw(String, Vec<SqlValue>),
}

/// Conversion into an expression operand.
pub trait IntoExpr {
    /// Converts into an [`Expr`].
    fn into_expr(self) -> Expr;
}

impl IntoExpr for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

impl IntoExpr for ColumnRef {
    fn into_expr(self) -> Expr {
        Expr::Column(self)
    }
}

impl IntoExpr for &ColumnRef {
    fn into_expr(self) -> Expr {
        Expr::Column(self.clone())
    }
}

impl<T: ToSqlValue> IntoExpr for T {
    fn into_expr(self) -> Expr {
        Expr::Value(self.to_sql_value())
    }
}

impl Expr {
    fn binary(left: Self, op: BinaryOp, right: Self) -> Self {
        Self::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    /// Creates a raw SQL expression without parameters.
    #[must_use]
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::Raw(sql.into(), Vec::new())
    }

    /// Creates an AND expression.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    /// Creates an OR expression.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    /// Negates the expression with NOT.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// ANDs two optional expressions together.
    #[must_use]
    pub fn and_opt(left: Option<Self>, right: Option<Self>) -> Option<Self> {
        match (left, right) {
            (Some(l), Some(r)) => Some(l.and(r)),
            (l, r) => l.or(r),
        }
    }

    /// Folds expressions with OR; `None` when empty.
    #[must_use]
    pub fn any<I: IntoIterator<Item = Self>>(exprs: I) -> Option<Self> {
        exprs.into_iter().reduce(Self::or)
    }

    /// Folds expressions with AND; `None` when empty.
    #[must_use]
    pub fn all<I: IntoIterator<Item = Self>>(exprs: I) -> Option<Self> {
        exprs.into_iter().reduce(Self::and)
    }

    /// Returns a copy with every column reference passed through `f`.
    #[must_use]
    pub fn map_columns<F>(&self, f: &F) -> Self
    where
        F: Fn(&ColumnRef) -> ColumnRef,
    {
        let boxed = |e: &Self| Box::new(e.map_columns(f));
        match self {
            Self::Column(c) => Self::Column(f(c)),
            Self::Value(_) | Self::Raw(..) => self.clone(),
            Self::Binary { left, op, right } => Self::Binary {
                left: boxed(left),
                op: *op,
                right: boxed(right),
            },
            Self::IsNull { expr, negated } => Self::IsNull {
                expr: boxed(expr),
                negated: *negated,
            },
            Self::InList {
                expr,
                values,
                negated,
            } => Self::InList {
                expr: boxed(expr),
                values: values.clone(),
                negated: *negated,
            },
            Self::Like {
                expr,
                pattern,
                negated,
            } => Self::Like {
                expr: boxed(expr),
                pattern: boxed(pattern),
                negated: *negated,
            },
            Self::Contains { list, item } => Self::Contains {
                list: boxed(list),
                item: boxed(item),
            },
            Self::And(l, r) => Self::And(boxed(l), boxed(r)),
            Self::Or(l, r) => Self::Or(boxed(l), boxed(r)),
            Self::Not(e) => Self::Not(boxed(e)),
        }
    }

    /// Renames a table qualifier everywhere in the expression.
    #[must_use]
    pub fn requalify(&self, from: &str, to: &str) -> Self {
        self.map_columns(&|c| {
            if c.table == from {
                c.with_table(to)
            } else {
                c.clone()
            }
        })
    }

    /// Collects the columns referenced by the expression.
    #[must_use]
    pub fn columns(&self) -> Vec<ColumnRef> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut Vec<ColumnRef>) {
        match self {
            Self::Column(c) => out.push(c.clone()),
            Self::Value(_) | Self::Raw(..) => {}
            Self::Binary { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Self::IsNull { expr, .. } | Self::InList { expr, .. } | Self::Not(expr) => {
                expr.collect_columns(out);
            }
            Self::Like { expr, pattern, .. } => {
                expr.collect_columns(out);
                pattern.collect_columns(out);
            }
            Self::Contains { list, item } => {
                list.collect_columns(out);
                item.collect_columns(out);
            }
            Self::And(l, r) | Self::Or(l, r) => {
                l.collect_columns(out);
                r.collect_columns(out);
            }
        }
    }

    fn write(&self, sql: &mut String, params: &mut Vec<SqlValue>) {
        match self {
            Self::Column(c) => sql.push_str(&c.to_sql()),
            Self::Value(v) => {
                sql.push('?');
                params.push(v.clone());
            }
            Self::Binary { left, op, right } => {
                left.write(sql, params);
                sql.push(' ');
                sql.push_str(op.as_str());
                sql.push(' ');
                right.write(sql, params);
            }
            Self::IsNull { expr, negated } => {
                expr.write(sql, params);
                sql.push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Self::InList {
                expr,
                values,
                negated,
            } => {
                if values.is_empty() {
                    // IN () is not valid SQL
                    sql.push_str(if *negated { "1 = 1" } else { "1 = 0" });
                    return;
                }
                expr.write(sql, params);
                sql.push_str(if *negated { " NOT IN (" } else { " IN (" });
                let placeholders: Vec<&str> = values.iter().map(|_| "?").collect();
                sql.push_str(&placeholders.join(", "));
                sql.push(')');
                params.extend(values.iter().cloned());
            }
            Self::Like {
                expr,
                pattern,
                negated,
            } => {
                expr.write(sql, params);
                sql.push_str(if *negated { " NOT LIKE " } else { " LIKE " });
                pattern.write(sql, params);
            }
            Self::Contains { list, item } => {
                list.write(sql, params);
                sql.push_str(" LIKE ");
                match item.as_ref() {
                    Self::Value(v) => {
                        sql.push_str("? ESCAPE '\\'");
                        let needle = match v {
                            SqlValue::Text(s) => escape_like(&s.replace('|', "||")),
                            other => escape_like(&other.to_string()),
                        };
                        params.push(SqlValue::Text(format!("%|{needle}|%")));
                    }
                    other => {
                        sql.push_str("'%|' || ");
                        other.write(sql, params);
                        sql.push_str(" || '|%'");
                    }
                }
            }
            Self::And(l, r) => {
                l.write_operand(sql, params);
                sql.push_str(" AND ");
                r.write_operand(sql, params);
            }
            Self::Or(l, r) => {
                sql.push('(');
                l.write(sql, params);
                sql.push_str(" OR ");
                r.write(sql, params);
                sql.push(')');
            }
            Self::Not(e) => {
                sql.push_str("NOT (");
                e.write(sql, params);
                sql.push(')');
            }
            Self::Raw(raw, raw_params) => {
                sql.push_str(raw);
                params.extend(raw_params.iter().cloned());
            }
        }
    }

    /// Writes an AND operand; raw SQL is grouped since it may hold an OR.
    fn write_operand(&self, sql: &mut String, params: &mut Vec<SqlValue>) {
        if let Self::Raw(..) = self {
            sql.push('(');
            self.write(sql, params);
            sql.push(')');
        } else {
            self.write(sql, params);
        }
    }

    /// Renders the expression into SQL and its parameters.
    #[must_use]
    pub fn build(&self) -> (String, Vec<SqlValue>) {
        let mut sql = String::new();
        let mut params = Vec::new();
        self.write(&mut sql, &mut params);
        (sql, params)
    }
}
