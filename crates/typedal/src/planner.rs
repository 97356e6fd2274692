//! The join planner.
//!
//! Turns a builder's predicate, columns, options and relationships into the
//! select that is executed. Every relationship joined through a condition gets
//! its own alias (`rel_<path>`), so a table can be joined several times and
//! self-joins work. When a page is requested together with joins, the page is
//! cut from a select of distinct owner ids first and the joined select is
//! restricted to those ids afterwards, so fan-out never shrinks a page.

use std::collections::BTreeMap;

use typedal_core::{ColumnRef, Count, Expr, Join, JoinKind, OrderTerm, Select, TableRef};

use crate::config::Config;
use crate::database::Registry;
use crate::entity::Entity;
use crate::error::{Result, TypedalError};
use crate::query_builder::SelectOptions;
use crate::relationship::{JoinMethod, Relationship};

/// How one joined relationship shows up in the rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RelationPlan {
    /// Relationship name on its owner.
    pub key: String,
    /// Dotted path from the base entity.
    pub path: String,
    /// Qualifier of the target's columns.
    pub alias: String,
    /// Real table name of the target.
    pub table_name: String,
    /// Whether a list of rows is attached.
    pub multiple: bool,
    /// Whether the target is a typed entity.
    pub typed: bool,
    /// Relationships joined through this one.
    pub nested: Vec<RelationPlan>,
}

/// What the planner needs from a builder.
pub(crate) struct PlanInput<'a> {
    pub entity: &'a Entity,
    pub predicate: Option<Expr>,
    pub columns: &'a [ColumnRef],
    pub options: &'a SelectOptions,
    pub relationships: &'a BTreeMap<String, Relationship>,
    pub add_id: bool,
}

/// A planned select.
#[derive(Debug, Clone)]
pub(crate) struct Plan {
    base: TableRef,
    columns: Vec<ColumnRef>,
    predicate: Option<Expr>,
    inner: Vec<Join>,
    left: Vec<Join>,
    raw: Vec<Join>,
    relations: Vec<RelationPlan>,
    qualifiers: BTreeMap<String, String>,
    order: Vec<OrderTerm>,
    group_by: Vec<ColumnRef>,
    having: Option<Expr>,
    distinct: bool,
    limit: Option<u64>,
    offset: Option<u64>,
    id_select: Option<Select>,
}

/// Parses an order term: `"name"`, `"-name"` (descending), `"table.name"` or
/// `"<random>"`.
pub(crate) fn parse_order(entity: &Entity, term: &str) -> Result<OrderTerm> {
    if term == "<random>" {
        return Ok(OrderTerm::Random);
    }
    let (descending, column) = match term.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, term),
    };
    let column = parse_column(entity, column)?;
    Ok(if descending {
        OrderTerm::Desc(column)
    } else {
        OrderTerm::Asc(column)
    })
}

/// Parses `"name"` (a column of `entity`) or `"table.name"`.
pub(crate) fn parse_column(entity: &Entity, column: &str) -> Result<ColumnRef> {
    if let Some((table, name)) = column.split_once('.') {
        return Ok(ColumnRef::qualified(table, name));
    }
    if !entity.has_column(column) {
        return Err(TypedalError::InvalidArgument(format!(
            "`{}` has no field `{column}`",
            entity.name()
        )));
    }
    Ok(entity.col(column))
}

fn push_unique(columns: &mut Vec<ColumnRef>, column: ColumnRef) {
    if !columns.contains(&column) {
        columns.push(column);
    }
}

struct Planner<'a> {
    registry: &'a Registry,
    config: &'a Config,
    base: String,
    requested: Vec<ColumnRef>,
    columns: Vec<ColumnRef>,
    inner: Vec<Join>,
    left: Vec<Join>,
    qualifiers: BTreeMap<String, String>,
    aliases: BTreeMap<String, String>,
}

impl Planner<'_> {
    fn relation(
        &mut self,
        owner: &TableRef,
        parent: &str,
        name: &str,
        relationship: &Relationship,
        under_left: bool,
    ) -> Result<RelationPlan> {
        let path = if parent.is_empty() {
            String::from(name)
        } else {
            format!("{parent}.{name}")
        };
        let target_name = relationship.target();
        let registered = self.registry.get(target_name).ok_or_else(|| {
            TypedalError::Environment(format!(
                "relationship `{path}` targets `{target_name}`, which is not defined"
            ))
        })?;

        let method = if under_left {
            JoinMethod::Left
        } else {
            relationship.resolved_join(self.config)
        };

        let target = if let Some(on) = relationship.on() {
            let target = TableRef::new(target_name);
            for (table, condition) in on(owner, &target) {
                self.left.push(Join {
                    kind: JoinKind::Left,
                    table,
                    on: condition,
                });
            }
            target
        } else {
            let alias = format!("rel_{}", path.replace('.', "__"));
            let target = TableRef::new(target_name).with_alias(&alias);
            let condition = relationship.join_condition(owner, &target).ok_or_else(|| {
                TypedalError::InvalidArgument(format!(
                    "relationship `{path}` has neither a condition nor an on clause"
                ))
            })?;
            let join = Join {
                kind: match method {
                    JoinMethod::Inner => JoinKind::Inner,
                    JoinMethod::Left => JoinKind::Left,
                },
                table: target.clone(),
                on: condition,
            };
            match method {
                JoinMethod::Inner => self.inner.push(join),
                JoinMethod::Left => self.left.push(join),
            }
            self.aliases
                .entry(String::from(target_name))
                .or_insert_with(|| alias.clone());
            target
        };
        let qualifier = String::from(target.qualifier());
        self.qualifiers
            .insert(qualifier.clone(), String::from(target_name));

        // columns the caller asked for on this target, or all of them
        let self_join = target_name == self.base;
        let wanted: Vec<ColumnRef> = self
            .requested
            .iter()
            .filter(|c| !self_join && c.table == target_name)
            .map(|c| c.with_table(&qualifier))
            .collect();
        if wanted.is_empty() {
            for column in registered.entity.all_columns(&target) {
                push_unique(&mut self.columns, column);
            }
        } else {
            push_unique(&mut self.columns, target.id());
            for column in wanted {
                push_unique(&mut self.columns, column);
            }
        }

        let is_left = matches!(method, JoinMethod::Left) || relationship.on().is_some();
        let mut nested = Vec::new();
        for (nested_name, nested_rel) in relationship.nested() {
            nested.push(self.relation(&target, &path, nested_name, nested_rel, is_left)?);
        }

        Ok(RelationPlan {
            key: String::from(name),
            path,
            alias: qualifier,
            table_name: String::from(target_name),
            multiple: relationship.is_multiple(),
            typed: registered.typed,
            nested,
        })
    }

    /// Points a column qualified with a joined table at that table's alias.
    fn realias(&self, column: &ColumnRef) -> ColumnRef {
        if column.table.is_empty() {
            return column.with_table(&self.base);
        }
        match self.aliases.get(&column.table) {
            Some(alias) if column.table != self.base => column.with_table(alias),
            _ => column.clone(),
        }
    }
}

impl Plan {
    /// Plans a select.
    pub(crate) fn new(registry: &Registry, config: &Config, input: PlanInput<'_>) -> Result<Self> {
        let entity = input.entity;
        let base = entity.table_ref();
        let options = input.options;

        let requested: Vec<ColumnRef> = input
            .columns
            .iter()
            .map(|c| {
                if c.table.is_empty() {
                    c.with_table(entity.name())
                } else {
                    c.clone()
                }
            })
            .collect();

        let mut planner = Planner {
            registry,
            config,
            base: String::from(entity.name()),
            requested,
            columns: Vec::new(),
            inner: Vec::new(),
            left: Vec::new(),
            qualifiers: BTreeMap::new(),
            aliases: BTreeMap::new(),
        };
        planner
            .qualifiers
            .insert(String::from(entity.name()), String::from(entity.name()));

        let mut relations = Vec::new();
        for (name, relationship) in input.relationships {
            relations.push(planner.relation(&base, "", name, relationship, false)?);
        }

        // own columns go first; joined targets' columns were collected above
        let joined: Vec<&str> = planner.qualifiers.values().map(String::as_str).collect();
        let mut columns: Vec<ColumnRef> = planner
            .requested
            .iter()
            .filter(|c| c.table == entity.name() || !joined.contains(&c.table.as_str()))
            .cloned()
            .collect();
        if columns.is_empty() {
            columns = entity.all_columns(&base);
        }
        if input.add_id && !columns.contains(&base.id()) {
            columns.insert(0, base.id());
        }
        for column in std::mem::take(&mut planner.columns) {
            push_unique(&mut columns, column);
        }

        let order = options
            .orderby
            .iter()
            .flatten()
            .map(|term| parse_order(entity, term))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .map(|term| term.map_column(|c| planner.realias(c)))
            .collect::<Vec<_>>();
        let group_by = options
            .groupby
            .iter()
            .flatten()
            .map(|column| parse_column(entity, column).map(|c| planner.realias(&c)))
            .collect::<Result<Vec<_>>>()?;

        let raw = options
            .join
            .iter()
            .flatten()
            .map(|(table, on)| Join {
                kind: JoinKind::Inner,
                table: table.clone(),
                on: on.clone(),
            })
            .chain(options.left.iter().flatten().map(|(table, on)| Join {
                kind: JoinKind::Left,
                table: table.clone(),
                on: on.clone(),
            }))
            .collect();

        let orderby_on_limitby = options.orderby_on_limitby.unwrap_or(true);
        let (limit, offset) = match options.limitby {
            Some((start, stop)) => (Some(stop.saturating_sub(start)), Some(start)),
            None => (None, None),
        };

        let mut plan = Self {
            base: base.clone(),
            columns,
            predicate: input.predicate,
            inner: planner.inner,
            left: planner.left,
            raw,
            relations,
            qualifiers: planner.qualifiers,
            order,
            group_by,
            having: options.having.clone(),
            distinct: options.distinct.unwrap_or(false),
            limit,
            offset,
            id_select: None,
        };

        if limit.is_some() && plan.order.is_empty() && orderby_on_limitby {
            plan.order.push(OrderTerm::Asc(base.id()));
        }

        if limit.is_some() && !plan.relations.is_empty() {
            let allowed: Vec<&str> = std::iter::once(base.qualifier())
                .chain(plan.inner.iter().map(|j| j.table.qualifier()))
                .collect();
            let mut id_order: Vec<OrderTerm> = plan
                .order
                .iter()
                .filter(|term| {
                    term.column()
                        .map_or(true, |c| allowed.contains(&c.table.as_str()))
                })
                .cloned()
                .collect();
            if id_order.is_empty() && orderby_on_limitby {
                id_order.push(OrderTerm::Asc(base.id()));
            }
            plan.id_select = Some(
                plan.joined(Select::from(base.clone()), &plan.inner)
                    .columns(vec![base.id()])
                    .distinct(true)
                    .where_clause(plan.predicate.clone())
                    .order_by(id_order)
                    .limit(limit)
                    .offset(offset),
            );
        }

        Ok(plan)
    }

    fn joined(&self, select: Select, joins: &[Join]) -> Select {
        joins.iter().fold(select, |select, join| {
            select.join(join.kind, join.table.clone(), join.on.clone())
        })
    }

    fn all_joins(&self) -> Vec<Join> {
        self.inner
            .iter()
            .chain(&self.left)
            .chain(&self.raw)
            .cloned()
            .collect()
    }

    fn select_where(&self, predicate: Option<Expr>, paged: bool) -> Select {
        let select = self
            .joined(Select::from(self.base.clone()), &self.all_joins())
            .columns(self.columns.clone())
            .distinct(self.distinct)
            .where_clause(predicate)
            .group_by(self.group_by.clone())
            .having(self.having.clone())
            .order_by(self.order.clone());
        if paged {
            select.limit(self.limit).offset(self.offset)
        } else {
            select
        }
    }

    /// Returns the owner-id select to run before the joined select, if the
    /// page has to be cut from distinct owners.
    pub(crate) const fn id_select(&self) -> Option<&Select> {
        self.id_select.as_ref()
    }

    /// Returns the select to execute, restricted to `ids` when the id select
    /// ran.
    pub(crate) fn finish(&self, ids: Option<&[i64]>) -> Select {
        match ids {
            Some(ids) => {
                let restricted = self.base.id().belongs(ids.iter().copied());
                self.select_where(Some(restricted), false)
            }
            None => self.select_where(self.predicate.clone(), self.id_select.is_none()),
        }
    }

    /// Returns the whole plan as one statement, with the id select inlined as
    /// a subquery.
    pub(crate) fn to_select(&self) -> Select {
        match &self.id_select {
            Some(ids) => {
                let (sql, params) = ids.build();
                let restricted =
                    Expr::Raw(format!("{} IN ({sql})", self.base.id().to_sql()), params);
                self.select_where(Some(restricted), false)
            }
            None => self.select_where(self.predicate.clone(), true),
        }
    }

    /// Returns the distinct owner ids matching the predicate and the inner
    /// joins, ignoring any window.
    pub(crate) fn scope_select(&self) -> Select {
        self.joined(Select::from(self.base.clone()), &self.inner)
            .columns(vec![self.base.id()])
            .distinct(true)
            .where_clause(self.predicate.clone())
    }

    /// Returns a `COUNT` select over the predicate and the inner joins.
    ///
    /// Left joins never change which owners match, so they stay out.
    pub(crate) fn count_select(&self, distinct: bool) -> Select {
        let count = if distinct {
            Count::Distinct(vec![self.base.id()])
        } else {
            Count::All
        };
        self.joined(Select::from(self.base.clone()), &self.inner)
            .count(count)
            .where_clause(self.predicate.clone())
    }

    /// Returns the joined relationships.
    pub(crate) fn relations(&self) -> &[RelationPlan] {
        &self.relations
    }

    /// Maps every qualifier used in the select to its real table.
    pub(crate) const fn qualifiers(&self) -> &BTreeMap<String, String> {
        &self.qualifiers
    }

    /// Returns the dotted paths of every joined relationship.
    pub(crate) fn paths(&self) -> Vec<String> {
        fn walk(plans: &[RelationPlan], out: &mut Vec<String>) {
            for plan in plans {
                out.push(plan.path.clone());
                walk(&plan.nested, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.relations, &mut out);
        out
    }
}
