//! Instances, result sets and the row assembler.
//!
//! A joined select returns one flat row per combination of owner and related
//! rows. The assembler folds those rows back into one [`Instance`] per owner
//! id, attaching related records under the relationship names.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;
use typedal_core::{FromSqlValue, SqlValue};

use crate::cache::CacheMetadata;
use crate::error::{Result, TypedalError};
use crate::planner::RelationPlan;

/// One row as returned by the substrate, keyed by `qualifier.column` labels.
pub type FlatRow = BTreeMap<String, SqlValue>;

/// Column values of one row, keyed by column name.
pub type RawRecord = BTreeMap<String, SqlValue>;

/// A row of a defined entity, with the relationships that were joined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    table: String,
    values: RawRecord,
    relations: BTreeMap<String, Related>,
}

/// The data attached under one relationship name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Related {
    /// A single related record, or none.
    One(Option<Box<Record>>),
    /// Zero or more related records.
    Many(Vec<Record>),
}

/// A related record: typed when the target is a defined entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    /// A row of a defined entity.
    Typed(Instance),
    /// A row of a table only known by name.
    Raw(RawRecord),
}

fn read<T: FromSqlValue>(values: &RawRecord, table: &str, column: &str) -> Result<T> {
    let value = values.get(column).ok_or_else(|| {
        TypedalError::Decode(format!("`{table}` row has no column `{column}`"))
    })?;
    T::from_sql_value(value)
        .map_err(|e| TypedalError::Decode(format!("`{table}.{column}`: {e}")))
}

impl Instance {
    /// Creates an instance from column values.
    #[must_use]
    pub fn new(table: &str, values: RawRecord) -> Self {
        Self {
            table: String::from(table),
            values,
            relations: BTreeMap::new(),
        }
    }

    /// Returns the table this row belongs to.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the primary key, if it was selected.
    #[must_use]
    pub fn id(&self) -> Option<i64> {
        self.values.get("id").and_then(SqlValue::as_i64)
    }

    /// Reads a column as `T`.
    ///
    /// # Errors
    ///
    /// Fails when the column was not selected or has another type.
    pub fn get<T: FromSqlValue>(&self, column: &str) -> Result<T> {
        read(&self.values, &self.table, column)
    }

    /// Returns a column's raw value.
    #[must_use]
    pub fn value(&self, column: &str) -> Option<&SqlValue> {
        self.values.get(column)
    }

    /// Returns all column values.
    #[must_use]
    pub const fn values(&self) -> &RawRecord {
        &self.values
    }

    /// Returns the data joined under `name`.
    #[must_use]
    pub fn related(&self, name: &str) -> Option<&Related> {
        self.relations.get(name)
    }

    /// Returns the single record joined under `name`.
    #[must_use]
    pub fn one(&self, name: &str) -> Option<&Record> {
        match self.relations.get(name) {
            Some(Related::One(Some(record))) => Some(record),
            _ => None,
        }
    }

    /// Returns the records joined under `name`; empty when nothing was joined.
    #[must_use]
    pub fn many(&self, name: &str) -> &[Record] {
        match self.relations.get(name) {
            Some(Related::Many(records)) => records,
            _ => &[],
        }
    }

    /// Returns all joined relationship data.
    #[must_use]
    pub const fn relations(&self) -> &BTreeMap<String, Related> {
        &self.relations
    }

    fn init_slots(&mut self, plans: &[RelationPlan]) {
        for plan in plans {
            let empty = if plan.multiple {
                Related::Many(Vec::new())
            } else {
                Related::One(None)
            };
            self.relations.entry(plan.key.clone()).or_insert(empty);
        }
    }
}

impl Record {
    /// Returns the primary key, if it was selected.
    #[must_use]
    pub fn id(&self) -> Option<i64> {
        match self {
            Self::Typed(instance) => instance.id(),
            Self::Raw(values) => values.get("id").and_then(SqlValue::as_i64),
        }
    }

    /// Reads a column as `T`.
    ///
    /// # Errors
    ///
    /// Fails when the column was not selected or has another type.
    pub fn get<T: FromSqlValue>(&self, column: &str) -> Result<T> {
        match self {
            Self::Typed(instance) => instance.get(column),
            Self::Raw(values) => read(values, "raw", column),
        }
    }

    /// Returns the typed instance, if the target was a defined entity.
    #[must_use]
    pub const fn as_instance(&self) -> Option<&Instance> {
        match self {
            Self::Typed(instance) => Some(instance),
            Self::Raw(_) => None,
        }
    }

    fn as_instance_mut(&mut self) -> Option<&mut Instance> {
        match self {
            Self::Typed(instance) => Some(instance),
            Self::Raw(_) => None,
        }
    }
}

/// Pagination state recorded in a result's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationMeta {
    /// Rows per page.
    pub limit: u64,
    /// 1-based page number.
    pub current_page: u64,
    /// Number of pages; 1 when there is no limit.
    pub max_page: u64,
    /// Total number of matching rows.
    pub rows: i64,
    /// `(from, to)` row window of this page.
    pub min_max: (u64, u64),
}

/// What ran to produce a result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// The predicate before planning, rendered.
    pub query: Option<String>,
    /// The select that was executed.
    pub final_query: Option<String>,
    /// Its parameters.
    pub final_args: Vec<SqlValue>,
    /// Joined relationship paths.
    pub relationships: Vec<String>,
    /// Owner ids selected by the pagination pre-query, if one ran.
    pub ids: Option<Vec<i64>>,
    /// Pagination state for paginated results.
    pub pagination: Option<PaginationMeta>,
    /// Cache state for cacheable queries.
    pub cache: Option<CacheMetadata>,
}

/// Instances in the order their owners first appeared, indexed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    records: Vec<Instance>,
    rows: Vec<Vec<FlatRow>>,
    index: BTreeMap<i64, usize>,
    metadata: Metadata,
}

impl ResultSet {
    /// Returns the number of instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns whether there are no instances.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the instance with primary key `id`.
    #[must_use]
    pub fn get(&self, id: i64) -> Option<&Instance> {
        self.index.get(&id).map(|&i| &self.records[i])
    }

    /// Returns the first instance.
    #[must_use]
    pub fn first(&self) -> Option<&Instance> {
        self.records.first()
    }

    /// Returns the last instance.
    #[must_use]
    pub fn last(&self) -> Option<&Instance> {
        self.records.last()
    }

    /// Iterates over the instances.
    pub fn iter(&self) -> std::slice::Iter<'_, Instance> {
        self.records.iter()
    }

    /// Returns the primary keys in order.
    #[must_use]
    pub fn ids(&self) -> Vec<i64> {
        self.records.iter().filter_map(Instance::id).collect()
    }

    /// Returns the flat rows that produced the instance with id `id`.
    #[must_use]
    pub fn raw_rows(&self, id: i64) -> Option<&[FlatRow]> {
        self.index.get(&id).map(|&i| self.rows[i].as_slice())
    }

    /// Returns every flat row, in the order they were received per owner.
    pub fn all_rows(&self) -> impl Iterator<Item = &FlatRow> {
        self.rows.iter().flatten()
    }

    /// Returns the metadata.
    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub(crate) fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Consumes the set into its instances.
    #[must_use]
    pub fn into_vec(self) -> Vec<Instance> {
        self.records
    }

    /// Returns the table of the instances, or `None` for an empty set.
    #[must_use]
    pub fn table(&self) -> Option<&str> {
        self.records.first().map(Instance::table)
    }

    /// Returns a new set with the instances matching `f`.
    ///
    /// With `limitby = Some((start, stop))` only the matches numbered
    /// `start..stop` are kept.
    #[must_use]
    pub fn find<F>(&self, mut f: F, limitby: Option<(usize, usize)>) -> Self
    where
        F: FnMut(&Instance) -> bool,
    {
        let (start, stop) = limitby.unwrap_or((0, self.records.len()));
        let slots: Vec<usize> = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, instance)| f(*instance))
            .map(|(slot, _)| slot)
            .take(stop)
            .skip(start)
            .collect();
        Self::from_parts(
            slots
                .iter()
                .map(|&slot| (self.records[slot].clone(), self.rows[slot].clone()))
                .collect(),
            self.metadata.clone(),
        )
    }

    /// Removes the instances matching `f` and returns them as a new set.
    pub fn exclude<F>(&mut self, mut f: F) -> Self
    where
        F: FnMut(&Instance) -> bool,
    {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.records)
            .into_iter()
            .zip(std::mem::take(&mut self.rows))
            .partition(|(instance, _)| f(instance));
        let metadata = self.metadata.clone();
        *self = Self::from_parts(kept, std::mem::take(&mut self.metadata));
        Self::from_parts(removed, metadata)
    }

    /// Returns the instances ordered by `key`; the set itself is unchanged.
    #[must_use]
    pub fn sorted_by_key<K, F>(&self, key: F) -> Vec<&Instance>
    where
        K: Ord,
        F: FnMut(&&Instance) -> K,
    {
        let mut sorted: Vec<&Instance> = self.records.iter().collect();
        sorted.sort_by_key(key);
        sorted
    }

    /// Groups the instances by the value of `column`, in order of first
    /// appearance. Instances without the column are grouped under `NULL`.
    #[must_use]
    pub fn group_by_value(&self, column: &str) -> Vec<(SqlValue, Vec<&Instance>)> {
        let mut groups: Vec<(SqlValue, Vec<&Instance>)> = Vec::new();
        for instance in &self.records {
            let value = instance.value(column).cloned().unwrap_or(SqlValue::Null);
            match groups.iter_mut().find(|(key, _)| *key == value) {
                Some((_, members)) => members.push(instance),
                None => groups.push((value, vec![instance])),
            }
        }
        groups
    }

    fn from_parts(parts: Vec<(Instance, Vec<FlatRow>)>, metadata: Metadata) -> Self {
        let mut set = Self {
            metadata,
            ..Self::default()
        };
        for (instance, rows) in parts {
            if let Some(id) = instance.id() {
                set.index.insert(id, set.records.len());
            }
            set.records.push(instance);
            set.rows.push(rows);
        }
        set
    }
}

impl IntoIterator for ResultSet {
    type Item = Instance;
    type IntoIter = std::vec::IntoIter<Instance>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a Instance;
    type IntoIter = std::slice::Iter<'a, Instance>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Splits the columns labelled `qualifier.column` out of a row.
fn extract(row: &FlatRow, qualifier: &str) -> Option<RawRecord> {
    let prefix = format!("{qualifier}.");
    let data: RawRecord = row
        .iter()
        .filter_map(|(label, value)| {
            label
                .strip_prefix(&prefix)
                .map(|column| (String::from(column), value.clone()))
        })
        .collect();
    if data.is_empty() {
        None
    } else {
        Some(data)
    }
}

/// Folds flat rows into instances of `table` (selected as `qualifier`).
///
/// Rows without an owner id each become their own instance.
pub(crate) fn assemble(
    table: &str,
    qualifier: &str,
    plans: &[RelationPlan],
    rows: Vec<FlatRow>,
    metadata: Metadata,
) -> ResultSet {
    let mut set = ResultSet {
        metadata,
        ..ResultSet::default()
    };
    let mut seen: Vec<BTreeSet<String>> = Vec::new();
    let mut present: BTreeSet<String> = BTreeSet::new();
    let row_count = rows.len();

    for row in rows {
        let values = extract(&row, qualifier).unwrap_or_else(|| row.clone());
        let owner_id = values.get("id").and_then(SqlValue::as_i64);

        let slot = match owner_id.and_then(|id| set.index.get(&id).copied()) {
            Some(slot) => slot,
            None => {
                let mut instance = Instance::new(table, values);
                instance.init_slots(plans);
                set.records.push(instance);
                set.rows.push(Vec::new());
                seen.push(BTreeSet::new());
                let slot = set.records.len() - 1;
                if let Some(id) = owner_id {
                    set.index.insert(id, slot);
                }
                slot
            }
        };

        for plan in plans {
            attach(
                &mut set.records[slot],
                plan,
                &row,
                "",
                &mut seen[slot],
                &mut present,
            );
        }
        set.rows[slot].push(row);
    }

    if row_count > 0 {
        warn_missing(plans, &present);
    }
    set
}

fn warn_missing(plans: &[RelationPlan], present: &BTreeSet<String>) {
    for plan in plans {
        if !present.contains(&plan.path) {
            warn!(relationship = %plan.path, "relationship columns missing from every row");
        }
        warn_missing(&plan.nested, present);
    }
}

fn attach(
    owner: &mut Instance,
    plan: &RelationPlan,
    row: &FlatRow,
    parent_key: &str,
    seen: &mut BTreeSet<String>,
    present: &mut BTreeSet<String>,
) {
    let Some(data) = extract(row, &plan.alias).or_else(|| extract(row, &plan.table_name)) else {
        return;
    };
    present.insert(plan.path.clone());

    // no related row on this branch (left join without a match)
    let Some(related_id) = data.get("id").and_then(SqlValue::as_i64) else {
        return;
    };

    let key = format!("{parent_key}/{}-{related_id}", plan.path);
    if seen.insert(key.clone()) {
        let record = if plan.typed {
            let mut instance = Instance::new(&plan.table_name, data);
            instance.init_slots(&plan.nested);
            Record::Typed(instance)
        } else {
            Record::Raw(data)
        };

        let slot = owner
            .relations
            .entry(plan.key.clone())
            .or_insert_with(|| {
                if plan.multiple {
                    Related::Many(Vec::new())
                } else {
                    Related::One(None)
                }
            });
        match slot {
            Related::Many(records) => records.push(record),
            Related::One(current) => *current = Some(Box::new(record)),
        }
    }

    if plan.nested.is_empty() {
        return;
    }

    let target = match owner.relations.get_mut(&plan.key) {
        Some(Related::Many(records)) => records
            .iter_mut()
            .find(|r| r.id() == Some(related_id))
            .and_then(Record::as_instance_mut),
        Some(Related::One(Some(record))) if record.id() == Some(related_id) => {
            record.as_instance_mut()
        }
        _ => None,
    };
    if let Some(target) = target {
        for nested in &plan.nested {
            attach(target, nested, row, &key, seen, present);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, SqlValue)]) -> FlatRow {
        pairs
            .iter()
            .map(|(k, v)| (String::from(*k), v.clone()))
            .collect()
    }

    fn text(s: &str) -> SqlValue {
        SqlValue::Text(String::from(s))
    }

    fn posts_plan() -> RelationPlan {
        RelationPlan {
            key: String::from("posts"),
            path: String::from("posts"),
            alias: String::from("rel_posts"),
            table_name: String::from("post"),
            multiple: true,
            typed: true,
            nested: vec![],
        }
    }

    #[test]
    fn test_one_to_many_nesting() {
        let rows = vec![
            row(&[
                ("author.id", SqlValue::Int(1)),
                ("author.name", text("A")),
                ("rel_posts.id", SqlValue::Int(10)),
                ("rel_posts.title", text("first")),
            ]),
            row(&[
                ("author.id", SqlValue::Int(1)),
                ("author.name", text("A")),
                ("rel_posts.id", SqlValue::Int(11)),
                ("rel_posts.title", text("second")),
            ]),
            row(&[
                ("author.id", SqlValue::Int(2)),
                ("author.name", text("B")),
                ("rel_posts.id", SqlValue::Null),
                ("rel_posts.title", SqlValue::Null),
            ]),
        ];

        let set = assemble("author", "author", &[posts_plan()], rows, Metadata::default());
        assert_eq!(set.len(), 2);
        assert_eq!(set.ids(), vec![1, 2]);

        let a = set.get(1).unwrap();
        assert_eq!(a.get::<String>("name").unwrap(), "A");
        let titles: Vec<String> = a
            .many("posts")
            .iter()
            .map(|p| p.get::<String>("title").unwrap())
            .collect();
        assert_eq!(titles, vec!["first", "second"]);
        assert_eq!(set.raw_rows(1).unwrap().len(), 2);

        let b = set.get(2).unwrap();
        assert_eq!(b.related("posts"), Some(&Related::Many(vec![])));
    }

    #[test]
    fn test_fan_out_is_deduplicated() {
        let tags = RelationPlan {
            key: String::from("tags"),
            path: String::from("tags"),
            alias: String::from("rel_tags"),
            table_name: String::from("tag"),
            multiple: true,
            typed: false,
            nested: vec![],
        };
        // two posts x two tags for one author
        let mut rows = Vec::new();
        for post in [10, 11] {
            for tag in [5, 6] {
                rows.push(row(&[
                    ("author.id", SqlValue::Int(1)),
                    ("rel_posts.id", SqlValue::Int(post)),
                    ("rel_tags.id", SqlValue::Int(tag)),
                ]));
            }
        }
        let set = assemble(
            "author",
            "author",
            &[posts_plan(), tags],
            rows,
            Metadata::default(),
        );
        let author = set.first().unwrap();
        assert_eq!(author.many("posts").len(), 2);
        assert_eq!(author.many("tags").len(), 2);
        assert!(matches!(author.many("tags")[0], Record::Raw(_)));
    }

    #[test]
    fn test_nested_merge_into_existing_record() {
        let mut posts = posts_plan();
        posts.nested.push(RelationPlan {
            key: String::from("tags"),
            path: String::from("posts.tags"),
            alias: String::from("rel_posts__tags"),
            table_name: String::from("tag"),
            multiple: true,
            typed: true,
            nested: vec![],
        });
        let rows = vec![
            row(&[
                ("author.id", SqlValue::Int(1)),
                ("rel_posts.id", SqlValue::Int(10)),
                ("rel_posts__tags.id", SqlValue::Int(5)),
            ]),
            row(&[
                ("author.id", SqlValue::Int(1)),
                ("rel_posts.id", SqlValue::Int(10)),
                ("rel_posts__tags.id", SqlValue::Int(6)),
            ]),
            row(&[
                ("author.id", SqlValue::Int(1)),
                ("rel_posts.id", SqlValue::Int(11)),
                ("rel_posts__tags.id", SqlValue::Int(5)),
            ]),
        ];
        let set = assemble("author", "author", &[posts], rows, Metadata::default());
        let author = set.first().unwrap();
        let posts = author.many("posts");
        assert_eq!(posts.len(), 2);
        let first = posts[0].as_instance().unwrap();
        assert_eq!(first.many("tags").len(), 2);
        let second = posts[1].as_instance().unwrap();
        assert_eq!(second.many("tags").len(), 1);
    }

    #[test]
    fn test_alias_falls_back_to_table_name() {
        let plan = RelationPlan {
            key: String::from("author"),
            path: String::from("author"),
            alias: String::from("rel_author"),
            table_name: String::from("person"),
            multiple: false,
            typed: true,
            nested: vec![],
        };
        let rows = vec![row(&[
            ("post.id", SqlValue::Int(1)),
            ("person.id", SqlValue::Int(3)),
            ("person.name", text("Henk")),
        ])];
        let set = assemble("post", "post", &[plan], rows, Metadata::default());
        let author = set.first().unwrap().one("author").unwrap();
        assert_eq!(author.get::<String>("name").unwrap(), "Henk");
    }

    #[test]
    fn test_missing_relationship_degrades_to_default() {
        let rows = vec![row(&[("author.id", SqlValue::Int(1))])];
        let set = assemble("author", "author", &[posts_plan()], rows, Metadata::default());
        assert!(set.first().unwrap().many("posts").is_empty());
    }

    #[test]
    fn test_rows_without_id_are_kept_apart() {
        let rows = vec![
            row(&[("person.name", text("A"))]),
            row(&[("person.name", text("A"))]),
        ];
        let set = assemble("person", "person", &[], rows, Metadata::default());
        assert_eq!(set.len(), 2);
        assert!(set.ids().is_empty());
    }

    fn people() -> ResultSet {
        let rows = [(1, "Henk", 44), (2, "Ingrid", 30), (3, "Jan", 44), (4, "Kees", 19)]
            .iter()
            .map(|&(id, name, age)| {
                row(&[
                    ("person.id", SqlValue::Int(id)),
                    ("person.name", text(name)),
                    ("person.age", SqlValue::Int(age)),
                ])
            })
            .collect();
        assemble("person", "person", &[], rows, Metadata::default())
    }

    fn age(instance: &Instance) -> i64 {
        instance.get("age").unwrap()
    }

    #[test]
    fn test_find_keeps_matches_in_order() {
        let set = people();
        let found = set.find(|p| age(p) > 20, None);
        assert_eq!(found.ids(), vec![1, 2, 3]);
        assert_eq!(found.get(3).unwrap().get::<String>("name").unwrap(), "Jan");
        assert!(found.get(4).is_none());
        assert_eq!(found.raw_rows(2).unwrap().len(), 1);

        let window = set.find(|p| age(p) > 20, Some((1, 2)));
        assert_eq!(window.ids(), vec![2]);
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_exclude_moves_matches_out() {
        let mut set = people();
        let removed = set.exclude(|p| age(p) == 44);
        assert_eq!(removed.ids(), vec![1, 3]);
        assert_eq!(set.ids(), vec![2, 4]);
        assert!(set.get(1).is_none());
        assert_eq!(set.get(4).unwrap().get::<String>("name").unwrap(), "Kees");
    }

    #[test]
    fn test_sorted_by_key_and_group_by_value() {
        let set = people();
        let by_age: Vec<i64> = set
            .sorted_by_key(|p| age(p))
            .into_iter()
            .filter_map(Instance::id)
            .collect();
        assert_eq!(by_age, vec![4, 2, 1, 3]);
        assert_eq!(set.ids(), vec![1, 2, 3, 4]);

        let groups = set.group_by_value("age");
        let summary: Vec<(SqlValue, Vec<i64>)> = groups
            .into_iter()
            .map(|(key, members)| (key, members.into_iter().filter_map(Instance::id).collect()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (SqlValue::Int(44), vec![1, 3]),
                (SqlValue::Int(30), vec![2]),
                (SqlValue::Int(19), vec![4]),
            ]
        );
    }
}
