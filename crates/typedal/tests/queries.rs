//! Integration tests for predicates, selects and writes through the query
//! builder.

mod common;

use common::{author, blog, database, names, post, text};
use typedal::{
    ColumnRef, Entity, Expr, FieldOptions, FieldType, SelectOptions, SqlValue, TypedalError,
    Values, WhereArg,
};

#[tokio::test]
async fn test_where_by_fields_then_first() {
    let mut db = database().await;
    db.define(
        Entity::builder("Person")
            .field("name", FieldType::String)
            .field_with("age", FieldType::Integer, FieldOptions::new().with_default(18)),
    )
    .await
    .unwrap();

    db.insert("person", Values::new().set("name", "Henk").set("age", 44))
        .await
        .unwrap();
    db.insert("person", Values::new().set("name", "Ingrid"))
        .await
        .unwrap();

    let henk = db
        .table("Person")
        .unwrap()
        .where_(Values::new().set("name", "Henk"))
        .unwrap()
        .first()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(henk.get::<i64>("age").unwrap(), 44);

    let ingrid = db
        .table("person")
        .unwrap()
        .where_(Values::new().set("name", "Ingrid"))
        .unwrap()
        .first_or_fail(None)
        .await
        .unwrap();
    assert_eq!(ingrid.get::<i64>("age").unwrap(), 18);
}

#[tokio::test]
async fn test_missing_rows() {
    let db = blog().await;
    author(&db, "A").await;
    let entity = db.entity("author").unwrap();
    let query = db
        .table("author")
        .unwrap()
        .where_(entity.id().eq(-1))
        .unwrap();

    let result = query.collect_or_fail().await;
    assert!(matches!(result, Err(TypedalError::NotFound(_))));
    assert!(query.first().await.unwrap().is_none());
    assert!(query.collect().await.unwrap().is_empty());

    let custom = query
        .first_or_fail(Some(TypedalError::NotFound(String::from("no author"))))
        .await;
    assert!(matches!(custom, Err(TypedalError::NotFound(msg)) if msg == "no author"));
}

#[tokio::test]
async fn test_chained_where_is_conjunction() {
    let db = blog().await;
    for name in ["Anna", "Bert", "Anton", "Cees"] {
        author(&db, name).await;
    }
    let entity = db.entity("author").unwrap();
    let starts_with_a = entity.col("name").like("A%");
    let after_first = entity.id().gt(1);

    let chained = db
        .table("author")
        .unwrap()
        .where_(starts_with_a.clone())
        .unwrap()
        .where_(after_first.clone())
        .unwrap()
        .collect()
        .await
        .unwrap();
    let combined = db
        .table("author")
        .unwrap()
        .where_(starts_with_a.and(after_first))
        .unwrap()
        .collect()
        .await
        .unwrap();

    assert_eq!(chained.ids(), combined.ids());
    assert_eq!(names(&chained), vec!["Anton"]);
}

#[tokio::test]
async fn test_raw_or_keeps_its_grouping_when_chained() {
    let db = blog().await;
    for name in ["Anna", "Bert", "Cees"] {
        author(&db, name).await;
    }
    let entity = db.entity("author").unwrap();

    let rows = db
        .table("author")
        .unwrap()
        .where_(Expr::raw("name = 'Anna' OR name = 'Bert'"))
        .unwrap()
        .where_(entity.id().gt(1))
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(names(&rows), vec!["Bert"]);
}

#[tokio::test]
async fn test_contains_matches_wildcards_literally() {
    let mut db = database().await;
    db.define(Entity::builder("Box").field("labels", FieldType::list_of(FieldType::String)))
        .await
        .unwrap();
    db.insert("box", Values::new().set("labels", SqlValue::list(["axb"])))
        .await
        .unwrap();
    let literal = db
        .insert("box", Values::new().set("labels", SqlValue::list(["a_b", "50%"])))
        .await
        .unwrap()
        .id()
        .unwrap();
    let labels = db.entity("box").unwrap().col("labels");

    for needle in ["a_b", "50%"] {
        let rows = db
            .table("box")
            .unwrap()
            .where_(labels.contains(needle))
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(rows.ids(), vec![literal]);
    }
    let none = db
        .table("box")
        .unwrap()
        .where_(labels.contains("a%"))
        .unwrap()
        .count(false)
        .await
        .unwrap();
    assert_eq!(none, 0);
}

#[tokio::test]
async fn test_where_any_is_disjunction() {
    let db = blog().await;
    for name in ["Anna", "Bert", "Cees"] {
        author(&db, name).await;
    }
    let entity = db.entity("author").unwrap();

    let rows = db
        .table("author")
        .unwrap()
        .where_any(vec![
            WhereArg::from(entity.col("name").eq("Anna")),
            WhereArg::from(Values::new().set("name", "Cees")),
        ])
        .unwrap()
        .orderby(&["name"])
        .collect()
        .await
        .unwrap();
    assert_eq!(names(&rows), vec!["Anna", "Cees"]);

    // alternatives are ANDed with what came before
    let rows = db
        .table("author")
        .unwrap()
        .where_(entity.id().gt(1))
        .unwrap()
        .where_any(vec![
            WhereArg::from(entity.col("name").eq("Anna")),
            WhereArg::from(entity.col("name").eq("Cees")),
        ])
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(names(&rows), vec!["Cees"]);
}

#[tokio::test]
async fn test_where_callable_and_column() {
    let db = blog().await;
    let a = author(&db, "A").await;
    let b = author(&db, "B").await;
    let first = post(&db, "first", a).await;
    post(&db, "second", b).await;
    db.table("post")
        .unwrap()
        .where_(Values::new().set("id", first))
        .unwrap()
        .update(Values::new().set("editor", b))
        .await
        .unwrap();

    let edited = db
        .table("post")
        .unwrap()
        .where_(db.entity("post").unwrap().col("editor"))
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(edited.ids(), vec![first]);

    let unedited = db
        .table("post")
        .unwrap()
        .where_(Values::new().set("editor", SqlValue::Null))
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(unedited.len(), 1);

    // a callable returning nothing adds no condition
    let all = db
        .table("post")
        .unwrap()
        .where_(WhereArg::callable(|_| None))
        .unwrap()
        .count(false)
        .await
        .unwrap();
    assert_eq!(all, 2);

    let by_title = db
        .table("post")
        .unwrap()
        .where_(WhereArg::callable(|post| Some(post.col("title").eq("second"))))
        .unwrap()
        .first()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_title.value("title"), Some(&text("second")));
}

#[tokio::test]
async fn test_where_unknown_field_is_invalid() {
    let db = blog().await;
    let result = db
        .table("author")
        .unwrap()
        .where_(Values::new().set("nope", 1));
    assert!(matches!(result, Err(TypedalError::InvalidArgument(_))));
}

#[tokio::test]
async fn test_order_and_limit() {
    let db = blog().await;
    for name in ["Bert", "Anna", "Cees", "Dirk"] {
        author(&db, name).await;
    }

    let rows = db
        .table("author")
        .unwrap()
        .orderby(&["-name"])
        .collect()
        .await
        .unwrap();
    assert_eq!(names(&rows), vec!["Dirk", "Cees", "Bert", "Anna"]);

    let window = db
        .table("author")
        .unwrap()
        .select(
            vec![],
            SelectOptions {
                orderby: Some(vec![String::from("name")]),
                limitby: Some((1, 3)),
                ..SelectOptions::default()
            },
        )
        .collect()
        .await
        .unwrap();
    assert_eq!(names(&window), vec!["Bert", "Cees"]);

    let random = db
        .table("author")
        .unwrap()
        .orderby(&["<random>"])
        .collect()
        .await
        .unwrap();
    assert_eq!(random.len(), 4);
}

#[tokio::test]
async fn test_select_columns_and_distinct() {
    let db = blog().await;
    let a = author(&db, "A").await;
    post(&db, "same", a).await;
    post(&db, "same", a).await;
    let entity = db.entity("post").unwrap();

    let rows = db
        .table("post")
        .unwrap()
        .select(vec![entity.col("title")], SelectOptions::default())
        .collect()
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    let first = rows.first().unwrap();
    assert!(first.value("author").is_none());
    assert!(first.id().is_some());

    // without ids identical rows stay separate, unless distinct
    let plain = db
        .table("post")
        .unwrap()
        .select(vec![entity.col("title")], SelectOptions::default())
        .collect_with(false)
        .await
        .unwrap();
    assert_eq!(plain.len(), 2);
    assert!(plain.first().unwrap().id().is_none());

    let distinct = db
        .table("post")
        .unwrap()
        .select(
            vec![entity.col("title")],
            SelectOptions {
                distinct: Some(true),
                ..SelectOptions::default()
            },
        )
        .collect_with(false)
        .await
        .unwrap();
    assert_eq!(distinct.len(), 1);
}

#[tokio::test]
async fn test_group_by_with_having() {
    let db = blog().await;
    let a = author(&db, "A").await;
    let b = author(&db, "B").await;
    post(&db, "one", a).await;
    post(&db, "two", a).await;
    post(&db, "three", b).await;
    let entity = db.entity("post").unwrap();

    let rows = db
        .table("post")
        .unwrap()
        .select(
            vec![entity.col("author")],
            SelectOptions {
                groupby: Some(vec![String::from("author")]),
                having: Some(typedal::Expr::raw("COUNT(*) > 1")),
                ..SelectOptions::default()
            },
        )
        .collect_with(false)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.first().unwrap().get::<i64>("author").unwrap(), a);
}

#[tokio::test]
async fn test_column_and_execute() {
    let db = blog().await;
    let a = author(&db, "A").await;
    author(&db, "B").await;
    post(&db, "one", a).await;
    post(&db, "two", a).await;

    let values = db
        .table("author")
        .unwrap()
        .orderby(&["-name"])
        .column("name")
        .await
        .unwrap();
    assert_eq!(values, vec![text("B"), text("A")]);

    // one flat row per author and post combination
    let rows = db
        .table("author")
        .unwrap()
        .join(&["posts"], typedal::JoinOptions::default())
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows[0].contains_key("rel_posts.title"));
}

#[tokio::test]
async fn test_count_and_exists() {
    let db = blog().await;
    author(&db, "A").await;
    author(&db, "B").await;
    let entity = db.entity("author").unwrap();

    let query = db.table("author").unwrap();
    assert_eq!(query.count(false).await.unwrap(), 2);
    assert!(query.exists().await.unwrap());

    let none = query.where_(entity.col("name").eq("Z")).unwrap();
    assert_eq!(none.count(true).await.unwrap(), 0);
    assert!(!none.exists().await.unwrap());
}

#[tokio::test]
async fn test_update_and_delete_return_ids() {
    let db = blog().await;
    for name in ["A", "B", "C"] {
        author(&db, name).await;
    }
    let entity = db.entity("author").unwrap();

    let mut updated = db
        .table("author")
        .unwrap()
        .where_(entity.id().ge(2))
        .unwrap()
        .update(Values::new().set("name", "X"))
        .await
        .unwrap();
    updated.sort_unstable();
    assert_eq!(updated, vec![2, 3]);
    let xs = db
        .table("author")
        .unwrap()
        .where_(Values::new().set("name", "X"))
        .unwrap()
        .count(false)
        .await
        .unwrap();
    assert_eq!(xs, 2);

    let mut deleted = db
        .table("author")
        .unwrap()
        .where_(Values::new().set("name", "X"))
        .unwrap()
        .delete()
        .await
        .unwrap();
    deleted.sort_unstable();
    assert_eq!(deleted, vec![2, 3]);
    assert_eq!(db.table("author").unwrap().count(false).await.unwrap(), 1);
}

#[tokio::test]
async fn test_update_and_delete_without_match() {
    let db = blog().await;
    author(&db, "A").await;
    let nobody = db
        .table("author")
        .unwrap()
        .where_(Values::new().set("name", "nobody"))
        .unwrap();

    assert!(nobody.delete().await.unwrap().is_empty());
    assert!(nobody
        .update(Values::new().set("name", "changed"))
        .await
        .unwrap()
        .is_empty());

    let rows = db.table("author").unwrap().collect().await.unwrap();
    assert_eq!(names(&rows), vec!["A"]);
}

#[tokio::test]
async fn test_result_set_writes() {
    let db = blog().await;
    for name in ["A", "B", "C", "D"] {
        author(&db, name).await;
    }
    let mut rows = db.table("author").unwrap().collect().await.unwrap();
    let picked = rows.exclude(|a| a.get::<String>("name").unwrap() != "A");

    let mut updated = db
        .update_rows(&picked, Values::new().set("name", "picked"))
        .await
        .unwrap();
    updated.sort_unstable();
    assert_eq!(updated, vec![2, 3, 4]);
    let picked_count = db
        .table("author")
        .unwrap()
        .where_(Values::new().set("name", "picked"))
        .unwrap()
        .count(false)
        .await
        .unwrap();
    assert_eq!(picked_count, 3);

    let subset = picked.find(|a| a.id() != Some(3), None);
    let mut deleted = db.delete_rows(&subset).await.unwrap();
    deleted.sort_unstable();
    assert_eq!(deleted, vec![2, 4]);
    let left = db.table("author").unwrap().collect().await.unwrap();
    assert_eq!(left.ids(), vec![1, 3]);

    // an empty set writes nothing
    let empty = left.find(|_| false, None);
    assert!(db.delete_rows(&empty).await.unwrap().is_empty());
    assert!(db
        .update_rows(&empty, Values::new().set("name", "x"))
        .await
        .unwrap()
        .is_empty());
    assert_eq!(rows.ids(), vec![1]);
}

#[tokio::test]
async fn test_update_rejects_bad_values() {
    let db = blog().await;
    author(&db, "A").await;
    let query = db.table("author").unwrap();
    assert!(matches!(
        query.update(Values::new()).await,
        Err(TypedalError::InvalidArgument(_))
    ));
    assert!(matches!(
        query.update(Values::new().set("nope", 1)).await,
        Err(TypedalError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_builders_are_immutable() {
    let db = blog().await;
    author(&db, "A").await;
    author(&db, "B").await;
    let entity = db.entity("author").unwrap();

    let base = db.table("author").unwrap();
    let narrowed = base.clone().where_(entity.col("name").eq("A")).unwrap();
    assert_eq!(base.count(false).await.unwrap(), 2);
    assert_eq!(narrowed.count(false).await.unwrap(), 1);
    assert!(base.predicate().is_none());
}

#[tokio::test]
async fn test_to_sql_renders_without_running() {
    let db = blog().await;
    let entity = db.entity("author").unwrap();
    let (sql, params) = db
        .table("author")
        .unwrap()
        .where_(entity.col("name").eq("A"))
        .unwrap()
        .select(
            vec![ColumnRef::qualified("author", "name")],
            SelectOptions {
                limitby: Some((0, 5)),
                ..SelectOptions::default()
            },
        )
        .join(&["posts"], typedal::JoinOptions::default())
        .unwrap()
        .to_sql()
        .unwrap();
    assert!(sql.contains("LEFT JOIN \"post\" AS \"rel_posts\""));
    assert!(sql.contains("\"author\".\"id\" IN (SELECT DISTINCT \"author\".\"id\""));
    assert_eq!(params, vec![text("A")]);
}

#[tokio::test]
async fn test_metadata_records_queries() {
    let db = blog().await;
    let a = author(&db, "A").await;
    post(&db, "one", a).await;

    let rows = db
        .table("post")
        .unwrap()
        .join(&["author"], typedal::JoinOptions::default())
        .unwrap()
        .collect()
        .await
        .unwrap();
    let meta = rows.metadata();
    assert_eq!(meta.relationships, vec!["author"]);
    assert!(meta
        .final_query
        .as_deref()
        .unwrap()
        .contains("INNER JOIN \"author\" AS \"rel_author\""));
    assert!(meta.ids.is_none());
    assert_eq!(rows.raw_rows(1).unwrap().len(), 1);
}
