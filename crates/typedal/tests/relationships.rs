//! Integration tests for joins and row assembly.

mod common;

use common::{author, blog, names, post, tag, text};
use typedal::{
    Entity, FieldOptions, FieldType, JoinMethod, JoinOptions, Record, Related, SqlValue,
    TypedalError, Values,
};

fn titles(records: &[Record]) -> Vec<String> {
    let mut titles: Vec<String> = records
        .iter()
        .map(|r| r.get::<String>("title").unwrap())
        .collect();
    titles.sort();
    titles
}

#[tokio::test]
async fn test_join_many_groups_per_owner() {
    let db = blog().await;
    let a = author(&db, "A").await;
    author(&db, "B").await;
    post(&db, "one", a).await;
    post(&db, "two", a).await;

    let authors = db
        .table("author")
        .unwrap()
        .join(&["posts"], JoinOptions::default())
        .unwrap()
        .orderby(&["name"])
        .collect()
        .await
        .unwrap();

    assert_eq!(names(&authors), vec!["A", "B"]);
    let a = authors.get(a).unwrap();
    assert_eq!(titles(a.many("posts")), vec!["one", "two"]);
    let b = authors.last().unwrap();
    assert!(b.many("posts").is_empty());
    assert_eq!(b.related("posts"), Some(&Related::Many(vec![])));
}

#[tokio::test]
async fn test_join_one_attaches_record() {
    let db = blog().await;
    let a = author(&db, "Henk").await;
    post(&db, "X", a).await;

    let found = db
        .table("post")
        .unwrap()
        .where_(Values::new().set("title", "X"))
        .unwrap()
        .join(&["author"], JoinOptions::default())
        .unwrap()
        .first()
        .await
        .unwrap()
        .unwrap();
    let writer = found.one("author").unwrap();
    assert_eq!(writer.get::<String>("name").unwrap(), "Henk");
    assert_eq!(writer.as_instance().unwrap().table(), "author");

    let missing = db
        .table("post")
        .unwrap()
        .where_(Values::new().set("title", "Y"))
        .unwrap()
        .join(&["author"], JoinOptions::default())
        .unwrap()
        .first()
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_left_and_inner_joins() {
    let db = blog().await;
    let a = author(&db, "A").await;
    author(&db, "B").await;
    post(&db, "one", a).await;

    let left = db
        .table("author")
        .unwrap()
        .join(&["posts"], JoinOptions::method(JoinMethod::Left))
        .unwrap();
    assert_eq!(left.collect().await.unwrap().len(), 2);
    assert_eq!(left.count(true).await.unwrap(), 2);

    let inner = db
        .table("author")
        .unwrap()
        .join(&["posts"], JoinOptions::method(JoinMethod::Inner))
        .unwrap();
    let rows = inner.collect().await.unwrap();
    assert_eq!(names(&rows), vec!["A"]);
    assert_eq!(inner.count(true).await.unwrap(), 1);
}

#[tokio::test]
async fn test_inferred_relationships() {
    let db = blog().await;
    let a = author(&db, "A").await;
    let b = author(&db, "B").await;
    let c = author(&db, "C").await;
    let reviewed = db
        .insert(
            "post",
            Values::new()
                .set("title", "reviewed")
                .set("author", a)
                .set("editor", b)
                .set("reviewers", SqlValue::list([b, c])),
        )
        .await
        .unwrap();
    post(&db, "plain", a).await;

    let posts = db
        .table("post")
        .unwrap()
        .join(&["author", "editor", "reviewers"], JoinOptions::default())
        .unwrap()
        .orderby(&["id"])
        .collect()
        .await
        .unwrap();
    assert_eq!(posts.len(), 2);

    let first = posts.get(reviewed.id().unwrap()).unwrap();
    assert_eq!(first.one("author").unwrap().id(), Some(a));
    assert_eq!(first.one("editor").unwrap().id(), Some(b));
    let mut reviewers: Vec<i64> = first
        .many("reviewers")
        .iter()
        .filter_map(Record::id)
        .collect();
    reviewers.sort_unstable();
    assert_eq!(reviewers, vec![b, c]);

    // the optional editor is left joined, so the unedited post stays
    let plain = posts.last().unwrap();
    assert!(plain.one("editor").is_none());
    assert_eq!(plain.related("editor"), Some(&Related::One(None)));
    assert!(plain.many("reviewers").is_empty());
}

#[tokio::test]
async fn test_same_table_twice_and_fan_out() {
    let db = blog().await;
    let a = author(&db, "A").await;
    let b = author(&db, "B").await;
    let p = db
        .insert(
            "post",
            Values::new()
                .set("title", "t")
                .set("author", a)
                .set("editor", b),
        )
        .await
        .unwrap()
        .id()
        .unwrap();
    tag(&db, p, "rust").await;
    tag(&db, p, "sql").await;

    // tags fan the row out; author and editor must not repeat
    let posts = db
        .table("post")
        .unwrap()
        .join(&[], JoinOptions::default())
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(posts.len(), 1);
    let post = posts.first().unwrap();
    assert_eq!(
        post.one("author").unwrap().get::<String>("name").unwrap(),
        "A"
    );
    assert_eq!(
        post.one("editor").unwrap().get::<String>("name").unwrap(),
        "B"
    );
    let mut tags: Vec<String> = post
        .many("tags")
        .iter()
        .map(|t| t.get::<String>("name").unwrap())
        .collect();
    tags.sort();
    assert_eq!(tags, vec!["rust", "sql"]);
    assert_eq!(posts.raw_rows(p).unwrap().len(), 2);
}

#[tokio::test]
async fn test_nested_join() {
    let db = blog().await;
    let a = author(&db, "A").await;
    let b = author(&db, "B").await;
    let one = post(&db, "one", a).await;
    post(&db, "two", a).await;
    tag(&db, one, "rust").await;
    tag(&db, one, "sql").await;
    author(&db, "C").await;
    db.table("post")
        .unwrap()
        .where_(Values::new().set("id", one))
        .unwrap()
        .update(Values::new().set("editor", b))
        .await
        .unwrap();

    let authors = db
        .table("author")
        .unwrap()
        .join(&["posts.tags", "posts.editor"], JoinOptions::default())
        .unwrap()
        .orderby(&["name"])
        .collect()
        .await
        .unwrap();
    assert_eq!(names(&authors), vec!["A", "B", "C"]);
    assert_eq!(
        authors.metadata().relationships,
        vec!["posts", "posts.editor", "posts.tags"]
    );

    let a = authors.get(a).unwrap();
    let posts = a.many("posts");
    assert_eq!(posts.len(), 2);
    let first = posts
        .iter()
        .find(|p| p.id() == Some(one))
        .and_then(Record::as_instance)
        .unwrap();
    assert_eq!(first.many("tags").len(), 2);
    assert_eq!(first.one("editor").unwrap().id(), Some(b));

    let second = posts
        .iter()
        .find(|p| p.id() != Some(one))
        .and_then(Record::as_instance)
        .unwrap();
    assert!(second.many("tags").is_empty());
    assert!(second.one("editor").is_none());

    assert!(authors.get(b).unwrap().many("posts").is_empty());
}

#[tokio::test]
async fn test_repeated_join_merges_nested() {
    let db = blog().await;
    let a = author(&db, "A").await;
    let p = post(&db, "one", a).await;
    tag(&db, p, "rust").await;

    let authors = db
        .table("author")
        .unwrap()
        .join(&["posts.tags"], JoinOptions::default())
        .unwrap()
        .join(&["posts"], JoinOptions::default())
        .unwrap()
        .collect()
        .await
        .unwrap();
    let posts = authors.first().unwrap().many("posts");
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].as_instance().unwrap().many("tags").len(), 1);
}

#[tokio::test]
async fn test_ad_hoc_join() {
    let db = blog().await;
    let a = author(&db, "A").await;
    post(&db, "latest", a).await;

    let authors = db
        .table("author")
        .unwrap()
        .join(
            &["post"],
            JoinOptions::default().condition(|author, post| author.id().eq(post.col("author"))),
        )
        .unwrap()
        .collect()
        .await
        .unwrap();
    let latest = authors.first().unwrap().one("post").unwrap();
    assert_eq!(latest.get::<String>("title").unwrap(), "latest");

    // condition_and narrows a declared relationship
    let filtered = db
        .table("author")
        .unwrap()
        .join(
            &["posts"],
            JoinOptions::default().condition_and(|_, post| post.col("title").eq("nope")),
        )
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);
    assert!(filtered.first().unwrap().many("posts").is_empty());
}

#[tokio::test]
async fn test_join_misuse() {
    let db = blog().await;
    let query = db.table("author").unwrap();

    let both = query.clone().join(
        &["posts"],
        JoinOptions::default()
            .condition(|a, p| a.id().eq(p.col("author")))
            .on(|_, p| vec![(p.clone(), p.id().is_not_null())]),
    );
    assert!(matches!(both, Err(TypedalError::InvalidArgument(_))));

    let several = query.clone().join(
        &["posts", "other"],
        JoinOptions::default().condition(|a, p| a.id().eq(p.col("author"))),
    );
    assert!(matches!(several, Err(TypedalError::InvalidArgument(_))));

    let unknown = query.clone().join(&["nope"], JoinOptions::default());
    assert!(matches!(
        unknown,
        Err(TypedalError::UnknownRelationship { .. })
    ));

    let nested_unknown = query.clone().join(&["posts.nope"], JoinOptions::default());
    assert!(matches!(
        nested_unknown,
        Err(TypedalError::UnknownRelationship { .. })
    ));

    let undefined = query.join(
        &["ghost"],
        JoinOptions::default().condition(|a, g| a.id().eq(g.id())),
    );
    assert!(matches!(undefined, Err(TypedalError::Environment(_))));
}

#[tokio::test]
async fn test_self_join() {
    let mut db = common::database().await;
    db.define(
        Entity::builder("Employee")
            .field("name", FieldType::String)
            .field_with(
                "manager",
                FieldType::reference("employee"),
                FieldOptions::new().optional(),
            ),
    )
    .await
    .unwrap();
    let boss = db
        .insert("employee", Values::new().set("name", "Boss"))
        .await
        .unwrap();
    db.insert(
        "employee",
        Values::new().set("name", "Worker").set("manager", boss.id()),
    )
    .await
    .unwrap();

    let staff = db
        .table("employee")
        .unwrap()
        .join(&["manager"], JoinOptions::default())
        .unwrap()
        .orderby(&["id"])
        .collect()
        .await
        .unwrap();
    assert_eq!(staff.len(), 2);
    assert!(staff.first().unwrap().one("manager").is_none());
    let manager = staff.last().unwrap().one("manager").unwrap();
    assert_eq!(manager.get::<String>("name").unwrap(), "Boss");
}

#[tokio::test]
async fn test_raw_table_rows_stay_untyped() {
    let mut db = common::database().await;
    db.register_table(Entity::builder("Country").field("code", FieldType::String))
        .await
        .unwrap();
    db.define(
        Entity::builder("City")
            .field("name", FieldType::String)
            .field("country", FieldType::reference("country")),
    )
    .await
    .unwrap();
    let nl = db
        .insert("country", Values::new().set("code", "NL"))
        .await
        .unwrap();
    db.insert(
        "city",
        Values::new().set("name", "Utrecht").set("country", nl.id()),
    )
    .await
    .unwrap();

    let city = db
        .table("city")
        .unwrap()
        .join(&["country"], JoinOptions::default())
        .unwrap()
        .first()
        .await
        .unwrap()
        .unwrap();
    let country = city.one("country").unwrap();
    assert!(country.as_instance().is_none());
    assert!(matches!(country, Record::Raw(values) if values.get("code") == Some(&text("NL"))));
}

#[tokio::test]
async fn test_delete_cascades_and_record_helpers() {
    let db = blog().await;
    let a = author(&db, "A").await;
    post(&db, "one", a).await;

    let author = db
        .table("author")
        .unwrap()
        .first_or_fail(None)
        .await
        .unwrap();
    let renamed = db
        .update_record(&author, Values::new().set("name", "B"))
        .await
        .unwrap();
    assert_eq!(renamed.get::<String>("name").unwrap(), "B");

    assert!(db.delete_record(&renamed).await.unwrap());
    assert_eq!(db.table("post").unwrap().count(false).await.unwrap(), 0);
}
