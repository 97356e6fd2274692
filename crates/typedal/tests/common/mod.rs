#![allow(dead_code)]

use sqlx::sqlite::SqlitePoolOptions;
use typedal::{
    Config, Database, Entity, FieldOptions, FieldType, RelationTarget, Relationship, SqlValue,
    TableRef, Values,
};

pub async fn database_with(config: Config) -> Database {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .unwrap();
    Database::sqlite(pool, config)
}

pub async fn database() -> Database {
    database_with(Config::default()).await
}

/// Authors with posts, posts with an author, an optional editor, reviewers
/// and tags through a pivot table.
pub async fn blog() -> Database {
    let mut db = database().await;
    define_blog(&mut db).await;
    db
}

pub async fn define_blog(db: &mut Database) {
    db.define(
        Entity::builder("Author")
            .field("name", FieldType::String)
            .relationship(
                "posts",
                Relationship::builder(RelationTarget::list("Post"))
                    .condition(|author, post| author.id().eq(post.col("author")))
                    .build()
                    .unwrap(),
            ),
    )
    .await
    .unwrap();

    db.define(Entity::builder("Tag").field("name", FieldType::String))
        .await
        .unwrap();

    db.define(
        Entity::builder("Post")
            .field("title", FieldType::String)
            .field("author", FieldType::reference("author"))
            .field_with(
                "editor",
                FieldType::reference("author"),
                FieldOptions::new().optional(),
            )
            .field("reviewers", FieldType::list_reference("author"))
            .relationship(
                "tags",
                Relationship::builder(RelationTarget::list("Tag"))
                    .on(|post, tag| {
                        let tagged = TableRef::new("tagged");
                        vec![
                            (tagged.clone(), tagged.col("post").eq(post.id())),
                            (tag.clone(), tag.id().eq(tagged.col("tag"))),
                        ]
                    })
                    .build()
                    .unwrap(),
            ),
    )
    .await
    .unwrap();

    db.define(
        Entity::builder("Tagged")
            .field("post", FieldType::reference("post"))
            .field("tag", FieldType::reference("tag")),
    )
    .await
    .unwrap();
}

pub async fn author(db: &Database, name: &str) -> i64 {
    db.insert("author", Values::new().set("name", name))
        .await
        .unwrap()
        .id()
        .unwrap()
}

pub async fn post(db: &Database, title: &str, author: i64) -> i64 {
    db.insert(
        "post",
        Values::new().set("title", title).set("author", author),
    )
    .await
    .unwrap()
    .id()
    .unwrap()
}

pub async fn tag(db: &Database, post: i64, name: &str) -> i64 {
    let tag = db
        .insert("tag", Values::new().set("name", name))
        .await
        .unwrap()
        .id()
        .unwrap();
    db.insert("tagged", Values::new().set("post", post).set("tag", tag))
        .await
        .unwrap();
    tag
}

pub fn names(rows: &typedal::ResultSet) -> Vec<String> {
    rows.iter()
        .map(|row| row.get::<String>("name").unwrap())
        .collect()
}

pub fn text(value: &str) -> SqlValue {
    SqlValue::Text(String::from(value))
}
