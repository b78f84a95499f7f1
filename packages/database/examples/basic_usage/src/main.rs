//! Basic usage of the rowkit persistence layer.
//!
//! Builds an in-memory `SQLite` database from a json5 configuration, declares a `posts`
//! table with a per-locale `post_translations` side table, saves a few records and runs
//! filtered, ordered and paginated queries in two locales.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::sync::Arc;

use rowkit_config::Config;
use rowkit_database::{
    DatabaseValue, Field, Params, Query, QueryOptions, Record, SelectField, Table, ValueKind,
};
use rowkit_translation::Translation;

const CONFIG: &str = r#"{
    // a single in-memory database
    database: {
        default: { dsn: "sqlite::memory:" },
    },
    logging: { level: "info" },
    translation: { default: "en", all: ["en", "hu"] },
}"#;

const SCHEMA: [&str; 2] = [
    "CREATE TABLE posts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        author TEXT NOT NULL,
        published INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE post_translations (
        post_id INTEGER NOT NULL,
        locale TEXT NOT NULL,
        title TEXT NOT NULL,
        PRIMARY KEY (post_id, locale)
    )",
];

const POSTS: [(&str, &str, &str); 4] = [
    ("ada", "Parsing with nom", "Elemzés nom-mal"),
    ("grace", "A 100% safe cache", "Egy 100%-ban biztonságos gyorsítótár"),
    ("linus", "Ownership in practice", "Tulajdonjog a gyakorlatban"),
    ("ada", "Lifetimes explained", "Élettartamok magyarázata"),
];

/// Entry point for the basic usage example.
///
/// # Errors
///
/// Returns an error if:
/// * The configuration fails to parse
/// * Logging or the database fails to initialize
/// * Any statement fails
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config: Config = CONFIG.parse()?;
    let _layer = rowkit_logging::init(None, config.logging.as_ref())?;

    let db = Arc::new(rowkit_database_connection::init("default", &config)?);
    for statement in SCHEMA {
        db.execute(statement, &Params::new())?;
    }

    let translations = Arc::new(
        Table::builder("post_translations")
            .field(Field::nullable("post_id", ValueKind::Integer))
            .field(Field::new("locale", "en"))
            .field(Field::new("title", ""))
            .primary_key(["post_id", "locale"])
            .build(db.clone())?,
    );
    let posts = Arc::new(
        Table::builder("posts")
            .field(Field::nullable("id", ValueKind::Integer))
            .field(Field::new("author", ""))
            .field(Field::new("published", false))
            .translation(translations.clone())
            .build(db.clone())?,
    );

    println!("Saving posts...");
    for (author, en, hu) in POSTS {
        let mut post = posts.create();
        post.set("author", author)?;
        post.set("published", true)?;
        posts.save(&mut post)?;

        let id = post.get("id")?.clone();
        for (locale, title) in [("en", en), ("hu", hu)] {
            let mut translation = translations.create();
            translation.set_all(
                [
                    ("post_id", id.clone()),
                    ("locale", DatabaseValue::from(locale)),
                    ("title", DatabaseValue::from(title)),
                ],
                &[],
            )?;
            translations.save(&mut translation)?;
        }
        println!("  #{id} by {author}");
    }

    let translation = Arc::new(Translation::from_config(config.translation.as_ref()));
    let query = Query::new(posts.clone(), translation.clone())
        .with_text_search(["posts.author", "post_translations.title"]);

    let fields = [
        SelectField::column("id"),
        SelectField::column("author"),
        SelectField::column("title"),
    ];

    println!("\nPosts by ada:");
    let options = QueryOptions::new().with("text", "ada");
    print_records(&query.find(Some(&fields), &options)?);
    println!("Total: {}", query.find_count(&options)?);

    println!("\nSearching for a literal '%':");
    print_records(&query.find(Some(&fields), &QueryOptions::new().with("text", "100%"))?);

    println!("\nSecond page of two, newest first:");
    let options = QueryOptions::new()
        .with("order_by", "id")
        .with("order_dir", "desc")
        .with("page", 1)
        .with("page_size", 2);
    print_records(&query.find(Some(&fields), &options)?);

    let locale = translation.resolve_locale(Some("hu-HU,hu;q=0.9"), None);
    println!("\nSame page in '{locale}':");
    print_records(&query.find(Some(&fields), &options)?);

    if let Some(post) = query.find_by_id(3, true)? {
        println!("\nPost #3: {}", post.get("title")?);
    }

    if let Some(mut post) = query.find_by_id(2, false)? {
        post.set("author", "grace hopper")?;
        posts.save(&mut post)?;
        println!("Renamed the author of post #2");
    }

    let deleted = posts.delete_by_id(4)?;
    println!("\nDeleted {deleted} post(s), {} left", query.find_count(&QueryOptions::new())?);

    Ok(())
}

fn print_records(records: &[Record]) {
    if records.is_empty() {
        println!("  (none)");
    }

    for record in records {
        let line = record
            .fields()
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(", ");
        println!("  {line}");
        rowkit_logging::debug_or_trace!(
            ("print_records: {} fields", record.fields().len()),
            ("print_records: {record:?}")
        );
    }
}
