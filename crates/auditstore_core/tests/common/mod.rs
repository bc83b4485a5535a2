#![allow(dead_code)]

use auditstore_core::{
    load_where_in, AuditMetadata, Auditable, ContextOptions, DbContext, Entity, EntityId,
    Migration, RepoResult,
};
use rusqlite::types::Value;
use rusqlite::{Connection, Row};

pub const ACTOR: &str = "tester";

pub const MIGRATIONS: &[Migration] = &[
    Migration::new(
        1,
        "CREATE TABLE authors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at INTEGER NOT NULL,
            created_by TEXT,
            modified_at INTEGER,
            modified_by TEXT,
            name TEXT NOT NULL,
            email TEXT
        );",
    ),
    Migration::new(
        2,
        "CREATE TABLE books (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at INTEGER NOT NULL,
            created_by TEXT,
            modified_at INTEGER,
            modified_by TEXT,
            author_id INTEGER NOT NULL REFERENCES authors(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            pages INTEGER NOT NULL
        );",
    ),
];

macro_rules! auditable {
    ($ty:ty) => {
        impl Auditable for $ty {
            fn id(&self) -> EntityId {
                self.id
            }
            fn set_id(&mut self, id: EntityId) {
                self.id = id;
            }
            fn audit(&self) -> &AuditMetadata {
                &self.audit
            }
            fn audit_mut(&mut self) -> &mut AuditMetadata {
                &mut self.audit
            }
        }
    };
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Author {
    pub id: EntityId,
    pub audit: AuditMetadata,
    pub name: String,
    pub email: Option<String>,
    pub books: Vec<Book>,
}

impl Author {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_email(name: &str, email: &str) -> Self {
        Self {
            email: Some(email.to_string()),
            ..Self::new(name)
        }
    }
}

auditable!(Author);

impl Entity for Author {
    const TABLE: &'static str = "authors";
    const COLUMNS: &'static [&'static str] = &["name", "email"];
    const RELATIONS: &'static [&'static str] = &["books"];

    fn values(&self) -> Vec<Value> {
        vec![self.name.clone().into(), self.email.clone().into()]
    }

    fn from_row(row: &Row<'_>) -> RepoResult<Self> {
        Ok(Self {
            name: row.get("name")?,
            email: row.get("email")?,
            ..Self::default()
        })
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("author name cannot be empty".to_string());
        }
        Ok(())
    }

    fn load_relation(conn: &Connection, relation: &str, entities: &mut [Self]) -> RepoResult<()> {
        debug_assert_eq!(relation, "books");
        let ids: Vec<EntityId> = entities.iter().map(|author| author.id).collect();
        let books = load_where_in::<Book>(conn, "author_id", &ids)?;
        for author in entities.iter_mut() {
            author.books = books
                .iter()
                .filter(|book| book.author_id == author.id)
                .cloned()
                .collect();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Book {
    pub id: EntityId,
    pub audit: AuditMetadata,
    pub author_id: EntityId,
    pub title: String,
    pub pages: i64,
}

impl Book {
    pub fn new(author_id: EntityId, title: &str, pages: i64) -> Self {
        Self {
            author_id,
            title: title.to_string(),
            pages,
            ..Self::default()
        }
    }
}

auditable!(Book);

impl Entity for Book {
    const TABLE: &'static str = "books";
    const COLUMNS: &'static [&'static str] = &["author_id", "title", "pages"];

    fn values(&self) -> Vec<Value> {
        vec![
            self.author_id.into(),
            self.title.clone().into(),
            self.pages.into(),
        ]
    }

    fn from_row(row: &Row<'_>) -> RepoResult<Self> {
        Ok(Self {
            author_id: row.get("author_id")?,
            title: row.get("title")?,
            pages: row.get("pages")?,
            ..Self::default()
        })
    }

    fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("book title cannot be empty".to_string());
        }
        if self.pages < 0 {
            return Err(format!("page count {} is negative", self.pages));
        }
        Ok(())
    }
}

/// Entity whose table is never migrated.
#[derive(Debug, Clone, Default)]
pub struct Orphan {
    pub id: EntityId,
    pub audit: AuditMetadata,
}

auditable!(Orphan);

impl Entity for Orphan {
    const TABLE: &'static str = "orphans";
    const COLUMNS: &'static [&'static str] = &[];

    fn values(&self) -> Vec<Value> {
        Vec::new()
    }

    fn from_row(_row: &Row<'_>) -> RepoResult<Self> {
        Ok(Self::default())
    }
}

/// Mapping that claims a context-managed audit column.
#[derive(Debug, Clone, Default)]
pub struct ShadowedAudit {
    pub id: EntityId,
    pub audit: AuditMetadata,
}

auditable!(ShadowedAudit);

impl Entity for ShadowedAudit {
    const TABLE: &'static str = "authors";
    const COLUMNS: &'static [&'static str] = &["name", "created_at"];

    fn values(&self) -> Vec<Value> {
        vec![Value::Null, Value::Null]
    }

    fn from_row(_row: &Row<'_>) -> RepoResult<Self> {
        Ok(Self::default())
    }
}

pub fn open_context() -> DbContext {
    DbContext::open_in_memory(MIGRATIONS, ContextOptions::default().with_actor(ACTOR)).unwrap()
}
