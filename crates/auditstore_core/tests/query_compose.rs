mod common;

use auditstore_core::{
    AuditRepository, Auditable, CancellationToken, DbContext, Direction, Filter, RepoError,
    Repository,
};
use common::{open_context, Author, Book};

async fn seed(ctx: &DbContext) -> (Repository<Author>, Repository<Book>) {
    let authors = Repository::<Author>::try_new(ctx).unwrap();
    let books = Repository::<Book>::try_new(ctx).unwrap();
    let token = CancellationToken::new();

    for (name, email) in [
        ("ada", Some("ada@example.com")),
        ("brian", None),
        ("carol", Some("carol@example.com")),
    ] {
        let author = match email {
            Some(email) => Author::with_email(name, email),
            None => Author::new(name),
        };
        authors.add(author, &token).await.unwrap();
    }
    let report = ctx.save_changes(&token).await.unwrap();
    let ids = report.inserted_ids("authors");

    books.add(Book::new(ids[0], "engines", 120), &token).await.unwrap();
    books.add(Book::new(ids[0], "notes", 80), &token).await.unwrap();
    books.add(Book::new(ids[2], "compilers", 300), &token).await.unwrap();
    assert!(books.save(&token).await.unwrap());

    (authors, books)
}

#[tokio::test]
async fn select_all_is_not_executed_until_materialized() {
    let ctx = open_context();
    let repo = Repository::<Author>::try_new(&ctx).unwrap();
    let token = CancellationToken::new();

    let query = repo
        .select_all(Some(Filter::like("name", "late%")), &[], &token)
        .await
        .unwrap();

    repo.add(Author::new("latecomer"), &token).await.unwrap();
    repo.save(&token).await.unwrap();

    let rows = query.to_list(&token).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, "latecomer");
}

#[tokio::test]
async fn select_all_without_filter_matches_everything_in_id_order() {
    let ctx = open_context();
    let (authors, _) = seed(&ctx).await;
    let token = CancellationToken::new();

    let rows = authors
        .select_all(None, &[], &token)
        .await
        .unwrap()
        .to_list(&token)
        .await
        .unwrap();
    let names: Vec<&str> = rows.iter().map(|author| author.name.as_str()).collect();
    assert_eq!(names, vec!["ada", "brian", "carol"]);
    assert!(rows.windows(2).all(|pair| pair[0].id() < pair[1].id()));
}

#[tokio::test]
async fn select_returns_first_match_in_natural_order() {
    let ctx = open_context();
    let (authors, _) = seed(&ctx).await;
    let token = CancellationToken::new();

    let first = authors
        .select(Some(Filter::is_not_null("email")), &[], &token)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.name, "ada");

    let none = authors
        .select(Some(Filter::eq_text("name", "nobody")), &[], &token)
        .await
        .unwrap();
    assert!(none.is_none());
}

#[tokio::test]
async fn includes_eager_load_related_rows() {
    let ctx = open_context();
    let (authors, _) = seed(&ctx).await;
    let token = CancellationToken::new();

    let ada = authors
        .select(Some(Filter::eq_text("name", "ada")), &["books"], &token)
        .await
        .unwrap()
        .unwrap();
    let titles: Vec<&str> = ada.books.iter().map(|book| book.title.as_str()).collect();
    assert_eq!(titles, vec!["engines", "notes"]);
    assert!(ada.books.iter().all(|book| book.author_id == ada.id()));

    let brian = authors
        .select(Some(Filter::eq_text("name", "brian")), &["books"], &token)
        .await
        .unwrap()
        .unwrap();
    assert!(brian.books.is_empty());

    let without_include = authors
        .select(Some(Filter::eq_text("name", "ada")), &[], &token)
        .await
        .unwrap()
        .unwrap();
    assert!(without_include.books.is_empty());
}

#[tokio::test]
async fn unknown_relation_fails_at_composition() {
    let ctx = open_context();
    let repo = Repository::<Author>::try_new(&ctx).unwrap();
    let token = CancellationToken::new();

    let err = repo
        .select_all(None, &["reviews"], &token)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::UnknownRelation { table: "authors", relation } if relation == "reviews"
    ));
}

#[tokio::test]
async fn unknown_column_fails_at_composition() {
    let ctx = open_context();
    let repo = Repository::<Author>::try_new(&ctx).unwrap();
    let token = CancellationToken::new();

    let err = repo
        .select_all(Some(Filter::eq("nickname", 1)), &[], &token)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::UnknownColumn { column, .. } if column == "nickname"));
}

#[tokio::test]
async fn ordering_and_paging_compose_on_the_query() {
    let ctx = open_context();
    let (_, books) = seed(&ctx).await;
    let token = CancellationToken::new();

    let query = books
        .select_all(Some(Filter::ge("pages", 80)), &[], &token)
        .await
        .unwrap()
        .order_by("pages", Direction::Desc);

    let page = query.clone().limit(2).offset(1).to_list(&token).await.unwrap();
    let titles: Vec<&str> = page.iter().map(|book| book.title.as_str()).collect();
    assert_eq!(titles, vec!["engines", "notes"]);

    assert_eq!(query.count(&token).await.unwrap(), 3);
    assert_eq!(query.clone().offset(2).count(&token).await.unwrap(), 1);
    assert!(query.any(&token).await.unwrap());
    assert_eq!(
        query.first(&token).await.unwrap().map(|book| book.title),
        Some("compilers".to_string())
    );
}

#[tokio::test]
async fn filters_combine_and_match_audit_columns() {
    let ctx = open_context();
    let (authors, _) = seed(&ctx).await;
    let token = CancellationToken::new();

    let untouched = authors
        .select_all(Some(Filter::is_null("modified_at")), &[], &token)
        .await
        .unwrap();
    assert_eq!(untouched.count(&token).await.unwrap(), 3);

    let narrowed = untouched
        .filter(Filter::eq_text("name", "ada").or(Filter::eq_text("name", "carol")))
        .filter(!Filter::is_null("email"));
    assert_eq!(narrowed.count(&token).await.unwrap(), 2);

    let none = authors
        .select_all(Some(Filter::in_list("name", Vec::<String>::new())), &[], &token)
        .await
        .unwrap();
    assert!(!none.any(&token).await.unwrap());
}

#[tokio::test]
async fn includes_load_children_for_many_parents() {
    let ctx = open_context();
    let authors = Repository::<Author>::try_new(&ctx).unwrap();
    let books = Repository::<Book>::try_new(&ctx).unwrap();
    let token = CancellationToken::new();

    for index in 0..1_200 {
        authors
            .add(Author::new(&format!("author-{index}")), &token)
            .await
            .unwrap();
    }
    let ids = ctx.save_changes(&token).await.unwrap().inserted_ids("authors");
    let first = ids[0];
    let last = ids[ids.len() - 1];

    books.add(Book::new(last, "last-a", 10), &token).await.unwrap();
    books.add(Book::new(first, "first", 20), &token).await.unwrap();
    books.add(Book::new(last, "last-b", 30), &token).await.unwrap();
    books.save(&token).await.unwrap();

    let loaded = authors
        .select_all(None, &["books"], &token)
        .await
        .unwrap()
        .to_list(&token)
        .await
        .unwrap();
    assert_eq!(loaded.len(), 1_200);

    let first_titles: Vec<&str> = loaded[0].books.iter().map(|book| book.title.as_str()).collect();
    assert_eq!(first_titles, vec!["first"]);
    let last_titles: Vec<&str> = loaded[1_199]
        .books
        .iter()
        .map(|book| book.title.as_str())
        .collect();
    assert_eq!(last_titles, vec!["last-a", "last-b"]);
    assert_eq!(
        loaded.iter().map(|author| author.books.len()).sum::<usize>(),
        3
    );
}

#[tokio::test]
async fn oversized_in_list_fails_at_composition() {
    let ctx = open_context();
    let repo = Repository::<Author>::try_new(&ctx).unwrap();
    let token = CancellationToken::new();

    let err = repo
        .select_all(Some(Filter::in_list("id", 0..40_000_i64)), &[], &token)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidQuery(message) if message.contains("40000")));
}
