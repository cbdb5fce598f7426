use monitor_ingest::resolver::DedupResolver;
use monitor_ingest::schema::bootstrap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::PgPool;

async fn count(db: &PgPool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT count(*) FROM {table}"))
        .fetch_one(db)
        .await
        .unwrap()
}

type Columns = Vec<(String, String, String, String, Option<String>)>;
type Constraints = Vec<(String, String, String)>;
type Indexes = Vec<(String, String)>;

/// Everything bootstrap creates, in a comparable form.
async fn schema_snapshot(db: &PgPool) -> (Vec<String>, Columns, Constraints, Indexes) {
    let tables = sqlx::query_scalar(
        "SELECT table_name::text FROM information_schema.tables
         WHERE table_schema = current_schema() ORDER BY table_name",
    )
    .fetch_all(db)
    .await
    .unwrap();

    let columns = sqlx::query_as(
        "SELECT table_name::text, column_name::text, data_type::text, is_nullable::text,
                column_default::text
         FROM information_schema.columns
         WHERE table_schema = current_schema()
         ORDER BY table_name, ordinal_position",
    )
    .fetch_all(db)
    .await
    .unwrap();

    let constraints = sqlx::query_as(
        "SELECT conrelid::regclass::text, conname::text, pg_get_constraintdef(oid)
         FROM pg_constraint
         WHERE conrelid IN ('url'::regclass, 'pattern'::regclass, 'result'::regclass)
         ORDER BY 1, 2",
    )
    .fetch_all(db)
    .await
    .unwrap();

    let indexes = sqlx::query_as(
        "SELECT indexname::text, indexdef FROM pg_indexes
         WHERE schemaname = current_schema() ORDER BY indexname",
    )
    .fetch_all(db)
    .await
    .unwrap();

    (tables, columns, constraints, indexes)
}

#[sqlx::test(migrations = false)]
async fn test_bootstrap_is_idempotent(db: PgPool) {
    bootstrap(&db).await.expect("first bootstrap failed");
    let before = schema_snapshot(&db).await;
    assert_eq!(before.0, vec!["pattern", "result", "result_view", "url"]);

    bootstrap(&db).await.expect("second bootstrap failed");
    assert_eq!(schema_snapshot(&db).await, before);

    // Concurrent consumers starting up together
    let (a, b) = tokio::join!(bootstrap(&db), bootstrap(&db));
    a.unwrap();
    b.unwrap();
    assert_eq!(schema_snapshot(&db).await, before);
}

#[sqlx::test(migrations = false)]
async fn test_resolve_values_larger_than_an_index_entry(db: PgPool) {
    bootstrap(&db).await.unwrap();
    let noise: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9000)
        .map(char::from)
        .collect();
    let url = format!("http://localhost/?q={noise}");
    let pattern = format!("^{noise}");

    let mut first = DedupResolver::new(db.clone());
    let mut second = DedupResolver::new(db.clone());

    let id = first.resolve_url(&url).await.expect("failed to resolve long url");
    assert_eq!(second.resolve_url(&url).await.unwrap(), id);

    let pattern_id = first.resolve_pattern(Some(pattern.as_str())).await.unwrap();
    assert!(pattern_id.is_some());
    assert_eq!(
        second.resolve_pattern(Some(pattern.as_str())).await.unwrap(),
        pattern_id
    );

    // Differs only in its last character
    let shorter = first.resolve_url(&url[..url.len() - 1]).await.unwrap();
    assert_ne!(shorter, id);

    assert_eq!(count(&db, "url").await, 2);
    assert_eq!(count(&db, "pattern").await, 1);

    let stored: String = sqlx::query_scalar("SELECT url FROM url WHERE id = $1")
        .bind(id)
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(stored, url);
}

#[sqlx::test(migrations = false)]
async fn test_result_requires_matched_with_pattern(db: PgPool) {
    bootstrap(&db).await.unwrap();
    let mut resolver = DedupResolver::new(db.clone());
    let url_id = resolver.resolve_url("http://localhost/").await.unwrap();
    let pattern_id = resolver.resolve_pattern(Some("ok")).await.unwrap();

    let inconsistent = sqlx::query(
        "INSERT INTO result (url_id, response_time_ms, pattern_id, matched) VALUES ($1, 1, $2, NULL)",
    )
    .bind(url_id)
    .bind(pattern_id)
    .execute(&db)
    .await;
    assert!(inconsistent.is_err());

    let missing_url = sqlx::query("INSERT INTO result (url_id, response_time_ms) VALUES ($1, 1)")
        .bind(url_id + 1000)
        .execute(&db)
        .await;
    assert!(missing_url.is_err());
}

#[sqlx::test(migrations = false)]
async fn test_resolve_hits_database_once(db: PgPool) {
    bootstrap(&db).await.unwrap();
    let mut resolver = DedupResolver::new(db.clone());

    let first = resolver.resolve_url("http://localhost/").await.unwrap();
    let second = resolver.resolve_url("http://localhost/").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(resolver.lookups(), 1);

    let other = resolver.resolve_url("http://localhost/other").await.unwrap();
    assert_ne!(first, other);
    assert_eq!(resolver.lookups(), 2);

    assert_eq!(count(&db, "url").await, 2);
}

#[sqlx::test(migrations = false)]
async fn test_resolve_no_pattern_skips_database(db: PgPool) {
    bootstrap(&db).await.unwrap();
    let mut resolver = DedupResolver::new(db.clone());

    assert_eq!(resolver.resolve_pattern(None).await.unwrap(), None);
    assert_eq!(resolver.lookups(), 0);

    let id = resolver.resolve_pattern(Some("^ok")).await.unwrap();
    assert!(id.is_some());
    assert_eq!(resolver.resolve_pattern(Some("^ok")).await.unwrap(), id);
    assert_eq!(resolver.lookups(), 1);
    assert_eq!(count(&db, "pattern").await, 1);
}

#[sqlx::test(migrations = false)]
async fn test_resolvers_share_existing_rows(db: PgPool) {
    bootstrap(&db).await.unwrap();
    let mut first = DedupResolver::new(db.clone());
    let mut second = DedupResolver::new(db.clone());

    let id = first.resolve_url("http://localhost/").await.unwrap();
    assert_eq!(second.resolve_url("http://localhost/").await.unwrap(), id);
    assert_eq!(count(&db, "url").await, 1);
}

#[sqlx::test(migrations = false)]
async fn test_racing_resolvers_create_one_row(db: PgPool) {
    bootstrap(&db).await.unwrap();

    for round in 0..20 {
        let url = format!("http://localhost/{round}");
        let pattern = format!("pattern-{round}");
        let mut first = DedupResolver::new(db.clone());
        let mut second = DedupResolver::new(db.clone());

        let (a, b) = tokio::join!(first.resolve_url(&url), second.resolve_url(&url));
        assert_eq!(a.unwrap(), b.unwrap());

        let (a, b) = tokio::join!(
            first.resolve_pattern(Some(pattern.as_str())),
            second.resolve_pattern(Some(pattern.as_str()))
        );
        assert_eq!(a.unwrap(), b.unwrap());
    }

    assert_eq!(count(&db, "url").await, 20);
    assert_eq!(count(&db, "pattern").await, 20);
}
