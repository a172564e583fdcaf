mod common;

use common::{User, query, reading, user, users, Reading};
use memorepo::etag::fold_etags;
use memorepo::query::{KeyOperator, compile_query};
use memorepo::{END_OF_LIST, ETaggable, Identifiers, Keyed, Repository, RepositoryConfig, RepositoryError};

async fn user_repository() -> Repository<User> {
    let repository = Repository::<User>::in_memory(RepositoryConfig::default()).await.unwrap();
    repository.create(users()).await.unwrap();
    repository
}

async fn reading_repository() -> Repository<Reading> {
    let repository = Repository::<Reading>::in_memory(RepositoryConfig::default()).await.unwrap();
    let readings = (1..=6)
        .map(|seq| reading("d1", seq, 10.0 + (seq % 4) as f64))
        .chain((1..=3).map(|seq| reading("d2", seq, 30.0)))
        .collect();
    repository.create(readings).await.unwrap();
    repository
}

#[tokio::test]
async fn test_country_listing_ordered_by_age() {
    let repository = user_repository().await;
    let q = query(&[
        ("country", "NO"),
        ("orderBy", r#"{"field":"age","direction":"asc"}"#),
        ("limit", "2"),
    ]);
    let pack = repository.query_pack("/users", &q, None).unwrap();

    let result = repository.read_all(&Identifiers::root(), &pack).await.unwrap();
    let ids: Vec<&str> = result.items().iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec!["bo", "di"]);
    assert!(!result.cache_hit);

    let tokens = &result.item_list.page_tokens;
    assert_ne!(tokens.next, END_OF_LIST);
    assert_eq!(tokens.self_token, "null");

    let expected = fold_etags(result.items().iter().filter_map(|u| u.etag()));
    assert_eq!(result.item_list.etag, expected);
}

#[tokio::test]
async fn test_listing_is_served_from_cache_until_a_write() {
    let repository = user_repository().await;
    let pack = repository.query_pack("/users", &query(&[("limit", "3")]), None).unwrap();

    let first = repository.read_all(&Identifiers::root(), &pack).await.unwrap();
    let second = repository.read_all(&Identifiers::root(), &pack).await.unwrap();
    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.item_list.etag, second.item_list.etag);

    repository.create(vec![user("zz", 20, "NO")]).await.unwrap();
    let third = repository.read_all(&Identifiers::root(), &pack).await.unwrap();
    assert!(!third.cache_hit);
}

#[tokio::test]
async fn test_list_etag_matches_request_etag() {
    let repository = user_repository().await;
    let q = query(&[("limit", "3")]);
    let pack = repository.query_pack("/users", &q, None).unwrap();
    let etag = repository.read_all(&Identifiers::root(), &pack).await.unwrap().item_list.etag;

    let conditional = repository.query_pack("/users", &q, Some(&etag)).unwrap();
    assert!(repository.list_etag_matches(&Identifiers::root(), &conditional).await.unwrap());

    let stale = repository.query_pack("/users", &q, Some("0000000000000001")).unwrap();
    assert!(!repository.list_etag_matches(&Identifiers::root(), &stale).await.unwrap());
}

#[tokio::test]
async fn test_ids_keep_requested_order() {
    let repository = user_repository().await;
    let pack = repository
        .query_pack("/users", &query(&[("ids", r#"["cy","ada","bo"]"#)]), None)
        .unwrap();

    let result = repository.read_all(&Identifiers::root(), &pack).await.unwrap();
    let ids: Vec<&str> = result.items().iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec!["cy", "ada", "bo"]);
    assert!(!result.item_list.page_tokens.has_next());
}

#[tokio::test]
async fn test_ranged_ids_are_range_values_under_the_hash() {
    let repository = reading_repository().await;
    let pack = repository
        .query_pack("/readings", &query(&[("ids", r#"["3","1","2"]"#), ("limit", "2")]), None)
        .unwrap();

    let first = repository.read_all(&Identifiers::hash("d1"), &pack).await.unwrap();
    let seqs: Vec<i64> = first.items().iter().map(|r| r.seq).collect();
    assert_eq!(seqs, vec![3, 1]);

    let next = pack.with_page_token(first.next_token());
    let second = repository.read_all(&Identifiers::hash("d1"), &next).await.unwrap();
    let seqs: Vec<i64> = second.items().iter().map(|r| r.seq).collect();
    assert_eq!(seqs, vec![2]);

    let root = repository.read_all(&Identifiers::root(), &pack).await;
    assert!(matches!(root, Err(RepositoryError::IllegalArgument(_))));
}

#[tokio::test]
async fn test_inclusive_range_becomes_key_condition() {
    let schema = User::schema().unwrap();
    let repository = user_repository().await;
    let pack = repository
        .query_pack("/users", &query(&[("age", r#"{"ge":18,"le":65}"#)]), None)
        .unwrap();

    let compiled = compile_query(&schema, pack.params(), Some("age")).unwrap();
    let key = compiled.key_condition.unwrap();
    assert_eq!(key.field, "age");
    assert_eq!(key.operator, KeyOperator::Between(17.into(), 66.into()));
    assert!(compiled.filter.is_none());

    let scan = compile_query(&schema, pack.params(), None).unwrap();
    assert!(scan.key_condition.is_none());
    assert!(scan.filter.is_some());
}

#[tokio::test]
async fn test_hash_listing_uses_key_conditions() {
    let repository = reading_repository().await;
    let q = query(&[
        ("temperature", r#"{"gt":10.5}"#),
        ("orderBy", r#"{"field":"temperature","direction":"asc"}"#),
    ]);
    let pack = repository.query_pack("/readings", &q, None).unwrap();

    let result = repository.read_all(&Identifiers::hash("d1"), &pack).await.unwrap();
    let temps: Vec<f64> = result.items().iter().map(|r| r.temperature).collect();
    assert_eq!(temps, vec![11.0, 11.0, 12.0, 12.0, 13.0]);
    assert!(result.items().iter().all(|r| r.device == "d1"));
}

#[tokio::test]
async fn test_illegal_ranged_filter_scans_one_hash() {
    let repository = reading_repository().await;
    let q = query(&[
        ("temperature", r#"{"ne":10.0}"#),
        ("orderBy", r#"{"field":"temperature","direction":"asc"}"#),
        ("limit", "3"),
    ]);
    let pack = repository.query_pack("/readings", &q, None).unwrap();

    let first = repository.read_all(&Identifiers::hash("d1"), &pack).await.unwrap();
    assert!(first.items().iter().all(|r| r.device == "d1"));
    let temps: Vec<f64> = first.items().iter().map(|r| r.temperature).collect();
    assert_eq!(temps, vec![11.0, 11.0, 12.0]);

    let second = repository
        .read_all(&Identifiers::hash("d1"), &pack.with_page_token(first.next_token()))
        .await
        .unwrap();
    let temps: Vec<f64> = second.items().iter().map(|r| r.temperature).collect();
    assert_eq!(temps, vec![12.0, 13.0]);
    assert!(!second.item_list.page_tokens.has_next());
}

#[tokio::test]
async fn test_single_read_and_projection() {
    let repository = user_repository().await;

    let full = repository.read(&Identifiers::hash("ada"), false, &[]).await.unwrap();
    assert_eq!(full.item.age, 36);
    assert!(full.cache_hit, "creates populate the object cache");

    let projections = vec!["age".to_string()];
    let projected = repository.read(&Identifiers::hash("cy"), true, &projections).await.unwrap();
    assert!(!projected.cache_hit);
    assert_eq!(projected.item.age, 52);
    assert_eq!(projected.item.email, "");

    let etag = full.item.etag.clone().unwrap();
    assert!(repository.item_etag_matches(&Identifiers::hash("ada"), &etag).await.unwrap());
}

#[tokio::test]
async fn test_missing_record_is_not_found() {
    let repository = user_repository().await;
    let err = repository.read(&Identifiers::hash("nobody"), false, &[]).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_hash_only_read_of_ranged_entity_returns_first_range() {
    let repository = reading_repository().await;
    let result = repository.read(&Identifiers::hash("d2"), false, &[]).await.unwrap();
    assert_eq!(result.item.seq, 1);

    let exact = repository
        .read(&Identifiers::hash("d1").with_range("4"), false, &[])
        .await
        .unwrap();
    assert_eq!(exact.item.temperature, 10.0);
}

#[tokio::test]
async fn test_hash_only_read_follows_new_lower_range() {
    let repository = Repository::<Reading>::in_memory(RepositoryConfig::default()).await.unwrap();
    repository
        .create(vec![reading("d1", 1, 11.0), reading("d1", 2, 12.0), reading("d1", 3, 13.0)])
        .await
        .unwrap();

    let first = repository.read(&Identifiers::hash("d1"), false, &[]).await.unwrap();
    assert_eq!(first.item.seq, 1);
    assert!(repository.read(&Identifiers::hash("d1"), false, &[]).await.unwrap().cache_hit);

    repository.create(vec![reading("d1", 0, 10.0)]).await.unwrap();
    let after = repository.read(&Identifiers::hash("d1"), false, &[]).await.unwrap();
    assert!(!after.cache_hit);
    assert_eq!(after.item.seq, 0);
}

#[tokio::test]
async fn test_batch_read_keeps_order() {
    let repository = user_repository().await;
    let wanted = [Identifiers::hash("cy"), Identifiers::hash("ada"), Identifiers::hash("bo")];

    let first = repository.batch_read(&wanted, &[]).await.unwrap();
    let ages: Vec<i64> = first.iter().map(|r| r.item.age).collect();
    assert_eq!(ages, vec![52, 36, 19]);

    let second = repository.batch_read(&wanted, &[]).await.unwrap();
    assert!(second.iter().all(|r| r.cache_hit));

    let err = repository
        .batch_read(&[Identifiers::hash("ada"), Identifiers::hash("nobody")], &[])
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_ids_cursor_survives_deleted_last_seen_record() {
    let repository = user_repository().await;
    let pack = repository
        .query_pack("/users", &query(&[("ids", r#"["cy","ada","bo","di"]"#), ("limit", "2")]), None)
        .unwrap();

    let first = repository.read_all(&Identifiers::root(), &pack).await.unwrap();
    let ids: Vec<&str> = first.items().iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec!["cy", "ada"]);

    repository.delete(&[Identifiers::hash("ada")]).await.unwrap();

    let next = pack.with_page_token(first.next_token());
    let second = repository.read_all(&Identifiers::root(), &next).await.unwrap();
    let ids: Vec<&str> = second.items().iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec!["bo", "di"]);
}

#[tokio::test]
async fn test_explicit_gsi_identifier() {
    let repository = user_repository().await;
    let pack = repository.query_pack("/users", &query(&[("limit", "10")]), None).unwrap();
    let result = repository
        .read_all(&Identifiers::hash("SE").with_gsi("byCountry"), &pack)
        .await
        .unwrap();
    let mut ids: Vec<&str> = result.items().iter().map(|u| u.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["cy", "gu"]);
}

#[tokio::test]
async fn test_invalid_query_reports_every_error() {
    let repository = user_repository().await;
    let q = query(&[("limit", "0"), ("shoeSize", "42"), ("orderBy", r#"{"field":"email"}"#)]);
    match repository.query_pack("/users", &q, None) {
        Err(RepositoryError::Validation(errors)) => {
            assert!(errors.contains_key("limit_negative_error"));
            assert!(errors.contains_key("shoeSize_field_error"));
            assert!(errors.contains_key("orderBy_parameter_0_error"));
        }
        other => panic!("expected validation errors, got {:?}", other.map(|_| ())),
    }
}
