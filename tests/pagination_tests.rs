mod common;

use std::collections::BTreeSet;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::{Reading, User, query, reading, user};
use memorepo::pagination::split_token;
use memorepo::{END_OF_LIST, Identifiers, QueryPack, Repository, RepositoryConfig};

async fn collect_pages<E: memorepo::Entity>(
    repository: &Repository<E>,
    identifiers: &Identifiers,
    pack: &QueryPack,
) -> Vec<Vec<E>> {
    let mut pages = Vec::new();
    let mut current = pack.clone();
    loop {
        let result = repository.read_all(identifiers, &current).await.unwrap();
        let next = result.item_list.page_tokens.next.clone();
        pages.push(result.item_list.items);
        if next == END_OF_LIST {
            break;
        }
        current = pack.with_page_token(Some(&next));
        assert!(pages.len() < 50, "pagination did not terminate");
    }
    pages
}

#[tokio::test]
async fn test_root_scan_chains_to_end_of_list() {
    let repository = Repository::<User>::in_memory(RepositoryConfig::default()).await.unwrap();
    let all: Vec<User> = (0..23).map(|i| user(&format!("u{:02}", i), 18 + i, "NO")).collect();
    repository.create(all).await.unwrap();

    let pack = repository.query_pack("/users", &query(&[("limit", "5")]), None).unwrap();
    let pages = collect_pages(&repository, &Identifiers::root(), &pack).await;

    assert_eq!(pages.len(), 5);
    assert_eq!(pages.last().map(Vec::len), Some(3));
    let ids: Vec<String> = pages.iter().flatten().map(|u| u.id.clone()).collect();
    let unique: BTreeSet<&String> = ids.iter().collect();
    assert_eq!(ids.len(), 23);
    assert_eq!(unique.len(), 23);

    // Default direction is descending on the hash key.
    assert_eq!(ids.first().map(String::as_str), Some("u22"));
    assert_eq!(ids.last().map(String::as_str), Some("u00"));
}

#[tokio::test]
async fn test_index_query_chains_across_equal_range_values() {
    let repository = Repository::<Reading>::in_memory(RepositoryConfig::default()).await.unwrap();
    let readings = (1..=12).map(|seq| reading("d1", seq, (seq % 3) as f64)).collect();
    repository.create(readings).await.unwrap();

    let q = query(&[("orderBy", r#"{"field":"temperature","direction":"asc"}"#), ("limit", "4")]);
    let pack = repository.query_pack("/readings", &q, None).unwrap();
    let pages = collect_pages(&repository, &Identifiers::hash("d1"), &pack).await;

    assert_eq!(pages.len(), 3);
    let visited: Vec<(f64, i64)> = pages.iter().flatten().map(|r| (r.temperature, r.seq)).collect();
    let seqs: BTreeSet<i64> = visited.iter().map(|(_, s)| *s).collect();
    assert_eq!(seqs.len(), 12);
    assert!(visited.windows(2).all(|w| w[0].0 <= w[1].0));
}

#[tokio::test]
async fn test_next_token_carries_self_of_the_page_that_made_it() {
    let repository = Repository::<User>::in_memory(RepositoryConfig::default()).await.unwrap();
    repository
        .create((0..6).map(|i| user(&format!("p{}", i), 20 + i, "SE")).collect())
        .await
        .unwrap();

    let pack = repository.query_pack("/users", &query(&[("limit", "2")]), None).unwrap();
    let first = repository.read_all(&Identifiers::root(), &pack).await.unwrap();
    let first_next = first.next_token().unwrap().to_string();
    let (self_part, first_payload) = split_token(&first_next).unwrap();
    assert_eq!(self_part, "null");

    let second = repository
        .read_all(&Identifiers::root(), &pack.with_page_token(Some(&first_next)))
        .await
        .unwrap();
    assert_eq!(second.item_list.page_tokens.self_token, first_payload);
    assert!(second.item_list.page_tokens.previous.is_some());

    let (second_self, _) = split_token(second.next_token().unwrap()).unwrap();
    assert_eq!(second_self, first_payload);
}

#[tokio::test]
async fn test_unpaginated_read_follows_every_page() {
    let repository = Repository::<User>::in_memory(RepositoryConfig::default().max_limit(4)).await.unwrap();
    repository
        .create((0..11).map(|i| user(&format!("w{:02}", i), 30, "DK")).collect())
        .await
        .unwrap();

    let pack = repository.query_pack("/users", &query(&[]), None).unwrap();
    let all = repository
        .read_all_without_pagination(&Identifiers::root(), &pack)
        .await
        .unwrap();
    assert_eq!(all.len(), 11);
}

#[tokio::test]
async fn test_mistyped_token_restarts_from_first_page() {
    let repository = Repository::<Reading>::in_memory(RepositoryConfig::default()).await.unwrap();
    repository
        .create((1..=5).map(|seq| reading("d1", seq, 20.0)).collect())
        .await
        .unwrap();

    let payload = URL_SAFE_NO_PAD.encode(r#"{"hash":"d1","range":"abc"}"#);
    let token = URL_SAFE_NO_PAD.encode(format!("null:{}", payload));
    let pack = repository
        .query_pack("/readings", &query(&[("limit", "2"), ("pageToken", token.as_str())]), None)
        .unwrap();

    let result = repository.read_all(&Identifiers::hash("d1"), &pack).await.unwrap();
    let seqs: Vec<i64> = result.items().iter().map(|r| r.seq).collect();
    assert_eq!(seqs, vec![1, 2]);
}
