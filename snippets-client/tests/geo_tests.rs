//! Country lookup against a local stub geolocation service

use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use snippets_client::geo::{load_cached_country, save_cached_country, CachedCountry, CountryResolver, GeoClient};
use snippets_client::HostFactCache;
use snippets_common::{db, time};
use std::net::SocketAddr;
use std::time::Duration;

async fn spawn_service(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn country_service(code: &'static str) -> SocketAddr {
    spawn_service(Router::new().route(
        "/v1/country",
        get(move || async move { Json(json!({"country_code": code, "country_name": "x"})) }),
    ))
    .await
}

async fn failing_service() -> SocketAddr {
    spawn_service(Router::new().route(
        "/v1/country",
        get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
    ))
    .await
}

fn client(addr: SocketAddr) -> GeoClient {
    GeoClient::new(format!("http://{}/v1/country", addr), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_fetch_lowercases_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let pool = db::init_database(&dir.path().join("snippets.db")).await.unwrap();
    let addr = country_service("FR").await;

    let resolver = CountryResolver::new(Some(client(addr)), Some(pool.clone()), chrono::Duration::days(30));
    let facts = HostFactCache::default();
    let lookup = resolver.resolve(&facts).await.expect("lookup should start");
    lookup.await.unwrap();

    assert_eq!(facts.snapshot().await.country.as_deref(), Some("fr"));
    let cached = load_cached_country(&pool).await.unwrap();
    assert_eq!(cached.country, "fr");
}

#[tokio::test]
async fn test_fresh_cache_skips_network() {
    let dir = tempfile::tempdir().unwrap();
    let pool = db::init_database(&dir.path().join("snippets.db")).await.unwrap();
    save_cached_country(
        &pool,
        &CachedCountry {
            country: "it".to_string(),
            updated: time::now() - chrono::Duration::days(29),
        },
    )
    .await
    .unwrap();

    // A failing service proves the cache answered
    let addr = failing_service().await;
    let resolver = CountryResolver::new(Some(client(addr)), Some(pool), chrono::Duration::days(30));
    let facts = HostFactCache::default();

    assert!(resolver.resolve(&facts).await.is_none());
    assert_eq!(facts.snapshot().await.country.as_deref(), Some("it"));
}

#[tokio::test]
async fn test_expired_cache_refetches() {
    let dir = tempfile::tempdir().unwrap();
    let pool = db::init_database(&dir.path().join("snippets.db")).await.unwrap();
    save_cached_country(
        &pool,
        &CachedCountry {
            country: "it".to_string(),
            updated: time::now() - chrono::Duration::days(31),
        },
    )
    .await
    .unwrap();

    let addr = country_service("ES").await;
    let resolver = CountryResolver::new(Some(client(addr)), Some(pool.clone()), chrono::Duration::days(30));
    let facts = HostFactCache::default();

    // Unknown until the lookup lands
    let lookup = resolver.resolve(&facts).await.expect("expired cache should refetch");
    lookup.await.unwrap();
    assert_eq!(facts.snapshot().await.country.as_deref(), Some("es"));
    assert_eq!(load_cached_country(&pool).await.unwrap().country, "es");
}

#[tokio::test]
async fn test_service_failure_leaves_country_unknown() {
    let dir = tempfile::tempdir().unwrap();
    let pool = db::init_database(&dir.path().join("snippets.db")).await.unwrap();
    let addr = failing_service().await;

    let resolver = CountryResolver::new(Some(client(addr)), Some(pool.clone()), chrono::Duration::days(30));
    let facts = HostFactCache::default();
    resolver.resolve(&facts).await.unwrap().await.unwrap();

    assert_eq!(facts.snapshot().await.country, None);
    assert!(load_cached_country(&pool).await.is_none());
}

#[tokio::test]
async fn test_missing_country_code_is_parse_error() {
    let addr = spawn_service(Router::new().route(
        "/v1/country",
        get(|| async { Json(json!({"country_name": "Nowhere"})) }),
    ))
    .await;

    assert!(client(addr).fetch_country().await.is_err());
}

#[tokio::test]
async fn test_unreachable_service_times_out() {
    // Accepts connections but never answers
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let slow = GeoClient::new(format!("http://{}/v1/country", addr), Duration::from_millis(200)).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), slow.fetch_country()).await;
    assert!(result.expect("client timeout should fire first").is_err());
}
