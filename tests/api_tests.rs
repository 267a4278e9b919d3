//! API client behavior against a mock Bitbucket server.

mod common;

use common::{client, client_for, page, repo_json};
use repovault::models::AccountKind;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn pagination_follows_next_until_exhausted() {
    let server = MockServer::start().await;

    let page_two = format!("{}/repositories/acme?page=2", server.uri());
    let page_three = format!("{}/repositories/acme?page=3", server.uri());

    Mock::given(method("GET"))
        .and(path("/repositories/acme"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![repo_json("acme", "beta")],
            Some(page_three.clone()),
        )))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repositories/acme"))
        .and(query_param("page", "3"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page(vec![repo_json("acme", "gamma")], None)),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repositories/acme"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![repo_json("acme", "alpha")],
            Some(page_two),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let repos = client(&server.uri())
        .list_repositories("acme")
        .await
        .expect("three pages");

    let slugs: Vec<_> = repos.iter().map(|r| r.slug.as_str()).collect();
    assert_eq!(slugs, vec!["alpha", "beta", "gamma"]);
}

#[tokio::test]
async fn transient_500_is_retried_then_succeeds() {
    let server = MockServer::start().await;

    // First attempt fails, the mock expires, the fallback answers
    Mock::given(method("GET"))
        .and(path("/repositories/acme"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repositories/acme"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page(vec![repo_json("acme", "alpha")], None)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let repos = client(&server.uri())
        .list_repositories("acme")
        .await
        .expect("recovers after retry");
    assert_eq!(repos.len(), 1);
}

#[tokio::test]
async fn unauthorized_is_never_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server.uri())
        .current_user()
        .await
        .expect_err("401 is fatal");
    assert!(err.is_account_fatal());
    // expect(1) on the mock verifies no second request was made
}

#[tokio::test]
async fn rate_limit_honors_retry_after_then_recovers() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "username": "backup-bot",
            "display_name": "Backup Bot"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let user = client(&server.uri())
        .current_user()
        .await
        .expect("recovers after rate limit");
    assert_eq!(user.username, "backup-bot");
}

#[tokio::test]
async fn missing_repository_maps_to_none() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repositories/acme/ghost"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let repo = client(&server.uri())
        .get_repository("acme", "ghost")
        .await
        .expect("404 is not an error here");
    assert!(repo.is_none());
}

#[tokio::test]
async fn workspace_listing_carries_permissions() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/user/permissions/workspaces"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![json!({
                "permission": "owner",
                "workspace": { "slug": "acme", "name": "Acme Inc" }
            })],
            None,
        )))
        .mount(&server)
        .await;

    let workspaces = client(&server.uri())
        .list_workspaces()
        .await
        .expect("workspace listing");
    assert_eq!(workspaces.len(), 1);
    assert_eq!(workspaces[0].slug, "acme");
    assert_eq!(workspaces[0].permission.as_deref(), Some("owner"));
    assert_eq!(workspaces[0].account, AccountKind::Source);
}

#[tokio::test]
async fn workspaces_are_stamped_with_the_owning_account() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/user/permissions/workspaces"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![json!({
                "permission": "member",
                "workspace": { "slug": "new-team", "name": "New Team" }
            })],
            None,
        )))
        .mount(&server)
        .await;

    let workspaces = client_for(&server.uri(), AccountKind::Destination)
        .list_workspaces()
        .await
        .expect("workspace listing");
    assert_eq!(workspaces[0].account, AccountKind::Destination);
}
