//! Collaboration restore against a mock destination: flag gating and
//! attribution.

mod common;

use common::client;
use repovault::config::RestoreConfig;
use repovault::models::MetadataBundle;
use repovault::restore::CollaborationRestorer;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn bundle_with_issue_and_wiki() -> MetadataBundle {
    let mut bundle = MetadataBundle::new("acme", "web");
    bundle.issues = vec![serde_json::from_value(json!({
        "id": 1,
        "title": "Login broken",
        "content": { "raw": "Cannot log in" },
        "reporter": { "username": "john.doe", "display_name": "John Doe" },
        "comments": [
            { "content": { "raw": "Same here" }, "user": { "username": "a", "display_name": "A" } }
        ]
    }))
    .unwrap()];
    bundle.wiki_pages = vec![serde_json::from_value(json!({
        "path": "Home",
        "title": "Home",
        "content": "# Welcome"
    }))
    .unwrap()];
    bundle.finalize();
    bundle
}

#[tokio::test]
async fn wiki_flag_off_creates_zero_wiki_pages() {
    let server = MockServer::start().await;

    // Feature toggle before issue writes
    Mock::given(method("PUT"))
        .and(path("/repositories/acme/web"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "full_name": "acme/web", "slug": "web", "name": "web"
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/repositories/acme/web/issues"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": 11,
            "title": "Login broken"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/repositories/acme/web/issues/11/comments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    // Wiki restore is disabled: no page may ever be written
    Mock::given(method("PUT"))
        .and(path("/repositories/acme/web/wiki/pages/Home"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let flags = RestoreConfig {
        issues: true,
        wiki: false,
        pull_request_docs: false,
        permissions: false,
        webhooks: false,
        branch_restrictions: false,
        deploy_keys: false,
    };

    let api = client(&server.uri());
    let summary = CollaborationRestorer::new(&api, &flags)
        .restore("acme", "web", &bundle_with_issue_and_wiki())
        .await
        .expect("restore");

    // Issue + its comment; the wiki page is not counted anywhere
    assert_eq!(summary.restored, 2);
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn wiki_only_restore_never_disables_issue_tracker() {
    let server = MockServer::start().await;

    // A downgrade payload must never reach the destination repository
    Mock::given(method("PUT"))
        .and(path("/repositories/acme/web"))
        .and(body_string_contains("\"has_issues\":false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "full_name": "acme/web", "slug": "web", "name": "web"
        })))
        .expect(0)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/repositories/acme/web"))
        .and(body_string_contains("\"has_wiki\":true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "full_name": "acme/web", "slug": "web", "name": "web"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/repositories/acme/web/wiki/pages/Home"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let flags = RestoreConfig {
        issues: false,
        wiki: true,
        pull_request_docs: false,
        permissions: false,
        webhooks: false,
        branch_restrictions: false,
        deploy_keys: false,
    };

    let api = client(&server.uri());
    let summary = CollaborationRestorer::new(&api, &flags)
        .restore("acme", "web", &bundle_with_issue_and_wiki())
        .await
        .expect("restore");

    assert_eq!(summary.restored, 1);
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn restored_issue_carries_attribution_header() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/repositories/acme/web"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "full_name": "acme/web", "slug": "web", "name": "web"
        })))
        .mount(&server)
        .await;

    // The created issue body must name the original author
    Mock::given(method("POST"))
        .and(path("/repositories/acme/web/issues"))
        .and(body_string_contains("MIGRATED CONTENT"))
        .and(body_string_contains("John Doe (@john.doe)"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": 11,
            "title": "Login broken"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/repositories/acme/web/issues/11/comments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
        .mount(&server)
        .await;

    let flags = RestoreConfig {
        issues: true,
        wiki: false,
        pull_request_docs: false,
        permissions: false,
        webhooks: false,
        branch_restrictions: false,
        deploy_keys: false,
    };

    let api = client(&server.uri());
    CollaborationRestorer::new(&api, &flags)
        .restore("acme", "web", &bundle_with_issue_and_wiki())
        .await
        .expect("restore");
}

#[tokio::test]
async fn failed_item_is_counted_and_does_not_abort() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/repositories/acme/web"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "full_name": "acme/web", "slug": "web", "name": "web"
        })))
        .mount(&server)
        .await;

    // Issue creation rejected outright; restore continues and reports it
    Mock::given(method("POST"))
        .and(path("/repositories/acme/web/issues"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "error": { "message": "issue tracker disabled" }
        })))
        .mount(&server)
        .await;

    let flags = RestoreConfig {
        issues: true,
        wiki: false,
        pull_request_docs: false,
        permissions: false,
        webhooks: false,
        branch_restrictions: false,
        deploy_keys: false,
    };

    let api = client(&server.uri());
    let summary = CollaborationRestorer::new(&api, &flags)
        .restore("acme", "web", &bundle_with_issue_and_wiki())
        .await
        .expect("per-item failures are absorbed");

    assert_eq!(summary.restored, 0);
    assert_eq!(summary.failed, 1);
}
