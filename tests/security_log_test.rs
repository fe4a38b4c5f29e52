// ABOUTME: Audit side-channel tests: every protocol decision point leaves a security log entry
// ABOUTME: Also covers usage stat recording and the credential last-used bump
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gatehouse Labs

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use gatehouse_auth_server::database_plugins::DatabaseProvider;

const REDIRECT: &str = "https://app.example/cb";

#[tokio::test]
async fn success_and_failure_both_reach_the_security_log() {
    let resources = common::test_resources();
    let client = common::register_client(&resources, &[REDIRECT], &["profile"]).await;

    // success path
    resources
        .oauth2_server
        .authorize(
            common::authorize_request(&client, REDIRECT, "profile", "s"),
            &common::ctx(),
        )
        .await
        .unwrap();

    // failure path: unknown client
    let mut bad = common::authorize_request(&client, REDIRECT, "profile", "s");
    bad.client_id = Some("client_unknown".into());
    resources
        .oauth2_server
        .authorize(bad, &common::ctx())
        .await
        .unwrap_err();

    let logs = resources.database.get_security_logs(10).await.unwrap();
    let authorize_logs: Vec<_> = logs
        .iter()
        .filter(|l| l.action == "oauth_authorize")
        .collect();
    assert_eq!(authorize_logs.len(), 2);
    assert!(authorize_logs.iter().any(|l| l.success));
    let failure = authorize_logs.iter().find(|l| !l.success).unwrap();
    assert_eq!(failure.error.as_deref(), Some("invalid_client"));
    assert_eq!(failure.ip, "198.51.100.7");
    assert_eq!(failure.user_agent.as_deref(), Some("gatehouse-tests"));
}

#[tokio::test]
async fn token_exchange_writes_audit_and_usage_trail() {
    let resources = common::test_resources();
    let client = common::register_client(&resources, &[REDIRECT], &["profile"]).await;
    let (code, ..) = common::obtain_code(&resources, &client, REDIRECT, "profile").await;

    assert!(client.last_used_at.is_none());

    resources
        .oauth2_server
        .token(common::code_exchange(&client, &code, REDIRECT), &common::ctx())
        .await
        .unwrap();

    // audit entry for the exchange
    let logs = resources.database.get_security_logs(20).await.unwrap();
    let token_log = logs
        .iter()
        .find(|l| l.action == "oauth_token" && l.success)
        .expect("token success is audited");
    assert_eq!(token_log.credential_id, Some(client.id));

    // usage stats for authorize, complete, and token, all successful
    let stats = resources.database.get_usage_stats(client.id).await.unwrap();
    let operations: Vec<&str> = stats.iter().map(|s| s.operation.as_str()).collect();
    assert!(operations.contains(&"authorize"));
    assert!(operations.contains(&"complete"));
    assert!(operations.contains(&"token"));
    assert!(stats.iter().all(|s| s.success));

    // successful calls bump the credential's last-used timestamp
    let refreshed = resources
        .database
        .get_credentials(client.id)
        .await
        .unwrap()
        .unwrap();
    assert!(refreshed.last_used_at.is_some());
}

#[tokio::test]
async fn replayed_code_failure_is_audited_with_the_grant_error() {
    let resources = common::test_resources();
    let client = common::register_client(&resources, &[REDIRECT], &["profile"]).await;
    let (code, ..) = common::obtain_code(&resources, &client, REDIRECT, "profile").await;

    resources
        .oauth2_server
        .token(common::code_exchange(&client, &code, REDIRECT), &common::ctx())
        .await
        .unwrap();
    resources
        .oauth2_server
        .token(common::code_exchange(&client, &code, REDIRECT), &common::ctx())
        .await
        .unwrap_err();

    let logs = resources.database.get_security_logs(20).await.unwrap();
    let failure = logs
        .iter()
        .find(|l| l.action == "oauth_token" && !l.success)
        .expect("replay failure is audited");
    assert_eq!(failure.error.as_deref(), Some("invalid_grant"));
    assert_eq!(failure.credential_id, Some(client.id));
}
