// ABOUTME: Rate-limit integration tests over an injected clock
// ABOUTME: Exhausted windows answer temporarily_unavailable and charge a failed usage stat
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gatehouse Labs

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use chrono::{Duration, Utc};
use gatehouse_auth_server::database_plugins::DatabaseProvider;
use gatehouse_auth_server::oauth2_server::models::AuthorizeRejection;
use gatehouse_auth_server::rate_limiting::{ManualClock, RateLimitPolicy};
use std::sync::Arc;

const REDIRECT: &str = "https://app.example/cb";

#[tokio::test]
async fn exhausted_authorize_window_answers_temporarily_unavailable() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let resources = common::test_resources_with_clock(clock.clone());
    let client = common::register_client_with_policy(
        &resources,
        &[REDIRECT],
        &["profile"],
        RateLimitPolicy::new(2, 60_000),
    )
    .await;

    for _ in 0..2 {
        resources
            .oauth2_server
            .authorize(
                common::authorize_request(&client, REDIRECT, "profile", "s"),
                &common::ctx(),
            )
            .await
            .expect("within budget");
    }

    let rejection = resources
        .oauth2_server
        .authorize(
            common::authorize_request(&client, REDIRECT, "profile", "s"),
            &common::ctx(),
        )
        .await
        .unwrap_err();
    let AuthorizeRejection::Body(error) = rejection else {
        panic!("rate limiting answers with a JSON body");
    };
    assert_eq!(error.error, "temporarily_unavailable");

    // the rejected call charged a failed usage stat against the credential
    let stats = resources.database.get_usage_stats(client.id).await.unwrap();
    assert!(stats.iter().any(|s| !s.success && s.operation == "authorize"));

    // the window resets strictly after window_ms
    clock.advance(Duration::milliseconds(60_001));
    let allowed = resources
        .oauth2_server
        .authorize(
            common::authorize_request(&client, REDIRECT, "profile", "s"),
            &common::ctx(),
        )
        .await;
    assert!(allowed.is_ok());
}

#[tokio::test]
async fn token_and_authorize_windows_are_independent() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let resources = common::test_resources_with_clock(clock);
    let client = common::register_client_with_policy(
        &resources,
        &[REDIRECT],
        &["profile"],
        RateLimitPolicy::new(3, 60_000),
    )
    .await;

    // Fill the authorize window completely
    for _ in 0..3 {
        resources
            .oauth2_server
            .authorize(
                common::authorize_request(&client, REDIRECT, "profile", "s"),
                &common::ctx(),
            )
            .await
            .expect("within budget");
    }

    // Token calls run against their own (client_id, "token") identifier
    let err = resources
        .oauth2_server
        .token(
            common::code_exchange(&client, "no-such-code", REDIRECT),
            &common::ctx(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.error, "invalid_grant", "not rate limited");
}

#[tokio::test]
async fn disabled_policy_never_limits() {
    let resources = common::test_resources();
    let client = common::register_client_with_policy(
        &resources,
        &[REDIRECT],
        &["profile"],
        RateLimitPolicy::disabled(),
    )
    .await;

    for _ in 0..50 {
        resources
            .oauth2_server
            .authorize(
                common::authorize_request(&client, REDIRECT, "profile", "s"),
                &common::ctx(),
            )
            .await
            .expect("disabled policy always allows");
    }
}

#[tokio::test]
async fn exhausted_userinfo_window_answers_temporarily_unavailable() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let resources = common::test_resources_with_clock(clock);
    let client = common::register_client_with_policy(
        &resources,
        &[REDIRECT],
        &["profile"],
        RateLimitPolicy::new(4, 60_000),
    )
    .await;

    let (code, ..) = common::obtain_code(&resources, &client, REDIRECT, "profile").await;
    let tokens = resources
        .oauth2_server
        .token(common::code_exchange(&client, &code, REDIRECT), &common::ctx())
        .await
        .unwrap();

    // authorize consumed 1 from its own window; userinfo has a budget of 4
    for _ in 0..4 {
        resources
            .oauth2_server
            .userinfo(&tokens.access_token, &common::ctx())
            .await
            .expect("within budget");
    }

    let err = resources
        .oauth2_server
        .userinfo(&tokens.access_token, &common::ctx())
        .await
        .unwrap_err();
    assert_eq!(err.error, "temporarily_unavailable");
}
