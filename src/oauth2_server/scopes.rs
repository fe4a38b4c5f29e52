// ABOUTME: Recognized scope set and scope-string parsing for the authorization server
// ABOUTME: Unrecognized scope tokens are silently dropped for forward compatibility, never rejected
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Gatehouse Labs

/// Every scope this server understands
pub const RECOGNIZED_SCOPES: [&str; 5] = ["profile", "email", "openid", "read:user", "write:user"];

/// Scopes granted on refresh when the originating session is gone
///
/// Deliberate fallback, not a bug: the session's scope record is a
/// convenience snapshot and may have been swept.
pub const REFRESH_FALLBACK_SCOPES: [&str; 3] = ["openid", "profile", "email"];

/// Parse a raw scope string into the recognized subset
///
/// Splits on whitespace, drops unrecognized tokens, and deduplicates while
/// preserving request order. An empty result means the request carried no
/// recognized scope at all.
#[must_use]
pub fn parse_recognized(raw: &str) -> Vec<String> {
    let mut scopes = Vec::new();
    for token in raw.split_whitespace() {
        if RECOGNIZED_SCOPES.contains(&token) && !scopes.iter().any(|s| s == token) {
            scopes.push(token.to_owned());
        }
    }
    scopes
}

/// Join scopes back into the space-separated wire form
#[must_use]
pub fn join(scopes: &[String]) -> String {
    scopes.join(" ")
}

/// Whether a granted scope list contains `scope`
#[must_use]
pub fn has_scope(scopes: &[String], scope: &str) -> bool {
    scopes.iter().any(|s| s == scope)
}

/// The fallback scope list as owned values
#[must_use]
pub fn refresh_fallback() -> Vec<String> {
    REFRESH_FALLBACK_SCOPES
        .iter()
        .map(|s| (*s).to_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognized_tokens_are_dropped_silently() {
        let scopes = parse_recognized("profile email calendar:write openid");
        assert_eq!(scopes, vec!["profile", "email", "openid"]);
    }

    #[test]
    fn fully_unrecognized_request_yields_empty_set() {
        assert!(parse_recognized("foo bar baz").is_empty());
    }

    #[test]
    fn duplicates_collapse_preserving_order() {
        let scopes = parse_recognized("email profile email");
        assert_eq!(scopes, vec!["email", "profile"]);
    }

    #[test]
    fn join_round_trips_wire_form() {
        let scopes = parse_recognized("read:user write:user");
        assert_eq!(join(&scopes), "read:user write:user");
    }
}
