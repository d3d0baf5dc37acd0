//! The client decides when to refresh from `accessTokenExpiry`, which the
//! server stamps with its own clock. These cover both directions of skew.

mod common;

use common::{HarnessBuilder, PASSWORD};
use udagram_client::{REFRESH_GUARD_SECS, SessionStore};

#[tokio::test]
async fn client_behind_server_recovers_through_401_retry() {
    // Ten minutes behind: tokens look valid to the client for longer than
    // the server accepts them.
    let h = HarnessBuilder::new()
        .client_skew(-600)
        .access_ttl(300)
        .build()
        .await;
    h.client.sign_in("ada@example.com", PASSWORD).await.unwrap();

    h.advance(400);
    h.client.me().await.unwrap();

    assert_eq!(h.server.refreshes(), 1);
    let seen = h.server.seen_tokens();
    assert_eq!(seen.len(), 2, "one rejected attempt and one retry");
    assert_eq!(seen[1].as_deref(), Some(h.sessions.get().unwrap().access_token.as_str()));
}

#[tokio::test]
async fn client_ahead_of_server_refreshes_at_most_once_per_guard_window() {
    // Ten minutes ahead: every token the server issues already looks expired.
    let h = HarnessBuilder::new()
        .client_skew(600)
        .access_ttl(300)
        .build()
        .await;
    h.client.sign_in("ada@example.com", PASSWORD).await.unwrap();

    for _ in 0..5 {
        h.client.me().await.unwrap();
    }
    assert_eq!(h.server.refreshes(), 1);

    h.advance(REFRESH_GUARD_SECS - 1);
    h.client.me().await.unwrap();
    assert_eq!(h.server.refreshes(), 1);

    h.advance(2);
    h.client.me().await.unwrap();
    assert_eq!(h.server.refreshes(), 2);
}
