//! Skip logic for tests that need a localhost listener.
//!
//! Sandboxed runners sometimes forbid binding sockets. Those tests skip with a
//! note on stderr unless `RANKFETCH_REQUIRE_SOCKET_TESTS` is set, in which case
//! they fail.

use std::net::TcpListener;

use wiremock::MockServer;

const STRICT_VAR: &str = "RANKFETCH_REQUIRE_SOCKET_TESTS";

fn strict() -> bool {
    std::env::var(STRICT_VAR).is_ok_and(|value| {
        matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
    })
}

/// Returns whether a localhost port can be bound right now.
pub fn localhost_available() -> bool {
    match TcpListener::bind(("127.0.0.1", 0)) {
        Ok(_) => true,
        Err(error) => {
            assert!(
                !strict(),
                "{STRICT_VAR} is set but binding localhost failed: {error}"
            );
            eprintln!(
                "[socket-bound-test] skipping: cannot bind localhost ({error}); \
                 set {STRICT_VAR}=1 to fail instead"
            );
            false
        }
    }
}

/// Starts a wiremock server, or returns `None` when the test should skip.
pub async fn start_mock_server_or_skip() -> Option<MockServer> {
    if localhost_available() {
        Some(MockServer::start().await)
    } else {
        None
    }
}
