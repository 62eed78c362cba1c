//! Resolution of the per-mode session endpoint.

use crate::error::{LivetransError, Result};
use crate::session::Mode;
use url::Url;

/// Scheme prefixes accepted (and discarded) in the configured host.
const SCHEME_PREFIXES: &[&str] = &["wss://", "ws://", "https://", "http://"];

/// Build the WebSocket URL for `mode` on `host`.
///
/// The scheme follows the caller's security context: `wss` when `secure`,
/// `ws` otherwise. A scheme written into `host` is ignored for that reason.
///
/// # Errors
/// Returns `LivetransError::ConfigInvalidValue` if the host is empty or does
/// not form a valid URL.
pub fn resolve(host: &str, secure: bool, mode: Mode) -> Result<Url> {
    let mut host = host.trim();
    for prefix in SCHEME_PREFIXES {
        if let Some(stripped) = host.strip_prefix(prefix) {
            host = stripped;
            break;
        }
    }
    let host = host.trim_end_matches('/');

    if host.is_empty() {
        return Err(LivetransError::ConfigInvalidValue {
            key: "server.host".to_string(),
            message: "host must not be empty".to_string(),
        });
    }

    let scheme = if secure { "wss" } else { "ws" };
    let raw = format!("{}://{}{}", scheme, host, mode.path());
    Url::parse(&raw).map_err(|e| LivetransError::ConfigInvalidValue {
        key: "server.host".to_string(),
        message: format!("'{}' does not form a valid endpoint: {}", host, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_mode_has_its_own_path() {
        assert_eq!(
            resolve("localhost:8000", false, Mode::Speech).unwrap().as_str(),
            "ws://localhost:8000/ws/speech"
        );
        assert_eq!(
            resolve("localhost:8000", false, Mode::Live).unwrap().as_str(),
            "ws://localhost:8000/ws/live"
        );
        assert_eq!(
            resolve("localhost:8000", false, Mode::Speaker).unwrap().as_str(),
            "ws://localhost:8000/ws/speaker"
        );
    }

    #[test]
    fn secure_context_uses_wss() {
        let url = resolve("translate.example.net", true, Mode::Speaker).unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.as_str(), "wss://translate.example.net/ws/speaker");
    }

    #[test]
    fn configured_scheme_is_replaced_by_security_context() {
        let url = resolve("https://translate.example.net/", false, Mode::Live).unwrap();
        assert_eq!(url.as_str(), "ws://translate.example.net/ws/live");

        let url = resolve("ws://10.0.0.5:9000", true, Mode::Live).unwrap();
        assert_eq!(url.as_str(), "wss://10.0.0.5:9000/ws/live");
    }

    #[test]
    fn empty_host_is_rejected() {
        for host in ["", "   ", "wss://", "/"] {
            let err = resolve(host, false, Mode::Live).unwrap_err();
            assert!(
                matches!(err, LivetransError::ConfigInvalidValue { ref key, .. } if key == "server.host"),
                "host {:?} gave {:?}",
                host,
                err
            );
        }
    }

    #[test]
    fn invalid_port_is_rejected() {
        assert!(resolve("localhost:notaport", false, Mode::Live).is_err());
    }
}
