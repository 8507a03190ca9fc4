//! Request observation hooks.
//!
//! Every HTTP attempt and every cache hit is reported to a [`GatewayObserver`].
//! Observers are notified synchronously and must return quickly; a panicking
//! observer is contained and logged, never propagated to the caller.

use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// A telemetry record emitted by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// An HTTP attempt that produced a response.
    Http {
        method: String,
        path: String,
        status_code: u16,
        ok: bool,
        attempt: u32,
        max_attempts: u32,
        duration_ms: u64,
        payload_keys: Vec<String>,
    },
    /// An attempt that ended in an error (transport, status, or body).
    HttpException {
        method: String,
        path: String,
        attempt: u32,
        max_attempts: u32,
        payload_keys: Vec<String>,
        error_type: String,
    },
    /// A cached value was served without touching the network.
    CacheHit { resource: String, ttl_seconds: u64 },
}

impl GatewayEvent {
    /// Request path, for events that carry one.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Http { path, .. } | Self::HttpException { path, .. } => Some(path),
            Self::CacheHit { .. } => None,
        }
    }

    /// True for exception events and responses with status >= 400.
    pub fn is_error(&self) -> bool {
        match self {
            Self::Http { status_code, .. } => *status_code >= 400,
            Self::HttpException { .. } => true,
            Self::CacheHit { .. } => false,
        }
    }

    /// The event as a JSON object, suitable as free-form telemetry metadata.
    pub fn to_metadata(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Receives gateway events.
pub trait GatewayObserver: Send + Sync {
    fn observe(&self, event: &GatewayEvent);
}

impl<F> GatewayObserver for F
where
    F: Fn(&GatewayEvent) + Send + Sync,
{
    fn observe(&self, event: &GatewayEvent) {
        self(event)
    }
}

/// A shared observer handle.
pub type SharedObserver = Arc<dyn GatewayObserver>;

/// Deliver an event, containing any panic raised by the observer.
pub(crate) fn notify(observer: Option<&SharedObserver>, event: GatewayEvent) {
    let Some(observer) = observer else {
        return;
    };
    if catch_unwind(AssertUnwindSafe(|| observer.observe(&event))).is_err() {
        tracing::debug!("Gateway observer panicked; event dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_event_serialization_shape() {
        let event = GatewayEvent::CacheHit {
            resource: "tools".into(),
            ttl_seconds: 900,
        };
        assert_eq!(
            event.to_metadata(),
            serde_json::json!({"event": "cache_hit", "resource": "tools", "ttl_seconds": 900})
        );

        let event = GatewayEvent::HttpException {
            method: "GET".into(),
            path: "/v1/tools".into(),
            attempt: 1,
            max_attempts: 3,
            payload_keys: vec![],
            error_type: "timeout".into(),
        };
        let meta = event.to_metadata();
        assert_eq!(meta["event"], "http_exception");
        assert_eq!(meta["error_type"], "timeout");
        assert!(event.is_error());
    }

    #[test]
    fn test_is_error_by_status() {
        let http = |status_code| GatewayEvent::Http {
            method: "GET".into(),
            path: "/v1/tools".into(),
            status_code,
            ok: status_code < 400,
            attempt: 1,
            max_attempts: 1,
            duration_ms: 3,
            payload_keys: vec![],
        };
        assert!(!http(200).is_error());
        assert!(http(404).is_error());
        assert!(http(503).is_error());
        assert_eq!(http(200).path(), Some("/v1/tools"));
    }

    #[test]
    fn test_closure_observer_and_panic_containment() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer: SharedObserver = Arc::new(move |e: &GatewayEvent| {
            sink.lock().unwrap().push(e.clone());
        });
        notify(
            Some(&observer),
            GatewayEvent::CacheHit {
                resource: "resources".into(),
                ttl_seconds: 1,
            },
        );
        assert_eq!(seen.lock().unwrap().len(), 1);

        struct Panicking;
        impl GatewayObserver for Panicking {
            fn observe(&self, _: &GatewayEvent) {
                panic!("observer bug");
            }
        }
        let panicking: SharedObserver = Arc::new(Panicking);
        notify(
            Some(&panicking),
            GatewayEvent::CacheHit {
                resource: "resources".into(),
                ttl_seconds: 1,
            },
        );
        notify(
            None,
            GatewayEvent::CacheHit {
                resource: "resources".into(),
                ttl_seconds: 1,
            },
        );
    }
}
