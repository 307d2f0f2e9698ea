//! The calling convention every tool and resource read goes through.
//!
//! A call resolves its backend slot, runs exactly one backend operation under
//! the operation timeout, and renders the outcome as a JSON envelope. Nothing
//! raised below this layer escapes it.

use crate::context::Slot;
use crate::error::{DbError, DbResult};
use crate::models::BackendKind;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Identifies one invocation in its envelope.
#[derive(Debug, Clone)]
pub struct Call {
    pub backend: BackendKind,
    pub operation: &'static str,
    pub target: Option<String>,
}

impl Call {
    pub fn new(backend: BackendKind, operation: &'static str) -> Self {
        Self {
            backend,
            operation,
            target: None,
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn success<T: Serialize>(&self, result: T) -> String {
        match serde_json::to_value(result) {
            Ok(value) => self.render(Some(value), None),
            Err(e) => self.failure(&DbError::internal(format!("Failed to serialize result: {}", e))),
        }
    }

    pub fn failure(&self, error: &DbError) -> String {
        self.render(None, Some(ErrorBody::from(error)))
    }

    fn render(&self, result: Option<serde_json::Value>, error: Option<ErrorBody>) -> String {
        let envelope = Envelope {
            backend: self.backend.as_str(),
            operation: self.operation,
            target: self.target.as_deref(),
            result,
            error,
        };
        serde_json::to_string_pretty(&envelope).unwrap_or_else(|e| {
            format!(
                "{{\"backend\": \"{}\", \"operation\": \"{}\", \"error\": {{\"kind\": \"internal\", \"message\": \"{}\"}}}}",
                self.backend.as_str(),
                self.operation,
                e.to_string().replace('"', "'")
            )
        })
    }
}

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    backend: &'static str,
    operation: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    available: Option<Vec<String>>,
}

impl From<&DbError> for ErrorBody {
    fn from(error: &DbError) -> Self {
        let available = match error {
            DbError::NotFound { available, .. } => Some(available.clone()),
            _ => None,
        };
        Self {
            kind: error.kind(),
            message: error.to_string(),
            suggestion: error.suggestion().map(str::to_string),
            available,
        }
    }
}

/// Run one backend operation and render its envelope.
pub async fn dispatch<B, T, F, Fut>(slot: &Slot<B>, call: Call, timeout: Duration, op: F) -> String
where
    F: FnOnce(Arc<B>) -> Fut,
    Fut: Future<Output = DbResult<T>>,
    T: Serialize,
{
    dispatch_with(slot, call, timeout, Ok(()), |backend, ()| op(backend)).await
}

/// Like [`dispatch`], for operations whose arguments had to be parsed first.
///
/// A disabled backend wins over a bad argument; a bad argument is reported
/// without touching the backend.
pub async fn dispatch_with<B, A, T, F, Fut>(
    slot: &Slot<B>,
    call: Call,
    timeout: Duration,
    args: DbResult<A>,
    op: F,
) -> String
where
    F: FnOnce(Arc<B>, A) -> Fut,
    Fut: Future<Output = DbResult<T>>,
    T: Serialize,
{
    let Some(backend) = slot.get() else {
        return call.failure(&DbError::disabled(call.backend));
    };
    let args = match args {
        Ok(args) => args,
        Err(e) => {
            debug!(backend = %call.backend, operation = call.operation, error = %e, "Rejected arguments");
            return call.failure(&e);
        }
    };

    let outcome = match tokio::time::timeout(timeout, op(Arc::clone(backend), args)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(DbError::timeout(call.operation, timeout.as_secs())),
    };

    match outcome {
        Ok(result) => call.success(result),
        Err(e) => {
            warn!(
                backend = %call.backend,
                operation = call.operation,
                target = call.target.as_deref().unwrap_or("-"),
                error = %e,
                "Operation failed"
            );
            call.failure(&e)
        }
    }
}

/// Parse a JSON-encoded string argument.
pub fn parse_json_arg<T: DeserializeOwned>(name: &str, text: &str) -> DbResult<T> {
    serde_json::from_str(text)
        .map_err(|e| DbError::invalid_argument(format!("{} is not valid JSON: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value as JsonValue, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    impl Counting {
        async fn echo(&self, value: JsonValue) -> DbResult<JsonValue> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        }
    }

    fn parse(text: &str) -> JsonValue {
        serde_json::from_str(text).unwrap()
    }

    #[tokio::test]
    async fn test_success_envelope() {
        let slot = Slot::Enabled(Arc::new(Counting::default()));
        let call = Call::new(BackendKind::MongoDb, "find_documents").target("shop.orders");
        let out = dispatch(&slot, call, Duration::from_secs(1), |b: Arc<Counting>| async move {
            b.echo(json!([{"n": 1}])).await
        })
        .await;

        assert_eq!(
            parse(&out),
            json!({
                "backend": "mongodb",
                "operation": "find_documents",
                "target": "shop.orders",
                "result": [{"n": 1}],
            })
        );
    }

    #[tokio::test]
    async fn test_disabled_slot_returns_disabled_envelope() {
        let slot: Slot<Counting> = Slot::Disabled;
        let out = dispatch(
            &slot,
            Call::new(BackendKind::Redis, "set_key"),
            Duration::from_secs(1),
            |b: Arc<Counting>| async move { b.echo(json!(null)).await },
        )
        .await;

        let value = parse(&out);
        assert_eq!(value["error"]["kind"], "disabled");
        assert_eq!(
            value["error"]["message"],
            "Redis is disabled in the server configuration"
        );
        assert!(value.get("result").is_none());
    }

    #[tokio::test]
    async fn test_bad_json_makes_no_backend_call() {
        let backend = Arc::new(Counting::default());
        let slot = Slot::Enabled(Arc::clone(&backend));
        let args = parse_json_arg::<JsonValue>("filter", "{not json");
        let out = dispatch_with(
            &slot,
            Call::new(BackendKind::MongoDb, "find_documents"),
            Duration::from_secs(1),
            args,
            |b: Arc<Counting>, filter| async move { b.echo(filter).await },
        )
        .await;

        assert_eq!(parse(&out)["error"]["kind"], "invalid_argument");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disabled_wins_over_bad_arguments() {
        let slot: Slot<Counting> = Slot::Disabled;
        let args = parse_json_arg::<JsonValue>("pipeline", "nope");
        let out = dispatch_with(
            &slot,
            Call::new(BackendKind::MongoDb, "aggregate"),
            Duration::from_secs(1),
            args,
            |b: Arc<Counting>, p| async move { b.echo(p).await },
        )
        .await;
        assert_eq!(parse(&out)["error"]["kind"], "disabled");
    }

    #[tokio::test]
    async fn test_backend_error_carries_alternatives() {
        let slot = Slot::Enabled(Arc::new(Counting::default()));
        let out = dispatch(
            &slot,
            Call::new(BackendKind::Postgres, "query").target("missing"),
            Duration::from_secs(1),
            |_b: Arc<Counting>| async move {
                Err::<(), _>(DbError::not_found(
                    "Database",
                    "missing",
                    vec!["app".to_string(), "postgres".to_string()],
                ))
            },
        )
        .await;

        let value = parse(&out);
        assert_eq!(value["target"], "missing");
        assert_eq!(value["error"]["kind"], "not_found");
        assert_eq!(value["error"]["available"], json!(["app", "postgres"]));
    }

    #[tokio::test]
    async fn test_slow_operation_times_out() {
        let slot = Slot::Enabled(Arc::new(Counting::default()));
        let out = dispatch(
            &slot,
            Call::new(BackendKind::InfluxDb, "query"),
            Duration::from_millis(20),
            |_b: Arc<Counting>| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;
        assert_eq!(parse(&out)["error"]["kind"], "timeout");
    }
}
