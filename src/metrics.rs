use axum::{
    http::HeaderValue,
    response::{IntoResponse, Response},
};
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::error;

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        handoff_agent_core::metrics::register_metrics(global_registry());
    });
}

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

/// Encodes every registered metric in the text exposition format.
pub fn render() -> Result<String, prometheus::Error> {
    register_metrics();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&global_registry().gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|err| prometheus::Error::Msg(err.to_string()))
}

pub async fn metrics_handler() -> Response {
    let body = match render() {
        Ok(body) => body,
        Err(err) => {
            error!(?err, "failed to encode prometheus metrics");
            return (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "metric encode error",
            )
                .into_response();
        }
    };
    match HeaderValue::from_str(TextEncoder::new().format_type()) {
        Ok(value) => ([(axum::http::header::CONTENT_TYPE, value)], body).into_response(),
        Err(err) => {
            error!(?err, "failed to build content-type header");
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "metric encode error",
            )
                .into_response()
        }
    }
}
