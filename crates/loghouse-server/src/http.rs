//! JSON HTTP gateway.
//!
//! A thin companion surface to the gRPC service: `POST /` appends a
//! record, `GET /` reads one. Record values travel as base64 strings.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use loghouse_log::{Error as LogError, Log};
use loghouse_proto::v1::Record;
use serde::{Deserialize, Serialize};

/// Builds the gateway router over a shared log handle.
pub fn router(log: Arc<Log>) -> Router {
    Router::new()
        .route("/", post(handle_produce).get(handle_consume))
        .with_state(log)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordBody {
    #[serde(default)]
    pub offset: u64,
    /// Base64-encoded record value.
    pub value: String,
}

#[derive(Debug, Deserialize)]
struct ProduceBody {
    record: RecordBody,
}

#[derive(Debug, Serialize)]
struct ProduceReply {
    offset: u64,
}

#[derive(Debug, Deserialize)]
struct ConsumeBody {
    offset: u64,
}

#[derive(Debug, Serialize)]
struct ConsumeReply {
    record: RecordBody,
}

#[derive(Debug, Serialize)]
struct ErrorReply {
    error: String,
}

type HttpError = (StatusCode, Json<ErrorReply>);

fn error_reply(code: StatusCode, message: impl Into<String>) -> HttpError {
    (
        code,
        Json(ErrorReply {
            error: message.into(),
        }),
    )
}

async fn handle_produce(
    State(log): State<Arc<Log>>,
    Json(body): Json<ProduceBody>,
) -> Result<Json<ProduceReply>, HttpError> {
    let value = BASE64
        .decode(body.record.value.as_bytes())
        .map_err(|err| error_reply(StatusCode::BAD_REQUEST, err.to_string()))?;

    let offset = log
        .append(Record { offset: 0, value })
        .await
        .map_err(|err| error_reply(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    Ok(Json(ProduceReply { offset }))
}

async fn handle_consume(
    State(log): State<Arc<Log>>,
    Json(body): Json<ConsumeBody>,
) -> Result<Json<ConsumeReply>, HttpError> {
    match log.read(body.offset).await {
        Ok(record) => Ok(Json(ConsumeReply {
            record: RecordBody {
                offset: record.offset,
                value: BASE64.encode(&record.value),
            },
        })),
        Err(err @ LogError::OffsetOutOfRange { .. }) => {
            Err(error_reply(StatusCode::NOT_FOUND, err.to_string()))
        }
        Err(err) => Err(error_reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            err.to_string(),
        )),
    }
}
