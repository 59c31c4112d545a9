//! gRPC `Log` service implementation.
//!
//! `Produce` and `Consume` delegate straight to the log. `ProduceStream`
//! echoes one assigned offset per received record. `ConsumeStream` serves
//! from the requested offset and, once it reaches the log's tail, waits
//! for new appends instead of terminating, so consumers can block at the
//! tail indefinitely.

use std::sync::Arc;
use std::time::Duration;

use loghouse_log::{Error as LogError, Log};
use loghouse_proto::error::offset_out_of_range;
use loghouse_proto::v1::log_server::{self, LogServer};
use loghouse_proto::v1::{ConsumeRequest, ConsumeResponse, ProduceRequest, ProduceResponse};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::debug;

/// Cap on how long a tailing consumer waits for an append notification
/// before probing the log again. Bounds the window in which an append
/// racing the wait registration could otherwise stall the stream.
const TAIL_WAIT_CAP: Duration = Duration::from_millis(500);

const STREAM_BUFFER: usize = 64;

pub struct LogService {
    log: Arc<Log>,
}

impl LogService {
    pub fn new(log: Arc<Log>) -> Self {
        Self { log }
    }

    /// Wraps the service for registration with a tonic server.
    pub fn into_server(self) -> LogServer<Self> {
        LogServer::new(self)
    }
}

fn to_status(err: LogError) -> Status {
    match err {
        LogError::OffsetOutOfRange { offset } => offset_out_of_range(offset),
        other => Status::internal(other.to_string()),
    }
}

#[tonic::async_trait]
impl log_server::Log for LogService {
    async fn produce(
        &self,
        request: Request<ProduceRequest>,
    ) -> Result<Response<ProduceResponse>, Status> {
        let record = request.into_inner().record.unwrap_or_default();
        let offset = self.log.append(record).await.map_err(to_status)?;
        Ok(Response::new(ProduceResponse { offset }))
    }

    async fn consume(
        &self,
        request: Request<ConsumeRequest>,
    ) -> Result<Response<ConsumeResponse>, Status> {
        let offset = request.into_inner().offset;
        let record = self.log.read(offset).await.map_err(to_status)?;
        Ok(Response::new(ConsumeResponse {
            record: Some(record),
        }))
    }

    type ProduceStreamStream = ReceiverStream<Result<ProduceResponse, Status>>;

    async fn produce_stream(
        &self,
        request: Request<Streaming<ProduceRequest>>,
    ) -> Result<Response<Self::ProduceStreamStream>, Status> {
        let mut requests = request.into_inner();
        let log = Arc::clone(&self.log);
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            loop {
                let request = match requests.message().await {
                    Ok(Some(request)) => request,
                    Ok(None) => break,
                    Err(status) => {
                        let _ = tx.send(Err(status)).await;
                        break;
                    }
                };
                let record = request.record.unwrap_or_default();
                let result = log
                    .append(record)
                    .await
                    .map(|offset| ProduceResponse { offset })
                    .map_err(to_status);
                let failed = result.is_err();
                if tx.send(result).await.is_err() || failed {
                    break;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    type ConsumeStreamStream = ReceiverStream<Result<ConsumeResponse, Status>>;

    async fn consume_stream(
        &self,
        request: Request<ConsumeRequest>,
    ) -> Result<Response<Self::ConsumeStreamStream>, Status> {
        let mut offset = request.into_inner().offset;
        let log = Arc::clone(&self.log);
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            loop {
                match log.read(offset).await {
                    Ok(record) => {
                        let response = ConsumeResponse {
                            record: Some(record),
                        };
                        if tx.send(Ok(response)).await.is_err() {
                            break;
                        }
                        offset += 1;
                    }
                    Err(LogError::OffsetOutOfRange { .. }) => {
                        // At the tail: wait for the next append, with the
                        // receiver hang-up ending the stream cleanly.
                        tokio::select! {
                            _ = log.wait_for_append() => {}
                            _ = tokio::time::sleep(TAIL_WAIT_CAP) => {}
                            _ = tx.closed() => break,
                        }
                    }
                    Err(err) => {
                        debug!(offset, error = %err, "consume stream ending");
                        let _ = tx.send(Err(to_status(err))).await;
                        break;
                    }
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
