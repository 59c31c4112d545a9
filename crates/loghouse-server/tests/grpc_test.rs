//! End-to-end tests of the gRPC surface over a real in-process server.

use std::sync::Arc;
use std::time::Duration;

use loghouse_log::{Config, Log};
use loghouse_proto::error::{offset_from_status, offset_out_of_range};
use loghouse_proto::v1::log_client::LogClient;
use loghouse_proto::v1::{ConsumeRequest, ProduceRequest, Record};
use loghouse_server::LogService;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tonic::transport::{Channel, Server};

fn record(value: &str) -> Record {
    Record {
        offset: 0,
        value: value.as_bytes().to_vec(),
    }
}

async fn start_server() -> (LogClient<Channel>, Arc<Log>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(Log::open(dir.path(), Config::default()).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let service = LogService::new(Arc::clone(&log));
    tokio::spawn(async move {
        Server::builder()
            .add_service(service.into_server())
            .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    let client = LogClient::connect(format!("http://{addr}"))
        .await
        .expect("client connects to in-process server");
    (client, log, dir)
}

#[tokio::test]
async fn produce_then_consume() {
    let (mut client, _log, _dir) = start_server().await;

    let produced = client
        .produce(ProduceRequest {
            record: Some(record("hello world")),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(produced.offset, 0);

    let consumed = client
        .consume(ConsumeRequest {
            offset: produced.offset,
        })
        .await
        .unwrap()
        .into_inner();
    let got = consumed.record.unwrap();
    assert_eq!(got.offset, 0);
    assert_eq!(got.value, b"hello world");
}

#[tokio::test]
async fn consume_past_boundary_fails() {
    let (mut client, _log, _dir) = start_server().await;

    let produced = client
        .produce(ProduceRequest {
            record: Some(record("hello world")),
        })
        .await
        .unwrap()
        .into_inner();

    let status = client
        .consume(ConsumeRequest {
            offset: produced.offset + 1,
        })
        .await
        .expect_err("reading past the log's range must fail");

    let want = offset_out_of_range(produced.offset + 1);
    assert_eq!(status.code(), want.code());
    assert_eq!(offset_from_status(&status), Some(produced.offset + 1));
}

#[tokio::test]
async fn produce_and_consume_streams() {
    let (mut client, _log, _dir) = start_server().await;

    let requests = vec![
        ProduceRequest {
            record: Some(record("first message")),
        },
        ProduceRequest {
            record: Some(record("second message")),
        },
    ];
    let mut responses = client
        .produce_stream(tokio_stream::iter(requests))
        .await
        .unwrap()
        .into_inner();
    for want in 0..2u64 {
        let response = responses.message().await.unwrap().unwrap();
        assert_eq!(response.offset, want);
    }

    let mut stream = client
        .consume_stream(ConsumeRequest { offset: 0 })
        .await
        .unwrap()
        .into_inner();
    let values = ["first message", "second message"];
    for (want, value) in values.iter().enumerate() {
        let response = stream.message().await.unwrap().unwrap();
        let got = response.record.unwrap();
        assert_eq!(got.offset, want as u64);
        assert_eq!(got.value, value.as_bytes());
    }
}

#[tokio::test]
async fn consume_stream_waits_at_the_tail() {
    let (mut client, log, _dir) = start_server().await;

    // Start tailing an empty log: the stream must wait, not terminate.
    let mut stream = client
        .consume_stream(ConsumeRequest { offset: 0 })
        .await
        .unwrap()
        .into_inner();

    tokio::time::sleep(Duration::from_millis(100)).await;
    log.append(record("late arrival")).await.unwrap();

    let response = tokio::time::timeout(Duration::from_secs(5), stream.message())
        .await
        .expect("tailing stream yields the append")
        .unwrap()
        .unwrap();
    assert_eq!(response.record.unwrap().value, b"late arrival");
}
