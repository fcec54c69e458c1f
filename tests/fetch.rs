use std::{net::SocketAddr, sync::Arc, time::Duration};

use arrow::array::{ArrayRef, Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;
use arrow_fetch::{Client, Error, report, stats::StatsRecorder};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::oneshot,
};

fn arrow_stream(num_batches: usize) -> Vec<u8> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("ts", DataType::Int64, false),
        Field::new("value", DataType::Float64, true),
    ]));
    let mut writer = StreamWriter::try_new(Vec::new(), &schema).unwrap();
    for i in 0..num_batches as i64 {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(vec![i * 10, i * 10 + 1, i * 10 + 2])),
            Arc::new(Float64Array::from(vec![Some(0.5), None, Some(i as f64)])),
        ];
        writer
            .write(&RecordBatch::try_new(schema.clone(), columns).unwrap())
            .unwrap();
    }
    writer.finish().unwrap();
    writer.into_inner().unwrap()
}

fn ok_response(body: &[u8]) -> Vec<u8> {
    let mut res = format!(
        "HTTP/1.1 200 OK\r\n\
         content-type: application/vnd.apache.arrow.stream\r\n\
         content-length: {}\r\n\
         connection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    res.extend_from_slice(body);
    res
}

fn chunked_response(body: &[u8], chunk_size: usize) -> Vec<u8> {
    let mut res = b"HTTP/1.1 200 OK\r\n\
        content-type: application/vnd.apache.arrow.stream\r\n\
        transfer-encoding: chunked\r\n\
        connection: close\r\n\r\n"
        .to_vec();
    for chunk in body.chunks(chunk_size) {
        res.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        res.extend_from_slice(chunk);
        res.extend_from_slice(b"\r\n");
    }
    res.extend_from_slice(b"0\r\n\r\n");
    res
}

async fn read_request_head(socket: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buf[..n]);
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// Accept one connection, answer it with `response`, and hand back the
/// request head that was received.
async fn serve_once(response: Vec<u8>) -> (SocketAddr, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let head = read_request_head(&mut socket).await;
        let _ = tx.send(head);
        socket.write_all(&response).await.unwrap();
        let _ = socket.shutdown().await;
    });
    (addr, rx)
}

/// Accept one connection and never answer it.
async fn serve_silence() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let _ = read_request_head(&mut socket).await;
        std::future::pending::<()>().await;
    });
    addr
}

fn url(addr: SocketAddr) -> String {
    format!("http://{addr}/")
}

fn assert_elapsed_line(line: &str) {
    let seconds = line
        .strip_suffix(" seconds elapsed")
        .unwrap_or_else(|| panic!("unexpected line {line:?}"));
    let (whole, fraction) = seconds.split_once('.').unwrap();
    assert!(!whole.is_empty() && whole.chars().all(|c| c.is_ascii_digit()));
    assert_eq!(fraction.len(), 2);
    assert!(fraction.chars().all(|c| c.is_ascii_digit()));
}

#[tokio::test]
async fn reports_three_batches() {
    let (addr, _) = serve_once(ok_response(&arrow_stream(3))).await;
    let client = Client::builder().build().unwrap();

    let mut out = Vec::new();
    let report = report::fetch_and_report(client.get(url(addr)), &mut out)
        .await
        .unwrap();
    assert_eq!(report.batches, 3);
    assert_eq!(report.rows, 9);

    let out = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "3 record batches received");
    assert_elapsed_line(lines[1]);
}

#[tokio::test]
async fn reports_zero_batches_for_schema_only_stream() {
    let (addr, _) = serve_once(ok_response(&arrow_stream(0))).await;
    let client = Client::builder().build().unwrap();

    let mut out = Vec::new();
    report::fetch_and_report(client.get(url(addr)), &mut out)
        .await
        .unwrap();

    let out = String::from_utf8(out).unwrap();
    assert_eq!(out.lines().next(), Some("0 record batches received"));
}

#[tokio::test]
async fn decodes_batches_as_chunks_arrive() {
    let (addr, _) = serve_once(chunked_response(&arrow_stream(5), 13)).await;
    let client = Client::builder().build().unwrap();

    let mut reader = client.get(url(addr)).send().await.unwrap().arrow_batches();
    let mut count = 0;
    while let Some(batch) = reader.next_batch().await.unwrap() {
        assert_eq!(batch.num_columns(), 2);
        count += 1;
    }
    assert_eq!(count, 5);
    assert_eq!(reader.schema().unwrap().field(0).name(), "ts");
}

#[tokio::test]
async fn truncated_payload_prints_nothing() {
    let payload = arrow_stream(3);
    // Drops the end-of-stream marker and the tail of the last batch body.
    let truncated = &payload[..payload.len() - 20];
    let (addr, _) = serve_once(ok_response(truncated)).await;
    let client = Client::builder().build().unwrap();

    let mut out = Vec::new();
    let err = report::fetch_and_report(client.get(url(addr)), &mut out)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Arrow(_)), "{err:?}");
    assert!(out.is_empty());
}

#[tokio::test]
async fn empty_body_reports_zero_batches() {
    let (addr, _) = serve_once(ok_response(b"")).await;
    let client = Client::builder().build().unwrap();

    let mut out = Vec::new();
    let report = report::fetch_and_report(client.get(url(addr)), &mut out)
        .await
        .unwrap();
    assert_eq!(report.batches, 0);
    assert_eq!(report.rows, 0);

    let out = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "0 record batches received");
    assert_elapsed_line(lines[1]);
}

#[tokio::test]
async fn schema_cut_short_prints_nothing() {
    let payload = arrow_stream(0);
    let (addr, _) = serve_once(ok_response(&payload[..6])).await;
    let client = Client::builder().build().unwrap();

    let mut out = Vec::new();
    let err = report::fetch_and_report(client.get(url(addr)), &mut out)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Arrow(_) | Error::MissingSchema), "{err:?}");
    assert!(out.is_empty());
}

#[tokio::test]
async fn silent_server_keeps_the_fetch_pending() {
    let addr = serve_silence().await;
    let client = Client::builder().build().unwrap();

    let mut out = Vec::new();
    let outcome = tokio::time::timeout(
        Duration::from_millis(300),
        report::fetch_and_report(client.get(url(addr)), &mut out),
    )
    .await;
    assert!(outcome.is_err(), "fetch should still be waiting");
    assert!(out.is_empty());
}

#[tokio::test]
async fn opt_in_timeout_fails_the_fetch() {
    let addr = serve_silence().await;
    let client = Client::builder()
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();

    let mut out = Vec::new();
    let err = report::fetch_and_report(client.get(url(addr)), &mut out)
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "{err:?}");
    assert!(out.is_empty());
}

#[tokio::test]
async fn refused_connection_is_an_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = Client::builder().build().unwrap();
    let mut out = Vec::new();
    let err = report::fetch_and_report(client.get(url(addr)), &mut out)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Io(_)), "{err:?}");
    assert!(out.is_empty());
}

#[tokio::test]
async fn error_status_is_not_decoded() {
    let response = b"HTTP/1.1 404 Not Found\r\ncontent-length: 9\r\nconnection: close\r\n\r\nnot found".to_vec();
    let (addr, _) = serve_once(response).await;
    let client = Client::builder().build().unwrap();

    let mut out = Vec::new();
    let err = report::fetch_and_report(client.get(url(addr)), &mut out)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Status(s) if s.as_u16() == 404), "{err:?}");
    assert!(out.is_empty());
}

#[tokio::test]
async fn dns_override_routes_request_and_sets_host() {
    let (addr, head) = serve_once(ok_response(&arrow_stream(1))).await;
    let client = Client::builder()
        .resolve_to_addrs("arrow.test", &[addr])
        .build()
        .unwrap();

    let table = client
        .get(format!("http://arrow.test:{}/batches?limit=1", addr.port()))
        .send()
        .await
        .unwrap()
        .arrow_table()
        .await
        .unwrap();
    assert_eq!(table.num_batches(), 1);

    let head = head.await.unwrap().to_ascii_lowercase();
    assert!(head.starts_with("get /batches?limit=1 http/1.1\r\n"), "{head}");
    assert!(head.contains(&format!("host: arrow.test:{}\r\n", addr.port())), "{head}");
}

#[tokio::test]
async fn recorder_sees_every_phase() {
    let payload = arrow_stream(2);
    let (addr, _) = serve_once(chunked_response(&payload, 64)).await;
    let client = Client::builder().build().unwrap();
    let recorder = StatsRecorder::new();

    let table = client
        .get(url(addr))
        .recorder(Arc::new(recorder.clone()))
        .send()
        .await
        .unwrap()
        .arrow_table()
        .await
        .unwrap();
    assert_eq!(table.num_batches(), 2);

    let stats = recorder.finish();
    assert!(stats.dns.is_none(), "ip literals skip dns");
    let tcp = stats.tcp.unwrap();
    assert_eq!(tcp.stats.len(), 1);
    assert_eq!(tcp.stats[0].dest, addr.to_string());
    assert!(tcp.stats[0].error.is_none());
    assert_eq!(stats.response.unwrap().status.as_u16(), 200);
    assert_eq!(stats.body.unwrap().bytes, payload.len() as u64);
}
