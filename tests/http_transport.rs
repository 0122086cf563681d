use elastic_apm_sync::{
    ApmAgent, Config, ExportError, RecordTransaction, Request, RequestContext, Response,
    SpanRecord, Transport, HttpTransport,
};
use serde_json::Value;
use std::{
    io::{BufRead, BufReader, Read, Write},
    net::TcpListener,
    sync::{mpsc, Arc},
    thread,
};

struct Captured {
    head: String,
    body: String,
}

/// Serves exactly one request with `status` and reports what it received.
fn mock_collector(status: &'static str) -> (String, mpsc::Receiver<Captured>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut head = String::new();
        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if line == "\r\n" || line.is_empty() {
                break;
            }
            let lower = line.to_ascii_lowercase();
            if let Some(value) = lower.strip_prefix("content-length:") {
                content_length = value.trim().parse().unwrap();
            }
            head.push_str(&line);
        }
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).unwrap();

        let mut stream = stream;
        write!(
            stream,
            "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            status
        )
        .unwrap();
        stream.flush().unwrap();

        tx.send(Captured {
            head,
            body: String::from_utf8(body).unwrap(),
        })
        .unwrap();
    });

    (url, rx)
}

#[test]
fn test_posts_ndjson_with_token() {
    let (url, rx) = mock_collector("202 Accepted");
    let config = Config {
        server_url: url,
        secret_token: Some("t0ken".to_string()),
        ..Default::default()
    };
    let payload = "{\"metadata\":{}}\n".to_string();

    HttpTransport::new(&config).send(payload.clone()).unwrap();

    let captured = rx.recv().unwrap();
    let head = captured.head.to_ascii_lowercase();
    assert!(head.starts_with("post /intake/v2/events "));
    assert!(head.contains("content-type: application/x-ndjson"));
    assert!(captured.head.contains("Bearer t0ken"));
    assert_eq!(captured.body, payload);
}

#[test]
fn test_non_success_status_is_an_error() {
    let (url, _rx) = mock_collector("503 Service Unavailable");
    let config = Config {
        server_url: url,
        ..Default::default()
    };

    match HttpTransport::new(&config).send("{}\n".to_string()) {
        Err(ExportError::Status(code)) => assert_eq!(code, 503),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_request_reaches_collector() {
    let (url, rx) = mock_collector("202 Accepted");
    let config = Config {
        service: "shop".to_string(),
        env: Some("staging-01".to_string()),
        server_url: url,
        ..Default::default()
    };
    let agent = Arc::new(ApmAgent::new(&config));
    let middleware = RecordTransaction::new(agent.clone(), config);

    let ctx = RequestContext::new();
    ctx.record_span(SpanRecord::new("SELECT 1").with_type("db").with_duration(1.5));
    middleware
        .handle(&Request::new("GET", "/health"), &ctx, |_| {
            Ok::<_, ()>(Response::new(200))
        })
        .unwrap();
    middleware.terminate();
    drop(middleware);

    match Arc::try_unwrap(agent) {
        Ok(agent) => agent.shutdown(),
        Err(_) => panic!("agent still shared"),
    }

    let captured = rx.recv().unwrap();
    let lines: Vec<Value> = captured
        .body
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["metadata"]["service"]["name"], "shop");
    assert_eq!(lines[1]["transaction"]["name"], "GET /health");
    assert_eq!(lines[1]["transaction"]["context"]["tags"]["requested_by"], "end-user");
    assert_eq!(lines[1]["transaction"]["context"]["response"]["status_code"], 200);
    assert_eq!(lines[2]["span"]["name"], "SELECT 1");
    assert_eq!(lines[2]["span"]["duration"], 1.5);
}
