use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bmc_http::connection::Http2Connection;
use bmc_http::handler::{make_handler, AsyncResp, Handler};
use bmc_http::protocol::{HttpError, ProtocolError, Request, Verb};
use bmc_http::server::Server;
use bytes::{Bytes, BytesMut};
use h2::client::{self, SendRequest};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use http::{Method, StatusCode};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

fn redfish_handler(file_path: PathBuf) -> impl Handler + 'static {
    make_handler(move |request: &Request, response: AsyncResp| match request.path() {
        "/redfish/v1" => {
            response.with(|res| res.json_value = json!({"@odata.id": "/redfish/v1", "Name": "Root Service"}));
        }
        "/firmware.bin" => {
            let opened = response.with(|res| res.open_file(&file_path));
            assert!(opened);
        }
        "/echo" => {
            assert_eq!(request.method(), Some(Verb::Post));
            let body = request.body_bytes();
            response.with(|res| res.write(&body));
        }
        path if path.starts_with("/later/") => {
            let delay: u64 = path["/later/".len()..].parse().unwrap();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                response.with(|res| {
                    res.write(format!("after {delay}").as_bytes());
                    res.end();
                });
            });
        }
        _ => response.with(|res| res.set_status(StatusCode::NOT_FOUND)),
    })
}

async fn connect<H: Handler + 'static>(handler: H) -> (SendRequest<Bytes>, JoinHandle<Result<(), HttpError>>) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (reader, writer) = tokio::io::split(server_io);
    let connection = Http2Connection::new(reader, writer, Arc::new(handler));
    let server = tokio::spawn(connection.process());

    let (send_request, client_connection) = client::handshake(client_io).await.unwrap();
    tokio::spawn(async move {
        // ends with an error once the server closes the connection
        let _ = client_connection.await;
    });
    (send_request, server)
}

async fn exchange(
    client: &SendRequest<Bytes>,
    method: Method,
    path: &str,
    if_none_match: Option<&str>,
    body: Option<Bytes>,
) -> Result<(http::response::Parts, Bytes), h2::Error> {
    let mut builder = http::Request::builder().method(method).uri(format!("http://bmc.local{path}"));
    if let Some(etag) = if_none_match {
        builder = builder.header(IF_NONE_MATCH, etag);
    }
    let request = builder.body(()).unwrap();

    let mut client = client.clone().ready().await?;
    let (response, mut send_stream) = client.send_request(request, body.is_none())?;
    if let Some(body) = body {
        send_stream.send_data(body, true)?;
    }

    let (parts, mut recv_stream) = response.await?.into_parts();
    let mut data = BytesMut::new();
    while let Some(chunk) = recv_stream.data().await {
        let chunk = chunk?;
        recv_stream.flow_control().release_capacity(chunk.len())?;
        data.extend_from_slice(&chunk);
    }
    Ok((parts, data.freeze()))
}

#[tokio::test]
async fn json_response_carries_an_etag_and_revalidates_to_304() {
    let (client, _server) = connect(redfish_handler(PathBuf::new())).await;

    let (parts, body) = exchange(&client, Method::GET, "/redfish/v1", None, None).await.unwrap();
    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(parts.headers[CONTENT_TYPE], "application/json");
    assert_eq!(parts.headers[CONTENT_LENGTH], body.len().to_string().as_str());
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["Name"], "Root Service");

    let etag = parts.headers[ETAG].to_str().unwrap().to_string();
    assert_eq!(etag.len(), 10);

    let (parts, body) = exchange(&client, Method::GET, "/redfish/v1", Some(&etag), None).await.unwrap();
    assert_eq!(parts.status, StatusCode::NOT_MODIFIED);
    assert!(body.is_empty());
    assert_eq!(parts.headers[ETAG], etag.as_str());
}

#[tokio::test]
async fn file_body_larger_than_the_window_is_streamed() {
    let content: Vec<u8> = (0..100_000u32).map(|i| (i % 253) as u8).collect();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&content).unwrap();
    file.flush().unwrap();

    let (client, _server) = connect(redfish_handler(file.path().to_path_buf())).await;

    let (parts, body) = exchange(&client, Method::GET, "/firmware.bin", None, None).await.unwrap();
    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(parts.headers[CONTENT_LENGTH], "100000");
    assert_eq!(body.len(), content.len());
    assert_eq!(&body[..], &content[..]);
}

#[tokio::test]
async fn request_body_is_delivered_before_dispatch() {
    let (client, _server) = connect(redfish_handler(PathBuf::new())).await;

    let payload = Bytes::from_static(b"{\"ResetType\": \"GracefulRestart\"}");
    let (parts, body) = exchange(&client, Method::POST, "/echo", None, Some(payload.clone())).await.unwrap();
    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(body, payload);
}

#[tokio::test]
async fn responses_complete_out_of_order() {
    let (client, _server) = connect(redfish_handler(PathBuf::new())).await;

    let (slow, fast, missing) = tokio::join!(
        exchange(&client, Method::GET, "/later/60", None, None),
        exchange(&client, Method::GET, "/later/5", None, None),
        exchange(&client, Method::GET, "/nowhere", None, None),
    );

    assert_eq!(slow.unwrap().1, Bytes::from_static(b"after 60"));
    assert_eq!(fast.unwrap().1, Bytes::from_static(b"after 5"));
    assert_eq!(missing.unwrap().0.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_verb_closes_the_connection() {
    let (client, server) = connect(redfish_handler(PathBuf::new())).await;

    let method = Method::from_bytes(b"FOO").unwrap();
    let result = exchange(&client, method, "/redfish/v1", None, None).await;
    assert!(result.is_err());

    let closed = server.await.unwrap();
    assert!(matches!(closed, Err(HttpError::Protocol { source: ProtocolError::UnknownVerb { .. } })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_large_transfers_over_tcp() {
    let firmware: Vec<u8> = (0..2 * 1024 * 1024u32).map(|i| (i % 241) as u8).collect();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&firmware).unwrap();
    file.flush().unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let server = Server::builder().handler(redfish_handler(file.path().to_path_buf())).address(address).build().unwrap();
    tokio::spawn(server.serve(listener));

    let (send_request, client_connection) = client::handshake(TcpStream::connect(address).await.unwrap()).await.unwrap();
    tokio::spawn(async move {
        let _ = client_connection.await;
    });

    let upload = |seed: u8| Bytes::from((0..1024 * 1024u32).map(|i| (i as u8).wrapping_add(seed)).collect::<Vec<u8>>());
    let (first_upload, second_upload) = (upload(1), upload(7));

    let transfers = async {
        tokio::join!(
            exchange(&send_request, Method::POST, "/echo", None, Some(first_upload.clone())),
            exchange(&send_request, Method::POST, "/echo", None, Some(second_upload.clone())),
            exchange(&send_request, Method::GET, "/firmware.bin", None, None),
            exchange(&send_request, Method::GET, "/firmware.bin", None, None),
        )
    };
    let (first_echo, second_echo, first_download, second_download) =
        tokio::time::timeout(Duration::from_secs(30), transfers).await.unwrap();

    assert_eq!(first_echo.unwrap().1, first_upload);
    assert_eq!(second_echo.unwrap().1, second_upload);
    for download in [first_download, second_download] {
        let (parts, body) = download.unwrap();
        assert_eq!(parts.status, StatusCode::OK);
        assert_eq!(&body[..], &firmware[..]);
    }
}
