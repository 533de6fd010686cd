//! msgpack-rpc client integration tests
//!
//! Runs `RpcClient` against an in-process TCP server that speaks the same
//! framing as the simulator.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rmpv::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use carla_bootstrap::rpc::codec::{self, Message};
use carla_bootstrap::rpc::{RpcClient, SimulatorClient, WeatherParameters, WorldSettings};
use carla_bootstrap::{RpcError, Town};

const TIMEOUT: Duration = Duration::from_secs(2);

/// Every message the fake server received, in order.
type Received = Arc<Mutex<Vec<Message>>>;

/// Start a fake simulator and return its port.
async fn spawn_server() -> (u16, Received) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let received: Received = Arc::default();

    let log = Arc::clone(&received);
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve(stream, log).await;
    });

    (port, received)
}

async fn serve(mut stream: TcpStream, received: Received) {
    let mut buf = Vec::new();
    let mut frame = 100u64;
    let mut chunk = [0u8; 1024];

    loop {
        while let Some((value, used)) = codec::try_decode(&buf).unwrap() {
            buf.drain(..used);
            let message = codec::parse_message(value).unwrap();
            received.lock().unwrap().push(message.clone());

            let Message::Request { id, method, .. } = message else {
                continue;
            };
            let result = match method.as_str() {
                "version" => Ok(Value::from("0.9.13")),
                "load_new_episode" => Ok(Value::Nil),
                "apply_episode_settings" => Ok(Value::from(frame)),
                "tick_cue" => {
                    frame += 1;
                    Ok(Value::from(frame))
                }
                // Never answered
                "stall" => continue,
                other => Err(Value::from(format!("unknown method {other}"))),
            };

            // A stale response first, which the client must skip
            if method == "version" {
                let stale = codec::encode_response(id.wrapping_add(1000), Ok(Value::Nil)).unwrap();
                stream.write_all(&stale).await.unwrap();
            }
            let response = codec::encode_response(id, result).unwrap();
            stream.write_all(&response).await.unwrap();
        }

        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

async fn connect(port: u16) -> RpcClient {
    RpcClient::connect("127.0.0.1", port, TIMEOUT).await.unwrap()
}

#[tokio::test]
async fn test_server_version_skips_unrelated_responses() {
    let (port, _) = spawn_server().await;
    let mut client = connect(port).await;

    assert_eq!(client.server_version().await.unwrap(), "0.9.13");
    assert!(client.client_version().starts_with("carla-bootstrap/"));
}

#[tokio::test]
async fn test_world_setup_sequence() {
    let (port, received) = spawn_server().await;
    let mut client = connect(port).await;

    client.load_world(Town::Town02).await.unwrap();
    client.set_weather(&WeatherParameters::clear_noon()).await.unwrap();
    let frame = client.apply_settings(&WorldSettings::fixed_step(10)).await.unwrap();
    assert_eq!(frame, 100);
    assert_eq!(client.tick().await.unwrap(), 101);
    assert_eq!(client.tick().await.unwrap(), 102);

    let received = received.lock().unwrap().clone();
    assert_eq!(received.len(), 5);

    match &received[0] {
        Message::Request { id, method, params } => {
            assert_eq!(*id, 0);
            assert_eq!(method, "load_new_episode");
            assert_eq!(params[0], Value::from("Town02"));
            assert_eq!(params[1], Value::Boolean(true));
        }
        other => panic!("Expected load request, got {other:?}"),
    }
    match &received[1] {
        Message::Notification { method, params } => {
            assert_eq!(method, "set_weather_parameters");
            let Value::Array(fields) = &params[0] else {
                panic!("Expected positional weather, got {}", params[0]);
            };
            assert_eq!(fields.len(), 10);
        }
        other => panic!("Expected weather notification, got {other:?}"),
    }
    match &received[2] {
        Message::Request { method, params, .. } => {
            assert_eq!(method, "apply_episode_settings");
            let Value::Array(fields) = &params[0] else {
                panic!("Expected positional settings, got {}", params[0]);
            };
            assert_eq!(fields[0], Value::Boolean(true));
            assert_eq!(fields[2].as_f64(), Some(0.1));
        }
        other => panic!("Expected settings request, got {other:?}"),
    }
}

#[tokio::test]
async fn test_remote_error_is_reported() {
    let (port, _) = spawn_server().await;
    let mut client = connect(port).await;

    let err = client.call("get_blueprints", vec![]).await.unwrap_err();
    match err {
        RpcError::Remote { method, message } => {
            assert_eq!(method, "get_blueprints");
            assert!(message.contains("unknown method"), "got {message}");
        }
        other => panic!("Expected Remote, got {other}"),
    }

    // The connection stays usable
    assert_eq!(client.server_version().await.unwrap(), "0.9.13");
}

#[tokio::test]
async fn test_unanswered_call_times_out() {
    let (port, _) = spawn_server().await;
    let mut client = connect(port).await.with_timeout(Duration::from_millis(200));

    let err = client.call("stall", vec![]).await.unwrap_err();
    assert!(matches!(err, RpcError::Timeout { .. }), "got {err}");
}

#[tokio::test]
async fn test_closed_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
    });

    let mut client = connect(port).await;
    let err = client.server_version().await.unwrap_err();
    assert!(
        matches!(err, RpcError::Closed | RpcError::Io(_)),
        "got {err}"
    );
}
