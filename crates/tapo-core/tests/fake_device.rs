//! End-to-end tests driving the client against fake devices that speak the
//! device side of both transports over real sockets.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use rsa::pkcs8::DecodePublicKey;
use rsa::rand_core::OsRng;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use serde_json::{Value, json};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

use tapo_core::credentials::Credentials;
use tapo_core::crypto::{KlapCipher, PassthroughCipher, auth_hash, handshake1_hash, handshake2_hash};
use tapo_core::discovery::{self, DiscoverOptions};
use tapo_core::error::{Error, Status};
use tapo_core::plug::{Plug, PlugState};
use tapo_core::transport::KlapSession;

const USERNAME: &str = "user@example.com";
const PASSWORD: &str = "pass1234";

const IO_TIMEOUT: Duration = Duration::from_secs(2);

fn credentials() -> Credentials {
    Credentials::new(USERNAME, PASSWORD)
}

// ---------------------------------------------------------------------------
// Device-side HTTP plumbing
// ---------------------------------------------------------------------------

struct DeviceRequest {
    path: String,
    query: String,
    cookie: Option<String>,
    body: Vec<u8>,
}

async fn read_request(stream: &mut TcpStream) -> Option<DeviceRequest> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let headers = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = headers.lines();
    let request_line = lines.next()?;
    let target = request_line.split_whitespace().nth(1)?;
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (target.to_string(), String::new()),
    };

    let mut content_length = 0usize;
    let mut cookie = None;
    for line in lines {
        let lower = line.to_lowercase();
        if let Some(value) = lower.strip_prefix("content-length:") {
            content_length = value.trim().parse().ok()?;
        } else if lower.starts_with("cookie:") {
            cookie = Some(line[7..].trim().to_string());
        }
    }

    let mut body = data[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    Some(DeviceRequest {
        path,
        query,
        cookie,
        body,
    })
}

async fn write_response(stream: &mut TcpStream, status: u16, headers: &[String], body: &[u8]) {
    let reason = match status {
        200 => "OK",
        403 => "Forbidden",
        404 => "Not Found",
        _ => "Error",
    };
    let mut response = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\n",
        status,
        reason,
        body.len()
    );
    for header in headers {
        response.push_str(header);
        response.push_str("\r\n");
    }
    response.push_str("\r\n");

    let mut bytes = response.into_bytes();
    bytes.extend_from_slice(body);
    let _ = stream.write_all(&bytes).await;
}

// ---------------------------------------------------------------------------
// Fake device
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeState {
    klap_cipher: Option<KlapCipher>,
    expected_handshake2: Option<[u8; 32]>,
    pass_cipher: Option<PassthroughCipher>,
    handshakes: u32,
    info_calls: u32,
    request_seqs: Vec<i32>,
    saw_token: bool,
    sent_http_error: bool,
}

struct FakeDevice {
    /// Serve the KLAP endpoints at all (404 otherwise).
    klap_enabled: bool,
    /// Reject handshake1 with this HTTP status.
    klap_reject_status: Option<u16>,
    /// Return a server hash not derived from the credentials.
    wrong_server_hash: bool,
    /// Answer the first get_device_info with status 9999.
    timeout_first_info: bool,
    /// Answer the first get_device_info with status 1003.
    comm_error_first_info: bool,
    /// Answer the first KLAP request with HTTP 500.
    http_error_first_request: bool,
    state: Mutex<FakeState>,
}

impl FakeDevice {
    fn new() -> Self {
        Self {
            klap_enabled: true,
            klap_reject_status: None,
            wrong_server_hash: false,
            timeout_first_info: false,
            comm_error_first_info: false,
            http_error_first_request: false,
            state: Mutex::new(FakeState::default()),
        }
    }

    async fn spawn(self: Arc<Self>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let device = Arc::clone(&self);
                tokio::spawn(async move {
                    if let Some(request) = read_request(&mut stream).await {
                        let (status, headers, body) = device.handle(request);
                        write_response(&mut stream, status, &headers, &body).await;
                    }
                });
            }
        });

        port
    }

    fn handle(&self, request: DeviceRequest) -> (u16, Vec<String>, Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        match request.path.as_str() {
            "/app/handshake1" => self.handshake1(&mut state, &request.body),
            "/app/handshake2" => self.handshake2(&mut state, &request.body),
            "/app/request" => self.klap_request(&mut state, &request),
            "/app" => self.passthrough(&mut state, &request),
            _ => (404, Vec::new(), b"not found".to_vec()),
        }
    }

    fn remote_seed() -> [u8; 16] {
        std::array::from_fn(|i| i as u8)
    }

    fn handshake1(&self, state: &mut FakeState, local_seed: &[u8]) -> (u16, Vec<String>, Vec<u8>) {
        if !self.klap_enabled {
            return (404, Vec::new(), Vec::new());
        }
        if let Some(status) = self.klap_reject_status {
            return (status, Vec::new(), Vec::new());
        }

        state.handshakes += 1;
        let remote_seed = Self::remote_seed();
        let auth = auth_hash(USERNAME, PASSWORD);
        let server_hash = if self.wrong_server_hash {
            [0u8; 32]
        } else {
            handshake1_hash(local_seed, &remote_seed, &auth)
        };

        state.expected_handshake2 = Some(handshake2_hash(local_seed, &remote_seed, &auth));
        state.klap_cipher = Some(KlapCipher::new(local_seed, &remote_seed, &auth));

        let mut reply = remote_seed.to_vec();
        reply.extend_from_slice(&server_hash);
        (
            200,
            vec!["Set-Cookie: TP_SESSIONID=klapA;TIMEOUT=86400".to_string()],
            reply,
        )
    }

    fn handshake2(&self, state: &mut FakeState, body: &[u8]) -> (u16, Vec<String>, Vec<u8>) {
        match state.expected_handshake2 {
            Some(expected) if body == &expected[..] => (200, Vec::new(), Vec::new()),
            _ => (403, Vec::new(), Vec::new()),
        }
    }

    fn klap_request(&self, state: &mut FakeState, request: &DeviceRequest) -> (u16, Vec<String>, Vec<u8>) {
        if self.http_error_first_request && !state.sent_http_error {
            state.sent_http_error = true;
            return (500, Vec::new(), Vec::new());
        }

        let has_cookie = request
            .cookie
            .as_deref()
            .is_some_and(|c| c.contains("TP_SESSIONID=klapA"));
        if !has_cookie {
            return (403, Vec::new(), Vec::new());
        }

        let Some(seq) = request
            .query
            .strip_prefix("seq=")
            .and_then(|s| s.parse::<i32>().ok())
        else {
            return (403, Vec::new(), Vec::new());
        };

        let Some(cipher) = state.klap_cipher.clone() else {
            return (403, Vec::new(), Vec::new());
        };
        let Ok(inner) = cipher.open(seq, &request.body) else {
            return (403, Vec::new(), Vec::new());
        };
        state.request_seqs.push(seq);

        let inner_json: Value = serde_json::from_slice(&inner).unwrap();
        let response = self.route_inner(state, &inner_json);
        let body = cipher.seal(seq, &serde_json::to_vec(&response).unwrap());
        (200, Vec::new(), body)
    }

    fn passthrough(&self, state: &mut FakeState, request: &DeviceRequest) -> (u16, Vec<String>, Vec<u8>) {
        let outer: Value = match serde_json::from_slice(&request.body) {
            Ok(v) => v,
            Err(_) => return (200, Vec::new(), b"{\"error_code\":-1003}".to_vec()),
        };

        match outer["method"].as_str() {
            Some("handshake") => {
                state.handshakes += 1;
                let pem = outer["params"]["key"].as_str().unwrap_or_default();
                let Ok(public_key) = RsaPublicKey::from_public_key_pem(pem) else {
                    return (200, Vec::new(), b"{\"error_code\":-1010}".to_vec());
                };

                let blob: [u8; 32] = std::array::from_fn(|i| i as u8);
                let wrapped = public_key
                    .encrypt(&mut OsRng, Pkcs1v15Encrypt, &blob)
                    .unwrap();
                state.pass_cipher = Some(PassthroughCipher::from_session_key(&blob).unwrap());

                let response = json!({"error_code": 0, "result": {"key": STANDARD.encode(wrapped)}});
                (
                    200,
                    vec!["Set-Cookie: TP_SESSIONID=passA;TIMEOUT=86400".to_string()],
                    serde_json::to_vec(&response).unwrap(),
                )
            }
            Some("securePassthrough") => {
                let Some(cipher) = state.pass_cipher.clone() else {
                    return (200, Vec::new(), b"{\"error_code\":9999}".to_vec());
                };
                if request.query.contains("token=tokA") {
                    state.saw_token = true;
                }

                let encoded = outer["params"]["request"].as_str().unwrap_or_default();
                let inner = cipher.decrypt(encoded).unwrap();
                let inner_json: Value = serde_json::from_slice(&inner).unwrap();
                let inner_response = self.route_inner(state, &inner_json);

                let response = json!({
                    "error_code": 0,
                    "result": {"response": cipher.encrypt(&serde_json::to_vec(&inner_response).unwrap())}
                });
                (200, Vec::new(), serde_json::to_vec(&response).unwrap())
            }
            _ => (200, Vec::new(), b"{\"error_code\":1002}".to_vec()),
        }
    }

    fn route_inner(&self, state: &mut FakeState, inner: &Value) -> Value {
        match inner["method"].as_str() {
            Some("login_device") => {
                let expected_username =
                    STANDARD.encode(hex::encode(Sha1::digest(USERNAME.as_bytes())).as_bytes());
                let expected_password = STANDARD.encode(PASSWORD.as_bytes());
                if inner["params"]["username"] == json!(expected_username)
                    && inner["params"]["password"] == json!(expected_password)
                {
                    json!({"error_code": 0, "result": {"token": "tokA"}})
                } else {
                    json!({"error_code": -1501})
                }
            }
            Some("get_device_info") => {
                state.info_calls += 1;
                if self.timeout_first_info && state.info_calls == 1 {
                    json!({"error_code": 9999})
                } else if self.comm_error_first_info && state.info_calls == 1 {
                    json!({"error_code": 1003})
                } else {
                    json!({"error_code": 0, "result": {
                        "device_id": "dev-1",
                        "model": "P110",
                        "type": "SMART.TAPOPLUG",
                        "mac": "AABBCCDDEEFF",
                        "nickname": "SG9tZQ==",
                        "ssid": "TXlXaWZp",
                        "device_on": true,
                        "on_time": 120,
                        "rssi": -48,
                        "signal_level": 2,
                        "overheated": false
                    }})
                }
            }
            Some("set_device_info") => json!({"error_code": 0, "result": {}}),
            Some("get_device_usage") => json!({"error_code": 0, "result": {
                "time_usage": {"today": 12, "past7": 84, "past30": 360},
                "power_usage": {"today": 2, "past7": 14, "past30": 60},
                "saved_power": {"today": 1, "past7": 3, "past30": 10}
            }}),
            Some("get_energy_usage") => json!({"error_code": 0, "result": {
                "today_runtime": 60,
                "month_runtime": 1200,
                "today_energy": 150,
                "month_energy": 4500,
                "local_time": "2024-03-01 12:00:00",
                "electricity_charge": [0, 0, 11],
                "current_power": 32500
            }}),
            _ => json!({"error_code": 1002}),
        }
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn passthrough_happy_path() {
    let device = Arc::new(FakeDevice {
        klap_enabled: false,
        ..FakeDevice::new()
    });
    let port = Arc::clone(&device).spawn().await;

    let mut plug = Plug::new("127.0.0.1").with_port(port).with_timeout(IO_TIMEOUT);
    plug.handshake(credentials()).await.unwrap();
    assert_eq!(plug.transport(), Some("passthrough"));
    assert_eq!(plug.state(), PlugState::Ready);

    let info = plug.get_device_info().await.unwrap();
    assert_eq!(info.decoded_nickname, "Home");
    assert_eq!(info.decoded_ssid, "MyWifi");
    assert_eq!(info.mac_address(), "AA:BB:CC:DD:EE:FF");
    assert!(info.device_on);

    // requests after login carry the token query parameter
    assert!(device.state.lock().unwrap().saw_token);
}

#[tokio::test]
async fn klap_happy_path() {
    let device = Arc::new(FakeDevice::new());
    let port = Arc::clone(&device).spawn().await;

    let mut plug = Plug::new("127.0.0.1").with_port(port).with_timeout(IO_TIMEOUT);
    plug.handshake(credentials()).await.unwrap();
    assert_eq!(plug.transport(), Some("KLAP"));

    plug.set_device_info(true).await.unwrap();
    assert!(plug.is_on().await.unwrap());

    let usage = plug.get_device_usage().await.unwrap();
    assert_eq!(usage.time_usage.today, 12);
    let energy = plug.get_energy_usage().await.unwrap();
    assert_eq!(energy.current_power, 32500);

    // the sequence counter advanced once per request
    let seqs = device.state.lock().unwrap().request_seqs.clone();
    assert_eq!(seqs.len(), 4);
    for pair in seqs.windows(2) {
        assert_eq!(pair[1], pair[0].wrapping_add(1));
    }
}

#[tokio::test]
async fn klap_rejection_falls_back_to_passthrough() {
    let device = Arc::new(FakeDevice {
        klap_reject_status: Some(403),
        ..FakeDevice::new()
    });
    let port = Arc::clone(&device).spawn().await;

    let mut plug = Plug::new("127.0.0.1").with_port(port).with_timeout(IO_TIMEOUT);
    plug.handshake(credentials()).await.unwrap();
    assert_eq!(plug.transport(), Some("passthrough"));

    let info = plug.get_device_info().await.unwrap();
    assert_eq!(info.decoded_nickname, "Home");
}

#[tokio::test]
async fn klap_auth_failure_stops_session() {
    let device = Arc::new(FakeDevice {
        wrong_server_hash: true,
        ..FakeDevice::new()
    });
    let port = Arc::clone(&device).spawn().await;

    let mut session = KlapSession::new("127.0.0.1", port).with_timeout(IO_TIMEOUT);
    match session.handshake(&credentials()).await {
        Err(Error::Auth(_)) => {}
        other => panic!("expected authentication failure, got {:?}", other),
    }

    // no application request was ever issued, and none can be
    assert!(device.state.lock().unwrap().request_seqs.is_empty());
    assert!(matches!(
        session.request(b"{}").await,
        Err(Error::Protocol(_))
    ));
}

#[tokio::test]
async fn session_timeout_triggers_rehandshake() {
    let device = Arc::new(FakeDevice {
        timeout_first_info: true,
        ..FakeDevice::new()
    });
    let port = Arc::clone(&device).spawn().await;

    let mut plug = Plug::new("127.0.0.1")
        .with_port(port)
        .with_timeout(IO_TIMEOUT)
        .with_retries_on_forbidden(1);
    plug.handshake(credentials()).await.unwrap();

    let info = plug.get_device_info().await.unwrap();
    assert_eq!(info.decoded_nickname, "Home");
    assert_eq!(plug.state(), PlugState::Ready);

    // the facade renegotiated the session behind the retry
    assert_eq!(device.state.lock().unwrap().handshakes, 2);
}

#[tokio::test]
async fn session_timeout_without_retries_expires() {
    let device = Arc::new(FakeDevice {
        timeout_first_info: true,
        ..FakeDevice::new()
    });
    let port = Arc::clone(&device).spawn().await;

    let mut plug = Plug::new("127.0.0.1").with_port(port).with_timeout(IO_TIMEOUT);
    plug.handshake(credentials()).await.unwrap();

    match plug.get_device_info().await {
        Err(Error::Device(Status::SessionTimeout)) => {}
        other => panic!("expected session timeout, got {:?}", other),
    }
    assert_eq!(plug.state(), PlugState::Expired);

    // expired is terminal until a fresh handshake
    assert!(plug.get_device_info().await.is_err());
    plug.handshake(credentials()).await.unwrap();
    assert_eq!(plug.state(), PlugState::Ready);
}

#[tokio::test]
async fn communication_error_retries_request_only() {
    let device = Arc::new(FakeDevice {
        comm_error_first_info: true,
        ..FakeDevice::new()
    });
    let port = Arc::clone(&device).spawn().await;

    let mut plug = Plug::new("127.0.0.1")
        .with_port(port)
        .with_timeout(IO_TIMEOUT)
        .with_retries_on_communication_error(1);
    plug.handshake(credentials()).await.unwrap();

    let info = plug.get_device_info().await.unwrap();
    assert_eq!(info.decoded_nickname, "Home");

    // the request was repeated on the existing session, no re-handshake
    let state = device.state.lock().unwrap();
    assert_eq!(state.handshakes, 1);
    assert_eq!(state.info_calls, 2);
}

#[tokio::test]
async fn communication_error_without_retries_surfaces() {
    let device = Arc::new(FakeDevice {
        comm_error_first_info: true,
        ..FakeDevice::new()
    });
    let port = Arc::clone(&device).spawn().await;

    let mut plug = Plug::new("127.0.0.1").with_port(port).with_timeout(IO_TIMEOUT);
    plug.handshake(credentials()).await.unwrap();

    match plug.get_device_info().await {
        Err(Error::Device(Status::CommunicationError)) => {}
        other => panic!("expected communication error, got {:?}", other),
    }
    // a communication error does not expire the session
    assert_eq!(plug.state(), PlugState::Ready);
    assert!(plug.get_device_info().await.is_ok());
}

#[tokio::test]
async fn http_error_is_retried_as_communication_error() {
    let device = Arc::new(FakeDevice {
        http_error_first_request: true,
        ..FakeDevice::new()
    });
    let port = Arc::clone(&device).spawn().await;

    let mut plug = Plug::new("127.0.0.1")
        .with_port(port)
        .with_timeout(IO_TIMEOUT)
        .with_retries_on_communication_error(1);
    plug.handshake(credentials()).await.unwrap();
    assert_eq!(plug.transport(), Some("KLAP"));

    plug.set_device_info(true).await.unwrap();

    // one handshake; the failed attempt consumed a sequence number before
    // the retry went through
    let state = device.state.lock().unwrap();
    assert_eq!(state.handshakes, 1);
    assert_eq!(state.request_seqs.len(), 1);
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

fn discovery_reply(device_id: &str, model: &str, error_code: i32) -> Vec<u8> {
    let json = json!({"result": {
        "device_id": device_id,
        "device_type": "SMART.TAPOPLUG",
        "device_model": model,
        "ip": "127.0.0.1",
        "mac": "AABBCCDDEEFF",
        "error_code": error_code,
        "mgt_encrypt_schm": {"encrypt_type": "KLAP", "http_port": 80, "lv": 2}
    }});
    // replies carry a 16-byte header the prober skips
    let mut packet = vec![0u8; 16];
    packet.extend_from_slice(&serde_json::to_vec(&json).unwrap());
    packet
}

async fn spawn_udp_device(replies: Vec<Vec<u8>>) -> String {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        let mut sent = 0;
        loop {
            let Ok((_, from)) = socket.recv_from(&mut buf).await else {
                break;
            };
            if sent < replies.len() {
                let _ = socket.send_to(&replies[sent], from).await;
                sent += 1;
            }
        }
    });

    addr
}

#[tokio::test]
async fn discovery_dedupes_by_device_id() {
    let dev1 = spawn_udp_device(vec![
        discovery_reply("A", "P100", 0),
        discovery_reply("A", "P110", 0),
    ])
    .await;
    let dev2 = spawn_udp_device(vec![
        discovery_reply("B", "P100", 0),
        discovery_reply("C", "P100", 1003),
    ])
    .await;

    let options = DiscoverOptions {
        v1_addr: dev1,
        v2_addr: dev2,
        probe_count: 4,
        probe_interval: Duration::from_millis(50),
        window: Duration::from_millis(800),
    };
    let found = discovery::discover_with(options).await.unwrap();

    assert_eq!(found.devices.len(), 2);
    // duplicate replies from the same device id keep the latest
    assert_eq!(found.devices["A"].result.device_model, "P110");
    assert_eq!(found.devices["B"].result.device_model, "P100");

    assert_eq!(found.errors.len(), 1);
    assert_eq!(found.errors[0].result.status(), Status::CommunicationError);
}
