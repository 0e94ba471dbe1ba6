use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;
use wsjobd_core::{FixedProbe, JobCatalog, JobFailure, JobModule, LoadProbe, SystemLoad};
use wsjobd_server::state::AppState;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(6);

fn test_jobs() -> JobModule {
    JobModule::new()
        .with_fn("normal", |job| {
            job.set("result", "foo");
            Ok(())
        })
        .with_fn("echo", |job| {
            let echo = job.get("echo").unwrap_or(Value::Null);
            job.set("result", echo);
            job.notify_progress();
            let secs = job.get("sleep_time").and_then(|v| v.as_f64()).unwrap_or(0.0);
            thread::sleep(Duration::from_secs_f64(secs));
            Ok(())
        })
        .with_fn("loop", |job| {
            for n in 0..10 {
                job.set("n", n);
                thread::sleep(Duration::from_millis(300));
            }
            Ok(())
        })
        .with_fn("progress_key", |job| {
            job.set("foo", "80%");
            thread::sleep(Duration::from_secs(1));
            Ok(())
        })
        .with_fn("worker_exception", |_job| Err(JobFailure::new("raised")))
        .with_fn("panic", |_job| panic!("worker panicked"))
}

const MEM_AVAILABLE: u64 = 8 * 1024 * 1024 * 1024;

fn test_state() -> AppState {
    let probe = FixedProbe {
        mem_available: MEM_AVAILABLE,
        cpu_idle_percent: 50.0,
    };
    state_with_probe(Arc::new(probe))
}

fn state_with_probe(probe: Arc<dyn LoadProbe>) -> AppState {
    let catalog = JobCatalog::new().with_module("jobs.test", test_jobs());
    AppState::new(catalog, probe, 20)
}

/// Probe whose samples block until the test opens the gate.
struct GatedProbe {
    gate: Mutex<mpsc::Receiver<()>>,
    samples: AtomicUsize,
}

impl LoadProbe for GatedProbe {
    fn sample(&self, _cpu_sample_interval: Duration, client_number: usize) -> SystemLoad {
        self.samples.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap();
        let _ = gate.recv_timeout(Duration::from_secs(5));
        SystemLoad {
            mem_available: MEM_AVAILABLE,
            cpu_idle_percent: 50.0,
            client_number,
        }
    }
}

async fn start_server() -> (SocketAddr, AppState) {
    start_server_with(test_state()).await
}

async fn start_server_with(state: AppState) -> (SocketAddr, AppState) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(wsjobd_server::serve(listener, state.clone()));
    (addr, state)
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/")).await.unwrap();
    ws
}

async fn send(ws: &mut Client, msg: impl Into<String>) {
    let text: String = msg.into();
    ws.send(Message::Text(text.into())).await.unwrap();
}

async fn send_json(ws: &mut Client, msg: Value) {
    send(ws, msg.to_string()).await;
}

/// Next text frame as JSON, or `None` once the server has closed.
async fn recv(ws: &mut Client) -> Option<Value> {
    loop {
        let frame = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame");
        match frame {
            Some(Ok(Message::Text(text))) => {
                return Some(serde_json::from_str(text.as_str()).unwrap());
            }
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        }
    }
}

async fn recv_json(ws: &mut Client) -> Value {
    recv(ws).await.expect("connection closed unexpectedly")
}

/// Read reports until one carries `result`, as a client polling a job would.
async fn wait_for_result(ws: &mut Client) -> Value {
    for _ in 0..3 {
        let resp = recv_json(ws).await;
        if resp.get("result").is_some() {
            return resp;
        }
    }
    panic!("no report carried a result");
}

async fn wait_until_released(state: &AppState, ident: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while state.registry.contains(ident) {
        assert!(Instant::now() < deadline, "job {ident} never finished");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn ident(name: &str) -> String {
    format!("ident_{name}")
}

#[tokio::test]
async fn invalid_job_descriptions_are_rejected() {
    let (addr, _state) = start_server().await;

    let cases = [
        "foo".to_string(),
        json!("foo").to_string(),
        json!({}).to_string(),
        json!({"func": "foo"}).to_string(),
        json!({"ident": "bar"}).to_string(),
        json!({"ident": "bar", "func": {}}).to_string(),
        json!({"ident": 44, "func": "foo"}).to_string(),
        json!({"ident": "foo", "func": "foo", "jobs_dir": {}}).to_string(),
    ];
    for raw in cases {
        let mut ws = connect(addr).await;
        send(&mut ws, raw.clone()).await;
        let resp = recv_json(&mut ws).await;
        assert_eq!(resp["err"], "InvalidMessageError", "{raw}");
    }
}

#[tokio::test]
async fn connection_stays_open_after_invalid_message() {
    let (addr, _state) = start_server().await;
    let mut ws = connect(addr).await;

    send(&mut ws, "not json").await;
    assert_eq!(recv_json(&mut ws).await["err"], "InvalidMessageError");

    send_json(
        &mut ws,
        json!({"func": "test.normal", "ident": ident("after_invalid")}),
    )
    .await;
    assert_eq!(wait_for_result(&mut ws).await["result"], "foo");
}

#[tokio::test]
async fn normal_job_reports_result() {
    let (addr, _state) = start_server().await;
    let mut ws = connect(addr).await;

    send_json(&mut ws, json!({"func": "test.normal", "ident": ident("normal")})).await;

    let resp = wait_for_result(&mut ws).await;
    assert_eq!(resp["result"], "foo");
    assert_eq!(resp["ident"], ident("normal"));
}

#[tokio::test]
async fn reports_follow_interval() {
    let (addr, _state) = start_server().await;
    let mut ws = connect(addr).await;

    send_json(
        &mut ws,
        json!({
            "func": "test.loop",
            "ident": ident("interval"),
            "progress": {"interval": 0.5},
        }),
    )
    .await;

    recv_json(&mut ws).await;
    let first = Instant::now();
    recv_json(&mut ws).await;
    let actual = first.elapsed().as_secs_f64();

    assert!((actual - 0.5).abs() < 0.1, "interval was {actual}");
}

#[tokio::test]
async fn missing_progress_key_reports_null() {
    let (addr, _state) = start_server().await;
    let mut ws = connect(addr).await;

    send_json(
        &mut ws,
        json!({
            "func": "test.progress_key",
            "ident": ident("inexistent_key"),
            "progress": {"key": "inexistent"},
            "report_system_load": true,
        }),
    )
    .await;

    assert_eq!(recv_json(&mut ws).await, Value::Null);
}

#[tokio::test]
async fn progress_key_projects_working_state() {
    let (addr, _state) = start_server().await;
    let mut ws = connect(addr).await;

    send_json(
        &mut ws,
        json!({
            "func": "test.progress_key",
            "ident": ident("progress_key"),
            "progress": {"key": "foo"},
            "foo": "0%",
            "report_system_load": true,
        }),
    )
    .await;

    // Either the preset value or the one the job wrote.
    let resp = recv_json(&mut ws).await;
    assert!(resp == json!("80%") || resp == json!("0%"), "{resp}");
}

#[tokio::test]
async fn report_system_load_attaches_metrics() {
    let (addr, _state) = start_server().await;
    let mut ws = connect(addr).await;

    send_json(
        &mut ws,
        json!({
            "func": "test.normal",
            "ident": ident("system_load"),
            "report_system_load": true,
        }),
    )
    .await;

    let resp = recv_json(&mut ws).await;
    let load = &resp["system_load"];
    assert_eq!(load["mem_available"], json!(8u64 * 1024 * 1024 * 1024));
    assert_eq!(load["cpu_idle_percent"], json!(50.0));
    assert_eq!(load["client_number"], json!(1));
}

#[tokio::test]
async fn unreachable_thresholds_overload_and_close() {
    let (addr, _state) = start_server().await;

    for (name, check_load) in [
        (
            "mem",
            json!({"mem_low_threshold": 100u64 * 1024 * 1024 * 1024, "cpu_low_threshold": 0}),
        ),
        (
            "cpu",
            json!({"cpu_low_threshold": 100.1, "mem_low_threshold": 0}),
        ),
    ] {
        let mut ws = connect(addr).await;
        send_json(
            &mut ws,
            json!({
                "func": "test.normal",
                "ident": ident(name),
                "check_load": check_load,
            }),
        )
        .await;

        let resp = recv_json(&mut ws).await;
        assert_eq!(resp["err"], "SystemOverloadError", "{name}");
        assert_eq!(recv(&mut ws).await, None, "{name}: connection should close");
    }
}

#[tokio::test]
async fn max_client_number_admits_only_one() {
    let (addr, state) = start_server().await;
    let check_load = json!({
        "max_client_number": 1,
        "cpu_low_threshold": 0,
        "mem_low_threshold": 0,
    });

    let mut first = connect(addr).await;
    send_json(
        &mut first,
        json!({"func": "test.loop", "ident": ident("clients_1"), "check_load": check_load}),
    )
    .await;
    let resp = recv_json(&mut first).await;
    assert!(resp.get("err").is_none(), "{resp}");

    // Admission reads the current count, so the first client must be open.
    let mut second = connect(addr).await;
    send_json(
        &mut second,
        json!({"func": "test.loop", "ident": ident("clients_2"), "check_load": check_load}),
    )
    .await;
    let resp = recv_json(&mut second).await;
    assert_eq!(resp["err"], "SystemOverloadError");
    assert!(!state.registry.contains(&ident("clients_2")));
}

#[tokio::test]
async fn unknown_module_or_function_is_loading_error() {
    let (addr, _state) = start_server().await;

    for func in ["nomodule.nofunc", "test.func_not_exists", "foo.bar"] {
        let mut ws = connect(addr).await;
        send_json(&mut ws, json!({"func": func, "ident": ident(func)})).await;
        let resp = recv_json(&mut ws).await;
        assert_eq!(resp["err"], "LoadingError", "{func}");
    }
}

#[tokio::test]
async fn nested_jobs_dir_resolves() {
    let catalog = JobCatalog::new().with_module("suite.test_jobs.test", test_jobs());
    let state = AppState::new(
        catalog,
        Arc::new(FixedProbe {
            mem_available: 1,
            cpu_idle_percent: 1.0,
        }),
        4,
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(wsjobd_server::serve(listener, state));

    let mut ws = connect(addr).await;
    send_json(
        &mut ws,
        json!({
            "func": "test.normal",
            "ident": ident("nested"),
            "jobs_dir": "suite/test_jobs",
        }),
    )
    .await;
    assert_eq!(wait_for_result(&mut ws).await["result"], "foo");
}

#[tokio::test]
async fn same_ident_joins_running_job() {
    let (addr, state) = start_server().await;
    let shared = ident("same_job");

    let mut first = connect(addr).await;
    send_json(
        &mut first,
        json!({"func": "test.echo", "ident": shared, "echo": "foo", "sleep_time": 3}),
    )
    .await;
    assert_eq!(wait_for_result(&mut first).await["result"], "foo");

    let mut second = connect(addr).await;
    send_json(
        &mut second,
        json!({"func": "test.echo", "ident": shared, "echo": "bar"}),
    )
    .await;
    let resp = recv_json(&mut second).await;

    // The running job is joined, not replaced.
    assert_eq!(resp["result"], "foo");
    assert_eq!(resp["echo"], "foo");
    assert_eq!(state.registry.count(), 1);
}

#[tokio::test]
async fn same_ident_after_exit_creates_new_job() {
    let (addr, state) = start_server().await;
    let shared = ident("different_job");

    let mut first = connect(addr).await;
    send_json(
        &mut first,
        json!({"func": "test.echo", "ident": shared, "echo": "foo", "sleep_time": 0.1}),
    )
    .await;
    assert_eq!(wait_for_result(&mut first).await["result"], "foo");
    wait_until_released(&state, &shared).await;

    let mut second = connect(addr).await;
    send_json(
        &mut second,
        json!({"func": "test.echo", "ident": shared, "echo": "bar"}),
    )
    .await;
    let resp = wait_for_result(&mut second).await;
    assert_eq!(resp["result"], "bar");
    assert_eq!(resp["echo"], "bar");
}

#[tokio::test]
async fn job_survives_client_close() {
    let (addr, state) = start_server().await;
    let shared = ident("client_close");

    let mut first = connect(addr).await;
    send_json(
        &mut first,
        json!({"func": "test.echo", "ident": shared, "echo": "foo", "sleep_time": 3}),
    )
    .await;
    let _ = first.close(None).await;
    drop(first);

    // Dispatch is asynchronous; wait for the job to be registered.
    let deadline = Instant::now() + Duration::from_secs(5);
    while !state.registry.contains(&shared) {
        assert!(Instant::now() < deadline, "job was never created");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let mut second = connect(addr).await;
    send_json(
        &mut second,
        json!({"func": "test.echo", "ident": shared, "echo": "bar", "sleep_time": 3}),
    )
    .await;
    assert_eq!(wait_for_result(&mut second).await["result"], "foo");
}

#[tokio::test]
async fn invalid_cpu_sample_interval() {
    let (addr, _state) = start_server().await;
    let mut ws = connect(addr).await;

    send_json(
        &mut ws,
        json!({
            "func": "test.normal",
            "ident": ident("cpu_interval"),
            "cpu_sample_interval": "foo",
        }),
    )
    .await;
    assert_eq!(recv_json(&mut ws).await["err"], "InvalidMessageError");
}

#[tokio::test]
async fn invalid_check_load_args() {
    let (addr, _state) = start_server().await;

    let cases = [
        json!({"mem_low_threshold": "foo", "cpu_low_threshold": 0}),
        json!({"cpu_low_threshold": null, "mem_low_threshold": 0}),
        json!({"max_client_number": {}, "cpu_low_threshold": 0, "mem_low_threshold": 0}),
    ];
    for (n, check_load) in cases.into_iter().enumerate() {
        let mut ws = connect(addr).await;
        send_json(
            &mut ws,
            json!({
                "func": "test.normal",
                "ident": ident(&format!("check_load_{n}")),
                "check_load": check_load,
            }),
        )
        .await;
        assert_eq!(recv_json(&mut ws).await["err"], "InvalidMessageError");
    }
}

#[tokio::test]
async fn earlier_overload_wins_over_bad_later_threshold() {
    let (addr, _state) = start_server().await;
    let mut ws = connect(addr).await;

    send_json(
        &mut ws,
        json!({
            "func": "test.normal",
            "ident": ident("mixed_check_load"),
            "check_load": {
                "mem_low_threshold": 0,
                "cpu_low_threshold": 100.1,
                "max_client_number": "x",
            },
        }),
    )
    .await;
    let resp = recv_json(&mut ws).await;
    assert_eq!(resp["err"], "SystemOverloadError");
    assert_eq!(resp["val"][0], "cpu_idle_percent: 50 is less than: 100");
    assert_eq!(recv(&mut ws).await, None);
}

#[tokio::test]
async fn message_during_dispatch_is_dropped() {
    let (open_gate, gate) = mpsc::channel();
    let probe = Arc::new(GatedProbe {
        gate: Mutex::new(gate),
        samples: AtomicUsize::new(0),
    });
    let (addr, state) = start_server_with(state_with_probe(probe.clone())).await;
    let mut ws = connect(addr).await;
    let first = ident("held_first");
    let second = ident("held_second");

    // Admission sampling holds the first request in dispatch.
    send_json(
        &mut ws,
        json!({
            "func": "test.loop",
            "ident": first,
            "check_load": {},
            "progress": {"interval": 0.2},
        }),
    )
    .await;
    let deadline = Instant::now() + Duration::from_secs(5);
    while probe.samples.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline, "dispatch never sampled load");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    send_json(
        &mut ws,
        json!({"func": "test.normal", "ident": second, "progress": {"interval": 0.2}}),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    open_gate.send(()).unwrap();

    for _ in 0..3 {
        let resp = recv_json(&mut ws).await;
        assert!(resp.get("err").is_none(), "{resp}");
        assert_eq!(resp["ident"], json!(first));
    }
    assert!(state.registry.contains(&first));
    assert!(!state.registry.contains(&second));
    assert_eq!(probe.samples.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn invalid_progress_is_reported() {
    let (addr, _state) = start_server().await;
    let mut ws = connect(addr).await;

    send_json(
        &mut ws,
        json!({"func": "test.normal", "ident": ident("bad_progress"), "progress": "yes"}),
    )
    .await;
    assert_eq!(recv_json(&mut ws).await["err"], "InvalidProgressError");
}

#[tokio::test]
async fn disabled_progress_sends_nothing() {
    let (addr, state) = start_server().await;
    let mut ws = connect(addr).await;
    let quiet = ident("quiet");

    send_json(
        &mut ws,
        json!({
            "func": "test.echo",
            "ident": quiet,
            "echo": "x",
            "sleep_time": 0.5,
            "progress": false,
        }),
    )
    .await;

    let frame = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(frame.is_err(), "expected no frames, got {frame:?}");
    assert!(state.registry.contains(&quiet));
}

#[tokio::test]
async fn failing_worker_gets_final_reports_then_close() {
    let (addr, _state) = start_server().await;

    for func in ["test.worker_exception", "test.panic"] {
        let mut ws = connect(addr).await;
        send_json(
            &mut ws,
            json!({"func": func, "ident": ident(func), "progress": {"interval": 0.1}}),
        )
        .await;

        let mut reports = 0;
        while let Some(resp) = recv(&mut ws).await {
            assert!(resp.get("err").is_none(), "{resp}");
            reports += 1;
        }
        // The first report may land before the runner has finished.
        assert!((10..=11).contains(&reports), "{func}: {reports} reports");
    }
}

/// Helper to make a plain HTTP request to the app.
async fn request(app: axum::Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn health_check() {
    let app = wsjobd_server::app(test_state());

    let (status, body) = request(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn stats_reports_jobs_and_clients() {
    let state = test_state();
    let worker = state.catalog.resolve("jobs", "test.loop").unwrap();
    state
        .registry
        .get_or_create("stats", 1, serde_json::Map::new(), worker)
        .unwrap();
    let _client = state.clients.enter();

    let (status, body) = request(wsjobd_server::app(state), "/stats").await;
    assert_eq!(status, StatusCode::OK);
    let stats: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(stats, json!({"jobs": 1, "clients": 1}));
}
