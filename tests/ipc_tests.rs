//! Control socket round trips against a running engine.

use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nightlight::GammaEngine;
use nightlight::config::{EngineTiming, GammaConfig};
use nightlight::logger::Log;
use nightlight::state::ipc::IpcServer;
use nightlight::state::ipc::client::IpcClient;
use nightlight::testing::{FakeProtocol, StaticLocation};

fn fast_timing() -> EngineTiming {
    EngineTiming {
        transition_duration: Duration::from_millis(30),
        transition_steps: 3,
        trigger_debounce: Duration::from_millis(5),
        notify_debounce: Duration::from_millis(5),
        dispatch_interval: Duration::from_millis(2),
        ..EngineTiming::default()
    }
}

struct Daemon {
    engine: Arc<GammaEngine>,
    server: IpcServer,
    running: Arc<AtomicBool>,
    _dir: tempfile::TempDir,
}

impl Daemon {
    fn start() -> Self {
        Log::set_enabled(false);
        let dir = tempfile::tempdir().unwrap();
        let (protocol, _handle) = FakeProtocol::with_outputs(&["DP-1"]);
        let config = GammaConfig {
            low_temp: 3000,
            high_temp: 6500,
            enabled: true,
            ..Default::default()
        };
        let engine = Arc::new(
            GammaEngine::new(
                Box::new(protocol),
                config,
                Box::new(StaticLocation::unavailable()),
                fast_timing(),
            )
            .unwrap(),
        );
        let running = Arc::new(AtomicBool::new(true));
        let server = IpcServer::start_at(
            dir.path().join("nightlight.sock"),
            Arc::clone(&engine),
            Arc::clone(&running),
        )
        .unwrap();

        Self {
            engine,
            server,
            running,
            _dir: dir,
        }
    }

    fn client(&self) -> IpcClient {
        IpcClient::connect_to(self.server.socket_path()).unwrap()
    }

    fn stop(self) {
        let socket = self.server.socket_path().to_path_buf();
        self.running.store(false, Ordering::SeqCst);
        self.server.shutdown().unwrap();
        self.engine.close();
        assert!(!socket.exists(), "socket file removed on shutdown");
    }
}

#[test]
fn test_get_state_and_setters() {
    let daemon = Daemon::start();
    let mut client = daemon.client();

    let state = client.get_state().unwrap();
    assert_eq!(state.config.low_temp, 3000);
    assert!(state.config.enabled);

    let reply = client
        .call("gamma.setTemperature", json!({"low": 2800, "high": 6000}))
        .unwrap();
    assert_eq!(reply, json!({"success": true, "message": "temperature set"}));
    assert_eq!(daemon.engine.config().low_temp, 2800);

    let err = client
        .call("gamma.setGamma", json!({"gamma": 15}))
        .unwrap_err();
    assert!(err.to_string().contains("gamma"));
    assert_eq!(daemon.engine.config().gamma, 1.0);

    let err = client.call("gamma.reboot", Value::Null).unwrap_err();
    assert_eq!(err.to_string(), "unknown method: gamma.reboot");

    drop(client);
    daemon.stop();
}

#[test]
fn test_watch_streams_snapshots() {
    let daemon = Daemon::start();
    let watcher = daemon.client();

    let engine = Arc::clone(&daemon.engine);
    let setter = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        engine.set_temperature(2500, 6500).unwrap();
    });

    let mut seen = Vec::new();
    watcher
        .watch(|snapshot| {
            seen.push(snapshot.current_temp);
            snapshot.current_temp != 2500
        })
        .unwrap();
    setter.join().unwrap();

    assert!(seen.len() >= 2, "initial snapshot plus updates, got {seen:?}");
    assert_eq!(seen.last(), Some(&2500));

    daemon.stop();
}

#[test]
fn test_invalid_json_gets_error_reply() {
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixStream;

    let daemon = Daemon::start();
    let mut stream = UnixStream::connect(daemon.server.socket_path()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream.write_all(b"not json\n").unwrap();

    let mut line = String::new();
    BufReader::new(stream.try_clone().unwrap())
        .read_line(&mut line)
        .unwrap();
    let response: Value = serde_json::from_str(line.trim()).unwrap();
    assert!(response["error"].as_str().is_some());

    drop(stream);
    daemon.stop();
}
