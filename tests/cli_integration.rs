// CLI integration tests: each test runs `paramstash` commands against a spawned server.
use std::io::{Read, Write};
use std::net::TcpListener;
use std::process::{Child, Command, Output, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::thread::sleep;
use std::time::{Duration, Instant};

use serde_json::Value;

static SERVER_LOCK: Mutex<()> = Mutex::new(());

struct Server {
    child: Child,
    endpoint: String,
    _guard: MutexGuard<'static, ()>,
}

impl Server {
    fn start(max_value_bytes: usize) -> Self {
        let guard = SERVER_LOCK
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);
        let bind = format!("127.0.0.1:{port}");
        let mut child = cmd()
            .args(["serve", "--bind", &bind, "--max-value-bytes"])
            .arg(max_value_bytes.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn serve");

        let health = format!("http://{bind}/healthz");
        let start = Instant::now();
        loop {
            if ureq::get(&health).call().is_ok() {
                break;
            }
            if let Ok(Some(status)) = child.try_wait() {
                panic!("server exited early: {status}");
            }
            assert!(start.elapsed() < Duration::from_secs(8), "server did not start");
            sleep(Duration::from_millis(20));
        }
        Self {
            child,
            endpoint: format!("http://{bind}"),
            _guard: guard,
        }
    }

    fn run(&self, args: &[&str]) -> Output {
        cmd()
            .arg("--endpoint")
            .arg(&self.endpoint)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .expect("run paramstash")
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_paramstash");
    let mut command = Command::new(exe);
    command
        .env_remove("PARAMSTASH_ENDPOINT")
        .env_remove("PARAMSTASH_TOKEN")
        .env_remove("PARAMSTASH_CHUNK_SIZE")
        .env_remove("RUST_LOG");
    command
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn put_get_list_delete_flow() {
    let server = Server::start(4096);

    let put = server.run(&["put", "/app/token", "secret123"]);
    assert!(put.status.success(), "stderr: {}", stderr(&put));

    let get = server.run(&["get", "/app/token"]);
    assert!(get.status.success());
    assert_eq!(stdout(&get), "secret123\n");

    let exists = server.run(&["exists", "/app/token"]);
    assert_eq!(stdout(&exists).trim(), "true");

    let list = server.run(&["list", "--json"]);
    let json: Value = serde_json::from_str(&stdout(&list)).expect("json");
    assert_eq!(json["names"][0], "/app/token");

    let delete = server.run(&["delete", "/app/token"]);
    assert!(delete.status.success());
    let exists = server.run(&["exists", "/app/token"]);
    assert_eq!(stdout(&exists).trim(), "false");
}

#[test]
fn missing_parameter_reports_on_stderr_and_exits_nonzero() {
    let server = Server::start(4096);

    let get = server.run(&["get", "/app/missing"]);
    assert_eq!(get.status.code(), Some(3));
    assert!(stdout(&get).is_empty());
    let err = stderr(&get);
    assert!(err.contains(" get: "), "stderr: {err}");
    assert!(err.contains("ParameterNotFound"), "stderr: {err}");
    assert_eq!(err.lines().count(), 1, "reported once: {err}");

    let quiet = server.run(&["--quiet", "get", "/app/missing"]);
    assert_eq!(quiet.status.code(), Some(3));
    assert!(stderr(&quiet).is_empty());
}

#[test]
fn get_continues_past_failures() {
    let server = Server::start(4096);
    server.run(&["put", "/a", "one"]);
    server.run(&["put", "/c", "three"]);

    let get = server.run(&["get", "--json", "/a", "/b", "/c"]);
    assert_eq!(get.status.code(), Some(3));
    let json: Value = serde_json::from_str(&stdout(&get)).expect("json");
    let params = json["params"].as_array().expect("params");
    assert_eq!(params.len(), 2);
    assert_eq!(params[1]["value"], "three");
}

#[test]
fn large_file_round_trip_through_parts() {
    let server = Server::start(8);
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(b"-----BEGIN-----\nabcdef\n-----END-----")
        .expect("write");

    let put = server.run(&["put", "/tls/cert", "-f", file.path().to_str().unwrap()]);
    assert!(put.status.success(), "stderr: {}", stderr(&put));

    let parts = server.run(&["parts", "--json", "/tls/cert"]);
    let json: Value = serde_json::from_str(&stdout(&parts)).expect("json");
    let parts = json["parts"].as_array().expect("parts");
    assert_eq!(parts.len(), 5);
    assert_eq!(parts[0], "/tls/cert/cert_aa");

    let get = server.run(&["get", "--large", "/tls/cert"]);
    assert!(get.status.success());
    let mut expected = String::new();
    std::fs::File::open(file.path())
        .expect("open")
        .read_to_string(&mut expected)
        .expect("read");
    assert_eq!(stdout(&get), format!("{expected}\n"));

    let delete = server.run(&["delete", "--large", "/tls/cert"]);
    assert!(delete.status.success());
    let list = server.run(&["list"]);
    assert!(stdout(&list).is_empty());
}

#[test]
fn value_beyond_part_capacity_is_rejected() {
    let server = Server::start(4);
    let value = "z".repeat(37);
    let put = server.run(&["put", "/big", &value]);
    assert_eq!(put.status.code(), Some(6));
    assert!(stderr(&put).contains("CapacityExceeded"));
    assert!(stdout(&server.run(&["list"])).is_empty());
}

#[test]
fn missing_file_is_file_unreadable() {
    let server = Server::start(4096);
    let put = server.run(&["put", "/a", "-f", "/nonexistent/paramstash-value"]);
    assert_eq!(put.status.code(), Some(5));
}

#[test]
fn unreadable_tls_ca_is_reported_before_any_request() {
    let output = cmd()
        .args([
            "--endpoint",
            "https://127.0.0.1:1",
            "--tls-ca",
            "/nonexistent/paramstash-ca.pem",
            "list",
        ])
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(5));
    assert!(stderr(&output).contains("TLS CA"));
}

#[test]
fn eval_requires_opt_in() {
    let server = Server::start(4096);
    server.run(&["put", "/scripts/exit", "exit 9"]);

    let denied = server.run(&["eval", "/scripts/exit"]);
    assert_eq!(denied.status.code(), Some(7));
    assert!(stderr(&denied).contains("Permission"));

    let allowed = server.run(&["eval", "--allow-eval", "/scripts/exit"]);
    assert_eq!(allowed.status.code(), Some(9));
    assert!(!stderr(&allowed).contains("Permission"));
}

#[test]
fn chunk_size_above_store_limit_is_rejected_before_writing() {
    let server = Server::start(16);
    let put = server.run(&["--chunk-size", "32", "put", "/a", &"v".repeat(40)]);
    assert_eq!(put.status.code(), Some(2));
    assert!(stderr(&put).contains("store limit"), "stderr: {}", stderr(&put));
    assert!(stdout(&server.run(&["list"])).is_empty());

    let smaller = server.run(&["--chunk-size", "8", "put", "/a", &"v".repeat(40)]);
    assert!(smaller.status.success(), "stderr: {}", stderr(&smaller));
    let parts = server.run(&["parts", "/a"]);
    assert_eq!(stdout(&parts).lines().count(), 5);
}

#[test]
fn repeated_names_are_served_from_the_invocation_cache() {
    let server = Server::start(4096);
    server.run(&["put", "/a", "one"]);

    let get = server.run(&["get", "--cache", "/a", "/a"]);
    assert!(get.status.success());
    assert_eq!(stdout(&get), "one\none\n");

    let cache_only = server.run(&["get", "--cache-only", "/a"]);
    assert_eq!(cache_only.status.code(), Some(2));
}

#[test]
fn usage_errors_exit_with_invalid_call() {
    let output = cmd().args(["get"]).output().expect("run");
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("paramstash: "));

    let conflict = cmd()
        .args(["put", "/a", "v", "-f", "file"])
        .output()
        .expect("run");
    assert_eq!(conflict.status.code(), Some(2));
}

#[test]
fn version_is_json() {
    let output = cmd().arg("version").output().expect("run");
    assert!(output.status.success());
    let json: Value = serde_json::from_str(&stdout(&output)).expect("json");
    assert_eq!(json["name"], "paramstash");
}
