//! Live-server smoke tests.
//!
//! Each test spawns the `krag serve` binary against a temp store and drives
//! the HTTP API with a blocking client. The tiny fixture dataset loads in
//! well under the polling timeout.

use std::fs;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn krag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("krag");
    path
}

fn korquad_fixture() -> &'static str {
    r#"{
        "version": "KorQuAD_v1.0_train",
        "data": [
            {
                "title": "대한민국",
                "paragraphs": [
                    {
                        "context": "대한민국은 동아시아의 한반도 남부에 위치한 나라이다. 수도는 서울특별시이다.",
                        "qas": [
                            {
                                "id": "6566495-0-0",
                                "question": "대한민국의 수도는 어디인가?",
                                "answers": [{"text": "서울특별시", "answer_start": 32}]
                            }
                        ]
                    }
                ]
            },
            {
                "title": "세종대왕",
                "paragraphs": [
                    {
                        "context": "세종대왕은 조선의 제4대 왕으로 훈민정음을 창제하였다.",
                        "qas": [
                            {
                                "id": "571304-0-0",
                                "question": "훈민정음을 창제한 왕은 누구인가?",
                                "answers": [{"text": "세종대왕", "answer_start": 0}]
                            }
                        ]
                    }
                ]
            }
        ]
    }"#
}

/// Kills the server process when the test ends, pass or fail.
struct ServerGuard {
    child: Child,
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Write a config, spawn `krag serve`, and wait for /health to answer.
/// `with_dataset` controls whether the loader has a dataset to ingest.
fn spawn_server(with_dataset: bool) -> (TempDir, ServerGuard, String) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    let port = free_port();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let dataset_section = if with_dataset {
        let dataset_path = root.join("korquad_v1.0_train.json");
        fs::write(&dataset_path, korquad_fixture()).unwrap();
        format!("[dataset]\npath = \"{}\"\n\n", dataset_path.display())
    } else {
        String::new()
    };

    let config_content = format!(
        r#"[store]
dir = "{}/index"

{}[server]
bind = "127.0.0.1:{}"
"#,
        root.display(),
        dataset_section,
        port
    );

    let config_path = config_dir.join("krag.toml");
    fs::write(&config_path, config_content).unwrap();

    let child = Command::new(krag_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("serve")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .expect("failed to spawn krag serve");

    let base_url = format!("http://127.0.0.1:{}", port);
    let client = reqwest::blocking::Client::new();
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        if let Ok(resp) = client.get(format!("{}/health", base_url)).send() {
            if resp.status().is_success() {
                break;
            }
        }
        assert!(
            Instant::now() < deadline,
            "server did not become healthy in time"
        );
        std::thread::sleep(Duration::from_millis(100));
    }

    (tmp, ServerGuard { child }, base_url)
}

fn wait_until_ready(client: &reqwest::blocking::Client, base_url: &str) {
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        let status: serde_json::Value = client
            .get(format!("{}/api/v1/loading/status", base_url))
            .send()
            .unwrap()
            .json()
            .unwrap();
        if status["is_ready"].as_bool() == Some(true) {
            return;
        }
        if let Some(err) = status["error_message"].as_str() {
            panic!("loading failed: {}", err);
        }
        assert!(Instant::now() < deadline, "loader never became ready");
        std::thread::sleep(Duration::from_millis(100));
    }
}

#[test]
fn test_server_endpoints() {
    let (_tmp, _guard, base_url) = spawn_server(true);
    let client = reqwest::blocking::Client::new();

    // Health and banner.
    let health: serde_json::Value = client
        .get(format!("{}/health", base_url))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert!(health["version"].is_string());

    let versioned: serde_json::Value = client
        .get(format!("{}/api/v1/health", base_url))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(versioned["status"], "ok");

    let root: serde_json::Value = client
        .get(format!("{}/", base_url))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(root["message"], "KorQuAD RAG API");

    // The fixture is tiny, so the background loader finishes quickly.
    wait_until_ready(&client, &base_url);

    // System info reflects the ingested fixture.
    let info: serde_json::Value = client
        .get(format!("{}/api/v1/system/info", base_url))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(info["retriever"]["documents"], 2);
    assert_eq!(info["retriever"]["chunks"], 2);
    assert_eq!(info["embedding"]["provider"], "disabled");

    // Empty question rejected.
    let resp = client
        .post(format!("{}/api/v1/qa", base_url))
        .json(&serde_json::json!({"question": "   "}))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    // Out-of-range top_k rejected.
    let resp = client
        .post(format!("{}/api/v1/qa", base_url))
        .json(&serde_json::json!({"question": "수도는?", "top_k": 0}))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    // Malformed payload rejected by the framework.
    let resp = client
        .post(format!("{}/api/v1/qa", base_url))
        .json(&serde_json::json!({}))
        .send()
        .unwrap();
    assert!(resp.status().is_client_error());

    let resp = client
        .post(format!("{}/api/v1/qa", base_url))
        .json(&serde_json::json!({"question": 123}))
        .send()
        .unwrap();
    assert!(resp.status().is_client_error());

    // A valid question cannot be answered without an embedding provider;
    // the error says so instead of masquerading as a server crash.
    let resp = client
        .post(format!("{}/api/v1/qa", base_url))
        .json(&serde_json::json!({"question": "대한민국의 수도는 어디인가?"}))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["error"]["code"], "embeddings_disabled");

    // Re-initialization is refused once ready.
    let init: serde_json::Value = client
        .post(format!("{}/api/v1/loading/initialize", base_url))
        .json(&serde_json::json!({}))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(init["message"], "이미 초기화 완료되었습니다.");
}

#[test]
fn test_server_without_dataset_stays_unready() {
    let (_tmp, _guard, base_url) = spawn_server(false);
    let client = reqwest::blocking::Client::new();

    // Loader fails (no dataset), but health stays up.
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        let status: serde_json::Value = client
            .get(format!("{}/api/v1/loading/status", base_url))
            .send()
            .unwrap()
            .json()
            .unwrap();
        if status["error_message"].is_string() {
            assert_eq!(status["is_ready"], false);
            assert_eq!(status["is_loading"], false);
            break;
        }
        assert!(Instant::now() < deadline, "loader never reported the error");
        std::thread::sleep(Duration::from_millis(100));
    }

    let health: serde_json::Value = client
        .get(format!("{}/health", base_url))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(health["status"], "ok");

    // Questions are refused with 503 while the index is not ready.
    let resp = client
        .post(format!("{}/api/v1/qa", base_url))
        .json(&serde_json::json!({"question": "대한민국의 수도는 어디인가?"}))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 503);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["error"]["code"], "service_unavailable");

    // Manual initialization restarts the loader (and fails again, but is
    // accepted since the loader is idle).
    let init: serde_json::Value = client
        .post(format!("{}/api/v1/loading/initialize", base_url))
        .json(&serde_json::json!({}))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(init["message"], "데이터 초기화를 시작했습니다.");
}
