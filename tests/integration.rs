use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn krag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
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
                        "context": "대한민국은 동아시아의 한반도 남부에 위치한 나라이다. 수도는 서울특별시이다. 공용어는 한국어이다.",
                        "qas": [
                            {
                                "id": "6566495-0-0",
                                "question": "대한민국의 수도는 어디인가?",
                                "answers": [{"text": "서울특별시", "answer_start": 32}]
                            }
                        ]
                    },
                    {
                        "context": "대한민국은 동아시아의 한반도 남부에 위치한 나라이다. 수도는 서울특별시이다. 공용어는 한국어이다.",
                        "qas": [
                            {
                                "id": "6566495-1-0",
                                "question": "대한민국의 공용어는 무엇인가?",
                                "answers": [{"text": "한국어", "answer_start": 48}]
                            }
                        ]
                    }
                ]
            },
            {
                "title": "세종대왕",
                "paragraphs": [
                    {
                        "context": "세종대왕은 조선의 제4대 왕으로 훈민정음을 창제하였다. 재위 기간은 1418년부터 1450년까지이다.",
                        "qas": [
                            {
                                "id": "571304-0-0",
                                "question": "훈민정음을 창제한 왕은 누구인가?",
                                "answers": [{"text": "세종대왕", "answer_start": 0}]
                            }
                        ]
                    }
                ]
            },
            {
                "title": "한강",
                "paragraphs": [
                    {
                        "context": "한강은 대한민국의 중부를 흐르는 강이다. 서울특별시를 관통하여 서해로 흘러든다.",
                        "qas": [
                            {
                                "id": "102938-0-0",
                                "question": "한강은 어느 바다로 흘러드는가?",
                                "answers": [{"text": "서해", "answer_start": 36}]
                            }
                        ]
                    }
                ]
            }
        ]
    }"#
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let dataset_path = root.join("korquad_v1.0_train.json");
    fs::write(&dataset_path, korquad_fixture()).unwrap();

    let config_content = format!(
        r#"[store]
dir = "{}/index"

[dataset]
path = "{}/korquad_v1.0_train.json"

[chunking]
max_chars = 500
overlap_chars = 50

[retrieval]
top_k = 5
score_threshold = 0.6

[server]
bind = "127.0.0.1:0"
"#,
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("krag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_krag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = krag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run krag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_store() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_krag(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_krag(&config_path, &["init"]);
    let (_, _, success2) = run_krag(&config_path, &["init"]);
    assert!(success1);
    assert!(success2);
}

#[test]
fn test_ingest_writes_unique_passages() {
    let (_tmp, config_path) = setup_test_env();
    run_krag(&config_path, &["init"]);

    let (stdout, stderr, success) = run_krag(&config_path, &["ingest"]);
    assert!(success, "ingest failed: stderr={}", stderr);
    // The 대한민국 context repeats in the dump; only 3 unique passages exist.
    assert!(stdout.contains("unique passages: 3"), "stdout={}", stdout);
    assert!(stdout.contains("documents written: 3"), "stdout={}", stdout);
    assert!(stdout.contains("chunks written: 3"), "stdout={}", stdout);
    assert!(stdout.contains("ok"));
}

#[test]
fn test_ingest_idempotent_skips_unchanged() {
    let (_tmp, config_path) = setup_test_env();
    run_krag(&config_path, &["init"]);

    let (_, _, success1) = run_krag(&config_path, &["ingest"]);
    assert!(success1);

    let (stdout, _, success2) = run_krag(&config_path, &["ingest"]);
    assert!(success2);
    assert!(
        stdout.contains("documents written: 0 (unchanged: 3)"),
        "stdout={}",
        stdout
    );
}

#[test]
fn test_ingest_dry_run_writes_nothing() {
    let (_tmp, config_path) = setup_test_env();
    run_krag(&config_path, &["init"]);

    let (stdout, _, success) = run_krag(&config_path, &["ingest", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("dry-run"));
    assert!(stdout.contains("estimated chunks: 3"), "stdout={}", stdout);

    let (stats_out, _, _) = run_krag(&config_path, &["stats"]);
    assert!(stats_out.contains("Documents:   0"), "stdout={}", stats_out);
}

#[test]
fn test_ingest_with_limit() {
    let (_tmp, config_path) = setup_test_env();
    run_krag(&config_path, &["init"]);

    let (stdout, _, success) = run_krag(&config_path, &["ingest", "--limit", "1"]);
    assert!(success);
    assert!(stdout.contains("documents written: 1"), "stdout={}", stdout);
}

#[test]
fn test_ingest_missing_dataset_errors() {
    let (tmp, config_path) = setup_test_env();
    fs::remove_file(tmp.path().join("korquad_v1.0_train.json")).unwrap();

    let (_, stderr, success) = run_krag(&config_path, &["ingest"]);
    assert!(!success);
    assert!(stderr.contains("does not exist"), "stderr={}", stderr);
}

#[test]
fn test_ingest_path_override() {
    let (tmp, config_path) = setup_test_env();
    run_krag(&config_path, &["init"]);

    let other = tmp.path().join("other.json");
    fs::write(&other, korquad_fixture()).unwrap();

    let (stdout, _, success) = run_krag(
        &config_path,
        &["ingest", "--path", other.to_str().unwrap()],
    );
    assert!(success);
    assert!(stdout.contains("documents written: 3"));
}

#[test]
fn test_search_errors_when_embeddings_disabled() {
    let (_tmp, config_path) = setup_test_env();
    run_krag(&config_path, &["init"]);
    run_krag(&config_path, &["ingest"]);

    let (_, stderr, success) = run_krag(&config_path, &["search", "대한민국의 수도"]);
    assert!(!success);
    assert!(stderr.contains("embeddings"), "stderr={}", stderr);
}

#[test]
fn test_ask_errors_when_embeddings_disabled() {
    let (_tmp, config_path) = setup_test_env();
    run_krag(&config_path, &["init"]);
    run_krag(&config_path, &["ingest"]);

    let (_, stderr, success) = run_krag(&config_path, &["ask", "대한민국의 수도는 어디인가?"]);
    assert!(!success);
    assert!(stderr.contains("embeddings"), "stderr={}", stderr);
}

#[test]
fn test_embed_pending_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();
    run_krag(&config_path, &["init"]);

    let (_, stderr, success) = run_krag(&config_path, &["embed", "pending"]);
    assert!(!success);
    assert!(stderr.contains("disabled"), "stderr={}", stderr);
}

#[test]
fn test_embed_rebuild_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();
    run_krag(&config_path, &["init"]);

    let (_, stderr, success) = run_krag(&config_path, &["embed", "rebuild"]);
    assert!(!success);
    assert!(stderr.contains("disabled"), "stderr={}", stderr);
}

#[test]
fn test_stats_reports_counts() {
    let (_tmp, config_path) = setup_test_env();
    run_krag(&config_path, &["init"]);
    run_krag(&config_path, &["ingest"]);

    let (stdout, _, success) = run_krag(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Documents:   3"), "stdout={}", stdout);
    assert!(stdout.contains("Chunks:      3"), "stdout={}", stdout);
    assert!(stdout.contains("dataset_path"), "stdout={}", stdout);
}

#[test]
fn test_store_dir_env_override() {
    let (tmp, config_path) = setup_test_env();
    let override_dir = tmp.path().join("elsewhere");

    let binary = krag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("init")
        .env("KRAG_STORE_DIR", override_dir.to_str().unwrap())
        .output()
        .unwrap();

    assert!(output.status.success());
    assert!(
        override_dir.join("korquad.sqlite").exists(),
        "store not created in overridden dir"
    );
}

#[test]
fn test_missing_config_errors() {
    let (tmp, _) = setup_test_env();
    let bogus = tmp.path().join("nope.toml");

    let binary = krag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(bogus.to_str().unwrap())
        .arg("init")
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to read config file"), "stderr={}", stderr);
}
