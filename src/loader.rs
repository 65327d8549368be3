//! Background startup initialization.
//!
//! The server answers `/health` immediately while the index is prepared in a
//! background task; `/api/v1/qa` returns 503 with this loader's status until
//! the store is ready. If the store already holds documents the loader
//! short-circuits to ready without touching the dataset file.
//!
//! State lives behind a plain `std::sync::RwLock`: every critical section is
//! a handful of field writes, so there is nothing to await while holding it.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::config::Config;
use crate::dataset;
use crate::embed_cmd;
use crate::ingest;
use crate::migrate;
use crate::retriever;

const STATUS_IDLE: &str = "대기 중";

/// Snapshot of the loader state, serialized by `/api/v1/loading/status`.
#[derive(Debug, Clone, Serialize)]
pub struct LoadStatus {
    pub is_loading: bool,
    pub is_ready: bool,
    pub loading_progress: f64,
    pub loading_status: String,
    pub error_message: Option<String>,
    pub elapsed_secs: Option<i64>,
}

#[derive(Debug)]
struct LoadState {
    is_loading: bool,
    is_ready: bool,
    progress: f64,
    status: String,
    error: Option<String>,
    started_at: Option<i64>,
}

#[derive(Clone)]
pub struct DataLoader {
    state: Arc<RwLock<LoadState>>,
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DataLoader {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(LoadState {
                is_loading: false,
                is_ready: false,
                progress: 0.0,
                status: STATUS_IDLE.to_string(),
                error: None,
                started_at: None,
            })),
        }
    }

    pub fn snapshot(&self) -> LoadStatus {
        let state = self.state.read().expect("loader lock poisoned");
        LoadStatus {
            is_loading: state.is_loading,
            is_ready: state.is_ready,
            loading_progress: state.progress,
            loading_status: state.status.clone(),
            error_message: state.error.clone(),
            elapsed_secs: state
                .started_at
                .map(|start| chrono::Utc::now().timestamp() - start),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state.read().expect("loader lock poisoned").is_ready
    }

    pub fn is_loading(&self) -> bool {
        self.state.read().expect("loader lock poisoned").is_loading
    }

    /// Claim the loading slot. Returns false when a load is already running
    /// or the index is already ready.
    fn begin(&self) -> bool {
        let mut state = self.state.write().expect("loader lock poisoned");
        if state.is_loading || state.is_ready {
            return false;
        }
        state.is_loading = true;
        state.progress = 0.0;
        state.status = "초기화 시작".to_string();
        state.error = None;
        state.started_at = Some(chrono::Utc::now().timestamp());
        true
    }

    fn update(&self, progress: f64, status: impl Into<String>) {
        let status = status.into();
        tracing::info!("[{:.1}%] {}", progress * 100.0, status);
        let mut state = self.state.write().expect("loader lock poisoned");
        state.progress = progress;
        state.status = status;
    }

    fn finish_ready(&self) {
        let mut state = self.state.write().expect("loader lock poisoned");
        state.is_loading = false;
        state.is_ready = true;
        state.progress = 1.0;
    }

    fn fail(&self, message: String) {
        tracing::warn!("initialization failed: {}", message);
        let mut state = self.state.write().expect("loader lock poisoned");
        state.is_loading = false;
        state.error = Some(message);
    }

    /// Run initialization to completion. No-op if already loading or ready.
    pub async fn initialize(
        &self,
        config: &Config,
        pool: &SqlitePool,
        data_path: Option<PathBuf>,
    ) -> Result<()> {
        if !self.begin() {
            tracing::info!("initialization already running or complete");
            return Ok(());
        }

        match self.run(config, pool, data_path).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.fail(e.to_string());
                Err(e)
            }
        }
    }

    async fn run(&self, config: &Config, pool: &SqlitePool, data_path: Option<PathBuf>) -> Result<()> {
        self.update(0.05, "저장소 초기화 중...");
        migrate::apply_schema(pool).await?;

        let info = retriever::collection_info(pool).await?;
        if info.documents > 0 {
            tracing::info!("existing index found: {} documents", info.documents);
            self.update(1.0, "기존 인덱스 로드 완료");
            self.finish_ready();
            return Ok(());
        }

        let path = match data_path.or_else(|| config.dataset.path.clone()) {
            Some(p) if p.exists() => p,
            _ => bail!("데이터 파일을 찾을 수 없습니다."),
        };

        self.update(0.1, "데이터 전처리 중...");
        let parse_path = path.clone();
        let file =
            tokio::task::spawn_blocking(move || dataset::load_file(&parse_path)).await??;
        let passages = dataset::passages(&file);
        if passages.is_empty() {
            bail!("전처리된 데이터가 없습니다.");
        }

        let total = passages.len();
        for (i, passage) in passages.iter().enumerate() {
            ingest::store_passage(config, pool, passage).await?;
            if i % 200 == 0 || i + 1 == total {
                let progress = 0.2 + (i + 1) as f64 / total as f64 * 0.4;
                self.update(progress, format!("문서 저장 중... ({}/{})", i + 1, total));
            }
        }

        if config.embedding.is_enabled() {
            self.update(0.6, "임베딩 생성 중...");
            let loader = self.clone();
            let outcome = embed_cmd::embed_pending(
                config,
                pool,
                config.embedding.batch_size,
                None,
                move |done, pending_total| {
                    let progress = 0.6 + done as f64 / pending_total.max(1) as f64 * 0.35;
                    loader.update(
                        progress,
                        format!("임베딩 생성 중... ({}/{})", done, pending_total),
                    );
                },
            )
            .await?;
            tracing::info!(
                "embedding backfill: {} embedded, {} failed",
                outcome.embedded,
                outcome.failed
            );
        } else {
            tracing::warn!("embedding provider disabled; index built without vectors");
        }

        self.update(0.95, "최종 검증 중...");
        ingest::write_index_meta(pool, config, &path, total).await?;

        let final_info = retriever::collection_info(pool).await?;
        tracing::info!("initialization complete: {} documents", final_info.documents);

        self.update(1.0, "초기화 완료");
        self.finish_ready();
        Ok(())
    }
}
