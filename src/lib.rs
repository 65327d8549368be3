//! # korquad-rag
//!
//! Korean question answering over the KorQuAD v1.0 dataset with
//! retrieval-augmented generation.
//!
//! The service ingests the KorQuAD Wikipedia dump into a local SQLite
//! store (paragraphs → overlapping chunks → embedding vectors), retrieves
//! the passages most similar to an incoming question, filters them with
//! Korean-aware quality checks, and asks an instruction-tuned language
//! model to answer from the retrieved context. Answers come back with
//! cited sources and quality metrics.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────┐
//! │ KorQuAD JSON │──▶│  Pipeline     │──▶│  SQLite    │
//! │  (Wikipedia) │   │ Chunk+Embed  │   │  vectors   │
//! └──────────────┘   └──────────────┘   └─────┬─────┘
//!                                             │
//!                        ┌────────────────────┤
//!                        ▼                    ▼
//!                   ┌──────────┐       ┌──────────┐
//!                   │   CLI    │       │   HTTP   │
//!                   │  (krag)  │       │ (axum)   │
//!                   └──────────┘       └────┬─────┘
//!                                           ▼
//!                                      ┌──────────┐
//!                                      │   LLM    │
//!                                      └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! krag init                          # create the store
//! krag ingest --path korquad_v1.0_train.json
//! krag embed pending                 # backfill vectors
//! krag ask "대한민국의 수도는 어디인가?"
//! krag serve                         # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with env overrides |
//! | [`dataset`] | KorQuAD v1.0 JSON parsing |
//! | [`chunk`] | Overlapping character-window chunking |
//! | [`ingest`] | Dataset ingestion pipeline |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`embed_cmd`] | Embedding backfill and rebuild |
//! | [`retriever`] | Cosine-similarity passage retrieval |
//! | [`quality`] | Korean-aware result filtering and answer validation |
//! | [`llm`] | Answer generation providers |
//! | [`rag`] | The question-answering chain |
//! | [`loader`] | Background startup initialization |
//! | [`server`] | HTTP API |

pub mod chunk;
pub mod config;
pub mod dataset;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod ingest;
pub mod llm;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod quality;
pub mod rag;
pub mod retriever;
pub mod server;
pub mod stats;
