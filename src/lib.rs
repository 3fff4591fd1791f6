//! # whiz-search
//!
//! Retrieval backend for a knowledge-base assistant. One query is issued
//! against several vector-store collections, the hits are merged, boosted by
//! content type and ranked globally. A file-based task queue lets several
//! machines share search and maintenance work through a synced directory.
//!
//! ## Architecture
//!
//! ```text
//!                        ┌──────────────┐
//!                        │  User Query  │
//!                        └──────┬───────┘
//!                               │ embed once
//!          ┌────────────────────┼────────────────────┐
//!          ▼                    ▼                    ▼
//!   ┌─────────────┐      ┌─────────────┐      ┌─────────────┐
//!   │ collection 1│      │ collection 2│  …   │ collection N│
//!   │  (timeout)  │      │  (timeout)  │      │  (timeout)  │
//!   └──────┬──────┘      └──────┬──────┘      └──────┬──────┘
//!          └────────────────────┼────────────────────┘
//!                               │ failures skipped, recorded
//!                               ▼
//!                  ┌───────────────────────┐
//!                  │ Boost                 │
//!                  │  book/training: -0.5  │
//!                  │  expert title:  -0.6  │
//!                  │  larger one wins      │
//!                  └───────────┬───────────┘
//!                              │
//!              ┌───────────────┴───────────────┐
//!              ▼ baseline                      ▼ hybrid
//!   ┌─────────────────────┐       ┌──────────────────────────┐
//!   │ sort by distance    │       │ BM25 over the pool       │
//!   │ tie: priority, rank │       │ + synonym expansion      │
//!   └──────────┬──────────┘       │ distance -= 0.3 × bm25   │
//!              │                  │ LRU cache                │
//!              │                  └────────────┬─────────────┘
//!              └───────────────┬───────────────┘
//!                              ▼
//!                     ┌────────────────┐
//!                     │ Top n_results  │
//!                     └────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for server, store, ranking and queue
//! - [`models`] - Shared data types: `Candidate`, `QueryResult`, request/response types
//! - [`store`] - `CollectionStore` / `QueryEmbedder` traits and the ChromaDB client
//! - [`llm::embeddings`] - Query embedding via Ollama or OpenAI-compatible APIs
//! - [`search::boost`] - Pure content-type-aware distance adjustment
//! - [`search::fusion`] - Concurrent fan-out, merge, global sort and truncation
//! - [`search::bm25`] - Per-query in-memory BM25 scoring powered by tantivy
//! - [`search::hybrid`] - Lexical + semantic blend with synonym expansion and caching
//! - [`queue`] - todo/processing/completed task directories and the worker loop
//! - [`api`] - Axum HTTP handlers for `/query` and `/health`
//! - [`state`] - Shared application state

pub mod api;
pub mod config;
pub mod llm;
pub mod models;
pub mod queue;
pub mod search;
pub mod state;
pub mod store;
