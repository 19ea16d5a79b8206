//! # Query Quill
//!
//! Retrieval-augmented question answering over technical documents.
//!
//! Paired `<base>_Technical.txt` / `<base>_Metadata.json` files are chunked
//! into five-sentence passages, embedded, and bulk-loaded into a search
//! index. A question is embedded the same way, the most similar passages are
//! retrieved by cosine similarity, and a text-generation model answers from
//! those passages only.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────────┐
//! │   Corpus    │──▶│   Pipeline   │──▶│ Search index  │
//! │ txt + json  │   │ Chunk+Embed  │   │ ES / memory   │
//! └─────────────┘   └──────────────┘   └───────┬───────┘
//!                                              │ top-N passages
//!                      ┌───────────────────────┤
//!                      ▼                       ▼
//!                 ┌──────────┐           ┌──────────┐
//!                 │   CLI    │           │   HTTP   │──▶ generator
//!                 │ (quill)  │           │  server  │
//!                 └──────────┘           └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`models`] | Passage, indexed record, hit and answer types |
//! | [`chunk`] | Marker-based five-sentence chunking |
//! | [`corpus`] | Discovering paired text/metadata files |
//! | [`table`] | Passage CSV tables |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Search index abstraction (Elasticsearch, in-memory) |
//! | [`generate`] | Prompt assembly and text-generation providers |
//! | [`pipeline`] | Stage orchestration shared by CLI and server |
//! | [`retry`] | Bounded retry for outbound HTTP |
//! | [`server`] | HTTP server |
//! | [`commands`] | CLI command implementations |
//! | [`logging`] | `tracing` subscriber setup |

pub mod chunk;
pub mod commands;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod generate;
pub mod index;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod retry;
pub mod server;
pub mod table;
