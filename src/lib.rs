//! # Repo Atlas
//!
//! Repository analysis and documentation synthesis.
//!
//! Repo Atlas fetches a hosted repository's metadata and file tree,
//! classifies the project, partitions its files into named subsystems and
//! persists the result behind a per-repository status state machine. On
//! top of the stored partition it lazily generates and caches
//! natural-language descriptions, infers related subsystems, builds an
//! architecture graph for diagram renderers and answers questions in
//! per-client chat sessions.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────┐   ┌───────────────┐
//! │  GitHub  │──▶│ classify + partition │──▶│   Freshness   │
//! │   API    │   │     + inventory      │   │ CAS / leases  │
//! └──────────┘   └──────────────────────┘   └───────┬───────┘
//!                                                   ▼
//!                 ┌──────────┐              ┌───────────────┐
//!                 │ LLM API  │◀────────────▶│ SQLite store  │
//!                 └──────────┘  describe,   └───────┬───────┘
//!                               chat                │
//!                      ┌────────────────────────────┤
//!                      ▼                            ▼
//!                 ┌──────────┐                ┌──────────┐
//!                 │   CLI    │                │   HTTP   │
//!                 │ (atlas)  │                │   API    │
//!                 └──────────┘                └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! atlas init
//! atlas analyze sveltejs/kit
//! atlas subsystems sveltejs/kit
//! atlas describe sveltejs/kit Routes
//! atlas graph sveltejs/kit --related
//! atlas serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`repo_ref`] | Repository reference parsing |
//! | [`github`] | Hosting API client |
//! | [`classify`] | Framework classification |
//! | [`partition`] | Subsystem partitioning and roles |
//! | [`inventory`] | Languages and well-known files |
//! | [`store`] | Storage trait, SQLite and in-memory backends |
//! | [`freshness`] | Status state machine and freshness checks |
//! | [`generation`] | Text generation providers |
//! | [`describe`] | Cached subsystem descriptions and file explanations |
//! | [`related`] | Related-subsystem scoring |
//! | [`graph`] | Architecture graph model |
//! | [`chat`] | Chat sessions and grounded answers |
//! | [`events`] | Push notifications |
//! | [`pipeline`] | Analysis orchestration and queries |
//! | [`app`] | Service construction |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod app;
pub mod chat;
pub mod classify;
pub mod config;
pub mod db;
pub mod describe;
pub mod error;
pub mod events;
pub mod freshness;
pub mod generation;
pub mod github;
pub mod graph;
pub mod inventory;
pub mod migrate;
pub mod models;
pub mod partition;
pub mod pipeline;
pub mod related;
pub mod repo_ref;
pub mod server;
pub mod store;
