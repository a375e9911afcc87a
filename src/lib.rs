//! # docchat
//!
//! Command-line client for a retrieval-augmented document chat service.
//!
//! The service answers questions over an uploaded document corpus and
//! returns each answer whole, with confidence, citations, and origin
//! metadata. This crate talks to it over HTTP and drives the stores from
//! [`docchat_core`]: a conversation with progressive reveal, and a document
//! manager with filtered listing, selection, and settle-all batch actions.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────────────┐   ┌─────────────┐
//! │    CLI     │──▶│   docchat-core    │──▶│ HttpBackend │──▶ service
//! │ (docchat)  │   │ stores + reveal   │   │  (reqwest)  │
//! └────────────┘   └───────────────────┘   └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docchat upload handbook.pdf terms.md
//! docchat ask "What is the refund window?"
//! docchat docs list --status failed
//! docchat docs reindex --pending
//! docchat chat
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`client`] | HTTP backend and connection settings |
//! | [`clock`] | Frame clock for progressive reveal |
//! | [`chat`] | `ask`, `chat`, and `feedback` commands |
//! | [`docs`] | Document listing, chunks, reindex, delete |
//! | [`upload`] | File upload |
//! | [`progress`] | Upload progress reporting |
//! | [`present`] | Terminal rendering |

pub mod chat;
pub mod client;
pub mod clock;
pub mod config;
pub mod docs;
pub mod present;
pub mod progress;
pub mod upload;
