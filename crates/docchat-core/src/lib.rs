//! # docchat core
//!
//! Client-side logic for a retrieval-augmented chat service: data models,
//! the backend abstraction, and the stores that drive a chat session and a
//! document manager.
//!
//! This crate contains no async runtime, HTTP client, or terminal code.
//! Stores are cheap-to-clone handles that talk to any [`backend::Backend`];
//! the `docchat` crate supplies the HTTP implementation and a CLI.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Turns, answer metadata, wire types |
//! | [`backend`] | `Backend` trait and in-memory implementation |
//! | [`conversation`] | Turn lifecycle, fencing, feedback |
//! | [`reveal`] | Progressive reveal of answers |
//! | [`badges`] | Metadata badges for answered turns |
//! | [`listing`] | Filtered, paginated document listing with selection |
//! | [`batch`] | Reindex and settle-all delete over the listing |
//! | [`chunks`] | Per-document chunk browser |
//! | [`pagination`] | Offset/limit arithmetic |
//! | [`notice`] | Leveled user-facing notices |

pub mod backend;
pub mod badges;
pub mod batch;
pub mod chunks;
pub mod conversation;
pub mod listing;
pub mod models;
pub mod notice;
pub mod pagination;
pub mod reveal;
