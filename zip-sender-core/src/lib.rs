#![doc = "zip-sender-core: core logic library for zip-sender."]

//! This crate contains the packing, archiving, pipeline and delivery logic for zip-sender.
//! Transport clients (the Telegram Bot API implementation) and the CLI live in the root crate.
//!
//! # Usage
//! Depend on this crate for everything that turns an `input/` tree into uploaded zip parts;
//! plug a concrete [`contract::ChatClient`] in at the delivery step.

pub mod archive;
pub mod contract;
pub mod delivery;
pub mod error;
pub mod packer;
pub mod pipeline;
pub mod progress;
pub mod staging;

/// Candidate cover file names, in order of preference.
pub const COVER_CANDIDATES: [&str; 2] = ["cover.jpg", "cover.png"];
