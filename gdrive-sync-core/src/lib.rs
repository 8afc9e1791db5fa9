#![doc = "gdrive-sync-core: incremental Google Drive → Markdown sync engine."]

//! This crate contains the engine behind the `gdrive-sync` CLI: traversal of a
//! Drive folder tree, the cache gate, per-document processing, cleanup of
//! orphaned artifacts and the deploy-marker decision.
//!
//! # Usage
//! Build a [`config::SyncConfig`], a [`contract::DocumentSource`] (usually a
//! [`drive::DriveClient`]) and a [`contract::ImageCodec`] (usually an
//! [`image_codec::AvifCodec`]), then call [`synchronise::synchronise`].

pub mod cache;
pub mod config;
pub mod contract;
pub mod drive;
pub mod frontmatter;
pub mod image_codec;
pub mod metadata;
pub mod pipeline;
pub mod reconcile;
pub mod retry;
pub mod synchronise;
pub mod transform;
pub mod traversal;
