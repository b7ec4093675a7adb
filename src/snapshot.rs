//! Snapshot files
//!
//! Reads and writes model snapshots: raw channel dumps (the payload of an
//! update frame), bundled asset trees and JSON documents.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::format::{asset, channel, literal, FormatError};
use crate::model::{Item, Model, ROOT};

/// Snapshot errors
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Model has no root item")]
    EmptyModel,
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;

fn read(path: &Path) -> SnapshotResult<Vec<u8>> {
    std::fs::read(path).map_err(|source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write(path: &Path, contents: &[u8]) -> SnapshotResult<()> {
    std::fs::write(path, contents).map_err(|source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Decode a channel dump file. Decoding is strict.
pub fn load_channel(path: &Path) -> SnapshotResult<Vec<Item>> {
    let items = channel::try_load(&read(path)?)?;
    tracing::info!("Loaded {} items from {}", items.len(), path.display());
    Ok(items)
}

/// Write the whole model as a channel dump
pub fn save_channel(model: &Model, path: &Path) -> SnapshotResult<()> {
    let items = model.dump(ROOT, true).ok_or(SnapshotError::EmptyModel)?;
    let payload = channel::dump(&items)?;
    write(path, &payload)?;
    tracing::info!("Saved {} items to {}", items.len(), path.display());
    Ok(())
}

/// Decode an asset-tree file
pub fn load_asset(path: &Path) -> SnapshotResult<Vec<Item>> {
    let items = asset::load(&read(path)?)?;
    tracing::info!("Loaded {} items from {}", items.len(), path.display());
    Ok(items)
}

/// Write the model as an indented JSON document
pub fn save_json(model: &Model, path: &Path) -> SnapshotResult<()> {
    let document = literal::dump_model(model, ROOT).ok_or(SnapshotError::EmptyModel)?;
    let text = literal::to_document(&document)?;
    write(path, text.as_bytes())?;
    tracing::info!("Exported model to {}", path.display());
    Ok(())
}
