//! Append-only, per-session conversation log.
//!
//! Layout under a session directory:
//! `conversation/parts/{NNNNNNNNNN}.json`, `conversation/meta.json`,
//! `conversation/cursor.json`.

use crate::error::{GraphError, GraphResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

/// Sidecar metadata tracked alongside the conversation parts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationMeta {
    /// Free-form metadata describing the conversation (titles, participant
    /// ids, etc). Not interpreted by the store itself.
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// The read cursor a client has acknowledged, persisted so a resumed client
/// can continue where it left off.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ConversationCursor {
    /// Last sequence number the client has consumed.
    pub last_seen_sequence: u32,
}

/// A single append-only user-visible turn.
pub struct ConversationStore {
    dir: PathBuf,
}

fn part_filename(seq: u32) -> String {
    format!("{seq:010}.json")
}

impl ConversationStore {
    /// Open (without yet creating) the conversation store nested under a
    /// session directory.
    pub fn new(session_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: session_dir.into().join("conversation"),
        }
    }

    fn parts_dir(&self) -> PathBuf {
        self.dir.join("parts")
    }

    /// Atomically write (or overwrite) one numbered part.
    pub async fn write_part(&self, seq: u32, data: &serde_json::Value) -> GraphResult<()> {
        let parts_dir = self.parts_dir();
        tokio::fs::create_dir_all(&parts_dir)
            .await
            .map_err(|e| GraphError::storage_error(format!("creating parts dir: {e}")))?;

        let final_path = parts_dir.join(part_filename(seq));
        let tmp_path = parts_dir.join(format!("{}.tmp-{}", part_filename(seq), uuid::Uuid::new_v4()));

        let payload = serde_json::to_vec(data)
            .map_err(|e| GraphError::storage_error(format!("serializing conversation part: {e}")))?;

        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| GraphError::storage_error(format!("creating temp part file: {e}")))?;
        file.write_all(&payload)
            .await
            .map_err(|e| GraphError::storage_error(format!("writing temp part file: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| GraphError::storage_error(format!("fsyncing temp part file: {e}")))?;
        drop(file);

        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|e| GraphError::storage_error(format!("renaming temp part file: {e}")))?;
        Ok(())
    }

    /// Read all parts, in strictly ascending sequence, silently skipping
    /// any file that fails to parse as JSON or whose name isn't a
    /// ten-digit sequence number.
    pub async fn read_parts(&self) -> GraphResult<Vec<(u32, serde_json::Value)>> {
        let parts_dir = self.parts_dir();
        if !parts_dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = tokio::fs::read_dir(&parts_dir)
            .await
            .map_err(|e| GraphError::storage_error(format!("listing parts dir: {e}")))?;

        let mut parts = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| GraphError::storage_error(format!("reading parts dir entry: {e}")))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            if stem.len() != 10 {
                continue;
            }
            let Ok(seq) = stem.parse::<u32>() else {
                continue;
            };
            let Ok(bytes) = tokio::fs::read(entry.path()).await else {
                continue;
            };
            let Ok(value) = serde_json::from_slice(&bytes) else {
                continue;
            };
            parts.push((seq, value));
        }
        parts.sort_by_key(|(seq, _)| *seq);
        Ok(parts)
    }

    /// Remove every part with `sequence < seq`. Idempotent on an empty or
    /// missing store.
    pub async fn delete_parts_before(&self, seq: u32) -> GraphResult<()> {
        let parts_dir = self.parts_dir();
        if !parts_dir.exists() {
            return Ok(());
        }
        for (existing_seq, _) in self.read_parts().await? {
            if existing_seq < seq {
                let path = parts_dir.join(part_filename(existing_seq));
                let _ = tokio::fs::remove_file(path).await;
            }
        }
        Ok(())
    }

    /// Persist sidecar metadata.
    pub async fn write_meta(&self, meta: &ConversationMeta) -> GraphResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| GraphError::storage_error(format!("creating conversation dir: {e}")))?;
        let bytes = serde_json::to_vec_pretty(meta)
            .map_err(|e| GraphError::storage_error(format!("serializing conversation meta: {e}")))?;
        tokio::fs::write(self.dir.join("meta.json"), bytes)
            .await
            .map_err(|e| GraphError::storage_error(format!("writing conversation meta: {e}")))
    }

    /// Load sidecar metadata, defaulting to empty when absent.
    pub async fn read_meta(&self) -> GraphResult<ConversationMeta> {
        let path = self.dir.join("meta.json");
        if !path.exists() {
            return Ok(ConversationMeta::default());
        }
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| GraphError::storage_error(format!("reading conversation meta: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| GraphError::storage_error(format!("parsing conversation meta: {e}")))
    }

    /// Persist the read cursor.
    pub async fn write_cursor(&self, cursor: ConversationCursor) -> GraphResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| GraphError::storage_error(format!("creating conversation dir: {e}")))?;
        let bytes = serde_json::to_vec(&cursor)
            .map_err(|e| GraphError::storage_error(format!("serializing cursor: {e}")))?;
        tokio::fs::write(self.dir.join("cursor.json"), bytes)
            .await
            .map_err(|e| GraphError::storage_error(format!("writing cursor: {e}")))
    }

    /// Load the read cursor, defaulting to zero when absent.
    pub async fn read_cursor(&self) -> GraphResult<ConversationCursor> {
        let path = self.dir.join("cursor.json");
        if !path.exists() {
            return Ok(ConversationCursor::default());
        }
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| GraphError::storage_error(format!("reading cursor: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| GraphError::storage_error(format!("parsing cursor: {e}")))
    }

    /// Remove the entire conversation directory. Idempotent if already
    /// missing.
    pub async fn destroy(&self) -> GraphResult<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GraphError::storage_error(format!(
                "removing conversation dir: {e}"
            ))),
        }
    }

    /// No-op: the store holds no open session/connection to release.
    pub fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn write_then_read_parts_round_trips_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path());

        store.write_part(2, &json!({"text": "second"})).await.unwrap();
        store.write_part(1, &json!({"text": "first"})).await.unwrap();

        let parts = store.read_parts().await.unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].0, 1);
        assert_eq!(parts[1].0, 2);
    }

    #[tokio::test]
    async fn duplicate_sequence_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path());

        store.write_part(1, &json!({"text": "v1"})).await.unwrap();
        store.write_part(1, &json!({"text": "v2"})).await.unwrap();

        let parts = store.read_parts().await.unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].1["text"], "v2");
    }

    #[tokio::test]
    async fn delete_parts_before_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        store.delete_parts_before(5).await.unwrap();

        store.write_part(1, &json!({})).await.unwrap();
        store.write_part(3, &json!({})).await.unwrap();
        store.delete_parts_before(3).await.unwrap();

        let parts = store.read_parts().await.unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].0, 3);
    }

    #[tokio::test]
    async fn destroy_is_idempotent_on_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        store.destroy().await.unwrap();
        store.destroy().await.unwrap();
    }
}
