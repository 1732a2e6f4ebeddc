//! The [`SandboxClient`] trait and its value types (§4.1).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CoreError;

/// A reference to a remote isolated environment, owning a root working
/// directory and a lifetime bounded by the task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxHandle {
    pub id: String,
    pub workspace_root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub is_directory: bool,
}

/// Result of an `exec` RPC. `stdout`/`stderr` are captured in full by the
/// provider but truncated to 64 KiB each before being returned here;
/// `truncated` flags whether either stream was cut.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub truncated: bool,
}

pub const EXEC_OUTPUT_CAP_BYTES: usize = 64 * 1024;

/// Truncate `s` to at most `cap` bytes at a UTF-8 char boundary, returning
/// whether truncation occurred.
pub fn truncate_utf8(s: &str, cap: usize) -> (String, bool) {
    if s.len() <= cap {
        return (s.to_string(), false);
    }
    let mut end = cap;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    (s[..end].to_string(), true)
}

/// Abstracts a remote sandbox provider's file/exec RPC surface (§4.1, §6.2).
/// All operations are network calls; implementations retry twice with
/// exponential backoff (250 ms, 1 s) on transient transport errors and
/// surface non-transient provider errors immediately.
#[async_trait]
pub trait SandboxClient: Send + Sync {
    /// Provision a fresh environment. Fails with `sandbox_unavailable`
    /// (mapped to [`CoreError::Sandbox`]) if the provider rejects or times
    /// out (default 30 s).
    async fn create(&self) -> Result<SandboxHandle, CoreError>;

    async fn write_file(&self, handle: &SandboxHandle, path: &str, bytes: &[u8]) -> Result<(), CoreError>;

    async fn read_file(&self, handle: &SandboxHandle, path: &str) -> Result<Vec<u8>, CoreError>;

    async fn list_files(&self, handle: &SandboxHandle, path: &str) -> Result<Vec<FileEntry>, CoreError>;

    /// Execute a shell command. `timeout` is caller-supplied, default 300 s,
    /// clamped to 1800 s by the caller (§5).
    async fn exec(
        &self,
        handle: &SandboxHandle,
        command: &str,
        workdir: &str,
        timeout: Duration,
    ) -> Result<ExecResult, CoreError>;

    /// Idempotent: calling `destroy` on an already-destroyed handle is not
    /// an error.
    async fn destroy(&self, handle: &SandboxHandle) -> Result<(), CoreError>;
}
