//! HTTP-RPC implementation of [`SandboxClient`] against a remote provider.
//!
//! Retries twice with exponential backoff (250 ms, 1 s) on transient
//! transport errors, matching the retry idiom used for the provider's
//! container runtime in this codebase's sandbox manager; non-transient
//! provider errors (4xx, auth, quota) are surfaced immediately.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::CoreError;

use super::client::{ExecResult, FileEntry, SandboxClient, SandboxHandle, truncate_utf8, EXEC_OUTPUT_CAP_BYTES};

const RETRY_BACKOFFS: &[Duration] = &[Duration::from_millis(250), Duration::from_secs(1)];
const CREATE_TIMEOUT: Duration = Duration::from_secs(30);
const RPC_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpSandboxClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpSandboxClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Run `op` up to `1 + RETRY_BACKOFFS.len()` times, sleeping between
    /// attempts. An `Err(true)` from `op` means "transient, retry"; an
    /// `Err(false)` surfaces immediately.
    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, (CoreError, bool)>>,
    {
        let mut last_err = None;
        for (attempt, backoff) in std::iter::once(None)
            .chain(RETRY_BACKOFFS.iter().map(|d| Some(*d)))
            .enumerate()
        {
            if let Some(d) = backoff {
                tokio::time::sleep(d).await;
            }
            match op().await {
                Ok(v) => return Ok(v),
                Err((err, transient)) => {
                    tracing::warn!(attempt, transient, "sandbox RPC attempt failed: {err}");
                    last_err = Some(err);
                    if !transient {
                        break;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| CoreError::Sandbox("exhausted retries".into())))
    }
}

#[derive(Deserialize)]
struct CreateResponse {
    id: String,
    workspace_root: String,
}

#[async_trait]
impl SandboxClient for HttpSandboxClient {
    #[tracing::instrument(skip(self))]
    async fn create(&self) -> Result<SandboxHandle, CoreError> {
        self.with_retry(|| async {
            let resp = self
                .client
                .post(self.url("/sandboxes"))
                .bearer_auth(&self.api_key)
                .timeout(CREATE_TIMEOUT)
                .send()
                .await
                .map_err(|e| (CoreError::Sandbox(format!("create: {e}")), e.is_timeout() || e.is_connect()))?;
            if !resp.status().is_success() {
                return Err((CoreError::Sandbox(format!("create: provider returned {}", resp.status())), resp.status().is_server_error()));
            }
            let body: CreateResponse = resp
                .json()
                .await
                .map_err(|e| (CoreError::Sandbox(format!("create: bad response body: {e}")), false))?;
            Ok(SandboxHandle { id: body.id, workspace_root: body.workspace_root })
        })
        .await
    }

    #[tracing::instrument(skip(self, bytes))]
    async fn write_file(&self, handle: &SandboxHandle, path: &str, bytes: &[u8]) -> Result<(), CoreError> {
        let body = json!({ "path": path, "content_base64": base64_encode(bytes) });
        self.with_retry(|| async {
            let resp = self
                .client
                .post(self.url(&format!("/sandboxes/{}/files", handle.id)))
                .bearer_auth(&self.api_key)
                .timeout(RPC_TIMEOUT)
                .json(&body)
                .send()
                .await
                .map_err(|e| (CoreError::Sandbox(format!("write_file: {e}")), e.is_timeout() || e.is_connect()))?;
            if !resp.status().is_success() {
                return Err((CoreError::Sandbox(format!("write_file: {}", resp.status())), resp.status().is_server_error()));
            }
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn read_file(&self, handle: &SandboxHandle, path: &str) -> Result<Vec<u8>, CoreError> {
        #[derive(Deserialize)]
        struct ReadResponse {
            content_base64: String,
        }
        self.with_retry(|| async {
            let resp = self
                .client
                .get(self.url(&format!("/sandboxes/{}/files", handle.id)))
                .bearer_auth(&self.api_key)
                .timeout(RPC_TIMEOUT)
                .query(&[("path", path)])
                .send()
                .await
                .map_err(|e| (CoreError::Sandbox(format!("read_file: {e}")), e.is_timeout() || e.is_connect()))?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Err((CoreError::Sandbox(format!("not_found: {path}")), false));
            }
            if !resp.status().is_success() {
                return Err((CoreError::Sandbox(format!("read_file: {}", resp.status())), resp.status().is_server_error()));
            }
            let body: ReadResponse = resp
                .json()
                .await
                .map_err(|e| (CoreError::Sandbox(format!("read_file: bad response body: {e}")), false))?;
            base64_decode(&body.content_base64).map_err(|e| (CoreError::Sandbox(e), false))
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn list_files(&self, handle: &SandboxHandle, path: &str) -> Result<Vec<FileEntry>, CoreError> {
        self.with_retry(|| async {
            let resp = self
                .client
                .get(self.url(&format!("/sandboxes/{}/list", handle.id)))
                .bearer_auth(&self.api_key)
                .timeout(RPC_TIMEOUT)
                .query(&[("path", path)])
                .send()
                .await
                .map_err(|e| (CoreError::Sandbox(format!("list_files: {e}")), e.is_timeout() || e.is_connect()))?;
            if !resp.status().is_success() {
                return Err((CoreError::Sandbox(format!("list_files: {}", resp.status())), resp.status().is_server_error()));
            }
            resp.json::<Vec<FileEntry>>()
                .await
                .map_err(|e| (CoreError::Sandbox(format!("list_files: bad body: {e}")), false))
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn exec(
        &self,
        handle: &SandboxHandle,
        command: &str,
        workdir: &str,
        timeout: Duration,
    ) -> Result<ExecResult, CoreError> {
        #[derive(Deserialize)]
        struct ExecResponse {
            exit_code: i32,
            stdout: String,
            stderr: String,
            duration_ms: u64,
        }
        let body = json!({ "command": command, "workdir": workdir, "timeout_secs": timeout.as_secs() });
        self.with_retry(|| async {
            let resp = self
                .client
                .post(self.url(&format!("/sandboxes/{}/exec", handle.id)))
                .bearer_auth(&self.api_key)
                .timeout(timeout + Duration::from_secs(5))
                .json(&body)
                .send()
                .await
                .map_err(|e| (CoreError::Sandbox(format!("exec: {e}")), e.is_timeout() || e.is_connect()))?;
            if !resp.status().is_success() {
                return Err((CoreError::Sandbox(format!("exec: {}", resp.status())), resp.status().is_server_error()));
            }
            let body: ExecResponse = resp
                .json()
                .await
                .map_err(|e| (CoreError::Sandbox(format!("exec: bad body: {e}")), false))?;
            let (stdout, out_trunc) = truncate_utf8(&body.stdout, EXEC_OUTPUT_CAP_BYTES);
            let (stderr, err_trunc) = truncate_utf8(&body.stderr, EXEC_OUTPUT_CAP_BYTES);
            Ok(ExecResult {
                exit_code: body.exit_code,
                stdout,
                stderr,
                duration: Duration::from_millis(body.duration_ms),
                truncated: out_trunc || err_trunc,
            })
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn destroy(&self, handle: &SandboxHandle) -> Result<(), CoreError> {
        let resp = self
            .client
            .delete(self.url(&format!("/sandboxes/{}", handle.id)))
            .bearer_auth(&self.api_key)
            .timeout(RPC_TIMEOUT)
            .send()
            .await
            .map_err(|e| CoreError::Sandbox(format!("destroy: {e}")))?;
        // Idempotent: a 404 here means it's already gone, which is fine.
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(CoreError::Sandbox(format!("destroy: {}", resp.status())));
        }
        Ok(())
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0];
        let b1 = *chunk.get(1).unwrap_or(&0);
        let b2 = *chunk.get(2).unwrap_or(&0);
        out.push(ALPHABET[(b0 >> 2) as usize] as char);
        out.push(ALPHABET[(((b0 & 0x03) << 4) | (b1 >> 4)) as usize] as char);
        out.push(if chunk.len() > 1 { ALPHABET[(((b1 & 0x0f) << 2) | (b2 >> 6)) as usize] as char } else { '=' });
        out.push(if chunk.len() > 2 { ALPHABET[(b2 & 0x3f) as usize] as char } else { '=' });
    }
    out
}

fn base64_decode(s: &str) -> Result<Vec<u8>, String> {
    fn val(c: u8) -> Option<u8> {
        match c {
            b'A'..=b'Z' => Some(c - b'A'),
            b'a'..=b'z' => Some(c - b'a' + 26),
            b'0'..=b'9' => Some(c - b'0' + 52),
            b'+' => Some(62),
            b'/' => Some(63),
            _ => None,
        }
    }
    let bytes: Vec<u8> = s.bytes().filter(|&b| b != b'=').collect();
    let mut out = Vec::with_capacity(bytes.len() * 3 / 4);
    for chunk in bytes.chunks(4) {
        let vals: Vec<u8> = chunk
            .iter()
            .map(|&b| val(b).ok_or_else(|| "invalid base64".to_string()))
            .collect::<Result<_, _>>()?;
        let v0 = vals[0];
        let v1 = *vals.get(1).unwrap_or(&0);
        out.push((v0 << 2) | (v1 >> 4));
        if vals.len() > 2 {
            let v2 = vals[2];
            out.push((v1 << 4) | (v2 >> 2));
            if vals.len() > 3 {
                let v3 = vals[3];
                out.push((v2 << 6) | v3);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_round_trips() {
        let data = b"hello sandbox world, this is a test payload!";
        let encoded = base64_encode(data);
        let decoded = base64_decode(&encoded).unwrap();
        assert_eq!(decoded, data);
    }
}
