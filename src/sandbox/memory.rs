//! In-memory [`SandboxClient`] used by tests and local scripted runs — no
//! network calls, no container provider required.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::CoreError;

use super::client::{ExecResult, FileEntry, SandboxClient, SandboxHandle, truncate_utf8, EXEC_OUTPUT_CAP_BYTES};

type ExecHandler = Box<dyn Fn(&str, &str) -> ExecResult + Send + Sync>;

/// A fake sandbox backed by an in-process file map. `exec` is scriptable via
/// [`InMemorySandbox::on_exec`] so tests can assert on dispatched commands
/// without running a real shell.
pub struct InMemorySandbox {
    files: Mutex<HashMap<String, HashMap<String, Vec<u8>>>>,
    destroyed: Mutex<Vec<String>>,
    exec_handler: Option<ExecHandler>,
}

impl Default for InMemorySandbox {
    fn default() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            destroyed: Mutex::new(Vec::new()),
            exec_handler: None,
        }
    }
}

impl InMemorySandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exec_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &str) -> ExecResult + Send + Sync + 'static,
    {
        self.exec_handler = Some(Box::new(f));
        self
    }

    pub fn was_destroyed(&self, id: &str) -> bool {
        self.destroyed.lock().expect("lock").iter().any(|d| d == id)
    }
}

#[async_trait]
impl SandboxClient for InMemorySandbox {
    async fn create(&self) -> Result<SandboxHandle, CoreError> {
        let id = Uuid::new_v4().to_string();
        self.files.lock().expect("lock").insert(id.clone(), HashMap::new());
        Ok(SandboxHandle { id, workspace_root: "/workspace".to_string() })
    }

    async fn write_file(&self, handle: &SandboxHandle, path: &str, bytes: &[u8]) -> Result<(), CoreError> {
        let mut files = self.files.lock().expect("lock");
        let store = files
            .get_mut(&handle.id)
            .ok_or_else(|| CoreError::Sandbox("unknown sandbox handle".into()))?;
        store.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn read_file(&self, handle: &SandboxHandle, path: &str) -> Result<Vec<u8>, CoreError> {
        let files = self.files.lock().expect("lock");
        let store = files
            .get(&handle.id)
            .ok_or_else(|| CoreError::Sandbox("unknown sandbox handle".into()))?;
        store
            .get(path)
            .cloned()
            .ok_or_else(|| CoreError::Sandbox(format!("not_found: {path}")))
    }

    async fn list_files(&self, handle: &SandboxHandle, path: &str) -> Result<Vec<FileEntry>, CoreError> {
        let files = self.files.lock().expect("lock");
        let store = files
            .get(&handle.id)
            .ok_or_else(|| CoreError::Sandbox("unknown sandbox handle".into()))?;
        let prefix = if path.ends_with('/') { path.to_string() } else { format!("{path}/") };
        let entries = store
            .keys()
            .filter(|p| p.starts_with(&prefix))
            .map(|p| FileEntry { name: p.clone(), is_directory: false })
            .collect();
        Ok(entries)
    }

    async fn exec(
        &self,
        _handle: &SandboxHandle,
        command: &str,
        workdir: &str,
        _timeout: Duration,
    ) -> Result<ExecResult, CoreError> {
        let result = match &self.exec_handler {
            Some(f) => f(command, workdir),
            None => ExecResult {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                duration: Duration::from_millis(1),
                truncated: false,
            },
        };
        let (stdout, out_trunc) = truncate_utf8(&result.stdout, EXEC_OUTPUT_CAP_BYTES);
        let (stderr, err_trunc) = truncate_utf8(&result.stderr, EXEC_OUTPUT_CAP_BYTES);
        Ok(ExecResult { stdout, stderr, truncated: result.truncated || out_trunc || err_trunc, ..result })
    }

    async fn destroy(&self, handle: &SandboxHandle) -> Result<(), CoreError> {
        self.destroyed.lock().expect("lock").push(handle.id.clone());
        self.files.lock().expect("lock").remove(&handle.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let sandbox = InMemorySandbox::new();
        let handle = sandbox.create().await.unwrap();
        sandbox.write_file(&handle, "hello.py", b"print('hi')").await.unwrap();
        let content = sandbox.read_file(&handle, "hello.py").await.unwrap();
        assert_eq!(content, b"print('hi')");
    }

    #[tokio::test]
    async fn read_missing_file_errors() {
        let sandbox = InMemorySandbox::new();
        let handle = sandbox.create().await.unwrap();
        assert!(sandbox.read_file(&handle, "missing.py").await.is_err());
    }

    #[tokio::test]
    async fn destroy_is_idempotent_and_recorded() {
        let sandbox = InMemorySandbox::new();
        let handle = sandbox.create().await.unwrap();
        sandbox.destroy(&handle).await.unwrap();
        sandbox.destroy(&handle).await.unwrap();
        assert!(sandbox.was_destroyed(&handle.id));
    }

    #[tokio::test]
    async fn scripted_exec_handler_is_used() {
        let sandbox = InMemorySandbox::new().with_exec_handler(|cmd, _wd| ExecResult {
            exit_code: if cmd.contains("fail") { 1 } else { 0 },
            stdout: "hi\n".to_string(),
            stderr: String::new(),
            duration: Duration::from_millis(5),
            truncated: false,
        });
        let handle = sandbox.create().await.unwrap();
        let result = sandbox.exec(&handle, "python hello.py", "/workspace", Duration::from_secs(5)).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "hi\n");
    }
}
