//! Browser Sub-agent (C7): a natural-language task forwarded to a
//! browser-automation driver, or a structured action. The driver context is
//! created lazily on first use and torn down when the task ends; failure to
//! initialize is non-fatal (§4.7).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserActionKind {
    Navigate,
    Click,
    Fill,
    Extract,
    Screenshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredAction {
    pub kind: BrowserActionKind,
    pub url: Option<String>,
    pub selector: Option<String>,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserOutcome {
    pub success: bool,
    pub output: String,
}

/// Abstracts the underlying browser-automation library. Implementations own
/// the real driver process/connection; the sub-agent only knows this trait.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn connect(&self) -> Result<(), CoreError>;
    async fn run_task(&self, task: &str) -> Result<String, CoreError>;
    async fn run_action(&self, action: &StructuredAction) -> Result<String, CoreError>;
    async fn close(&self) -> Result<(), CoreError>;
}

/// Object-safe façade over `BrowserAgent<D>` so callers that don't know `D`
/// (the agent loop, holding one configured driver behind a trait object)
/// can still dispatch `BROWSER` actions.
#[async_trait]
pub trait BrowserDispatch: Send + Sync {
    async fn run_task(&self, task: &str) -> BrowserOutcome;
    async fn run_action(&self, action: StructuredAction) -> BrowserOutcome;
}

enum ContextState {
    NotInitialized,
    Ready,
    Unavailable,
}

/// Lazily connects `driver` on first use; once `browser_unavailable` is
/// observed, subsequent calls short-circuit without retrying the driver.
pub struct BrowserAgent<D: BrowserDriver> {
    driver: D,
    state: Mutex<ContextState>,
}

impl<D: BrowserDriver> BrowserAgent<D> {
    pub fn new(driver: D) -> Self {
        Self { driver, state: Mutex::new(ContextState::NotInitialized) }
    }

    async fn ensure_ready(&self) -> bool {
        let mut state = self.state.lock().await;
        match *state {
            ContextState::Ready => true,
            ContextState::Unavailable => false,
            ContextState::NotInitialized => match self.driver.connect().await {
                Ok(()) => {
                    *state = ContextState::Ready;
                    true
                }
                Err(_) => {
                    *state = ContextState::Unavailable;
                    false
                }
            },
        }
    }

    /// Forwards `task` to the browser-automation library (§4.7). Returns a
    /// non-fatal `browser_unavailable` outcome if the driver cannot connect.
    pub async fn run_task(&self, task: &str) -> BrowserOutcome {
        if !self.ensure_ready().await {
            return BrowserOutcome { success: false, output: "browser_unavailable".to_string() };
        }
        match self.driver.run_task(task).await {
            Ok(output) => BrowserOutcome { success: true, output },
            Err(e) => BrowserOutcome { success: false, output: e.human_message() },
        }
    }

    pub async fn run_action(&self, action: StructuredAction) -> BrowserOutcome {
        if !self.ensure_ready().await {
            return BrowserOutcome { success: false, output: "browser_unavailable".to_string() };
        }
        match self.driver.run_action(&action).await {
            Ok(output) => BrowserOutcome { success: true, output },
            Err(e) => BrowserOutcome { success: false, output: e.human_message() },
        }
    }

    /// Tears down the driver connection when the task ends (§4.7).
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if matches!(*state, ContextState::Ready) {
            let _ = self.driver.close().await;
        }
        *state = ContextState::NotInitialized;
    }
}

#[async_trait]
impl<D: BrowserDriver> BrowserDispatch for BrowserAgent<D> {
    async fn run_task(&self, task: &str) -> BrowserOutcome {
        BrowserAgent::run_task(self, task).await
    }

    async fn run_action(&self, action: StructuredAction) -> BrowserOutcome {
        BrowserAgent::run_action(self, action).await
    }
}
