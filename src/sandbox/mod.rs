//! Sandbox Client (C1).
//!
//! Wraps a remote sandbox provider's file/exec RPCs and the lifecycle of a
//! per-task sandbox. The provider is a black-box network service (§1); this
//! module is the only place its wire format is known.

mod client;
mod http;
mod memory;

pub use client::{ExecResult, FileEntry, SandboxClient, SandboxHandle, EXEC_OUTPUT_CAP_BYTES, truncate_utf8};
pub use http::HttpSandboxClient;
pub use memory::InMemorySandbox;
