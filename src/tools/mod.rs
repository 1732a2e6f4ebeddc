//! Static tool catalog and phase mask (C3).

pub mod catalog;

pub use catalog::{CATALOG, ParamSpec, ToolSpec, Validation, bias_for, find, system_prompt_section, validate};
