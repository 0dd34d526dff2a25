//! skynet-hooks — external-process lifecycle hooks for the agent loop.
//!
//! Hooks are discovered from a directory of `HOOK.yaml` manifests rather than
//! registered in-process; each manifest names a `handler.py` invoked as a
//! subprocess for every event it's registered for, with the event name and a
//! JSON context object on stdin. Handlers are pure observers — a handler
//! failure is logged and isolated, never surfaced back to the caller of
//! [`HookEngine::emit`].

pub mod engine;
pub mod error;
pub mod types;

pub use engine::HookEngine;
pub use error::{HookError, Result};
pub use types::{HookInvocation, HookManifest, HookOutcome, LoadedHook};
