//! Mock backends and fixtures shared by the atomflow test suites.

mod fixtures;
mod mocks;

pub use fixtures::{chat_step, step, workflow, write_script};
pub use mocks::{
    MemoryGraphStore, MemoryLoader, MockChatModel, RecordingScriptRunner, StaticPromptLibrary,
};
