pub mod backends;
pub mod chain;
pub mod context;
pub mod dispatcher;
pub mod extract;
pub mod loader;
pub mod prompts;
pub mod reference;
pub mod strategy;

pub use backends::{Backends, EngineStatus, ScriptDefaults};
pub use chain::ChainExecutor;
pub use context::ExecutionContext;
pub use dispatcher::StepDispatcher;
pub use extract::JsonSchemaAdapter;
pub use loader::FileDefinitionLoader;
pub use prompts::DirPromptLibrary;
pub use reference::{resolve, Reference};
