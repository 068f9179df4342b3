pub mod internal;
pub mod script;

pub use script::ProcessScriptRunner;
