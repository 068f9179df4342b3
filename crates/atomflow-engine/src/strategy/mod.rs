//! Execution strategies, one per agent kind.

pub mod internal_tool;
pub mod local_script;
pub mod model_chat;
