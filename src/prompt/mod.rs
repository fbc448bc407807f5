//! Prompt 层：人设与消息组装

pub mod builder;
pub mod persona;

pub use builder::build_prompt;
pub use persona::{Persona, PersonaSelector};
