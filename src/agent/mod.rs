//! Agent Module
//!
//! The conversational control loop, prompt composer, tool system, and
//! the conversation thread it drives.

pub mod agent_loop;
pub mod system_prompt;
pub mod thread;
pub mod tools;
