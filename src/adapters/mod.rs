pub mod config;
pub mod emitter;
pub mod llm;
pub mod mcp;
pub mod providers;
