pub mod emitter;
pub mod llm;
pub mod tools;
