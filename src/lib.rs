pub mod backoff;
pub mod classify;
pub mod config;
pub mod llm;
pub mod pptx;
pub mod progress;
pub mod report;
pub mod retry;
pub mod script;
pub mod setup;
pub mod state;
pub mod workflow;
