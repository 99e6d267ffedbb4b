//! Clipgen is a command-line bridge that sends clipboard-sized payloads
//! (text, images, documents, audio clips) to hosted LLM completion APIs and
//! prints the result.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns configuration, request-mode classification, the
//!   credential/model cascade, the retry state machine, the tool-calling
//!   loop, and the persisted conversation history.
//! - [`api`] defines the serde payload types exchanged with
//!   OpenAI-compatible chat completion endpoints.
//! - [`tools`] implements the local capabilities a model may invoke
//!   mid-conversation (calculator, web search) behind a pluggable registry.
//! - [`cli`] parses arguments, reads the prompt from stdin, and is the only
//!   layer aware of process exit codes and stdout/stderr separation.
//!
//! The runtime entrypoint lives in the binary crate (`src/main.rs`) and
//! routes through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod logging;
pub mod tools;
pub mod utils;
