//! Execution session engine for interactive, sandboxed code runs.
//!
//! One session per client connection: the engine reads the init handshake,
//! picks the language recipe, writes the submitted source into a private
//! working directory and drives Docker containers through an optional compile
//! stage and an interactive run stage, streaming output back as
//! [`coderun_types::ServerEvent`]s while forwarding the client's stdin and
//! kill requests to the program.
//!
//! # Architecture Overview
//!
//! - **Recipes**: static language to image and command table
//! - **Workspace**: per-session source directory with guaranteed removal
//! - **Demultiplexing**: decoding of the container runtime's framed log format
//! - **Container driver**: compile and run container lifecycles over a
//!   [`ContainerRuntime`] (Docker in production)
//! - **I/O bridge**: concurrent output and input pumps plus exit wait, sharing
//!   one cancellation token
//! - **Sessions**: the explicit lifecycle state machine and orchestrator
//! - **Configuration**: YAML-loadable engine tunables

pub mod bridge;
pub mod config;
pub mod demux;
pub mod driver;
pub mod errors;
pub mod recipes;
pub mod runtime;
pub mod session;
pub mod sink;
pub mod workspace;

pub use config::*;
pub use errors::EngineError;
pub use recipes::{Recipe, RecipeRegistry, RuntimeInfo};
pub use runtime::{ContainerRuntime, DockerRuntime};
pub use session::{SessionEngine, SessionState};
pub use sink::EventSink;

#[cfg(test)]
pub mod test_utils;
