//! Type definitions for the coderun interactive execution protocol
//!
//! This crate is the shared contract between the execution server and its
//! clients. A session is one persistent connection: the client opens it with an
//! `init` frame carrying the program, then may send stdin data and signals while
//! the server streams lifecycle events and program output back.
//!
//! ## Example
//!
//! ```rust
//! use coderun_types::{ClientMessage, InitRequest, ServerEvent, Stage};
//!
//! let init = InitRequest::parse(
//!     r#"{"type":"init","language":"python","files":[{"content":"print(1+1)"}]}"#,
//! ).unwrap();
//! assert_eq!(init.source(), "print(1+1)");
//!
//! let kill = ClientMessage::parse(r#"{"type":"signal","signal":9}"#).unwrap();
//! assert!(kill.is_kill());
//!
//! assert!(ServerEvent::exit(Stage::Run, 0).is_terminal());
//! ```

pub mod error;
pub mod events;
pub mod messages;

pub use error::*;
pub use events::*;
pub use messages::*;
