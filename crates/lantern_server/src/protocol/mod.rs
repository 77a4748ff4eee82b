//! Wire protocols spoken with clients.
//!
//! - [`telnet`]: IAC command constants, matching, splitting and NAWS
//! - [`ansi`]: cursor keys and screen size reports from terminals
//! - [`msp`]: sound and music cues
//! - [`msdp`]: structured game-state variables
//! - [`gmcp`]: JSON packages in a telnet envelope

pub mod ansi;
pub mod gmcp;
pub mod msdp;
pub mod msp;
pub mod telnet;

pub use telnet::TerminalCommand;
