//! # basmi
//!
//! This library executes tokenized BBC BASIC programs.
//!
//! # Introduction
//!
//! Source programs are first compiled into a compact token stream: one
//! opcode-like token per keyword, operator or operand, with forward
//! references (line numbers, `PROC`/`FN` call sites, block-structure
//! branch targets, `CASE` arms) left unresolved. The engine executes that
//! form directly, rewriting each unresolved token with its resolved
//! counterpart the first time it runs, so later executions take the fast
//! path.
//!
//! The engine is the execution core only: statement dispatch, the typed
//! value stack, variables and symbol tables, arrays, subprograms, error
//! trapping and the byte-window indirection operators. Everything that
//! touches the outside world (console, clock, `OSCLI`, library files)
//! goes through the [`Host`] trait; [`StdHost`] wires it to the process
//! environment and [`NopHost`] stubs it out.
//!
//! # Examples
//!
//! ```rust
//! use basmi::{Config, ExitStatus, Interpreter, NopHost, Program};
//!
//! let program = Program::compile("10 A%=6*7\n20 QUIT A%").unwrap();
//! let mut interp = Interpreter::new(program, Config::default()).unwrap();
//! let status = interp.run(&mut NopHost).unwrap();
//! assert_eq!(status, ExitStatus::Quit(42));
//! ```

#![warn(missing_docs)]
#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_ret_no_self)]

extern crate std as alloc;

use alloc::{boxed::Box, string::String};
use core::fmt;
use std::error;

pub use basmi_core::{BasicError, ErrorCode, HostError};

/// Top-level error produced by compiling or running a program.
#[derive(Debug)]
pub enum Error {
    /// The source text could not be tokenized.
    Program(String),
    /// A BASIC error reached the embedder untrapped.
    Basic(BasicError),
    /// Custom embedder error from a host call-out.
    Host(Box<dyn HostError>),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Program(message) => write!(f, "Program: {}", message),
            Error::Basic(error) => write!(f, "Error {}: {}", error.code().number(), error),
            Error::Host(error) => write!(f, "Host: {}", error),
        }
    }
}

impl error::Error for Error {}

impl From<BasicError> for Error {
    fn from(error: BasicError) -> Error {
        Error::Basic(error)
    }
}

impl From<Box<dyn HostError>> for Error {
    fn from(error: Box<dyn HostError>) -> Self {
        Error::Host(error)
    }
}

mod eval;
mod heap;
mod host;
mod memory;
mod prepare;
mod resolver;
mod runner;
mod stack;
mod symbols;
mod token;
mod value;

#[cfg(test)]
mod tests;

pub use self::host::{Host, HostResult, NopHost, StdHost};
pub use self::memory::{Workspace, DEFAULT_WORKSPACE_PAGES};
pub use self::runner::{Config, ExitStatus, Interpreter};
pub use self::stack::DEFAULT_STACK_LIMIT;
pub use self::token::Program;
pub use self::value::Value;

/// Byte-window sizes and units.
pub mod memory_units {
    pub use memory_units::{size_of, wasm32::*, ByteSize, Bytes, RoundUpTo};
}
