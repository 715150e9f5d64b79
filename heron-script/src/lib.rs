//! The Bitcoin Cash script interpreter.
//!
//! Scripts are small Forth-style programs. An output's lock script states a
//! spending condition; an input's unlock script supplies the satisfying
//! data. [`verify`] runs the unlock script, then the lock script over the
//! resulting stack, and authorizes the spend iff the final stack top is
//! truthy (with the extra pay-to-script-hash round where that template
//! applies).
//!
//! A script failure only ever invalidates the spending transaction; it is
//! never fatal to the node.

mod error;
mod interpreter;
mod num;
pub mod opcodes;
pub mod template;

#[cfg(test)]
mod tests;

pub use error::ScriptError;
pub use interpreter::{is_push_only, verify, Context};
pub use template::Template;
