//! Executable memory, instruction-cache coherence, and entrypoint
//! invocation for code assembled with `relax-codeblock`.
//!
//! This crate is the OS-dependent half of the pair: it knows how to get
//! read-write pages from the operating system, flip them read-execute, keep
//! the instruction cache coherent with what was written, and call into the
//! result through a fixed ABI ([`RuntimeContext`]). It depends on
//! `relax-codeblock` only for the `Address`/`Patchable`/`AssemblerError`
//! types needed to hand assembled bytes and link sites off to
//! [`ExecBlock`].

mod error;
mod icache;
mod mem;
pub mod reference_handlers;
mod runtime_context;

pub use error::ExecMemError;
pub use mem::{DataBlock, ExecBlock, ExecHandle, ExecMem};
pub use runtime_context::{EntryPoint, RuntimeContext, HANDLER_COUNT};
