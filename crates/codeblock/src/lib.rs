//! A symbolic code-item stream with label relaxation and inter-block
//! linking, independent of any particular instruction set.
//!
//! A [`CodeBlock`] accumulates bytes, labels, and "deferred" items (whose
//! final encoding depends on positions not yet known, such as a branch
//! displacement) in emission order. [`CodeBlock::assemble`] resolves that
//! stream to concrete bytes via the fixed-point relaxation pass in
//! [`relax`]. Required and provided [`linker`] sites let one block's bytes
//! depend on where another block (or this one) ends up once copied into
//! memory.
//!
//! This crate has no operating-system dependency; pairing it with
//! executable memory management (page allocation, protection,
//! instruction-cache coherence) is the `exec-mem` crate's job.

mod address;
mod codeblock;
mod error;
mod item;
mod linker;
mod listing;
mod relax;

pub use address::{Address, Endian, Width};
pub use codeblock::{CodeBlock, CodeBlockConfig, MachineCodeBlock};
pub use error::AssemblerError;
pub use item::{Alternative, Deferred, Item, Label, LabelSource};
pub use linker::{
    AbsoluteLinkObject, AddressSlot, Linker, OffsetLinkObject, Patchable, ProvidedLinkObject,
    ProvidedSlot, RequiredLinkObject, RequiredSite,
};
