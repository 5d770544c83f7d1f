//! The ABI contract between host Rust code and an invoked JIT entrypoint.
//!
//! Emitted code is reached through a single, fixed calling convention: a
//! `extern "C" fn(*mut RuntimeContext) -> i64`. `RuntimeContext` carries the
//! three machine words every entrypoint is built against: a stack limit, a
//! heap limit, and a fixed-size table of native callback addresses an
//! encoder and this runtime have agreed on out of band ahead of time.

/// Number of callback slots in every [`RuntimeContext`]'s handler table.
/// Fixed at build time; an encoder emitting code that indexes past this
/// count is relying on an agreement this crate does not enforce at the ABI
/// boundary, the same way a C struct layout is only as safe as both sides
/// agreeing on it.
pub const HANDLER_COUNT: usize = 3;

/// Fixed layout passed by pointer to every invoked entrypoint. `#[repr(C)]`
/// because its address is taken and handed to generated machine code, which
/// addresses `stack_limit`, `heap_limit`, and each `handlers` slot by a
/// fixed byte offset agreed upon out of band between the code generator and
/// this crate.
#[repr(C)]
pub struct RuntimeContext {
    pub stack_limit: u64,
    pub heap_limit: u64,
    /// Raw callback addresses. This table carries no type information of
    /// its own — generated code that calls through `handlers[i]` is
    /// responsible for treating it as whatever arity and signature it was
    /// installed with (see [`RuntimeContext::set_handler`]).
    pub handlers: [usize; HANDLER_COUNT],
}

impl RuntimeContext {
    pub fn new(stack_limit: u64, heap_limit: u64) -> RuntimeContext {
        RuntimeContext {
            stack_limit,
            heap_limit,
            handlers: [0; HANDLER_COUNT],
        }
    }

    /// Installs `handler`'s address at slot `index`. Panics if `index` is
    /// out of range for [`HANDLER_COUNT`], matching the out-of-band
    /// agreement between the encoder and this runtime rather than a
    /// recoverable condition.
    pub fn set_handler(&mut self, index: usize, handler: *const ()) {
        self.handlers[index] = handler as usize;
    }

    /// Reads back the raw address installed at slot `index`, or a null
    /// pointer if nothing has been installed there yet.
    pub fn handler(&self, index: usize) -> *const () {
        self.handlers[index] as *const ()
    }
}

/// The calling convention every published entrypoint must satisfy.
pub type EntryPoint = unsafe extern "C" fn(*mut RuntimeContext) -> i64;
