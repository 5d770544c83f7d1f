/// Fatal usage and OS-level errors from executable memory management.
///
/// `region::Error` is converted at this crate's boundary rather than
/// propagated directly, matching `cranelift-jit`'s own practice of wrapping
/// OS allocation failures in its own error type instead of leaking the
/// underlying crate's error straight through a public API.
#[derive(thiserror::Error, Debug)]
pub enum ExecMemError {
    #[error("failed to allocate {size} bytes of executable memory: {source}")]
    Alloc {
        size: usize,
        #[source]
        source: region::Error,
    },

    #[error("failed to change memory protection: {0}")]
    Protect(#[source] region::Error),

    #[error("write of {len} bytes at offset {offset} would run past the end of the block ({block_len} bytes)")]
    OutOfBounds {
        offset: usize,
        len: usize,
        block_len: usize,
    },

    #[error(transparent)]
    Link(#[from] relax_codeblock::AssemblerError),
}
