//! Instruction-cache coherence for freshly-written executable memory.
//!
//! After bytes are written into a page and that page's protection is
//! flipped to executable, a CPU with a separate instruction cache may still
//! fetch stale instructions unless that cache is explicitly synchronized
//! with the data written through the data cache. x86_64 guarantees this in
//! hardware; ARM and several other architectures do not.
//!
//! Dispatched per architecture via `cfg-if`, matching this responsibility's
//! usual treatment as a small self-contained module with one `flush`
//! entry point.

use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        /// No-op: x86_64 keeps the instruction and data caches coherent in
        /// hardware, so there is nothing to flush.
        pub fn flush(_ptr: *const u8, _len: usize) {}
    } else if #[cfg(all(target_arch = "aarch64", target_os = "macos"))] {
        extern "C" {
            fn sys_icache_invalidate(start: *mut libc::c_void, size: libc::size_t);
        }

        pub fn flush(ptr: *const u8, len: usize) {
            unsafe { sys_icache_invalidate(ptr as *mut libc::c_void, len as libc::size_t) }
        }
    } else if #[cfg(any(target_arch = "aarch64", target_arch = "arm"))] {
        extern "C" {
            fn __clear_cache(begin: *mut libc::c_char, end: *mut libc::c_char);
        }

        pub fn flush(ptr: *const u8, len: usize) {
            unsafe {
                let begin = ptr as *mut libc::c_char;
                let end = (ptr as usize + len) as *mut libc::c_char;
                __clear_cache(begin, end);
            }
        }
    } else {
        pub fn flush(_ptr: *const u8, _len: usize) {
            log::warn!(
                "instruction-cache coherence is not implemented for this target; \
                 freshly published JIT code may execute stale bytes"
            );
        }
    }
}
