//! RWX/RW page allocation, backed by the `region` crate.
//!
//! Raw `mmap`/`VirtualAlloc` calls are not hand-rolled here; `region::alloc`
//! and `region::protect` are used instead.
//!
//! A block starts out read-write (so code and data can be written into it)
//! and, for executable blocks, is explicitly `publish`ed to flip it
//! read-execute and flush the instruction cache before it is ever invoked.
//! This two-phase shape — write, then seal — mirrors a JIT code region
//! finalizing its code only once every function in it has
//! been defined.

use crate::error::ExecMemError;
use crate::icache;
use region::Protection;
use relax_codeblock::{Address, Endian, Patchable, Width};
use target_lexicon::{PointerWidth, Triple};

/// The width of a host-native address, derived the same way
/// `cranelift-jit`'s `JITBuilder::new` derives its target ISA: from
/// `Triple::host()` rather than a `#[cfg]` guess, so cross-compiled builds
/// that still execute on a different host (e.g. under emulation) report the
/// width the running process actually addresses with.
fn host_address_width() -> Width {
    match Triple::host().pointer_width() {
        Ok(PointerWidth::U64) => Width::W64,
        _ => Width::W32,
    }
}

fn address_of(ptr: *const u8) -> Address {
    Address::from_value(host_address_width(), ptr as u64, Endian::Little)
}

/// A factory for allocating executable and plain data blocks. Carries no
/// state of its own (allocation bookkeeping lives in the blocks it returns),
/// matching `cranelift-jit`'s `Memory` struct.
#[derive(Default)]
pub struct ExecMem;

impl ExecMem {
    pub fn new() -> ExecMem {
        ExecMem
    }

    /// Reserves `size` bytes of read-write memory intended to eventually
    /// hold executable code. Call [`ExecBlock::publish`] once all bytes
    /// (including any linked required sites) have been written.
    pub fn alloc_exec(&self, size: usize) -> Result<ExecBlock, ExecMemError> {
        let len = size.max(1);
        let alloc =
            region::alloc(len, Protection::READ_WRITE).map_err(|source| ExecMemError::Alloc {
                size,
                source,
            })?;
        log::debug!("allocated {} byte executable block at {:p}", size, alloc.as_ptr::<u8>());
        Ok(ExecBlock { alloc, len: size })
    }

    /// Reserves `size` bytes of read-write memory that is never made
    /// executable.
    pub fn alloc_data(&self, size: usize) -> Result<DataBlock, ExecMemError> {
        let len = size.max(1);
        let alloc =
            region::alloc(len, Protection::READ_WRITE).map_err(|source| ExecMemError::Alloc {
                size,
                source,
            })?;
        log::debug!("allocated {} byte data block at {:p}", size, alloc.as_ptr::<u8>());
        Ok(DataBlock { alloc, len: size })
    }
}

/// A read-write block reserved for executable code, before it has been
/// sealed by [`ExecBlock::publish`].
pub struct ExecBlock {
    alloc: region::Allocation,
    len: usize,
}

impl ExecBlock {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn block_addr(&self) -> Address {
        address_of(self.alloc.as_ptr::<u8>())
    }

    pub fn write_byte(&mut self, offset: usize, byte: u8) -> Result<(), ExecMemError> {
        self.write_bytes_inner(offset, std::slice::from_ref(&byte))
    }

    pub fn read_byte(&self, offset: usize) -> Result<u8, ExecMemError> {
        if offset >= self.len {
            return Err(ExecMemError::OutOfBounds {
                offset,
                len: 1,
                block_len: self.len,
            });
        }
        Ok(unsafe { *self.alloc.as_ptr::<u8>().add(offset) })
    }

    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<(), ExecMemError> {
        self.write_bytes_inner(offset, bytes)
    }

    fn write_bytes_inner(&mut self, offset: usize, bytes: &[u8]) -> Result<(), ExecMemError> {
        if offset.checked_add(bytes.len()).map_or(true, |end| end > self.len) {
            return Err(ExecMemError::OutOfBounds {
                offset,
                len: bytes.len(),
                block_len: self.len,
            });
        }
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.alloc.as_mut_ptr::<u8>().add(offset), bytes.len());
        }
        Ok(())
    }

    /// Flips this block's protection to read-execute, flushes the
    /// instruction cache over its bytes, and returns a handle that can be
    /// invoked. No further writes are possible afterwards.
    pub fn publish(self) -> Result<ExecHandle, ExecMemError> {
        unsafe {
            region::protect(self.alloc.as_ptr::<u8>() as *const (), self.len, Protection::READ_EXECUTE)
                .map_err(ExecMemError::Protect)?;
        }
        icache::flush(self.alloc.as_ptr::<u8>(), self.len);
        log::debug!("published executable block at {:p} ({} bytes)", self.alloc.as_ptr::<u8>(), self.len);
        Ok(ExecHandle {
            alloc: self.alloc,
            len: self.len,
        })
    }
}

impl Patchable for ExecBlock {
    fn base_addr(&self) -> Address {
        self.block_addr()
    }

    fn write_bytes(&mut self, offset: u32, bytes: &[u8]) -> Result<(), relax_codeblock::AssemblerError> {
        ExecBlock::write_bytes(self, offset as usize, bytes).map_err(|_| {
            relax_codeblock::AssemblerError::OutOfBoundsWrite {
                offset,
                len: bytes.len(),
                block_len: self.len,
            }
        })
    }
}

/// A sealed, invocable block of executable memory.
pub struct ExecHandle {
    alloc: region::Allocation,
    len: usize,
}

impl ExecHandle {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn block_addr(&self) -> Address {
        address_of(self.alloc.as_ptr::<u8>())
    }

    pub fn read_byte(&self, offset: usize) -> Result<u8, ExecMemError> {
        if offset >= self.len {
            return Err(ExecMemError::OutOfBounds {
                offset,
                len: 1,
                block_len: self.len,
            });
        }
        Ok(unsafe { *self.alloc.as_ptr::<u8>().add(offset) })
    }

    /// Calls into this block's first byte as a
    /// `extern "C" fn(*mut RuntimeContext) -> i64` entrypoint.
    ///
    /// # Safety
    ///
    /// The bytes in this block must in fact encode a valid function
    /// matching [`crate::runtime_context::EntryPoint`]'s calling
    /// convention, and `ctx` must be valid for as long as the callee can
    /// observe it. Invoking a block after it has been freed, or one whose
    /// bytes were never actually generated code, is undefined behavior this
    /// crate cannot check for.
    pub unsafe fn invoke(&self, ctx: &mut crate::runtime_context::RuntimeContext) -> i64 {
        let entry: crate::runtime_context::EntryPoint =
            std::mem::transmute(self.alloc.as_ptr::<u8>());
        entry(ctx as *mut _)
    }

    /// Explicitly releases this block's memory. Equivalent to dropping it,
    /// spelled out for parity with `alloc_exec`/`free_exec` naming.
    pub fn free(self) {
        drop(self)
    }
}

/// A read-write block of plain (non-executable) memory.
pub struct DataBlock {
    alloc: region::Allocation,
    len: usize,
}

impl DataBlock {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn block_addr(&self) -> Address {
        address_of(self.alloc.as_ptr::<u8>())
    }

    pub fn write_byte(&mut self, offset: usize, byte: u8) -> Result<(), ExecMemError> {
        self.write_bytes(offset, std::slice::from_ref(&byte))
    }

    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<(), ExecMemError> {
        if offset.checked_add(bytes.len()).map_or(true, |end| end > self.len) {
            return Err(ExecMemError::OutOfBounds {
                offset,
                len: bytes.len(),
                block_len: self.len,
            });
        }
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.alloc.as_mut_ptr::<u8>().add(offset), bytes.len());
        }
        Ok(())
    }

    pub fn read_byte(&self, offset: usize) -> Result<u8, ExecMemError> {
        if offset >= self.len {
            return Err(ExecMemError::OutOfBounds {
                offset,
                len: 1,
                block_len: self.len,
            });
        }
        Ok(unsafe { *self.alloc.as_ptr::<u8>().add(offset) })
    }

    pub fn free(self) {
        drop(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_round_trip_before_publish() {
        let mem = ExecMem::new();
        let mut block = mem.alloc_exec(4).unwrap();
        block.write_bytes(0, &[1, 2, 3, 4]).unwrap();
        assert_eq!(block.read_byte(2).unwrap(), 3);
    }

    #[test]
    fn out_of_bounds_write_is_rejected() {
        let mem = ExecMem::new();
        let mut block = mem.alloc_exec(2).unwrap();
        assert!(matches!(
            block.write_bytes(1, &[1, 2]),
            Err(ExecMemError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn data_block_is_independent_of_exec_block() {
        let mem = ExecMem::new();
        let mut data = mem.alloc_data(8).unwrap();
        data.write_bytes(0, b"deadbeef").unwrap();
        assert_eq!(data.read_byte(0).unwrap(), b'd');
    }
}
