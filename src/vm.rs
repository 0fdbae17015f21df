//! Loading and starting scripts on the co-processor's VM runner.

use std::io::Read;

use log::{debug, info};

use crate::dispatch::messages::{
    encode_load_vm, encode_reset_vm, encode_run_vm, MSG_LOAD_VM, MSG_RESET_VM, MSG_RUN_VM,
    VM_LOAD_CHUNK,
};
use crate::error::LinkError;
use crate::hal::{Clock, LinkIo};
use crate::link::Link;

impl<P: LinkIo, C: Clock> Link<P, C> {
    /// Stop VM `vm_id` and discard its program.
    pub fn reset_vm(&mut self, vm_id: u32) -> Result<(), LinkError> {
        debug!("reset vm {}", vm_id);
        self.send_blocking(MSG_RESET_VM, &encode_reset_vm(vm_id))
    }

    /// Stream `size` bytes of program read from `image` to VM `vm_id`,
    /// followed by an empty chunk that marks the load complete.
    pub fn load_vm<R: Read>(&mut self, vm_id: u32, image: &mut R, size: u16) -> Result<(), LinkError> {
        info!("Loading vm {}: {} bytes", vm_id, size);
        let mut chunk = [0u8; VM_LOAD_CHUNK];
        let mut msg = [0u8; 8 + VM_LOAD_CHUNK];
        let mut offset = 0u16;
        while offset < size {
            let n = usize::from(size - offset).min(VM_LOAD_CHUNK);
            image.read_exact(&mut chunk[..n])?;
            let len = encode_load_vm(vm_id, size, offset, &chunk[..n], &mut msg);
            self.send_blocking(MSG_LOAD_VM, &msg[..len])?;
            offset += n as u16;
        }
        let len = encode_load_vm(vm_id, size, offset, &[], &mut msg);
        self.send_blocking(MSG_LOAD_VM, &msg[..len])
    }

    /// Call `func_addr` in VM `vm_id`. The VM_INFO reply is copied to `out`;
    /// returns its length.
    pub fn run_vm(&mut self, vm_id: u8, func_addr: u16, out: &mut [u8]) -> Result<usize, LinkError> {
        self.send_with_response(MSG_RUN_VM, &encode_run_vm(vm_id, func_addr), out)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
