//! Scratch allocator (SPEC_FULL.md §5.4 / spec.md §4.4).
//!
//! Obtains a page of remotely-executable scratch memory by driving the
//! target's own `mmap`/`munmap` through a synthesized two-instruction
//! `syscall; jmp *rax` stub written over the target's current `rip`,
//! single-stepped so control returns to us rather than running free. This
//! mirrors `getenv.c`'s `remote_mmap`/`remote_munmap`, and the stub shape
//! matches the `syscall;ret` sequences `reverie`'s `remote.rs` patches in
//! for its own remote syscalls.

use libc::{user_regs_struct, MAP_ANONYMOUS, MAP_PRIVATE, PROT_EXEC, PROT_READ, PROT_WRITE};
use log::{debug, info};

use crate::error::EngineError;
use crate::ptrace_transport::DebugTransport;

const SCRATCH_LEN: u64 = 4096;

/// `0f 05` (syscall) followed by `ff e0` (jmp *rax), padded to a full word
/// so the write obeys the word-alignment invariant.
const STUB: [u8; 8] = [0x0f, 0x05, 0xff, 0xe0, 0xcc, 0xcc, 0xcc, 0xcc];

/// Writes the `syscall; jmp *rax` prelude over `pc`, returning the bytes it
/// displaced so the caller can restore them afterward.
fn write_stub(transport: &DebugTransport, pc: u64) -> Result<Vec<u8>, EngineError> {
    let mut saved = Vec::new();
    transport.poke_text(pc, &STUB, Some(&mut saved))?;
    Ok(saved)
}

/// Restores the bytes `write_stub` displaced and reinstalls `baseline`'s
/// full register file.
fn restore_stub(
    transport: &DebugTransport,
    pc: u64,
    saved: &[u8],
    baseline: &user_regs_struct,
) -> Result<(), EngineError> {
    transport.poke_text(pc, saved, None)?;
    transport.set_regs(baseline)?;
    Ok(())
}

/// Maps `SCRATCH_LEN` bytes of RWX scratch space inside the target and
/// returns its address.
///
/// Runs the full two-instruction stub: the `syscall` performs `mmap`, and
/// once its return value has been checked for success, the `jmp *rax`
/// lands the target on the freshly mapped page, which is then verified
/// against the syscall's own return value.
pub fn acquire(transport: &DebugTransport, baseline: &user_regs_struct) -> Result<u64, EngineError> {
    let pc = baseline.rip;
    let saved = write_stub(transport, pc)?;

    let mut regs = *baseline;
    regs.rax = libc::SYS_mmap as u64;
    regs.rdi = 0; // let the kernel choose the address
    regs.rsi = SCRATCH_LEN;
    regs.rdx = (PROT_READ | PROT_WRITE | PROT_EXEC) as u64;
    regs.r10 = (MAP_PRIVATE | MAP_ANONYMOUS) as u64;
    regs.r8 = u64::MAX as u64; // fd: -1
    regs.r9 = 0;
    regs.rip = pc;
    transport.set_regs(&regs)?;
    debug!("remote mmap: running syscall stub at {:#x}", pc);
    transport.single_step()?; // executes `syscall`

    let after_syscall = transport.get_regs()?;
    let result = after_syscall.rax as i64;

    if result < 0 {
        restore_stub(transport, pc, &saved, baseline)?;
        return Err(EngineError::SyscallFailed {
            syscall: "mmap",
            result,
        });
    }

    transport.single_step()?; // executes `jmp *rax`, landing on the new page

    let after_jmp = transport.get_regs()?;
    if after_jmp.rip != result as u64 {
        restore_stub(transport, pc, &saved, baseline)?;
        return Err(EngineError::ProtocolMismatch {
            expected: result as u64,
            actual: after_jmp.rip,
        });
    }

    restore_stub(transport, pc, &saved, baseline)?;
    info!("scratch page acquired at {:#x}", result);
    Ok(result as u64)
}

/// Unmaps the scratch region acquired by [`acquire`].
///
/// Unlike `acquire`, this single-steps *only* the `syscall` instruction.
/// `munmap`'s return value lands in `rax` just like `mmap`'s did, but here
/// it is a bare status code (0 or a negative errno), not an address;
/// executing the stub's `jmp *rax` afterward would send the target
/// jumping into unmapped (or NULL) memory. `getenv.c`'s own
/// `getenv_process` never executes that second instruction for its
/// `munmap` call either, for the same reason.
pub fn release(
    transport: &DebugTransport,
    baseline: &user_regs_struct,
    scratch_addr: u64,
) -> Result<(), EngineError> {
    let pc = baseline.rip;
    let saved = write_stub(transport, pc)?;

    let mut regs = *baseline;
    regs.rax = libc::SYS_munmap as u64;
    regs.rdi = scratch_addr;
    regs.rsi = SCRATCH_LEN;
    regs.rip = pc;
    transport.set_regs(&regs)?;
    debug!("remote munmap: running syscall stub at {:#x} for page {:#x}", pc, scratch_addr);
    transport.single_step()?; // executes `syscall` only

    restore_stub(transport, pc, &saved, baseline)?;
    info!("scratch page {:#x} released", scratch_addr);
    Ok(())
}

pub const fn scratch_len() -> u64 {
    SCRATCH_LEN
}
