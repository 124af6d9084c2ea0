//! Debug transport (SPEC_FULL.md §5.3 / spec.md §4.3).
//!
//! A thin, typed wrapper over `nix::sys::ptrace`, grounded on the same
//! primitives the teacher's `traced_task.rs` and the `deet`/`mini-dbg`
//! example files drive by hand: attach/detach, register read/write,
//! word-at-a-time text read/write, single-step and continue-to-trap.

use std::mem::size_of;

use libc::user_regs_struct;
use log::{debug, trace, warn};
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

use crate::error::EngineError;

const WORD_SIZE: usize = size_of::<u64>();

pub struct DebugTransport {
    pid: Pid,
}

impl DebugTransport {
    /// Attaches to `pid` and waits for the initial stop.
    ///
    /// `PTRACE_ATTACH` makes the kernel deliver `SIGSTOP` to the tracee, so
    /// the `waitpid` that follows reports a stop signal of `SIGSTOP`, not
    /// `SIGTRAP` — unlike every later stop, which is driven by our own
    /// single-step/continue calls and does land on `SIGTRAP`. This wait
    /// accepts whatever signal the attach stop arrives with, the same way
    /// `getenv.c`'s post-`PTRACE_ATTACH` `waitpid` (unlike its `do_wait`,
    /// used only for singlestep/cont) never checks the stop signal at all.
    pub fn attach(pid: Pid) -> Result<Self, EngineError> {
        trace!("PTRACE_ATTACH pid={}", pid);
        ptrace::attach(pid).map_err(|e| {
            EngineError::attach_denied(e, crate::preconditions::ptrace_scope_diagnostic())
        })?;
        wait_for_attach_stop(pid)?;
        debug!("attached to pid={}", pid);
        Ok(DebugTransport { pid })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn detach(&self) -> Result<(), EngineError> {
        trace!("PTRACE_DETACH pid={}", self.pid);
        ptrace::detach(self.pid, None).map_err(|e| EngineError::io("PTRACE_DETACH", e))
    }

    pub fn get_regs(&self) -> Result<user_regs_struct, EngineError> {
        let regs = ptrace::getregs(self.pid).map_err(|e| EngineError::io("PTRACE_GETREGS", e))?;
        trace!("PTRACE_GETREGS pid={} rip={:#x}", self.pid, regs.rip);
        Ok(regs)
    }

    pub fn set_regs(&self, regs: &user_regs_struct) -> Result<(), EngineError> {
        trace!("PTRACE_SETREGS pid={} rip={:#x}", self.pid, regs.rip);
        ptrace::setregs(self.pid, *regs).map_err(|e| EngineError::io("PTRACE_SETREGS", e))
    }

    /// Reads `len` bytes of target text starting at `addr`. `len` must be a
    /// multiple of the native word size.
    pub fn peek_text(&self, addr: u64, len: usize) -> Result<Vec<u8>, EngineError> {
        check_word_aligned(len)?;
        trace!("PTRACE_PEEKTEXT pid={} addr={:#x} len={}", self.pid, addr, len);
        let mut out = Vec::with_capacity(len);
        let mut offset = 0usize;
        while offset < len {
            let word = self.read_raw_word(addr + offset as u64)?;
            out.extend_from_slice(&word.to_ne_bytes());
            offset += WORD_SIZE;
        }
        Ok(out)
    }

    /// Writes `new` at `addr`. `new.len()` must be a multiple of the native
    /// word size. If `old_out` is `Some`, it is cleared and filled with the
    /// pre-write contents.
    pub fn poke_text(
        &self,
        addr: u64,
        new: &[u8],
        mut old_out: Option<&mut Vec<u8>>,
    ) -> Result<(), EngineError> {
        check_word_aligned(new.len())?;
        trace!(
            "PTRACE_POKETEXT pid={} addr={:#x} len={} capture={}",
            self.pid,
            addr,
            new.len(),
            old_out.is_some()
        );
        if let Some(buf) = old_out.as_deref_mut() {
            buf.clear();
        }

        let mut offset = 0usize;
        while offset < new.len() {
            let word_addr = addr + offset as u64;
            if let Some(buf) = old_out.as_deref_mut() {
                let prior = self.read_raw_word(word_addr)?;
                buf.extend_from_slice(&prior.to_ne_bytes());
            }

            let mut word_bytes = [0u8; WORD_SIZE];
            word_bytes.copy_from_slice(&new[offset..offset + WORD_SIZE]);
            let word = u64::from_ne_bytes(word_bytes);
            unsafe {
                ptrace::write(self.pid, word_addr as ptrace::AddressType, word as *mut _)
                    .map_err(|e| EngineError::io("PTRACE_POKETEXT", e))?;
            }
            offset += WORD_SIZE;
        }
        Ok(())
    }

    /// Executes exactly one instruction.
    pub fn single_step(&self) -> Result<(), EngineError> {
        trace!("PTRACE_SINGLESTEP pid={}", self.pid);
        ptrace::step(self.pid, None).map_err(|e| EngineError::io("PTRACE_SINGLESTEP", e))?;
        wait_for_stop(self.pid)
    }

    /// Resumes execution until the target stops with `SIGTRAP` (our embedded
    /// breakpoint).
    pub fn cont_until_trap(&self) -> Result<(), EngineError> {
        trace!("PTRACE_CONT pid={}", self.pid);
        ptrace::cont(self.pid, None).map_err(|e| EngineError::io("PTRACE_CONT", e))?;
        wait_for_stop(self.pid)
    }

    /// Reads one raw, possibly-unaligned word of target memory. Used by the
    /// remote call engine's C-string scan, which walks memory four bytes at
    /// a time rather than in word-aligned strides; unlike `peek_text` this
    /// does not enforce the word-alignment invariant, since that invariant
    /// governs code patches, not the string scan.
    pub(crate) fn read_raw_word(&self, addr: u64) -> Result<u64, EngineError> {
        ptrace::read(self.pid, addr as ptrace::AddressType)
            .map(|v| v as u64)
            .map_err(|e| EngineError::io("PTRACE_PEEKTEXT", e))
    }
}

fn check_word_aligned(len: usize) -> Result<(), EngineError> {
    if len % WORD_SIZE != 0 {
        return Err(EngineError::io(
            "text read/write length",
            format!("{} is not a multiple of the native word size ({})", len, WORD_SIZE),
        ));
    }
    Ok(())
}

/// Classifies a `waitpid` result, turning anything other than a plain
/// stop into a `TargetGone` (or `Io`) error. Returns the stop signal on a
/// stop so callers can decide whether it was the one they expected.
fn classify_wait(pid: Pid, result: nix::Result<WaitStatus>) -> Result<Signal, EngineError> {
    match result {
        Ok(WaitStatus::Stopped(_, signal)) => Ok(signal),
        Ok(WaitStatus::Exited(_, code)) => Err(EngineError::TargetGone {
            during: "wait",
            detail: format!("exited with status {}", code),
        }),
        Ok(WaitStatus::Signaled(_, signal, _)) => Err(EngineError::TargetGone {
            during: "wait",
            detail: format!("terminated by signal {:?}", signal),
        }),
        Ok(other) => Err(EngineError::TargetGone {
            during: "wait",
            detail: format!("unexpected wait status {:?}", other),
        }),
        Err(e) => Err(EngineError::io("waitpid", e)),
    }
    .map(|signal| {
        trace!("waitpid pid={} stopped with {:?}", pid, signal);
        signal
    })
}

/// Waits for the target to re-stop after one of our own single-steps or
/// continues, which must land on `SIGTRAP` — anything else (the target
/// fielding a real signal, or dying) is an error.
fn wait_for_stop(pid: Pid) -> Result<(), EngineError> {
    let signal = classify_wait(pid, waitpid(pid, None))?;
    if signal != Signal::SIGTRAP {
        warn!("pid={} stopped with unexpected signal {:?}, expected SIGTRAP", pid, signal);
        return Err(EngineError::TargetGone {
            during: "wait",
            detail: format!("stopped with unexpected signal {:?}", signal),
        });
    }
    Ok(())
}

/// Waits for the stop that follows `PTRACE_ATTACH`, which arrives as
/// `SIGSTOP` rather than `SIGTRAP`. Any stop at all is accepted here; only
/// exit/termination is an error.
fn wait_for_attach_stop(pid: Pid) -> Result<(), EngineError> {
    classify_wait(pid, waitpid(pid, None)).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::check_word_aligned;

    #[test]
    fn rejects_lengths_not_a_multiple_of_word_size() {
        assert!(check_word_aligned(8).is_ok());
        assert!(check_word_aligned(16).is_ok());
        assert!(check_word_aligned(0).is_ok());
        assert!(check_word_aligned(1).is_err());
        assert!(check_word_aligned(7).is_err());
        assert!(check_word_aligned(9).is_err());
    }
}
