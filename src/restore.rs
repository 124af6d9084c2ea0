//! Restoration manager (SPEC_FULL.md §5.6 / spec.md §4.6 and §9).
//!
//! `getenv.c` restores target state along a single straight-line path and
//! falls back to `goto fail` on error, which works there because every
//! step before the jump target has already run unconditionally. Rust
//! models the same "no matter how we leave, put everything back" guarantee
//! with a session guard: `Session::finish` consumes the guard on the
//! success path, while `Drop` performs the matching unwind on every other
//! path (an error return, a `?`, a panic), branching on how far the
//! session got (`SessionState`) to decide exactly what still needs
//! undoing rather than re-running every step unconditionally.

use libc::user_regs_struct;
use log::{info, warn};

use crate::error::EngineError;
use crate::ptrace_transport::DebugTransport;
use crate::scratch;

/// Tracks how much of the attach/patch/map sequence has completed, so
/// `Drop` knows exactly how much of it still needs unwinding. This is a
/// coarser version of the nine-state machine spec.md §9 sketches
/// (`Attached -> BaselinePatched -> ScratchMapped -> CallDispatched ->
/// BackAtBaseline -> ScratchUnmapped -> TextRestored -> RegsRestored ->
/// Detached`): most of those finer states (`BaselinePatched`,
/// `CallDispatched`, `BackAtBaseline`) exist in spec.md to track a
/// control-flow scheme built on `jmp`-through-register tricks, because
/// `getenv.c` can only redirect execution by running code. This session
/// redirects execution by writing the target's register file directly
/// (`DebugTransport::set_regs`) at every step, so there is never an
/// intermediate "control flow is mid-redirect" state to track; what
/// remains is "no scratch page exists yet", "a scratch page exists and
/// must be torn down", and "it has already been torn down", which is what
/// the three variants below distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    BaselineSaved,
    ScratchMapped,
    ScratchReleased,
}

/// An attached target together with everything needed to restore it to its
/// pre-attach state. Must be consumed via [`Session::finish`] on the
/// success path; any other path (including an early return via `?` or a
/// panic) restores and detaches through `Drop`.
pub struct Session {
    transport: DebugTransport,
    baseline_regs: user_regs_struct,
    scratch_addr: Option<u64>,
    state: SessionState,
    finished: bool,
}

impl Session {
    /// Attaches to the target and records its pre-attach register state.
    ///
    /// Between a successful attach and a successful register read there is
    /// no live `Session` yet for `Drop` to unwind through, so a failure to
    /// read registers here is handled with its own explicit best-effort
    /// detach rather than by constructing a half-initialized session.
    pub fn attach(pid: nix::unistd::Pid) -> Result<Self, EngineError> {
        let transport = DebugTransport::attach(pid)?;
        let baseline_regs = match transport.get_regs() {
            Ok(regs) => regs,
            Err(e) => {
                let _ = transport.detach();
                return Err(e);
            }
        };
        Ok(Session {
            transport,
            baseline_regs,
            scratch_addr: None,
            state: SessionState::BaselineSaved,
            finished: false,
        })
    }

    pub fn transport(&self) -> &DebugTransport {
        &self.transport
    }

    pub fn baseline_regs(&self) -> &user_regs_struct {
        &self.baseline_regs
    }

    /// Maps scratch space in the target and records it for release on the
    /// way out.
    pub fn map_scratch(&mut self) -> Result<u64, EngineError> {
        let addr = scratch::acquire(&self.transport, &self.baseline_regs)?;
        self.scratch_addr = Some(addr);
        self.state = SessionState::ScratchMapped;
        Ok(addr)
    }

    /// Unmaps the scratch region and restores the baseline registers,
    /// leaving the target exactly as it was observed at attach time except
    /// for its instruction pointer, which the kernel will resume from
    /// baseline_regs.rip on detach.
    fn release_scratch(&mut self) -> Result<(), EngineError> {
        if let Some(addr) = self.scratch_addr.take() {
            scratch::release(&self.transport, &self.baseline_regs, addr)?;
        }
        self.transport.set_regs(&self.baseline_regs)?;
        self.state = SessionState::ScratchReleased;
        Ok(())
    }

    /// Completes the session on the success path: releases scratch memory,
    /// restores the original registers, and detaches.
    pub fn finish(mut self) -> Result<(), EngineError> {
        self.release_scratch()?;
        self.transport.detach()?;
        self.finished = true;
        info!("pid={} restored and detached", self.transport.pid());
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Best-effort: we are already unwinding from a prior error (or a
        // panic), so there is no useful way to report a failure here.
        warn!(
            "pid={} unwinding from state {:?} without a clean finish; best-effort restore",
            self.transport.pid(),
            self.state
        );
        match self.state {
            // No scratch page was ever mapped; only the register file may
            // have drifted from baseline (a failed `map_scratch` can still
            // have single-stepped the target partway through the mmap
            // stub before erroring out).
            SessionState::BaselineSaved => {
                let _ = self.transport.set_regs(&self.baseline_regs);
            }
            // A scratch page is still live and must be unmapped before we
            // let go of the target.
            SessionState::ScratchMapped => {
                let _ = self.release_scratch();
            }
            // `release_scratch` already ran (as part of a failed `finish`);
            // registers are already back at baseline.
            SessionState::ScratchReleased => {}
        }
        let _ = self.transport.detach();
    }
}
