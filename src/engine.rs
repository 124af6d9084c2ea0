//! Top-level orchestrator tying every component together (spec.md "Data
//! flow" in §2): attach, map scratch, resolve the symbol, run the remote
//! call, restore, detach.

use log::info;
use nix::unistd::Pid;

use crate::error::{EngineError, Which};
use crate::proc_maps::find_library;
use crate::remote_call;
use crate::restore::Session;
use crate::symbol::resolve_symbol;

const LIBC_NEEDLE: &str = "/libc";

/// Looks up `var_name` in the environment of the process identified by
/// `pid`, returning `Ok(None)` if the variable is unset in the target (a
/// successful lookup, not an error).
pub fn lookup_remote_env(pid: i32, var_name: &str) -> Result<Option<String>, EngineError> {
    let target_pid = Pid::from_raw(pid);
    let self_pid = nix::unistd::getpid();

    let local_base = find_library(self_pid, LIBC_NEEDLE, Which::SelfProcess)?;
    // `libc::getenv` is the reference point for `resolve_symbol`'s offset
    // arithmetic: its local address is whatever this very process's
    // dynamic linker resolved it to.
    let local_getenv = libc::getenv as usize as u64;

    let mut session = Session::attach(target_pid)?;
    info!("attached to pid={}", pid);

    let target_base = find_library(target_pid, LIBC_NEEDLE, Which::Target)?;
    let getenv_addr = resolve_symbol(target_base, local_base, local_getenv);
    info!(
        "resolved getenv: local={:#x} (libc@{:#x}) -> target={:#x} (libc@{:#x})",
        local_getenv, local_base, getenv_addr, target_base
    );

    let scratch_addr = session.map_scratch()?;
    let baseline = *session.baseline_regs();

    let result =
        remote_call::remote_lookup(session.transport(), &baseline, scratch_addr, getenv_addr, var_name)?;
    info!("lookup of {:?} against pid={} complete", var_name, pid);

    session.finish()?;
    Ok(result)
}
