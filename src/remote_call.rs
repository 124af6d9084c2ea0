//! Remote call engine (SPEC_FULL.md §5.5 / spec.md §4.5).
//!
//! Writes a single trampoline block into the scratch page: a near `call`
//! to the resolved symbol, a breakpoint, and the NUL-terminated argument
//! string packed right after it. Resumes the target until it traps on the
//! breakpoint and reads the return value back. The trampoline shape and
//! `rel32` arithmetic follow `reverie`'s `remote.rs::patch_at`; the
//! call-target resolution follows `getenv.c`'s `compute_jmp`.

use libc::user_regs_struct;
use log::{debug, info};

use crate::error::EngineError;
use crate::ptrace_transport::DebugTransport;

/// `e8 <rel32>` (call, 5 bytes) followed by `cc` (int3, 1 byte); the name
/// string starts immediately after.
const HEADER_LEN: usize = 6;

/// Smallest power of two that is `>= n`.
fn next_pow2(n: usize) -> usize {
    let mut p = 1usize;
    while p < n {
        p <<= 1;
    }
    p
}

/// Encodes the full trampoline block, `call rel32; int3; <name>\0`,
/// padded to the next power of two, that when placed at `call_site`
/// transfers control to `target` with `var_name` staged right after the
/// breakpoint.
fn build_trampoline(call_site: u64, target: u64, var_name: &str) -> Result<Vec<u8>, EngineError> {
    let next_insn = call_site as i64 + 5; // `call rel32` is 5 bytes
    let delta = target as i64 - next_insn;
    let rel32 = i32::try_from(delta).map_err(|_| EngineError::Unreachable { delta })?;

    let block_len = next_pow2(HEADER_LEN + var_name.len() + 1);
    let mut buf = vec![0u8; block_len];
    buf[0] = 0xe8;
    buf[1..5].copy_from_slice(&rel32.to_le_bytes());
    buf[5] = 0xcc;
    buf[HEADER_LEN..HEADER_LEN + var_name.len()].copy_from_slice(var_name.as_bytes());
    Ok(buf)
}

/// Reads a NUL-terminated C string out of the target starting at `addr`,
/// one raw word at a time.
///
/// `getenv.c`'s original scan reads a word, then unconditionally advances
/// the cursor by the full word width regardless of where within that word
/// the terminator was found, so it always reads up to `WORD_SIZE - 1`
/// bytes past the true end of the string. This scans byte-by-byte within
/// each word and stops exactly at the terminator.
fn read_c_string(transport: &DebugTransport, addr: u64) -> Result<Vec<u8>, EngineError> {
    let mut out = Vec::new();
    let mut cursor = addr;
    loop {
        let word = transport.read_raw_word(cursor)?;
        let bytes = word.to_ne_bytes();
        for &b in bytes.iter() {
            if b == 0 {
                return Ok(out);
            }
            out.push(b);
        }
        cursor += bytes.len() as u64;
    }
}

/// Invokes the remote `getenv` for `var_name` and returns its result, or
/// `None` if the target's `getenv` itself returned `NULL`.
///
/// `scratch_addr` must point to at least [`crate::scratch::scratch_len`]
/// bytes of RWX memory in the target. `baseline` is the target's
/// pre-attach register state, used as the base for the call's working
/// registers; the caller is responsible for restoring the real baseline
/// afterward.
pub fn remote_lookup(
    transport: &DebugTransport,
    baseline: &user_regs_struct,
    scratch_addr: u64,
    getenv_addr: u64,
    var_name: &str,
) -> Result<Option<String>, EngineError> {
    let trampoline = build_trampoline(scratch_addr, getenv_addr, var_name)?;
    debug!(
        "trampoline: call {:#x} -> {:#x}, {} bytes, name {:?} at {:#x}",
        scratch_addr,
        getenv_addr,
        trampoline.len(),
        var_name,
        scratch_addr + HEADER_LEN as u64
    );
    transport.poke_text(scratch_addr, &trampoline, None)?;

    let name_addr = scratch_addr + HEADER_LEN as u64;

    let mut working = *baseline;
    working.rip = scratch_addr;
    working.rdi = name_addr;
    working.rsp &= !0xf; // maintain the ABI's 16-byte stack alignment at call sites
    working.rax = 0; // no vector-register arguments
    transport.set_regs(&working)?;

    info!("dispatching remote call to {:#x}", getenv_addr);
    transport.cont_until_trap()?;

    let after = transport.get_regs()?;
    let expected_trap = scratch_addr + 6; // one byte past the int3 at offset 5
    if after.rip != expected_trap {
        return Err(EngineError::ProtocolMismatch {
            expected: expected_trap,
            actual: after.rip,
        });
    }

    let result_ptr = after.rax;
    if result_ptr == 0 {
        info!("remote call returned NULL, variable is unset");
        return Ok(None);
    }

    let raw = read_c_string(transport, result_ptr)?;
    info!("remote call returned a {}-byte string at {:#x}", raw.len(), result_ptr);
    Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trampoline_encodes_forward_call() {
        let call_site = 0x1000u64;
        let target = 0x2000u64;
        let buf = build_trampoline(call_site, target, "FOO").unwrap();
        assert_eq!(buf[0], 0xe8);
        let rel32 = i32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(call_site as i64 + 5 + rel32 as i64, target as i64);
        assert_eq!(buf[5], 0xcc);
        assert_eq!(&buf[HEADER_LEN..HEADER_LEN + 3], b"FOO");
        assert_eq!(buf[HEADER_LEN + 3], 0);
    }

    #[test]
    fn trampoline_encodes_backward_call() {
        let call_site = 0x7f0000002000u64;
        let target = 0x7f0000001000u64;
        let buf = build_trampoline(call_site, target, "X").unwrap();
        let rel32 = i32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(call_site as i64 + 5 + rel32 as i64, target as i64);
    }

    #[test]
    fn rejects_out_of_range_displacement() {
        let call_site = 0u64;
        let target = 0x1_0000_0000u64;
        assert!(build_trampoline(call_site, target, "X").is_err());
    }

    #[test]
    fn block_length_is_a_power_of_two_and_a_word_multiple() {
        for name in ["", "A", "FOO", &"x".repeat(257)] {
            let buf = build_trampoline(0x1000, 0x2000, name).unwrap();
            assert!(buf.len().is_power_of_two());
            assert_eq!(buf.len() % 8, 0);
            assert!(buf.len() >= HEADER_LEN + name.len() + 1);
        }
    }
}
