//! Mapping inspector (SPEC_FULL.md §5.1 / spec.md §4.1).
//!
//! Ported from the teacher's `proc.rs`, but trimmed down to the three
//! whitespace-delimited fields this component actually needs instead of
//! decoding a full `/proc/<pid>/maps` entry with a parser combinator: the
//! symbol locator in this crate never needs `offset`/`dev`/`inode`.

use nix::unistd::Pid;

use crate::error::{EngineError, Which};

/// Finds the load address of the first mapping whose path contains `needle`
/// and whose permissions are readable, executable and private.
pub fn find_library(pid: Pid, needle: &str, which: Which) -> Result<u64, EngineError> {
    let path = format!("/proc/{}/maps", pid);
    let contents =
        std::fs::read_to_string(&path).map_err(|e| EngineError::io("reading process maps", e))?;

    for line in contents.lines() {
        if let Some(addr) = match_maps_line(line, needle) {
            return Ok(addr);
        }
    }

    Err(EngineError::MapNotFound {
        which,
        needle: needle.to_string(),
    })
}

/// Returns the mapping's start address if `line` names an executable,
/// readable, private mapping whose path contains `needle` as a substring not
/// immediately followed by a lowercase letter (so `/libc` does not match
/// `/libcoolthing.so`).
fn match_maps_line(line: &str, needle: &str) -> Option<u64> {
    let mut fields = line.split_whitespace();
    let range = fields.next()?;
    let perms = fields.next()?;

    if !(perms.contains('r') && perms.contains('x') && perms.contains('p')) {
        return None;
    }

    // dev, inode, offset are uninteresting to us; the pathname, when
    // present, is whatever whitespace-delimited token remains last.
    let path = fields.last()?;

    let match_start = path.find(needle)?;
    let after = match_start + needle.len();
    if let Some(&b) = path.as_bytes().get(after) {
        if b.is_ascii_lowercase() {
            return None;
        }
    }

    let start_hex = range.split('-').next()?;
    u64::from_str_radix(start_hex, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_libc_line() {
        let line = "7f1a2b3c4000-7f1a2b3e6000 r-xp 00022000 08:01 131090  /usr/lib/x86_64-linux-gnu/libc.so.6";
        assert_eq!(match_maps_line(line, "/libc"), Some(0x7f1a2b3c4000));
    }

    #[test]
    fn rejects_lowercase_suffix_prefix_match() {
        let line = "7f1a2b3c4000-7f1a2b3e6000 r-xp 00022000 08:01 131090  /usr/lib/libcoolthing.so";
        assert_eq!(match_maps_line(line, "/libc"), None);
    }

    #[test]
    fn rejects_non_executable_mapping() {
        let line = "7f1a2b3c4000-7f1a2b3e6000 rw-p 00022000 08:01 131090  /usr/lib/x86_64-linux-gnu/libc.so.6";
        assert_eq!(match_maps_line(line, "/libc"), None);
    }

    #[test]
    fn rejects_shared_mapping_without_private_flag() {
        let line = "7f1a2b3c4000-7f1a2b3e6000 r-xs 00022000 08:01 131090  /usr/lib/x86_64-linux-gnu/libc.so.6";
        assert_eq!(match_maps_line(line, "/libc"), None);
    }

    #[test]
    fn allows_exact_suffix_match_at_end_of_path() {
        // nothing follows the needle match at all, so there is no lowercase
        // letter to reject against.
        let line = "7f1a2b3c4000-7f1a2b3e6000 r-xp 00000000 00:00 0  /memfd:/libc";
        assert_eq!(match_maps_line(line, "/libc"), Some(0x7f1a2b3c4000));
    }

    #[test]
    fn can_decode_own_maps() {
        // Assumes a glibc-dynamic test binary; a musl/static build would
        // have no "/libc" mapping to find.
        let pid = nix::unistd::getpid();
        let found = find_library(pid, "/libc", Which::SelfProcess);
        assert!(found.is_ok(), "expected to find libc in our own maps");
    }
}
