//! Error taxonomy for the remote env-var engine (see SPEC_FULL.md §7).
//!
//! Kept as a hand-rolled enum in the style of the teacher's `io::Error`
//! wrapping rather than pulling in `thiserror`/`anyhow`, neither of which
//! appears anywhere in the teacher's dependency tree.

use std::fmt;

/// Which process a mapping lookup was performed against, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Which {
    SelfProcess,
    Target,
}

impl fmt::Display for Which {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Which::SelfProcess => write!(f, "controller"),
            Which::Target => write!(f, "target"),
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    /// `PTRACE_ATTACH` was refused by the kernel.
    AttachDenied {
        message: String,
        scope_diagnostic: Option<String>,
    },
    /// The target died or stopped for an unexpected signal mid-session.
    TargetGone { during: &'static str, detail: String },
    /// The C library could not be located in the named process's memory map.
    MapNotFound { which: Which, needle: String },
    /// The near-call displacement does not fit in a signed 32-bit integer.
    Unreachable { delta: i64 },
    /// A remote syscall (currently only `mmap`) returned its error indicator.
    SyscallFailed { syscall: &'static str, result: i64 },
    /// After a single-step, the instruction pointer did not land where the
    /// protocol expected it to.
    ProtocolMismatch { expected: u64, actual: u64 },
    /// Any other unexpected kernel-call failure, propagated with context.
    Io { context: &'static str, message: String },
}

impl EngineError {
    pub fn io(context: &'static str, source: impl fmt::Display) -> Self {
        EngineError::Io {
            context,
            message: source.to_string(),
        }
    }

    pub fn attach_denied(source: impl fmt::Display, scope_diagnostic: Option<String>) -> Self {
        EngineError::AttachDenied {
            message: source.to_string(),
            scope_diagnostic,
        }
    }

    /// A short, stable tag naming the error kind, handy for tests and logs
    /// that want to assert on the kind without matching the whole `Display`.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::AttachDenied { .. } => "attach_denied",
            EngineError::TargetGone { .. } => "target_gone",
            EngineError::MapNotFound { .. } => "map_not_found",
            EngineError::Unreachable { .. } => "unreachable",
            EngineError::SyscallFailed { .. } => "syscall_failed",
            EngineError::ProtocolMismatch { .. } => "protocol_mismatch",
            EngineError::Io { .. } => "io",
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::AttachDenied {
                message,
                scope_diagnostic,
            } => {
                write!(f, "PTRACE_ATTACH failed: {}", message)?;
                if let Some(diag) = scope_diagnostic {
                    write!(f, "\n{}", diag)?;
                }
                Ok(())
            }
            EngineError::TargetGone { during, detail } => {
                write!(f, "target process went away during {}: {}", during, detail)
            }
            EngineError::MapNotFound { which, needle } => {
                write!(
                    f,
                    "could not find a mapping containing {:?} in the {} process's memory map",
                    needle, which
                )
            }
            EngineError::Unreachable { delta } => write!(
                f,
                "cannot reach resolved symbol: displacement {} does not fit in rel32 \
                 (was the controller built as position-independent code?)",
                delta
            ),
            EngineError::SyscallFailed { syscall, result } => {
                write!(f, "remote {} failed, returned {:#x}", syscall, result)
            }
            EngineError::ProtocolMismatch { expected, actual } => write!(
                f,
                "instruction pointer landed at {:#x}, expected {:#x}",
                actual, expected
            ),
            EngineError::Io { context, message } => write!(f, "{}: {}", context, message),
        }
    }
}

impl std::error::Error for EngineError {}
