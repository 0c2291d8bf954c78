//! Execution-context checks.
//!
//! Disk, image and domain operations touch root-owned state; key discovery
//! touches the invoking user's session. The entry point checks the context
//! once, before any verb does work, so components never look at the
//! process uid themselves.

use crate::error::ClusterError;

/// Privilege a verb runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    /// Effective uid 0.
    Elevated,
    /// Any other effective uid.
    Unprivileged,
}

impl Privilege {
    pub fn describe(&self) -> &'static str {
        match self {
            Privilege::Elevated => "as root",
            Privilege::Unprivileged => "as a non-root user",
        }
    }
}

/// Reports the privilege of the running process.
pub trait ExecutionContext: Send + Sync {
    fn privilege(&self) -> Privilege;

    /// Fail unless the process runs with `required` privilege.
    fn require(&self, verb: &str, required: Privilege) -> Result<(), ClusterError> {
        if self.privilege() == required {
            Ok(())
        } else {
            Err(ClusterError::Privilege {
                verb: verb.to_string(),
                required,
            })
        }
    }
}

/// The real process, judged by its effective uid.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessContext;

impl ExecutionContext for ProcessContext {
    fn privilege(&self) -> Privilege {
        // SAFETY: geteuid has no preconditions and cannot fail.
        if unsafe { libc::geteuid() } == 0 {
            Privilege::Elevated
        } else {
            Privilege::Unprivileged
        }
    }
}

/// A context with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedContext(pub Privilege);

impl ExecutionContext for FixedContext {
    fn privilege(&self) -> Privilege {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_matching_privilege() {
        let ctx = FixedContext(Privilege::Elevated);
        assert!(ctx.require("create", Privilege::Elevated).is_ok());
    }

    #[test]
    fn test_require_mismatch() {
        let ctx = FixedContext(Privilege::Elevated);
        let err = ctx.require("userdata", Privilege::Unprivileged).unwrap_err();
        assert!(matches!(
            err,
            ClusterError::Privilege {
                required: Privilege::Unprivileged,
                ..
            }
        ));
    }
}
