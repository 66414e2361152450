//! Allow/deny glob filter with precedence and per-rule match accounting.

use mass_attacher_shared::MassAttacherResult;

use crate::glob::GlobRule;

/// Deny globs installed by the orchestrator itself, before any user rule,
/// to prevent tracing primitives that would cause reentrancy or hangs.
///
/// `bpf_get_smp_processor_id` and the `migrate_*`/`rcu_read_*` helpers guard
/// against self-reentrancy in the tracing programs themselves;
/// `__bpf_prog_enter*`/`__bpf_prog_exit*` are the trampoline helpers that
/// would otherwise recursively trigger our own probes; the `*_sys_*` globs
/// exclude long-sleeping syscalls that can hang a trampoline-based probe on
/// kernels predating the fexit sleepable-trampoline fix.
pub const ENFORCED_DENY_GLOBS: &[&str] = &[
    "bpf_get_smp_processor_id",
    "migrate_enable",
    "migrate_disable",
    "rcu_read_lock*",
    "rcu_read_unlock*",
    "__bpf_prog_enter*",
    "__bpf_prog_exit*",
    "*_sys_select",
    "*_sys_epoll_wait",
    "*_sys_ppoll",
];

/// Ordered allow/deny rule lists and the resolution algorithm (§4.5):
///
/// 1. Any matching deny rule rejects the name outright.
/// 2. If at least one allow rule exists, the name must match one of them.
/// 3. With no allow rules at all, the default is to accept.
#[derive(Debug, Default)]
pub struct FilterPolicy {
    allows: Vec<GlobRule>,
    denies: Vec<GlobRule>,
}

impl FilterPolicy {
    /// Builds a policy with the enforced deny globs already installed.
    pub fn new() -> MassAttacherResult<Self> {
        let mut policy = Self::default();
        for glob in ENFORCED_DENY_GLOBS {
            policy.denies.push(GlobRule::new(*glob)?);
        }
        Ok(policy)
    }

    /// Appends an allow rule. Adding the same pattern twice yields two
    /// independent rules with independent counters.
    pub fn allow_glob(&mut self, pattern: &str) -> MassAttacherResult<()> {
        self.allows.push(GlobRule::new(pattern)?);
        Ok(())
    }

    /// Appends a deny rule.
    pub fn deny_glob(&mut self, pattern: &str) -> MassAttacherResult<()> {
        self.denies.push(GlobRule::new(pattern)?);
        Ok(())
    }

    /// Resolves whether `name` should be accepted, per the algorithm above.
    /// Matching rules have their counters incremented as a side effect.
    pub fn accepts(&self, name: &str) -> bool {
        for deny in &self.denies {
            if deny.is_match(name) {
                deny.record_match();
                return false;
            }
        }

        if self.allows.is_empty() {
            return true;
        }

        for allow in &self.allows {
            if allow.is_match(name) {
                allow.record_match();
                return true;
            }
        }

        false
    }

    pub fn allow_rules(&self) -> &[GlobRule] {
        &self.allows
    }

    pub fn deny_rules(&self) -> &[GlobRule] {
        &self.denies
    }
}
