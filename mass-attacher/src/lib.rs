//! Attach-planning and program-multiplexing engine for mass kernel function
//! tracing.
//!
//! Given a compiled tracing program template exposing `2 * (MAX_ARGS + 1)`
//! prototype entry/exit programs (one pair per argument count), this crate
//! discovers every traceable kernel function on the running host, filters
//! that set by user-supplied allow/deny globs, checks each surviving
//! function's prototype against the tracer ABI, and clones one attached
//! entry/exit program pair per chosen function.
//!
//! The symbol table, kernel type database, traceable-function list, and
//! program loader are external collaborators: this crate only depends on
//! them through the [`SymbolEnumerator`], [`TraceableFunctionSource`],
//! [`TypeDatabase`]/[`TypeDatabaseSource`], [`Template`], and
//! [`ProgramLoader`] traits. See [`orchestrator::Attacher`] for the entry
//! point that wires them all together.

pub mod abi;
pub mod filter;
pub mod glob;
pub mod multiplex;
pub mod orchestrator;
pub mod plan;
pub mod symbols;
pub mod template;
pub mod traceable;
pub mod typedb;

pub use filter::FilterPolicy;
pub use glob::GlobRule;
pub use orchestrator::{Attacher, AttacherOptions, FuncFilter, Phase};
pub use plan::{ArityBucket, AttachEntry, AttachPlan};
pub use symbols::{SymbolEnumerator, SymbolIndex, SymbolRecord};
pub use template::{CloneSpec, ProgId, ProgramLoader, Template};
pub use traceable::{TraceableFunctionSource, TraceableNameSet};
pub use typedb::{FunctionType, TypeDatabase, TypeDatabaseSource, TypeId, TypeKind};

pub use mass_attacher_shared::{MassAttacherError, MassAttacherResult};

/// Largest number of formal parameters a function can have and still be
/// traced. Fixed by the tracer's set of prototype programs: one entry and
/// one exit program per arity `0..=MAX_ARGS`.
pub const MAX_ARGS: usize = 11;

/// Default value for `RLIMIT_NOFILE` when `max_fileno_rlimit` is left at 0.
pub const DEFAULT_FILENO_RLIMIT: u64 = 300_000;

/// Install a `tracing` subscriber reading its filter from `RUST_LOG`
/// (defaulting to `info`). Opt-in convenience for binaries embedding this
/// crate; the library itself never installs a global subscriber on its own.
///
/// Idempotent: a second call is a no-op if a global subscriber is already
/// set.
#[cfg(feature = "init-tracing")]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
}
