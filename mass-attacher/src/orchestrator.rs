//! The orchestrator: wires every collaborator together and drives the
//! `new -> prepare -> load -> attach -> activate -> free` lifecycle.

use mass_attacher_shared::{MassAttacherError, MassAttacherResult};

use crate::abi;
use crate::filter::FilterPolicy;
use crate::multiplex::Multiplexer;
use crate::plan::AttachEntry;
use crate::plan::AttachPlan;
use crate::symbols::{SymbolEnumerator, SymbolIndex};
use crate::template::{ProgramLoader, Template};
use crate::traceable::{TraceableFunctionSource, TraceableNameSet};
use crate::typedb::{TypeDatabase, TypeDatabaseSource, TypeId};
use crate::DEFAULT_FILENO_RLIMIT;

/// Decides, per surviving function, whether to include it in the plan.
/// Called after every other check has passed, with the type database, the
/// function's type id, its name, and how many functions have been accepted
/// so far.
pub type FuncFilter = Box<dyn Fn(&dyn TypeDatabase, TypeId, &str, usize) -> bool>;

/// Lifecycle phase. Operations are gated: each one only runs from the phase
/// immediately preceding it, and running it advances the phase by exactly
/// one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    New,
    Prepared,
    Loaded,
    Attached,
    Active,
    Freed,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Phase::New => "new",
            Phase::Prepared => "prepared",
            Phase::Loaded => "loaded",
            Phase::Attached => "attached",
            Phase::Active => "active",
            Phase::Freed => "freed",
        }
    }
}

/// Tunable knobs for one [`Attacher`] run.
///
/// `verbose`/`debug`/`debug_extra` are three widening tiers of diagnostic
/// detail emitted as `tracing` events during `prepare` (summary counts;
/// per-skip-reason; per-function trace), mirroring the three-tier verbosity
/// the reference attacher exposes via `printf`. Setting `debug` implies
/// `verbose`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AttacherOptions {
    /// Raise `RLIMIT_MEMLOCK` to infinite and `RLIMIT_NOFILE` to
    /// `max_fileno_rlimit` during `prepare`. Most hosts need this to load
    /// more than a handful of BPF programs.
    pub raise_resource_limits: bool,
    /// `RLIMIT_NOFILE` target when `raise_resource_limits` is set. `0` means
    /// [`DEFAULT_FILENO_RLIMIT`].
    pub max_fileno_rlimit: u64,
    /// Stops accepting new functions into the plan once this many have been
    /// accepted. `0` means unlimited.
    pub max_func_cnt: usize,
    pub verbose: bool,
    pub debug: bool,
    pub debug_extra: bool,
    /// Opaque program-type tag applied to every cloned program.
    pub prog_type: u32,
    /// Opaque expected-attach-type tag applied to every cloned program.
    pub expected_attach_type: u32,
}

impl Default for AttacherOptions {
    fn default() -> Self {
        Self {
            raise_resource_limits: true,
            max_fileno_rlimit: 0,
            max_func_cnt: 0,
            verbose: false,
            debug: false,
            debug_extra: false,
            prog_type: 0,
            expected_attach_type: 0,
        }
    }
}

/// Attach-planning and program-multiplexing engine.
///
/// Construct with [`Attacher::new`], add allow/deny rules, then drive the
/// phases in order: [`Attacher::prepare`], [`Attacher::load`],
/// [`Attacher::attach`], [`Attacher::activate`]. Dropping an `Attacher` that
/// hasn't reached [`Phase::Freed`] calls [`Attacher::free`] automatically.
pub struct Attacher {
    phase: Phase,
    options: AttacherOptions,
    filter: FilterPolicy,
    func_filter: Option<FuncFilter>,

    symbol_source: Box<dyn SymbolEnumerator>,
    traceable_source: Box<dyn TraceableFunctionSource>,
    type_db_source: Box<dyn TypeDatabaseSource>,
    template: Box<dyn Template>,
    loader: Box<dyn ProgramLoader>,

    symbol_index: Option<SymbolIndex>,
    traceable_set: Option<TraceableNameSet>,
    type_db: Option<Box<dyn TypeDatabase>>,
    plan: AttachPlan,
    multiplexer: Multiplexer,
}

impl Attacher {
    pub fn new(
        symbol_source: Box<dyn SymbolEnumerator>,
        traceable_source: Box<dyn TraceableFunctionSource>,
        type_db_source: Box<dyn TypeDatabaseSource>,
        template: Box<dyn Template>,
        loader: Box<dyn ProgramLoader>,
        mut options: AttacherOptions,
    ) -> MassAttacherResult<Self> {
        if options.debug {
            options.verbose = true;
        }
        Ok(Self {
            phase: Phase::New,
            options,
            filter: FilterPolicy::new()?,
            func_filter: None,
            symbol_source,
            traceable_source,
            type_db_source,
            template,
            loader,
            symbol_index: None,
            traceable_set: None,
            type_db: None,
            plan: AttachPlan::new(),
            multiplexer: Multiplexer::new(),
        })
    }

    fn require_phase(&self, expected: Phase) -> MassAttacherResult<()> {
        if self.phase != expected {
            return Err(MassAttacherError::PhaseOrder(format!(
                "expected phase {}, attacher is {}",
                expected.name(),
                self.phase.name()
            )));
        }
        Ok(())
    }

    /// Adds an allow-glob rule. Only valid in [`Phase::New`].
    pub fn allow_glob(&mut self, pattern: &str) -> MassAttacherResult<()> {
        self.require_phase(Phase::New)?;
        self.filter.allow_glob(pattern)
    }

    /// Adds a deny-glob rule. Only valid in [`Phase::New`].
    pub fn deny_glob(&mut self, pattern: &str) -> MassAttacherResult<()> {
        self.require_phase(Phase::New)?;
        self.filter.deny_glob(pattern)
    }

    /// Installs a custom per-function filter, run after every other check
    /// during `prepare`. Only valid in [`Phase::New`].
    pub fn set_func_filter(&mut self, filter: FuncFilter) -> MassAttacherResult<()> {
        self.require_phase(Phase::New)?;
        self.func_filter = Some(filter);
        Ok(())
    }

    /// Loads the symbol table, traceable-function set, and type database;
    /// raises resource limits if configured; and builds the attach plan by
    /// intersecting all three against the filter policy and the ABI check.
    ///
    /// Fails with [`MassAttacherError::NoMatchingFunctions`] if the plan
    /// ends up empty — an empty plan would otherwise silently load and
    /// attach nothing, masking a misconfigured filter.
    pub fn prepare(&mut self) -> MassAttacherResult<()> {
        self.require_phase(Phase::New)?;

        if self.options.raise_resource_limits {
            self.raise_resource_limits()?;
        }

        let symbol_index = SymbolIndex::load(self.symbol_source.as_ref())?;
        let traceable_set = TraceableNameSet::load(self.traceable_source.as_ref())?;
        let type_db = self.type_db_source.load()?;

        let mut plan = AttachPlan::new();
        let mut func_skip = 0usize;
        for func in type_db.iter_functions() {
            let Some(symbol) = symbol_index.get(&func.name) else {
                if self.options.verbose {
                    tracing::info!(function = %func.name, "not found in kallsyms, skipping");
                }
                func_skip += 1;
                continue;
            };

            if !self.filter.accepts(&func.name) {
                if self.options.debug_extra {
                    tracing::debug!(function = %func.name, "rejected by glob filter");
                }
                func_skip += 1;
                continue;
            }

            if !traceable_set.contains(&func.name) {
                if self.options.debug_extra {
                    tracing::debug!(function = %func.name, "not an attachable kprobe, skipping");
                }
                func_skip += 1;
                continue;
            }

            if func.arg_count() > crate::MAX_ARGS || !abi::is_compatible(type_db.as_ref(), &func) {
                if self.options.debug {
                    tracing::debug!(function = %func.name, "prototype incompatible with fentry/fexit, skipping");
                }
                func_skip += 1;
                continue;
            }

            if self.options.max_func_cnt != 0 && plan.func_count() >= self.options.max_func_cnt {
                if self.options.verbose {
                    tracing::info!(limit = self.options.max_func_cnt, "maximum function count reached, stopping");
                }
                break;
            }

            if let Some(func_filter) = &self.func_filter {
                if !func_filter(type_db.as_ref(), func.type_id, &func.name, plan.func_count()) {
                    if self.options.debug {
                        tracing::debug!(function = %func.name, "skipped by custom filter");
                    }
                    func_skip += 1;
                    continue;
                }
            }

            if self.options.debug_extra {
                tracing::debug!(function = %func.name, address = symbol.address, "found function");
            }

            plan.record(
                func.name.clone(),
                symbol.address,
                func.arg_count() as u8,
                func.type_id,
            );
        }

        if plan.func_count() == 0 {
            return Err(MassAttacherError::NoMatchingFunctions);
        }

        if self.options.verbose {
            tracing::info!(
                accepted = plan.func_count(),
                skipped = func_skip,
                "attach plan prepared"
            );
            if self.options.debug {
                for rule in self.filter.deny_rules() {
                    tracing::debug!(glob = rule.pattern(), matches = rule.match_count(), "deny glob summary");
                }
                for rule in self.filter.allow_rules() {
                    tracing::debug!(glob = rule.pattern(), matches = rule.match_count(), "allow glob summary");
                }
            }
        }

        self.symbol_index = Some(symbol_index);
        self.traceable_set = Some(traceable_set);
        self.type_db = Some(type_db);
        self.plan = plan;
        self.phase = Phase::Prepared;
        Ok(())
    }

    #[cfg(target_os = "linux")]
    fn raise_resource_limits(&self) -> MassAttacherResult<()> {
        use nix::sys::resource::{setrlimit, Resource};

        setrlimit(Resource::RLIMIT_MEMLOCK, nix::libc::RLIM_INFINITY, nix::libc::RLIM_INFINITY)
            .map_err(|e| MassAttacherError::ResourceLimit(format!("RLIMIT_MEMLOCK: {e}")))?;

        let fileno_limit = if self.options.max_fileno_rlimit == 0 {
            DEFAULT_FILENO_RLIMIT
        } else {
            self.options.max_fileno_rlimit
        };
        setrlimit(Resource::RLIMIT_NOFILE, fileno_limit, fileno_limit)
            .map_err(|e| MassAttacherError::ResourceLimit(format!("RLIMIT_NOFILE: {e}")))?;

        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn raise_resource_limits(&self) -> MassAttacherResult<()> {
        Err(MassAttacherError::ResourceLimit(
            "resource limit raising is only supported on linux".into(),
        ))
    }

    /// Arms the template for the prepared plan and runs the load phase,
    /// capturing each arity bucket's bytecode.
    pub fn load(&mut self) -> MassAttacherResult<()> {
        self.require_phase(Phase::Prepared)?;

        self.multiplexer.arm(self.template.as_mut(), &self.plan)?;
        self.multiplexer.load(
            self.loader.as_mut(),
            self.template.as_mut(),
            &mut self.plan,
            self.options.debug,
        )?;

        self.phase = Phase::Loaded;
        Ok(())
    }

    /// Clones one entry/exit program pair per planned function and opens a
    /// raw-tracepoint attachment on each. Per-function attach failures are
    /// logged and skipped rather than aborting the whole phase; a clone
    /// failure (capturing the bytecode itself is broken) is fatal.
    pub fn attach(&mut self) -> MassAttacherResult<()> {
        self.require_phase(Phase::Loaded)?;

        self.multiplexer.clone_entries(
            self.loader.as_mut(),
            &mut self.plan,
            self.options.prog_type,
            self.options.expected_attach_type,
        )?;

        let mut attached = 0usize;
        for entry in self.plan.entries_mut() {
            attach_one(self.loader.as_mut(), entry, &mut attached);
        }

        tracing::info!(
            attached,
            planned = self.plan.func_count(),
            "attach phase complete"
        );

        self.phase = Phase::Attached;
        Ok(())
    }

    /// Flips the template's shared `ready` flag, letting already-attached
    /// programs start doing real work.
    pub fn activate(&mut self) -> MassAttacherResult<()> {
        self.require_phase(Phase::Attached)?;
        self.template.set_ready(true)?;
        self.phase = Phase::Active;
        Ok(())
    }

    /// Tears down: clears the `ready` flag and marks the attacher freed.
    /// Safe to call more than once; only the first call has any effect.
    pub fn free(&mut self) -> MassAttacherResult<()> {
        if self.phase == Phase::Freed {
            return Ok(());
        }
        if self.phase == Phase::Active || self.phase == Phase::Attached {
            let _ = self.template.set_ready(false);
        }
        self.phase = Phase::Freed;
        Ok(())
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn func_count(&self) -> usize {
        self.plan.func_count()
    }

    pub fn func(&self, index: usize) -> Option<&AttachEntry> {
        self.plan.entry(index)
    }

    pub fn template(&self) -> &dyn Template {
        self.template.as_ref()
    }

    pub fn type_db(&self) -> Option<&dyn TypeDatabase> {
        self.type_db.as_deref()
    }

    pub fn filter(&self) -> &FilterPolicy {
        &self.filter
    }
}

fn attach_one(loader: &mut dyn ProgramLoader, entry: &mut AttachEntry, attached: &mut usize) {
    let Some(fentry_fd) = entry.fentry_fd else {
        return;
    };
    let Some(fexit_fd) = entry.fexit_fd else {
        return;
    };

    match loader.raw_tracepoint_open(fentry_fd) {
        Ok(live_fd) => entry.fentry_fd = Some(live_fd),
        Err(e) => {
            tracing::warn!(function = %entry.name, error = %e, "fentry attach failed");
            return;
        }
    }

    match loader.raw_tracepoint_open(fexit_fd) {
        Ok(live_fd) => entry.fexit_fd = Some(live_fd),
        Err(e) => {
            tracing::warn!(function = %entry.name, error = %e, "fexit attach failed");
            return;
        }
    }

    *attached += 1;
}

impl Drop for Attacher {
    fn drop(&mut self) {
        let _ = self.free();
    }
}
