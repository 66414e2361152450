//! Contracts for the two lowest-level external collaborators: the compiled
//! tracing program template, and the kernel's program-loader interface.
//!
//! Both are out of scope per spec.md §1 — this module only pins down the
//! shape of the contract the rest of the crate programs against. A real
//! implementation would back [`Template`] with a loaded BPF skeleton and
//! [`ProgramLoader`] with `libbpf`-style load/clone/attach calls.

use crate::plan::RawFd;
use mass_attacher_shared::MassAttacherResult;

/// Opaque handle identifying one of the template's prototype programs.
/// Equality is the only operation the multiplexer needs: it builds a table
/// from `ProgId` to `(arity, is_exit)` at arm time and looks entries up by
/// it when the loader calls back into the prep hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgId(pub u32);

/// The compiled tracing program template: `MAX_ARGS + 1` prototype entry
/// programs and `MAX_ARGS + 1` prototype exit programs, plus the shared
/// state (`ready` flag, `ip_to_id` map) the attached programs read at
/// runtime.
pub trait Template {
    /// The prototype entry program for the given arity.
    fn entry_program(&self, arity: u8) -> ProgId;

    /// The prototype exit program for the given arity.
    fn exit_program(&self, arity: u8) -> ProgId;

    /// The prototype's own compile-time name (e.g. `"fentry3"`). Every clone
    /// made from this prototype's bucket is loaded under this same name —
    /// only the attach target differs between clones.
    fn program_name(&self, prog: ProgId) -> &str;

    /// Points `prog` at `func_name` as its (sole, representative) attach
    /// target, making the prototype verifiable.
    fn set_attach_target(&mut self, prog: ProgId, func_name: &str) -> MassAttacherResult<()>;

    /// Enables or disables automatic loading of `prog`. Used to suppress
    /// prototypes for arities with no surviving functions.
    fn set_autoload(&mut self, prog: ProgId, autoload: bool) -> MassAttacherResult<()>;

    /// Sizes the `ip_to_id` map's capacity ahead of population.
    fn set_ip_to_id_capacity(&mut self, capacity: u32) -> MassAttacherResult<()>;

    /// Inserts one `address -> index` mapping into `ip_to_id`.
    fn insert_ip_to_id(&mut self, address: u64, index: u32) -> MassAttacherResult<()>;

    /// Flips the shared `ready` flag that attached programs consult before
    /// doing their work.
    fn set_ready(&mut self, ready: bool) -> MassAttacherResult<()>;
}

/// Parameters for cloning one concrete, per-function program out of a
/// captured arity-bucket bytecode blob.
pub struct CloneSpec<'a> {
    /// Opaque program-type tag, copied verbatim from the prototype program
    /// this clone is derived from.
    pub prog_type: u32,
    /// Opaque expected-attach-type tag, likewise copied from the prototype.
    pub expected_attach_type: u32,
    pub name: &'a str,
    pub insns: &'a [u8],
    pub license: &'static str,
    /// Type-database id of the specific function this clone attaches to —
    /// the only thing that differs between clones sharing a bucket.
    pub attach_target_type_id: u32,
}

/// The kernel's program-loader interface: load the template (running each
/// prototype program's prep hook along the way), clone a loaded program
/// from captured bytecode, and open a raw-tracepoint attachment on a
/// loaded program's file descriptor.
pub trait ProgramLoader {
    /// Loads `template`. For every autoloaded prototype program, calls
    /// `prep(prog, insns)` with that program's finalized bytecode before
    /// committing it to the kernel, so the caller can capture the bytecode
    /// for later cloning. `prep`'s return value tells the loader whether to
    /// go ahead and load the prototype into the kernel (`true`, debug mode)
    /// or abort its load (`false`, the normal case — no bytecode from a
    /// prototype is ever committed, only cloned copies are).
    fn load(
        &mut self,
        template: &mut dyn Template,
        prep: &mut dyn FnMut(ProgId, &[u8]) -> bool,
    ) -> MassAttacherResult<()>;

    /// Loads a fresh program from `spec`, returning its file descriptor. A
    /// failure here is fatal for the whole load phase (§7).
    fn clone_program(&mut self, spec: &CloneSpec<'_>) -> MassAttacherResult<RawFd>;

    /// Opens a raw-tracepoint attachment on `fd`. Individual failures here
    /// are non-fatal — the caller logs and continues with other functions
    /// (§4.9 `attach` phase).
    fn raw_tracepoint_open(&mut self, fd: RawFd) -> MassAttacherResult<RawFd>;
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    //! In-memory [`Template`]/[`ProgramLoader`] fakes used by unit and
    //! integration tests to exercise the multiplexer and orchestrator
    //! without a real kernel.

    use super::*;
    use crate::MAX_ARGS;
    use std::collections::HashMap;

    #[derive(Debug, Clone, Default)]
    pub struct FakeProgramState {
        pub attach_target: Option<String>,
        pub autoload: bool,
    }

    pub struct FakeTemplate {
        pub entry_progs: [ProgId; MAX_ARGS + 1],
        pub exit_progs: [ProgId; MAX_ARGS + 1],
        pub names: HashMap<ProgId, String>,
        pub state: HashMap<ProgId, FakeProgramState>,
        pub ip_to_id: HashMap<u64, u32>,
        pub ip_to_id_capacity: u32,
        pub ready: bool,
    }

    impl FakeTemplate {
        pub fn new() -> Self {
            let mut state = HashMap::new();
            let mut names = HashMap::new();
            let mut entry_progs = [ProgId(0); MAX_ARGS + 1];
            let mut exit_progs = [ProgId(0); MAX_ARGS + 1];

            let mut next_id = 0u32;
            for arity in 0..=MAX_ARGS {
                let entry = ProgId(next_id);
                next_id += 1;
                let exit = ProgId(next_id);
                next_id += 1;

                entry_progs[arity] = entry;
                exit_progs[arity] = exit;
                state.insert(entry, FakeProgramState { attach_target: None, autoload: true });
                state.insert(exit, FakeProgramState { attach_target: None, autoload: true });
                names.insert(entry, format!("fentry{arity}"));
                names.insert(exit, format!("fexit{arity}"));
            }

            Self {
                entry_progs,
                exit_progs,
                names,
                state,
                ip_to_id: HashMap::new(),
                ip_to_id_capacity: 0,
                ready: false,
            }
        }

        pub fn is_exit(&self, prog: ProgId) -> bool {
            self.exit_progs.contains(&prog)
        }
    }

    impl Default for FakeTemplate {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Template for FakeTemplate {
        fn entry_program(&self, arity: u8) -> ProgId {
            self.entry_progs[arity as usize]
        }

        fn exit_program(&self, arity: u8) -> ProgId {
            self.exit_progs[arity as usize]
        }

        fn program_name(&self, prog: ProgId) -> &str {
            self.names.get(&prog).map(String::as_str).unwrap_or("")
        }

        fn set_attach_target(&mut self, prog: ProgId, func_name: &str) -> MassAttacherResult<()> {
            self.state.entry(prog).or_default().attach_target = Some(func_name.to_string());
            Ok(())
        }

        fn set_autoload(&mut self, prog: ProgId, autoload: bool) -> MassAttacherResult<()> {
            self.state.entry(prog).or_default().autoload = autoload;
            Ok(())
        }

        fn set_ip_to_id_capacity(&mut self, capacity: u32) -> MassAttacherResult<()> {
            self.ip_to_id_capacity = capacity;
            Ok(())
        }

        fn insert_ip_to_id(&mut self, address: u64, index: u32) -> MassAttacherResult<()> {
            self.ip_to_id.insert(address, index);
            Ok(())
        }

        fn set_ready(&mut self, ready: bool) -> MassAttacherResult<()> {
            self.ready = ready;
            Ok(())
        }
    }

    /// Loader fake: drives any [`Template`] purely through its trait methods
    /// (no downcasting), synthesizing deterministic per-arity bytecode for
    /// the prep hook, then hands out monotonically increasing fake file
    /// descriptors for each `clone_program`/`raw_tracepoint_open` call.
    pub struct FakeLoader {
        next_fd: RawFd,
        pub cloned: Vec<(u32, u32, String)>, // (prog_type, attach_target_type_id, name) per call
        pub attached: Vec<RawFd>,
        pub fail_clone_after: Option<usize>,
        /// `(prog, committed)` per prep-hook call, in call order. `committed`
        /// mirrors the value the prep closure returned: `true` means the
        /// loader would actually load that prototype into the kernel.
        pub prepped: Vec<(ProgId, bool)>,
    }

    impl FakeLoader {
        pub fn new() -> Self {
            Self {
                next_fd: 1,
                cloned: Vec::new(),
                attached: Vec::new(),
                fail_clone_after: None,
                prepped: Vec::new(),
            }
        }
    }

    impl Default for FakeLoader {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ProgramLoader for FakeLoader {
        fn load(
            &mut self,
            template: &mut dyn Template,
            prep: &mut dyn FnMut(ProgId, &[u8]) -> bool,
        ) -> MassAttacherResult<()> {
            for arity in 0..=MAX_ARGS as u8 {
                let entry_prog = template.entry_program(arity);
                let exit_prog = template.exit_program(arity);
                let committed = prep(entry_prog, &[0xE0, arity]);
                self.prepped.push((entry_prog, committed));
                let committed = prep(exit_prog, &[0xE1, arity]);
                self.prepped.push((exit_prog, committed));
            }
            Ok(())
        }

        fn clone_program(&mut self, spec: &CloneSpec<'_>) -> MassAttacherResult<RawFd> {
            if let Some(limit) = self.fail_clone_after {
                if self.cloned.len() >= limit {
                    return Err(mass_attacher_shared::MassAttacherError::ProgramClone(
                        "fake clone budget exhausted".into(),
                    ));
                }
            }
            self.cloned
                .push((spec.prog_type, spec.attach_target_type_id, spec.name.to_string()));
            let fd = self.next_fd;
            self.next_fd += 1;
            Ok(fd)
        }

        fn raw_tracepoint_open(&mut self, fd: RawFd) -> MassAttacherResult<RawFd> {
            self.attached.push(fd);
            Ok(fd)
        }
    }
}
