//! Program multiplexer: turns a handful of prototype programs into one
//! concrete entry/exit program per traced function, by arity.
//!
//! Rather than compiling a bespoke program per function, the template ships
//! `MAX_ARGS + 1` prototype entry programs and `MAX_ARGS + 1` prototype exit
//! programs — one pair per possible argument count. Every function sharing
//! an arity is attached via a byte-identical clone of that arity's
//! prototype, differing only in its `attach_target_type_id`. A function
//! tells its clone which plan row it is by looking itself up in the
//! template's `ip_to_id` map, keyed by instruction pointer.

use std::collections::HashMap;

use mass_attacher_shared::MassAttacherResult;

use crate::plan::AttachPlan;
use crate::template::{CloneSpec, ProgId, ProgramLoader, Template};
use crate::MAX_ARGS;

/// License every cloned program is loaded with; matches the template's own
/// prototype programs so the verifier sees a consistent GPL-compatible tree.
pub const CLONE_LICENSE: &str = "Dual BSD/GPL";

#[derive(Debug, Clone, Copy)]
struct ProgSlot {
    arity: u8,
    is_exit: bool,
}

/// Drives a [`Template`] and a [`ProgramLoader`] through the load phase for
/// one [`AttachPlan`].
pub struct Multiplexer {
    slots: HashMap<ProgId, ProgSlot>,
    /// Each prototype's own compile-time name, captured at `arm` time and
    /// reused for every clone made from its bucket — only the attach target
    /// differs between clones sharing a bucket, never the name.
    entry_names: Vec<String>,
    exit_names: Vec<String>,
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Multiplexer {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            entry_names: vec![String::new(); MAX_ARGS + 1],
            exit_names: vec![String::new(); MAX_ARGS + 1],
        }
    }

    /// Arms `template` for `plan`: picks one representative function per
    /// populated arity bucket as the prototype's attach target, suppresses
    /// autoloading of prototypes whose bucket is empty, and populates the
    /// `ip_to_id` map with every entry's address.
    ///
    /// Must run before [`Multiplexer::load`].
    pub fn arm(&mut self, template: &mut dyn Template, plan: &AttachPlan) -> MassAttacherResult<()> {
        self.slots.clear();

        template.set_ip_to_id_capacity(plan.func_count() as u32)?;
        for entry in plan.entries() {
            template.insert_ip_to_id(entry.address, entry.index)?;
        }

        for arity in 0..=MAX_ARGS as u8 {
            let bucket = plan.bucket(arity);
            let entry_prog = template.entry_program(arity);
            let exit_prog = template.exit_program(arity);
            self.entry_names[arity as usize] = template.program_name(entry_prog).to_string();
            self.exit_names[arity as usize] = template.program_name(exit_prog).to_string();
            self.slots.insert(entry_prog, ProgSlot { arity, is_exit: false });
            self.slots.insert(exit_prog, ProgSlot { arity, is_exit: true });

            if let Some(first_index) = bucket.first_index {
                let representative = &plan.entries()[first_index as usize];
                template.set_attach_target(entry_prog, &representative.name)?;
                template.set_attach_target(exit_prog, &representative.name)?;
                template.set_autoload(entry_prog, true)?;
                template.set_autoload(exit_prog, true)?;
            } else {
                template.set_autoload(entry_prog, false)?;
                template.set_autoload(exit_prog, false)?;
            }
        }

        Ok(())
    }

    /// Runs the load phase: asks `loader` to finalize `template`, capturing
    /// each prototype's bytecode into the matching arity bucket of `plan` as
    /// the prep hook fires. `debug` is echoed back to the loader as the prep
    /// hook's return value: normally (`false`) the loader aborts each
    /// prototype's own load (only clones ever get committed), but in debug
    /// mode the prototype itself is allowed to load so its verifier output
    /// can be inspected.
    pub fn load(
        &self,
        loader: &mut dyn ProgramLoader,
        template: &mut dyn Template,
        plan: &mut AttachPlan,
        debug: bool,
    ) -> MassAttacherResult<()> {
        let slots = &self.slots;
        let mut prep = |prog: ProgId, insns: &[u8]| -> bool {
            if let Some(slot) = slots.get(&prog) {
                let bucket = plan.bucket_mut(slot.arity);
                if bucket.count > 0 {
                    if slot.is_exit {
                        bucket.exit_insns = Some(insns.to_vec());
                    } else {
                        bucket.entry_insns = Some(insns.to_vec());
                    }
                }
            }
            debug
        };

        loader.load(template, &mut prep)
    }

    /// Clones one concrete entry and exit program per plan entry out of its
    /// bucket's captured bytecode, recording the resulting file descriptors
    /// on the entry. `prog_type`/`expected_attach_type` are opaque tags
    /// copied verbatim onto every clone, matching the prototype they came
    /// from — as is each clone's `name`, which is the *prototype's* own
    /// compile-time name (e.g. `"fentry3"`), constant across the whole
    /// bucket. Only `attach_target_type_id` varies per function.
    pub fn clone_entries(
        &self,
        loader: &mut dyn ProgramLoader,
        plan: &mut AttachPlan,
        prog_type: u32,
        expected_attach_type: u32,
    ) -> MassAttacherResult<()> {
        for arity in 0..=MAX_ARGS as u8 {
            let (entry_insns, exit_insns) = {
                let bucket = plan.bucket(arity);
                (bucket.entry_insns.clone(), bucket.exit_insns.clone())
            };
            let (Some(entry_insns), Some(exit_insns)) = (entry_insns, exit_insns) else {
                continue;
            };
            let entry_name = &self.entry_names[arity as usize];
            let exit_name = &self.exit_names[arity as usize];

            let indices: Vec<u32> = plan
                .entries()
                .iter()
                .filter(|e| e.arg_count == arity)
                .map(|e| e.index)
                .collect();

            for index in indices {
                let attach_target_type_id = plan.entry(index as usize).unwrap().type_id.0;

                let entry_fd = loader.clone_program(&CloneSpec {
                    prog_type,
                    expected_attach_type,
                    name: entry_name,
                    insns: &entry_insns,
                    license: CLONE_LICENSE,
                    attach_target_type_id,
                })?;
                let exit_fd = loader.clone_program(&CloneSpec {
                    prog_type,
                    expected_attach_type,
                    name: exit_name,
                    insns: &exit_insns,
                    license: CLONE_LICENSE,
                    attach_target_type_id,
                })?;

                let entry_mut = &mut plan.entries_mut()[index as usize];
                entry_mut.fentry_fd = Some(entry_fd);
                entry_mut.fexit_fd = Some(exit_fd);
            }
        }

        Ok(())
    }
}
