//! Kernel type database view: function prototypes (return type, parameter
//! types), with modifier/typedef stripping for ABI classification.
//!
//! The database itself is an external collaborator — a real implementation
//! wraps the kernel's BTF (or an equivalent type-info source). This module
//! only depends on it through [`TypeDatabase`].

use mass_attacher_shared::MassAttacherResult;

/// Upper bound on modifier/typedef chain length followed while stripping a
/// type down to its underlying kind. The type database can in principle
/// cycle (a malformed or adversarial BTF blob); exceeding this bound is
/// treated as "not acceptable" rather than looping forever.
pub const MAX_STRIP_DEPTH: usize = 64;

/// Opaque identifier into a [`TypeDatabase`]. Stable for the lifetime of
/// one loaded database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

/// The shape of a type, after any modifier/typedef chain has been resolved
/// one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Void,
    Int,
    Enum,
    /// Pointer to the given type, or `None` for `void *`.
    Pointer(Option<TypeId>),
    /// struct/union.
    Composite,
    /// `const`/`volatile`/`restrict` wrapper around another type.
    Modifier(TypeId),
    /// `typedef` wrapper around another type.
    Typedef(TypeId),
    /// Anything else (func proto, array, etc.) — never ABI-acceptable.
    Other,
}

/// One function's prototype as recorded in the type database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionType {
    pub type_id: TypeId,
    pub name: String,
    /// `None` models a `void`-returning function (no return type record).
    pub return_type_id: Option<TypeId>,
    /// Ordered parameter types. A `None` entry models a vararg parameter
    /// (no concrete type).
    pub params: Vec<Option<TypeId>>,
}

impl FunctionType {
    pub fn arg_count(&self) -> usize {
        self.params.len()
    }
}

/// External collaborator: a loaded kernel type database, iterable in
/// ascending type-id order (this order determines the dense `index`
/// assigned to each accepted function in [`crate::plan::AttachPlan`]).
pub trait TypeDatabase {
    /// Iterates every function-type entry, in ascending type-id order.
    fn iter_functions<'a>(&'a self) -> Box<dyn Iterator<Item = FunctionType> + 'a>;

    /// The kind of the type named by `id`, one modifier/typedef level
    /// resolved (i.e. `Modifier`/`Typedef` still need following).
    fn kind(&self, id: TypeId) -> Option<TypeKind>;

    /// Strips `id` through any `Modifier`/`Typedef` chain down to the first
    /// non-wrapper kind, bounded by [`MAX_STRIP_DEPTH`]. Returns `None` if
    /// the id is unknown or the chain exceeds the bound.
    fn strip(&self, id: TypeId) -> Option<TypeKind> {
        let mut current = id;
        for _ in 0..MAX_STRIP_DEPTH {
            match self.kind(current)? {
                TypeKind::Modifier(inner) | TypeKind::Typedef(inner) => current = inner,
                other => return Some(other),
            }
        }
        None
    }
}

/// External collaborator: produces a loaded [`TypeDatabase`] at `prepare()`
/// time, analogous to [`crate::symbols::SymbolEnumerator`] but for type
/// info rather than addresses.
pub trait TypeDatabaseSource {
    fn load(&self) -> MassAttacherResult<Box<dyn TypeDatabase>>;
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    //! In-memory [`TypeDatabase`] fake for tests, built from a small
    //! hand-rolled type table rather than real BTF.

    use super::*;
    use std::collections::HashMap;

    #[derive(Debug, Default)]
    pub struct FakeTypeDatabase {
        functions: Vec<FunctionType>,
        kinds: HashMap<TypeId, TypeKind>,
    }

    impl FakeTypeDatabase {
        pub fn new() -> Self {
            Self::default()
        }

        /// Registers a non-function type's kind.
        pub fn with_kind(mut self, id: TypeId, kind: TypeKind) -> Self {
            self.kinds.insert(id, kind);
            self
        }

        /// Registers a function-type entry.
        pub fn with_function(mut self, func: FunctionType) -> Self {
            self.functions.push(func);
            self
        }
    }

    impl TypeDatabase for FakeTypeDatabase {
        fn iter_functions<'a>(&'a self) -> Box<dyn Iterator<Item = FunctionType> + 'a> {
            Box::new(self.functions.iter().cloned())
        }

        fn kind(&self, id: TypeId) -> Option<TypeKind> {
            self.kinds.get(&id).copied()
        }
    }

    pub struct FakeTypeDatabaseSource(pub FakeTypeDatabase);

    impl TypeDatabaseSource for FakeTypeDatabaseSource {
        fn load(&self) -> MassAttacherResult<Box<dyn TypeDatabase>> {
            Ok(Box::new(FakeTypeDatabase {
                functions: self.0.functions.clone(),
                kinds: self.0.kinds.clone(),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeTypeDatabase;
    use super::*;

    #[test]
    fn strip_follows_modifier_and_typedef_chain() {
        let db = FakeTypeDatabase::new()
            .with_kind(TypeId(1), TypeKind::Modifier(TypeId(2)))
            .with_kind(TypeId(2), TypeKind::Typedef(TypeId(3)))
            .with_kind(TypeId(3), TypeKind::Int);

        assert_eq!(db.strip(TypeId(1)), Some(TypeKind::Int));
    }

    #[test]
    fn strip_bounds_cyclic_chains() {
        let db = FakeTypeDatabase::new()
            .with_kind(TypeId(1), TypeKind::Modifier(TypeId(2)))
            .with_kind(TypeId(2), TypeKind::Modifier(TypeId(1)));

        assert_eq!(db.strip(TypeId(1)), None);
    }

    #[test]
    fn strip_unknown_id_is_none() {
        let db = FakeTypeDatabase::new();
        assert_eq!(db.strip(TypeId(99)), None);
    }
}
