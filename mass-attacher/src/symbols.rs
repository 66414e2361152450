//! Kernel symbol index: a snapshot of name→address pairs, queryable by name.
//!
//! The snapshot itself (raw enumeration of symbols) is an external
//! collaborator, reached only through [`SymbolEnumerator`]. [`SymbolIndex`]
//! is the in-scope piece: it takes whatever the enumerator produced and
//! builds an immutable, O(1)-lookup table from it.

use std::collections::HashMap;

use mass_attacher_shared::MassAttacherResult;

/// One kernel symbol: its canonical name and load address. Names are
/// assumed unique within a given enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRecord {
    pub name: String,
    pub address: u64,
}

/// External collaborator: produces the full list of kernel symbols at
/// `prepare()` time. A real implementation reads this from the running
/// kernel (e.g. `/proc/kallsyms` or a remote debug info source); this crate
/// only depends on the contract.
pub trait SymbolEnumerator {
    fn enumerate(&self) -> MassAttacherResult<Vec<SymbolRecord>>;
}

/// Immutable snapshot of the kernel symbol table, loaded once in `prepare`
/// and queried by exact name for the rest of the attacher's lifetime.
#[derive(Debug, Default)]
pub struct SymbolIndex {
    by_name: HashMap<String, SymbolRecord>,
}

impl SymbolIndex {
    /// Loads the index from an enumerator.
    pub fn load(source: &dyn SymbolEnumerator) -> MassAttacherResult<Self> {
        Ok(Self::build(source.enumerate()?))
    }

    /// Builds an index directly from already-enumerated records. Useful for
    /// tests and for callers who snapshot symbols themselves.
    pub fn build(records: impl IntoIterator<Item = SymbolRecord>) -> Self {
        let by_name = records.into_iter().map(|r| (r.name.clone(), r)).collect();
        Self { by_name }
    }

    /// Looks up a symbol by its exact name. A miss means the function
    /// exists in the type database but has no live kernel symbol — callers
    /// should treat that as "skip this function", not as an error.
    pub fn get(&self, name: &str) -> Option<&SymbolRecord> {
        self.by_name.get(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Default path for the kernel symbol table on a standard Linux host.
pub const DEFAULT_KALLSYMS_PATH: &str = "/proc/kallsyms";

/// Reference [`SymbolEnumerator`] that parses the `/proc/kallsyms` format:
/// whitespace-separated `address type name [module]` lines, hex address
/// without a `0x` prefix. Duplicate names can occur (e.g. static functions
/// redefined per module); this is a plain forward scan that lets a later
/// line for the same name overwrite an earlier one, an independent choice
/// for this reader rather than a port of any particular kallsyms-walking
/// order (the original attacher only calls `ksyms__load()`/
/// `ksyms__get_symbol()` and leaves the parsing itself to a helper that
/// isn't part of this crate's reference material).
pub struct KallsymsReader {
    path: String,
}

impl KallsymsReader {
    pub fn new() -> Self {
        Self {
            path: DEFAULT_KALLSYMS_PATH.to_string(),
        }
    }

    /// Reads from a custom path instead of `/proc/kallsyms`, for tests or
    /// alternate root filesystems.
    pub fn at_path(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for KallsymsReader {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolEnumerator for KallsymsReader {
    fn enumerate(&self) -> MassAttacherResult<Vec<SymbolRecord>> {
        let contents = std::fs::read_to_string(&self.path).map_err(|e| {
            mass_attacher_shared::MassAttacherError::MissingSource(format!(
                "{}: {e}",
                self.path
            ))
        })?;
        let mut records = Vec::new();

        for line in contents.lines() {
            let mut fields = line.split_whitespace();
            let (Some(addr_hex), Some(_kind), Some(name)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            let Ok(address) = u64::from_str_radix(addr_hex, 16) else {
                continue;
            };
            records.push(SymbolRecord {
                name: name.to_string(),
                address,
            });
        }

        Ok(records)
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    //! Fixed-list [`SymbolEnumerator`] fake for tests.

    use super::*;

    pub struct FixedSymbols(pub Vec<SymbolRecord>);

    impl SymbolEnumerator for FixedSymbols {
        fn enumerate(&self) -> MassAttacherResult<Vec<SymbolRecord>> {
            Ok(self.0.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_looks_up_by_name() {
        let index = SymbolIndex::build([
            SymbolRecord {
                name: "foo".into(),
                address: 0x100,
            },
            SymbolRecord {
                name: "bar".into(),
                address: 0x200,
            },
        ]);

        assert_eq!(index.get("foo").unwrap().address, 0x100);
        assert_eq!(index.get("bar").unwrap().address, 0x200);
        assert!(index.get("baz").is_none());
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn kallsyms_reader_parses_standard_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kallsyms");
        std::fs::write(
            &path,
            "ffffffff81000000 T consume_skb\n\
             ffffffff81001000 t __local_helper\n\
             garbage line here\n",
        )
        .unwrap();

        let reader = KallsymsReader::at_path(path.to_string_lossy().to_string());
        let records = reader.enumerate().unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "consume_skb");
        assert_eq!(records[0].address, 0xffffffff81000000);
    }

    #[test]
    fn kallsyms_reader_missing_file_is_a_missing_source_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist");

        let reader = KallsymsReader::at_path(path.to_string_lossy().to_string());
        assert!(matches!(
            reader.enumerate(),
            Err(mass_attacher_shared::MassAttacherError::MissingSource(_))
        ));
    }
}
