//! The traceable-name set: kernel function names the tracing subsystem will
//! actually let us attach a probe to.
//!
//! BTF can describe a function that kallsyms resolves to an address, and
//! the kernel can still refuse to attach there (inlined, optimized out,
//! blacklisted). The traceable-name set is the authoritative "would the
//! kernel actually accept this" filter, checked by exact membership.

use mass_attacher_shared::MassAttacherResult;

/// External collaborator: enumerates the platform's list of attachable
/// kernel functions, e.g. one name per line of
/// `/sys/kernel/tracing/available_filter_functions`.
pub trait TraceableFunctionSource {
    fn enumerate(&self) -> MassAttacherResult<Vec<String>>;
}

/// Sorted set of traceable kernel function names, built once in `prepare`
/// and queried by exact match for the rest of the attacher's lifetime.
#[derive(Debug, Default)]
pub struct TraceableNameSet {
    names: Vec<String>,
}

impl TraceableNameSet {
    /// Loads the set from a source and sorts it for binary search.
    pub fn load(source: &dyn TraceableFunctionSource) -> MassAttacherResult<Self> {
        Ok(Self::from_unsorted(source.enumerate()?))
    }

    /// Builds a set from an unsorted name list, sorting in place.
    pub fn from_unsorted(mut names: Vec<String>) -> Self {
        names.sort_unstable();
        Self { names }
    }

    /// O(log n) membership check. A miss means the kernel will refuse to
    /// attach a probe at that function; callers should skip it rather than
    /// error.
    pub fn contains(&self, name: &str) -> bool {
        self.names.binary_search_by(|n| n.as_str().cmp(name)).is_ok()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Default path for the traceable-function list on a standard Linux host
/// with tracefs mounted at `/sys/kernel/tracing`.
pub const DEFAULT_AVAILABLE_FILTER_FUNCTIONS_PATH: &str =
    "/sys/kernel/tracing/available_filter_functions";

/// Reference [`TraceableFunctionSource`] that parses
/// `available_filter_functions`: one function per line, the name is the
/// first whitespace-separated token, with the remainder of the line (module
/// name, offsets) ignored.
pub struct AvailableFilterFunctionsReader {
    path: String,
}

impl AvailableFilterFunctionsReader {
    pub fn new() -> Self {
        Self {
            path: DEFAULT_AVAILABLE_FILTER_FUNCTIONS_PATH.to_string(),
        }
    }

    pub fn at_path(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for AvailableFilterFunctionsReader {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceableFunctionSource for AvailableFilterFunctionsReader {
    fn enumerate(&self) -> MassAttacherResult<Vec<String>> {
        let contents = std::fs::read_to_string(&self.path).map_err(|e| {
            mass_attacher_shared::MassAttacherError::MissingSource(format!(
                "{}: {e}",
                self.path
            ))
        })?;
        Ok(contents
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .map(str::to_string)
            .collect())
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    //! Fixed-list [`TraceableFunctionSource`] fake for tests.

    use super::*;

    pub struct FixedTraceable(pub Vec<String>);

    impl TraceableFunctionSource for FixedTraceable {
        fn enumerate(&self) -> MassAttacherResult<Vec<String>> {
            Ok(self.0.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_is_exact() {
        let set = TraceableNameSet::from_unsorted(vec![
            "sys_open".into(),
            "sys_close".into(),
            "foobar".into(),
        ]);

        assert!(set.contains("sys_open"));
        assert!(set.contains("foobar"));
        assert!(!set.contains("sys_ope"));
        assert!(!set.contains("sys_open2"));
    }

    #[test]
    fn reader_takes_first_token_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("available_filter_functions");
        std::fs::write(
            &path,
            "consume_skb\n\
             tcp_v4_connect [ipv4]\n\
             \n",
        )
        .unwrap();

        let reader = AvailableFilterFunctionsReader::at_path(path.to_string_lossy().to_string());
        let names = reader.enumerate().unwrap();

        assert_eq!(names, vec!["consume_skb", "tcp_v4_connect"]);
    }

    #[test]
    fn reader_missing_file_is_a_missing_source_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist");

        let reader = AvailableFilterFunctionsReader::at_path(path.to_string_lossy().to_string());
        assert!(matches!(
            reader.enumerate(),
            Err(mass_attacher_shared::MassAttacherError::MissingSource(_))
        ));
    }
}
