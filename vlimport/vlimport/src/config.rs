use std::env;
use std::time::Duration;

use camino::Utf8PathBuf;

use crate::workspace::ModelConvention;

/// Default upper bound for a single tool invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// A command whose stdout, split into shell words, is appended to the native compiler
/// invocation. For example `pkg-config --cflags --libs <package>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagsQuery {
    pub program: String,
    pub args: Vec<String>,
}

impl FlagsQuery {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> FlagsQuery
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FlagsQuery { program: program.into(), args: args.into_iter().map(Into::into).collect() }
    }
}

/// The external programs used to build a module and how to call them.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub verilator: Utf8PathBuf,
    pub verilator_args: Vec<String>,
    /// Verilator installation, queried from `verilator --getenv VERILATOR_ROOT` if unset.
    pub verilator_root: Option<Utf8PathBuf>,
    /// C++ compiler; the host compiler is discovered if unset.
    pub cxx: Option<Utf8PathBuf>,
    pub cxx_args: Vec<String>,
    pub binding_includes: Vec<Utf8PathBuf>,
    pub embed_flags: Option<FlagsQuery>,
    pub convention: ModelConvention,
    /// Applies to every subprocess; `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for Toolchain {
    fn default() -> Toolchain {
        Toolchain {
            verilator: "verilator".into(),
            verilator_args: Vec::new(),
            verilator_root: None,
            cxx: None,
            cxx_args: Vec::new(),
            binding_includes: Vec::new(),
            embed_flags: None,
            convention: ModelConvention::default(),
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

impl Toolchain {
    /// Defaults overridden by `VERILATOR`, `VERILATOR_ROOT`, `VLIMPORT_VERILATOR_FLAGS`,
    /// `VLIMPORT_CXX` and `VLIMPORT_CXXFLAGS`.
    pub fn from_env() -> Toolchain {
        Toolchain::from_vars(|key| env::var(key).ok())
    }

    /// Like [`Toolchain::from_env`] with the variables looked up by `var`.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Toolchain {
        let non_empty = |key: &str| var(key).filter(|val| !val.trim().is_empty());
        let flags = |key: &str| {
            let Some(flags) = non_empty(key) else { return Vec::new() };
            toolchain::split_flags(&flags).unwrap_or_else(|| {
                log::warn!("ignoring {key}: unbalanced quotes in {flags:?}");
                Vec::new()
            })
        };

        let mut toolchain = Toolchain::default();
        if let Some(verilator) = non_empty("VERILATOR") {
            toolchain.verilator = verilator.into();
        }
        toolchain.verilator_root = non_empty("VERILATOR_ROOT").map(Utf8PathBuf::from);
        toolchain.cxx = non_empty("VLIMPORT_CXX").map(Utf8PathBuf::from);
        toolchain.verilator_args = flags("VLIMPORT_VERILATOR_FLAGS");
        toolchain.cxx_args = flags("VLIMPORT_CXXFLAGS");
        toolchain
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_vars(vars: &[(&str, &str)]) -> Toolchain {
        let vars: HashMap<_, _> = vars.iter().copied().collect();
        Toolchain::from_vars(|key| vars.get(key).map(|val| val.to_string()))
    }

    #[test]
    fn defaults_without_variables() {
        let toolchain = from_vars(&[]);
        assert_eq!(toolchain.verilator, "verilator");
        assert_eq!(toolchain.verilator_root, None);
        assert_eq!(toolchain.cxx, None);
        assert!(toolchain.verilator_args.is_empty());
        assert_eq!(toolchain.timeout, Some(DEFAULT_TIMEOUT));
    }

    #[test]
    fn flags_are_split_into_words() {
        let toolchain = from_vars(&[
            ("VERILATOR", "/opt/verilator/bin/verilator"),
            ("VERILATOR_ROOT", "  "),
            ("VLIMPORT_CXX", "clang++"),
            ("VLIMPORT_VERILATOR_FLAGS", "-Wno-fatal --x-assign 'fast  unique'"),
            ("VLIMPORT_CXXFLAGS", "-g -DNAME=\"a b\""),
        ]);
        assert_eq!(toolchain.verilator, "/opt/verilator/bin/verilator");
        assert_eq!(toolchain.verilator_root, None);
        assert_eq!(toolchain.cxx.as_deref().map(|cxx| cxx.as_str()), Some("clang++"));
        assert_eq!(toolchain.verilator_args, ["-Wno-fatal", "--x-assign", "fast  unique"]);
        assert_eq!(toolchain.cxx_args, ["-g", "-DNAME=a b"]);
    }

    #[test]
    fn unbalanced_flags_are_ignored() {
        let toolchain = from_vars(&[
            ("VLIMPORT_VERILATOR_FLAGS", "-DX=\"bad"),
            ("VLIMPORT_CXXFLAGS", "-O0"),
        ]);
        assert!(toolchain.verilator_args.is_empty());
        assert_eq!(toolchain.cxx_args, ["-O0"]);
    }
}
