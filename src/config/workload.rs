//! Workload definition structures

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Store operation driven by the workload
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Write a fresh key (monotonic key counter)
    Set,
    /// Read a preloaded key
    Get,
    /// Conditional write against a preloaded key; the key must already exist
    PutIfAbsent,
    /// Emptiness check; the store must not be empty
    IsEmpty,
}

impl OperationKind {
    /// Method-style name used in reports, e.g. `putIfAbsent`
    pub fn method_name(&self) -> &'static str {
        match self {
            OperationKind::Set => "set",
            OperationKind::Get => "get",
            OperationKind::PutIfAbsent => "putIfAbsent",
            OperationKind::IsEmpty => "isEmpty",
        }
    }

    /// Needs keys written by the preload phase
    pub fn needs_preload(&self) -> bool {
        matches!(self, OperationKind::Get | OperationKind::PutIfAbsent)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Set => write!(f, "set"),
            OperationKind::Get => write!(f, "get"),
            OperationKind::PutIfAbsent => write!(f, "put_if_absent"),
            OperationKind::IsEmpty => write!(f, "is_empty"),
        }
    }
}

impl std::str::FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "set" => Ok(OperationKind::Set),
            "get" => Ok(OperationKind::Get),
            "put_if_absent" | "putifabsent" => Ok(OperationKind::PutIfAbsent),
            "is_empty" | "isempty" => Ok(OperationKind::IsEmpty),
            other => Err(format!(
                "Unknown operation '{}' (expected set, get, put_if_absent, is_empty)",
                other
            )),
        }
    }
}

/// Default sizing, selected by `runtime.local_test_mode`
///
/// Local test mode keeps everything small enough to finish in about a minute
/// on a laptop; production mode matches a long soak against a real cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    LocalTest,
    Production,
}

impl Profile {
    pub fn from_local_test_mode(local_test_mode: bool) -> Self {
        if local_test_mode {
            Profile::LocalTest
        } else {
            Profile::Production
        }
    }

    /// Trailing statistics window
    pub fn window(&self) -> Duration {
        match self {
            Profile::LocalTest => Duration::from_secs(30),
            Profile::Production => Duration::from_secs(60),
        }
    }

    /// Cap on in-flight operations
    pub fn max_concurrency(&self) -> usize {
        match self {
            Profile::LocalTest => 16,
            Profile::Production => 64,
        }
    }

    /// Entries written by the preload phase
    pub fn num_entries(&self) -> u64 {
        match self {
            Profile::LocalTest => 1 << 10,
            Profile::Production => 1 << 17,
        }
    }

    /// Bytes per stored value
    pub fn value_size(&self) -> usize {
        match self {
            Profile::LocalTest => 1 << 3,
            Profile::Production => 1 << 15,
        }
    }

    /// Length of the measured phase
    pub fn measure_duration(&self) -> Duration {
        match self {
            Profile::LocalTest => Duration::from_secs(30),
            Profile::Production => Duration::from_secs(70),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::LocalTest => write!(f, "local-test"),
            Profile::Production => write!(f, "production"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_kind_parse() {
        assert_eq!("set".parse::<OperationKind>().unwrap(), OperationKind::Set);
        assert_eq!("GET".parse::<OperationKind>().unwrap(), OperationKind::Get);
        assert_eq!(
            "put-if-absent".parse::<OperationKind>().unwrap(),
            OperationKind::PutIfAbsent
        );
        assert_eq!(
            "isEmpty".parse::<OperationKind>().unwrap(),
            OperationKind::IsEmpty
        );
        assert!("delete".parse::<OperationKind>().is_err());
    }

    #[test]
    fn test_operation_kind_display_round_trips() {
        for kind in [
            OperationKind::Set,
            OperationKind::Get,
            OperationKind::PutIfAbsent,
            OperationKind::IsEmpty,
        ] {
            assert_eq!(kind.to_string().parse::<OperationKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_method_names() {
        assert_eq!(OperationKind::PutIfAbsent.method_name(), "putIfAbsent");
        assert_eq!(OperationKind::IsEmpty.method_name(), "isEmpty");
    }

    #[test]
    fn test_needs_preload() {
        assert!(OperationKind::PutIfAbsent.needs_preload());
        assert!(OperationKind::Get.needs_preload());
        assert!(!OperationKind::Set.needs_preload());
        assert!(!OperationKind::IsEmpty.needs_preload());
    }

    #[test]
    fn test_profile_defaults() {
        let local = Profile::from_local_test_mode(true);
        assert_eq!(local.window(), Duration::from_secs(30));
        assert_eq!(local.max_concurrency(), 16);
        assert_eq!(local.num_entries(), 1024);

        let prod = Profile::from_local_test_mode(false);
        assert_eq!(prod.window(), Duration::from_secs(60));
        assert_eq!(prod.max_concurrency(), 64);
        assert_eq!(prod.value_size(), 32 * 1024);
    }
}
