//! Capability-based permission system for the effect runtime.
//!
//! Capabilities control which effect operations an evaluation may perform.
//! They are checked at the effect boundary — the point where the evaluator
//! dispatches a built-in effect operation — so a program can *request* any
//! operation, but only granted effects execute.
//!
//! Beyond the grant set, the context carries per-effect resource
//! constraints: a filesystem sandbox root for `FS` and an allow-list plus
//! request budget for `Net`. The context is immutable once created —
//! capabilities cannot be escalated during execution; only budget counters
//! tick down, through the context's own checked operations.
//!
//! # Usage
//!
//! ```
//! use ailang::capability::{EffectContext, EffectName};
//!
//! let ctx = EffectContext::new(vec![EffectName::IO, EffectName::Clock]);
//! assert!(ctx.allows(EffectName::IO));
//! assert!(!ctx.allows(EffectName::FS));
//! ```

use std::{cell::Cell, collections::BTreeSet, fmt, path::PathBuf, str::FromStr};

/// A named effect. Every built-in effect operation belongs to exactly one.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum EffectName {
    IO,
    FS,
    Clock,
    Net,
}

/// Error returned when an operation is denied by the effect context.
///
/// `code` distinguishes a missing grant (`EVA004`) from a sandbox
/// violation (`EVA005`) and an exhausted budget (`EVA006`).
#[derive(Debug, Clone)]
pub struct CapabilityError {
    pub code: &'static str,
    pub operation: String,
    pub required: String,
}

impl fmt::Display for CapabilityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} denied (requires {})",
            self.code, self.operation, self.required
        )
    }
}

impl std::error::Error for CapabilityError {}

/// The set of granted effects plus per-effect resource constraints.
///
/// An empty context (`EffectContext::none()`) denies every effect
/// operation, making evaluation a pure computation.
#[derive(Debug, Default)]
pub struct EffectContext {
    granted: BTreeSet<EffectName>,
    /// `FS` operations must resolve within this root when set.
    fs_sandbox: Option<PathBuf>,
    /// URL prefixes `Net` operations may touch; `None` allows any URL
    /// (budget permitting).
    net_allow: Option<Vec<String>>,
    /// Remaining `Net` requests when budgeted.
    net_budget: Option<Cell<u64>>,
}

impl EffectContext {
    /// A context granting exactly the given effects, unconstrained.
    #[must_use]
    pub fn new(granted: impl IntoIterator<Item = EffectName>) -> Self {
        Self {
            granted: granted.into_iter().collect(),
            ..Self::default()
        }
    }

    /// The most restrictive context: every effect operation is denied.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Grants all effects with no constraints. For trusted environments
    /// such as the REPL.
    #[must_use]
    pub fn unrestricted() -> Self {
        Self::new([EffectName::IO, EffectName::FS, EffectName::Clock, EffectName::Net])
    }

    /// Parses a comma-separated grant list (`"IO,FS"`).
    pub fn parse_grants(list: &str) -> Result<Self, String> {
        let mut granted = BTreeSet::new();
        for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let effect = EffectName::from_str(part).map_err(|_| format!("unknown capability `{part}`"))?;
            granted.insert(effect);
        }
        Ok(Self {
            granted,
            ..Self::default()
        })
    }

    /// Constrains `FS` operations to paths under `root`.
    #[must_use]
    pub fn with_fs_sandbox(mut self, root: PathBuf) -> Self {
        self.fs_sandbox = Some(root);
        self
    }

    /// Constrains `Net` operations to URLs with one of the given prefixes.
    #[must_use]
    pub fn with_net_allow_list(mut self, prefixes: Vec<String>) -> Self {
        self.net_allow = Some(prefixes);
        self
    }

    /// Bounds the number of `Net` requests.
    #[must_use]
    pub fn with_net_budget(mut self, requests: u64) -> Self {
        self.net_budget = Some(Cell::new(requests));
        self
    }

    #[must_use]
    pub fn allows(&self, effect: EffectName) -> bool {
        self.granted.contains(&effect)
    }

    #[must_use]
    pub fn granted(&self) -> impl Iterator<Item = EffectName> + '_ {
        self.granted.iter().copied()
    }

    /// Checks that `effect` is granted before an operation runs.
    pub fn check_grant(&self, effect: EffectName, operation: &str) -> Result<(), CapabilityError> {
        if self.granted.contains(&effect) {
            Ok(())
        } else {
            Err(CapabilityError {
                code: "EVA004",
                operation: format!("effect operation `{operation}`"),
                required: format!("capability {effect}"),
            })
        }
    }

    /// Checks an `FS` path against the sandbox root. The path is
    /// normalized lexically (`.`/`..` segments resolved) before the
    /// prefix test so escapes via `..` are caught without touching the
    /// filesystem.
    pub fn check_fs_path(&self, path: &str) -> Result<PathBuf, CapabilityError> {
        let Some(root) = &self.fs_sandbox else {
            return Ok(PathBuf::from(path));
        };
        let joined = if std::path::Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            root.join(path)
        };
        let normalized = normalize_lexically(&joined);
        let root_normalized = normalize_lexically(root);
        if normalized.starts_with(&root_normalized) {
            Ok(normalized)
        } else {
            Err(CapabilityError {
                code: "EVA005",
                operation: format!("filesystem access to `{path}`"),
                required: format!("a path under {}", root.display()),
            })
        }
    }

    /// Checks a `Net` URL against the allow-list and decrements the
    /// request budget.
    pub fn check_net_url(&self, url: &str) -> Result<(), CapabilityError> {
        if let Some(allow) = &self.net_allow {
            if !allow.iter().any(|prefix| url.starts_with(prefix)) {
                return Err(CapabilityError {
                    code: "EVA005",
                    operation: format!("network request to `{url}`"),
                    required: "an allow-listed URL".to_owned(),
                });
            }
        }
        if let Some(budget) = &self.net_budget {
            let remaining = budget.get();
            if remaining == 0 {
                return Err(CapabilityError {
                    code: "EVA006",
                    operation: format!("network request to `{url}`"),
                    required: "remaining Net budget".to_owned(),
                });
            }
            budget.set(remaining - 1);
        }
        Ok(())
    }
}

/// Resolves `.` and `..` segments without consulting the filesystem.
fn normalize_lexically(path: &std::path::Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

impl fmt::Display for EffectContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.granted.is_empty() {
            return f.write_str("EffectContext(none)");
        }
        f.write_str("EffectContext(")?;
        for (i, effect) in self.granted.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{effect}")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_context_denies_everything() {
        let ctx = EffectContext::none();
        for effect in [EffectName::IO, EffectName::FS, EffectName::Clock, EffectName::Net] {
            let err = ctx.check_grant(effect, "op").unwrap_err();
            assert_eq!(err.code, "EVA004");
        }
    }

    #[test]
    fn grants_parse_from_comma_list() {
        let ctx = EffectContext::parse_grants("IO, FS").unwrap();
        assert!(ctx.allows(EffectName::IO));
        assert!(ctx.allows(EffectName::FS));
        assert!(!ctx.allows(EffectName::Net));
        assert!(EffectContext::parse_grants("IO,Bogus").is_err());
    }

    #[test]
    fn sandbox_blocks_escape_via_dotdot() {
        let ctx = EffectContext::new([EffectName::FS]).with_fs_sandbox(PathBuf::from("/sandbox"));
        assert!(ctx.check_fs_path("ok.txt").is_ok());
        let err = ctx.check_fs_path("../etc/passwd").unwrap_err();
        assert_eq!(err.code, "EVA005");
        let err = ctx.check_fs_path("/etc/passwd").unwrap_err();
        assert_eq!(err.code, "EVA005");
    }

    #[test]
    fn net_budget_counts_down_to_eva006() {
        let ctx = EffectContext::new([EffectName::Net]).with_net_budget(2);
        ctx.check_net_url("https://example.com/a").unwrap();
        ctx.check_net_url("https://example.com/b").unwrap();
        let err = ctx.check_net_url("https://example.com/c").unwrap_err();
        assert_eq!(err.code, "EVA006");
    }

    #[test]
    fn net_allow_list_is_prefix_based() {
        let ctx = EffectContext::new([EffectName::Net])
            .with_net_allow_list(vec!["https://api.example.com/".to_owned()]);
        assert!(ctx.check_net_url("https://api.example.com/v1").is_ok());
        let err = ctx.check_net_url("https://evil.example.com/").unwrap_err();
        assert_eq!(err.code, "EVA005");
    }
}
