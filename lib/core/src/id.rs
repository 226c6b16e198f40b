//! Identifier types.
//!
//! Two families live here:
//! - ULID-backed ids for runtime entities (executions), sortable by creation time
//! - [`Identifier`], the structured `resource/project/domain/name/version`
//!   reference that workflow definitions use to point at tasks, workflows
//!   and launch plans

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when parsing an ID from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse.
    pub id_type: &'static str,
    /// The reason for the parse failure.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// Macro to generate a strongly-typed ID wrapper around ULID.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Creates a new ID with a randomly generated ULID.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Creates an ID from a ULID.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            /// Returns the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }

            /// Returns the prefix used for display formatting.
            #[must_use]
            pub const fn prefix() -> &'static str {
                $prefix
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let prefix_with_underscore = concat!($prefix, "_");
                let ulid_str = s.strip_prefix(prefix_with_underscore).unwrap_or(s);

                Ulid::from_str(ulid_str)
                    .map(Self)
                    .map_err(|e| ParseIdError {
                        id_type: stringify!($name),
                        reason: e.to_string(),
                    })
            }
        }

        impl From<Ulid> for $name {
            fn from(ulid: Ulid) -> Self {
                Self(ulid)
            }
        }

        impl From<$name> for Ulid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(
    /// Unique identifier for a single execution of a workflow template.
    ExecutionId,
    "exec"
);

define_id!(
    /// Unique identifier for one recorded state transition within an execution.
    EventId,
    "evt"
);

/// The kind of resource an [`Identifier`] points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    #[default]
    Unspecified,
    Task,
    Workflow,
    LaunchPlan,
    Dataset,
}

impl ResourceType {
    /// Returns the canonical lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::Task => "task",
            Self::Workflow => "workflow",
            Self::LaunchPlan => "launch_plan",
            Self::Dataset => "dataset",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unspecified" => Ok(Self::Unspecified),
            "task" => Ok(Self::Task),
            "workflow" => Ok(Self::Workflow),
            "launch_plan" => Ok(Self::LaunchPlan),
            "dataset" => Ok(Self::Dataset),
            other => Err(ParseIdError {
                id_type: "ResourceType",
                reason: format!("unknown resource type '{other}'"),
            }),
        }
    }
}

/// A versioned reference to a registered entity.
///
/// Displays as `resource_type/project/domain/name/version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier {
    /// What kind of entity this points at.
    #[serde(default)]
    pub resource_type: ResourceType,
    /// Owning project.
    pub project: String,
    /// Deployment domain (e.g. "development", "production").
    pub domain: String,
    /// Entity name, unique within project and domain.
    pub name: String,
    /// Entity version.
    pub version: String,
}

impl Identifier {
    /// Creates a new identifier.
    #[must_use]
    pub fn new(
        resource_type: ResourceType,
        project: impl Into<String>,
        domain: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            resource_type,
            project: project.into(),
            domain: domain.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    /// Shorthand for a task identifier.
    #[must_use]
    pub fn task(
        project: impl Into<String>,
        domain: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self::new(ResourceType::Task, project, domain, name, version)
    }

    /// Shorthand for a workflow identifier.
    #[must_use]
    pub fn workflow(
        project: impl Into<String>,
        domain: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self::new(ResourceType::Workflow, project, domain, name, version)
    }

    /// Shorthand for a launch plan identifier.
    #[must_use]
    pub fn launch_plan(
        project: impl Into<String>,
        domain: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self::new(ResourceType::LaunchPlan, project, domain, name, version)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.resource_type, self.project, self.domain, self.name, self.version
        )
    }
}

impl FromStr for Identifier {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        let [resource_type, project, domain, name, version] = parts.as_slice() else {
            return Err(ParseIdError {
                id_type: "Identifier",
                reason: format!("expected 5 '/'-separated parts, found {}", parts.len()),
            });
        };
        if name.is_empty() {
            return Err(ParseIdError {
                id_type: "Identifier",
                reason: "name must not be empty".to_string(),
            });
        }
        Ok(Self::new(
            resource_type.parse()?,
            *project,
            *domain,
            *name,
            *version,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_id_display_format() {
        let id = ExecutionId::new();
        assert!(id.to_string().starts_with("exec_"));
    }

    #[test]
    fn parse_with_prefix() {
        let id = ExecutionId::new();
        let parsed: ExecutionId = id.to_string().parse().expect("should parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_without_prefix() {
        let ulid = Ulid::new();
        let id: EventId = ulid.to_string().parse().expect("should parse");
        assert_eq!(id.as_ulid(), ulid);
    }

    #[test]
    fn parse_invalid_ulid() {
        let err = "not_a_ulid".parse::<ExecutionId>().unwrap_err();
        assert_eq!(err.id_type, "ExecutionId");
    }

    #[test]
    fn id_serde_roundtrip() {
        let id = ExecutionId::new();
        let json = serde_json::to_string(&id).expect("serialize");
        let parsed: ExecutionId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(id, parsed);
    }

    #[test]
    fn identifier_display_and_parse() {
        let id = Identifier::task("demo", "development", "core.square", "v1");
        assert_eq!(id.to_string(), "task/demo/development/core.square/v1");

        let parsed: Identifier = id.to_string().parse().expect("should parse");
        assert_eq!(parsed, id);
    }

    #[test]
    fn identifier_parse_rejects_wrong_arity() {
        let err = "task/project/name".parse::<Identifier>().unwrap_err();
        assert_eq!(err.id_type, "Identifier");
        assert!(err.reason.contains("5"));
    }

    #[test]
    fn identifier_parse_rejects_unknown_resource_type() {
        let err = "plugin/p/d/n/v".parse::<Identifier>().unwrap_err();
        assert_eq!(err.id_type, "ResourceType");
    }
}
