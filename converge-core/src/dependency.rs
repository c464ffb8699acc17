//! Dependency gate: owner and additional dependencies must all be `Succeeded`.
//!
//! The gate is evaluated fresh on every pass. Lookups are point-in-time reads
//! and may be stale; a dependent that was let through will fall back to
//! `Pending` on a later pass once the dependency stops being ready.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::LookupError;
use crate::status::State;

/// Identifies a record of some kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: String,
    pub id: String,
}

impl ResourceRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Dependency declaration carried in a record's spec.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Dependencies {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<ResourceRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional: Vec<ResourceRef>,
}

impl Dependencies {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn owned_by(owner: ResourceRef) -> Self {
        Self {
            owner: Some(owner),
            additional: Vec::new(),
        }
    }

    pub fn with(mut self, dependency: ResourceRef) -> Self {
        self.additional.push(dependency);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.owner.is_none() && self.additional.is_empty()
    }

    /// Owner first, then additional dependencies in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceRef> {
        self.owner.iter().chain(self.additional.iter())
    }
}

/// Cross-kind status lookup, injected per reconciler instance.
#[async_trait]
pub trait StatusLookup: Send + Sync {
    /// Current state of the referenced record, `None` if it does not exist.
    async fn resolve_status(&self, target: &ResourceRef) -> Result<Option<State>, LookupError>;
}

/// A dependency that kept the gate closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blocker {
    pub target: ResourceRef,
    /// `None` when the record is absent or could not be looked up.
    pub state: Option<State>,
}

impl fmt::Display for Blocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            Some(state) => write!(f, "{} ({})", self.target, state),
            None => write!(f, "{} (absent)", self.target),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady(Vec<Blocker>),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }

    /// Human readable reason, empty when ready.
    pub fn message(&self) -> String {
        match self {
            Readiness::Ready => String::new(),
            Readiness::NotReady(blockers) => {
                let list: Vec<String> = blockers.iter().map(ToString::to_string).collect();
                format!("waiting for dependencies: {}", list.join(", "))
            }
        }
    }
}

/// Check every declared dependency. All of them must be `Succeeded`.
pub async fn check(lookup: &dyn StatusLookup, deps: &Dependencies) -> Readiness {
    let mut blockers = Vec::new();

    for target in deps.iter() {
        let state = match lookup.resolve_status(target).await {
            Ok(state) => state,
            Err(e) => {
                warn!(dependency = %target, error = %e, "Dependency lookup failed");
                None
            }
        };

        if state != Some(State::Succeeded) {
            blockers.push(Blocker {
                target: target.clone(),
                state,
            });
        }
    }

    if blockers.is_empty() {
        Readiness::Ready
    } else {
        Readiness::NotReady(blockers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Fixed(HashMap<ResourceRef, State>);

    #[async_trait]
    impl StatusLookup for Fixed {
        async fn resolve_status(
            &self,
            target: &ResourceRef,
        ) -> Result<Option<State>, LookupError> {
            if target.kind == "broken" {
                return Err(LookupError::Unavailable("down".into()));
            }
            Ok(self.0.get(target).copied())
        }
    }

    fn a(id: &str) -> ResourceRef {
        ResourceRef::new("a", id)
    }

    #[tokio::test]
    async fn no_dependencies_is_ready() {
        let lookup = Fixed(HashMap::new());
        assert!(check(&lookup, &Dependencies::none()).await.is_ready());
    }

    #[tokio::test]
    async fn all_must_be_succeeded() {
        let mut states = HashMap::new();
        states.insert(a("owner"), State::Succeeded);
        states.insert(a("one"), State::Succeeded);
        states.insert(a("two"), State::Creating);
        let lookup = Fixed(states);

        let deps = Dependencies::owned_by(a("owner")).with(a("one")).with(a("two"));
        let readiness = check(&lookup, &deps).await;
        assert_eq!(
            readiness,
            Readiness::NotReady(vec![Blocker {
                target: a("two"),
                state: Some(State::Creating)
            }])
        );
        assert_eq!(
            readiness.message(),
            "waiting for dependencies: a/two (Creating)"
        );
    }

    #[tokio::test]
    async fn absent_and_unreachable_block() {
        let mut states = HashMap::new();
        states.insert(a("owner"), State::Succeeded);
        let lookup = Fixed(states);

        let deps = Dependencies::owned_by(a("owner"))
            .with(a("missing"))
            .with(ResourceRef::new("broken", "x"));
        match check(&lookup, &deps).await {
            Readiness::NotReady(blockers) => {
                assert_eq!(blockers.len(), 2);
                assert!(blockers.iter().all(|b| b.state.is_none()));
            }
            Readiness::Ready => panic!("gate should be closed"),
        }
    }

    #[tokio::test]
    async fn failed_owner_blocks() {
        let mut states = HashMap::new();
        states.insert(a("owner"), State::Failed);
        let lookup = Fixed(states);

        let readiness = check(&lookup, &Dependencies::owned_by(a("owner"))).await;
        assert!(!readiness.is_ready());
    }
}
