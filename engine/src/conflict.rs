//! Conflict resolution for rejected pushes.
//!
//! When the service rejects an operation because the row changed underneath
//! it (409 / 412), the push engine hands a [`Conflict`] to the application's
//! [`ConflictResolver`] and acts on the returned [`Resolution`].

use crate::operation::TableOperation;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How to settle a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    /// Service wins: the local row takes the server item, the operation is done
    UseRemote,
    /// Local wins: the local item adopts the server version and is sent again
    UseLocal,
    /// Drop the operation and leave the local row untouched
    Cancel,
}

/// A push rejected by a version mismatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    /// The operation that was rejected
    pub operation: TableOperation,
    /// The item that was sent
    pub local_item: Option<Value>,
    /// The service's current row, if it returned one
    pub server_item: Option<Value>,
}

impl Conflict {
    /// Whether the service reports the row as gone.
    pub fn remote_deleted(&self) -> bool {
        self.server_item
            .as_ref()
            .map_or(true, crate::item::is_deleted)
    }
}

/// Application hook deciding conflict outcomes.
pub trait ConflictResolver: Send + Sync {
    fn resolve(&self, conflict: &Conflict) -> Resolution;
}

impl<F> ConflictResolver for F
where
    F: Fn(&Conflict) -> Resolution + Send + Sync,
{
    fn resolve(&self, conflict: &Conflict) -> Resolution {
        self(conflict)
    }
}

/// Always keeps the service's version.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteWins;

impl ConflictResolver for RemoteWins {
    fn resolve(&self, _conflict: &Conflict) -> Resolution {
        Resolution::UseRemote
    }
}

/// Always re-sends the local version.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalWins;

impl ConflictResolver for LocalWins {
    fn resolve(&self, _conflict: &Conflict) -> Resolution {
        Resolution::UseLocal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::OperationClock;
    use crate::operation::OperationKind;
    use serde_json::json;

    fn conflict(server_item: Option<Value>) -> Conflict {
        Conflict {
            operation: TableOperation::new(
                OperationKind::Update,
                "todos",
                "a",
                Some(json!({"id": "a"})),
                OperationClock::new().tick(),
            ),
            local_item: Some(json!({"id": "a", "text": "mine"})),
            server_item,
        }
    }

    #[test]
    fn closure_resolver() {
        let resolver = |c: &Conflict| {
            if c.remote_deleted() {
                Resolution::Cancel
            } else {
                Resolution::UseLocal
            }
        };
        assert_eq!(resolver.resolve(&conflict(None)), Resolution::Cancel);
        assert_eq!(
            resolver.resolve(&conflict(Some(json!({"id": "a", "deleted": true})))),
            Resolution::Cancel
        );
        assert_eq!(
            resolver.resolve(&conflict(Some(json!({"id": "a"})))),
            Resolution::UseLocal
        );
    }

    #[test]
    fn fixed_resolvers() {
        let c = conflict(Some(json!({"id": "a"})));
        assert_eq!(RemoteWins.resolve(&c), Resolution::UseRemote);
        assert_eq!(LocalWins.resolve(&c), Resolution::UseLocal);
    }
}
