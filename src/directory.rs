//! Live directory of registered users.
//!
//! One branch on `users/`: every child is a user record, folded once per
//! id in the order it arrived. The branch task is also the fold, so the
//! directory has a single writer like every other aggregation.

use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

use crate::aggregator::{AggregationHandle, BranchSpec, SessionControl};
use crate::error::TimelineError;
use crate::observable::ObservableValue;
use crate::resolver::EntityResolver;
use crate::store::{GraphStore, StorePath};
use crate::types::{User, UserDirectory, UserId};

/// Handle to a user directory aggregation.
pub type DirectoryHandle = AggregationHandle<UserDirectory>;

/// Builds the growing list of registered users.
pub struct UserDirectoryAssembler<S: GraphStore> {
    store: Arc<S>,
    viewer: Option<UserId>,
}

impl<S: GraphStore + 'static> UserDirectoryAssembler<S> {
    /// Create an assembler over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store, viewer: None }
    }

    /// Resolve users relative to `viewer`.
    pub fn with_viewer(mut self, viewer: UserId) -> Self {
        self.viewer = Some(viewer);
        self
    }

    /// Open the directory. Must be called inside a Tokio runtime.
    ///
    /// A user whose record does not decode is skipped and logged; it is
    /// folded in if the record is delivered again in a valid shape.
    pub fn open(&self) -> DirectoryHandle {
        let request_id = Uuid::new_v4();
        let span = info_span!("aggregation", kind = "directory", request_id = %request_id);
        let snapshots = ObservableValue::new();
        let errors = ObservableValue::new();
        let control = Arc::new(SessionControl::default());

        let path = StorePath::users();
        control.claim(&BranchSpec::UserRecords(path.clone()));
        {
            let _enter = span.enter();
            info!(viewer = ?self.viewer, "opening user directory");
        }

        let resolver = match &self.viewer {
            Some(viewer) => EntityResolver::for_viewer(Arc::clone(&self.store), viewer.clone()),
            None => EntityResolver::new(Arc::clone(&self.store)),
        };
        let task = tokio::spawn(fold_users(resolver, path, snapshots.clone(), errors.clone()).instrument(span));
        control.track(task.abort_handle());

        AggregationHandle::new(snapshots, errors, control, request_id)
    }
}

async fn fold_users<S: GraphStore>(
    resolver: EntityResolver<S>,
    path: StorePath,
    snapshots: ObservableValue<UserDirectory>,
    errors: ObservableValue<TimelineError>,
) {
    let mut children = match resolver.store().subscribe_children(&path).await {
        Ok(children) => children,
        Err(e) => {
            let err = TimelineError::from_store(e);
            warn!(path = %path, error = %err, "directory subscription failed");
            errors.set(err);
            return;
        }
    };

    let mut seen: HashSet<UserId> = HashSet::new();
    let mut users: Vec<User> = Vec::new();
    let mut generation = 0u64;

    while let Some(event) = children.next().await {
        let user_id = UserId::new(event.key);
        if seen.contains(&user_id) {
            trace!(user_id = %user_id, "duplicate delivery ignored");
            continue;
        }

        let record_path = path.child(user_id.as_str());
        let user = match resolver.resolve_user(event.value, &user_id, &record_path) {
            Ok(user) => user,
            Err(err) => {
                warn!(path = %record_path, error = %err, "user dropped from directory");
                continue;
            }
        };

        seen.insert(user_id.clone());
        users.push(user);
        generation += 1;
        if !snapshots.set(UserDirectory::new(users.iter().cloned().collect(), generation)) {
            break;
        }
        debug!(user_id = %user_id, generation, size = users.len(), "directory published");
    }
}
