// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reconciliation handler.
//!
//! Given one `(record type, name)` key, reads the local record and its mirror
//! and performs the minimal corrective action. Every invocation re-derives the
//! truth from both sides, so event ordering does not matter and repeated
//! invocations on unchanged inputs issue no writes.
//!
//! # Decision Flow
//!
//! ```text
//! local missing ──────────────► delete our mirror (if any) ─► done
//! destination ≠ this remote ──► done
//! deleting / opted out ───────► delete mirror ─► confirmed gone? ─► drop finalizer
//! no finalizer ───────────────► add finalizer (before any remote create)
//! remote forbidden ───────────► done
//! remote missing ─────────────► create mirror ─► done
//! remote not ours ────────────► warning event ─► done
//! spec differs ───────────────► push spec
//! status differs ─────────────► push (Local) or pull (Shared) status
//! ```
//!
//! # Error Semantics
//!
//! - NotFound drives branch selection and is never returned.
//! - Forbidden from the remote side means the provider revoked access:
//!   logged at info, not returned, not retried.
//! - Everything else is returned and the worker requeues the key.

use super::{Reflector, ReflectionTarget, WorkItem};
use crate::error::{ReplicationError, Result, Side};
use crate::events::{Event, MESSAGE_FOREIGN_REMOTE, REASON_DISABLED};
use crate::labels::{self, FINALIZER};
use crate::metrics;
use crate::record::{Record, Section};
use crate::registry::OwnershipPolicy;
use crate::store::StoreError;
use std::time::Instant;
use tracing::{debug, info};

/// What the remote side looks like from this engine's point of view.
enum RemoteState {
    /// A mirror we created.
    Managed(Record),
    /// A record with the same name that we do not own.
    Foreign(Record),
    Missing,
    Forbidden,
}

impl Reflector {
    /// Reconcile one key. No-op if its record type is not active here.
    pub async fn reconcile(&self, item: &WorkItem) -> Result<()> {
        let Some(target) = self.target(&item.resource) else {
            debug!(resource = %item.resource, name = %item.name, "Record type not active, skipping");
            return Ok(());
        };

        let start = Instant::now();
        let result = self.reconcile_target(&target, &item.name).await;

        let outcome = match &result {
            Ok(()) => "success",
            Err(e) if e.is_conflict() => "conflict",
            Err(_) => "error",
        };
        metrics::record_reconcile(
            &self.remote.cluster_id,
            &target.resource.resource,
            outcome,
            start.elapsed(),
        );
        result
    }

    /// A record whose destination label names another cluster, or is missing,
    /// is left alone even if it carries our finalizer. Embedders must not drop
    /// the destination label before the finalizer is released, or nothing will
    /// ever release it.
    async fn reconcile_target(&self, target: &ReflectionTarget, name: &str) -> Result<()> {
        let local = match target.local.get(name).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                debug!(name, "Local record gone");
                return self.delete_orphan(target, name).await;
            }
            Err(e) => return Err(self.local_error("get", target, e)),
        };

        if labels::destination(&local) != Some(self.remote.cluster_id.as_str()) {
            debug!(
                name,
                destination = labels::destination(&local).unwrap_or("<none>"),
                "Record is destined elsewhere, ignoring"
            );
            return Ok(());
        }

        if local.is_deleting() || !labels::is_replication_requested(&local) {
            return self.tear_down(target, local).await;
        }

        let local = self.ensure_finalizer(target, local).await?;

        let remote = match self.fetch_remote(target, name).await? {
            RemoteState::Forbidden => return Ok(()),
            RemoteState::Missing => return self.create_mirror(target, &local).await,
            RemoteState::Foreign(_) => {
                self.refuse_foreign(target, &local);
                return Ok(());
            }
            RemoteState::Managed(remote) => remote,
        };

        let remote = match self.push_spec(target, &local, remote).await? {
            Some(updated) => updated,
            None => return Ok(()),
        };

        self.propagate_status(target, &local, &remote).await
    }

    /// Local record is gone: remove our mirror if one remains.
    async fn delete_orphan(&self, target: &ReflectionTarget, name: &str) -> Result<()> {
        match self.fetch_remote(target, name).await? {
            RemoteState::Managed(remote) if !remote.is_deleting() => self.delete_remote(target, name).await,
            RemoteState::Foreign(_) => {
                debug!(name, "Remote record is not ours, leaving it alone");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Deletion requested or replication withdrawn: remove the mirror, then
    /// release the finalizer once its absence is confirmed.
    async fn tear_down(&self, target: &ReflectionTarget, local: Record) -> Result<()> {
        let name = local.name().to_string();

        if let RemoteState::Managed(remote) = self.fetch_remote(target, &name).await? {
            if !remote.is_deleting() {
                self.delete_remote(target, &name).await?;
            }
            if let RemoteState::Managed(_) = self.fetch_remote(target, &name).await? {
                debug!(name = %name, "Mirror still present, waiting before releasing finalizer");
                return Ok(());
            }
        }

        if !local.has_finalizer(FINALIZER) {
            return Ok(());
        }

        let mut released = local;
        released.remove_finalizer(FINALIZER);
        target
            .local
            .update(released)
            .await
            .map_err(|e| self.local_error("remove finalizer", target, e))?;
        metrics::record_local_write(&self.remote.cluster_id, &target.resource.resource, "remove_finalizer");
        info!(name = %name, "Mirror removed, finalizer released");
        Ok(())
    }

    /// Add our finalizer before anything may be created remotely.
    async fn ensure_finalizer(&self, target: &ReflectionTarget, local: Record) -> Result<Record> {
        if local.has_finalizer(FINALIZER) {
            return Ok(local);
        }

        let mut guarded = local;
        guarded.add_finalizer(FINALIZER);
        let updated = target
            .local
            .update(guarded)
            .await
            .map_err(|e| self.local_error("add finalizer", target, e))?;
        metrics::record_local_write(&self.remote.cluster_id, &target.resource.resource, "add_finalizer");
        debug!(name = %updated.name(), "Finalizer added");
        Ok(updated)
    }

    async fn create_mirror(&self, target: &ReflectionTarget, local: &Record) -> Result<()> {
        let mirror = labels::remote_copy(local, &self.local_cluster_id, &self.remote.remote_namespace);

        match target.remote.create(mirror).await {
            Ok(created) => {
                metrics::record_remote_write(&self.remote.cluster_id, &target.resource.resource, "create");
                info!(name = %created.name(), "Mirror created");
                Ok(())
            }
            Err(e) if e.is_forbidden() => {
                self.log_forbidden(target, "create", &e);
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                self.refuse_foreign(target, local);
                Ok(())
            }
            Err(e) => Err(self.remote_error("create", target, e)),
        }
    }

    /// Overwrite the mirror's spec if it drifted.
    ///
    /// Returns the mirror as it now stands, or `None` if access was revoked.
    async fn push_spec(
        &self,
        target: &ReflectionTarget,
        local: &Record,
        remote: Record,
    ) -> Result<Option<Record>> {
        if local.section_eq(&remote, Section::Spec) {
            return Ok(Some(remote));
        }

        let mut desired = remote;
        desired.copy_section_from(local, Section::Spec);
        labels::strip_ownership_hint(&mut desired.metadata);

        match target.remote.update(desired).await {
            Ok(updated) => {
                metrics::record_remote_write(&self.remote.cluster_id, &target.resource.resource, "update");
                debug!(name = %updated.name(), "Mirror spec updated");
                Ok(Some(updated))
            }
            Err(e) if e.is_forbidden() => {
                self.log_forbidden(target, "update", &e);
                Ok(None)
            }
            Err(e) => Err(self.remote_error("update", target, e)),
        }
    }

    /// Copy status from the authoritative side to the other.
    ///
    /// Absence is a value like any other: a status missing on the
    /// authoritative side is removed from the other one.
    async fn propagate_status(
        &self,
        target: &ReflectionTarget,
        local: &Record,
        remote: &Record,
    ) -> Result<()> {
        match target.ownership {
            OwnershipPolicy::Local => {
                if local.section_eq(remote, Section::Status) {
                    return Ok(());
                }
                let mut desired = remote.clone();
                desired.copy_section_from(local, Section::Status);
                match target.remote.update_status(desired).await {
                    Ok(_) => {
                        metrics::record_remote_write(
                            &self.remote.cluster_id,
                            &target.resource.resource,
                            "update_status",
                        );
                        debug!(name = %local.name(), "Status pushed to mirror");
                        Ok(())
                    }
                    Err(e) if e.is_forbidden() => {
                        self.log_forbidden(target, "update_status", &e);
                        Ok(())
                    }
                    Err(e) => Err(self.remote_error("update status", target, e)),
                }
            }
            OwnershipPolicy::Shared => {
                if remote.section_eq(local, Section::Status) {
                    return Ok(());
                }
                let mut desired = local.clone();
                desired.copy_section_from(remote, Section::Status);
                target
                    .local
                    .update_status(desired)
                    .await
                    .map_err(|e| self.local_error("update status", target, e))?;
                metrics::record_local_write(&self.remote.cluster_id, &target.resource.resource, "update_status");
                debug!(name = %local.name(), "Status pulled from mirror");
                Ok(())
            }
        }
    }

    /// Read the remote record and classify it.
    async fn fetch_remote(&self, target: &ReflectionTarget, name: &str) -> Result<RemoteState> {
        match target.remote.get(name).await {
            Ok(record) if labels::is_managed_mirror(&record, &self.local_cluster_id) => {
                Ok(RemoteState::Managed(record))
            }
            Ok(record) => Ok(RemoteState::Foreign(record)),
            Err(e) if e.is_not_found() => Ok(RemoteState::Missing),
            Err(e) if e.is_forbidden() => {
                self.log_forbidden(target, "get", &e);
                Ok(RemoteState::Forbidden)
            }
            Err(e) => Err(self.remote_error("get", target, e)),
        }
    }

    /// Delete a mirror. Already gone and access revoked both count as done.
    async fn delete_remote(&self, target: &ReflectionTarget, name: &str) -> Result<()> {
        match target.remote.delete(name).await {
            Ok(()) => {
                metrics::record_remote_write(&self.remote.cluster_id, &target.resource.resource, "delete");
                info!(name, "Mirror deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) if e.is_forbidden() => {
                self.log_forbidden(target, "delete", &e);
                Ok(())
            }
            Err(e) => Err(self.remote_error("delete", target, e)),
        }
    }

    fn refuse_foreign(&self, target: &ReflectionTarget, local: &Record) {
        info!(name = %local.name(), "Remote record exists and is not managed by us, refusing to touch it");
        metrics::record_foreign_remote(&self.remote.cluster_id, &target.resource.resource);
        self.recorder.record(Event::warning(
            self.local_ref(&target.resource, local.name()),
            REASON_DISABLED,
            format!("reflection disabled: {}", MESSAGE_FOREIGN_REMOTE),
        ));
    }

    fn log_forbidden(&self, target: &ReflectionTarget, operation: &str, err: &StoreError) {
        info!(
            cluster_id = %self.remote.cluster_id,
            resource = %target.resource,
            operation,
            error = %err,
            "Remote access revoked, skipping"
        );
        metrics::record_forbidden(&self.remote.cluster_id, &target.resource.resource, operation);
    }

    fn local_error(&self, operation: &str, target: &ReflectionTarget, err: StoreError) -> ReplicationError {
        ReplicationError::store(Side::Local, operation, &target.resource, err)
    }

    fn remote_error(&self, operation: &str, target: &ReflectionTarget, err: StoreError) -> ReplicationError {
        ReplicationError::store(Side::Remote, operation, &target.resource, err)
    }
}
