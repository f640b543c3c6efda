//! Transactional updater.
//!
//! ## State machine (one call to [`Updater::execute`])
//!
//! ```text
//! Reading → Transforming → Committing ─┬→ Succeeded
//!    ↑                                 └→ Merging ─┬→ Committing     (Resolve)
//!    └─────────────────────────────────────────────┴─ Reading        (Reapply)
//! ```
//!
//! Terminal failures: `RetriesExhausted` (conflict budget spent),
//! `BackendError` (unavailable budget spent), `TransformRaised` (never
//! retried).
//!
//! Conflict retries and backend-failure retries use separate budgets and
//! backoff schedules.
//!
//! Writes within one pass are committed in groups: archive writes, then other
//! writes, then deletions. A conflict in one group defers the later groups to
//! the next pass, so a tombstone always lands before the record it hides is
//! deleted. There is no atomicity across paths.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use roster_core::layout::in_scope;
use roster_core::merge::merge_documents;
use roster_core::{Changes, DocKind, DocMap, Document, RegistryError, StorePath};

use crate::backend::{CommitResult, Revision, VersionedBackend};
use crate::backoff::BackoffPolicy;
use crate::error::{BackendError, ConflictReport, TransformError, UpdateError};
use crate::settings::StoreSettings;

// ---------------------------------------------------------------------------
// Transform contract
// ---------------------------------------------------------------------------

/// How a transform's pending writes are reconciled after a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRule {
    /// Merge intended and remote documents per field type.
    Resolve,
    /// Re-run the transform against a fresh snapshot.
    Reapply,
}

/// A pure function from a snapshot to the intended new state of the paths it touches.
///
/// The updater may call [`Transform::apply`] several times against different
/// snapshots; it must have no side effects.
pub trait Transform {
    fn apply(&self, snapshot: &Snapshot) -> Result<Changes, TransformError>;

    fn merge_rule(&self) -> MergeRule {
        MergeRule::Reapply
    }
}

/// [`Transform`] over a plain function; always re-applied on conflict.
pub struct FnTransform<F>(F);

/// Wrap `f` as a [`Transform`].
pub fn transform_fn<F>(f: F) -> FnTransform<F>
where
    F: Fn(&Snapshot) -> Result<Changes, TransformError>,
{
    FnTransform(f)
}

impl<F> Transform for FnTransform<F>
where
    F: Fn(&Snapshot) -> Result<Changes, TransformError>,
{
    fn apply(&self, snapshot: &Snapshot) -> Result<Changes, TransformError> {
        (self.0)(snapshot)
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Consistent-per-path view of the target paths at read time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    docs: DocMap,
    revisions: BTreeMap<StorePath, Option<Revision>>,
    scope: BTreeSet<StorePath>,
}

impl Snapshot {
    /// Documents of every present path read.
    pub fn documents(&self) -> &DocMap {
        &self.docs
    }

    pub fn document(&self, path: &StorePath) -> Option<&Document> {
        self.docs.get(path)
    }

    /// Revision the path was read at; `None` when absent or not read.
    pub fn revision(&self, path: &StorePath) -> Option<&Revision> {
        self.revisions.get(path).and_then(Option::as_ref)
    }

    /// The declared target paths (directories included).
    pub fn scope(&self) -> &BTreeSet<StorePath> {
        &self.scope
    }

    /// Paths that existed at read time.
    pub fn present(&self) -> BTreeSet<StorePath> {
        self.docs.keys().cloned().collect()
    }

    fn record(&mut self, path: StorePath, doc: Option<Document>, revision: Option<Revision>) {
        match doc {
            Some(doc) => {
                self.docs.insert(path.clone(), doc);
            }
            None => {
                self.docs.remove(&path);
            }
        }
        self.revisions.insert(path, revision);
    }
}

// ---------------------------------------------------------------------------
// Result of a call
// ---------------------------------------------------------------------------

/// States of one update call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Reading,
    Transforming,
    Committing,
    Merging,
    Succeeded,
    RetriesExhausted,
    BackendError,
    TransformRaised,
}

/// Report of a successful call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    /// New revision of every path this call committed (`None` after a deletion).
    pub revisions: BTreeMap<StorePath, Option<Revision>>,
    /// Paths that already held the intended content; nothing was written.
    pub unchanged: BTreeSet<StorePath>,
    pub conflict_retries: u32,
    pub unavailable_retries: u32,
    /// Phases visited, in order.
    pub trace: Vec<Phase>,
}

impl Applied {
    /// True when the call wrote nothing.
    pub fn is_noop(&self) -> bool {
        self.revisions.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Updater
// ---------------------------------------------------------------------------

/// Runs transforms against a [`VersionedBackend`] with optimistic concurrency.
#[derive(Debug, Clone)]
pub struct Updater<B> {
    backend: B,
    timeout: Duration,
    max_unavailable_retries: u32,
    unavailable_backoff: BackoffPolicy,
}

impl<B: VersionedBackend> Updater<B> {
    pub fn new(backend: B) -> Self {
        Self::from_settings(backend, &StoreSettings::default())
    }

    pub fn from_settings(backend: B, settings: &StoreSettings) -> Self {
        Self {
            backend,
            timeout: settings.timeout(),
            max_unavailable_retries: settings.max_unavailable_retries,
            unavailable_backoff: settings.unavailable_backoff.policy(),
        }
    }

    /// Budget for backend failures, separate from the conflict budget.
    pub fn with_unavailable_budget(mut self, retries: u32, backoff: BackoffPolicy) -> Self {
        self.max_unavailable_retries = retries;
        self.unavailable_backoff = backoff;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run `transform` over `targets` until it commits, retrying conflicts up to `max_retries` times.
    pub fn execute<T: Transform + ?Sized>(
        &self,
        transform: &T,
        targets: &BTreeSet<StorePath>,
        max_retries: u32,
        backoff: &BackoffPolicy,
    ) -> Result<Applied, UpdateError> {
        Run {
            updater: self,
            transform,
            targets,
            max_retries,
            backoff,
            applied: Applied::default(),
        }
        .run()
    }

    /// Read-only snapshot of `targets`.
    pub fn read(&self, targets: &BTreeSet<StorePath>) -> Result<Snapshot, UpdateError> {
        let mut used = 0;
        self.read_snapshot(targets, &mut used)
    }

    fn read_snapshot(
        &self,
        targets: &BTreeSet<StorePath>,
        used: &mut u32,
    ) -> Result<Snapshot, UpdateError> {
        let mut files = BTreeSet::new();
        for target in targets {
            if target.is_dir() {
                let listed = self.with_retry(target, used, |b, t| b.list(target, t))?;
                files.extend(listed.into_iter().filter(|p| DocKind::for_path(p).is_ok()));
            } else {
                files.insert(target.clone());
            }
        }

        let mut snapshot = Snapshot {
            scope: targets.clone(),
            ..Snapshot::default()
        };
        for path in files {
            let read = self.with_retry(&path, used, |b, t| b.pull_latest(&path, t))?;
            let doc = decode(&path, read.content)?;
            snapshot.record(path, doc, read.revision);
        }
        Ok(snapshot)
    }

    /// Call the backend, retrying failures while the per-call budget `used` allows.
    fn with_retry<R>(
        &self,
        path: &StorePath,
        used: &mut u32,
        mut call: impl FnMut(&B, Duration) -> Result<R, BackendError>,
    ) -> Result<R, UpdateError> {
        let mut consecutive = 0;
        loop {
            match call(&self.backend, self.timeout) {
                Ok(value) => return Ok(value),
                Err(err) if *used < self.max_unavailable_retries => {
                    let delay = self.unavailable_backoff.delay(consecutive);
                    consecutive += 1;
                    *used += 1;
                    tracing::warn!(
                        path = %path,
                        attempt = *used,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "backend call failed; retrying"
                    );
                    sleep(delay);
                }
                Err(err) => {
                    return Err(UpdateError::BackendUnavailable {
                        attempts: consecutive + 1,
                        source: err,
                    })
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// One call
// ---------------------------------------------------------------------------

enum State {
    Reading,
    Transforming(Snapshot),
    Committing(Snapshot, Changes),
    Merging(Snapshot, Changes, Vec<Conflict>),
    Succeeded,
}

impl State {
    fn phase(&self) -> Phase {
        match self {
            State::Reading => Phase::Reading,
            State::Transforming(_) => Phase::Transforming,
            State::Committing(..) => Phase::Committing,
            State::Merging(..) => Phase::Merging,
            State::Succeeded => Phase::Succeeded,
        }
    }
}

struct Conflict {
    path: StorePath,
    current: Option<Revision>,
}

struct Run<'u, B, T: ?Sized> {
    updater: &'u Updater<B>,
    transform: &'u T,
    targets: &'u BTreeSet<StorePath>,
    max_retries: u32,
    backoff: &'u BackoffPolicy,
    applied: Applied,
}

impl<B: VersionedBackend, T: Transform + ?Sized> Run<'_, B, T> {
    fn run(mut self) -> Result<Applied, UpdateError> {
        let mut state = State::Reading;
        loop {
            let phase = state.phase();
            self.applied.trace.push(phase);
            tracing::debug!(?phase, conflict_retries = self.applied.conflict_retries, "update phase");

            let next = match state {
                State::Reading => self.read().map(State::Transforming),
                State::Transforming(snapshot) => self
                    .transform(&snapshot)
                    .map(|pending| State::Committing(snapshot, pending)),
                State::Committing(snapshot, pending) => self.commit(snapshot, pending),
                State::Merging(snapshot, pending, conflicts) => {
                    self.merge(snapshot, pending, conflicts)
                }
                State::Succeeded => return Ok(self.applied),
            };
            state = match next {
                Ok(state) => state,
                Err(err) => {
                    let phase = terminal_phase(&err);
                    tracing::warn!(?phase, error = %err, "update failed");
                    return Err(err);
                }
            };
        }
    }

    fn read(&mut self) -> Result<Snapshot, UpdateError> {
        self.updater
            .read_snapshot(self.targets, &mut self.applied.unavailable_retries)
    }

    fn transform(&mut self, snapshot: &Snapshot) -> Result<Changes, UpdateError> {
        let changes = self.transform.apply(snapshot)?;

        let mut pending = Changes::new();
        for (path, doc) in changes {
            if !in_scope(&path, snapshot.scope()) {
                return Err(UpdateError::TransformRaised(TransformError::Registry(
                    RegistryError::OutOfScope {
                        path: path.to_string(),
                    },
                )));
            }
            if let Some(doc) = &doc {
                doc.check_path(&path)
                    .map_err(|e| UpdateError::TransformRaised(e.into()))?;
            }
            if snapshot.document(&path) == doc.as_ref() {
                if !self.applied.revisions.contains_key(&path) {
                    self.applied.unchanged.insert(path);
                }
                continue;
            }
            pending.insert(path, doc);
        }
        Ok(pending)
    }

    fn commit(&mut self, snapshot: Snapshot, pending: Changes) -> Result<State, UpdateError> {
        let mut groups: BTreeMap<u8, Vec<(StorePath, Option<Document>)>> = BTreeMap::new();
        for (path, doc) in pending {
            groups.entry(commit_group(&path, &doc)).or_default().push((path, doc));
        }

        let mut conflicts = Vec::new();
        let mut remaining = Changes::new();
        for (_, group) in groups {
            if !conflicts.is_empty() {
                remaining.extend(group);
                continue;
            }
            for (path, doc) in group {
                let bytes = doc.as_ref().map(Document::encode).transpose()?;
                let base = snapshot.revision(&path).cloned();
                let result = self.updater.with_retry(
                    &path,
                    &mut self.applied.unavailable_retries,
                    |b, t| b.commit(&path, bytes.as_deref(), base.as_ref(), t),
                )?;
                match result {
                    CommitResult::Success(revision) => {
                        tracing::info!(path = %path, revision = ?revision.as_ref().map(Revision::as_str), "committed");
                        self.applied.unchanged.remove(&path);
                        self.applied.revisions.insert(path, revision);
                    }
                    CommitResult::Conflict(current) => {
                        tracing::debug!(path = %path, "commit conflicted");
                        conflicts.push(Conflict {
                            path: path.clone(),
                            current,
                        });
                        remaining.insert(path, doc);
                    }
                }
            }
        }

        if conflicts.is_empty() {
            Ok(State::Succeeded)
        } else {
            Ok(State::Merging(snapshot, remaining, conflicts))
        }
    }

    fn merge(
        &mut self,
        mut snapshot: Snapshot,
        mut pending: Changes,
        conflicts: Vec<Conflict>,
    ) -> Result<State, UpdateError> {
        if self.applied.conflict_retries >= self.max_retries {
            return Err(self.exhausted(conflicts));
        }
        let delay = self.backoff.delay(self.applied.conflict_retries);
        self.applied.conflict_retries += 1;
        tracing::warn!(
            conflicts = conflicts.len(),
            retry = self.applied.conflict_retries,
            delay_ms = delay.as_millis() as u64,
            "conflict; merging and retrying"
        );
        sleep(delay);

        match self.transform.merge_rule() {
            MergeRule::Reapply => Ok(State::Reading),
            MergeRule::Resolve => {
                for Conflict { path, .. } in conflicts {
                    let Some(intended) = pending.remove(&path) else {
                        continue;
                    };
                    let fresh = self.updater.with_retry(
                        &path,
                        &mut self.applied.unavailable_retries,
                        |b, t| b.pull_latest(&path, t),
                    )?;
                    let remote = decode(&path, fresh.content)?;
                    let merged = merge_documents(
                        path.as_str(),
                        snapshot.document(&path),
                        remote.as_ref(),
                        intended.as_ref(),
                    )?;
                    snapshot.record(path.clone(), remote.clone(), fresh.revision);
                    if merged == remote {
                        if !self.applied.revisions.contains_key(&path) {
                            self.applied.unchanged.insert(path);
                        }
                    } else {
                        pending.insert(path, merged);
                    }
                }
                Ok(State::Committing(snapshot, pending))
            }
        }
    }

    fn exhausted(&self, conflicts: Vec<Conflict>) -> UpdateError {
        let last = conflicts.into_iter().last();
        let (path, current_revision) = match last {
            Some(Conflict { path, current }) => (path, current),
            None => (StorePath::new(""), None),
        };
        let remote_content = self
            .updater
            .backend
            .pull_latest(&path, self.updater.timeout)
            .ok()
            .and_then(|read| read.content)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
        UpdateError::ExhaustedRetries {
            retries: self.applied.conflict_retries,
            last_conflict: Box::new(ConflictReport {
                path,
                current_revision,
                remote_content,
            }),
        }
    }
}

fn decode(path: &StorePath, content: Option<Vec<u8>>) -> Result<Option<Document>, RegistryError> {
    content
        .map(|bytes| Document::decode(path, &bytes))
        .transpose()
}

/// Archive writes first, deletions last.
fn commit_group(path: &StorePath, doc: &Option<Document>) -> u8 {
    match doc {
        Some(_) if path == &StorePath::archive() => 0,
        Some(_) => 1,
        None => 2,
    }
}

fn terminal_phase(err: &UpdateError) -> Phase {
    match err {
        UpdateError::ExhaustedRetries { .. } => Phase::RetriesExhausted,
        UpdateError::BackendUnavailable { .. } | UpdateError::Registry(_) => Phase::BackendError,
        UpdateError::TransformRaised(_)
        | UpdateError::EntityNotFound { .. }
        | UpdateError::EntityArchived { .. } => Phase::TransformRaised,
    }
}

fn sleep(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}
