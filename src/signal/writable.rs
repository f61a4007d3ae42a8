//! Optimistic writable lazy signal.
//!
//! An [`OwlSignal`] layers a write queue over a [`LazySignal`]: writes apply
//! to the displayed value immediately, are queued as pending patches, and go
//! upstream through a writer installed for the lifetime of the subscription
//! session. Each confirmed server refresh re-bases the remaining queue, so
//! the displayed value converges on the server state once the queue drains.

use super::{LazySignal, SignalListener, SignalSubscription};
use crate::error::{PortError, Result};
use crate::patch::{apply_patches, Patch};
use crate::wire::WriteTag;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Sends optimistic patches upstream. Installed while a subscription session
/// is live; a write without one fails fast.
pub(crate) type UpstreamWriter = Arc<dyn Fn(&[Patch], &[WriteTag]) + Send + Sync>;

#[derive(Clone)]
struct PendingWrite {
    patches: Vec<Patch>,
    tags: Vec<WriteTag>,
}

struct OwlSession {
    listener: SignalListener<Value>,
    writer: UpstreamWriter,
}

struct OwlState {
    /// Last value confirmed by the server, before optimistic writes.
    confirmed: Option<Value>,
    pending: VecDeque<PendingWrite>,
    session: Option<OwlSession>,
}

impl Default for OwlState {
    fn default() -> Self {
        Self {
            confirmed: None,
            pending: VecDeque::new(),
            session: None,
        }
    }
}

/// Shared write machinery behind an [`OwlSignal`] and its setter.
pub(crate) struct OwlShared {
    state: Mutex<OwlState>,
}

impl OwlShared {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(OwlState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OwlState> {
        self.state.lock().expect("owl state lock poisoned")
    }

    /// Install the upstream session. Called when the subscription opens.
    pub(crate) fn begin_session(&self, listener: SignalListener<Value>, writer: UpstreamWriter) {
        let mut state = self.lock();
        state.session = Some(OwlSession { listener, writer });
    }

    /// Drop the upstream session and any queued writes. Subsequent writes
    /// fail with `NotSubscribed` until a new session begins.
    pub(crate) fn end_session(&self) {
        let mut state = self.lock();
        state.session = None;
        state.pending.clear();
    }

    /// Apply an optimistic write: patch the displayed value, queue the write
    /// and hand it to the upstream writer.
    pub(crate) fn write_patches(&self, patches: Vec<Patch>, tags: Vec<WriteTag>) -> Result<()> {
        let (listener, writer, next) = {
            let mut state = self.lock();
            let session = state.session.as_ref().ok_or(PortError::NotSubscribed)?;
            let listener = session.listener.clone();
            let writer = session.writer.clone();
            let base = listener.current().unwrap_or(Value::Null);
            let next = apply_patches(&base, &patches)?;
            state.pending.push_back(PendingWrite {
                patches: patches.clone(),
                tags: tags.clone(),
            });
            (listener, writer, next)
        };
        // Local apply first, then upstream. Both run outside the lock so a
        // transport may deliver the echo re-entrantly.
        listener.push(next, tags.clone());
        writer(&patches, &tags);
        Ok(())
    }

    /// Apply a confirmed server refresh.
    ///
    /// The patches apply to the confirmed value; the oldest pending write is
    /// taken as confirmed by this refresh; the remaining queue re-applies on
    /// top. `validate` judges the resulting displayed value. On any failure
    /// nothing is committed and nothing is delivered.
    pub(crate) fn apply_confirmed(
        &self,
        patches: &[Patch],
        tags: &[WriteTag],
        validate: &dyn Fn(&Value) -> std::result::Result<(), String>,
    ) -> std::result::Result<(), String> {
        let (listener, displayed) = {
            let mut state = self.lock();
            let listener = match state.session.as_ref() {
                Some(session) => session.listener.clone(),
                None => return Err("no active upstream session".to_string()),
            };
            let base = state.confirmed.clone().unwrap_or(Value::Null);
            let confirmed = apply_patches(&base, patches)
                .map_err(|e| format!("patches failed to apply: {}", e))?;

            let mut displayed = confirmed.clone();
            let mut remaining = VecDeque::new();
            for write in state.pending.iter().skip(1) {
                match apply_patches(&displayed, &write.patches) {
                    Ok(next) => {
                        displayed = next;
                        remaining.push_back(write.clone());
                    }
                    Err(e) => {
                        tracing::debug!(
                            "Dropping pending optimistic write that no longer applies: {}",
                            e
                        );
                    }
                }
            }
            validate(&displayed)?;

            state.confirmed = Some(confirmed);
            state.pending = remaining;
            (listener, displayed)
        };
        listener.push(displayed, tags.to_vec());
        Ok(())
    }

    /// Number of optimistic writes not yet confirmed.
    pub(crate) fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }
}

/// Optimistic writable lazy signal over a JSON value.
///
/// Observation goes through the wrapped [`LazySignal`]; writes go through
/// the paired [`SignalSetter`](super::SignalSetter).
#[derive(Clone)]
pub struct OwlSignal {
    signal: LazySignal<Value>,
    shared: Arc<OwlShared>,
}

impl OwlSignal {
    pub(crate) fn new(signal: LazySignal<Value>, shared: Arc<OwlShared>) -> Self {
        Self { signal, shared }
    }

    /// Displayed value (confirmed state plus pending writes), or `None`
    /// while not available.
    pub fn get(&self) -> Option<Value> {
        self.signal.get()
    }

    /// Attach an observer; see [`LazySignal::subscribe`].
    pub fn subscribe(
        &self,
        on_value: impl Fn(&Value, &[WriteTag]) + Send + Sync + 'static,
        on_error: impl Fn(&PortError) + Send + Sync + 'static,
    ) -> SignalSubscription<Value> {
        self.signal.subscribe(on_value, on_error)
    }

    /// Number of optimistic writes not yet confirmed by the server.
    pub fn pending_writes(&self) -> usize {
        self.shared.pending_len()
    }
}
