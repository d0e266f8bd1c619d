use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use engine_client::{CancellationSignal, ChatRequest};
use engine_contract::{now_millis, Message, Role, StreamEvent};
use session_store::{Session, SessionId, SessionStore, SessionStoreError, DEFAULT_TITLE};

use crate::error::ControllerError;
use crate::reducer::{SessionReducer, TurnOutcome, TurnStatus};
use crate::settings::ChatSettings;
use crate::title::{provisional_title, sanitize_title, title_request};
use crate::transport::{ChatTransport, TurnInterruption};

/// Receives every event of a turn as it arrives, before it is folded.
pub type TurnObserver<'a> = &'a mut (dyn FnMut(&StreamEvent) + Send);

/// Whether session changes currently reach disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persistence {
    Durable,
    /// A write failed; the current session continues in memory only.
    Degraded { reason: String },
}

impl Persistence {
    pub fn is_durable(&self) -> bool {
        matches!(self, Self::Durable)
    }
}

type InFlight = Arc<Mutex<Option<CancellationSignal>>>;

/// Cancels whichever turn is in flight. Cheap to clone and safe to use from
/// a signal handler task while the controller is busy streaming.
#[derive(Debug, Clone)]
pub struct TurnCanceller {
    in_flight: InFlight,
}

impl TurnCanceller {
    /// Returns `true` only for the call that actually cancelled a turn.
    pub fn cancel(&self) -> bool {
        match lock_unpoisoned(&self.in_flight).as_ref() {
            Some(flag) => !flag.swap(true, Ordering::SeqCst),
            None => false,
        }
    }

    pub fn is_busy(&self) -> bool {
        lock_unpoisoned(&self.in_flight).is_some()
    }
}

/// Drives chat turns for one active session.
///
/// Each turn builds a request from the session history, streams it through
/// the transport, folds the events with a [`SessionReducer`] and persists
/// the result. Only one turn runs at a time; `&mut self` enforces that.
pub struct ChatController {
    transport: Arc<dyn ChatTransport>,
    store: Option<Arc<Mutex<SessionStore>>>,
    settings: ChatSettings,
    session: Session,
    persistence: Persistence,
    in_flight: InFlight,
    last_status: Option<TurnStatus>,
}

impl ChatController {
    /// Creates a controller backed by `store`, resuming the session recorded
    /// as active or starting a fresh one.
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        store: Arc<Mutex<SessionStore>>,
        settings: ChatSettings,
    ) -> Self {
        let session = {
            let store = lock_unpoisoned(&store);
            let restored = store.active().and_then(|id| store.load(id).ok());
            restored.unwrap_or_else(Session::fresh)
        };
        tracing::debug!(session = %session.id, messages = session.messages.len(), "chat controller ready");

        Self {
            transport,
            store: Some(store),
            settings,
            session,
            persistence: Persistence::Durable,
            in_flight: Arc::default(),
            last_status: None,
        }
    }

    /// Controller with no session storage at all.
    pub fn in_memory(
        transport: Arc<dyn ChatTransport>,
        settings: ChatSettings,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            store: None,
            settings,
            session: Session::fresh(),
            persistence: Persistence::Degraded {
                reason: reason.into(),
            },
            in_flight: Arc::default(),
            last_status: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut ChatSettings {
        &mut self.settings
    }

    pub fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    pub fn last_status(&self) -> Option<TurnStatus> {
        self.last_status
    }

    /// Swaps the engine connection, e.g. after the engine was restarted on a
    /// new port.
    pub fn set_transport(&mut self, transport: Arc<dyn ChatTransport>) {
        self.transport = transport;
    }

    pub fn canceller(&self) -> TurnCanceller {
        TurnCanceller {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Runs `f` against the session store, if one is attached.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut SessionStore) -> R) -> Option<R> {
        self.store
            .as_ref()
            .map(|store| f(&mut lock_unpoisoned(store)))
    }

    /// Appends a user message and streams the assistant's reply.
    pub async fn send(
        &mut self,
        text: &str,
        observer: TurnObserver<'_>,
    ) -> Result<TurnOutcome, ControllerError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ControllerError::EmptyMessage);
        }

        if self.session.is_empty() && self.session.title == DEFAULT_TITLE {
            self.session.title = provisional_title(text);
        }
        self.session.messages.push(Message::user(text, now_millis()));
        self.persist();

        let outcome = self.run_turn(observer).await;
        if self.wants_title(&outcome) {
            self.generate_title().await;
        }
        Ok(outcome)
    }

    /// Resends the last user message after a failed or cancelled turn.
    pub async fn retry_last(
        &mut self,
        observer: TurnObserver<'_>,
    ) -> Result<TurnOutcome, ControllerError> {
        let interrupted = matches!(
            self.last_status,
            Some(TurnStatus::Failed | TurnStatus::Cancelled)
        );
        let unanswered = self
            .session
            .messages
            .last()
            .is_some_and(|message| message.role == Role::User);
        if !interrupted && !unanswered {
            return Err(ControllerError::NothingToRetry);
        }
        self.rewind_to_last_user()?;
        Ok(self.run_turn(observer).await)
    }

    /// Drops the latest reply and asks for a new one.
    pub async fn regenerate(
        &mut self,
        observer: TurnObserver<'_>,
    ) -> Result<TurnOutcome, ControllerError> {
        self.rewind_to_last_user()?;
        Ok(self.run_turn(observer).await)
    }

    /// Asks the engine for a short title and applies it when it sanitizes
    /// cleanly. Failures leave the current title in place.
    pub async fn generate_title(&mut self) -> Option<String> {
        let messages = &self.session.messages;
        let user = messages.iter().find(|message| message.role == Role::User)?;
        let assistant = messages
            .iter()
            .find(|message| message.role == Role::Assistant && !message.cancelled)?;
        let request = title_request(&self.settings, &user.content, &assistant.content);

        let mut raw = String::new();
        let result = self
            .stream_registered(&request, &mut |event: StreamEvent| {
                if let StreamEvent::Content { text } = event {
                    raw.push_str(&text);
                }
            })
            .await;
        if let Err(interruption) = result {
            tracing::debug!(?interruption, "title generation skipped");
            return None;
        }

        let title = sanitize_title(&raw)?;
        self.session.title = title.clone();
        self.persist();
        Some(title)
    }

    /// Starts an empty session; it is saved once it has a message.
    pub fn new_session(&mut self) -> &Session {
        self.switch_to(Session::fresh());
        &self.session
    }

    pub fn open_session(&mut self, id: &SessionId) -> Result<&Session, ControllerError> {
        let store = self.require_store()?;
        let session = {
            let mut store = lock_unpoisoned(&store);
            let session = store.load(id).map_err(|error| match error {
                SessionStoreError::NotFound { .. } => {
                    ControllerError::UnknownSession { id: id.clone() }
                }
                other => other.into(),
            })?;
            store.set_active(Some(id))?;
            session
        };
        self.switch_to(session);
        Ok(&self.session)
    }

    /// Deletes a session. Deleting the current one moves to the most recent
    /// remaining session, or a fresh one when none is left.
    pub fn delete_session(&mut self, id: &SessionId) -> Result<bool, ControllerError> {
        let store = self.require_store()?;
        let (existed, fallback) = {
            let mut store = lock_unpoisoned(&store);
            let existed = store.delete(id)?;
            let fallback = store
                .most_recent()
                .cloned()
                .and_then(|recent| store.load(&recent).ok());
            (existed, fallback)
        };

        if &self.session.id == id {
            let next = fallback.unwrap_or_else(Session::fresh);
            tracing::info!(deleted = %id, next = %next.id, "deleted current session");
            self.switch_to(next);
            if !self.session.is_empty() {
                self.persist_active();
            }
        }
        Ok(existed)
    }

    async fn run_turn(&mut self, observer: TurnObserver<'_>) -> TurnOutcome {
        let request = self.settings.to_request(&self.session.messages);
        let mut reducer = SessionReducer::new();

        let result = self
            .stream_registered(&request, &mut |event: StreamEvent| {
                observer(&event);
                reducer.apply(event);
            })
            .await;
        match result {
            Ok(()) => {}
            Err(TurnInterruption::Cancelled) => {
                reducer.cancel();
            }
            Err(TurnInterruption::Transport(message)) => reducer.fail_transport(message),
        }

        let outcome = reducer.finish();
        tracing::info!(
            session = %self.session.id,
            status = ?outcome.status,
            chars = outcome.content.len(),
            tools = outcome.tools.len(),
            "turn finished"
        );

        self.session.usage.accumulate(outcome.usage);
        if let Some(message) = outcome.durable_message(now_millis()) {
            self.session.messages.push(message);
        }
        self.last_status = Some(outcome.status);
        self.persist();
        outcome
    }

    /// Streams `request` with a fresh cancellation flag visible to
    /// [`TurnCanceller`] for the duration of the call.
    async fn stream_registered(
        &self,
        request: &ChatRequest,
        on_event: &mut (dyn FnMut(StreamEvent) + Send),
    ) -> Result<(), TurnInterruption> {
        let cancel: CancellationSignal = Arc::new(AtomicBool::new(false));
        *lock_unpoisoned(&self.in_flight) = Some(Arc::clone(&cancel));

        let result = self.transport.stream_turn(request, &cancel, on_event).await;

        lock_unpoisoned(&self.in_flight).take();
        match result {
            Ok(()) if cancel.load(Ordering::SeqCst) => Err(TurnInterruption::Cancelled),
            other => other,
        }
    }

    fn wants_title(&self, outcome: &TurnOutcome) -> bool {
        self.settings.auto_title
            && outcome.status == TurnStatus::Completed
            && self.session.messages.len() == 2
    }

    fn rewind_to_last_user(&mut self) -> Result<(), ControllerError> {
        let last_user = self
            .session
            .messages
            .iter()
            .rposition(|message| message.role == Role::User)
            .ok_or(ControllerError::NothingToRetry)?;
        self.session.messages.truncate(last_user + 1);
        Ok(())
    }

    fn switch_to(&mut self, session: Session) {
        self.session = session;
        self.last_status = None;
        if self.store.is_some() {
            self.persistence = Persistence::Durable;
        }
    }

    fn require_store(&self) -> Result<Arc<Mutex<SessionStore>>, ControllerError> {
        match (&self.store, &self.persistence) {
            (Some(store), _) => Ok(Arc::clone(store)),
            (None, Persistence::Degraded { reason }) => Err(ControllerError::StoreUnavailable {
                reason: reason.clone(),
            }),
            (None, Persistence::Durable) => Err(ControllerError::StoreUnavailable {
                reason: "no session store attached".to_owned(),
            }),
        }
    }

    fn persist(&mut self) {
        if self.session.is_empty() || !self.persistence.is_durable() {
            return;
        }
        let Some(store) = self.store.as_ref() else {
            return;
        };

        let result = save_and_activate(&mut lock_unpoisoned(store), &self.session);
        if let Err(error) = result {
            tracing::warn!(session = %self.session.id, %error, "session write failed; continuing in memory");
            self.persistence = Persistence::Degraded {
                reason: error.to_string(),
            };
        }
    }

    fn persist_active(&mut self) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        if let Err(error) = lock_unpoisoned(store).set_active(Some(&self.session.id)) {
            tracing::warn!(%error, "could not record active session");
        }
    }
}

fn save_and_activate(store: &mut SessionStore, session: &Session) -> Result<(), SessionStoreError> {
    store.save(session)?;
    if store.active() != Some(&session.id) {
        store.set_active(Some(&session.id))?;
    }
    Ok(())
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
