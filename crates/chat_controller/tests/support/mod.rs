use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};

use chat_controller::{ChatController, ChatSettings, ChatTransport, EventSink, TurnCanceller, TurnInterruption};
use engine_client::{CancellationSignal, ChatRequest};
use engine_contract::StreamEvent;
use futures_util::future::BoxFuture;
use session_store::SessionStore;
use tempfile::TempDir;

/// One scripted step of a fake engine turn.
#[derive(Debug, Clone)]
pub enum Step {
    Event(StreamEvent),
    /// Fires the registered canceller, as a user pressing Ctrl-C would.
    Cancel,
    Fail(&'static str),
}

pub fn content(text: &str) -> Step {
    Step::Event(StreamEvent::content(text))
}

pub fn done() -> Step {
    Step::Event(StreamEvent::Done)
}

#[derive(Default)]
pub struct ScriptedTransport {
    turns: Mutex<VecDeque<Vec<Step>>>,
    requests: Mutex<Vec<ChatRequest>>,
    canceller: Mutex<Option<TurnCanceller>>,
}

impl ScriptedTransport {
    pub fn new(turns: Vec<Vec<Step>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            ..Self::default()
        }
    }

    pub fn push_turn(&self, steps: Vec<Step>) {
        lock_unpoisoned(&self.turns).push_back(steps);
    }

    pub fn attach_canceller(&self, canceller: TurnCanceller) {
        *lock_unpoisoned(&self.canceller) = Some(canceller);
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        lock_unpoisoned(&self.requests).clone()
    }
}

impl ChatTransport for ScriptedTransport {
    fn stream_turn<'a>(
        &'a self,
        request: &'a ChatRequest,
        cancel: &'a CancellationSignal,
        on_event: EventSink<'a>,
    ) -> BoxFuture<'a, Result<(), TurnInterruption>> {
        Box::pin(async move {
            lock_unpoisoned(&self.requests).push(request.clone());
            let script = lock_unpoisoned(&self.turns).pop_front().unwrap_or_default();

            for step in script {
                if cancel.load(Ordering::SeqCst) {
                    return Err(TurnInterruption::Cancelled);
                }
                match step {
                    Step::Event(event) => on_event(event),
                    Step::Cancel => {
                        if let Some(canceller) = lock_unpoisoned(&self.canceller).as_ref() {
                            canceller.cancel();
                        }
                    }
                    Step::Fail(message) => {
                        return Err(TurnInterruption::Transport(message.to_owned()))
                    }
                }
            }

            if cancel.load(Ordering::SeqCst) {
                return Err(TurnInterruption::Cancelled);
            }
            Ok(())
        })
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub transport: Arc<ScriptedTransport>,
    pub store: Arc<Mutex<SessionStore>>,
    pub controller: ChatController,
}

pub fn quiet_settings() -> ChatSettings {
    ChatSettings {
        auto_title: false,
        ..ChatSettings::default()
    }
}

pub fn harness(turns: Vec<Vec<Step>>) -> Harness {
    harness_with(turns, quiet_settings())
}

pub fn harness_with(turns: Vec<Vec<Step>>, settings: ChatSettings) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let store = Arc::new(Mutex::new(
        SessionStore::open(dir.path()).expect("store should open"),
    ));
    let transport = Arc::new(ScriptedTransport::new(turns));
    let controller = ChatController::new(transport.clone(), Arc::clone(&store), settings);
    transport.attach_canceller(controller.canceller());
    Harness {
        dir,
        transport,
        store,
        controller,
    }
}

pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
