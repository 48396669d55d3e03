//! Async driver around the reducer.
//!
//! The session owns [`ChatState`] and is the only place that performs IO on
//! its behalf: it opens the chat stream for each turn, runs the one-second
//! countdown ticker and executes create/delete requests. Every result flows
//! back into [`reduce`] on the caller's task, so state is never touched
//! concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fieldhand_client::{ApiError, ChatClient, ChatRequest, FarmApi, StreamError, StreamSignal};
use fieldhand_types::{EntityKey, PendingAction, PendingTask, RecordKind, StreamEvent, TurnId};
use tokio::sync::{broadcast, mpsc};
use tokio::task::{Id, JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::confirmation::{ConfirmationBoard, DEFAULT_AUTO_CONFIRM_SECS};
use crate::state::{Action, ChatState, Effect, Notice, RequestKind, reduce};

const STREAM_CHANNEL_CAPACITY: usize = 256;
const TASKS_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub auto_confirm_secs: u32,
    pub auto_confirm: bool,
    /// Countdown granularity. One second outside tests.
    pub tick: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            auto_confirm_secs: DEFAULT_AUTO_CONFIRM_SECS,
            auto_confirm: true,
            tick: Duration::from_secs(1),
        }
    }
}

/// What `next_update` observed.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Stream(StreamEvent),
    TurnFinished,
    TurnFailed,
    Tick,
    /// A create or delete request completed.
    Settled(EntityKey),
}

enum Woke {
    Signal(Option<StreamSignal>),
    Request(Result<(Id, Action), JoinError>),
    Tick,
}

struct ActiveStream {
    turn: TurnId,
    rx: mpsc::Receiver<StreamSignal>,
    task: JoinHandle<()>,
}

pub struct Session {
    state: ChatState,
    client: ChatClient,
    api: Arc<dyn FarmApi>,
    stream: Option<ActiveStream>,
    requests: JoinSet<Action>,
    /// Which entity each request task settles, for tasks that never return.
    in_flight: HashMap<Id, (EntityKey, RequestKind)>,
    ticker: Interval,
    tasks_tx: broadcast::Sender<Vec<PendingTask>>,
    notices: Vec<Notice>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("streaming", &self.stream.as_ref().map(|s| s.turn))
            .field("requests_in_flight", &self.requests.len())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Must be called from within a tokio runtime (the ticker registers with its timer).
    #[must_use]
    pub fn new(client: ChatClient, api: Arc<dyn FarmApi>, options: &SessionOptions) -> Self {
        let period = if options.tick.is_zero() {
            Duration::from_secs(1)
        } else {
            options.tick
        };
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let (tasks_tx, _) = broadcast::channel(TASKS_CHANNEL_CAPACITY);

        Self {
            state: ChatState::new(ConfirmationBoard::new(
                options.auto_confirm_secs,
                options.auto_confirm,
            )),
            client,
            api,
            stream: None,
            requests: JoinSet::new(),
            in_flight: HashMap::new(),
            ticker,
            tasks_tx,
            notices: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &ChatState {
        &self.state
    }

    /// Receive every batch of tasks scheduled by the assistant from now on.
    #[must_use]
    pub fn subscribe_tasks(&self) -> broadcast::Receiver<Vec<PendingTask>> {
        self.tasks_tx.subscribe()
    }

    /// Notices produced since the last call.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    #[must_use]
    pub fn requests_in_flight(&self) -> usize {
        self.requests.len()
    }

    /// Populate the field directory used to name fields on pending entities.
    pub async fn load_fields(&mut self) -> Result<usize, ApiError> {
        let fields = self.api.list_fields().await?;
        let count = fields.len();
        self.dispatch(Action::FieldsLoaded(fields));
        Ok(count)
    }

    /// Start a turn. Returns `false` if it was rejected (see notices).
    pub fn send(&mut self, text: impl Into<String>) -> bool {
        let before = self.state.is_streaming();
        self.dispatch(Action::Submit { text: text.into() });
        !before && self.state.is_streaming()
    }

    pub fn confirm(&mut self, key: EntityKey) {
        self.dispatch(Action::Confirm(key));
    }

    pub fn cancel(&mut self, key: EntityKey) {
        self.dispatch(Action::Cancel(key));
    }

    pub fn undo(&mut self, key: EntityKey) {
        self.dispatch(Action::Undo(key));
    }

    pub fn set_auto_confirm(&mut self, key: EntityKey, enabled: bool) {
        self.dispatch(Action::SetAutoConfirm { key, enabled });
    }

    pub fn dismiss(&mut self, key: EntityKey) {
        self.dispatch(Action::Dismiss(key));
    }

    pub fn retry_last_failed(&mut self) {
        self.dispatch(Action::RetryLastFailed);
    }

    /// Wait for the next stream signal, countdown tick or settled request and apply it.
    pub async fn next_update(&mut self) -> Update {
        loop {
            let woke = tokio::select! {
                signal = recv_signal(self.stream.as_mut()) => Woke::Signal(signal),
                Some(joined) = self.requests.join_next_with_id(), if !self.requests.is_empty() => {
                    Woke::Request(joined)
                }
                _ = self.ticker.tick() => Woke::Tick,
            };

            let (action, update) = match woke {
                Woke::Signal(signal) => self.on_signal(signal),
                Woke::Request(Ok((id, action))) => {
                    self.in_flight.remove(&id);
                    let key = settled_key(&action);
                    (action, Update::Settled(key))
                }
                Woke::Request(Err(e)) => match self.on_request_lost(&e) {
                    Some(action) => {
                        let key = settled_key(&action);
                        (action, Update::Settled(key))
                    }
                    None => continue,
                },
                Woke::Tick => (Action::Tick, Update::Tick),
            };
            self.dispatch(action);
            return update;
        }
    }

    /// A request task panicked or was aborted. Settle its entity as failed.
    fn on_request_lost(&mut self, error: &JoinError) -> Option<Action> {
        let Some((key, request)) = self.in_flight.remove(&error.id()) else {
            tracing::error!(error = %error, "Untracked request task did not complete");
            return None;
        };
        tracing::error!(%key, error = %error, "Request task did not complete");
        let outcome = format!("request task failed: {error}");
        Some(match request {
            RequestKind::Create => Action::CreateSettled {
                key,
                outcome: Err(outcome),
            },
            RequestKind::Delete => Action::DeleteSettled {
                key,
                outcome: Err(outcome),
            },
        })
    }

    fn on_signal(&mut self, signal: Option<StreamSignal>) -> (Action, Update) {
        let turn = self.stream.as_ref().map_or(TurnId::new(0), |s| s.turn);
        match signal {
            Some(StreamSignal::Event(event)) => (
                Action::Stream {
                    turn,
                    event: event.clone(),
                },
                Update::Stream(event),
            ),
            Some(StreamSignal::Finished) => {
                self.stream = None;
                (Action::StreamFinished { turn }, Update::TurnFinished)
            }
            Some(StreamSignal::Failed(error)) => {
                self.stream = None;
                (Action::StreamFailed { turn, error }, Update::TurnFailed)
            }
            None => {
                self.stream = None;
                let error = StreamError::Read("stream task ended without a result".to_string());
                (Action::StreamFailed { turn, error }, Update::TurnFailed)
            }
        }
    }

    fn dispatch(&mut self, action: Action) {
        let was_counting = self.state.board().has_running_countdown();
        let mut queue = vec![action];
        while let Some(action) = queue.pop() {
            for effect in reduce(&mut self.state, action) {
                if let Some(follow_up) = self.execute(effect) {
                    queue.push(follow_up);
                }
            }
        }
        // The first countdown gets a full period before its first tick.
        // Later entries share the running phase and may lose up to one period.
        if !was_counting && self.state.board().has_running_countdown() {
            self.ticker.reset();
        }
    }

    /// Run one effect. Returns an action to feed back immediately, if any.
    fn execute(&mut self, effect: Effect) -> Option<Action> {
        match effect {
            Effect::OpenStream { turn, request } => {
                self.open_stream(turn, request);
                None
            }
            Effect::CreateRecord { key, action } => self.spawn_create(key, &action),
            Effect::DeleteRecord {
                key,
                kind,
                server_id,
            } => {
                self.spawn_delete(key, kind, server_id);
                None
            }
            Effect::TasksScheduled(tasks) => {
                // No subscribers is fine.
                let _ = self.tasks_tx.send(tasks);
                None
            }
            Effect::Notify(notice) => {
                tracing::debug!(%notice, "Notice");
                self.notices.push(notice);
                None
            }
        }
    }

    fn open_stream(&mut self, turn: TurnId, request: ChatRequest) {
        if let Some(previous) = self.stream.take() {
            previous.task.abort();
        }
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let client = self.client.clone();
        let task = tokio::spawn(async move {
            client.stream_turn(&request, tx).await;
        });
        self.stream = Some(ActiveStream { turn, rx, task });
    }

    fn spawn_create(&mut self, key: EntityKey, action: &PendingAction) -> Option<Action> {
        let kind = action.record_kind();
        let body = match action.to_request_body() {
            Ok(body) => body,
            Err(e) => {
                let error = ApiError::Encode(e.to_string());
                return Some(Action::CreateSettled {
                    key,
                    outcome: Err(error.to_string()),
                });
            }
        };
        let api = Arc::clone(&self.api);
        let handle = self.requests.spawn(async move {
            let outcome = api
                .create(kind, body)
                .await
                .map(|record| record.id)
                .map_err(|e| {
                    tracing::warn!(%key, error = %e, "Create failed");
                    e.to_string()
                });
            Action::CreateSettled { key, outcome }
        });
        self.in_flight.insert(handle.id(), (key, RequestKind::Create));
        None
    }

    fn spawn_delete(&mut self, key: EntityKey, kind: RecordKind, server_id: String) {
        let api = Arc::clone(&self.api);
        let handle = self.requests.spawn(async move {
            let outcome = api.delete(kind, &server_id).await.map_err(|e| {
                tracing::warn!(%key, error = %e, "Delete failed");
                e.to_string()
            });
            Action::DeleteSettled { key, outcome }
        });
        self.in_flight.insert(handle.id(), (key, RequestKind::Delete));
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.task.abort();
        }
        // JoinSet aborts outstanding requests on drop; the ticker goes with self.
    }
}

async fn recv_signal(stream: Option<&mut ActiveStream>) -> Option<StreamSignal> {
    match stream {
        Some(stream) => stream.rx.recv().await,
        None => std::future::pending().await,
    }
}

fn settled_key(action: &Action) -> EntityKey {
    match action {
        Action::CreateSettled { key, .. } | Action::DeleteSettled { key, .. } => *key,
        _ => EntityKey::new(0),
    }
}
