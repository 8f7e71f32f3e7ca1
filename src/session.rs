//! Translation session actor.
//!
//! One tokio task owns the tracker, the save controller and the in-flight
//! save request. Everything else talks to it through a [`SessionHandle`].
//! The task wakes up for commands, for the completion of the in-flight save
//! and for the earliest timer deadline (change debounce, save throttle or
//! save retry).

use crate::api::{ApiError, SaveApi, SaveResponse};
use crate::config::Config;
use crate::events::{EventBus, SessionEvent};
use crate::publish::{PublishContext, SaveGateway};
use crate::save::{
    FlushDecision, FlushTrigger, SaveController, SaveError, SaveMetrics, SaveReceipt,
    SaveSettings, SectionPayload,
};
use crate::section::SectionNumber;
use crate::surface::TargetSurface;
use crate::tracker::{ProcessedChange, TrackerSettings, TranslationProgress, TranslationTracker};
use crate::translation::Translation;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

const COMMAND_BUFFER: usize = 64;

type SaveResult = Result<Option<SaveReceipt>, SaveError>;

/// Tunables of a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSettings {
    pub tracker: TrackerSettings,
    pub save: SaveSettings,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            tracker: config.tracker_settings(),
            save: config.save_settings(),
        }
    }
}

enum Command {
    SectionChanged(String),
    SetTargetTitle(String),
    SetTargetCategories(Vec<String>),
    Rebind { old_id: String, new_id: String },
    SaveNow(FlushTrigger, oneshot::Sender<SaveResult>),
    Unload(oneshot::Sender<Option<&'static str>>),
    Progress(oneshot::Sender<TranslationProgress>),
    Snapshot(oneshot::Sender<Translation>),
    Shutdown(oneshot::Sender<()>),
}

struct InFlightSave {
    request_id: u64,
    handle: JoinHandle<Result<SaveResponse, ApiError>>,
}

/// Start a session for a translation.
pub fn spawn(
    translation: Translation,
    surface: Arc<dyn TargetSurface>,
    api: Arc<dyn SaveApi>,
    settings: SessionSettings,
    events: EventBus,
) -> SessionHandle {
    let tracker = TranslationTracker::new(&translation, surface, events.clone(), settings.tracker);
    let controller = SaveController::new(&translation, settings.save, events.clone());
    let metrics = controller.metrics();
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);

    info!(
        "Starting translation session {} -> {} ({} to {})",
        translation.source_title,
        translation.target_title,
        translation.source_language.code(),
        translation.target_language.code()
    );

    let actor = SessionActor {
        translation,
        tracker,
        controller,
        api,
        in_flight: None,
        waiters: Vec::new(),
        commands: rx,
    };
    tokio::spawn(actor.run());

    SessionHandle {
        tx,
        metrics,
        events,
    }
}

struct SessionActor {
    translation: Translation,
    tracker: TranslationTracker,
    controller: SaveController,
    api: Arc<dyn SaveApi>,
    in_flight: Option<InFlightSave>,
    /// Forced saves waiting for the next completed request
    waiters: Vec<oneshot::Sender<SaveResult>>,
    commands: mpsc::Receiver<Command>,
}

impl SessionActor {
    async fn run(mut self) {
        let mut shutdown_ack = None;

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown(ack)) => {
                        shutdown_ack = Some(ack);
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                (request_id, outcome) = wait_for_save(&mut self.in_flight) => {
                    self.on_save_outcome(request_id, outcome);
                }
                _ = sleep_until_deadline(deadline) => self.on_timer(Instant::now()),
            }
        }

        if let Some(in_flight) = self.in_flight.take() {
            warn!(
                "Session closed while save request {} was running",
                in_flight.request_id
            );
            in_flight.handle.abort();
        }
        self.resolve_waiters(Err(SaveError::SessionClosed));
        info!("Translation session for {} stopped", self.translation.source_title);

        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.tracker.next_deadline(), self.controller.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn handle_command(&mut self, command: Command) {
        let now = Instant::now();
        match command {
            Command::SectionChanged(id) => {
                self.tracker.add_to_change_queue(&id, now);
            }
            Command::SetTargetTitle(title) => {
                if self.translation.set_target_title(&title) {
                    info!("Target title changed to {}", title);
                    if self.controller.schedule(now) {
                        self.flush(FlushTrigger::Scheduled);
                    }
                }
            }
            Command::SetTargetCategories(categories) => {
                if self.translation.set_target_categories(categories) {
                    debug!("Target categories changed");
                    if self.controller.on_target_categories_changed(now) {
                        self.flush(FlushTrigger::Scheduled);
                    }
                }
            }
            Command::Rebind { old_id, new_id } => {
                match self.tracker.ids_mut().rebind(&old_id, new_id.clone()) {
                    Some(number) => debug!("Section {} is now {}", number, new_id),
                    None => debug!("Cannot rebind unknown section id {}", old_id),
                }
            }
            Command::SaveNow(trigger, reply) => {
                self.waiters.push(reply);
                self.flush(trigger);
            }
            Command::Unload(reply) => {
                self.process_changes(now);
                let warning = self.controller.on_unload();
                if warning.is_some() {
                    info!("Leaving with unsaved sections, saving now");
                    self.flush(FlushTrigger::Forced);
                }
                let _ = reply.send(warning);
            }
            Command::Progress(reply) => {
                if self.process_changes(now) {
                    self.flush(FlushTrigger::Scheduled);
                }
                let _ = reply.send(self.tracker.translation_progress());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.translation.clone());
            }
            Command::Shutdown(_) => {}
        }
    }

    fn on_timer(&mut self, now: Instant) {
        let changes = self.tracker.on_timer(now);
        if self.queue_changes(changes, now) {
            self.flush(FlushTrigger::Scheduled);
        }
        for trigger in self.controller.on_timer(now) {
            self.flush(trigger);
        }
    }

    /// Process pending surface changes and queue them for saving. Returns
    /// true when a save should run right away.
    fn process_changes(&mut self, now: Instant) -> bool {
        let changes = self.tracker.process_change_queue();
        self.queue_changes(changes, now)
    }

    fn queue_changes(&mut self, changes: Vec<ProcessedChange>, now: Instant) -> bool {
        let mut run_now = false;
        for change in changes {
            let Some(source) = self.translation.section(change.section_number) else {
                continue;
            };
            let payload = SectionPayload::new(
                change.section_number,
                change.snapshot.html,
                change.snapshot.mt_provider.as_deref(),
                source.content.clone(),
            );
            run_now |= self.controller.queue_section(payload, now);
        }
        run_now
    }

    fn flush(&mut self, trigger: FlushTrigger) {
        self.process_changes(Instant::now());
        let progress = self.tracker.translation_progress();

        match self.controller.flush(trigger, &self.translation, progress) {
            Ok(FlushDecision::Idle) => {
                if self.in_flight.is_none() {
                    self.resolve_waiters(Ok(None));
                }
            }
            Ok(FlushDecision::Skipped) => {}
            Ok(FlushDecision::Dispatch(prepared)) => {
                if let Some(previous) = self.in_flight.take() {
                    debug!(
                        "Request {} superseded by {}",
                        previous.request_id, prepared.request_id
                    );
                    previous.handle.abort();
                }

                let api = self.api.clone();
                let request = prepared.request;
                let handle = tokio::spawn(async move { api.save(&request).await });
                self.in_flight = Some(InFlightSave {
                    request_id: prepared.request_id,
                    handle,
                });
            }
            Err(e) => {
                error!("Failed to prepare save: {}", e);
                self.resolve_waiters(Err(e));
            }
        }
    }

    fn on_save_outcome(&mut self, request_id: u64, outcome: Result<SaveResponse, ApiError>) {
        match outcome {
            Ok(response) => {
                if let Some(receipt) = self.controller.on_save_success(request_id, &response) {
                    if let Some(id) = receipt.translation_id {
                        if self.translation.id != Some(id) {
                            info!("Translation stored with id {}", id);
                        }
                        self.translation.id = Some(id);
                    }
                    self.resolve_waiters(Ok(Some(receipt)));
                }
            }
            Err(e) => {
                if let Some(err) = self.controller.on_save_failure(request_id, &e, Instant::now()) {
                    self.resolve_waiters(Err(err));
                }
            }
        }
    }

    fn resolve_waiters(&mut self, result: SaveResult) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }
}

/// Completion of the in-flight save. Never resolves while nothing is in
/// flight. Dropping the future leaves the request running.
async fn wait_for_save(
    in_flight: &mut Option<InFlightSave>,
) -> (u64, Result<SaveResponse, ApiError>) {
    let Some(save) = in_flight.as_mut() else {
        return std::future::pending().await;
    };
    let outcome = match (&mut save.handle).await {
        Ok(result) => result,
        Err(e) => Err(ApiError::Task(e.to_string())),
    };
    let request_id = save.request_id;
    *in_flight = None;
    (request_id, outcome)
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Cloneable handle to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
    metrics: Arc<SaveMetrics>,
    events: EventBus,
}

impl SessionHandle {
    async fn send(&self, command: Command) -> Result<(), SaveError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SaveError::SessionClosed)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SaveError> {
        let (reply, response) = oneshot::channel();
        self.send(command(reply)).await?;
        response.await.map_err(|_| SaveError::SessionClosed)
    }

    /// The surface changed inside the element with this id.
    pub async fn section_changed(&self, section_id: impl Into<String>) -> Result<(), SaveError> {
        self.send(Command::SectionChanged(section_id.into())).await
    }

    pub async fn set_target_title(&self, title: impl Into<String>) -> Result<(), SaveError> {
        self.send(Command::SetTargetTitle(title.into())).await
    }

    pub async fn set_target_categories(&self, categories: Vec<String>) -> Result<(), SaveError> {
        self.send(Command::SetTargetCategories(categories)).await
    }

    /// A section element was rebuilt under a new id.
    pub async fn rebind_section(
        &self,
        old_id: impl Into<String>,
        new_id: impl Into<String>,
    ) -> Result<(), SaveError> {
        self.send(Command::Rebind {
            old_id: old_id.into(),
            new_id: new_id.into(),
        })
        .await
    }

    /// Save everything pending right away and wait for the result. While a
    /// retry is scheduled the save waits for that retry instead.
    pub async fn save_now(&self) -> SaveResult {
        self.request(|reply| Command::SaveNow(FlushTrigger::Forced, reply))
            .await?
    }

    /// The user is leaving. Returns the warning to show when sections were
    /// still unsaved; a save of them has been started.
    pub async fn unload(&self) -> Result<Option<&'static str>, SaveError> {
        self.request(Command::Unload).await
    }

    pub async fn progress(&self) -> Result<TranslationProgress, SaveError> {
        self.request(Command::Progress).await
    }

    /// Current state of the translation draft.
    pub async fn translation(&self) -> Result<Translation, SaveError> {
        self.request(Command::Snapshot).await
    }

    /// Everything needed to publish a section of this session.
    pub async fn publish_context(
        &self,
        section_number: SectionNumber,
        target_section_title: impl Into<String>,
        sub_sections: Vec<String>,
        is_sandbox: bool,
    ) -> Result<PublishContext, SaveError> {
        let translation = self.translation().await?;
        Ok(
            PublishContext::new(translation, section_number, target_section_title)
                .with_sub_sections(sub_sections)
                .with_sandbox(is_sandbox),
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn metrics(&self) -> Arc<SaveMetrics> {
        self.metrics.clone()
    }

    /// Stop the session. Pending forced saves fail with
    /// [`SaveError::SessionClosed`].
    pub async fn shutdown(&self) -> Result<(), SaveError> {
        self.request(Command::Shutdown).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait]
impl SaveGateway for SessionHandle {
    async fn force_save(&self) -> SaveResult {
        self.request(|reply| Command::SaveNow(FlushTrigger::Publish, reply))
            .await?
    }
}
