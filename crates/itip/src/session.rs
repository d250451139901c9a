/*
 * SPDX-FileCopyrightText: 2025 Halcyon Groupware Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::{
    backend::{CAP_SAVE_SCHEDULES, ClientOpener, ItipSender, MailFlags},
    error::EngineError,
    lookup::LookupEngine,
    machine::{
        CommitKind, Effect, EngineEvent, Machine, MessageContext, NeedsConfirmation, Severity,
        UserDecision,
    },
};
use calcard::icalendar::{ICalendar, ICalendarMethod};
use registry::{Registry, SourceId};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Commands the engine cannot execute itself; the embedding UI drains
/// them after every interaction.
#[derive(Debug, Clone)]
pub enum UiCommand {
    OpenCalendar { start: i64, end: i64 },
    SaveAttachment { content: String },
}

/// Drives one displayed invitation: owns the backend handles, executes
/// the machine's effects and feeds their completions back in. All RPC
/// fan-out runs under a cancellation token scoped to this session, so
/// tearing the view down stops every outstanding query at once.
pub struct Session {
    registry: Arc<Registry>,
    lookup: LookupEngine,
    opener: Arc<dyn ClientOpener>,
    sender: Arc<dyn ItipSender>,
    mail: Arc<dyn MailFlags>,
    machine: Machine,
    cancel: watch::Sender<bool>,
    ui_commands: Vec<UiCommand>,
    confirmation: Option<NeedsConfirmation>,
    /// The committed source schedules replies itself; outgoing REPLYs are
    /// dropped instead of duplicated.
    backend_schedules: bool,
}

impl Session {
    pub async fn open(
        registry: Arc<Registry>,
        opener: Arc<dyn ClientOpener>,
        sender: Arc<dyn ItipSender>,
        mail: Arc<dyn MailFlags>,
        context: MessageContext,
        raw: &str,
    ) -> Session {
        let (machine, effects) = Machine::new(registry.clone(), context, raw);
        let (cancel, _) = watch::channel(false);
        let mut session = Session {
            registry,
            lookup: LookupEngine::new(opener.clone()),
            opener,
            sender,
            mail,
            machine,
            cancel,
            ui_commands: Vec::new(),
            confirmation: None,
            backend_schedules: false,
        };
        session.run(effects).await;
        session
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Stops every query still in flight. Lookup results and commit
    /// callbacks arriving afterwards are dropped by the machine.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    pub async fn decide(&mut self, decision: UserDecision) {
        let effects = self.machine.handle(EngineEvent::UserDecided(decision));
        self.run(effects).await;
    }

    pub async fn confirm(&mut self, confirmed: bool) {
        self.confirmation = None;
        let effects = self.machine.handle(EngineEvent::ConfirmAnswered { confirmed });
        self.run(effects).await;
    }

    pub async fn select_source(&mut self, source: SourceId) {
        let effects = self.machine.handle(EngineEvent::SourceSelected(source));
        self.run(effects).await;
    }

    /// The confirmation the flow is suspended on, when any.
    pub fn pending_confirmation(&self) -> Option<&NeedsConfirmation> {
        self.confirmation.as_ref()
    }

    pub fn take_ui_commands(&mut self) -> Vec<UiCommand> {
        std::mem::take(&mut self.ui_commands)
    }

    async fn run(&mut self, mut effects: Vec<Effect>) {
        while !effects.is_empty() {
            let mut next = Vec::new();
            for effect in effects {
                match effect {
                    Effect::StartLookup {
                        generation,
                        request,
                    } => {
                        let result = self
                            .lookup
                            .find_current(&self.registry, &request, self.cancel.subscribe())
                            .await;
                        next.extend(self.machine.handle(EngineEvent::LookupCompleted {
                            generation,
                            result,
                        }));
                    }
                    Effect::Commit {
                        generation,
                        source,
                        document,
                        kind,
                    } => {
                        let outcome = self.execute_commit(&source, &document, kind).await;
                        next.extend(self.machine.handle(EngineEvent::CommitCompleted {
                            generation,
                            outcome,
                        }));
                    }
                    Effect::Send(message) => {
                        if self.backend_schedules
                            && matches!(message.method, ICalendarMethod::Reply)
                        {
                            debug!("reply suppressed, the backend schedules it");
                            continue;
                        }
                        if let Err(err) = self.sender.send(&message).await {
                            warn!(
                                method = ?message.method,
                                message = err.to_string().as_str(),
                                "scheduling message could not be sent"
                            );
                            self.machine.note(
                                Severity::Error,
                                EngineError::SendFailed(err.to_string()).to_string(),
                            );
                        }
                    }
                    Effect::AskConfirmation(request) => {
                        self.confirmation = Some(request);
                    }
                    Effect::MarkAnswered => {
                        if let Err(err) = self.mail.mark_answered().await {
                            warn!(
                                message = err.to_string().as_str(),
                                "unable to flag the message as answered"
                            );
                        }
                    }
                    Effect::DeleteMessage => {
                        if let Err(err) = self.mail.delete_message().await {
                            warn!(
                                message = err.to_string().as_str(),
                                "unable to delete the processed message"
                            );
                        }
                    }
                    Effect::OpenCalendar { start, end } => {
                        self.ui_commands.push(UiCommand::OpenCalendar { start, end });
                    }
                    Effect::SaveAttachment { content } => {
                        self.ui_commands.push(UiCommand::SaveAttachment { content });
                    }
                }
            }
            effects = next;
        }
    }

    async fn execute_commit(
        &mut self,
        source: &SourceId,
        document: &ICalendar,
        kind: CommitKind,
    ) -> Result<(), EngineError> {
        let commit_failed = |err: crate::backend::BackendError| EngineError::CommitFailed {
            source_id: source.clone(),
            message: err.to_string(),
        };
        let client = self.opener.open(source).await.map_err(commit_failed)?;
        match kind {
            CommitKind::Receive => {
                self.backend_schedules = client.has_capability(CAP_SAVE_SCHEDULES).await;
                client.receive_objects(document).await.map_err(commit_failed)
            }
            CommitKind::Modify(scope) => client
                .modify_object(document, scope)
                .await
                .map_err(commit_failed),
        }
    }
}
