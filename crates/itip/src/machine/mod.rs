/*
 * SPDX-FileCopyrightText: 2025 Halcyon Groupware Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::{
    backend::{ObjectScope, OutboundMessage},
    error::EngineError,
    identity::{self, ResolvedIdentity, ResolvedSender},
    invitation::Invitation,
    lookup::{CalendarMatch, LookupRequest, StoredCopy},
};
use calcard::icalendar::{ICalendar, ICalendarMethod, ICalendarParticipationStatus};
use registry::{FolderKind, ItemKind, Registry, SourceId};
use std::sync::Arc;
use tracing::debug;

pub mod respond;
pub mod update;

/// What the view renders. Mirrors the METHOD of the invitation, with
/// `Error`, `HideAll` and `Obsolete` overriding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Error,
    HideAll,
    Publish,
    Request,
    Reply,
    Add,
    Cancel,
    Refresh,
    Counter,
    DeclineCounter,
    Obsolete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Progress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoItem {
    pub severity: Severity,
    pub text: String,
}

/// Where the mail message sits; invitations in sent or discarded folders
/// are informational only.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub folder: FolderKind,
    pub account: Option<String>,
    /// Address the folder's account receives mail on, tried first when
    /// resolving the receiving identity.
    pub identity_hint: Option<String>,
}

/// Response options chosen by the user alongside a decision.
#[derive(Debug, Clone, Default)]
pub struct ResponseOptions {
    /// Apply to every instance of a recurring item, not just this one.
    pub apply_to_all: bool,
    /// Send the reply back to the organizer.
    pub send_reply: bool,
    pub comment: Option<String>,
    /// Keep the reminders already set on the stored copy.
    pub keep_stored_reminder: bool,
    /// Take over the reminders the invitation itself carries.
    pub inherit_reminder: bool,
}

#[derive(Debug, Clone)]
pub enum UserDecision {
    Accept(ResponseOptions),
    Tentative(ResponseOptions),
    Decline(ResponseOptions),
    /// Commit the invitation without responding: CANCEL and ADD flows.
    Commit(ResponseOptions),
    /// Fold the attendee status of a REPLY or COUNTER into the stored
    /// copy, optionally re-sending the updated item to all attendees.
    UpdateAttendeeStatus { send_updates: bool },
    /// Refuse a counter proposal.
    DeclineCounterProposal,
    /// Send the stored copy back to whoever asked for a refresh.
    SendLatestInformation,
    OpenCalendar,
    SaveAttachment,
}

/// Confirmation requests raised mid-flow. The flow suspends until the
/// answer comes back as an event; no dialog is owned by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmKind {
    /// A reply arrived from an address that is not on the attendee list.
    UnknownAttendee { address: String },
    /// A delegate declined; their entry can be dropped from the item.
    RemoveDelegate { address: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeedsConfirmation {
    pub kind: ConfirmKind,
    pub summary: Option<String>,
}

/// Everything that can wake the machine up. The driver folds completions
/// of its own effect executions back in through here as well.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    LookupCompleted {
        generation: u64,
        result: CalendarMatch,
    },
    UserDecided(UserDecision),
    CommitCompleted {
        generation: u64,
        outcome: Result<(), EngineError>,
    },
    ConfirmAnswered {
        confirmed: bool,
    },
    SourceSelected(SourceId),
}

/// Side effects the driver must execute. The machine itself never touches
/// a backend.
#[derive(Debug, Clone)]
pub enum Effect {
    StartLookup {
        generation: u64,
        request: LookupRequest,
    },
    Commit {
        generation: u64,
        source: SourceId,
        document: ICalendar,
        kind: CommitKind,
    },
    Send(OutboundMessage),
    AskConfirmation(NeedsConfirmation),
    MarkAnswered,
    DeleteMessage,
    OpenCalendar {
        start: i64,
        end: i64,
    },
    SaveAttachment {
        content: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitKind {
    Receive,
    Modify(ObjectScope),
}

#[derive(Debug, Clone)]
enum Phase {
    Idle,
    AwaitingLookup,
    Ready,
    Committing {
        followup: Vec<Effect>,
        success: String,
    },
    AwaitingConfirm { pending: update::PendingUpdate },
    Done,
}

/// Pure response state machine for one displayed invitation. Fed with
/// `EngineEvent`s, returns the effects to run; all I/O lives in the
/// driver.
pub struct Machine {
    registry: Arc<Registry>,
    context: MessageContext,
    pub invitation: Option<Invitation>,
    pub identity: Option<ResolvedIdentity>,
    pub sender: Option<ResolvedSender>,
    mode: ViewMode,
    phase: Phase,
    generation: u64,
    current: Option<StoredCopy>,
    selected_source: Option<SourceId>,
    writable: Vec<SourceId>,
    info: Vec<InfoItem>,
}

impl Machine {
    /// Parses the invitation and produces the initial effects, normally a
    /// single lookup fan-out.
    pub fn new(
        registry: Arc<Registry>,
        context: MessageContext,
        raw: &str,
    ) -> (Machine, Vec<Effect>) {
        let mut machine = Machine {
            registry,
            context,
            invitation: None,
            identity: None,
            sender: None,
            mode: ViewMode::Error,
            phase: Phase::Idle,
            generation: 0,
            current: None,
            selected_source: None,
            writable: Vec::new(),
            info: Vec::new(),
        };

        let invitation = match Invitation::parse(raw) {
            Ok(invitation) => invitation,
            Err(err) => {
                machine.fail(err.to_string());
                return (machine, Vec::new());
            }
        };

        if invitation.is_multi_item() {
            machine.info.push(InfoItem {
                severity: Severity::Error,
                text: EngineError::MultiItemPayload.to_string(),
            });
            machine.invitation = Some(invitation);
            machine.phase = Phase::Done;
            return (machine, Vec::new());
        }

        machine.identity = identity::resolve_to_address(
            &machine.registry,
            &invitation,
            machine.context.identity_hint.as_deref(),
        );
        machine.sender = identity::resolve_from_address(&invitation);
        machine.mode = if machine.context.folder.suppresses_actions() {
            ViewMode::HideAll
        } else {
            mode_for(&invitation)
        };
        debug!(
            uid = invitation.uid.as_str(),
            method = ?invitation.method,
            mode = ?machine.mode,
            "invitation ingested"
        );

        let effects = if machine.mode == ViewMode::HideAll {
            machine.phase = Phase::Done;
            Vec::new()
        } else {
            machine.generation += 1;
            machine.phase = Phase::AwaitingLookup;
            vec![Effect::StartLookup {
                generation: machine.generation,
                request: LookupRequest {
                    kind: invitation.item_kind,
                    uid: invitation.uid.clone(),
                    recurrence_id: invitation.recurrence_id,
                    range: invitation.start.zip(invitation.end),
                    account: machine.context.account.clone(),
                    with_conflicts: matches!(
                        machine.mode,
                        ViewMode::Publish | ViewMode::Request | ViewMode::Add
                    ),
                },
            }]
        };
        machine.invitation = Some(invitation);
        (machine, effects)
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn info(&self) -> &[InfoItem] {
        &self.info
    }

    pub fn current(&self) -> Option<&StoredCopy> {
        self.current.as_ref()
    }

    pub fn selected_source(&self) -> Option<&SourceId> {
        self.selected_source.as_ref()
    }

    pub fn writable_sources(&self) -> &[SourceId] {
        &self.writable
    }

    /// Response buttons are live only with a resolved target calendar and
    /// no operation in flight.
    pub fn can_respond(&self) -> bool {
        matches!(self.phase, Phase::Ready)
            && self.selected_source.is_some()
            && !matches!(
                self.mode,
                ViewMode::Error | ViewMode::HideAll | ViewMode::Obsolete
            )
    }

    /// Default state of the "send reply" checkbox.
    pub fn reply_wanted(&self) -> bool {
        self.identity
            .as_ref()
            .is_some_and(|identity| !identity.no_reply_wanted)
    }

    /// Whether declining is offered. Memos carry no participation state,
    /// so declining one only makes sense when the holding source tracks
    /// unaccepted items.
    pub fn offers_decline(&self) -> bool {
        match self.invitation.as_ref().map(|invitation| invitation.item_kind) {
            Some(ItemKind::Memo) => self
                .current
                .as_ref()
                .is_some_and(|current| current.unaccepted_meetings),
            Some(_) => true,
            None => false,
        }
    }

    /// Offer the "apply to all instances" checkbox.
    pub fn offers_recur_all(&self) -> bool {
        self.invitation
            .as_ref()
            .is_some_and(|invitation| invitation.is_recurring && invitation.recurrence_id.is_none())
    }

    pub fn handle(&mut self, event: EngineEvent) -> Vec<Effect> {
        match event {
            EngineEvent::LookupCompleted { generation, result } => {
                self.on_lookup(generation, result)
            }
            EngineEvent::UserDecided(decision) => self.on_decision(decision),
            EngineEvent::CommitCompleted {
                generation,
                outcome,
            } => self.on_commit(generation, outcome),
            EngineEvent::ConfirmAnswered { confirmed } => self.on_confirm(confirmed),
            EngineEvent::SourceSelected(source) => {
                if self.writable.contains(&source) {
                    self.selected_source = Some(source);
                }
                Vec::new()
            }
        }
    }

    fn on_lookup(&mut self, generation: u64, result: CalendarMatch) -> Vec<Effect> {
        if generation != self.generation || !matches!(self.phase, Phase::AwaitingLookup) {
            debug!(generation, "stale lookup result dropped");
            return Vec::new();
        }
        if result.cancelled {
            self.phase = Phase::Done;
            return Vec::new();
        }
        let (kind, incoming_sequence) = match self.invitation.as_ref() {
            Some(invitation) => (invitation.item_kind, invitation.sequence),
            None => return Vec::new(),
        };

        for failure in &result.failures {
            self.info.push(InfoItem {
                severity: Severity::Warning,
                text: failure.to_string(),
            });
        }
        for conflict in &result.conflicts {
            let text = if conflict.count == 1 {
                format!("An appointment in the calendar \"{}\" conflicts with this meeting", conflict.name)
            } else {
                format!(
                    "{} appointments in the calendar \"{}\" conflict with this meeting",
                    conflict.count, conflict.name
                )
            };
            self.info.push(InfoItem {
                severity: Severity::Warning,
                text,
            });
        }
        self.writable = result.writable;

        // A copy with a revision at least as new as the invitation means
        // the invitation is stale. Tasks and memos revise without bumping
        // SEQUENCE, so only events are checked.
        if self.mode == ViewMode::Request
            && kind == ItemKind::Event
            && let (Some(incoming), Some(stored)) = (
                incoming_sequence,
                result.current.as_ref().and_then(|c| c.sequence),
            )
            && stored >= incoming
        {
            self.mode = ViewMode::Obsolete;
            self.info.push(InfoItem {
                severity: Severity::Warning,
                text: EngineError::ObsoleteInvitation.to_string(),
            });
        }

        match &result.current {
            Some(current) => {
                self.selected_source = Some(current.source.clone());
                self.info.push(InfoItem {
                    severity: Severity::Info,
                    text: format!(
                        "Found the item in the {} \"{}\"",
                        kind.container_label(),
                        self.registry
                            .source(&current.source)
                            .map(|s| s.name.as_str())
                            .unwrap_or_else(|| current.source.as_str())
                    ),
                });
            }
            None => match self.mode {
                ViewMode::Publish | ViewMode::Request | ViewMode::Add => {
                    // Offer the configured default; the user can still
                    // pick any writable source.
                    let default = self
                        .registry
                        .default_source(kind)
                        .map(|source| source.id.clone())
                        .filter(|id| self.writable.contains(id));
                    self.selected_source = default.or_else(|| self.writable.first().cloned());
                    if self.selected_source.is_none() {
                        self.fail(EngineError::NoCalendarsFound(kind).to_string());
                        return Vec::new();
                    }
                }
                ViewMode::Cancel => {
                    self.info.push(InfoItem {
                        severity: Severity::Info,
                        text: format!(
                            "The meeting is not in any {}; it may have been removed already",
                            kind.container_label()
                        ),
                    });
                    self.phase = Phase::Done;
                    return Vec::new();
                }
                ViewMode::Reply | ViewMode::Refresh | ViewMode::Counter
                | ViewMode::DeclineCounter => {
                    self.fail(EngineError::NoStoredCopy(kind).to_string());
                    return Vec::new();
                }
                _ => {}
            },
        }

        self.current = result.current;
        self.phase = Phase::Ready;
        Vec::new()
    }

    fn on_decision(&mut self, decision: UserDecision) -> Vec<Effect> {
        // Open and save are always available, even on errored views.
        match &decision {
            UserDecision::OpenCalendar => {
                let (start, end) = self
                    .invitation
                    .as_ref()
                    .and_then(|invitation| invitation.start.zip(invitation.end))
                    .unwrap_or_else(|| {
                        let now = chrono::Utc::now().timestamp();
                        (now, now)
                    });
                return vec![Effect::OpenCalendar { start, end }];
            }
            UserDecision::SaveAttachment => {
                return match self.invitation.as_ref() {
                    Some(invitation) => vec![Effect::SaveAttachment {
                        content: invitation.to_ical_string(),
                    }],
                    None => Vec::new(),
                };
            }
            _ => {}
        }

        if !self.can_respond() {
            self.info.push(InfoItem {
                severity: Severity::Warning,
                text: EngineError::Busy.to_string(),
            });
            return Vec::new();
        }

        match decision {
            UserDecision::Accept(options) => {
                self.respond(ICalendarParticipationStatus::Accepted, options)
            }
            UserDecision::Tentative(options) => {
                self.respond(ICalendarParticipationStatus::Tentative, options)
            }
            UserDecision::Decline(options) => {
                self.respond(ICalendarParticipationStatus::Declined, options)
            }
            UserDecision::Commit(options) => self.commit_as_is(options),
            UserDecision::UpdateAttendeeStatus { send_updates } => {
                update::start(self, send_updates)
            }
            UserDecision::DeclineCounterProposal => self.decline_counter(),
            UserDecision::SendLatestInformation => self.send_latest(),
            UserDecision::OpenCalendar | UserDecision::SaveAttachment => Vec::new(),
        }
    }

    fn respond(
        &mut self,
        status: ICalendarParticipationStatus,
        options: ResponseOptions,
    ) -> Vec<Effect> {
        let kind = match self.invitation.as_ref() {
            Some(invitation) => invitation.item_kind,
            None => return Vec::new(),
        };
        if self.identity.is_none() && kind != ItemKind::Memo {
            self.fail(EngineError::IdentityNotResolved.to_string());
            return Vec::new();
        }
        let Some(source) = self.selected_source.clone() else {
            return Vec::new();
        };
        let reply_wanted = self.reply_wanted();

        let Some(invitation) = self.invitation.as_ref() else {
            return Vec::new();
        };
        let identity = self.identity.as_ref();
        let document = respond::build_commit_document(
            invitation,
            identity,
            &status,
            &options,
            self.current.as_ref(),
        );

        let mut followup = Vec::new();
        if options.send_reply
            && reply_wanted
            && kind != ItemKind::Memo
            && let (Some(identity), Some(sender)) = (identity, self.sender.as_ref())
        {
            followup.push(Effect::Send(respond::build_reply_message(
                invitation,
                identity,
                sender,
                &status,
                options.comment.as_deref(),
            )));
        }
        followup.push(Effect::MarkAnswered);
        if self.registry.options.delete_processed {
            followup.push(Effect::DeleteMessage);
        }

        let verb = match &status {
            ICalendarParticipationStatus::Accepted => "accepted",
            ICalendarParticipationStatus::Tentative => "tentative",
            _ => "declined",
        };
        let success = format!(
            "Sent to the {} \"{}\" as {verb}",
            kind.container_label(),
            self.source_label(&source)
        );
        self.generation += 1;
        self.phase = Phase::Committing { followup, success };
        self.info.push(InfoItem {
            severity: Severity::Progress,
            text: format!("Saving changes to the {}", kind.container_label()),
        });
        vec![Effect::Commit {
            generation: self.generation,
            source,
            document,
            kind: CommitKind::Receive,
        }]
    }

    /// CANCEL and ADD: hand the document to the backend unchanged, no
    /// reply goes out.
    fn commit_as_is(&mut self, _options: ResponseOptions) -> Vec<Effect> {
        let Some(invitation) = self.invitation.as_ref() else {
            return Vec::new();
        };
        let Some(source) = self.selected_source.clone() else {
            return Vec::new();
        };
        let kind = invitation.item_kind;
        let document = respond::build_forward_document(invitation);

        let mut followup = vec![Effect::MarkAnswered];
        if self.registry.options.delete_processed {
            followup.push(Effect::DeleteMessage);
        }
        let success = if self.mode == ViewMode::Cancel {
            format!(
                "Sent to the {} \"{}\" as cancelled",
                kind.container_label(),
                self.source_label(&source)
            )
        } else {
            format!(
                "Imported into the {} \"{}\"",
                kind.container_label(),
                self.source_label(&source)
            )
        };
        self.generation += 1;
        self.phase = Phase::Committing { followup, success };
        vec![Effect::Commit {
            generation: self.generation,
            source,
            document,
            kind: CommitKind::Receive,
        }]
    }

    fn decline_counter(&mut self) -> Vec<Effect> {
        let Some(invitation) = self.invitation.as_ref() else {
            return Vec::new();
        };
        let Some(sender) = self.sender.as_ref() else {
            return Vec::new();
        };
        let Some(identity) = self.identity.as_ref() else {
            return Vec::new();
        };
        self.phase = Phase::Done;
        vec![
            Effect::Send(respond::build_decline_counter(invitation, identity, sender)),
            Effect::MarkAnswered,
        ]
    }

    fn send_latest(&mut self) -> Vec<Effect> {
        let kind = match self.invitation.as_ref() {
            Some(invitation) => invitation.item_kind,
            None => return Vec::new(),
        };
        if self.current.is_none() {
            self.fail(EngineError::NoStoredCopy(kind).to_string());
            return Vec::new();
        }
        let Some(invitation) = self.invitation.as_ref() else {
            return Vec::new();
        };
        let Some(current) = self.current.as_ref() else {
            return Vec::new();
        };
        let Some(identity) = self.identity.as_ref() else {
            return Vec::new();
        };
        let Some(sender) = self.sender.as_ref() else {
            return Vec::new();
        };
        let effects = vec![
            Effect::Send(respond::build_refresh_reply(
                invitation, current, identity, sender,
            )),
            Effect::MarkAnswered,
        ];
        let noun = match kind {
            ItemKind::Event => "Meeting",
            ItemKind::Task => "Task",
            ItemKind::Memo => "Memo",
        };
        self.info.push(InfoItem {
            severity: Severity::Info,
            text: format!("{noun} information sent"),
        });
        self.phase = Phase::Done;
        effects
    }

    fn on_commit(&mut self, generation: u64, outcome: Result<(), EngineError>) -> Vec<Effect> {
        if generation != self.generation {
            // The invitation was torn down or superseded while the RPC
            // was in flight.
            debug!(generation, "stale commit completion dropped");
            return Vec::new();
        }
        let (followup, success) = match std::mem::replace(&mut self.phase, Phase::Done) {
            Phase::Committing { followup, success } => (followup, success),
            phase => {
                self.phase = phase;
                return Vec::new();
            }
        };
        self.info.retain(|item| item.severity != Severity::Progress);

        match outcome {
            Ok(()) => {
                self.info.push(InfoItem {
                    severity: Severity::Info,
                    text: success,
                });
                self.phase = Phase::Done;
                followup
            }
            Err(err) => {
                self.info.push(InfoItem {
                    severity: Severity::Error,
                    text: err.to_string(),
                });
                // Let the user try again, possibly to another source.
                self.phase = Phase::Ready;
                Vec::new()
            }
        }
    }

    fn on_confirm(&mut self, confirmed: bool) -> Vec<Effect> {
        let pending = match std::mem::replace(&mut self.phase, Phase::Ready) {
            Phase::AwaitingConfirm { pending } => pending,
            phase => {
                self.phase = phase;
                return Vec::new();
            }
        };
        update::resume(self, pending, confirmed)
    }

    fn source_label(&self, source: &SourceId) -> String {
        self.registry
            .source(source)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| source.to_string())
    }

    /// Attaches an informational line to the view.
    pub fn note(&mut self, severity: Severity, text: impl Into<String>) {
        self.info.push(InfoItem {
            severity,
            text: text.into(),
        });
    }

    pub(crate) fn fail(&mut self, text: String) {
        self.mode = ViewMode::Error;
        self.phase = Phase::Done;
        self.info.push(InfoItem {
            severity: Severity::Error,
            text,
        });
    }

    pub(crate) fn begin_commit(&mut self, followup: Vec<Effect>, success: String) -> u64 {
        self.generation += 1;
        self.phase = Phase::Committing { followup, success };
        self.generation
    }

    pub(crate) fn suspend(&mut self, pending: update::PendingUpdate) {
        self.phase = Phase::AwaitingConfirm { pending };
    }
}

fn mode_for(invitation: &Invitation) -> ViewMode {
    // Memos carry no participation machinery; whatever the method, they
    // are shown as published items.
    if invitation.item_kind == ItemKind::Memo {
        return ViewMode::Publish;
    }
    match invitation.method {
        ICalendarMethod::Publish => ViewMode::Publish,
        // A request without an organizer cannot be replied to; it can
        // only be imported, like a published item.
        ICalendarMethod::Request => {
            if invitation.item_kind == ItemKind::Event && invitation.organizer.is_some() {
                ViewMode::Request
            } else {
                ViewMode::Publish
            }
        }
        ICalendarMethod::Reply => ViewMode::Reply,
        ICalendarMethod::Add => ViewMode::Add,
        ICalendarMethod::Cancel => ViewMode::Cancel,
        ICalendarMethod::Refresh => ViewMode::Refresh,
        ICalendarMethod::Counter => ViewMode::Counter,
        ICalendarMethod::Declinecounter => ViewMode::DeclineCounter,
    }
}
