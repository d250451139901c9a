/*
 * SPDX-FileCopyrightText: 2025 Halcyon Groupware Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::{
    backend::{ObjectScope, OutboundMessage},
    invitation::{Invitation, Participant, mail_address},
    machine::{
        CommitKind, ConfirmKind, Effect, InfoItem, Machine, NeedsConfirmation, Severity,
        respond::{build_envelope, strip_entry_schedule_params},
    },
};
use calcard::{
    common::PartialDateTime,
    icalendar::{
        ICalendar, ICalendarComponent, ICalendarMethod, ICalendarParameter,
        ICalendarParameterName, ICalendarParticipationStatus, ICalendarProperty, ICalendarValue,
    },
};
use registry::SourceId;

/// A reconciliation waiting on a user answer. Carries everything needed
/// to finish without touching the invitation again.
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub(crate) kind: ConfirmKind,
    pub(crate) document: ICalendar,
    pub(crate) source: SourceId,
    pub(crate) scope: ObjectScope,
    pub(crate) send_updates: bool,
}

/// Folds the attendee status carried by a REPLY or COUNTER into the
/// stored copy. Unknown senders and declining delegates suspend the flow
/// for confirmation instead of failing outright.
pub(crate) fn start(machine: &mut Machine, send_updates: bool) -> Vec<Effect> {
    let Some(invitation) = machine.invitation.as_ref() else {
        return Vec::new();
    };
    let Some(current) = machine.current.as_ref() else {
        return Vec::new();
    };
    let Some(reply_attendee) = invitation.attendees.first() else {
        machine.info.push(InfoItem {
            severity: Severity::Error,
            text: "The reply does not name an attendee".to_string(),
        });
        return Vec::new();
    };

    let scope = if invitation.recurrence_id.is_some() && current.exact_instance {
        ObjectScope::ThisInstance
    } else {
        ObjectScope::AllInstances
    };
    let status = reply_attendee
        .part_stat
        .clone()
        .unwrap_or(ICalendarParticipationStatus::NeedsAction);

    match reconcile(&current.document, &invitation.uid, reply_attendee, &status) {
        Reconciled::Updated(document) => {
            let declined_delegate = status == ICalendarParticipationStatus::Declined
                && !reply_attendee.delegated_from.is_empty();
            if declined_delegate {
                // The delegate bowed out; offer to drop their entry from
                // the item entirely.
                let document = remove_attendee(&document, &invitation.uid, &reply_attendee.email);
                let pending = PendingUpdate {
                    kind: ConfirmKind::RemoveDelegate {
                        address: reply_attendee.email.clone(),
                    },
                    document,
                    source: current.source.clone(),
                    scope,
                    send_updates,
                };
                let summary = invitation.summary.clone();
                let kind = pending.kind.clone();
                machine.suspend(pending);
                return vec![Effect::AskConfirmation(NeedsConfirmation {
                    kind,
                    summary,
                })];
            }
            let source = current.source.clone();
            commit_update(machine, document, source, scope, send_updates, None)
        }
        Reconciled::UnknownAttendee => {
            // Not on the list: adding them is the user's call.
            let attendee_entry = invitation.main_component().entries
                [reply_attendee.entry_id as usize]
                .clone();
            let document = add_attendee(&current.document, &invitation.uid, attendee_entry);
            let pending = PendingUpdate {
                kind: ConfirmKind::UnknownAttendee {
                    address: reply_attendee.email.clone(),
                },
                document,
                source: current.source.clone(),
                scope,
                send_updates,
            };
            let summary = invitation.summary.clone();
            let kind = pending.kind.clone();
            machine.suspend(pending);
            vec![Effect::AskConfirmation(NeedsConfirmation { kind, summary })]
        }
    }
}

/// Continues a suspended reconciliation once the user answered.
pub(crate) fn resume(machine: &mut Machine, pending: PendingUpdate, confirmed: bool) -> Vec<Effect> {
    if !confirmed {
        machine.info.push(InfoItem {
            severity: Severity::Info,
            text: match &pending.kind {
                ConfirmKind::UnknownAttendee { .. } => {
                    "The attendee status was not updated".to_string()
                }
                ConfirmKind::RemoveDelegate { address } => {
                    format!("The delegate {address} was kept on the attendee list")
                }
            },
        });
        return Vec::new();
    }
    // A removed delegate is told they are off the attendee list; the
    // surviving attendees get the refreshed REQUEST afterwards.
    let notice = match &pending.kind {
        ConfirmKind::RemoveDelegate { address } => machine
            .identity
            .as_ref()
            .zip(machine.invitation.as_ref())
            .map(|(identity, invitation)| {
                build_delegate_cancel(invitation, &identity.address, address)
            }),
        ConfirmKind::UnknownAttendee { .. } => None,
    };
    commit_update(
        machine,
        pending.document,
        pending.source,
        pending.scope,
        pending.send_updates,
        notice,
    )
}

fn commit_update(
    machine: &mut Machine,
    document: ICalendar,
    source: SourceId,
    scope: ObjectScope,
    send_updates: bool,
    notice: Option<OutboundMessage>,
) -> Vec<Effect> {
    let mut followup = vec![Effect::MarkAnswered];
    if let Some(notice) = notice {
        followup.push(Effect::Send(notice));
    }
    if send_updates
        && let Some(identity) = machine.identity.as_ref()
    {
        followup.push(Effect::Send(build_update_request(
            &document,
            &identity.address,
            machine
                .invitation
                .as_ref()
                .and_then(|invitation| invitation.summary.clone()),
        )));
    }
    let generation = machine.begin_commit(followup, "Attendee status updated".to_string());
    vec![Effect::Commit {
        generation,
        source,
        document,
        kind: CommitKind::Modify(scope),
    }]
}

enum Reconciled {
    Updated(ICalendar),
    UnknownAttendee,
}

fn reconcile(
    stored: &ICalendar,
    uid: &str,
    reply_attendee: &Participant,
    status: &ICalendarParticipationStatus,
) -> Reconciled {
    let mut document = stored.clone();
    let mut found = false;

    for comp in document.components.iter_mut() {
        if !comp.component_type.is_scheduling_object()
            || comp.uid().is_some_and(|comp_uid| comp_uid != uid)
        {
            continue;
        }
        for entry in comp.entries.iter_mut() {
            if entry.name == ICalendarProperty::Attendee
                && entry
                    .values
                    .first()
                    .and_then(|v| v.as_text())
                    .and_then(mail_address)
                    .is_some_and(|addr| addr == reply_attendee.email)
            {
                entry
                    .params
                    .retain(|param| !matches!(param.name, ICalendarParameterName::Partstat));
                entry.params.push(ICalendarParameter::partstat(status.clone()));
                found = true;
            }
        }
    }

    if found {
        Reconciled::Updated(document)
    } else {
        Reconciled::UnknownAttendee
    }
}

fn add_attendee(
    stored: &ICalendar,
    uid: &str,
    attendee_entry: calcard::icalendar::ICalendarEntry,
) -> ICalendar {
    let mut document = stored.clone();
    for comp in document.components.iter_mut() {
        if comp.component_type.is_scheduling_object()
            && comp.uid().is_none_or(|comp_uid| comp_uid == uid)
        {
            comp.entries.push(strip_entry_schedule_params(&attendee_entry));
        }
    }
    document
}

fn remove_attendee(stored: &ICalendar, uid: &str, address: &str) -> ICalendar {
    let mut document = stored.clone();
    for comp in document.components.iter_mut() {
        if !comp.component_type.is_scheduling_object()
            || comp.uid().is_some_and(|comp_uid| comp_uid != uid)
        {
            continue;
        }
        comp.entries.retain(|entry| {
            entry.name != ICalendarProperty::Attendee
                || entry
                    .values
                    .first()
                    .and_then(|v| v.as_text())
                    .and_then(mail_address)
                    .is_none_or(|addr| addr != address)
        });
    }
    document
}

/// The CANCEL addressed to a delegate who declined and was dropped from
/// the attendee list.
fn build_delegate_cancel(
    invitation: &Invitation,
    organizer_address: &str,
    delegate_address: &str,
) -> OutboundMessage {
    let source = invitation.main_component();
    let mut comp = ICalendarComponent {
        component_type: source.component_type.clone(),
        entries: Vec::with_capacity(6),
        component_ids: Default::default(),
    };
    comp.add_dtstamp(PartialDateTime::now());
    comp.add_sequence(invitation.sequence.unwrap_or_default());
    comp.add_uid(&invitation.uid);

    let mut has_attendee = false;
    for entry in &source.entries {
        match &entry.name {
            ICalendarProperty::Organizer => {
                comp.entries.push(strip_entry_schedule_params(entry));
            }
            ICalendarProperty::Attendee => {
                if entry
                    .values
                    .first()
                    .and_then(|v| v.as_text())
                    .and_then(mail_address)
                    .is_some_and(|addr| addr == delegate_address)
                {
                    comp.entries.push(strip_entry_schedule_params(entry));
                    has_attendee = true;
                }
            }
            ICalendarProperty::RecurrenceId
            | ICalendarProperty::Dtstart
            | ICalendarProperty::Summary => {
                comp.entries.push(entry.clone());
            }
            _ => {}
        }
    }
    if !has_attendee {
        comp.add_property(
            ICalendarProperty::Attendee,
            ICalendarValue::Text(format!("mailto:{delegate_address}")),
        );
    }

    let mut message = ICalendar {
        components: vec![build_envelope(ICalendarMethod::Cancel)],
    };
    let comp_id = message.components.len() as u32;
    message.components.push(comp);
    message.components[0].component_ids.push(comp_id);
    message.copy_timezones(&invitation.ical);

    OutboundMessage {
        method: ICalendarMethod::Cancel,
        document: message,
        from: organizer_address.to_string(),
        to: vec![delegate_address.to_string()],
        summary: invitation.summary.clone(),
        comment: None,
    }
}

/// The refreshed item sent to every remaining attendee after the stored
/// copy changed.
fn build_update_request(
    document: &ICalendar,
    organizer_address: &str,
    summary: Option<String>,
) -> OutboundMessage {
    let mut message = ICalendar {
        components: vec![build_envelope(ICalendarMethod::Request)],
    };
    let mut recipients = Vec::new();
    for comp in &document.components {
        if !comp.component_type.is_scheduling_object() {
            continue;
        }
        let comp_id = message.components.len() as u32;
        let mut copy = comp.clone();
        copy.component_ids = Default::default();
        message.components.push(copy);
        message.components[0].component_ids.push(comp_id);

        for entry in &comp.entries {
            if entry.name == ICalendarProperty::Attendee
                && let Some(addr) = entry
                    .values
                    .first()
                    .and_then(|v| v.as_text())
                    .and_then(mail_address)
                && addr != organizer_address
                && !recipients.contains(&addr)
            {
                recipients.push(addr);
            }
        }
    }
    message.copy_timezones(document);

    OutboundMessage {
        method: ICalendarMethod::Request,
        document: message,
        from: organizer_address.to_string(),
        to: recipients,
        summary,
        comment: None,
    }
}
