/*
 * SPDX-FileCopyrightText: 2025 Halcyon Groupware Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::{
    DECLINED_MARKER, PROD_ID, RECUR_MOD_ALL,
    backend::OutboundMessage,
    identity::{ResolvedIdentity, ResolvedSender},
    invitation::Invitation,
    lookup::StoredCopy,
    machine::ResponseOptions,
};
use calcard::{
    common::PartialDateTime,
    icalendar::{
        ICalendar, ICalendarComponent, ICalendarComponentType, ICalendarEntry, ICalendarMethod,
        ICalendarParameter, ICalendarParameterName, ICalendarParticipationStatus,
        ICalendarProperty, ICalendarValue,
    },
};
use registry::ItemKind;

pub(crate) fn build_envelope(method: ICalendarMethod) -> ICalendarComponent {
    ICalendarComponent {
        component_type: ICalendarComponentType::VCalendar,
        entries: vec![
            ICalendarEntry {
                name: ICalendarProperty::Version,
                params: vec![],
                values: vec![ICalendarValue::Text("2.0".to_string())],
            },
            ICalendarEntry {
                name: ICalendarProperty::Prodid,
                params: vec![],
                values: vec![ICalendarValue::Text(PROD_ID.to_string())],
            },
            ICalendarEntry {
                name: ICalendarProperty::Method,
                params: vec![],
                values: vec![ICalendarValue::Method(method)],
            },
        ],
        component_ids: Default::default(),
    }
}

/// Deep-copies one component and its children into `message`, optionally
/// leaving reminders behind. Returns the new component id; the caller
/// anchors it.
fn copy_component_tree(
    src: &ICalendar,
    comp_id: u16,
    message: &mut ICalendar,
    with_alarms: bool,
) -> u32 {
    let src_comp = &src.components[comp_id as usize];
    let mut comp = ICalendarComponent {
        component_type: src_comp.component_type.clone(),
        entries: src_comp.entries.clone(),
        component_ids: Default::default(),
    };
    let child_ids: Vec<u32> = src_comp
        .component_ids
        .iter()
        .filter(|child_id| {
            with_alarms
                || src
                    .components
                    .get(**child_id as usize)
                    .is_some_and(|child| child.component_type != ICalendarComponentType::VAlarm)
        })
        .map(|child_id| copy_component_tree(src, *child_id as u16, message, with_alarms))
        .collect();
    comp.component_ids = child_ids;

    let new_id = message.components.len() as u32;
    message.components.push(comp);
    new_id
}

fn copy_timezones(message: &mut ICalendar, src: &ICalendar) {
    let mut has_timezones = false;

    if message.components.iter().any(|c| {
        has_timezones = has_timezones || c.component_type == ICalendarComponentType::VTimezone;

        !has_timezones
            && c.entries.iter().any(|e| {
                e.params
                    .iter()
                    .any(|p| matches!(p.name, ICalendarParameterName::Tzid))
            })
    }) && !has_timezones
    {
        message.copy_timezones(src);
    }
}

fn set_participation(
    comp: &mut ICalendarComponent,
    identity: &ResolvedIdentity,
    attendee_entry: Option<u16>,
    status: &ICalendarParticipationStatus,
) {
    match attendee_entry {
        Some(entry_id) => {
            let entry = &mut comp.entries[entry_id as usize];
            entry
                .params
                .retain(|param| !matches!(param.name, ICalendarParameterName::Partstat));
            entry.params.push(ICalendarParameter::partstat(status.clone()));
        }
        None => {
            comp.add_property_with_params(
                ICalendarProperty::Attendee,
                [
                    ICalendarParameter::partstat(status.clone()),
                    ICalendarParameter::rsvp(true),
                ],
                ICalendarValue::Text(format!("mailto:{}", identity.address)),
            );
        }
    }
}

/// The document handed to the backend when the user responds: the
/// invitation's METHOD envelope, the primary component with the identity's
/// participation set, its detached instances, and whatever reminders the
/// chosen options keep.
pub(crate) fn build_commit_document(
    invitation: &Invitation,
    identity: Option<&ResolvedIdentity>,
    status: &ICalendarParticipationStatus,
    options: &ResponseOptions,
    current: Option<&StoredCopy>,
) -> ICalendar {
    let mut message = ICalendar {
        components: vec![build_envelope(invitation.method.clone())],
    };

    let attendee_entry = identity
        .and_then(|identity| identity.attendee)
        .map(|idx| invitation.attendees[idx].entry_id);

    for (nth, comp_id) in invitation.group_ids().enumerate() {
        let new_id = copy_component_tree(
            &invitation.ical,
            comp_id,
            &mut message,
            options.inherit_reminder,
        );
        message.components[0].component_ids.push(new_id);

        if nth == 0 {
            let comp = &mut message.components[new_id as usize];
            if invitation.item_kind == ItemKind::Memo {
                // Memos have no participation state; a declined one is
                // only marked for the backend.
                if status == &ICalendarParticipationStatus::Declined {
                    comp.add_property(
                        ICalendarProperty::Other(DECLINED_MARKER.to_string()),
                        ICalendarValue::Text("TRUE".to_string()),
                    );
                }
            } else if let Some(identity) = identity {
                set_participation(comp, identity, attendee_entry, status);
            }
            if options.apply_to_all {
                comp.add_property(
                    ICalendarProperty::Other(RECUR_MOD_ALL.to_string()),
                    ICalendarValue::Text("All".to_string()),
                );
            }
            if options.keep_stored_reminder
                && let Some(current) = current
            {
                copy_stored_alarms(current, &invitation.uid, &mut message, new_id);
            }
        }
    }

    copy_timezones(&mut message, &invitation.ical);
    message
}

/// Reminders already configured on the stored copy survive the update.
fn copy_stored_alarms(current: &StoredCopy, uid: &str, message: &mut ICalendar, target_id: u32) {
    let stored_ids: Vec<u16> = current
        .document
        .components
        .iter()
        .enumerate()
        .filter(|(_, comp)| {
            comp.component_type.is_scheduling_object()
                && comp.uid().is_none_or(|comp_uid| comp_uid == uid)
        })
        .flat_map(|(_, comp)| comp.component_ids.iter().map(|child_id| *child_id as u16))
        .filter(|child_id| {
            current
                .document
                .components
                .get(*child_id as usize)
                .is_some_and(|child| child.component_type == ICalendarComponentType::VAlarm)
        })
        .collect();

    for alarm_id in stored_ids {
        let new_id = copy_component_tree(&current.document, alarm_id, message, true);
        message.components[target_id as usize]
            .component_ids
            .push(new_id);
    }
}

/// ADD and CANCEL documents go to the backend as received.
pub(crate) fn build_forward_document(invitation: &Invitation) -> ICalendar {
    let mut message = ICalendar {
        components: vec![build_envelope(invitation.method.clone())],
    };
    for comp_id in invitation.group_ids() {
        let new_id = copy_component_tree(&invitation.ical, comp_id, &mut message, true);
        message.components[0].component_ids.push(new_id);
    }
    copy_timezones(&mut message, &invitation.ical);
    message
}

/// A REPLY carrying only the responding attendee, per RFC 5546 §3.2.3.
pub(crate) fn build_reply_message(
    invitation: &Invitation,
    identity: &ResolvedIdentity,
    sender: &ResolvedSender,
    status: &ICalendarParticipationStatus,
    comment: Option<&str>,
) -> OutboundMessage {
    let source = invitation.main_component();
    let mut comp = ICalendarComponent {
        component_type: source.component_type.clone(),
        entries: Vec::with_capacity(8),
        component_ids: Default::default(),
    };
    comp.add_dtstamp(PartialDateTime::now());
    comp.add_sequence(invitation.sequence.unwrap_or_default());
    comp.add_uid(&invitation.uid);

    let attendee_entry = identity
        .attendee
        .map(|idx| invitation.attendees[idx].entry_id);
    let mut has_attendee = false;

    for (entry_id, entry) in source.entries.iter().enumerate() {
        match &entry.name {
            ICalendarProperty::Organizer => {
                comp.entries.push(strip_entry_schedule_params(entry));
            }
            ICalendarProperty::Attendee => {
                if attendee_entry == Some(entry_id as u16) {
                    let mut entry = strip_entry_schedule_params(entry);
                    entry
                        .params
                        .retain(|param| !matches!(param.name, ICalendarParameterName::Partstat));
                    entry.params.push(ICalendarParameter::partstat(status.clone()));
                    comp.entries.push(entry);
                    has_attendee = true;
                }
            }
            ICalendarProperty::RecurrenceId
            | ICalendarProperty::Dtstart
            | ICalendarProperty::Dtend
            | ICalendarProperty::Duration
            | ICalendarProperty::Due
            | ICalendarProperty::Summary => {
                comp.entries.push(entry.clone());
            }
            _ => {}
        }
    }
    if !has_attendee {
        comp.add_property_with_params(
            ICalendarProperty::Attendee,
            [ICalendarParameter::partstat(status.clone())],
            ICalendarValue::Text(format!("mailto:{}", identity.address)),
        );
    }
    if let Some(comment) = comment.filter(|comment| !comment.is_empty()) {
        comp.add_property(
            ICalendarProperty::Comment,
            ICalendarValue::Text(comment.to_string()),
        );
    }
    comp.entries.push(ICalendarEntry {
        name: ICalendarProperty::RequestStatus,
        params: vec![],
        values: vec![
            ICalendarValue::Text("2.0".to_string()),
            ICalendarValue::Text("Success".to_string()),
        ],
    });

    let mut message = ICalendar {
        components: vec![build_envelope(ICalendarMethod::Reply)],
    };
    let comp_id = message.components.len() as u32;
    message.components.push(comp);
    message.components[0].component_ids.push(comp_id);
    copy_timezones(&mut message, &invitation.ical);

    let mut to = vec![sender.address.clone()];
    if let Some(sent_by) = sender.sent_by.as_ref().filter(|s| **s != sender.address) {
        to.push(sent_by.clone());
    }
    OutboundMessage {
        method: ICalendarMethod::Reply,
        document: message,
        from: identity.address.clone(),
        to,
        summary: invitation.summary.clone(),
        comment: comment.map(|c| c.to_string()),
    }
}

pub(crate) fn strip_entry_schedule_params(entry: &ICalendarEntry) -> ICalendarEntry {
    ICalendarEntry {
        name: entry.name.clone(),
        params: entry
            .params
            .iter()
            .filter(|param| {
                !matches!(
                    &param.name,
                    ICalendarParameterName::ScheduleStatus
                        | ICalendarParameterName::ScheduleAgent
                        | ICalendarParameterName::ScheduleForceSend
                )
            })
            .cloned()
            .collect(),
        values: entry.values.clone(),
    }
}

/// Answer to a REFRESH: the stored copy, re-sent as the authoritative
/// REQUEST to whoever asked.
pub(crate) fn build_refresh_reply(
    invitation: &Invitation,
    current: &StoredCopy,
    identity: &ResolvedIdentity,
    sender: &ResolvedSender,
) -> OutboundMessage {
    let mut message = ICalendar {
        components: vec![build_envelope(ICalendarMethod::Request)],
    };
    let scheduling_ids: Vec<u16> = current
        .document
        .components
        .iter()
        .enumerate()
        .filter(|(_, comp)| comp.component_type.is_scheduling_object())
        .map(|(comp_id, _)| comp_id as u16)
        .collect();
    for comp_id in scheduling_ids {
        let new_id = copy_component_tree(&current.document, comp_id, &mut message, false);
        message.components[0].component_ids.push(new_id);
    }
    copy_timezones(&mut message, &current.document);

    OutboundMessage {
        method: ICalendarMethod::Request,
        document: message,
        from: identity.address.clone(),
        to: vec![sender.address.clone()],
        summary: invitation.summary.clone(),
        comment: None,
    }
}

/// Refusal of a counter proposal, sent back to the countering attendee.
pub(crate) fn build_decline_counter(
    invitation: &Invitation,
    identity: &ResolvedIdentity,
    sender: &ResolvedSender,
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
    comp.entries.extend(
        source
            .entries
            .iter()
            .filter(|entry| {
                matches!(
                    entry.name,
                    ICalendarProperty::Organizer
                        | ICalendarProperty::Attendee
                        | ICalendarProperty::Dtstart
                        | ICalendarProperty::Dtend
                        | ICalendarProperty::Summary
                        | ICalendarProperty::RecurrenceId
                )
            })
            .map(strip_entry_schedule_params),
    );

    let mut message = ICalendar {
        components: vec![build_envelope(ICalendarMethod::Declinecounter)],
    };
    let comp_id = message.components.len() as u32;
    message.components.push(comp);
    message.components[0].component_ids.push(comp_id);
    copy_timezones(&mut message, &invitation.ical);

    OutboundMessage {
        method: ICalendarMethod::Declinecounter,
        document: message,
        from: identity.address.clone(),
        to: vec![sender.address.clone()],
        summary: invitation.summary.clone(),
        comment: None,
    }
}
