/*
 * SPDX-FileCopyrightText: 2025 Halcyon Groupware Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use super::{
    attendee_count, attendee_partstat, cancel_invite, context, document_method, ics, registry,
    reply_from, request_invite, stored_event, UID,
};
use calcard::icalendar::{
    ICalendar, ICalendarMethod, ICalendarParticipationStatus, ICalendarProperty,
};
use itip::{
    machine::{
        Effect, EngineEvent, Machine, MessageContext, ResponseOptions, Severity, UserDecision,
        ViewMode,
    },
    lookup::{CalendarMatch, ConflictInfo, StoredCopy},
};
use registry::{FolderKind, SourceId};
use std::sync::Arc;

fn new_machine(raw: &str) -> (Machine, Vec<Effect>) {
    Machine::new(Arc::new(registry()), context(), raw)
}

fn lookup_generation(effects: &[Effect]) -> u64 {
    match effects.first() {
        Some(Effect::StartLookup { generation, .. }) => *generation,
        other => panic!("expected a lookup effect, got {other:?}"),
    }
}

fn complete_lookup(machine: &mut Machine, effects: &[Effect], result: CalendarMatch) -> Vec<Effect> {
    let generation = lookup_generation(effects);
    machine.handle(EngineEvent::LookupCompleted { generation, result })
}

fn writable() -> Vec<SourceId> {
    vec![SourceId::new("work"), SourceId::new("home")]
}

fn stored(sequence: i64) -> StoredCopy {
    StoredCopy {
        source: SourceId::new("work"),
        document: ICalendar::parse(&stored_event(sequence as u32)).unwrap(),
        sequence: Some(sequence),
        exact_instance: false,
        unaccepted_meetings: false,
    }
}

#[test]
fn request_offers_responses_with_rsvp_preselected() {
    let (mut machine, effects) = new_machine(&request_invite(2));
    assert_eq!(machine.mode(), ViewMode::Request);
    assert!(!machine.can_respond());

    complete_lookup(
        &mut machine,
        &effects,
        CalendarMatch {
            writable: writable(),
            ..Default::default()
        },
    );
    assert!(machine.can_respond());
    assert!(machine.reply_wanted());
    assert!(!machine.offers_recur_all());
    // No stored copy anywhere: the configured default is offered.
    assert_eq!(machine.selected_source(), Some(&SourceId::new("work")));
    assert_eq!(machine.writable_sources(), writable());
}

#[test]
fn requests_without_an_organizer_are_shown_as_published() {
    let raw = ics(&[
        "BEGIN:VCALENDAR",
        "VERSION:2.0",
        "PRODID:-//Test//Fixtures//EN",
        "METHOD:REQUEST",
        "BEGIN:VEVENT",
        &format!("UID:{UID}"),
        "DTSTAMP:20260301T090000Z",
        "DTSTART:20260310T100000Z",
        "DTEND:20260310T110000Z",
        "SUMMARY:Office closed",
        "END:VEVENT",
        "END:VCALENDAR",
    ]);
    let (machine, _effects) = new_machine(&raw);
    assert_eq!(machine.mode(), ViewMode::Publish);
}

#[test]
fn found_copy_names_the_calendar() {
    let (mut machine, effects) = new_machine(&request_invite(5));
    complete_lookup(
        &mut machine,
        &effects,
        CalendarMatch {
            current: Some(stored(2)),
            writable: writable(),
            ..Default::default()
        },
    );
    assert!(machine.can_respond());
    assert_eq!(machine.selected_source(), Some(&SourceId::new("work")));
    assert!(machine
        .info()
        .iter()
        .any(|item| item.text.contains("Found the item in the calendar \"Work\"")));
}

#[test]
fn stored_revision_not_older_makes_the_invitation_obsolete() {
    let (mut machine, effects) = new_machine(&request_invite(5));
    complete_lookup(
        &mut machine,
        &effects,
        CalendarMatch {
            current: Some(stored(5)),
            writable: writable(),
            ..Default::default()
        },
    );
    assert_eq!(machine.mode(), ViewMode::Obsolete);
    assert!(!machine.can_respond());
    assert!(machine
        .info()
        .iter()
        .any(|item| item.text.contains("newer revision")));
}

#[test]
fn conflicts_are_reported_per_calendar() {
    let (mut machine, effects) = new_machine(&request_invite(2));
    complete_lookup(
        &mut machine,
        &effects,
        CalendarMatch {
            writable: writable(),
            conflicts: vec![
                ConflictInfo {
                    source: SourceId::new("work"),
                    name: "Work".to_string(),
                    count: 1,
                },
                ConflictInfo {
                    source: SourceId::new("home"),
                    name: "Home".to_string(),
                    count: 3,
                },
            ],
            ..Default::default()
        },
    );
    let info = machine.info();
    assert!(info.iter().any(|item| {
        item.severity == Severity::Warning
            && item.text == "An appointment in the calendar \"Work\" conflicts with this meeting"
    }));
    assert!(info.iter().any(|item| {
        item.text == "3 appointments in the calendar \"Home\" conflict with this meeting"
    }));
    assert!(machine.can_respond());
}

#[test]
fn multi_item_payloads_only_offer_saving() {
    let raw = ics(&[
        "BEGIN:VCALENDAR",
        "VERSION:2.0",
        "METHOD:REQUEST",
        "BEGIN:VEVENT",
        "UID:first@example.org",
        "DTSTAMP:20260301T090000Z",
        "DTSTART:20260310T100000Z",
        "END:VEVENT",
        "BEGIN:VEVENT",
        "UID:second@example.org",
        "DTSTAMP:20260301T090000Z",
        "DTSTART:20260311T100000Z",
        "END:VEVENT",
        "END:VCALENDAR",
    ]);
    let (mut machine, effects) = Machine::new(Arc::new(registry()), context(), &raw);
    assert!(effects.is_empty());
    assert_eq!(machine.mode(), ViewMode::Error);
    assert!(!machine.can_respond());
    assert!(machine
        .info()
        .iter()
        .any(|item| item.severity == Severity::Error && item.text.contains("multiple items")));

    let effects = machine.handle(EngineEvent::UserDecided(UserDecision::SaveAttachment));
    assert!(matches!(effects.as_slice(), [Effect::SaveAttachment { .. }]));

    let effects = machine.handle(EngineEvent::UserDecided(UserDecision::Accept(
        ResponseOptions::default(),
    )));
    assert!(effects.is_empty());
}

#[test]
fn sent_and_junk_folders_hide_all_actions() {
    for folder in [FolderKind::Sent, FolderKind::Junk, FolderKind::Trash] {
        let (machine, effects) = Machine::new(
            Arc::new(registry()),
            MessageContext {
                folder,
                account: None,
                identity_hint: None,
            },
            &request_invite(2),
        );
        assert!(effects.is_empty());
        assert_eq!(machine.mode(), ViewMode::HideAll);
        assert!(!machine.can_respond());
    }
}

#[test]
fn accepting_commits_then_replies() {
    let (mut machine, effects) = new_machine(&request_invite(2));
    complete_lookup(
        &mut machine,
        &effects,
        CalendarMatch {
            writable: writable(),
            ..Default::default()
        },
    );

    let effects = machine.handle(EngineEvent::UserDecided(UserDecision::Accept(
        ResponseOptions {
            send_reply: true,
            comment: Some("See you there".to_string()),
            ..Default::default()
        },
    )));
    let (generation, document) = match effects.as_slice() {
        [Effect::Commit {
            generation,
            source,
            document,
            ..
        }] => {
            assert_eq!(source, &SourceId::new("work"));
            (*generation, document.clone())
        }
        other => panic!("expected a commit effect, got {other:?}"),
    };
    assert!(matches!(
        document_method(&document),
        Some(ICalendarMethod::Request)
    ));
    assert_eq!(
        attendee_partstat(&document, "jane.doe@example.com"),
        Some(ICalendarParticipationStatus::Accepted)
    );
    assert!(machine
        .info()
        .iter()
        .any(|item| item.severity == Severity::Progress));
    // Buttons stay off while the commit is in flight.
    assert!(!machine.can_respond());

    let followup = machine.handle(EngineEvent::CommitCompleted {
        generation,
        outcome: Ok(()),
    });
    let reply = match followup.as_slice() {
        [Effect::Send(message), Effect::MarkAnswered] => message,
        other => panic!("expected send and mark-answered, got {other:?}"),
    };
    assert!(matches!(reply.method, ICalendarMethod::Reply));
    assert_eq!(reply.from, "jane.doe@example.com");
    assert_eq!(reply.to, vec!["boss@example.org".to_string()]);
    // RFC 5546: the reply names only the responding attendee.
    assert_eq!(attendee_count(&reply.document), 1);
    assert_eq!(
        attendee_partstat(&reply.document, "jane.doe@example.com"),
        Some(ICalendarParticipationStatus::Accepted)
    );
    assert!(reply.document.components.iter().any(|comp| {
        comp.entries.iter().any(|entry| {
            entry.name == ICalendarProperty::RequestStatus
                && entry
                    .values
                    .first()
                    .and_then(|value| value.as_text())
                    .is_some_and(|value| value.starts_with("2.0"))
        })
    }));
    assert!(machine
        .info()
        .iter()
        .all(|item| item.severity != Severity::Progress));
    assert!(machine
        .info()
        .iter()
        .any(|item| item.text == "Sent to the calendar \"Work\" as accepted"));
}

#[test]
fn failed_commit_reenables_the_buttons() {
    let (mut machine, effects) = new_machine(&request_invite(2));
    complete_lookup(
        &mut machine,
        &effects,
        CalendarMatch {
            writable: writable(),
            ..Default::default()
        },
    );
    let effects = machine.handle(EngineEvent::UserDecided(UserDecision::Accept(
        ResponseOptions::default(),
    )));
    let generation = match effects.as_slice() {
        [Effect::Commit { generation, .. }] => *generation,
        other => panic!("expected a commit effect, got {other:?}"),
    };

    let followup = machine.handle(EngineEvent::CommitCompleted {
        generation,
        outcome: Err(itip::error::EngineError::CommitFailed {
            source_id: SourceId::new("work"),
            message: "the backend is unreachable".to_string(),
        }),
    });
    assert!(followup.is_empty());
    assert!(machine.info().iter().any(|item| {
        item.severity == Severity::Error && item.text.contains("the backend is unreachable")
    }));
    assert!(machine.can_respond());
}

#[test]
fn stale_lookup_results_are_dropped() {
    let (mut machine, _effects) = new_machine(&request_invite(2));
    let effects = machine.handle(EngineEvent::LookupCompleted {
        generation: 99,
        result: CalendarMatch {
            writable: writable(),
            ..Default::default()
        },
    });
    assert!(effects.is_empty());
    assert!(!machine.can_respond());
}

#[test]
fn cancelled_lookup_terminates_the_view() {
    let (mut machine, effects) = new_machine(&request_invite(2));
    complete_lookup(
        &mut machine,
        &effects,
        CalendarMatch {
            cancelled: true,
            ..Default::default()
        },
    );
    assert!(!machine.can_respond());
    assert!(machine.info().is_empty());
}

#[test]
fn cancel_without_a_stored_copy_just_informs() {
    let (mut machine, effects) = new_machine(&cancel_invite());
    assert_eq!(machine.mode(), ViewMode::Cancel);
    complete_lookup(
        &mut machine,
        &effects,
        CalendarMatch {
            writable: writable(),
            ..Default::default()
        },
    );
    assert!(!machine.can_respond());
    assert!(machine
        .info()
        .iter()
        .any(|item| item.text.contains("may have been removed")));
}

#[test]
fn reply_without_a_stored_copy_fails() {
    let (mut machine, effects) = new_machine(&reply_from("bob@example.org"));
    assert_eq!(machine.mode(), ViewMode::Reply);
    complete_lookup(
        &mut machine,
        &effects,
        CalendarMatch {
            writable: writable(),
            ..Default::default()
        },
    );
    assert_eq!(machine.mode(), ViewMode::Error);
    assert!(machine
        .info()
        .iter()
        .any(|item| item.text.contains("unable to find this item in any calendar")));
}

#[test]
fn source_selection_is_limited_to_writable_sources() {
    let (mut machine, effects) = new_machine(&request_invite(2));
    complete_lookup(
        &mut machine,
        &effects,
        CalendarMatch {
            writable: writable(),
            ..Default::default()
        },
    );
    machine.handle(EngineEvent::SourceSelected(SourceId::new("home")));
    assert_eq!(machine.selected_source(), Some(&SourceId::new("home")));

    machine.handle(EngineEvent::SourceSelected(SourceId::new("tasks")));
    assert_eq!(machine.selected_source(), Some(&SourceId::new("home")));
}

#[test]
fn declined_memos_are_marked_not_mutated() {
    let raw = ics(&[
        "BEGIN:VCALENDAR",
        "VERSION:2.0",
        "METHOD:PUBLISH",
        "BEGIN:VJOURNAL",
        "UID:notes@example.org",
        "DTSTAMP:20260301T090000Z",
        "SUMMARY:Minutes",
        "END:VJOURNAL",
        "END:VCALENDAR",
    ]);
    let (mut machine, effects) = new_machine(&raw);
    assert_eq!(machine.mode(), ViewMode::Publish);
    complete_lookup(
        &mut machine,
        &effects,
        CalendarMatch {
            writable: vec![SourceId::new("memos")],
            ..Default::default()
        },
    );

    let effects = machine.handle(EngineEvent::UserDecided(UserDecision::Decline(
        ResponseOptions::default(),
    )));
    let document = match effects.as_slice() {
        [Effect::Commit { document, .. }] => document,
        other => panic!("expected a commit effect, got {other:?}"),
    };
    assert_eq!(attendee_count(document), 0);
    assert!(document.components.iter().any(|comp| {
        comp.entries
            .iter()
            .any(|entry| entry.name == ICalendarProperty::Other("X-GW-DECLINED".to_string()))
    }));
}

#[test]
fn recurring_requests_offer_applying_to_all_instances() {
    let raw = ics(&[
        "BEGIN:VCALENDAR",
        "VERSION:2.0",
        "METHOD:REQUEST",
        "BEGIN:VEVENT",
        &format!("UID:{UID}"),
        "RRULE:FREQ=WEEKLY;COUNT=8",
        "DTSTAMP:20260301T090000Z",
        "DTSTART:20260310T100000Z",
        "DTEND:20260310T110000Z",
        "ATTENDEE;RSVP=TRUE:mailto:jane.doe@example.com",
        "ORGANIZER:mailto:boss@example.org",
        "END:VEVENT",
        "END:VCALENDAR",
    ]);
    let (mut machine, effects) = new_machine(&raw);
    complete_lookup(
        &mut machine,
        &effects,
        CalendarMatch {
            writable: writable(),
            ..Default::default()
        },
    );
    assert!(machine.offers_recur_all());

    let effects = machine.handle(EngineEvent::UserDecided(UserDecision::Tentative(
        ResponseOptions {
            apply_to_all: true,
            ..Default::default()
        },
    )));
    let document = match effects.as_slice() {
        [Effect::Commit { document, .. }] => document,
        other => panic!("expected a commit effect, got {other:?}"),
    };
    assert_eq!(
        attendee_partstat(document, "jane.doe@example.com"),
        Some(ICalendarParticipationStatus::Tentative)
    );
    assert!(document.components.iter().any(|comp| {
        comp.entries.iter().any(|entry| {
            entry.name == ICalendarProperty::Other("X-GW-RECUR-INSTANCES-MOD-TYPE".to_string())
        })
    }));
}
