/*
 * SPDX-FileCopyrightText: 2025 Halcyon Groupware Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::error::ParseError;
use calcard::{
    common::timezone::Tz,
    icalendar::{
        ICalendar, ICalendarComponent, ICalendarComponentType, ICalendarEntry, ICalendarMethod,
        ICalendarParameterName, ICalendarParameterValue, ICalendarParticipationStatus,
        ICalendarProperty, ICalendarValue, Uri,
    },
};
use registry::ItemKind;

pub mod alarm;

/// One scheduling participant, extracted from an ATTENDEE or ORGANIZER
/// entry. Addresses are lowercased with the mailto: prefix removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Participant {
    pub entry_id: u16,
    pub email: String,
    pub name: Option<String>,
    pub part_stat: Option<ICalendarParticipationStatus>,
    pub rsvp: Option<bool>,
    pub sent_by: Option<String>,
    pub delegated_from: Vec<String>,
    pub delegated_to: Vec<String>,
}

/// The immutable facts extracted from one invitation message, plus the
/// parsed document itself. The primary component is the master of the
/// first item group; detached recurrence instances of the same UID travel
/// with it into every commit document.
#[derive(Debug, Clone)]
pub struct Invitation {
    pub ical: ICalendar,
    pub method: ICalendarMethod,
    pub item_kind: ItemKind,
    pub uid: String,
    pub summary: Option<String>,
    pub sequence: Option<i64>,
    pub main_comp_id: u16,
    pub detached_ids: Vec<u16>,
    pub timezone_ids: Vec<u16>,
    pub extra_uids: Vec<String>,
    pub organizer: Option<Participant>,
    pub attendees: Vec<Participant>,
    pub delegator: Option<Participant>,
    pub recurrence_id: Option<i64>,
    pub this_and_future: bool,
    pub is_recurring: bool,
    pub has_alarms: bool,
    pub stripped_alarms: usize,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub all_day: bool,
}

pub(crate) fn mail_address(value: &str) -> Option<String> {
    value
        .contains('@')
        .then(|| value.trim().trim_start_matches("mailto:").to_lowercase())
}

fn item_kind_of(component_type: &ICalendarComponentType) -> Option<ItemKind> {
    match component_type {
        ICalendarComponentType::VEvent => Some(ItemKind::Event),
        ICalendarComponentType::VTodo => Some(ItemKind::Task),
        ICalendarComponentType::VJournal => Some(ItemKind::Memo),
        _ => None,
    }
}

fn method_entry(comp: &ICalendarComponent) -> Option<&ICalendarMethod> {
    comp.entries.iter().find_map(|entry| {
        if entry.name == ICalendarProperty::Method {
            entry.values.first().and_then(|value| {
                if let ICalendarValue::Method(method) = value {
                    Some(method)
                } else {
                    None
                }
            })
        } else {
            None
        }
    })
}

fn parse_participant(entry_id: u16, entry: &ICalendarEntry) -> Option<Participant> {
    let email = entry
        .values
        .first()
        .and_then(|v| v.as_text())
        .and_then(mail_address)?;
    let mut part = Participant {
        entry_id,
        email,
        ..Default::default()
    };

    for param in &entry.params {
        match (&param.name, &param.value) {
            (ICalendarParameterName::Cn, ICalendarParameterValue::Text(name)) => {
                part.name = Some(name.to_string());
            }
            (ICalendarParameterName::Partstat, ICalendarParameterValue::Partstat(value)) => {
                part.part_stat = Some(value.clone());
            }
            (ICalendarParameterName::Rsvp, ICalendarParameterValue::Bool(rsvp)) => {
                part.rsvp = Some(*rsvp);
            }
            (ICalendarParameterName::SentBy, ICalendarParameterValue::Uri(uri)) => {
                if let Uri::Location(uri) = uri {
                    part.sent_by = mail_address(uri.as_str());
                }
            }
            (ICalendarParameterName::DelegatedFrom, ICalendarParameterValue::Uri(uri)) => {
                if let Uri::Location(uri) = uri {
                    if let Some(addr) = mail_address(uri.as_str()) {
                        part.delegated_from.push(addr);
                    }
                }
            }
            (ICalendarParameterName::DelegatedTo, ICalendarParameterValue::Uri(uri)) => {
                if let Uri::Location(uri) = uri {
                    if let Some(addr) = mail_address(uri.as_str()) {
                        part.delegated_to.push(addr);
                    }
                }
            }
            _ => {}
        }
    }

    Some(part)
}

#[derive(Default)]
struct MainFacts {
    summary: Option<String>,
    sequence: Option<i64>,
    organizer: Option<Participant>,
    attendees: Vec<Participant>,
    delegator: Option<Participant>,
    recurrence_id: Option<i64>,
    this_and_future: bool,
    is_recurring: bool,
    start: Option<i64>,
    end: Option<i64>,
    all_day: bool,
}

fn extract_main(ical: &ICalendar, main_comp_id: u16) -> MainFacts {
    let mut facts = MainFacts::default();
    let mut tz_resolver = None;
    let mut delegator_address = None;
    let mut delegator_name = None;
    let mut end = None;
    let mut due = None;
    let mut duration = None;
    let mut start_tz = None;
    let mut end_tz = None;
    let comp = &ical.components[main_comp_id as usize];

    for (entry_id, entry) in comp.entries.iter().enumerate() {
        match &entry.name {
            ICalendarProperty::Organizer => {
                if facts.organizer.is_none() {
                    facts.organizer = parse_participant(entry_id as u16, entry);
                }
            }
            ICalendarProperty::Attendee => {
                if let Some(part) = parse_participant(entry_id as u16, entry) {
                    facts.attendees.push(part);
                }
            }
            ICalendarProperty::Summary => {
                facts.summary = entry
                    .values
                    .first()
                    .and_then(|v| v.as_text())
                    .map(|v| v.to_string());
            }
            ICalendarProperty::Sequence => {
                facts.sequence = entry.values.first().and_then(|v| v.as_integer());
            }
            ICalendarProperty::Rrule | ICalendarProperty::Rdate => {
                facts.is_recurring = true;
            }
            ICalendarProperty::RecurrenceId => {
                if let Some(date) = entry.values.first().and_then(|v| v.as_partial_date_time()) {
                    let tz = tz_resolver
                        .get_or_insert_with(|| ical.build_tz_resolver())
                        .resolve_or_default(entry.tz_id());
                    facts.recurrence_id = Some(
                        date.to_date_time_with_tz(tz)
                            .map(|dt| dt.timestamp())
                            .unwrap_or_else(|| date.to_timestamp().unwrap_or_default()),
                    );
                    facts.this_and_future = entry
                        .params
                        .iter()
                        .any(|param| matches!(param.name, ICalendarParameterName::Range));
                }
            }
            ICalendarProperty::Dtstart | ICalendarProperty::Dtend | ICalendarProperty::Due => {
                if let Some(date) = entry.values.first().and_then(|v| v.as_partial_date_time()) {
                    let tz = tz_resolver
                        .get_or_insert_with(|| ical.build_tz_resolver())
                        .resolve_or_default(entry.tz_id());
                    let timestamp = date
                        .to_date_time_with_tz(tz)
                        .map(|dt| dt.timestamp())
                        .unwrap_or_else(|| date.to_timestamp().unwrap_or_default());
                    match entry.name {
                        ICalendarProperty::Dtstart => {
                            facts.start = Some(timestamp);
                            start_tz = Some(tz);
                        }
                        ICalendarProperty::Dtend => {
                            end = Some(timestamp);
                            end_tz = Some(tz);
                        }
                        _ => {
                            due = Some(timestamp);
                        }
                    }
                }
            }
            ICalendarProperty::Duration => {
                if let Some(ICalendarValue::Duration(value)) = entry.values.first() {
                    duration = Some(value.as_seconds());
                }
            }
            ICalendarProperty::Other(name) => {
                if name.eq_ignore_ascii_case("X-EVOLUTION-DELEGATOR-ADDRESS") {
                    delegator_address = entry
                        .values
                        .first()
                        .and_then(|v| v.as_text())
                        .and_then(mail_address);
                } else if name.eq_ignore_ascii_case("X-EVOLUTION-DELEGATOR-NAME") {
                    delegator_name = entry
                        .values
                        .first()
                        .and_then(|v| v.as_text())
                        .map(|v| v.to_string());
                }
            }
            _ => {}
        }
    }

    facts.end = end.or(due).or_else(|| {
        duration.and_then(|duration| facts.start.map(|start| start + duration))
    });

    // DATE-valued events end on an exclusive date; pull the display range
    // back one day so a one-day event shows as one day.
    if let (Some(start_ts), Some(end_ts)) = (facts.start, facts.end) {
        let span = end_ts - start_ts;
        if span > 0
            && span % 86400 == 0
            && is_midnight(start_ts, start_tz)
            && is_midnight(end_ts, end_tz.or(start_tz))
        {
            facts.all_day = true;
            facts.end = Some(end_ts - 86400);
        }
    }

    // An explicit delegator override wins over DELEGATED-FROM, which is
    // resolved against the matched attendee later.
    if let Some(address) = delegator_address {
        facts.delegator = Some(Participant {
            email: address,
            name: delegator_name,
            ..Default::default()
        });
    }

    facts
}

impl Invitation {
    pub fn parse(raw: &str) -> Result<Invitation, ParseError> {
        let ical = ICalendar::parse(raw).map_err(|_| ParseError::InvalidCalendar)?;
        Invitation::from_ical(ical)
    }

    pub fn from_ical(ical: ICalendar) -> Result<Invitation, ParseError> {
        // Strip unusable alarms before any component id is recorded;
        // removal renumbers the component table.
        let (ical, stripped_alarms) = alarm::without_procedural_alarms(ical);

        let root = ical
            .components
            .first()
            .filter(|comp| comp.component_type == ICalendarComponentType::VCalendar)
            .ok_or(ParseError::InvalidCalendar)?;
        let mut method = method_entry(root).cloned();

        // Group scheduling components by UID; the first group is the one
        // this invitation is about, detached instances fold into it.
        let mut item_kind = None;
        let mut primary_uid: Option<String> = None;
        let mut extra_uids: Vec<String> = Vec::new();
        let mut group: Vec<u16> = Vec::new();
        let mut timezone_ids = Vec::new();

        for (comp_id, comp) in ical.components.iter().enumerate() {
            if comp.component_type == ICalendarComponentType::VTimezone {
                timezone_ids.push(comp_id as u16);
                continue;
            }
            // Free/busy data cannot be the displayed item, but it still
            // counts as one: a payload mixing it with an event is a
            // multi-item attachment.
            if comp.component_type == ICalendarComponentType::VFreebusy {
                let uid = comp.uid().unwrap_or_default().to_string();
                if !extra_uids.contains(&uid) {
                    extra_uids.push(uid);
                }
                continue;
            }
            let Some(kind) = item_kind_of(&comp.component_type) else {
                continue;
            };
            if method.is_none() {
                method = method_entry(comp).cloned();
            }
            let uid = comp.uid().unwrap_or_default().to_string();
            match &primary_uid {
                None => {
                    primary_uid = Some(uid);
                    item_kind = Some(kind);
                    group.push(comp_id as u16);
                }
                Some(primary) if *primary == uid && item_kind == Some(kind) => {
                    group.push(comp_id as u16);
                }
                Some(_) => {
                    if !extra_uids.contains(&uid) {
                        extra_uids.push(uid);
                    }
                }
            }
        }

        let item_kind = item_kind.ok_or(ParseError::NoSupportedComponent)?;
        let uid = primary_uid.unwrap_or_default();

        // The master carries no RECURRENCE-ID; without one the first
        // component of the group stands in for it.
        let main_comp_id = group
            .iter()
            .copied()
            .find(|comp_id| {
                !ical.components[*comp_id as usize]
                    .entries
                    .iter()
                    .any(|entry| entry.name == ICalendarProperty::RecurrenceId)
            })
            .unwrap_or(group[0]);
        let detached_ids: Vec<u16> = group
            .iter()
            .copied()
            .filter(|comp_id| *comp_id != main_comp_id)
            .collect();

        let facts = extract_main(&ical, main_comp_id);
        let has_alarms = std::iter::once(main_comp_id)
            .chain(detached_ids.iter().copied())
            .any(|comp_id| alarm::has_alarms(&ical, comp_id));

        Ok(Invitation {
            ical,
            method: method.unwrap_or(ICalendarMethod::Publish),
            item_kind,
            uid,
            summary: facts.summary,
            sequence: facts.sequence,
            main_comp_id,
            detached_ids,
            timezone_ids,
            extra_uids,
            organizer: facts.organizer,
            attendees: facts.attendees,
            delegator: facts.delegator,
            recurrence_id: facts.recurrence_id,
            this_and_future: facts.this_and_future,
            is_recurring: facts.is_recurring,
            has_alarms,
            stripped_alarms,
            start: facts.start,
            end: facts.end,
            all_day: facts.all_day,
        })
    }

    /// The primary component followed by its detached instances.
    pub fn group_ids(&self) -> impl Iterator<Item = u16> + '_ {
        std::iter::once(self.main_comp_id).chain(self.detached_ids.iter().copied())
    }

    pub fn main_component(&self) -> &ICalendarComponent {
        &self.ical.components[self.main_comp_id as usize]
    }

    pub fn is_multi_item(&self) -> bool {
        !self.extra_uids.is_empty()
    }

    pub fn has_attendees(&self) -> bool {
        !self.attendees.is_empty()
    }

    pub fn attendee_by_email(&self, email: &str) -> Option<&Participant> {
        self.attendees
            .iter()
            .find(|attendee| attendee.email.eq_ignore_ascii_case(email))
    }

    /// Raw iCalendar text, for saving the attachment or forwarding it.
    pub fn to_ical_string(&self) -> String {
        self.ical.to_string()
    }
}

fn is_midnight(timestamp: i64, tz: Option<Tz>) -> bool {
    use chrono::TimeZone;
    match tz {
        Some(tz) => tz
            .timestamp_opt(timestamp, 0)
            .single()
            .is_some_and(|dt| dt.time() == chrono::NaiveTime::MIN),
        None => timestamp % 86400 == 0,
    }
}
