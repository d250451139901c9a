/*
 * SPDX-FileCopyrightText: 2025 Halcyon Groupware Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use calcard::icalendar::{ICalendar, ICalendarComponentType, ICalendarProperty};

fn alarm_action(ical: &ICalendar, alarm_id: u32) -> Option<&str> {
    ical.components[alarm_id as usize]
        .entries
        .iter()
        .find(|entry| entry.name == ICalendarProperty::Action)
        .and_then(|entry| entry.values.first())
        .and_then(|value| value.as_text())
}

fn is_displayable(action: Option<&str>) -> bool {
    action.is_some_and(|action| {
        action.eq_ignore_ascii_case("audio")
            || action.eq_ignore_ascii_case("display")
            || action.eq_ignore_ascii_case("email")
    })
}

/// Returns the document with procedural and unknown-action alarms filtered
/// out, plus the number of alarms dropped. Alarms a client can act on
/// (AUDIO, DISPLAY, EMAIL) are kept as-is.
pub fn without_procedural_alarms(ical: ICalendar) -> (ICalendar, usize) {
    let remove_ids: Vec<u32> = ical
        .components
        .iter()
        .enumerate()
        .filter(|(_, comp)| comp.component_type == ICalendarComponentType::VAlarm)
        .filter(|(comp_id, _)| !is_displayable(alarm_action(&ical, *comp_id as u32)))
        .map(|(comp_id, _)| comp_id as u32)
        .collect();

    if remove_ids.is_empty() {
        (ical, 0)
    } else {
        let stripped = remove_ids.len();
        let mut filtered = ical;
        filtered.remove_component_ids(&remove_ids);
        (filtered, stripped)
    }
}

pub fn has_alarms(ical: &ICalendar, comp_id: u16) -> bool {
    ical.components[comp_id as usize]
        .component_ids
        .iter()
        .any(|child_id| {
            ical.components
                .get(*child_id as usize)
                .is_some_and(|comp| comp.component_type == ICalendarComponentType::VAlarm)
        })
}
