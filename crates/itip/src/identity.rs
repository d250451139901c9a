/*
 * SPDX-FileCopyrightText: 2025 Halcyon Groupware Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::invitation::{Invitation, Participant};
use registry::{Identity, Registry};

/// Which configured identity an invitation is addressed to, and how the
/// match was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub address: String,
    pub name: Option<String>,
    /// Index into the invitation's attendee list, when an ATTENDEE entry
    /// matched. Responses mutate exactly this entry.
    pub attendee: Option<usize>,
    pub via_sent_by: bool,
    /// Set when the organizer does not expect a reply: RSVP=FALSE on the
    /// matched attendee, no attendee matched, or no attendees at all.
    pub no_reply_wanted: bool,
    /// Who delegated the meeting to this identity, when the matched
    /// attendee was delegated to.
    pub delegator: Option<String>,
}

/// The counterparty the invitation came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSender {
    pub address: String,
    pub name: Option<String>,
    /// The SENT-BY agent acting for the organizer, when present.
    pub sent_by: Option<String>,
}

fn identity_order<'x>(
    registry: &'x Registry,
    folder_hint: Option<&str>,
) -> impl Iterator<Item = &'x Identity> + 'x {
    let hinted = folder_hint.and_then(|hint| registry.identity_matching(hint));
    hinted.into_iter().chain(
        registry
            .identities
            .iter()
            .filter(move |identity| !hinted.is_some_and(|h| std::ptr::eq(h, *identity))),
    )
}

fn attendee_matches(identity: &Identity, attendee: &Participant) -> bool {
    identity.covers(&attendee.email)
}

fn sent_by_matches(identity: &Identity, attendee: &Participant) -> bool {
    attendee
        .sent_by
        .as_deref()
        .is_some_and(|sent_by| identity.covers(sent_by))
}

fn resolved(
    identity: &Identity,
    invitation: &Invitation,
    attendee_idx: usize,
    via_sent_by: bool,
) -> ResolvedIdentity {
    let attendee = &invitation.attendees[attendee_idx];
    ResolvedIdentity {
        address: identity.address.to_lowercase(),
        name: attendee.name.clone().or_else(|| identity.name.clone()),
        attendee: Some(attendee_idx),
        via_sent_by,
        no_reply_wanted: attendee.rsvp == Some(false),
        delegator: invitation
            .delegator
            .as_ref()
            .map(|d| d.email.clone())
            .or_else(|| attendee.delegated_from.first().cloned()),
    }
}

/// Finds the identity this invitation was sent to. Scans the folder-hint
/// identity first, then every identity and alias against the ATTENDEE
/// entries, then against their SENT-BY agents. Falls back to the hinted
/// (or first) identity with no attendee attached, which also means the
/// organizer cannot receive a reply from us.
pub fn resolve_to_address(
    registry: &Registry,
    invitation: &Invitation,
    folder_hint: Option<&str>,
) -> Option<ResolvedIdentity> {
    if invitation.has_attendees() {
        for identity in identity_order(registry, folder_hint) {
            if let Some(idx) = invitation
                .attendees
                .iter()
                .position(|attendee| attendee_matches(identity, attendee))
            {
                return Some(resolved(identity, invitation, idx, false));
            }
        }
        for identity in identity_order(registry, folder_hint) {
            if let Some(idx) = invitation
                .attendees
                .iter()
                .position(|attendee| sent_by_matches(identity, attendee))
            {
                return Some(resolved(identity, invitation, idx, true));
            }
        }
    }

    identity_order(registry, folder_hint)
        .next()
        .map(|identity| ResolvedIdentity {
            address: identity.address.to_lowercase(),
            name: identity.name.clone(),
            attendee: None,
            via_sent_by: false,
            no_reply_wanted: true,
            delegator: invitation.delegator.as_ref().map(|d| d.email.clone()),
        })
}

/// Finds who the invitation is from: the ORGANIZER, or for replies and
/// counters the first ATTENDEE.
pub fn resolve_from_address(invitation: &Invitation) -> Option<ResolvedSender> {
    invitation
        .organizer
        .as_ref()
        .or_else(|| invitation.attendees.first())
        .map(|part| ResolvedSender {
            address: part.email.clone(),
            name: part.name.clone(),
            sent_by: part.sent_by.clone(),
        })
}
