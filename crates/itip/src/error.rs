/*
 * SPDX-FileCopyrightText: 2025 Halcyon Groupware Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use registry::{ItemKind, SourceId};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("the attachment does not contain a valid calendar part")]
    InvalidCalendar,
    #[error("the calendar attached to this message contains no usable items")]
    NoSupportedComponent,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(
        "the calendar attached to this message contains multiple items; \
         save the attachment and import the items manually"
    )]
    MultiItemPayload,
    #[error("no {} is configured to hold this item", .0.container_label())]
    NoCalendarsFound(ItemKind),
    #[error("unable to find this item in any {}", .0.container_label())]
    NoStoredCopy(ItemKind),
    #[error("this invitation is not addressed to any configured identity")]
    IdentityNotResolved,
    #[error("a newer revision of this item is already stored")]
    ObsoleteInvitation,
    #[error("an operation is already in progress")]
    Busy,
    #[error("{source_id}: {message}")]
    CommitFailed {
        source_id: SourceId,
        message: String,
    },
    #[error("unable to send the message: {0}")]
    SendFailed(String),
}

/// A single calendar source failing during lookup. Never fatal; surfaced
/// to the user as informational text next to the result of the sources
/// that did answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to search {name}: {message}")]
pub struct LookupFailure {
    pub source_id: SourceId,
    pub name: String,
    pub message: String,
}
