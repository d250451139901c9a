/*
 * SPDX-FileCopyrightText: 2025 Halcyon Groupware Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use async_trait::async_trait;
use calcard::icalendar::{ICalendar, ICalendarMethod};
use registry::SourceId;
use std::sync::Arc;
use thiserror::Error;

/// The backend stores its own scheduling replies; committing an accepted
/// copy is enough and no REPLY message may be sent.
pub const CAP_SAVE_SCHEDULES: &str = "save-schedules";

/// The backend tracks unaccepted memos, so declining one is meaningful.
pub const CAP_UNACCEPTED_MEETINGS: &str = "has-unaccepted-meetings";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct BackendError(pub String);

pub type BackendResult<T> = Result<T, BackendError>;

/// Whether a modification applies to one instance of a recurring item or
/// to the whole series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectScope {
    ThisInstance,
    AllInstances,
}

/// Busy search over `[start, end)`, skipping the invitation itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeRangeQuery {
    pub start: i64,
    pub end: i64,
    pub exclude_uid: String,
}

/// An outbound scheduling message handed to the mail transport.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub method: ICalendarMethod,
    pub document: ICalendar,
    pub from: String,
    pub to: Vec<String>,
    pub summary: Option<String>,
    pub comment: Option<String>,
}

/// One opened calendar, task list or memo list.
#[async_trait]
pub trait CalendarClient: Send + Sync {
    fn source_id(&self) -> &SourceId;

    async fn is_read_only(&self) -> BackendResult<bool>;

    async fn has_capability(&self, capability: &str) -> bool;

    /// Fetches the stored copy by UID, narrowed to one recurrence instance
    /// when a RECURRENCE-ID timestamp is given.
    async fn get_object(
        &self,
        uid: &str,
        recurrence_id: Option<i64>,
    ) -> BackendResult<Option<ICalendar>>;

    async fn get_objects_in_range(&self, query: &TimeRangeQuery) -> BackendResult<Vec<ICalendar>>;

    /// Imports a scheduling document, honoring its METHOD.
    async fn receive_objects(&self, document: &ICalendar) -> BackendResult<()>;

    async fn modify_object(&self, document: &ICalendar, scope: ObjectScope) -> BackendResult<()>;
}

#[async_trait]
pub trait ClientOpener: Send + Sync {
    async fn open(&self, source: &SourceId) -> BackendResult<Arc<dyn CalendarClient>>;
}

#[async_trait]
pub trait ItipSender: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> BackendResult<()>;
}

/// Flag operations on the mail message the invitation arrived in.
#[async_trait]
pub trait MailFlags: Send + Sync {
    async fn mark_answered(&self) -> BackendResult<()>;

    async fn delete_message(&self) -> BackendResult<()>;
}
