/*
 * SPDX-FileCopyrightText: 2025 Halcyon Groupware Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod backend;
pub mod error;
pub mod identity;
pub mod invitation;
pub mod lookup;
pub mod machine;
pub mod session;

pub use registry::{FolderKind, ItemKind, Registry};

pub const PROD_ID: &str = "-//Halcyon//Halcyon Groupware//EN";

/// Marker property carried on declined memos, which have no attendee
/// participation status to mutate.
pub const DECLINED_MARKER: &str = "X-GW-DECLINED";

/// When present on a committed component, tells groupware backends that the
/// response applies to every instance of a recurring item.
pub const RECUR_MOD_ALL: &str = "X-GW-RECUR-INSTANCES-MOD-TYPE";
