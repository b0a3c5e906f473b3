/*
 * meiliback - backup and restore Meilisearch indexes
 *
 * SPDX-FileCopyrightText: 2025-2026 Steve Schoettler
 * SPDX-License-Identifier: Apache-2.0
 */
//! Backup and restore of every index of a Meilisearch instance.
//!
//! - [`backup::BackupRunner`] copies settings and documents of all indexes into
//!   a [`archive::BackupStore`].
//! - [`restore::RestoreRunner`] replays a [`archive::BackupArchive`] into a
//!   target instance, applying the [`repair::RepairTable`] on the way.
//! - [`frontend`] wraps both behind two calls that return a text log.
//!
//! Progress is reported as [`events::MigrationEvent`]s.
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::format_push_string)]
#![allow(clippy::future_not_send)]
#![warn(clippy::default_trait_access)]
#![warn(clippy::doc_markdown)]
#![warn(clippy::explicit_iter_loop)]
#![warn(clippy::implicit_clone)]
#![warn(clippy::literal_string_with_formatting_args)]
#![warn(clippy::match_same_arms)]
#![warn(clippy::option_if_let_else)]
#![warn(clippy::redundant_clone)]
#![warn(clippy::ref_option)]
#![warn(clippy::redundant_closure)]
#![warn(clippy::uninlined_format_args)]
#![warn(clippy::unnecessary_wraps)]
#![warn(clippy::unused_async)]

pub mod archive;
pub mod backup;
pub mod events;
pub mod frontend;
pub mod repair;
pub mod restore;
