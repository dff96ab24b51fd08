/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod config;
pub mod hub;
pub mod server;

pub use config::RelayConfig;
pub use hub::{ChannelId, DeliveryReport, FrameRejected, Hub, RelayDeliveryError};
pub use server::{router, serve, serve_with_shutdown, AppState};
