// SPDX-FileCopyrightText: 2026 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

pub mod challenges;
pub mod db;
pub mod descriptor;
mod error;
pub mod instances;
mod manager;
pub mod ports;
pub mod runtime;
pub mod settings;
pub mod utils;
pub mod workspace;

pub use error::ManagerError;
pub use manager::ChallengeManager;
