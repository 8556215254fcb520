// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod loader;
mod record;
mod settings;
mod store;

pub use loader::load;
pub use record::{ConfigRecord, OperatorId};
pub use settings::*;
pub use store::ConfigStore;
