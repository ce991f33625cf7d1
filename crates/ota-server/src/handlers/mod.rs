// SPDX-License-Identifier: MIT OR Apache-2.0
//! Route handlers.

pub mod assets;
pub mod auth;
pub mod dashboard;
pub mod manifest;
pub mod publish;
