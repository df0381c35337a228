// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire formats: RTPS submessages and discovery parameter lists.

pub mod discovery;
pub mod rtps;
