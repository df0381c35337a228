// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS `Time_t` / `Duration_t`: signed seconds plus a 2^-32 fraction.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

const NANOS_PER_SEC: u64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Time {
    pub seconds: i32,
    pub fraction: u32,
}

impl Time {
    pub const ZERO: Time = Time {
        seconds: 0,
        fraction: 0,
    };
    /// `TIME_INFINITE` / `DURATION_INFINITE`.
    pub const INFINITE: Time = Time {
        seconds: 0x7FFF_FFFF,
        fraction: 0xFFFF_FFFF,
    };
    /// `TIME_INVALID`.
    pub const INVALID: Time = Time {
        seconds: -1,
        fraction: 0xFFFF_FFFF,
    };

    pub const fn new(seconds: i32, fraction: u32) -> Self {
        Self { seconds, fraction }
    }

    /// Wall-clock time since the UNIX epoch.
    pub fn now() -> Self {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(Self::from_duration)
            .unwrap_or(Self::ZERO)
    }

    /// Saturates to [`Time::INFINITE`] past `i32::MAX` seconds.
    pub fn from_duration(d: Duration) -> Self {
        let Ok(seconds) = i32::try_from(d.as_secs()) else {
            return Self::INFINITE;
        };
        let fraction = ((u64::from(d.subsec_nanos()) << 32) / NANOS_PER_SEC) as u32;
        Self { seconds, fraction }
    }

    /// `None` for negative or infinite values.
    pub fn to_duration(self) -> Option<Duration> {
        if self.seconds < 0 || self.is_infinite() {
            return None;
        }
        let nanos = (u64::from(self.fraction) * NANOS_PER_SEC) >> 32;
        Some(Duration::new(self.seconds as u64, nanos as u32))
    }

    pub fn is_infinite(self) -> bool {
        self == Self::INFINITE
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::from_duration(Duration::from_millis(ms))
    }
}

impl From<Duration> for Time {
    fn from(d: Duration) -> Self {
        Self::from_duration(d)
    }
}
