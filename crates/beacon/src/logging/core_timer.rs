// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct TimerState {
    started_at: Option<Instant>,
    elapsed: Option<Duration>,
}

/// Stopwatch for external performance instrumentation.
///
/// `stop` records the time since the last `start`; `get` returns the last recorded value.
#[derive(Debug, Default)]
pub struct CoreTimer {
    state: Mutex<TimerState>,
}

impl CoreTimer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.started_at = Some(Instant::now());
    }

    /// Records and returns the time since `start`, or `None` if the timer never started.
    pub fn stop(&self) -> Option<Duration> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let elapsed = state.started_at.take().map(|started| started.elapsed());
        if elapsed.is_some() {
            state.elapsed = elapsed;
        }
        elapsed
    }

    /// Overrides the recorded time, for callers that measure on their own.
    pub fn set(&self, elapsed: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.elapsed = Some(elapsed);
    }

    #[must_use]
    pub fn get(&self) -> Option<Duration> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.elapsed
    }
}
