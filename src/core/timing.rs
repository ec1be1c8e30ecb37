// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Event-driven timing
//!
//! Components register named events and schedule them a number of ARM11
//! cycles into the future. The owner of the emulated clock adds elapsed ticks
//! and calls [`TimingEventManager::run_events`], which returns the handles of
//! every event that came due. Events are one-shot: a periodic component
//! reschedules itself from its event callback, using
//! [`TimingEventManager::cycles_late`] to stay drift-free.

/// Handle to a registered timing event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventHandle(usize);

/// A registered timing event
#[derive(Debug)]
struct TimingEvent {
    /// Name used in log output
    name: String,
    /// Absolute tick at which the event fires
    target: u64,
    /// Whether the event is currently scheduled
    active: bool,
    /// How many ticks past `target` the event was when it last fired
    cycles_late: i64,
}

/// Timing event manager
///
/// # Example
///
/// ```
/// use ctr_hle::core::timing::TimingEventManager;
///
/// let mut timing = TimingEventManager::new();
/// let handle = timing.register_event("Example");
/// timing.schedule(handle, 100);
///
/// timing.add_ticks(99);
/// assert!(timing.run_events().is_empty());
///
/// timing.add_ticks(5);
/// assert_eq!(timing.run_events(), vec![handle]);
/// assert_eq!(timing.cycles_late(handle), 4);
/// ```
pub struct TimingEventManager {
    /// Ticks already committed by `run_events`
    pub global_tick_counter: u64,
    /// Ticks added since the last `run_events`
    pub pending_ticks: u64,
    /// Ticks until the earliest scheduled event (relative to the last commit)
    pub downcount: u64,
    /// Registered events, indexed by handle
    events: Vec<TimingEvent>,
}

impl TimingEventManager {
    /// Create an empty timing manager at tick 0
    pub fn new() -> Self {
        Self {
            global_tick_counter: 0,
            pending_ticks: 0,
            downcount: u64::MAX,
            events: Vec::new(),
        }
    }

    /// Register a new (inactive) event
    ///
    /// # Arguments
    ///
    /// * `name` - Human readable event name, used in log output
    ///
    /// # Returns
    ///
    /// Handle used to schedule and identify the event
    pub fn register_event(&mut self, name: &str) -> EventHandle {
        let handle = EventHandle(self.events.len());
        self.events.push(TimingEvent {
            name: name.to_string(),
            target: 0,
            active: false,
            cycles_late: 0,
        });
        log::debug!("Timing: registered event '{}' ({:?})", name, handle);
        handle
    }

    /// Current time in ticks, including ticks not yet committed
    #[inline(always)]
    pub fn now(&self) -> u64 {
        self.global_tick_counter + self.pending_ticks
    }

    /// Schedule an event `cycles` ticks into the future
    ///
    /// Negative delays (a reschedule that is already overdue) fire on the
    /// next `run_events`.
    ///
    /// # Arguments
    ///
    /// * `handle` - Event to schedule
    /// * `cycles` - Delay in ticks from now
    pub fn schedule(&mut self, handle: EventHandle, cycles: i64) {
        let now = self.now();
        let global = self.global_tick_counter;
        let event = &mut self.events[handle.0];
        event.target = now.saturating_add_signed(cycles.max(0));
        event.active = true;

        let relative = event.target.saturating_sub(global);
        self.downcount = self.downcount.min(relative);

        log::trace!(
            "Timing: '{}' scheduled for tick {}",
            event.name,
            event.target
        );
    }

    /// Remove an event from the schedule
    pub fn deactivate(&mut self, handle: EventHandle) {
        let event = &mut self.events[handle.0];
        if event.active {
            log::trace!("Timing: '{}' unscheduled", event.name);
        }
        event.active = false;
        self.recompute_downcount();
    }

    /// Whether the event is currently scheduled
    pub fn is_scheduled(&self, handle: EventHandle) -> bool {
        self.events[handle.0].active
    }

    /// Registered name of an event
    pub fn name(&self, handle: EventHandle) -> &str {
        &self.events[handle.0].name
    }

    /// Lateness of the event's most recent firing, in ticks
    pub fn cycles_late(&self, handle: EventHandle) -> i64 {
        self.events[handle.0].cycles_late
    }

    /// Advance emulated time
    #[inline(always)]
    pub fn add_ticks(&mut self, ticks: u64) {
        self.pending_ticks += ticks;
    }

    /// Whether enough ticks are pending for at least one event to fire
    #[inline(always)]
    pub fn events_due(&self) -> bool {
        self.pending_ticks >= self.downcount
    }

    /// Commit pending ticks and collect the events that came due
    ///
    /// Fired events are deactivated. The returned handles are ordered by
    /// their scheduled tick (registration order breaks ties).
    ///
    /// # Returns
    ///
    /// Handles of the events that fired
    pub fn run_events(&mut self) -> Vec<EventHandle> {
        self.global_tick_counter += self.pending_ticks;
        self.pending_ticks = 0;

        let now = self.global_tick_counter;
        let mut fired: Vec<(u64, EventHandle)> = self
            .events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.active && e.target <= now)
            .map(|(i, e)| (e.target, EventHandle(i)))
            .collect();
        fired.sort();

        for &(target, handle) in &fired {
            let event = &mut self.events[handle.0];
            event.active = false;
            event.cycles_late = (now - target) as i64;
            log::trace!(
                "Timing: '{}' fired ({} cycles late)",
                event.name,
                event.cycles_late
            );
        }

        self.recompute_downcount();
        fired.into_iter().map(|(_, handle)| handle).collect()
    }

    fn recompute_downcount(&mut self) {
        let global = self.global_tick_counter;
        self.downcount = self
            .events
            .iter()
            .filter(|e| e.active)
            .map(|e| e.target.saturating_sub(global))
            .min()
            .unwrap_or(u64::MAX);
    }
}

impl Default for TimingEventManager {
    fn default() -> Self {
        Self::new()
    }
}
