//! Record of interactions seen by the controller
//!
//! Every started trace leaves a sighting behind. The sighting of the trace
//! before the current one is attached to it as `previous_activity`, which lets
//! a collector reconstruct navigation between screens.

use crate::domain::{Duration, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivitySighting {
    name: String,
    started_at: Timestamp,
    duration: Option<Duration>,
}

impl ActivitySighting {
    #[must_use]
    pub fn new(name: impl Into<String>, started_at: Timestamp) -> Self {
        Self { name: name.into(), started_at, duration: None }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    /// `None` while the interaction is still running
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    fn end(&mut self, ended_at: Timestamp) {
        if self.duration.is_none() {
            self.duration = Some(ended_at.saturating_since(self.started_at));
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ActivityHistory {
    sightings: Vec<ActivitySighting>,
}

impl ActivityHistory {
    pub(crate) fn record(&mut self, sighting: ActivitySighting) {
        self.sightings.push(sighting);
    }

    pub(crate) fn last(&self) -> Option<&ActivitySighting> {
        self.sightings.last()
    }

    /// Close the most recent sighting; no-op if it already ended
    pub(crate) fn end_last(&mut self, ended_at: Timestamp) {
        if let Some(last) = self.sightings.last_mut() {
            last.end(ended_at);
        }
    }

    /// Rename every sighting recorded as `from`
    pub(crate) fn rename(&mut self, from: &str, to: &str) {
        for sighting in self.sightings.iter_mut().filter(|s| s.name == from) {
            sighting.name = to.to_string();
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<ActivitySighting> {
        self.sightings.clone()
    }

    pub(crate) fn clear(&mut self) {
        self.sightings.clear();
    }
}
