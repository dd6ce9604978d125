//! Visit lifecycle state machine of one browsing context.
//!
//! ```text
//!   Idle ──navigate(tracked)──▶ Active ──tick×N──▶ Active (heartbeat)
//!                                 │
//!        navigate / teardown / unload
//!                                 ▼
//!                               Closed
//! ```
//!
//! The machine performs no I/O. Every input returns the ingestion commands
//! to send, in order; the driver decides how to deliver them.

use std::time::Duration;

use pagetrail_core::routes::RouteAllowList;
use pagetrail_core::visit::{
    BeginVisitRequest, Device, ReconcileVisitsRequest, UpdateVisitRequest,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Timer resolution; one tick adds one second of elapsed time.
    pub tick: Duration,
    /// Heartbeat every this many ticks.
    pub sync_interval_ticks: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            sync_interval_ticks: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseTrigger {
    RouteChange,
    Teardown,
    Unload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveVisit {
    pub visit_id: String,
    pub route: String,
    pub elapsed_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Active(ActiveVisit),
    Closed(CloseTrigger),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackerCommand {
    Update(UpdateVisitRequest),
    Reconcile(ReconcileVisitsRequest),
    Begin(BeginVisitRequest),
}

type VisitIdSource = Box<dyn FnMut() -> String + Send>;

pub struct SessionTracker {
    user_key: Option<String>,
    /// `None` outside a browser; the tracker then never starts a visit.
    device: Option<Device>,
    routes: RouteAllowList,
    config: TrackerConfig,
    state: TrackerState,
    next_visit_id: VisitIdSource,
}

impl SessionTracker {
    pub fn new(
        user_key: Option<String>,
        device: Option<Device>,
        routes: RouteAllowList,
        config: TrackerConfig,
    ) -> Self {
        Self {
            user_key,
            device,
            routes,
            config,
            state: TrackerState::Idle,
            next_visit_id: Box::new(|| uuid::Uuid::new_v4().to_string()),
        }
    }

    /// Detect the device from a `User-Agent` string. Crawlers and empty
    /// agents yield a tracker that never emits anything.
    pub fn for_user_agent(
        user_key: Option<String>,
        user_agent: &str,
        routes: RouteAllowList,
        config: TrackerConfig,
    ) -> Self {
        Self::new(user_key, Device::from_user_agent(user_agent), routes, config)
    }

    /// Replace the UUID v4 generator, e.g. with a deterministic sequence.
    pub fn with_visit_ids(mut self, source: impl FnMut() -> String + Send + 'static) -> Self {
        self.next_visit_id = Box::new(source);
        self
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn active_visit(&self) -> Option<&ActiveVisit> {
        match &self.state {
            TrackerState::Active(visit) => Some(visit),
            _ => None,
        }
    }

    /// Torn down or unloaded; no further input has any effect.
    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            TrackerState::Closed(CloseTrigger::Teardown | CloseTrigger::Unload)
        )
    }

    /// The current route changed.
    pub fn navigate(&mut self, route: &str) -> Vec<TrackerCommand> {
        if self.device.is_none() || self.is_finished() {
            return Vec::new();
        }
        let target = self.routes.resolve(route).map(str::to_string);
        if let (Some(active), Some(target)) = (self.active_visit(), target.as_deref()) {
            if active.route == target {
                return Vec::new();
            }
        }
        self.close_and_maybe_reopen(CloseTrigger::RouteChange, target)
    }

    /// One second passed.
    pub fn tick(&mut self) -> Vec<TrackerCommand> {
        let sync_every = u64::from(self.config.sync_interval_ticks.max(1));
        let TrackerState::Active(visit) = &mut self.state else {
            return Vec::new();
        };
        visit.elapsed_seconds += 1;
        if visit.elapsed_seconds % sync_every == 0 {
            vec![TrackerCommand::Update(UpdateVisitRequest {
                visit_id: visit.visit_id.clone(),
                elapsed_seconds: visit.elapsed_seconds,
            })]
        } else {
            Vec::new()
        }
    }

    /// The owning component is being destroyed.
    pub fn teardown(&mut self) -> Vec<TrackerCommand> {
        if self.is_finished() {
            return Vec::new();
        }
        self.close_and_maybe_reopen(CloseTrigger::Teardown, None)
    }

    /// The page is unloading. The flush this returns may never arrive.
    pub fn unload(&mut self) -> Vec<TrackerCommand> {
        if self.is_finished() {
            return Vec::new();
        }
        self.close_and_maybe_reopen(CloseTrigger::Unload, None)
    }

    /// The single exit path of an active visit: flush the open visit, then
    /// start one on `next_route` if given.
    fn close_and_maybe_reopen(
        &mut self,
        trigger: CloseTrigger,
        next_route: Option<String>,
    ) -> Vec<TrackerCommand> {
        let mut commands = Vec::new();

        if let TrackerState::Active(visit) =
            std::mem::replace(&mut self.state, TrackerState::Closed(trigger))
        {
            commands.push(TrackerCommand::Update(UpdateVisitRequest {
                visit_id: visit.visit_id,
                elapsed_seconds: visit.elapsed_seconds,
            }));
        }

        let (Some(route), Some(device)) = (next_route, self.device) else {
            return commands;
        };

        commands.push(TrackerCommand::Reconcile(ReconcileVisitsRequest {
            user_key: self.user_key.clone(),
        }));
        let visit_id = (self.next_visit_id)();
        commands.push(TrackerCommand::Begin(BeginVisitRequest {
            user_key: self.user_key.clone(),
            visit_id: visit_id.clone(),
            route: route.clone(),
            device,
        }));
        self.state = TrackerState::Active(ActiveVisit {
            visit_id,
            route,
            elapsed_seconds: 0,
        });
        commands
    }
}
