//! Dashboard orchestrator.
//!
//! Each session owns one orchestrator. TPAs contribute short text items to
//! one or more mode queues. The user's system app owns the four corner
//! sections, the active mode and the always-on overlay. The orchestrator
//! composes the active mode into a layout and hands it to a
//! [`DisplaySink`](crate::display::DisplaySink).
//!
//! Two independent lanes are rendered: the primary dashboard view (active
//! mode) and the always-on overlay. Each lane has its own throttle. A TPA
//! leaving bypasses the throttle so its content never outlives it on the
//! display.

pub mod compose;
pub mod notifications;
pub mod queue;
pub mod throttle;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use halo_core::RelayError;
use halo_core::errors::Result;
use halo_core::messages::{DashboardMode, DisplayView, Layout, SystemSection};
use halo_settings::DashboardSettings;
use metrics::counter;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::display::{DisplayOptions, DisplaySink};
use crate::metrics::DASHBOARD_RENDERS_TOTAL;
use crate::session::resources::ResourceTracker;

use self::compose::{SystemSections, compose, visible_items};
use self::notifications::NotificationCache;
use self::queue::{ContentItem, ContentQueue};
use self::throttle::{Throttle, ThrottleDecision};

/// Dashboard limits and pacing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DashboardConfig {
    /// Minimum time between two renders on one lane.
    pub throttle: Duration,
    /// Items kept per mode.
    pub queue_size: usize,
    /// Largest accepted contribution in bytes.
    pub max_content_bytes: usize,
    /// Notifications remembered for de-duplication.
    pub notification_cache_size: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self::from(&DashboardSettings::default())
    }
}

impl From<&DashboardSettings> for DashboardConfig {
    fn from(s: &DashboardSettings) -> Self {
        Self {
            throttle: Duration::from_millis(s.update_throttle_ms),
            queue_size: s.queue_size,
            max_content_bytes: s.max_content_bytes,
            notification_cache_size: s.notification_cache_size,
        }
    }
}

/// Independently throttled render target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lane {
    /// The dashboard view showing the active mode.
    Primary,
    /// The always-on overlay.
    AlwaysOn,
}

impl Lane {
    /// Label value used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::AlwaysOn => "always_on",
        }
    }

    fn view(self) -> DisplayView {
        match self {
            Self::Primary => DisplayView::Dashboard,
            Self::AlwaysOn => DisplayView::AlwaysOn,
        }
    }
}

/// Receives "a throttled render is due" for a lane.
///
/// The session actor implements this by posting a command to itself, so the
/// render runs on the actor like every other dashboard mutation.
pub trait FlushSignal: Send + Sync {
    /// Ask for [`DashboardOrchestrator::flush`] to be called for `lane`.
    fn request_flush(&self, lane: Lane);
}

/// State change TPAs must be told about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DashboardNotice {
    /// The active mode changed.
    ModeChanged(Option<DashboardMode>),
    /// The always-on overlay was toggled.
    AlwaysOnChanged(bool),
}

/// One session's dashboard.
pub struct DashboardOrchestrator {
    config: DashboardConfig,
    system_app: String,
    mode: Option<DashboardMode>,
    always_on_enabled: bool,
    queues: HashMap<DashboardMode, ContentQueue>,
    sections: SystemSections,
    notifications: NotificationCache,
    primary: Throttle,
    overlay: Throttle,
    sink: Arc<dyn DisplaySink>,
    timers: Arc<ResourceTracker>,
    flush: Arc<dyn FlushSignal>,
    released: bool,
}

impl DashboardOrchestrator {
    /// Orchestrator starting in main mode with the overlay off.
    pub fn new(
        config: DashboardConfig,
        system_app: impl Into<String>,
        sink: Arc<dyn DisplaySink>,
        timers: Arc<ResourceTracker>,
        flush: Arc<dyn FlushSignal>,
    ) -> Self {
        let queues = DashboardMode::ALL
            .into_iter()
            .map(|mode| (mode, ContentQueue::new(config.queue_size)))
            .collect();
        Self {
            config,
            system_app: system_app.into(),
            mode: Some(DashboardMode::Main),
            always_on_enabled: false,
            queues,
            sections: SystemSections::default(),
            notifications: NotificationCache::new(config.notification_cache_size),
            primary: Throttle::new(config.throttle),
            overlay: Throttle::new(config.throttle),
            sink,
            timers,
            flush,
            released: false,
        }
    }

    /// Package allowed to drive the dashboard.
    pub fn system_app(&self) -> &str {
        &self.system_app
    }

    /// Active mode; `None` hides the dashboard.
    pub fn mode(&self) -> Option<DashboardMode> {
        self.mode
    }

    /// Whether the always-on overlay is shown.
    pub fn always_on_enabled(&self) -> bool {
        self.always_on_enabled
    }

    /// Queue for a mode.
    pub fn queue(&self, mode: DashboardMode) -> Option<&ContentQueue> {
        self.queues.get(&mode)
    }

    /// Current text of a system section.
    pub fn section(&self, section: SystemSection) -> &str {
        self.sections.get(section)
    }

    // ── System app operations ──────────────────────────────────────────

    /// Replace one of the four corner sections.
    pub fn set_system_section(
        &mut self,
        sender: &str,
        section: SystemSection,
        content: String,
    ) -> Result<()> {
        self.authorize(sender, "dashboard_system_update")?;
        if self.sections.set(section, content) {
            self.request_active_lanes();
        }
        Ok(())
    }

    /// Switch the active mode. Returns a notice when the mode changed.
    pub fn set_mode(
        &mut self,
        sender: &str,
        mode: Option<DashboardMode>,
    ) -> Result<Option<DashboardNotice>> {
        self.authorize(sender, "dashboard_mode_change")?;
        if self.mode == mode {
            return Ok(None);
        }
        info!(from = ?self.mode, to = ?mode, "dashboard mode changed");
        self.mode = mode;
        self.request(Lane::Primary);
        Ok(Some(DashboardNotice::ModeChanged(mode)))
    }

    /// Toggle the always-on overlay. Returns a notice when it changed.
    pub fn set_always_on_enabled(
        &mut self,
        sender: &str,
        enabled: bool,
    ) -> Result<Option<DashboardNotice>> {
        self.authorize(sender, "dashboard_always_on_change")?;
        if self.always_on_enabled == enabled {
            return Ok(None);
        }
        info!(enabled, "always-on overlay toggled");
        self.always_on_enabled = enabled;
        self.request(Lane::AlwaysOn);
        Ok(Some(DashboardNotice::AlwaysOnChanged(enabled)))
    }

    // ── TPA operations ─────────────────────────────────────────────────

    /// Add or replace `package_name`'s item in each of `modes`.
    pub fn contribute_content(
        &mut self,
        package_name: &str,
        content: String,
        modes: &[DashboardMode],
    ) -> Result<()> {
        if modes.is_empty() {
            warn!(package_name, "content update without target modes rejected");
            return Err(RelayError::ContentRejected("no target modes".into()));
        }
        if content.len() > self.config.max_content_bytes {
            warn!(
                package_name,
                bytes = content.len(),
                max = self.config.max_content_bytes,
                "oversized content update rejected"
            );
            return Err(RelayError::ContentRejected(format!(
                "content is {} bytes, limit is {}",
                content.len(),
                self.config.max_content_bytes
            )));
        }

        let targets: BTreeSet<DashboardMode> = modes.iter().copied().collect();
        let mut dirty = LaneSet::default();
        for mode in targets {
            let Some(queue) = self.queues.get_mut(&mode) else {
                continue;
            };
            if queue.upsert(ContentItem::new(package_name, content.clone()), visible_items(mode)) {
                dirty.mark_for(mode, self.mode, self.always_on_enabled);
            }
        }
        debug!(package_name, ?dirty, "content contributed");
        if dirty.primary {
            self.request(Lane::Primary);
        }
        if dirty.always_on {
            self.request(Lane::AlwaysOn);
        }
        Ok(())
    }

    /// Drop everything a departed TPA contributed and re-render at once.
    ///
    /// If the TPA is the system app, the corner sections are cleared too.
    pub fn on_tpa_disconnected(&mut self, package_name: &str) {
        let mut dirty = LaneSet::default();
        for (mode, queue) in &mut self.queues {
            if queue
                .remove_package(package_name, visible_items(*mode))
                .visible_changed
            {
                dirty.mark_for(*mode, self.mode, self.always_on_enabled);
            }
        }
        if package_name == self.system_app && self.sections.clear() {
            dirty.primary |= self.mode.is_some();
            dirty.always_on |= self.always_on_enabled;
        }
        if dirty.primary {
            self.render_now(Lane::Primary);
        }
        if dirty.always_on {
            self.render_now(Lane::AlwaysOn);
        }
    }

    /// Remember a phone notification. Returns `false` for a duplicate of the last one.
    pub fn record_notification(&mut self, app: &str, title: &str, content: &str) -> bool {
        self.notifications.record(app, title, content)
    }

    /// Cached notifications.
    pub fn notifications(&self) -> &NotificationCache {
        &self.notifications
    }

    // ── Rendering ──────────────────────────────────────────────────────

    /// A throttle timer fired for `lane`.
    pub fn flush(&mut self, lane: Lane) {
        if self.throttle(lane).on_timer() {
            self.emit(lane);
        }
    }

    /// Re-render both lanes immediately (new glasses socket).
    pub fn refresh(&mut self) {
        self.render_now(Lane::Primary);
        if self.always_on_enabled {
            self.render_now(Lane::AlwaysOn);
        }
    }

    /// Stop rendering for good.
    pub fn release(&mut self) {
        self.released = true;
        for queue in self.queues.values_mut() {
            queue.clear();
        }
    }

    /// Layout the lane would show right now.
    pub fn layout(&self, lane: Lane) -> Layout {
        let mode = match lane {
            Lane::Primary => self.mode,
            Lane::AlwaysOn => self.always_on_enabled.then_some(DashboardMode::AlwaysOn),
        };
        match mode.and_then(|m| self.queues.get(&m).map(|q| (m, q))) {
            Some((mode, queue)) => compose(mode, &self.sections, queue),
            None => Layout::Empty,
        }
    }

    fn authorize(&self, sender: &str, operation: &str) -> Result<()> {
        if sender == self.system_app {
            Ok(())
        } else {
            warn!(sender, operation, "dashboard operation reserved for the system app");
            Err(RelayError::Unauthorized(format!(
                "{operation} is reserved for the system app"
            )))
        }
    }

    fn request_active_lanes(&mut self) {
        if self.mode.is_some() {
            self.request(Lane::Primary);
        }
        if self.always_on_enabled {
            self.request(Lane::AlwaysOn);
        }
    }

    fn request(&mut self, lane: Lane) {
        if self.released {
            return;
        }
        match self.throttle(lane).request(Instant::now()) {
            ThrottleDecision::EmitNow => self.emit(lane),
            ThrottleDecision::Schedule(delay) => {
                let flush = self.flush.clone();
                let _ = self
                    .timers
                    .spawn_after(delay, move || flush.request_flush(lane));
            }
            ThrottleDecision::Coalesced => {}
        }
    }

    fn render_now(&mut self, lane: Lane) {
        if !self.released {
            self.emit(lane);
        }
    }

    fn emit(&mut self, lane: Lane) {
        if self.released {
            return;
        }
        self.throttle(lane).on_emit(Instant::now());
        let layout = self.layout(lane);
        let delivered = self
            .sink
            .show(&self.system_app, &layout, &DisplayOptions::view(lane.view()));
        counter!(DASHBOARD_RENDERS_TOTAL, "lane" => lane.as_str()).increment(1);
        debug!(lane = lane.as_str(), delivered, "dashboard rendered");
    }

    fn throttle(&mut self, lane: Lane) -> &mut Throttle {
        match lane {
            Lane::Primary => &mut self.primary,
            Lane::AlwaysOn => &mut self.overlay,
        }
    }
}

#[derive(Debug, Default)]
struct LaneSet {
    primary: bool,
    always_on: bool,
}

impl LaneSet {
    fn mark_for(&mut self, mode: DashboardMode, active: Option<DashboardMode>, overlay: bool) {
        if active == Some(mode) {
            self.primary = true;
        }
        if mode == DashboardMode::AlwaysOn && overlay {
            self.always_on = true;
        }
    }
}
