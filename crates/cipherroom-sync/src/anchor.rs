use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AnchorPhase {
    #[default]
    Uninitialized,
    Initialized,
    Adjusting,
}

/// Tracks `first_item_index` for a virtualized list that renders the
/// timeline oldest-first while older pages are prepended above the viewport.
///
/// Index space for all not-yet-fetched history is reserved up front from the
/// server-reported total, so prepends only ever move the index down.
#[derive(Debug, Clone, Default)]
pub struct ScrollAnchorTracker {
    phase: AnchorPhase,
    first_item_index: u64,
    total: u64,
}

impl ScrollAnchorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> AnchorPhase {
        self.phase
    }

    pub fn first_item_index(&self) -> u64 {
        self.first_item_index
    }

    /// Total conversation length reported by the most recent fetch.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// First page of the session: `first_item_index = max(0, total - fetched)`.
    pub fn on_initial_page(&mut self, total: u64, fetched: usize) -> u64 {
        self.total = total;
        self.first_item_index = total.saturating_sub(fetched as u64);
        self.phase = AnchorPhase::Initialized;
        trace!(total, fetched, first_item_index = self.first_item_index, "anchor initialized");
        self.first_item_index
    }

    /// An older page was merged; `inserted` counts only the items that were
    /// new to the timeline.
    pub fn on_older_page(&mut self, total: u64, inserted: usize) -> u64 {
        if self.phase == AnchorPhase::Uninitialized {
            warn!("older page reported before the initial page, initializing anchor");
            return self.on_initial_page(total, inserted);
        }

        self.total = total;
        self.first_item_index = self
            .first_item_index
            .saturating_sub(inserted as u64)
            .min(total);
        self.phase = AnchorPhase::Adjusting;
        trace!(total, inserted, first_item_index = self.first_item_index, "anchor adjusted");
        self.first_item_index
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
