///
/// TrackingOptions
///
/// Per-session tracking policy.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TrackingOptions {
    auto_detect_changes: bool,
    relationship_fixup: bool,
    debug: bool,
}

impl TrackingOptions {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            auto_detect_changes: true,
            relationship_fixup: true,
            debug: false,
        }
    }

    /// Run `detect_changes` at the start of every save.
    #[must_use]
    pub const fn auto_detect_changes(mut self, enabled: bool) -> Self {
        self.auto_detect_changes = enabled;
        self
    }

    /// Install the relationship fixer as the first state listener.
    #[must_use]
    pub const fn relationship_fixup(mut self, enabled: bool) -> Self {
        self.relationship_fixup = enabled;
        self
    }

    /// Emit trace events for every transition.
    #[must_use]
    pub const fn debug(mut self) -> Self {
        self.debug = true;
        self
    }

    #[must_use]
    pub const fn detects_changes_on_save(&self) -> bool {
        self.auto_detect_changes
    }

    #[must_use]
    pub const fn fixes_relationships(&self) -> bool {
        self.relationship_fixup
    }

    #[must_use]
    pub const fn is_debug(&self) -> bool {
        self.debug
    }
}

impl Default for TrackingOptions {
    fn default() -> Self {
        Self::new()
    }
}
