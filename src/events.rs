/// Semantic input events delivered by the display surface.
///
/// Key bindings live in the surface implementation; the controller only sees
/// these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Navigate to the previous image.
    Left,
    /// Navigate to the next image.
    Right,
    /// Reserved while powered on.
    Up,
    /// Double-tap within five seconds toggles the host-IP overlay.
    Down,
    /// Terminate the process.
    Quit,
    /// Force the monitor off immediately.
    ForceOff,
    /// Enable clock-position editing hooks.
    ToggleEditMode,
    /// Cycle the clock anchor corner (edit mode only).
    CycleCorner,
    /// Toggle the compact date format bit (edit mode only).
    CycleSize,
    /// Cycle the clock font pair (edit mode only).
    CycleFont,
    /// Step the clock shadow offset (edit mode only).
    CycleShadow,
    /// Double-click repositions the clock overlay (edit mode only).
    DoubleClick { x: u32, y: u32 },
}

impl InputEvent {
    /// Whether this event may interrupt a transition playback.
    /// `Up` is reserved for motion sensors and must not cut animations short.
    pub fn interrupts_playback(self) -> bool {
        !matches!(self, Self::Up)
    }
}
