//! Event bus tuning knobs, mirroring this codebase's `EventBusConfig` shape.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackpressureMode {
    /// Drop the oldest non-terminal event for a lagging subscriber; terminal
    /// events are always recovered from the store on cutover.
    #[default]
    SlowConsumerDrop,
}

#[derive(Debug, Clone, Copy)]
pub struct EventBusConfig {
    /// Per-execution broadcast channel capacity.
    pub subscriber_queue_depth: usize,
    pub backpressure_mode: BackpressureMode,
    pub overload_threshold: f64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            subscriber_queue_depth: 256,
            backpressure_mode: BackpressureMode::default(),
            overload_threshold: 0.8,
        }
    }
}
