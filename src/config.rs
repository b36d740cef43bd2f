use std::time::Duration;

#[derive(Debug, Clone)]
pub struct VehicleConfig {
    pub gcs_system_id: u8,
    pub gcs_component_id: u8,
    pub retry_policy: RetryPolicy,
    pub auto_request_home: bool,
    pub command_buffer_size: usize,
    /// How long `connect` waits for the first HEARTBEAT.
    pub connect_timeout: Duration,
    /// Cadence of the blocking condition polls (goto, pre-arm wait).
    pub poll_interval: Duration,
    /// Spacing between repeated velocity setpoints. The autopilot falls back
    /// to a failsafe mode if setpoints are not refreshed at >= 10 Hz.
    pub setpoint_interval: Duration,
    /// Bound on the pre-arm readiness and arming waits. The original
    /// sequencer polled forever; a stuck precondition now surfaces as
    /// `VehicleError::Timeout`.
    pub arm_ready_timeout: Duration,
    pub mode_change_timeout: Duration,
    pub takeoff_timeout: Duration,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            gcs_system_id: 255,
            gcs_component_id: 190,
            retry_policy: RetryPolicy::default(),
            auto_request_home: true,
            command_buffer_size: 32,
            connect_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            setpoint_interval: Duration::from_millis(100),
            arm_ready_timeout: Duration::from_secs(60),
            mode_change_timeout: Duration::from_secs(10),
            takeoff_timeout: Duration::from_secs(120),
        }
    }
}

/// Bounded retry policy shared by every request/response exchange with the
/// autopilot (command acks, mission transfer phases).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub request_timeout_ms: u64,
    pub item_timeout_ms: u64,
    pub max_retries: u8,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            request_timeout_ms: 1500,
            item_timeout_ms: 250,
            max_retries: 5,
        }
    }
}
