//! Blocking mission-sequencing operations: ordered commands against the
//! flight stack, each followed by a bounded wait on polled state.

use crate::error::VehicleError;
use crate::geo::{planar_distance_m, GeoPoint};
use crate::mission::Mission;
use crate::state::{GpsFixType, SystemStatus, Telemetry, VehicleState};
use crate::vehicle::Vehicle;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// How a polled guided goto ended.
#[derive(Debug, Clone, PartialEq)]
pub enum GotoOutcome {
    /// The vehicle came within the requested accuracy of the target.
    Reached,
    /// Something else took the vehicle out of GUIDED; the goto is abandoned.
    ModeChanged(String),
}

/// Altitude fraction at which a takeoff counts as complete.
const TAKEOFF_ALTITUDE_FRACTION: f64 = 0.95;

impl Vehicle {
    /// Arm the vehicle and climb to `target_altitude_m` (relative to home).
    ///
    /// Waits for pre-arm readiness, switches to GUIDED, arms, takes off and
    /// blocks until the vehicle reports at least 95% of the target altitude.
    /// There is no rollback: on error the vehicle is left in whatever state
    /// the sequence reached.
    pub async fn arm_and_takeoff(&self, target_altitude_m: f32) -> Result<(), VehicleError> {
        let config = &self.inner.config;
        let state_rx = self.state();
        let telemetry_rx = self.telemetry();

        info!("waiting for vehicle to become armable");
        self.poll_until(config.arm_ready_timeout, || {
            is_armable(&state_rx.borrow(), &telemetry_rx.borrow())
        })
        .await?;

        info!("arming motors");
        self.set_mode_and_wait("GUIDED").await?;
        self.arm(false).await?;
        self.poll_until(config.arm_ready_timeout, || state_rx.borrow().armed)
            .await?;

        info!(altitude_m = target_altitude_m, "taking off");
        self.takeoff(target_altitude_m).await?;

        let threshold = f64::from(target_altitude_m) * TAKEOFF_ALTITUDE_FRACTION;
        self.poll_until(config.takeoff_timeout, || {
            telemetry_rx
                .borrow()
                .relative_altitude_m
                .is_some_and(|alt| alt >= threshold)
        })
        .await?;
        info!("reached target altitude");
        Ok(())
    }

    /// Set the flight mode and wait until the vehicle reports it, bounded by
    /// `VehicleConfig::mode_change_timeout`.
    pub async fn set_mode_and_wait(&self, name: &str) -> Result<(), VehicleError> {
        self.set_mode_by_name(name).await?;
        self.wait_for_mode(name, self.inner.config.mode_change_timeout)
            .await
    }

    /// Block until the vehicle reports flight mode `name`, without commanding
    /// it. Used to wait on an operator flipping the mode switch.
    pub async fn wait_for_mode(&self, name: &str, timeout: Duration) -> Result<(), VehicleError> {
        let mut rx = self.state();
        wait_for_mode_on(&mut rx, name, timeout).await
    }

    /// Operator-gated launch: park in STABILIZE, block until the mode switch
    /// is flipped to AUTO, then run the full arm-and-takeoff sequence.
    pub async fn launch_on_auto(
        &self,
        target_altitude_m: f32,
        operator_timeout: Duration,
    ) -> Result<(), VehicleError> {
        self.set_mode_and_wait("STABILIZE").await?;
        info!("waiting for the mode switch to AUTO");
        self.wait_for_mode("AUTO", operator_timeout).await?;
        self.arm_and_takeoff(target_altitude_m).await
    }

    /// Fly with the given local-NED velocity for `duration_ticks` setpoint
    /// intervals (100 ms each by default). The setpoint is resent every tick;
    /// the autopilot falls back to a failsafe mode when setpoints stop
    /// arriving at >= 10 Hz.
    pub async fn set_velocity(
        &self,
        vx: f32,
        vy: f32,
        vz: f32,
        duration_ticks: u32,
    ) -> Result<(), VehicleError> {
        debug!(vx, vy, vz, duration_ticks, "sending velocity setpoints");
        self.send_command(|reply| crate::command::Command::SetVelocity {
            vx,
            vy,
            vz,
            ticks: duration_ticks,
            reply,
        })
        .await
    }

    /// Fly to `target` in GUIDED mode and block until the vehicle is within
    /// `accuracy_m` metres of it (planar distance).
    ///
    /// An external mode change cancels the goto; that is the only
    /// cancellation mechanism, reported as `GotoOutcome::ModeChanged`.
    pub async fn goto(
        &self,
        target: GeoPoint,
        accuracy_m: f64,
    ) -> Result<GotoOutcome, VehicleError> {
        self.goto_position(
            target.latitude_deg,
            target.longitude_deg,
            target.altitude_m as f32,
        )
        .await?;

        let state_rx = self.state();
        let telemetry_rx = self.telemetry();
        loop {
            let decision = evaluate_goto(
                &state_rx.borrow(),
                &telemetry_rx.borrow(),
                &target,
                accuracy_m,
            );
            match decision {
                GotoPoll::Reached => {
                    info!("reached goto target");
                    return Ok(GotoOutcome::Reached);
                }
                GotoPoll::ModeChanged(mode) => {
                    info!(mode, "goto interrupted by external mode change");
                    return Ok(GotoOutcome::ModeChanged(mode));
                }
                GotoPoll::Continue(distance_m) => {
                    if let Some(distance_m) = distance_m {
                        debug!(distance_m, "distance to goto target");
                    }
                    tokio::time::sleep(self.inner.config.poll_interval).await;
                }
            }
        }
    }

    /// Reset the onboard mission to its first item and switch to AUTO.
    pub async fn start_auto_mission(&self) -> Result<(), VehicleError> {
        info!("starting onboard mission");
        self.mission().set_current(0).await?;
        self.set_mode_and_wait("AUTO").await
    }

    /// Planar distance to the waypoint the vehicle is currently flying
    /// towards, or `None` when the next waypoint is the home slot (seq 0) or
    /// no position fix is available yet.
    pub fn distance_to_current_waypoint(&self, mission: &Mission) -> Option<f64> {
        let next_seq = self.mission_state().borrow().current_seq;
        let target = next_waypoint_target(mission, next_seq)?;

        let telemetry = self.telemetry().borrow().clone();
        let current = GeoPoint::new(
            telemetry.latitude_deg?,
            telemetry.longitude_deg?,
            telemetry.relative_altitude_m.unwrap_or(0.0),
        );
        Some(planar_distance_m(&current, &target))
    }

    /// Fixed-interval condition poll bounded by `timeout`. The condition is
    /// checked before every sleep, so an already-true condition returns
    /// without waiting.
    async fn poll_until(
        &self,
        timeout: Duration,
        mut condition: impl FnMut() -> bool,
    ) -> Result<(), VehicleError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(VehicleError::Timeout);
            }
            tokio::time::sleep(self.inner.config.poll_interval).await;
        }
    }
}

/// Wait on a state channel until the reported mode name matches `name`
/// (case-insensitive), bounded by `timeout`. A mode already in effect
/// resolves immediately.
pub(crate) async fn wait_for_mode_on(
    rx: &mut watch::Receiver<VehicleState>,
    name: &str,
    timeout: Duration,
) -> Result<(), VehicleError> {
    let wanted = name.to_uppercase();
    tokio::time::timeout(timeout, rx.wait_for(|state| state.mode_name == wanted))
        .await
        .map_err(|_| VehicleError::Timeout)?
        .map_err(|_| VehicleError::Disconnected)?;
    Ok(())
}

/// Pre-arm readiness: the autopilot has finished initialising (standby) and
/// holds a 3D GPS fix.
pub(crate) fn is_armable(state: &VehicleState, telemetry: &Telemetry) -> bool {
    state.system_status == SystemStatus::Standby
        && telemetry
            .gps_fix_type
            .is_some_and(|fix| fix >= GpsFixType::Fix3d)
}

pub(crate) enum GotoPoll {
    /// Keep polling; carries the last computed distance when known.
    Continue(Option<f64>),
    Reached,
    ModeChanged(String),
}

/// One goto poll step. The mode check comes first: leaving GUIDED cancels
/// the goto even if the target has meanwhile been reached.
pub(crate) fn evaluate_goto(
    state: &VehicleState,
    telemetry: &Telemetry,
    target: &GeoPoint,
    accuracy_m: f64,
) -> GotoPoll {
    if state.mode_name != "GUIDED" {
        return GotoPoll::ModeChanged(state.mode_name.clone());
    }

    let (Some(lat), Some(lon)) = (telemetry.latitude_deg, telemetry.longitude_deg) else {
        return GotoPoll::Continue(None);
    };
    let current = GeoPoint::new(lat, lon, telemetry.relative_altitude_m.unwrap_or(0.0));
    let distance_m = planar_distance_m(&current, target);
    if distance_m <= accuracy_m {
        GotoPoll::Reached
    } else {
        GotoPoll::Continue(Some(distance_m))
    }
}

/// Target of the waypoint the vehicle will fly to next. Seq 0 is the home
/// slot, for which there is no mission item.
pub(crate) fn next_waypoint_target(mission: &Mission, next_seq: u16) -> Option<GeoPoint> {
    if next_seq == 0 {
        return None;
    }
    mission
        .items
        .get(usize::from(next_seq) - 1)
        .map(|item| item.position())
}
