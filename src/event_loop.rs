use crate::command::Command;
use crate::config::VehicleConfig;
use crate::error::VehicleError;
use crate::mission::{self, HomePosition, Mission, WaypointCommand};
use crate::state::{
    AutopilotType, GpsFixType, LinkState, MissionState, StateWriters, SystemStatus, VehicleState,
};
use mavlink::common::{self, MavCmd, MavModeFlag};
use mavlink::{AsyncMavConnection, MavHeader};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

const MAGIC_FORCE_ARM_VALUE: f32 = 2989.0;
const MAGIC_FORCE_DISARM_VALUE: f32 = 21196.0;

/// SET_POSITION_TARGET type mask selecting velocity only: position,
/// acceleration, yaw and yaw-rate fields are all ignored.
pub(crate) const VELOCITY_ONLY_TYPE_MASK: u16 = 0x0DC7;

/// Type mask selecting position only (the guided goto).
const POSITION_ONLY_TYPE_MASK: u16 = 0x07F8;

type Connection = dyn AsyncMavConnection<common::MavMessage> + Sync + Send;

/// Internal tracking of the remote vehicle identity (from heartbeats).
#[derive(Debug, Clone, Copy)]
struct VehicleTarget {
    system_id: u8,
    component_id: u8,
    autopilot: common::MavAutopilot,
}

pub(crate) async fn run_event_loop(
    connection: Box<Connection>,
    mut command_rx: mpsc::Receiver<Command>,
    state_writers: StateWriters,
    config: VehicleConfig,
    cancel: CancellationToken,
) {
    let mut vehicle_target: Option<VehicleTarget> = None;
    let mut home_requested = false;

    let _ = state_writers.link_state.send(LinkState::Connected);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("event loop cancelled");
                let _ = state_writers.link_state.send(LinkState::Disconnected);
                break;
            }
            Some(cmd) = command_rx.recv() => {
                match cmd {
                    Command::Shutdown => {
                        debug!("event loop shutdown requested");
                        let _ = state_writers.link_state.send(LinkState::Disconnected);
                        break;
                    }
                    cmd => {
                        handle_command(
                            cmd,
                            &*connection,
                            &state_writers,
                            &mut vehicle_target,
                            &config,
                            &cancel,
                        ).await;
                    }
                }
            }
            result = connection.recv() => {
                match result {
                    Ok((header, msg)) => {
                        update_vehicle_target(&mut vehicle_target, &header, &msg);
                        if !home_requested && config.auto_request_home {
                            if let Some(ref target) = vehicle_target {
                                request_home_position(&*connection, target, &config).await;
                                home_requested = true;
                            }
                        }
                        update_state(&msg, &state_writers, &vehicle_target);
                    }
                    Err(err) => {
                        warn!("MAVLink recv error: {err}");
                        let _ = state_writers.link_state.send(LinkState::Error(err.to_string()));
                        break;
                    }
                }
            }
        }
    }
}

async fn request_home_position(
    connection: &Connection,
    target: &VehicleTarget,
    config: &VehicleConfig,
) {
    let _ = connection
        .send(
            &MavHeader {
                system_id: config.gcs_system_id,
                component_id: config.gcs_component_id,
                sequence: 0,
            },
            &common::MavMessage::COMMAND_LONG(common::COMMAND_LONG_DATA {
                target_system: target.system_id,
                target_component: target.component_id,
                command: MavCmd::MAV_CMD_REQUEST_MESSAGE,
                confirmation: 0,
                param1: 242.0, // HOME_POSITION message ID
                param2: 0.0,
                param3: 0.0,
                param4: 0.0,
                param5: 0.0,
                param6: 0.0,
                param7: 0.0,
            }),
        )
        .await;
}

fn update_vehicle_target(
    vehicle_target: &mut Option<VehicleTarget>,
    header: &MavHeader,
    message: &common::MavMessage,
) {
    if header.system_id == 0 {
        return;
    }

    if let common::MavMessage::HEARTBEAT(hb) = message {
        *vehicle_target = Some(VehicleTarget {
            system_id: header.system_id,
            component_id: header.component_id,
            autopilot: hb.autopilot,
        });
    } else if vehicle_target.is_none() {
        *vehicle_target = Some(VehicleTarget {
            system_id: header.system_id,
            component_id: header.component_id,
            autopilot: common::MavAutopilot::MAV_AUTOPILOT_GENERIC,
        });
    }
}

fn update_state(
    message: &common::MavMessage,
    writers: &StateWriters,
    vehicle_target: &Option<VehicleTarget>,
) {
    match message {
        common::MavMessage::HEARTBEAT(hb) => {
            if let Some(target) = vehicle_target {
                let autopilot_type = AutopilotType::from_mav(target.autopilot);
                let armed = hb
                    .base_mode
                    .contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
                let mode_name = crate::modes::mode_name(autopilot_type, hb.custom_mode);

                let _ = writers.vehicle_state.send(VehicleState {
                    armed,
                    custom_mode: hb.custom_mode,
                    mode_name,
                    system_status: SystemStatus::from_mav(hb.system_status),
                    vehicle_type: crate::state::VehicleType::from_mav(hb.mavtype),
                    autopilot: autopilot_type,
                });
            }
        }
        common::MavMessage::VFR_HUD(data) => {
            writers.telemetry.send_modify(|t| {
                t.speed_mps = Some(data.groundspeed as f64);
                t.heading_deg = Some(data.heading as f64);
            });
        }
        common::MavMessage::GLOBAL_POSITION_INT(data) => {
            writers.telemetry.send_modify(|t| {
                t.relative_altitude_m = Some(data.relative_alt as f64 / 1000.0);
                t.latitude_deg = Some(data.lat as f64 / 1e7);
                t.longitude_deg = Some(data.lon as f64 / 1e7);
                let vx = data.vx as f64 / 100.0;
                let vy = data.vy as f64 / 100.0;
                t.speed_mps = Some((vx * vx + vy * vy).sqrt());
                if data.hdg != u16::MAX {
                    t.heading_deg = Some(data.hdg as f64 / 100.0);
                }
            });
        }
        common::MavMessage::SYS_STATUS(data) => {
            if data.battery_remaining >= 0 {
                writers.telemetry.send_modify(|t| {
                    t.battery_pct = Some(data.battery_remaining as f64);
                });
            }
        }
        common::MavMessage::GPS_RAW_INT(data) => {
            writers.telemetry.send_modify(|t| {
                t.gps_fix_type = Some(GpsFixType::from_raw(data.fix_type as u8));
            });
        }
        common::MavMessage::MISSION_CURRENT(data) => {
            let _ = writers.mission_state.send(MissionState {
                current_seq: data.seq,
                total_items: data.total,
            });
        }
        common::MavMessage::HOME_POSITION(data) => {
            let _ = writers.home_position.send(Some(HomePosition {
                latitude_deg: data.latitude as f64 / 1e7,
                longitude_deg: data.longitude as f64 / 1e7,
                altitude_m: (data.altitude as f64 / 1000.0) as f32,
            }));
        }
        _ => {
            trace!("unhandled message type");
        }
    }
}

// ---------------------------------------------------------------------------
// Command handling
// ---------------------------------------------------------------------------

async fn handle_command(
    cmd: Command,
    connection: &Connection,
    writers: &StateWriters,
    vehicle_target: &mut Option<VehicleTarget>,
    config: &VehicleConfig,
    cancel: &CancellationToken,
) {
    match cmd {
        Command::Arm { force, reply } => {
            let result =
                handle_arm_disarm(true, force, connection, writers, vehicle_target, config, cancel)
                    .await;
            let _ = reply.send(result);
        }
        Command::Disarm { force, reply } => {
            let result = handle_arm_disarm(
                false,
                force,
                connection,
                writers,
                vehicle_target,
                config,
                cancel,
            )
            .await;
            let _ = reply.send(result);
        }
        Command::SetMode { custom_mode, reply } => {
            let result =
                handle_set_mode(custom_mode, connection, writers, vehicle_target, config, cancel)
                    .await;
            let _ = reply.send(result);
        }
        Command::CommandLong {
            command,
            params,
            reply,
        } => {
            let result = handle_command_long(
                command,
                params,
                connection,
                writers,
                vehicle_target,
                config,
                cancel,
            )
            .await;
            let _ = reply.send(result);
        }
        Command::GuidedGoto {
            lat_e7,
            lon_e7,
            alt_m,
            reply,
        } => {
            let result =
                handle_guided_goto(lat_e7, lon_e7, alt_m, connection, vehicle_target, config).await;
            let _ = reply.send(result);
        }
        Command::SetVelocity {
            vx,
            vy,
            vz,
            ticks,
            reply,
        } => {
            let result =
                handle_set_velocity(vx, vy, vz, ticks, connection, vehicle_target, config, cancel)
                    .await;
            let _ = reply.send(result);
        }
        Command::MissionUpload { mission, reply } => {
            let result =
                handle_mission_upload(mission, connection, writers, vehicle_target, config, cancel)
                    .await;
            let _ = reply.send(result);
        }
        Command::MissionDownload { reply } => {
            let result =
                handle_mission_download(connection, writers, vehicle_target, config, cancel).await;
            let _ = reply.send(result);
        }
        Command::MissionClear { reply } => {
            let result =
                handle_mission_clear(connection, writers, vehicle_target, config, cancel).await;
            let _ = reply.send(result);
        }
        Command::MissionSetCurrent { seq, reply } => {
            let result =
                handle_mission_set_current(seq, connection, writers, vehicle_target, config, cancel)
                    .await;
            let _ = reply.send(result);
        }
        Command::Shutdown => {
            // Handled in the main loop
        }
    }
}

// ---------------------------------------------------------------------------
// Send / receive helpers
// ---------------------------------------------------------------------------

async fn send_message(
    connection: &Connection,
    config: &VehicleConfig,
    message: common::MavMessage,
) -> Result<(), VehicleError> {
    connection
        .send(
            &MavHeader {
                system_id: config.gcs_system_id,
                component_id: config.gcs_component_id,
                sequence: 0,
            },
            &message,
        )
        .await
        .map(|_| ())
        .map_err(|err| {
            VehicleError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                err.to_string(),
            ))
        })
}

fn recv_error(err: impl std::fmt::Display) -> VehicleError {
    VehicleError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        err.to_string(),
    ))
}

fn get_target(vehicle_target: &Option<VehicleTarget>) -> Result<VehicleTarget, VehicleError> {
    vehicle_target.ok_or(VehicleError::IdentityUnknown)
}

/// Wait for a message matching `predicate`, continuing to update state for
/// everything else received in the meantime. Bounded by `timeout`.
async fn wait_for_response<F, T>(
    connection: &Connection,
    writers: &StateWriters,
    vehicle_target: &mut Option<VehicleTarget>,
    cancel: &CancellationToken,
    timeout: Duration,
    mut predicate: F,
) -> Result<T, VehicleError>
where
    F: FnMut(&common::MavMessage) -> Option<Result<T, VehicleError>>,
{
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(VehicleError::Cancelled),
            _ = &mut deadline => return Err(VehicleError::Timeout),
            result = connection.recv() => {
                let (header, msg) = result.map_err(recv_error)?;
                update_vehicle_target(vehicle_target, &header, &msg);
                update_state(&msg, writers, vehicle_target);
                if let Some(outcome) = predicate(&msg) {
                    return outcome;
                }
            }
        }
    }
}

/// Send a COMMAND_LONG and wait for its COMMAND_ACK, retrying per the
/// configured policy.
async fn send_command_long_ack(
    command: MavCmd,
    params: [f32; 7],
    connection: &Connection,
    writers: &StateWriters,
    vehicle_target: &mut Option<VehicleTarget>,
    config: &VehicleConfig,
    cancel: &CancellationToken,
) -> Result<(), VehicleError> {
    let target = get_target(vehicle_target)?;
    let policy = config.retry_policy;
    let timeout = Duration::from_millis(policy.request_timeout_ms);

    for _attempt in 0..=policy.max_retries {
        send_message(
            connection,
            config,
            common::MavMessage::COMMAND_LONG(common::COMMAND_LONG_DATA {
                target_system: target.system_id,
                target_component: target.component_id,
                command,
                confirmation: 0,
                param1: params[0],
                param2: params[1],
                param3: params[2],
                param4: params[3],
                param5: params[4],
                param6: params[5],
                param7: params[6],
            }),
        )
        .await?;

        let result = wait_for_response(
            connection,
            writers,
            vehicle_target,
            cancel,
            timeout,
            |msg| match msg {
                common::MavMessage::COMMAND_ACK(ack) if ack.command == command => {
                    if ack.result == common::MavResult::MAV_RESULT_ACCEPTED {
                        Some(Ok(()))
                    } else {
                        Some(Err(VehicleError::CommandRejected {
                            command: format!("{command:?}"),
                            result: format!("{:?}", ack.result),
                        }))
                    }
                }
                _ => None,
            },
        )
        .await;

        match result {
            Err(VehicleError::Timeout) => continue,
            other => return other,
        }
    }

    Err(VehicleError::Timeout)
}

// ---------------------------------------------------------------------------
// Arm / Disarm
// ---------------------------------------------------------------------------

async fn handle_arm_disarm(
    arm: bool,
    force: bool,
    connection: &Connection,
    writers: &StateWriters,
    vehicle_target: &mut Option<VehicleTarget>,
    config: &VehicleConfig,
    cancel: &CancellationToken,
) -> Result<(), VehicleError> {
    let param1 = if arm { 1.0 } else { 0.0 };
    let param2 = if force {
        if arm {
            MAGIC_FORCE_ARM_VALUE
        } else {
            MAGIC_FORCE_DISARM_VALUE
        }
    } else {
        0.0
    };

    send_command_long_ack(
        MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
        [param1, param2, 0.0, 0.0, 0.0, 0.0, 0.0],
        connection,
        writers,
        vehicle_target,
        config,
        cancel,
    )
    .await
}

// ---------------------------------------------------------------------------
// Set mode
// ---------------------------------------------------------------------------

async fn handle_set_mode(
    custom_mode: u32,
    connection: &Connection,
    writers: &StateWriters,
    vehicle_target: &mut Option<VehicleTarget>,
    config: &VehicleConfig,
    cancel: &CancellationToken,
) -> Result<(), VehicleError> {
    // Try COMMAND_LONG(DO_SET_MODE) first
    let do_set_mode_result = send_command_long_ack(
        MavCmd::MAV_CMD_DO_SET_MODE,
        [1.0, custom_mode as f32, 0.0, 0.0, 0.0, 0.0, 0.0],
        connection,
        writers,
        vehicle_target,
        config,
        cancel,
    )
    .await;

    if do_set_mode_result.is_ok() {
        return Ok(());
    }

    // Fallback: wait for a confirming heartbeat
    wait_for_response(
        connection,
        writers,
        vehicle_target,
        cancel,
        Duration::from_secs(2),
        |msg| match msg {
            common::MavMessage::HEARTBEAT(hb) if hb.custom_mode == custom_mode => Some(Ok(())),
            _ => None,
        },
    )
    .await
    .map_err(|err| match err {
        VehicleError::Timeout => VehicleError::CommandRejected {
            command: format!("DO_SET_MODE({custom_mode})"),
            result: "no confirming HEARTBEAT".to_string(),
        },
        other => other,
    })
}

// ---------------------------------------------------------------------------
// Generic COMMAND_LONG (public API)
// ---------------------------------------------------------------------------

async fn handle_command_long(
    command: MavCmd,
    params: [f32; 7],
    connection: &Connection,
    writers: &StateWriters,
    vehicle_target: &mut Option<VehicleTarget>,
    config: &VehicleConfig,
    cancel: &CancellationToken,
) -> Result<(), VehicleError> {
    send_command_long_ack(
        command,
        params,
        connection,
        writers,
        vehicle_target,
        config,
        cancel,
    )
    .await
}

// ---------------------------------------------------------------------------
// Guided goto
// ---------------------------------------------------------------------------

async fn handle_guided_goto(
    lat_e7: i32,
    lon_e7: i32,
    alt_m: f32,
    connection: &Connection,
    vehicle_target: &mut Option<VehicleTarget>,
    config: &VehicleConfig,
) -> Result<(), VehicleError> {
    let target = get_target(vehicle_target)?;
    let type_mask = common::PositionTargetTypemask::from_bits_truncate(POSITION_ONLY_TYPE_MASK);

    send_message(
        connection,
        config,
        common::MavMessage::SET_POSITION_TARGET_GLOBAL_INT(
            common::SET_POSITION_TARGET_GLOBAL_INT_DATA {
                time_boot_ms: 0,
                target_system: target.system_id,
                target_component: target.component_id,
                coordinate_frame: common::MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT,
                type_mask,
                lat_int: lat_e7,
                lon_int: lon_e7,
                alt: alt_m,
                vx: 0.0,
                vy: 0.0,
                vz: 0.0,
                afx: 0.0,
                afy: 0.0,
                afz: 0.0,
                yaw: 0.0,
                yaw_rate: 0.0,
            },
        ),
    )
    .await
}

// ---------------------------------------------------------------------------
// Velocity setpoint burst
// ---------------------------------------------------------------------------

pub(crate) fn velocity_setpoint_message(
    target_system: u8,
    target_component: u8,
    vx: f32,
    vy: f32,
    vz: f32,
) -> common::MavMessage {
    common::MavMessage::SET_POSITION_TARGET_LOCAL_NED(
        common::SET_POSITION_TARGET_LOCAL_NED_DATA {
            time_boot_ms: 0,
            target_system,
            target_component,
            coordinate_frame: common::MavFrame::MAV_FRAME_LOCAL_NED,
            type_mask: common::PositionTargetTypemask::from_bits_truncate(VELOCITY_ONLY_TYPE_MASK),
            x: 0.0,
            y: 0.0,
            z: 0.0,
            vx,
            vy,
            vz,
            afx: 0.0,
            afy: 0.0,
            afz: 0.0,
            yaw: 0.0,
            yaw_rate: 0.0,
        },
    )
}

/// Resend the same velocity-only setpoint once per setpoint interval, `ticks`
/// times. The autopilot reverts to a failsafe mode if setpoints stop arriving
/// at >= 10 Hz, so the burst is paced rather than sent all at once.
async fn handle_set_velocity(
    vx: f32,
    vy: f32,
    vz: f32,
    ticks: u32,
    connection: &Connection,
    vehicle_target: &mut Option<VehicleTarget>,
    config: &VehicleConfig,
    cancel: &CancellationToken,
) -> Result<(), VehicleError> {
    let target = get_target(vehicle_target)?;
    let msg = velocity_setpoint_message(target.system_id, target.component_id, vx, vy, vz);

    run_setpoint_burst(ticks, config.setpoint_interval, cancel, || {
        send_message(connection, config, msg.clone())
    })
    .await
}

/// Pace the burst: exactly one send per tick, `interval` apart.
async fn run_setpoint_burst<F, Fut>(
    ticks: u32,
    interval: Duration,
    cancel: &CancellationToken,
    mut send_one: F,
) -> Result<(), VehicleError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), VehicleError>>,
{
    for _tick in 0..ticks {
        send_one().await?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(VehicleError::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Wire item conversions
// ---------------------------------------------------------------------------

fn to_mission_item_int_msg(
    item: &WaypointCommand,
    target: VehicleTarget,
) -> Result<common::MavMessage, VehicleError> {
    let command: MavCmd = num_traits::FromPrimitive::from_u16(item.command).ok_or_else(|| {
        VehicleError::MissionTransfer(format!("unsupported MAV_CMD value {}", item.command))
    })?;
    let frame: common::MavFrame =
        num_traits::FromPrimitive::from_u8(item.frame).ok_or_else(|| {
            VehicleError::MissionTransfer(format!("unsupported MAV_FRAME value {}", item.frame))
        })?;

    // Global frames scale degrees by 1e7; local frames scale metres by 1e4.
    let scale = if mission::wire::is_global_frame(item.frame) {
        1e7
    } else {
        1e4
    };

    Ok(common::MavMessage::MISSION_ITEM_INT(
        common::MISSION_ITEM_INT_DATA {
            param1: item.param1,
            param2: item.param2,
            param3: item.param3,
            param4: item.param4,
            x: (item.x * scale).round() as i32,
            y: (item.y * scale).round() as i32,
            z: item.z as f32,
            seq: item.seq,
            command,
            target_system: target.system_id,
            target_component: target.component_id,
            frame,
            current: u8::from(item.current),
            autocontinue: u8::from(item.autocontinue),
            mission_type: common::MavMissionType::MAV_MISSION_TYPE_MISSION,
        },
    ))
}

fn from_mission_item_int(data: &common::MISSION_ITEM_INT_DATA) -> WaypointCommand {
    let frame = data.frame as u8;
    let scale = if mission::wire::is_global_frame(frame) {
        1e7
    } else {
        1e4
    };
    WaypointCommand {
        seq: data.seq,
        current: data.current > 0,
        frame,
        command: data.command as u16,
        param1: data.param1,
        param2: data.param2,
        param3: data.param3,
        param4: data.param4,
        x: data.x as f64 / scale,
        y: data.y as f64 / scale,
        z: data.z as f64,
        autocontinue: data.autocontinue > 0,
    }
}

#[allow(deprecated)]
fn from_mission_item_float(data: &common::MISSION_ITEM_DATA) -> WaypointCommand {
    WaypointCommand {
        seq: data.seq,
        current: data.current > 0,
        frame: data.frame as u8,
        command: data.command as u16,
        param1: data.param1,
        param2: data.param2,
        param3: data.param3,
        param4: data.param4,
        x: data.x as f64,
        y: data.y as f64,
        z: data.z as f64,
        autocontinue: data.autocontinue > 0,
    }
}

// ---------------------------------------------------------------------------
// Mission upload
// ---------------------------------------------------------------------------

async fn handle_mission_upload(
    plan: Mission,
    connection: &Connection,
    writers: &StateWriters,
    vehicle_target: &mut Option<VehicleTarget>,
    config: &VehicleConfig,
    cancel: &CancellationToken,
) -> Result<(), VehicleError> {
    // The sequencer always starts from a clean onboard store.
    handle_mission_clear(connection, writers, vehicle_target, config, cancel).await?;

    let target = get_target(vehicle_target)?;
    let wire_items = mission::items_for_wire_upload(&plan);
    let policy = config.retry_policy;

    let count_msg = common::MavMessage::MISSION_COUNT(common::MISSION_COUNT_DATA {
        count: wire_items.len() as u16,
        target_system: target.system_id,
        target_component: target.component_id,
        mission_type: common::MavMissionType::MAV_MISSION_TYPE_MISSION,
        opaque_id: 0,
    });
    send_message(connection, config, count_msg.clone()).await?;

    let mut retries = 0u8;
    let mut last_requested: Option<u16> = None;

    loop {
        let timeout = if last_requested.is_some() {
            Duration::from_millis(policy.item_timeout_ms)
        } else {
            Duration::from_millis(policy.request_timeout_ms)
        };

        let event = wait_for_response(
            connection,
            writers,
            vehicle_target,
            cancel,
            timeout,
            |msg| match msg {
                common::MavMessage::MISSION_REQUEST_INT(data) => Some(Ok(Some(data.seq))),
                common::MavMessage::MISSION_REQUEST(data) => Some(Ok(Some(data.seq))),
                common::MavMessage::MISSION_ACK(data) => {
                    if data.mavtype == common::MavMissionResult::MAV_MISSION_ACCEPTED {
                        Some(Ok(None))
                    } else {
                        Some(Err(VehicleError::UploadRejected(format!(
                            "{:?}",
                            data.mavtype
                        ))))
                    }
                }
                _ => None,
            },
        )
        .await;

        match event {
            Ok(Some(seq)) => {
                let item = wire_items.get(seq as usize).ok_or_else(|| {
                    VehicleError::MissionTransfer(format!("requested item {seq} out of range"))
                })?;
                send_message(connection, config, to_mission_item_int_msg(item, target)?).await?;
                last_requested = Some(seq);
                retries = 0;
            }
            Ok(None) => {
                debug!(items = wire_items.len(), "mission upload accepted");
                return Ok(());
            }
            Err(VehicleError::Timeout) => {
                retries = retries.saturating_add(1);
                if retries > policy.max_retries {
                    return Err(VehicleError::Timeout);
                }
                // Nudge the transfer along: re-offer the count until the
                // vehicle starts requesting, then re-send the last item.
                match last_requested {
                    Some(seq) => {
                        if let Some(item) = wire_items.get(seq as usize) {
                            send_message(connection, config, to_mission_item_int_msg(item, target)?)
                                .await?;
                        }
                    }
                    None => send_message(connection, config, count_msg.clone()).await?,
                }
            }
            Err(other) => return Err(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Mission download
// ---------------------------------------------------------------------------

#[allow(deprecated)]
async fn handle_mission_download(
    connection: &Connection,
    writers: &StateWriters,
    vehicle_target: &mut Option<VehicleTarget>,
    config: &VehicleConfig,
    cancel: &CancellationToken,
) -> Result<Mission, VehicleError> {
    let target = get_target(vehicle_target)?;
    let policy = config.retry_policy;

    let request_list_msg =
        common::MavMessage::MISSION_REQUEST_LIST(common::MISSION_REQUEST_LIST_DATA {
            target_system: target.system_id,
            target_component: target.component_id,
            mission_type: common::MavMissionType::MAV_MISSION_TYPE_MISSION,
        });

    // Phase 1: learn the item count.
    let mut count = None;
    for _attempt in 0..=policy.max_retries {
        send_message(connection, config, request_list_msg.clone()).await?;
        let result = wait_for_response(
            connection,
            writers,
            vehicle_target,
            cancel,
            Duration::from_millis(policy.request_timeout_ms),
            |msg| match msg {
                common::MavMessage::MISSION_COUNT(data) => Some(Ok(data.count)),
                _ => None,
            },
        )
        .await;
        match result {
            Ok(n) => {
                count = Some(n);
                break;
            }
            Err(VehicleError::Timeout) => continue,
            Err(other) => return Err(other),
        }
    }
    let count = count.ok_or(VehicleError::Timeout)?;
    debug!(count, "mission download started");

    // Phase 2: request each item, falling back from the INT request to the
    // legacy float request if the vehicle stays silent.
    let mut items = Vec::with_capacity(count as usize);
    for seq in 0..count {
        let request_int = common::MavMessage::MISSION_REQUEST_INT(common::MISSION_REQUEST_INT_DATA {
            seq,
            target_system: target.system_id,
            target_component: target.component_id,
            mission_type: common::MavMissionType::MAV_MISSION_TYPE_MISSION,
        });
        let request_float = common::MavMessage::MISSION_REQUEST(common::MISSION_REQUEST_DATA {
            seq,
            target_system: target.system_id,
            target_component: target.component_id,
            mission_type: common::MavMissionType::MAV_MISSION_TYPE_MISSION,
        });

        let mut use_int_request = true;
        let mut item = None;
        for _attempt in 0..=policy.max_retries {
            let request = if use_int_request {
                request_int.clone()
            } else {
                request_float.clone()
            };
            send_message(connection, config, request).await?;

            let result = wait_for_response(
                connection,
                writers,
                vehicle_target,
                cancel,
                Duration::from_millis(policy.item_timeout_ms),
                |msg| match msg {
                    common::MavMessage::MISSION_ITEM_INT(data) if data.seq == seq => {
                        Some(Ok(from_mission_item_int(data)))
                    }
                    common::MavMessage::MISSION_ITEM(data) if data.seq == seq => {
                        Some(Ok(from_mission_item_float(data)))
                    }
                    _ => None,
                },
            )
            .await;

            match result {
                Ok(received) => {
                    item = Some(received);
                    break;
                }
                Err(VehicleError::Timeout) => {
                    use_int_request = false;
                    continue;
                }
                Err(other) => return Err(other),
            }
        }
        items.push(item.ok_or(VehicleError::Timeout)?);
    }

    // Phase 3: acknowledge the transfer.
    let _ = send_message(
        connection,
        config,
        common::MavMessage::MISSION_ACK(common::MISSION_ACK_DATA {
            target_system: target.system_id,
            target_component: target.component_id,
            mavtype: common::MavMissionResult::MAV_MISSION_ACCEPTED,
            mission_type: common::MavMissionType::MAV_MISSION_TYPE_MISSION,
            opaque_id: 0,
        }),
    )
    .await;

    Ok(mission::mission_from_wire_download(items))
}

// ---------------------------------------------------------------------------
// Mission clear
// ---------------------------------------------------------------------------

async fn handle_mission_clear(
    connection: &Connection,
    writers: &StateWriters,
    vehicle_target: &mut Option<VehicleTarget>,
    config: &VehicleConfig,
    cancel: &CancellationToken,
) -> Result<(), VehicleError> {
    let target = get_target(vehicle_target)?;
    let policy = config.retry_policy;

    let clear_msg = common::MavMessage::MISSION_CLEAR_ALL(common::MISSION_CLEAR_ALL_DATA {
        target_system: target.system_id,
        target_component: target.component_id,
        mission_type: common::MavMissionType::MAV_MISSION_TYPE_MISSION,
    });

    for _attempt in 0..=policy.max_retries {
        send_message(connection, config, clear_msg.clone()).await?;
        let result = wait_for_response(
            connection,
            writers,
            vehicle_target,
            cancel,
            Duration::from_millis(policy.request_timeout_ms),
            |msg| match msg {
                common::MavMessage::MISSION_ACK(data) => {
                    if data.mavtype == common::MavMissionResult::MAV_MISSION_ACCEPTED {
                        Some(Ok(()))
                    } else {
                        Some(Err(VehicleError::MissionTransfer(format!(
                            "clear rejected: {:?}",
                            data.mavtype
                        ))))
                    }
                }
                _ => None,
            },
        )
        .await;
        match result {
            Err(VehicleError::Timeout) => continue,
            other => return other,
        }
    }

    Err(VehicleError::Timeout)
}

// ---------------------------------------------------------------------------
// Mission set current
// ---------------------------------------------------------------------------

async fn handle_mission_set_current(
    seq: u16,
    connection: &Connection,
    writers: &StateWriters,
    vehicle_target: &mut Option<VehicleTarget>,
    config: &VehicleConfig,
    cancel: &CancellationToken,
) -> Result<(), VehicleError> {
    let target = get_target(vehicle_target)?;
    let policy = config.retry_policy;

    for _attempt in 0..=policy.max_retries {
        send_message(
            connection,
            config,
            common::MavMessage::COMMAND_LONG(common::COMMAND_LONG_DATA {
                target_system: target.system_id,
                target_component: target.component_id,
                command: MavCmd::MAV_CMD_DO_SET_MISSION_CURRENT,
                confirmation: 0,
                param1: seq as f32,
                param2: 0.0,
                param3: 0.0,
                param4: 0.0,
                param5: 0.0,
                param6: 0.0,
                param7: 0.0,
            }),
        )
        .await?;

        let result = wait_for_response(
            connection,
            writers,
            vehicle_target,
            cancel,
            Duration::from_millis(policy.request_timeout_ms),
            |msg| match msg {
                common::MavMessage::COMMAND_ACK(data)
                    if data.command == MavCmd::MAV_CMD_DO_SET_MISSION_CURRENT
                        && data.result == common::MavResult::MAV_RESULT_ACCEPTED =>
                {
                    Some(Ok(()))
                }
                common::MavMessage::MISSION_CURRENT(data) if data.seq == seq => Some(Ok(())),
                _ => None,
            },
        )
        .await;
        match result {
            Err(VehicleError::Timeout) => continue,
            other => return other,
        }
    }

    Err(VehicleError::MissionTransfer(
        "no confirmation for set-current command".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn velocity_burst_sends_one_setpoint_per_tick() {
        let cancel = CancellationToken::new();
        let sent = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        run_setpoint_burst(5, Duration::from_millis(100), &cancel, || {
            sent.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await
        .unwrap();

        assert_eq!(sent.load(Ordering::SeqCst), 5);
        assert_eq!(started.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn velocity_burst_stops_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let sent = AtomicU32::new(0);

        let err = run_setpoint_burst(5, Duration::from_millis(100), &cancel, || {
            sent.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, VehicleError::Cancelled));
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn velocity_setpoint_masks_out_everything_but_velocity() {
        let msg = velocity_setpoint_message(1, 1, 1.5, -0.5, 0.25);
        let data = match msg {
            common::MavMessage::SET_POSITION_TARGET_LOCAL_NED(data) => data,
            other => panic!("unexpected message: {other:?}"),
        };

        assert_eq!(data.coordinate_frame, common::MavFrame::MAV_FRAME_LOCAL_NED);
        assert_eq!(data.type_mask.bits(), VELOCITY_ONLY_TYPE_MASK);
        assert_eq!(data.vx, 1.5);
        assert_eq!(data.vy, -0.5);
        assert_eq!(data.vz, 0.25);
        assert_eq!((data.x, data.y, data.z), (0.0, 0.0, 0.0));
        assert_eq!((data.afx, data.afy, data.afz), (0.0, 0.0, 0.0));
    }

    #[test]
    fn velocity_mask_ignores_position_and_acceleration_bits() {
        use common::PositionTargetTypemask as Mask;
        let mask = Mask::from_bits_truncate(VELOCITY_ONLY_TYPE_MASK);
        assert!(mask.contains(Mask::POSITION_TARGET_TYPEMASK_X_IGNORE));
        assert!(mask.contains(Mask::POSITION_TARGET_TYPEMASK_Y_IGNORE));
        assert!(mask.contains(Mask::POSITION_TARGET_TYPEMASK_Z_IGNORE));
        assert!(mask.contains(Mask::POSITION_TARGET_TYPEMASK_AX_IGNORE));
        assert!(mask.contains(Mask::POSITION_TARGET_TYPEMASK_AY_IGNORE));
        assert!(mask.contains(Mask::POSITION_TARGET_TYPEMASK_AZ_IGNORE));
        assert!(!mask.contains(Mask::POSITION_TARGET_TYPEMASK_VX_IGNORE));
        assert!(!mask.contains(Mask::POSITION_TARGET_TYPEMASK_VY_IGNORE));
        assert!(!mask.contains(Mask::POSITION_TARGET_TYPEMASK_VZ_IGNORE));
    }

    #[test]
    fn mission_item_int_roundtrip_global_frame() {
        let item = WaypointCommand {
            seq: 3,
            current: false,
            frame: 3,
            command: 16,
            param1: 0.0,
            param2: 2.0,
            param3: 0.0,
            param4: 0.0,
            x: 47.397742,
            y: 8.545594,
            z: 25.0,
            autocontinue: true,
        };
        let target = VehicleTarget {
            system_id: 1,
            component_id: 1,
            autopilot: common::MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA,
        };

        let msg = to_mission_item_int_msg(&item, target).unwrap();
        let data = match msg {
            common::MavMessage::MISSION_ITEM_INT(data) => data,
            other => panic!("unexpected message: {other:?}"),
        };
        assert_eq!(data.x, 473977420);
        assert_eq!(data.y, 85455940);
        assert_eq!(data.seq, 3);

        let back = from_mission_item_int(&data);
        assert_eq!(back.seq, item.seq);
        assert_eq!(back.frame, item.frame);
        assert_eq!(back.command, item.command);
        assert!((back.x - item.x).abs() < 1e-6);
        assert!((back.y - item.y).abs() < 1e-6);
        assert_eq!(back.z, item.z);
    }

    #[test]
    fn unsupported_command_code_is_rejected() {
        let item = WaypointCommand {
            seq: 0,
            current: false,
            frame: 3,
            command: u16::MAX,
            param1: 0.0,
            param2: 0.0,
            param3: 0.0,
            param4: 0.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
            autocontinue: true,
        };
        let target = VehicleTarget {
            system_id: 1,
            component_id: 1,
            autopilot: common::MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA,
        };
        assert!(matches!(
            to_mission_item_int_msg(&item, target),
            Err(VehicleError::MissionTransfer(_))
        ));
    }
}
