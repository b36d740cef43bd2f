use crate::error::VehicleError;
use crate::mission::Mission;
use mavlink::common::MavCmd;
use tokio::sync::oneshot;

pub(crate) enum Command {
    Arm {
        force: bool,
        reply: oneshot::Sender<Result<(), VehicleError>>,
    },
    Disarm {
        force: bool,
        reply: oneshot::Sender<Result<(), VehicleError>>,
    },
    SetMode {
        custom_mode: u32,
        reply: oneshot::Sender<Result<(), VehicleError>>,
    },
    CommandLong {
        command: MavCmd,
        params: [f32; 7],
        reply: oneshot::Sender<Result<(), VehicleError>>,
    },
    GuidedGoto {
        lat_e7: i32,
        lon_e7: i32,
        alt_m: f32,
        reply: oneshot::Sender<Result<(), VehicleError>>,
    },
    /// Resend a local-NED velocity-only setpoint once per setpoint interval,
    /// `ticks` times, to satisfy the >= 10 Hz refresh contract.
    SetVelocity {
        vx: f32,
        vy: f32,
        vz: f32,
        ticks: u32,
        reply: oneshot::Sender<Result<(), VehicleError>>,
    },
    MissionUpload {
        mission: Mission,
        reply: oneshot::Sender<Result<(), VehicleError>>,
    },
    MissionDownload {
        reply: oneshot::Sender<Result<Mission, VehicleError>>,
    },
    MissionClear {
        reply: oneshot::Sender<Result<(), VehicleError>>,
    },
    MissionSetCurrent {
        seq: u16,
        reply: oneshot::Sender<Result<(), VehicleError>>,
    },
    Shutdown,
}
