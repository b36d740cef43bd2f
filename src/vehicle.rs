use crate::command::Command;
use crate::config::VehicleConfig;
use crate::error::VehicleError;
use crate::event_loop::run_event_loop;
use crate::mission::{HomePosition, MissionHandle};
use crate::state::{
    create_channels, LinkState, MissionState, StateChannels, Telemetry, VehicleState,
};
use mavlink::common::{self, MavCmd};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

/// Async MAVLink vehicle handle.
///
/// `Vehicle` is `Clone + Send + Sync`. Clones share the same connection.
/// When the last clone is dropped, the event loop is cancelled.
#[derive(Clone)]
pub struct Vehicle {
    pub(crate) inner: Arc<VehicleInner>,
}

pub(crate) struct VehicleInner {
    pub(crate) command_tx: mpsc::Sender<Command>,
    pub(crate) config: VehicleConfig,
    cancel: CancellationToken,
    channels: StateChannels,
}

impl Drop for VehicleInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Vehicle {
    /// Connect using a mavlink address string (e.g. `serial:/dev/ttyACM0:57600`).
    /// Waits for the first HEARTBEAT before returning.
    pub async fn connect(address: &str) -> Result<Self, VehicleError> {
        Self::connect_with_config(address, VehicleConfig::default()).await
    }

    /// Connect via serial port, the link the flight controller usually hangs
    /// off of.
    pub async fn connect_serial(port: &str, baud: u32) -> Result<Self, VehicleError> {
        Self::connect(&format!("serial:{port}:{baud}")).await
    }

    /// Connect via UDP. `bind_addr` is `host:port` to bind to (e.g. `0.0.0.0:14550`).
    pub async fn connect_udp(bind_addr: &str) -> Result<Self, VehicleError> {
        Self::connect(&format!("udpin:{bind_addr}")).await
    }

    /// Connect via TCP. `addr` is `host:port` to bind and listen on for the
    /// vehicle's incoming connection.
    pub async fn connect_tcp(addr: &str) -> Result<Self, VehicleError> {
        Self::connect(&format!("tcpin:{addr}")).await
    }

    /// Connect with a custom `VehicleConfig`.
    pub async fn connect_with_config(
        address: &str,
        config: VehicleConfig,
    ) -> Result<Self, VehicleError> {
        let connection = mavlink::connect_async::<common::MavMessage>(address)
            .await
            .map_err(|err| VehicleError::ConnectionFailed(err.to_string()))?;

        let (writers, channels) = create_channels();
        let cancel = CancellationToken::new();
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer_size);
        let connect_timeout = config.connect_timeout;

        tokio::spawn(run_event_loop(
            connection,
            command_rx,
            writers,
            config.clone(),
            cancel.clone(),
        ));

        let vehicle = Vehicle {
            inner: Arc::new(VehicleInner {
                command_tx,
                config,
                cancel,
                channels,
            }),
        };

        // Wait for the first HEARTBEAT (vehicle_state leaves its default)
        let mut vs_rx = vehicle.state();
        let heartbeat_wait = async {
            loop {
                vs_rx
                    .changed()
                    .await
                    .map_err(|_| VehicleError::Disconnected)?;
                let state = vs_rx.borrow().clone();
                if !state.mode_name.is_empty() {
                    return Ok::<(), VehicleError>(());
                }
            }
        };

        tokio::select! {
            result = heartbeat_wait => result?,
            _ = tokio::time::sleep(connect_timeout) => {
                return Err(VehicleError::Timeout);
            }
        }

        Ok(vehicle)
    }

    // --- Reactive state (watch channels) ---

    pub fn state(&self) -> watch::Receiver<VehicleState> {
        self.inner.channels.vehicle_state.clone()
    }

    pub fn telemetry(&self) -> watch::Receiver<Telemetry> {
        self.inner.channels.telemetry.clone()
    }

    pub fn home_position(&self) -> watch::Receiver<Option<HomePosition>> {
        self.inner.channels.home_position.clone()
    }

    pub fn mission_state(&self) -> watch::Receiver<MissionState> {
        self.inner.channels.mission_state.clone()
    }

    pub fn link_state(&self) -> watch::Receiver<LinkState> {
        self.inner.channels.link_state.clone()
    }

    // --- Primitive vehicle commands ---

    pub async fn arm(&self, force: bool) -> Result<(), VehicleError> {
        self.send_command(|reply| Command::Arm { force, reply }).await
    }

    pub async fn disarm(&self, force: bool) -> Result<(), VehicleError> {
        self.send_command(|reply| Command::Disarm { force, reply })
            .await
    }

    pub async fn set_mode(&self, custom_mode: u32) -> Result<(), VehicleError> {
        self.send_command(|reply| Command::SetMode { custom_mode, reply })
            .await
    }

    pub async fn set_mode_by_name(&self, name: &str) -> Result<(), VehicleError> {
        let state = self.inner.channels.vehicle_state.borrow().clone();
        let custom_mode = crate::modes::mode_number(state.autopilot, name)
            .ok_or_else(|| VehicleError::ModeNotAvailable(name.to_string()))?;
        self.set_mode(custom_mode).await
    }

    pub async fn takeoff(&self, altitude_m: f32) -> Result<(), VehicleError> {
        self.command_long(
            MavCmd::MAV_CMD_NAV_TAKEOFF,
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, altitude_m],
        )
        .await
    }

    /// Issue a single guided go-to-position setpoint. Fire and forget; the
    /// polled variant lives in [`Vehicle::goto`](crate::sequence).
    pub async fn goto_position(
        &self,
        lat_deg: f64,
        lon_deg: f64,
        alt_m: f32,
    ) -> Result<(), VehicleError> {
        let lat_e7 = (lat_deg * 1e7).round() as i32;
        let lon_e7 = (lon_deg * 1e7).round() as i32;
        self.send_command(|reply| Command::GuidedGoto {
            lat_e7,
            lon_e7,
            alt_m,
            reply,
        })
        .await
    }

    pub async fn command_long(&self, cmd: MavCmd, params: [f32; 7]) -> Result<(), VehicleError> {
        self.send_command(|reply| Command::CommandLong {
            command: cmd,
            params,
            reply,
        })
        .await
    }

    /// Mission sub-API.
    pub fn mission(&self) -> MissionHandle<'_> {
        MissionHandle::new(self)
    }

    /// Gracefully disconnect from the vehicle.
    pub async fn disconnect(self) -> Result<(), VehicleError> {
        let _ = self.inner.command_tx.send(Command::Shutdown).await;
        Ok(())
    }

    // --- Internal helper ---

    pub(crate) async fn send_command<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, VehicleError>>) -> Command,
    ) -> Result<T, VehicleError> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .command_tx
            .send(make(tx))
            .await
            .map_err(|_| VehicleError::Disconnected)?;
        rx.await.map_err(|_| VehicleError::Disconnected)?
    }
}
