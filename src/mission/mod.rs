pub mod file;
pub mod types;
pub mod wire;

pub use file::{format_wpl, parse_wpl, WPL_HEADER};
pub use types::{HomePosition, Mission, WaypointCommand, NAV_WAYPOINT_CMD};
pub use wire::{items_for_wire_upload, mission_from_wire_download};

use crate::error::{MissionFileError, VehicleError};
use crate::Vehicle;
use std::path::Path;
use tracing::info;

/// Handle to mission operations on a `Vehicle`.
pub struct MissionHandle<'a> {
    vehicle: &'a Vehicle,
}

impl<'a> MissionHandle<'a> {
    pub(crate) fn new(vehicle: &'a Vehicle) -> Self {
        Self { vehicle }
    }

    /// Replace the onboard mission store. The store is cleared first; if the
    /// transfer fails partway through, device-side state is undefined.
    pub async fn upload(&self, mission: Mission) -> Result<(), VehicleError> {
        self.vehicle
            .send_command(|reply| crate::command::Command::MissionUpload { mission, reply })
            .await
    }

    /// Download the onboard mission, in device order.
    pub async fn download(&self) -> Result<Mission, VehicleError> {
        self.vehicle
            .send_command(|reply| crate::command::Command::MissionDownload { reply })
            .await
    }

    pub async fn clear(&self) -> Result<(), VehicleError> {
        self.vehicle
            .send_command(|reply| crate::command::Command::MissionClear { reply })
            .await
    }

    pub async fn set_current(&self, seq: u16) -> Result<(), VehicleError> {
        self.vehicle
            .send_command(|reply| crate::command::Command::MissionSetCurrent { seq, reply })
            .await
    }

    /// Read a QGC WPL 110 file and upload it to the vehicle.
    pub async fn upload_from_file(&self, path: impl AsRef<Path>) -> Result<(), VehicleError> {
        let path = path.as_ref();
        info!(path = %path.display(), "uploading mission from file");
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(MissionFileError::Io)?;
        let mission = parse_wpl(&contents)?;
        self.upload(mission).await
    }

    /// Download the onboard mission and save it as a QGC WPL 110 file, with
    /// the vehicle's recorded home location synthesized as the seq-0 row.
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), VehicleError> {
        let path = path.as_ref();
        let mission = self.download().await?;

        let home = self
            .vehicle
            .home_position()
            .borrow()
            .or(mission.home)
            .ok_or(VehicleError::HomeUnknown)?;

        info!(path = %path.display(), items = mission.len(), "saving mission to file");
        let contents = format_wpl(&mission, &home);
        tokio::fs::write(path, contents)
            .await
            .map_err(MissionFileError::Io)?;
        Ok(())
    }
}
