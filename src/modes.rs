use crate::state::AutopilotType;

/// ArduPilot copter custom-mode numbers. The sequencer only drives
/// multirotors; other vehicle classes report their raw mode number.
const COPTER_MODES: &[(u32, &str)] = &[
    (0, "STABILIZE"),
    (1, "ACRO"),
    (2, "ALT_HOLD"),
    (3, "AUTO"),
    (4, "GUIDED"),
    (5, "LOITER"),
    (6, "RTL"),
    (7, "CIRCLE"),
    (9, "LAND"),
    (11, "DRIFT"),
    (13, "SPORT"),
    (15, "AUTOTUNE"),
    (16, "POSHOLD"),
    (17, "BRAKE"),
    (18, "THROW"),
    (21, "SMART_RTL"),
];

pub(crate) fn mode_name(autopilot: AutopilotType, custom_mode: u32) -> String {
    if autopilot != AutopilotType::ArduPilotMega {
        return format!("MODE({custom_mode})");
    }
    for &(num, name) in COPTER_MODES {
        if num == custom_mode {
            return name.to_string();
        }
    }
    format!("UNKNOWN({custom_mode})")
}

pub(crate) fn mode_number(autopilot: AutopilotType, name: &str) -> Option<u32> {
    if autopilot != AutopilotType::ArduPilotMega {
        return None;
    }
    let upper = name.to_uppercase();
    COPTER_MODES
        .iter()
        .find(|&&(_, mode_name)| mode_name == upper)
        .map(|&(num, _)| num)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guided_name() {
        assert_eq!(mode_name(AutopilotType::ArduPilotMega, 4), "GUIDED");
    }

    #[test]
    fn guided_number_case_insensitive() {
        assert_eq!(mode_number(AutopilotType::ArduPilotMega, "guided"), Some(4));
    }

    #[test]
    fn auto_number() {
        assert_eq!(mode_number(AutopilotType::ArduPilotMega, "AUTO"), Some(3));
    }

    #[test]
    fn unknown_mode_number() {
        assert_eq!(mode_name(AutopilotType::ArduPilotMega, 999), "UNKNOWN(999)");
    }

    #[test]
    fn non_ardupilot_returns_mode_n() {
        assert_eq!(mode_name(AutopilotType::Generic, 4), "MODE(4)");
        assert_eq!(mode_number(AutopilotType::Generic, "GUIDED"), None);
    }
}
