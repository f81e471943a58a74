use crate::app::models::DeviceSummary;

/// Reads `adb devices -l`. Daemon start-up chatter and the header are skipped; of the long-form
/// attributes only `model:` is kept.
pub fn parse_adb_devices(output: &str) -> Vec<DeviceSummary> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('*'))
        .filter(|line| !line.starts_with("List of devices"))
        .filter_map(parse_device_line)
        .collect()
}

fn parse_device_line(line: &str) -> Option<DeviceSummary> {
    let mut fields = line.split_whitespace();
    let serial = fields.next()?;
    let state = fields.next()?;
    let model = fields
        .find_map(|field| field.strip_prefix("model:"))
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    Some(DeviceSummary {
        serial: serial.to_string(),
        state: state.to_string(),
        model,
    })
}

pub fn online_devices(devices: &[DeviceSummary]) -> Vec<&DeviceSummary> {
    devices.iter().filter(|d| d.state == "device").collect()
}
