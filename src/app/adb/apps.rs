use std::collections::HashSet;

const PACKAGE_PREFIX: &str = "package:";

/// Normalizes `pm list packages` output into bare package names, in device order.
pub fn parse_pm_list_packages_output(output: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut packages = Vec::new();
    for raw in output.lines() {
        let line = raw.trim();
        let name = line.strip_prefix(PACKAGE_PREFIX).unwrap_or(line).trim();
        if name.is_empty() {
            continue;
        }
        if seen.insert(name.to_string()) {
            packages.push(name.to_string());
        }
    }
    packages
}

pub fn list_packages_args(serial: &str, include_uninstalled: bool) -> Vec<String> {
    let mut args = vec![
        "-s".to_string(),
        serial.to_string(),
        "shell".to_string(),
        "pm".to_string(),
        "list".to_string(),
        "packages".to_string(),
    ];
    if include_uninstalled {
        args.push("-u".to_string());
    }
    args
}

pub fn uninstall_for_user_args(serial: &str, package_name: &str) -> Vec<String> {
    vec![
        "-s".to_string(),
        serial.to_string(),
        "shell".to_string(),
        "pm".to_string(),
        "uninstall".to_string(),
        "--user".to_string(),
        "0".to_string(),
        package_name.to_string(),
    ]
}

pub fn install_existing_args(serial: &str, package_name: &str) -> Vec<String> {
    vec![
        "-s".to_string(),
        serial.to_string(),
        "shell".to_string(),
        "pm".to_string(),
        "install-existing".to_string(),
        package_name.to_string(),
    ]
}
