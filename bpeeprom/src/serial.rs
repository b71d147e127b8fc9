use anyhow::{Result, anyhow, bail};

/// Convert macOS /dev/tty.* ports to /dev/cu.* ports
///
/// On macOS, /dev/tty.* ports should be avoided in favor of /dev/cu.* ports
fn normalize_mac_port_name(port_name: &str) -> String {
    #[cfg(target_os = "macos")]
    {
        if port_name.starts_with("/dev/tty.") {
            return port_name.replace("/dev/tty.", "/dev/cu.");
        }
    }
    port_name.to_string()
}

pub fn normalize_port_name(port_name: &str) -> String {
    normalize_mac_port_name(port_name.trim())
}

/// Serial ports a Bus Pirate could be attached to.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports()
        .map_err(|e| anyhow!("Failed to get available ports list: {}", e))?;

    Ok(ports
        .into_iter()
        // On macOS, only use /dev/cu.* ports, not /dev/tty.* ports
        .filter(|p| !cfg!(target_os = "macos") || !p.port_name.starts_with("/dev/tty."))
        .map(|p| p.port_name)
        .collect())
}

/// Check if the specified serial port is available
pub fn check_port_available(port_name: &str) -> Result<()> {
    let available_ports = list_ports()?;
    if available_ports.iter().any(|p| p == port_name) {
        return Ok(());
    }

    bail!(
        "The specified port '{}' does not exist. Available ports: {}",
        port_name,
        if available_ports.is_empty() {
            "No ports found".to_string()
        } else {
            available_ports.join(", ")
        }
    )
}
