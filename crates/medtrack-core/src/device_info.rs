//! Device metadata snapshots attached to ledger records

use crate::types::DeviceInfo;

/// Produces a fresh [`DeviceInfo`] snapshot
pub trait DeviceInfoSource: Send + Sync {
    fn snapshot(&self) -> DeviceInfo;
}

/// Reads what the host process can observe about itself
#[derive(Clone, Copy, Debug, Default)]
pub struct HostDeviceInfo;

impl DeviceInfoSource for HostDeviceInfo {
    fn snapshot(&self) -> DeviceInfo {
        let locale = std::env::var("LANG")
            .ok()
            .and_then(|lang| lang.split('.').next().map(str::to_string))
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        let region = locale
            .split(['_', '-'])
            .nth(1)
            .unwrap_or("unknown")
            .to_string();

        DeviceInfo {
            os_name: std::env::consts::OS.to_string(),
            os_version: os_release().unwrap_or_else(|| "unknown".to_string()),
            model: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string()),
            locale,
            region,
            timezone: std::env::var("TZ").unwrap_or_else(|_| "UTC".to_string()),
        }
    }
}

/// Kernel release string where the host exposes one
fn os_release() -> Option<String> {
    std::fs::read_to_string("/proc/sys/kernel/osrelease")
        .ok()
        .map(|release| release.trim().to_string())
        .filter(|release| !release.is_empty())
}

/// Always returns the same snapshot
#[derive(Clone, Debug, Default)]
pub struct StaticDeviceInfo(pub DeviceInfo);

impl DeviceInfoSource for StaticDeviceInfo {
    fn snapshot(&self) -> DeviceInfo {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_snapshot_is_populated() {
        let info = HostDeviceInfo.snapshot();
        assert_eq!(info.os_name, std::env::consts::OS);
        assert!(!info.model.is_empty());
        assert!(!info.os_version.is_empty());
        assert_ne!(info.os_version, std::env::consts::ARCH);
        assert!(!info.timezone.is_empty());
    }

    #[test]
    fn test_static_snapshot() {
        let info = DeviceInfo {
            os_name: "ios".into(),
            os_version: "17.4".into(),
            model: "iPhone15,2".into(),
            locale: "de_DE".into(),
            region: "DE".into(),
            timezone: "Europe/Berlin".into(),
        };
        assert_eq!(StaticDeviceInfo(info.clone()).snapshot(), info);
    }
}
