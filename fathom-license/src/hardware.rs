//! Hardware fingerprinting for license binding.
//!
//! Each hardware component that yields a usable identifier becomes one
//! fixed-length fingerprint. Binding compares those fingerprints one by one,
//! so replacing a single part (a GPU, a system drive) leaves the rest intact.
//!
//! Raw identifiers never leave this module; only their hashes do.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::hash::{component_hash, sha256_hex};

/// Values firmware vendors ship in place of a real identifier.
const PLACEHOLDER_VALUES: &[&str] = &[
    "default string",
    "to be filled by o.e.m.",
    "to be filled by oem",
    "n/a",
    "na",
    "none",
    "null",
    "unknown",
    "not specified",
    "not applicable",
    "not available",
    "system serial number",
    "system product name",
    "base board serial number",
    "chassis serial number",
    "default",
    "oem",
    "o.e.m.",
    "0",
    "00000000",
    "0000000000000000",
    "123456789",
    "00000000-0000-0000-0000-000000000000",
    "ffffffff-ffff-ffff-ffff-ffffffffffff",
    "03000200-0400-0500-0006-000700080009",
];

/// Returns true if `value` is a known manufacturer placeholder.
#[must_use]
pub fn is_placeholder(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    PLACEHOLDER_VALUES.contains(&normalized.as_str())
}

/// A hardware component that contributes one fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HardwareComponent {
    Cpu,
    Mainboard,
    Firmware,
    SystemVolume,
    OsInstall,
    OsProduct,
    DisplayAdapter,
}

impl HardwareComponent {
    /// All components in collection order.
    pub const ALL: [Self; 7] = [
        Self::Cpu,
        Self::Mainboard,
        Self::Firmware,
        Self::SystemVolume,
        Self::OsInstall,
        Self::OsProduct,
        Self::DisplayAdapter,
    ];

    /// The most stable components, used for the display machine id.
    pub const PRIMARY: [Self; 3] = [Self::Cpu, Self::Mainboard, Self::Firmware];

    /// Prefix hashed in front of the raw value.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::Mainboard => "BOARD",
            Self::Firmware => "BIOS",
            Self::SystemVolume => "VOLUME",
            Self::OsInstall => "OSINSTALL",
            Self::OsProduct => "OSPRODUCT",
            Self::DisplayAdapter => "GPU",
        }
    }
}

impl fmt::Display for HardwareComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cpu => "CPU",
            Self::Mainboard => "Mainboard",
            Self::Firmware => "Firmware",
            Self::SystemVolume => "System volume",
            Self::OsInstall => "OS install",
            Self::OsProduct => "OS product",
            Self::DisplayAdapter => "Display adapter",
        };
        f.write_str(name)
    }
}

/// An ordered set of component fingerprints collected from one machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FingerprintSet(Vec<String>);

impl FingerprintSet {
    /// Wraps already-hashed fingerprints.
    #[must_use]
    pub fn new(fingerprints: Vec<String>) -> Self {
        Self(fingerprints)
    }

    /// Consumes the set, returning the hashes.
    #[must_use]
    pub fn into_inner(self) -> Vec<String> {
        self.0
    }
}

impl Deref for FingerprintSet {
    type Target = [String];

    fn deref(&self) -> &[String] {
        &self.0
    }
}

impl From<Vec<String>> for FingerprintSet {
    fn from(v: Vec<String>) -> Self {
        Self(v)
    }
}

/// Source of raw hardware identifiers.
///
/// Implementations must be read-only so collection can run from any thread.
pub trait HardwareSource {
    /// Reads the raw identifier for `component`, if the platform exposes one.
    fn read(&self, component: HardwareComponent) -> Option<String>;

    /// Weaker machine traits used only when no component is available.
    /// Returns `(label, value)` pairs.
    fn fallback(&self) -> Vec<(&'static str, String)>;
}

/// Outcome of reading one component, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentState {
    /// Usable value; carries its fingerprint.
    Available(String),
    /// The platform returned a manufacturer placeholder.
    Placeholder,
    /// Nothing could be read.
    Missing,
}

/// Per-component diagnostic line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentReport {
    pub component: HardwareComponent,
    pub state: ComponentState,
}

/// Collects fingerprints from a [`HardwareSource`].
#[derive(Debug, Clone, Default)]
pub struct HardwareFingerprintCollector<S = SystemHardware> {
    source: S,
}

impl HardwareFingerprintCollector<SystemHardware> {
    /// Collector over the running machine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            source: SystemHardware,
        }
    }
}

impl<S: HardwareSource> HardwareFingerprintCollector<S> {
    /// Collector over a custom source.
    pub fn with_source(source: S) -> Self {
        Self { source }
    }

    /// Generates the fingerprint set for this machine. Never empty.
    pub fn generate(&self) -> FingerprintSet {
        let mut set: Vec<String> = HardwareComponent::ALL
            .iter()
            .filter_map(|&c| self.usable(c).map(|raw| component_hash(c.prefix(), &raw)))
            .collect();

        if set.is_empty() {
            tracing::warn!("no hardware identifiers available, using fallback fingerprints");
            set = self.fallback_set();
        }

        tracing::debug!(count = set.len(), "generated hardware fingerprints");
        FingerprintSet(set)
    }

    /// Human-readable machine id (`XXXX-XXXX-XXXX-XXXX`) built from the
    /// CPU, mainboard and firmware. Display only, never used for binding.
    pub fn generate_primary(&self) -> String {
        let mut parts: Vec<String> = HardwareComponent::PRIMARY
            .iter()
            .filter_map(|&c| self.usable(c).map(|raw| format!("{}:{raw}", c.prefix())))
            .collect();

        if parts.is_empty() {
            parts = self
                .source
                .fallback()
                .into_iter()
                .map(|(label, value)| format!("{label}:{value}"))
                .collect();
        }

        let digest = sha256_hex(parts.join("|").as_bytes()).to_ascii_uppercase();
        digest[..16]
            .as_bytes()
            .chunks(4)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect::<Vec<_>>()
            .join("-")
    }

    /// Reports what each component yielded.
    pub fn diagnostics(&self) -> Vec<ComponentReport> {
        HardwareComponent::ALL
            .iter()
            .map(|&component| {
                let state = match self.source.read(component) {
                    Some(raw) if raw.trim().is_empty() => ComponentState::Missing,
                    Some(raw) if is_placeholder(&raw) => ComponentState::Placeholder,
                    Some(raw) => {
                        ComponentState::Available(component_hash(component.prefix(), raw.trim()))
                    }
                    None => ComponentState::Missing,
                };
                ComponentReport { component, state }
            })
            .collect()
    }

    /// Plain-text diagnostics for support tickets.
    pub fn diagnostics_report(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Machine ID: {}\n", self.generate_primary()));
        for report in self.diagnostics() {
            let line = match &report.state {
                ComponentState::Available(hash) => hash.clone(),
                ComponentState::Placeholder => "(placeholder value ignored)".to_string(),
                ComponentState::Missing => "(unavailable)".to_string(),
            };
            out.push_str(&format!("  {:<16} {line}\n", report.component.to_string()));
        }
        let set = self.generate();
        out.push_str(&format!("Fingerprints collected: {}\n", set.len()));
        out
    }

    fn usable(&self, component: HardwareComponent) -> Option<String> {
        self.source
            .read(component)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty() && !is_placeholder(v))
    }

    fn fallback_set(&self) -> Vec<String> {
        let mut set: Vec<String> = self
            .source
            .fallback()
            .into_iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .map(|(label, value)| component_hash(label, value.trim()))
            .collect();
        if set.is_empty() {
            set.push(component_hash("OS", &os_description()));
        }
        set
    }
}

/// In-memory hardware source, for tests and for re-checking a captured
/// machine profile.
#[derive(Debug, Clone, Default)]
pub struct StaticHardware {
    values: BTreeMap<HardwareComponent, String>,
    fallback: Vec<(&'static str, String)>,
}

impl StaticHardware {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the raw value for one component.
    #[must_use]
    pub fn with(mut self, component: HardwareComponent, value: impl Into<String>) -> Self {
        self.values.insert(component, value.into());
        self
    }

    /// Adds a fallback trait.
    #[must_use]
    pub fn with_fallback(mut self, label: &'static str, value: impl Into<String>) -> Self {
        self.fallback.push((label, value.into()));
        self
    }
}

impl HardwareSource for StaticHardware {
    fn read(&self, component: HardwareComponent) -> Option<String> {
        self.values.get(&component).cloned()
    }

    fn fallback(&self) -> Vec<(&'static str, String)> {
        self.fallback.clone()
    }
}

/// Reads identifiers from the running operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHardware;

impl HardwareSource for SystemHardware {
    fn read(&self, component: HardwareComponent) -> Option<String> {
        platform::read(component)
    }

    fn fallback(&self) -> Vec<(&'static str, String)> {
        let mut traits = Vec::new();
        if let Some(name) = hostname::get().ok().and_then(|h| h.into_string().ok()) {
            traits.push(("MACHINE", name));
        }
        if let Some(home) = dirs::home_dir() {
            traits.push(("PROFILE", home.to_string_lossy().into_owned()));
        }
        traits.push(("OS", os_description()));
        traits
    }
}

fn os_description() -> String {
    format!("{} {}", env::consts::OS, env::consts::ARCH)
}

/// Normalizes a `%SystemDrive%` value to `X:`, defaulting to `C:`.
#[cfg(any(target_os = "windows", test))]
fn drive_letter(value: Option<&str>) -> String {
    value
        .map(|v| v.trim().trim_end_matches(['\\', '/']))
        .filter(|v| v.len() == 2 && v.ends_with(':') && v.as_bytes()[0].is_ascii_alphabetic())
        .map_or_else(|| "C:".to_string(), str::to_ascii_uppercase)
}

#[cfg(any(target_os = "windows", target_os = "macos"))]
fn run(program: &str, args: &[&str]) -> Option<String> {
    std::process::Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
}

#[cfg(target_os = "linux")]
mod platform {
    use super::HardwareComponent;
    use std::fs;
    use std::path::Path;

    pub fn read(component: HardwareComponent) -> Option<String> {
        match component {
            HardwareComponent::Cpu => cpu_signature(),
            HardwareComponent::Mainboard => read_trimmed("/sys/class/dmi/id/board_serial"),
            HardwareComponent::Firmware => read_trimmed("/sys/class/dmi/id/product_serial")
                .or_else(|| read_trimmed("/sys/class/dmi/id/product_uuid")),
            HardwareComponent::SystemVolume => root_volume_uuid(),
            HardwareComponent::OsInstall => read_trimmed("/etc/machine-id")
                .or_else(|| read_trimmed("/var/lib/dbus/machine-id")),
            HardwareComponent::OsProduct => os_release(),
            HardwareComponent::DisplayAdapter => display_adapter(),
        }
    }

    fn read_trimmed(path: impl AsRef<Path>) -> Option<String> {
        fs::read_to_string(path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Vendor, family, model and stepping of the first processor.
    fn cpu_signature() -> Option<String> {
        let content = fs::read_to_string("/proc/cpuinfo").ok()?;
        let first = content.split("\n\n").next()?;
        let field = |name: &str| {
            first
                .lines()
                .find(|l| l.split(':').next().map(str::trim) == Some(name))
                .and_then(|l| l.split_once(':'))
                .map(|(_, v)| v.trim().to_string())
                .unwrap_or_default()
        };
        let signature = [
            field("vendor_id"),
            field("cpu family"),
            field("model"),
            field("stepping"),
            field("model name"),
        ]
        .join("|");
        if signature.chars().all(|c| c == '|') {
            None
        } else {
            Some(signature)
        }
    }

    /// UUID of the filesystem mounted at `/`.
    fn root_volume_uuid() -> Option<String> {
        let mounts = fs::read_to_string("/proc/self/mounts").ok()?;
        let device = mounts.lines().find_map(|line| {
            let mut parts = line.split_whitespace();
            let dev = parts.next()?;
            let mount_point = parts.next()?;
            (mount_point == "/" && dev.starts_with("/dev/")).then(|| dev.to_string())
        })?;
        let device = fs::canonicalize(device).ok()?;

        fs::read_dir("/dev/disk/by-uuid").ok()?.flatten().find_map(|entry| {
            let target = fs::canonicalize(entry.path()).ok()?;
            (target == device).then(|| entry.file_name().to_string_lossy().into_owned())
        })
    }

    fn os_release() -> Option<String> {
        let content = fs::read_to_string("/etc/os-release").ok()?;
        let value = |key: &str| {
            content
                .lines()
                .find(|l| l.starts_with(key))
                .map(|l| l.trim_start_matches(key).trim_matches('"').to_string())
        };
        match (value("ID="), value("VERSION_ID=")) {
            (Some(id), Some(version)) => Some(format!("{id} {version}")),
            (Some(id), None) => Some(id),
            _ => None,
        }
    }

    fn display_adapter() -> Option<String> {
        let mut cards: Vec<_> = fs::read_dir("/sys/class/drm")
            .ok()?
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("card") && !n.contains('-'))
            })
            .collect();
        cards.sort();
        cards.into_iter().find_map(|card| {
            let vendor = read_trimmed(card.join("device/vendor"))?;
            let device = read_trimmed(card.join("device/device"))?;
            Some(format!("{vendor}:{device}"))
        })
    }
}

#[cfg(target_os = "windows")]
mod platform {
    use super::{run, HardwareComponent};

    pub fn read(component: HardwareComponent) -> Option<String> {
        match component {
            HardwareComponent::Cpu => wmic(&["cpu", "get", "ProcessorId", "/value"], "ProcessorId"),
            HardwareComponent::Mainboard => {
                wmic(&["baseboard", "get", "SerialNumber", "/value"], "SerialNumber")
            }
            HardwareComponent::Firmware => {
                wmic(&["bios", "get", "SerialNumber", "/value"], "SerialNumber")
            }
            HardwareComponent::SystemVolume => {
                let filter = format!("DeviceID='{}'", system_drive());
                wmic(
                    &[
                        "logicaldisk",
                        "where",
                        filter.as_str(),
                        "get",
                        "VolumeSerialNumber",
                        "/value",
                    ],
                    "VolumeSerialNumber",
                )
            }
            HardwareComponent::OsInstall => {
                reg_value(r"HKLM\SOFTWARE\Microsoft\Cryptography", "MachineGuid")
            }
            HardwareComponent::OsProduct => {
                reg_value(r"HKLM\SOFTWARE\Microsoft\Windows NT\CurrentVersion", "ProductId")
            }
            HardwareComponent::DisplayAdapter => wmic(
                &["path", "win32_VideoController", "get", "PNPDeviceID", "/value"],
                "PNPDeviceID",
            ),
        }
    }

    /// Drive letter Windows is installed on, `C:` when unset.
    fn system_drive() -> String {
        super::drive_letter(std::env::var("SystemDrive").ok().as_deref())
    }

    fn wmic(args: &[&str], key: &str) -> Option<String> {
        let output = run("wmic", args)?;
        let prefix = format!("{key}=");
        output
            .lines()
            .find_map(|l| l.trim().strip_prefix(prefix.as_str()).map(str::trim))
            .filter(|v| !v.is_empty())
            .map(String::from)
    }

    fn reg_value(path: &str, name: &str) -> Option<String> {
        let output = run("reg", &["query", path, "/v", name])?;
        output.lines().find_map(|l| {
            let mut parts = l.split_whitespace();
            (parts.next() == Some(name)).then(|| parts.skip(1).collect::<Vec<_>>().join(" "))
        })
    }
}

#[cfg(target_os = "macos")]
mod platform {
    use super::{run, HardwareComponent};

    pub fn read(component: HardwareComponent) -> Option<String> {
        match component {
            HardwareComponent::Cpu => run("sysctl", &["-n", "machdep.cpu.brand_string"])
                .map(|s| s.trim().to_string()),
            HardwareComponent::Mainboard => ioreg_value("IOPlatformSerialNumber"),
            HardwareComponent::Firmware => ioreg_value("IOPlatformUUID"),
            HardwareComponent::SystemVolume => labeled(&run("diskutil", &["info", "/"])?, "Volume UUID"),
            HardwareComponent::OsInstall => None,
            HardwareComponent::OsProduct => run("sw_vers", &["-buildVersion"])
                .map(|s| s.trim().to_string()),
            HardwareComponent::DisplayAdapter => {
                labeled(&run("system_profiler", &["SPDisplaysDataType"])?, "Chipset Model")
            }
        }
    }

    fn ioreg_value(key: &str) -> Option<String> {
        run("ioreg", &["-rd1", "-c", "IOPlatformExpertDevice"])?
            .lines()
            .find(|l| l.contains(key))
            .and_then(|l| l.split('"').nth(3))
            .map(String::from)
    }

    fn labeled(output: &str, label: &str) -> Option<String> {
        output
            .lines()
            .find(|l| l.trim_start().starts_with(label))
            .and_then(|l| l.split_once(':'))
            .map(|(_, v)| v.trim().to_string())
    }
}

#[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
mod platform {
    use super::HardwareComponent;

    pub fn read(_component: HardwareComponent) -> Option<String> {
        None
    }
}
