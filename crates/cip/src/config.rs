//! Structured configuration record the two binaries load from JSON.
//!
//! Mirrors the option table the harness exposes: server bindings and
//! identity, ENIP command/session/CPF policy toggles, the CIP policy filter,
//! fault-engine parameters, and the personality payloads (adapter assemblies,
//! Logix tags, PCCC data tables, Modbus registers).

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fault::FaultConfig;
use crate::personality::adapter::UpdatePattern;
use crate::personality::pccc::PcccDataTable;
use crate::personality::{Assembly, Tag};
use crate::profile::{ForwardCloseMode, Profile};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Personality {
    Adapter,
    LogixLike,
    Pccc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub personality: Personality,
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    #[serde(default = "default_udp_port")]
    pub udp_io_port: u16,
    #[serde(default)]
    pub enable_udp_io: bool,
    #[serde(default)]
    pub identity_vendor_id: u16,
    #[serde(default)]
    pub identity_device_type: u16,
    #[serde(default)]
    pub identity_product_code: u16,
    #[serde(default)]
    pub identity_revision_major: u8,
    #[serde(default)]
    pub identity_revision_minor: u8,
    #[serde(default)]
    pub identity_serial: u32,
    #[serde(default = "default_product_name")]
    pub identity_product_name: String,
    #[serde(default)]
    pub rng_seed: u64,
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
}

fn default_listen_ip() -> String {
    "0.0.0.0".into()
}
fn default_tcp_port() -> u16 {
    44818
}
fn default_udp_port() -> u16 {
    2222
}
fn default_product_name() -> String {
    "CIP Test Harness".into()
}
fn default_connection_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnipSupportConfig {
    #[serde(default = "default_true")]
    pub list_identity: bool,
    #[serde(default = "default_true")]
    pub list_services: bool,
    #[serde(default = "default_true")]
    pub list_interfaces: bool,
    #[serde(default = "default_true")]
    pub register_session: bool,
    #[serde(default = "default_true")]
    pub send_rr_data: bool,
    #[serde(default = "default_true")]
    pub send_unit_data: bool,
}

impl Default for EnipSupportConfig {
    fn default() -> Self {
        Self {
            list_identity: true,
            list_services: true,
            list_interfaces: true,
            register_session: true,
            send_rr_data: true,
            send_unit_data: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnipSessionConfig {
    #[serde(default = "default_true")]
    pub require_register_session: bool,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_max_sessions_per_ip")]
    pub max_sessions_per_ip: usize,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

fn default_max_sessions() -> usize {
    4096
}
fn default_max_sessions_per_ip() -> usize {
    256
}
fn default_idle_timeout_ms() -> u64 {
    60_000
}

impl Default for EnipSessionConfig {
    fn default() -> Self {
        Self {
            require_register_session: true,
            max_sessions: default_max_sessions(),
            max_sessions_per_ip: default_max_sessions_per_ip(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnipCpfConfig {
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub allow_missing_items: bool,
    #[serde(default)]
    pub allow_extra_items: bool,
    #[serde(default)]
    pub allow_item_reorder: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CipPolicyConfig {
    #[serde(default = "default_true")]
    pub strict_paths: bool,
    #[serde(default = "default_unsupported_status")]
    pub default_unsupported_status: u8,
    #[serde(default)]
    pub default_error_ext_status: Vec<u8>,
    #[serde(default)]
    pub allow: Vec<(u16, u8)>,
    #[serde(default)]
    pub deny: Vec<(u16, u8)>,
    #[serde(default)]
    pub deny_status_overrides: Vec<((u16, u8), u8)>,
    #[serde(default)]
    pub forward_close_mode: ForwardCloseModeConfig,
}

fn default_unsupported_status() -> u8 {
    0x08
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardCloseModeConfig {
    #[default]
    MarkerScan,
    StrictOffset,
}

impl From<ForwardCloseModeConfig> for ForwardCloseMode {
    fn from(mode: ForwardCloseModeConfig) -> Self {
        match mode {
            ForwardCloseModeConfig::MarkerScan => ForwardCloseMode::MarkerScan,
            ForwardCloseModeConfig::StrictOffset => ForwardCloseMode::StrictOffset,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaultsConfig {
    #[serde(default)]
    pub base_latency_ms: u64,
    #[serde(default)]
    pub jitter_ms: u64,
    #[serde(default)]
    pub spike_every_n: u64,
    #[serde(default)]
    pub spike_delay_ms: u64,
    #[serde(default)]
    pub stall_every_n: u64,
    #[serde(default)]
    pub drop_every_n: u64,
    #[serde(default)]
    pub drop_pct: f64,
    #[serde(default)]
    pub close_every_n: u64,
    #[serde(default)]
    pub chunk_writes: bool,
    #[serde(default = "default_chunk_bound")]
    pub chunk_min: usize,
    #[serde(default = "default_chunk_bound")]
    pub chunk_max: usize,
    #[serde(default)]
    pub inter_chunk_delay_ms: u64,
    #[serde(default)]
    pub coalesce: bool,
    #[serde(default)]
    pub seed: u64,
}

fn default_chunk_bound() -> usize {
    1
}

impl From<FaultsConfig> for FaultConfig {
    fn from(c: FaultsConfig) -> Self {
        FaultConfig {
            base_latency_ms: c.base_latency_ms,
            jitter_ms: c.jitter_ms,
            spike_every_n: c.spike_every_n,
            spike_delay_ms: c.spike_delay_ms,
            stall_every_n: c.stall_every_n,
            drop_every_n: c.drop_every_n,
            drop_pct: c.drop_pct,
            close_every_n: c.close_every_n,
            chunk_writes: c.chunk_writes,
            chunk_min: c.chunk_min,
            chunk_max: c.chunk_max,
            inter_chunk_delay_ms: c.inter_chunk_delay_ms,
            coalesce: c.coalesce,
            seed: c.seed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePatternConfig {
    Counter,
    Random,
    Static,
    ReflectInputs,
}

impl From<UpdatePatternConfig> for UpdatePattern {
    fn from(p: UpdatePatternConfig) -> Self {
        match p {
            UpdatePatternConfig::Counter => UpdatePattern::Counter,
            UpdatePatternConfig::Random => UpdatePattern::Random,
            UpdatePatternConfig::Static => UpdatePattern::Static,
            UpdatePatternConfig::ReflectInputs => UpdatePattern::ReflectInputs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyConfig {
    pub name: String,
    pub class: u16,
    pub instance: u16,
    pub attribute: u16,
    pub size: usize,
    #[serde(default)]
    pub writable: bool,
    pub update_pattern: UpdatePatternConfig,
}

impl From<AssemblyConfig> for Assembly {
    fn from(a: AssemblyConfig) -> Self {
        Assembly::new(a.name, a.class, a.instance, a.attribute, a.size, a.writable, a.update_pattern.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogixTagConfig {
    pub name: String,
    pub type_code: u16,
    #[serde(default)]
    pub data: Vec<u8>,
}

impl From<LogixTagConfig> for Tag {
    fn from(t: LogixTagConfig) -> Self {
        Tag {
            name: t.name,
            type_code: t.type_code,
            data: t.data,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcccDataTableConfig {
    pub file_type: u8,
    pub file_number: u8,
    #[serde(default)]
    pub elements: Vec<u8>,
}

impl From<PcccDataTableConfig> for PcccDataTable {
    fn from(t: PcccDataTableConfig) -> Self {
        PcccDataTable {
            file_type: t.file_type,
            file_number: t.file_number,
            elements: t.elements,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModbusConfig {
    #[serde(default)]
    pub coils: usize,
    #[serde(default)]
    pub discrete_inputs: usize,
    #[serde(default)]
    pub holding_registers: usize,
    #[serde(default)]
    pub input_registers: usize,
}

/// A named profile override: selects a preset by mode/vendor, then layers the
/// explicit per-option overrides (only `name` is required; every other field
/// falls back to the preset's value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub mode: String,
    #[serde(default)]
    pub vendor: Option<String>,
}

impl ProfileConfig {
    pub fn resolve(&self) -> Profile {
        match &self.vendor {
            Some(vendor) => Profile::vendor(vendor),
            None => Profile::by_mode(&self.mode),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub enip_support: EnipSupportConfig,
    #[serde(default)]
    pub enip_session: EnipSessionConfig,
    #[serde(default)]
    pub enip_cpf: EnipCpfConfig,
    #[serde(default)]
    pub cip: CipPolicyConfig,
    #[serde(default)]
    pub faults: FaultsConfig,
    #[serde(default)]
    pub cip_profiles: Vec<String>,
    #[serde(default)]
    pub cip_profile_classes: HashMap<String, Vec<u16>>,
    #[serde(default)]
    pub adapter_assemblies: Vec<AssemblyConfig>,
    #[serde(default)]
    pub logix_tags: Vec<LogixTagConfig>,
    #[serde(default)]
    pub pccc_data_tables: Vec<PcccDataTableConfig>,
    #[serde(default)]
    pub modbus_config: ModbusConfig,
    #[serde(default = "default_profile")]
    pub profile: ProfileConfig,
}

fn default_profile() -> ProfileConfig {
    ProfileConfig {
        mode: "strict_odva".into(),
        vendor: None,
    }
}

impl Config {
    /// Loads and validates a config record from a JSON file. Startup-fatal:
    /// any parse or validation failure surfaces as `Error::Config`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::network(path.display().to_string(), e))?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for table in &self.pccc_data_tables {
            if table.elements.is_empty() {
                return Err(Error::Config(format!(
                    "pccc_data_tables: file N{}:{} has no elements",
                    table.file_number, table.file_type
                )));
            }
        }
        for assembly in &self.adapter_assemblies {
            if assembly.size == 0 {
                return Err(Error::Config(format!("adapter_assemblies: '{}' has zero size", assembly.name)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_server_config_parses_with_defaults() {
        let json = r#"{
            "server": { "personality": "adapter" }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.server.tcp_port, 44818);
        assert_eq!(config.server.udp_io_port, 2222);
        assert!(config.enip_support.register_session);
        assert_eq!(config.profile.mode, "strict_odva");
    }

    #[test]
    fn full_config_round_trips_personality_payloads() {
        let json = r#"{
            "server": { "personality": "pccc", "tcp_port": 44819 },
            "pccc_data_tables": [
                { "file_type": 136, "file_number": 7, "elements": [1, 2, 3, 4] }
            ],
            "faults": { "drop_every_n": 2, "seed": 1 }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.server.tcp_port, 44819);
        assert_eq!(config.pccc_data_tables.len(), 1);
        let table: PcccDataTable = config.pccc_data_tables[0].clone().into();
        assert_eq!(table.file_number, 7);
        let fault_cfg: FaultConfig = config.faults.into();
        assert_eq!(fault_cfg.drop_every_n, 2);
    }

    #[test]
    fn empty_pccc_table_fails_validation() {
        let json = r#"{
            "server": { "personality": "pccc" },
            "pccc_data_tables": [{ "file_type": 136, "file_number": 1, "elements": [] }]
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn vendor_profile_resolves_over_mode() {
        let cfg = ProfileConfig {
            mode: "strict_odva".into(),
            vendor: Some("schneider_m580".into()),
        };
        let profile = cfg.resolve();
        assert_eq!(profile.name, "schneider_m580");
    }
}
