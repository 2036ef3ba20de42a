//! TOML-based configuration for mesh nodes.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use mesh_core::constants::{DEFAULT_TTL, MAX_TTL, NETWORK_KEY_SIZE};
use mesh_core::provisioning::Algorithms;
use mesh_core::{Address, AddressRange, Algorithm, MeshNetwork, NetworkKey};
use mesh_transport::SarParameters;

use crate::error::NodeError;

/// Top-level node configuration loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub sar: SarSection,
    #[serde(default)]
    pub provisioning: ProvisioningSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, NodeError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("failed to read config file: {e}")))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(format!("failed to parse config: {e}")))
    }

    /// Check every value that serde alone cannot.
    pub fn validate(&self) -> Result<(), NodeError> {
        self.network.network_key()?;
        self.network.local_address()?;
        self.network.provisioner_ranges()?;
        self.network.default_ttl()?;
        self.provisioning.static_oob_key()?;
        Ok(())
    }

    /// The provisioner's view of the network: one network key, the IV Index
    /// and the address ranges to allocate from.
    pub fn mesh_network(&self) -> Result<MeshNetwork, NodeError> {
        let mut network = MeshNetwork::new(self.network.provisioner_ranges()?);
        network
            .network_keys
            .push(NetworkKey::new(self.network.key_index, self.network.network_key()?));
        network.iv_index.index = self.network.iv_index;
        Ok(network)
    }
}

// ---------------------------------------------------------------------------
// [network]
// ---------------------------------------------------------------------------

/// A `[[network.provisioner_ranges]]` entry.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RangeEntry {
    pub low: u16,
    pub high: u16,
}

#[derive(Debug, Deserialize)]
pub struct NetworkSection {
    /// 16-byte network key as 32 hex digits.
    #[serde(default = "default_network_key")]
    pub network_key: String,
    #[serde(default)]
    pub key_index: u16,
    #[serde(default)]
    pub iv_index: u32,
    #[serde(default = "default_ttl")]
    pub default_ttl: u8,
    /// Unicast address of this node's primary element.
    #[serde(default = "default_unicast_address")]
    pub unicast_address: u16,
    #[serde(default = "default_provisioner_ranges")]
    pub provisioner_ranges: Vec<RangeEntry>,
}

fn default_network_key() -> String {
    "7dd7364cd842ad18c17c2b820c84c3d6".to_string()
}

fn default_ttl() -> u8 {
    DEFAULT_TTL
}

fn default_unicast_address() -> u16 {
    0x0001
}

fn default_provisioner_ranges() -> Vec<RangeEntry> {
    vec![RangeEntry {
        low: 0x0100,
        high: 0x7FFF,
    }]
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            network_key: default_network_key(),
            key_index: 0,
            iv_index: 0,
            default_ttl: default_ttl(),
            unicast_address: default_unicast_address(),
            provisioner_ranges: default_provisioner_ranges(),
        }
    }
}

impl NetworkSection {
    pub fn network_key(&self) -> Result<[u8; NETWORK_KEY_SIZE], NodeError> {
        parse_key(&self.network_key, "network_key")
    }

    pub fn local_address(&self) -> Result<Address, NodeError> {
        let address = Address(self.unicast_address);
        if !address.is_unicast() {
            return Err(NodeError::Config(format!(
                "unicast_address {address} is not a unicast address"
            )));
        }
        Ok(address)
    }

    /// TTL 1 is reserved; anything above 127 is invalid.
    pub fn default_ttl(&self) -> Result<u8, NodeError> {
        match self.default_ttl {
            1 => Err(NodeError::Config("default_ttl 1 is not allowed".into())),
            ttl if ttl > MAX_TTL => Err(NodeError::Config(format!(
                "default_ttl {ttl} exceeds {MAX_TTL}"
            ))),
            ttl => Ok(ttl),
        }
    }

    pub fn provisioner_ranges(&self) -> Result<Vec<AddressRange>, NodeError> {
        if self.provisioner_ranges.is_empty() {
            return Err(NodeError::Config("no provisioner ranges configured".into()));
        }
        let ranges: Vec<AddressRange> = self
            .provisioner_ranges
            .iter()
            .map(|entry| AddressRange::new(Address(entry.low), Address(entry.high)))
            .collect();
        for range in &ranges {
            if !range.is_valid() || !range.low.is_unicast() || !range.high.is_unicast() {
                return Err(NodeError::Config(format!("invalid unicast range {range}")));
            }
        }
        Ok(ranges)
    }
}

/// Decode a 16-byte key given as hex.
pub fn parse_key(s: &str, field: &str) -> Result<[u8; NETWORK_KEY_SIZE], NodeError> {
    let bytes = hex::decode(s.trim())
        .map_err(|e| NodeError::Config(format!("{field}: invalid hex: {e}")))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        NodeError::Config(format!(
            "{field}: expected {NETWORK_KEY_SIZE} bytes, got {}",
            bytes.len()
        ))
    })
}

// ---------------------------------------------------------------------------
// [sar]
// ---------------------------------------------------------------------------

/// Segmentation and reassembly timing. Values below the protocol floors
/// are raised when converted with [`SarSection::parameters`].
#[derive(Debug, Deserialize)]
pub struct SarSection {
    #[serde(default = "default_incomplete_timeout_ms")]
    pub incomplete_timeout_ms: u64,
    #[serde(default = "default_ack_timer_base_ms")]
    pub ack_timer_base_ms: u64,
    #[serde(default = "default_per_hop_ms")]
    pub ack_per_hop_ms: u64,
    #[serde(default = "default_retransmit_base_ms")]
    pub retransmit_base_ms: u64,
    #[serde(default = "default_per_hop_ms")]
    pub retransmit_per_hop_ms: u64,
    #[serde(default = "default_retransmission_limit")]
    pub retransmission_limit: u8,
    #[serde(default = "default_completed_ack_interval_ms")]
    pub completed_ack_interval_ms: u64,
}

fn default_incomplete_timeout_ms() -> u64 {
    10_000
}

fn default_ack_timer_base_ms() -> u64 {
    150
}

fn default_per_hop_ms() -> u64 {
    50
}

fn default_retransmit_base_ms() -> u64 {
    200
}

fn default_retransmission_limit() -> u8 {
    5
}

fn default_completed_ack_interval_ms() -> u64 {
    150
}

impl Default for SarSection {
    fn default() -> Self {
        Self {
            incomplete_timeout_ms: default_incomplete_timeout_ms(),
            ack_timer_base_ms: default_ack_timer_base_ms(),
            ack_per_hop_ms: default_per_hop_ms(),
            retransmit_base_ms: default_retransmit_base_ms(),
            retransmit_per_hop_ms: default_per_hop_ms(),
            retransmission_limit: default_retransmission_limit(),
            completed_ack_interval_ms: default_completed_ack_interval_ms(),
        }
    }
}

impl SarSection {
    pub fn parameters(&self, default_ttl: u8) -> SarParameters {
        SarParameters {
            incomplete_timeout: Duration::from_millis(self.incomplete_timeout_ms),
            ack_timer_base: Duration::from_millis(self.ack_timer_base_ms),
            ack_per_hop: Duration::from_millis(self.ack_per_hop_ms),
            retransmit_base: Duration::from_millis(self.retransmit_base_ms),
            retransmit_per_hop: Duration::from_millis(self.retransmit_per_hop_ms),
            retransmission_limit: self.retransmission_limit,
            completed_ack_interval: Duration::from_millis(self.completed_ack_interval_ms),
            default_ttl,
        }
        .clamped()
    }
}

// ---------------------------------------------------------------------------
// [provisioning]
// ---------------------------------------------------------------------------

/// Which algorithm to pick from those a device supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlgorithmPreference {
    #[default]
    Strongest,
    Cmac,
    Hmac,
}

impl AlgorithmPreference {
    pub fn select(self, supported: &Algorithms) -> Option<Algorithm> {
        let algorithm = match self {
            AlgorithmPreference::Strongest => supported.strongest(),
            AlgorithmPreference::Cmac => Algorithm::EcdhP256CmacAes128,
            AlgorithmPreference::Hmac => Algorithm::EcdhP256HmacSha256,
        };
        supported.supports(algorithm).then_some(algorithm)
    }
}

#[derive(Debug, Deserialize)]
pub struct ProvisioningSection {
    /// Seconds the device should attract attention after Invite.
    #[serde(default = "default_attention_timer")]
    pub attention_timer: u8,
    #[serde(default)]
    pub algorithm: AlgorithmPreference,
    /// Give up on a provisioning session after this many seconds.
    #[serde(default = "default_provisioning_timeout")]
    pub timeout_secs: u64,
    /// Static OOB key (hex) shared with the demo device. Unset means No OOB.
    pub static_oob_key: Option<String>,
}

fn default_attention_timer() -> u8 {
    5
}

fn default_provisioning_timeout() -> u64 {
    60
}

impl Default for ProvisioningSection {
    fn default() -> Self {
        Self {
            attention_timer: default_attention_timer(),
            algorithm: AlgorithmPreference::default(),
            timeout_secs: default_provisioning_timeout(),
            static_oob_key: None,
        }
    }
}

impl ProvisioningSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn static_oob_key(&self) -> Result<Option<[u8; 16]>, NodeError> {
        self.static_oob_key
            .as_deref()
            .map(|key| parse_key(key, "static_oob_key"))
            .transpose()
    }
}

// ---------------------------------------------------------------------------
// [logging]
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let config = NodeConfig::parse("").unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.network.default_ttl, 5);
        assert_eq!(config.network.unicast_address, 0x0001);
        assert_eq!(config.provisioning.algorithm, AlgorithmPreference::Strongest);
        assert!(config.provisioning.static_oob_key.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[network]
network_key = "00112233445566778899aabbccddeeff"
key_index = 3
iv_index = 0x12345678
default_ttl = 7
unicast_address = 0x0010

[[network.provisioner_ranges]]
low = 0x0200
high = 0x02FF

[[network.provisioner_ranges]]
low = 0x0400
high = 0x04FF

[sar]
incomplete_timeout_ms = 20000
ack_timer_base_ms = 300
retransmission_limit = 8

[provisioning]
attention_timer = 10
algorithm = "hmac"
timeout_secs = 30
static_oob_key = "0102030405060708090a0b0c0d0e0f10"

[logging]
level = "debug"
"#;
        let config = NodeConfig::parse(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.network.network_key().unwrap()[0], 0x00);
        assert_eq!(config.network.network_key().unwrap()[15], 0xFF);
        assert_eq!(config.network.local_address().unwrap(), Address(0x0010));
        assert_eq!(config.network.provisioner_ranges().unwrap().len(), 2);
        assert_eq!(config.provisioning.algorithm, AlgorithmPreference::Hmac);
        assert_eq!(config.provisioning.timeout(), Duration::from_secs(30));
        assert_eq!(config.provisioning.static_oob_key().unwrap().unwrap()[0], 0x01);
        assert_eq!(config.logging.level, "debug");

        let params = config.sar.parameters(7);
        assert_eq!(params.incomplete_timeout, Duration::from_secs(20));
        assert_eq!(params.ack_timer_base, Duration::from_millis(300));
        assert_eq!(params.retransmission_limit, 8);
        assert_eq!(params.default_ttl, 7);

        let network = config.mesh_network().unwrap();
        assert_eq!(network.iv_index.index, 0x12345678);
        assert_eq!(network.primary_network_key().unwrap().index, 3);
        assert_eq!(network.next_available_unicast_address(1), Some(Address(0x0200)));
    }

    #[test]
    fn sar_values_are_clamped_to_floors() {
        let toml = r#"
[sar]
incomplete_timeout_ms = 1000
ack_timer_base_ms = 10
retransmit_base_ms = 50
retransmission_limit = 0
"#;
        let params = NodeConfig::parse(toml).unwrap().sar.parameters(5);
        assert_eq!(params.incomplete_timeout, Duration::from_secs(10));
        assert_eq!(params.ack_timer_base, Duration::from_millis(150));
        assert_eq!(params.retransmit_base, Duration::from_millis(200));
        assert_eq!(params.retransmission_limit, 2);
    }

    #[test]
    fn algorithm_preference_selects_supported() {
        let cmac_only = Algorithms(Algorithm::EcdhP256CmacAes128.capability_bit());
        let both = Algorithms(
            Algorithm::EcdhP256CmacAes128.capability_bit()
                | Algorithm::EcdhP256HmacSha256.capability_bit(),
        );
        assert_eq!(
            AlgorithmPreference::Strongest.select(&both),
            Some(Algorithm::EcdhP256HmacSha256)
        );
        assert_eq!(
            AlgorithmPreference::Strongest.select(&cmac_only),
            Some(Algorithm::EcdhP256CmacAes128)
        );
        assert_eq!(AlgorithmPreference::Hmac.select(&cmac_only), None);
        assert_eq!(AlgorithmPreference::Strongest.select(&Algorithms(0)), None);
    }

    // ================================================================== //
    // Failure paths
    // ================================================================== //

    #[test]
    fn test_parse_malformed_toml() {
        assert!(NodeConfig::parse("[network").is_err());
        assert!(NodeConfig::parse("[network]\niv_index = ").is_err());
        assert!(NodeConfig::parse("= value").is_err());
    }

    #[test]
    fn test_parse_wrong_field_types() {
        assert!(NodeConfig::parse("[network]\niv_index = \"zero\"").is_err());
        assert!(NodeConfig::parse("[provisioning]\nalgorithm = \"sha1\"").is_err());
    }

    #[test]
    fn test_invalid_network_key() {
        let config = NodeConfig::parse("[network]\nnetwork_key = \"xyz\"").unwrap();
        assert!(config.validate().is_err());

        let config = NodeConfig::parse("[network]\nnetwork_key = \"0011\"").unwrap();
        let err = config.network.network_key().unwrap_err();
        assert!(err.to_string().contains("expected 16 bytes, got 2"));
    }

    #[test]
    fn test_invalid_addresses() {
        let config = NodeConfig::parse("[network]\nunicast_address = 0xC000").unwrap();
        assert!(config.network.local_address().is_err());

        let config = NodeConfig::parse("[network]\nprovisioner_ranges = []").unwrap();
        assert!(config.network.provisioner_ranges().is_err());

        let toml = "[[network.provisioner_ranges]]\nlow = 0x0300\nhigh = 0x0200\n";
        assert!(NodeConfig::parse(toml).unwrap().validate().is_err());

        let toml = "[[network.provisioner_ranges]]\nlow = 0x7000\nhigh = 0x8000\n";
        assert!(NodeConfig::parse(toml).unwrap().validate().is_err());
    }

    #[test]
    fn test_invalid_default_ttl() {
        assert!(NodeConfig::parse("[network]\ndefault_ttl = 1").unwrap().validate().is_err());
        assert!(NodeConfig::parse("[network]\ndefault_ttl = 128").unwrap().validate().is_err());
        assert!(NodeConfig::parse("[network]\ndefault_ttl = 0").unwrap().validate().is_ok());
    }

    #[test]
    fn test_parse_duplicate_section_handling() {
        let toml = "[logging]\nlevel = \"info\"\n\n[logging]\nlevel = \"debug\"\n";
        assert!(NodeConfig::parse(toml).is_err());
    }
}
