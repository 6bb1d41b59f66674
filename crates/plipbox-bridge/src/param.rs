//! Runtime parameters of the bridge.
//!
//! Values come from `PLIPBOX_*` environment variables; anything unset keeps its default.

use std::net::Ipv4Addr;

use plipbox_proto::MacAddr;
use thiserror::Error;

use crate::dump::DumpDirs;
use crate::filter::UdpTestFilter;

pub const DEFAULT_MAC: MacAddr = MacAddr([0x1a, 0x11, 0xaf, 0xa0, 0x47, 0x11]);
pub const DEFAULT_TEST_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 2, 20);
pub const DEFAULT_TEST_PORT: u16 = 6800;

pub const ENV_MAC: &str = "PLIPBOX_MAC";
pub const ENV_TEST_MODE: &str = "PLIPBOX_TEST_MODE";
pub const ENV_DUMP: &str = "PLIPBOX_DUMP";
pub const ENV_DUMP_PLIP: &str = "PLIPBOX_DUMP_PLIP";
pub const ENV_TEST_IP: &str = "PLIPBOX_TEST_IP";
pub const ENV_TEST_PORT: &str = "PLIPBOX_TEST_PORT";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeParams {
    pub mac: MacAddr,
    /// 0 loops frames through the Amiga driver's internal loopback (magic EtherType); any other
    /// value expects the frames to come back as plain IPv4.
    pub test_mode: u8,
    pub dump_dirs: DumpDirs,
    /// Also log PLIP line state after each dumped PLIP transfer.
    pub dump_plip: bool,
    pub test_ip: Ipv4Addr,
    pub test_port: u16,
}

impl Default for BridgeParams {
    fn default() -> Self {
        Self {
            mac: DEFAULT_MAC,
            test_mode: 0,
            dump_dirs: DumpDirs::empty(),
            dump_plip: false,
            test_ip: DEFAULT_TEST_IP,
            test_port: DEFAULT_TEST_PORT,
        }
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ParamError> {
    value.trim().parse().map_err(|_| ParamError::Invalid {
        key,
        value: value.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ParamError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ParamError::Invalid {
            key,
            value: value.to_string(),
        }),
    }
}

impl BridgeParams {
    pub fn from_env() -> Result<Self, ParamError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build parameters from an arbitrary key lookup (environment, config store, tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ParamError> {
        let mut params = Self::default();
        if let Some(v) = lookup(ENV_MAC) {
            params.mac = parse(ENV_MAC, &v)?;
        }
        if let Some(v) = lookup(ENV_TEST_MODE) {
            params.test_mode = parse(ENV_TEST_MODE, &v)?;
        }
        if let Some(v) = lookup(ENV_DUMP) {
            params.dump_dirs = v.parse().map_err(|_| ParamError::Invalid {
                key: ENV_DUMP,
                value: v.clone(),
            })?;
        }
        if let Some(v) = lookup(ENV_DUMP_PLIP) {
            params.dump_plip = parse_bool(ENV_DUMP_PLIP, &v)?;
        }
        if let Some(v) = lookup(ENV_TEST_IP) {
            params.test_ip = parse(ENV_TEST_IP, &v)?;
        }
        if let Some(v) = lookup(ENV_TEST_PORT) {
            params.test_port = parse(ENV_TEST_PORT, &v)?;
        }
        Ok(params)
    }

    pub fn udp_test_filter(&self) -> UdpTestFilter {
        UdpTestFilter::new(self.test_ip, self.test_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let params = BridgeParams::from_lookup(|_| None).unwrap();
        assert_eq!(params, BridgeParams::default());
        assert_eq!(params.mac.to_string(), "1a:11:af:a0:47:11");
        assert_eq!(params.udp_test_filter().port, 6800);
    }

    #[test]
    fn overrides_are_applied() {
        let params = BridgeParams::from_lookup(lookup(&[
            (ENV_MAC, "02:00:00:00:00:07"),
            (ENV_TEST_MODE, "1"),
            (ENV_DUMP, "eth_rx,plip_tx"),
            (ENV_DUMP_PLIP, "yes"),
            (ENV_TEST_IP, "10.0.0.9"),
            (ENV_TEST_PORT, "7000"),
        ]))
        .unwrap();
        assert_eq!(params.mac, MacAddr([2, 0, 0, 0, 0, 7]));
        assert_eq!(params.test_mode, 1);
        assert_eq!(params.dump_dirs, DumpDirs::ETH_RX | DumpDirs::PLIP_TX);
        assert!(params.dump_plip);
        assert_eq!(params.test_ip, Ipv4Addr::new(10, 0, 0, 9));
        assert_eq!(params.test_port, 7000);
    }

    #[test]
    fn bad_values_name_the_key() {
        let err = BridgeParams::from_lookup(lookup(&[(ENV_TEST_PORT, "70000")])).unwrap_err();
        assert_eq!(
            err,
            ParamError::Invalid {
                key: ENV_TEST_PORT,
                value: "70000".to_string()
            }
        );
        assert!(BridgeParams::from_lookup(lookup(&[(ENV_MAC, "zz")])).is_err());
        assert!(BridgeParams::from_lookup(lookup(&[(ENV_DUMP_PLIP, "maybe")])).is_err());
    }
}
