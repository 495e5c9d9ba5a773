//! Server configuration (spec §6 "Config file", C9).
//!
//! Grounded on the teacher's (`randomPoison-mahjong`) preference for plain,
//! serde-free hand parsing of small structured documents, adapted to XML
//! via `quick-xml` since that is what the original `Config.cpp` reads and
//! what this crate already depends on for Legacy wire payloads.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use std::sync::RwLock;

/// Mutable, shared server configuration. The admin CLI (`c <key> <value>`)
/// mutates this behind the same kind of lock used for the socket registry,
/// so changes are visible to in-flight accepts without a restart.
#[derive(Debug)]
pub struct Config {
    inner: RwLock<ConfigValues>,
}

#[derive(Debug, Clone)]
pub struct ConfigValues {
    pub port: u16,
    pub logs_directory: String,
    pub num_connections_per_ip: u32,
    pub skip_level_matching: bool,
    pub allow_single_player: bool,
    pub disable_xp_ad_banner: bool,
    pub banned_ips: HashSet<IpAddr>,
    pub enable_http: bool,
}

impl Default for ConfigValues {
    fn default() -> Self {
        ConfigValues {
            port: 28805,
            logs_directory: "InternetGamesServer_logs".to_string(),
            num_connections_per_ip: 0,
            skip_level_matching: false,
            allow_single_player: true,
            disable_xp_ad_banner: false,
            banned_ips: HashSet::new(),
            enable_http: false,
        }
    }
}

impl Config {
    pub fn new(values: ConfigValues) -> Self {
        Config { inner: RwLock::new(values) }
    }

    pub fn snapshot(&self) -> ConfigValues {
        self.inner.read().expect("config lock poisoned").clone()
    }

    pub fn port(&self) -> u16 {
        self.inner.read().expect("config lock poisoned").port
    }

    pub fn is_banned(&self, ip: &IpAddr) -> bool {
        self.inner.read().expect("config lock poisoned").banned_ips.contains(ip)
    }

    pub fn ban(&self, ip: IpAddr) {
        self.inner.write().expect("config lock poisoned").banned_ips.insert(ip);
    }

    pub fn unban(&self, ip: &IpAddr) -> bool {
        self.inner.write().expect("config lock poisoned").banned_ips.remove(ip)
    }

    /// Option keys accepted by the `c` admin command, per
    /// `original_source/Config.cpp`'s `s_optionKeys`.
    pub const OPTION_KEYS: &'static [&'static str] =
        &["port", "logdir", "numconnsip", "skiplevel", "singleplayer", "disablead", "enablehttp"];

    pub fn get_option(&self, key: &str) -> Option<String> {
        let v = self.inner.read().expect("config lock poisoned");
        Some(match key {
            "port" => v.port.to_string(),
            "logdir" => v.logs_directory.clone(),
            "numconnsip" => v.num_connections_per_ip.to_string(),
            "skiplevel" => v.skip_level_matching.to_string(),
            "singleplayer" => v.allow_single_player.to_string(),
            "disablead" => v.disable_xp_ad_banner.to_string(),
            "enablehttp" => v.enable_http.to_string(),
            _ => return None,
        })
    }

    pub fn set_option(&self, key: &str, value: &str) -> Result<(), String> {
        fn parse_bool(value: &str) -> Result<bool, String> {
            match value {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(format!("expected true/false/1/0, got {:?}", value)),
            }
        }

        let mut v = self.inner.write().expect("config lock poisoned");
        match key {
            "port" => v.port = value.parse().map_err(|_| format!("invalid port: {:?}", value))?,
            "logdir" => v.logs_directory = value.to_string(),
            "numconnsip" => v.num_connections_per_ip = value.parse().map_err(|_| format!("invalid numconnsip: {:?}", value))?,
            "skiplevel" => v.skip_level_matching = parse_bool(value)?,
            "singleplayer" => v.allow_single_player = parse_bool(value)?,
            "disablead" => v.disable_xp_ad_banner = parse_bool(value)?,
            "enablehttp" => v.enable_http = parse_bool(value)?,
            _ => return Err(format!("unknown option key {:?}", key)),
        }
        Ok(())
    }
}

/// Loads `<Config>` XML from `path`. Missing file or malformed XML: warn
/// and fall back to defaults (spec §6).
pub fn load_config_file(path: &Path) -> ConfigValues {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(?path, %err, "could not read config file, using defaults");
            return ConfigValues::default();
        }
    };

    match parse_config_xml(&text) {
        Ok(values) => values,
        Err(err) => {
            tracing::warn!(?path, %err, "malformed config XML, using defaults");
            ConfigValues::default()
        }
    }
}

fn parse_config_xml(text: &str) -> Result<ConfigValues, quick_xml::Error> {
    let mut values = ConfigValues::default();
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut current_tag = String::new();
    let mut in_banned_ips = false;

    loop {
        match reader.read_event(&mut buf)? {
            Event::Start(ref e) => {
                current_tag = String::from_utf8_lossy(e.name()).to_string();
                if current_tag == "BannedIPs" {
                    in_banned_ips = true;
                }
            }
            Event::End(ref e) => {
                let name = String::from_utf8_lossy(e.name()).to_string();
                if name == "BannedIPs" {
                    in_banned_ips = false;
                }
                current_tag.clear();
            }
            Event::Text(ref e) => {
                let text = e.unescape_and_decode(&reader).unwrap_or_default();
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                match current_tag.as_str() {
                    "Port" => {
                        if let Ok(p) = text.parse() {
                            values.port = p;
                        }
                    }
                    "LogsDirectory" => values.logs_directory = text.to_string(),
                    "NumConnectionsPerIP" => {
                        if let Ok(n) = text.parse() {
                            values.num_connections_per_ip = n;
                        }
                    }
                    "SkipLevelMatching" => values.skip_level_matching = text == "true" || text == "1",
                    "AllowSinglePlayer" => values.allow_single_player = text == "true" || text == "1",
                    "DisableXPAdBanner" => values.disable_xp_ad_banner = text == "true" || text == "1",
                    "EnableHttp" => values.enable_http = text == "true" || text == "1",
                    "IP" if in_banned_ips => {
                        if let Ok(ip) = text.parse::<IpAddr>() {
                            values.banned_ips.insert(ip);
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_config() {
        let xml = r#"
            <Config>
                <Port>29000</Port>
                <LogsDirectory>logs</LogsDirectory>
                <NumConnectionsPerIP>3</NumConnectionsPerIP>
                <SkipLevelMatching>true</SkipLevelMatching>
                <AllowSinglePlayer>false</AllowSinglePlayer>
                <DisableXPAdBanner>false</DisableXPAdBanner>
                <EnableHttp>true</EnableHttp>
                <BannedIPs>
                    <IP>1.2.3.4</IP>
                </BannedIPs>
            </Config>
        "#;
        let values = parse_config_xml(xml).unwrap();
        assert_eq!(values.port, 29000);
        assert_eq!(values.num_connections_per_ip, 3);
        assert!(values.skip_level_matching);
        assert!(!values.allow_single_player);
        assert!(values.enable_http);
        assert!(values.banned_ips.contains(&"1.2.3.4".parse::<IpAddr>().unwrap()));
    }

    #[test]
    fn option_keys_round_trip() {
        let config = Config::new(ConfigValues::default());
        config.set_option("port", "9999").unwrap();
        assert_eq!(config.get_option("port").unwrap(), "9999");
        assert!(config.set_option("bogus", "1").is_err());
    }

    #[test]
    fn enablehttp_option_toggles_config() {
        let config = Config::new(ConfigValues::default());
        assert_eq!(config.get_option("enablehttp").unwrap(), "false");
        config.set_option("enablehttp", "true").unwrap();
        assert_eq!(config.get_option("enablehttp").unwrap(), "true");
    }
}
