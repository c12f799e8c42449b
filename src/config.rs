//! Client configuration.
//!
//! A [`Config`] is an immutable snapshot built once through
//! [`ConfigBuilder`] and shared by every component. It can also be read from
//! `KEY=VALUE` text:
//!
//! ```
//! use knx_link::Config;
//!
//! let config: Config = r#"
//! # gateway on the local network
//! KNX_GATEWAY_IP=192.168.1.10
//! KNX_CONNECT_TIMEOUT_MS=2000
//! KNX_NAT=true
//! "#
//! .parse()
//! .unwrap();
//!
//! assert_eq!(config.gateway().unwrap().to_string(), "192.168.1.10:3671");
//! assert!(config.nat());
//! ```

use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{KnxError, Result};
use crate::event_pool::RequestCategory;
use crate::protocol::constants::KNXNETIP_DEFAULT_PORT;

/// Response timeout per request category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    discovery: Duration,
    description: Duration,
    connect: Duration,
    connection_state: Duration,
    disconnect: Duration,
    tunneling: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            discovery: Duration::from_secs(10),
            description: Duration::from_secs(10),
            connect: Duration::from_secs(10),
            connection_state: Duration::from_secs(10),
            disconnect: Duration::from_secs(5),
            tunneling: Duration::from_secs(1),
        }
    }
}

impl Timeouts {
    /// Timeout for `category`
    pub const fn get(&self, category: RequestCategory) -> Duration {
        match category {
            RequestCategory::Discovery => self.discovery,
            RequestCategory::Description => self.description,
            RequestCategory::Connect => self.connect,
            RequestCategory::ConnectionState => self.connection_state,
            RequestCategory::Disconnect => self.disconnect,
            RequestCategory::Tunneling => self.tunneling,
        }
    }

    fn set(&mut self, category: RequestCategory, timeout: Duration) {
        let slot = match category {
            RequestCategory::Discovery => &mut self.discovery,
            RequestCategory::Description => &mut self.description,
            RequestCategory::Connect => &mut self.connect,
            RequestCategory::ConnectionState => &mut self.connection_state,
            RequestCategory::Disconnect => &mut self.disconnect,
            RequestCategory::Tunneling => &mut self.tunneling,
        };
        *slot = timeout;
    }
}

/// Local UDP ports; 0 picks an ephemeral port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalPorts {
    /// Control channel (search, description, connect, heartbeat, disconnect)
    pub control: u16,
    /// Data channel (tunneling)
    pub data: u16,
    /// Multicast channel (search responses, routing indications)
    pub multicast: u16,
}

impl Default for LocalPorts {
    fn default() -> Self {
        Self {
            control: 0,
            data: 0,
            multicast: KNXNETIP_DEFAULT_PORT,
        }
    }
}

/// Immutable client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    gateway: Option<SocketAddrV4>,
    local_ip: Option<Ipv4Addr>,
    local_ports: LocalPorts,
    nat: bool,
    routing: bool,
    timeouts: Timeouts,
    heartbeat_interval: Duration,
    alive_timeout: Duration,
    check_interval: Duration,
    attempts: u32,
    pool_size: usize,
    plugin_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: None,
            local_ip: None,
            local_ports: LocalPorts::default(),
            nat: false,
            routing: false,
            timeouts: Timeouts::default(),
            heartbeat_interval: Duration::from_secs(60),
            alive_timeout: Duration::from_secs(120),
            check_interval: Duration::from_millis(10),
            attempts: 3,
            pool_size: 10,
            plugin_queue_capacity: 1024,
        }
    }
}

impl Config {
    /// Start from the defaults
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Gateway control endpoint; `None` means discover via multicast search
    pub fn gateway(&self) -> Option<SocketAddrV4> {
        self.gateway
    }

    /// Address advertised in HPAIs when not in NAT mode
    pub fn local_ip(&self) -> Option<Ipv4Addr> {
        self.local_ip
    }

    /// Local UDP ports
    pub fn local_ports(&self) -> LocalPorts {
        self.local_ports
    }

    /// Advertise `0.0.0.0:0` so the gateway answers to the datagram source
    pub fn nat(&self) -> bool {
        self.nat
    }

    /// Listen for routing indications on the multicast group
    ///
    /// The multicast channel is always opened when discovery is needed.
    pub fn routing(&self) -> bool {
        self.routing
    }

    /// Response timeout for `category`
    pub fn timeout(&self, category: RequestCategory) -> Duration {
        self.timeouts.get(category)
    }

    /// Interval between connection state requests
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Silence after which the connection is considered dead
    pub fn alive_timeout(&self) -> Duration {
        self.alive_timeout
    }

    /// Slice length of event pool waits
    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Sends per request before giving up
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Plugin executor worker count
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Pending plugin notifications before new ones are dropped
    pub fn plugin_queue_capacity(&self) -> usize {
        self.plugin_queue_capacity
    }
}

impl FromStr for Config {
    type Err = KnxError;

    fn from_str(text: &str) -> Result<Self> {
        ConfigBuilder::default().apply_text(text)?.build()
    }
}

/// Builder validating every value on [`ConfigBuilder::build`]
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
    gateway_port: Option<u16>,
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| KnxError::unparsable_config(key, value))
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    parse::<u64>(key, value).map(Duration::from_millis)
}

impl ConfigBuilder {
    /// Gateway control endpoint (skips discovery)
    pub fn gateway(mut self, endpoint: SocketAddrV4) -> Self {
        self.config.gateway = Some(endpoint);
        self.gateway_port = Some(endpoint.port());
        self
    }

    /// Gateway IP on the default KNXnet/IP port
    pub fn gateway_ip(mut self, ip: Ipv4Addr) -> Self {
        let port = self.gateway_port.unwrap_or(KNXNETIP_DEFAULT_PORT);
        self.config.gateway = Some(SocketAddrV4::new(ip, port));
        self
    }

    /// Address advertised in HPAIs
    pub fn local_ip(mut self, ip: Ipv4Addr) -> Self {
        self.config.local_ip = Some(ip);
        self
    }

    /// Local control and data ports
    pub fn local_ports(mut self, control: u16, data: u16) -> Self {
        self.config.local_ports.control = control;
        self.config.local_ports.data = data;
        self
    }

    /// Local multicast port
    pub fn multicast_port(mut self, port: u16) -> Self {
        self.config.local_ports.multicast = port;
        self
    }

    /// NAT mode
    pub fn nat(mut self, nat: bool) -> Self {
        self.config.nat = nat;
        self
    }

    /// Listen for routing indications
    pub fn routing(mut self, routing: bool) -> Self {
        self.config.routing = routing;
        self
    }

    /// Response timeout for `category`
    pub fn timeout(mut self, category: RequestCategory, timeout: Duration) -> Self {
        self.config.timeouts.set(category, timeout);
        self
    }

    /// Heartbeat interval
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Alive timeout
    pub fn alive_timeout(mut self, timeout: Duration) -> Self {
        self.config.alive_timeout = timeout;
        self
    }

    /// Event pool check interval
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.config.check_interval = interval;
        self
    }

    /// Sends per request
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.config.attempts = attempts;
        self
    }

    /// Plugin executor worker count
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.config.pool_size = pool_size;
        self
    }

    /// Plugin notification queue capacity
    pub fn plugin_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.plugin_queue_capacity = capacity;
        self
    }

    /// Apply every `KEY=VALUE` line of `text`
    ///
    /// Blank lines and lines starting with `#` are skipped.
    pub fn apply_text(self, text: &str) -> Result<Self> {
        let mut builder = self;
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| KnxError::unparsable_config(line, ""))?;
            builder = builder.set(key.trim(), value.trim())?;
        }
        Ok(builder)
    }

    /// Apply one `KEY=VALUE` pair
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown keys or unparsable values.
    pub fn set(self, key: &str, value: &str) -> Result<Self> {
        Ok(match key {
            "KNX_GATEWAY_IP" => self.gateway_ip(parse(key, value)?),
            "KNX_GATEWAY_PORT" => {
                let port: u16 = parse(key, value)?;
                let mut builder = self;
                builder.gateway_port = Some(port);
                if let Some(gateway) = builder.config.gateway.as_mut() {
                    gateway.set_port(port);
                }
                builder
            }
            "KNX_LOCAL_IP" => self.local_ip(parse(key, value)?),
            "KNX_CONTROL_PORT" => {
                let data = self.config.local_ports.data;
                self.local_ports(parse(key, value)?, data)
            }
            "KNX_DATA_PORT" => {
                let control = self.config.local_ports.control;
                self.local_ports(control, parse(key, value)?)
            }
            "KNX_MULTICAST_PORT" => self.multicast_port(parse(key, value)?),
            "KNX_NAT" => self.nat(parse(key, value)?),
            "KNX_ROUTING" => self.routing(parse(key, value)?),
            "KNX_SEARCH_TIMEOUT_MS" => {
                self.timeout(RequestCategory::Discovery, parse_millis(key, value)?)
            }
            "KNX_DESCRIPTION_TIMEOUT_MS" => {
                self.timeout(RequestCategory::Description, parse_millis(key, value)?)
            }
            "KNX_CONNECT_TIMEOUT_MS" => {
                self.timeout(RequestCategory::Connect, parse_millis(key, value)?)
            }
            "KNX_CONNECTIONSTATE_TIMEOUT_MS" => {
                self.timeout(RequestCategory::ConnectionState, parse_millis(key, value)?)
            }
            "KNX_DISCONNECT_TIMEOUT_MS" => {
                self.timeout(RequestCategory::Disconnect, parse_millis(key, value)?)
            }
            "KNX_TUNNELING_TIMEOUT_MS" => {
                self.timeout(RequestCategory::Tunneling, parse_millis(key, value)?)
            }
            "KNX_HEARTBEAT_INTERVAL_MS" => self.heartbeat_interval(parse_millis(key, value)?),
            "KNX_ALIVE_TIMEOUT_MS" => self.alive_timeout(parse_millis(key, value)?),
            "KNX_CHECK_INTERVAL_MS" => self.check_interval(parse_millis(key, value)?),
            "KNX_ATTEMPTS" => self.attempts(parse(key, value)?),
            "KNX_POOL_SIZE" => self.pool_size(parse(key, value)?),
            "KNX_PLUGIN_QUEUE_CAPACITY" => self.plugin_queue_capacity(parse(key, value)?),
            _ => return Err(KnxError::unknown_config_key(key)),
        })
    }

    /// Validate and freeze the configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a timeout is zero, attempts or pool
    /// size is zero, the alive timeout does not exceed the heartbeat interval,
    /// or the check interval is not shorter than every request timeout.
    pub fn build(self) -> Result<Config> {
        let config = self.config;

        if config.attempts == 0 {
            return Err(KnxError::invalid_config("attempts", "must be at least 1"));
        }
        if config.pool_size == 0 {
            return Err(KnxError::invalid_config("pool_size", "must be at least 1"));
        }
        if config.plugin_queue_capacity == 0 {
            return Err(KnxError::invalid_config(
                "plugin_queue_capacity",
                "must be at least 1",
            ));
        }
        if config.check_interval.is_zero() {
            return Err(KnxError::invalid_config("check_interval", "must be non-zero"));
        }
        if config.heartbeat_interval.is_zero() {
            return Err(KnxError::invalid_config(
                "heartbeat_interval",
                "must be non-zero",
            ));
        }
        if config.alive_timeout <= config.heartbeat_interval {
            return Err(KnxError::invalid_config(
                "alive_timeout",
                "must exceed the heartbeat interval",
            ));
        }
        for category in RequestCategory::ALL {
            let timeout = config.timeouts.get(category);
            if timeout.is_zero() {
                return Err(KnxError::invalid_config("timeout", "must be non-zero"));
            }
            if config.check_interval >= timeout {
                return Err(KnxError::invalid_config(
                    "check_interval",
                    "must be shorter than every request timeout",
                ));
            }
        }

        Ok(config)
    }
}
