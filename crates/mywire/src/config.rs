//! Connection configuration.
//!
//! Everything the wire layer needs to know about the session it is framing:
//! credentials, charset, packet limits, and the optional capabilities that
//! shape the handshake. Opening the socket is the caller's job; nothing
//! here touches the network.

use crate::protocol::{capabilities, charset};

/// Wire-level connection configuration.
#[derive(Debug, Clone)]
pub struct WireConfig {
    /// Username for authentication
    pub user: String,
    /// Password for authentication (used by the caller's auth plugin, not here)
    pub password: Option<String>,
    /// Database name to select at connect time (optional)
    pub database: Option<String>,
    /// Character set (default: utf8mb4)
    pub charset: u8,
    /// Max packet size announced to the server (default: 64MB)
    pub max_packet_size: u32,
    /// Enable compression (CLIENT_COMPRESS capability)
    pub compression: bool,
    /// Request TLS during the handshake (CLIENT_SSL capability)
    pub use_tls: bool,
    /// Local infile handling (disabled by default for security)
    pub local_infile: bool,
    /// Additional connection attributes
    pub attributes: Vec<(String, String)>,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            user: String::new(),
            password: None,
            database: None,
            charset: charset::DEFAULT_CHARSET,
            max_packet_size: 64 * 1024 * 1024, // 64MB
            compression: false,
            use_tls: false,
            local_infile: false,
            attributes: Vec::new(),
        }
    }
}

impl WireConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the username.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the character set.
    pub fn charset(mut self, charset: u8) -> Self {
        self.charset = charset;
        self
    }

    /// Set the max packet size announced to the server.
    pub fn max_packet_size(mut self, size: u32) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Enable or disable compression.
    pub fn compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// Request TLS during the handshake.
    pub fn use_tls(mut self, enabled: bool) -> Self {
        self.use_tls = enabled;
        self
    }

    /// Enable or disable local infile handling.
    ///
    /// # Security Warning
    /// Enabling local infile can be a security risk. Only enable if you
    /// trust the server and understand the implications.
    pub fn local_infile(mut self, enabled: bool) -> Self {
        self.local_infile = enabled;
        self
    }

    /// Set a connection attribute.
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Build client capability flags based on configuration.
    pub fn capability_flags(&self) -> u32 {
        use capabilities::{
            CLIENT_COMPRESS, CLIENT_CONNECT_ATTRS, CLIENT_CONNECT_WITH_DB, CLIENT_LOCAL_FILES,
            CLIENT_SSL, DEFAULT_CLIENT_FLAGS,
        };

        let mut flags = DEFAULT_CLIENT_FLAGS;

        if self.database.is_some() {
            flags |= CLIENT_CONNECT_WITH_DB;
        }

        if self.use_tls {
            flags |= CLIENT_SSL;
        }

        if self.compression {
            flags |= CLIENT_COMPRESS;
        }

        if self.local_infile {
            flags |= CLIENT_LOCAL_FILES;
        }

        if !self.attributes.is_empty() {
            flags |= CLIENT_CONNECT_ATTRS;
        }

        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = WireConfig::new()
            .user("myuser")
            .password("secret")
            .database("testdb")
            .charset(45)
            .compression(true)
            .attribute("program_name", "myapp");

        assert_eq!(config.user, "myuser");
        assert_eq!(config.password, Some("secret".to_string()));
        assert_eq!(config.database, Some("testdb".to_string()));
        assert_eq!(config.charset, 45);
        assert!(config.compression);
        assert_eq!(
            config.attributes,
            vec![("program_name".to_string(), "myapp".to_string())]
        );
    }

    #[test]
    fn capability_flags() {
        use crate::protocol::capabilities::*;

        let config = WireConfig::new().database("test").compression(true);
        let flags = config.capability_flags();

        assert!(flags & CLIENT_CONNECT_WITH_DB != 0);
        assert!(flags & CLIENT_COMPRESS != 0);
        assert!(flags & CLIENT_PROTOCOL_41 != 0);
        assert!(flags & CLIENT_SECURE_CONNECTION != 0);
        assert!(flags & CLIENT_SSL == 0);

        let config = WireConfig::new().use_tls(true).local_infile(true);
        let flags = config.capability_flags();
        assert!(flags & CLIENT_SSL != 0);
        assert!(flags & CLIENT_LOCAL_FILES != 0);
        assert!(flags & CLIENT_CONNECT_WITH_DB == 0);
    }

    #[test]
    fn default_config() {
        let config = WireConfig::default();
        assert_eq!(config.charset, crate::protocol::charset::DEFAULT_CHARSET);
        assert_eq!(config.max_packet_size, 64 * 1024 * 1024);
        assert!(!config.compression);
        assert!(!config.local_infile);
        assert!(!config.use_tls);
    }
}
