use crate::error::ConfigError;

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroUsize,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: IpAddr,
    pub port: u16,
    pub threads: usize,
    pub queue_size: usize,
}

/// A [`Config`] whose values have all been checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub threads: NonZeroUsize,
    pub queue_size: NonZeroUsize,
}

impl Config {
    pub fn new(port: u16, threads: usize, queue_size: usize) -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
            threads,
            queue_size,
        }
    }

    pub fn validate(&self) -> Result<ServerConfig, ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        let threads = NonZeroUsize::new(self.threads).ok_or(ConfigError::ZeroThreads)?;
        let queue_size = NonZeroUsize::new(self.queue_size).ok_or(ConfigError::ZeroQueueSize)?;
        Ok(ServerConfig {
            addr: SocketAddr::new(self.bind, self.port),
            threads,
            queue_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_positive_values() {
        let config = Config::new(8080, 4, 16).validate().unwrap();
        assert_eq!(config.addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.threads.get(), 4);
        assert_eq!(config.queue_size.get(), 16);
    }

    #[test]
    fn rejects_zeroes() {
        assert_eq!(Config::new(0, 1, 1).validate(), Err(ConfigError::ZeroPort));
        assert_eq!(Config::new(80, 0, 1).validate(), Err(ConfigError::ZeroThreads));
        assert_eq!(Config::new(80, 1, 0).validate(), Err(ConfigError::ZeroQueueSize));
    }
}
