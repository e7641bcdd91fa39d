//! Runtime configuration.
//!
//! CLI parsing lives in the binary crate; the library validates the
//! resulting configuration once and fails fast on inconsistencies.

use std::path::PathBuf;
use std::str::FromStr;

use crate::constants::MIN_BLOCK_SIZE;
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Memory node: loads and serves an arena, then stays passive.
    Server,
    /// Compute node: maps the arenas and runs queries.
    Client,
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Role> {
        match s {
            "server" => Ok(Role::Server),
            "client" => Ok(Role::Client),
            other => Err(Error::Config(format!("unknown role '{other}'"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Intersection,
    Union,
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Operation> {
        match s {
            "intersection" => Ok(Operation::Intersection),
            "union" => Ok(Operation::Union),
            other => Err(Error::Config(format!("unknown operation '{other}'"))),
        }
    }
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Intersection => "intersection",
            Operation::Union => "union",
        }
    }
}

/// Index variant, selected once at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    /// Versioned blocks with tags and locks; supports inserts.
    BlockDynamic,
    /// Two-word footers, read-only.
    BlockStatic,
}

impl IndexKind {
    /// Prefix of the partition file names.
    pub fn file_prefix(&self) -> &'static str {
        match self {
            IndexKind::BlockDynamic => "dynamic_block",
            IndexKind::BlockStatic => "block",
        }
    }

    pub fn versioned(&self) -> bool {
        matches!(self, IndexKind::BlockDynamic)
    }
}

impl FromStr for IndexKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<IndexKind> {
        match s {
            "dynamic_block" => Ok(IndexKind::BlockDynamic),
            "block" => Ok(IndexKind::BlockStatic),
            other => Err(Error::Config(format!("unknown index kind '{other}'"))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub role: Role,
    /// Position of this node in its role's node list.
    pub node_id: u32,
    /// Bootstrap addresses of all memory nodes, in node-id order.
    pub servers: Vec<String>,
    /// This compute node distributes queries and prints statistics.
    pub initiator: bool,
    /// Bootstrap address of the initiator, for peer compute nodes.
    pub initiator_addr: String,
    pub num_clients: u32,
    pub num_compute_threads: u32,
    pub max_send_queue_wr: i32,
    pub max_recv_queue_wr: i32,
    pub block_size: u32,
    pub operation: Operation,
    pub index_kind: IndexKind,
    pub index_dir: PathBuf,
    pub query_file: PathBuf,
    pub port: u16,
    pub disable_thread_pinning: bool,
    pub device_port: u32,
    /// Directory for the shared arena files.
    pub shm_dir: PathBuf,
    /// Free blocks appended behind the initial index prefix.
    pub extra_blocks: u32,
    /// Re-scan all inserted ids after the run.
    pub verify: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            role: Role::Client,
            node_id: 0,
            servers: vec!["127.0.0.1:9871".into()],
            initiator: false,
            initiator_addr: "127.0.0.1:9971".into(),
            num_clients: 1,
            num_compute_threads: 1,
            max_send_queue_wr: 1024,
            max_recv_queue_wr: 1024,
            block_size: 1024,
            operation: Operation::Intersection,
            index_kind: IndexKind::BlockDynamic,
            index_dir: PathBuf::new(),
            query_file: PathBuf::new(),
            port: 9871,
            disable_thread_pinning: false,
            device_port: 1,
            shm_dir: std::env::temp_dir(),
            extra_blocks: 4096,
            verify: false,
        }
    }
}

impl Config {
    pub fn num_servers(&self) -> u32 {
        self.servers.len() as u32
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size < MIN_BLOCK_SIZE || !self.block_size.is_power_of_two() {
            return Err(Error::Config(format!(
                "block size must be a power of two >= {MIN_BLOCK_SIZE}, got {}",
                self.block_size
            )));
        }
        if self.servers.is_empty() {
            return Err(Error::Config("at least one memory node required".into()));
        }
        if self.max_send_queue_wr <= 0 {
            return Err(Error::Config("max_send_queue_wr must be positive".into()));
        }

        match self.role {
            Role::Server => {
                if self.node_id >= self.num_servers() {
                    return Err(Error::Config(format!(
                        "server node id {} outside the server list",
                        self.node_id
                    )));
                }
                if self.index_dir.as_os_str().is_empty() {
                    return Err(Error::Config(
                        "memory nodes need the partitioned index directory".into(),
                    ));
                }
            }
            Role::Client => {
                if self.num_compute_threads == 0 {
                    return Err(Error::Config("number of compute threads must be > 0".into()));
                }
                if self.index_dir.as_os_str().is_empty() {
                    return Err(Error::Config(
                        "compute nodes need the partitioned index directory".into(),
                    ));
                }
                if self.initiator && self.query_file.as_os_str().is_empty() {
                    return Err(Error::Config(
                        "the initiator needs a query input file".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_client() -> Config {
        Config {
            role: Role::Client,
            initiator: true,
            index_dir: "/tmp/idx".into(),
            query_file: "/tmp/q.txt".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_client().validate().is_ok());
    }

    #[test]
    fn test_block_size_must_be_power_of_two_at_least_128() {
        for bs in [0, 12, 64, 100, 1000] {
            let cfg = Config {
                block_size: bs,
                ..valid_client()
            };
            assert!(cfg.validate().is_err(), "block size {bs} accepted");
        }
        let cfg = Config {
            block_size: 128,
            ..valid_client()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_initiator_requires_query_file() {
        let cfg = Config {
            query_file: PathBuf::new(),
            ..valid_client()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("server".parse::<Role>().unwrap(), Role::Server);
        assert_eq!(
            "intersection".parse::<Operation>().unwrap(),
            Operation::Intersection
        );
        assert_eq!(
            "dynamic_block".parse::<IndexKind>().unwrap(),
            IndexKind::BlockDynamic
        );
        assert_eq!("block".parse::<IndexKind>().unwrap(), IndexKind::BlockStatic);
        assert!("frobnicate".parse::<IndexKind>().is_err());
    }
}
