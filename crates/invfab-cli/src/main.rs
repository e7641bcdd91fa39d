use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use invfab::compute_node::ComputeNode;
use invfab::memory_node::MemoryNode;
use invfab::{Config, IndexBuilder, IndexKind, Operation, Role};

/// Disaggregated inverted-index query engine over a one-sided
/// remote-memory fabric.
#[derive(Parser, Debug)]
#[command(name = "invfab", about = "Disaggregated inverted-index query engine")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a node (memory node or compute node).
    Run(RunArgs),
    /// Build the partitioned index files from a posting-lists file.
    Build(BuildArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Node role: "server" (memory node) or "client" (compute node)
    #[arg(long)]
    role: String,

    /// Position of this node in its role's node list
    #[arg(long, default_value_t = 0)]
    node_id: u32,

    /// Bootstrap addresses of all memory nodes, in node-id order
    #[arg(long, value_delimiter = ',', default_value = "127.0.0.1:9871")]
    servers: Vec<String>,

    /// This compute node reads and distributes the queries
    #[arg(long)]
    initiator: bool,

    /// Bootstrap address of the initiator, for peer compute nodes
    #[arg(long, default_value = "127.0.0.1:9971")]
    initiator_addr: String,

    /// Expected number of compute nodes
    #[arg(long, default_value_t = 1)]
    num_clients: u32,

    /// Worker threads per compute node
    #[arg(long, short = 't', default_value_t = 1)]
    threads: u32,

    /// Send-queue work-request capacity per worker
    #[arg(long, default_value_t = 1024)]
    max_send_queue_wr: i32,

    /// Receive-queue work-request capacity
    #[arg(long, default_value_t = 1024)]
    max_recv_queue_wr: i32,

    /// Block size in bytes (power of two, >= 128)
    #[arg(long, short = 'b', default_value_t = 1024)]
    block_size: u32,

    /// Read-query operation: "intersection" or "union"
    #[arg(long, short = 'o', default_value = "intersection")]
    operation: String,

    /// Index variant: "dynamic_block" or "block"
    #[arg(long, default_value = "dynamic_block")]
    index_kind: String,

    /// Directory of the partitioned meta and index files
    #[arg(long, short = 'd')]
    index_dir: PathBuf,

    /// Query input file (initiator only)
    #[arg(long, short = 'q')]
    query_file: Option<PathBuf>,

    /// Bootstrap TCP port of this node
    #[arg(long, default_value_t = 9871)]
    port: u16,

    /// Do not pin compute threads to cores
    #[arg(long, short = 'p')]
    disable_thread_pinning: bool,

    /// Fabric device port
    #[arg(long, default_value_t = 1)]
    device_port: u32,

    /// Directory for the shared arena files
    #[arg(long)]
    shm_dir: Option<PathBuf>,

    /// Free blocks appended behind the initial index prefix
    #[arg(long, default_value_t = 4096)]
    extra_blocks: u32,

    /// Re-scan all inserted ids after the run
    #[arg(long)]
    verify: bool,
}

#[derive(Parser, Debug)]
struct BuildArgs {
    /// Posting-lists input, one "term: id id ..." line per list
    #[arg(long)]
    lists: PathBuf,

    /// Output directory for the partition files
    #[arg(long, short = 'd')]
    index_dir: PathBuf,

    /// Index variant: "dynamic_block" or "block"
    #[arg(long, default_value = "dynamic_block")]
    index_kind: String,

    /// Block size in bytes (power of two, >= 128)
    #[arg(long, short = 'b', default_value_t = 1024)]
    block_size: u32,

    /// Number of memory nodes to partition for
    #[arg(long, default_value_t = 1)]
    num_nodes: u32,
}

fn run(args: RunArgs) -> anyhow::Result<()> {
    let role: Role = args.role.parse()?;
    let operation: Operation = args.operation.parse()?;
    let index_kind: IndexKind = args.index_kind.parse()?;

    let config = Config {
        role,
        node_id: args.node_id,
        servers: args.servers,
        initiator: args.initiator,
        initiator_addr: args.initiator_addr,
        num_clients: args.num_clients,
        num_compute_threads: args.threads,
        max_send_queue_wr: args.max_send_queue_wr,
        max_recv_queue_wr: args.max_recv_queue_wr,
        block_size: args.block_size,
        operation,
        index_kind,
        index_dir: args.index_dir,
        query_file: args.query_file.unwrap_or_default(),
        port: args.port,
        disable_thread_pinning: args.disable_thread_pinning,
        device_port: args.device_port,
        shm_dir: args.shm_dir.unwrap_or_else(std::env::temp_dir),
        extra_blocks: args.extra_blocks,
        verify: args.verify,
    };

    match config.role {
        Role::Server => MemoryNode::run(&config)?,
        Role::Client => ComputeNode::run(&config)?,
    }
    Ok(())
}

fn build(args: BuildArgs) -> anyhow::Result<()> {
    let index_kind: IndexKind = args.index_kind.parse()?;
    let builder = IndexBuilder::from_text_file(&args.lists)
        .with_context(|| format!("reading lists from {}", args.lists.display()))?;
    let written =
        builder.write_to_dir(&args.index_dir, index_kind, args.block_size, args.num_nodes)?;
    for path in written {
        log::info!("wrote {}", path.display());
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let result = match args.command {
        Command::Run(run_args) => run(run_args),
        Command::Build(build_args) => build(build_args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
