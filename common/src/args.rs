use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct FabricArgs {
    /// Address the agent RPC server listens on.
    #[arg(long, env = "FABRIC_ADDR", default_value = "0.0.0.0:7575")]
    pub fabric_addr: String,

    /// Per-participant duration budget for port/bandwidth probes.
    #[arg(long, env = "FABRIC_PROBE_SECS", default_value_t = 10)]
    pub probe_secs: u64,

    /// Reconnect timeout used by agent peer clients, in seconds.
    #[arg(long, env = "FABRIC_RECONNECT_SECS", default_value_t = 10)]
    pub reconnect_secs: u64,
}

#[derive(Parser, Debug, Clone)]
pub struct LicenseArgs {
    #[arg(long, env = "LICENSE_MAX_NODES")]
    pub max_nodes: Option<u32>,

    #[arg(long, env = "LICENSE_MAX_CORES")]
    pub max_cores: Option<u32>,
}

#[derive(Parser, Debug, Clone)]
pub struct GroupArgs {
    #[arg(long, env = "MAX_EXPAND_CONCURRENCY", default_value_t = 3)]
    pub max_expand_concurrency: usize,

    #[arg(long, env = "MAX_MASTER_NODES", default_value_t = 3)]
    pub max_master_nodes: usize,

    #[arg(long, env = "MAX_OPERATION_CONCURRENCY", default_value_t = 8)]
    pub max_operation_concurrency: usize,
}
