use clap::{Parser, Subcommand};
use orc_common::args::{FabricArgs, GroupArgs, LicenseArgs};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    Serve(ServeArgs),
    Health(HealthArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, env = "SITE_DIR", default_value = "/var/orchestrator/sites")]
    pub site_dir: String,

    #[arg(long, env = "GC_RETENTION_DAYS", default_value_t = 30)]
    pub gc_retention_days: i64,

    #[command(flatten)]
    pub fabric: FabricArgs,

    #[command(flatten)]
    pub license: LicenseArgs,

    #[command(flatten)]
    pub group: GroupArgs,
}

#[derive(Parser, Debug, Clone)]
pub struct HealthArgs {
    #[arg(long, env = "HTTP_PORT", default_value_t = 8080)]
    pub http_port: u16,

    #[arg(long, env = "GRPC_TARGET", default_value = "http://127.0.0.1:7575")]
    pub grpc_target: String,
}
