use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "isoportd", version, about = "Isoport isolated inference daemon")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gRPC and JSON-RPC servers
    Serve(ServeArgs),

    /// Run a single job read from stdin (spawned by `serve`)
    Worker {
        /// Log level (RUST_LOG)
        #[arg(long, default_value = "info")]
        log: String,

        #[command(flatten)]
        backends: BackendArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Port for the SoundSpleeter gRPC service
    #[arg(long, default_value_t = 7777)]
    pub grpc_port: u16,

    /// Port for the JSON-RPC detection endpoint
    #[arg(long, default_value_t = 7778)]
    pub http_port: u16,

    /// Calls allowed to hold a worker at once
    #[arg(long, default_value_t = 4)]
    pub max_workers: usize,

    /// Seconds to wait for a worker before killing it (0 waits forever)
    #[arg(long, default_value_t = 300)]
    pub timeout_secs: u64,

    /// How each call's worker is isolated
    #[arg(long, value_enum, default_value_t = IsolationMode::Process)]
    pub isolation: IsolationMode,

    /// Log level (RUST_LOG)
    #[arg(long, default_value = "info")]
    pub log: String,

    #[command(flatten)]
    pub backends: BackendArgs,
}

/// Flags forwarded verbatim to worker children.
#[derive(Args, Debug, Clone)]
pub struct BackendArgs {
    /// Directory holding `Models/`
    #[arg(long, default_value = "Resources")]
    pub resources_root: String,

    /// Separation program to run
    #[arg(long, default_value = "spleeter")]
    pub spleeter_bin: String,

    /// Device for detection (cpu or cuda:N)
    #[arg(long, default_value = "cpu")]
    pub device: String,
}

impl BackendArgs {
    pub fn to_args(&self) -> Vec<String> {
        vec![
            "--resources-root".into(),
            self.resources_root.clone(),
            "--spleeter-bin".into(),
            self.spleeter_bin.clone(),
            "--device".into(),
            self.device.clone(),
        ]
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationMode {
    Process,
    Thread,
}
