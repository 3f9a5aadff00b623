//! Startup configuration, built once from the CLI and passed down explicitly.

use std::net::{Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use isoport_backend_ort::{DetectorConfig, Device};
use isoport_backend_spleeter::SpleeterConfig;
use isoport_runtime::{DispatcherConfig, Isolation, WorkerCommand};

use crate::cli::{BackendArgs, IsolationMode, ServeArgs};

#[derive(Clone, Debug)]
pub struct BackendSettings {
    pub detector: DetectorConfig,
    pub spleeter: SpleeterConfig,
}

impl BackendSettings {
    pub fn from_args(args: &BackendArgs) -> Result<Self> {
        let mut detector = DetectorConfig::new(PathBuf::from(&args.resources_root));
        detector.device = parse_device(&args.device)?;
        Ok(Self {
            detector,
            spleeter: SpleeterConfig {
                program: PathBuf::from(&args.spleeter_bin),
                ..SpleeterConfig::default()
            },
        })
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub grpc_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub dispatcher: DispatcherConfig,
    pub backends: BackendSettings,
}

impl ServerConfig {
    pub fn from_args(args: &ServeArgs) -> Result<Self> {
        let backends = BackendSettings::from_args(&args.backends)?;

        let isolation = match args.isolation {
            IsolationMode::Process => {
                let mut command = WorkerCommand::current_exe()
                    .context("failed to locate the isoportd executable")?
                    .arg("worker")
                    .arg("--log")
                    .arg(&args.log);
                for arg in args.backends.to_args() {
                    command = command.arg(arg);
                }
                Isolation::Process(command)
            }
            IsolationMode::Thread => Isolation::Thread,
        };
        let timeout = match args.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            grpc_addr: SocketAddr::from((Ipv6Addr::UNSPECIFIED, args.grpc_port)),
            http_addr: SocketAddr::from((Ipv6Addr::UNSPECIFIED, args.http_port)),
            dispatcher: DispatcherConfig::new(isolation)
                .timeout(timeout)
                .max_in_flight(args.max_workers),
            backends,
        })
    }
}

pub fn parse_device(raw: &str) -> Result<Device> {
    if raw.eq_ignore_ascii_case("cpu") {
        return Ok(Device::Cpu);
    }

    if let Some(rest) = raw.strip_prefix("cuda:") {
        let device_id: u32 = rest.parse().context("invalid cuda device id")?;
        return Ok(Device::Cuda { device_id });
    }

    anyhow::bail!("unsupported device: {raw} (expected cpu or cuda:N)");
}
