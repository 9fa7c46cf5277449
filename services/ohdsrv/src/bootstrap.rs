//! Startup helpers: command line, logging, driver selection, listener bind

use std::path::{Path, PathBuf};

use clap::Parser;
use common::config_loader::get_config_value;
use common::{init_logging, LogConfig, LogGuard};
use errors::{startup_error, OhdResult};
use ohd_protocols::{DiDriver, NullDiDriver, SysfsDiDriver};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::{DriverKind, ServiceSettings};
use crate::error::{OhdSrvError, Result};
use crate::registry::{AgentSettings, DEFAULT_PORT};

pub const SERVICE_NAME: &str = "ohdsrv";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Overheight detection field agent")]
pub struct Args {
    /// Home directory; relative paths resolve against it
    #[arg(short = 'D', long, default_value = "/home/overhead", env = "OHD_HOME")]
    pub home: PathBuf,

    /// Device configuration file
    #[arg(short = 'c', long, default_value = "config.txt")]
    pub config: PathBuf,

    /// Log directory
    #[arg(short = 'L', long, default_value = "/home/overhead/log")]
    pub log_dir: PathBuf,

    /// Debug logging
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Log the configuration after every reload
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// No console output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Service settings file (TOML)
    #[arg(short = 's', long, value_name = "FILE")]
    pub settings: Option<PathBuf>,
}

fn under_home(home: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        home.join(path)
    }
}

impl Args {
    pub fn config_path(&self) -> PathBuf {
        under_home(&self.home, &self.config)
    }

    pub fn log_path(&self) -> PathBuf {
        under_home(&self.home, &self.log_dir)
    }

    pub fn settings_path(&self) -> Option<PathBuf> {
        self.settings
            .as_deref()
            .map(|path| under_home(&self.home, path))
    }

    pub fn check_home(&self) -> OhdResult<()> {
        if !self.home.is_dir() {
            return Err(startup_error!(
                "Home directory {} does not exist",
                self.home.display()
            ));
        }
        Ok(())
    }
}

pub fn initialize_logging(args: &Args) -> OhdResult<LogGuard> {
    let log_dir = args.log_path();
    let config = LogConfig {
        service_name: SERVICE_NAME.to_string(),
        log_dir: log_dir.clone(),
        default_filter: if args.debug { "debug" } else { "info" }.to_string(),
        console: !args.quiet,
        ..LogConfig::default()
    };
    init_logging(config).map_err(|e| {
        startup_error!(
            "Cannot initialize logging in {}: {}",
            log_dir.display(),
            e
        )
    })
}

/// Open the configured DI driver, falling back to the null driver when the
/// GPIO tree is absent
pub fn create_driver(settings: &ServiceSettings) -> Box<dyn DiDriver> {
    match settings.driver {
        DriverKind::Null => {
            info!("Using null DI driver");
            Box::new(NullDiDriver)
        },
        DriverKind::Sysfs => {
            let driver = SysfsDiDriver::new(&settings.gpio_base_path, settings.gpio_base);
            if driver.is_available() {
                info!(
                    path = %settings.gpio_base_path.display(),
                    gpio_base = settings.gpio_base,
                    "Using sysfs DI driver"
                );
                Box::new(driver)
            } else {
                warn!(
                    path = %settings.gpio_base_path.display(),
                    "GPIO sysfs not found, using null DI driver"
                );
                Box::new(NullDiDriver)
            }
        },
    }
}

/// Port priority: `PortName` > `OHD_PORT` > 3080
pub fn resolve_port(agent: &AgentSettings) -> u16 {
    get_config_value(agent.port, "OHD_PORT", DEFAULT_PORT)
}

pub async fn bind_listener(host: &str, port: u16) -> Result<TcpListener> {
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| OhdSrvError::startup(format!("Cannot listen on {addr}: {e}")))?;
    info!(%addr, "Listening for CVM connections");
    Ok(listener)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["ohdsrv"]);
        assert_eq!(args.config_path(), PathBuf::from("/home/overhead/config.txt"));
        assert_eq!(args.log_path(), PathBuf::from("/home/overhead/log"));
        assert!(!args.debug && !args.verbose && !args.quiet);
        assert!(args.settings_path().is_none());
    }

    #[test]
    fn test_relative_paths_follow_home() {
        let args = Args::parse_from([
            "ohdsrv", "-D", "/srv/ohd", "-c", "site.cfg", "-L", "logs", "-s", "ohdsrv.toml", "-d",
            "-q",
        ]);
        assert_eq!(args.config_path(), PathBuf::from("/srv/ohd/site.cfg"));
        assert_eq!(args.log_path(), PathBuf::from("/srv/ohd/logs"));
        assert_eq!(args.settings_path(), Some(PathBuf::from("/srv/ohd/ohdsrv.toml")));
        assert!(args.debug && args.quiet);
    }

    #[test]
    fn test_missing_home_is_startup_failure() {
        let args = Args::parse_from(["ohdsrv", "-D", "/definitely/not/here"]);
        assert!(matches!(
            args.check_home().unwrap_err(),
            errors::OhdError::StartupFailed(_)
        ));
    }

    #[test]
    fn test_configured_port_wins() {
        let settings = AgentSettings {
            port: Some(4100),
            ..AgentSettings::default()
        };
        assert_eq!(resolve_port(&settings), 4100);
    }

    #[test]
    fn test_sysfs_without_tree_falls_back() {
        let settings = ServiceSettings {
            driver: DriverKind::Sysfs,
            gpio_base_path: PathBuf::from("/definitely/not/gpio"),
            ..ServiceSettings::default()
        };
        assert_eq!(create_driver(&settings).name(), "null");
    }

    #[tokio::test]
    async fn test_bind_conflict_is_startup_error() {
        let first = bind_listener("127.0.0.1", 0).await.unwrap();
        let port = first.local_addr().unwrap().port();
        let err = bind_listener("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, OhdSrvError::StartupError(_)));
    }
}
