use capbridge::configuration::ConfigStore;
use capbridge::data_capture::{support_local_replay, CaptureFile, FileType};
use capbridge::device_bridge::DeviceBridge;
use capbridge::diagnostics::{init_logging, LogSettings};
use capbridge::network::types::TargetAddress;
use capbridge::network::{CancelToken, PortScanner, RemoteServer};
use capbridge::process_injection::{
    CaptureOptions, EnvSep, EnvironmentModification, EnvironmentModifications, ProcessInjector,
};
use capbridge::session_management::PackageLauncher;
use clap::{Parser, Subcommand};
use log::{error, info, LevelFilter};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "capbridge")]
#[command(version)]
#[command(about = "Discover, launch and control capture-enabled processes")]
struct Args {
    /// TOML settings file
    #[arg(short, long, env = "CAPBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Also write the log to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List capture targets listening on a host
    Targets {
        #[arg(default_value = "localhost")]
        host: String,
    },
    /// List ready bridged devices
    Devices,
    /// Start an application on a bridged device with capturing enabled
    StartPackage {
        /// Bridged host, `adb:<serial>`
        host: String,
        package: String,
    },
    /// Start the replay server on a bridged device
    StartAndroidServer {
        #[arg(default_value = "")]
        serial: String,
    },
    /// Host a remote replay server until Ctrl-C
    Remoteserver {
        #[arg(long, default_value = "")]
        host: String,
        /// 0 selects the default remote server port
        #[arg(short, long, default_value_t = 0)]
        port: u16,
    },
    /// Check whether a capture can be replayed here
    Support { capture: PathBuf },
    /// Extract a capture's thumbnail, format chosen by the output extension
    Thumbnail {
        capture: PathBuf,
        output: PathBuf,
        #[arg(long, default_value_t = 0)]
        max_edge: u32,
    },
    /// Launch an application with the capture component injected
    Launch {
        #[arg(long)]
        component: PathBuf,
        #[arg(long)]
        capture_file: PathBuf,
        #[arg(long, default_value = "")]
        working_dir: PathBuf,
        /// NAME=VALUE sets, NAME+=VALUE appends, NAME^=VALUE prepends
        #[arg(long = "env", value_parser = parse_env_mod)]
        env: Vec<EnvironmentModification>,
        /// JSON capture options
        #[arg(long)]
        options: Option<String>,
        #[arg(long)]
        wait: bool,
        app: PathBuf,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Inject the capture component into a running process
    Attach {
        #[arg(long)]
        component: PathBuf,
        #[arg(long)]
        capture_file: PathBuf,
        #[arg(long = "env", value_parser = parse_env_mod)]
        env: Vec<EnvironmentModification>,
        #[arg(long)]
        options: Option<String>,
        #[arg(long)]
        wait: bool,
        pid: u32,
    },
    /// Print the library version
    Version,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(LogSettings {
        level: if args.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        },
        log_file: args.log_file.clone(),
    });

    let config = match &args.config {
        Some(path) => ConfigStore::from_file(path).unwrap_or_else(|e| {
            error!("Unable to import configuration from {}: {}", path.display(), e);
            std::process::exit(1);
        }),
        None => ConfigStore::new(),
    };

    let ok = match args.command {
        Command::Targets { host } => list_targets(&config, &host),
        Command::Devices => {
            for serial in DeviceBridge::new(config).enumerate_devices() {
                println!("adb:{}", serial);
            }
            true
        }
        Command::StartPackage { host, package } => start_package(config, &host, &package),
        Command::StartAndroidServer { serial } => {
            DeviceBridge::new(config)
                .for_device(&serial)
                .start_remote_server();
            true
        }
        Command::Remoteserver { host, port } => serve(host, port).await,
        Command::Support { capture } => {
            let (support, driver, ident) = support_local_replay(&capture);
            println!("{:?} (driver {:?}, recorded on {:?})", support, driver, ident);
            true
        }
        Command::Thumbnail {
            capture,
            output,
            max_edge,
        } => write_thumbnail(&capture, &output, max_edge),
        Command::Launch {
            component,
            capture_file,
            working_dir,
            env,
            options,
            wait,
            app,
            args,
        } => {
            let Some(options) = parse_options(options.as_deref()) else {
                std::process::exit(2);
            };
            let result = ProcessInjector::new(component).launch_with_injection(
                &app,
                &working_dir,
                &shell_words::join(&args),
                &EnvironmentModifications::new(env),
                &capture_file,
                &options,
                wait,
            );
            match result {
                Ok(pid) => {
                    println!("{}", pid);
                    true
                }
                Err(e) => {
                    error!("Launch failed: {}", e);
                    false
                }
            }
        }
        Command::Attach {
            component,
            capture_file,
            env,
            options,
            wait,
            pid,
        } => {
            let Some(options) = parse_options(options.as_deref()) else {
                std::process::exit(2);
            };
            let result = ProcessInjector::new(component).attach_to_process(
                pid,
                &EnvironmentModifications::new(env),
                &capture_file,
                &options,
                wait,
            );
            if let Err(e) = &result {
                error!("Attach to {} failed: {}", pid, e);
            }
            result.is_ok()
        }
        Command::Version => {
            println!("capbridge {}", capbridge::version_string());
            true
        }
    };

    if !ok {
        std::process::exit(1);
    }
}

fn list_targets(config: &ConfigStore, host: &str) -> bool {
    let address = TargetAddress::resolve(host, 0);
    if let Some(serial) = address.device_serial() {
        DeviceBridge::new(config.clone())
            .for_device(serial)
            .forward_ports();
    }

    for port in PortScanner::new().enumerate(host) {
        println!("{}:{}", address.host, port);
    }
    true
}

fn start_package(config: ConfigStore, host: &str, package: &str) -> bool {
    let address = TargetAddress::resolve(host, 0);
    let bridge = DeviceBridge::new(config).for_device(address.device_serial().unwrap_or(""));

    let launch = PackageLauncher::new(&bridge).start_package_for_capture(host, package);
    println!("{}", launch.control_port);
    launch.ready
}

async fn serve(host: String, port: u16) -> bool {
    let token = CancelToken::new();
    let server = RemoteServer::new();
    let serving = server.serve_async(&host, port, Some(&token));
    tokio::pin!(serving);

    let result = tokio::select! {
        result = &mut serving => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, stopping remote server");
            token.cancel();
            serving.await
        }
    };

    match result {
        Ok(()) => true,
        Err(e) => {
            error!("Remote server failed: {}", e);
            false
        }
    }
}

fn write_thumbnail(capture: &Path, output: &Path, max_edge: u32) -> bool {
    let Some(file_type) = output
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(FileType::from_extension)
    else {
        error!("Unsupported thumbnail extension on {}", output.display());
        return false;
    };

    let file = CaptureFile::open(&capture.to_string_lossy());
    let thumbnail = file.get_thumbnail(file_type, max_edge);
    file.shutdown();

    let bytes = match thumbnail {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("No thumbnail for {}: {}", capture.display(), e);
            return false;
        }
    };
    if let Err(e) = std::fs::write(output, bytes) {
        error!("Unable to write {}: {}", output.display(), e);
        return false;
    }
    true
}

fn parse_options(json: Option<&str>) -> Option<CaptureOptions> {
    match json {
        None => Some(CaptureOptions::default()),
        Some(json) => serde_json::from_str(json)
            .map_err(|e| error!("Invalid capture options: {}", e))
            .ok(),
    }
}

fn parse_env_mod(arg: &str) -> Result<EnvironmentModification, String> {
    let (name, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got {:?}", arg))?;

    let modification = if let Some(name) = name.strip_suffix('+') {
        EnvironmentModification::append(name, value, EnvSep::Platform)
    } else if let Some(name) = name.strip_suffix('^') {
        EnvironmentModification::prepend(name, value, EnvSep::Platform)
    } else {
        EnvironmentModification::set(name, value)
    };

    if modification.name.is_empty() {
        return Err(format!("missing variable name in {:?}", arg));
    }
    Ok(modification)
}
