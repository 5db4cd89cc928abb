use std::path::PathBuf;

use serde_json::json;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use upscale_backend::api::server::serve;
use upscale_backend::config::{load_app_config, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    if matches!(cli_args.first().map(String::as_str), Some("print-config")) {
        run_print_config_cli(cli_args.into_iter().skip(1).collect::<Vec<_>>())?;
        return Ok(());
    }
    if cli_args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_usage();
        return Ok(());
    }

    let work_dir = parse_work_dir_arg(cli_args.as_slice())?;
    let config = load_app_config(work_dir.as_path())?;
    serve(config).await?;
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}

fn run_print_config_cli(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_usage();
        return Ok(());
    }

    let work_dir = parse_work_dir_arg(args.as_slice())?;
    let config = load_app_config(work_dir.as_path())?;
    println!("{}", serde_json::to_string_pretty(&config_summary(&config))?);
    Ok(())
}

/// Accepts an optional `--work-dir PATH`; defaults to the current directory.
fn parse_work_dir_arg(args: &[String]) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let mut work_dir = None::<PathBuf>;
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--work-dir" => {
                let Some(value) = args.get(i + 1) else {
                    return Err(std::io::Error::other(format!("Missing value for {flag}")).into());
                };
                work_dir = Some(PathBuf::from(value));
                i += 2;
            }
            unknown => {
                return Err(std::io::Error::other(format!(
                    "Unknown argument: {unknown}\n\nUse --help for usage."
                ))
                .into());
            }
        }
    }

    match work_dir {
        Some(path) => Ok(path),
        None => Ok(std::env::current_dir()?),
    }
}

fn config_summary(config: &AppConfig) -> serde_json::Value {
    json!({
        "bind": config.bind.to_string(),
        "data_dir": config.data_dir.display().to_string(),
        "upload_dir": config.upload_dir().display().to_string(),
        "results_dir": config.results_dir().display().to_string(),
        "api_token": config.masked_api_token(),
        "api_base": config.api_base,
        "model": config.model.model,
        "model_version": config.model.version,
        "max_upload_bytes": config.max_upload_bytes,
        "provider_timeout_secs": config.provider_timeout.as_secs(),
        "rate_limits": {
            "upscale_per_minute": config.rate_limits.upscale_per_minute,
            "per_hour": config.rate_limits.per_hour,
            "per_day": config.rate_limits.per_day,
        },
    })
}

fn print_usage() {
    eprintln!(concat!(
        "Usage:\n",
        "  cargo run -- [--work-dir PATH]\n",
        "  cargo run -- print-config [--work-dir PATH]\n\n",
        "Configuration:\n",
        "  REPLICATE_API_TOKEN enables upscale and history lookups\n",
        "  UPSCALE_BACKEND_BIND defaults to 0.0.0.0:5000\n",
        "  optional TOML file: config/upscale.toml (override with UPSCALE_CONFIG)\n",
        "  .env in the work dir is read after the TOML file and before the process environment\n"
    ));
}
