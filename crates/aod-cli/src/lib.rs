//! `aod` command-line front end
//!
//! Parses arguments, loads configuration and drives an [`IamHandler`]. The
//! store is injected so the same flow runs against the Resource Manager API
//! or an in-memory store.

use anyhow::{bail, Context, Result};
use aod::{
    read_request_from_path, validate_request, AodConfig, Expiry, IamHandler, IamRequest,
    PolicyStore, RestPolicyStore,
};
use chrono::{DateTime, Duration, Utc};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "aod")]
#[command(about = "Grant and clean up time-bound IAM bindings")]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Work with IAM requests
    #[command(subcommand)]
    Iam(IamCommand),
}

#[derive(Subcommand, Debug)]
pub enum IamCommand {
    /// Check an IAM request file without touching any policy
    Validate(ValidateArgs),
    /// Grant the bindings of an IAM request for a limited time
    Handle(HandleArgs),
    /// Remove the bindings of an IAM request and sweep expired grants
    Cleanup(CleanupArgs),
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path of the IAM request file
    #[arg(long)]
    pub path: PathBuf,
}

#[derive(Args, Debug)]
pub struct HandleArgs {
    /// Path of the IAM request file
    #[arg(long)]
    pub path: PathBuf,

    /// How long the grant lasts, e.g. "2h" or "1h30m"
    #[arg(long, value_parser = parse_duration, allow_hyphen_values = true)]
    pub duration: Duration,

    /// Start of the grant (RFC 3339); defaults to now
    #[arg(long)]
    pub start_time: Option<DateTime<Utc>>,

    /// Condition title marking managed bindings
    #[arg(long)]
    pub custom_condition_title: Option<String>,

    /// Print the resulting policies
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Path of the IAM request file
    #[arg(long)]
    pub path: PathBuf,

    /// Condition title marking managed bindings
    #[arg(long)]
    pub custom_condition_title: Option<String>,

    /// Print the resulting policies
    #[arg(long)]
    pub verbose: bool,
}

/// Parse a duration such as `90s`, `2h` or `1h30m`
///
/// Units are `h`, `m`, `s` and `ms`; a bare `0` is accepted. A leading `-`
/// yields a negative duration, which callers reject.
pub fn parse_duration(text: &str) -> std::result::Result<Duration, String> {
    let invalid = || format!("invalid duration {:?}", text);
    let trimmed = text.trim();
    let (negative, mut rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    if rest == "0" {
        return Ok(Duration::zero());
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total = Duration::zero();
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            return Err(invalid());
        }
        let value: i64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let part = match unit {
            "h" => Duration::try_hours(value),
            "m" => Duration::try_minutes(value),
            "s" => Duration::try_seconds(value),
            "ms" => Duration::try_milliseconds(value),
            "" => return Err(format!("missing unit in duration {:?}", text)),
            other => return Err(format!("unknown unit {:?} in duration {:?}", other, text)),
        };
        total = part
            .and_then(|p| total.checked_add(&p))
            .ok_or_else(invalid)?;
    }

    Ok(if negative { -total } else { total })
}

/// Load the config named on the command line, or the defaults
pub fn load_config(cli: &Cli) -> Result<AodConfig> {
    match &cli.config {
        Some(path) => AodConfig::load(path)
            .with_context(|| format!("failed to load config from {:?}", path)),
        None => Ok(AodConfig::default()),
    }
}

/// Resource Manager store built from `config`
pub fn rest_store(config: &AodConfig) -> Result<Arc<dyn PolicyStore>> {
    let token = config.store.access_token();
    if token.is_none() {
        debug!(
            variable = %config.store.access_token_env,
            "no access token set, sending unauthenticated requests"
        );
    }
    let store = RestPolicyStore::new(config.store.endpoint.clone(), token, config.store.timeout())?;
    Ok(Arc::new(store))
}

fn print_header(out: &mut impl Write, header: &str) -> Result<()> {
    writeln!(out, "------{}------", header)?;
    Ok(())
}

fn write_yaml<T: serde::Serialize>(out: &mut impl Write, value: &T) -> Result<()> {
    let text = serde_yaml::to_string(value).context("failed to encode to yaml")?;
    out.write_all(text.as_bytes())?;
    Ok(())
}

fn read_valid_request(path: &Path) -> Result<IamRequest> {
    let request = read_request_from_path(path).context("failed to read IamRequest")?;
    validate_request(&request).map_err(aod::AodError::from)?;
    Ok(request)
}

fn build_handler(
    config: &AodConfig,
    store: Arc<dyn PolicyStore>,
    custom_condition_title: Option<String>,
) -> Result<IamHandler> {
    let mut builder = IamHandler::builder().config(config).stores(store);
    if let Some(title) = custom_condition_title.filter(|t| !t.is_empty()) {
        builder = builder.condition_title(title);
    }
    builder.build().context("failed to create IAM handler")
}

/// Run one parsed command, writing user-facing output to `out`
pub async fn run(
    cli: Cli,
    config: AodConfig,
    store: Arc<dyn PolicyStore>,
    cancel: &CancellationToken,
    out: &mut impl Write,
) -> Result<()> {
    let Command::Iam(command) = cli.command;
    match command {
        IamCommand::Validate(args) => {
            read_valid_request(&args.path)?;
            writeln!(out, "Successfully validated IAM request")?;
        }

        IamCommand::Handle(args) => {
            if args.duration <= Duration::zero() {
                bail!("a positive duration is required");
            }
            let request = read_valid_request(&args.path)?;
            let start = args.start_time.unwrap_or_else(Utc::now);
            let expires_at = start
                .checked_add_signed(args.duration)
                .context("expiry is out of range")?;
            let expiry = Expiry::try_new(expires_at)
                .context("duration pushes the expiry past what a condition can express")?;

            let handler = build_handler(&config, store, args.custom_condition_title)?;
            info!(path = ?args.path, expiry = %expires_at, "handling IAM request");

            let responses = handler
                .grant(&request, expiry, cancel)
                .await
                .into_result()
                .context("failed to handle IAM request")?;

            writeln!(out, "Successfully handled IAM request")?;
            if args.verbose {
                print_header(out, "Applied IAM Policies")?;
                write_yaml(out, &responses)?;
            }
        }

        IamCommand::Cleanup(args) => {
            let request = read_valid_request(&args.path)?;
            let handler = build_handler(&config, store, args.custom_condition_title)?;
            info!(path = ?args.path, "cleaning up IAM request");

            let responses = handler
                .revoke(&request, cancel)
                .await
                .into_result()
                .context("encountered error when cleaning up IAM policy")?;

            print_header(out, "Successfully Removed Requested Bindings")?;
            write_yaml(out, &request)?;
            if args.verbose {
                print_header(out, "Cleaned Up IAM Policies")?;
                write_yaml(out, &responses)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("2h"), Ok(Duration::hours(2)));
        assert_eq!(parse_duration("1h30m"), Ok(Duration::minutes(90)));
        assert_eq!(parse_duration("45s"), Ok(Duration::seconds(45)));
        assert_eq!(parse_duration("1m500ms"), Ok(Duration::milliseconds(60_500)));
        assert_eq!(parse_duration("0"), Ok(Duration::zero()));
        assert_eq!(parse_duration("-1h"), Ok(Duration::hours(-1)));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("10").unwrap_err().contains("missing unit"));
        assert!(parse_duration("3d").unwrap_err().contains("unknown unit"));
    }

    #[test]
    fn test_cli_parses_handle() {
        let cli = Cli::try_parse_from([
            "aod",
            "iam",
            "handle",
            "--path",
            "req.yaml",
            "--duration",
            "-2h",
            "--start-time",
            "2024-06-01T12:00:00Z",
            "--verbose",
        ])
        .unwrap();

        let Command::Iam(IamCommand::Handle(args)) = cli.command else {
            panic!("expected handle command");
        };
        assert_eq!(args.path, PathBuf::from("req.yaml"));
        assert_eq!(args.duration, Duration::hours(-2));
        assert_eq!(
            args.start_time.map(|t| t.to_rfc3339()),
            Some("2024-06-01T12:00:00+00:00".to_string())
        );
        assert!(args.verbose);
    }

    #[test]
    fn test_cli_requires_path() {
        assert!(Cli::try_parse_from(["aod", "iam", "validate"]).is_err());
        assert!(Cli::try_parse_from(["aod", "iam", "handle", "--path", "r.yaml"]).is_err());
    }

    #[test]
    fn test_config_flag_is_global() {
        let cli = Cli::try_parse_from([
            "aod", "iam", "cleanup", "--path", "r.yaml", "--config", "aod.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("aod.toml")));
    }
}
