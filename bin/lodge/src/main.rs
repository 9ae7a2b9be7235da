//! Lodge CLI - Command-line client for the lodge metadata service.
//!
//! Provides commands for:
//! - Issuing access tokens from the shared secret
//! - Provisioning the caller's home
//! - Creating, inspecting, copying, moving and removing resources

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpStream;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

use lodge_core::{issue_token, Identity, SharedSecret};
use lodge_proto::{read_frame, write_frame, Operation, Request, Response};

/// Environment variable holding the access token.
const ENV_TOKEN: &str = "LODGE_TOKEN";

/// Environment variable holding the token signing secret.
const ENV_SHARED_SECRET: &str = "LODGE_SHAREDSECRET";

/// Lodge metadata service CLI.
#[derive(Parser)]
#[command(name = "lodge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Service address
    #[arg(short, long, default_value = "127.0.0.1:57001")]
    addr: String,

    /// Access token (defaults to $LODGE_TOKEN)
    #[arg(short, long)]
    token: Option<String>,

    /// Trace id attached to the request
    #[arg(long)]
    trace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue an access token signed with $LODGE_SHAREDSECRET
    Token {
        /// Principal id
        #[arg(long)]
        pid: String,

        /// Identity provider
        #[arg(long, default_value = "localhost")]
        idp: String,

        /// Display name
        #[arg(long, default_value = "")]
        name: String,

        /// Lifetime in seconds
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Create the caller's home directory
    Home,

    /// Create a directory
    Mkdir {
        /// Logical path
        path: String,
    },

    /// Show metadata of a resource
    Stat {
        /// Logical path
        path: String,

        /// Include direct children
        #[arg(short, long)]
        children: bool,
    },

    /// Copy a resource
    Cp {
        /// Source path
        src: String,
        /// Destination path
        dst: String,
    },

    /// Move a resource
    Mv {
        /// Source path
        src: String,
        /// Destination path
        dst: String,
    },

    /// Remove a resource and everything below it
    Rm {
        /// Logical path
        path: String,
    },
}

fn cmd_token(pid: &str, idp: &str, name: &str, ttl: Option<u64>) -> Result<()> {
    let secret = std::env::var(ENV_SHARED_SECRET)
        .with_context(|| format!("{} is not set", ENV_SHARED_SECRET))?;

    let identity = Identity::new(pid, idp, name);
    let token = issue_token(
        &identity,
        &SharedSecret::from(secret),
        ttl.map(Duration::from_secs),
    )
    .context("Failed to issue token")?;

    println!("{}", token);
    Ok(())
}

async fn call(addr: &str, request: &Request) -> Result<Response> {
    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("Failed to connect to {}", addr))?;
    debug!(addr, op = request.op.name(), "Sending request");

    write_frame(&mut stream, request)
        .await
        .context("Failed to send request")?;
    read_frame(&mut stream)
        .await
        .context("Failed to read response")?
        .context("Connection closed before a response arrived")
}

fn print_response(response: Response) -> Result<()> {
    match response {
        Response::Ack => {
            println!("ok");
            Ok(())
        }
        Response::Metadata { metadata } => {
            let json = serde_json::to_string_pretty(&metadata).context("Failed to encode metadata")?;
            println!("{}", json);
            Ok(())
        }
        Response::Error { code, message } => bail!("{}: {}", code, message),
    }
}

async fn cmd_operation(cli: Cli, op: Operation) -> Result<()> {
    let token = match cli.token {
        Some(token) => token,
        None => std::env::var(ENV_TOKEN)
            .with_context(|| format!("No --token given and {} is not set", ENV_TOKEN))?,
    };

    let mut request = Request::new(token, op);
    if let Some(trace) = cli.trace {
        request = request.with_trace_id(trace);
    }

    let response = call(&cli.addr, &request).await?;
    print_response(response)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set up logging")?;

    let op = match &cli.command {
        Commands::Token {
            pid,
            idp,
            name,
            ttl,
        } => return cmd_token(pid, idp, name, *ttl),
        Commands::Home => Operation::Home,
        Commands::Mkdir { path } => Operation::Mkdir { path: path.clone() },
        Commands::Stat { path, children } => Operation::Stat {
            path: path.clone(),
            children: *children,
        },
        Commands::Cp { src, dst } => Operation::Cp {
            src: src.clone(),
            dst: dst.clone(),
        },
        Commands::Mv { src, dst } => Operation::Mv {
            src: src.clone(),
            dst: dst.clone(),
        },
        Commands::Rm { path } => Operation::Rm { path: path.clone() },
    };

    cmd_operation(cli, op).await
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_stat_flags() {
        let cli = Cli::try_parse_from(["lodge", "--token", "t", "stat", "-c", "local/users"]).unwrap();
        assert_eq!(cli.token.as_deref(), Some("t"));
        match cli.command {
            Commands::Stat { path, children } => {
                assert_eq!(path, "local/users");
                assert!(children);
            }
            _ => panic!("expected stat"),
        }
    }

    #[test]
    fn test_error_response_fails() {
        let response = Response::Error {
            code: lodge_proto::ErrorCode::NotFound,
            message: "Not found: x".into(),
        };
        assert!(print_response(response).is_err());
        assert!(print_response(Response::Ack).is_ok());
    }
}
