//! P2Patter command-line client.
//!
//! Publishes to, deletes from, and follows microblogs found through the
//! registry at `host:port`.

mod commands;
mod error;
mod formatter;

use std::time::Duration;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use p2patter_client::ClientConfig;

use error::CliError;
use formatter::OutputFormat;

/// P2Patter command-line client
#[derive(Parser, Debug)]
#[command(name = "p2patter")]
#[command(version, about = "P2Patter microblog client")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Request timeout in seconds
    #[arg(long, global = true, default_value_t = 10)]
    pub timeout: u64,
}

/// Client subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Post a message and print its rendered form
    Publish {
        /// Registry host
        host: String,
        /// Registry port
        port: u16,
        /// Owner of the microblog
        owner: String,
        /// Message text
        text: String,
    },
    /// Remove a message and print its rendered form
    Delete {
        /// Registry host
        host: String,
        /// Registry port
        port: u16,
        /// Owner of the microblog
        owner: String,
        /// Serial number of the message
        serial: u64,
    },
    /// Print a live feed of one or more owners
    #[command(after_help = "Services call the follower back at --callback. The default \
        is an ipc socket in /tmp, reachable from this host only; give a tcp:// \
        address when following microblogs that run elsewhere.")]
    Follow {
        /// Registry host
        host: String,
        /// Registry port
        port: u16,
        /// Owners to follow
        #[arg(required = true)]
        names: Vec<String>,
        /// Address services deliver events to.
        ///
        /// Defaults to a local ipc socket, which only services on this host
        /// can reach. Following a microblog on another host needs a tcp
        /// address that host can dial, e.g. `--callback tcp://203.0.113.5:7500`.
        #[arg(long, value_name = "URL")]
        callback: Option<String>,
        /// Output format
        #[arg(long, default_value = "text", value_enum)]
        format: OutputFormat,
    },
}

/// Per-process ipc socket; only services on this host can dial it.
fn default_callback_address() -> String {
    format!("ipc:///tmp/p2patter-follow-{}.sock", std::process::id())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "p2patter_cli=info".into()),
        )
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => fail(CliError::Usage(e.to_string())),
    };

    if let Err(e) = run(args).await {
        fail(e);
    }
}

fn fail(error: CliError) -> ! {
    match error {
        CliError::Usage(usage) => eprint!("{}", usage),
        other => eprintln!("Error: {}", other),
    }
    std::process::exit(1);
}

async fn run(args: Args) -> Result<(), CliError> {
    let timeout = Duration::from_secs(args.timeout);

    match args.command {
        Command::Publish {
            host,
            port,
            owner,
            text,
        } => {
            let config = ClientConfig::tcp(&host, port).with_timeout(timeout);
            println!("{}", commands::publish(&config, &owner, &text).await?);
        }
        Command::Delete {
            host,
            port,
            owner,
            serial,
        } => {
            let config = ClientConfig::tcp(&host, port).with_timeout(timeout);
            println!("{}", commands::delete(&config, &owner, serial).await?);
        }
        Command::Follow {
            host,
            port,
            names,
            callback,
            format,
        } => {
            let config = ClientConfig::tcp(&host, port).with_timeout(timeout);
            let callback = callback.unwrap_or_else(default_callback_address);
            let formatter = formatter::create_formatter(format);
            commands::follow(&config, &names, &callback, &*formatter).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_args() {
        let args = Args::parse_from(["p2patter", "publish", "localhost", "4160", "alice", "hello there"]);
        match args.command {
            Command::Publish { owner, text, port, .. } => {
                assert_eq!(owner, "alice");
                assert_eq!(text, "hello there");
                assert_eq!(port, 4160);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_wrong_argument_count_is_usage_error() {
        assert!(Args::try_parse_from(["p2patter", "publish", "localhost", "4160", "alice"]).is_err());
        assert!(Args::try_parse_from(["p2patter", "delete", "localhost", "4160", "alice", "x"]).is_err());
        assert!(Args::try_parse_from(["p2patter", "follow", "localhost", "4160"]).is_err());
    }

    #[test]
    fn test_follow_args() {
        let args = Args::parse_from([
            "p2patter", "follow", "localhost", "4160", "alice", "bob", "--format", "json",
        ]);
        match args.command {
            Command::Follow {
                names,
                format,
                callback,
                ..
            } => {
                assert_eq!(names, vec!["alice", "bob"]);
                assert_eq!(format, OutputFormat::Json);
                assert!(callback.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_follow_help_explains_local_callback_default() {
        use clap::CommandFactory;

        let mut command = Args::command();
        let follow = command
            .find_subcommand_mut("follow")
            .expect("follow subcommand");
        let help = follow.render_long_help().to_string();
        assert!(help.contains("this host"));
        assert!(help.contains("tcp://"));
    }

    #[test]
    fn test_default_callback_is_per_process() {
        assert!(default_callback_address().ends_with(&format!("-{}.sock", std::process::id())));
    }
}
