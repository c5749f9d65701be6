use std::path::PathBuf;

use clap::Parser;
use dotenv::dotenv;
use sessionrpc::{
    setup_local_tracing, setup_tracing, AppError, AppResult, Client, Message, ProtocolServer,
    ServerConfig, Session, CONTENT_LENGTH, METHOD, SESSION,
};
use tokio::runtime;
use tracing::{error, info};

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    /// write an hourly rolling log file into this directory as well
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Option<Command>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Parser)]
pub enum Command {
    /// run the server with the ping and echo methods
    Serve,
    /// send one ping and print the response
    Ping {
        #[arg(long, default_value = "127.0.0.1:5555")]
        addr: String,
    },
    PrintConfig,
}

fn main() -> AppResult<()> {
    dotenv().ok();

    let commandline: CommandLine = CommandLine::parse();
    if std::env::var_os("RUST_LOG").is_none() {
        let level = match commandline.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        std::env::set_var("RUST_LOG", level);
    }
    let _log_guard = match &commandline.log_dir {
        Some(dir) => Some(setup_tracing(dir)?),
        None => {
            setup_local_tracing()?;
            None
        }
    };

    let config_path = commandline.conf.as_ref().map_or_else(
        || {
            let mut path = PathBuf::from("./");
            path.push("conf.toml");
            path
        },
        PathBuf::from,
    );

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;

    match commandline.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let config = ServerConfig::set_up_config(config_path)?;
            rt.block_on(serve(config))
        }
        Command::Ping { addr } => rt.block_on(ping(addr)),
        Command::PrintConfig => {
            let config = ServerConfig::set_up_config(config_path)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn serve(config: ServerConfig) -> AppResult<()> {
    let server = ProtocolServer::bind(config).await?;
    server.register_method("ping", ping_method);
    server.register_method("echo", echo_method);
    info!("listening on {}", server.local_addr()?);

    server
        .serve_forever(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("failed to listen for ctrl-c: {}", err);
            }
        })
        .await
}

/// Answers `pong` and counts pings per session.
fn ping_method(_request: &Message, response: &mut Message, session: Option<&Session>) {
    let count = session.map(|session| {
        session.with_data(|data| {
            let count = data
                .entry("pings".to_string())
                .or_insert_with(|| Box::new(0u64));
            match count.downcast_mut::<u64>() {
                Some(count) => {
                    *count += 1;
                    *count
                }
                None => 0,
            }
        })
    });
    response.set_header(METHOD, "ping");
    if let Some(count) = count {
        response.set_header("Pings", count);
    }
    response.set_content("ascii", "pong");
}

fn echo_method(request: &Message, response: &mut Message, _session: Option<&Session>) {
    response.set_header(METHOD, "echo");
    response.set_content("bytes", request.body().clone());
}

async fn ping(addr: String) -> AppResult<()> {
    let mut client = Client::connect(addr.as_str()).await?;
    let request = Message::request()
        .with_header(METHOD, "ping")
        .with_header(SESSION, "*")
        .with_header(CONTENT_LENGTH, 0);
    let response = client.call(&request).await?;
    if response.body().as_ref() != b"pong" {
        return Err(AppError::IllegalState(format!(
            "unexpected ping answer: {:?}",
            response
        )));
    }
    for (name, value) in response.headers() {
        println!("{}: {}", name, value);
    }
    println!("{}", String::from_utf8_lossy(response.body()));
    Ok(())
}
