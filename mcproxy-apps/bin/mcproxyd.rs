use anyhow::{anyhow, Context, Result};
use clap::{crate_version, App, Arg, ArgMatches};
use mcproxy::{
    init_counters, install_prometheus, ProxyConfig, RecorderSink, Server, TaskPool, YamlConfig,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};

#[macro_use]
extern crate log;

const DEFAULT_SHUTDOWN_TIMEOUT: &str = "30s";

#[tokio::main]
async fn main() -> Result<()> {
    let matches = get_matches();

    let config_path = matches
        .value_of("config")
        .ok_or_else(|| anyhow!("expect proxy config, use -h for help"))?;
    println!("Proxy config: {:?}", config_path);
    let mut config: ProxyConfig = YamlConfig::get(config_path).map_err(|e| anyhow!(e))?;
    if let Some(port) = matches.value_of("port") {
        let port = port
            .parse()
            .with_context(|| format!("bad listen port {}", port))?;
        config.set_listen_port(port);
    }
    let shutdown_timeout = humantime::parse_duration(
        matches
            .value_of("shutdown_timeout")
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT),
    )
    .context("bad shutdown timeout")?;

    init_logging(&config)?;

    let admin_address = config.admin_address().map_err(|e| anyhow!(e))?;
    install_prometheus(admin_address)?;
    init_counters();

    let tasks = TaskPool::new();
    let server = Server::from_config(config.clone(), Arc::new(RecorderSink), tasks.clone()).await?;
    let address = bind_all_interfaces(config.listen_port());
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("can't listen on {}", address))?;
    warn!("Start listening on: {:?}", address);

    tokio::select! {
        result = server.serve(listener) => result?,
        kind = shutdown_signal() => {
            let kind = kind?;
            info!("got {:?}, waiting for background work", kind);
            if !tasks.shutdown(shutdown_timeout).await {
                warn!("exiting with unfinished background work");
            }
        }
    }
    info!("mcproxyd stopped");
    Ok(())
}

fn init_logging(config: &ProxyConfig) -> Result<()> {
    match config.log_config() {
        Some(path) => log4rs::init_file(path, Default::default())
            .with_context(|| format!("can't init logging from {}", path)),
        None => env_logger::try_init().context("can't init logging"),
    }
}

async fn shutdown_signal() -> Result<SignalKind> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let kind = tokio::select! {
        _ = terminate.recv() => SignalKind::terminate(),
        _ = interrupt.recv() => SignalKind::interrupt(),
    };
    Ok(kind)
}

fn bind_all_interfaces(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port)
}

fn get_matches<'a>() -> ArgMatches<'a> {
    App::new("mcproxyd")
        .version(crate_version!())
        .about("memcached cluster proxy")
        .arg(
            Arg::with_name("config")
                .help("proxy config file")
                .takes_value(true)
                .required(true)
                .short("c")
                .long("config"),
        )
        .arg(
            Arg::with_name("port")
                .help("port to listen on, overrides the config")
                .takes_value(true)
                .short("p")
                .long("port"),
        )
        .arg(
            Arg::with_name("shutdown_timeout")
                .help("how long to wait for background work on shutdown")
                .takes_value(true)
                .long("shutdown-timeout")
                .default_value(DEFAULT_SHUTDOWN_TIMEOUT),
        )
        .get_matches()
}
