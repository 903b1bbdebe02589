use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use dhcp_core::config::cli::Parser as _;
use dhcp_core::config::{cli, trace};
use dhcp_core::dhcproto::v4::Message;
use dhcp_core::dhcproto::{Decodable, Decoder, Encodable};
use dhcp_core::handler::Handler;
use dhcp_core::janitor::{self, Janitor};
use dhcp_core::store::KubeGateway;
use external_api::ExternalApi;
use tokio::net::UdpSocket;
use tokio::runtime::Builder;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

mod startup_health;
use startup_health::verify_background_task_running;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    let config =
        dhcp_core::config::FileConfig::load(&args.config_path).context("loading config.yaml")?;
    trace::init(&config.log.level, &config.log.format)?;
    debug!(?config, "parsed config");

    let rt = Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(async move {
        match tokio::spawn(start(config)).await {
            Err(err) => {
                error!(?err, "server task panicked");
                std::process::exit(1);
            }
            Ok(Err(err)) => {
                error!(?err, "server exited with error");
                std::process::exit(1);
            }
            Ok(Ok(())) => debug!("exiting"),
        }
    });
    Ok(())
}

async fn start(config: dhcp_core::config::FileConfig) -> Result<()> {
    info!(
        dhcp_port = config.dhcp_port,
        pxe_port = config.pxe_port,
        "starting"
    );

    let server_identity: Option<Ipv4Addr> = config
        .server_identity
        .as_deref()
        .map(|s| s.parse())
        .transpose()
        .context("parsing serverIdentity")?;

    let store = Arc::new(
        KubeGateway::connect()
            .await
            .map_err(|err| anyhow!("connecting to store: {err}"))?,
    );
    let lock = Arc::new(Mutex::new(()));

    let handler = Arc::new(Handler::new(store.clone(), lock.clone(), server_identity));
    let janitor = Arc::new(Janitor::new(store.clone(), lock.clone()));

    let token = CancellationToken::new();

    // holds the PXE/metrics server alive; aborted on drop at the end of
    // this function
    let _api_guard = ExternalApi::new(
        SocketAddr::from(([0, 0, 0, 0], config.pxe_port)),
        store.clone(),
    )
    .serve();

    let socket = Arc::new(
        UdpSocket::bind(("0.0.0.0", config.dhcp_port))
            .await
            .with_context(|| format!("binding UDP port {}", config.dhcp_port))?,
    );
    socket.set_broadcast(true)?;

    let mut dhcp_task = tokio::spawn(recv_loop(socket, handler, token.clone()));
    let mut janitor_task = tokio::spawn(janitor.run(janitor::DEFAULT_INTERVAL, token.clone()));

    verify_background_task_running("janitor", &mut janitor_task)
        .await
        .context("startup check failed")?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            token.cancel();
        }
        res = &mut dhcp_task => {
            token.cancel();
            return flatten_join(res).context("UDP receive loop exited");
        }
    }

    let _ = dhcp_task.await;
    let _ = janitor_task.await;
    Ok(())
}

fn flatten_join<T>(res: std::result::Result<T, tokio::task::JoinError>) -> Result<T> {
    res.map_err(|err| anyhow!(err))
}

/// single persistent receive task: decode each datagram, dispatch to
/// the Handler, encode and send the reply back to the peer address
async fn recv_loop<S: dhcp_core::store::LeaseStore>(
    socket: Arc<UdpSocket>,
    handler: Arc<Handler<S>>,
    token: CancellationToken,
) -> Result<()> {
    let mut buf = vec![0u8; 1500];
    loop {
        let (len, peer) = tokio::select! {
            res = socket.recv_from(&mut buf) => res.context("UDP recv_from failed")?,
            _ = token.cancelled() => {
                info!("UDP receive loop shutting down");
                return Ok(());
            }
        };

        let mut decoder = Decoder::new(&buf[..len]);
        let req = match Message::decode(&mut decoder) {
            Ok(req) => req,
            Err(err) => {
                warn!(%err, %peer, "dropping undecodable datagram");
                continue;
            }
        };

        let handler = handler.clone();
        let socket = socket.clone();
        tokio::spawn(async move {
            if let Some(resp) = handler.handle(&req).await {
                match resp.to_vec() {
                    Ok(bytes) => {
                        if let Err(err) = socket.send_to(&bytes, peer).await {
                            error!(%err, %peer, "failed to send reply");
                        }
                    }
                    Err(err) => error!(%err, "failed to encode reply"),
                }
            }
        });
    }
}
