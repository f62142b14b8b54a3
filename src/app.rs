use std::sync::Arc;

use anyhow::{Context, Result, bail};
use futures::StreamExt;
use reqwest::Url;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, error, info};

use crate::ari::client::AriClient;
use crate::ari::event::Event;
use crate::bouncer::BouncerClient;
use crate::call::controller::{CallController, CommandReceiver, command_channel};
use crate::config::Config;

type WsConn = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The connected application: the ARI event socket plus the dispatcher state.
pub struct App {
    config: Config,
    controller: CallController,
    commands: CommandReceiver,
    socket: WsConn,
}

impl App {
    /// Build the clients and open the event WebSocket. The bouncer client is
    /// constructed by the caller beforehand so its failure can exit with a
    /// distinct code.
    pub async fn connect(config: Config, screen: BouncerClient) -> Result<Self> {
        let ari = AriClient::new(&config.ast_host, &config.app_name, &config.credentials)?;

        let mut url =
            Url::parse(&format!("ws://{}", config.ast_host)).context("invalid AST_HOST")?;
        url.set_path("/ari/events");
        url.query_pairs_mut()
            .append_pair("api_key", &config.credentials)
            .append_pair("app", &config.app_name);

        info!(
            host = config.ast_host,
            app_name = config.app_name,
            "connecting to websocket"
        );
        let (socket, _) = connect_async(url.as_str())
            .await
            .context("websocket connection failed")?;
        info!("connected successfully");

        let (commands_tx, commands) = command_channel();
        let controller = CallController::new(Arc::new(ari), Arc::new(screen), commands_tx);

        Ok(Self {
            config,
            controller,
            commands,
            socket,
        })
    }

    /// Run the dispatch loop.
    ///
    /// One event or command is fully handled before the next is taken, so
    /// registry invariants only need to hold at handler boundaries. Returns
    /// an error when the event stream fails or closes.
    pub async fn serve(self) -> Result<()> {
        let App {
            config,
            mut controller,
            mut commands,
            mut socket,
        } = self;

        loop {
            tokio::select! {
                Some(command) = commands.recv() => {
                    controller.handle_command(command).await;
                }
                frame = socket.next() => {
                    let message = match frame {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => bail!("websocket read failed: {e}"),
                        None => bail!("websocket closed"),
                    };
                    let Message::Text(payload) = message else {
                        continue;
                    };
                    dispatch(&config, &mut controller, payload.as_str()).await;
                }
            }
        }
    }
}

async fn dispatch(config: &Config, controller: &mut CallController, payload: &str) {
    if config.debug {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(payload) {
            if let Ok(pretty) = serde_json::to_string_pretty(&value) {
                debug!("{pretty}");
            }
        }
    }

    match Event::decode(payload) {
        Ok(event) => controller.handle_event(event).await,
        Err(e) => error!("websocket message processing failed: {e}"),
    }
}
