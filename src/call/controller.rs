use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::ari::client::{AriApi, AriError};
use crate::ari::event::{ChannelInfo, Event, EventKind, PlaybackInfo};
use crate::bouncer::{CallScreen, Verdict};

use super::registry::{CallId, CallRegistry};
use super::{Call, Channel};

/// Played to the caller when the call is denied by the screening service.
pub const REJECT_MEDIA: &str = "sound:/sounds/vouncer_reject";
/// Played to a still-ringing caller when the call collapses before answer.
pub const TIMEOUT_MEDIA: &str = "sound:/sounds/vouncer_timeout";

const PRE_ANSWER_RING: Duration = Duration::from_secs(2);
const PRE_PLAYBACK_PAUSE: Duration = Duration::from_secs(1);
const POST_PLAYBACK_DELAY: Duration = Duration::from_secs(1);

/// Requests sent back into the dispatcher by background audio tasks.
///
/// Registry mutation stays on the dispatcher context; a delayed teardown
/// re-resolves its channel when it fires, so a call already torn down by a
/// competing event is simply a lookup miss.
#[derive(Debug)]
pub enum Command {
    Teardown { channel_id: String },
}

pub type CommandSender = mpsc::UnboundedSender<Command>;
pub type CommandReceiver = mpsc::UnboundedReceiver<Command>;

pub fn command_channel() -> (CommandSender, CommandReceiver) {
    mpsc::unbounded_channel()
}

/// The event-driven call state machine.
///
/// Consumes decoded ARI events one at a time, keeps the registry consistent,
/// and issues control-plane actions. Every ARI action is best-effort: a
/// failure is logged and handling proceeds, except during join where any
/// failure tears the call down.
pub struct CallController {
    registry: CallRegistry,
    ari: Arc<dyn AriApi>,
    screen: Arc<dyn CallScreen>,
    commands: CommandSender,
}

impl CallController {
    pub fn new(ari: Arc<dyn AriApi>, screen: Arc<dyn CallScreen>, commands: CommandSender) -> Self {
        Self {
            registry: CallRegistry::new(),
            ari,
            screen,
            commands,
        }
    }

    pub fn registry(&self) -> &CallRegistry {
        &self.registry
    }

    pub async fn handle_event(&mut self, event: Event) {
        match event.kind {
            EventKind::StasisStart { channel } => self.on_stasis_start(channel).await,
            EventKind::StasisEnd { channel } | EventKind::ChannelHangupRequest { channel } => {
                self.on_channel_gone(&channel.id).await
            }
            EventKind::ChannelDestroyed { channel } => self.on_channel_destroyed(&channel.id).await,
            EventKind::ChannelEnteredBridge { bridge, channel } => {
                self.on_entered_bridge(&bridge.id, channel.id)
            }
            EventKind::ChannelLeftBridge { bridge, channel } => {
                self.on_left_bridge(&bridge.id, &channel.id)
            }
            EventKind::BridgeBlindTransfer {
                channel,
                replace_channel,
            } => self.on_blind_transfer(&channel.id, replace_channel.id),
            EventKind::BridgeDestroyed { bridge } => self.on_bridge_destroyed(&bridge.id).await,
            EventKind::PlaybackFinished { playback } => self.on_playback_finished(&playback),
            EventKind::Unknown => {}
        }
    }

    pub async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Teardown { channel_id } => {
                if let Some(id) = self.registry.find_by_channel(&channel_id) {
                    self.teardown(id).await;
                }
            }
        }
    }

    async fn on_stasis_start(&mut self, channel: ChannelInfo) {
        if channel.state == "Down" {
            return;
        }
        // The originator leg of an attended transfer never becomes part of a
        // call here.
        if channel.dialplan.context == "transfer" && channel.dialplan.exten == "_attended" {
            return;
        }

        if let Some(id) = self.registry.find_by_channel(&channel.id) {
            // The dialed leg entering the application: both legs are up.
            self.join_channels(id).await;
            return;
        }

        self.dial_far_end(channel).await;
    }

    async fn dial_far_end(&mut self, channel: ChannelInfo) {
        let endpoint = if !channel.accountcode.is_empty() {
            channel.accountcode.clone()
        } else {
            channel.caller.number.clone()
        };

        let verdict = match self.screen.authorize(&endpoint, &channel.dialplan.exten).await {
            Ok(verdict) => verdict,
            Err(e) => {
                error!(chid = channel.id, "unable to screen call: {e:#}");
                self.delete_channel(&channel.id).await;
                return;
            }
        };

        let (destination, caller_id) = match verdict {
            Verdict::Allow {
                destination,
                caller_id,
            } => (destination, caller_id),
            Verdict::Deny => {
                self.reject_call(channel.id);
                return;
            }
        };

        let params = vec![("callerId".to_string(), caller_id)];
        let variables = HashMap::from([("CDR_PROP(disable)".to_string(), "1".to_string())]);
        let dialed = match self.ari.channel_dial(&destination, &params, &variables).await {
            Ok(chid) => chid,
            Err(e) => {
                error!(chid = channel.id, "unable to dial far end: {e}");
                self.delete_channel(&channel.id).await;
                return;
            }
        };

        if let Err(e) = self
            .ari
            .channel_set_var(&channel.id, "CDR(userfield)", &destination)
            .await
        {
            warn!(chid = channel.id, "unable to set CDR(userfield): {e}");
        }
        if let Err(e) = self.ari.channel_ring(&channel.id, true).await {
            warn!(chid = channel.id, "unable to set channel ring: {e}");
        }

        let call = Call {
            channels: HashMap::from([
                (dialed, Channel::default()),
                (
                    channel.id,
                    Channel {
                        ringing: true,
                        joined: false,
                    },
                ),
            ]),
            bridge: None,
        };
        self.registry.insert(call);
    }

    /// Register a denied call and run the rejection audio against it. The
    /// eventual PlaybackFinished drives the actual teardown.
    fn reject_call(&mut self, chid: String) {
        let call = Call {
            channels: HashMap::from([(chid.clone(), Channel::default())]),
            bridge: None,
        };
        self.registry.insert(call);

        let ari = self.ari.clone();
        tokio::spawn(async move {
            let _ = ari.channel_ring(&chid, true).await;
            sleep(PRE_ANSWER_RING).await;
            let _ = ari.channel_ring(&chid, false).await;
            let _ = ari.channel_answer(&chid).await;
            sleep(PRE_PLAYBACK_PAUSE).await;
            info!(chid, "playing rejection message");
            let _ = ari.channel_play(&chid, REJECT_MEDIA).await;
        });
    }

    async fn join_channels(&mut self, id: CallId) {
        let bridge = match self.registry.get(id).and_then(|call| call.bridge.clone()) {
            Some(brid) => brid,
            None => match self.ari.bridge_create().await {
                Ok(brid) => {
                    self.registry.bind_bridge(id, brid.clone());
                    brid
                }
                Err(e) => {
                    error!("failed to create bridge: {e}");
                    return;
                }
            },
        };

        let pending: Vec<String> = self
            .registry
            .get(id)
            .map(|call| {
                call.channels
                    .iter()
                    .filter(|(_, channel)| !channel.joined)
                    .map(|(chid, _)| chid.clone())
                    .collect()
            })
            .unwrap_or_default();

        let mut failed = false;
        for chid in pending {
            let _ = self.ari.channel_ring(&chid, false).await;
            let _ = self.ari.channel_answer(&chid).await;
            if let Err(e) = self.ari.bridge_add_channel(&bridge, &chid).await {
                warn!(chid, bridge, "failed to add channel to bridge: {e}");
                failed = true;
            }
        }

        if failed {
            error!("failed to join channels, tearing down resources");
            self.teardown(id).await;
        }
    }

    async fn on_channel_gone(&mut self, chid: &str) {
        let Some(id) = self.registry.find_by_channel(chid) else {
            return;
        };
        let Some(call) = self.registry.get(id) else {
            return;
        };
        if !call.channels.contains_key(chid) {
            // Stale index entry, raced with ChannelDestroyed.
            self.registry.drop_channel_index(chid);
            return;
        }

        if call.channels.len() <= 2 {
            self.teardown(id).await;
        } else {
            // Multi-party call after a transfer: drop just this leg.
            self.registry.detach_channel(chid);
        }
    }

    async fn on_channel_destroyed(&mut self, chid: &str) {
        let Some(id) = self.registry.find_by_channel(chid) else {
            return;
        };
        self.registry.detach_channel(chid);
        if self
            .registry
            .get(id)
            .is_some_and(|call| call.channels.len() == 1)
        {
            self.teardown(id).await;
        }
    }

    fn on_entered_bridge(&mut self, brid: &str, chid: String) {
        let Some(id) = self.registry.find_by_bridge(brid) else {
            return;
        };
        self.registry.attach_channel(
            id,
            chid,
            Channel {
                ringing: false,
                joined: true,
            },
        );
    }

    fn on_left_bridge(&mut self, brid: &str, chid: &str) {
        if self.registry.find_by_bridge(brid).is_none() {
            return;
        }
        self.registry.detach_channel(chid);
    }

    fn on_blind_transfer(&mut self, chid: &str, replacement: String) {
        let Some(id) = self.registry.find_by_channel(chid) else {
            return;
        };
        info!(src = chid, dst = replacement, "call transfer initiated");
        self.registry.attach_channel(
            id,
            replacement,
            Channel {
                ringing: false,
                joined: true,
            },
        );
        self.registry.detach_channel(chid);
    }

    async fn on_bridge_destroyed(&mut self, brid: &str) {
        if let Some(id) = self.registry.find_by_bridge(brid) {
            self.teardown(id).await;
        }
        self.registry.drop_bridge_index(brid);
    }

    fn on_playback_finished(&mut self, playback: &PlaybackInfo) {
        let chid = playback
            .target_uri
            .strip_prefix("channel:")
            .unwrap_or(&playback.target_uri);
        if self.registry.find_by_channel(chid).is_none() {
            warn!(chid, "playback finished on unknown channel");
            return;
        }
        if playback.media_uri != REJECT_MEDIA && playback.media_uri != TIMEOUT_MEDIA {
            return;
        }

        let commands = self.commands.clone();
        let chid = chid.to_string();
        tokio::spawn(async move {
            sleep(POST_PLAYBACK_DELAY).await;
            let _ = commands.send(Command::Teardown { channel_id: chid });
        });
    }

    /// Release every resource a call holds.
    ///
    /// Channels still ringing get the timeout announcement first; their
    /// teardown resumes when PlaybackFinished comes back for them, at which
    /// point the cleared flag routes them through the deleting branch.
    async fn teardown(&mut self, id: CallId) {
        let Some(call) = self.registry.get(id) else {
            return;
        };
        let channels: Vec<(String, bool)> = call
            .channels
            .iter()
            .map(|(chid, channel)| (chid.clone(), channel.ringing))
            .collect();
        let bridge = call.bridge.clone();

        for (chid, ringing) in channels {
            if ringing {
                if let Some(channel) = self
                    .registry
                    .get_mut(id)
                    .and_then(|call| call.channels.get_mut(&chid))
                {
                    channel.ringing = false;
                }
                let ari = self.ari.clone();
                tokio::spawn(async move {
                    let _ = ari.channel_answer(&chid).await;
                    sleep(PRE_PLAYBACK_PAUSE).await;
                    info!(chid, "playing timeout message");
                    let _ = ari.channel_play(&chid, TIMEOUT_MEDIA).await;
                });
            } else {
                info!(chid, "deleting channel");
                self.delete_channel(&chid).await;
                self.registry.detach_channel(&chid);
            }
        }

        if let Some(brid) = bridge {
            match self.ari.bridge_delete(&brid).await {
                Ok(()) | Err(AriError::NotFound) => {}
                Err(e) => warn!(brid, "failed to delete bridge: {e}"),
            }
        }
    }

    async fn delete_channel(&self, chid: &str) {
        match self.ari.channel_delete(chid).await {
            Ok(()) | Err(AriError::NotFound) => {}
            Err(e) => error!(chid, "failed to delete channel: {e}"),
        }
    }
}
