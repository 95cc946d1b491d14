use framesync::{PlayerId, SessionEvent};

/// Session event as seen by one peer of the cluster.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    Session { peer: PlayerId, event: SessionEvent },
    Error { peer: PlayerId, message: String },
}

impl NodeEvent {
    pub fn log(&self) {
        match self {
            NodeEvent::Session { peer, event } => match event {
                SessionEvent::Joined { room, frame } => {
                    log::info!("[{peer}] joined room {room} at frame {frame}")
                }
                SessionEvent::PlayerAdmitted { player, frame } => {
                    log::info!("[{peer}] player {player} admitted at frame {frame}")
                }
                SessionEvent::PlayerLeaving { player, last_frame } => {
                    log::info!("[{peer}] player {player} leaves after frame {last_frame}")
                }
                SessionEvent::PlayerDeparted { player, frame } => {
                    log::info!("[{peer}] player {player} removed at frame {frame}")
                }
                SessionEvent::HostChanged { host } => log::warn!("[{peer}] host is now {host}"),
                SessionEvent::RoomClosed { room } => log::warn!("[{peer}] room {room} closed"),
                SessionEvent::Reconnected { player } => {
                    log::info!("[{peer}] player {player} reconnected")
                }
                SessionEvent::Chat { player, text } => log::info!("[{peer}] <{player}> {text}"),
                SessionEvent::RoomUpdated(room) => log::debug!("[{peer}] room {room} updated"),
            },
            NodeEvent::Error { peer, message } => log::error!("[{peer}] {message}"),
        }
    }
}
