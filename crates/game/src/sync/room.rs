use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ConnectionId, PlayerId, RoomId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub name: String,
    pub connection: ConnectionId,
    pub connected: bool,
    #[serde(default)]
    pub config: Value,
}

impl PlayerRecord {
    pub fn new(id: PlayerId, name: impl Into<String>, connection: ConnectionId) -> Self {
        Self {
            id,
            name: name.into(),
            connection,
            connected: true,
            config: Value::Null,
        }
    }
}

/// Membership and authority for one room. `players` keeps join order, which
/// decides host succession.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub host: PlayerId,
    pub players: Vec<PlayerRecord>,
    pub rebalance_on_leave: bool,
}

impl Room {
    pub fn new(id: RoomId, host: PlayerRecord, rebalance_on_leave: bool) -> Self {
        Self {
            id,
            host: host.id,
            players: vec![host],
            rebalance_on_leave,
        }
    }

    pub fn player(&self, id: PlayerId) -> Option<&PlayerRecord> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_mut(&mut self, id: PlayerId) -> Option<&mut PlayerRecord> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    pub fn by_connection(&self, connection: ConnectionId) -> Option<&PlayerRecord> {
        self.players.iter().find(|p| p.connection == connection)
    }

    pub fn host_record(&self) -> Option<&PlayerRecord> {
        self.player(self.host)
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.player(id).is_some()
    }

    /// Adds or refreshes a member. Returns false when nothing changed.
    pub fn upsert(&mut self, record: PlayerRecord) -> bool {
        match self.player_mut(record.id) {
            Some(existing) if *existing == record => false,
            Some(existing) => {
                *existing = record;
                true
            }
            None => {
                self.players.push(record);
                true
            }
        }
    }

    /// Removes a member and, if it was the host, hands authority to the first
    /// remaining connected player. Returns the new host when it changed.
    pub fn remove_player(&mut self, id: PlayerId) -> Option<PlayerId> {
        let pos = self.players.iter().position(|p| p.id == id)?;
        self.players.remove(pos);
        if self.host != id {
            return None;
        }
        let next = self.successor()?;
        self.host = next;
        Some(next)
    }

    pub fn successor(&self) -> Option<PlayerId> {
        self.players
            .iter()
            .find(|p| p.connected && p.id != self.host)
            .map(|p| p.id)
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_succession_follows_join_order() {
        let mut room = Room::new(7, PlayerRecord::new(1, "a", 10), true);
        room.upsert(PlayerRecord::new(3, "c", 30));
        room.upsert(PlayerRecord::new(2, "b", 20));
        room.player_mut(3).unwrap().connected = false;

        assert_eq!(room.remove_player(1), Some(2));
        assert_eq!(room.host, 2);
        assert_eq!(room.remove_player(3), None);
        assert_eq!(room.host, 2);
    }

    #[test]
    fn upsert_reports_changes_only() {
        let mut room = Room::new(1, PlayerRecord::new(1, "a", 10), false);
        assert!(!room.upsert(PlayerRecord::new(1, "a", 10)));
        assert!(room.upsert(PlayerRecord::new(1, "a", 11)));
        assert_eq!(room.by_connection(11).map(|p| p.id), Some(1));
    }
}
