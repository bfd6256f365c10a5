//! Online player roster.
//!
//! Joins and leaves arrive on separate topics, so a leave can be delivered
//! before the join it follows. Presence is kept as a per-player balance of
//! joins minus leaves, which makes the result independent of that ordering.

use std::collections::HashMap;

use crate::events::Player;

#[derive(Debug, Clone, Default)]
struct RosterEntry {
    name: Option<String>,
    balance: i32,
}

#[derive(Debug, Clone, Default)]
pub struct PlayerRoster {
    entries: HashMap<String, RosterEntry>,
}

impl PlayerRoster {
    /// Record a join. Returns whether the player came online.
    pub fn join(&mut self, player: Player) -> bool {
        let entry = self.entries.entry(player.id).or_default();
        let was_online = entry.balance > 0;
        entry.balance += 1;
        entry.name = Some(player.name);
        !was_online && entry.balance > 0
    }

    /// Record a leave. Returns whether the player went offline.
    pub fn leave(&mut self, player_id: &str) -> bool {
        let entry = self.entries.entry(player_id.to_string()).or_default();
        let was_online = entry.balance > 0;
        entry.balance -= 1;
        let went_offline = was_online && entry.balance <= 0;
        if entry.balance == 0 {
            self.entries.remove(player_id);
        }
        went_offline
    }

    pub fn is_online(&self, player_id: &str) -> bool {
        self.entries
            .get(player_id)
            .is_some_and(|entry| entry.balance > 0)
    }

    /// Players currently online, ordered by name.
    pub fn online(&self) -> Vec<Player> {
        let mut players: Vec<Player> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.balance > 0)
            .filter_map(|(id, entry)| {
                entry.name.as_ref().map(|name| Player {
                    id: id.clone(),
                    name: name.clone(),
                })
            })
            .collect();
        players.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        players
    }

    pub fn online_count(&self) -> usize {
        self.entries.values().filter(|entry| entry.balance > 0).count()
    }

    /// Returns whether anyone was online.
    pub fn clear(&mut self) -> bool {
        let had_players = self.online_count() > 0;
        self.entries.clear();
        had_players
    }
}
