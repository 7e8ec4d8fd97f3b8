// Rebalanced: distributed channel rebalancing daemon for a trusted mesh of
// Lightning Network nodes.
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

//! Channel-to-peer binding: which mesh peer owns the far side of each
//! watched channel, and the watch list of channels being polled.

use std::collections::{HashMap, HashSet};

use secp256k1::PublicKey;

use crate::registry::ChannelId;

/// `(channelId, remotePeer, remoteLnPubKey)` - at most one per channel id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelOwnership {
    pub channel_id: ChannelId,
    pub remote_peer: PublicKey,
    pub remote_ln_pub_key: String,
}

/// Tracks which mesh peer owns each watched channel, and the set of channels
/// under active polling. Both are replaced/pruned together so neither can
/// drift from the other.
#[derive(Default)]
pub struct OwnershipTable {
    by_channel: HashMap<ChannelId, ChannelOwnership>,
    watch_list: HashSet<ChannelId>,
}

impl OwnershipTable {
    pub fn new() -> Self {
        OwnershipTable { by_channel: HashMap::new(), watch_list: HashSet::new() }
    }

    /// Binds `channel_id` to `peer`, replacing any prior owner
    /// (last-writer-wins) and adding the channel to the watch list.
    pub fn bind(&mut self, channel_id: ChannelId, peer: PublicKey, remote_ln_pub_key: String) {
        self.watch_list.insert(channel_id.clone());
        self.by_channel.insert(
            channel_id.clone(),
            ChannelOwnership { channel_id, remote_peer: peer, remote_ln_pub_key },
        );
    }

    pub fn owner_of(&self, channel_id: &ChannelId) -> Option<&ChannelOwnership> {
        self.by_channel.get(channel_id)
    }

    pub fn is_watched(&self, channel_id: &ChannelId) -> bool {
        self.watch_list.contains(channel_id)
    }

    pub fn watched_channels(&self) -> impl Iterator<Item = &ChannelId> {
        self.watch_list.iter()
    }

    /// Drops `channel_id` from both the ownership table and the watch list,
    /// e.g. because a refresh no longer lists it.
    pub fn unwatch(&mut self, channel_id: &ChannelId) {
        self.watch_list.remove(channel_id);
        self.by_channel.remove(channel_id);
    }

    /// Removes every ownership record pointing at `peer`, and unwatches the
    /// channels that were owned solely by it. Called on session teardown.
    pub fn remove_peer(&mut self, peer: &PublicKey) {
        let stale: Vec<ChannelId> = self
            .by_channel
            .iter()
            .filter(|(_, rec)| &rec.remote_peer == peer)
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            self.unwatch(&id);
        }
    }
}
