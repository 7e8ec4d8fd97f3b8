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

//! The channel registry: a whole-cache view of the local LN channels,
//! rebuilt in full on every refresh. No entity survives a refresh by
//! identity - callers must re-read after crossing an `await` point.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ln::ChannelInfo;

/// Opaque LN channel identifier.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, From)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        ChannelId(s.to_owned())
    }
}

impl AsRef<str> for ChannelId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A single channel's cached view. Invariant: `local_balance +
/// remote_balance <= capacity`, enforced by the collaborator and trusted
/// (not re-derived) here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelView {
    pub id: ChannelId,
    pub local_pub_key: String,
    pub remote_pub_key: String,
    pub local_balance: u64,
    pub remote_balance: u64,
    pub capacity: u64,
    pub is_active: bool,
    pub is_opening: bool,
    pub is_closing: bool,
    pub is_private: bool,
}

impl From<ChannelInfo> for ChannelView {
    fn from(info: ChannelInfo) -> Self {
        ChannelView {
            id: info.id,
            local_pub_key: String::new(),
            remote_pub_key: info.partner_public_key,
            local_balance: info.local_balance,
            remote_balance: info.remote_balance,
            capacity: info.capacity,
            is_active: info.is_active,
            is_opening: info.is_opening,
            is_closing: info.is_closing,
            is_private: info.is_private,
        }
    }
}

/// The cached channel view, keyed by channel id. Replaced wholesale on each
/// [`ChannelRegistry::refresh`] - never patched incrementally.
#[derive(Clone, Debug, Default)]
pub struct ChannelRegistry {
    channels: HashMap<ChannelId, ChannelView>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        ChannelRegistry { channels: HashMap::new() }
    }

    /// Replaces the cached view in full from a freshly fetched channel list.
    pub fn replace(&mut self, local_pub_key: &str, channels: Vec<ChannelInfo>) {
        let mut next = HashMap::with_capacity(channels.len());
        for info in channels {
            let mut view = ChannelView::from(info);
            view.local_pub_key = local_pub_key.to_owned();
            next.insert(view.id.clone(), view);
        }
        self.channels = next;
    }

    pub fn get(&self, id: &ChannelId) -> Option<&ChannelView> {
        self.channels.get(id)
    }

    pub fn contains(&self, id: &ChannelId) -> bool {
        self.channels.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelView> {
        self.channels.values()
    }

    /// Channels whose remote LN pubkey matches `remote_pub_key`, used by the
    /// ownership binding step on `hello`.
    pub fn owned_by_remote<'a>(
        &'a self,
        remote_pub_key: &'a str,
    ) -> impl Iterator<Item = &'a ChannelView> + 'a {
        self.iter().filter(move |c| c.remote_pub_key == remote_pub_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chan(id: &str, remote: &str) -> ChannelInfo {
        ChannelInfo {
            id: ChannelId::from(id),
            partner_public_key: remote.to_owned(),
            local_balance: 100,
            remote_balance: 900,
            capacity: 1_000,
            is_active: true,
            is_opening: false,
            is_closing: false,
            is_private: false,
        }
    }

    #[test]
    fn replace_drops_stale_entries() {
        let mut reg = ChannelRegistry::new();
        reg.replace("local", vec![chan("c1", "remote")]);
        assert!(reg.contains(&ChannelId::from("c1")));
        reg.replace("local", vec![chan("c2", "remote")]);
        assert!(!reg.contains(&ChannelId::from("c1")));
        assert!(reg.contains(&ChannelId::from("c2")));
    }

    #[test]
    fn owned_by_remote_filters() {
        let mut reg = ChannelRegistry::new();
        reg.replace("local", vec![chan("c1", "alice"), chan("c2", "bob")]);
        let owned: Vec<_> = reg.owned_by_remote("alice").map(|c| c.id.clone()).collect();
        assert_eq!(owned, vec![ChannelId::from("c1")]);
    }
}
