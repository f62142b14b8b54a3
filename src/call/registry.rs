use std::collections::HashMap;

use super::{Call, Channel};

/// Arena key for a call. The channel and bridge indices resolve to this
/// instead of sharing ownership of the call itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(u64);

/// In-memory index of in-flight calls.
///
/// Calls live in an arena keyed by [`CallId`]; `by_channel` and `by_bridge`
/// map the opaque ARI resource IDs onto arena keys. All mutation happens on
/// the dispatcher context, so there is no locking here.
#[derive(Debug, Default)]
pub struct CallRegistry {
    calls: HashMap<CallId, Call>,
    by_channel: HashMap<String, CallId>,
    by_bridge: HashMap<String, CallId>,
    next_id: u64,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call, indexing every channel it holds and its bridge.
    pub fn insert(&mut self, call: Call) -> CallId {
        let id = CallId(self.next_id);
        self.next_id += 1;
        for chid in call.channels.keys() {
            self.by_channel.insert(chid.clone(), id);
        }
        if let Some(ref brid) = call.bridge {
            self.by_bridge.insert(brid.clone(), id);
        }
        self.calls.insert(id, call);
        id
    }

    pub fn find_by_channel(&self, chid: &str) -> Option<CallId> {
        self.by_channel.get(chid).copied()
    }

    pub fn find_by_bridge(&self, brid: &str) -> Option<CallId> {
        self.by_bridge.get(brid).copied()
    }

    pub fn get(&self, id: CallId) -> Option<&Call> {
        self.calls.get(&id)
    }

    pub fn get_mut(&mut self, id: CallId) -> Option<&mut Call> {
        self.calls.get_mut(&id)
    }

    /// Add or update a channel on a call. A channel currently homed on a
    /// different call is detached there first, so no channel ID ever resolves
    /// to two calls.
    pub fn attach_channel(&mut self, id: CallId, chid: String, channel: Channel) {
        if let Some(owner) = self.by_channel.get(&chid).copied() {
            if owner != id {
                self.detach_channel(&chid);
            }
        }
        let Some(call) = self.calls.get_mut(&id) else {
            return;
        };
        call.channels.insert(chid.clone(), channel);
        self.by_channel.insert(chid, id);
    }

    /// Remove a channel from its call and from the index. A call left with no
    /// channels is removed outright, along with its bridge index entry.
    pub fn detach_channel(&mut self, chid: &str) {
        let Some(id) = self.by_channel.remove(chid) else {
            return;
        };
        let Some(call) = self.calls.get_mut(&id) else {
            return;
        };
        call.channels.remove(chid);
        if call.channels.is_empty() {
            self.remove(id);
        }
    }

    /// Assign a bridge to a call and index it.
    pub fn bind_bridge(&mut self, id: CallId, brid: String) {
        let Some(call) = self.calls.get_mut(&id) else {
            return;
        };
        call.bridge = Some(brid.clone());
        self.by_bridge.insert(brid, id);
    }

    /// Drop a channel index entry without touching any call. Used when the
    /// index is found pointing at a call that no longer holds the channel.
    pub fn drop_channel_index(&mut self, chid: &str) {
        self.by_channel.remove(chid);
    }

    /// Drop a bridge index entry without touching any call.
    pub fn drop_bridge_index(&mut self, brid: &str) {
        self.by_bridge.remove(brid);
    }

    /// Remove a call and every index entry pointing at it.
    pub fn remove(&mut self, id: CallId) -> Option<Call> {
        let call = self.calls.remove(&id)?;
        for chid in call.channels.keys() {
            self.by_channel.remove(chid);
        }
        if let Some(ref brid) = call.bridge {
            self.by_bridge.remove(brid);
        }
        Some(call)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn calls(&self) -> impl Iterator<Item = (CallId, &Call)> {
        self.calls.iter().map(|(id, call)| (*id, call))
    }

    pub fn channel_index(&self) -> impl Iterator<Item = (&str, CallId)> {
        self.by_channel.iter().map(|(chid, id)| (chid.as_str(), *id))
    }

    pub fn bridge_index(&self) -> impl Iterator<Item = (&str, CallId)> {
        self.by_bridge.iter().map(|(brid, id)| (brid.as_str(), *id))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn two_leg_call(a: &str, b: &str) -> Call {
        Call {
            channels: HashMap::from([
                (a.to_string(), Channel { ringing: true, joined: false }),
                (b.to_string(), Channel::default()),
            ]),
            bridge: None,
        }
    }

    #[test]
    fn insert_indexes_channels_and_bridge() {
        let mut registry = CallRegistry::new();
        let mut call = two_leg_call("a", "b");
        call.bridge = Some("br".into());
        let id = registry.insert(call);

        assert_eq!(registry.find_by_channel("a"), Some(id));
        assert_eq!(registry.find_by_channel("b"), Some(id));
        assert_eq!(registry.find_by_bridge("br"), Some(id));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn detaching_last_channel_removes_the_call() {
        let mut registry = CallRegistry::new();
        let id = registry.insert(two_leg_call("a", "b"));

        registry.detach_channel("a");
        assert_eq!(registry.find_by_channel("a"), None);
        assert_eq!(registry.get(id).map(|c| c.channels.len()), Some(1));

        registry.detach_channel("b");
        assert!(registry.is_empty());
        assert_eq!(registry.find_by_channel("b"), None);
    }

    #[test]
    fn detaching_last_channel_drops_bridge_index_too() {
        let mut registry = CallRegistry::new();
        let id = registry.insert(Call {
            channels: HashMap::from([("a".to_string(), Channel::default())]),
            bridge: None,
        });
        registry.bind_bridge(id, "br".into());

        registry.detach_channel("a");
        assert!(registry.is_empty());
        assert_eq!(registry.find_by_bridge("br"), None);
    }

    #[test]
    fn attach_rehomes_a_channel_from_another_call() {
        let mut registry = CallRegistry::new();
        let first = registry.insert(two_leg_call("a", "b"));
        let second = registry.insert(two_leg_call("c", "d"));

        registry.attach_channel(second, "a".into(), Channel { ringing: false, joined: true });

        assert_eq!(registry.find_by_channel("a"), Some(second));
        assert!(!registry.get(first).unwrap().channels.contains_key("a"));
        assert!(registry.get(second).unwrap().channels["a"].joined);
    }

    #[test]
    fn attach_updates_flags_in_place() {
        let mut registry = CallRegistry::new();
        let id = registry.insert(two_leg_call("a", "b"));

        registry.attach_channel(id, "a".into(), Channel { ringing: false, joined: true });

        let call = registry.get(id).unwrap();
        assert_eq!(call.channels.len(), 2);
        assert!(call.channels["a"].joined);
        assert!(!call.channels["a"].ringing);
    }

    #[test]
    fn remove_clears_every_index_entry() {
        let mut registry = CallRegistry::new();
        let mut call = two_leg_call("a", "b");
        call.bridge = Some("br".into());
        let id = registry.insert(call);

        let removed = registry.remove(id).unwrap();
        assert_eq!(removed.channels.len(), 2);
        assert!(registry.is_empty());
        assert_eq!(registry.find_by_channel("a"), None);
        assert_eq!(registry.find_by_channel("b"), None);
        assert_eq!(registry.find_by_bridge("br"), None);
    }

    #[test]
    fn dropping_a_stale_index_leaves_the_call_alone() {
        let mut registry = CallRegistry::new();
        let id = registry.insert(two_leg_call("a", "b"));

        registry.drop_channel_index("a");
        assert_eq!(registry.find_by_channel("a"), None);
        assert_eq!(registry.get(id).map(|c| c.channels.len()), Some(2));
    }
}
