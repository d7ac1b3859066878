//! In-memory adapters for every external port. The integration tests and the
//! demo tool run the whole lifecycle against these.

use crate::errors::PortError;
use crate::ports::{
    AccountAllocator, ChannelProvisioner, MessageHandle, Notice, Notifier, Persistence,
    PresenceOracle, Target,
};
use async_trait::async_trait;
use duel_core::{ChannelId, CredentialId, MatchId, PlayerId};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

/// Document store backed by nested maps; `get_last` rides on `BTreeMap`
/// ordering.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, BTreeMap<u64, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn get(&self, collection: &str, id: u64) -> Result<Value, PortError> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .and_then(|c| c.get(&id))
            .cloned()
            .ok_or(PortError::NotFound)
    }

    async fn set(&self, collection: &str, id: u64, doc: Value) -> Result<(), PortError> {
        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .insert(id, doc);
        Ok(())
    }

    async fn get_last(&self, collection: &str) -> Result<Option<Value>, PortError> {
        Ok(self
            .collections
            .lock()
            .unwrap()
            .get(collection)
            .and_then(|c| c.last_key_value())
            .map(|(_, doc)| doc.clone()))
    }

    async fn delete(&self, collection: &str, id: u64) -> Result<(), PortError> {
        let removed = self
            .collections
            .lock()
            .unwrap()
            .get_mut(collection)
            .and_then(|c| c.remove(&id));
        match removed {
            Some(_) => Ok(()),
            None => Err(PortError::NotFound),
        }
    }
}

/// Records every delivery so tests can assert on notification traffic.
/// Targets added via [`block`](Self::block) refuse delivery permanently.
#[derive(Default)]
pub struct RecordingNotifier {
    next_handle: AtomicU64,
    blocked: Mutex<HashSet<PlayerId>>,
    sent: Mutex<Vec<(MessageHandle, Target, Notice)>>,
    edits: Mutex<Vec<(MessageHandle, Notice)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make DMs to this player fail with `Forbidden`.
    pub fn block(&self, player: PlayerId) {
        self.blocked.lock().unwrap().insert(player);
    }

    pub fn sent(&self) -> Vec<(Target, Notice)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, t, n)| (*t, n.clone()))
            .collect()
    }

    pub fn edits(&self) -> Vec<Notice> {
        self.edits.lock().unwrap().iter().map(|(_, n)| n.clone()).collect()
    }

    /// Deliveries to `target` matching `pred`.
    pub fn count_to(&self, target: Target, pred: impl Fn(&Notice) -> bool) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, t, n)| *t == target && pred(n))
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, target: Target, notice: Notice) -> Result<MessageHandle, PortError> {
        if let Target::Player(player) = target {
            if self.blocked.lock().unwrap().contains(&player) {
                return Err(PortError::Forbidden);
            }
        }
        let handle = MessageHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.sent.lock().unwrap().push((handle, target, notice));
        Ok(handle)
    }

    async fn edit(&self, handle: MessageHandle, notice: Notice) -> Result<(), PortError> {
        let known = self
            .sent
            .lock()
            .unwrap()
            .iter()
            .any(|(h, _, _)| *h == handle);
        if !known {
            return Err(PortError::NotFound);
        }
        self.edits.lock().unwrap().push((handle, notice));
        Ok(())
    }
}

/// Fixed pool of shared credentials handed out first-come, first-served.
pub struct MemoryAllocator {
    pool: Mutex<Vec<CredentialId>>,
}

impl MemoryAllocator {
    pub fn new(capacity: u64) -> Self {
        Self {
            pool: Mutex::new((1..=capacity).map(CredentialId).collect()),
        }
    }

    pub fn available(&self) -> usize {
        self.pool.lock().unwrap().len()
    }
}

#[async_trait]
impl AccountAllocator for MemoryAllocator {
    async fn pick(&self, _player: PlayerId) -> Option<CredentialId> {
        self.pool.lock().unwrap().pop()
    }

    async fn release(&self, credential: CredentialId) {
        self.pool.lock().unwrap().push(credential);
    }
}

struct Room {
    visible: HashSet<PlayerId>,
    occupants: HashSet<PlayerId>,
    public: bool,
}

/// Channel provisioner keeping rooms as plain sets. `fail_next_creates`
/// injects transient provisioning failures.
#[derive(Default)]
pub struct MemoryChannels {
    next_id: AtomicU64,
    rooms: Mutex<HashMap<ChannelId, Room>>,
    fail_creates: AtomicU32,
}

impl MemoryChannels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` create calls fail with `Unavailable`.
    pub fn fail_next_creates(&self, n: u32) {
        self.fail_creates.store(n, Ordering::Relaxed);
    }

    pub fn exists(&self, channel: ChannelId) -> bool {
        self.rooms.lock().unwrap().contains_key(&channel)
    }

    pub fn is_visible(&self, channel: ChannelId, player: PlayerId) -> bool {
        self.rooms
            .lock()
            .unwrap()
            .get(&channel)
            .map(|r| r.visible.contains(&player))
            .unwrap_or(false)
    }

    pub fn is_public(&self, channel: ChannelId) -> bool {
        self.rooms
            .lock()
            .unwrap()
            .get(&channel)
            .map(|r| r.public)
            .unwrap_or(false)
    }

    pub fn occupants(&self, channel: ChannelId) -> Vec<PlayerId> {
        self.rooms
            .lock()
            .unwrap()
            .get(&channel)
            .map(|r| r.occupants.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop a player into a voice room, as if they connected themselves.
    pub fn enter(&self, channel: ChannelId, player: PlayerId) {
        if let Some(room) = self.rooms.lock().unwrap().get_mut(&channel) {
            room.occupants.insert(player);
        }
    }
}

#[async_trait]
impl ChannelProvisioner for MemoryChannels {
    async fn create_match_channels(
        &self,
        _match_id: MatchId,
    ) -> Result<(ChannelId, ChannelId), PortError> {
        let pending = self.fail_creates.load(Ordering::Relaxed);
        if pending > 0 {
            self.fail_creates.store(pending - 1, Ordering::Relaxed);
            return Err(PortError::Unavailable("channel backend down".into()));
        }
        let text = ChannelId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let voice = ChannelId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut rooms = self.rooms.lock().unwrap();
        for id in [text, voice] {
            rooms.insert(
                id,
                Room {
                    visible: HashSet::new(),
                    occupants: HashSet::new(),
                    public: true,
                },
            );
        }
        Ok((text, voice))
    }

    async fn set_visibility(
        &self,
        channel: ChannelId,
        player: PlayerId,
        visible: bool,
    ) -> Result<(), PortError> {
        let mut rooms = self.rooms.lock().unwrap();
        let room = rooms.get_mut(&channel).ok_or(PortError::NotFound)?;
        if visible {
            room.visible.insert(player);
        } else {
            room.visible.remove(&player);
        }
        Ok(())
    }

    async fn set_public(&self, channel: ChannelId, public: bool) -> Result<(), PortError> {
        let mut rooms = self.rooms.lock().unwrap();
        let room = rooms.get_mut(&channel).ok_or(PortError::NotFound)?;
        room.public = public;
        Ok(())
    }

    async fn evict_except(
        &self,
        channel: ChannelId,
        allowed: &[PlayerId],
    ) -> Result<(), PortError> {
        let mut rooms = self.rooms.lock().unwrap();
        let room = rooms.get_mut(&channel).ok_or(PortError::NotFound)?;
        room.occupants.retain(|p| allowed.contains(p));
        Ok(())
    }

    async fn delete(&self, channel: ChannelId) -> Result<(), PortError> {
        match self.rooms.lock().unwrap().remove(&channel) {
            Some(_) => Ok(()),
            None => Err(PortError::NotFound),
        }
    }
}

/// Presence oracle with a settable online set.
#[derive(Default)]
pub struct MemoryPresence {
    online: Mutex<HashSet<PlayerId>>,
}

impl MemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&self, player: PlayerId, online: bool) {
        let mut set = self.online.lock().unwrap();
        if online {
            set.insert(player);
        } else {
            set.remove(&player);
        }
    }
}

#[async_trait]
impl PresenceOracle for MemoryPresence {
    async fn is_online(&self, player: PlayerId) -> bool {
        self.online.lock().unwrap().contains(&player)
    }
}
