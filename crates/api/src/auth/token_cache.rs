//! Shared token cache.
//!
//! Slots are keyed by `(user_id, device_id)` and hold the current access and
//! refresh token of one device. Request contexts that should share a slot
//! register under an ephemeral context id and resolve to the slot's key.
//! Context ids are scoped to the slot's user: the same id registered by two
//! users names two unrelated contexts, and one user can never resolve
//! another's.
//!
//! Lock order is contexts, then slots. Nothing acquires them the other way
//! round.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use gatekeeper_core::types::{DbId, Timestamp};
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedToken {
    pub token: String,
    pub expires_at: Timestamp,
}

impl CachedToken {
    /// Still usable `margin` from now.
    pub fn valid_for(&self, margin: Duration) -> bool {
        self.expires_at > Utc::now() + margin
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub user_id: DbId,
    pub device_id: String,
}

impl SlotKey {
    pub fn new(user_id: DbId, device_id: impl Into<String>) -> Self {
        Self {
            user_id,
            device_id: device_id.into(),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct Slot {
    access: Option<CachedToken>,
    refresh: Option<CachedToken>,
}

impl Slot {
    fn half(&mut self, kind: TokenKind) -> &mut Option<CachedToken> {
        match kind {
            TokenKind::Access => &mut self.access,
            TokenKind::Refresh => &mut self.refresh,
        }
    }

    fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none()
    }
}

#[derive(Default)]
pub struct TokenCache {
    slots: RwLock<HashMap<SlotKey, Slot>>,
    contexts: Mutex<HashMap<(DbId, String), SlotKey>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached token of `kind`, if present and unexpired.
    pub async fn get(&self, key: &SlotKey, kind: TokenKind) -> Option<CachedToken> {
        let slots = self.slots.read().await;
        let slot = slots.get(key)?;
        let token = match kind {
            TokenKind::Access => slot.access.as_ref(),
            TokenKind::Refresh => slot.refresh.as_ref(),
        }?;
        (token.expires_at > Utc::now()).then(|| token.clone())
    }

    pub async fn set(&self, key: &SlotKey, kind: TokenKind, token: CachedToken) {
        let mut slots = self.slots.write().await;
        *slots.entry(key.clone()).or_default().half(kind) = Some(token);
    }

    /// Replace an existing entry. Returns `false`, changing nothing, if the
    /// slot holds no token of `kind`.
    pub async fn update(&self, key: &SlotKey, kind: TokenKind, token: CachedToken) -> bool {
        let mut slots = self.slots.write().await;
        let Some(half) = slots.get_mut(key).map(|slot| slot.half(kind)) else {
            return false;
        };
        if half.is_none() {
            return false;
        }
        *half = Some(token);
        true
    }

    /// Drop one half of a slot.
    pub async fn remove(&self, key: &SlotKey, kind: TokenKind) {
        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.get_mut(key) {
            *slot.half(kind) = None;
            if slot.is_empty() {
                slots.remove(key);
            }
        }
    }

    /// Drop a slot and every context pointing at it.
    pub async fn remove_slot(&self, key: &SlotKey) {
        let mut contexts = self.contexts.lock().await;
        contexts.retain(|_, target| target != key);
        self.slots.write().await.remove(key);
    }

    /// Drop every slot and context of `user_id`.
    pub async fn remove_user(&self, user_id: DbId) {
        let mut contexts = self.contexts.lock().await;
        contexts.retain(|_, target| target.user_id != user_id);
        self.slots.write().await.retain(|key, _| key.user_id != user_id);
    }

    /// Point `context_id` of `key.user_id` at `key`.
    pub async fn register_context(&self, context_id: &str, key: SlotKey) {
        self.contexts
            .lock()
            .await
            .insert((key.user_id, context_id.to_string()), key);
    }

    pub async fn unregister_context(&self, user_id: DbId, context_id: &str) -> bool {
        self.contexts
            .lock()
            .await
            .remove(&(user_id, context_id.to_string()))
            .is_some()
    }

    pub async fn resolve_context(&self, user_id: DbId, context_id: &str) -> Option<SlotKey> {
        self.contexts
            .lock()
            .await
            .get(&(user_id, context_id.to_string()))
            .cloned()
    }

    /// Drop expired halves, empty slots, and contexts left pointing at
    /// nothing. Returns the number of slots removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut contexts = self.contexts.lock().await;
        let mut slots = self.slots.write().await;

        let before = slots.len();
        for slot in slots.values_mut() {
            if slot.access.as_ref().is_some_and(|t| t.expires_at <= now) {
                slot.access = None;
            }
            if slot.refresh.as_ref().is_some_and(|t| t.expires_at <= now) {
                slot.refresh = None;
            }
        }
        slots.retain(|_, slot| !slot.is_empty());
        contexts.retain(|_, key| slots.contains_key(key));
        before - slots.len()
    }
}
