//! Outbound state synchronization.
//!
//! Steady-state fields go out as minimal deltas against the last value
//! actually handed to the network, with a forced full resync on a fixed
//! period to heal anything lost on the way. One-off events travel on a
//! separate irregular lane that is never coalesced.

use shared::protocol::{IrregularEvent, Message, PlayerPayload};
use shared::ClientId;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Last value sent for every outbound field.
#[derive(Debug, Clone, Default)]
pub struct DirtyFieldSet {
    last_sent: PlayerPayload,
}

impl DirtyFieldSet {
    pub fn new(id: ClientId) -> Self {
        Self {
            last_sent: PlayerPayload::new(id),
        }
    }

    /// Payload holding only the fields of `current` that differ from what
    /// was last sent.
    pub fn diff(&self, current: &PlayerPayload) -> PlayerPayload {
        fn changed<T: Clone + PartialEq>(current: &Option<T>, sent: &Option<T>) -> Option<T> {
            match current {
                Some(value) if sent.as_ref() != Some(value) => Some(value.clone()),
                _ => None,
            }
        }
        let sent = &self.last_sent;
        PlayerPayload {
            id: current.id,
            name: changed(&current.name, &sent.name),
            pos: changed(&current.pos, &sent.pos),
            rot: changed(&current.rot, &sent.rot),
            flip: changed(&current.flip, &sent.flip),
            frame: changed(&current.frame, &sent.frame),
            score: changed(&current.score, &sent.score),
            powerup: changed(&current.powerup, &sent.powerup),
            colors: changed(&current.colors, &sent.colors),
            snowballs: changed(&current.snowballs, &sent.snowballs),
        }
    }

    pub fn dirty_fields(&self, current: &PlayerPayload) -> Vec<&'static str> {
        self.diff(current).field_names()
    }

    /// Records `sent` as delivered to the network.
    pub fn commit(&mut self, sent: &PlayerPayload) {
        self.last_sent.merge(sent);
    }

    /// Forgets everything sent so the next diff is complete.
    pub fn reset(&mut self) {
        self.last_sent = PlayerPayload::new(self.last_sent.id);
    }
}

/// Everything the simulation hands to the network each send period.
#[derive(Debug)]
pub struct OutboundSync {
    id: ClientId,
    fields: DirtyFieldSet,
    irregular: VecDeque<IrregularEvent>,
    resync_interval: Duration,
    last_full: Option<Instant>,
}

impl OutboundSync {
    pub fn new(id: ClientId, resync_interval: Duration) -> Self {
        Self {
            id,
            fields: DirtyFieldSet::new(id),
            irregular: VecDeque::new(),
            resync_interval,
            last_full: None,
        }
    }

    pub fn fields(&self) -> &DirtyFieldSet {
        &self.fields
    }

    pub fn queue_event(&mut self, event: IrregularEvent) {
        self.irregular.push_back(event);
    }

    pub fn pending_events(&self) -> usize {
        self.irregular.len()
    }

    fn resync_due(&self, now: Instant) -> bool {
        match self.last_full {
            Some(last) => now.duration_since(last) >= self.resync_interval,
            None => true,
        }
    }

    /// Builds this period's records: one state record (full when a resync is
    /// due, otherwise a delta, omitted when nothing changed) followed by every
    /// queued irregular event in order.
    pub fn collect(&mut self, current: &PlayerPayload, now: Instant) -> Vec<Message> {
        let mut messages = Vec::with_capacity(1 + self.irregular.len());

        let payload = if self.resync_due(now) {
            self.last_full = Some(now);
            Some(current.clone())
        } else {
            let delta = self.fields.diff(current);
            (!delta.is_empty_delta()).then_some(delta)
        };
        if let Some(payload) = payload {
            self.fields.commit(&payload);
            messages.push(Message::State(payload));
        }

        let id = self.id;
        messages.extend(
            self.irregular
                .drain(..)
                .map(|event| Message::Irregular { id, event }),
        );
        messages
    }

    /// Call when records could not be handed to the network; the next
    /// period sends everything again.
    pub fn force_resync(&mut self) {
        self.fields.reset();
        self.last_full = None;
    }
}
