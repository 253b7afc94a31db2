//! Presence tracking: display metadata and cursors of other participants

use crate::operation::Operation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Display metadata a participant announces about itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    /// Color angle in degrees, 0 to 359
    pub hue: u32,
}

impl UserInfo {
    pub fn new(name: impl Into<String>, hue: u32) -> Self {
        Self {
            name: name.into(),
            hue: hue % 360,
        }
    }

    fn normalized(mut self) -> Self {
        self.hue %= 360;
        self
    }
}

/// Cursor positions and selections, in characters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorData {
    pub cursors: Vec<u32>,
    pub selections: Vec<(u32, u32)>,
}

impl CursorData {
    pub fn at(position: u32) -> Self {
        Self {
            cursors: vec![position],
            selections: Vec::new(),
        }
    }

    /// Move every position through an applied operation
    pub fn transform(&mut self, op: &Operation) {
        for cursor in &mut self.cursors {
            *cursor = op.transform_index(*cursor);
        }
        for (start, end) in &mut self.selections {
            *start = op.transform_index(*start);
            *end = op.transform_index(*end);
        }
    }
}

/// Everything known about one remote participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: u64,
    pub info: Option<UserInfo>,
    pub cursor: Option<CursorData>,
}

impl Participant {
    fn new(id: u64) -> Self {
        Self {
            id,
            info: None,
            cursor: None,
        }
    }
}

/// Last-write-wins table of participants keyed by connection id
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    participants: BTreeMap<u64, Participant>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a participant's display metadata
    pub fn update_info(&mut self, id: u64, info: UserInfo) {
        self.participants
            .entry(id)
            .or_insert_with(|| Participant::new(id))
            .info = Some(info.normalized());
    }

    /// Replace a participant's cursor data
    pub fn update_cursor(&mut self, id: u64, cursor: CursorData) {
        self.participants
            .entry(id)
            .or_insert_with(|| Participant::new(id))
            .cursor = Some(cursor);
    }

    /// Forget a participant, returning what was known about it
    pub fn remove(&mut self, id: u64) -> Option<Participant> {
        self.participants.remove(&id)
    }

    /// Keep every stored cursor anchored across an applied operation
    pub fn transform_cursors(&mut self, op: &Operation) {
        for cursor in self
            .participants
            .values_mut()
            .filter_map(|p| p.cursor.as_mut())
        {
            cursor.transform(op);
        }
    }

    pub fn get(&self, id: u64) -> Option<&Participant> {
        self.participants.get(&id)
    }

    /// All participants ordered by id
    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn clear(&mut self) {
        self.participants.clear();
    }
}
