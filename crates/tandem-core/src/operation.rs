//! Operations over plain text and their algebra
//!
//! An [`Operation`] walks a document left to right as a sequence of
//! retain/insert/delete components. All lengths count `char`s, not bytes.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::ops::Range;

/// A single step of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Component {
    /// Keep the next `n` characters
    Retain(usize),
    /// Insert text at the current position
    Insert(String),
    /// Remove the next `n` characters
    Delete(usize),
}

/// A normalized sequence of components, well-formed against documents of
/// exactly `base_len` characters
///
/// Adjacent components of the same kind are always merged and an insert is
/// always placed ahead of a delete it touches, so two operations with the same
/// effect built through the builder compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<WireComponent>", into = "Vec<WireComponent>")]
pub struct Operation {
    components: Vec<Component>,
    base_len: usize,
    target_len: usize,
}

impl Operation {
    /// Create an empty operation (the identity on the empty document)
    pub fn new() -> Self {
        Self::default()
    }

    /// The identity operation on a document of `len` characters
    pub fn identity(len: usize) -> Self {
        let mut op = Self::new();
        op.retain(len);
        op
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Length of the document this operation applies to
    pub fn base_len(&self) -> usize {
        self.base_len
    }

    /// Length of the document this operation produces
    pub fn target_len(&self) -> usize {
        self.target_len
    }

    /// True if applying this operation leaves any document unchanged
    pub fn is_noop(&self) -> bool {
        self.components
            .iter()
            .all(|c| matches!(c, Component::Retain(_)))
    }

    /// Skip over `n` characters
    pub fn retain(&mut self, n: usize) -> &mut Self {
        if n == 0 {
            return self;
        }
        self.base_len += n;
        self.target_len += n;

        if let Some(Component::Retain(last)) = self.components.last_mut() {
            *last += n;
        } else {
            self.components.push(Component::Retain(n));
        }
        self
    }

    /// Insert `text` at the current position
    pub fn insert(&mut self, text: &str) -> &mut Self {
        if text.is_empty() {
            return self;
        }
        self.target_len += text.chars().count();

        // Inserts go ahead of a trailing delete
        let slot = match self.components.last() {
            Some(Component::Delete(_)) => self.components.len() - 1,
            _ => self.components.len(),
        };

        if slot > 0 {
            if let Component::Insert(prev) = &mut self.components[slot - 1] {
                prev.push_str(text);
                return self;
            }
        }

        self.components.insert(slot, Component::Insert(text.to_owned()));
        self
    }

    /// Delete the next `n` characters
    pub fn delete(&mut self, n: usize) -> &mut Self {
        if n == 0 {
            return self;
        }
        self.base_len += n;

        if let Some(Component::Delete(last)) = self.components.last_mut() {
            *last += n;
        } else {
            self.components.push(Component::Delete(n));
        }
        self
    }

    /// Apply this operation to `text`
    ///
    /// Fails with [`Error::LengthMismatch`] unless `text` is exactly
    /// `base_len` characters long.
    pub fn apply(&self, text: &str) -> Result<String> {
        let actual = text.chars().count();
        if actual != self.base_len {
            return Err(Error::LengthMismatch {
                expected: self.base_len,
                actual,
            });
        }

        let mut out = String::with_capacity(text.len());
        let mut chars = text.chars();

        for component in &self.components {
            match component {
                Component::Retain(n) => out.extend(chars.by_ref().take(*n)),
                Component::Insert(s) => out.push_str(s),
                Component::Delete(n) => chars.by_ref().take(*n).for_each(drop),
            }
        }

        Ok(out)
    }

    /// The operation that undoes `self` on the document it produces from `text`
    pub fn invert(&self, text: &str) -> Result<Operation> {
        let actual = text.chars().count();
        if actual != self.base_len {
            return Err(Error::LengthMismatch {
                expected: self.base_len,
                actual,
            });
        }

        let mut inverse = Operation::new();
        let mut chars = text.chars();

        for component in &self.components {
            match component {
                Component::Retain(n) => {
                    inverse.retain(*n);
                    chars.by_ref().take(*n).for_each(drop);
                }
                Component::Insert(s) => {
                    inverse.delete(s.chars().count());
                }
                Component::Delete(n) => {
                    let removed: String = chars.by_ref().take(*n).collect();
                    inverse.insert(&removed);
                }
            }
        }

        Ok(inverse)
    }

    /// Combine `self` followed by `next` into a single operation
    ///
    /// `next` must be well-formed against the output of `self`.
    pub fn compose(&self, next: &Operation) -> Result<Operation> {
        if self.target_len != next.base_len {
            return Err(Error::LengthMismatch {
                expected: self.target_len,
                actual: next.base_len,
            });
        }

        let mut composed = Operation::new();
        let mut first = self.components.iter().cloned();
        let mut second = next.components.iter().cloned();
        let mut a = first.next();
        let mut b = second.next();

        loop {
            match (a.take(), b.take()) {
                (None, None) => break,
                (Some(Component::Delete(n)), rest) => {
                    composed.delete(n);
                    a = first.next();
                    b = rest;
                }
                (rest, Some(Component::Insert(s))) => {
                    composed.insert(&s);
                    a = rest;
                    b = second.next();
                }
                (None, _) | (_, None) => {
                    return Err(Error::MalformedOperation(
                        "component lengths do not line up".into(),
                    ));
                }
                (Some(Component::Retain(i)), Some(Component::Retain(j))) => {
                    let n = i.min(j);
                    composed.retain(n);
                    a = remainder(i - n, Component::Retain, &mut first);
                    b = remainder(j - n, Component::Retain, &mut second);
                }
                (Some(Component::Retain(i)), Some(Component::Delete(j))) => {
                    let n = i.min(j);
                    composed.delete(n);
                    a = remainder(i - n, Component::Retain, &mut first);
                    b = remainder(j - n, Component::Delete, &mut second);
                }
                (Some(Component::Insert(s)), Some(Component::Retain(j))) => {
                    let len = s.chars().count();
                    match len.cmp(&j) {
                        Ordering::Less | Ordering::Equal => {
                            composed.insert(&s);
                            a = first.next();
                            b = remainder(j - len, Component::Retain, &mut second);
                        }
                        Ordering::Greater => {
                            let (head, tail) = split_chars(&s, j);
                            composed.insert(head);
                            a = Some(Component::Insert(tail.to_owned()));
                            b = second.next();
                        }
                    }
                }
                (Some(Component::Insert(s)), Some(Component::Delete(j))) => {
                    // Inserted then deleted again: neither survives
                    let len = s.chars().count();
                    match len.cmp(&j) {
                        Ordering::Less | Ordering::Equal => {
                            a = first.next();
                            b = remainder(j - len, Component::Delete, &mut second);
                        }
                        Ordering::Greater => {
                            let (_, tail) = split_chars(&s, j);
                            a = Some(Component::Insert(tail.to_owned()));
                            b = second.next();
                        }
                    }
                }
            }
        }

        Ok(composed)
    }

    /// Transform two concurrent operations against each other
    ///
    /// Returns `(self', other')` such that applying `self` then `other'`
    /// gives the same document as applying `other` then `self'`. When both
    /// insert at the same position, `self`'s text ends up first.
    pub fn transform(&self, other: &Operation) -> Result<(Operation, Operation)> {
        if self.base_len != other.base_len {
            return Err(Error::LengthMismatch {
                expected: self.base_len,
                actual: other.base_len,
            });
        }

        let mut left_prime = Operation::new();
        let mut right_prime = Operation::new();
        let mut left = self.components.iter().cloned();
        let mut right = other.components.iter().cloned();
        let mut a = left.next();
        let mut b = right.next();

        loop {
            match (a.take(), b.take()) {
                (None, None) => break,
                (Some(Component::Insert(s)), rest) => {
                    right_prime.retain(s.chars().count());
                    left_prime.insert(&s);
                    a = left.next();
                    b = rest;
                }
                (rest, Some(Component::Insert(s))) => {
                    left_prime.retain(s.chars().count());
                    right_prime.insert(&s);
                    a = rest;
                    b = right.next();
                }
                (None, _) | (_, None) => {
                    return Err(Error::MalformedOperation(
                        "component lengths do not line up".into(),
                    ));
                }
                (Some(Component::Retain(i)), Some(Component::Retain(j))) => {
                    let n = i.min(j);
                    left_prime.retain(n);
                    right_prime.retain(n);
                    a = remainder(i - n, Component::Retain, &mut left);
                    b = remainder(j - n, Component::Retain, &mut right);
                }
                (Some(Component::Delete(i)), Some(Component::Delete(j))) => {
                    // Both removed the same characters
                    let n = i.min(j);
                    a = remainder(i - n, Component::Delete, &mut left);
                    b = remainder(j - n, Component::Delete, &mut right);
                }
                (Some(Component::Delete(i)), Some(Component::Retain(j))) => {
                    let n = i.min(j);
                    left_prime.delete(n);
                    a = remainder(i - n, Component::Delete, &mut left);
                    b = remainder(j - n, Component::Retain, &mut right);
                }
                (Some(Component::Retain(i)), Some(Component::Delete(j))) => {
                    let n = i.min(j);
                    right_prime.delete(n);
                    a = remainder(i - n, Component::Retain, &mut left);
                    b = remainder(j - n, Component::Delete, &mut right);
                }
            }
        }

        Ok((left_prime, right_prime))
    }

    /// Map a cursor offset in the base document to the target document
    pub fn transform_index(&self, position: u32) -> u32 {
        let mut remaining = i64::from(position);
        let mut moved = remaining;

        for component in &self.components {
            match component {
                Component::Retain(n) => remaining -= *n as i64,
                Component::Insert(s) => moved += s.chars().count() as i64,
                Component::Delete(n) => {
                    moved -= remaining.min(*n as i64);
                    remaining -= *n as i64;
                }
            }
            if remaining < 0 {
                break;
            }
        }

        moved.max(0) as u32
    }

    /// Build an operation from editor-style range replacements
    ///
    /// Ranges are in the coordinates of the original document and must be
    /// sorted and non-overlapping.
    pub fn from_edits(base_len: usize, edits: &[TextEdit]) -> Result<Operation> {
        let mut op = Operation::new();
        let mut cursor = 0;

        for edit in edits {
            let Range { start, end } = edit.range;
            if start < cursor || end < start || end > base_len {
                return Err(Error::MalformedOperation(format!(
                    "edit range {}..{} is out of order or outside 0..{}",
                    start, end, base_len
                )));
            }
            op.retain(start - cursor);
            op.delete(end - start);
            op.insert(&edit.text);
            cursor = end;
        }

        op.retain(base_len - cursor);
        Ok(op)
    }

    /// Express this operation as range replacements in base coordinates
    pub fn to_edits(&self) -> Vec<TextEdit> {
        let mut edits: Vec<TextEdit> = Vec::new();
        let mut position = 0;

        for component in &self.components {
            match component {
                Component::Retain(n) => position += n,
                Component::Insert(s) => match edits.last_mut() {
                    Some(last) if last.range.end == position => last.text.push_str(s),
                    _ => edits.push(TextEdit::new(position..position, s.clone())),
                },
                Component::Delete(n) => {
                    match edits.last_mut() {
                        Some(last) if last.range.end == position => last.range.end += n,
                        _ => edits.push(TextEdit::new(position..position + n, String::new())),
                    }
                    position += n;
                }
            }
        }

        edits
    }
}

/// A range replacement in an editor buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEdit {
    pub range: Range<usize>,
    pub text: String,
}

impl TextEdit {
    pub fn new(range: Range<usize>, text: impl Into<String>) -> Self {
        Self {
            range,
            text: text.into(),
        }
    }
}

fn remainder<I>(rest: usize, wrap: fn(usize) -> Component, iter: &mut I) -> Option<Component>
where
    I: Iterator<Item = Component>,
{
    if rest > 0 {
        Some(wrap(rest))
    } else {
        iter.next()
    }
}

/// Split after the first `n` characters
fn split_chars(s: &str, n: usize) -> (&str, &str) {
    let at = s.char_indices().nth(n).map_or(s.len(), |(i, _)| i);
    s.split_at(at)
}

/// Compact wire form: positive = retain, negative = delete, string = insert
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum WireComponent {
    Count(i64),
    Text(String),
}

impl TryFrom<Vec<WireComponent>> for Operation {
    type Error = Error;

    fn try_from(wire: Vec<WireComponent>) -> Result<Self> {
        let mut op = Operation::new();
        // Totals are tracked here so the builder never sees lengths that overflow
        let mut base_len: usize = 0;
        let mut target_len: usize = 0;

        for component in wire {
            match component {
                WireComponent::Count(0) => {
                    return Err(Error::MalformedOperation("zero-length component".into()));
                }
                WireComponent::Count(n) if n > 0 => {
                    let n = usize::try_from(n).map_err(|_| length_overflow())?;
                    base_len = base_len.checked_add(n).ok_or_else(length_overflow)?;
                    target_len = target_len.checked_add(n).ok_or_else(length_overflow)?;
                    op.retain(n);
                }
                WireComponent::Count(n) => {
                    let n = usize::try_from(n.unsigned_abs()).map_err(|_| length_overflow())?;
                    base_len = base_len.checked_add(n).ok_or_else(length_overflow)?;
                    op.delete(n);
                }
                WireComponent::Text(s) if s.is_empty() => {
                    return Err(Error::MalformedOperation("empty insert".into()));
                }
                WireComponent::Text(s) => {
                    target_len = target_len
                        .checked_add(s.chars().count())
                        .ok_or_else(length_overflow)?;
                    op.insert(&s);
                }
            }
        }
        Ok(op)
    }
}

fn length_overflow() -> Error {
    Error::MalformedOperation("component lengths overflow".into())
}

impl From<Operation> for Vec<WireComponent> {
    fn from(op: Operation) -> Self {
        op.components
            .into_iter()
            .map(|component| match component {
                Component::Retain(n) => WireComponent::Count(n as i64),
                Component::Delete(n) => WireComponent::Count(-(n as i64)),
                Component::Insert(s) => WireComponent::Text(s),
            })
            .collect()
    }
}
