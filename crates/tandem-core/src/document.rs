//! Revisioned plain-text documents

use crate::error::Result;
use crate::operation::Operation;

/// Plain text plus the number of operations applied to reach it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    text: String,
    revision: u64,
}

impl Document {
    /// Create an empty document at revision 0
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Length in characters
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Apply an operation and advance the revision
    ///
    /// The document is left untouched if the operation does not fit.
    pub fn apply(&mut self, op: &Operation) -> Result<()> {
        self.text = op.apply(&self.text)?;
        self.revision += 1;
        Ok(())
    }

    /// Apply an operation without counting it as a new revision
    ///
    /// Used by clients for local edits that the server has not accepted yet.
    pub fn apply_local(&mut self, op: &Operation) -> Result<()> {
        self.text = op.apply(&self.text)?;
        Ok(())
    }

    /// Count a revision whose effect is already in the text
    ///
    /// Used by clients when the server acknowledges one of their own edits.
    pub fn advance_revision(&mut self) {
        self.revision += 1;
    }

    /// Replace the text with the result of an operation applied elsewhere
    /// and advance the revision
    pub fn commit(&mut self, text: String) {
        self.text = text;
        self.revision += 1;
    }

    /// Hex BLAKE3 digest of the current text
    pub fn checksum(&self) -> String {
        checksum(&self.text)
    }
}

/// Hex BLAKE3 digest of `text`
pub fn checksum(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_new_document_is_empty() {
        let doc = Document::new();
        assert_eq!(doc.text(), "");
        assert_eq!(doc.revision(), 0);
        assert!(doc.is_empty());
    }

    #[test]
    fn test_apply_advances_revision() {
        let mut doc = Document::new();
        let mut op = Operation::new();
        op.insert("hi");

        doc.apply(&op).unwrap();
        assert_eq!(doc.text(), "hi");
        assert_eq!(doc.revision(), 1);
        assert_eq!(doc.len(), 2);
    }

    #[test]
    fn test_failed_apply_leaves_document_untouched() {
        let mut doc = Document::new();
        let mut op = Operation::new();
        op.retain(3).insert("x");

        assert_eq!(
            doc.apply(&op),
            Err(Error::LengthMismatch { expected: 3, actual: 0 })
        );
        assert_eq!(doc.revision(), 0);
        assert_eq!(doc.text(), "");
    }

    #[test]
    fn test_apply_local_keeps_revision() {
        let mut doc = Document::new();
        let mut op = Operation::new();
        op.insert("draft");

        doc.apply_local(&op).unwrap();
        assert_eq!(doc.text(), "draft");
        assert_eq!(doc.revision(), 0);
    }

    #[test]
    fn test_advance_revision() {
        let mut doc = Document::new();
        doc.advance_revision();
        assert_eq!(doc.revision(), 1);
        assert_eq!(doc.text(), "");
    }

    #[test]
    fn test_commit() {
        let mut doc = Document::new();
        let mut op = Operation::new();
        op.insert("ok");

        let text = op.apply(doc.text()).unwrap();
        doc.commit(text);
        assert_eq!(doc.text(), "ok");
        assert_eq!(doc.revision(), 1);
    }

    #[test]
    fn test_checksum_tracks_text() {
        let mut doc = Document::new();
        let empty = doc.checksum();
        assert_eq!(empty, checksum(""));
        assert_eq!(empty.len(), 64);

        let mut op = Operation::new();
        op.insert("a");
        doc.apply(&op).unwrap();
        assert_ne!(doc.checksum(), empty);
        assert_eq!(doc.checksum(), checksum("a"));
    }
}
