//! Rich text element over the split-node RGA.
//!
//! Text content is measured, addressed, and split in **UTF-16 code
//! units**. Every replica must use the same unit model for positions to
//! converge; code-point or byte indexing is not interchangeable with
//! this. A split offset that would land inside a surrogate pair is
//! rejected as out of range.

use crate::actor::ActorId;
use crate::error::{CrdtError, CrdtResult};
use crate::rga_tree_split::{
    ContentChange, RgaSplitPosRange, RgaTreeSplit, SplitValue,
};
use crate::rht::Rht;
use crate::ticket::TimeTicket;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Length of `s` in UTF-16 code units.
pub(crate) fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Byte index of the `offset`-th UTF-16 code unit of `s`. Fails when
/// the offset is past the end or inside a surrogate pair.
pub(crate) fn utf16_byte_index(s: &str, offset: usize) -> CrdtResult<usize> {
    if offset == 0 {
        return Ok(0);
    }
    let mut units = 0;
    for (byte_idx, ch) in s.char_indices() {
        if units == offset {
            return Ok(byte_idx);
        }
        units += ch.len_utf16();
        if units > offset {
            return Err(CrdtError::OutOfRange {
                index: offset,
                len: utf16_len(s),
            });
        }
    }
    if units == offset {
        Ok(s.len())
    } else {
        Err(CrdtError::OutOfRange {
            index: offset,
            len: units,
        })
    }
}

/// A run of text plus its style attributes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TextValue {
    content: String,
    attrs: Rht,
}

impl TextValue {
    pub fn new(content: &str) -> Self {
        Self {
            content: content.to_string(),
            attrs: Rht::new(),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn attrs(&self) -> &Rht {
        &self.attrs
    }

    /// Set a style attribute, last writer wins.
    pub fn set_attr(&mut self, key: &str, value: &str, executed_at: TimeTicket) -> bool {
        self.attrs.set(key, value, executed_at)
    }
}

impl SplitValue for TextValue {
    fn unit_len(&self) -> usize {
        utf16_len(&self.content)
    }

    fn split_off(&mut self, offset: usize) -> CrdtResult<Self> {
        let byte_idx = utf16_byte_index(&self.content, offset)?;
        let tail = self.content.split_off(byte_idx);
        Ok(Self {
            content: tail,
            attrs: self.attrs.deepcopy(),
        })
    }
}

/// A visible-index-space description of a text mutation.
#[derive(Clone, Debug, PartialEq)]
pub struct TextChange {
    pub actor: ActorId,
    pub from: usize,
    pub to: usize,
    pub content: Option<String>,
}

/// The rich text element.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CrdtText {
    rga: RgaTreeSplit<TextValue>,
}

impl CrdtText {
    pub fn new() -> Self {
        Self::default()
    }

    /// Visible length in UTF-16 code units.
    pub fn len(&self) -> usize {
        self.rga.visible_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Map a visible index pair to a logical position range.
    pub fn find_pos_range(&mut self, from: usize, to: usize) -> CrdtResult<RgaSplitPosRange> {
        self.rga.find_pos_range(from, to)
    }

    /// Map a position range back to visible indexes.
    pub fn find_indexes_from_range(
        &mut self,
        range: &RgaSplitPosRange,
    ) -> CrdtResult<(usize, usize)> {
        self.rga.find_indexes_from_range(range)
    }

    /// Replace `range` with `content`, optionally styling the inserted
    /// run with `attributes`. See [`RgaTreeSplit::edit`] for the gating
    /// semantics of `latest_by_actor`.
    pub fn edit(
        &mut self,
        range: &RgaSplitPosRange,
        executed_at: TimeTicket,
        content: Option<&str>,
        attributes: Option<&HashMap<String, String>>,
        latest_by_actor: Option<&HashMap<ActorId, TimeTicket>>,
    ) -> CrdtResult<(
        crate::rga_tree_split::RgaSplitPos,
        HashMap<ActorId, TimeTicket>,
        Vec<TextChange>,
    )> {
        let value = content.filter(|c| !c.is_empty()).map(|c| {
            let mut value = TextValue::new(c);
            if let Some(attrs) = attributes {
                let mut keys: Vec<&String> = attrs.keys().collect();
                keys.sort_unstable();
                for key in keys {
                    value.set_attr(key, &attrs[key], executed_at);
                }
            }
            value
        });
        let (caret, touched, changes) = self.rga.edit(range, executed_at, value, latest_by_actor)?;
        let changes = changes
            .into_iter()
            .map(|ContentChange { actor, from, to, content }| TextChange {
                actor,
                from,
                to,
                content: content.map(|v| v.content),
            })
            .collect();
        Ok((caret, touched, changes))
    }

    /// Apply style attributes to every live run in `range`. Returns the
    /// contiguous visible runs styled.
    pub fn style(
        &mut self,
        range: &RgaSplitPosRange,
        attributes: &HashMap<String, String>,
        executed_at: TimeTicket,
    ) -> CrdtResult<Vec<(usize, usize)>> {
        let mut keys: Vec<&String> = attributes.keys().collect();
        keys.sort_unstable();
        self.rga.update_range(range, executed_at, |value| {
            for key in &keys {
                value.set_attr(key, &attributes[*key], executed_at);
            }
        })
    }

    /// Purge tombstoned runs removed before `ticket`.
    pub fn purge_removed_nodes_before(&mut self, ticket: &TimeTicket) -> usize {
        self.rga.purge_removed_nodes_before(ticket)
    }

    pub fn removed_node_count(&self) -> usize {
        self.rga.removed_node_count()
    }

    /// Iterate live runs in order.
    pub fn iter_runs(&self) -> impl Iterator<Item = &TextValue> {
        self.rga.iter_values()
    }

    /// The visible content as a plain string.
    pub fn to_plain_string(&self) -> String {
        self.iter_runs().map(TextValue::content).collect()
    }

    /// Canonical JSON form: the plain content as a JSON string.
    pub fn to_json(&self) -> String {
        serde_json::Value::from(self.to_plain_string()).to_string()
    }
}
