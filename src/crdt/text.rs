//! Replicated plain text with styled runs.
//!
//! Content lengths and indexes are counted in Unicode scalar values.

use std::collections::BTreeMap;

use serde_json::json;
use serde_json::Value;
use tracing::debug;

use crate::actor::ActorId;
use crate::crdt::primitives::CreatedAtMap;
use crate::crdt::primitives::TimeTicket;
use crate::crdt::rga_tree_split::RgaTreeSplit;
use crate::crdt::rga_tree_split::SplitPos;
use crate::crdt::rga_tree_split::SplitValue;
use crate::crdt::rht::Rht;
use crate::error::Result;

/// A position in a text.
pub type TextPos = SplitPos;

/// A run of characters sharing one attribute table.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TextValue {
    content: String,
    len: usize,
    attributes: Rht,
}

impl TextValue {
    pub fn new(content: &str) -> TextValue {
        return TextValue {
            content: content.to_string(),
            len: content.chars().count(),
            attributes: Rht::new(),
        };
    }

    pub fn content(&self) -> &str {
        return &self.content;
    }

    pub fn attributes(&self) -> &Rht {
        return &self.attributes;
    }

    pub fn set_attribute(&mut self, key: &str, value: &str, executed_at: TimeTicket) -> bool {
        return self.attributes.set(key, value, executed_at);
    }
}

impl SplitValue for TextValue {
    fn len(&self) -> usize {
        return self.len;
    }

    fn split_off(&mut self, offset: usize) -> Self {
        let at = self
            .content
            .char_indices()
            .nth(offset)
            .map(|(at, _)| at)
            .unwrap_or(self.content.len());
        let right = self.content.split_off(at);
        let right_len = self.len - offset.min(self.len);
        self.len = offset.min(self.len);
        return TextValue {
            content: right,
            len: right_len,
            attributes: self.attributes.clone(),
        };
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TextChangeKind {
    Content,
    Style,
}

/// A change to the visible text, for editors and the sync layer.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TextChange {
    pub kind: TextChangeKind,
    pub actor: ActorId,
    pub from: usize,
    pub to: usize,
    pub content: Option<String>,
    pub attributes: Option<BTreeMap<String, String>>,
}

/// Outcome of a text edit.
#[derive(Clone, Debug)]
pub struct TextEdit {
    pub changes: Vec<TextChange>,
    pub created_at_map: CreatedAtMap,
    pub caret: TextPos,
}

#[derive(Clone, Debug, Default)]
pub struct CrdtText {
    rga: RgaTreeSplit<TextValue>,
}

impl CrdtText {
    pub fn new() -> CrdtText {
        return CrdtText {
            rga: RgaTreeSplit::new(),
        };
    }

    /// Visible length in characters.
    pub fn len(&self) -> usize {
        return self.rga.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.rga.is_empty();
    }

    /// Replace `[from, to)` with `content`, tagging the inserted run with
    /// `attributes`.
    pub fn edit(
        &mut self,
        from: &TextPos,
        to: &TextPos,
        content: &str,
        attributes: Option<&BTreeMap<String, String>>,
        edited_at: TimeTicket,
        created_at_map: Option<&CreatedAtMap>,
    ) -> Result<TextEdit> {
        let value = if content.is_empty() {
            None
        } else {
            let mut value = TextValue::new(content);
            if let Some(attributes) = attributes {
                for (key, attr) in attributes {
                    value.set_attribute(key, attr, edited_at);
                }
            }
            Some(value)
        };

        let result = self.rga.edit(from, to, edited_at, value, created_at_map)?;
        let changes: Vec<TextChange> = result
            .changes
            .into_iter()
            .map(|change| {
                let (content, attributes) = match change.value {
                    Some(value) => {
                        let attributes = value.attributes.to_map();
                        (Some(value.content), (!attributes.is_empty()).then_some(attributes))
                    }
                    None => (None, None),
                };
                return TextChange {
                    kind: TextChangeKind::Content,
                    actor: change.actor,
                    from: change.from,
                    to: change.to,
                    content,
                    attributes,
                };
            })
            .collect();

        debug!(
            edited_at = %edited_at,
            changes = changes.len(),
            removed = result.created_at_map.len(),
            "text edit"
        );
        return Ok(TextEdit {
            changes,
            created_at_map: result.created_at_map,
            caret: result.caret,
        });
    }

    /// Set `attributes` on every run in `[from, to)` the editor had seen.
    pub fn style(
        &mut self,
        from: &TextPos,
        to: &TextPos,
        attributes: &BTreeMap<String, String>,
        edited_at: TimeTicket,
        created_at_map: Option<&CreatedAtMap>,
    ) -> Result<(Vec<TextChange>, CreatedAtMap)> {
        let (touched, ranges) = self.rga.update_between(from, to, edited_at, created_at_map, |value| {
            for (key, attr) in attributes {
                value.set_attribute(key, attr, edited_at);
            }
        })?;

        let changes = ranges
            .into_iter()
            .map(|(from, to)| TextChange {
                kind: TextChangeKind::Style,
                actor: edited_at.actor(),
                from,
                to,
                content: None,
                attributes: Some(attributes.clone()),
            })
            .collect();
        return Ok((changes, touched));
    }

    pub fn index_to_pos(&mut self, index: usize) -> Result<TextPos> {
        return self.rga.index_to_pos(index);
    }

    /// Positions for the visible range `[from, to)`.
    pub fn index_range_to_pos_range(&mut self, from: usize, to: usize) -> Result<(TextPos, TextPos)> {
        let from_pos = self.rga.index_to_pos(from)?;
        if from == to {
            return Ok((from_pos, from_pos));
        }
        return Ok((from_pos, self.rga.index_to_pos(to)?));
    }

    pub fn pos_to_index(&self, pos: &TextPos, prefer_left: bool) -> Result<usize> {
        return self.rga.pos_to_index(pos, prefer_left);
    }

    pub fn garbage_len(&self) -> usize {
        return self.rga.garbage_len();
    }

    pub fn purge_removed_nodes_before(&mut self, ticket: &TimeTicket) -> Result<usize> {
        return self.rga.purge_removed_nodes_before(ticket);
    }

    /// Live runs merged where neighbours share attributes.
    fn runs(&self) -> Vec<(String, BTreeMap<String, String>)> {
        let mut runs: Vec<(String, BTreeMap<String, String>)> = Vec::new();
        for (_, value, removed_at) in self.rga.iter() {
            if removed_at.is_some() || value.content.is_empty() {
                continue;
            }
            let attributes = value.attributes.to_map();
            match runs.last_mut() {
                Some((content, last)) if *last == attributes => content.push_str(&value.content),
                _ => runs.push((value.content.clone(), attributes)),
            }
        }
        return runs;
    }

    /// `[{"attrs":{..},"val":".."}]`, with `attrs` left out of plain runs.
    pub fn to_json(&self) -> String {
        let runs: Vec<Value> = self
            .runs()
            .into_iter()
            .map(|(content, attributes)| {
                if attributes.is_empty() {
                    return json!({ "val": content });
                }
                return json!({ "attrs": attributes, "val": content });
            })
            .collect();
        return Value::Array(runs).to_string();
    }
}

impl std::fmt::Display for CrdtText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (_, value, removed_at) in self.rga.iter() {
            if removed_at.is_none() {
                f.write_str(&value.content)?;
            }
        }
        return Ok(());
    }
}
