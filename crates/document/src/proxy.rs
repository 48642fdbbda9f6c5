//! Proxies handed to `update` closures.
//!
//! A proxy wraps one container element inside an open [`ChangeContext`]:
//! method calls mutate the context's root copy and record the matching
//! operation, so the closure reads its own writes while the real root
//! stays untouched until commit. Proxies never escape the closure.
//!
//! [`ChangeContext`]: crate::context::ChangeContext

use crate::context::ChangeContext;
use crate::error::DocumentResult;
use crate::presence::{PresenceChange, PresenceData};
use crdt::{
    CounterValue, CrdtError, ElementContent, OpInfo, Operation, PrimitiveValue, TimeTicket,
    TreeNodeSpec, TreePos,
};
use std::collections::HashMap;

/// Host-facing description of a tree node to create; tickets are issued
/// by the context when the edit is recorded.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TreeInput {
    pub node_type: String,
    pub value: String,
    pub attributes: HashMap<String, String>,
    pub children: Vec<TreeInput>,
}

impl TreeInput {
    pub fn element(node_type: &str) -> Self {
        Self {
            node_type: node_type.to_string(),
            ..Self::default()
        }
    }

    pub fn text(value: &str) -> Self {
        Self {
            node_type: crdt::TEXT_NODE_TYPE.to_string(),
            value: value.to_string(),
            ..Self::default()
        }
    }

    pub fn with_children(mut self, children: Vec<TreeInput>) -> Self {
        self.children = children;
        self
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    fn to_spec(&self, ctx: &mut ChangeContext) -> TreeNodeSpec {
        let created_at = ctx.issue_time_ticket();
        TreeNodeSpec {
            created_at,
            node_type: self.node_type.clone(),
            value: self.value.clone(),
            attributes: self.attributes.clone(),
            children: self
                .children
                .iter()
                .map(|child| child.to_spec(ctx))
                .collect(),
        }
    }
}

/// Proxy over an object element.
pub struct ObjectProxy<'a> {
    ctx: &'a mut ChangeContext,
    target: TimeTicket,
}

impl<'a> ObjectProxy<'a> {
    pub(crate) fn new(ctx: &'a mut ChangeContext, target: TimeTicket) -> Self {
        Self { ctx, target }
    }

    fn set_content(&mut self, key: &str, value: ElementContent) -> DocumentResult<TimeTicket> {
        let executed_at = self.ctx.issue_time_ticket();
        let op = Operation::Set {
            parent_created_at: self.target,
            key: key.to_string(),
            value,
            executed_at,
        };
        let infos = op.execute(self.ctx.root_mut())?;
        self.ctx.record(op, infos);
        Ok(executed_at)
    }

    /// Set a primitive value.
    pub fn set(&mut self, key: &str, value: impl Into<PrimitiveValue>) -> DocumentResult<()> {
        self.set_content(key, ElementContent::Primitive(value.into()))
            .map(|_| ())
    }

    /// Set a fresh empty object and return a proxy over it.
    pub fn set_new_object(&mut self, key: &str) -> DocumentResult<ObjectProxy<'_>> {
        let target = self.set_content(key, ElementContent::Object)?;
        Ok(ObjectProxy::new(&mut *self.ctx, target))
    }

    /// Set a fresh empty array and return a proxy over it.
    pub fn set_new_array(&mut self, key: &str) -> DocumentResult<ArrayProxy<'_>> {
        let target = self.set_content(key, ElementContent::Array)?;
        Ok(ArrayProxy {
            ctx: &mut *self.ctx,
            target,
        })
    }

    /// Set a fresh counter.
    pub fn set_new_counter(
        &mut self,
        key: &str,
        value: CounterValue,
    ) -> DocumentResult<CounterProxy<'_>> {
        let target = self.set_content(key, ElementContent::Counter(value))?;
        Ok(CounterProxy {
            ctx: &mut *self.ctx,
            target,
        })
    }

    /// Set a fresh empty text.
    pub fn set_new_text(&mut self, key: &str) -> DocumentResult<TextProxy<'_>> {
        let target = self.set_content(key, ElementContent::Text)?;
        Ok(TextProxy {
            ctx: &mut *self.ctx,
            target,
        })
    }

    /// Set a fresh tree with the given initial shape.
    pub fn set_new_tree(&mut self, key: &str, initial: &TreeInput) -> DocumentResult<TreeProxy<'_>> {
        let spec = initial.to_spec(self.ctx);
        let target = self.set_content(key, ElementContent::Tree(spec))?;
        Ok(TreeProxy {
            ctx: &mut *self.ctx,
            target,
        })
    }

    /// Remove a key.
    pub fn remove(&mut self, key: &str) -> DocumentResult<()> {
        let target = self
            .ctx
            .root()
            .object_get(self.target, key)?
            .ok_or_else(|| CrdtError::KeyNotFound(key.to_string()))?;
        let executed_at = self.ctx.issue_time_ticket();
        let op = Operation::Remove {
            parent_created_at: self.target,
            created_at: target,
            executed_at,
        };
        let infos = op.execute(self.ctx.root_mut())?;
        self.ctx.record(op, infos);
        Ok(())
    }

    fn child(&self, key: &str) -> DocumentResult<TimeTicket> {
        self.ctx
            .root()
            .object_get(self.target, key)?
            .ok_or_else(|| CrdtError::KeyNotFound(key.to_string()).into())
    }

    /// Proxy over an existing child object.
    pub fn object(&mut self, key: &str) -> DocumentResult<ObjectProxy<'_>> {
        let target = self.child(key)?;
        self.ctx.root().get(target)?.as_object()?;
        Ok(ObjectProxy::new(&mut *self.ctx, target))
    }

    /// Proxy over an existing child array.
    pub fn array(&mut self, key: &str) -> DocumentResult<ArrayProxy<'_>> {
        let target = self.child(key)?;
        self.ctx.root().get(target)?.as_array()?;
        Ok(ArrayProxy {
            ctx: &mut *self.ctx,
            target,
        })
    }

    /// Proxy over an existing child text.
    pub fn text(&mut self, key: &str) -> DocumentResult<TextProxy<'_>> {
        let target = self.child(key)?;
        self.ctx.root().get(target)?.as_text()?;
        Ok(TextProxy {
            ctx: &mut *self.ctx,
            target,
        })
    }

    /// Proxy over an existing child counter.
    pub fn counter(&mut self, key: &str) -> DocumentResult<CounterProxy<'_>> {
        let target = self.child(key)?;
        self.ctx.root().get(target)?.as_counter()?;
        Ok(CounterProxy {
            ctx: &mut *self.ctx,
            target,
        })
    }

    /// Proxy over an existing child tree.
    pub fn tree(&mut self, key: &str) -> DocumentResult<TreeProxy<'_>> {
        let target = self.child(key)?;
        self.ctx.root().get(target)?.as_tree()?;
        Ok(TreeProxy {
            ctx: &mut *self.ctx,
            target,
        })
    }
}

/// Proxy over an array element.
pub struct ArrayProxy<'a> {
    ctx: &'a mut ChangeContext,
    target: TimeTicket,
}

impl<'a> ArrayProxy<'a> {
    fn add_content(
        &mut self,
        prev: Option<TimeTicket>,
        value: ElementContent,
    ) -> DocumentResult<TimeTicket> {
        let executed_at = self.ctx.issue_time_ticket();
        let op = Operation::Add {
            parent_created_at: self.target,
            prev_created_at: prev,
            value,
            executed_at,
        };
        let infos = op.execute(self.ctx.root_mut())?;
        self.ctx.record(op, infos);
        Ok(executed_at)
    }

    fn last_entry(&self) -> DocumentResult<Option<TimeTicket>> {
        Ok(self
            .ctx
            .root()
            .get(self.target)?
            .as_array()?
            .iter()
            .last())
    }

    fn visible(&self) -> DocumentResult<Vec<TimeTicket>> {
        Ok(self.ctx.root().array_visible_entries(self.target)?)
    }

    /// The entry preceding a visible insertion index.
    fn prev_at(&self, index: usize) -> DocumentResult<Option<TimeTicket>> {
        let entries = self.visible()?;
        if index > entries.len() {
            return Err(CrdtError::OutOfRange {
                index,
                len: entries.len(),
            }
            .into());
        }
        Ok(index.checked_sub(1).map(|i| entries[i]))
    }

    /// Append a primitive value.
    pub fn push(&mut self, value: impl Into<PrimitiveValue>) -> DocumentResult<()> {
        let prev = self.last_entry()?;
        self.add_content(prev, ElementContent::Primitive(value.into()))
            .map(|_| ())
    }

    /// Append a fresh empty object.
    pub fn push_new_object(&mut self) -> DocumentResult<ObjectProxy<'_>> {
        let prev = self.last_entry()?;
        let target = self.add_content(prev, ElementContent::Object)?;
        Ok(ObjectProxy::new(&mut *self.ctx, target))
    }

    /// Append a fresh empty array.
    pub fn push_new_array(&mut self) -> DocumentResult<ArrayProxy<'_>> {
        let prev = self.last_entry()?;
        let target = self.add_content(prev, ElementContent::Array)?;
        Ok(ArrayProxy {
            ctx: &mut *self.ctx,
            target,
        })
    }

    /// Append a fresh counter.
    pub fn push_new_counter(&mut self, value: CounterValue) -> DocumentResult<CounterProxy<'_>> {
        let prev = self.last_entry()?;
        let target = self.add_content(prev, ElementContent::Counter(value))?;
        Ok(CounterProxy {
            ctx: &mut *self.ctx,
            target,
        })
    }

    /// Append a fresh empty text.
    pub fn push_new_text(&mut self) -> DocumentResult<TextProxy<'_>> {
        let prev = self.last_entry()?;
        let target = self.add_content(prev, ElementContent::Text)?;
        Ok(TextProxy {
            ctx: &mut *self.ctx,
            target,
        })
    }

    /// Append a fresh tree with the given initial shape.
    pub fn push_new_tree(&mut self, initial: &TreeInput) -> DocumentResult<TreeProxy<'_>> {
        let spec = initial.to_spec(self.ctx);
        let prev = self.last_entry()?;
        let target = self.add_content(prev, ElementContent::Tree(spec))?;
        Ok(TreeProxy {
            ctx: &mut *self.ctx,
            target,
        })
    }

    /// Insert a primitive value at a visible index.
    pub fn insert(&mut self, index: usize, value: impl Into<PrimitiveValue>) -> DocumentResult<()> {
        let prev = self.prev_at(index)?;
        self.add_content(prev, ElementContent::Primitive(value.into()))
            .map(|_| ())
    }

    /// Insert a fresh empty object at a visible index.
    pub fn insert_new_object(&mut self, index: usize) -> DocumentResult<ObjectProxy<'_>> {
        let prev = self.prev_at(index)?;
        let target = self.add_content(prev, ElementContent::Object)?;
        Ok(ObjectProxy::new(&mut *self.ctx, target))
    }

    /// Insert a fresh empty array at a visible index.
    pub fn insert_new_array(&mut self, index: usize) -> DocumentResult<ArrayProxy<'_>> {
        let prev = self.prev_at(index)?;
        let target = self.add_content(prev, ElementContent::Array)?;
        Ok(ArrayProxy {
            ctx: &mut *self.ctx,
            target,
        })
    }

    /// Insert a fresh counter at a visible index.
    pub fn insert_new_counter(
        &mut self,
        index: usize,
        value: CounterValue,
    ) -> DocumentResult<CounterProxy<'_>> {
        let prev = self.prev_at(index)?;
        let target = self.add_content(prev, ElementContent::Counter(value))?;
        Ok(CounterProxy {
            ctx: &mut *self.ctx,
            target,
        })
    }

    /// Insert a fresh empty text at a visible index.
    pub fn insert_new_text(&mut self, index: usize) -> DocumentResult<TextProxy<'_>> {
        let prev = self.prev_at(index)?;
        let target = self.add_content(prev, ElementContent::Text)?;
        Ok(TextProxy {
            ctx: &mut *self.ctx,
            target,
        })
    }

    /// Insert a fresh tree with the given initial shape at a visible
    /// index.
    pub fn insert_new_tree(
        &mut self,
        index: usize,
        initial: &TreeInput,
    ) -> DocumentResult<TreeProxy<'_>> {
        let spec = initial.to_spec(self.ctx);
        let prev = self.prev_at(index)?;
        let target = self.add_content(prev, ElementContent::Tree(spec))?;
        Ok(TreeProxy {
            ctx: &mut *self.ctx,
            target,
        })
    }

    /// Remove the element at a visible index.
    pub fn remove(&mut self, index: usize) -> DocumentResult<()> {
        let entries = self.visible()?;
        let target = *entries.get(index).ok_or(CrdtError::OutOfRange {
            index,
            len: entries.len(),
        })?;
        let executed_at = self.ctx.issue_time_ticket();
        let op = Operation::Remove {
            parent_created_at: self.target,
            created_at: target,
            executed_at,
        };
        let infos = op.execute(self.ctx.root_mut())?;
        self.ctx.record(op, infos);
        Ok(())
    }

    /// Move the element at `from` to sit after the element at `after`
    /// (`None` moves it to the front).
    pub fn move_item(&mut self, from: usize, after: Option<usize>) -> DocumentResult<()> {
        let entries = self.visible()?;
        let target = *entries.get(from).ok_or(CrdtError::OutOfRange {
            index: from,
            len: entries.len(),
        })?;
        let prev = match after {
            None => None,
            Some(i) => Some(*entries.get(i).ok_or(CrdtError::OutOfRange {
                index: i,
                len: entries.len(),
            })?),
        };
        let executed_at = self.ctx.issue_time_ticket();
        let op = Operation::Move {
            parent_created_at: self.target,
            prev_created_at: prev,
            created_at: target,
            executed_at,
        };
        let infos = op.execute(self.ctx.root_mut())?;
        self.ctx.record(op, infos);
        Ok(())
    }

    /// Visible element count.
    pub fn len(&self) -> DocumentResult<usize> {
        Ok(self.visible()?.len())
    }

    pub fn is_empty(&self) -> DocumentResult<bool> {
        Ok(self.visible()?.is_empty())
    }
}

/// Proxy over a text element.
pub struct TextProxy<'a> {
    ctx: &'a mut ChangeContext,
    target: TimeTicket,
}

impl<'a> TextProxy<'a> {
    /// Replace `[from, to)` with `content` (UTF-16 code unit indexes).
    pub fn edit(&mut self, from: usize, to: usize, content: &str) -> DocumentResult<()> {
        self.edit_with_attributes(from, to, content, None)
    }

    /// Replace `[from, to)` with `content`, styling the inserted run.
    pub fn edit_with_attributes(
        &mut self,
        from: usize,
        to: usize,
        content: &str,
        attributes: Option<&HashMap<String, String>>,
    ) -> DocumentResult<()> {
        let len = self.len()?;
        if from > to || to > len {
            return Err(CrdtError::OutOfRange { index: to, len }.into());
        }
        let executed_at = self.ctx.issue_time_ticket();
        let path = self.ctx.root().create_path(self.target)?;

        let text = self.ctx.root_mut().get_mut(self.target)?.as_text_mut()?;
        let range = text.find_pos_range(from, to)?;
        let content_opt = (!content.is_empty()).then_some(content);
        let (_, touched, changes) = text.edit(&range, executed_at, content_opt, attributes, None)?;
        let dirty = text.removed_node_count() > 0;
        if dirty {
            self.ctx.root_mut().register_dirty(self.target);
        }

        let op = Operation::Edit {
            parent_created_at: self.target,
            from: range.from,
            to: range.to,
            content: content_opt.map(str::to_string),
            attributes: attributes.cloned(),
            max_created_at_map: touched,
            executed_at,
        };
        let infos = changes
            .into_iter()
            .map(|c| OpInfo::Edit {
                path: path.clone(),
                from: c.from,
                to: c.to,
                content: c.content,
            })
            .collect();
        self.ctx.record(op, infos);
        Ok(())
    }

    /// Style `[from, to)` with the given attributes.
    pub fn style(
        &mut self,
        from: usize,
        to: usize,
        attributes: &HashMap<String, String>,
    ) -> DocumentResult<()> {
        let len = self.len()?;
        if from > to || to > len {
            return Err(CrdtError::OutOfRange { index: to, len }.into());
        }
        let executed_at = self.ctx.issue_time_ticket();
        let range = {
            let text = self.ctx.root_mut().get_mut(self.target)?.as_text_mut()?;
            text.find_pos_range(from, to)?
        };
        let op = Operation::Style {
            parent_created_at: self.target,
            from: range.from,
            to: range.to,
            attributes: attributes.clone(),
            executed_at,
        };
        let infos = op.execute(self.ctx.root_mut())?;
        self.ctx.record(op, infos);
        Ok(())
    }

    /// Visible length in UTF-16 code units.
    pub fn len(&self) -> DocumentResult<usize> {
        Ok(self.ctx.root().get(self.target)?.as_text()?.len())
    }

    /// The visible content.
    pub fn to_plain_string(&self) -> DocumentResult<String> {
        Ok(self
            .ctx
            .root()
            .get(self.target)?
            .as_text()?
            .to_plain_string())
    }
}

/// Proxy over a counter element.
pub struct CounterProxy<'a> {
    ctx: &'a mut ChangeContext,
    target: TimeTicket,
}

impl<'a> CounterProxy<'a> {
    /// Add `delta` to the counter.
    pub fn increase(&mut self, delta: i64) -> DocumentResult<()> {
        let executed_at = self.ctx.issue_time_ticket();
        let op = Operation::Increase {
            parent_created_at: self.target,
            value: PrimitiveValue::Long(delta),
            executed_at,
        };
        let infos = op.execute(self.ctx.root_mut())?;
        self.ctx.record(op, infos);
        Ok(())
    }
}

/// Proxy over a tree element.
pub struct TreeProxy<'a> {
    ctx: &'a mut ChangeContext,
    target: TimeTicket,
}

impl<'a> TreeProxy<'a> {
    fn positions(&self, from: usize, to: usize) -> DocumentResult<(TreePos, TreePos)> {
        let tree = self.ctx.root().get(self.target)?.as_tree()?;
        Ok((tree.find_pos(from)?, tree.find_pos(to)?))
    }

    /// Replace the visible index range with `contents`.
    pub fn edit(&mut self, from: usize, to: usize, contents: &[TreeInput]) -> DocumentResult<()> {
        let (from_pos, to_pos) = self.positions(from, to)?;
        let specs: Vec<TreeNodeSpec> = contents
            .iter()
            .map(|input| input.to_spec(self.ctx))
            .collect();
        let executed_at = self.ctx.issue_time_ticket();
        let op = Operation::TreeEdit {
            parent_created_at: self.target,
            from: from_pos,
            to: to_pos,
            contents: specs,
            executed_at,
        };
        let infos = op.execute(self.ctx.root_mut())?;
        self.ctx.record(op, infos);
        Ok(())
    }

    /// Style the element nodes in the visible index range.
    pub fn style(
        &mut self,
        from: usize,
        to: usize,
        attributes: &HashMap<String, String>,
    ) -> DocumentResult<()> {
        let (from_pos, to_pos) = self.positions(from, to)?;
        let executed_at = self.ctx.issue_time_ticket();
        let op = Operation::TreeStyle {
            parent_created_at: self.target,
            from: from_pos,
            to: to_pos,
            attributes: attributes.clone(),
            executed_at,
        };
        let infos = op.execute(self.ctx.root_mut())?;
        self.ctx.record(op, infos);
        Ok(())
    }

    /// The visible tree as XML.
    pub fn to_xml(&self) -> DocumentResult<String> {
        Ok(self.ctx.root().get(self.target)?.as_tree()?.to_xml())
    }

    /// Visible content size.
    pub fn size(&self) -> DocumentResult<usize> {
        Ok(self.ctx.root().get(self.target)?.as_tree()?.size())
    }
}

/// Draft of the presence change an update closure produces.
#[derive(Default)]
pub struct PresenceDraft {
    pub(crate) change: Option<PresenceChange>,
}

/// Proxy over the local actor's presence.
pub struct PresenceProxy<'a> {
    draft: &'a mut PresenceDraft,
}

impl<'a> PresenceProxy<'a> {
    pub(crate) fn new(draft: &'a mut PresenceDraft) -> Self {
        Self { draft }
    }

    /// Merge a key into the local presence.
    pub fn set(&mut self, key: &str, value: serde_json::Value) {
        match &mut self.draft.change {
            Some(PresenceChange::Put { data }) => {
                data.insert(key.to_string(), value);
            }
            _ => {
                let mut data = PresenceData::new();
                data.insert(key.to_string(), value);
                self.draft.change = Some(PresenceChange::Put { data });
            }
        }
    }

    /// Drop the local presence entirely.
    pub fn clear(&mut self) {
        self.draft.change = Some(PresenceChange::Clear);
    }
}
