//! Live edit: scene mutations pushed from the controller into the running
//! debuggee.
//!
//! Node and resource paths are sent once, paired with an integer handle
//! (`live_node_path` / `live_res_path [path, id]`). Later property and call
//! commands refer to the handle only. Both ends keep the pairing in a lookup
//! table: [`PathHandleCache`] on the controller, [`LiveEditReceiver`] on the
//! debuggee. Commands are one-way; nothing is acknowledged.

use std::collections::HashMap;

use crate::codec::Variant;
use crate::error::{DebugWireError, Result};
use crate::message::{names, ArgReader, Message};

// ============================================================================
// Controller side
// ============================================================================

/// Handles assigned to paths on first use. Node and resource handles share
/// one counter.
#[derive(Debug, Default)]
pub struct PathHandleCache {
    node_paths: HashMap<String, i32>,
    res_paths: HashMap<String, i32>,
    last_id: i32,
}

impl PathHandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for a node path. A new handle is announced in `outbox`.
    pub fn node_handle(&mut self, path: &str, outbox: &mut Vec<Message>) -> i32 {
        Self::handle(
            &mut self.node_paths,
            &mut self.last_id,
            path,
            names::LIVE_NODE_PATH,
            outbox,
        )
    }

    /// Handle for a resource path. A new handle is announced in `outbox`.
    pub fn res_handle(&mut self, path: &str, outbox: &mut Vec<Message>) -> i32 {
        Self::handle(
            &mut self.res_paths,
            &mut self.last_id,
            path,
            names::LIVE_RES_PATH,
            outbox,
        )
    }

    fn handle(
        table: &mut HashMap<String, i32>,
        last_id: &mut i32,
        path: &str,
        announce: &str,
        outbox: &mut Vec<Message>,
    ) -> i32 {
        if let Some(id) = table.get(path) {
            return *id;
        }
        *last_id += 1;
        table.insert(path.to_string(), *last_id);
        outbox.push(Message::new(announce, vec![path.into(), (*last_id).into()]));
        *last_id
    }

    pub fn len(&self) -> usize {
        self.node_paths.len() + self.res_paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every handle. Called on each new connection and on stop.
    pub fn clear(&mut self) {
        self.node_paths.clear();
        self.res_paths.clear();
        self.last_id = 0;
    }
}

/// A live edit issued by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEditCommand {
    /// Node path that live edits are relative to, and the scene file it
    /// was loaded from.
    SetRoot { root: String, scene_file: String },
    CreateNode { parent: String, type_name: String, name: String },
    InstanceNode { parent: String, scene_path: String, name: String },
    RemoveNode { path: String },
    /// Detach a node but keep it alive under `keep_id` for a later restore.
    RemoveAndKeepNode { path: String, keep_id: i64 },
    RestoreNode { keep_id: i64, path: String, position: i32 },
    DuplicateNode { path: String, new_name: String },
    ReparentNode { path: String, new_parent: String, new_name: String, position: i32 },
    NodeSetProperty { node: String, property: String, value: Variant },
    NodeSetResProperty { node: String, property: String, res_path: String },
    ResSetProperty { res: String, property: String, value: Variant },
    ResSetResProperty { res: String, property: String, res_path: String },
    NodeCall { node: String, method: String, args: Vec<Variant> },
    ResCall { res: String, method: String, args: Vec<Variant> },
}

impl LiveEditCommand {
    /// Messages to send for this command: any handle announcements first,
    /// then the command itself.
    pub fn to_messages(&self, cache: &mut PathHandleCache) -> Vec<Message> {
        let mut out = Vec::new();
        let message = match self {
            Self::SetRoot { root, scene_file } => Message::new(
                names::LIVE_SET_ROOT,
                vec![root.as_str().into(), scene_file.as_str().into()],
            ),
            Self::CreateNode {
                parent,
                type_name,
                name,
            } => Message::new(
                names::LIVE_CREATE_NODE,
                vec![parent.as_str().into(), type_name.as_str().into(), name.as_str().into()],
            ),
            Self::InstanceNode {
                parent,
                scene_path,
                name,
            } => Message::new(
                names::LIVE_INSTANCE_NODE,
                vec![parent.as_str().into(), scene_path.as_str().into(), name.as_str().into()],
            ),
            Self::RemoveNode { path } => {
                Message::new(names::LIVE_REMOVE_NODE, vec![path.as_str().into()])
            }
            Self::RemoveAndKeepNode { path, keep_id } => Message::new(
                names::LIVE_REMOVE_AND_KEEP_NODE,
                vec![path.as_str().into(), (*keep_id).into()],
            ),
            Self::RestoreNode {
                keep_id,
                path,
                position,
            } => Message::new(
                names::LIVE_RESTORE_NODE,
                vec![(*keep_id).into(), path.as_str().into(), (*position).into()],
            ),
            Self::DuplicateNode { path, new_name } => Message::new(
                names::LIVE_DUPLICATE_NODE,
                vec![path.as_str().into(), new_name.as_str().into()],
            ),
            Self::ReparentNode {
                path,
                new_parent,
                new_name,
                position,
            } => Message::new(
                names::LIVE_REPARENT_NODE,
                vec![
                    path.as_str().into(),
                    new_parent.as_str().into(),
                    new_name.as_str().into(),
                    (*position).into(),
                ],
            ),
            Self::NodeSetProperty {
                node,
                property,
                value,
            } => {
                let id = cache.node_handle(node, &mut out);
                Message::new(
                    names::LIVE_NODE_PROP,
                    vec![id.into(), property.as_str().into(), value.clone()],
                )
            }
            Self::NodeSetResProperty {
                node,
                property,
                res_path,
            } => {
                let id = cache.node_handle(node, &mut out);
                Message::new(
                    names::LIVE_NODE_PROP_RES,
                    vec![id.into(), property.as_str().into(), res_path.as_str().into()],
                )
            }
            Self::ResSetProperty {
                res,
                property,
                value,
            } => {
                let id = cache.res_handle(res, &mut out);
                Message::new(
                    names::LIVE_RES_PROP,
                    vec![id.into(), property.as_str().into(), value.clone()],
                )
            }
            Self::ResSetResProperty {
                res,
                property,
                res_path,
            } => {
                let id = cache.res_handle(res, &mut out);
                Message::new(
                    names::LIVE_RES_PROP_RES,
                    vec![id.into(), property.as_str().into(), res_path.as_str().into()],
                )
            }
            Self::NodeCall { node, method, args } => {
                let id = cache.node_handle(node, &mut out);
                Message::new(names::LIVE_NODE_CALL, call_args(id, method, args))
            }
            Self::ResCall { res, method, args } => {
                let id = cache.res_handle(res, &mut out);
                Message::new(names::LIVE_RES_CALL, call_args(id, method, args))
            }
        };
        out.push(message);
        out
    }
}

fn call_args(id: i32, method: &str, args: &[Variant]) -> Vec<Variant> {
    let mut out = Vec::with_capacity(args.len() + 2);
    out.push(id.into());
    out.push(method.into());
    out.extend_from_slice(args);
    out
}

// ============================================================================
// Debuggee side
// ============================================================================

/// A live edit with every handle resolved to its path.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEditOp {
    SetRoot { root: String, scene_file: String },
    CreateNode { parent: String, type_name: String, name: String },
    InstanceNode { parent: String, scene_path: String, name: String },
    RemoveNode { path: String },
    RemoveAndKeepNode { path: String, keep_id: i64 },
    RestoreNode { keep_id: i64, path: String, position: i32 },
    DuplicateNode { path: String, new_name: String },
    ReparentNode { path: String, new_parent: String, new_name: String, position: i32 },
    NodeSetProperty { node_path: String, property: String, value: Variant },
    NodeSetResProperty { node_path: String, property: String, res_path: String },
    ResSetProperty { res_path: String, property: String, value: Variant },
    ResSetResProperty { res_path: String, property: String, value_path: String },
    NodeCall { node_path: String, method: String, args: Vec<Variant> },
    ResCall { res_path: String, method: String, args: Vec<Variant> },
}

/// Applies live edits to the running scene.
pub trait LiveEditTarget: Send {
    fn apply(&mut self, op: LiveEditOp);
}

impl<F> LiveEditTarget for F
where
    F: FnMut(LiveEditOp) + Send,
{
    fn apply(&mut self, op: LiveEditOp) {
        self(op)
    }
}

/// Debuggee-side handle tables.
#[derive(Debug, Default)]
pub struct LiveEditReceiver {
    node_paths: HashMap<i32, String>,
    res_paths: HashMap<i32, String>,
}

impl LiveEditReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` belongs to the live edit message family.
    pub fn handles(name: &str) -> bool {
        name.starts_with(names::LIVE_PREFIX)
    }

    pub fn node_path(&self, id: i32) -> Option<&str> {
        self.node_paths.get(&id).map(String::as_str)
    }

    pub fn res_path(&self, id: i32) -> Option<&str> {
        self.res_paths.get(&id).map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.node_paths.clear();
        self.res_paths.clear();
    }

    /// Resolve a live edit message.
    ///
    /// Path announcements update the tables and yield `None`, as does a
    /// command naming an unknown handle (logged at `warn!`).
    ///
    /// # Errors
    ///
    /// `Malformed` for bad arguments, `InvalidParameter` for a `live_`
    /// message that is not a known live edit.
    pub fn parse(&mut self, message: &Message) -> Result<Option<LiveEditOp>> {
        let name = message.name.as_str();
        let args = message.args.as_slice();

        let op = match name {
            names::LIVE_NODE_PATH => {
                let (path, id) = read_path_handle(names::LIVE_NODE_PATH, args)?;
                self.node_paths.insert(id, path);
                return Ok(None);
            }
            names::LIVE_RES_PATH => {
                let (path, id) = read_path_handle(names::LIVE_RES_PATH, args)?;
                self.res_paths.insert(id, path);
                return Ok(None);
            }
            names::LIVE_SET_ROOT => {
                let mut r = ArgReader::new(names::LIVE_SET_ROOT, args);
                r.require(2)?;
                LiveEditOp::SetRoot {
                    root: r.string()?,
                    scene_file: r.string()?,
                }
            }
            names::LIVE_CREATE_NODE => {
                let mut r = ArgReader::new(names::LIVE_CREATE_NODE, args);
                r.require(3)?;
                LiveEditOp::CreateNode {
                    parent: r.string()?,
                    type_name: r.string()?,
                    name: r.string()?,
                }
            }
            names::LIVE_INSTANCE_NODE => {
                let mut r = ArgReader::new(names::LIVE_INSTANCE_NODE, args);
                r.require(3)?;
                LiveEditOp::InstanceNode {
                    parent: r.string()?,
                    scene_path: r.string()?,
                    name: r.string()?,
                }
            }
            names::LIVE_REMOVE_NODE => {
                let mut r = ArgReader::new(names::LIVE_REMOVE_NODE, args);
                r.require(1)?;
                LiveEditOp::RemoveNode { path: r.string()? }
            }
            names::LIVE_REMOVE_AND_KEEP_NODE => {
                let mut r = ArgReader::new(names::LIVE_REMOVE_AND_KEEP_NODE, args);
                r.require(2)?;
                LiveEditOp::RemoveAndKeepNode {
                    path: r.string()?,
                    keep_id: r.int()?,
                }
            }
            names::LIVE_RESTORE_NODE => {
                let mut r = ArgReader::new(names::LIVE_RESTORE_NODE, args);
                r.require(3)?;
                LiveEditOp::RestoreNode {
                    keep_id: r.int()?,
                    path: r.string()?,
                    position: r.i32()?,
                }
            }
            names::LIVE_DUPLICATE_NODE => {
                let mut r = ArgReader::new(names::LIVE_DUPLICATE_NODE, args);
                r.require(2)?;
                LiveEditOp::DuplicateNode {
                    path: r.string()?,
                    new_name: r.string()?,
                }
            }
            names::LIVE_REPARENT_NODE => {
                let mut r = ArgReader::new(names::LIVE_REPARENT_NODE, args);
                r.require(4)?;
                LiveEditOp::ReparentNode {
                    path: r.string()?,
                    new_parent: r.string()?,
                    new_name: r.string()?,
                    position: r.i32()?,
                }
            }
            names::LIVE_NODE_PROP | names::LIVE_NODE_PROP_RES | names::LIVE_NODE_CALL => {
                let mut r = ArgReader::new(names::LIVE_NODE_CALL, args);
                r.require(2)?;
                let id = r.i32()?;
                let member = r.string()?;
                let Some(node_path) = self.lookup(&self.node_paths, id, name) else {
                    return Ok(None);
                };
                match name {
                    names::LIVE_NODE_PROP => {
                        r.require(1)?;
                        LiveEditOp::NodeSetProperty {
                            node_path,
                            property: member,
                            value: r.value()?,
                        }
                    }
                    names::LIVE_NODE_PROP_RES => {
                        r.require(1)?;
                        LiveEditOp::NodeSetResProperty {
                            node_path,
                            property: member,
                            res_path: r.string()?,
                        }
                    }
                    _ => LiveEditOp::NodeCall {
                        node_path,
                        method: member,
                        args: r.rest().to_vec(),
                    },
                }
            }
            names::LIVE_RES_PROP | names::LIVE_RES_PROP_RES | names::LIVE_RES_CALL => {
                let mut r = ArgReader::new(names::LIVE_RES_CALL, args);
                r.require(2)?;
                let id = r.i32()?;
                let member = r.string()?;
                let Some(res_path) = self.lookup(&self.res_paths, id, name) else {
                    return Ok(None);
                };
                match name {
                    names::LIVE_RES_PROP => {
                        r.require(1)?;
                        LiveEditOp::ResSetProperty {
                            res_path,
                            property: member,
                            value: r.value()?,
                        }
                    }
                    names::LIVE_RES_PROP_RES => {
                        r.require(1)?;
                        LiveEditOp::ResSetResProperty {
                            res_path,
                            property: member,
                            value_path: r.string()?,
                        }
                    }
                    _ => LiveEditOp::ResCall {
                        res_path,
                        method: member,
                        args: r.rest().to_vec(),
                    },
                }
            }
            _ => {
                return Err(DebugWireError::InvalidParameter(format!(
                    "Unknown live edit message '{}'",
                    name
                )))
            }
        };
        Ok(Some(op))
    }

    /// Parse `message` and hand the result to `target`. Returns whether an
    /// operation was applied.
    pub fn apply(&mut self, message: &Message, target: &mut dyn LiveEditTarget) -> Result<bool> {
        match self.parse(message)? {
            Some(op) => {
                target.apply(op);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn lookup(&self, table: &HashMap<i32, String>, id: i32, message: &str) -> Option<String> {
        let path = table.get(&id).cloned();
        if path.is_none() {
            tracing::warn!("Ignoring '{}' for unknown path handle {}", message, id);
        }
        path
    }
}

fn read_path_handle(what: &'static str, args: &[Variant]) -> Result<(String, i32)> {
    let mut r = ArgReader::new(what, args);
    r.require(2)?;
    let path = r.string()?;
    let id = r.i32()?;
    r.finish()?;
    Ok((path, id))
}
