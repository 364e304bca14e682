//! Iterative persistence codec.
//!
//! The wire format is a flat, length-prefixed table of
//! `id -> (parent_or_zero, child_ids)`. Both directions make exactly two
//! passes over that table — one to allocate every node, one to wire parent
//! and child links — so round-tripping a chain of 100,000+ nodes never
//! recurses proportionally to tree depth.

use std::io::{Read, Write};

use fxhash::FxHashMap;
use slotmap::SlotMap;
use thiserror::Error;

use crate::forest::Forest;
use crate::node::{NodeData, NodeSlot};
use crate::telemetry::{trace_debug, trace_warn};
use crate::NodeId;

const MAGIC: &[u8; 8] = b"PHYFRST\0";
const VERSION: u8 = 1;

/// Errors raised while reading or writing the wire format.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The underlying reader or writer failed.
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The stream did not start with the expected magic bytes.
    #[error("stream does not start with the phylogenetic-forest magic")]
    BadMagic,
    /// The stream declares a format version this crate does not understand.
    #[error("unsupported wire format version {0}")]
    UnsupportedVersion(u8),
    /// Two records in the stream claim the same ID.
    #[error("duplicate node id {0} in stream")]
    DuplicateId(NodeId),
    /// A record's parent field names an ID absent from the stream. Unlike
    /// orphan *children*, this is treated as corruption: a node's own
    /// parent link is not optional lossy metadata.
    #[error("node {id} claims parent {parent}, which is not present in the stream")]
    UnknownParent {
        /// The record whose parent field is dangling.
        id: NodeId,
        /// The missing parent ID it named.
        parent: NodeId,
    },
}

struct RawRecord {
    id: NodeId,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Write `forest` to `writer` in the crate's wire format.
///
/// Entry order is unspecified; readers must not assume genesis entries
/// come first.
pub fn serialize_forest<W: Write>(forest: &Forest, writer: &mut W) -> Result<(), CodecError> {
    writer.write_all(MAGIC)?;
    writer.write_all(&[VERSION])?;

    let ids: Vec<NodeId> = forest.node_ids().collect();
    writer.write_all(&(ids.len() as u64).to_le_bytes())?;

    for id in ids {
        let parent = forest.parent_of(id).map_or(0, |p| p.0);
        let children: Vec<NodeId> = forest.children_of(id).collect();

        writer.write_all(&id.0.to_le_bytes())?;
        writer.write_all(&parent.to_le_bytes())?;
        writer.write_all(&(children.len() as u32).to_le_bytes())?;
        for child in children {
            writer.write_all(&child.0.to_le_bytes())?;
        }
    }

    trace_debug!(nodes = forest.len(), "serialized forest");
    Ok(())
}

/// Restore a forest from `reader`'s wire-format bytes.
///
/// Orphan child IDs — referenced by a record's child list but absent from
/// the stream's own id set — are dropped silently, to tolerate
/// hand-edited streams that pruned a subtree. An unknown *parent* id is
/// treated as stream corruption instead, since it breaks the invariant
/// that every non-genesis node has a resolvable parent.
pub fn deserialize_forest<R: Read>(reader: &mut R) -> Result<Forest, CodecError> {
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(CodecError::BadMagic);
    }

    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != VERSION {
        return Err(CodecError::UnsupportedVersion(version[0]));
    }

    let count = read_u64(reader)?;
    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let id = NodeId(read_i64(reader)?);
        let parent_raw = read_i64(reader)?;
        let parent = (parent_raw != 0).then(|| NodeId(parent_raw));

        let child_count = read_u32(reader)?;
        let mut children = Vec::with_capacity(child_count as usize);
        for _ in 0..child_count {
            children.push(NodeId(read_i64(reader)?));
        }
        records.push(RawRecord {
            id,
            parent,
            children,
        });
    }

    // Pass 1: allocate every node with empty links.
    let mut arena: SlotMap<NodeSlot, NodeData> = SlotMap::with_capacity_and_key(records.len());
    let mut index: FxHashMap<NodeId, NodeSlot> = FxHashMap::default();
    for record in &records {
        if index.contains_key(&record.id) {
            return Err(CodecError::DuplicateId(record.id));
        }
        let slot = arena.insert(NodeData {
            id: record.id,
            parent: None,
            children: Vec::new(),
        });
        index.insert(record.id, slot);
    }

    // Pass 2: wire parent and child links.
    let mut dropped_orphans = 0usize;
    for record in &records {
        let slot = index[&record.id];
        if let Some(parent_id) = record.parent {
            let Some(&parent_slot) = index.get(&parent_id) else {
                return Err(CodecError::UnknownParent {
                    id: record.id,
                    parent: parent_id,
                });
            };
            arena[slot].parent = Some(parent_slot);
        }
        for &child_id in &record.children {
            match index.get(&child_id) {
                Some(&child_slot) => arena[slot].children.push(child_slot),
                None => dropped_orphans += 1,
            }
        }
    }
    if dropped_orphans > 0 {
        trace_warn!(
            dropped_orphans,
            "dropped orphan child references while restoring forest"
        );
    }

    trace_debug!(nodes = arena.len(), "deserialized forest");
    Ok(Forest::from_wired_arena(arena, index))
}

fn read_i64<R: Read>(reader: &mut R) -> Result<i64, std::io::Error> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32, std::io::Error> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64, std::io::Error> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
