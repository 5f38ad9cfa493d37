//! Arena-backed box tree.

use super::{BoxType, HEADER_SIZE};
use crate::structops;
use crate::{Error, Result};
use std::collections::HashSet;

/// Deepest container nesting accepted by [`BoxTree::parse`].
pub const MAX_DEPTH: usize = 32;

/// Index of a node in a [`BoxTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoxId(usize);

#[derive(Debug, Clone)]
enum Body {
    /// Complete box bytes, header included.
    Leaf(Vec<u8>),
    /// Child boxes in file order.
    Container(Vec<BoxId>),
}

#[derive(Debug, Clone)]
struct Node {
    box_type: BoxType,
    parent: Option<BoxId>,
    /// Byte offset in the parsed input; `None` for boxes inserted later.
    source_offset: Option<u64>,
    attached: bool,
    body: Body,
}

/// A parsed sequence of top-level boxes with their descendants.
#[derive(Debug, Clone, Default)]
pub struct BoxTree {
    nodes: Vec<Node>,
    roots: Vec<BoxId>,
}

impl BoxTree {
    /// Parse `data` as a sequence of boxes, recursing into `containers`.
    ///
    /// A size below the header length (including the 0 and 1 escape values
    /// for open-ended and 64-bit sizes) or past the end of the enclosing
    /// range is a format error.
    pub fn parse(data: &[u8], containers: &HashSet<BoxType>) -> Result<Self> {
        let mut tree = Self::default();
        tree.roots = tree.parse_level(data, 0, data.len(), None, 0, containers)?;
        Ok(tree)
    }

    fn parse_level(
        &mut self,
        data: &[u8],
        start: usize,
        end: usize,
        parent: Option<BoxId>,
        depth: usize,
        containers: &HashSet<BoxType>,
    ) -> Result<Vec<BoxId>> {
        if depth > MAX_DEPTH {
            return Err(Error::format(
                parent.map(|p| self.path(p)).unwrap_or_default(),
                start as u64,
                format!("box nesting deeper than {MAX_DEPTH} levels"),
            ));
        }
        let mut ids = Vec::new();
        let mut pos = start;

        while pos < end {
            if end - pos < HEADER_SIZE {
                return Err(Error::format(
                    self.child_path(parent, "????"),
                    pos as u64,
                    format!("{} trailing bytes cannot hold a box header", end - pos),
                ));
            }

            let size = structops::get_u32(data, pos) as usize;
            let box_type = BoxType::from_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]]);

            if size < HEADER_SIZE {
                return Err(Error::format(
                    self.child_path(parent, box_type.as_str()),
                    pos as u64,
                    format!("size {size} is below the header length"),
                ));
            }
            if size > end - pos {
                return Err(Error::format(
                    self.child_path(parent, box_type.as_str()),
                    pos as u64,
                    format!("size {size} runs past the enclosing range ending at byte {end}"),
                ));
            }

            let id = BoxId(self.nodes.len());
            self.nodes.push(Node {
                box_type,
                parent,
                source_offset: Some(pos as u64),
                attached: true,
                body: Body::Leaf(Vec::new()),
            });

            let body = if containers.contains(&box_type) {
                Body::Container(self.parse_level(data, pos + HEADER_SIZE, pos + size, Some(id), depth + 1, containers)?)
            } else {
                Body::Leaf(data[pos..pos + size].to_vec())
            };
            self.nodes[id.0].body = body;

            ids.push(id);
            pos += size;
        }

        Ok(ids)
    }

    fn child_path(&self, parent: Option<BoxId>, name: &str) -> String {
        match parent {
            Some(p) => format!("{}/{}", self.path(p), name),
            None => name.to_string(),
        }
    }

    /// Top-level boxes in order.
    pub fn roots(&self) -> &[BoxId] {
        &self.roots
    }

    pub fn box_type(&self, id: BoxId) -> BoxType {
        self.nodes[id.0].box_type
    }

    pub fn parent(&self, id: BoxId) -> Option<BoxId> {
        self.nodes[id.0].parent
    }

    /// Children of a container; empty for leaf boxes.
    pub fn children(&self, id: BoxId) -> &[BoxId] {
        match &self.nodes[id.0].body {
            Body::Container(children) => children,
            Body::Leaf(_) => &[],
        }
    }

    pub fn is_container(&self, id: BoxId) -> bool {
        matches!(self.nodes[id.0].body, Body::Container(_))
    }

    /// Whether the node is still part of the tree.
    pub fn is_attached(&self, id: BoxId) -> bool {
        self.nodes[id.0].attached
    }

    /// First child of `id` with the given type.
    pub fn find_child(&self, id: BoxId, box_type: BoxType) -> Option<BoxId> {
        self.children(id)
            .iter()
            .copied()
            .find(|&c| self.box_type(c) == box_type)
    }

    /// All children of `id` with the given type.
    pub fn find_children(&self, id: BoxId, box_type: BoxType) -> Vec<BoxId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|&c| self.box_type(c) == box_type)
            .collect()
    }

    /// First top-level box with the given type.
    pub fn find_root(&self, box_type: BoxType) -> Option<BoxId> {
        self.roots.iter().copied().find(|&r| self.box_type(r) == box_type)
    }

    /// Follow a path of box types from the top level, e.g. `[moof, traf, trun]`.
    pub fn find_path(&self, path: &[BoxType]) -> Option<BoxId> {
        let (first, rest) = path.split_first()?;
        let mut id = self.find_root(*first)?;
        for box_type in rest {
            id = self.find_child(id, *box_type)?;
        }
        Some(id)
    }

    /// Nearest ancestor of `id` with the given type.
    pub fn find_ancestor(&self, id: BoxId, box_type: BoxType) -> Option<BoxId> {
        let mut current = self.parent(id);
        while let Some(p) = current {
            if self.box_type(p) == box_type {
                return Some(p);
            }
            current = self.parent(p);
        }
        None
    }

    /// Slash-separated box path, e.g. `moof/traf/tfdt`.
    pub fn path(&self, id: BoxId) -> String {
        let mut parts = vec![self.box_type(id).to_string()];
        let mut current = self.parent(id);
        while let Some(p) = current {
            parts.push(self.box_type(p).to_string());
            current = self.parent(p);
        }
        parts.reverse();
        parts.join("/")
    }

    /// Offset of the box in the parsed input, if it came from there.
    pub fn source_offset(&self, id: BoxId) -> Option<u64> {
        self.nodes[id.0].source_offset
    }

    /// Raw bytes of a leaf box, header included.
    pub fn data(&self, id: BoxId) -> Option<&[u8]> {
        match &self.nodes[id.0].body {
            Body::Leaf(bytes) => Some(bytes),
            Body::Container(_) => None,
        }
    }

    /// Raw bytes of a leaf box holding at least `min_len` bytes.
    pub fn checked_data(&self, id: BoxId, min_len: usize) -> Result<&[u8]> {
        let bytes = self
            .data(id)
            .ok_or_else(|| Error::format(self.path(id), self.offset(id), "expected a leaf box"))?;
        if bytes.len() < min_len {
            return Err(Error::format(
                self.path(id),
                self.offset(id),
                format!("{} bytes is too short, need {min_len}", bytes.len()),
            ));
        }
        Ok(bytes)
    }

    /// Serialized size of the box in the current tree.
    pub fn size(&self, id: BoxId) -> u64 {
        match &self.nodes[id.0].body {
            Body::Leaf(bytes) => bytes.len() as u64,
            Body::Container(children) => {
                HEADER_SIZE as u64 + children.iter().map(|&c| self.size(c)).sum::<u64>()
            }
        }
    }

    /// Byte offset the box will have in the serialized output.
    pub fn offset(&self, id: BoxId) -> u64 {
        let (base, siblings) = match self.parent(id) {
            Some(p) => (self.offset(p) + HEADER_SIZE as u64, self.children(p)),
            None => (0, self.roots.as_slice()),
        };
        base + siblings
            .iter()
            .take_while(|&&s| s != id)
            .map(|&s| self.size(s))
            .sum::<u64>()
    }

    /// Replace a box with new bytes holding exactly one box.
    ///
    /// The size field is rewritten on serialization, so it may be stale.
    /// Replacing a container turns it into a leaf and detaches its children.
    pub fn replace(&mut self, id: BoxId, bytes: Vec<u8>) -> Result<()> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::format(
                self.path(id),
                self.offset(id),
                format!("replacement of {} bytes cannot hold a box header", bytes.len()),
            ));
        }
        let box_type = BoxType::from_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if let Body::Container(children) = &self.nodes[id.0].body {
            for child in children.clone() {
                self.detach(child);
            }
        }
        let node = &mut self.nodes[id.0];
        node.box_type = box_type;
        node.body = Body::Leaf(bytes);
        Ok(())
    }

    /// Remove a box and its descendants from the tree.
    pub fn remove(&mut self, id: BoxId) {
        match self.parent(id) {
            Some(p) => {
                if let Body::Container(children) = &mut self.nodes[p.0].body {
                    children.retain(|&c| c != id);
                }
            }
            None => self.roots.retain(|&r| r != id),
        }
        self.detach(id);
    }

    fn detach(&mut self, id: BoxId) {
        self.nodes[id.0].attached = false;
        for child in self.children(id).to_vec() {
            self.detach(child);
        }
    }

    /// Insert a new leaf box directly after `id`, at the same level.
    pub fn insert_after(&mut self, id: BoxId, bytes: Vec<u8>) -> Result<BoxId> {
        let parent = self.parent(id);
        let new_id = self.push_leaf(parent, bytes)?;
        let siblings = match parent {
            Some(p) => match &mut self.nodes[p.0].body {
                Body::Container(children) => children,
                Body::Leaf(_) => unreachable!("parent links always point at containers"),
            },
            None => &mut self.roots,
        };
        let index = siblings.iter().position(|&s| s == id).map_or(siblings.len(), |i| i + 1);
        siblings.insert(index, new_id);
        Ok(new_id)
    }

    /// Append a new leaf box as the last child of the container `parent`.
    pub fn append_child(&mut self, parent: BoxId, bytes: Vec<u8>) -> Result<BoxId> {
        if !self.is_container(parent) {
            return Err(Error::format(
                self.path(parent),
                self.offset(parent),
                "cannot append a child to a leaf box",
            ));
        }
        let new_id = self.push_leaf(Some(parent), bytes)?;
        if let Body::Container(children) = &mut self.nodes[parent.0].body {
            children.push(new_id);
        }
        Ok(new_id)
    }

    fn push_leaf(&mut self, parent: Option<BoxId>, bytes: Vec<u8>) -> Result<BoxId> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::format(
                self.child_path(parent, "????"),
                0,
                format!("inserted box of {} bytes cannot hold a header", bytes.len()),
            ));
        }
        let id = BoxId(self.nodes.len());
        self.nodes.push(Node {
            box_type: BoxType::from_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            parent,
            source_offset: None,
            attached: true,
            body: Body::Leaf(bytes),
        });
        Ok(id)
    }

    /// Attached boxes in pre-order (parents before children).
    pub fn walk(&self) -> Vec<BoxId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        for &root in &self.roots {
            self.walk_from(root, &mut out);
        }
        out
    }

    fn walk_from(&self, id: BoxId, out: &mut Vec<BoxId>) {
        out.push(id);
        for &child in self.children(id) {
            self.walk_from(child, out);
        }
    }

    /// Serialize a single box and its descendants.
    pub fn node_bytes(&self, id: BoxId) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.size(id) as usize);
        self.write_node(id, &mut out)?;
        Ok(out)
    }

    /// Serialize the whole tree.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let total: u64 = self.roots.iter().map(|&r| self.size(r)).sum();
        let mut out = Vec::with_capacity(total as usize);
        for &root in &self.roots {
            self.write_node(root, &mut out)?;
        }
        Ok(out)
    }

    fn write_node(&self, id: BoxId, out: &mut Vec<u8>) -> Result<()> {
        let size = self.size(id);
        if size > u32::MAX as u64 {
            return Err(Error::format(
                self.path(id),
                self.offset(id),
                format!("size {size} does not fit a 32-bit box header"),
            ));
        }

        match &self.nodes[id.0].body {
            Body::Leaf(bytes) => {
                let start = out.len();
                out.extend_from_slice(bytes);
                structops::set_u32(out, start, size as u32);
            }
            Body::Container(children) => {
                out.extend_from_slice(&structops::u32_bytes(size as u32));
                out.extend_from_slice(&self.box_type(id).0);
                for &child in children {
                    self.write_node(child, out)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::{default_containers, write_box, write_container_box};
    use assert_matches::assert_matches;

    fn sample_segment() -> Vec<u8> {
        let styp = write_box(BoxType::STYP, b"msdh\0\0\0\0msdhmsix");
        let mfhd = write_box(BoxType::MFHD, &[0, 0, 0, 0, 0, 0, 0, 7]);
        let tfhd = write_box(BoxType::TFHD, &[0, 2, 0, 0, 0, 0, 0, 1]);
        let traf = write_container_box(BoxType::TRAF, &[&tfhd]);
        let moof = write_container_box(BoxType::MOOF, &[&mfhd, &traf]);
        let mdat = write_box(BoxType::MDAT, &[0xAB; 5]);
        [styp, moof, mdat].concat()
    }

    #[test]
    fn test_deep_nesting_is_a_format_error() {
        let depth = 200_000;
        let mut data = Vec::with_capacity(depth * HEADER_SIZE);
        for level in 0..depth {
            data.extend_from_slice(&(((depth - level) * HEADER_SIZE) as u32).to_be_bytes());
            data.extend_from_slice(b"moof");
        }
        assert_matches!(
            BoxTree::parse(&data, &default_containers()),
            Err(Error::Format { ref message, .. }) if message.contains("nesting")
        );

        // Nesting within the limit still parses.
        let mut data = write_box(BoxType::MFHD, &[0; 8]);
        for _ in 0..MAX_DEPTH {
            data = write_container_box(BoxType::MOOF, &[data.as_slice()]);
        }
        assert!(BoxTree::parse(&data, &default_containers()).is_ok());
    }

    #[test]
    fn test_parse_and_serialize_identity() {
        let data = sample_segment();
        let tree = BoxTree::parse(&data, &default_containers()).unwrap();
        assert_eq!(tree.roots().len(), 3);
        assert_eq!(tree.to_bytes().unwrap(), data);
    }

    #[test]
    fn test_find_path_and_parent_links() {
        let data = sample_segment();
        let tree = BoxTree::parse(&data, &default_containers()).unwrap();
        let tfhd = tree
            .find_path(&[BoxType::MOOF, BoxType::TRAF, BoxType::TFHD])
            .unwrap();
        assert_eq!(tree.path(tfhd), "moof/traf/tfhd");
        let traf = tree.parent(tfhd).unwrap();
        assert_eq!(tree.box_type(traf), BoxType::TRAF);
        assert_eq!(tree.find_ancestor(tfhd, BoxType::MOOF), tree.find_root(BoxType::MOOF));
        assert_eq!(tree.source_offset(tfhd), Some(tree.offset(tfhd)));
    }

    #[test]
    fn test_replace_propagates_sizes() {
        let data = sample_segment();
        let mut tree = BoxTree::parse(&data, &default_containers()).unwrap();
        let tfhd = tree
            .find_path(&[BoxType::MOOF, BoxType::TRAF, BoxType::TFHD])
            .unwrap();
        let moof = tree.find_root(BoxType::MOOF).unwrap();
        let before = tree.size(moof);

        // Stale size field in the replacement is corrected on output.
        let mut grown = write_box(BoxType::TFHD, &[0; 12]);
        grown[3] = 0;
        tree.replace(tfhd, grown).unwrap();

        let out = tree.to_bytes().unwrap();
        let reparsed = BoxTree::parse(&out, &default_containers()).unwrap();
        let moof2 = reparsed.find_root(BoxType::MOOF).unwrap();
        assert_eq!(reparsed.size(moof2), before + 4);
        let tfhd2 = reparsed
            .find_path(&[BoxType::MOOF, BoxType::TRAF, BoxType::TFHD])
            .unwrap();
        assert_eq!(reparsed.data(tfhd2).unwrap()[3], 20);
    }

    #[test]
    fn test_insert_after_and_remove() {
        let data = sample_segment();
        let mut tree = BoxTree::parse(&data, &default_containers()).unwrap();
        let styp = tree.find_root(BoxType::STYP).unwrap();
        tree.insert_after(styp, write_box(BoxType::EMSG, &[1, 2, 3])).unwrap();
        let order: Vec<_> = tree.roots().iter().map(|&r| tree.box_type(r)).collect();
        assert_eq!(order, vec![BoxType::STYP, BoxType::EMSG, BoxType::MOOF, BoxType::MDAT]);

        let moof = tree.find_root(BoxType::MOOF).unwrap();
        let mfhd = tree.find_child(moof, BoxType::MFHD).unwrap();
        tree.remove(moof);
        assert!(!tree.is_attached(mfhd));
        assert!(tree.find_root(BoxType::MOOF).is_none());
    }

    #[test]
    fn test_offsets_follow_output_layout() {
        let data = sample_segment();
        let tree = BoxTree::parse(&data, &default_containers()).unwrap();
        let mdat = tree.find_root(BoxType::MDAT).unwrap();
        assert_eq!(tree.offset(mdat), (data.len() - 13) as u64);
    }

    #[test]
    fn test_undersized_box_is_format_error() {
        let mut data = sample_segment();
        data[3] = 4;
        assert_matches!(
            BoxTree::parse(&data, &default_containers()),
            Err(Error::Format { offset: 0, .. })
        );
    }

    #[test]
    fn test_extended_size_is_rejected() {
        let mut data = write_box(BoxType::MDAT, &[0; 16]);
        data[3] = 1;
        assert_matches!(
            BoxTree::parse(&data, &default_containers()),
            Err(Error::Format { .. })
        );
    }

    #[test]
    fn test_child_past_parent_end_reports_path() {
        let data = sample_segment();
        let mut tree_bytes = data.clone();
        // tfhd sits at 24 (styp) + 8 (moof) + 16 (mfhd) + 8 (traf)
        tree_bytes[56 + 3] = 200;
        let err = BoxTree::parse(&tree_bytes, &default_containers()).unwrap_err();
        assert_matches!(err, Error::Format { ref path, offset: 56, .. } if path == "moof/traf/tfhd");
    }
}
