//! Single-pass box filter with per-type transforms.

use super::{default_containers, BoxId, BoxTree, BoxType};
use crate::Result;
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// A rewrite applied to every box of one registered type.
///
/// `cx` is the typed rewrite context shared by all transforms of one pass.
/// Transforms may replace, remove or insert boxes, and may patch other boxes
/// reached through the tree's parent and child links.
pub trait BoxTransform<C> {
    fn apply(&self, tree: &mut BoxTree, id: BoxId, cx: &mut C) -> Result<()>;
}

impl<C, F> BoxTransform<C> for F
where
    F: Fn(&mut BoxTree, BoxId, &mut C) -> Result<()>,
{
    fn apply(&self, tree: &mut BoxTree, id: BoxId, cx: &mut C) -> Result<()> {
        self(tree, id, cx)
    }
}

/// Parses segments, dispatches registered transforms in pre-order and
/// re-serializes with corrected sizes.
pub struct BoxFilter<C> {
    containers: HashSet<BoxType>,
    transforms: HashMap<BoxType, Box<dyn BoxTransform<C> + Send + Sync>>,
}

impl<C> BoxFilter<C> {
    /// Create a filter recursing into the standard composite boxes.
    pub fn new() -> Self {
        Self {
            containers: default_containers(),
            transforms: HashMap::new(),
        }
    }

    /// Treat an additional box type as composite.
    pub fn container(mut self, box_type: BoxType) -> Self {
        self.containers.insert(box_type);
        self
    }

    /// Register the transform for a box type, replacing any earlier one.
    pub fn register<T>(mut self, box_type: BoxType, transform: T) -> Self
    where
        T: BoxTransform<C> + Send + Sync + 'static,
    {
        self.transforms.insert(box_type, Box::new(transform));
        self
    }

    /// Parse `data` with this filter's composite set.
    pub fn parse(&self, data: &[u8]) -> Result<BoxTree> {
        BoxTree::parse(data, &self.containers)
    }

    /// Run the registered transforms over `data` and serialize the result.
    pub fn filter(&self, data: &[u8], cx: &mut C) -> Result<Vec<u8>> {
        let mut tree = self.parse(data)?;
        self.filter_tree(&mut tree, cx)?;
        tree.to_bytes()
    }

    /// Run the registered transforms over an already parsed tree.
    ///
    /// Boxes are visited in the pre-order of the tree as it was when the pass
    /// started. Boxes inserted during the pass are not visited; boxes removed
    /// or replaced before their turn are skipped.
    pub fn filter_tree(&self, tree: &mut BoxTree, cx: &mut C) -> Result<()> {
        for id in tree.walk() {
            if !tree.is_attached(id) {
                continue;
            }
            if let Some(transform) = self.transforms.get(&tree.box_type(id)) {
                trace!(path = %tree.path(id), "Applying box transform");
                transform.apply(tree, id, cx)?;
            }
        }
        Ok(())
    }
}

impl<C> Default for BoxFilter<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::{write_box, write_container_box};
    use crate::structops;

    fn segment() -> Vec<u8> {
        let mfhd = write_box(BoxType::MFHD, &[0, 0, 0, 0, 0, 0, 0, 3]);
        let tfhd = write_box(BoxType::TFHD, &[0, 2, 0, 0, 0, 0, 0, 1]);
        let tfdt = write_box(BoxType::TFDT, &[0, 0, 0, 0, 0, 0, 0, 9]);
        let traf = write_container_box(BoxType::TRAF, &[&tfhd, &tfdt]);
        let moof = write_container_box(BoxType::MOOF, &[&mfhd, &traf]);
        let mdat = write_box(BoxType::MDAT, b"payload");
        [moof, mdat].concat()
    }

    #[test]
    fn test_noop_filter_is_identity() {
        let data = segment();
        let out = BoxFilter::<()>::new().filter(&data, &mut ()).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_transform_sees_context_in_preorder() {
        let record = |tree: &mut BoxTree, id: BoxId, seen: &mut Vec<String>| {
            seen.push(tree.path(id));
            Ok(())
        };
        let filter = BoxFilter::new()
            .register(BoxType::MFHD, record)
            .register(BoxType::TFDT, record)
            .register(BoxType::MDAT, record);

        let mut seen = Vec::new();
        filter.filter(&segment(), &mut seen).unwrap();
        assert_eq!(seen, vec!["moof/mfhd", "moof/traf/tfdt", "mdat"]);
    }

    #[test]
    fn test_growing_leaf_patches_ancestors() {
        let grow = |tree: &mut BoxTree, id: BoxId, _: &mut ()| {
            let old = tree.data(id).unwrap_or_default();
            let value = structops::get_u32(old, 12) as u64;
            let mut content = vec![1, 0, 0, 0];
            content.extend_from_slice(&structops::u64_bytes(value));
            tree.replace(id, write_box(BoxType::TFDT, &content))
        };
        let data = segment();
        let out = BoxFilter::new()
            .register(BoxType::TFDT, grow)
            .filter(&data, &mut ())
            .unwrap();

        assert_eq!(out.len(), data.len() + 4);
        let tree = BoxTree::parse(&out, &default_containers()).unwrap();
        let moof = tree.find_root(BoxType::MOOF).unwrap();
        let traf = tree.find_child(moof, BoxType::TRAF).unwrap();
        assert_eq!(structops::get_u32(&out, 0) as u64, tree.size(moof));
        assert_eq!(tree.size(traf), 8 + 16 + 20);
    }

    #[test]
    fn test_inserted_boxes_are_not_revisited() {
        let dup = |tree: &mut BoxTree, id: BoxId, count: &mut u32| {
            *count += 1;
            let bytes = tree.data(id).unwrap_or_default().to_vec();
            tree.insert_after(id, bytes).map(|_| ())
        };
        let mut count = 0;
        let out = BoxFilter::new()
            .register(BoxType::MDAT, dup)
            .filter(&segment(), &mut count)
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(out.len(), segment().len() + 15);
    }

    #[test]
    fn test_second_pass_is_idempotent() {
        let bump = |tree: &mut BoxTree, id: BoxId, _: &mut ()| {
            let mut bytes = tree.data(id).unwrap_or_default().to_vec();
            structops::set_u32(&mut bytes, 12, 42);
            tree.replace(id, bytes)
        };
        let filter = BoxFilter::new().register(BoxType::MFHD, bump);
        let once = filter.filter(&segment(), &mut ()).unwrap();
        let twice = filter.filter(&once, &mut ()).unwrap();
        assert_eq!(once, twice);
    }
}
