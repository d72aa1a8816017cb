use super::types::*;
use std::collections::HashSet;

/// Columnar topology of a dependency graph.
///
/// Parents are stored CSR-style; children are a linked list per node so that
/// downstream walks do not allocate.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    pub meta: Vec<NodeMetadata>,

    pub parents_flat: Vec<NodeId>,
    /// `(start, count)` into `parents_flat`, per node.
    pub parents_ranges: Vec<(u32, u32)>,

    /// Head edge per node, `u32::MAX` when childless.
    pub first_child: Vec<u32>,
    pub child_targets: Vec<NodeId>,
    pub next_child: Vec<u32>,

    used_names: HashSet<String>,
}

impl Registry {
    pub fn new() -> Self { Self::default() }
    pub fn count(&self) -> usize { self.meta.len() }

    /// Appends a node. Parents may refer to nodes added later; children are only
    /// linked by [`Registry::link_children`].
    pub fn add_node(&mut self, parents: &[NodeId], mut meta: NodeMetadata) -> NodeId {
        let id = NodeId(self.meta.len() as u32);

        let original_name = meta.name.clone();
        let mut candidate_name = original_name.clone();
        let mut counter = 1;
        while self.used_names.contains(&candidate_name) {
            candidate_name = format!("{}_{}", original_name, counter);
            counter += 1;
        }
        self.used_names.insert(candidate_name.clone());
        meta.name = candidate_name;

        let start = self.parents_flat.len() as u32;
        self.parents_flat.extend_from_slice(parents);
        self.parents_ranges.push((start, parents.len() as u32));

        self.meta.push(meta);
        self.first_child.push(u32::MAX);

        id
    }

    /// Rebuilds the child lists from the parent lists.
    pub fn link_children(&mut self) {
        self.first_child = vec![u32::MAX; self.count()];
        self.child_targets.clear();
        self.next_child.clear();
        for child in 0..self.count() {
            let id = NodeId::new(child);
            let (start, count) = self.parents_ranges[child];
            for i in start..start + count {
                let p_idx = self.parents_flat[i as usize].index();
                let head = self.first_child[p_idx];
                let new_edge = self.child_targets.len() as u32;
                self.child_targets.push(id);
                self.next_child.push(head);
                self.first_child[p_idx] = new_edge;
            }
        }
    }

    #[inline(always)]
    pub fn get_parents(&self, id: NodeId) -> &[NodeId] {
        let (start, count) = self.parents_ranges[id.index()];
        &self.parents_flat[start as usize..(start + count) as usize]
    }

    pub fn children(&self, id: NodeId) -> Children<'_> {
        Children { registry: self, edge: self.first_child[id.index()] }
    }
}

pub struct Children<'a> {
    registry: &'a Registry,
    edge: u32,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if self.edge == u32::MAX {
            return None;
        }
        let child = self.registry.child_targets[self.edge as usize];
        self.edge = self.registry.next_child[self.edge as usize];
        Some(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str) -> NodeMetadata {
        NodeMetadata { name: name.into(), ..Default::default() }
    }

    #[test]
    fn test_duplicate_names_are_suffixed() {
        let mut reg = Registry::new();
        reg.add_node(&[], meta("pv"));
        let b = reg.add_node(&[], meta("pv"));
        let c = reg.add_node(&[], meta("pv"));
        assert_eq!(reg.meta[b.index()].name, "pv_1");
        assert_eq!(reg.meta[c.index()].name, "pv_2");
    }

    #[test]
    fn test_forward_parent_references_link() {
        let mut reg = Registry::new();
        // Node 0 consumes node 1, which is added afterwards.
        let a = reg.add_node(&[NodeId(1)], meta("consumer"));
        let b = reg.add_node(&[], meta("producer"));
        reg.link_children();

        assert_eq!(reg.get_parents(a), &[b]);
        assert_eq!(reg.children(b).collect::<Vec<_>>(), vec![a]);
        assert_eq!(reg.children(a).count(), 0);
    }
}
