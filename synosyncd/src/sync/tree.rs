use std::path::PathBuf;

pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNode {
    pub name: String,
    pub remote_path: String,
    pub local_path: PathBuf,
    pub is_dir: bool,
    pub size: u64,
    pub children: Vec<NodeId>,
}

/// Arena of listed entries. Children are pushed before their parent, so a
/// directory node is only created once its listing is complete.
#[derive(Debug, Default, Clone)]
pub struct RemoteTree {
    nodes: Vec<RemoteNode>,
    roots: Vec<NodeId>,
}

impl RemoteTree {
    pub fn push(&mut self, node: RemoteNode) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn set_roots(&mut self, roots: Vec<NodeId>) {
        self.roots = roots;
    }

    pub fn node(&self, id: NodeId) -> &RemoteNode {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Files in depth-first listing order.
    pub fn files(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.visit(&mut |id, node, _| {
            if !node.is_dir {
                out.push(id);
            }
        });
        out
    }

    /// One line per entry, indented with a tab per level.
    pub fn render_listing(&self) -> String {
        let mut out = String::new();
        self.visit(&mut |_, node, depth| {
            out.push_str(&"\t".repeat(depth));
            out.push_str(&node.name);
            out.push('\n');
        });
        out
    }

    fn visit(&self, f: &mut dyn FnMut(NodeId, &RemoteNode, usize)) {
        let mut stack: Vec<(NodeId, usize)> =
            self.roots.iter().rev().map(|&id| (id, 0)).collect();
        while let Some((id, depth)) = stack.pop() {
            let node = &self.nodes[id];
            f(id, node, depth);
            stack.extend(node.children.iter().rev().map(|&child| (child, depth + 1)));
        }
    }
}
