//! Strongly connected components over an arbitrary successor function.
//!
//! An iterative rendition of Tarjan's algorithm: `O(V + E)` time, explicit
//! DFS frames instead of recursion so deep chains cannot overflow the stack.
//! The graph is described only by a node list and a successor closure, which
//! keeps this module independent of the partition graph's storage and lets
//! tests drive it with plain adjacency lists.

use std::collections::HashMap;
use std::hash::Hash;

/// Per-node bookkeeping.
#[derive(Debug, Clone, Copy)]
struct NodeState {
    /// DFS discovery index.
    index: usize,
    /// Smallest discovery index reachable while the node is on the stack.
    low_link: usize,
    on_stack: bool,
}

/// A DFS frame: a node and the cursor into its successors.
struct Frame<N> {
    node: N,
    successors: Vec<N>,
    next: usize,
}

struct Tarjan<N, F> {
    successors: F,
    state: HashMap<N, NodeState>,
    stack: Vec<N>,
    next_index: usize,
    components: Vec<Vec<N>>,
}

/// Finds the strongly connected components reachable from `nodes`.
///
/// Roots are visited in the order `nodes` yields them; nodes already
/// assigned to a component are skipped. Components come out in reverse
/// topological order: if component `A` reaches component `B`, `B` is
/// emitted first. Every node appears in exactly one component, including
/// singleton nodes without a self edge.
pub fn strongly_connected_components<N, I, F, S>(
    nodes: I,
    successors: F,
) -> Vec<Vec<N>>
where
    N: Copy + Eq + Hash,
    I: IntoIterator<Item = N>,
    F: FnMut(N) -> S,
    S: IntoIterator<Item = N>,
{
    let mut tarjan = Tarjan {
        successors,
        state: HashMap::new(),
        stack: Vec::new(),
        next_index: 0,
        components: Vec::new(),
    };
    for root in nodes {
        if !tarjan.state.contains_key(&root) {
            tarjan.visit(root);
        }
    }
    tarjan.components
}

impl<N, F, S> Tarjan<N, F>
where
    N: Copy + Eq + Hash,
    F: FnMut(N) -> S,
    S: IntoIterator<Item = N>,
{
    fn visit(&mut self, root: N) {
        let mut frames = vec![self.discover(root)];

        while let Some(frame) = frames.last_mut() {
            if let Some(&succ) = frame.successors.get(frame.next) {
                frame.next += 1;
                let node = frame.node;
                match self.state.get(&succ).copied() {
                    None => frames.push(self.discover(succ)),
                    Some(succ_state) if succ_state.on_stack => {
                        let state = self.state_mut(node);
                        state.low_link = state.low_link.min(succ_state.index);
                    }
                    // Already assigned to a finished component.
                    Some(_) => {}
                }
                continue;
            }

            let node = frame.node;
            frames.pop();
            self.finish(node, frames.last().map(|parent| parent.node));
        }
    }

    fn discover(&mut self, node: N) -> Frame<N> {
        let index = self.next_index;
        self.next_index += 1;
        self.state.insert(
            node,
            NodeState {
                index,
                low_link: index,
                on_stack: true,
            },
        );
        self.stack.push(node);
        Frame {
            node,
            successors: (self.successors)(node).into_iter().collect(),
            next: 0,
        }
    }

    fn finish(&mut self, node: N, parent: Option<N>) {
        let state = self.state[&node];

        if let Some(parent) = parent {
            let parent_state = self.state_mut(parent);
            parent_state.low_link = parent_state.low_link.min(state.low_link);
        }

        if state.low_link != state.index {
            return;
        }

        // `node` roots a component: everything above it on the stack
        // belongs to it.
        let mut component = Vec::new();
        while let Some(member) = self.stack.pop() {
            self.state_mut(member).on_stack = false;
            component.push(member);
            if member == node {
                break;
            }
        }
        self.components.push(component);
    }

    fn state_mut(&mut self, node: N) -> &mut NodeState {
        self.state
            .get_mut(&node)
            .expect("discovered nodes always have state")
    }
}
