//! s-t minimum cut on a capacitated graph (Dinic's algorithm).
//!
//! Built for GrabCut's grid graphs: one node per pixel, terminal
//! capacities towards a source (foreground) and a sink (background),
//! and symmetric neighbour capacities. Adjacency is stored as
//! index-linked edge lists and the blocking-flow search is iterative,
//! so large images never grow the call stack.

/// Residual capacities at or below this are treated as saturated.
const CAPACITY_EPSILON: f64 = 1e-10;

const NONE: usize = usize::MAX;

/// A flow network over `n` inner nodes plus implicit source and sink.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    nodes: usize,
    head: Vec<usize>,
    next: Vec<usize>,
    to: Vec<usize>,
    capacity: Vec<f64>,
}

impl FlowGraph {
    /// Create a graph with `nodes` inner nodes.
    #[must_use]
    pub fn new(nodes: usize) -> Self {
        Self::with_capacity(nodes, 0)
    }

    /// Create a graph and reserve room for `edges` undirected edges.
    #[must_use]
    pub fn with_capacity(nodes: usize, edges: usize) -> Self {
        Self {
            nodes,
            head: vec![NONE; nodes + 2],
            next: Vec::with_capacity(2 * edges),
            to: Vec::with_capacity(2 * edges),
            capacity: Vec::with_capacity(2 * edges),
        }
    }

    /// Number of inner nodes.
    #[must_use]
    pub const fn node_count(&self) -> usize {
        self.nodes
    }

    const fn source(&self) -> usize {
        self.nodes
    }

    const fn sink(&self) -> usize {
        self.nodes + 1
    }

    /// Add an edge `u → v` with `capacity` and `v → u` with `reverse`.
    ///
    /// Edges are stored in pairs so `e ^ 1` is always the partner arc.
    pub fn add_edge(&mut self, u: usize, v: usize, capacity: f64, reverse: f64) {
        self.push_arc(u, v, capacity.max(0.0));
        self.push_arc(v, u, reverse.max(0.0));
    }

    /// Connect `node` to the terminals.
    ///
    /// `source` is the cost of separating the node from the source
    /// (labeling it background), `sink` the cost of separating it from
    /// the sink. Only their difference affects the cut, so a single
    /// terminal arc carries it.
    pub fn add_terminal_weights(&mut self, node: usize, source: f64, sink: f64) {
        let delta = source - sink;
        if delta > 0.0 {
            self.add_edge(self.source(), node, delta, 0.0);
        } else if delta < 0.0 {
            self.add_edge(node, self.sink(), -delta, 0.0);
        }
    }

    fn push_arc(&mut self, from: usize, to: usize, capacity: f64) {
        let index = self.to.len();
        self.to.push(to);
        self.capacity.push(capacity);
        self.next.push(self.head[from]);
        self.head[from] = index;
    }

    /// Push the maximum flow from source to sink and return its value.
    pub fn max_flow(&mut self) -> f64 {
        let total_nodes = self.nodes + 2;
        let mut level = vec![-1i64; total_nodes];
        let mut cursor = vec![NONE; total_nodes];
        let mut flow = 0.0;
        while self.build_levels(&mut level) {
            cursor.copy_from_slice(&self.head);
            flow += self.blocking_flow(&mut level, &mut cursor);
        }
        flow
    }

    /// BFS layering of the residual graph. Returns whether the sink is
    /// reachable.
    fn build_levels(&self, level: &mut [i64]) -> bool {
        level.fill(-1);
        let mut queue = std::collections::VecDeque::new();
        level[self.source()] = 0;
        queue.push_back(self.source());
        while let Some(u) = queue.pop_front() {
            let mut e = self.head[u];
            while e != NONE {
                let v = self.to[e];
                if level[v] < 0 && self.capacity[e] > CAPACITY_EPSILON {
                    level[v] = level[u] + 1;
                    queue.push_back(v);
                }
                e = self.next[e];
            }
        }
        level[self.sink()] >= 0
    }

    /// Saturate every shortest augmenting path of the current layering.
    fn blocking_flow(&mut self, level: &mut [i64], cursor: &mut [usize]) -> f64 {
        let (source, sink) = (self.source(), self.sink());
        let mut total = 0.0;
        let mut path: Vec<usize> = Vec::new();
        let mut u = source;
        loop {
            if u == sink {
                let bottleneck = path
                    .iter()
                    .map(|&e| self.capacity[e])
                    .fold(f64::INFINITY, f64::min);
                for &e in &path {
                    self.capacity[e] -= bottleneck;
                    self.capacity[e ^ 1] += bottleneck;
                }
                total += bottleneck;
                // Retreat to the tail of the first saturated arc.
                let first_saturated = path
                    .iter()
                    .position(|&e| self.capacity[e] <= CAPACITY_EPSILON)
                    .unwrap_or(0);
                path.truncate(first_saturated);
                u = path.last().map_or(source, |&e| self.to[e]);
                continue;
            }

            let mut advanced = false;
            while cursor[u] != NONE {
                let e = cursor[u];
                let v = self.to[e];
                if self.capacity[e] > CAPACITY_EPSILON && level[v] == level[u] + 1 {
                    path.push(e);
                    u = v;
                    advanced = true;
                    break;
                }
                cursor[u] = self.next[e];
            }
            if advanced {
                continue;
            }

            // Dead end: prune the node and step back along the path.
            level[u] = -1;
            match path.pop() {
                None => break,
                Some(e) => {
                    u = self.to[e ^ 1];
                    cursor[u] = self.next[e];
                }
            }
        }
        total
    }

    /// After [`max_flow`](Self::max_flow): for each inner node, whether
    /// it remains reachable from the source in the residual graph.
    #[must_use]
    pub fn source_side(&self) -> Vec<bool> {
        let mut seen = vec![false; self.nodes + 2];
        let mut stack = vec![self.source()];
        seen[self.source()] = true;
        while let Some(u) = stack.pop() {
            let mut e = self.head[u];
            while e != NONE {
                let v = self.to[e];
                if !seen[v] && self.capacity[e] > CAPACITY_EPSILON {
                    seen[v] = true;
                    stack.push(v);
                }
                e = self.next[e];
            }
        }
        seen.truncate(self.nodes);
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_node_follows_stronger_terminal() {
        let mut g = FlowGraph::new(2);
        g.add_terminal_weights(0, 5.0, 1.0);
        g.add_terminal_weights(1, 1.0, 5.0);
        let flow = g.max_flow();
        assert!(flow.abs() < 1e-12);
        assert_eq!(g.source_side(), vec![true, false]);
    }

    #[test]
    fn chain_flow_is_bottleneck() {
        // source → 0 → 1 → 2 → sink with a weak middle link.
        let mut g = FlowGraph::new(3);
        g.add_terminal_weights(0, 10.0, 0.0);
        g.add_edge(0, 1, 7.0, 7.0);
        g.add_edge(1, 2, 2.0, 2.0);
        g.add_terminal_weights(2, 0.0, 10.0);
        let flow = g.max_flow();
        assert!((flow - 2.0).abs() < 1e-9);
        assert_eq!(g.source_side(), vec![true, true, false]);
    }

    #[test]
    fn classic_network_max_flow() {
        // Textbook example (CLRS 26.1) with max flow 23.
        // Inner nodes: v1..v4 -> 0..3.
        let mut g = FlowGraph::new(4);
        g.add_terminal_weights(0, 16.0, 0.0);
        g.add_terminal_weights(1, 13.0, 0.0);
        g.add_edge(0, 2, 12.0, 0.0);
        g.add_edge(1, 0, 4.0, 0.0);
        g.add_edge(2, 1, 9.0, 0.0);
        g.add_edge(1, 3, 14.0, 0.0);
        g.add_edge(3, 2, 7.0, 0.0);
        g.add_terminal_weights(2, 0.0, 20.0);
        g.add_terminal_weights(3, 0.0, 4.0);
        let flow = g.max_flow();
        assert!((flow - 23.0).abs() < 1e-9, "flow = {flow}");
    }

    #[test]
    fn strong_smoothness_pulls_neighbor_across() {
        // Node 1 slightly prefers the sink but is tied strongly to node 0.
        let mut g = FlowGraph::new(2);
        g.add_terminal_weights(0, 100.0, 0.0);
        g.add_terminal_weights(1, 0.0, 1.0);
        g.add_edge(0, 1, 50.0, 50.0);
        g.max_flow();
        assert_eq!(g.source_side(), vec![true, true]);
    }

    #[test]
    fn isolated_nodes_default_to_sink_side() {
        let mut g = FlowGraph::new(3);
        g.max_flow();
        assert_eq!(g.source_side(), vec![false, false, false]);
    }

    #[test]
    fn grid_graph_splits_along_weak_column() {
        // 6x4 grid: left half tied to source, right half to sink, weak
        // links between columns 2 and 3.
        let (w, h) = (6usize, 4usize);
        let mut g = FlowGraph::new(w * h);
        for y in 0..h {
            for x in 0..w {
                let i = y * w + x;
                if x == 0 {
                    g.add_terminal_weights(i, 100.0, 0.0);
                }
                if x == w - 1 {
                    g.add_terminal_weights(i, 0.0, 100.0);
                }
                if x + 1 < w {
                    let weight = if x == 2 { 0.5 } else { 10.0 };
                    g.add_edge(i, i + 1, weight, weight);
                }
                if y + 1 < h {
                    g.add_edge(i, i + w, 10.0, 10.0);
                }
            }
        }
        let flow = g.max_flow();
        assert!((flow - 2.0).abs() < 1e-9, "flow = {flow}");
        let side = g.source_side();
        for y in 0..h {
            for x in 0..w {
                assert_eq!(side[y * w + x], x <= 2, "({x},{y})");
            }
        }
    }
}
