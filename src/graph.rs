//! Directed connectivity between cells.
//!
//! The graph keeps its evaluation order and depth layers up to date on every
//! change, so evaluating a network never has to sort anything.

use std::collections::BTreeSet;
use std::fmt;

use crate::cell::Cell;
use crate::error::{Error, Result};

/// Identifies a cell inside its graph. Ids follow insertion order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId(usize);

impl CellId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The output of `source` is part of the input of `target`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Edge {
    pub source: CellId,
    pub target: CellId,
}

/// Edges plus everything derived from them.
#[derive(Clone, Debug, Default)]
pub(crate) struct Topology {
    pub(crate) edges: Vec<Edge>,
    pub(crate) recurrent_edges: Vec<Edge>,
    /// Edge indices entering each cell, in insertion order.
    pub(crate) incoming: Vec<Vec<usize>>,
    /// Edge indices leaving each cell, in insertion order.
    pub(crate) outgoing: Vec<Vec<usize>>,
    pub(crate) order: Vec<CellId>,
    pub(crate) layers: Vec<Vec<CellId>>,
}

impl Topology {
    /// Returns true if `to` can be reached from `from` along edges.
    fn reaches(&self, from: CellId, to: CellId) -> bool {
        let mut seen = vec![false; self.outgoing.len()];
        let mut stack = vec![from.0];
        while let Some(i) = stack.pop() {
            if i == to.0 {
                return true;
            }
            if seen[i] {
                continue;
            }
            seen[i] = true;
            stack.extend(self.outgoing[i].iter().map(|&e| self.edges[e].target.0));
        }
        false
    }

    fn rebuild(&mut self, cells: usize) {
        self.incoming = vec![Vec::new(); cells];
        self.outgoing = vec![Vec::new(); cells];
        for (i, edge) in self.edges.iter().enumerate() {
            self.outgoing[edge.source.0].push(i);
            self.incoming[edge.target.0].push(i);
        }

        // Kahn's algorithm, always taking the lowest ready id.
        let mut indegree: Vec<usize> = self.incoming.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = (0..cells).filter(|&i| indegree[i] == 0).collect();
        self.order = Vec::with_capacity(cells);
        loop {
            let i = match ready.iter().next() {
                Some(&i) => i,
                None => break,
            };
            ready.remove(&i);
            self.order.push(CellId(i));
            for &e in &self.outgoing[i] {
                let target = self.edges[e].target.0;
                indegree[target] -= 1;
                if indegree[target] == 0 {
                    ready.insert(target);
                }
            }
        }
        debug_assert_eq!(self.order.len(), cells);

        let mut depth = vec![0; cells];
        for id in &self.order {
            depth[id.0] = self.incoming[id.0]
                .iter()
                .map(|&e| depth[self.edges[e].source.0] + 1)
                .max()
                .unwrap_or(0);
        }
        let layer_count = depth.iter().max().map_or(0, |d| d + 1);
        self.layers = vec![Vec::new(); layer_count];
        for (i, &d) in depth.iter().enumerate() {
            self.layers[d].push(CellId(i));
        }
    }
}

/// A set of cells and the directed edges between them.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    cells: Vec<Cell>,
    topology: Topology,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    /// Adds a cell and returns its id.
    pub fn add(&mut self, cell: Cell) -> CellId {
        let id = CellId(self.cells.len());
        self.cells.push(cell);
        self.topology.rebuild(self.cells.len());
        id
    }

    /// Adds a directed edge from `source` to `target`.
    ///
    /// An edge that would close a cycle is only accepted between recurrent
    /// cells; it is recorded as a recurrent edge and carries no data, since
    /// recurrent cells already feed back their own previous output.
    /// Otherwise it fails with [`Error::Cycle`] and the graph is left as it
    /// was.
    pub fn connect(&mut self, source: CellId, target: CellId) -> Result<()> {
        self.check(source)?;
        self.check(target)?;
        let edge = Edge { source, target };

        if self.topology.reaches(target, source) {
            if !(self.cells[source.0].is_recurrent() && self.cells[target.0].is_recurrent()) {
                return Err(Error::Cycle {
                    from: source,
                    to: target,
                });
            }
            debug!("recurrent edge {} -> {}", source, target);
            self.topology.recurrent_edges.push(edge);
            return Ok(());
        }

        self.topology.edges.push(edge);
        self.topology.rebuild(self.cells.len());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell(&self, id: CellId) -> Result<&Cell> {
        self.cells.get(id.0).ok_or(Error::UnknownCell(id))
    }

    pub fn cell_mut(&mut self, id: CellId) -> Result<&mut Cell> {
        self.cells.get_mut(id.0).ok_or(Error::UnknownCell(id))
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn edges(&self) -> &[Edge] {
        &self.topology.edges
    }

    /// Cycle-closing edges accepted between recurrent cells.
    pub fn recurrent_edges(&self) -> &[Edge] {
        &self.topology.recurrent_edges
    }

    /// Topological order of all cells, ties broken by insertion order.
    pub fn evaluation_order(&self) -> &[CellId] {
        &self.topology.order
    }

    /// Cells grouped by depth. No cell depends on another cell of the same
    /// layer, so a layer can be evaluated concurrently.
    pub fn layers(&self) -> &[Vec<CellId>] {
        &self.topology.layers
    }

    /// Cells feeding `id`, in the order their edges were added.
    pub fn fan_in(&self, id: CellId) -> Vec<CellId> {
        self.topology.incoming[id.0]
            .iter()
            .map(|&e| self.topology.edges[e].source)
            .collect()
    }

    /// Cells fed by `id`, in the order their edges were added.
    pub fn fan_out(&self, id: CellId) -> Vec<CellId> {
        self.topology.outgoing[id.0]
            .iter()
            .map(|&e| self.topology.edges[e].target)
            .collect()
    }

    /// Cells without fan-in; they receive the network input.
    pub fn sources(&self) -> Vec<CellId> {
        self.ids_where(|i| self.topology.incoming[i].is_empty())
    }

    /// Cells without fan-out; their outputs form the network output.
    pub fn sinks(&self) -> Vec<CellId> {
        self.ids_where(|i| self.topology.outgoing[i].is_empty())
    }

    pub(crate) fn parts_mut(&mut self) -> (&Topology, &mut [Cell]) {
        (&self.topology, &mut self.cells)
    }

    fn ids_where<F>(&self, pred: F) -> Vec<CellId>
    where
        F: Fn(usize) -> bool,
    {
        (0..self.cells.len())
            .filter(|&i| pred(i))
            .map(CellId)
            .collect()
    }

    fn check(&self, id: CellId) -> Result<()> {
        if id.0 < self.cells.len() {
            Ok(())
        } else {
            Err(Error::UnknownCell(id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activator::Activator;

    fn cell(name: &str) -> Cell {
        Cell::new(name, 2, 2, Activator::Sigmoid)
    }

    fn recurrent(name: &str) -> Cell {
        Cell::builder(name, 2, 2).recurrent(true).build()
    }

    #[test]
    fn order_is_topological_with_insertion_tie_break() {
        let mut graph = Graph::new();
        let c = graph.add(cell("c"));
        let a = graph.add(cell("a"));
        let b = graph.add(cell("b"));
        let d = graph.add(cell("d"));
        graph.connect(a, c).unwrap();
        graph.connect(b, d).unwrap();

        // `c` was inserted first, so it goes as soon as it is ready.
        assert_eq!(graph.evaluation_order(), &[a, c, b, d]);
        assert_eq!(graph.layers(), &[vec![a, b], vec![c, d]]);
    }

    #[test]
    fn diamond_layers_and_fan() {
        let mut graph = Graph::new();
        let a = graph.add(cell("a"));
        let b = graph.add(cell("b"));
        let c = graph.add(cell("c"));
        let d = graph.add(cell("d"));
        graph.connect(a, c).unwrap();
        graph.connect(a, b).unwrap();
        graph.connect(c, d).unwrap();
        graph.connect(b, d).unwrap();

        assert_eq!(graph.evaluation_order(), &[a, b, c, d]);
        assert_eq!(graph.layers(), &[vec![a], vec![b, c], vec![d]]);
        assert_eq!(graph.fan_out(a), vec![c, b]);
        assert_eq!(graph.fan_in(d), vec![c, b]);
        assert_eq!(graph.sources(), vec![a]);
        assert_eq!(graph.sinks(), vec![d]);
    }

    #[test]
    fn back_edge_to_non_recurrent_cell_is_rejected() {
        let mut graph = Graph::new();
        let a = graph.add(cell("a"));
        let b = graph.add(cell("b"));
        graph.connect(a, b).unwrap();

        let before = graph.edges().to_vec();
        assert_eq!(graph.connect(b, a), Err(Error::Cycle { from: b, to: a }));
        assert_eq!(graph.connect(a, a), Err(Error::Cycle { from: a, to: a }));
        assert_eq!(graph.edges(), &before[..]);
        assert!(graph.recurrent_edges().is_empty());
        assert_eq!(graph.evaluation_order(), &[a, b]);
    }

    #[test]
    fn recurrent_cells_accept_loops() {
        let mut graph = Graph::new();
        let a = graph.add(recurrent("a"));
        let b = graph.add(recurrent("b"));
        graph.connect(a, b).unwrap();
        graph.connect(b, b).unwrap();
        graph.connect(b, a).unwrap();

        assert_eq!(graph.edges().len(), 1);
        assert_eq!(graph.recurrent_edges().len(), 2);
        assert_eq!(graph.evaluation_order(), &[a, b]);
    }

    #[test]
    fn unknown_cells_are_rejected() {
        let mut graph = Graph::new();
        let a = graph.add(cell("a"));
        let ghost = CellId(5);
        assert_eq!(graph.connect(a, ghost), Err(Error::UnknownCell(ghost)));
        assert!(graph.cell(ghost).is_err());
    }
}
