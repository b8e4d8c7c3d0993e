use slab::Slab;
use std::collections::HashMap;
use std::collections::HashSet;

use crate::runtime::Block;
use crate::runtime::Error;

/// The analyzed graph handed to a driver: dependency maps, the execution
/// order and the per-block skip sets. Immutable once built.
#[derive(Debug)]
pub struct Topology {
    order: Vec<usize>,
    dependencies: HashMap<usize, Vec<usize>>,
    dependents: HashMap<usize, Vec<usize>>,
    skip: HashMap<usize, HashSet<usize>>,
}

impl Topology {
    /// Analyze the connection set.
    ///
    /// Fails with a topology error when the dependency graph contains a
    /// cycle. Ties in the execution order are broken by insertion order so
    /// runs are reproducible.
    pub(crate) fn build(
        blocks: &Slab<Block>,
        connections: &HashMap<(usize, usize), (usize, usize)>,
    ) -> Result<Topology, Error> {
        let mut dependencies: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
        for (id, _) in blocks.iter() {
            dependencies.insert(id, Vec::new());
            dependents.insert(id, Vec::new());
        }

        let mut edges: Vec<_> = connections.iter().map(|(d, s)| (d.0, s.0)).collect();
        edges.sort_unstable();
        for (dst, src) in edges {
            let deps = dependencies.get_mut(&dst).ok_or(Error::InvalidBlock)?;
            if !deps.contains(&src) {
                deps.push(src);
            }
            let deps = dependents.get_mut(&src).ok_or(Error::InvalidBlock)?;
            if !deps.contains(&dst) {
                deps.push(dst);
            }
        }

        // repeatedly pick the first block whose dependencies are all ordered
        let mut order = Vec::with_capacity(blocks.len());
        let mut placed: HashSet<usize> = HashSet::new();
        let mut remaining: Vec<usize> = blocks.iter().map(|(i, _)| i).collect();
        remaining.sort_unstable();
        while !remaining.is_empty() {
            let ready = remaining
                .iter()
                .position(|id| dependencies[id].iter().all(|d| placed.contains(d)));
            match ready {
                Some(pos) => {
                    let id = remaining.remove(pos);
                    placed.insert(id);
                    order.push(id);
                }
                None => {
                    let names: Vec<&str> =
                        remaining.iter().map(|id| blocks[*id].name()).collect();
                    return Err(Error::Topology(format!(
                        "cycle in dependency graph involving {names:?}"
                    )));
                }
            }
        }

        // transitive downstream closure per block
        let mut skip: HashMap<usize, HashSet<usize>> = HashMap::new();
        for (id, _) in blocks.iter() {
            let mut seen = HashSet::new();
            let mut stack: Vec<usize> = dependents[&id].clone();
            while let Some(next) = stack.pop() {
                if seen.insert(next) {
                    stack.extend(dependents[&next].iter().copied());
                }
            }
            skip.insert(id, seen);
        }

        Ok(Topology {
            order,
            dependencies,
            dependents,
            skip,
        })
    }

    /// Blocks in execution order: every block after all of its dependencies.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Transitive downstream closure of a block.
    pub fn skip_set(&self, id: usize) -> &HashSet<usize> {
        &self.skip[&id]
    }

    /// Blocks whose outputs feed this block's inputs.
    pub fn dependencies(&self, id: usize) -> &[usize] {
        &self.dependencies[&id]
    }

    /// Immediate downstream consumers of this block.
    pub fn dependents(&self, id: usize) -> &[usize] {
        &self.dependents[&id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::Apply;
    use crate::blocks::NullSink;
    use crate::blocks::VectorSource;
    use crate::runtime::Flowgraph;
    use crate::runtime::SampleVec;
    use crate::runtime::FLOAT32;

    fn src() -> crate::runtime::Block {
        VectorSource::new(SampleVec::from_slice(FLOAT32, &[0.0f32]), 1.0)
    }

    fn passthrough() -> crate::runtime::Block {
        Apply::new(|x| x)
    }

    #[test]
    fn order_respects_dependencies() -> crate::Result<()> {
        let mut fg = Flowgraph::new();
        // insert in reverse so the sort has to work for its result
        let snk = fg.add_block(NullSink::new(FLOAT32));
        let mid = fg.add_block(passthrough());
        let a = fg.add_block(src());
        fg.connect(a, "out", mid, "in")?;
        fg.connect(mid, "out", snk, "in")?;

        let t = Topology::build(fg_blocks(&fg), fg.connections())?;
        assert_eq!(t.order(), &[a.0, mid.0, snk.0]);
        assert_eq!(t.dependencies(mid.0), &[a.0]);
        assert_eq!(t.dependents(mid.0), &[snk.0]);
        Ok(())
    }

    #[test]
    fn insertion_order_breaks_ties() -> crate::Result<()> {
        let mut fg = Flowgraph::new();
        let a = fg.add_block(src());
        let b = fg.add_block(src());
        let s1 = fg.add_block(NullSink::new(FLOAT32));
        let s2 = fg.add_block(NullSink::new(FLOAT32));
        fg.connect(b, "out", s2, "in")?;
        fg.connect(a, "out", s1, "in")?;

        let t = Topology::build(fg_blocks(&fg), fg.connections())?;
        assert_eq!(t.order(), &[a.0, b.0, s1.0, s2.0]);
        Ok(())
    }

    #[test]
    fn cycle_is_a_topology_error() -> crate::Result<()> {
        let mut fg = Flowgraph::new();
        let x = fg.add_block(passthrough());
        let y = fg.add_block(passthrough());
        fg.connect(x, "out", y, "in")?;
        fg.connect(y, "out", x, "in")?;

        let err = Topology::build(fg_blocks(&fg), fg.connections()).unwrap_err();
        assert!(matches!(err, Error::Topology(_)));
        Ok(())
    }

    #[test]
    fn skip_sets_are_transitive_downstream_closures() -> crate::Result<()> {
        let mut fg = Flowgraph::new();
        let a = fg.add_block(src());
        let b = fg.add_block(passthrough());
        let c = fg.add_block(passthrough());
        let d = fg.add_block(crate::blocks::Multiply::new());
        let snk = fg.add_block(NullSink::new(FLOAT32));
        fg.connect(a, "out", b, "in")?;
        fg.connect(a, "out", c, "in")?;
        fg.connect(b, "out", d, "in1")?;
        fg.connect(c, "out", d, "in2")?;
        fg.connect(d, "out", snk, "in")?;

        let t = Topology::build(fg_blocks(&fg), fg.connections())?;
        let expect =
            |ids: &[usize]| ids.iter().copied().collect::<std::collections::HashSet<_>>();
        assert_eq!(t.skip_set(a.0), &expect(&[b.0, c.0, d.0, snk.0]));
        assert_eq!(t.skip_set(b.0), &expect(&[d.0, snk.0]));
        assert_eq!(t.skip_set(snk.0), &expect(&[]));
        Ok(())
    }

    fn fg_blocks(fg: &Flowgraph) -> &Slab<Block> {
        fg.blocks()
    }
}
