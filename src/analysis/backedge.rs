//! Back-edge detection over a function's control flow graph.
//!
//! For every block `B` the detector computes the set of blocks reachable
//! from `B` by forward succession (excluding `B` itself). An edge
//! `P -> B` is then a back-edge iff `P` is reachable from `B` - i.e. the
//! edge closes a cycle through `B`.
//!
//! Range merging skips back-edges entirely. Values therefore never flow
//! around a loop within a single pass over the function, which is what
//! lets the analyzer terminate on a finite lattice without widening.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ir::{BlockId, Function};

/// Per-function back-edge relation.
#[derive(Debug, Clone, Default)]
pub struct BackEdgeMap {
    /// For each block, the blocks transitively reachable from it.
    reachable: FxHashMap<BlockId, FxHashSet<BlockId>>,
}

impl BackEdgeMap {
    /// Computes the relation for `func` by worklist traversal of
    /// successors from every block.
    #[must_use]
    pub fn compute(func: &Function) -> Self {
        let mut reachable: FxHashMap<BlockId, FxHashSet<BlockId>> = FxHashMap::default();
        for (block, _) in func.blocks() {
            let seen = reachable.entry(block).or_default();
            let mut worklist = vec![block];
            while let Some(current) = worklist.pop() {
                for succ in func.successors(current) {
                    if succ != block && seen.insert(succ) {
                        worklist.push(succ);
                    }
                }
            }
        }
        Self { reachable }
    }

    /// Returns `true` if the edge `pred -> block` closes a cycle through
    /// `block`.
    #[must_use]
    pub fn is_back_edge(&self, block: BlockId, pred: BlockId) -> bool {
        self.reachable
            .get(&block)
            .is_some_and(|set| set.contains(&pred))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, Predicate, Type};

    // entry -> header -> body -> header (loop), header -> exit
    fn loop_function() -> Function {
        let mut b = FunctionBuilder::new("f", vec![Type::Int(32)], Type::Void);
        let entry = b.add_block();
        let header = b.add_block();
        let body = b.add_block();
        let exit = b.add_block();
        b.switch_to(entry);
        b.jump(header).unwrap();
        b.switch_to(header);
        let cond = b
            .icmp(Predicate::Slt, b.arg(0), b.const_int(32, 10))
            .unwrap();
        b.branch(cond, body, exit).unwrap();
        b.switch_to(body);
        b.jump(header).unwrap();
        b.switch_to(exit);
        b.ret(None).unwrap();
        b.finish().unwrap()
    }

    #[test]
    fn test_loop_back_edge_detected() {
        let func = loop_function();
        let edges = BackEdgeMap::compute(&func);
        let header = BlockId::new(1);
        let body = BlockId::new(2);
        // body is reachable from header, so body -> header is a back-edge.
        assert!(edges.is_back_edge(header, body));
        // entry -> header is a forward edge.
        assert!(!edges.is_back_edge(header, BlockId::new(0)));
        // header -> body is a forward edge.
        assert!(!edges.is_back_edge(body, header));
    }

    #[test]
    fn test_straight_line_has_no_back_edges() {
        let mut b = FunctionBuilder::new("g", vec![], Type::Void);
        let entry = b.add_block();
        let next = b.add_block();
        b.switch_to(entry);
        b.jump(next).unwrap();
        b.switch_to(next);
        b.ret(None).unwrap();
        let func = b.finish().unwrap();

        let edges = BackEdgeMap::compute(&func);
        assert!(!edges.is_back_edge(BlockId::new(1), BlockId::new(0)));
    }
}
