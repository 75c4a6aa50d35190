use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::array::Array2;
use crate::node::{Node, NodeKind};
use crate::scalar::Scalar;
use crate::tensor::Tensor;

// Tape — The Wengert list
//
// An append-only log of every operation performed on tensors bound to it.
// Nodes live in a contiguous arena and reference their parents by index;
// since an operation can only consume already-existing tensors, parents
// always sit at strictly smaller indices and the tape is topologically
// sorted by construction. No ownership cycle exists.
//
// The tape is shared between tensors through an Rc<RefCell<..>> handle:
// cloning a Tape is cheap, and exactly one forward/backward sequence may
// act on it at a time (the engine is single-threaded; the handle is
// deliberately !Send).
//
// RESET POLICY:
//
// `reset()` ends one forward/backward iteration. It retains only the
// trainable Input nodes (the model parameters), compacts their indices to
// the front of the arena preserving order, and re-indexes every surviving
// parameter tensor in place through the index cell the node shares with
// its tensors. Any other tensor handle becomes stale and must be
// re-created against the fresh tape.

struct TapeInner<T: Scalar> {
    nodes: Vec<Node<T>>,
    /// True while every node is Input or ElementWise. Gates non-scalar
    /// gradient seeds (see `Tensor::grad`).
    element_wise_only: bool,
    /// Parameter registry: one index cell per trainable input, in the
    /// order the trainable inputs were appended.
    params: Vec<Rc<Cell<usize>>>,
}

/// Shared handle to an append-only list of operation nodes.
pub struct Tape<T: Scalar> {
    inner: Rc<RefCell<TapeInner<T>>>,
}

impl<T: Scalar> Clone for Tape<T> {
    fn clone(&self) -> Self {
        Tape {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Scalar> Default for Tape<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar> Tape<T> {
    /// Create an empty tape.
    pub fn new() -> Self {
        Tape {
            inner: Rc::new(RefCell::new(TapeInner {
                nodes: Vec::new(),
                element_wise_only: true,
                params: Vec::new(),
            })),
        }
    }

    /// Number of nodes currently recorded.
    pub fn len(&self) -> usize {
        self.inner.borrow().nodes.len()
    }

    /// Whether the tape holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every recorded node is an input or an element-wise
    /// operation. Once false, only seeds with a dimension equal to 1 can
    /// be differentiated.
    pub fn element_wise_only(&self) -> bool {
        self.inner.borrow().element_wise_only
    }

    /// Whether two handles refer to the same tape.
    pub fn is_same(&self, other: &Tape<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of registered trainable parameters.
    pub fn param_count(&self) -> usize {
        self.inner.borrow().params.len()
    }

    /// Tape indices of the trainable inputs, in registration order.
    pub fn trainable_indices(&self) -> Vec<usize> {
        self.inner
            .borrow()
            .params
            .iter()
            .map(|cell| cell.get())
            .collect()
    }

    /// Tape index and shape of every trainable input, in registration
    /// order. The gradient accumulator sizes its slots from this.
    pub fn trainable_slots(&self) -> Vec<(usize, (usize, usize))> {
        let inner = self.inner.borrow();
        inner
            .params
            .iter()
            .map(|cell| {
                let index = cell.get();
                (index, inner.nodes[index].shape())
            })
            .collect()
    }

    /// Shape of the node at `index`.
    pub fn node_shape(&self, index: usize) -> Option<(usize, usize)> {
        self.inner.borrow().nodes.get(index).map(Node::shape)
    }

    /// Shapes of all recorded nodes, by tape position.
    pub fn node_shapes(&self) -> Vec<(usize, usize)> {
        self.inner.borrow().nodes.iter().map(Node::shape).collect()
    }

    /// Append an Input node and return the index cell shared with the
    /// tensors bound to it. Allocates a parameter-registry slot when
    /// `trainable`.
    pub(crate) fn push_input(&self, rows: usize, cols: usize, trainable: bool) -> Rc<Cell<usize>> {
        let mut inner = self.inner.borrow_mut();
        let index = inner.nodes.len();
        let handle = Rc::new(Cell::new(index));
        let mut node = Node::input(rows, cols, trainable, handle.clone());
        if trainable {
            if let NodeKind::Input { param_slot, .. } = &mut node.kind {
                *param_slot = Some(inner.params.len());
            }
            inner.params.push(handle.clone());
        }
        inner.nodes.push(node);
        handle
    }

    /// Append a derived node. Clears `element_wise_only` for every
    /// shape-changing kind.
    pub(crate) fn push_derived(
        &self,
        kind: NodeKind,
        rows: usize,
        cols: usize,
        parents: Vec<usize>,
        local: Vec<Array2<T>>,
    ) -> usize {
        let mut inner = self.inner.borrow_mut();
        if !kind.is_element_wise() {
            inner.element_wise_only = false;
        }
        let index = inner.nodes.len();
        inner.nodes.push(Node {
            kind,
            rows,
            cols,
            parents,
            local,
        });
        index
    }

    /// Clear the element-wise-only flag without appending a node. Used by
    /// `split` with `ChannelSplit::NoSplit`, which records nothing but
    /// still commits the graph to scalar-seeded gradients.
    pub(crate) fn mark_shape_changing(&self) {
        self.inner.borrow_mut().element_wise_only = false;
    }

    /// Run `f` over the node arena. The reverse pass reads the tape
    /// through this without cloning it.
    pub(crate) fn with_nodes<R>(&self, f: impl FnOnce(&[Node<T>]) -> R) -> R {
        f(&self.inner.borrow().nodes)
    }

    /// Delete every node that is not a trainable Input, compact the
    /// survivors to the front preserving order, update the parameter
    /// registry, and re-index the surviving parameter tensors in place.
    /// Returns the new tape length.
    pub fn reset(&self) -> usize {
        let mut inner = self.inner.borrow_mut();
        let old = std::mem::take(&mut inner.nodes);
        inner.params.clear();

        let mut kept: Vec<Node<T>> = old
            .into_iter()
            .filter(Node::is_trainable_input)
            .collect();

        for (new_index, node) in kept.iter_mut().enumerate() {
            if let NodeKind::Input {
                param_slot, handle, ..
            } = &mut node.kind
            {
                handle.set(new_index);
                *param_slot = Some(inner.params.len());
                inner.params.push(handle.clone());
            }
        }

        inner.nodes = kept;
        inner.element_wise_only = true;
        inner.nodes.len()
    }

    /// Remove every node, trainable or not, and empty the parameter
    /// registry. Models use this before re-registering parameters from a
    /// saved file.
    pub fn clear(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.nodes.clear();
        inner.params.clear();
        inner.element_wise_only = true;
    }

    /// Toggle the trainable flag of the Input node `tensor` is bound to.
    /// Has no effect when the tensor names a non-Input node.
    pub fn set_trainable(&self, tensor: &Tensor<T>, on: bool) {
        let idx = tensor.index();
        let mut inner = self.inner.borrow_mut();
        let TapeInner { nodes, params, .. } = &mut *inner;

        let mut removed_slot = None;
        match nodes.get_mut(idx).map(|n| &mut n.kind) {
            Some(NodeKind::Input {
                trainable,
                param_slot,
                handle,
            }) => {
                if on && !*trainable {
                    *trainable = true;
                    *param_slot = Some(params.len());
                    params.push(handle.clone());
                } else if !on && *trainable {
                    *trainable = false;
                    removed_slot = param_slot.take();
                }
            }
            _ => return,
        }

        // Dropping a registry slot renumbers every slot behind it.
        if let Some(slot) = removed_slot {
            params.remove(slot);
            for node in nodes.iter_mut() {
                if let NodeKind::Input {
                    param_slot: Some(s),
                    ..
                } = &mut node.kind
                {
                    if *s > slot {
                        *s -= 1;
                    }
                }
            }
        }
    }
}
