use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use ndarray::{ArrayD, IxDyn};
use strum_macros::Display;

use crate::error::{Error, Result};

/// Unique identifier for a unit in the model graph
pub type UnitId = usize;

/// Token returned by `Model::attach`, used to detach the observer again
pub type HookToken = usize;

/// Dense tensor flowing through a forward pass.
///
/// The profiler only needs shapes, so forward execution propagates
/// zero-filled tensors of the correct dimensions.
#[derive(Debug, Clone)]
pub struct Tensor {
    data: ArrayD<f32>,
}

impl Tensor {
    /// Create a zero-filled tensor of the given shape
    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            data: ArrayD::zeros(IxDyn(shape)),
        }
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Total number of elements
    pub fn element_count(&self) -> usize {
        self.data.len()
    }
}

/// Cost-model dispatch tag for a unit's operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum OpKind {
    Convolution,
    Linear,
    Normalization,
    Activation,
    Pooling,
    Other,
}

/// Operation carried by a unit, with its static attributes.
///
/// `Container` units hold children and perform no computation of their own;
/// every other variant is a leaf operation. `Custom` stands in for operation
/// kinds the cost model does not know; they execute as identity and are
/// costed at zero.
#[derive(Debug, Clone)]
pub enum Op {
    Container,
    Conv2d {
        in_channels: usize,
        out_channels: usize,
        kernel_size: (usize, usize),
        stride: (usize, usize),
        padding: (usize, usize),
        groups: usize,
        bias: bool,
    },
    Linear {
        in_features: usize,
        out_features: usize,
        bias: bool,
    },
    BatchNorm2d {
        num_features: usize,
        affine: bool,
    },
    ReLU,
    LeakyReLU,
    Sigmoid,
    Tanh,
    MaxPool2d {
        kernel_size: (usize, usize),
        stride: (usize, usize),
        padding: (usize, usize),
    },
    AvgPool2d {
        kernel_size: (usize, usize),
        stride: (usize, usize),
        padding: (usize, usize),
    },
    GlobalAvgPool2d,
    Flatten,
    Dropout,
    Custom(String),
}

fn conv_out_dim(
    input: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
) -> std::result::Result<usize, String> {
    let padded = input + 2 * padding;
    if kernel == 0 || stride == 0 {
        return Err("kernel size and stride must be non-zero".to_string());
    }
    if kernel > padded {
        return Err(format!(
            "kernel size {} exceeds padded input extent {}",
            kernel, padded
        ));
    }
    Ok((padded - kernel) / stride + 1)
}

impl Op {
    pub fn kind(&self) -> OpKind {
        match self {
            Op::Conv2d { .. } => OpKind::Convolution,
            Op::Linear { .. } => OpKind::Linear,
            Op::BatchNorm2d { .. } => OpKind::Normalization,
            Op::ReLU | Op::LeakyReLU | Op::Sigmoid | Op::Tanh => OpKind::Activation,
            Op::MaxPool2d { .. } | Op::AvgPool2d { .. } | Op::GlobalAvgPool2d => OpKind::Pooling,
            Op::Container | Op::Flatten | Op::Dropout | Op::Custom(_) => OpKind::Other,
        }
    }

    /// Shapes of the unit's learnable parameter tensors
    pub fn parameter_shapes(&self) -> Vec<Vec<usize>> {
        match self {
            Op::Conv2d {
                in_channels,
                out_channels,
                kernel_size,
                groups,
                bias,
                ..
            } => {
                let mut shapes = vec![vec![
                    *out_channels,
                    in_channels / groups,
                    kernel_size.0,
                    kernel_size.1,
                ]];
                if *bias {
                    shapes.push(vec![*out_channels]);
                }
                shapes
            }
            Op::Linear {
                in_features,
                out_features,
                bias,
            } => {
                let mut shapes = vec![vec![*out_features, *in_features]];
                if *bias {
                    shapes.push(vec![*out_features]);
                }
                shapes
            }
            Op::BatchNorm2d {
                num_features,
                affine,
            } => {
                if *affine {
                    // weight (gamma) and bias (beta)
                    vec![vec![*num_features], vec![*num_features]]
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }

    /// Total count of learnable scalar parameters
    pub fn parameter_count(&self) -> u64 {
        self.parameter_shapes()
            .iter()
            .map(|shape| shape.iter().product::<usize>() as u64)
            .sum()
    }

    /// Output shape for the given input shape, or a reason the shapes
    /// are incompatible.
    pub fn output_shape(&self, input: &[usize]) -> std::result::Result<Vec<usize>, String> {
        match self {
            Op::Container | Op::ReLU | Op::LeakyReLU | Op::Sigmoid | Op::Tanh | Op::Dropout
            | Op::Custom(_) => Ok(input.to_vec()),
            Op::Conv2d {
                in_channels,
                out_channels,
                kernel_size,
                stride,
                padding,
                groups,
                ..
            } => {
                let [n, c, h, w] = four_dims(input)?;
                if c != *in_channels {
                    return Err(format!(
                        "expected {} input channels, got {}",
                        in_channels, c
                    ));
                }
                if *groups == 0 || in_channels % groups != 0 || out_channels % groups != 0 {
                    return Err(format!("invalid group count {}", groups));
                }
                let out_h = conv_out_dim(h, kernel_size.0, stride.0, padding.0)?;
                let out_w = conv_out_dim(w, kernel_size.1, stride.1, padding.1)?;
                Ok(vec![n, *out_channels, out_h, out_w])
            }
            Op::Linear {
                in_features,
                out_features,
                ..
            } => {
                let last = input
                    .last()
                    .copied()
                    .ok_or_else(|| "linear input has no dimensions".to_string())?;
                if last != *in_features {
                    return Err(format!("expected {} input features, got {}", in_features, last));
                }
                let mut out = input.to_vec();
                *out.last_mut().unwrap() = *out_features;
                Ok(out)
            }
            Op::BatchNorm2d { num_features, .. } => {
                if input.len() < 2 || input[1] != *num_features {
                    return Err(format!(
                        "expected {} channels in dimension 1 of {:?}",
                        num_features, input
                    ));
                }
                Ok(input.to_vec())
            }
            Op::MaxPool2d {
                kernel_size,
                stride,
                padding,
            }
            | Op::AvgPool2d {
                kernel_size,
                stride,
                padding,
            } => {
                let [n, c, h, w] = four_dims(input)?;
                let out_h = conv_out_dim(h, kernel_size.0, stride.0, padding.0)?;
                let out_w = conv_out_dim(w, kernel_size.1, stride.1, padding.1)?;
                Ok(vec![n, c, out_h, out_w])
            }
            Op::GlobalAvgPool2d => {
                let [n, c, _, _] = four_dims(input)?;
                Ok(vec![n, c, 1, 1])
            }
            Op::Flatten => {
                if input.is_empty() {
                    return Err("flatten input has no dimensions".to_string());
                }
                let rest: usize = input[1..].iter().product();
                Ok(vec![input[0], rest])
            }
        }
    }
}

fn four_dims(input: &[usize]) -> std::result::Result<[usize; 4], String> {
    match input {
        [n, c, h, w] => Ok([*n, *c, *h, *w]),
        _ => Err(format!("expected a 4-d NCHW tensor, got {:?}", input)),
    }
}

/// One computational unit in the model graph
#[derive(Debug)]
pub struct Unit {
    pub name: String,
    pub op: Op,
    pub parent: Option<UnitId>,
    pub children: Vec<UnitId>,
}

/// Before/after observation pair invoked around a leaf unit's forward
/// computation. The after callback does not run when the computation fails.
pub trait ForwardObserver {
    fn before_forward(&mut self, input: &Tensor);
    fn after_forward(&mut self, input: &Tensor, output: &Tensor);
}

struct HookEntry {
    unit: UnitId,
    // Taken out of the slot while its callback runs so observers never
    // overlap a live borrow of the hook table.
    observer: Option<Box<dyn ForwardObserver>>,
}

/// A model: an arena of nested, named computational units.
///
/// The root is an anonymous container created by `Model::new`. Containers
/// execute their children sequentially; leaves apply their `Op` to the
/// incoming tensor. Unit positions are identified by dotted name paths
/// (e.g. `"features.0.conv"`).
pub struct Model {
    units: Vec<Unit>,
    // Keyed by token so detach removes the entry outright; tokens are
    // never reused, which keeps stale tokens inert.
    hooks: RefCell<BTreeMap<HookToken, HookEntry>>,
    next_token: Cell<HookToken>,
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl Model {
    pub fn new() -> Self {
        Self {
            units: vec![Unit {
                name: String::new(),
                op: Op::Container,
                parent: None,
                children: Vec::new(),
            }],
            hooks: RefCell::new(BTreeMap::new()),
            next_token: Cell::new(0),
        }
    }

    /// Build a flat sequential model from `(name, op)` pairs
    pub fn sequential<S, I>(layers: I) -> Result<Self>
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, Op)>,
    {
        let mut model = Self::new();
        let root = model.root();
        for (name, op) in layers {
            model.add_unit(root, &name.into(), op)?;
        }
        Ok(model)
    }

    pub fn root(&self) -> UnitId {
        0
    }

    pub fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(id)
    }

    /// Add a unit under `parent`. Sibling names must be distinct, name
    /// segments must not contain the path separator, and only containers
    /// may hold children.
    pub fn add_unit(&mut self, parent: UnitId, name: &str, op: Op) -> Result<UnitId> {
        if parent >= self.units.len() {
            return Err(Error::InvalidModel(format!("no unit with id {}", parent)));
        }
        if name.is_empty() || name.contains('.') {
            return Err(Error::InvalidModel(format!(
                "invalid unit name '{}': must be a non-empty single path segment",
                name
            )));
        }
        if !matches!(self.units[parent].op, Op::Container) {
            return Err(Error::InvalidModel(format!(
                "unit '{}' is not a container",
                self.path_of(parent)
            )));
        }
        let duplicate = self.units[parent]
            .children
            .iter()
            .any(|&c| self.units[c].name == name);
        if duplicate {
            return Err(Error::InvalidModel(format!(
                "duplicate unit name '{}' under '{}'",
                name,
                self.path_of(parent)
            )));
        }
        let id = self.units.len();
        self.units.push(Unit {
            name: name.to_string(),
            op,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.units[parent].children.push(id);
        Ok(id)
    }

    /// Add a child container under `parent`
    pub fn add_container(&mut self, parent: UnitId, name: &str) -> Result<UnitId> {
        self.add_unit(parent, name, Op::Container)
    }

    /// Dotted name path of a unit (empty string for the root)
    pub fn path_of(&self, id: UnitId) -> String {
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(idx) = current {
            let unit = &self.units[idx];
            if !unit.name.is_empty() {
                segments.push(unit.name.as_str());
            }
            current = unit.parent;
        }
        segments.reverse();
        segments.join(".")
    }

    fn is_leaf(&self, id: UnitId) -> bool {
        let unit = &self.units[id];
        unit.children.is_empty() && !matches!(unit.op, Op::Container)
    }

    /// Leaf units as `(dotted_path, id)` in depth-first pre-order
    pub fn leaf_units(&self) -> Vec<(String, UnitId)> {
        let mut leaves = Vec::new();
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            if self.is_leaf(id) {
                leaves.push((self.path_of(id), id));
            }
            for &child in self.units[id].children.iter().rev() {
                stack.push(child);
            }
        }
        leaves
    }

    /// Total learnable parameter count across all units. Purely static:
    /// no forward pass is involved.
    pub fn num_params(&self) -> u64 {
        self.units.iter().map(|u| u.op.parameter_count()).sum()
    }

    /// Attach a forward observer to a unit, returning a token for `detach`
    pub fn attach(&self, unit: UnitId, observer: Box<dyn ForwardObserver>) -> Result<HookToken> {
        if unit >= self.units.len() {
            return Err(Error::HookAttachment {
                unit: format!("#{}", unit),
                reason: "no such unit".to_string(),
            });
        }
        let token = self.next_token.get();
        self.next_token.set(token + 1);
        self.hooks.borrow_mut().insert(
            token,
            HookEntry {
                unit,
                observer: Some(observer),
            },
        );
        Ok(token)
    }

    /// Detach a previously attached observer. Returns false if the token
    /// was already detached or never existed.
    pub fn detach(&self, token: HookToken) -> bool {
        self.hooks.borrow_mut().remove(&token).is_some()
    }

    /// Number of currently attached observers
    pub fn hook_count(&self) -> usize {
        self.hooks.borrow().len()
    }

    /// Run one forward pass, invoking attached observers around each leaf
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        self.run_unit(self.root(), input)
    }

    fn run_unit(&self, id: UnitId, input: &Tensor) -> Result<Tensor> {
        let unit = &self.units[id];
        if !unit.children.is_empty() {
            let mut current = input.clone();
            for &child in &unit.children {
                current = self.run_unit(child, &current)?;
            }
            return Ok(current);
        }
        if matches!(unit.op, Op::Container) {
            // Childless container: identity
            return Ok(input.clone());
        }
        self.notify_before(id, input);
        let out_shape = unit
            .op
            .output_shape(input.shape())
            .map_err(|reason| Error::ForwardExecution {
                unit: self.path_of(id),
                reason,
            })?;
        let output = Tensor::zeros(&out_shape);
        self.notify_after(id, input, &output);
        Ok(output)
    }

    fn notify_before(&self, id: UnitId, input: &Tensor) {
        self.for_each_observer(id, |obs| obs.before_forward(input));
    }

    fn notify_after(&self, id: UnitId, input: &Tensor, output: &Tensor) {
        self.for_each_observer(id, |obs| obs.after_forward(input, output));
    }

    fn for_each_observer<F>(&self, id: UnitId, mut call: F)
    where
        F: FnMut(&mut dyn ForwardObserver),
    {
        let tokens: Vec<HookToken> = self
            .hooks
            .borrow()
            .iter()
            .filter(|(_, entry)| entry.unit == id)
            .map(|(&token, _)| token)
            .collect();
        for token in tokens {
            let taken = self
                .hooks
                .borrow_mut()
                .get_mut(&token)
                .and_then(|entry| entry.observer.take());
            if let Some(mut observer) = taken {
                call(observer.as_mut());
                if let Some(entry) = self.hooks.borrow_mut().get_mut(&token) {
                    entry.observer = Some(observer);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conv2d_output_shape() {
        let op = Op::Conv2d {
            in_channels: 3,
            out_channels: 16,
            kernel_size: (3, 3),
            stride: (1, 1),
            padding: (1, 1),
            groups: 1,
            bias: true,
        };
        assert_eq!(op.output_shape(&[1, 3, 32, 32]).unwrap(), vec![1, 16, 32, 32]);
        assert_eq!(op.parameter_count(), 16 * 3 * 3 * 3 + 16);
    }

    #[test]
    fn conv2d_rejects_channel_mismatch() {
        let op = Op::Conv2d {
            in_channels: 3,
            out_channels: 16,
            kernel_size: (3, 3),
            stride: (1, 1),
            padding: (0, 0),
            groups: 1,
            bias: false,
        };
        assert!(op.output_shape(&[1, 4, 32, 32]).is_err());
    }

    #[test]
    fn pool_and_flatten_shapes() {
        let pool = Op::MaxPool2d {
            kernel_size: (2, 2),
            stride: (2, 2),
            padding: (0, 0),
        };
        assert_eq!(pool.output_shape(&[1, 8, 16, 16]).unwrap(), vec![1, 8, 8, 8]);
        assert_eq!(Op::Flatten.output_shape(&[1, 8, 8, 8]).unwrap(), vec![1, 512]);
        assert_eq!(
            Op::GlobalAvgPool2d.output_shape(&[1, 8, 7, 7]).unwrap(),
            vec![1, 8, 1, 1]
        );
    }

    #[test]
    fn linear_checks_last_dim() {
        let op = Op::Linear {
            in_features: 4,
            out_features: 2,
            bias: false,
        };
        assert_eq!(op.output_shape(&[1, 1, 1, 4]).unwrap(), vec![1, 1, 1, 2]);
        assert!(op.output_shape(&[1, 1, 1, 3]).is_err());
    }

    #[test]
    fn duplicate_sibling_names_rejected() {
        let mut model = Model::new();
        let root = model.root();
        model
            .add_unit(root, "layer", Op::ReLU)
            .expect("first add succeeds");
        assert!(model.add_unit(root, "layer", Op::ReLU).is_err());
    }

    #[test]
    fn leaf_units_are_preorder_with_dotted_paths() {
        let mut model = Model::new();
        let root = model.root();
        let features = model.add_container(root, "features").unwrap();
        let block = model.add_container(features, "0").unwrap();
        model
            .add_unit(
                block,
                "conv",
                Op::Conv2d {
                    in_channels: 3,
                    out_channels: 8,
                    kernel_size: (3, 3),
                    stride: (1, 1),
                    padding: (1, 1),
                    groups: 1,
                    bias: false,
                },
            )
            .unwrap();
        model.add_unit(block, "relu", Op::ReLU).unwrap();
        model
            .add_unit(
                root,
                "classifier",
                Op::Linear {
                    in_features: 8,
                    out_features: 2,
                    bias: true,
                },
            )
            .unwrap();

        let paths: Vec<String> = model.leaf_units().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["features.0.conv", "features.0.relu", "classifier"]);
    }

    #[test]
    fn forward_error_names_unit_path() {
        let model = Model::sequential(vec![(
            "fc",
            Op::Linear {
                in_features: 4,
                out_features: 2,
                bias: false,
            },
        )])
        .unwrap();
        let err = model.forward(&Tensor::zeros(&[1, 3])).unwrap_err();
        assert!(err.to_string().contains("fc"));
    }

    #[test]
    fn detach_is_idempotent() {
        struct Noop;
        impl ForwardObserver for Noop {
            fn before_forward(&mut self, _: &Tensor) {}
            fn after_forward(&mut self, _: &Tensor, _: &Tensor) {}
        }
        let mut model = Model::new();
        let root = model.root();
        let relu = model.add_unit(root, "relu", Op::ReLU).unwrap();
        let token = model.attach(relu, Box::new(Noop)).unwrap();
        assert_eq!(model.hook_count(), 1);
        assert!(model.detach(token));
        assert!(!model.detach(token));
        assert_eq!(model.hook_count(), 0);
    }

    #[test]
    fn attach_detach_churn_leaves_empty_table() {
        use std::cell::Cell;
        use std::rc::Rc;

        struct Counter(Rc<Cell<usize>>);
        impl ForwardObserver for Counter {
            fn before_forward(&mut self, _: &Tensor) {}
            fn after_forward(&mut self, _: &Tensor, _: &Tensor) {
                self.0.set(self.0.get() + 1);
            }
        }
        struct Noop;
        impl ForwardObserver for Noop {
            fn before_forward(&mut self, _: &Tensor) {}
            fn after_forward(&mut self, _: &Tensor, _: &Tensor) {}
        }

        let mut model = Model::new();
        let root = model.root();
        let relu = model.add_unit(root, "relu", Op::ReLU).unwrap();

        for _ in 0..100 {
            let token = model.attach(relu, Box::new(Noop)).unwrap();
            assert!(model.detach(token));
        }
        assert_eq!(model.hook_count(), 0);

        // Dispatch after heavy churn still fires the live observer once
        let fired = Rc::new(Cell::new(0));
        let token = model.attach(relu, Box::new(Counter(Rc::clone(&fired)))).unwrap();
        model.forward(&Tensor::zeros(&[1, 4])).unwrap();
        assert_eq!(fired.get(), 1);
        assert!(model.detach(token));
    }

    #[test]
    fn stale_token_cannot_detach_a_later_hook() {
        struct Noop;
        impl ForwardObserver for Noop {
            fn before_forward(&mut self, _: &Tensor) {}
            fn after_forward(&mut self, _: &Tensor, _: &Tensor) {}
        }
        let mut model = Model::new();
        let root = model.root();
        let relu = model.add_unit(root, "relu", Op::ReLU).unwrap();

        let first = model.attach(relu, Box::new(Noop)).unwrap();
        assert!(model.detach(first));
        let second = model.attach(relu, Box::new(Noop)).unwrap();
        assert_ne!(first, second);
        assert!(!model.detach(first));
        assert_eq!(model.hook_count(), 1);
        assert!(model.detach(second));
    }

    #[test]
    fn op_kinds_display_their_names() {
        assert_eq!(OpKind::Convolution.to_string(), "Convolution");
        assert_eq!(Op::ReLU.kind().to_string(), "Activation");
        assert_eq!(
            Op::Custom("Mystery".to_string()).kind().to_string(),
            "Other"
        );
    }
}
