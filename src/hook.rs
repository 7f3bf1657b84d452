//! Hook-based instrumentation of a single forward pass.
//!
//! `ModelHook` attaches a probe to every leaf unit, drives one forward pass
//! over a synthesized input, and collects one [`LeafUnitRecord`] per executed
//! leaf. Attached probes are released through a drop guard, so the model is
//! left hook-free on every exit path, including a failing forward pass.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

use crate::cost::{self, CostConfig};
use crate::error::{Error, Result};
use crate::model::{ForwardObserver, HookToken, Model, Op, OpKind, Tensor, UnitId};

/// Metrics captured for one leaf unit during one forward pass
#[derive(Debug, Clone)]
pub struct LeafUnitRecord {
    /// Dotted path locating the unit in the module nesting
    pub name_path: String,
    pub operation_kind: OpKind,
    pub input_shape: Vec<usize>,
    pub output_shape: Vec<usize>,
    pub parameter_quantity: u64,
    /// Byte count of the unit's own parameter storage
    pub inference_memory: u64,
    pub madd: u64,
    pub flops: u64,
    /// Wall-clock seconds spent in the unit's forward computation
    pub duration: f64,
    /// `[parameter_bytes, activation_bytes]`
    pub memory: [u64; 2],
}

/// Probe installed on one leaf unit. The before observation stamps the start
/// time; the after observation captures shapes, costs the unit, and files the
/// record into the shared capture map.
struct LeafProbe {
    unit: UnitId,
    path: String,
    op: Op,
    config: CostConfig,
    debug: bool,
    started: Option<Instant>,
    captures: Rc<RefCell<HashMap<UnitId, LeafUnitRecord>>>,
}

impl ForwardObserver for LeafProbe {
    fn before_forward(&mut self, input: &Tensor) {
        if self.debug {
            log::debug!("{}: forward start, input {:?}", self.path, input.shape());
        }
        self.started = Some(Instant::now());
    }

    fn after_forward(&mut self, input: &Tensor, output: &Tensor) {
        let duration = self
            .started
            .take()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let unit_cost = cost::compute(&self.op, input.shape(), output.shape(), self.config);
        if self.debug {
            log::debug!(
                "{} [{}]: {:?} -> {:?} in {:.6}s ({} MAdd, {} Flops)",
                self.path,
                self.op.kind(),
                input.shape(),
                output.shape(),
                duration,
                unit_cost.madd,
                unit_cost.flops
            );
        }
        let record = LeafUnitRecord {
            name_path: self.path.clone(),
            operation_kind: self.op.kind(),
            input_shape: input.shape().to_vec(),
            output_shape: output.shape().to_vec(),
            parameter_quantity: unit_cost.parameter_quantity,
            inference_memory: unit_cost.parameter_bytes,
            madd: unit_cost.madd,
            flops: unit_cost.flops,
            duration,
            memory: [unit_cost.parameter_bytes, unit_cost.activation_bytes],
        };
        self.captures.borrow_mut().insert(self.unit, record);
    }
}

/// Detaches every attached probe when dropped, so cleanup runs on early
/// returns and propagated forward failures alike.
struct HookGuard<'a> {
    model: &'a Model,
    tokens: Vec<HookToken>,
}

impl Drop for HookGuard<'_> {
    fn drop(&mut self) {
        for &token in &self.tokens {
            self.model.detach(token);
        }
    }
}

/// One-shot instrumentation of a `(model, input_size)` pair
pub struct ModelHook<'a> {
    model: &'a Model,
    input_size: [usize; 3],
    config: CostConfig,
    debug: bool,
}

impl<'a> ModelHook<'a> {
    /// `input_size` is `(channels, height, width)`; the batch dimension is
    /// fixed at 1.
    pub fn new(
        model: &'a Model,
        input_size: &[usize],
        config: CostConfig,
        debug: bool,
    ) -> Result<Self> {
        match input_size {
            &[c, h, w] => Ok(Self {
                model,
                input_size: [c, h, w],
                config,
                debug,
            }),
            _ => Err(Error::InvalidInputShape(input_size.to_vec())),
        }
    }

    /// Run the instrumented forward pass and return one record per executed
    /// leaf unit, ordered by depth-first pre-order over the model structure.
    pub fn retrieve_leaf_records(&self) -> Result<Vec<LeafUnitRecord>> {
        let leaves = self.model.leaf_units();
        let captures: Rc<RefCell<HashMap<UnitId, LeafUnitRecord>>> =
            Rc::new(RefCell::new(HashMap::new()));

        let mut guard = HookGuard {
            model: self.model,
            tokens: Vec::new(),
        };
        for (path, id) in &leaves {
            let unit = self
                .model
                .unit(*id)
                .ok_or_else(|| Error::HookAttachment {
                    unit: path.clone(),
                    reason: "unit disappeared during attachment".to_string(),
                })?;
            let probe = LeafProbe {
                unit: *id,
                path: path.clone(),
                op: unit.op.clone(),
                config: self.config,
                debug: self.debug,
                started: None,
                captures: Rc::clone(&captures),
            };
            let token = self.model.attach(*id, Box::new(probe))?;
            guard.tokens.push(token);
        }

        let [c, h, w] = self.input_size;
        let input = Tensor::zeros(&[1, c, h, w]);
        self.model.forward(&input)?;
        drop(guard);

        let mut captures = captures.borrow_mut();
        let mut records = Vec::with_capacity(captures.len());
        for (_, id) in &leaves {
            if let Some(record) = captures.remove(id) {
                records.push(record);
            }
        }
        Ok(records)
    }
}
