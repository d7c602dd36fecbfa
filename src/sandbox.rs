//! Concrete execution of control flow graphs.
//!
//! The [`Sandbox`] runs a [`Cfg`] on concrete [`CpuState`]s by building the
//! circuit of each block with a [`Handler`] and evaluating it against the
//! input. It shares its semantics with the symbolic checker, so traces are
//! exactly what the proof obligations describe.
//!
//! The validators use the sandbox to collect test-case traces: the sequence
//! of blocks an input visits and the machine state on entry to each of
//! them. Inputs are kept in the sandbox so counterexamples found by the
//! solver can be added and replayed.

use std::fmt;

use crate::{
    cfg::{BlockId, Cfg},
    handlers::{flags::condition, ComboHandler, Handler},
    symbolic::Evaluator,
    symstate::{Cells, SymState},
    x64::CpuState,
    Result,
};

/// Default limit on taken control transfers per run.
pub const DEFAULT_MAX_JUMPS: usize = 1024;

/// Signals a run can end with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Segmentation fault
    Segv,
    /// Divide error
    Fpe,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Segv => write!(f, "SIGSEGV"),
            Signal::Fpe => write!(f, "SIGFPE"),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The exit block was reached.
    Completed {
        /// Instructions executed
        instructions: usize,
    },
    /// A block raised a signal; the state is the one on entry to that block.
    Signal {
        /// The signal
        signal: Signal,
        /// The faulting block
        block: BlockId,
    },
    /// The run entered a block the caller asked to stop at.
    Stopped {
        /// The block
        block: BlockId,
    },
    /// The jump limit was exceeded.
    LimitReached {
        /// Control transfers taken
        jumps: usize,
    },
}

impl Outcome {
    /// `true` for [`Outcome::Completed`].
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed { .. })
    }

    /// `true` if the run reached the exit or a requested stop block.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self, Outcome::Completed { .. } | Outcome::Stopped { .. })
    }
}

/// The blocks an input visited and the state on entry to each.
#[derive(Debug, Clone)]
pub struct Trace {
    /// Visited blocks, starting with the entry block
    pub blocks: Vec<BlockId>,
    /// `states[i]` is the machine state on entry to `blocks[i]`
    pub states: Vec<CpuState>,
    /// The final state (on entry to the exit block if the run completed)
    pub last: CpuState,
    /// How the run ended
    pub outcome: Outcome,
}

impl Trace {
    /// Positions in the trace where `block` was entered.
    pub fn visits(&self, block: BlockId) -> impl Iterator<Item = usize> + '_ {
        self.blocks
            .iter()
            .enumerate()
            .filter(move |(_, b)| **b == block)
            .map(|(i, _)| i)
    }
}

/// Runs code on concrete inputs.
pub struct Sandbox {
    handler: Box<dyn Handler>,
    inputs: Vec<CpuState>,
    max_jumps: usize,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(Box::new(ComboHandler::default()))
    }
}

impl Sandbox {
    /// Creates an empty sandbox executing with `handler`.
    #[must_use]
    pub fn new(handler: Box<dyn Handler>) -> Self {
        Self {
            handler,
            inputs: Vec::new(),
            max_jumps: DEFAULT_MAX_JUMPS,
        }
    }

    /// Sets the limit on taken control transfers per run.
    #[must_use]
    pub fn with_max_jumps(mut self, max_jumps: usize) -> Self {
        self.max_jumps = max_jumps;
        self
    }

    /// Adds an input.
    pub fn insert_input(&mut self, input: CpuState) {
        self.inputs.push(input);
    }

    /// Number of inputs.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inputs.len()
    }

    /// The inputs in insertion order.
    #[must_use]
    pub fn inputs(&self) -> &[CpuState] {
        &self.inputs
    }

    /// Input `i`.
    #[must_use]
    pub fn get_input(&self, i: usize) -> Option<&CpuState> {
        self.inputs.get(i)
    }

    /// Runs `cfg` on every input.
    ///
    /// # Errors
    ///
    /// See [`Sandbox::run`].
    pub fn run_all(&mut self, cfg: &Cfg) -> Result<Vec<Trace>> {
        let inputs = self.inputs.clone();
        inputs.iter().map(|input| self.run(cfg, input)).collect()
    }

    /// Runs `cfg` on `input`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Unsupported`] if the code contains an instruction
    /// the handler cannot model.
    pub fn run(&mut self, cfg: &Cfg, input: &CpuState) -> Result<Trace> {
        self.run_from(cfg, cfg.get_entry(), input, |_| false)
    }

    /// Runs `cfg` on `input` starting at block `start`.
    ///
    /// # Arguments
    ///
    /// * `cfg` - The code
    /// * `start` - First block to execute
    /// * `input` - Machine state on entry to `start`
    /// * `stop` - The run ends with [`Outcome::Stopped`] on entry to any
    ///   later block for which this returns `true`
    ///
    /// # Errors
    ///
    /// See [`Sandbox::run`].
    pub fn run_from(
        &mut self,
        cfg: &Cfg,
        start: BlockId,
        input: &CpuState,
        stop: impl Fn(BlockId) -> bool,
    ) -> Result<Trace> {
        let mut blocks = vec![start];
        let mut states = vec![input.clone()];
        let mut cpu = input.clone();
        let mut block = start;
        let mut instructions = 0;
        let mut jumps = 0;

        let outcome = loop {
            if block == cfg.get_exit() {
                break Outcome::Completed { instructions };
            }
            let (next, signal) = self.step(cfg, block, &mut cpu)?;
            instructions += cfg.num_instrs(block);
            if let Some(signal) = signal {
                break Outcome::Signal { signal, block };
            }
            let Some(next) = next else {
                break Outcome::Completed { instructions };
            };
            if cfg.jump_target(block) == Some(next) {
                jumps += 1;
                if jumps > self.max_jumps {
                    break Outcome::LimitReached { jumps };
                }
            }
            blocks.push(next);
            states.push(cpu.clone());
            block = next;
            if stop(next) && next != cfg.get_exit() {
                break Outcome::Stopped { block: next };
            }
        };

        log::trace!("sandbox: {:?} after {} blocks", outcome, blocks.len());
        Ok(Trace {
            blocks,
            states,
            last: cpu,
            outcome,
        })
    }

    /// Executes one block, updating `cpu` unless a signal is raised.
    fn step(
        &mut self,
        cfg: &Cfg,
        block: BlockId,
        cpu: &mut CpuState,
    ) -> Result<(Option<BlockId>, Option<Signal>)> {
        let (mut state, model) = SymState::from_cpu(cpu, "SB");
        for instr in cfg.instructions(block) {
            self.handler.build_circuit(instr, &mut state)?;
        }

        let mut eval = Evaluator::new(&model);
        if eval.eval_bool(state.sigsegv())? {
            return Ok((None, Some(Signal::Segv)));
        }
        if eval.eval_bool(state.sigfpe())? {
            return Ok((None, Some(Signal::Fpe)));
        }

        let next = match cfg.last_instr(block) {
            Some(instr) if instr.is_jcc() => {
                let cond = instr
                    .condition()
                    .ok_or_else(|| validator_error!("{} has no condition code", instr))?;
                if eval.eval_bool(&condition(&state, cond)?)? {
                    cfg.jump_target(block)
                } else {
                    cfg.fallthrough_target(block)
                }
            }
            Some(instr) if instr.is_jump() => cfg.jump_target(block),
            _ => cfg.fallthrough_target(block),
        };

        let mut out = state.concretize(&mut eval, Cells::Current)?;
        for (addr, byte) in &cpu.memory {
            out.memory.entry(*addr).or_insert(*byte);
        }
        *cpu = out;
        Ok((next, None))
    }
}
