//! Proof obligations.
//!
//! An obligation says: starting from any state pair satisfying `assume`
//! at `(target_start, rewrite_start)`, executing the target path and the
//! rewrite path ends in a state pair satisfying `prove`. The
//! [`ObligationChecker`] turns it into a single query
//!
//! ```text
//! assume(start) && exec(target path) && exec(rewrite path) && !prove(end)
//! ```
//!
//! which is unsatisfiable exactly when the obligation holds. A satisfying
//! model is read back into one [`CpuState`] per program.
//!
//! # Paths
//!
//! A path lists the blocks control passes through, beginning with the
//! start block. Every block but the last is executed; the last block is
//! where control arrives, and the jump conditions along the way become
//! path conditions. A path that does not begin with its start block gets
//! the start block prepended. An empty path, or one holding only the start
//! block, executes nothing.

use std::borrow::Cow;

use crate::{
    cfg::{BlockId, Cfg},
    handlers::{flags::condition, Handler, SupportLevel},
    solver::{SmtSolver, SolverModel},
    symbolic::{simplify, SymExpr},
    symstate::{memory::FaultPolicy, Cells, MemoryModel, SymState},
    validator::invariants::Invariant,
    x64::{CpuState, Instruction},
    Result,
};

/// Variable suffix of the target program's start state.
pub const TARGET_SUFFIX: &str = "T";

/// Variable suffix of the rewrite's start state.
pub const REWRITE_SUFFIX: &str = "R";

/// How control leaves a block along a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpType {
    /// No condition: unconditional transfer or end of the path.
    None,
    /// The conditional jump is not taken.
    FallThrough,
    /// The conditional jump is taken.
    Jump,
}

/// The kind of transition `i` of a path, from its `i`-th to its `i + 1`-th block.
///
/// # Arguments
///
/// * `cfg` - The graph the path runs through
/// * `start` - The start block, prepended if the path does not begin with it
/// * `path` - The path
/// * `i` - Index of the transition
#[must_use]
pub fn is_jump(cfg: &Cfg, start: BlockId, path: &[BlockId], i: usize) -> JumpType {
    let blocks = with_start(start, path);
    let (Some(&from), Some(&to)) = (blocks.get(i), blocks.get(i + 1)) else {
        return JumpType::None;
    };
    let conditional = cfg.last_instr(from).is_some_and(|instr| instr.is_jcc());
    let jump = cfg.jump_target(from);
    let fallthrough = cfg.fallthrough_target(from);
    if !conditional || jump == fallthrough {
        return JumpType::None;
    }
    if jump == Some(to) {
        JumpType::Jump
    } else if fallthrough == Some(to) {
        JumpType::FallThrough
    } else {
        JumpType::None
    }
}

fn with_start(start: BlockId, path: &[BlockId]) -> Cow<'_, [BlockId]> {
    match path.first() {
        None => Cow::Borrowed(path),
        Some(&first) if first == start => Cow::Borrowed(path),
        Some(_) => {
            let mut blocks = Vec::with_capacity(path.len() + 1);
            blocks.push(start);
            blocks.extend_from_slice(path);
            Cow::Owned(blocks)
        }
    }
}

/// A pair of inputs, one per program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counterexample {
    /// Input of the target
    pub target: CpuState,
    /// Input of the rewrite
    pub rewrite: CpuState,
}

/// Outcome of one obligation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObligationResult {
    /// The obligation holds.
    Proven,
    /// The obligation fails; the start states are attached when the model
    /// could be read.
    Disproven(Option<Counterexample>),
}

impl ObligationResult {
    /// `true` for [`ObligationResult::Proven`].
    #[must_use]
    pub fn is_proven(&self) -> bool {
        matches!(self, ObligationResult::Proven)
    }

    /// The counterexample, if any.
    #[must_use]
    pub fn counterexample(&self) -> Option<&Counterexample> {
        match self {
            ObligationResult::Disproven(ceg) => ceg.as_ref(),
            ObligationResult::Proven => None,
        }
    }
}

/// Which kind of query the checker ran last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    /// [`ObligationChecker::check`]
    Single,
    /// [`ObligationChecker::check_exhaustive`]
    Exhaustive,
}

/// Discharges proof obligations with a solver.
pub struct ObligationChecker {
    solver: Box<dyn SmtSolver>,
    handler: Box<dyn Handler>,
    memory_model: MemoryModel,
    fault_policy: FaultPolicy,
    last_mode: CheckMode,
    queries: usize,
}

impl ObligationChecker {
    /// Creates a checker over flat memory.
    ///
    /// # Arguments
    ///
    /// * `solver` - Decides the queries
    /// * `handler` - Gives the instructions their semantics
    #[must_use]
    pub fn new(solver: Box<dyn SmtSolver>, handler: Box<dyn Handler>) -> Self {
        Self {
            solver,
            handler,
            memory_model: MemoryModel::Flat,
            fault_policy: FaultPolicy::Suppress,
            last_mode: CheckMode::Single,
            queries: 0,
        }
    }

    /// Sets the memory model of the symbolic states.
    #[must_use]
    pub fn with_memory(mut self, model: MemoryModel, policy: FaultPolicy) -> Self {
        self.memory_model = model;
        self.fault_policy = policy;
        self
    }

    /// The solver.
    pub fn solver(&mut self) -> &mut dyn SmtSolver {
        self.solver.as_mut()
    }

    /// The kind of the last query.
    #[must_use]
    pub fn last_mode(&self) -> CheckMode {
        self.last_mode
    }

    /// `true` if the handler can build a circuit for `instr`.
    #[must_use]
    pub fn supports(&self, instr: &Instruction) -> bool {
        self.handler.get_support(instr).contains(SupportLevel::BASIC)
    }

    /// Number of solver queries issued so far.
    #[must_use]
    pub fn queries(&self) -> usize {
        self.queries
    }

    /// Checks a single obligation.
    ///
    /// # Arguments
    ///
    /// * `target` / `rewrite` - The two programs
    /// * `target_start` / `rewrite_start` - Where both paths begin
    /// * `target_path` / `rewrite_path` - The paths, see the module docs
    /// * `assume` - Holds on the start states
    /// * `prove` - Must hold on the end states
    ///
    /// # Errors
    ///
    /// Solver errors (timeouts, interrupts), [`crate::Error::Unsupported`]
    /// for instructions without semantics and [`crate::Error::Validator`]
    /// for paths that do not follow the graph. None of them is a disproof.
    pub fn check(
        &mut self,
        target: &Cfg,
        rewrite: &Cfg,
        target_start: BlockId,
        rewrite_start: BlockId,
        target_path: &[BlockId],
        rewrite_path: &[BlockId],
        assume: &Invariant,
        prove: &Invariant,
    ) -> Result<ObligationResult> {
        self.last_mode = CheckMode::Single;
        let (t0, r0) = self.start_states();
        let mut t = t0.clone();
        let mut r = r0.clone();

        let mut query = self.execute(target, target_start, target_path, &mut t)?;
        query.extend(self.execute(rewrite, rewrite_start, rewrite_path, &mut r)?);
        // Stack frames enter the start memories when first touched.
        query.push(assume.formula(&t0, &r0)?);
        query.extend(t.constraints());
        query.extend(r.constraints());
        query.push(prove.formula(&t, &r)?.not()?);

        log::debug!(
            "obligation ({}, {}) {:?} / {:?}: {} => {}",
            target_start,
            rewrite_start,
            target_path,
            rewrite_path,
            assume,
            prove
        );

        if !self.query(&query)? {
            return Ok(ObligationResult::Proven);
        }
        Ok(ObligationResult::Disproven(
            self.counterexample(&t0, &r0, &[(t, r)]),
        ))
    }

    /// Checks that the path pairs cover every execution from the start blocks.
    ///
    /// The query is `assume && !OR(pc(tp) && pc(rp))` over all pairs, where
    /// `pc` is the path condition.
    ///
    /// # Errors
    ///
    /// As for [`ObligationChecker::check`].
    pub fn check_exhaustive(
        &mut self,
        target: &Cfg,
        rewrite: &Cfg,
        target_start: BlockId,
        rewrite_start: BlockId,
        path_pairs: &[(Vec<BlockId>, Vec<BlockId>)],
        assume: &Invariant,
    ) -> Result<ObligationResult> {
        self.last_mode = CheckMode::Exhaustive;
        let (t0, r0) = self.start_states();

        let mut query = Vec::new();
        let mut alternatives = Vec::with_capacity(path_pairs.len());
        let mut executed = Vec::with_capacity(path_pairs.len());
        for (tp, rp) in path_pairs {
            let mut t = t0.clone();
            let mut r = r0.clone();
            let mut pc = self.execute(target, target_start, tp, &mut t)?;
            pc.extend(self.execute(rewrite, rewrite_start, rp, &mut r)?);
            query.extend(t.constraints());
            query.extend(r.constraints());
            alternatives.push(SymExpr::and_all(&pc)?);
            executed.push((t, r));
        }
        query.push(assume.formula(&t0, &r0)?);
        query.push(SymExpr::or_all(&alternatives)?.not()?);

        log::debug!(
            "exhaustive ({}, {}) over {} path pairs",
            target_start,
            rewrite_start,
            path_pairs.len()
        );

        if !self.query(&query)? {
            return Ok(ObligationResult::Proven);
        }
        Ok(ObligationResult::Disproven(
            self.counterexample(&t0, &r0, &executed),
        ))
    }

    fn start_states(&self) -> (SymState, SymState) {
        (
            SymState::new(TARGET_SUFFIX, self.memory_model, self.fault_policy),
            SymState::new(REWRITE_SUFFIX, self.memory_model, self.fault_policy),
        )
    }

    /// Executes `path` on `state` and returns its path conditions.
    fn execute(
        &mut self,
        cfg: &Cfg,
        start: BlockId,
        path: &[BlockId],
        state: &mut SymState,
    ) -> Result<Vec<SymExpr>> {
        let blocks = with_start(start, path);
        let mut conditions = Vec::new();
        for i in 0..blocks.len().saturating_sub(1) {
            let (from, to) = (blocks[i], blocks[i + 1]);
            if !cfg.successors(from).contains(&to) {
                return Err(validator_error!("no edge from block {} to block {}", from, to));
            }
            for instr in cfg.instructions(from) {
                self.handler.build_circuit(instr, state)?;
            }

            let kind = is_jump(cfg, start, path, i);
            if kind == JumpType::None {
                continue;
            }
            let cc = cfg
                .last_instr(from)
                .and_then(|instr| instr.condition())
                .ok_or_else(|| validator_error!("block {} ends without a condition", from))?;
            let holds = condition(state, cc)?;
            conditions.push(match kind {
                JumpType::Jump => holds,
                _ => holds.not()?,
            });
        }
        Ok(conditions)
    }

    fn query(&mut self, constraints: &[SymExpr]) -> Result<bool> {
        let mut simplified = Vec::with_capacity(constraints.len());
        for c in constraints {
            let s = simplify(c)?;
            if s.is_false() {
                return Ok(false);
            }
            if !s.is_true() {
                simplified.push(s);
            }
        }
        self.queries += 1;
        self.solver.is_sat(&simplified)
    }

    /// Reads the start states of both programs out of the solver model.
    ///
    /// Memory holds every byte read along any of the `executed` state pairs.
    fn counterexample(
        &mut self,
        t0: &SymState,
        r0: &SymState,
        executed: &[(SymState, SymState)],
    ) -> Option<Counterexample> {
        let read = |solver: &mut dyn SmtSolver| -> Result<Counterexample> {
            let mut view = SolverModel::new(solver)?;
            let mut target = t0.concretize(&mut view, Cells::Start)?;
            let mut rewrite = r0.concretize(&mut view, Cells::Start)?;
            for (t, r) in executed {
                target
                    .memory
                    .extend(t.concretize(&mut view, Cells::Start)?.memory);
                rewrite
                    .memory
                    .extend(r.concretize(&mut view, Cells::Start)?.memory);
            }
            Ok(Counterexample { target, rewrite })
        };
        match read(self.solver.as_mut()) {
            Ok(ceg) => Some(ceg),
            Err(e) => {
                log::warn!("could not read counterexample: {}", e);
                None
            }
        }
    }
}
