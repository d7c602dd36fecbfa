//! Data-driven equivalence checking.
//!
//! [`DdecValidator`] proves that two programs, possibly containing loops,
//! compute the same live-outs and memory. The proof is a dual automaton
//! whose states pair up cut points of both programs and carry invariants:
//!
//! 1. Calls to known functions are inlined and both programs are checked
//!    for compatible interfaces and modeled instructions.
//! 2. Optionally, test cases are generated from the bounded path
//!    conditions of both programs. Any test case on which the programs differ is returned as
//!    a counterexample right away.
//! 3. Inductive path pairs through loop blocks become self-loop edges. The
//!    test-case traces, cut at entry, exit and those blocks, add the edges
//!    connecting them and the data the invariant learner works on.
//! 4. A fixed point drops every candidate invariant that cannot be proven
//!    inductive along the edges, then the exit invariant must imply equal
//!    live-outs and memory.
//! 5. Every state's outgoing edges must cover all executions. A
//!    counterexample to coverage becomes a new edge (or, at the start
//!    state, possibly a real counterexample) and the proof is redone.
//!
//! # Example
//!
//! ```rust,no_run
//! use x64verify::cfg::Cfg;
//! use x64verify::validator::{DdecValidator, ValidatorConfig};
//! use x64verify::verifier::Verifier;
//! use x64verify::x64::RegSet;
//!
//! # fn solver() -> Box<dyn x64verify::solver::SmtSolver> { unimplemented!() }
//! let target = Cfg::new("movq %rdi, %rax\nshlq $1, %rax\nretq".parse()?,
//!     RegSet::universe(), RegSet::linux_call_return())?;
//! let rewrite = Cfg::new("leaq (%rdi,%rdi), %rax\nretq".parse()?,
//!     RegSet::universe(), RegSet::linux_call_return())?;
//!
//! let mut validator = DdecValidator::new(solver(), ValidatorConfig::default())?;
//! if !validator.verify(&target, &rewrite) {
//!     println!("{} counterexamples", validator.counter_examples_available());
//! }
//! # Ok::<(), x64verify::Error>(())
//! ```

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashMap;

use crate::{
    cfg::{inline_functions, BlockId, Cfg, CfgPaths},
    sandbox::{Sandbox, Trace},
    solver::SmtSolver,
    validator::{
        config::ValidatorConfig,
        control::ControlLearner,
        dual::{DualAutomaton, DualEdge, DualState},
        invariants::Invariant,
        learner::InvariantLearner,
        obligation::{Counterexample, ObligationChecker, ObligationResult},
    },
    verifier::{compare_outputs, Verifier},
    x64::{Code, Condition, CpuState, GpRegister, RegSet},
    Error, Result,
};

/// Result of checking that the automaton's edges cover every execution.
enum Coverage {
    /// Every state is covered.
    Complete,
    /// Edges were added; the invariants must be proven again.
    Refined,
    /// The programs differ on this input.
    Counterexample(CpuState),
}

/// The DDEC equivalence validator.
pub struct DdecValidator {
    config: ValidatorConfig,
    checker: ObligationChecker,
    sandbox: Sandbox,
    learner: InvariantLearner,
    functions: FxHashMap<String, Code>,
    error: Option<Error>,
    counter_examples: Vec<CpuState>,
    dual: Option<DualAutomaton>,
}

impl DdecValidator {
    /// Creates a validator.
    ///
    /// # Arguments
    ///
    /// * `solver` - Decides the proof obligations; its timeout is set from
    ///   the configuration
    /// * `config` - Validator settings
    ///
    /// # Errors
    ///
    /// Returns an error if the configured strata directory cannot be loaded.
    pub fn new(mut solver: Box<dyn SmtSolver>, config: ValidatorConfig) -> Result<Self> {
        solver.set_timeout(config.timeout);
        let checker = ObligationChecker::new(solver, Box::new(config.handler()?))
            .with_memory(config.memory_model, config.fault_policy);
        let sandbox = Sandbox::new(Box::new(config.handler()?)).with_max_jumps(config.max_jumps);

        Ok(Self {
            config,
            checker,
            sandbox,
            learner: InvariantLearner::new(),
            functions: FxHashMap::default(),
            error: None,
            counter_examples: Vec::new(),
            dual: None,
        })
    }

    /// Registers a function that calls in either program are inlined with.
    pub fn insert_function(&mut self, name: impl Into<String>, body: Code) {
        self.functions.insert(name.into(), body);
    }

    /// Adds a test case; duplicates are ignored.
    pub fn insert_input(&mut self, input: CpuState) {
        if !self.sandbox.inputs().contains(&input) {
            self.sandbox.insert_input(input);
        }
    }

    /// The sandbox holding the test cases, including those added during
    /// the last verification.
    #[must_use]
    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// The dual automaton of the last verification, if it got that far.
    #[must_use]
    pub fn automaton(&self) -> Option<&DualAutomaton> {
        self.dual.as_ref()
    }

    /// The obligation checker.
    #[must_use]
    pub fn checker(&self) -> &ObligationChecker {
        &self.checker
    }

    /// Runs the whole procedure; `Ok(Some(input))` is a counterexample.
    fn run(&mut self, target: &Cfg, rewrite: &Cfg) -> Result<Option<CpuState>> {
        let target = inline_functions(target, &self.functions)?;
        let rewrite = inline_functions(rewrite, &self.functions)?;
        self.sanity_checks(&target, &rewrite)?;

        if self.config.make_tcs {
            self.make_tcs(&target, &rewrite);
        }
        if let Some(input) = self.find_difference(&target, &rewrite)? {
            return Ok(Some(input));
        }

        let inductive = ControlLearner::new(&target, &rewrite)
            .learn_inductive_paths(&self.config.inductive_bounds());
        let mut dual = self.build_automaton(&target, &rewrite, inductive)?;
        let result = self.prove(&target, &rewrite, &mut dual);
        self.dual = Some(dual);
        result
    }

    fn sanity_checks(&self, target: &Cfg, rewrite: &Cfg) -> Result<()> {
        if target.live_outs() != rewrite.live_outs() {
            return Err(validator_error!(
                "live-outs differ: {} vs {}",
                target.live_outs(),
                rewrite.live_outs()
            ));
        }
        if target.def_ins() != rewrite.def_ins() {
            return Err(validator_error!(
                "def-ins differ: {} vs {}",
                target.def_ins(),
                rewrite.def_ins()
            ));
        }
        for (name, cfg) in [("target", target), ("rewrite", rewrite)] {
            let code = cfg.get_code();
            if let Some(instr) = code.iter().find(|i| !self.checker.supports(i)) {
                return Err(validator_error!("unsupported instruction in {}: {}", name, instr));
            }
        }
        Ok(())
    }

    /// Adds one test case per satisfiable bounded path of either program.
    fn make_tcs(&mut self, target: &Cfg, rewrite: &Cfg) {
        let mut added = 0;
        let mut total = 0;
        for cfg in [target, rewrite] {
            let entry = cfg.get_entry();
            let paths = CfgPaths::enumerate_all(cfg, self.config.bound);
            total += paths.len();
            for path in &paths {
                let result = self.checker.check(
                    cfg,
                    cfg,
                    entry,
                    entry,
                    path,
                    &[],
                    &Invariant::True,
                    &Invariant::False,
                );
                match result {
                    Ok(ObligationResult::Disproven(Some(ceg))) => {
                        if !self.sandbox.inputs().contains(&ceg.target) {
                            self.sandbox.insert_input(ceg.target);
                            added += 1;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => log::warn!("no test case for path {:?}: {}", path, e),
                }
            }
        }
        log::info!("generated {} test cases from {} paths", added, total);
    }

    /// The first test case on which the programs differ.
    fn find_difference(&mut self, target: &Cfg, rewrite: &Cfg) -> Result<Option<CpuState>> {
        let inputs = self.sandbox.inputs().to_vec();
        for input in inputs {
            if let Some(diff) = compare_outputs(&mut self.sandbox, target, rewrite, &input)? {
                log::info!("test case distinguishes the programs at {}", diff);
                return Ok(Some(input));
            }
        }
        Ok(None)
    }

    /// Builds the automaton from the inductive edges and the test-case
    /// traces, and seeds every state's invariant.
    fn build_automaton(
        &mut self,
        target: &Cfg,
        rewrite: &Cfg,
        inductive: Vec<DualEdge>,
    ) -> Result<DualAutomaton> {
        let mut dual = DualAutomaton::new(target, rewrite);
        let mut target_cuts = vec![target.get_entry(), target.get_exit()];
        let mut rewrite_cuts = vec![rewrite.get_entry(), rewrite.get_exit()];
        for edge in inductive {
            target_cuts.push(edge.from.ts);
            rewrite_cuts.push(edge.from.rs);
            dual.add_edge(edge);
        }

        let target_traces = self.sandbox.run_all(target)?;
        let rewrite_traces = self.sandbox.run_all(rewrite)?;
        let mut samples: BTreeMap<DualState, Vec<(CpuState, CpuState)>> = BTreeMap::new();
        for (t, r) in target_traces.iter().zip(&rewrite_traces) {
            if !t.outcome.is_completed() || !r.outcome.is_completed() {
                continue;
            }
            let tpos = cut_positions(t, &target_cuts);
            let rpos = cut_positions(r, &rewrite_cuts);
            if tpos.len() != rpos.len() {
                log::debug!(
                    "traces visit {} and {} cut points, skipped",
                    tpos.len(),
                    rpos.len()
                );
                continue;
            }
            for k in 0..tpos.len() {
                let state = DualState::new(t.blocks[tpos[k]], r.blocks[rpos[k]]);
                samples
                    .entry(state)
                    .or_default()
                    .push((t.states[tpos[k]].clone(), r.states[rpos[k]].clone()));
                if k + 1 < tpos.len() {
                    dual.add_edge(DualEdge {
                        from: state,
                        to: DualState::new(t.blocks[tpos[k + 1]], r.blocks[rpos[k + 1]]),
                        te: t.blocks[tpos[k]..tpos[k + 1]].to_vec(),
                        re: r.blocks[rpos[k]..rpos[k + 1]].to_vec(),
                    });
                }
            }
        }

        let start = dual.start_state();
        let exit = dual.exit_state();
        dual.set_invariant(start, initial_invariant(target));
        dual.set_invariant(exit, exit_invariant(target));

        let target_regs = relevant_registers(target);
        let rewrite_regs = relevant_registers(rewrite);
        let conditions = (jump_conditions(target), jump_conditions(rewrite));
        for state in dual.get_reachable_states() {
            if state == start || state == exit {
                continue;
            }
            let data = samples.get(&state).map(Vec::as_slice).unwrap_or(&[]);
            let mut conj = self.learner.learn(
                &target_regs,
                &rewrite_regs,
                (&conditions.0, &conditions.1),
                data,
            )?;
            conj.push(Invariant::NoSignals);
            log::debug!("{} candidates at {}", conj.len(), state);
            dual.set_invariant(state, Invariant::Conjunction(conj));
        }

        log::info!(
            "dual automaton has {} edges over {} states",
            dual.count_edges(),
            dual.get_reachable_states().len()
        );
        Ok(dual)
    }

    /// Alternates the invariant fixed point with coverage refinement.
    fn prove(
        &mut self,
        target: &Cfg,
        rewrite: &Cfg,
        dual: &mut DualAutomaton,
    ) -> Result<Option<CpuState>> {
        for round in 0..=self.config.max_refinements {
            log::debug!("proof round {}", round);
            if let Some(input) = self.discharge_invariants(target, rewrite, dual)? {
                return Ok(Some(input));
            }
            if let Some(input) = self.final_step(target, rewrite, dual)? {
                return Ok(Some(input));
            }
            match self.discharge_exhaustive(target, rewrite, dual)? {
                Coverage::Complete => {
                    log::info!("proof complete");
                    return Ok(None);
                }
                Coverage::Counterexample(input) => return Ok(Some(input)),
                Coverage::Refined => {
                    log::info!("edges added, proving again");
                }
            }
        }
        log::warn!("refinement budget of {} rounds exhausted", self.config.max_refinements);
        Err(validator_error!("could not verify exhaustive nor find counterexample"))
    }

    /// Removes every conjunct that is not preserved along the edges.
    ///
    /// Returns a counterexample if an obligation out of the start state fails
    /// on an input where the programs really differ.
    fn discharge_invariants(
        &mut self,
        target: &Cfg,
        rewrite: &Cfg,
        dual: &mut DualAutomaton,
    ) -> Result<Option<CpuState>> {
        let start = dual.start_state();
        let mut worklist: BTreeSet<DualState> = dual.get_reachable_states().into_iter().collect();

        while let Some(current) = worklist.pop_first() {
            let edges: Vec<DualEdge> = dual.next_edges(current).cloned().collect();
            let mut changed = false;
            for edge in edges {
                let assume = dual.get_invariant(edge.from);
                let conjuncts = dual.get_invariant(edge.to).conjuncts();
                let mut kept = Vec::with_capacity(conjuncts.len());
                for conjunct in conjuncts {
                    let result = self.checker.check(
                        target,
                        rewrite,
                        edge.from.ts,
                        edge.from.rs,
                        &edge.target_path(),
                        &edge.rewrite_path(),
                        &assume,
                        &conjunct,
                    );
                    match result {
                        Ok(ObligationResult::Proven) => kept.push(conjunct),
                        Ok(ObligationResult::Disproven(ceg)) => {
                            log::debug!("dropped {} at {}", conjunct, edge.to);
                            if edge.from == start {
                                if let Some(input) = self.check_input(target, rewrite, ceg)? {
                                    return Ok(Some(input));
                                }
                            }
                        }
                        Err(e) => {
                            log::warn!("{} at {} assumed false: {}", conjunct, edge.to, e);
                        }
                    }
                }
                let before = dual.get_invariant(edge.to).conjuncts().len();
                if kept.len() != before {
                    changed = true;
                    dual.set_invariant(edge.to, Invariant::Conjunction(kept));
                }
            }
            if changed {
                worklist.extend(dual.next_states(current));
            }
        }
        Ok(None)
    }

    /// Replays a start-state counterexample; keeps it as a test case if the
    /// programs agree on it.
    fn check_input(
        &mut self,
        target: &Cfg,
        rewrite: &Cfg,
        ceg: Option<Counterexample>,
    ) -> Result<Option<CpuState>> {
        let Some(ceg) = ceg else {
            return Ok(None);
        };
        if let Some(diff) = compare_outputs(&mut self.sandbox, target, rewrite, &ceg.target)? {
            log::info!("counterexample differs at {}", diff);
            return Ok(Some(ceg.target));
        }
        self.insert_input(ceg.target);
        Ok(None)
    }

    /// Checks that the exit invariant implies equal live-outs and memory.
    fn final_step(
        &mut self,
        target: &Cfg,
        rewrite: &Cfg,
        dual: &DualAutomaton,
    ) -> Result<Option<CpuState>> {
        let exit = dual.exit_state();
        let actual = dual.get_invariant(exit);
        let expected = final_invariant(target);
        let result = self
            .checker
            .check(target, rewrite, exit.ts, exit.rs, &[], &[], &actual, &expected)?;
        if result.is_proven() {
            return Ok(None);
        }
        if let Some(input) = self.find_difference(target, rewrite)? {
            return Ok(Some(input));
        }
        log::warn!("exit invariant {} is too weak", actual);
        Err(validator_error!("could not complete final proof step"))
    }

    /// Checks coverage at every reachable non-exit state, adding edges for
    /// the executions that are missing.
    fn discharge_exhaustive(
        &mut self,
        target: &Cfg,
        rewrite: &Cfg,
        dual: &mut DualAutomaton,
    ) -> Result<Coverage> {
        let mut refined = false;
        for state in dual.get_reachable_states() {
            if state == dual.exit_state() {
                continue;
            }
            let mut seen: Vec<Counterexample> = Vec::new();
            loop {
                let pairs: Vec<_> = dual
                    .next_edges(state)
                    .map(|e| (e.target_path(), e.rewrite_path()))
                    .collect();
                let assume = dual.get_invariant(state);
                let result = self
                    .checker
                    .check_exhaustive(target, rewrite, state.ts, state.rs, &pairs, &assume)?;
                let ceg = match result {
                    ObligationResult::Proven => {
                        log::debug!("exhaustive at {}", state);
                        break;
                    }
                    ObligationResult::Disproven(Some(ceg)) => ceg,
                    ObligationResult::Disproven(None) => {
                        return Err(validator_error!(
                            "could not verify exhaustive nor find counterexample"
                        ));
                    }
                };
                if seen.contains(&ceg) {
                    log::warn!("repeated counterexample at {}, aborting refinement", state);
                    return Err(validator_error!(
                        "could not verify exhaustive nor find counterexample"
                    ));
                }
                seen.push(ceg.clone());
                if let Some(input) = self.refine(target, rewrite, dual, state, ceg)? {
                    return Ok(Coverage::Counterexample(input));
                }
                refined = true;
            }
        }
        Ok(if refined {
            Coverage::Refined
        } else {
            Coverage::Complete
        })
    }

    /// Turns a coverage counterexample into a new edge out of `state`.
    ///
    /// Both programs run from the counterexample until they reach a cut
    /// point of the automaton. A destination that is a new state gets the
    /// candidates learned from the single state pair reached.
    fn refine(
        &mut self,
        target: &Cfg,
        rewrite: &Cfg,
        dual: &mut DualAutomaton,
        state: DualState,
        ceg: Counterexample,
    ) -> Result<Option<CpuState>> {
        if state == dual.start_state() {
            if let Some(input) = self.check_input(target, rewrite, Some(ceg.clone()))? {
                return Ok(Some(input));
            }
        }

        let states = dual.get_reachable_states();
        let target_cuts: Vec<BlockId> = states.iter().map(|s| s.ts).collect();
        let rewrite_cuts: Vec<BlockId> = states.iter().map(|s| s.rs).collect();
        let t = self
            .sandbox
            .run_from(target, state.ts, &ceg.target, |b| target_cuts.contains(&b))?;
        let r = self
            .sandbox
            .run_from(rewrite, state.rs, &ceg.rewrite, |b| rewrite_cuts.contains(&b))?;
        if !t.outcome.is_finished() || !r.outcome.is_finished() {
            log::warn!(
                "counterexample at {} ends with {:?} / {:?}",
                state,
                t.outcome,
                r.outcome
            );
            return Err(validator_error!("could not verify exhaustive nor find counterexample"));
        }

        let (Some((&ts, te)), Some((&rs, re))) = (t.blocks.split_last(), r.blocks.split_last())
        else {
            return Err(validator_error!("empty trace at {}", state));
        };
        let to = DualState::new(ts, rs);
        let is_new = !states.contains(&to);
        let edge = DualEdge {
            from: state,
            to,
            te: te.to_vec(),
            re: re.to_vec(),
        };
        if !dual.add_edge(edge) {
            log::warn!("counterexample at {} follows an existing edge", state);
            return Err(validator_error!("could not verify exhaustive nor find counterexample"));
        }

        if is_new && to != dual.exit_state() {
            let sample = [(t.last, r.last)];
            let conditions = (jump_conditions(target), jump_conditions(rewrite));
            let mut conj = self.learner.learn(
                &relevant_registers(target),
                &relevant_registers(rewrite),
                (&conditions.0, &conditions.1),
                &sample,
            )?;
            conj.push(Invariant::NoSignals);
            dual.set_invariant(to, Invariant::Conjunction(conj));
        }
        log::debug!("refined {} with an edge to {}", state, to);
        Ok(None)
    }
}

impl Verifier for DdecValidator {
    fn verify(&mut self, target: &Cfg, rewrite: &Cfg) -> bool {
        self.error = None;
        self.counter_examples.clear();
        self.dual = None;
        self.checker.solver().reset();

        match self.run(target, rewrite) {
            Ok(None) => true,
            Ok(Some(input)) => {
                self.counter_examples.push(input);
                false
            }
            Err(e) => {
                log::warn!("verification aborted: {}", e);
                self.error = Some(e);
                false
            }
        }
    }

    fn get_error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    fn get_counter_examples(&self) -> &[CpuState] {
        &self.counter_examples
    }
}

/// Equal inputs, equal memory and no signal raised yet.
fn initial_invariant(target: &Cfg) -> Invariant {
    Invariant::Conjunction(vec![
        Invariant::StateEquality(target.def_ins().clone()),
        Invariant::MemoryEquality,
        Invariant::NoSignals,
    ])
}

/// Equal live-outs and memory as the caller sees it.
fn final_invariant(target: &Cfg) -> Invariant {
    Invariant::Conjunction(vec![
        Invariant::StateEquality(target.live_outs().clone()),
        Invariant::ReturnMemoryEquality,
    ])
}

fn exit_invariant(target: &Cfg) -> Invariant {
    let mut conj = final_invariant(target).conjuncts();
    conj.push(Invariant::NoSignals);
    Invariant::Conjunction(conj)
}

/// Positions of `trace` that enter a cut point.
fn cut_positions(trace: &Trace, cuts: &[BlockId]) -> Vec<usize> {
    trace
        .blocks
        .iter()
        .enumerate()
        .filter(|(_, b)| cuts.contains(b))
        .map(|(i, _)| i)
        .collect()
}

/// Interface registers and every register an instruction names.
fn relevant_registers(cfg: &Cfg) -> RegSet {
    let mut regs = cfg.def_ins().union(cfg.live_outs());
    for instr in cfg.get_code().iter() {
        for op in instr.operands() {
            if let Some(reg) = op.as_gp() {
                regs = regs.with_gp(GpRegister::r64(reg.index()));
            }
            if let Some(mem) = op.as_mem() {
                for reg in mem.base.iter().chain(mem.index.iter()) {
                    regs = regs.with_gp(GpRegister::r64(reg.index()));
                }
            }
        }
    }
    regs
}

fn jump_conditions(cfg: &Cfg) -> Vec<Condition> {
    let mut out: Vec<Condition> = cfg
        .get_code()
        .iter()
        .filter(|i| i.is_jcc())
        .filter_map(|i| i.condition())
        .collect();
    out.sort_unstable();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{rax_cfg as cfg, rdi_input as rdi, MockSolver};

    fn interface() -> RegSet {
        RegSet::empty()
            .with_gp(GpRegister::r64(0))
            .with_gp(GpRegister::r64(7))
    }

    fn validator(solver: MockSolver, make_tcs: bool) -> DdecValidator {
        let config = ValidatorConfig::new().with_make_tcs(make_tcs);
        DdecValidator::new(Box::new(solver), config).unwrap()
    }

    #[test]
    fn test_interface_mismatch() {
        let target = cfg("retq", interface());
        let rewrite = cfg("retq", RegSet::universe());
        let mut v = validator(MockSolver::new(), false);
        assert!(!v.verify(&target, &rewrite));
        let Some(Error::Validator { message, .. }) = v.get_error() else {
            panic!("expected a validator error");
        };
        assert!(message.contains("def-ins"));
    }

    #[test]
    fn test_refine_rejects_known_edge() {
        let target = cfg("movq %rdi, %rax\nretq", interface());
        let mut v = validator(MockSolver::new(), false);
        let mut dual = DualAutomaton::new(&target, &target);
        dual.set_invariant(dual.start_state(), initial_invariant(&target));
        let ceg = Counterexample {
            target: rdi(3),
            rewrite: rdi(3),
        };
        let start = dual.start_state();
        assert!(v
            .refine(&target, &target, &mut dual, start, ceg.clone())
            .unwrap()
            .is_none());
        assert_eq!(dual.count_edges(), 1);
        assert_eq!(dual.edges()[0].to, dual.exit_state());
        assert_eq!(dual.edges()[0].te, vec![0, 1]);

        // The same execution again adds nothing.
        let err = v.refine(&target, &target, &mut dual, start, ceg).unwrap_err();
        assert!(err.to_string().contains("could not verify exhaustive"));
    }

    #[test]
    fn test_relevant_registers() {
        let c = cfg("movl (%rsi,%rcx,4), %edx\nretq", RegSet::empty());
        let regs = relevant_registers(&c);
        for i in [0u8, 1, 2, 6] {
            assert!(regs.contains_gp(GpRegister::r64(i)));
        }
        assert!(!regs.contains_gp(GpRegister::r64(7)));
    }

    #[test]
    fn test_equivalent_loops() {
        let text = "xorl %eax, %eax\n.L1:\naddq $3, %rax\ndecq %rdi\njne .L1\nretq";
        let inputs: Vec<CpuState> = (1..5).map(rdi).collect();
        let mut v = validator(MockSolver::with_inputs(inputs.clone()), false);
        for input in inputs {
            v.insert_input(input);
        }
        let target = cfg(text, interface());
        assert!(v.verify(&target, &target), "{:?}", v.get_error());
        assert!(!v.has_error());

        let dual = v.automaton().unwrap();
        let head = DualState::new(2, 2);
        assert!(dual.get_reachable_states().contains(&head));
        assert!(dual.get_invariant(head).conjuncts().len() > 1);
    }

    #[test]
    fn test_flipped_output() {
        let inputs: Vec<CpuState> = (1..4).map(rdi).collect();
        let mut v = validator(MockSolver::with_inputs(inputs.clone()), false);
        for input in inputs {
            v.insert_input(input);
        }
        let text = "xorl %eax, %eax\n.L1:\naddq $3, %rax\ndecq %rdi\njne .L1\nretq";
        let target = cfg(text, interface());
        let rewrite = cfg(&text.replace("$3", "$2"), interface());
        assert!(!v.verify(&target, &rewrite));
        assert!(!v.has_error());
        assert_eq!(v.counter_examples_available(), 1);

        let mut sandbox = Sandbox::default();
        let input = &v.get_counter_examples()[0];
        assert!(compare_outputs(&mut sandbox, &target, &rewrite, input)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_refines_missing_edges() {
        // No test cases: the only edge comes from a coverage counterexample.
        let target = cfg("movq %rdi, %rax\naddq $1, %rax\nretq", interface());
        let rewrite = cfg("leaq 1(%rdi), %rax\nretq", interface());
        let mut v = validator(MockSolver::with_inputs(vec![rdi(9)]), false);
        assert!(v.verify(&target, &rewrite), "{:?}", v.get_error());
        assert_eq!(v.automaton().unwrap().count_edges(), 1);
        assert_eq!(v.sandbox().size(), 1);
    }

    #[test]
    fn test_final_step_failure() {
        let target = cfg("movq %rdi, %rax\nretq", interface());
        let rewrite = cfg("movq %rdi, %rax\nretq", interface());
        let solver = MockSolver::new().with_answers(std::iter::repeat(true).take(64));
        let mut v = validator(solver, false);
        assert!(!v.verify(&target, &rewrite));
        let err = v.get_error().unwrap();
        assert!(err.to_string().contains("could not complete final proof step"));
        assert_eq!(v.counter_examples_available(), 0);
    }

    #[test]
    fn test_make_tcs_adds_inputs() {
        let text = "testq %rdi, %rdi\nje .L1\nincq %rax\n.L1:\nretq";
        let mut v = validator(MockSolver::with_inputs(vec![rdi(0), rdi(5)]), true);
        let target = cfg(text, interface());
        assert!(v.verify(&target, &target), "{:?}", v.get_error());
        assert_eq!(v.sandbox().size(), 2);
    }

    #[test]
    fn test_make_tcs_covers_rewrite_paths() {
        let target = cfg("movq %rdi, %rax\nretq", interface());
        let rewrite = cfg(
            "movq %rdi, %rax\ntestq %rdi, %rdi\nje .L1\nmovq %rdi, %rax\n.L1:\nretq",
            interface(),
        );
        let mut v = validator(MockSolver::with_inputs(vec![rdi(0), rdi(5)]), true);
        v.make_tcs(&target, &rewrite);
        // The target alone has a single path, satisfied by the first input.
        assert_eq!(v.sandbox().size(), 2);
        assert!(v.sandbox().inputs().contains(&rdi(5)));
    }
}
