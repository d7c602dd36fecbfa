//! Invariant learning from test-case data.
//!
//! The learner sees the concrete (target, rewrite) state pairs observed at
//! one cut point and proposes the candidate invariants that hold on all of
//! them:
//!
//! - `a - b = c` for a target register `a` and a rewrite register `b` whose
//!   difference is the same on every sample (any `c` when `a` varies, only
//!   `c = 0` otherwise)
//! - `a = c` for registers that keep one value over at least two samples
//! - `a != 0` for varying target registers that are never zero
//! - `a >= 0` or `a < 0` for varying registers whose sign never changes
//! - memory equality when both memories agree on every sample
//! - jump conditions with one truth value over at least two samples
//! - for a jump condition that varies, the equalities of the samples where
//!   it holds, under that condition as an assumption
//!
//! Candidates are hypotheses: the validator keeps only the ones it proves.

use crate::{
    validator::invariants::{transform_with_assumption, Invariant, Side, Variable},
    x64::{Condition, CpuState, GpRegister, RegSet},
    Result,
};

/// A data-driven invariant learner.
#[derive(Debug, Clone)]
pub struct InvariantLearner {
    conditional: bool,
}

impl Default for InvariantLearner {
    fn default() -> Self {
        Self { conditional: true }
    }
}

impl InvariantLearner {
    /// A learner that also proposes conditional invariants.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables conditional invariants.
    #[must_use]
    pub fn with_conditional(mut self, conditional: bool) -> Self {
        self.conditional = conditional;
        self
    }

    /// Proposes candidates that hold on every sample.
    ///
    /// # Arguments
    ///
    /// * `target_regs` / `rewrite_regs` - Registers the relations may mention
    /// * `conditions` - Jump conditions used by each program
    /// * `samples` - Observed (target, rewrite) state pairs
    ///
    /// # Errors
    ///
    /// Only if evaluating a jump condition fails, which is not expected.
    pub fn learn(
        &self,
        target_regs: &RegSet,
        rewrite_regs: &RegSet,
        conditions: (&[Condition], &[Condition]),
        samples: &[(CpuState, CpuState)],
    ) -> Result<Vec<Invariant>> {
        if samples.is_empty() {
            return Ok(Vec::new());
        }
        let target_vars = variables(Side::Target, target_regs);
        let rewrite_vars = variables(Side::Rewrite, rewrite_regs);

        let mut out = equalities(&target_vars, &rewrite_vars, samples);
        if samples.len() >= 2 {
            out.extend(constants(target_vars.iter().chain(&rewrite_vars), samples));
        }
        out.extend(
            target_vars
                .iter()
                .filter(|v| varies(v, samples))
                .filter(|v| samples.iter().all(|(t, r)| v.value(t, r) != 0))
                .map(|v| Invariant::NonZero(*v)),
        );
        out.extend(signs(target_vars.iter().chain(&rewrite_vars), samples));
        if samples
            .iter()
            .all(|(t, r)| t.first_difference(r, &RegSet::empty(), true).is_none())
        {
            out.push(Invariant::MemoryEquality);
        }

        let flags = self.flags(conditions, samples)?;
        for (flag, holds) in flags {
            if holds.len() == samples.len() {
                if samples.len() >= 2 {
                    out.push(flag);
                }
                continue;
            }
            if !self.conditional || holds.is_empty() {
                continue;
            }
            let subset: Vec<(CpuState, CpuState)> =
                holds.iter().map(|i| samples[*i].clone()).collect();
            let extra: Vec<Invariant> = equalities(&target_vars, &rewrite_vars, &subset)
                .into_iter()
                .filter(|inv| !out.contains(inv))
                .collect();
            if !extra.is_empty() {
                out.extend(transform_with_assumption(&flag, &extra).conjuncts());
            }
        }

        log::debug!("learned {} candidates from {} samples", out.len(), samples.len());
        Ok(out)
    }

    /// Every jump condition with the indices of the samples where it holds.
    fn flags(
        &self,
        conditions: (&[Condition], &[Condition]),
        samples: &[(CpuState, CpuState)],
    ) -> Result<Vec<(Invariant, Vec<usize>)>> {
        let mut out = Vec::new();
        let sides = [(Side::Target, conditions.0), (Side::Rewrite, conditions.1)];
        for (side, codes) in sides {
            let mut seen = Vec::new();
            for &condition in codes {
                if seen.contains(&condition) {
                    continue;
                }
                seen.push(condition);

                let flag = Invariant::Flag {
                    side,
                    condition,
                    taken: true,
                };
                let mut holds = Vec::new();
                for (i, (t, r)) in samples.iter().enumerate() {
                    if flag.check(t, r)? {
                        holds.push(i);
                    }
                }
                if holds.is_empty() && samples.len() >= 2 {
                    out.push((
                        Invariant::Flag {
                            side,
                            condition,
                            taken: false,
                        },
                        (0..samples.len()).collect(),
                    ));
                } else {
                    out.push((flag, holds));
                }
            }
        }
        Ok(out)
    }
}

fn variables(side: Side, regs: &RegSet) -> Vec<Variable> {
    regs.gp_registers()
        .map(|r| Variable::new(side, GpRegister::r64(r.index())))
        .collect()
}

fn varies(var: &Variable, samples: &[(CpuState, CpuState)]) -> bool {
    let mut values = samples.iter().map(|(t, r)| var.value(t, r));
    let first = values.next();
    values.any(|v| Some(v) != first)
}

fn equalities(
    target_vars: &[Variable],
    rewrite_vars: &[Variable],
    samples: &[(CpuState, CpuState)],
) -> Vec<Invariant> {
    let mut out = Vec::new();
    let Some((t0, r0)) = samples.first() else {
        return out;
    };
    for a in target_vars {
        let moving = varies(a, samples);
        for b in rewrite_vars {
            let diff = a.value(t0, r0).wrapping_sub(b.value(t0, r0));
            if diff != 0 && !moving {
                continue;
            }
            let constant = samples
                .iter()
                .all(|(t, r)| a.value(t, r).wrapping_sub(b.value(t, r)) == diff);
            if constant {
                out.push(Invariant::offset(*a, *b, diff as i64));
            }
        }
    }
    out
}

fn signs<'a>(
    vars: impl Iterator<Item = &'a Variable>,
    samples: &[(CpuState, CpuState)],
) -> Vec<Invariant> {
    let Some((t0, r0)) = samples.first() else {
        return Vec::new();
    };
    let nonnegative = |var: &Variable, t: &CpuState, r: &CpuState| (var.value(t, r) as i64) >= 0;
    vars.filter(|var| varies(var, samples))
        .filter(|var| {
            let first = nonnegative(var, t0, r0);
            samples.iter().all(|(t, r)| nonnegative(var, t, r) == first)
        })
        .map(|var| Invariant::Sign {
            var: *var,
            nonnegative: nonnegative(var, t0, r0),
        })
        .collect()
}

fn constants<'a>(
    vars: impl Iterator<Item = &'a Variable>,
    samples: &[(CpuState, CpuState)],
) -> Vec<Invariant> {
    let mut out = Vec::new();
    let Some((t0, r0)) = samples.first() else {
        return out;
    };
    for var in vars {
        if !varies(var, samples) {
            out.push(Invariant::constant(*var, var.value(t0, r0) as i64));
        }
    }
    out
}
