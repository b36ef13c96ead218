//! 稠密两阶段单纯形法
//!
//! 变量一律非负；`≤`/`≥` 约束加松弛/剩余变量，`≥`/`=` 约束再加人工变量。
//! 进基与出基都用 Bland 规则，避免退化时循环。

use tracing::trace;

const EPS: f64 = 1e-9;
const MAX_PIVOTS: usize = 200_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Le,
    Ge,
    Eq,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LpOutcome {
    Optimal { x: Vec<f64>, objective: f64 },
    Infeasible,
    Unbounded,
    /// 超过迭代上限仍未收敛
    Stalled,
}

impl LpOutcome {
    pub fn solution(&self) -> Option<&[f64]> {
        match self {
            LpOutcome::Optimal { x, .. } => Some(x),
            _ => None,
        }
    }
}

/// 最小化 `c·x`，约束 `A x (≤|≥|=) b`，`x ≥ 0`
#[derive(Debug, Clone)]
pub struct LinearProgram {
    num_vars: usize,
    objective: Vec<f64>,
    rows: Vec<(Vec<f64>, Relation, f64)>,
}

impl LinearProgram {
    pub fn new(num_vars: usize) -> Self {
        Self {
            num_vars,
            objective: vec![0.0; num_vars],
            rows: Vec::new(),
        }
    }

    pub fn num_vars(&self) -> usize {
        self.num_vars
    }

    pub fn minimize(&mut self, var: usize, coeff: f64) -> &mut Self {
        self.objective[var] = coeff;
        self
    }

    /// 稀疏形式的约束：`(var, coeff)` 列表
    pub fn constrain(&mut self, terms: &[(usize, f64)], rel: Relation, rhs: f64) -> &mut Self {
        let mut row = vec![0.0; self.num_vars];
        for &(v, c) in terms {
            row[v] += c;
        }
        self.rows.push((row, rel, rhs));
        self
    }

    pub fn upper_bound(&mut self, var: usize, ub: f64) -> &mut Self {
        self.constrain(&[(var, 1.0)], Relation::Le, ub)
    }

    pub fn solve(&self) -> LpOutcome {
        let n = self.num_vars;
        let m = self.rows.len();

        // 规范化：右端非负
        let rows: Vec<(Vec<f64>, Relation, f64)> = self
            .rows
            .iter()
            .map(|(a, rel, b)| {
                if *b < 0.0 {
                    let flipped = match rel {
                        Relation::Le => Relation::Ge,
                        Relation::Ge => Relation::Le,
                        Relation::Eq => Relation::Eq,
                    };
                    (a.iter().map(|v| -v).collect(), flipped, -b)
                } else {
                    (a.clone(), *rel, *b)
                }
            })
            .collect();

        let num_slack = rows.iter().filter(|(_, r, _)| *r != Relation::Eq).count();
        let num_art = rows.iter().filter(|(_, r, _)| *r != Relation::Le).count();
        let art_start = n + num_slack;
        let cols = art_start + num_art;

        let mut t = Tableau {
            a: Vec::with_capacity(m),
            basis: Vec::with_capacity(m),
            cols,
        };
        let (mut s, mut art) = (n, art_start);
        for (coeffs, rel, rhs) in rows {
            let mut row = vec![0.0; cols + 1];
            row[..n].copy_from_slice(&coeffs);
            row[cols] = rhs;
            match rel {
                Relation::Le => {
                    row[s] = 1.0;
                    t.basis.push(s);
                    s += 1;
                }
                Relation::Ge => {
                    row[s] = -1.0;
                    s += 1;
                    row[art] = 1.0;
                    t.basis.push(art);
                    art += 1;
                }
                Relation::Eq => {
                    row[art] = 1.0;
                    t.basis.push(art);
                    art += 1;
                }
            }
            t.a.push(row);
        }

        // 第一阶段：最小化人工变量之和
        if num_art > 0 {
            let mut cost = vec![0.0; cols];
            for c in cost.iter_mut().skip(art_start) {
                *c = 1.0;
            }
            match t.optimize(&cost, cols) {
                Step::Done => {}
                Step::Unbounded => return LpOutcome::Infeasible,
                Step::Stalled => return LpOutcome::Stalled,
            }
            if t.objective(&cost) > 1e-7 {
                return LpOutcome::Infeasible;
            }
            // 把仍在基中的人工变量换出
            for r in 0..m {
                if t.basis[r] >= art_start
                    && let Some(c) = (0..art_start).find(|&c| t.a[r][c].abs() > EPS)
                {
                    t.pivot(r, c);
                }
            }
        }

        let mut cost = vec![0.0; cols];
        cost[..n].copy_from_slice(&self.objective);
        match t.optimize(&cost, art_start) {
            Step::Done => {}
            Step::Unbounded => return LpOutcome::Unbounded,
            Step::Stalled => return LpOutcome::Stalled,
        }

        let mut x = vec![0.0; n];
        for (r, &b) in t.basis.iter().enumerate() {
            if b < n {
                x[b] = t.a[r][cols].max(0.0);
            }
        }
        let objective = x.iter().zip(&self.objective).map(|(v, c)| v * c).sum();
        LpOutcome::Optimal { x, objective }
    }
}

enum Step {
    Done,
    Unbounded,
    Stalled,
}

struct Tableau {
    a: Vec<Vec<f64>>,
    basis: Vec<usize>,
    cols: usize,
}

impl Tableau {
    fn objective(&self, cost: &[f64]) -> f64 {
        self.basis
            .iter()
            .enumerate()
            .map(|(r, &b)| cost[b] * self.a[r][self.cols])
            .sum()
    }

    fn pivot(&mut self, r: usize, c: usize) {
        let p = self.a[r][c];
        for v in self.a[r].iter_mut() {
            *v /= p;
        }
        let pivot_row = self.a[r].clone();
        for (i, row) in self.a.iter_mut().enumerate() {
            if i == r {
                continue;
            }
            let f = row[c];
            if f.abs() > EPS {
                for (v, pv) in row.iter_mut().zip(&pivot_row) {
                    *v -= f * pv;
                }
            }
        }
        self.basis[r] = c;
    }

    /// 只允许 `0..allowed` 中的列进基
    fn optimize(&mut self, cost: &[f64], allowed: usize) -> Step {
        for iter in 0..MAX_PIVOTS {
            let entering = (0..allowed).find(|&j| {
                let reduced = cost[j]
                    - self
                        .basis
                        .iter()
                        .enumerate()
                        .map(|(r, &b)| cost[b] * self.a[r][j])
                        .sum::<f64>();
                reduced < -EPS
            });
            let Some(c) = entering else {
                trace!(pivots = iter, "单纯形收敛");
                return Step::Done;
            };

            let mut leave: Option<(usize, f64)> = None;
            for r in 0..self.a.len() {
                let coef = self.a[r][c];
                if coef <= EPS {
                    continue;
                }
                let ratio = self.a[r][self.cols] / coef;
                leave = match leave {
                    None => Some((r, ratio)),
                    Some((lr, lratio)) => {
                        if ratio < lratio - EPS
                            || ((ratio - lratio).abs() <= EPS && self.basis[r] < self.basis[lr])
                        {
                            Some((r, ratio))
                        } else {
                            Some((lr, lratio))
                        }
                    }
                };
            }
            let Some((r, _)) = leave else {
                return Step::Unbounded;
            };
            self.pivot(r, c);
        }
        Step::Stalled
    }
}
