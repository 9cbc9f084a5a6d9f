//! Obstacle and viability constraint compiler
//!
//! Geometric obstacle descriptors and the viability margin are accumulated
//! as typed entries by [`ConstraintBuilder`] and compiled exactly once, at
//! controller construction, into three immutable stage-indexed sets
//! (initial / running / terminal — the solver may require stage-specific
//! expressions). Entries keep their input order; each soft entry records an
//! explicit slack index per stage set so slack weights can never drift out
//! of alignment with constraint rows.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use safempc_core::{Model, Vector};

/// Geometric obstacle classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObstacleKind {
    /// Horizontal plane; the constrained quantity is the world-frame height
    /// of the monitored point.
    Floor,
    /// Sphere; the constrained quantity is the squared distance from the
    /// monitored point to the center.
    Ball,
}

/// Obstacle descriptor supplied at controller construction. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Obstacle {
    pub kind: ObstacleKind,
    /// Lower bound on the constrained quantity.
    pub lower: f64,
    /// Upper bound on the constrained quantity.
    pub upper: f64,
    /// Center position; required for `Ball`, ignored for `Floor`.
    pub position: Option<Vector3<f64>>,
}

impl Obstacle {
    pub fn floor(lower: f64, upper: f64) -> Self {
        Self {
            kind: ObstacleKind::Floor,
            lower,
            upper,
            position: None,
        }
    }

    pub fn ball(center: Vector3<f64>, lower: f64, upper: f64) -> Self {
        Self {
            kind: ObstacleKind::Ball,
            lower,
            upper,
            position: Some(center),
        }
    }
}

/// Constrained scalar expression of one compiled entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintExpr {
    /// World-frame height of the monitored point.
    Floor,
    /// Squared distance from the monitored point to `center`.
    Ball { center: Vector3<f64> },
    /// Learned viability margin `h(x, alpha)`.
    SafetyMargin,
}

/// One compiled scalar constraint row.
#[derive(Debug, Clone)]
pub struct ConstraintEntry {
    pub expr: ConstraintExpr,
    pub lower: f64,
    pub upper: f64,
    /// Row index within its stage set, in append order.
    pub row: usize,
    /// Slack weight for a softened entry.
    pub slack_weight: Option<f64>,
    /// Index into the stage set's slack vector; assigned at compile time,
    /// `None` for hard entries.
    pub slack_index: Option<usize>,
}

/// The constraint rows of one stage type.
#[derive(Debug, Clone, Default)]
pub struct StageSet {
    pub entries: Vec<ConstraintEntry>,
}

impl StageSet {
    fn push(&mut self, expr: ConstraintExpr, lower: f64, upper: f64, slack_weight: Option<f64>) {
        let row = self.entries.len();
        let slack_index = slack_weight.map(|_| self.num_slacks());
        self.entries.push(ConstraintEntry {
            expr,
            lower,
            upper,
            row,
            slack_weight,
            slack_index,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of softened rows in this set.
    pub fn num_slacks(&self) -> usize {
        self.entries.iter().filter(|e| e.slack_index.is_some()).count()
    }

    /// Slack weights in slack-index order.
    pub fn slack_weights(&self) -> Vec<f64> {
        let mut weights: Vec<(usize, f64)> = self
            .entries
            .iter()
            .filter_map(|e| e.slack_index.zip(e.slack_weight))
            .collect();
        weights.sort_by_key(|(idx, _)| *idx);
        weights.into_iter().map(|(_, w)| w).collect()
    }
}

/// Immutable compiled constraint sets for the three stage types.
#[derive(Debug, Clone)]
pub struct CompiledConstraints {
    pub initial: StageSet,
    pub running: StageSet,
    pub terminal: StageSet,
    /// Conservatism level baked into the viability entries.
    pub alpha: f64,
}

impl CompiledConstraints {
    /// Evaluate one entry's constrained quantity at a state.
    ///
    /// Returns `None` for the viability entry when no filter is attached —
    /// the caller decides whether that is fatal.
    pub fn evaluate_entry(&self, model: &Model, entry: &ConstraintEntry, x: &Vector) -> Option<f64> {
        match &entry.expr {
            ConstraintExpr::Floor => Some(model.tip_position(x).z),
            ConstraintExpr::Ball { center } => {
                let d = model.tip_position(x) - center;
                Some(d.norm_squared())
            }
            ConstraintExpr::SafetyMargin => model.safety_margin(x, self.alpha).ok(),
        }
    }

    /// True iff every *geometric* running entry is within its bounds at `x`.
    ///
    /// The viability entry is deliberately excluded: collision checking is a
    /// geometric predicate usable before the filter is attached.
    pub fn check_collision(&self, model: &Model, x: &Vector) -> bool {
        self.running
            .entries
            .iter()
            .filter(|e| !matches!(e.expr, ConstraintExpr::SafetyMargin))
            .all(|e| {
                let v = self
                    .evaluate_entry(model, e, x)
                    .expect("geometric entries always evaluate");
                v >= e.lower && v <= e.upper
            })
    }
}

/// Accumulates typed constraint entries and compiles them once.
///
/// Obstacles are appended in input order; viability entries always follow
/// the obstacle block, so row indices agree across stage sets that share a
/// prefix.
#[derive(Debug, Clone, Default)]
pub struct ConstraintBuilder {
    obstacles: Vec<Obstacle>,
    running_safety: Option<Option<f64>>,
    terminal_safety: Option<Option<f64>>,
    alpha: f64,
}

impl ConstraintBuilder {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            ..Default::default()
        }
    }

    pub fn obstacles(mut self, obstacles: &[Obstacle]) -> Self {
        self.obstacles.extend_from_slice(obstacles);
        self
    }

    /// Add the viability margin to the running set; `slack_weight = None`
    /// makes it hard.
    pub fn running_safety(mut self, slack_weight: Option<f64>) -> Self {
        self.running_safety = Some(slack_weight);
        self
    }

    /// Add the viability margin to the terminal set.
    pub fn terminal_safety(mut self, slack_weight: Option<f64>) -> Self {
        self.terminal_safety = Some(slack_weight);
        self
    }

    pub fn compile(self) -> CompiledConstraints {
        let mut initial = StageSet::default();
        let mut running = StageSet::default();
        let mut terminal = StageSet::default();

        for obstacle in &self.obstacles {
            let expr = match obstacle.kind {
                ObstacleKind::Floor => ConstraintExpr::Floor,
                ObstacleKind::Ball => ConstraintExpr::Ball {
                    center: obstacle
                        .position
                        .expect("ball obstacle requires a center position"),
                },
            };
            // One scalar row replicated across all three stage sets.
            initial.push(expr.clone(), obstacle.lower, obstacle.upper, None);
            running.push(expr.clone(), obstacle.lower, obstacle.upper, None);
            terminal.push(expr, obstacle.lower, obstacle.upper, None);
        }

        if let Some(slack) = self.running_safety {
            running.push(ConstraintExpr::SafetyMargin, 0.0, 1e6, slack);
        }
        if let Some(slack) = self.terminal_safety {
            terminal.push(ConstraintExpr::SafetyMargin, 0.0, 1e6, slack);
        }

        CompiledConstraints {
            initial,
            running,
            terminal,
            alpha: self.alpha,
        }
    }
}
