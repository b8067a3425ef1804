// Scenario files for the headless runner.
//
// A scenario is a JSON document describing one self-contained run: the RNG
// seed, an optional config override, an optional navigation grid, the timed
// host commands, and how many ticks to run. Commands use the same serde
// format as `settler_sim::command::SimCommand`, so a scenario is effectively
// a recorded command log.
//
// Example:
//
//   {
//     "seed": 7,
//     "ticks": 600,
//     "grid": { "width": 64, "height": 64, "cell_size": 1.0,
//               "origin": { "x": -32.0, "y": -32.0 } },
//     "commands": [
//       { "tick": 0, "action": { "SpawnAgent": { "position": { "x": 0.0, "y": 0.0 } } } }
//     ]
//   }
//
// See also: `main.rs` for the CLI, `settler_sim::sim` for what the commands
// do once applied.

use std::path::Path;

use serde::{Deserialize, Serialize};
use settler_sim::command::SimCommand;
use settler_sim::config::SimConfig;
use settler_sim::error::{ConfigError, InvariantViolation};
use settler_sim::event::SimEvent;
use settler_sim::grid::{GridSpec, NavGrid};
use settler_sim::planner::{OpenFieldPlanner, PathPlanner};
use settler_sim::sim::SimState;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub config: SimConfig,
    /// Obstacle grid. Without one, agents walk straight lines.
    #[serde(default)]
    pub grid: Option<GridSpec>,
    #[serde(default)]
    pub commands: Vec<SimCommand>,
    pub ticks: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed scenario: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invariant violated at tick {tick}: {violation}")]
    Invariant {
        tick: u64,
        violation: InvariantViolation,
    },
}

/// Options for a single run.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunOptions {
    /// Validate `SimState::check_invariants` after every tick.
    pub check: bool,
    /// Override the scenario's tick count.
    pub ticks: Option<u64>,
}

/// What a finished run produced.
pub struct RunOutcome {
    pub sim: SimState,
    pub events: Vec<SimEvent>,
}

impl Scenario {
    pub fn from_json(json: &str) -> Result<Self, ScenarioError> {
        let mut scenario: Scenario = serde_json::from_str(json)?;
        scenario.config.validate()?;
        // `step` expects commands in tick order. Stable, so same-tick
        // commands keep file order.
        scenario.commands.sort_by_key(|c| c.tick);
        Ok(scenario)
    }

    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let json = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    fn planner(&self) -> Box<dyn PathPlanner> {
        match &self.grid {
            Some(spec) => Box::new(NavGrid::from_spec(spec)),
            None => Box::new(OpenFieldPlanner::new()),
        }
    }

    /// Build a fresh sim for this scenario.
    pub fn build(&self) -> SimState {
        SimState::with_planner(self.seed, self.config.clone(), self.planner())
    }

    /// Run the scenario to completion and collect every narrative event.
    pub fn run(&self, options: RunOptions) -> Result<RunOutcome, ScenarioError> {
        let mut sim = self.build();
        let ticks = options.ticks.unwrap_or(self.ticks);

        if !options.check {
            let result = sim.step(&self.commands, ticks);
            return Ok(RunOutcome {
                sim,
                events: result.events,
            });
        }

        let mut events = Vec::new();
        let mut next = 0;
        for tick in 1..=ticks {
            let due = self.commands[next..]
                .iter()
                .take_while(|c| c.tick <= tick)
                .count();
            let result = sim.step(&self.commands[next..next + due], tick);
            next += due;
            events.extend(result.events);
            sim.check_invariants()
                .map_err(|violation| ScenarioError::Invariant { tick, violation })?;
        }
        Ok(RunOutcome { sim, events })
    }
}
