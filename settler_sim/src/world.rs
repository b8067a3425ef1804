// Shared services every behavior state works against.
//
// `World` bundles everything that is not per-agent: the config, the sim
// clock, the registries (tasks, beds, bunkers, structures, hostiles), the
// signal bus, the path planner, the seeded RNG, the day/night flag, and the
// narrative event buffer. `SimState` owns one `World` next to its agent map,
// so an agent can be borrowed mutably alongside the world without aliasing.
//
// Task release lives here rather than in `TaskRegistry` because it spans two
// services: the registry decides whether occupancy can pass on, and the
// signal bus supplies the successor (the agent that has been waiting for
// work the longest) and carries the notification.
//
// **Critical constraint: determinism.** The RNG is the only randomness
// source; it is seeded once from the sim seed.

use crate::bed::BedRegistry;
use crate::clock::{Clock, SimClock};
use crate::config::SimConfig;
use crate::event::{SimEvent, SimEventKind};
use crate::planner::PathPlanner;
use crate::shelter::BunkerRegistry;
use crate::signal::{Signal, SignalBus, Topic};
use crate::structure::StructureRegistry;
use crate::task::{Release, TaskRegistry};
use crate::threat::{HostileRegistry, ThreatMonitor};
use crate::types::{AgentId, TaskId};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use tracing::{debug, warn};

pub struct World {
    pub config: SimConfig,
    pub clock: SimClock,
    pub tasks: TaskRegistry,
    pub beds: BedRegistry,
    pub bunkers: BunkerRegistry,
    pub structures: StructureRegistry,
    pub hostiles: HostileRegistry,
    pub monitor: ThreatMonitor,
    pub signals: SignalBus,
    pub planner: Box<dyn PathPlanner>,
    pub rng: SmallRng,
    pub is_night: bool,
    events: Vec<SimEvent>,
}

impl World {
    pub fn new(seed: u64, config: SimConfig, planner: Box<dyn PathPlanner>) -> Self {
        Self {
            clock: SimClock::new(config.tick_duration_ms),
            beds: BedRegistry::new(config.beds.cache_ttl_ms),
            is_night: config.day.start_at_night,
            tasks: TaskRegistry::new(),
            bunkers: BunkerRegistry::new(),
            structures: StructureRegistry::new(),
            hostiles: HostileRegistry::new(),
            monitor: ThreatMonitor::new(),
            signals: SignalBus::new(),
            planner,
            rng: SmallRng::seed_from_u64(seed),
            events: Vec::new(),
            config,
        }
    }

    /// Current sim time in milliseconds.
    pub fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn emit(&mut self, kind: SimEventKind) {
        self.events.push(SimEvent {
            tick: self.clock.tick(),
            kind,
        });
    }

    pub fn take_events(&mut self) -> Vec<SimEvent> {
        std::mem::take(&mut self.events)
    }

    /// Release `task` held by `agent`. Queued work passes straight to the
    /// agent that has waited longest for work; with no one waiting it is
    /// announced to every idle agent. Returns `None` if `agent` did not hold
    /// the task (it was evicted or already released).
    pub fn release_task(&mut self, task: TaskId, agent: AgentId) -> Option<Release> {
        let successor = self.signals.longest_waiting(Topic::TaskAvailable, agent);
        let release = match self.tasks.release(task, agent, successor) {
            Ok(release) => release,
            Err(err) => {
                debug!(%agent, %task, %err, "release skipped");
                return None;
            }
        };
        self.emit(SimEventKind::TaskReleased { agent, task });
        match release {
            Release::HandedOff(next) => {
                debug!(%task, from = %agent, to = %next, "task handed off");
                if !self.signals.send_to(next, Signal::TaskHandedOff(task)) {
                    // Successor came from the subscriber list, so this only
                    // fires if the bus and registry disagree.
                    warn!(%task, %next, "handoff target not subscribed");
                }
                self.emit(SimEventKind::TaskHandedOff {
                    task,
                    from: agent,
                    to: next,
                });
            }
            Release::Freed { announce: true } => self.announce_task(task),
            Release::Freed { announce: false } => {}
        }
        Some(release)
    }

    /// Tell every waiting agent that `task` has work and is free.
    pub fn announce_task(&mut self, task: TaskId) {
        let reached = self.signals.publish(Signal::TaskAvailable(task));
        debug!(%task, reached, "task available");
        self.emit(SimEventKind::TaskAvailable { task });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::OpenFieldPlanner;
    use crate::task::{TaskKind, TaskSite, WorkUnit};
    use crate::types::Vec2;

    /// Helper: a world with one work task holding `units` jobs.
    fn world_with_task(units: usize) -> (World, TaskId) {
        let mut world = World::new(1, SimConfig::default(), Box::new(OpenFieldPlanner::new()));
        let task = world
            .tasks
            .register(TaskKind::Work, TaskSite::at(Vec2::ZERO), None, None);
        for _ in 0..units {
            world
                .tasks
                .enqueue(task, WorkUnit { duration_ms: 100 })
                .unwrap();
        }
        (world, task)
    }

    #[test]
    fn release_hands_off_to_longest_waiting_agent() {
        let (mut world, task) = world_with_task(2);
        let holder = AgentId(0);
        world.tasks.acquire_specific(holder, task).unwrap();
        let first = world.signals.subscribe(AgentId(5), Topic::TaskAvailable);
        let second = world.signals.subscribe(AgentId(3), Topic::TaskAvailable);

        assert_eq!(
            world.release_task(task, holder),
            Some(Release::HandedOff(AgentId(5)))
        );
        assert_eq!(world.tasks.get(task).unwrap().occupant(), Some(AgentId(5)));
        assert_eq!(
            world.signals.take(AgentId(5)),
            vec![Signal::TaskHandedOff(task)]
        );
        assert!(world.signals.take(AgentId(3)).is_empty());

        world.signals.unsubscribe(first);
        world.signals.unsubscribe(second);
    }

    #[test]
    fn release_without_waiters_announces() {
        let (mut world, task) = world_with_task(1);
        world.tasks.acquire_specific(AgentId(0), task).unwrap();
        assert_eq!(
            world.release_task(task, AgentId(0)),
            Some(Release::Freed { announce: true })
        );
        assert!(world.tasks.get(task).unwrap().occupant().is_none());
        assert!(
            world
                .take_events()
                .iter()
                .any(|e| e.kind == SimEventKind::TaskAvailable { task })
        );
    }

    #[test]
    fn release_by_non_holder_is_ignored() {
        let (mut world, task) = world_with_task(1);
        world.tasks.acquire_specific(AgentId(0), task).unwrap();
        assert_eq!(world.release_task(task, AgentId(9)), None);
        assert_eq!(world.tasks.get(task).unwrap().occupant(), Some(AgentId(0)));
    }
}
