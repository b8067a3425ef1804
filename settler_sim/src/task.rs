// Task registry: schedulable work with single-owner occupancy.
//
// A task is a unit of work bound to one location: a workbench with a queue
// of jobs, a canteen seat, a treatment bed in a medical bay. Structures
// register their tasks here and unregister them when destroyed. Agents never
// write to a task directly; every occupancy change goes through
// `acquire*`/`release`, which is what makes double assignment impossible:
//
// - `acquire` scans tasks in id order and claims the first schedulable one.
//   Claiming sets the occupant in the same call, and the sim is
//   single-threaded, so no two agents can come out of `acquire` holding the
//   same task.
// - `acquire_specific` re-claims a known task (an interrupted worker coming
//   back). It fails if the task vanished, someone else holds it, or its
//   queue ran dry.
// - `release` frees the task. If work is still queued and a successor is
//   named, occupancy passes directly to the successor; otherwise the task
//   becomes free and the caller announces it.
//
// Work tasks are schedulable only while they have queued work. Meal and
// treatment tasks are service slots and are schedulable whenever free.
//
// See also: `world.rs` for `release_task`, which picks the successor from the
// signal bus and publishes availability; `behavior/work.rs` for the worker
// side.
//
// **Critical constraint: determinism.** Tasks live in a `BTreeMap`; "first
// free task" and "nearest free task" break ties by `TaskId`.

use crate::error::RegistryError;
use crate::types::{AgentId, IdCounter, Pose, StructureId, TaskId, Vec2};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    /// Construction, cleaning, crafting: anything with a queue of jobs.
    Work,
    /// A seat at a canteen.
    Meal,
    /// A treatment slot in a medical bay.
    Treatment,
}

/// Where a task is performed.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskSite {
    /// Coarse approach point.
    pub point: Vec2,
    /// Radius of the object at `point`.
    #[serde(default)]
    pub footprint: f32,
    /// Exact pose for the precise lock, if the task needs one.
    #[serde(default)]
    pub precise: Option<Pose>,
}

impl TaskSite {
    pub fn at(point: Vec2) -> Self {
        Self {
            point,
            footprint: 0.0,
            precise: None,
        }
    }
}

/// One queued job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub duration_ms: u64,
}

/// Derived lifecycle view of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// Free but nothing to do.
    Idle,
    /// Free and schedulable.
    Available,
    Occupied(AgentId),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub site: TaskSite,
    /// Owning structure; destroying it unregisters the task.
    pub structure: Option<StructureId>,
    /// Animation clip the host plays while an agent performs this task.
    pub animation: Option<String>,
    occupant: Option<AgentId>,
    queue: VecDeque<WorkUnit>,
    completed_units: u32,
}

impl Task {
    pub fn occupant(&self) -> Option<AgentId> {
        self.occupant
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn front_unit(&self) -> Option<&WorkUnit> {
        self.queue.front()
    }

    pub fn completed_units(&self) -> u32 {
        self.completed_units
    }

    fn has_work(&self) -> bool {
        self.kind != TaskKind::Work || !self.queue.is_empty()
    }

    pub fn is_schedulable(&self) -> bool {
        self.occupant.is_none() && self.has_work()
    }

    pub fn state(&self) -> TaskState {
        match self.occupant {
            Some(agent) => TaskState::Occupied(agent),
            None if self.has_work() => TaskState::Available,
            None => TaskState::Idle,
        }
    }
}

/// What happened to a task on release.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Release {
    /// The task is free. `announce` is true when it still has queued work.
    Freed { announce: bool },
    /// Occupancy passed directly to this agent.
    HandedOff(AgentId),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TaskRegistry {
    tasks: BTreeMap<TaskId, Task>,
    ids: IdCounter,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kind: TaskKind,
        site: TaskSite,
        structure: Option<StructureId>,
        animation: Option<String>,
    ) -> TaskId {
        let id = TaskId(self.ids.allocate());
        self.tasks.insert(
            id,
            Task {
                id,
                kind,
                site,
                structure,
                animation,
                occupant: None,
                queue: VecDeque::new(),
                completed_units: 0,
            },
        );
        id
    }

    /// Remove a task. The returned task's `occupant()` is the evicted
    /// holder, if any; the caller must pull that agent out of its state.
    pub fn unregister(&mut self, id: TaskId) -> Option<Task> {
        self.tasks.remove(&id)
    }

    /// Remove every task owned by `structure`.
    pub fn unregister_structure(&mut self, structure: StructureId) -> Vec<Task> {
        let ids: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.structure == Some(structure))
            .map(|t| t.id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.tasks.remove(&id))
            .collect()
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Append a job. Returns true if the task is now free with work waiting,
    /// i.e. worth announcing.
    pub fn enqueue(&mut self, id: TaskId, unit: WorkUnit) -> Result<bool, RegistryError> {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or(RegistryError::UnknownTask(id))?;
        task.queue.push_back(unit);
        Ok(task.occupant.is_none() && task.kind == TaskKind::Work)
    }

    /// Claim the first free work task with queued work.
    pub fn acquire(&mut self, agent: AgentId) -> Option<TaskId> {
        let id = self
            .tasks
            .values()
            .find(|t| t.kind == TaskKind::Work && t.is_schedulable())?
            .id;
        self.claim(id, agent);
        Some(id)
    }

    /// Claim the free task of `kind` closest to `from` that passes `filter`.
    pub fn acquire_nearest(
        &mut self,
        agent: AgentId,
        kind: TaskKind,
        from: Vec2,
        filter: impl Fn(&Task) -> bool,
    ) -> Option<TaskId> {
        let id = self
            .tasks
            .values()
            .filter(|t| t.kind == kind && t.is_schedulable() && filter(t))
            .min_by(|a, b| {
                from.distance(a.site.point)
                    .total_cmp(&from.distance(b.site.point))
                    .then(a.id.cmp(&b.id))
            })?
            .id;
        self.claim(id, agent);
        Some(id)
    }

    /// Claim a specific task. Succeeds if the agent already holds it.
    pub fn acquire_specific(&mut self, agent: AgentId, id: TaskId) -> Result<(), RegistryError> {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or(RegistryError::UnknownTask(id))?;
        match task.occupant {
            Some(holder) if holder == agent => Ok(()),
            Some(holder) => Err(RegistryError::Occupied { task: id, holder }),
            None if !task.has_work() => Err(RegistryError::NoWork(id)),
            None => {
                task.occupant = Some(agent);
                Ok(())
            }
        }
    }

    fn claim(&mut self, id: TaskId, agent: AgentId) {
        if let Some(task) = self.tasks.get_mut(&id) {
            debug_assert!(task.occupant.is_none(), "claiming a held task");
            task.occupant = Some(agent);
        }
    }

    /// Give up a held task. With work remaining and a `successor`, the task
    /// passes straight to the successor.
    pub fn release(
        &mut self,
        id: TaskId,
        agent: AgentId,
        successor: Option<AgentId>,
    ) -> Result<Release, RegistryError> {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or(RegistryError::UnknownTask(id))?;
        if task.occupant != Some(agent) {
            return Err(RegistryError::NotHolder { task: id, agent });
        }
        let work_left = task.kind == TaskKind::Work && !task.queue.is_empty();
        match successor.filter(|s| *s != agent) {
            Some(next) if work_left => {
                task.occupant = Some(next);
                Ok(Release::HandedOff(next))
            }
            _ => {
                task.occupant = None;
                Ok(Release::Freed {
                    announce: work_left,
                })
            }
        }
    }

    /// Pop the front job of a held task. Returns the remaining queue length.
    pub fn complete_unit(&mut self, id: TaskId, agent: AgentId) -> Result<usize, RegistryError> {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or(RegistryError::UnknownTask(id))?;
        if task.occupant != Some(agent) {
            return Err(RegistryError::NotHolder { task: id, agent });
        }
        if task.queue.pop_front().is_some() {
            task.completed_units += 1;
        }
        Ok(task.queue.len())
    }

    /// Whether `agent` could pick `id` back up: it exists, is free or
    /// already held by `agent`, and has work.
    pub fn can_resume(&self, id: TaskId, agent: AgentId) -> bool {
        self.tasks.get(&id).is_some_and(|t| {
            t.has_work() && t.occupant.is_none_or(|holder| holder == agent)
        })
    }

    /// Any free work task with queued work?
    pub fn has_available_work(&self) -> bool {
        self.tasks
            .values()
            .any(|t| t.kind == TaskKind::Work && t.is_schedulable())
    }

    /// The task `agent` occupies, if any.
    pub fn held_by(&self, agent: AgentId) -> impl Iterator<Item = &Task> {
        self.tasks
            .values()
            .filter(move |t| t.occupant == Some(agent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: register a work task at `x` with `units` queued jobs.
    fn work_task(reg: &mut TaskRegistry, x: f32, units: usize) -> TaskId {
        let id = reg.register(TaskKind::Work, TaskSite::at(Vec2::new(x, 0.0)), None, None);
        for _ in 0..units {
            reg.enqueue(id, WorkUnit { duration_ms: 100 }).unwrap();
        }
        id
    }

    #[test]
    fn acquire_never_returns_held_task() {
        let mut reg = TaskRegistry::new();
        let t = work_task(&mut reg, 0.0, 2);
        assert_eq!(reg.acquire(AgentId(1)), Some(t));
        assert_eq!(reg.acquire(AgentId(2)), None);
        assert_eq!(reg.get(t).unwrap().occupant(), Some(AgentId(1)));
    }

    #[test]
    fn acquire_skips_tasks_without_work() {
        let mut reg = TaskRegistry::new();
        let empty = work_task(&mut reg, 0.0, 0);
        let busy = work_task(&mut reg, 1.0, 1);
        assert_eq!(reg.get(empty).unwrap().state(), TaskState::Idle);
        assert_eq!(reg.acquire(AgentId(1)), Some(busy));
    }

    #[test]
    fn acquire_in_id_order() {
        let mut reg = TaskRegistry::new();
        let first = work_task(&mut reg, 50.0, 1);
        let _second = work_task(&mut reg, 0.0, 1);
        assert_eq!(reg.acquire(AgentId(1)), Some(first));
    }

    #[test]
    fn acquire_nearest_respects_kind_and_filter() {
        let mut reg = TaskRegistry::new();
        let far = reg.register(TaskKind::Meal, TaskSite::at(Vec2::new(10.0, 0.0)), None, None);
        let near = reg.register(TaskKind::Meal, TaskSite::at(Vec2::new(2.0, 0.0)), None, None);
        let _work = work_task(&mut reg, 0.0, 1);

        assert_eq!(
            reg.acquire_nearest(AgentId(1), TaskKind::Meal, Vec2::ZERO, |_| true),
            Some(near)
        );
        assert_eq!(
            reg.acquire_nearest(AgentId(2), TaskKind::Meal, Vec2::ZERO, |t| t.id != far),
            None
        );
        assert_eq!(
            reg.acquire_nearest(AgentId(2), TaskKind::Meal, Vec2::ZERO, |_| true),
            Some(far)
        );
    }

    #[test]
    fn release_with_work_and_no_successor_announces() {
        let mut reg = TaskRegistry::new();
        let t = work_task(&mut reg, 0.0, 2);
        reg.acquire(AgentId(1));
        assert_eq!(
            reg.release(t, AgentId(1), None),
            Ok(Release::Freed { announce: true })
        );
        assert_eq!(reg.get(t).unwrap().state(), TaskState::Available);
    }

    #[test]
    fn release_hands_off_to_successor() {
        let mut reg = TaskRegistry::new();
        let t = work_task(&mut reg, 0.0, 2);
        reg.acquire(AgentId(1));
        assert_eq!(
            reg.release(t, AgentId(1), Some(AgentId(2))),
            Ok(Release::HandedOff(AgentId(2)))
        );
        assert_eq!(reg.get(t).unwrap().occupant(), Some(AgentId(2)));
    }

    #[test]
    fn release_of_finished_task_does_not_hand_off() {
        let mut reg = TaskRegistry::new();
        let t = work_task(&mut reg, 0.0, 1);
        reg.acquire(AgentId(1));
        assert_eq!(reg.complete_unit(t, AgentId(1)), Ok(0));
        assert_eq!(
            reg.release(t, AgentId(1), Some(AgentId(2))),
            Ok(Release::Freed { announce: false })
        );
        assert_eq!(reg.get(t).unwrap().state(), TaskState::Idle);
        assert_eq!(reg.get(t).unwrap().completed_units(), 1);
    }

    #[test]
    fn release_by_non_holder_is_rejected() {
        let mut reg = TaskRegistry::new();
        let t = work_task(&mut reg, 0.0, 1);
        reg.acquire(AgentId(1));
        assert_eq!(
            reg.release(t, AgentId(2), None),
            Err(RegistryError::NotHolder {
                task: t,
                agent: AgentId(2)
            })
        );
    }

    #[test]
    fn acquire_specific_validates() {
        let mut reg = TaskRegistry::new();
        let t = work_task(&mut reg, 0.0, 1);
        reg.acquire_specific(AgentId(1), t).unwrap();
        // Idempotent for the holder.
        reg.acquire_specific(AgentId(1), t).unwrap();
        assert_eq!(
            reg.acquire_specific(AgentId(2), t),
            Err(RegistryError::Occupied {
                task: t,
                holder: AgentId(1)
            })
        );
        assert!(!reg.can_resume(t, AgentId(2)));
        assert!(reg.can_resume(t, AgentId(1)));

        let gone = TaskId(999);
        assert_eq!(
            reg.acquire_specific(AgentId(1), gone),
            Err(RegistryError::UnknownTask(gone))
        );
    }

    #[test]
    fn unregister_structure_returns_evicted_holders() {
        let mut reg = TaskRegistry::new();
        let s = StructureId(4);
        let a = reg.register(TaskKind::Meal, TaskSite::at(Vec2::ZERO), Some(s), None);
        let b = reg.register(TaskKind::Meal, TaskSite::at(Vec2::ZERO), Some(s), None);
        let other = reg.register(TaskKind::Meal, TaskSite::at(Vec2::ZERO), None, None);
        reg.acquire_specific(AgentId(7), b).unwrap();

        let removed = reg.unregister_structure(s);
        assert_eq!(removed.len(), 2);
        let holders: Vec<_> = removed.iter().filter_map(|t| t.occupant()).collect();
        assert_eq!(holders, vec![AgentId(7)]);
        assert!(reg.get(a).is_none());
        assert!(reg.get(other).is_some());
    }

    #[test]
    fn enqueue_reports_availability() {
        let mut reg = TaskRegistry::new();
        let t = work_task(&mut reg, 0.0, 0);
        assert_eq!(reg.enqueue(t, WorkUnit { duration_ms: 10 }), Ok(true));
        reg.acquire(AgentId(1));
        assert_eq!(reg.enqueue(t, WorkUnit { duration_ms: 10 }), Ok(false));
        assert_eq!(reg.get(t).unwrap().queue_len(), 2);
    }
}
