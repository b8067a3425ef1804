// Data-driven simulation configuration.
//
// All tunable parameters live in `SimConfig`, loaded from JSON at startup.
// Behavior code never uses magic numbers; it reads from the config. Values
// are grouped by concern (`vitals`, `speeds`, `navigation`, `threat`,
// `schedule`, `day`, `beds`, `combat`) and every group implements `Default`
// with tuned values, so a scenario file only needs to list what it changes
// (`#[serde(default)]` on every struct).
//
// Distances are world units, rates are per simulated second, durations are
// milliseconds of sim time.
//
// See also: `sim.rs` which owns the config through `World`, `clock.rs` for
// the tick duration's role in converting rates to per-tick steps.
//
// **Critical constraint: determinism.** Config values feed directly into
// simulation logic. Two runs with different configs are different runs.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Stamina, hunger, and sickness tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VitalsConfig {
    pub max_stamina: f32,
    pub max_hunger: f32,
    /// Stamina lost per second while awake and not sheltered.
    pub stamina_drain_per_sec: f32,
    /// Stamina regained per second while asleep.
    pub stamina_recovery_per_sec: f32,
    /// Hunger gained per second while not sheltered.
    pub hunger_per_sec: f32,
    /// At or above this hunger the agent wants to eat.
    pub hungry_threshold: f32,
    /// At or below this stamina the agent wants to sleep even by day.
    pub tired_threshold: f32,
    /// Time spent at max hunger before the agent falls sick.
    pub starvation_sickness_ms: u64,
    /// Speed multiplier applied while stamina is zero.
    pub exhausted_speed_factor: f32,
}

impl Default for VitalsConfig {
    fn default() -> Self {
        Self {
            max_stamina: 100.0,
            max_hunger: 100.0,
            stamina_drain_per_sec: 0.4,
            stamina_recovery_per_sec: 2.5,
            hunger_per_sec: 0.3,
            hungry_threshold: 60.0,
            tired_threshold: 15.0,
            starvation_sickness_ms: 60_000,
            exhausted_speed_factor: 0.5,
        }
    }
}

/// Maximum movement speed for each behavior, in units per second.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedConfig {
    pub wander: f32,
    pub work: f32,
    pub eat: f32,
    pub sleep: f32,
    pub flee: f32,
    pub medical: f32,
    pub attack: f32,
}

impl Default for SpeedConfig {
    fn default() -> Self {
        Self {
            wander: 1.2,
            work: 2.5,
            eat: 2.5,
            sleep: 2.0,
            flee: 4.5,
            medical: 1.5,
            attack: 3.5,
        }
    }
}

/// Two-phase navigation and stuck detection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NavConfig {
    /// Clearance added to a destination's footprint when no behavior
    /// overrides it.
    pub default_clearance: f32,
    /// Fraction of the remaining gap closed per second during precise lock.
    pub precise_lerp_rate: f32,
    /// Precise lock snaps once within this distance of the target pose.
    pub precise_position_tolerance: f32,
    /// ... and within this many radians of its facing.
    pub precise_angle_tolerance: f32,
    /// Growth in distance to the lock target that counts as being pushed
    /// away (re-enables path following).
    pub lock_breakaway_epsilon: f32,
    /// Stuck sampling window.
    pub stuck_window_ms: u64,
    /// Minimum displacement expected over one window.
    pub stuck_min_displacement: f32,
    /// Path recalculations allowed before the destination is unobtainable.
    pub stuck_max_retries: u32,
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            default_clearance: 0.3,
            precise_lerp_rate: 6.0,
            precise_position_tolerance: 0.05,
            precise_angle_tolerance: 0.05,
            lock_breakaway_epsilon: 0.02,
            stuck_window_ms: 2_000,
            stuck_min_displacement: 0.25,
            stuck_max_retries: 3,
        }
    }
}

/// Threat monitor and flee behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreatConfig {
    pub scan_interval_ms: u64,
    /// The single canonical detection radius.
    pub detection_radius: f32,
    /// How long a threat must stay undetected before an agent stands down.
    pub cooldown_ms: u64,
    /// How far a fleeing agent runs when no bunker has space.
    pub flee_distance: f32,
    /// How often an escaping agent re-checks bunkers for space.
    pub bunker_recheck_ms: u64,
    /// Evacuate occupied bunkers once nobody has seen a threat for
    /// `cooldown_ms`.
    pub auto_evacuate: bool,
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 500,
            detection_radius: 12.0,
            cooldown_ms: 10_000,
            flee_distance: 15.0,
            bunker_recheck_ms: 1_000,
            auto_evacuate: true,
        }
    }
}

/// Timers for work, meals, treatment, and idle behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Delay before Work retries assignment after finding nothing.
    pub work_retry_grace_ms: u64,
    /// Eat is not retried for this long after a failed attempt.
    pub eat_retry_cooldown_ms: u64,
    /// MedicalTreatment is not retried for this long after a failed attempt.
    pub medical_retry_cooldown_ms: u64,
    pub meal_duration_ms: u64,
    pub treatment_duration_ms: u64,
    pub wander_radius: f32,
    /// Idle time between wander legs.
    pub wander_pause_ms: u64,
    /// How often a wandering agent re-evaluates its needs.
    pub decision_interval_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            work_retry_grace_ms: 1_500,
            eat_retry_cooldown_ms: 30_000,
            medical_retry_cooldown_ms: 30_000,
            meal_duration_ms: 5_000,
            treatment_duration_ms: 20_000,
            wander_radius: 6.0,
            wander_pause_ms: 3_000,
            decision_interval_ms: 1_000,
        }
    }
}

/// Day/night cycle lengths.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DayConfig {
    pub day_length_ms: u64,
    pub night_length_ms: u64,
    /// Start the sim at dusk instead of dawn.
    pub start_at_night: bool,
}

impl Default for DayConfig {
    fn default() -> Self {
        Self {
            day_length_ms: 240_000,
            night_length_ms: 120_000,
            start_at_night: false,
        }
    }
}

/// Bed lookup.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BedConfig {
    /// Age after which the bed location cache is rebuilt on the next read.
    pub cache_ttl_ms: u64,
    /// Unowned beds farther than this are ignored.
    pub search_radius: f32,
}

impl Default for BedConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 5_000,
            search_radius: 40.0,
        }
    }
}

/// Guards engaging hostiles.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CombatConfig {
    pub attack_range: f32,
    pub attack_damage: f32,
    pub attack_cooldown_ms: u64,
    /// How often a chasing guard re-targets a moving hostile.
    pub repath_interval_ms: u64,
    pub hostile_health: f32,
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            attack_range: 1.5,
            attack_damage: 10.0,
            attack_cooldown_ms: 1_000,
            repath_interval_ms: 500,
            hostile_health: 50.0,
        }
    }
}

/// Top-level simulation configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Simulated milliseconds per tick.
    pub tick_duration_ms: u64,
    pub vitals: VitalsConfig,
    pub speeds: SpeedConfig,
    pub navigation: NavConfig,
    pub threat: ThreatConfig,
    pub schedule: ScheduleConfig,
    pub day: DayConfig,
    pub beds: BedConfig,
    pub combat: CombatConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_duration_ms: 100,
            vitals: VitalsConfig::default(),
            speeds: SpeedConfig::default(),
            navigation: NavConfig::default(),
            threat: ThreatConfig::default(),
            schedule: ScheduleConfig::default(),
            day: DayConfig::default(),
            beds: BedConfig::default(),
            combat: CombatConfig::default(),
        }
    }
}

impl SimConfig {
    /// Parse and validate a config from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Reject values the sim cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: &str) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            }
        }

        if self.tick_duration_ms == 0 {
            return Err(invalid("tick_duration_ms", "must be positive"));
        }
        if self.threat.detection_radius <= 0.0 {
            return Err(invalid("threat.detection_radius", "must be positive"));
        }
        if self.threat.scan_interval_ms == 0 {
            return Err(invalid("threat.scan_interval_ms", "must be positive"));
        }
        if self.beds.search_radius <= 0.0 {
            return Err(invalid("beds.search_radius", "must be positive"));
        }
        if self.navigation.stuck_window_ms == 0 {
            return Err(invalid("navigation.stuck_window_ms", "must be positive"));
        }
        if self.navigation.precise_lerp_rate <= 0.0 {
            return Err(invalid("navigation.precise_lerp_rate", "must be positive"));
        }
        if self.day.day_length_ms == 0 || self.day.night_length_ms == 0 {
            return Err(invalid("day", "day and night lengths must be positive"));
        }
        if self.vitals.max_stamina <= 0.0 || self.vitals.max_hunger <= 0.0 {
            return Err(invalid("vitals", "maxima must be positive"));
        }
        Ok(())
    }
}
