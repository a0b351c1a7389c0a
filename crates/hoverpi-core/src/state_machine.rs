use tracing::info;

// ---------------------------------------------------------------------------
// Enums & Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlightPhase {
    Warmup = 0,
    ReadyToFlyRamp = 1,
    ActiveFlight = 2,
    Shutdown = 3,
}

impl FlightPhase {
    pub fn label(self) -> &'static str {
        match self {
            Self::Warmup => "Warmup",
            Self::ReadyToFlyRamp => "Ready-to-fly ramp",
            Self::ActiveFlight => "Active flight",
            Self::Shutdown => "Shutdown",
        }
    }
}

pub const NUM_PHASES: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct StateMachineConfig {
    /// Seconds spent settling the gravity estimate before the ramp
    pub warmup_duration: f64,
    /// Vertical spin at which the ramp hands over to the flight plan
    pub hover_target: f64,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            warmup_duration: 20.0,
            hover_target: 600.0,
        }
    }
}

/// Inputs required by the state machine update.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateInput {
    /// Seconds since the first motion sample
    pub time: f64,
    /// Current ramped vertical spin
    pub hover_speed: f64,
    /// Flight plan has run past its last step
    pub plan_complete: bool,
    /// External shutdown request
    pub cancelled: bool,
}

// ---------------------------------------------------------------------------
// State Machine
// ---------------------------------------------------------------------------

pub struct StateMachine {
    config: StateMachineConfig,
    state: FlightPhase,

    /// Time when the current state was entered.
    state_start_time: f64,

    /// Historical transition timestamps.
    transition_times: [f64; NUM_PHASES],
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new(StateMachineConfig::default())
    }
}

impl StateMachine {
    pub fn new(config: StateMachineConfig) -> Self {
        let mut transition_times = [f64::NAN; NUM_PHASES];
        transition_times[FlightPhase::Warmup as usize] = 0.0;

        Self {
            config,
            state: FlightPhase::Warmup,
            state_start_time: 0.0,
            transition_times,
        }
    }

    pub fn update(&mut self, input: StateInput) -> FlightPhase {
        let time_in_state = self.time_in_state(input.time);

        let next_state = if input.cancelled && self.state != FlightPhase::Shutdown {
            Some(FlightPhase::Shutdown)
        } else {
            match self.state {
                FlightPhase::Warmup => {
                    if time_in_state >= self.config.warmup_duration {
                        Some(FlightPhase::ReadyToFlyRamp)
                    } else {
                        None
                    }
                }
                FlightPhase::ReadyToFlyRamp => {
                    if input.hover_speed >= self.config.hover_target {
                        Some(FlightPhase::ActiveFlight)
                    } else {
                        None
                    }
                }
                FlightPhase::ActiveFlight => {
                    if input.plan_complete {
                        Some(FlightPhase::Shutdown)
                    } else {
                        None
                    }
                }
                FlightPhase::Shutdown => None,
            }
        };

        if let Some(new_state) = next_state {
            self.transition_to(new_state, input.time);
        }

        self.state
    }

    /// Force a transition to shutdown, e.g. when the motion source ends.
    pub fn shutdown(&mut self, time: f64) {
        if self.state != FlightPhase::Shutdown {
            self.transition_to(FlightPhase::Shutdown, time);
        }
    }

    fn transition_to(&mut self, new_state: FlightPhase, time: f64) {
        info!(from = self.state.label(), to = new_state.label(), time, "phase transition");
        self.state = new_state;
        self.state_start_time = time;
        self.transition_times[new_state as usize] = time;
    }

    pub fn current_state(&self) -> FlightPhase {
        self.state
    }

    pub fn time_in_state(&self, time: f64) -> f64 {
        time - self.state_start_time
    }

    pub fn transition_time(&self, state: FlightPhase) -> f64 {
        self.transition_times[state as usize]
    }
}
