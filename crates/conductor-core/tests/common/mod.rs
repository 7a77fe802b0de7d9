//! Shared test doubles for the orchestration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use conductor_core::executor::{AgentExecutor, AgentOutput, DispatchRequest, ExecutorError};
use tokio::time::Instant;

/// What the executor does for one dispatch of a specialist.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(String),
    Fail(String),
    /// Never returns; only a timeout or cancellation ends it.
    Hang,
}

/// One recorded dispatch.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub subtask_id: String,
    pub specialist: String,
    pub instruction: String,
    pub attempt: u32,
    pub started: Instant,
    pub finished: Option<Instant>,
}

/// Replays scripted steps per specialist and records every dispatch.
/// Specialists without a script (or with an exhausted one) reply
/// `"[<id>] done"` after `delay`.
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    log: Mutex<Vec<Dispatch>>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            delay,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn script(self, specialist: &str, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(specialist.to_string(), steps.into());
        self
    }

    pub fn dispatches(&self) -> Vec<Dispatch> {
        self.log.lock().unwrap().clone()
    }

    pub fn dispatches_for(&self, specialist: &str) -> Vec<Dispatch> {
        self.dispatches()
            .into_iter()
            .filter(|d| d.specialist == specialist)
            .collect()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_step(&self, specialist: &str) -> Step {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(specialist)
            .and_then(|steps| steps.pop_front())
            .unwrap_or_else(|| Step::Reply(format!("[{}] done", specialist)))
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AgentExecutor for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, request: DispatchRequest) -> Result<AgentOutput, ExecutorError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let index = {
            let mut log = self.log.lock().unwrap();
            log.push(Dispatch {
                subtask_id: request.subtask_id.clone(),
                specialist: request.specialist.id.clone(),
                instruction: request.instruction.clone(),
                attempt: request.attempt,
                started: Instant::now(),
                finished: None,
            });
            log.len() - 1
        };

        let step = self.next_step(&request.specialist.id);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = match step {
            Step::Reply(content) => Ok(AgentOutput::text(content)),
            Step::Fail(message) => Err(ExecutorError::Failed(message)),
            Step::Hang => std::future::pending().await,
        };

        self.log.lock().unwrap()[index].finished = Some(Instant::now());
        result
    }
}

pub fn shared(executor: ScriptedExecutor) -> Arc<ScriptedExecutor> {
    Arc::new(executor)
}
