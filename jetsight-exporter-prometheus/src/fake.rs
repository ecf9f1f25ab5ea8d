//! Scriptable stand-ins for the telemetry daemon and the host, used in tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jetsight_common::{DiskUsage, Error, HostFacts, Result, SourceReading};
use parking_lot::Mutex;

use crate::source::TelemetrySource;
use crate::system::HostInfo;

/// Outcome of one scripted fetch.
#[derive(Debug, Clone)]
pub enum FetchStep {
    Reading(SourceReading),
    Fail(String),
    /// Sleep before answering with the steady reading.
    Delay(Duration),
}

/// How many times each operation was invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceCalls {
    pub connects: usize,
    pub fetches: usize,
    pub closes: usize,
}

#[derive(Debug, Default)]
struct Script {
    connect_failures: usize,
    steps: VecDeque<FetchStep>,
    steady: Option<SourceReading>,
    connected: bool,
    calls: SourceCalls,
}

/// Telemetry source that replays a script.
///
/// Clones share the same script, so a test can keep a handle after moving
/// the source into a session.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    script: Arc<Mutex<Script>>,
}

impl ScriptedSource {
    /// A source that answers every fetch with `reading`.
    pub fn steady(reading: SourceReading) -> Self {
        let source = Self::default();
        source.script.lock().steady = Some(reading);
        source
    }

    /// Fail the next `count` connection attempts.
    pub fn fail_connects(&self, count: usize) {
        self.script.lock().connect_failures = count;
    }

    /// Queue a one-off fetch outcome ahead of the steady reading.
    pub fn push(&self, step: FetchStep) {
        self.script.lock().steps.push_back(step);
    }

    /// Replace the steady reading.
    pub fn set_steady(&self, reading: Option<SourceReading>) {
        self.script.lock().steady = reading;
    }

    pub fn calls(&self) -> SourceCalls {
        self.script.lock().calls
    }

    pub fn is_connected(&self) -> bool {
        self.script.lock().connected
    }

    fn steady_reading(&self) -> Result<SourceReading> {
        self.script
            .lock()
            .steady
            .clone()
            .ok_or_else(|| Error::Daemon("no reading scripted".to_string()))
    }
}

#[async_trait]
impl TelemetrySource for ScriptedSource {
    fn endpoint(&self) -> String {
        "scripted".to_string()
    }

    async fn connect(&mut self) -> Result<()> {
        let mut script = self.script.lock();
        script.calls.connects += 1;
        if script.connect_failures > 0 {
            script.connect_failures -= 1;
            script.connected = false;
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "scripted connect failure",
            )
            .into());
        }
        script.connected = true;
        Ok(())
    }

    async fn fetch(&mut self) -> Result<SourceReading> {
        let step = {
            let mut script = self.script.lock();
            script.calls.fetches += 1;
            if !script.connected {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "not connected",
                )
                .into());
            }
            script.steps.pop_front()
        };

        match step {
            Some(FetchStep::Reading(reading)) => Ok(reading),
            Some(FetchStep::Fail(message)) => {
                self.script.lock().connected = false;
                Err(Error::Daemon(message))
            }
            Some(FetchStep::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                self.steady_reading()
            }
            None => self.steady_reading(),
        }
    }

    async fn close(&mut self) {
        let mut script = self.script.lock();
        script.calls.closes += 1;
        script.connected = false;
    }
}

/// Host info returning fixed facts.
#[derive(Debug, Clone)]
pub struct StaticHost {
    facts: HostFacts,
}

impl StaticHost {
    pub fn new(username: &str, hostname: &str) -> Self {
        Self {
            facts: HostFacts {
                username: username.to_string(),
                hostname: hostname.to_string(),
                boot_time: None,
                disk: None,
            },
        }
    }

    pub fn with_disk(mut self, disk: DiskUsage) -> Self {
        self.facts.disk = Some(disk);
        self
    }
}

impl HostInfo for StaticHost {
    fn facts(&self) -> HostFacts {
        self.facts.clone()
    }
}
