//! Scripted serial channels for worker and session tests

use meter_protocol::{ChannelError, ConnectError, ConnectionConfig, SerialChannel, SerialConnector};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Step {
    Chunk(Vec<u8>),
    Fail(io::ErrorKind),
    /// Block like a read waiting out its timeout, then return nothing
    Stall(Duration),
}

/// Sequence of read results; reads past the end return no bytes
#[derive(Debug, Clone, Default)]
pub struct Script {
    steps: VecDeque<Step>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk(mut self, bytes: &[u8]) -> Self {
        self.steps.push_back(Step::Chunk(bytes.to_vec()));
        self
    }

    pub fn error(mut self, kind: io::ErrorKind) -> Self {
        self.steps.push_back(Step::Fail(kind));
        self
    }

    pub fn stall(mut self, duration: Duration) -> Self {
        self.steps.push_back(Step::Stall(duration));
        self
    }
}

/// Observes what the worker did with the scripted channel
#[derive(Debug, Clone, Default)]
pub struct ChannelWatch {
    reads: Arc<AtomicUsize>,
    opens: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl ChannelWatch {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct ScriptedChannel {
    steps: VecDeque<Step>,
    watch: ChannelWatch,
}

impl SerialChannel for ScriptedChannel {
    fn read_available(&mut self) -> Result<Vec<u8>, ChannelError> {
        if self.watch.is_closed() {
            return Err(ChannelError::Closed);
        }
        self.watch.reads.fetch_add(1, Ordering::SeqCst);
        match self.steps.pop_front() {
            Some(Step::Chunk(bytes)) => Ok(bytes),
            Some(Step::Fail(kind)) => Err(io::Error::new(kind, "scripted failure").into()),
            Some(Step::Stall(duration)) => {
                thread::sleep(duration);
                Ok(Vec::new())
            }
            None => {
                thread::sleep(Duration::from_millis(1));
                Ok(Vec::new())
            }
        }
    }

    fn close(&mut self) {
        self.watch.closed.store(true, Ordering::SeqCst);
    }
}

/// Connector that plays a fresh copy of its script on every open
pub struct ScriptedConnector {
    script: Mutex<Script>,
    fail_with: Option<String>,
    watch: ChannelWatch,
}

impl ScriptedConnector {
    pub fn new(script: Script) -> (Self, ChannelWatch) {
        let watch = ChannelWatch::default();
        let connector = Self {
            script: Mutex::new(script),
            fail_with: None,
            watch: watch.clone(),
        };
        (connector, watch)
    }

    pub fn failing(port: &str) -> (Self, ChannelWatch) {
        let (mut connector, watch) = Self::new(Script::new());
        connector.fail_with = Some(port.to_string());
        (connector, watch)
    }
}

impl SerialConnector for ScriptedConnector {
    fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn SerialChannel>, ConnectError> {
        config.validate()?;
        self.watch.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(port) = &self.fail_with {
            return Err(ConnectError::Open {
                port: port.clone(),
                reason: "No such file or directory".into(),
            });
        }
        self.watch.closed.store(false, Ordering::SeqCst);
        let steps = self.script.lock().unwrap().steps.clone();
        Ok(Box::new(ScriptedChannel {
            steps,
            watch: self.watch.clone(),
        }))
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}
