//! Scripted stand-ins for the messaging client, shared by the queue and API tests

use futures::{FutureExt, future::BoxFuture};
use std::{
    collections::{HashMap, VecDeque},
    path::Path,
    sync::Mutex,
    time::Duration,
};
use tokio_util::sync::CancellationToken;

use super::models::{MessageRef, ProgressSample};
use super::notify::Notifier;
use super::source::{Fetcher, ProgressSender};
use super::{NotifyError, TransferError};

#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// Reports a few samples and completes with `total` bytes
    Succeed(u64),
    Fail,
    /// Runs until cancelled
    Hang,
    /// Reports `samples` KiB one by one, a sample every 100 ms
    Trickle(u64),
}

/// Plays back scripted steps per locator; the last step repeats
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    /// Locator and `resume` flag of every call
    calls: Mutex<Vec<(String, bool)>>,
    /// `start <locator>` and `end <locator>` in the order they happened
    events: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn script(self, locator: &str, steps: &[Step]) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(locator.to_string(), steps.iter().copied().collect());
        self
    }

    pub fn calls_for(&self, locator: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c == locator)
            .count()
    }

    pub fn resume_flags(&self, locator: &str) -> Vec<bool> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c == locator)
            .map(|(_, resume)| *resume)
            .collect()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn next_step(&self, locator: &str) -> Step {
        let mut scripts = self.scripts.lock().unwrap();
        let steps = scripts.entry(locator.to_string()).or_default();
        if steps.len() > 1 {
            steps.pop_front().unwrap()
        } else {
            steps.front().copied().unwrap_or(Step::Succeed(1024))
        }
    }
}

impl Fetcher for ScriptedFetcher {
    fn fetch<'a>(
        &'a self,
        locator: &'a str,
        _destination: &'a Path,
        resume: bool,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<u64, TransferError>> {
        self.calls
            .lock()
            .unwrap()
            .push((locator.to_string(), resume));
        self.events.lock().unwrap().push(format!("start {locator}"));
        let step = self.next_step(locator);
        async move {
            let result = match step {
                Step::Succeed(total) => {
                    for current in [0, total / 2, total] {
                        let _ = progress.send(ProgressSample { current, total }).await;
                    }
                    Ok(total)
                }
                Step::Fail => Err(TransferError::Other("connection reset".into())),
                Step::Hang => {
                    let _ = progress
                        .send(ProgressSample {
                            current: 10,
                            total: 100,
                        })
                        .await;
                    cancel.cancelled().await;
                    Err(TransferError::Cancelled)
                }
                Step::Trickle(samples) => {
                    let total = samples * 1024;
                    for n in 0..=samples {
                        if n > 0 {
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                        let _ = progress
                            .send(ProgressSample {
                                current: n * 1024,
                                total,
                            })
                            .await;
                    }
                    Ok(total)
                }
            };
            self.events.lock().unwrap().push(format!("end {locator}"));
            result
        }
        .boxed()
    }
}

/// Records every sent or edited text
#[derive(Default)]
pub struct RecordingNotifier {
    texts: Mutex<Vec<String>>,
    failing: bool,
}

impl RecordingNotifier {
    /// A notifier whose every call fails
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    fn record(&self, text: &str) -> Result<usize, NotifyError> {
        if self.failing {
            return Err(NotifyError("chat unavailable".into()));
        }
        let mut texts = self.texts.lock().unwrap();
        texts.push(text.to_string());
        Ok(texts.len())
    }
}

impl Notifier for RecordingNotifier {
    fn reply<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<MessageRef, NotifyError>> {
        let result = self.record(text).map(|n| MessageRef::Id(n as i64));
        async move { result }.boxed()
    }

    fn edit<'a>(
        &'a self,
        _message: &'a MessageRef,
        text: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        let result = self.record(text).map(|_| ());
        async move { result }.boxed()
    }
}
