use crate::Backend;
use std::thread::sleep;
use std::time::Duration;

/// Blocking suspension point, swapped out in tests
pub trait Pause {
    fn pause(&self, duration: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&self, duration: Duration) {
        sleep(duration)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadinessState {
    Unprobed,
    Waiting,
    Ready,
}

/// Blocks until a backend answers its liveness probe.
/// There is no timeout: the server is expected to come up eventually.
#[derive(Clone, Debug)]
pub struct ReadinessGate {
    state: ReadinessState,
    interval: Duration,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl ReadinessGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            state: ReadinessState::Unprobed,
            interval,
        }
    }

    pub fn state(&self) -> ReadinessState {
        self.state
    }

    pub fn wait(&mut self, backend: &dyn Backend, pause: &dyn Pause) {
        while self.state != ReadinessState::Ready {
            match backend.probe() {
                Ok(()) => {
                    if self.state == ReadinessState::Waiting {
                        tracing::info!("{} is online", backend.endpoint());
                    }
                    self.state = ReadinessState::Ready;
                }
                Err(err) => {
                    if self.state == ReadinessState::Unprobed {
                        tracing::info!(
                            "{} is offline, waiting for it to become online...",
                            backend.endpoint().location()
                        );
                        tracing::debug!("{err}");
                        self.state = ReadinessState::Waiting;
                    }
                    pause.pause(self.interval);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{RawResponse, WireRequest};
    use crate::{ClientError, Endpoint, Extracted, GenerationRequest, Result, Role};
    use std::cell::{Cell, RefCell};
    use std::io;
    use std::sync::{Arc, Mutex};

    struct Flaky {
        endpoint: Endpoint,
        failures: Cell<usize>,
        probes: Cell<usize>,
    }

    impl Backend for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn endpoint(&self) -> &Endpoint {
            &self.endpoint
        }

        fn probe(&self) -> Result<()> {
            self.probes.set(self.probes.get() + 1);
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(ClientError::Transport(
                    self.endpoint.to_string(),
                    "connection refused".to_string(),
                ));
            }
            Ok(())
        }

        fn translate(&self, request: &GenerationRequest) -> WireRequest {
            request.to_map()
        }

        fn call(&self, _wire: &WireRequest) -> Result<RawResponse> {
            unreachable!()
        }

        fn extract(&self, _response: &RawResponse) -> Extracted {
            unreachable!()
        }
    }

    #[derive(Default)]
    struct Recorder(RefCell<Vec<Duration>>);

    impl Pause for Recorder {
        fn pause(&self, duration: Duration) {
            self.0.borrow_mut().push(duration);
        }
    }

    fn flaky(failures: usize) -> Flaky {
        Flaky {
            endpoint: Endpoint::new("localhost", Role::Primary),
            failures: Cell::new(failures),
            probes: Cell::new(0),
        }
    }

    #[test]
    fn test_ready_immediately() {
        let backend = flaky(0);
        let pause = Recorder::default();
        let mut gate = ReadinessGate::default();
        gate.wait(&backend, &pause);

        assert_eq!(gate.state(), ReadinessState::Ready);
        assert_eq!(backend.probes.get(), 1);
        assert!(pause.0.borrow().is_empty());
    }

    #[test]
    fn test_waits_until_online() {
        let backend = flaky(3);
        let pause = Recorder::default();
        let mut gate = ReadinessGate::default();
        gate.wait(&backend, &pause);

        assert_eq!(gate.state(), ReadinessState::Ready);
        assert_eq!(backend.probes.get(), 4);
        assert_eq!(*pause.0.borrow(), vec![Duration::from_secs(1); 3]);
    }

    #[test]
    fn test_ready_is_terminal() {
        let backend = flaky(0);
        let pause = Recorder::default();
        let mut gate = ReadinessGate::default();
        gate.wait(&backend, &pause);
        backend.failures.set(5);
        gate.wait(&backend, &pause);

        assert_eq!(backend.probes.get(), 1);
        assert!(pause.0.borrow().is_empty());
    }

    /// Formatted log output, shared with the subscriber
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_waiting_is_logged_once() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish();

        let backend = flaky(3);
        let pause = Recorder::default();
        let mut gate = ReadinessGate::default();
        tracing::subscriber::with_default(subscriber, || gate.wait(&backend, &pause));

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert_eq!(backend.probes.get(), 4);
        assert_eq!(logs.matches("is offline, waiting").count(), 1, "{logs}");
        assert_eq!(logs.matches("is online").count(), 1, "{logs}");
        assert!(logs.contains("(http://localhost)"));
    }
}
