/// Observer for call outcomes and connection liveness.
///
/// All methods are called from session tasks and must not block.
pub trait Telemetry: Send + Sync + 'static {
    /// A handler finished and its response was sent.
    fn success(&self);

    /// A handler failed, or an envelope could not be encoded.
    fn fail(&self);

    /// The remote peer sent a liveness ping.
    fn ping(&self);

    /// Events are only reported while this returns true.
    fn enabled(&self) -> bool {
        true
    }
}

/// Optional [Telemetry] shared by a [crate::Peer] and its sessions.
#[derive(Clone, Default)]
pub(crate) struct Observer(Option<std::sync::Arc<dyn Telemetry>>);

impl Observer {
    pub fn new(telemetry: Option<std::sync::Arc<dyn Telemetry>>) -> Self {
        Self(telemetry)
    }

    fn active(&self) -> Option<&dyn Telemetry> {
        self.0
            .as_deref()
            .filter(|telemetry| telemetry.enabled())
    }

    pub fn success(&self) {
        if let Some(telemetry) = self.active() {
            telemetry.success()
        }
    }

    pub fn fail(&self) {
        if let Some(telemetry) = self.active() {
            telemetry.fail()
        }
    }

    pub fn ping(&self) {
        if let Some(telemetry) = self.active() {
            telemetry.ping()
        }
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Observer")
            .field(&self.0.as_ref().map(|_| "dyn Telemetry"))
            .finish()
    }
}

/// [Telemetry] that counts events. Useful in tests.
#[derive(Debug, Default)]
pub struct Counters {
    pub success: std::sync::atomic::AtomicUsize,
    pub fail: std::sync::atomic::AtomicUsize,
    pub ping: std::sync::atomic::AtomicUsize,
}

impl Counters {
    pub fn success_count(&self) -> usize {
        self.success.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn fail_count(&self) -> usize {
        self.fail.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn ping_count(&self) -> usize {
        self.ping.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl Telemetry for Counters {
    fn success(&self) {
        self.success
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    fn fail(&self) {
        self.fail.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    fn ping(&self) {
        self.ping.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}
