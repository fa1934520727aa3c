use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};

/// Single writer slot holding the most recent value.
///
/// Readers always get a full snapshot, never a partially updated value, and
/// never wait for the writer for longer than a copy.
pub fn channel<T: Clone>(initial: T) -> (Publisher<T>, Subscriber<T>) {
    let value = Arc::new(Mutex::new(initial));
    let publisher = Publisher {
        value: Arc::clone(&value),
    };
    let subscriber = Subscriber { value };
    (publisher, subscriber)
}

pub struct Publisher<T> {
    value: Arc<Mutex<T>>,
}

impl<T: Clone> Publisher<T> {
    pub fn publish(&self, value: T) {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }

    pub fn subscribe(&self) -> Subscriber<T> {
        Subscriber {
            value: Arc::clone(&self.value),
        }
    }
}

#[derive(Clone)]
pub struct Subscriber<T> {
    value: Arc<Mutex<T>>,
}

impl<T: Clone> Subscriber<T> {
    pub fn latest(&self) -> T {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Process wide shutdown signals.
///
/// `stop_requested` asks guidance to bring the rover to a controlled stop.
/// `exit` tells every loop to return at its next iteration.
#[derive(Debug, Clone, Default)]
pub struct ExitFlag {
    exit: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
}

impl ExitFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.exit.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.exit.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}
