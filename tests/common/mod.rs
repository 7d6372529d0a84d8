//! In-process fakes shared by the client integration tests.
//!
//! `FakeBinder` plays the platform binder: every bind request follows a
//! script, and the test can fire connect/disconnect notifications by hand.
//! The fake services record every call.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use braille_client::{
    BindingEvents, DisplayCallback, DisplayProperties, DisplayService, InitStatus, IpcError,
    ServiceBinder, TranslatorCallback, TranslatorService,
};

/// What a bind request does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// `bind` returns `false`.
    Fail,
    /// `bind` returns `true` and reports the service connected right away.
    Connect,
    /// `bind` returns `true`; nothing is reported until the test does.
    Hang,
}

pub struct FakeBinder<S: ?Sized + 'static> {
    service: Arc<S>,
    script: Mutex<VecDeque<BindOutcome>>,
    fallback: Mutex<BindOutcome>,
    binds: Mutex<Vec<Instant>>,
    unbinds: AtomicUsize,
    last_events: Mutex<Option<BindingEvents<S>>>,
}

impl<S: ?Sized + Send + Sync + 'static> FakeBinder<S> {
    /// Follow `script`, then `fallback` for every later request.
    pub fn new(service: Arc<S>, script: Vec<BindOutcome>, fallback: BindOutcome) -> Arc<Self> {
        Arc::new(Self {
            service,
            script: Mutex::new(script.into()),
            fallback: Mutex::new(fallback),
            binds: Mutex::new(Vec::new()),
            unbinds: AtomicUsize::new(0),
            last_events: Mutex::new(None),
        })
    }

    pub fn set_fallback(&self, outcome: BindOutcome) {
        *self.fallback.lock().unwrap() = outcome;
    }

    /// Times at which bind requests arrived.
    pub fn bind_times(&self) -> Vec<Instant> {
        self.binds.lock().unwrap().clone()
    }

    pub fn bind_count(&self) -> usize {
        self.binds.lock().unwrap().len()
    }

    /// Gaps between consecutive bind requests.
    pub fn bind_gaps(&self) -> Vec<Duration> {
        self.bind_times()
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .collect()
    }

    pub fn unbind_count(&self) -> usize {
        self.unbinds.load(Ordering::SeqCst)
    }

    /// Events of the most recent bind request.
    pub fn last_events(&self) -> BindingEvents<S> {
        self.last_events
            .lock()
            .unwrap()
            .clone()
            .expect("no bind request yet")
    }

    /// Report the service connected on the most recent binding.
    pub fn connect_now(&self) {
        self.last_events().connected(Arc::clone(&self.service));
    }
}

impl<S: ?Sized + Send + Sync + 'static> ServiceBinder<S> for FakeBinder<S> {
    fn bind(&self, _action: &str, events: BindingEvents<S>) -> bool {
        self.binds.lock().unwrap().push(Instant::now());
        *self.last_events.lock().unwrap() = Some(events.clone());

        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| *self.fallback.lock().unwrap());
        match outcome {
            BindOutcome::Fail => false,
            BindOutcome::Connect => {
                events.connected(Arc::clone(&self.service));
                true
            }
            BindOutcome::Hang => true,
        }
    }

    fn unbind(&self, _action: &str) {
        self.unbinds.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn sample_properties() -> DisplayProperties {
    let mut friendly = BTreeMap::new();
    friendly.insert("Space".to_string(), "Space bar".to_string());
    DisplayProperties::new(40, 0, Vec::new(), friendly)
}

/// Display service that accepts registrations and reports a display as
/// soon as a callback is registered.
pub struct FakeDisplayService {
    refusals: Mutex<VecDeque<bool>>,
    time_out_after_announcing: AtomicBool,
    callback: Mutex<Option<Arc<dyn DisplayCallback>>>,
    dots: Mutex<Vec<Vec<u8>>>,
    registrations: AtomicUsize,
    unregistrations: AtomicUsize,
}

impl FakeDisplayService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            refusals: Mutex::new(VecDeque::new()),
            time_out_after_announcing: AtomicBool::new(false),
            callback: Mutex::new(None),
            dots: Mutex::new(Vec::new()),
            registrations: AtomicUsize::new(0),
            unregistrations: AtomicUsize::new(0),
        })
    }

    /// Refuse the next `count` registrations.
    pub fn refuse_next(&self, count: usize) {
        self.refusals.lock().unwrap().extend(std::iter::repeat(true).take(count));
    }

    /// Report the display connected, then fail every registration call
    /// with a timeout.
    pub fn time_out_after_announcing(&self) {
        self.time_out_after_announcing.store(true, Ordering::SeqCst);
    }

    pub fn callback(&self) -> Arc<dyn DisplayCallback> {
        self.callback
            .lock()
            .unwrap()
            .clone()
            .expect("no callback registered")
    }

    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    pub fn unregistrations(&self) -> usize {
        self.unregistrations.load(Ordering::SeqCst)
    }

    pub fn dots(&self) -> Vec<Vec<u8>> {
        self.dots.lock().unwrap().clone()
    }
}

#[async_trait]
impl DisplayService for FakeDisplayService {
    async fn register_callback(&self, callback: Arc<dyn DisplayCallback>) -> Result<bool, IpcError> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        if self.refusals.lock().unwrap().pop_front().is_some() {
            return Ok(false);
        }
        *self.callback.lock().unwrap() = Some(Arc::clone(&callback));
        callback.on_display_connected(sample_properties());
        if self.time_out_after_announcing.load(Ordering::SeqCst) {
            return Err(IpcError::Timeout(Duration::from_secs(30)));
        }
        Ok(true)
    }

    async fn unregister_callback(&self, _callback: Arc<dyn DisplayCallback>) -> Result<(), IpcError> {
        self.unregistrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn display_dots(&self, patterns: &[u8]) -> Result<(), IpcError> {
        self.dots.lock().unwrap().push(patterns.to_vec());
        Ok(())
    }
}

/// Table known to [`FakeTranslatorService`].
pub const TEST_TABLE: &str = "en-us-comp8";

/// Text that makes [`FakeTranslatorService`] fail the call.
pub const FAILING_TEXT: &str = "boom";

/// Translator with an invertible table: every ASCII byte is one cell.
pub struct FakeTranslatorService {
    callback: Mutex<Option<Arc<dyn TranslatorCallback>>>,
    set_callback_calls: AtomicUsize,
    time_out_after_init: AtomicBool,
}

impl FakeTranslatorService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            callback: Mutex::new(None),
            set_callback_calls: AtomicUsize::new(0),
            time_out_after_init: AtomicBool::new(false),
        })
    }

    /// Report `Success`, then fail every `set_callback` call with a timeout.
    pub fn time_out_after_init(&self) {
        self.time_out_after_init.store(true, Ordering::SeqCst);
    }

    pub fn set_callback_calls(&self) -> usize {
        self.set_callback_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranslatorService for FakeTranslatorService {
    async fn set_callback(&self, callback: Arc<dyn TranslatorCallback>) -> Result<(), IpcError> {
        self.set_callback_calls.fetch_add(1, Ordering::SeqCst);
        *self.callback.lock().unwrap() = Some(Arc::clone(&callback));
        callback.on_init(InitStatus::Success);
        if self.time_out_after_init.load(Ordering::SeqCst) {
            return Err(IpcError::Timeout(Duration::from_secs(30)));
        }
        Ok(())
    }

    async fn check_table(&self, table_name: &str) -> Result<bool, IpcError> {
        Ok(table_name == TEST_TABLE)
    }

    async fn translate(&self, text: &str, table_name: &str) -> Result<Option<Vec<u8>>, IpcError> {
        if text == FAILING_TEXT {
            return Err(IpcError::ServerError {
                code: -32000,
                message: "translation failed".to_string(),
                data: None,
            });
        }
        if table_name != TEST_TABLE || !text.is_ascii() {
            return Ok(None);
        }
        Ok(Some(text.bytes().collect()))
    }

    async fn back_translate(
        &self,
        cells: &[u8],
        table_name: &str,
    ) -> Result<Option<String>, IpcError> {
        if table_name != TEST_TABLE {
            return Ok(None);
        }
        Ok(String::from_utf8(cells.to_vec()).ok())
    }
}
