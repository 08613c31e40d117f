//! Scripted event-source doubles for streaming tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::transport::{ConnectParams, EventSource, EventSourceFactory, StreamEvent};

/// Plays back a scripted sequence of events, then pends forever like an idle
/// open connection.
pub(crate) struct ScriptedSource {
    events: VecDeque<StreamEvent>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn next_event(&mut self) -> StreamEvent {
        match self.events.pop_front() {
            Some(event) => event,
            None => futures::future::pending().await,
        }
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory producing [`ScriptedSource`]s; counts connections and close calls
/// and records the URI of the last connection.
pub(crate) struct CountingFactory {
    script: Mutex<Vec<StreamEvent>>,
    created: AtomicUsize,
    closes: Arc<AtomicUsize>,
    last_uri: Mutex<Option<String>>,
}

impl CountingFactory {
    pub(crate) fn new(script: Vec<StreamEvent>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            created: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
            last_uri: Mutex::new(None),
        })
    }

    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn last_uri(&self) -> Option<String> {
        self.last_uri.lock().unwrap().clone()
    }
}

impl EventSourceFactory for CountingFactory {
    fn create(&self, uri: &str, _params: &ConnectParams) -> Box<dyn EventSource> {
        self.created.fetch_add(1, Ordering::SeqCst);
        *self.last_uri.lock().unwrap() = Some(uri.to_string());
        Box::new(ScriptedSource {
            events: self.script.lock().unwrap().clone().into(),
            closes: Arc::clone(&self.closes),
        })
    }
}
